//! Community detection over the edge-weighted node graph
//!
//! Louvain-style local moving, made deterministic: nodes are visited in
//! ascending identity order and candidate moves resolve by (descending
//! modularity gain, ascending node identity, ascending target community).

use std::collections::BTreeMap;

use crate::types::PhraseId;

/// Weighted undirected edge between two nodes.
#[derive(Debug, Clone)]
pub struct WeightedEdge {
    pub a: PhraseId,
    pub b: PhraseId,
    pub weight: f64,
}

/// A partition of the node set into communities.
#[derive(Debug, Clone)]
pub struct Partition {
    /// Communities ordered by their smallest member id; members sorted.
    pub communities: Vec<Vec<PhraseId>>,
    /// Node id → index into `communities`.
    pub assignment: BTreeMap<PhraseId, usize>,
    pub modularity: f64,
}

/// Partition the node set, maximising modularity by greedy local moving.
/// Every node lands in exactly one community; isolated nodes become
/// singletons. Deterministic given sorted input.
pub fn detect_communities(node_ids: &[PhraseId], edges: &[WeightedEdge]) -> Partition {
    let mut nodes: Vec<PhraseId> = node_ids.to_vec();
    nodes.sort();
    nodes.dedup();

    let index: BTreeMap<&PhraseId, usize> = nodes.iter().enumerate().map(|(i, n)| (n, i)).collect();
    let n = nodes.len();

    // Adjacency with accumulated weights; self-loops are ignored.
    let mut adjacency: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); n];
    let mut total_weight = 0.0; // m
    for edge in edges {
        let (Some(&ia), Some(&ib)) = (index.get(&edge.a), index.get(&edge.b)) else {
            continue;
        };
        if ia == ib || edge.weight <= 0.0 {
            continue;
        }
        *adjacency[ia].entry(ib).or_insert(0.0) += edge.weight;
        *adjacency[ib].entry(ia).or_insert(0.0) += edge.weight;
        total_weight += edge.weight;
    }

    let degree: Vec<f64> = adjacency.iter().map(|nbrs| nbrs.values().sum()).collect();

    let mut community: Vec<usize> = (0..n).collect();

    if total_weight > 0.0 {
        let m = total_weight;
        let mut sigma_tot: Vec<f64> = degree.clone();

        loop {
            let mut moved = false;

            for node in 0..n {
                let current = community[node];
                let k_i = degree[node];

                // Weight from this node into each neighbouring community.
                let mut links: BTreeMap<usize, f64> = BTreeMap::new();
                for (&nbr, &w) in &adjacency[node] {
                    *links.entry(community[nbr]).or_insert(0.0) += w;
                }

                // Detach before evaluating moves.
                sigma_tot[current] -= k_i;

                let own_links = links.get(&current).copied().unwrap_or(0.0);
                let mut best_comm = current;
                let mut best_gain = gain(own_links, sigma_tot[current], k_i, m);

                for (&comm, &k_i_in) in &links {
                    if comm == current {
                        continue;
                    }
                    let g = gain(k_i_in, sigma_tot[comm], k_i, m);
                    // Strict improvement required; equal gains keep the
                    // smaller community id.
                    let better = g > best_gain + 1e-12
                        || ((g - best_gain).abs() <= 1e-12 && comm < best_comm);
                    if better {
                        best_gain = g;
                        best_comm = comm;
                    }
                }

                sigma_tot[best_comm] += k_i;
                if best_comm != current {
                    community[node] = best_comm;
                    moved = true;
                }
            }

            if !moved {
                break;
            }
        }
    }

    // Renumber communities by their smallest member, ascending.
    let mut members: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (node, &comm) in community.iter().enumerate() {
        members.entry(comm).or_default().push(node);
    }
    let mut groups: Vec<Vec<usize>> = members.into_values().collect();
    groups.sort_by_key(|g| g[0]);

    let mut communities = Vec::with_capacity(groups.len());
    let mut assignment = BTreeMap::new();
    for (idx, group) in groups.iter().enumerate() {
        let ids: Vec<PhraseId> = group.iter().map(|&i| nodes[i].clone()).collect();
        for id in &ids {
            assignment.insert(id.clone(), idx);
        }
        communities.push(ids);
    }

    let modularity = modularity_of(&community, &adjacency, &degree, total_weight);

    Partition { communities, assignment, modularity }
}

/// Modularity gain of attaching a detached node to a community.
fn gain(k_i_in: f64, sigma_tot: f64, k_i: f64, m: f64) -> f64 {
    k_i_in / (2.0 * m) - (sigma_tot * k_i) / (2.0 * m * m)
}

/// Q = (1/2m) Σ over ordered same-community pairs of (A_ij − k_i·k_j / 2m).
fn modularity_of(
    community: &[usize],
    adjacency: &[BTreeMap<usize, f64>],
    degree: &[f64],
    m: f64,
) -> f64 {
    if m <= 0.0 {
        return 0.0;
    }
    let mut internal = 0.0;
    let mut degree_sums: BTreeMap<usize, f64> = BTreeMap::new();
    for (node, nbrs) in adjacency.iter().enumerate() {
        *degree_sums.entry(community[node]).or_insert(0.0) += degree[node];
        for (&nbr, &w) in nbrs {
            if community[node] == community[nbr] {
                internal += w;
            }
        }
    }
    let expected: f64 = degree_sums.values().map(|s| s * s / (2.0 * m)).sum();
    (internal - expected) / (2.0 * m)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> PhraseId {
        PhraseId(s.to_string())
    }

    fn edge(a: &str, b: &str, weight: f64) -> WeightedEdge {
        WeightedEdge { a: id(a), b: id(b), weight }
    }

    #[test]
    fn two_cliques_split_into_two_communities() {
        let nodes: Vec<PhraseId> = ["a1", "a2", "a3", "b1", "b2", "b3"].iter().map(|s| id(s)).collect();
        let edges = vec![
            edge("a1", "a2", 1.0),
            edge("a2", "a3", 1.0),
            edge("a1", "a3", 1.0),
            edge("b1", "b2", 1.0),
            edge("b2", "b3", 1.0),
            edge("b1", "b3", 1.0),
            edge("a3", "b1", 0.1), // weak bridge
        ];
        let partition = detect_communities(&nodes, &edges);
        assert_eq!(partition.communities.len(), 2);
        assert!(partition.modularity > 0.3);

        // every node in exactly one community
        let total: usize = partition.communities.iter().map(|c| c.len()).sum();
        assert_eq!(total, nodes.len());
        assert_eq!(partition.assignment.len(), nodes.len());
    }

    #[test]
    fn isolated_nodes_become_singletons() {
        let nodes: Vec<PhraseId> = ["x", "y", "z"].iter().map(|s| id(s)).collect();
        let partition = detect_communities(&nodes, &[]);
        assert_eq!(partition.communities.len(), 3);
        assert_eq!(partition.modularity, 0.0);
    }

    #[test]
    fn is_deterministic_across_calls() {
        let nodes: Vec<PhraseId> = ["a", "b", "c", "d"].iter().map(|s| id(s)).collect();
        let edges = vec![
            edge("a", "b", 0.9),
            edge("c", "d", 0.9),
            edge("b", "c", 0.2),
        ];
        let p1 = detect_communities(&nodes, &edges);
        let p2 = detect_communities(&nodes, &edges);
        assert_eq!(p1.communities, p2.communities);
        assert_eq!(p1.modularity, p2.modularity);
    }

    #[test]
    fn pair_of_connected_nodes_forms_one_community() {
        let nodes: Vec<PhraseId> = ["a", "b"].iter().map(|s| id(s)).collect();
        let edges = vec![edge("a", "b", 0.8)];
        let partition = detect_communities(&nodes, &edges);
        assert_eq!(partition.communities.len(), 1);
        assert_eq!(partition.communities[0].len(), 2);
    }
}
