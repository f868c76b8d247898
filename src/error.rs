//! Error taxonomy: adapter failures, run failures, structured warnings

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pipeline stage names, used for warnings, provenance, and failure records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Intake,
    Normalize,
    Candidates,
    Extract,
    Score,
    Classify,
    Select,
    Cluster,
    Emit,
    Finalized,
    Failed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Intake => "INTAKE",
            Stage::Normalize => "NORMALIZE",
            Stage::Candidates => "CANDIDATES",
            Stage::Extract => "EXTRACT",
            Stage::Score => "SCORE",
            Stage::Classify => "CLASSIFY",
            Stage::Select => "SELECT",
            Stage::Cluster => "CLUSTER",
            Stage::Emit => "EMIT",
            Stage::Finalized => "FINALIZED",
            Stage::Failed => "FAILED",
        }
    }
}

/// Categorised failure an adapter call can surface.
///
/// Retries live inside the adapter; the core observes one
/// success-or-failure per call.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum AdapterError {
    #[error("provider unavailable: {message}")]
    ProviderUnavailable { message: String },
    #[error("rate limited: {message}")]
    RateLimited { message: String },
    #[error("auth missing: {message}")]
    AuthMissing { message: String },
    #[error("malformed response: {message}")]
    MalformedResponse { message: String },
    #[error("timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
}

impl AdapterError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        AdapterError::ProviderUnavailable { message: message.into() }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        AdapterError::MalformedResponse { message: message.into() }
    }
}

pub type AdapterResult<T> = Result<T, AdapterError>;

/// Category tag on the structured failure record callers must handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    ValidationFailure,
    StageContractUnsatisfied,
}

/// The only failure surface of a run: fatal, with a pointer to the cause.
///
/// Recoverable errors never reach this type; they are absorbed by the
/// owning stage and surface as [`RunWarning`]s in the artifacts.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("run failed at {stage:?} ({category:?}): {message}")]
pub struct RunFailure {
    pub category: FailureCategory,
    pub stage: Stage,
    pub message: String,
    /// Pointer to the first violation for validation failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pointer: Option<String>,
}

impl RunFailure {
    pub fn validation(stage: Stage, message: impl Into<String>, pointer: impl Into<String>) -> Self {
        Self {
            category: FailureCategory::ValidationFailure,
            stage,
            message: message.into(),
            pointer: Some(pointer.into()),
        }
    }

    pub fn contract(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            category: FailureCategory::StageContractUnsatisfied,
            stage,
            message: message.into(),
            pointer: None,
        }
    }
}

/// Structured warning keyed by the affected entity, carried in artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunWarning {
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    pub message: String,
}

impl RunWarning {
    pub fn item(stage: Stage, entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage,
            entity: Some(entity.into()),
            message: message.into(),
        }
    }

    pub fn stage_level(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            entity: None,
            message: message.into(),
        }
    }
}
