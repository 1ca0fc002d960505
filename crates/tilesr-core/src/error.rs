//! Typed error hierarchy for the engine.
//!
//! Uses `thiserror` for library-grade errors.  Every variant maps to a stable
//! integer code via [`EngineError::error_code`] so bindings can surface a
//! numeric status without string parsing.

use std::path::PathBuf;

/// All errors originating from the tilesr engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    Config(String),

    // ── Model loading ────────────────────────────────────────────────
    #[error("Model file not found: {}", path.display())]
    ModelFileMissing { path: PathBuf },

    #[error("Model parse error in {}: {message}", path.display())]
    ModelParse { path: PathBuf, message: String },

    #[error("Model weights do not match topology: {0}")]
    ModelVersionMismatch(String),

    #[error("No model loaded; call load() first")]
    NotLoaded,

    // ── Device ───────────────────────────────────────────────────────
    #[error("Compute device unavailable: {0}")]
    DeviceUnavailable(String),

    // ── Inference ────────────────────────────────────────────────────
    #[error("Inference error: {0}")]
    Inference(String),

    #[error(
        "Device memory budget exceeded: requested {requested_bytes} bytes with {current_bytes} \
         in use, limit {limit_bytes}"
    )]
    OutOfMemory {
        limit_bytes: usize,
        current_bytes: usize,
        requested_bytes: usize,
    },

    // ── Image contracts ──────────────────────────────────────────────
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    // ── Plumbing ─────────────────────────────────────────────────────
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker task failed: {0}")]
    TaskJoin(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl EngineError {
    /// Stable integer error code.
    ///
    /// Codes are grouped by category:
    /// - 1xx: configuration
    /// - 2xx: model loading
    /// - 3xx: device
    /// - 4xx: inference
    /// - 5xx: image contracts
    /// - 6xx: plumbing / invariants
    pub fn error_code(&self) -> u32 {
        match self {
            Self::Config(_) => 100,
            Self::ModelFileMissing { .. } => 200,
            Self::ModelParse { .. } => 201,
            Self::ModelVersionMismatch(_) => 202,
            Self::NotLoaded => 203,
            Self::DeviceUnavailable(_) => 300,
            Self::Inference(_) => 400,
            Self::OutOfMemory { .. } => 401,
            Self::InvalidImage(_) => 500,
            Self::DimensionMismatch(_) => 501,
            Self::Io { .. } => 600,
            Self::TaskJoin(_) => 601,
            Self::InvariantViolation(_) => 602,
        }
    }

    /// Whether the failed call can be retried on the same engine.
    ///
    /// Inference-time failures leave the engine reusable; retrying with a
    /// smaller tile size is the caller's decision.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Inference(_) | Self::OutOfMemory { .. })
    }

    /// Shorthand for [`EngineError::ModelParse`].
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ModelParse {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, EngineError>;
