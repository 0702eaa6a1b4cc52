//! Error types for the pretraining driver

use thiserror::Error;

/// Result type alias using the driver Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type shared by every driver crate
#[derive(Error, Debug)]
pub enum Error {
    // Process environment errors
    #[error("Missing environment variable: {var}")]
    MissingEnv { var: String },

    #[error("Invalid environment variable {var}={value:?}: {reason}")]
    InvalidEnv {
        var: String,
        value: String,
        reason: String,
    },

    // Configuration errors
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // Experiment tracking errors
    #[error("Experiment tracking is enabled but unavailable: {reason}")]
    TrackerUnavailable { reason: String },

    #[error("Experiment tracker error: {message}")]
    Tracker { message: String },

    // Checkpoint errors
    #[error("Checkpoint write failed at step {step}: {message}")]
    CheckpointWriteFailed { step: u64, message: String },

    #[error("Checkpoint not found: {path}")]
    CheckpointNotFound { path: String },

    #[error("Checkpoint corrupted: {path} - {reason}")]
    CheckpointCorrupted { path: String, reason: String },

    // Collective communication errors
    #[error("Collective reduction failed: {message}")]
    Collective { message: String },

    #[error("Collective length mismatch: expected {expected} values, got {actual}")]
    CollectiveLengthMismatch { expected: usize, actual: usize },

    // Collaborator errors
    #[error("Data loader error: {message}")]
    DataLoader { message: String },

    #[error("Model error: {message}")]
    Model { message: String },

    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    // Hardware capability probe errors
    #[error("Hardware probe {probe} failed: {message}")]
    Probe { probe: String, message: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Returns true if this error must terminate the whole process group.
    /// Capability lookups and tracker log writes only degrade the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Probe { .. } | Error::Tracker { .. })
    }

    /// Returns true if this error is a configuration or environment problem
    /// that surfaces before any training step runs
    pub fn is_startup_error(&self) -> bool {
        matches!(
            self,
            Error::MissingEnv { .. }
                | Error::InvalidEnv { .. }
                | Error::InvalidConfig { .. }
                | Error::TrackerUnavailable { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
