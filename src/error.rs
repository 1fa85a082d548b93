//! Error types shared across the capture and persistence layers.

use std::time::Duration;

use thiserror::Error;

/// Camera acquisition and capture failures.
///
/// The first four variants mirror the reasons a device open can fail and are
/// all recoverable by retrying after the operator fixes the underlying issue
/// (grant permission, plug in a camera, close the other app).
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),

    #[error("no usable camera device: {0}")]
    NotFound(String),

    #[error("camera is in use by another application: {0}")]
    Busy(String),

    #[error("camera not supported on this system: {0}")]
    Unsupported(String),

    #[error("frame capture failed: {0}")]
    Capture(String),
}

impl CameraError {
    /// Stable identifier used in error events sent to the UI.
    pub fn kind(&self) -> &'static str {
        match self {
            CameraError::PermissionDenied(_) => "cameraPermissionDenied",
            CameraError::NotFound(_) => "cameraNotFound",
            CameraError::Busy(_) => "cameraBusy",
            CameraError::Unsupported(_) => "cameraUnsupported",
            CameraError::Capture(_) => "cameraCapture",
        }
    }
}

/// Failures from the vision analysis service.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The request was superseded (new capture, view closed, auto-scan
    /// toggled off). Callers discard the attempt without surfacing anything.
    #[error("analysis cancelled")]
    Cancelled,

    #[error("analysis timed out after {0:?}")]
    TimedOut(Duration),

    #[error("analysis service error: {0}")]
    Service(String),

    #[error("analysis response was not valid JSON: {0}")]
    MalformedResponse(String),
}

impl AnalysisError {
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::Cancelled => "analysisCancelled",
            AnalysisError::TimedOut(_) => "analysisTimedOut",
            AnalysisError::Service(_) => "analysisServiceError",
            AnalysisError::MalformedResponse(_) => "analysisMalformedResponse",
        }
    }
}

/// Failures while saving or reading inspection results.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Unknown inspection id, or an inspection owned by another inspector.
    /// Both cases answer identically.
    #[error("inspection not found")]
    NotFound,

    #[error("inspection is already completed")]
    AlreadyCompleted,

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl PersistenceError {
    pub fn kind(&self) -> &'static str {
        match self {
            PersistenceError::NotFound => "persistenceNotFound",
            PersistenceError::AlreadyCompleted => "persistenceAlreadyCompleted",
            PersistenceError::Storage(_) => "persistenceStorage",
        }
    }
}
