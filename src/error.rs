use std::path::PathBuf;

use thiserror::Error;

use crate::window::WindowId;

/// Failures surfaced to bridge callers.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Window {0} not found")]
    WindowNotFound(WindowId),

    #[error("{operation} failed for '{}': {source}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parent directory does not exist: {}", .0.display())]
    ParentMissing(PathBuf),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),

    #[error("{operation} failed: {message}")]
    Native {
        operation: &'static str,
        message: String,
    },

    #[error("Window ID space exhausted (u32 overflow)")]
    IdSpaceExhausted,

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Renderer(#[from] RendererError),

    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

impl HostError {
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HostError::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub fn native(operation: &'static str, message: impl ToString) -> Self {
        HostError::Native {
            operation,
            message: message.to_string(),
        }
    }
}

/// Failures of the UI dispatcher.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Already running.")]
    AlreadyRunning,

    #[error("UI dispatcher is not running")]
    Stopped,

    #[error("UI work item panicked: {message}")]
    WorkItemPanicked { message: String },

    #[error("invoked work panicked: {message}")]
    InvokePanicked { message: String },

    #[error("{0} must be called on the UI thread")]
    WrongThread(&'static str),
}

/// Failures of the embedded renderer's asynchronous initialization.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RendererError {
    #[error("renderer environment creation failed (code {code:#010x})")]
    EnvironmentFailed { code: i32 },

    #[error("renderer controller creation failed (code {code:#010x})")]
    ControllerFailed { code: i32 },

    #[error("renderer configuration failed at {step}: {message}")]
    Configure { step: &'static str, message: String },

    #[error("renderer is not ready")]
    NotReady,

    #[error("renderer backend error: {message}")]
    Backend { message: String },
}

pub type HostResult<T> = Result<T, HostError>;

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
