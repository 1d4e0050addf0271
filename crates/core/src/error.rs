use crate::shader::ShaderStage;

/// Result alias that carries the custom [`VizError`] type.
pub type Result<T> = std::result::Result<T, VizError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum VizError {
    /// The audio device or file backing a source could not be opened.
    #[error("audio source unavailable: {0}")]
    SourceUnavailable(String),
    /// The analyzer was read before any source was attached.
    #[error("no audio source attached")]
    NotInitialized,
    #[error("preset `{0}` not found")]
    NotFound(String),
    #[error("no export is being recorded")]
    NotRecording,
    #[error("an export is already being recorded on this surface")]
    AlreadyRecording,
    #[error("unsupported capability: {0}")]
    UnsupportedCapability(String),
    /// A single shader stage failed to parse or validate.
    #[error("{stage} shader failed to compile:\n{log}")]
    CompileError { stage: ShaderStage, log: String },
    #[error("shader program failed to link:\n{log}")]
    LinkError { log: String },
    #[error("no shader program is bound")]
    NoProgramBound,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("gpu backend error: {0}")]
    Gpu(String),
    #[error("encoder error: {0}")]
    Encoder(String),
    /// Free-form failure, mostly poisoned locks and worker panics.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl VizError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Shorthand for [`VizError::InvalidInput`].
    pub fn invalid<T: Into<String>>(msg: T) -> Self {
        Self::InvalidInput(msg.into())
    }
}

impl From<&str> for VizError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for VizError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
