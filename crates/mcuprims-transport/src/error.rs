/// Errors reported by the bus-side hooks.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Transient failure; the command may be sent again.
    #[error("transient send failure: {0}")]
    Retry(String),

    /// The controller answered with a failure status.
    #[error("controller rejected command {cmd:#010x} (status {status})")]
    Rejected { cmd: u32, status: u8 },

    /// A reply could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Building or reshaping a message failed.
    #[error("frame error: {0}")]
    Frame(#[from] mcuprims_frame::FrameError),

    /// An I/O error occurred on the bus.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The bus has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// Whether the command path should spend a retry on this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retry(_))
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
