use mcuprims_frame::FrameError;
use mcuprims_transport::{McuCmd, Seq, TransportError};

/// Errors that can occur while issuing MCU commands.
#[derive(Debug, thiserror::Error)]
pub enum McuError {
    /// A message buffer could not be allocated.
    #[error("out of memory allocating {size} byte message")]
    OutOfMemory { size: usize },

    /// The bus is hung while the controller is being reset.
    #[error("bus hung during controller reset")]
    Io,

    /// No matching reply arrived on any attempt.
    #[error("command {cmd:#010x} (seq {seq}) timed out after {attempts} attempt(s)")]
    TimedOut {
        cmd: McuCmd,
        seq: Seq,
        attempts: u32,
    },

    /// A bus hook failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A message could not be built.
    #[error("frame error: {0}")]
    Frame(FrameError),

    /// Firmware chunks must hold at least one byte.
    #[error("firmware chunk size must be non-zero")]
    InvalidChunkSize,
}

impl From<FrameError> for McuError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::OutOfMemory { size } => Self::OutOfMemory { size },
            other => Self::Frame(other),
        }
    }
}

impl McuError {
    /// Whether the command failed because the controller never answered.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

pub type Result<T> = std::result::Result<T, McuError>;
