/// Errors that can occur while building or reshaping MCU messages.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The message region could not be allocated.
    #[error("out of memory allocating {size} byte message")]
    OutOfMemory { size: usize },

    /// Not enough front margin left to prepend a header.
    #[error("no headroom ({needed} bytes needed, {available} available)")]
    NoHeadroom { needed: usize, available: usize },

    /// Not enough back margin left to append data.
    #[error("no tailroom ({needed} bytes needed, {available} available)")]
    NoTailroom { needed: usize, available: usize },

    /// The message is shorter than the header being stripped.
    #[error("message truncated ({len} bytes, need {needed})")]
    Truncated { needed: usize, len: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
