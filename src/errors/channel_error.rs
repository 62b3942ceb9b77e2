use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,
    #[error("channel timed out")]
    Timeout,
    #[error("failed to connect channel: {0}")]
    Connect(String),
    #[error("channel io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ssh error: {0}")]
    Ssh(#[from] ssh2::Error),
}
