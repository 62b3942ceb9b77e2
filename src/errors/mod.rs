mod channel_error;
mod transport_error;

pub use channel_error::ChannelError;
pub use transport_error::{TransportError, TransportErrorKind};
