/// A frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The buffer cannot even hold the fixed preamble.
    #[error("frame too short: {len} bytes, need at least {min}")]
    TooShort { len: usize, min: usize },
}

/// All error types that can occur when talking to gateways and bulbs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A received frame could not be decoded.
    #[error("failed to decode frame: {0}")]
    Decode(#[from] DecodeError),

    /// A network socket operation failed.
    #[error("socket {action} error: {err:?}")]
    Socket { action: String, err: std::io::Error },

    /// Text that should be a 6-byte hex address is not one.
    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    /// A command named a bulb the registry does not know.
    #[error("unknown bulb {0:?}")]
    UnknownBulb(String),

    /// The client has been closed and no longer accepts commands.
    #[error("client is closed")]
    Closed,

    /// A gateway's outbound queue is full, usually because it has been
    /// unreachable for a while. The frame was dropped.
    #[error("outbound queue for gateway {0} is full")]
    QueueFull(std::net::Ipv4Addr),
}

impl Error {
    /// Create a new socket error
    pub fn socket(action: &str, err: std::io::Error) -> Self {
        Error::Socket {
            action: action.to_string(),
            err,
        }
    }
}

/// Hacky implementation of PartialEq for testing
#[cfg(test)]
impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}
