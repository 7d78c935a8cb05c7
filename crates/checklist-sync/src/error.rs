use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No credentials are available for the remote store.
    Unconfigured,
    /// The remote store has no record for the requested client.
    NotFound,
    /// The revision sent with a write is stale.
    Conflict { message: String },
    /// Any other transport or HTTP failure. `status` is 0 for transport errors.
    Remote { status: u16, message: String },
    /// The stored payload is not valid structured data.
    Decode(String),
    InvalidClientId(String),
    Msg(String),
}

impl Error {
    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self::Msg(msg.into())
    }

    pub fn remote<M: Into<String>>(status: u16, message: M) -> Self {
        Self::Remote {
            status,
            message: message.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unconfigured => write!(f, "remote store is not configured (missing token)"),
            Self::NotFound => write!(f, "no remote record exists for this client"),
            Self::Conflict { message } => {
                write!(f, "remote record changed since it was loaded: {message}")
            }
            Self::Remote { status: 0, message } => write!(f, "remote request failed: {message}"),
            Self::Remote { status, message } => write!(f, "remote error {status}: {message}"),
            Self::Decode(msg) => write!(f, "invalid record payload: {msg}"),
            Self::InvalidClientId(raw) => write!(
                f,
                "invalid client number '{raw}' (expected exactly 10 digits)"
            ),
            Self::Msg(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
