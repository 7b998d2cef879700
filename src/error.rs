use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A blocking wait was interrupted. Retrying the call is always safe.
    #[error("blocking wait was interrupted")]
    Cancelled,

    #[error("no consumer left on the channel")]
    BrokenPipe,

    #[error("all session slots are taken, try again later")]
    WouldBlockAgain,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("could not allocate a drain batch of {requested} values")]
    ResourceExhausted { requested: usize },

    #[error("failed to spawn thread '{name}'")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to read config file {}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed config: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl Error {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn spawn(name: impl Into<String>, source: io::Error) -> Self {
        Self::Spawn {
            name: name.into(),
            source,
        }
    }

    /// Whether the same call may succeed if issued again unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Cancelled | Self::WouldBlockAgain)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
