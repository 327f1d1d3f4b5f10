//! Error types for the CLI

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or unusable command line input; printed verbatim
    #[error("{0}")]
    Config(String),

    #[error(transparent)]
    Migration(#[from] kn_migrate::Error),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }
}
