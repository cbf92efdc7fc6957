//! CLI error types.

use thiserror::Error;

use crate::config::ConfigError;

/// CLI errors. Any of these ends the process with a non-zero exit code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration is invalid or the credential is missing.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The tool server could not be started.
    #[error(transparent)]
    Runtime(#[from] runtime::Error),

    /// Reading the terminal or writing the console failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
