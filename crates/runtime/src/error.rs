use thiserror::Error;

use crate::model::ModelError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("connection error: {0}")]
    Connection(#[from] mcp::Error),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("output error: {0}")]
    Output(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
