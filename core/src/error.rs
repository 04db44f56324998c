use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModemError {
    #[error("requested block lies outside the spectral history")]
    BlockOutOfRange,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, ModemError>;
