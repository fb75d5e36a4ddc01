use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid report: {0}")]
    InvalidReport(String),
}

pub type Result<T> = std::result::Result<T, Error>;
