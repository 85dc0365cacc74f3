use std::{
    error::Error,
    fmt::Display,
    io::{self},
};

/// Errors that may occur when exchanging frames with a board.
#[derive(Debug)]
pub enum ReadError {
    IoError(io::Error),
    /// A command cannot be encoded, e.g. a payload of the wrong length.
    InvalidCommand(String),
    /// The board answered with an unexpected product string.
    UnsupportedProduct(String),
    /// A response could not be interpreted.
    InvalidFormat(String),
    TooManyBytes { max: usize, got: usize },
}

impl From<io::Error> for ReadError {
    fn from(value: io::Error) -> Self {
        ReadError::IoError(value)
    }
}

impl Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadError::IoError(error) => write!(f, "{}", error),
            ReadError::InvalidCommand(cmd) => write!(f, "Cannot encode command: {}", cmd),
            ReadError::UnsupportedProduct(product) => {
                write!(f, "Unsupported product {}", product)
            }
            ReadError::InvalidFormat(format) => write!(f, "{}", format),
            ReadError::TooManyBytes { max, got } => {
                write!(f, "Payload too large! Maximum is {}, but got {}", max, got)
            }
        }
    }
}

impl Error for ReadError {}
