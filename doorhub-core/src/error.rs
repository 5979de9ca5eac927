use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Vision API error: {0}")]
    Vision(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<rumqttc::ClientError> for Error {
    fn from(err: rumqttc::ClientError) -> Self {
        Self::Bus(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
