use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SosError {
    #[error("Location unavailable: {0}")]
    LocationUnavailable(String),

    #[error("Camera or microphone access denied: {0}")]
    MediaAccessDenied(String),

    #[error("Video upload failed: {0}")]
    UploadFailure(String),

    #[error("Alert persistence failed: {0}")]
    PersistenceFailure(String),
}

impl From<sqlx::Error> for SosError {
    fn from(error: sqlx::Error) -> Self {
        SosError::PersistenceFailure(error.to_string())
    }
}

impl From<reqwest::Error> for SosError {
    fn from(error: reqwest::Error) -> Self {
        SosError::UploadFailure(error.to_string())
    }
}

pub type SosResult<T> = Result<T, SosError>;
