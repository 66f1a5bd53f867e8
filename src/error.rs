use serde::Serialize;
use thiserror::Error;
use warp::{
    Rejection, Reply,
    hyper::StatusCode,
    reject::{InvalidHeader, MissingHeader, Reject},
};

#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Could not establish database connection: {0}")]
    DatabaseConnectionError(String),
    #[error("There has been an error executing a query: '{0}'")]
    QueryError(String),
    #[error("Failed to decode request header as valid utf8")]
    UtfEncodingError,
    #[error("The auth header is not formatted correctly (expected JWT 'Bearer ' header)")]
    InvalidAuthHeaderError,
    #[error("No auth header provided")]
    MissingAuthHeaderError,
    #[error("The JWT is not or no longer valid")]
    InvalidJwtError,
    #[error("Invalid video id: '{0}'")]
    InvalidIdError(String),
    #[error("Not the owner of the video")]
    NotVideoOwnerError,
    #[error("The uploaded file is invalid: {0}")]
    InvalidFileError(String),
    #[error("Invalid Content-Type: '{0}'")]
    InvalidContentTypeError(String),
    #[error("Unsupported media type: '{0}'")]
    UnsupportedMediaTypeError(String),
    #[error("The request body exceeds the upload limit of {0} bytes")]
    PayloadTooLargeError(u64),
    #[error("No thumbnail found for video {0}")]
    ThumbnailNotFoundError(uuid::Uuid),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Error in ffmpeg process: {0}")]
    FfmpegProcessError(String),
    #[error("S3 error: {0}")]
    S3Error(String),
    #[error("S3 responded with non-success status {0}")]
    S3ResponseError(u16),
    #[error("The task was cancelled before completion")]
    CancellationError,
    #[error("Invalid url: {0}")]
    InvalidUrlError(String),
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

impl Reject for Error {}

impl From<s3::error::S3Error> for Error {
    fn from(e: s3::error::S3Error) -> Self {
        Self::S3Error(e.to_string())
    }
}

impl From<diesel::result::Error> for Error {
    fn from(e: diesel::result::Error) -> Self {
        Self::QueryError(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    message: String,
    status: String,
}

impl Error {
    /// Returns the status code and the message exposed to the client. Internal errors only expose
    /// a generic message, the details are logged instead.
    pub fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            Error::MissingAuthHeaderError
            | Error::InvalidAuthHeaderError
            | Error::InvalidJwtError
            | Error::NotVideoOwnerError => (StatusCode::UNAUTHORIZED, self.to_string()),
            Error::UtfEncodingError
            | Error::InvalidIdError(_)
            | Error::InvalidFileError(_)
            | Error::InvalidContentTypeError(_)
            | Error::UnsupportedMediaTypeError(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            Error::ThumbnailNotFoundError(_) => (StatusCode::NOT_FOUND, self.to_string()),
            Error::PayloadTooLargeError(_) => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),
            Error::DatabaseConnectionError(_)
            | Error::QueryError(_)
            | Error::IoError(_)
            | Error::FfmpegProcessError(_)
            | Error::S3Error(_)
            | Error::S3ResponseError(_)
            | Error::CancellationError
            | Error::InvalidUrlError(_)
            | Error::ConfigError(_) => {
                log::error!("Encountered internal server error: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    String::from("Internal server error"),
                )
            }
        }
    }
}

/// Creates a Rejection response for the given error and logs internal server errors. Malformed or
/// missing request headers rejected by warp's filters are reported with the same envelope.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Rejection> {
    let (code, message) = if let Some(e) = err.find::<Error>() {
        e.status_and_message()
    } else if let Some(e) = err.find::<MissingHeader>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if let Some(e) = err.find::<InvalidHeader>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else {
        return Err(err);
    };

    let err_response = ErrorResponse {
        message,
        status: code.to_string(),
    };

    let json = warp::reply::json(&err_response);

    Ok(warp::reply::with_status(json, code))
}
