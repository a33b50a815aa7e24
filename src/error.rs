//! Crate-wide error type.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("qr encode error: {0}")]
    QrEncode(#[from] qrcode::types::QrError),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// The chat gateway answered with a non-success status.
    #[error("gateway error {status}: {message}")]
    Gateway { status: u16, message: String },

    #[error("send timed out after {0:?}")]
    SendTimeout(Duration),

    /// A log record violated a required-field invariant.
    #[error("invalid log record: {0}")]
    InvalidRecord(&'static str),

    #[error("invalid configuration: {0}")]
    Config(String),
}
