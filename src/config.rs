//! Runtime configuration, read once from the environment at startup.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::BridgeError;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GATEWAY_URL: &str = "http://127.0.0.1:3000";
const DEFAULT_FORWARD_URL: &str = "https://devapi.courstore.com/v1/qr/for_login";
const DEFAULT_SEND_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Base URL of the chat gateway that owns the protocol session
    pub gateway_url: String,
    pub log_file: PathBuf,
    pub qr_file: PathBuf,
    pub media_dir: PathBuf,
    /// Where freshly issued login codes are POSTed; `None` disables forwarding
    pub qr_forward_url: Option<String>,
    pub send_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, BridgeError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, BridgeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match lookup("PORT") {
            Some(p) => p
                .trim()
                .parse::<u16>()
                .map_err(|_| BridgeError::Config(format!("PORT is not a valid port: {p}")))?,
            None => DEFAULT_PORT,
        };

        let send_timeout_secs = match lookup("WA_BRIDGE_SEND_TIMEOUT_SECS") {
            Some(s) => s.trim().parse::<u64>().map_err(|_| {
                BridgeError::Config(format!("WA_BRIDGE_SEND_TIMEOUT_SECS is not a number: {s}"))
            })?,
            None => DEFAULT_SEND_TIMEOUT_SECS,
        };

        // Set-but-empty turns forwarding off
        let qr_forward_url = match lookup("WA_BRIDGE_QR_FORWARD_URL") {
            Some(url) if url.trim().is_empty() => None,
            Some(url) => Some(url),
            None => Some(DEFAULT_FORWARD_URL.to_string()),
        };

        Ok(Self {
            port,
            gateway_url: lookup("WA_BRIDGE_GATEWAY_URL")
                .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string()),
            log_file: PathBuf::from(
                lookup("WA_BRIDGE_LOG_FILE").unwrap_or_else(|| "messages.csv".to_string()),
            ),
            qr_file: PathBuf::from(
                lookup("WA_BRIDGE_QR_FILE").unwrap_or_else(|| "qrcode.txt".to_string()),
            ),
            media_dir: PathBuf::from(
                lookup("WA_BRIDGE_MEDIA_DIR").unwrap_or_else(|| "media".to_string()),
            ),
            qr_forward_url,
            send_timeout: Duration::from_secs(send_timeout_secs),
        })
    }
}
