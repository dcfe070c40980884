use std::env;
use std::time::Duration;

use crate::services::shutdown::ShutdownMode;

/// Configuration for shipping rotated log files to S3.
///
/// Set once before the coordinator starts; only the custom tag (see
/// [`crate::services::keys::CustomTagStore`]) may change afterwards.
#[derive(Debug, Clone)]
pub struct ShipperConfig {
    /// Access key for the bucket; when unset the ambient AWS credential
    /// chain is used
    pub access_key: Option<String>,

    /// Secret key paired with `access_key`
    pub secret_key: Option<String>,

    /// AWS region (default: "us-east-1")
    pub region: String,

    /// Endpoint override for S3-compatible stores such as MinIO; enables
    /// path-style addressing
    pub endpoint_url: Option<String>,

    /// Target bucket, created on first upload if missing (default: "logs")
    pub bucket: String,

    /// Folder pattern with `%d{...}` date tokens, e.g. `logs/%d{yyyy/MM}`
    pub folder_pattern: Option<String>,

    /// Prefix object names with a sortable `yyyyMMddHHmmss` timestamp
    /// (default: false)
    pub timestamp_prefix: bool,

    /// Prefix object names with the resolved instance identifier
    /// (default: false)
    pub identifier_prefix: bool,

    /// Perform one final rollover during shutdown instead of uploading the
    /// active file as-is (default: false)
    pub rollover_on_exit: bool,

    /// How the shutdown handler is triggered (default: none)
    pub shutdown_mode: ShutdownMode,

    /// Ceiling for each wait on the host's compression/cleanup job
    /// (default: 30 seconds)
    pub archive_wait: Duration,

    /// Ceiling for the shutdown drain of the upload queue
    /// (default: 10 minutes)
    pub drain_timeout: Duration,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            access_key: None,
            secret_key: None,
            region: "us-east-1".to_string(),
            endpoint_url: None,
            bucket: "logs".to_string(),
            folder_pattern: None,
            timestamp_prefix: false,
            identifier_prefix: false,
            rollover_on_exit: false,
            shutdown_mode: ShutdownMode::None,
            archive_wait: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(10 * 60),
        }
    }
}

impl ShipperConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            access_key: env::var("S3_SHIPPER_ACCESS_KEY")
                .ok()
                .filter(|v| !v.is_empty()),

            secret_key: env::var("S3_SHIPPER_SECRET_KEY")
                .ok()
                .filter(|v| !v.is_empty()),

            region: env::var("S3_SHIPPER_REGION").unwrap_or(default.region),

            endpoint_url: env::var("S3_SHIPPER_ENDPOINT")
                .ok()
                .filter(|v| !v.is_empty()),

            bucket: env::var("S3_SHIPPER_BUCKET").unwrap_or(default.bucket),

            folder_pattern: env::var("S3_SHIPPER_FOLDER_PATTERN")
                .ok()
                .filter(|v| !v.is_empty()),

            timestamp_prefix: env::var("S3_SHIPPER_TIMESTAMP_PREFIX")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(default.timestamp_prefix),

            identifier_prefix: env::var("S3_SHIPPER_IDENTIFIER_PREFIX")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(default.identifier_prefix),

            rollover_on_exit: env::var("S3_SHIPPER_ROLLOVER_ON_EXIT")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(default.rollover_on_exit),

            shutdown_mode: env::var("S3_SHIPPER_SHUTDOWN_MODE")
                .map(|v| ShutdownMode::from_name(&v))
                .unwrap_or(default.shutdown_mode),

            archive_wait: env::var("S3_SHIPPER_ARCHIVE_WAIT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.archive_wait),

            drain_timeout: env::var("S3_SHIPPER_DRAIN_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.drain_timeout),
        }
    }
}
