//! Ships rotated log files to S3 in the background.
//!
//! A [`RolloverCoordinator`] wraps the host's rotation policy through the
//! [`RollingPolicy`] trait: every rotation event queues the archived file on
//! a single-concurrency upload worker, waiting out the host's compression
//! and cleanup work first, and the shutdown protocol drains that worker
//! before the process exits.
//!
//! # Example
//!
//! ```ignore
//! use s3_log_shipper::{CustomTagStore, RolloverCoordinator, ShipperConfig};
//!
//! let config = ShipperConfig::from_env();
//! let tag = CustomTagStore::new();
//! let coordinator = RolloverCoordinator::start(&config, Box::new(policy), tag.clone());
//!
//! // On every rotation callback from the host:
//! coordinator.on_rollover()?;
//!
//! // With ShutdownMode::None, tear down explicitly:
//! coordinator.shutdown().await;
//! ```

pub mod config;
pub mod error;
pub mod services;

// Re-export main types
pub use config::ShipperConfig;
pub use error::RolloverError;
pub use services::coordinator::{ArchiveJob, CompressionMode, RollingPolicy, RolloverCoordinator};
pub use services::identity::{FixedIdentifier, IdentifierProvider, InstanceIdentifier};
pub use services::keys::{CustomTagStore, ObjectKeyFormatter, expand_date_tokens};
pub use services::shutdown::{
    ShutdownListener, ShutdownMode, deregister_lifecycle_listener, fire_lifecycle_shutdown,
    register_lifecycle_listener,
};
pub use services::storage::{ObjectStorage, RecordedUpload, RecordingStorage, S3Storage};
pub use services::uploader::{UploadJob, UploadWorker};
