//! Change-driven monitors.
//!
//! A monitor keeps one local resource and one remote record in step. Each
//! tick it fingerprints the local value, asks the store for the remote
//! record's metadata, and lets [`kvdrop_core::SyncState`] decide whether to
//! push, pull or do nothing.
//!
//! # Resources
//!
//! A [`LocalResource`] is anything holding one value: a file, a clipboard,
//! the current IP address, a sensor reading. [`MemoryResource`] and
//! [`FileResource`] are provided; other accessors live with their callers.

mod resource;
mod sync;

pub use resource::{FileResource, MemoryResource};
pub use sync::{Monitor, MonitorConfig, MonitorHandle, MonitorStatus, TickReport};

use async_trait::async_trait;
use thiserror::Error;

use crate::client::ClientError;

/// Local resource errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    /// The resource could not be accessed right now; the next tick may succeed.
    #[error("resource unavailable: {0}")]
    Unavailable(String),

    /// The resource is broken and will stay broken.
    #[error("resource failed: {0}")]
    Failed(String),

    /// The resource cannot be written.
    #[error("resource is read-only")]
    ReadOnly,
}

impl ResourceError {
    /// Whether retrying on a later tick cannot help.
    pub fn is_permanent(&self) -> bool {
        !matches!(self, ResourceError::Unavailable(_))
    }
}

/// A local value a monitor watches.
#[async_trait]
pub trait LocalResource: Send + Sync {
    /// Current value, or `None` if the resource holds nothing.
    async fn read(&self) -> Result<Option<Vec<u8>>, ResourceError>;

    /// Replace the current value.
    async fn write(&self, value: &[u8]) -> Result<(), ResourceError>;

    /// Whether `write` is supported. Pull monitors require it.
    fn is_writable(&self) -> bool {
        true
    }
}

/// Monitor errors.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Local resource error.
    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),

    /// Remote client error.
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    /// The monitor was configured with unusable settings.
    #[error("invalid monitor config: {0}")]
    InvalidConfig(String),

    /// The monitor task panicked or was aborted.
    #[error("monitor task failed: {0}")]
    TaskFailed(String),
}

impl MonitorError {
    /// Whether the error stops the monitor loop.
    ///
    /// Transient client failures and temporarily unavailable resources are
    /// reported and the loop carries on; everything else is fatal.
    pub fn is_fatal(&self) -> bool {
        match self {
            MonitorError::Resource(e) => e.is_permanent(),
            MonitorError::Client(ClientError::Transient { .. }) => false,
            MonitorError::Client(_) => true,
            MonitorError::InvalidConfig(_) | MonitorError::TaskFailed(_) => true,
        }
    }
}
