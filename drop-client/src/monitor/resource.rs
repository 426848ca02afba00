//! Built-in local resources.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{LocalResource, ResourceError};

#[derive(Default)]
struct MemoryInner {
    value: Mutex<Option<Vec<u8>>>,
    faults: Mutex<VecDeque<ResourceError>>,
    writes: AtomicUsize,
}

/// A value held in memory.
///
/// Clones share the value, so a test (or another task) can change what the
/// monitor sees and inspect what it wrote.
#[derive(Clone, Default)]
pub struct MemoryResource {
    inner: Arc<MemoryInner>,
    read_only: bool,
}

impl MemoryResource {
    /// An empty resource.
    pub fn new() -> Self {
        Self::default()
    }

    /// A resource holding `value`.
    pub fn with_value(value: impl Into<Vec<u8>>) -> Self {
        let resource = Self::new();
        resource.set(value);
        resource
    }

    /// A view of this resource that rejects writes.
    pub fn read_only(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            read_only: true,
        }
    }

    /// Change the value from outside the monitor.
    pub fn set(&self, value: impl Into<Vec<u8>>) {
        *lock(&self.inner.value) = Some(value.into());
    }

    /// Remove the value.
    pub fn clear(&self) {
        *lock(&self.inner.value) = None;
    }

    /// Current value.
    pub fn value(&self) -> Option<Vec<u8>> {
        lock(&self.inner.value).clone()
    }

    /// Number of successful writes by monitors.
    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Make the next read or write fail with `error`.
    pub fn fail_next(&self, error: ResourceError) {
        lock(&self.inner.faults).push_back(error);
    }

    fn injected(&self) -> Result<(), ResourceError> {
        match lock(&self.inner.faults).pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for MemoryResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = lock(&self.inner.value).as_ref().map(Vec::len);
        f.debug_struct("MemoryResource")
            .field("len", &len)
            .field("read_only", &self.read_only)
            .finish()
    }
}

#[async_trait]
impl LocalResource for MemoryResource {
    async fn read(&self) -> Result<Option<Vec<u8>>, ResourceError> {
        self.injected()?;
        Ok(self.value())
    }

    async fn write(&self, value: &[u8]) -> Result<(), ResourceError> {
        if self.read_only {
            return Err(ResourceError::ReadOnly);
        }
        self.injected()?;
        self.set(value);
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_writable(&self) -> bool {
        !self.read_only
    }
}

/// A value held in a file.
///
/// A missing file reads as no value. Writes go to a sibling temporary file
/// that is then renamed over the target, so readers never see a partial
/// value.
#[derive(Debug, Clone)]
pub struct FileResource {
    path: PathBuf,
}

impl FileResource {
    /// Watch the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The watched path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".kvdrop-tmp");
        self.path.with_file_name(name)
    }
}

fn io_error(path: &Path, err: io::Error) -> ResourceError {
    let message = format!("{}: {}", path.display(), err);
    match err.kind() {
        io::ErrorKind::PermissionDenied | io::ErrorKind::InvalidInput => {
            ResourceError::Failed(message)
        }
        _ => ResourceError::Unavailable(message),
    }
}

#[async_trait]
impl LocalResource for FileResource {
    async fn read(&self) -> Result<Option<Vec<u8>>, ResourceError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&self.path, e)),
        }
    }

    async fn write(&self, value: &[u8]) -> Result<(), ResourceError> {
        let temp = self.temp_path();
        tokio::fs::write(&temp, value)
            .await
            .map_err(|e| io_error(&temp, e))?;
        if let Err(e) = tokio::fs::rename(&temp, &self.path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(io_error(&self.path, e));
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===========================================
    // MemoryResource Tests
    // ===========================================

    #[tokio::test]
    async fn memory_resource_shares_value_between_clones() {
        let resource = MemoryResource::new();
        let view = resource.clone();
        assert_eq!(view.read().await.unwrap(), None);

        resource.set("hello");
        assert_eq!(view.read().await.unwrap(), Some(b"hello".to_vec()));

        view.write(b"world").await.unwrap();
        assert_eq!(resource.value(), Some(b"world".to_vec()));
        assert_eq!(resource.write_count(), 1);
    }

    #[tokio::test]
    async fn read_only_view_rejects_writes() {
        let resource = MemoryResource::with_value("fixed");
        let view = resource.read_only();
        assert!(!view.is_writable());
        assert_eq!(view.write(b"x").await, Err(ResourceError::ReadOnly));
        assert_eq!(resource.value(), Some(b"fixed".to_vec()));
    }

    #[tokio::test]
    async fn injected_fault_applies_once() {
        let resource = MemoryResource::with_value("v");
        resource.fail_next(ResourceError::Unavailable("locked".into()));
        assert!(resource.read().await.is_err());
        assert!(resource.read().await.is_ok());
    }

    // ===========================================
    // FileResource Tests
    // ===========================================

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let resource = FileResource::new(dir.path().join("absent.txt"));
        assert_eq!(resource.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ip.txt");
        let resource = FileResource::new(&path);

        resource.write(b"203.0.113.7").await.unwrap();
        assert_eq!(resource.read().await.unwrap(), Some(b"203.0.113.7".to_vec()));
        assert_eq!(std::fs::read(&path).unwrap(), b"203.0.113.7");

        resource.write(b"198.51.100.1").await.unwrap();
        assert_eq!(resource.read().await.unwrap(), Some(b"198.51.100.1".to_vec()));
        assert!(!resource.temp_path().exists());
    }

    #[tokio::test]
    async fn write_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let resource = FileResource::new(dir.path().join("no-such-dir").join("value"));
        assert!(resource.write(b"x").await.is_err());
    }
}
