use crate::storage::fs::{Filesystem, OsFilesystem};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Registry configuration
#[derive(Clone)]
pub struct RegistryOptions {
    /// How long a commit waits for in-flight reads before cancelling them
    pub reader_wait_timeout: Duration,

    /// Filesystem holding the dataset files
    pub filesystem: Arc<dyn Filesystem>,

    /// Label attached to every registry span
    pub name: String,
}

impl RegistryOptions {
    pub fn new() -> Self {
        Self {
            reader_wait_timeout: Duration::from_millis(100),
            filesystem: Arc::new(OsFilesystem::new()),
            name: "registry".to_string(),
        }
    }

    /// Set the reader grace period
    pub fn reader_wait_timeout(mut self, timeout: Duration) -> Self {
        self.reader_wait_timeout = timeout;
        self
    }

    /// Use a custom filesystem
    pub fn filesystem(mut self, fs: Arc<dyn Filesystem>) -> Self {
        self.filesystem = fs;
        self
    }

    /// Set the registry name
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("Registry name cannot be empty".to_string());
        }

        if self.reader_wait_timeout.is_zero() {
            return Err("reader_wait_timeout must be > 0".to_string());
        }

        Ok(())
    }
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RegistryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryOptions")
            .field("reader_wait_timeout", &self.reader_wait_timeout)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fs::MemoryFilesystem;

    #[test]
    fn test_default_options() {
        let options = RegistryOptions::default();
        assert_eq!(options.reader_wait_timeout, Duration::from_millis(100));
        assert_eq!(options.name, "registry");
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let options = RegistryOptions::new()
            .reader_wait_timeout(Duration::from_millis(5))
            .filesystem(Arc::new(MemoryFilesystem::new()))
            .name("app");

        assert_eq!(options.reader_wait_timeout, Duration::from_millis(5));
        assert_eq!(options.name, "app");
    }

    #[test]
    fn test_invalid_options() {
        assert!(RegistryOptions::new().name("").validate().is_err());
        assert!(RegistryOptions::new()
            .reader_wait_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }
}
