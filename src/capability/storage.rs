use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("object store upload failed: {0}")]
    UploadFailed(String),
    #[error("object store is unreachable")]
    Unreachable,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, StorageError>;

    /// Probed once per process with cached success (SPEC_FULL.md §6).
    async fn bucket_exists(&self) -> bool;
}

pub mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    pub struct InMemoryObjectStore {
        objects: Mutex<HashMap<String, Vec<u8>>>,
        pub fail_next_n: Mutex<u32>,
    }

    impl InMemoryObjectStore {
        pub fn new() -> Self {
            Self {
                objects: Mutex::new(HashMap::new()),
                fail_next_n: Mutex::new(0),
            }
        }

        pub fn fail_next(&self, n: u32) {
            *self.fail_next_n.lock() = n;
        }
    }

    impl Default for InMemoryObjectStore {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ObjectStore for InMemoryObjectStore {
        async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, StorageError> {
            let mut remaining = self.fail_next_n.lock();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StorageError::UploadFailed("scripted failure".into()));
            }
            drop(remaining);
            self.objects.lock().insert(key.to_string(), bytes.to_vec());
            Ok(format!("https://objects.local/{key}"))
        }

        async fn bucket_exists(&self) -> bool {
            true
        }
    }
}
