//! Durable key/value and FIFO-queue storage, keyed by string name.
//!
//! Two implementations are provided: [`InMemoryPersistence`] (used for
//! `--no-state` and most unit tests) and [`OnDiskPersistence`] (one JSON file
//! per name under a root directory, atomic via write-temp-then-rename,
//! mirroring the write pattern a filesystem-backed blob store in this
//! codebase has always used). Callers interact with typed values through the
//! [`Value`] and [`Queue`] extension traits, which are blanket-implemented
//! over any [`Persistence`] so a single `Arc<dyn Persistence>` can be shared
//! across components that each store a different value type.

use crate::PersistenceError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex as AsyncMutex;

/// Raw, untyped storage operations. Object-safe so it can be shared as
/// `Arc<dyn Persistence>`; typed access goes through [`Value`] and [`Queue`].
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn load_raw(&self, name: &str) -> Result<serde_json::Value, PersistenceError>;
    async fn store_raw(&self, name: &str, value: serde_json::Value) -> Result<(), PersistenceError>;
    async fn remove_raw(&self, name: &str) -> Result<(), PersistenceError>;

    async fn peek_raw(&self, name: &str) -> Result<serde_json::Value, PersistenceError>;
    async fn enqueue_raw(
        &self,
        name: &str,
        value: serde_json::Value,
    ) -> Result<(), PersistenceError>;
    async fn dequeue_raw(&self, name: &str) -> Result<serde_json::Value, PersistenceError>;
}

/// Typed single-value storage, blanket-implemented over any [`Persistence`].
#[async_trait]
pub trait Value: Persistence {
    async fn load<T: DeserializeOwned + Send>(&self, name: &str) -> Result<T, PersistenceError> {
        let raw = self.load_raw(name).await?;
        serde_json::from_value(raw).map_err(|source| PersistenceError::Serialization {
            key: name.to_string(),
            source,
        })
    }

    async fn store<T: Serialize + Sync>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<(), PersistenceError> {
        let raw = serde_json::to_value(value).map_err(|source| PersistenceError::Serialization {
            key: name.to_string(),
            source,
        })?;
        self.store_raw(name, raw).await
    }

    async fn remove(&self, name: &str) -> Result<(), PersistenceError> {
        self.remove_raw(name).await
    }
}

impl<P: Persistence + ?Sized> Value for P {}

/// Typed FIFO queue access, blanket-implemented over any [`Persistence`].
#[async_trait]
pub trait Queue: Persistence {
    async fn peek<T: DeserializeOwned + Send>(&self, name: &str) -> Result<T, PersistenceError> {
        let raw = self.peek_raw(name).await?;
        serde_json::from_value(raw).map_err(|source| PersistenceError::Serialization {
            key: name.to_string(),
            source,
        })
    }

    async fn enqueue<T: Serialize + Sync>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<(), PersistenceError> {
        let raw = serde_json::to_value(value).map_err(|source| PersistenceError::Serialization {
            key: name.to_string(),
            source,
        })?;
        self.enqueue_raw(name, raw).await
    }

    async fn dequeue<T: DeserializeOwned + Send>(&self, name: &str) -> Result<T, PersistenceError> {
        let raw = self.dequeue_raw(name).await?;
        serde_json::from_value(raw).map_err(|source| PersistenceError::Serialization {
            key: name.to_string(),
            source,
        })
    }
}

impl<P: Persistence + ?Sized> Queue for P {}

fn not_found(name: &str) -> PersistenceError {
    PersistenceError::NotFound {
        key: name.to_string(),
    }
}

// ============================================================================
// In-memory implementation
// ============================================================================

/// In-memory `Persistence`. All operations are guarded by one coarse lock,
/// which is acceptable per the durability contract (no cross-task races,
/// no durability across process restarts).
#[derive(Default)]
pub struct InMemoryPersistence {
    values: StdMutex<HashMap<String, serde_json::Value>>,
    queues: StdMutex<HashMap<String, std::collections::VecDeque<serde_json::Value>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn load_raw(&self, name: &str) -> Result<serde_json::Value, PersistenceError> {
        self.values
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(name))
    }

    async fn store_raw(&self, name: &str, value: serde_json::Value) -> Result<(), PersistenceError> {
        self.values.lock().unwrap().insert(name.to_string(), value);
        Ok(())
    }

    async fn remove_raw(&self, name: &str) -> Result<(), PersistenceError> {
        self.values
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found(name))
    }

    async fn peek_raw(&self, name: &str) -> Result<serde_json::Value, PersistenceError> {
        self.queues
            .lock()
            .unwrap()
            .get(name)
            .and_then(|q| q.front().cloned())
            .ok_or_else(|| not_found(name))
    }

    async fn enqueue_raw(
        &self,
        name: &str,
        value: serde_json::Value,
    ) -> Result<(), PersistenceError> {
        self.queues
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push_back(value);
        Ok(())
    }

    async fn dequeue_raw(&self, name: &str) -> Result<serde_json::Value, PersistenceError> {
        self.queues
            .lock()
            .unwrap()
            .get_mut(name)
            .and_then(|q| q.pop_front())
            .ok_or_else(|| not_found(name))
    }
}

// ============================================================================
// On-disk implementation
// ============================================================================

/// On-disk `Persistence`: each name maps to one JSON file under `root`.
/// Writes go through a temp file and an atomic rename so a crash mid-write
/// never leaves a half-parseable file; a file that fails to parse (or is
/// empty, e.g. truncated by such a crash) is treated as absent rather than
/// as an error, per the persisted-state contract.
pub struct OnDiskPersistence {
    root: PathBuf,
    lock: AsyncMutex<()>,
}

impl OnDiskPersistence {
    pub async fn new(root: PathBuf) -> Result<Self, PersistenceError> {
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| PersistenceError::Io {
                key: root.display().to_string(),
                source,
            })?;
        Ok(Self {
            root,
            lock: AsyncMutex::new(()),
        })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.json"))
    }

    async fn read_json(&self, name: &str) -> Result<Option<serde_json::Value>, PersistenceError> {
        let path = self.path_for(name);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PersistenceError::Io {
                    key: name.to_string(),
                    source,
                })
            }
        };
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(None);
        }
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(_) => Ok(None), // corrupt file: treated as absent, per spec
        }
    }

    async fn write_json(&self, name: &str, value: &serde_json::Value) -> Result<(), PersistenceError> {
        let path = self.path_for(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| PersistenceError::Io {
                    key: name.to_string(),
                    source,
                })?;
        }
        let bytes = serde_json::to_vec(value).map_err(|source| PersistenceError::Serialization {
            key: name.to_string(),
            source,
        })?;
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|source| PersistenceError::Io {
                key: name.to_string(),
                source,
            })?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|source| PersistenceError::Io {
                key: name.to_string(),
                source,
            })?;
        Ok(())
    }
}

#[async_trait]
impl Persistence for OnDiskPersistence {
    async fn load_raw(&self, name: &str) -> Result<serde_json::Value, PersistenceError> {
        let _guard = self.lock.lock().await;
        self.read_json(name).await?.ok_or_else(|| not_found(name))
    }

    async fn store_raw(&self, name: &str, value: serde_json::Value) -> Result<(), PersistenceError> {
        let _guard = self.lock.lock().await;
        self.write_json(name, &value).await
    }

    async fn remove_raw(&self, name: &str) -> Result<(), PersistenceError> {
        let _guard = self.lock.lock().await;
        let path = self.path_for(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found(name)),
            Err(source) => Err(PersistenceError::Io {
                key: name.to_string(),
                source,
            }),
        }
    }

    async fn peek_raw(&self, name: &str) -> Result<serde_json::Value, PersistenceError> {
        let _guard = self.lock.lock().await;
        let array = self.read_json(name).await?.unwrap_or(serde_json::Value::Array(vec![]));
        array
            .as_array()
            .and_then(|a| a.first())
            .cloned()
            .ok_or_else(|| not_found(name))
    }

    async fn enqueue_raw(
        &self,
        name: &str,
        value: serde_json::Value,
    ) -> Result<(), PersistenceError> {
        let _guard = self.lock.lock().await;
        let mut array = self
            .read_json(name)
            .await?
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();
        array.push(value);
        self.write_json(name, &serde_json::Value::Array(array)).await
    }

    async fn dequeue_raw(&self, name: &str) -> Result<serde_json::Value, PersistenceError> {
        let _guard = self.lock.lock().await;
        let mut array = self
            .read_json(name)
            .await?
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();
        if array.is_empty() {
            return Err(not_found(name));
        }
        let head = array.remove(0);
        self.write_json(name, &serde_json::Value::Array(array)).await?;
        Ok(head)
    }
}

#[cfg(test)]
#[path = "persistence_tests.rs"]
mod tests;
