//! Secure Storage Module
//!
//! Durable key/value persistence for the session's two secrets. On Windows
//! values are encrypted with DPAPI before they touch the disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

#[cfg(windows)]
use windows::Win32::Security::Cryptography::{
    CryptProtectData, CryptUnprotectData, CRYPTPROTECT_UI_FORBIDDEN, CRYPT_INTEGER_BLOB,
};

/// Key of the persisted access token
pub const ACCESS_TOKEN_KEY: &str = "auth.access";

/// Key of the persisted refresh token
pub const REFRESH_TOKEN_KEY: &str = "auth.refresh";

/// Storage errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Encoding error: {0}")]
    Encoding(String),
}

/// Asynchronous string key/value capability.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Value stored under `key`, or `None` when nothing is stored.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// File-per-key store under a private directory
pub struct SecureFileStore {
    storage_path: PathBuf,
}

impl SecureFileStore {
    /// Create a store rooted at `storage_path`, creating the directory.
    pub async fn open(storage_path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let storage_path = storage_path.into();
        tokio::fs::create_dir_all(&storage_path)
            .await
            .map_err(|e| StorageError::Io(format!("{}: {e}", storage_path.display())))?;

        debug!("Secure storage initialized at: {:?}", storage_path);
        Ok(Self { storage_path })
    }

    /// Directory holding the encrypted values
    pub fn path(&self) -> &Path {
        &self.storage_path
    }

    fn file_for(&self, key: &str) -> PathBuf {
        self.storage_path.join(format!("{key}.dat"))
    }
}

#[async_trait]
impl TokenStore for SecureFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let encrypted = match tokio::fs::read(self.file_for(key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e.to_string())),
        };

        let decrypted = unprotect(&encrypted)?;
        String::from_utf8(decrypted)
            .map(Some)
            .map_err(|e| StorageError::Encoding(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let encrypted = protect(value.as_bytes())?;
        tokio::fs::write(self.file_for(key), encrypted)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;

        debug!("Saved encrypted value for key: {}", key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.file_for(key)).await {
            Ok(()) => {
                info!("Deleted stored value for key: {}", key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e.to_string())),
        }
    }
}

#[cfg(windows)]
fn protect(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    let input = blob_of(data);
    let mut output = CRYPT_INTEGER_BLOB::default();

    unsafe {
        CryptProtectData(&input, None, None, None, None, CRYPTPROTECT_UI_FORBIDDEN, &mut output)
            .map_err(|e| StorageError::Encryption(format!("DPAPI encryption failed: {e}")))?;
        Ok(take_blob(output))
    }
}

#[cfg(windows)]
fn unprotect(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    let input = blob_of(data);
    let mut output = CRYPT_INTEGER_BLOB::default();

    unsafe {
        CryptUnprotectData(&input, None, None, None, None, CRYPTPROTECT_UI_FORBIDDEN, &mut output)
            .map_err(|e| StorageError::Decryption(format!("DPAPI decryption failed: {e}")))?;
        Ok(take_blob(output))
    }
}

#[cfg(windows)]
fn blob_of(data: &[u8]) -> CRYPT_INTEGER_BLOB {
    CRYPT_INTEGER_BLOB {
        cbData: data.len() as u32,
        pbData: data.as_ptr() as *mut u8,
    }
}

/// Copy a DPAPI output blob and release the buffer the API allocated.
#[cfg(windows)]
unsafe fn take_blob(blob: CRYPT_INTEGER_BLOB) -> Vec<u8> {
    let bytes = std::slice::from_raw_parts(blob.pbData, blob.cbData as usize).to_vec();
    windows::Win32::Foundation::LocalFree(windows::Win32::Foundation::HLOCAL(
        blob.pbData as *mut std::ffi::c_void,
    ));
    bytes
}

// Non-Windows builds rely on the data directory's permissions.
#[cfg(not(windows))]
fn protect(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    Ok(data.to_vec())
}

#[cfg(not(windows))]
fn unprotect(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    Ok(data.to_vec())
}

/// In-memory store with switchable fault injection and optional latency
#[derive(Default)]
pub struct MemoryTokenStore {
    values: Mutex<HashMap<String, String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    read_delay: Option<Duration>,
    write_delay: Option<Duration>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a value without going through the async API.
    pub fn with_value(self, key: &str, value: &str) -> Self {
        self.lock().insert(key.to_string(), value.to_string());
        self
    }

    /// Delay every `get`.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Delay every `set` and `delete`.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Make every `get` fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every `set` and `delete` fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Current value under `key`, bypassing fault injection.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // The map stays consistent even if a holder panicked.
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn before_write(&self) -> Result<(), StorageError> {
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io("injected write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Io("injected read failure".into()));
        }
        Ok(self.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.before_write().await?;
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.before_write().await?;
        self.lock().remove(key);
        Ok(())
    }
}
