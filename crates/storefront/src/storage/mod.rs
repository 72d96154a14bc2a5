//! Device-local key/value storage and the guest cart built on it.
//!
//! # Architecture
//!
//! - [`CartStorage`] is a synchronous string store; reads never suspend
//! - [`FileStorage`] keeps one JSON file per key in a directory
//! - [`MemoryStorage`] keeps values in process (tests, ephemeral sessions)
//! - [`LocalCartStore`] is the guest cart, with the same verbs as the
//!   remote cart API

mod file;
mod local_cart;
mod memory;

pub use file::FileStorage;
pub use local_cart::LocalCartStore;
pub use memory::MemoryStorage;

use thiserror::Error;

/// Errors from device-local storage.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or writing the backing store failed.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value could not be encoded or decoded.
    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The storage key is not usable as a file name.
    #[error("invalid storage key: {0}")]
    InvalidKey(String),
}

/// Synchronous string key/value storage.
pub trait CartStorage: Send + Sync {
    /// Read the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written.
    fn write(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete the value stored under `key`. Deleting a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}
