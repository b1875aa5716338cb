//! Remote state storage on top of a key/value object store.
//!
//! Each environment owns two keys under the configured bucket path:
//! `<env>.tfstate` holds the last known-good state and `<env>.tfstate.tainted`
//! holds the state left behind by a failed run. Writing one key never touches
//! the other; callers decide explicitly which keys to keep.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

mod s3;

pub use s3::S3ObjectStore;

const STATE_SUFFIX: &str = ".tfstate";
const TAINTED_SUFFIX: &str = ".tfstate.tainted";

/// Errors raised by object store operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StorageError {
    /// Transport, authentication, or permission failure.
    #[error("failed to {operation} {key}: {message}")]
    Transport {
        /// Operation being attempted (`get`, `put`, ...).
        operation: &'static str,
        /// Object key involved.
        key: String,
        /// Underlying error description.
        message: String,
    },
    /// The operation did not finish before the run deadline.
    #[error("timed out during {operation} of {key}")]
    Timeout {
        /// Operation being attempted.
        operation: &'static str,
        /// Object key involved.
        key: String,
    },
}

/// Server-side encryption applied to uploaded state.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Encryption {
    /// Encryption mode, for example `AES256` or `aws:kms`.
    pub mode: Option<String>,
    /// KMS key identifier for `aws:kms`.
    pub kms_key_id: Option<String>,
}

impl Encryption {
    /// Builds encryption settings; a KMS key without a mode implies `aws:kms`.
    #[must_use]
    pub fn new(mode: Option<String>, kms_key_id: Option<String>) -> Self {
        let key = kms_key_id.filter(|id| !id.trim().is_empty());
        let explicit_mode = mode.filter(|value| !value.trim().is_empty());
        let resolved_mode = match (explicit_mode, &key) {
            (Some(value), _) => Some(value),
            (None, Some(_)) => Some(String::from("aws:kms")),
            (None, None) => None,
        };
        Self {
            mode: resolved_mode,
            kms_key_id: key,
        }
    }
}

/// Future returned by object store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Minimal blob interface implemented by object stores.
pub trait ObjectStore {
    /// Reads an object; absence is `Ok(None)`.
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>>;

    /// Writes an object, replacing any previous value atomically.
    fn put<'a>(
        &'a self,
        key: &'a str,
        body: Vec<u8>,
        encryption: &'a Encryption,
    ) -> StoreFuture<'a, ()>;

    /// Removes an object; removing an absent object succeeds.
    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()>;

    /// Reports whether an object exists.
    fn exists<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool>;

    /// Lists keys starting with `prefix`.
    fn list<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, Vec<String>>;
}

/// Which of an environment's two state keys to address.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StateKind {
    /// Last known-good state.
    Stable,
    /// State left by a failed run.
    Tainted,
}

impl StateKind {
    const fn suffix(self) -> &'static str {
        match self {
            Self::Stable => STATE_SUFFIX,
            Self::Tainted => TAINTED_SUFFIX,
        }
    }
}

/// An environment found in the bucket.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub struct StoredEnv {
    /// Environment name.
    pub env_name: String,
    /// Whether a stable state key exists.
    pub stable: bool,
    /// Whether a tainted state key exists.
    pub tainted: bool,
}

/// Environment-keyed state access with deadline enforcement.
#[derive(Clone, Debug)]
pub struct StateStore<S> {
    store: S,
    bucket_path: String,
    encryption: Encryption,
    deadline: Option<Instant>,
}

impl<S: ObjectStore + Sync> StateStore<S> {
    /// Creates a state store rooted at `bucket_path`.
    #[must_use]
    pub fn new(store: S, bucket_path: &str, encryption: Encryption) -> Self {
        Self {
            store,
            bucket_path: bucket_path.trim_matches('/').to_owned(),
            encryption,
            deadline: None,
        }
    }

    /// Fails any object store call still pending at `deadline`.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Returns the wrapped object store.
    #[must_use]
    pub const fn object_store(&self) -> &S {
        &self.store
    }

    /// Returns the object key for an environment's state.
    #[must_use]
    pub fn key(&self, env_name: &str, kind: StateKind) -> String {
        let file = format!("{env_name}{}", kind.suffix());
        if self.bucket_path.is_empty() {
            file
        } else {
            format!("{}/{file}", self.bucket_path)
        }
    }

    /// Reads the stable state for `env_name`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on transport failure or timeout; absence is
    /// reported as `Ok(None)`.
    pub async fn fetch(&self, env_name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.fetch_kind(env_name, StateKind::Stable).await
    }

    /// Reads the tainted state for `env_name`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on transport failure or timeout.
    pub async fn fetch_tainted(&self, env_name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.fetch_kind(env_name, StateKind::Tainted).await
    }

    async fn fetch_kind(
        &self,
        env_name: &str,
        kind: StateKind,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        let key = self.key(env_name, kind);
        debug!(%key, "fetching state");
        self.bounded("get", &key, self.store.get(&key)).await
    }

    /// Writes `state` to the stable or tainted key, applying encryption.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on transport failure or timeout.
    pub async fn put(
        &self,
        env_name: &str,
        state: Vec<u8>,
        tainted: bool,
    ) -> Result<(), StorageError> {
        let key = self.key(env_name, kind_for(tainted));
        info!(%key, bytes = state.len(), "uploading state");
        self.bounded("put", &key, self.store.put(&key, state, &self.encryption))
            .await
    }

    /// Removes the stable or tainted key; absent keys are not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on transport failure or timeout.
    pub async fn delete(&self, env_name: &str, tainted: bool) -> Result<(), StorageError> {
        let key = self.key(env_name, kind_for(tainted));
        info!(%key, "deleting state");
        self.bounded("delete", &key, self.store.delete(&key)).await
    }

    /// Reports whether a specific key exists.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on transport failure or timeout.
    pub async fn has(&self, env_name: &str, kind: StateKind) -> Result<bool, StorageError> {
        let key = self.key(env_name, kind);
        self.bounded("head", &key, self.store.exists(&key)).await
    }

    /// Reports whether either the stable or the tainted key exists.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on transport failure or timeout.
    pub async fn exists(&self, env_name: &str) -> Result<bool, StorageError> {
        if self.has(env_name, StateKind::Stable).await? {
            return Ok(true);
        }
        self.has(env_name, StateKind::Tainted).await
    }

    /// Lists every environment stored under the bucket path.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on transport failure or timeout.
    pub async fn list(&self) -> Result<Vec<StoredEnv>, StorageError> {
        let prefix = if self.bucket_path.is_empty() {
            String::new()
        } else {
            format!("{}/", self.bucket_path)
        };
        let keys = self
            .bounded("list", &prefix, self.store.list(&prefix))
            .await?;

        let mut envs: BTreeMap<String, StoredEnv> = BTreeMap::new();
        for (name, kind) in keys
            .iter()
            .filter_map(|key| key.strip_prefix(prefix.as_str()))
            .filter_map(parse_state_file)
        {
            let env = envs.entry(name.to_owned()).or_insert_with(|| StoredEnv {
                env_name: name.to_owned(),
                stable: false,
                tainted: false,
            });
            match kind {
                StateKind::Stable => env.stable = true,
                StateKind::Tainted => env.tainted = true,
            }
        }
        Ok(envs.into_values().collect())
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        key: &str,
        call: StoreFuture<'_, T>,
    ) -> Result<T, StorageError> {
        within_deadline(self.deadline, operation, key, call).await
    }
}

/// Awaits `call`, failing with [`StorageError::Timeout`] once `deadline`
/// passes. Without a deadline the call runs to completion.
///
/// # Errors
///
/// Returns the call's own error, or [`StorageError::Timeout`].
pub async fn within_deadline<T>(
    deadline: Option<Instant>,
    operation: &'static str,
    key: &str,
    call: impl Future<Output = Result<T, StorageError>>,
) -> Result<T, StorageError> {
    match deadline {
        Some(at) => tokio::time::timeout_at(at, call)
            .await
            .map_err(|_| StorageError::Timeout {
                operation,
                key: key.to_owned(),
            })?,
        None => call.await,
    }
}

/// Splits `<env>.tfstate[.tainted]` into name and kind; nested keys and
/// unrelated objects yield `None`.
fn parse_state_file(file: &str) -> Option<(&str, StateKind)> {
    if file.contains('/') {
        return None;
    }
    file.strip_suffix(TAINTED_SUFFIX)
        .map(|name| (name, StateKind::Tainted))
        .or_else(|| {
            file.strip_suffix(STATE_SUFFIX)
                .map(|name| (name, StateKind::Stable))
        })
        .filter(|(name, _)| !name.is_empty())
}

const fn kind_for(tainted: bool) -> StateKind {
    if tainted {
        StateKind::Tainted
    } else {
        StateKind::Stable
    }
}

#[cfg(test)]
mod tests;
