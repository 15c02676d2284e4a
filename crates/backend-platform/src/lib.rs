//! Host integration for swoon: where the session token lives between launches.
//!
//! Three [`SecretStore`] implementations are provided: the OS keyring (feature
//! `os-keyring`), an owner-only JSON file for headless hosts, and an in-memory
//! store for tests.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use thiserror::Error;

mod file_store;

pub use file_store::{FileSecretStore, remove_file_if_exists, write_file_atomic};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecretStoreError {
    #[error("secret not found")]
    NotFound,
    #[error("secret store unavailable: {0}")]
    Unavailable(String),
    #[error("secret store backend failure: {0}")]
    Backend(String),
}

/// Keyed secret storage. `service` namespaces the application, `account`
/// the individual secret.
pub trait SecretStore: Send + Sync {
    fn set_secret(
        &self,
        service: &str,
        account: &str,
        secret: &str,
    ) -> Result<(), SecretStoreError>;

    fn get_secret(&self, service: &str, account: &str) -> Result<String, SecretStoreError>;

    fn delete_secret(&self, service: &str, account: &str) -> Result<(), SecretStoreError>;
}

#[derive(Clone, Default)]
pub struct InMemorySecretStore {
    data: Arc<RwLock<HashMap<(String, String), String>>>,
}

impl SecretStore for InMemorySecretStore {
    fn set_secret(
        &self,
        service: &str,
        account: &str,
        secret: &str,
    ) -> Result<(), SecretStoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| SecretStoreError::Backend("poisoned lock".to_owned()))?;
        data.insert((service.to_owned(), account.to_owned()), secret.to_owned());
        Ok(())
    }

    fn get_secret(&self, service: &str, account: &str) -> Result<String, SecretStoreError> {
        let data = self
            .data
            .read()
            .map_err(|_| SecretStoreError::Backend("poisoned lock".to_owned()))?;
        data.get(&(service.to_owned(), account.to_owned()))
            .cloned()
            .ok_or(SecretStoreError::NotFound)
    }

    fn delete_secret(&self, service: &str, account: &str) -> Result<(), SecretStoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| SecretStoreError::Backend("poisoned lock".to_owned()))?;
        if data
            .remove(&(service.to_owned(), account.to_owned()))
            .is_none()
        {
            return Err(SecretStoreError::NotFound);
        }
        Ok(())
    }
}

#[cfg(feature = "os-keyring")]
#[derive(Default, Clone, Copy)]
pub struct OsKeyringSecretStore;

#[cfg(feature = "os-keyring")]
impl SecretStore for OsKeyringSecretStore {
    fn set_secret(
        &self,
        service: &str,
        account: &str,
        secret: &str,
    ) -> Result<(), SecretStoreError> {
        let entry = keyring::Entry::new(service, account)
            .map_err(|err| SecretStoreError::Backend(err.to_string()))?;
        entry
            .set_password(secret)
            .map_err(|err| SecretStoreError::Backend(err.to_string()))
    }

    fn get_secret(&self, service: &str, account: &str) -> Result<String, SecretStoreError> {
        let entry = keyring::Entry::new(service, account)
            .map_err(|err| SecretStoreError::Backend(err.to_string()))?;
        entry.get_password().map_err(|err| match err {
            keyring::Error::NoEntry => SecretStoreError::NotFound,
            other => SecretStoreError::Backend(other.to_string()),
        })
    }

    fn delete_secret(&self, service: &str, account: &str) -> Result<(), SecretStoreError> {
        let entry = keyring::Entry::new(service, account)
            .map_err(|err| SecretStoreError::Backend(err.to_string()))?;
        entry.delete_credential().map_err(|err| match err {
            keyring::Error::NoEntry => SecretStoreError::NotFound,
            other => SecretStoreError::Backend(other.to_string()),
        })
    }
}

impl<S: SecretStore + ?Sized> SecretStore for Arc<S> {
    fn set_secret(
        &self,
        service: &str,
        account: &str,
        secret: &str,
    ) -> Result<(), SecretStoreError> {
        (**self).set_secret(service, account, secret)
    }

    fn get_secret(&self, service: &str, account: &str) -> Result<String, SecretStoreError> {
        (**self).get_secret(service, account)
    }

    fn delete_secret(&self, service: &str, account: &str) -> Result<(), SecretStoreError> {
        (**self).delete_secret(service, account)
    }
}

/// Store bound to one service name.
#[derive(Clone)]
pub struct ScopedSecretStore<S: SecretStore> {
    inner: S,
    service: String,
}

impl<S: SecretStore> ScopedSecretStore<S> {
    pub fn new(inner: S, service: impl Into<String>) -> Self {
        Self {
            inner,
            service: service.into(),
        }
    }

    pub fn set(&self, account: &str, secret: &str) -> Result<(), SecretStoreError> {
        self.inner.set_secret(&self.service, account, secret)
    }

    pub fn get(&self, account: &str) -> Result<String, SecretStoreError> {
        self.inner.get_secret(&self.service, account)
    }

    pub fn delete(&self, account: &str) -> Result<(), SecretStoreError> {
        self.inner.delete_secret(&self.service, account)
    }

    /// Delete, treating an absent secret as already deleted.
    pub fn forget(&self, account: &str) -> Result<(), SecretStoreError> {
        match self.delete(account) {
            Ok(()) | Err(SecretStoreError::NotFound) => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }
}
