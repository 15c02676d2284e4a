//! Authenticated session and its persistence in the secret store.

use std::{fmt, sync::Arc};

use backend_core::{AccountProfile, BackendError, BackendErrorCategory};
use backend_platform::{ScopedSecretStore, SecretStore, SecretStoreError};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const SECRET_SERVICE: &str = "dev.swoon.client";
const SESSION_KEY_PREFIX: &str = "wp-session";

/// Bearer token plus the profile the token endpoint returned with it.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub profile: AccountProfile,
}

impl Session {
    pub fn new(token: impl Into<String>, profile: AccountProfile) -> Self {
        Self {
            token: token.into(),
            profile,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("profile", &self.profile)
            .finish()
    }
}

/// Sessions keyed by REST root in a scoped secret store.
#[derive(Clone)]
pub struct SessionStore {
    secrets: ScopedSecretStore<Arc<dyn SecretStore>>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self {
            secrets: ScopedSecretStore::new(store, SECRET_SERVICE),
        }
    }

    pub fn save(&self, base_url: &str, session: &Session) -> Result<(), BackendError> {
        let account = session_account_for_base_url(base_url);
        let encoded = serde_json::to_string(session).map_err(|err| {
            BackendError::new(
                BackendErrorCategory::Serialization,
                "session_serialize_error",
                err.to_string(),
            )
        })?;
        self.secrets
            .set(&account, &encoded)
            .map_err(|err| map_secret_store_error("set_session", &account, err))?;
        debug!(%account, "persisted session");
        Ok(())
    }

    pub fn load(&self, base_url: &str) -> Result<Session, BackendError> {
        let account = session_account_for_base_url(base_url);
        let raw = self.secrets.get(&account).map_err(|err| match err {
            SecretStoreError::NotFound => BackendError::new(
                BackendErrorCategory::Auth,
                "session_not_found",
                "no persisted session was found for restore",
            ),
            other => map_secret_store_error("get_session", &account, other),
        })?;

        serde_json::from_str::<Session>(&raw).map_err(|err| {
            BackendError::new(
                BackendErrorCategory::Serialization,
                "session_deserialize_error",
                err.to_string(),
            )
        })
    }

    pub fn clear(&self, base_url: &str) -> Result<(), BackendError> {
        let account = session_account_for_base_url(base_url);
        self.secrets
            .forget(&account)
            .map_err(|err| map_secret_store_error("delete_session", &account, err))
    }
}

pub fn session_account_for_base_url(base_url: &str) -> String {
    format!("{SESSION_KEY_PREFIX}:{}", base_url.trim_end_matches('/'))
}

pub(crate) fn map_secret_store_error(
    operation: &str,
    account: &str,
    err: SecretStoreError,
) -> BackendError {
    match err {
        SecretStoreError::NotFound => BackendError::new(
            BackendErrorCategory::Config,
            "secret_not_found",
            format!("secret missing for '{account}' during {operation}"),
        ),
        SecretStoreError::Unavailable(message) => BackendError::new(
            BackendErrorCategory::Storage,
            "secret_store_unavailable",
            format!("secret store unavailable during {operation}: {message}"),
        ),
        SecretStoreError::Backend(message) => BackendError::new(
            BackendErrorCategory::Storage,
            "secret_store_error",
            format!("secret store backend error during {operation}: {message}"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend_platform::InMemorySecretStore;

    fn session() -> Session {
        Session::new(
            "eyJ.jwt.token",
            AccountProfile {
                user_id: Some(335),
                username: "aneta".into(),
                email: Some("aneta@example.org".into()),
                nicename: Some("aneta-k".into()),
                display_name: Some("Aneta".into()),
            },
        )
    }

    #[test]
    fn session_account_keys_ignore_trailing_slash() {
        assert_eq!(
            session_account_for_base_url("https://example.org/wp-json/"),
            "wp-session:https://example.org/wp-json"
        );
        assert_eq!(
            session_account_for_base_url("https://example.org/wp-json"),
            "wp-session:https://example.org/wp-json"
        );
    }

    #[test]
    fn save_load_clear_session() {
        let store = SessionStore::new(Arc::new(InMemorySecretStore::default()));
        store
            .save("https://example.org/wp-json", &session())
            .expect("save should work");

        let loaded = store
            .load("https://example.org/wp-json/")
            .expect("load should work");
        assert_eq!(loaded, session());

        store.clear("https://example.org/wp-json").expect("clear");
        store.clear("https://example.org/wp-json").expect("second clear is a no-op");
        let err = store
            .load("https://example.org/wp-json")
            .expect_err("cleared session must be gone");
        assert_eq!(err.code, "session_not_found");
        assert_eq!(err.category, BackendErrorCategory::Auth);
    }

    #[test]
    fn corrupt_session_is_a_serialization_error() {
        let secrets: Arc<dyn SecretStore> = Arc::new(InMemorySecretStore::default());
        secrets
            .set_secret(
                SECRET_SERVICE,
                &session_account_for_base_url("https://example.org/wp-json"),
                "not json",
            )
            .expect("seed");

        let err = SessionStore::new(secrets)
            .load("https://example.org/wp-json")
            .expect_err("corrupt session must fail");
        assert_eq!(err.code, "session_deserialize_error");
    }

    #[test]
    fn debug_output_redacts_token() {
        let rendered = format!("{:?}", session());
        assert!(!rendered.contains("eyJ"));
        assert!(rendered.contains("redacted"));
    }
}
