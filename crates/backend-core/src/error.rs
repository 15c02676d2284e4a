//! Error payload shared by the REST adapter, the runtime and frontends.
//!
//! WordPress reports failures as `{code, message, data: {status}}`. The `code`
//! is kept verbatim so frontends can branch on plugin codes such as
//! `jwt_auth_invalid_token`; the category drives session expiry, retries and
//! the write fallback.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{normalization::strip_html, types::BackendLifecycleState};

/// JWT plugin code for a token that is expired, revoked or malformed.
pub const INVALID_TOKEN_CODE: &str = "jwt_auth_invalid_token";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BackendErrorCategory {
    /// Bad input or a route that refused the request (4xx other than auth).
    Config,
    /// Missing, expired or rejected bearer token. Ends the session.
    Auth,
    /// Transport failure or 5xx. The request may or may not have run.
    Network,
    /// 408/429 from the host; carries a retry hint when one was sent.
    RateLimited,
    /// Secret store or local profile file.
    Storage,
    /// A response that could not be decoded.
    Serialization,
    /// Invariant break inside the backend.
    Internal,
}

impl BackendErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Auth => "auth",
            Self::Network => "network",
            Self::RateLimited => "rate_limited",
            Self::Storage => "storage",
            Self::Serialization => "serialization",
            Self::Internal => "internal",
        }
    }

    /// Category for an HTTP failure. A 403 only ends the session when the JWT
    /// plugin names the token; otherwise the route denied this one action.
    pub fn for_status(status: u16, wp_code: Option<&str>) -> Self {
        match status {
            401 => Self::Auth,
            403 if wp_code == Some(INVALID_TOKEN_CODE) => Self::Auth,
            408 | 429 => Self::RateLimited,
            400..=499 => Self::Config,
            500..=599 => Self::Network,
            _ => Self::Internal,
        }
    }
}

impl fmt::Display for BackendErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{code} ({category}): {message}")]
pub struct BackendError {
    pub category: BackendErrorCategory,
    /// Stable machine-readable code, the WordPress code when one was sent.
    pub code: String,
    /// Plain-text explanation.
    pub message: String,
    /// Server-requested delay before retrying.
    pub retry_after_ms: Option<u64>,
}

impl BackendError {
    pub fn new(
        category: BackendErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Build the error for a non-2xx WordPress answer. Bodies that are not a
    /// WordPress error object fall back to `http_status_<n>`.
    pub fn from_wp_response(status: u16, body: &[u8]) -> Self {
        let parsed: Option<Value> = serde_json::from_slice(body).ok();
        let field = |key: &str| {
            parsed
                .as_ref()
                .and_then(|value| value.get(key))
                .and_then(Value::as_str)
        };
        let wp_code = field("code").filter(|code| !code.is_empty());
        let message = field("message")
            .map(|message| strip_html(message).trim().to_owned())
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| format!("HTTP {status}"));

        Self::new(
            BackendErrorCategory::for_status(status, wp_code),
            wp_code.map_or_else(|| format!("http_status_{status}"), ToOwned::to_owned),
            message,
        )
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// A command that the current lifecycle state does not accept.
    pub fn invalid_state(current: BackendLifecycleState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            BackendErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' while backend is in state {current:?}"),
        )
    }

    /// Whether the next periodic attempt may succeed without user action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.category,
            BackendErrorCategory::Network | BackendErrorCategory::RateLimited
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_categories_follow_wordpress_semantics() {
        use BackendErrorCategory::*;

        assert_eq!(BackendErrorCategory::for_status(401, None), Auth);
        assert_eq!(
            BackendErrorCategory::for_status(403, Some(INVALID_TOKEN_CODE)),
            Auth
        );
        assert_eq!(
            BackendErrorCategory::for_status(403, Some("rest_forbidden")),
            Config
        );
        assert_eq!(BackendErrorCategory::for_status(403, None), Config);
        assert_eq!(BackendErrorCategory::for_status(404, None), Config);
        assert_eq!(BackendErrorCategory::for_status(408, None), RateLimited);
        assert_eq!(BackendErrorCategory::for_status(429, None), RateLimited);
        assert_eq!(BackendErrorCategory::for_status(502, None), Network);
        assert_eq!(BackendErrorCategory::for_status(700, None), Internal);
    }

    #[test]
    fn wordpress_error_bodies_keep_code_and_plain_message() {
        let err = BackendError::from_wp_response(
            400,
            br#"{"code":"bp_rest_invalid_id","message":"<strong>Invalid</strong> member ID.","data":{"status":400}}"#,
        );
        assert_eq!(err.category, BackendErrorCategory::Config);
        assert_eq!(err.code, "bp_rest_invalid_id");
        assert_eq!(err.message, "Invalid member ID.");
        assert_eq!(
            err.to_string(),
            "bp_rest_invalid_id (config): Invalid member ID."
        );
    }

    #[test]
    fn non_wordpress_bodies_fall_back_to_status() {
        let err = BackendError::from_wp_response(503, b"<html>Service Unavailable</html>");
        assert_eq!(err.code, "http_status_503");
        assert_eq!(err.message, "HTTP 503");
        assert!(err.is_transient());

        let blank = BackendError::from_wp_response(404, br#"{"code":"","message":"  "}"#);
        assert_eq!(blank.code, "http_status_404");
        assert_eq!(blank.message, "HTTP 404");
    }

    #[test]
    fn invalid_state_error_names_action_and_state() {
        let err = BackendError::invalid_state(BackendLifecycleState::Cold, "open_thread");
        assert_eq!(err.code, "invalid_state_transition");
        assert_eq!(err.category, BackendErrorCategory::Internal);
        assert!(err.message.contains("open_thread"));
        assert!(err.message.contains("Cold"));
    }

    #[test]
    fn rejected_token_is_not_transient() {
        let auth = BackendError::from_wp_response(
            403,
            br#"{"code":"jwt_auth_invalid_token","message":"Expired token"}"#,
        );
        assert_eq!(auth.category, BackendErrorCategory::Auth);
        assert!(!auth.is_transient());
        assert!(
            BackendError::new(BackendErrorCategory::RateLimited, "r", "slow")
                .with_retry_after(Duration::from_secs(4))
                .is_transient()
        );
    }
}
