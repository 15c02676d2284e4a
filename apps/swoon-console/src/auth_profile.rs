//! Persisted login metadata used by the startup restore flow.

use std::{fs, path::Path};

use backend_platform::{remove_file_if_exists, write_file_atomic};
use serde::{Deserialize, Serialize};

/// Non-secret login metadata remembered between runs. The token itself lives
/// in the secret store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthProfile {
    /// REST root of the last login.
    pub base_url: String,
    pub username: String,
    /// Whether session restore should be attempted on startup.
    pub remember_session: bool,
}

/// Load profile JSON from disk when available.
pub fn load_auth_profile(path: &Path) -> Result<Option<AuthProfile>, String> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(format!(
                "failed reading auth profile {}: {err}",
                path.display()
            ));
        }
    };

    let profile = serde_json::from_str::<AuthProfile>(&raw)
        .map_err(|err| format!("failed parsing auth profile {}: {err}", path.display()))?;
    Ok(Some(profile))
}

pub fn save_auth_profile(path: &Path, profile: &AuthProfile) -> Result<(), String> {
    let encoded = serde_json::to_vec(profile).map_err(|err| err.to_string())?;
    write_file_atomic(path, &encoded)
        .map_err(|err| format!("failed writing auth profile {}: {err}", path.display()))
}

pub fn clear_auth_profile(path: &Path) -> Result<(), String> {
    remove_file_if_exists(path)
        .map_err(|err| format!("failed deleting auth profile {}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, path::PathBuf};

    fn unique_temp_path(label: &str) -> PathBuf {
        let now_nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        env::temp_dir()
            .join(format!("swoon-{label}-{now_nanos}"))
            .join("login-profile.json")
    }

    #[test]
    fn profile_round_trip() {
        let path = unique_temp_path("auth-profile");
        let profile = AuthProfile {
            base_url: "https://example.org/wp-json".to_owned(),
            username: "aneta".to_owned(),
            remember_session: true,
        };

        save_auth_profile(&path, &profile).expect("save should work");
        let loaded = load_auth_profile(&path)
            .expect("load should work")
            .expect("profile should be present");
        assert_eq!(loaded, profile);

        clear_auth_profile(&path).expect("clear should work");
        let after_clear = load_auth_profile(&path).expect("load after clear should work");
        assert_eq!(after_clear, None);
        clear_auth_profile(&path).expect("clearing twice is fine");
    }

    #[test]
    fn unreadable_profile_reports_path() {
        let path = unique_temp_path("auth-profile-bad");
        write_file_atomic(&path, b"[]").expect("seed should work");

        let err = load_auth_profile(&path).expect_err("array is not a profile");
        assert!(err.contains("login-profile.json"));
        clear_auth_profile(&path).expect("cleanup");
    }
}
