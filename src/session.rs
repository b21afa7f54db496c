use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use tauri::{AppHandle, Manager};

use crate::{
    debug_log, get_settings_path,
    settings::{normalize_base_url, read_settings, save_non_secret_settings, StoredSettings},
    AppState, HTTP_REQUEST_TIMEOUT_SECS, KEYRING_ACCOUNT, KEYRING_SERVICE, TOKEN_ENV_VAR,
};

/// Who the connection speaks for. Resolved once per session over HTTP and
/// cached; cleared wholesale when the server rejects the credential.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub(crate) struct SessionIdentity {
    pub(crate) id: i64,
    pub(crate) email: String,
    pub(crate) role: Role,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Role {
    Student,
    Faculty,
    Registrar,
    Admin,
    Unknown,
}

impl Role {
    pub(crate) fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "student" => Role::Student,
            "faculty" => Role::Faculty,
            "registrar" => Role::Registrar,
            "admin" => Role::Admin,
            _ => Role::Unknown,
        }
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Role::parse(&raw))
    }
}

#[derive(Debug, Deserialize)]
struct IdentityEnvelopeWire {
    #[serde(default)]
    success: bool,
    user: Option<IdentityUserWire>,
}

#[derive(Debug, Deserialize)]
struct IdentityUserWire {
    id: i64,
    email: String,
    #[serde(default)]
    role: String,
}

/// Fixed-priority credential lookup: OS keychain, then the settings file,
/// then the environment. First non-empty match wins.
pub(crate) fn load_token() -> Result<Option<String>, String> {
    let stored = settings_file_token()?;
    let env = std::env::var(TOKEN_ENV_VAR).ok();
    Ok(token_from_sources([keychain_token(), stored, env]))
}

pub(crate) fn token_from_sources<const N: usize>(sources: [Option<String>; N]) -> Option<String> {
    sources
        .into_iter()
        .flatten()
        .map(|token| token.trim().to_string())
        .find(|token| !token.is_empty())
}

fn keychain_token() -> Option<String> {
    let entry = match keyring::Entry::new(KEYRING_SERVICE, KEYRING_ACCOUNT) {
        Ok(entry) => entry,
        Err(error) => {
            debug_log(&format!("keychain unavailable: {error}"));
            return None;
        }
    };
    match entry.get_password() {
        Ok(token) if !token.trim().is_empty() => Some(token),
        Ok(_) => None,
        Err(keyring::Error::NoEntry) => None,
        Err(error) => {
            debug_log(&format!("keychain read failed: {error}"));
            None
        }
    }
}

fn settings_file_token() -> Result<Option<String>, String> {
    let path = get_settings_path()?;
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|error| format!("Failed to read settings for token: {error}"))?;
    let settings: StoredSettings = serde_json::from_str(&raw).unwrap_or_default();
    Ok(settings.token.filter(|token| !token.trim().is_empty()))
}

/// Preferred store is the keychain; the settings file only keeps the token
/// when no keychain is available (e.g. stripped-down Linux sessions).
pub(crate) fn store_token(app: &AppHandle, token: &str) -> Result<(), String> {
    let token = token.trim();
    if token.is_empty() {
        return Err("Token is required".to_string());
    }

    let keychain_result = keyring::Entry::new(KEYRING_SERVICE, KEYRING_ACCOUNT)
        .and_then(|entry| entry.set_password(token));

    let mut settings = read_settings(app).unwrap_or_default();
    match keychain_result {
        Ok(()) => {
            debug_log("store_token: token written to keychain");
            settings.token = None;
        }
        Err(error) => {
            debug_log(&format!(
                "store_token: keychain write failed, falling back to settings file: {error}"
            ));
            settings.token = Some(token.to_string());
        }
    }
    save_non_secret_settings(app, &settings)
}

/// Clears every credential location together. Partial clears leave a stale
/// token that would be retried forever against a 401.
pub(crate) fn clear_credentials(app: &AppHandle) {
    match keyring::Entry::new(KEYRING_SERVICE, KEYRING_ACCOUNT) {
        Ok(entry) => match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {}
            Err(error) => debug_log(&format!("failed to delete keychain token: {error}")),
        },
        Err(error) => debug_log(&format!("keychain unavailable during clear: {error}")),
    }

    match read_settings(app) {
        Ok(mut settings) => {
            settings.token = None;
            settings.cached_identity = None;
            if let Err(error) = save_non_secret_settings(app, &settings) {
                debug_log(&format!("failed to clear stored credentials: {error}"));
            }
        }
        Err(error) => debug_log(&format!("failed to read settings during clear: {error}")),
    }

    let state = app.state::<AppState>();
    if let Ok(mut identity) = state.identity.lock() {
        *identity = None;
    };
}

pub(crate) fn invalidate_session(app: &AppHandle) {
    debug_log("session invalidated by server, clearing credentials");
    clear_credentials(app);
}

pub(crate) fn cached_identity(app: &AppHandle) -> Option<SessionIdentity> {
    let state = app.state::<AppState>();
    state
        .identity
        .lock()
        .ok()
        .and_then(|identity| identity.clone())
}

pub(crate) async fn resolve_identity(app: &AppHandle) -> Result<SessionIdentity, String> {
    if let Some(identity) = cached_identity(app) {
        return Ok(identity);
    }

    let settings = read_settings(app)?;
    let base_url = normalize_base_url(&settings.base_url)?;
    let token = load_token()?
        .ok_or_else(|| "No portal token found. Save one in settings first.".to_string())?;

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(|error| format!("Failed to build HTTP client: {error}"))?;
    let response = match client
        .get(format!("{base_url}/api/auth/me"))
        .bearer_auth(&token)
        .send()
        .await
    {
        Ok(response) => response,
        Err(error) => {
            // Transient failure: fall back to the persisted identity so a
            // briefly offline portal does not look like a logged-out user.
            if let Some(identity) = settings.cached_identity {
                debug_log(&format!(
                    "identity lookup failed, using persisted identity: {error}"
                ));
                remember_identity(app, &identity, false);
                return Ok(identity);
            }
            return Err(format!("Identity request failed: {error}"));
        }
    };

    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        invalidate_session(app);
        return Err(format!(
            "Identity request rejected (HTTP {})",
            status.as_u16()
        ));
    }
    if !status.is_success() {
        return Err(format!(
            "Identity request failed with HTTP {}",
            status.as_u16()
        ));
    }

    let envelope = response
        .json::<IdentityEnvelopeWire>()
        .await
        .map_err(|error| format!("Failed to decode identity response: {error}"))?;
    let user = match envelope.user {
        Some(user) if envelope.success => user,
        _ => return Err("Identity response missing user".to_string()),
    };

    let identity = SessionIdentity {
        id: user.id,
        email: user.email,
        role: Role::parse(&user.role),
    };
    remember_identity(app, &identity, true);
    Ok(identity)
}

fn remember_identity(app: &AppHandle, identity: &SessionIdentity, persist: bool) {
    let state = app.state::<AppState>();
    if let Ok(mut slot) = state.identity.lock() {
        *slot = Some(identity.clone());
    }

    if !persist {
        return;
    }
    match read_settings(app) {
        Ok(mut settings) => {
            if settings.cached_identity.as_ref() != Some(identity) {
                settings.cached_identity = Some(identity.clone());
                if let Err(error) = save_non_secret_settings(app, &settings) {
                    debug_log(&format!("failed to persist identity: {error}"));
                }
            }
        }
        Err(error) => debug_log(&format!("failed to read settings for identity: {error}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_priority_first_non_empty_wins() {
        let token = token_from_sources([
            None,
            Some("  ".to_string()),
            Some("settings-token".to_string()),
        ]);
        assert_eq!(token.as_deref(), Some("settings-token"));

        let token = token_from_sources([
            Some(" keychain-token ".to_string()),
            Some("settings-token".to_string()),
            None,
        ]);
        assert_eq!(token.as_deref(), Some("keychain-token"));

        assert_eq!(token_from_sources([None, None]), None);
    }

    #[test]
    fn test_role_parse_fallback() {
        assert_eq!(Role::parse("Registrar"), Role::Registrar);
        assert_eq!(Role::parse("student"), Role::Student);
        assert_eq!(Role::parse("superuser"), Role::Unknown);
    }

    #[test]
    fn test_identity_envelope_decodes() {
        let identity: IdentityEnvelopeWire = serde_json::from_str(
            r#"{"success":true,"user":{"id":7,"email":"reg@school.edu","role":"registrar"}}"#,
        )
        .expect("decode");
        assert!(identity.success);
        let user = identity.user.expect("user");
        assert_eq!(user.id, 7);
        assert_eq!(Role::parse(&user.role), Role::Registrar);
    }
}
