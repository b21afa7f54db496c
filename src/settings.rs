use serde::{Deserialize, Serialize};
use std::{fs, time::Duration};
use tauri::{AppHandle, Runtime};

use crate::{
    debug_log, restrict_file_permissions, session, session::SessionIdentity, settings_file,
    truncate_message, HTTP_REQUEST_TIMEOUT_SECS,
};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub(crate) struct StoredSettings {
    pub(crate) base_url: String,
    /// Fallback token store for hosts without a usable keychain; the
    /// keychain copy wins when both exist.
    pub(crate) token: Option<String>,
    pub(crate) cached_identity: Option<SessionIdentity>,
    pub(crate) launch_at_login: bool,
    pub(crate) start_minimized_to_tray: bool,
    pub(crate) mute_until: Option<u64>,
    pub(crate) mute_mode: Option<String>,
    pub(crate) quiet_hours_start: Option<u8>,
    pub(crate) quiet_hours_end: Option<u8>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SettingsResponse {
    pub(crate) base_url: String,
    pub(crate) has_token: bool,
    pub(crate) launch_at_login: bool,
    pub(crate) start_minimized_to_tray: bool,
    pub(crate) mute_until: Option<u64>,
    pub(crate) mute_mode: Option<String>,
    pub(crate) quiet_hours_start: Option<u8>,
    pub(crate) quiet_hours_end: Option<u8>,
}

pub(crate) fn load_settings<R: Runtime>(app: &AppHandle<R>) -> Result<SettingsResponse, String> {
    let stored = read_settings(app)?;
    let has_token = session::load_token().unwrap_or(None).is_some();

    Ok(SettingsResponse {
        base_url: stored.base_url,
        has_token,
        launch_at_login: stored.launch_at_login,
        start_minimized_to_tray: stored.start_minimized_to_tray,
        mute_until: stored.mute_until,
        mute_mode: stored.mute_mode,
        quiet_hours_start: stored.quiet_hours_start,
        quiet_hours_end: stored.quiet_hours_end,
    })
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn save_settings(
    app: &AppHandle,
    base_url: String,
    token: String,
    launch_at_login: Option<bool>,
    start_minimized_to_tray: Option<bool>,
    quiet_hours_start: Option<u8>,
    quiet_hours_end: Option<u8>,
) -> Result<(), String> {
    debug_log(&format!(
        "save_settings called: base_url={base_url:?} token_len={}",
        token.trim().len()
    ));
    let normalized_url = normalize_base_url(&base_url)?;
    let current = read_settings(app).unwrap_or_default();
    let had_token = session::load_token().unwrap_or(None).is_some();
    if token.trim().is_empty() && !had_token {
        return Err("Token is required".to_string());
    }

    save_non_secret_settings(
        app,
        &StoredSettings {
            base_url: normalized_url,
            token: current.token.clone(),
            cached_identity: current.cached_identity.clone(),
            launch_at_login: launch_at_login.unwrap_or(current.launch_at_login),
            start_minimized_to_tray: start_minimized_to_tray
                .unwrap_or(current.start_minimized_to_tray),
            mute_until: current.mute_until,
            mute_mode: current.mute_mode,
            quiet_hours_start: quiet_hours_start.or(current.quiet_hours_start).map(|h| h % 24),
            quiet_hours_end: quiet_hours_end.or(current.quiet_hours_end).map(|h| h % 24),
        },
    )?;

    if !token.trim().is_empty() {
        session::store_token(app, &token)?;
    }

    #[cfg(target_os = "macos")]
    if let Err(error) =
        crate::apply_launch_at_login(launch_at_login.unwrap_or(current.launch_at_login))
    {
        debug_log(&format!("failed to apply launch-at-login change: {error}"));
    }

    debug_log("save_settings: complete");
    Ok(())
}

pub(crate) async fn test_connection(
    base_url: String,
    token: Option<String>,
) -> Result<String, String> {
    let normalized_url = normalize_base_url(&base_url)?;

    let token_to_use = match token {
        Some(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => session::load_token()?
            .ok_or_else(|| "No portal token found. Save one in settings first.".to_string())?,
    };

    let endpoint = format!("{normalized_url}/api/auth/me");
    debug_log(&format!("test_connection: GET {endpoint}"));
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(|error| format!("Failed to build HTTP client: {error}"))?;
    let response = client
        .get(&endpoint)
        .bearer_auth(&token_to_use)
        .send()
        .await
        .map_err(|error| format!("Connection request failed: {error}"))?;

    let status = response.status().as_u16();
    if response.status().is_success() {
        return Ok("Connection successful".to_string());
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unable to read response body>".to_string());

    Err(format!(
        "Portal request failed (HTTP {status}): {}",
        truncate_message(&body, 200)
    ))
}

pub(crate) fn read_settings<R: Runtime>(app: &AppHandle<R>) -> Result<StoredSettings, String> {
    let path = settings_file(app)?;
    if !path.exists() {
        return Ok(StoredSettings::default());
    }

    let content =
        fs::read_to_string(path).map_err(|error| format!("Failed to read settings: {error}"))?;
    serde_json::from_str::<StoredSettings>(&content)
        .map_err(|error| format!("Failed to parse settings: {error}"))
}

pub(crate) fn save_non_secret_settings<R: Runtime>(
    app: &AppHandle<R>,
    settings: &StoredSettings,
) -> Result<(), String> {
    let path = settings_file(app)?;
    let content = serde_json::to_string_pretty(settings)
        .map_err(|error| format!("Failed to serialize settings: {error}"))?;
    fs::write(&path, content).map_err(|error| format!("Failed to write settings: {error}"))?;
    restrict_file_permissions(&path);
    Ok(())
}

pub(crate) fn normalize_base_url(input: &str) -> Result<String, String> {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err("Portal URL is required".to_string());
    }

    let url =
        reqwest::Url::parse(trimmed).map_err(|error| format!("Invalid portal URL: {error}"))?;

    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err("Portal URL must start with http:// or https://".to_string());
    }

    Ok(trimmed.to_string())
}

pub(crate) fn build_stream_ws_url(base_url: &str) -> Result<String, String> {
    let mut ws_url =
        reqwest::Url::parse(base_url).map_err(|error| format!("Invalid portal URL: {error}"))?;

    match ws_url.scheme() {
        "http" => {
            ws_url
                .set_scheme("ws")
                .map_err(|_| "Unable to convert URL scheme to ws".to_string())?;
        }
        "https" => {
            ws_url
                .set_scheme("wss")
                .map_err(|_| "Unable to convert URL scheme to wss".to_string())?;
        }
        _ => return Err("Portal URL must start with http:// or https://".to_string()),
    }

    let mut path = ws_url.path().trim_end_matches('/').to_string();
    path.push_str("/ws/notifications");
    ws_url.set_path(&path);
    Ok(ws_url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("https://portal.school.edu/").expect("normalize"),
            "https://portal.school.edu"
        );
        assert!(normalize_base_url("").is_err());
        assert!(normalize_base_url("ftp://portal.school.edu").is_err());
    }

    #[test]
    fn test_build_stream_ws_url() {
        assert_eq!(
            build_stream_ws_url("https://portal.school.edu").expect("build"),
            "wss://portal.school.edu/ws/notifications"
        );
        assert_eq!(
            build_stream_ws_url("http://localhost:8080/portal").expect("build"),
            "ws://localhost:8080/portal/ws/notifications"
        );
    }

    #[test]
    fn test_stored_settings_defaults_survive_unknown_json() {
        let settings: StoredSettings = serde_json::from_str(r#"{"base_url":"x"}"#).expect("parse");
        assert_eq!(settings.base_url, "x");
        assert!(settings.token.is_none());
        assert!(settings.mute_until.is_none());
    }
}
