use base64::Engine as _;
#[cfg(debug_assertions)]
use std::io::Write as _;
use std::{
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use tauri::{AppHandle, Manager, Runtime};

use crate::SETTINGS_FILE;

pub(crate) fn settings_file<R: Runtime>(app: &AppHandle<R>) -> Result<PathBuf, String> {
    let config_dir = app
        .path()
        .app_config_dir()
        .map_err(|error| format!("Failed to resolve app config dir: {error}"))?;

    fs::create_dir_all(&config_dir)
        .map_err(|error| format!("Failed to create config directory: {error}"))?;

    Ok(config_dir.join("settings.json"))
}

pub(crate) fn restrict_file_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        if path.exists() {
            if let Err(error) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
                debug_log(&format!(
                    "restrict_file_permissions: failed for {path:?}: {error}"
                ));
            }
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

pub(crate) fn decode_data_url_bytes(data_url: &str, max_bytes: usize) -> Result<Vec<u8>, String> {
    let trimmed = data_url.trim();
    if !trimmed.starts_with("data:") {
        return Err("Not a data URL".to_string());
    }
    let (meta, payload) = trimmed
        .split_once(',')
        .ok_or_else(|| "Malformed data URL".to_string())?;
    let meta_lower = meta.to_ascii_lowercase();
    if !meta_lower.starts_with("data:image/") {
        return Err("Data URL is not an image".to_string());
    }
    if !meta_lower.contains(";base64") {
        return Err("Data URL is not base64 encoded".to_string());
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|error| format!("Invalid base64 payload: {error}"))?;
    if bytes.len() > max_bytes {
        return Err(format!(
            "Data URL image too large ({} bytes > {max_bytes})",
            bytes.len()
        ));
    }
    Ok(bytes)
}

pub(crate) fn truncate_message(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }

    let truncated: String = input.chars().take(max_chars).collect();
    format!("{truncated}...")
}

pub(crate) fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub(crate) fn debug_log(message: &str) {
    #[cfg(not(debug_assertions))]
    let _ = message;
    #[cfg(debug_assertions)]
    {
        let ts = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let line = format!("[campushub-desktop][{ts}] {message}\n");
        eprint!("{line}");
        if let Ok(mut file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open("/tmp/campushub-desktop.log")
        {
            let _ = file.write_all(line.as_bytes());
        }
    }
}

pub(crate) fn get_settings_path() -> Result<&'static PathBuf, String> {
    SETTINGS_FILE
        .get()
        .ok_or_else(|| "Settings path not initialised (setup not complete)".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_message() {
        assert_eq!(truncate_message("short", 10), "short");
        assert_eq!(truncate_message("abcdefghij", 4), "abcd...");
    }

    #[test]
    fn test_decode_data_url_rejects_non_image() {
        assert!(decode_data_url_bytes("data:text/plain;base64,aGk=", 100).is_err());
        assert!(decode_data_url_bytes("http://example.com/a.png", 100).is_err());
    }

    #[test]
    fn test_decode_data_url_roundtrip_and_cap() {
        // single transparent pixel
        let url = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";
        let bytes = decode_data_url_bytes(url, 10_000).expect("decode");
        assert!(!bytes.is_empty());
        assert!(decode_data_url_bytes(url, 4).is_err());
    }
}
