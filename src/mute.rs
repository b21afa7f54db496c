use serde::Serialize;
use tauri::menu::MenuItem;
use tauri::{AppHandle, Emitter, Manager};

use crate::{
    debug_log,
    settings::{read_settings, save_non_secret_settings},
    unix_now_secs, AppState, TrayMuteMenuState, MUTE_FOREVER_SENTINEL, MUTE_MODE_15M,
    MUTE_MODE_1H, MUTE_MODE_CUSTOM, MUTE_MODE_FOREVER,
};

#[derive(Debug, Serialize, Clone)]
pub(crate) struct MuteStateResponse {
    pub(crate) mute_until: Option<u64>,
    pub(crate) mute_mode: Option<String>,
}

pub(crate) struct MuteMenuItems {
    pub(crate) status_item: MenuItem<tauri::Wry>,
    pub(crate) mute_15m_item: MenuItem<tauri::Wry>,
    pub(crate) mute_1h_item: MenuItem<tauri::Wry>,
    pub(crate) mute_forever_item: MenuItem<tauri::Wry>,
    pub(crate) resume_item: MenuItem<tauri::Wry>,
}

pub(crate) fn create_mute_menu_items(app: &AppHandle) -> Result<MuteMenuItems, tauri::Error> {
    let status_item = MenuItem::with_id(
        app,
        "mute_status",
        "Notifications: On",
        false,
        None::<&str>,
    )?;
    let mute_15m_item = MenuItem::with_id(app, "mute_15m", "Mute 15m", true, None::<&str>)?;
    let mute_1h_item = MenuItem::with_id(app, "mute_1h", "Mute 1h", true, None::<&str>)?;
    let mute_forever_item =
        MenuItem::with_id(app, "mute_forever", "Mute Until Resumed", true, None::<&str>)?;
    let resume_item = MenuItem::with_id(
        app,
        "resume_notifications",
        "Resume Notifications",
        true,
        None::<&str>,
    )?;

    Ok(MuteMenuItems {
        status_item,
        mute_15m_item,
        mute_1h_item,
        mute_forever_item,
        resume_item,
    })
}

pub(crate) fn install_mute_menu_state(
    app: &AppHandle,
    items: &MuteMenuItems,
    mute_until: Option<u64>,
    mute_mode: Option<&str>,
) {
    let state = app.state::<AppState>();
    if let Ok(mut tray_mute_menu_lock) = state.tray_mute_menu.lock() {
        *tray_mute_menu_lock = Some(TrayMuteMenuState {
            status_item: items.status_item.clone(),
            mute_15m_item: items.mute_15m_item.clone(),
            mute_1h_item: items.mute_1h_item.clone(),
            mute_forever_item: items.mute_forever_item.clone(),
            resume_item: items.resume_item.clone(),
        });
    }
    apply_mute_state_to_tray(app, mute_until, mute_mode);
}

pub(crate) fn mute_notifications(app: AppHandle, minutes: u64) -> Result<(), String> {
    if minutes == 0 {
        return Err("Mute duration must be greater than 0 minutes".to_string());
    }
    let until = unix_now_secs().saturating_add(minutes.saturating_mul(60));
    let mode = match minutes {
        15 => MUTE_MODE_15M,
        60 => MUTE_MODE_1H,
        _ => MUTE_MODE_CUSTOM,
    };
    set_mute_until(&app, Some(until), Some(mode))
}

pub(crate) fn mute_notifications_forever(app: AppHandle) -> Result<(), String> {
    set_mute_until(&app, Some(MUTE_FOREVER_SENTINEL), Some(MUTE_MODE_FOREVER))
}

pub(crate) fn resume_notifications(app: AppHandle) -> Result<(), String> {
    set_mute_until(&app, None, None)
}

pub(crate) fn get_mute_state(app: &AppHandle) -> Result<MuteStateResponse, String> {
    let settings = read_settings(app)?;
    Ok(MuteStateResponse {
        mute_until: settings.mute_until,
        mute_mode: settings.mute_mode,
    })
}

pub(crate) fn set_mute_until(
    app: &AppHandle,
    mute_until: Option<u64>,
    mute_mode: Option<&str>,
) -> Result<(), String> {
    let mut settings = read_settings(app)?;
    settings.mute_until = mute_until;
    settings.mute_mode = mute_mode.map(|mode| mode.to_string());
    save_non_secret_settings(app, &settings)?;
    apply_mute_state_to_tray(app, mute_until, settings.mute_mode.as_deref());
    emit_mute_state(app, mute_until, settings.mute_mode.as_deref());

    Ok(())
}

/// Timed mutes expire on their own; this runs from a periodic task so the
/// tray flips back to "On" without user interaction.
pub(crate) fn refresh_mute_state_from_settings(app: &AppHandle) {
    let settings = match read_settings(app) {
        Ok(settings) => settings,
        Err(_) => return,
    };

    if let Some(until) = settings.mute_until {
        if until != MUTE_FOREVER_SENTINEL && unix_now_secs() >= until {
            let _ = set_mute_until(app, None, None);
            return;
        }
    }

    apply_mute_state_to_tray(app, settings.mute_until, settings.mute_mode.as_deref());
}

pub(crate) fn is_mute_active(mute_until: Option<u64>) -> bool {
    match mute_until {
        Some(MUTE_FOREVER_SENTINEL) => true,
        Some(until) => unix_now_secs() < until,
        None => false,
    }
}

fn format_mute_remaining(total_seconds: u64) -> String {
    let seconds = total_seconds.max(1);
    if seconds < 60 {
        return format!("{seconds}s");
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("{minutes}m");
    }
    let hours = minutes / 60;
    let rem_minutes = minutes % 60;
    if rem_minutes == 0 {
        format!("{hours}h")
    } else {
        format!("{hours}h {rem_minutes}m")
    }
}

fn apply_mute_state_to_tray(app: &AppHandle, mute_until: Option<u64>, mute_mode: Option<&str>) {
    let state = app.state::<AppState>();
    let handles = state
        .tray_mute_menu
        .lock()
        .ok()
        .and_then(|guard| guard.clone());

    let Some(handles) = handles else {
        return;
    };

    let now = unix_now_secs();
    let status_label = match mute_until {
        Some(MUTE_FOREVER_SENTINEL) => "Notifications: Muted".to_string(),
        Some(until) if until > now => {
            let remaining = until.saturating_sub(now);
            format!("Notifications: Muted {} left", format_mute_remaining(remaining))
        }
        _ => "Notifications: On".to_string(),
    };
    let mute_active = is_mute_active(mute_until);
    let mute_15m_active = mute_active && mute_mode == Some(MUTE_MODE_15M);
    let mute_1h_active = mute_active && mute_mode == Some(MUTE_MODE_1H);
    let mute_forever_active = mute_active && mute_mode == Some(MUTE_MODE_FOREVER);

    let _ = handles.status_item.set_text(&status_label);
    let _ = handles.resume_item.set_enabled(mute_active);
    let _ = handles.mute_15m_item.set_text(if mute_15m_active {
        "Mute 15m ✓"
    } else {
        "Mute 15m"
    });
    let _ = handles.mute_1h_item.set_text(if mute_1h_active {
        "Mute 1h ✓"
    } else {
        "Mute 1h"
    });
    let _ = handles.mute_forever_item.set_text(if mute_forever_active {
        "Mute Until Resumed ✓"
    } else {
        "Mute Until Resumed"
    });
}

fn emit_mute_state(app: &AppHandle, mute_until: Option<u64>, mute_mode: Option<&str>) {
    let payload = MuteStateResponse {
        mute_until,
        mute_mode: mute_mode.map(|mode| mode.to_string()),
    };

    if let Err(error) = app.emit("mute-state", payload.clone()) {
        debug_log(&format!("failed to emit mute-state: {error}"));
    }
    if let Some(window) = app.get_webview_window("main") {
        let _ = window.emit("mute-state", payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mute_forever_sentinel_is_active() {
        assert!(is_mute_active(Some(MUTE_FOREVER_SENTINEL)));
        assert!(!is_mute_active(None));
        assert!(is_mute_active(Some(unix_now_secs() + 600)));
        assert!(!is_mute_active(Some(1)));
    }

    #[test]
    fn test_format_mute_remaining() {
        assert_eq!(format_mute_remaining(0), "1s");
        assert_eq!(format_mute_remaining(45), "45s");
        assert_eq!(format_mute_remaining(120), "2m");
        assert_eq!(format_mute_remaining(3600), "1h");
        assert_eq!(format_mute_remaining(5400), "1h 30m");
    }
}
