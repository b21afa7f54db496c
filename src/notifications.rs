use chrono::Timelike;
#[cfg(target_os = "macos")]
use mac_notification_sys::{MainButton, Notification, NotificationResponse};
use tauri::AppHandle;

use crate::{debug_log, model::NotificationItem, mute, settings::read_settings};

/// OS notification sink. Degrades to nothing (never to an error) when the
/// platform API is unavailable, permission is denied, or the user muted
/// notifications. Toast and badge sinks are unaffected by any outcome here.
pub(crate) fn maybe_notify(app: &AppHandle, item: &NotificationItem) {
    let settings = match read_settings(app) {
        Ok(settings) => settings,
        Err(error) => {
            debug_log(&format!("failed to read settings for notify: {error}"));
            return;
        }
    };

    if mute::is_mute_active(settings.mute_until) {
        return;
    }
    if is_quiet_hour(
        chrono::Local::now().hour() as u8,
        settings.quiet_hours_start,
        settings.quiet_hours_end,
    ) {
        return;
    }

    #[cfg(target_os = "macos")]
    send_macos_notification(app.clone(), item.clone());
    #[cfg(not(target_os = "macos"))]
    {
        let _ = item;
        debug_log("OS notifications unavailable on this platform, toast only");
    }
}

pub(crate) fn is_quiet_hour(now: u8, start: Option<u8>, end: Option<u8>) -> bool {
    let (start, end) = match (start, end) {
        (Some(start), Some(end)) => (start, end),
        _ => return false,
    };

    if start == end {
        return true;
    }
    if start < end {
        now >= start && now < end
    } else {
        now >= start || now < end
    }
}

#[cfg(target_os = "macos")]
fn send_macos_notification(app: AppHandle, item: NotificationItem) {
    std::thread::spawn(move || {
        ensure_notification_application();

        let title = match item.sender_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => display_label(&item),
        };
        let subtitle = item.title.clone();
        let body = crate::truncate_message(&item.body, 220);

        let mut notification = Notification::new();
        notification
            .title(&title)
            .subtitle(&subtitle)
            .message(&body)
            .main_button(MainButton::SingleAction("Open"))
            .close_button("Dismiss")
            .default_sound()
            .wait_for_click(true)
            .asynchronous(false);

        let avatar_path = cache_sender_avatar_png(&app, &item);
        if let Some(avatar_path) = avatar_path.as_deref() {
            notification.content_image(avatar_path);
        }

        match notification.send() {
            Ok(NotificationResponse::Click) | Ok(NotificationResponse::ActionButton(_)) => {
                handle_click(&app, &item);
            }
            Ok(_) => {}
            Err(error) => {
                // Permission denial lands here: stay silent, toast already ran.
                debug_log(&format!("failed to show macOS notification: {error}"));
            }
        }
    });
}

#[cfg(target_os = "macos")]
fn display_label(item: &NotificationItem) -> String {
    match item.kind {
        crate::model::NotificationKind::Message => "New message".to_string(),
        crate::model::NotificationKind::Announcement => "Announcement".to_string(),
        crate::model::NotificationKind::Enrollment => "Enrollment update".to_string(),
        crate::model::NotificationKind::Grades => "Grade update".to_string(),
        crate::model::NotificationKind::System => "CampusHub".to_string(),
    }
}

#[cfg(target_os = "macos")]
fn handle_click(app: &AppHandle, item: &NotificationItem) {
    use tauri::Emitter;

    let target = crate::nav::resolve_navigation(item);
    crate::nav::activate(app, &target);
    let _ = app.emit("notification-clicked", item.clone());

    // Server confirms before the badge moves; the follow-up refresh happens
    // inside mark_notification_read.
    let app_for_read = app.clone();
    let id = item.id;
    tauri::async_runtime::spawn(async move {
        if let Err(error) = crate::badge::mark_notification_read(&app_for_read, id).await {
            debug_log(&format!("failed to mark notification read: {error}"));
        }
    });
}

/// Registers the notification bundle lazily, the first time a banner is
/// actually needed. Every candidate failing just means banners are skipped.
#[cfg(target_os = "macos")]
fn ensure_notification_application() {
    static INIT_NOTIFICATION_APP: std::sync::Once = std::sync::Once::new();
    INIT_NOTIFICATION_APP.call_once(|| {
        for bundle_id in [
            "edu.campushub.desktop",
            "com.apple.Terminal",
            "com.apple.Finder",
        ] {
            match mac_notification_sys::set_application(bundle_id) {
                Ok(_) => {
                    return;
                }
                Err(error) => {
                    debug_log(&format!(
                        "failed to set macOS notification bundle id {bundle_id}: {error}"
                    ));
                }
            }
        }
    });
}

#[cfg(target_os = "macos")]
fn cache_sender_avatar_png(app: &AppHandle, item: &NotificationItem) -> Option<String> {
    let avatar_url = item.sender_avatar.as_deref()?.trim();
    if avatar_url.is_empty() || !avatar_url.starts_with("data:") {
        return None;
    }

    let avatars_dir = avatar_cache_dir(app)?;
    let cache_key = item.sender_id.unwrap_or(item.id);
    let file_path = avatars_dir.join(format!("sender-{cache_key}.png"));
    if file_path.exists() {
        return Some(file_path.to_string_lossy().to_string());
    }

    let bytes = match crate::decode_data_url_bytes(avatar_url, crate::AVATAR_MAX_BYTES) {
        Ok(bytes) => bytes,
        Err(error) => {
            debug_log(&format!(
                "failed decoding sender avatar for id={cache_key}: {error}"
            ));
            return None;
        }
    };
    if bytes.is_empty() {
        return None;
    }
    if let Err(error) = std::fs::write(&file_path, &bytes) {
        debug_log(&format!("failed writing avatar cache file: {error}"));
        return None;
    }
    Some(file_path.to_string_lossy().to_string())
}

#[cfg(target_os = "macos")]
fn avatar_cache_dir(app: &AppHandle) -> Option<std::path::PathBuf> {
    use tauri::Manager;

    let base_cache_dir = app
        .path()
        .app_cache_dir()
        .or_else(|_| app.path().app_config_dir())
        .ok()?;
    let avatars_dir = base_cache_dir.join("sender-avatars");
    if std::fs::create_dir_all(&avatars_dir).is_err() {
        return None;
    }
    Some(avatars_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_hours_disabled_without_bounds() {
        assert!(!is_quiet_hour(3, None, None));
        assert!(!is_quiet_hour(3, Some(22), None));
    }

    #[test]
    fn test_quiet_hours_same_hour_means_always() {
        assert!(is_quiet_hour(10, Some(7), Some(7)));
    }

    #[test]
    fn test_quiet_hours_daytime_window() {
        assert!(is_quiet_hour(9, Some(8), Some(17)));
        assert!(!is_quiet_hour(18, Some(8), Some(17)));
    }

    #[test]
    fn test_quiet_hours_overnight_window() {
        assert!(is_quiet_hour(23, Some(22), Some(7)));
        assert!(is_quiet_hour(3, Some(22), Some(7)));
        assert!(!is_quiet_hour(12, Some(22), Some(7)));
    }
}
