use tauri::image::Image;
use tauri::{AppHandle, Manager, Runtime, WindowEvent};

use crate::model::ConnectionPhase;

pub(crate) fn show_main_window<R: Runtime>(app: &AppHandle<R>) {
    if let Some(window) = app.get_webview_window("main") {
        let _ = window.show();
        let _ = window.unminimize();
        let _ = window.set_focus();
    }
}

pub(crate) fn toggle_main_window<R: Runtime>(app: &AppHandle<R>) {
    if let Some(window) = app.get_webview_window("main") {
        if window.is_visible().unwrap_or(false) {
            let _ = window.hide();
        } else {
            let _ = window.show();
            let _ = window.unminimize();
            let _ = window.set_focus();
        }
    }
}

pub(crate) fn handle_window_event(window: &tauri::Window, event: &WindowEvent) {
    if window.label() != "main" {
        return;
    }

    match event {
        WindowEvent::CloseRequested { api, .. } => {
            api.prevent_close();
            let _ = window.hide();
        }
        // Regaining focus is the external re-trigger that revives a stream
        // stuck in Failed.
        WindowEvent::Focused(true) => {
            let _ = crate::stream::recover_stream(window.app_handle().clone());
        }
        _ => {}
    }
}

pub(crate) fn tray_icon_for_phase(phase: ConnectionPhase) -> Option<Image<'static>> {
    let bytes = match phase {
        ConnectionPhase::Connected { .. } => include_bytes!("../icons/tray-connected.png").as_slice(),
        ConnectionPhase::Connecting => include_bytes!("../icons/tray-connecting.png").as_slice(),
        ConnectionPhase::Backoff => include_bytes!("../icons/tray-backoff.png").as_slice(),
        ConnectionPhase::Disconnected | ConnectionPhase::Failed => {
            include_bytes!("../icons/tray-disconnected.png").as_slice()
        }
    };
    Image::from_bytes(bytes).ok().map(|icon| icon.to_owned())
}

/// The badge half of the tray: title text on macOS (shown beside the icon),
/// tooltip elsewhere. `None` hides the badge entirely.
pub(crate) fn apply_tray_badge(app: &AppHandle, badge_text: Option<&str>) {
    let Some(tray) = app.tray_by_id("main-tray") else {
        return;
    };

    #[cfg(target_os = "macos")]
    {
        let _ = tray.set_title(badge_text);
    }

    let tooltip = match badge_text {
        Some(text) => format!("CampusHub: {text} unread"),
        None => "CampusHub: no unread notifications".to_string(),
    };
    let _ = tray.set_tooltip(Some(tooltip));
}
