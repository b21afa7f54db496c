#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod badge;
mod consts;
mod core;
mod diagnostics;
mod model;
mod mute;
mod nav;
mod notifications;
mod router;
mod session;
mod settings;
mod stream;
mod ui_shell;

use std::{fs, path::PathBuf, sync::OnceLock, time::Duration};

#[cfg(target_os = "macos")]
use std::process::Command;

use tauri::menu::{Menu, MenuItem};
use tauri::tray::{MouseButton, MouseButtonState, TrayIconBuilder, TrayIconEvent};
use tauri::{AppHandle, Emitter, Manager};

pub(crate) use consts::*;
pub(crate) use core::{
    debug_log, decode_data_url_bytes, get_settings_path, restrict_file_permissions, settings_file,
    truncate_message, unix_now_secs,
};
pub(crate) use model::{AppState, TrayMuteMenuState};

use model::NotificationItem;

/// Resolved at startup; must be set before any token lookup that runs without
/// an `AppHandle`.
static SETTINGS_FILE: OnceLock<PathBuf> = OnceLock::new();

#[tauri::command]
fn load_settings(app: AppHandle) -> Result<settings::SettingsResponse, String> {
    settings::load_settings(&app)
}

#[tauri::command]
#[allow(clippy::too_many_arguments)]
fn save_settings(
    app: AppHandle,
    base_url: String,
    token: String,
    launch_at_login: Option<bool>,
    start_minimized_to_tray: Option<bool>,
    quiet_hours_start: Option<u8>,
    quiet_hours_end: Option<u8>,
) -> Result<(), String> {
    settings::save_settings(
        &app,
        base_url,
        token,
        launch_at_login,
        start_minimized_to_tray,
        quiet_hours_start,
        quiet_hours_end,
    )
}

#[tauri::command]
async fn test_connection(base_url: String, token: Option<String>) -> Result<String, String> {
    settings::test_connection(base_url, token).await
}

#[tauri::command]
async fn get_identity(app: AppHandle) -> Result<session::SessionIdentity, String> {
    session::resolve_identity(&app).await
}

#[tauri::command]
fn sign_out(app: AppHandle) -> Result<(), String> {
    let _ = stream::stop_stream_internal(&app);
    session::clear_credentials(&app);
    Ok(())
}

#[tauri::command]
fn start_stream(app: AppHandle) -> Result<(), String> {
    stream::start_stream(app)
}

#[tauri::command]
fn stop_stream(app: AppHandle) -> Result<(), String> {
    stream::stop_stream(app)
}

#[tauri::command]
fn restart_stream(app: AppHandle) -> Result<(), String> {
    stream::restart_stream(app)
}

#[tauri::command]
fn recover_stream(app: AppHandle) -> Result<(), String> {
    stream::recover_stream(app)
}

#[tauri::command]
fn get_connection_state(app: AppHandle) -> Result<String, String> {
    stream::get_connection_state(app)
}

#[tauri::command]
fn get_runtime_diagnostics(app: AppHandle) -> Result<diagnostics::RuntimeDiagnostics, String> {
    diagnostics::snapshot_runtime(&app)
}

#[tauri::command]
async fn load_notifications(
    app: AppHandle,
    limit: Option<usize>,
    offset: Option<usize>,
) -> Result<Vec<NotificationItem>, String> {
    badge::fetch_notifications(&app, limit, offset).await
}

#[tauri::command]
async fn refresh_badge(app: AppHandle) -> Result<(), String> {
    badge::refresh_badge(&app).await
}

#[tauri::command]
fn get_unread_counts(app: AppHandle) -> Result<badge::UnreadCountsPayload, String> {
    badge::counts_payload_snapshot(&app)
}

#[tauri::command]
#[allow(non_snake_case)]
async fn mark_notification_read(
    app: AppHandle,
    notificationId: Option<i64>,
    notification_id: Option<i64>,
) -> Result<(), String> {
    let notification_id = notification_id
        .or(notificationId)
        .ok_or_else(|| "Missing notification id".to_string())?;
    badge::mark_notification_read(&app, notification_id).await
}

#[tauri::command]
async fn mark_all_notifications_read(app: AppHandle) -> Result<(), String> {
    badge::mark_all_notifications_read(&app).await
}

/// Toast click from the webview: navigate first so the user lands somewhere,
/// then confirm the read server-side.
#[tauri::command]
async fn notification_clicked(app: AppHandle, notification: NotificationItem) -> Result<(), String> {
    let target = nav::resolve_navigation(&notification);
    nav::activate(&app, &target);
    let _ = app.emit("notification-clicked", notification.clone());
    badge::mark_notification_read(&app, notification.id).await
}

#[tauri::command]
fn navigate_to_section(app: AppHandle, section: String) -> Result<(), String> {
    let target = nav::NavTarget {
        section: nav::Section::parse(&section),
        thread_partner: None,
    };
    nav::activate(&app, &target);
    Ok(())
}

#[tauri::command]
fn mute_notifications(app: AppHandle, minutes: u64) -> Result<(), String> {
    mute::mute_notifications(app, minutes)
}

#[tauri::command]
fn mute_notifications_forever(app: AppHandle) -> Result<(), String> {
    mute::mute_notifications_forever(app)
}

#[tauri::command]
fn resume_notifications(app: AppHandle) -> Result<(), String> {
    mute::resume_notifications(app)
}

#[tauri::command]
fn get_mute_state(app: AppHandle) -> Result<mute::MuteStateResponse, String> {
    mute::get_mute_state(&app)
}

#[tauri::command]
fn open_external_url(url: String) -> Result<(), String> {
    open_url_in_browser(&url)
}

pub(crate) fn open_url_in_browser(url: &str) -> Result<(), String> {
    let candidate = url.trim();
    if candidate.is_empty() {
        return Err("Missing URL".to_string());
    }
    let parsed = reqwest::Url::parse(candidate).map_err(|error| format!("Invalid URL: {error}"))?;
    let scheme = parsed.scheme().to_ascii_lowercase();
    if scheme != "http" && scheme != "https" && scheme != "mailto" {
        return Err(format!("Unsupported URL scheme: {scheme}"));
    }

    #[cfg(target_os = "macos")]
    let status = Command::new("open").arg(candidate).status();
    #[cfg(target_os = "linux")]
    let status = std::process::Command::new("xdg-open").arg(candidate).status();
    #[cfg(target_os = "windows")]
    let status = std::process::Command::new("cmd")
        .arg("/C")
        .arg("start")
        .arg("")
        .arg(candidate)
        .status();

    let status = status.map_err(|error| format!("Failed to open URL: {error}"))?;
    if !status.success() {
        return Err(format!(
            "Failed to open URL (exit code {})",
            status.code().unwrap_or(-1)
        ));
    }

    Ok(())
}

#[cfg(target_os = "macos")]
fn launch_agent_plist_path() -> Result<PathBuf, String> {
    let home = std::env::var("HOME").map_err(|_| "HOME not set".to_string())?;
    let launch_agents_dir = PathBuf::from(home).join("Library/LaunchAgents");
    fs::create_dir_all(&launch_agents_dir)
        .map_err(|error| format!("Failed to create LaunchAgents dir: {error}"))?;
    Ok(launch_agents_dir.join(format!("{LAUNCH_AGENT_LABEL}.plist")))
}

#[cfg(target_os = "macos")]
pub(crate) fn apply_launch_at_login(enabled: bool) -> Result<(), String> {
    let plist_path = launch_agent_plist_path()?;
    if !enabled {
        let _ = Command::new("launchctl")
            .arg("unload")
            .arg("-w")
            .arg(&plist_path)
            .output();
        if plist_path.exists() {
            let _ = fs::remove_file(&plist_path);
        }
        return Ok(());
    }

    let exe = std::env::current_exe()
        .map_err(|error| format!("Failed to resolve app executable: {error}"))?;
    let exe_str = exe.to_string_lossy();

    let plist = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
  <key>Label</key>
  <string>{}</string>
  <key>ProgramArguments</key>
  <array>
    <string>{}</string>
  </array>
  <key>RunAtLoad</key>
  <true/>
</dict>
</plist>
"#,
        LAUNCH_AGENT_LABEL,
        xml_escape(&exe_str)
    );

    fs::write(&plist_path, plist)
        .map_err(|error| format!("Failed to write launch agent: {error}"))?;

    let _ = Command::new("launchctl")
        .arg("load")
        .arg("-w")
        .arg(&plist_path)
        .output();

    Ok(())
}

#[cfg(target_os = "macos")]
fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\"', "&quot;")
        .replace('\'', "&apos;")
}

fn main() {
    debug_log(&format!(
        "campushub-desktop starting (pid={})",
        std::process::id()
    ));
    tauri::Builder::default()
        .manage(AppState::new())
        .invoke_handler(tauri::generate_handler![
            load_settings,
            save_settings,
            test_connection,
            get_identity,
            sign_out,
            start_stream,
            stop_stream,
            restart_stream,
            recover_stream,
            get_connection_state,
            get_runtime_diagnostics,
            load_notifications,
            refresh_badge,
            get_unread_counts,
            mark_notification_read,
            mark_all_notifications_read,
            notification_clicked,
            navigate_to_section,
            mute_notifications,
            mute_notifications_forever,
            resume_notifications,
            get_mute_state,
            open_external_url
        ])
        .setup(|app| {
            debug_log("setup: starting");

            // Resolve and register the settings path before anything that
            // needs a token lookup without an AppHandle.
            let config_dir = app
                .path()
                .app_config_dir()
                .map_err(|error| format!("Failed to resolve app config dir: {error}"))?;
            fs::create_dir_all(&config_dir)
                .map_err(|error| format!("Failed to create config directory: {error}"))?;
            let settings_path = config_dir.join("settings.json");
            debug_log(&format!("setup: settings file path = {settings_path:?}"));
            let _ = SETTINGS_FILE.set(settings_path.clone());
            // Enforce 0o600 on startup, self-healing after backup restores.
            restrict_file_permissions(&settings_path);

            let startup_settings = settings::read_settings(app.handle()).unwrap_or_default();
            #[cfg(target_os = "macos")]
            if let Err(error) = apply_launch_at_login(startup_settings.launch_at_login) {
                debug_log(&format!("failed to configure launch at login: {error}"));
            }

            if startup_settings.start_minimized_to_tray {
                if let Some(window) = app.get_webview_window("main") {
                    let _ = window.hide();
                }
            } else {
                ui_shell::show_main_window(app.handle());
            }

            let mute_items = mute::create_mute_menu_items(app.handle())?;
            let open_item = MenuItem::with_id(app, "open_inbox", "Open Inbox", true, None::<&str>)?;
            let quit_item = MenuItem::with_id(app, "quit", "Quit", true, None::<&str>)?;
            let menu = Menu::with_items(
                app,
                &[
                    &mute_items.status_item,
                    &open_item,
                    &mute_items.mute_15m_item,
                    &mute_items.mute_1h_item,
                    &mute_items.mute_forever_item,
                    &mute_items.resume_item,
                    &quit_item,
                ],
            )?;

            mute::install_mute_menu_state(
                app.handle(),
                &mute_items,
                startup_settings.mute_until,
                startup_settings.mute_mode.as_deref(),
            );

            let mut tray_builder = TrayIconBuilder::with_id("main-tray")
                .menu(&menu)
                .show_menu_on_left_click(false)
                .on_tray_icon_event(|tray, event| {
                    if let TrayIconEvent::Click {
                        button: MouseButton::Left,
                        button_state: MouseButtonState::Up,
                        ..
                    } = event
                    {
                        let app = tray.app_handle();
                        ui_shell::toggle_main_window(app);
                        // Tray interaction doubles as the re-trigger out of
                        // Failed.
                        let _ = stream::recover_stream(app.clone());
                    }
                })
                .on_menu_event(move |app, event| match event.id().as_ref() {
                    "open_inbox" => {
                        ui_shell::show_main_window(app);
                    }
                    "mute_15m" => {
                        if let Err(error) = mute::mute_notifications(app.clone(), 15) {
                            let _ = app.emit(
                                "connection-error",
                                format!("Failed to mute notifications: {error}"),
                            );
                        }
                    }
                    "mute_1h" => {
                        if let Err(error) = mute::mute_notifications(app.clone(), 60) {
                            let _ = app.emit(
                                "connection-error",
                                format!("Failed to mute notifications: {error}"),
                            );
                        }
                    }
                    "mute_forever" => {
                        if let Err(error) = mute::mute_notifications_forever(app.clone()) {
                            let _ = app.emit(
                                "connection-error",
                                format!("Failed to mute notifications: {error}"),
                            );
                        }
                    }
                    "resume_notifications" => {
                        if let Err(error) = mute::resume_notifications(app.clone()) {
                            let _ = app.emit(
                                "connection-error",
                                format!("Failed to resume notifications: {error}"),
                            );
                        }
                    }
                    "quit" => {
                        let _ = stream::stop_stream_internal(app);
                        app.exit(0);
                    }
                    _ => {}
                });
            if let Some(icon) = ui_shell::tray_icon_for_phase(model::ConnectionPhase::Disconnected)
                .or_else(|| app.default_window_icon().cloned())
            {
                tray_builder = tray_builder.icon(icon);
            }
            tray_builder.build(app)?;
            ui_shell::apply_tray_badge(app.handle(), None);

            let app_for_mute_refresh = app.handle().clone();
            tauri::async_runtime::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    mute::refresh_mute_state_from_settings(&app_for_mute_refresh);
                }
            });

            // Reconciliation poll, independent of the push channel: catches
            // totals missed across reconnect gaps.
            let app_for_poll = app.handle().clone();
            tauri::async_runtime::spawn(async move {
                let mut poll_interval =
                    tokio::time::interval(Duration::from_secs(BADGE_POLL_INTERVAL_SECS));
                poll_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                poll_interval.tick().await;
                loop {
                    poll_interval.tick().await;
                    let wants_stream = app_for_poll
                        .try_state::<AppState>()
                        .and_then(|state| {
                            state.runtime.lock().ok().map(|runtime| runtime.should_run)
                        })
                        .unwrap_or(false);
                    if !wants_stream {
                        continue;
                    }
                    if let Err(error) = badge::refresh_badge(&app_for_poll).await {
                        debug_log(&format!("periodic badge poll failed: {error}"));
                    }
                }
            });

            match stream::start_stream(app.handle().clone()) {
                Ok(_) => {}
                Err(error) => {
                    let _ = app.emit("connection-error", format!("Auto-connect failed: {error}"));
                }
            }

            Ok(())
        })
        .on_window_event(|window, event| {
            ui_shell::handle_window_event(window, event);
        })
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
