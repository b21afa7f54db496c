use serde::Serialize;
use tauri::{AppHandle, Emitter, Manager};

use crate::{debug_log, unix_now_secs, AppState};

/// Point-in-time health report for the settings/debug view. Timestamps are
/// reported as ages so the webview never has to do clock math.
#[derive(Debug, Serialize, Clone)]
pub(crate) struct RuntimeDiagnostics {
    pub(crate) connection_state: String,
    pub(crate) authenticated: bool,
    pub(crate) should_run: bool,
    pub(crate) reconnect_attempts: u64,
    pub(crate) backoff_seconds: u64,
    pub(crate) unread_total: u64,
    pub(crate) seconds_since_connected: Option<u64>,
    pub(crate) seconds_since_stream_event: Option<u64>,
    pub(crate) seconds_since_notification: Option<u64>,
    pub(crate) last_notification_id: Option<i64>,
    pub(crate) last_error: Option<String>,
}

pub(crate) fn snapshot_runtime(app: &AppHandle) -> Result<RuntimeDiagnostics, String> {
    let state = app.state::<AppState>();
    let now = unix_now_secs();

    let unread_total = state
        .badge
        .lock()
        .map(|badge| badge.counts.total)
        .unwrap_or(0);

    let runtime = state
        .runtime
        .lock()
        .map_err(|_| "Runtime lock poisoned".to_string())?;
    let age = |at: Option<u64>| at.map(|then| now.saturating_sub(then));

    Ok(RuntimeDiagnostics {
        connection_state: runtime.phase.as_str().to_string(),
        authenticated: runtime.phase.is_authenticated(),
        should_run: runtime.should_run,
        reconnect_attempts: runtime.reconnect_attempts,
        backoff_seconds: runtime.backoff_seconds,
        unread_total,
        seconds_since_connected: age(runtime.last_connected_at),
        seconds_since_stream_event: age(runtime.last_stream_event_at),
        seconds_since_notification: age(runtime.last_notification_at),
        last_notification_id: runtime.last_notification_id,
        last_error: runtime.last_error.clone(),
    })
}

/// App-level emit reaches every window listener.
pub(crate) fn emit_runtime_diagnostics(app: &AppHandle) {
    match snapshot_runtime(app) {
        Ok(report) => {
            let _ = app.emit("runtime-diagnostics", report);
        }
        Err(error) => debug_log(&format!("failed to snapshot runtime: {error}")),
    }
}

pub(crate) fn mark_stream_activity(app: &AppHandle, at: u64) {
    if let Some(state) = app.try_state::<AppState>() {
        if let Ok(mut runtime) = state.runtime.lock() {
            runtime.last_stream_event_at = Some(at);
        }
    }
    emit_runtime_diagnostics(app);
}
