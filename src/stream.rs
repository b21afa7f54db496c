use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tauri::{AppHandle, Emitter, Manager};
use tokio::sync::watch;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
};

use crate::{
    badge, debug_log,
    diagnostics::{emit_runtime_diagnostics, mark_stream_activity},
    model::{ConnectionEvent, ConnectionPhase},
    router, session,
    session::SessionIdentity,
    settings::{build_stream_ws_url, normalize_base_url, read_settings},
    truncate_message, unix_now_secs, AppState, DISCONNECT_RETRY_DELAY_SECS,
    IDENTITY_RETRY_DELAY_SECS, MAX_RECONNECT_ATTEMPTS, RECONNECT_BASE_DELAY_SECS,
    RECONNECT_MAX_DELAY_SECS, STREAM_AUTH_TIMEOUT_SECS, STREAM_CONNECT_TIMEOUT_SECS,
    STREAM_LIVENESS_CHECK_INTERVAL_SECS, STREAM_LIVENESS_IDLE_SECS,
    STREAM_LIVENESS_PING_GRACE_SECS,
};

enum StreamError {
    /// Transport-level connect failure (or a session that never became
    /// usable): exponential backoff, bounded attempts.
    Connect(String),
    /// Drop of an established session: fixed short delay, fresh attempt
    /// budget.
    Dropped(String),
    /// Server rejected the identity: never retried automatically.
    AuthRejected(String),
}

#[derive(Debug, Deserialize)]
struct FrameWire {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AuthenticatedWire {
    #[serde(default, alias = "userId")]
    user_id: i64,
}

pub(crate) fn start_stream(app: AppHandle) -> Result<(), String> {
    start_stream_internal(app)
}

pub(crate) fn stop_stream(app: AppHandle) -> Result<(), String> {
    stop_stream_internal(&app)
}

pub(crate) fn get_connection_state(app: AppHandle) -> Result<String, String> {
    let state = app.state::<AppState>();
    let runtime = state
        .runtime
        .lock()
        .map_err(|_| "Runtime lock poisoned".to_string())?;
    Ok(runtime.phase.as_str().to_string())
}

/// External re-trigger (window focus, tray interaction). The only way out of
/// `Failed` once the automatic attempt budget is spent.
pub(crate) fn recover_stream(app: AppHandle) -> Result<(), String> {
    let state = app.state::<AppState>();
    let (should_run, phase) = state
        .runtime
        .lock()
        .map(|runtime| (runtime.should_run, runtime.phase))
        .unwrap_or((false, ConnectionPhase::Disconnected));

    if !should_run {
        return Ok(());
    }
    if matches!(
        phase,
        ConnectionPhase::Connecting | ConnectionPhase::Backoff | ConnectionPhase::Connected { .. }
    ) {
        return Ok(());
    }

    let _ = stop_stream_internal(&app);
    apply_transition(&app, ConnectionEvent::RecoverRequested);
    start_stream_internal(app)
}

pub(crate) fn restart_stream(app: AppHandle) -> Result<(), String> {
    let _ = stop_stream_internal(&app);
    apply_transition(&app, ConnectionEvent::RecoverRequested);
    start_stream_internal(app)
}

fn start_stream_internal(app: AppHandle) -> Result<(), String> {
    let settings = read_settings(&app)?;
    let base_url = normalize_base_url(&settings.base_url)?;
    debug_log(&format!("start_stream requested for {}", base_url));

    {
        let state = app.state::<AppState>();
        let mut runtime = state
            .runtime
            .lock()
            .map_err(|_| "Runtime lock poisoned".to_string())?;

        // Single-flight init: a second call while a stream task is registered
        // is a no-op, so listeners are only ever registered once per task.
        if runtime.stop_tx.is_some() {
            return Ok(());
        }

        let (tx, rx) = watch::channel(false);
        runtime.stop_tx = Some(tx);
        runtime.stream_epoch = runtime.stream_epoch.wrapping_add(1);
        let task_epoch = runtime.stream_epoch;
        runtime.should_run = true;
        runtime.last_error = None;
        runtime.backoff_seconds = 0;
        runtime.reconnect_attempts = 0;
        runtime.phase = ConnectionPhase::Connecting;
        drop(runtime);

        announce_phase(&app, ConnectionPhase::Connecting);
        let app_for_task = app.clone();
        debug_log("spawning stream task");
        tauri::async_runtime::spawn(async move {
            run_stream_loop(app_for_task, base_url, rx, task_epoch).await;
        });
    }

    Ok(())
}

pub(crate) fn stop_stream_internal(app: &AppHandle) -> Result<(), String> {
    let state = app.state::<AppState>();
    let mut runtime = state
        .runtime
        .lock()
        .map_err(|_| "Runtime lock poisoned".to_string())?;

    if let Some(stop_tx) = runtime.stop_tx.take() {
        let _ = stop_tx.send(true);
    }
    runtime.should_run = false;
    runtime.backoff_seconds = 0;
    runtime.phase = ConnectionPhase::Disconnected;
    drop(runtime);

    announce_phase(app, ConnectionPhase::Disconnected);
    Ok(())
}

async fn run_stream_loop(
    app: AppHandle,
    base_url: String,
    mut stop_rx: watch::Receiver<bool>,
    task_epoch: u64,
) {
    let mut backoff_secs: u64 = RECONNECT_BASE_DELAY_SECS;
    debug_log("stream task started");

    loop {
        if *stop_rx.borrow() {
            break;
        }

        // Identity not resolving is "not ready yet" (portal down, token not
        // saved yet), not a connect failure: fixed-delay retry, no attempt
        // counted.
        let identity = match session::resolve_identity(&app).await {
            Ok(identity) => identity,
            Err(error) => {
                debug_log(&format!("identity not ready: {error}"));
                if wait_or_stop(&mut stop_rx, IDENTITY_RETRY_DELAY_SECS).await {
                    break;
                }
                continue;
            }
        };

        apply_transition(&app, ConnectionEvent::ConnectRequested);
        debug_log("attempting stream connection");
        match stream_once(&app, &base_url, &identity, &mut stop_rx).await {
            Ok(()) => break,
            Err(StreamError::AuthRejected(reason)) => {
                if *stop_rx.borrow() {
                    break;
                }
                debug_log(&format!("stream authentication rejected: {reason}"));
                // A stale credential is assumed; a fresh identity resolution
                // is required before anything reconnects.
                if let Ok(mut identity_slot) = app.state::<AppState>().identity.lock() {
                    *identity_slot = None;
                }
                record_failure(&app, &reason, 0);
                apply_transition(
                    &app,
                    ConnectionEvent::AttemptFailed {
                        attempts_exhausted: true,
                    },
                );
                let _ = app.emit("connection-error", truncate_message(&reason, 200));
                break;
            }
            Err(StreamError::Dropped(reason)) => {
                if *stop_rx.borrow() {
                    break;
                }
                debug_log(&format!("stream dropped: {reason}"));
                apply_transition(&app, ConnectionEvent::TransportDisconnected);
                let _ = app.emit("connection-error", truncate_message(&reason, 200));
                record_failure(&app, &reason, 0);
                reset_attempts(&app);
                backoff_secs = RECONNECT_BASE_DELAY_SECS;
                if wait_or_stop(&mut stop_rx, DISCONNECT_RETRY_DELAY_SECS).await {
                    break;
                }
            }
            Err(StreamError::Connect(reason)) => {
                if *stop_rx.borrow() {
                    break;
                }
                debug_log(&format!("stream connect error: {reason}"));
                let attempts = bump_attempts(&app);
                record_failure(&app, &reason, backoff_secs);
                let _ = app.emit("connection-error", truncate_message(&reason, 200));

                if attempts >= MAX_RECONNECT_ATTEMPTS {
                    debug_log("reconnect attempts exhausted, giving up until re-trigger");
                    apply_transition(
                        &app,
                        ConnectionEvent::AttemptFailed {
                            attempts_exhausted: true,
                        },
                    );
                    break;
                }

                apply_transition(
                    &app,
                    ConnectionEvent::AttemptFailed {
                        attempts_exhausted: false,
                    },
                );

                let jitter_ms = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| (d.subsec_millis() % 500) as u64)
                    .unwrap_or(0);
                let delay =
                    std::time::Duration::from_secs(backoff_secs) + std::time::Duration::from_millis(jitter_ms);
                if wait_or_stop_duration(&mut stop_rx, delay).await {
                    break;
                }
                backoff_secs = next_backoff_delay(backoff_secs);
            }
        }
    }

    let state = app.state::<AppState>();
    let mut final_phase = ConnectionPhase::Disconnected;
    if let Ok(mut runtime) = state.runtime.lock() {
        if runtime.stream_epoch == task_epoch {
            runtime.stop_tx = None;
            runtime.backoff_seconds = 0;
            // Failed survives loop exit so recover_stream can see it; a
            // manual stop has already set Disconnected.
            if runtime.phase != ConnectionPhase::Failed {
                runtime.phase = ConnectionPhase::Disconnected;
                runtime.should_run = false;
            }
            final_phase = runtime.phase;
        } else {
            final_phase = runtime.phase;
        }
    }
    announce_phase(&app, final_phase);
}

async fn stream_once(
    app: &AppHandle,
    base_url: &str,
    identity: &SessionIdentity,
    stop_rx: &mut watch::Receiver<bool>,
) -> Result<(), StreamError> {
    let token = session::load_token()
        .map_err(StreamError::Connect)?
        .ok_or_else(|| StreamError::Connect("No portal token found".to_string()))?;
    let ws_url = build_stream_ws_url(base_url).map_err(StreamError::Connect)?;
    debug_log(&format!("ws connect {ws_url}"));

    let mut ws_request = ws_url
        .as_str()
        .into_client_request()
        .map_err(|error| StreamError::Connect(format!("Failed to build websocket request: {error}")))?;
    let auth_header = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
        .map_err(|error| StreamError::Connect(format!("Invalid token for websocket header: {error}")))?;
    ws_request.headers_mut().insert("Authorization", auth_header);

    let (mut ws_stream, _) = tokio::time::timeout(
        std::time::Duration::from_secs(STREAM_CONNECT_TIMEOUT_SECS),
        connect_async(ws_request),
    )
    .await
    .map_err(|_| {
        StreamError::Connect(format!(
            "Stream connection timed out after {} seconds",
            STREAM_CONNECT_TIMEOUT_SECS
        ))
    })?
    .map_err(|error| StreamError::Connect(format!("Stream connection failed: {error}")))?;

    debug_log("ws connected");
    let now = unix_now_secs();
    if let Some(state) = app.try_state::<AppState>() {
        if let Ok(mut runtime) = state.runtime.lock() {
            runtime.last_connected_at = Some(now);
            runtime.last_stream_event_at = Some(now);
            runtime.last_error = None;
            runtime.backoff_seconds = 0;
        }
    }
    apply_transition(app, ConnectionEvent::TransportConnected);

    send_authenticate(app, &mut ws_stream, identity).await?;

    let auth_timer = tokio::time::sleep(std::time::Duration::from_secs(STREAM_AUTH_TIMEOUT_SECS));
    tokio::pin!(auth_timer);
    let mut authenticated = false;

    let mut liveness_interval = tokio::time::interval(std::time::Duration::from_secs(
        STREAM_LIVENESS_CHECK_INTERVAL_SECS,
    ));
    liveness_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    liveness_interval.tick().await;
    let mut last_activity_at = now;
    let mut pending_ping_since: Option<u64> = None;

    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    let _ = ws_stream.close(None).await;
                    return Ok(());
                }
            }
            _ = &mut auth_timer, if !authenticated => {
                return Err(StreamError::Connect(format!(
                    "Authentication not acknowledged within {} seconds",
                    STREAM_AUTH_TIMEOUT_SECS
                )));
            }
            incoming = ws_stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let event_now = unix_now_secs();
                        last_activity_at = event_now;
                        pending_ping_since = None;
                        mark_stream_activity(app, event_now);
                        match parse_server_frame(text.as_ref()) {
                            Some(frame) => {
                                if let Some(rejection) = dispatch_frame(app, identity, frame, &mut authenticated) {
                                    return Err(rejection);
                                }
                            }
                            None => {
                                debug_log(&format!(
                                    "ws frame parse miss: {}",
                                    truncate_message(text.as_ref(), 140)
                                ));
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let event_now = unix_now_secs();
                        last_activity_at = event_now;
                        pending_ping_since = None;
                        mark_stream_activity(app, event_now);
                        ws_stream.send(Message::Pong(payload)).await
                            .map_err(|error| StreamError::Dropped(format!("Failed to send pong: {error}")))?;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        let event_now = unix_now_secs();
                        last_activity_at = event_now;
                        pending_ping_since = None;
                        mark_stream_activity(app, event_now);
                    }
                    Some(Ok(Message::Close(_))) => {
                        return Err(StreamError::Dropped("Stream closed by server".to_string()));
                    }
                    Some(Ok(_)) => {
                        let event_now = unix_now_secs();
                        last_activity_at = event_now;
                        pending_ping_since = None;
                        mark_stream_activity(app, event_now);
                    }
                    Some(Err(error)) => {
                        return Err(StreamError::Dropped(format!("Stream read error: {error}")));
                    }
                    None => {
                        return Err(StreamError::Dropped("Stream ended unexpectedly".to_string()));
                    }
                }
            }
            _ = liveness_interval.tick() => {
                let event_now = unix_now_secs();
                if event_now.saturating_sub(last_activity_at) < STREAM_LIVENESS_IDLE_SECS {
                    emit_runtime_diagnostics(app);
                    continue;
                }
                match pending_ping_since {
                    None => {
                        debug_log("ws liveness ping sent");
                        ws_stream
                            .send(Message::Ping(Vec::<u8>::new().into()))
                            .await
                            .map_err(|error| StreamError::Dropped(format!("Failed to send liveness ping: {error}")))?;
                        pending_ping_since = Some(event_now);
                    }
                    Some(started) => {
                        if event_now.saturating_sub(started) >= STREAM_LIVENESS_PING_GRACE_SECS {
                            return Err(StreamError::Dropped(format!(
                                "Stream liveness timeout after {}s idle",
                                event_now.saturating_sub(last_activity_at)
                            )));
                        }
                    }
                }
                emit_runtime_diagnostics(app);
            }
        }
    }
}

/// Emits the authenticate request. Safe no-op while already authenticated so
/// a server-side re-prompt can never double-send.
async fn send_authenticate<S>(
    app: &AppHandle,
    ws_stream: &mut S,
    identity: &SessionIdentity,
) -> Result<(), StreamError>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let already_authenticated = app
        .try_state::<AppState>()
        .and_then(|state| state.runtime.lock().ok().map(|runtime| runtime.phase.is_authenticated()))
        .unwrap_or(false);
    if already_authenticated {
        debug_log("authenticate skipped: already authenticated");
        return Ok(());
    }

    let frame = serde_json::json!({
        "event": "authenticate",
        "data": { "userId": identity.id, "email": identity.email }
    });
    ws_stream
        .send(Message::Text(frame.to_string().into()))
        .await
        .map_err(|error| StreamError::Connect(format!("Failed to send authenticate: {error}")))
}

/// Routes one parsed frame. Returns `Some` only for a fatal auth rejection;
/// everything else is handled (or dropped) in place.
fn dispatch_frame(
    app: &AppHandle,
    identity: &SessionIdentity,
    frame: FrameWire,
    authenticated: &mut bool,
) -> Option<StreamError> {
    match frame.event.as_str() {
        "authenticated" => {
            match serde_json::from_value::<AuthenticatedWire>(frame.data) {
                Ok(ack) if ack.user_id == identity.id => {
                    debug_log(&format!("stream authenticated user_id={}", ack.user_id));
                    *authenticated = true;
                    apply_transition(app, ConnectionEvent::Authenticated);
                    // Catch-up poll: anything pushed during the gap shows up
                    // in the authoritative totals.
                    badge::schedule_refresh(app);
                }
                Ok(ack) => {
                    debug_log(&format!(
                        "authenticated ack for unexpected user_id={} (expected {}), ignored",
                        ack.user_id, identity.id
                    ));
                }
                Err(error) => {
                    debug_log(&format!("authenticated ack malformed, ignored: {error}"));
                }
            }
            None
        }
        "auth_error" => {
            let reason = frame
                .data
                .get("message")
                .and_then(|value| value.as_str())
                .unwrap_or("Server rejected authentication")
                .to_string();
            Some(StreamError::AuthRejected(reason))
        }
        "notification" => {
            router::handle_push(app, frame.data);
            None
        }
        "notification_counts" => {
            router::handle_counts(app, frame.data);
            None
        }
        other => {
            debug_log(&format!("unhandled stream event {other:?}, ignored"));
            None
        }
    }
}

fn parse_server_frame(text: &str) -> Option<FrameWire> {
    match serde_json::from_str::<FrameWire>(text) {
        Ok(frame) => Some(frame),
        Err(_) => None,
    }
}

pub(crate) fn next_backoff_delay(current: u64) -> u64 {
    current
        .saturating_mul(2)
        .min(RECONNECT_MAX_DELAY_SECS)
        .max(RECONNECT_BASE_DELAY_SECS)
}

async fn wait_or_stop(stop_rx: &mut watch::Receiver<bool>, secs: u64) -> bool {
    wait_or_stop_duration(stop_rx, std::time::Duration::from_secs(secs)).await
}

async fn wait_or_stop_duration(
    stop_rx: &mut watch::Receiver<bool>,
    duration: std::time::Duration,
) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        changed = stop_rx.changed() => changed.is_err() || *stop_rx.borrow(),
    }
}

fn bump_attempts(app: &AppHandle) -> u64 {
    let state = app.state::<AppState>();
    let result = match state.runtime.lock() {
        Ok(mut runtime) => {
            runtime.reconnect_attempts = runtime.reconnect_attempts.saturating_add(1);
            runtime.reconnect_attempts
        }
        Err(_) => MAX_RECONNECT_ATTEMPTS,
    };
    result
}

fn reset_attempts(app: &AppHandle) {
    let state = app.state::<AppState>();
    if let Ok(mut runtime) = state.runtime.lock() {
        runtime.reconnect_attempts = 0;
    };
}

fn record_failure(app: &AppHandle, reason: &str, backoff_secs: u64) {
    if let Some(state) = app.try_state::<AppState>() {
        if let Ok(mut runtime) = state.runtime.lock() {
            runtime.last_error = Some(truncate_message(reason, 300));
            runtime.backoff_seconds = backoff_secs;
        }
    }
}

fn apply_transition(app: &AppHandle, event: ConnectionEvent) {
    let phase = {
        let state = app.state::<AppState>();
        let mut runtime = match state.runtime.lock() {
            Ok(runtime) => runtime,
            Err(_) => return,
        };
        runtime.phase = runtime.phase.on_event(event);
        runtime.phase
    };
    announce_phase(app, phase);
}

fn announce_phase(app: &AppHandle, phase: ConnectionPhase) {
    if let Err(error) = app.emit("connection-state", phase.as_str()) {
        debug_log(&format!("failed to emit connection-state: {error}"));
    }
    if let Some(tray) = app.tray_by_id("main-tray") {
        let _ = tray.set_icon(crate::ui_shell::tray_icon_for_phase(phase));
    }
    emit_runtime_diagnostics(app);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RECONNECT_MAX_DELAY_SECS;

    #[test]
    fn test_backoff_doubles_to_ceiling() {
        let mut delay = RECONNECT_BASE_DELAY_SECS;
        let mut schedule = Vec::new();
        for _ in 0..MAX_RECONNECT_ATTEMPTS + 2 {
            schedule.push(delay);
            delay = next_backoff_delay(delay);
        }
        assert_eq!(&schedule[..5], &[1, 2, 4, 8, 16]);
        // non-decreasing, capped at the ceiling
        for pair in schedule.windows(2) {
            assert!(pair[1] >= pair[0]);
            assert!(pair[1] <= RECONNECT_MAX_DELAY_SECS);
        }
        assert_eq!(next_backoff_delay(RECONNECT_MAX_DELAY_SECS), RECONNECT_MAX_DELAY_SECS);
    }

    #[test]
    fn test_backoff_never_goes_below_base() {
        assert_eq!(next_backoff_delay(0), RECONNECT_BASE_DELAY_SECS);
    }

    #[test]
    fn test_parse_server_frame() {
        let frame = parse_server_frame(r#"{"event":"notification","data":{"id":1}}"#)
            .expect("valid frame");
        assert_eq!(frame.event, "notification");
        assert_eq!(frame.data["id"], 1);

        let frame = parse_server_frame(r#"{"event":"authenticated"}"#).expect("frame without data");
        assert!(frame.data.is_null());

        assert!(parse_server_frame("not json").is_none());
        assert!(parse_server_frame(r#"{"data":{}}"#).is_none());
    }

    #[test]
    fn test_authenticated_ack_accepts_camel_case() {
        let ack: AuthenticatedWire =
            serde_json::from_str(r#"{"userId": 9}"#).expect("camelCase ack");
        assert_eq!(ack.user_id, 9);
        let ack: AuthenticatedWire =
            serde_json::from_str(r#"{"user_id": 9}"#).expect("snake_case ack");
        assert_eq!(ack.user_id, 9);
    }
}
