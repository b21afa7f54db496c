use serde::Serialize;
use tauri::{AppHandle, Emitter, Manager};

use crate::{
    badge, debug_log,
    model::{NotificationItem, NotificationWire, UnreadCounts, UnreadCountsWire},
    notifications, truncate_message, unix_now_secs, AppState, TOAST_DISMISS_MS,
};

#[derive(Debug, Serialize, Clone)]
pub(crate) struct ToastPayload {
    pub(crate) notification: NotificationItem,
    pub(crate) icon: &'static str,
    pub(crate) accent: &'static str,
    pub(crate) dismiss_after_ms: u64,
}

/// A full push event fans out to every sink. The sinks are independent: a
/// failure in one is logged at its boundary and must not keep the others
/// from running, and nothing here may panic back into the stream loop.
pub(crate) fn handle_push(app: &AppHandle, data: serde_json::Value) {
    let item = match parse_push_event(data) {
        Some(item) => item,
        None => return,
    };

    record_delivery(app, &item);

    if let Err(error) = emit_toast(app, &item) {
        debug_log(&format!("toast sink failed: {error}"));
    }
    notifications::maybe_notify(app, &item);
    badge::schedule_refresh(app);
}

/// The counts-only channel: cheap to apply, idempotent, no rendering.
pub(crate) fn handle_counts(app: &AppHandle, data: serde_json::Value) {
    match parse_counts_event(data) {
        Some(counts) => badge::apply_counts(app, counts),
        None => {}
    }
}

pub(crate) fn parse_push_event(data: serde_json::Value) -> Option<NotificationItem> {
    let wire: NotificationWire = match serde_json::from_value(data) {
        Ok(wire) => wire,
        Err(error) => {
            debug_log(&format!("push event malformed, dropped: {error}"));
            return None;
        }
    };
    if wire.title.trim().is_empty() {
        debug_log(&format!("push event id={} has empty title, dropped", wire.id));
        return None;
    }
    Some(wire.into_item())
}

pub(crate) fn parse_counts_event(data: serde_json::Value) -> Option<UnreadCounts> {
    match serde_json::from_value::<UnreadCountsWire>(data) {
        Ok(wire) => Some(UnreadCounts::from_wire(wire)),
        Err(error) => {
            debug_log(&format!("counts event malformed, dropped: {error}"));
            None
        }
    }
}

fn record_delivery(app: &AppHandle, item: &NotificationItem) {
    debug_log(&format!(
        "notification received id={} kind={} title={}",
        item.id,
        item.kind.as_str(),
        truncate_message(&item.title, 60)
    ));
    let now = unix_now_secs();
    if let Some(state) = app.try_state::<AppState>() {
        if let Ok(mut runtime) = state.runtime.lock() {
            runtime.last_notification_at = Some(now);
            runtime.last_notification_id = Some(item.id);
            runtime.last_stream_event_at = Some(now);
        }
    }
}

fn emit_toast(app: &AppHandle, item: &NotificationItem) -> Result<(), String> {
    let meta = item.kind.meta();
    let payload = ToastPayload {
        notification: item.clone(),
        icon: meta.icon,
        accent: meta.accent,
        dismiss_after_ms: TOAST_DISMISS_MS,
    };

    app.emit("notification-toast", payload.clone())
        .map_err(|error| format!("Failed to emit toast event: {error}"))?;
    if let Some(window) = app.get_webview_window("main") {
        let _ = window.emit("notification-toast", payload);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NotificationKind;
    use serde_json::json;

    #[test]
    fn test_parse_push_event_accepts_valid_payload() {
        let item = parse_push_event(json!({
            "id": 12,
            "type": "enrollment",
            "title": "Enrollment request approved",
            "message": "CHEM 201 section B",
            "senderId": 4,
            "senderName": "Registrar Office",
            "createdAt": "2026-02-11T09:30:00Z"
        }))
        .expect("valid event");
        assert_eq!(item.id, 12);
        assert_eq!(item.kind, NotificationKind::Enrollment);
        assert_eq!(item.sender_id, Some(4));
    }

    #[test]
    fn test_parse_push_event_drops_missing_type_or_title() {
        assert!(parse_push_event(json!({"id": 1, "title": "no type"})).is_none());
        assert!(parse_push_event(json!({"id": 1, "type": "message"})).is_none());
        assert!(parse_push_event(json!({"id": 1, "type": "message", "title": "  "})).is_none());
        assert!(parse_push_event(json!("not an object")).is_none());
    }

    #[test]
    fn test_parse_push_event_unknown_type_becomes_system() {
        let item = parse_push_event(json!({
            "id": 2,
            "type": "campus-closure",
            "title": "Snow day"
        }))
        .expect("fallback event");
        assert_eq!(item.kind, NotificationKind::System);
    }

    #[test]
    fn test_parse_counts_event() {
        let counts = parse_counts_event(json!({
            "total": 7,
            "counts": {"message": 5, "announcement": 2}
        }))
        .expect("counts");
        assert_eq!(counts.total, 7);
        assert_eq!(counts.count_for(NotificationKind::Message), 5);
        assert!(parse_counts_event(json!([1, 2, 3])).is_none());
    }

    #[test]
    fn test_counts_apply_is_idempotent_input() {
        let first = parse_counts_event(json!({"total": 2, "counts": {"grades": 2}})).expect("counts");
        let second = parse_counts_event(json!({"total": 2, "counts": {"grades": 2}})).expect("counts");
        // same payload twice parses to the same state either way
        assert_eq!(first, second);
    }
}
