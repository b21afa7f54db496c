use serde::Serialize;
use std::collections::HashMap;
use tauri::{AppHandle, Emitter, Manager};

use crate::{
    debug_log,
    model::{NotificationItem, NotificationKind, NotificationListWire, UnreadCounts, UnreadCountsWire},
    session::{self, load_token},
    settings::{normalize_base_url, read_settings},
    ui_shell, AppState, BADGE_DISPLAY_CAP, DEFAULT_PAGE_LIMIT, HTTP_REQUEST_TIMEOUT_SECS,
    MAX_API_PAGE_LIMIT,
};

#[derive(Debug, Serialize, Clone)]
pub(crate) struct UnreadCountsPayload {
    pub(crate) total: u64,
    pub(crate) counts: HashMap<&'static str, u64>,
    pub(crate) badge_text: Option<String>,
}

pub(crate) enum CountsFetch {
    Counts(UnreadCounts),
    Unauthorized(u16),
}

/// Display mapping for the tray badge: hidden at zero, exact through the cap,
/// "99+" above it. The underlying count stays exact in state.
pub(crate) fn badge_display_text(total: u64) -> Option<String> {
    if total == 0 {
        None
    } else if total > BADGE_DISPLAY_CAP {
        Some(format!("{BADGE_DISPLAY_CAP}+"))
    } else {
        Some(total.to_string())
    }
}

/// Checked-and-set half of the refresh single-flight guard. Returns false
/// when a refresh is already outstanding; that caller is coalesced onto the
/// in-flight result instead of queuing a second request.
pub(crate) fn begin_refresh(state: &AppState) -> bool {
    match state.badge.lock() {
        Ok(mut badge) => {
            if badge.refresh_in_flight {
                return false;
            }
            badge.refresh_in_flight = true;
            true
        }
        Err(_) => false,
    }
}

pub(crate) fn finish_refresh(state: &AppState) {
    if let Ok(mut badge) = state.badge.lock() {
        badge.refresh_in_flight = false;
    }
}

/// Authoritative HTTP poll, the catch-up path for pushes missed across a
/// reconnect gap. At most one poll is in flight at a time.
pub(crate) async fn refresh_badge(app: &AppHandle) -> Result<(), String> {
    {
        let state = app.state::<AppState>();
        if !begin_refresh(&state) {
            debug_log("refresh_badge coalesced onto in-flight poll");
            return Ok(());
        }
    }

    let result = fetch_and_apply(app).await;
    // The guard must clear on the error path too or the badge wedges.
    finish_refresh(&app.state::<AppState>());
    result
}

pub(crate) fn schedule_refresh(app: &AppHandle) {
    let app = app.clone();
    tauri::async_runtime::spawn(async move {
        if let Err(error) = refresh_badge(&app).await {
            debug_log(&format!("badge refresh failed: {error}"));
        }
    });
}

async fn fetch_and_apply(app: &AppHandle) -> Result<(), String> {
    let settings = read_settings(app)?;
    let base_url = normalize_base_url(&settings.base_url)?;
    let token = load_token()?
        .ok_or_else(|| "No portal token found. Save one in settings first.".to_string())?;

    let client = http_client()?;
    match fetch_unread_counts(&client, &base_url, &token).await? {
        CountsFetch::Counts(counts) => {
            apply_counts(app, counts);
            Ok(())
        }
        CountsFetch::Unauthorized(status) => {
            session::invalidate_session(app);
            Err(format!("Unread count request rejected (HTTP {status})"))
        }
    }
}

pub(crate) async fn fetch_unread_counts(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
) -> Result<CountsFetch, String> {
    let endpoint = format!("{base_url}/api/notifications/unread-count");
    let response = client
        .get(&endpoint)
        .bearer_auth(token)
        .send()
        .await
        .map_err(|error| format!("Failed to fetch unread counts: {error}"))?;

    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Ok(CountsFetch::Unauthorized(status.as_u16()));
    }
    if !status.is_success() {
        return Err(format!(
            "Unread count request failed with HTTP {}",
            status.as_u16()
        ));
    }

    let wire = response
        .json::<UnreadCountsWire>()
        .await
        .map_err(|error| format!("Failed to decode unread counts: {error}"))?;
    Ok(CountsFetch::Counts(UnreadCounts::from_wire(wire)))
}

/// Applies a counts object from either source (push or poll) as one atomic
/// replacement: last write wins, and a kind the payload omits drops to zero.
pub(crate) fn apply_counts(app: &AppHandle, counts: UnreadCounts) {
    let state = app.state::<AppState>();
    let snapshot = match state.badge.lock() {
        Ok(mut badge) => {
            badge.counts = counts;
            badge.counts.clone()
        }
        Err(_) => {
            debug_log("badge state lock poisoned, dropping counts update");
            return;
        }
    };

    let payload = UnreadCountsPayload {
        total: snapshot.total,
        counts: NotificationKind::ALL
            .iter()
            .map(|kind| (kind.as_str(), snapshot.count_for(*kind)))
            .collect(),
        badge_text: badge_display_text(snapshot.total),
    };

    let _ = app.emit("unread-counts", payload.clone());
    if let Some(window) = app.get_webview_window("main") {
        let _ = window.emit("unread-counts", payload.clone());
    }
    ui_shell::apply_tray_badge(app, payload.badge_text.as_deref());
}

pub(crate) fn counts_payload_snapshot(app: &AppHandle) -> Result<UnreadCountsPayload, String> {
    let state = app.state::<AppState>();
    let snapshot = state
        .badge
        .lock()
        .map_err(|_| "Badge state lock poisoned".to_string())?
        .counts
        .clone();
    Ok(UnreadCountsPayload {
        total: snapshot.total,
        counts: NotificationKind::ALL
            .iter()
            .map(|kind| (kind.as_str(), snapshot.count_for(*kind)))
            .collect(),
        badge_text: badge_display_text(snapshot.total),
    })
}

/// Marks one notification read server-side, then re-polls. The badge is
/// deliberately not decremented locally before the server confirms.
pub(crate) async fn mark_notification_read(app: &AppHandle, id: i64) -> Result<(), String> {
    if id <= 0 {
        return Err("Invalid notification id".to_string());
    }
    let (client, base_url, token) = request_context(app)?;
    let endpoint = format!("{base_url}/api/notifications/{id}/read");
    send_mark_read(app, &client, &endpoint, &token).await?;
    refresh_badge(app).await
}

pub(crate) async fn mark_all_notifications_read(app: &AppHandle) -> Result<(), String> {
    let (client, base_url, token) = request_context(app)?;
    let endpoint = format!("{base_url}/api/notifications/read-all");
    send_mark_read(app, &client, &endpoint, &token).await?;
    refresh_badge(app).await
}

async fn send_mark_read(
    app: &AppHandle,
    client: &reqwest::Client,
    endpoint: &str,
    token: &str,
) -> Result<(), String> {
    let response = client
        .put(endpoint)
        .bearer_auth(token)
        .send()
        .await
        .map_err(|error| format!("Mark-read request failed: {error}"))?;

    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        session::invalidate_session(app);
        return Err(format!("Mark-read request rejected (HTTP {})", status.as_u16()));
    }
    if !status.is_success() {
        return Err(format!(
            "Mark-read request failed with HTTP {}",
            status.as_u16()
        ));
    }
    Ok(())
}

/// One page of the server-authoritative notification list. Entries that fail
/// to parse are dropped individually instead of failing the page.
pub(crate) async fn fetch_notifications(
    app: &AppHandle,
    limit: Option<usize>,
    offset: Option<usize>,
) -> Result<Vec<NotificationItem>, String> {
    let (client, base_url, token) = request_context(app)?;
    let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_API_PAGE_LIMIT);
    let offset = offset.unwrap_or(0);

    let endpoint = format!("{base_url}/api/notifications?limit={limit}&offset={offset}");
    let response = client
        .get(&endpoint)
        .bearer_auth(&token)
        .send()
        .await
        .map_err(|error| format!("Failed to fetch notifications: {error}"))?;

    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        session::invalidate_session(app);
        return Err(format!(
            "Notification request rejected (HTTP {})",
            status.as_u16()
        ));
    }
    if !status.is_success() {
        return Err(format!(
            "Notification request failed with HTTP {}",
            status.as_u16()
        ));
    }

    let raw = response
        .json::<serde_json::Value>()
        .await
        .map_err(|error| format!("Failed to decode notifications: {error}"))?;
    let wire: NotificationListWire = match serde_json::from_value(raw) {
        Ok(wire) => wire,
        Err(error) => {
            debug_log(&format!("notification list malformed, dropped: {error}"));
            return Ok(Vec::new());
        }
    };

    Ok(wire
        .notifications
        .into_iter()
        .map(|item| item.into_item())
        .collect())
}

fn request_context(app: &AppHandle) -> Result<(reqwest::Client, String, String), String> {
    let settings = read_settings(app)?;
    let base_url = normalize_base_url(&settings.base_url)?;
    let token = load_token()?
        .ok_or_else(|| "No portal token found. Save one in settings first.".to_string())?;
    Ok((http_client()?, base_url, token))
}

fn http_client() -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(|error| format!("Failed to build HTTP client: {error}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_badge_display_text_caps_and_hides() {
        assert_eq!(badge_display_text(0), None);
        assert_eq!(badge_display_text(5).as_deref(), Some("5"));
        assert_eq!(badge_display_text(99).as_deref(), Some("99"));
        assert_eq!(badge_display_text(100).as_deref(), Some("99+"));
        assert_eq!(badge_display_text(150).as_deref(), Some("99+"));
    }

    #[test]
    fn test_refresh_guard_is_single_flight() {
        let state = AppState::new();
        assert!(begin_refresh(&state));
        // second caller coalesces while the first is outstanding
        assert!(!begin_refresh(&state));
        finish_refresh(&state);
        assert!(begin_refresh(&state));
        finish_refresh(&state);
    }

    async fn serve_once(response: String) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}")
    }

    fn http_response(status_line: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    #[tokio::test]
    async fn test_fetch_unread_counts_decodes_server_totals() {
        let base_url = serve_once(http_response(
            "200 OK",
            r#"{"success":true,"total":3,"counts":{"message":2,"grades":1}}"#,
        ))
        .await;

        let client = reqwest::Client::new();
        let fetched = fetch_unread_counts(&client, &base_url, "token")
            .await
            .expect("fetch");
        let counts = match fetched {
            CountsFetch::Counts(counts) => counts,
            CountsFetch::Unauthorized(status) => panic!("unexpected 401/403: {status}"),
        };
        assert_eq!(counts.total, 3);
        assert_eq!(counts.count_for(NotificationKind::Message), 2);
        assert_eq!(counts.count_for(NotificationKind::Enrollment), 0);
    }

    #[tokio::test]
    async fn test_fetch_unread_counts_flags_auth_rejection() {
        let base_url = serve_once(http_response("401 Unauthorized", "{}")).await;
        let client = reqwest::Client::new();
        match fetch_unread_counts(&client, &base_url, "stale").await {
            Ok(CountsFetch::Unauthorized(401)) => {}
            other => panic!("expected Unauthorized(401), got {:?}", other.is_ok()),
        }
    }

    #[tokio::test]
    async fn test_fetch_unread_counts_surfaces_server_errors() {
        let base_url = serve_once(http_response("500 Internal Server Error", "oops")).await;
        let client = reqwest::Client::new();
        assert!(fetch_unread_counts(&client, &base_url, "token").await.is_err());
    }
}
