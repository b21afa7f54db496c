use serde::{Deserialize, Deserializer, Serialize};
use std::{collections::HashMap, sync::Mutex};
use tauri::menu::MenuItem;
use tokio::sync::watch;

use crate::nav::Section;
use crate::session::SessionIdentity;

#[derive(Clone)]
pub(crate) struct TrayMuteMenuState {
    pub(crate) status_item: MenuItem<tauri::Wry>,
    pub(crate) mute_15m_item: MenuItem<tauri::Wry>,
    pub(crate) mute_1h_item: MenuItem<tauri::Wry>,
    pub(crate) mute_forever_item: MenuItem<tauri::Wry>,
    pub(crate) resume_item: MenuItem<tauri::Wry>,
}

pub(crate) struct AppState {
    pub(crate) runtime: Mutex<RuntimeState>,
    pub(crate) identity: Mutex<Option<SessionIdentity>>,
    pub(crate) badge: Mutex<BadgeState>,
    pub(crate) tray_mute_menu: Mutex<Option<TrayMuteMenuState>>,
}

impl AppState {
    pub(crate) fn new() -> Self {
        Self {
            runtime: Mutex::new(RuntimeState::default()),
            identity: Mutex::new(None),
            badge: Mutex::new(BadgeState::default()),
            tray_mute_menu: Mutex::new(None),
        }
    }
}

pub(crate) struct RuntimeState {
    pub(crate) stop_tx: Option<watch::Sender<bool>>,
    /// Incremented every time a new stream task is spawned. The task captures
    /// its own epoch at spawn time and only writes cleanup state if the epoch
    /// still matches, preventing a late-exiting old task from clobbering a
    /// freshly started replacement task's state.
    pub(crate) stream_epoch: u64,
    pub(crate) phase: ConnectionPhase,
    pub(crate) should_run: bool,
    pub(crate) last_connected_at: Option<u64>,
    pub(crate) last_stream_event_at: Option<u64>,
    pub(crate) last_notification_at: Option<u64>,
    pub(crate) last_notification_id: Option<i64>,
    pub(crate) last_error: Option<String>,
    pub(crate) backoff_seconds: u64,
    pub(crate) reconnect_attempts: u64,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            stop_tx: None,
            stream_epoch: 0,
            phase: ConnectionPhase::Disconnected,
            should_run: false,
            last_connected_at: None,
            last_stream_event_at: None,
            last_notification_at: None,
            last_notification_id: None,
            last_error: None,
            backoff_seconds: 0,
            reconnect_attempts: 0,
        }
    }
}

/// Connection lifecycle. `authenticated` only exists inside `Connected`, so
/// "authenticated implies connected" holds by construction and a transport
/// drop structurally revokes authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionPhase {
    Disconnected,
    Connecting,
    Backoff,
    Connected { authenticated: bool },
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionEvent {
    ConnectRequested,
    TransportConnected,
    Authenticated,
    TransportDisconnected,
    AttemptFailed { attempts_exhausted: bool },
    RecoverRequested,
}

impl ConnectionPhase {
    pub(crate) fn on_event(self, event: ConnectionEvent) -> Self {
        use ConnectionEvent::*;
        match (self, event) {
            // Failed is only left through an explicit external re-trigger.
            (ConnectionPhase::Failed, ConnectRequested) => ConnectionPhase::Failed,
            (_, ConnectRequested) => ConnectionPhase::Connecting,
            (_, RecoverRequested) => ConnectionPhase::Connecting,
            (_, TransportConnected) => ConnectionPhase::Connected {
                authenticated: false,
            },
            // The ack is only meaningful while the transport is live.
            (ConnectionPhase::Connected { .. }, Authenticated) => ConnectionPhase::Connected {
                authenticated: true,
            },
            (other, Authenticated) => other,
            (_, TransportDisconnected) => ConnectionPhase::Disconnected,
            (
                _,
                AttemptFailed {
                    attempts_exhausted: true,
                },
            ) => ConnectionPhase::Failed,
            (_, AttemptFailed { .. }) => ConnectionPhase::Backoff,
        }
    }

    pub(crate) fn is_connected(self) -> bool {
        matches!(self, ConnectionPhase::Connected { .. })
    }

    pub(crate) fn is_authenticated(self) -> bool {
        matches!(
            self,
            ConnectionPhase::Connected {
                authenticated: true
            }
        )
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ConnectionPhase::Disconnected => "Disconnected",
            ConnectionPhase::Connecting => "Connecting",
            ConnectionPhase::Backoff => "Backoff",
            ConnectionPhase::Connected {
                authenticated: false,
            } => "Connected",
            ConnectionPhase::Connected {
                authenticated: true,
            } => "Authenticated",
            ConnectionPhase::Failed => "Failed",
        }
    }
}

/// Closed set of notification kinds. Everything the server might invent later
/// parses as `System`, which renders and navigates generically instead of
/// failing.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub(crate) enum NotificationKind {
    Message,
    Announcement,
    Enrollment,
    Grades,
    System,
}

impl NotificationKind {
    pub(crate) const ALL: [NotificationKind; 5] = [
        NotificationKind::Message,
        NotificationKind::Announcement,
        NotificationKind::Enrollment,
        NotificationKind::Grades,
        NotificationKind::System,
    ];

    pub(crate) fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "message" => NotificationKind::Message,
            "announcement" => NotificationKind::Announcement,
            "enrollment" => NotificationKind::Enrollment,
            "grades" => NotificationKind::Grades,
            _ => NotificationKind::System,
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Message => "message",
            NotificationKind::Announcement => "announcement",
            NotificationKind::Enrollment => "enrollment",
            NotificationKind::Grades => "grades",
            NotificationKind::System => "system",
        }
    }

    /// The one table that keeps icon, accent color and navigation target in
    /// sync per kind. Rendering and navigation must both read from here.
    pub(crate) fn meta(self) -> KindMeta {
        match self {
            NotificationKind::Message => KindMeta {
                icon: "envelope",
                accent: "#2563eb",
                section: Section::Messages,
            },
            NotificationKind::Announcement => KindMeta {
                icon: "megaphone",
                accent: "#d97706",
                section: Section::Announcements,
            },
            NotificationKind::Enrollment => KindMeta {
                icon: "clipboard",
                accent: "#059669",
                section: Section::Enrollment,
            },
            NotificationKind::Grades => KindMeta {
                icon: "award",
                accent: "#7c3aed",
                section: Section::Grades,
            },
            NotificationKind::System => KindMeta {
                icon: "bell",
                accent: "#6b7280",
                section: Section::Dashboard,
            },
        }
    }
}

impl<'de> Deserialize<'de> for NotificationKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(NotificationKind::parse(&raw))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct KindMeta {
    pub(crate) icon: &'static str,
    pub(crate) accent: &'static str,
    pub(crate) section: Section,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct NotificationItem {
    pub(crate) id: i64,
    pub(crate) kind: NotificationKind,
    pub(crate) title: String,
    pub(crate) body: String,
    pub(crate) sender_id: Option<i64>,
    pub(crate) sender_name: Option<String>,
    pub(crate) sender_avatar: Option<String>,
    pub(crate) created_at: String,
    pub(crate) read: bool,
}

/// Push / list payload as the portal server sends it. `type` and `title` are
/// required; a payload missing either is malformed and gets dropped upstream.
#[derive(Debug, Deserialize)]
pub(crate) struct NotificationWire {
    pub(crate) id: i64,
    #[serde(rename = "type")]
    pub(crate) kind: String,
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) message: String,
    #[serde(default, alias = "senderId")]
    pub(crate) sender_id: Option<i64>,
    #[serde(default, alias = "senderName")]
    pub(crate) sender_name: Option<String>,
    #[serde(default, alias = "senderAvatar")]
    pub(crate) sender_avatar: Option<String>,
    #[serde(default, alias = "createdAt")]
    pub(crate) created_at: String,
    #[serde(default)]
    pub(crate) read: bool,
}

impl NotificationWire {
    pub(crate) fn into_item(self) -> NotificationItem {
        NotificationItem {
            id: self.id,
            kind: NotificationKind::parse(&self.kind),
            title: self.title,
            body: self.message,
            sender_id: self.sender_id,
            sender_name: self.sender_name,
            sender_avatar: self.sender_avatar,
            created_at: self.created_at,
            read: self.read,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct NotificationListWire {
    #[serde(default)]
    pub(crate) notifications: Vec<NotificationWire>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UnreadCountsWire {
    #[serde(default)]
    pub(crate) total: u64,
    #[serde(default)]
    pub(crate) counts: HashMap<String, u64>,
}

/// Aggregate unread counts, always applied as one object: the server total is
/// authoritative and a kind absent from the map counts as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct UnreadCounts {
    pub(crate) total: u64,
    pub(crate) by_kind: HashMap<NotificationKind, u64>,
}

impl UnreadCounts {
    pub(crate) fn from_wire(wire: UnreadCountsWire) -> Self {
        let mut by_kind: HashMap<NotificationKind, u64> = HashMap::new();
        for (key, value) in wire.counts {
            *by_kind.entry(NotificationKind::parse(&key)).or_insert(0) += value;
        }
        Self {
            total: wire.total,
            by_kind,
        }
    }

    pub(crate) fn count_for(&self, kind: NotificationKind) -> u64 {
        self.by_kind.get(&kind).copied().unwrap_or(0)
    }
}

pub(crate) struct BadgeState {
    pub(crate) counts: UnreadCounts,
    pub(crate) refresh_in_flight: bool,
}

impl Default for BadgeState {
    fn default() -> Self {
        Self {
            counts: UnreadCounts::default(),
            refresh_in_flight: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_kind_parse_falls_back_to_system() {
        assert_eq!(NotificationKind::parse("message"), NotificationKind::Message);
        assert_eq!(NotificationKind::parse("  Grades "), NotificationKind::Grades);
        assert_eq!(NotificationKind::parse("holiday"), NotificationKind::System);
        assert_eq!(NotificationKind::parse(""), NotificationKind::System);
    }

    #[test]
    fn test_counts_absent_kind_is_zero() {
        let wire = UnreadCountsWire {
            total: 3,
            counts: HashMap::from([("message".to_string(), 3)]),
        };
        let counts = UnreadCounts::from_wire(wire);
        assert_eq!(counts.count_for(NotificationKind::Message), 3);
        assert_eq!(counts.count_for(NotificationKind::Grades), 0);
    }

    #[test]
    fn test_counts_unknown_kinds_fold_into_system() {
        let wire = UnreadCountsWire {
            total: 4,
            counts: HashMap::from([
                ("holiday".to_string(), 1),
                ("maintenance".to_string(), 2),
                ("grades".to_string(), 1),
            ]),
        };
        let counts = UnreadCounts::from_wire(wire);
        assert_eq!(counts.count_for(NotificationKind::System), 3);
        assert_eq!(counts.count_for(NotificationKind::Grades), 1);
    }

    #[test]
    fn test_disconnect_revokes_authentication() {
        let phase = ConnectionPhase::Connected {
            authenticated: true,
        };
        let next = phase.on_event(ConnectionEvent::TransportDisconnected);
        assert_eq!(next, ConnectionPhase::Disconnected);
        assert!(!next.is_authenticated());
    }

    #[test]
    fn test_failed_requires_explicit_recover() {
        let failed = ConnectionPhase::Failed;
        assert_eq!(
            failed.on_event(ConnectionEvent::ConnectRequested),
            ConnectionPhase::Failed
        );
        assert_eq!(
            failed.on_event(ConnectionEvent::RecoverRequested),
            ConnectionPhase::Connecting
        );
    }

    #[test]
    fn test_ack_before_connect_is_ignored() {
        let phase = ConnectionPhase::Connecting.on_event(ConnectionEvent::Authenticated);
        assert_eq!(phase, ConnectionPhase::Connecting);
        assert!(!phase.is_authenticated());
    }

    fn arb_event() -> impl Strategy<Value = ConnectionEvent> {
        prop_oneof![
            Just(ConnectionEvent::ConnectRequested),
            Just(ConnectionEvent::TransportConnected),
            Just(ConnectionEvent::Authenticated),
            Just(ConnectionEvent::TransportDisconnected),
            any::<bool>().prop_map(|exhausted| ConnectionEvent::AttemptFailed {
                attempts_exhausted: exhausted
            }),
            Just(ConnectionEvent::RecoverRequested),
        ]
    }

    proptest! {
        #[test]
        fn prop_authenticated_implies_connected(events in proptest::collection::vec(arb_event(), 0..64)) {
            let mut phase = ConnectionPhase::Disconnected;
            for event in events {
                phase = phase.on_event(event);
                prop_assert!(!phase.is_authenticated() || phase.is_connected());
                if event == ConnectionEvent::TransportDisconnected {
                    prop_assert!(!phase.is_authenticated());
                }
            }
        }
    }
}
