use serde::Serialize;
use tauri::{AppHandle, Emitter, Manager};

use crate::{
    debug_log,
    model::{NotificationItem, NotificationKind},
    settings::{normalize_base_url, read_settings},
    ui_shell,
};

/// Portal sections a notification can land the user on. `Dashboard` is the
/// safe default so an unrecognized kind never produces a dead click.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Section {
    Messages,
    Announcements,
    Enrollment,
    Grades,
    Dashboard,
}

impl Section {
    pub(crate) fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "messages" => Section::Messages,
            "announcements" => Section::Announcements,
            "enrollment" => Section::Enrollment,
            "grades" => Section::Grades,
            _ => Section::Dashboard,
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Section::Messages => "messages",
            Section::Announcements => "announcements",
            Section::Enrollment => "enrollment",
            Section::Grades => "grades",
            Section::Dashboard => "dashboard",
        }
    }

    fn portal_path(self) -> &'static str {
        match self {
            Section::Messages => "/messages",
            Section::Announcements => "/announcements",
            Section::Enrollment => "/enrollment",
            Section::Grades => "/grades",
            Section::Dashboard => "/dashboard",
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub(crate) struct NavTarget {
    pub(crate) section: Section,
    /// For message notifications: the conversation partner to preselect.
    pub(crate) thread_partner: Option<i64>,
}

/// Total over the kind enum via the kind table; only message notifications
/// carry a thread partner through.
pub(crate) fn resolve_navigation(item: &NotificationItem) -> NavTarget {
    let section = item.kind.meta().section;
    let thread_partner = match item.kind {
        NotificationKind::Message => item.sender_id,
        _ => None,
    };
    NavTarget {
        section,
        thread_partner,
    }
}

/// Routes a click into the app. The inbox window is the primary target; when
/// no window can take the event the portal opens in the system browser, so a
/// click always lands somewhere.
pub(crate) fn activate(app: &AppHandle, target: &NavTarget) {
    debug_log(&format!("navigate to section {}", target.section.as_str()));
    if let Some(window) = app.get_webview_window("main") {
        if window.emit("navigate-section", target.clone()).is_ok() {
            let _ = app.emit("navigate-section", target.clone());
            ui_shell::show_main_window(app);
            return;
        }
    }

    if let Err(error) = open_portal_fallback(app, target) {
        debug_log(&format!("navigation fallback failed: {error}"));
    }
}

pub(crate) fn open_portal_fallback(app: &AppHandle, target: &NavTarget) -> Result<(), String> {
    let settings = read_settings(app)?;
    let base_url = normalize_base_url(&settings.base_url)?;
    let mut url = format!("{base_url}{}", target.section.portal_path());
    if let Some(partner) = target.thread_partner {
        url.push_str(&format!("?partner={partner}"));
    }
    crate::open_url_in_browser(&url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(kind: NotificationKind, sender_id: Option<i64>) -> NotificationItem {
        NotificationItem {
            id: 1,
            kind,
            title: "t".to_string(),
            body: String::new(),
            sender_id,
            sender_name: None,
            sender_avatar: None,
            created_at: String::new(),
            read: false,
        }
    }

    #[test]
    fn test_navigation_is_total_over_all_kinds() {
        for kind in NotificationKind::ALL {
            let target = resolve_navigation(&item(kind, None));
            // every kind must land somewhere, never "do nothing"
            assert!(!target.section.as_str().is_empty());
        }
        let unknown = resolve_navigation(&item(NotificationKind::parse("holiday"), None));
        assert_eq!(unknown.section, Section::Dashboard);
    }

    #[test]
    fn test_thread_partner_only_for_messages() {
        let target = resolve_navigation(&item(NotificationKind::Message, Some(42)));
        assert_eq!(target.section, Section::Messages);
        assert_eq!(target.thread_partner, Some(42));

        let target = resolve_navigation(&item(NotificationKind::Grades, Some(42)));
        assert_eq!(target.section, Section::Grades);
        assert_eq!(target.thread_partner, None);
    }

    #[test]
    fn test_kind_table_sections() {
        assert_eq!(
            resolve_navigation(&item(NotificationKind::Announcement, None)).section,
            Section::Announcements
        );
        assert_eq!(
            resolve_navigation(&item(NotificationKind::Enrollment, None)).section,
            Section::Enrollment
        );
    }
}
