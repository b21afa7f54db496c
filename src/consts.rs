pub(crate) const DEFAULT_PAGE_LIMIT: usize = 50;
pub(crate) const MAX_API_PAGE_LIMIT: usize = 100;

pub(crate) const STREAM_CONNECT_TIMEOUT_SECS: u64 = 10;
pub(crate) const STREAM_AUTH_TIMEOUT_SECS: u64 = 10;
pub(crate) const STREAM_LIVENESS_CHECK_INTERVAL_SECS: u64 = 15;
pub(crate) const STREAM_LIVENESS_IDLE_SECS: u64 = 90;
pub(crate) const STREAM_LIVENESS_PING_GRACE_SECS: u64 = 30;

pub(crate) const RECONNECT_BASE_DELAY_SECS: u64 = 1;
pub(crate) const RECONNECT_MAX_DELAY_SECS: u64 = 30;
pub(crate) const MAX_RECONNECT_ATTEMPTS: u64 = 5;
pub(crate) const DISCONNECT_RETRY_DELAY_SECS: u64 = 3;
pub(crate) const IDENTITY_RETRY_DELAY_SECS: u64 = 3;

pub(crate) const BADGE_POLL_INTERVAL_SECS: u64 = 60;
pub(crate) const BADGE_DISPLAY_CAP: u64 = 99;
pub(crate) const TOAST_DISMISS_MS: u64 = 8_000;

pub(crate) const HTTP_REQUEST_TIMEOUT_SECS: u64 = 15;
pub(crate) const AVATAR_MAX_BYTES: usize = 256_000;

pub(crate) const KEYRING_SERVICE: &str = "campushub-desktop";
pub(crate) const KEYRING_ACCOUNT: &str = "portal-token";
pub(crate) const TOKEN_ENV_VAR: &str = "CAMPUSHUB_TOKEN";

#[cfg(target_os = "macos")]
pub(crate) const LAUNCH_AGENT_LABEL: &str = "edu.campushub.desktop";

pub(crate) const MUTE_FOREVER_SENTINEL: u64 = 0;
pub(crate) const MUTE_MODE_15M: &str = "15m";
pub(crate) const MUTE_MODE_1H: &str = "1h";
pub(crate) const MUTE_MODE_CUSTOM: &str = "custom";
pub(crate) const MUTE_MODE_FOREVER: &str = "forever";
