//! Transient user-facing status messages.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BannerKind {
    Success,
    Warning,
    Danger,
    Info,
}

impl BannerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BannerKind::Success => "success",
            BannerKind::Warning => "warning",
            BannerKind::Danger => "danger",
            BannerKind::Info => "info",
        }
    }
}

impl fmt::Display for BannerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    pub kind: BannerKind,
    pub text: String,
    pub shown_at: Instant,
}

/// Holds at most one banner. A new banner replaces the current one and
/// restarts the timeout.
#[derive(Debug, Clone)]
pub struct BannerSlot {
    current: Option<Banner>,
    timeout: Duration,
}

impl Default for BannerSlot {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl BannerSlot {
    pub fn new(timeout: Duration) -> Self {
        Self { current: None, timeout }
    }

    pub fn show(&mut self, kind: BannerKind, text: impl Into<String>) {
        let text = text.into();
        log::debug!("Banner [{kind}] {text}");
        self.current = Some(Banner {
            kind,
            text,
            shown_at: Instant::now(),
        });
    }

    pub fn dismiss(&mut self) -> bool {
        self.current.take().is_some()
    }

    /// The banner, unless its timeout has passed at `now`.
    pub fn visible(&self, now: Instant) -> Option<&Banner> {
        self.current
            .as_ref()
            .filter(|banner| now.duration_since(banner.shown_at) < self.timeout)
    }

    /// Drop the banner if it has timed out. Returns `true` if one was dropped.
    pub fn expire(&mut self, now: Instant) -> bool {
        if self.current.is_some() && self.visible(now).is_none() {
            self.current = None;
            return true;
        }
        false
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
