use chrono::{DateTime, TimeZone as _, Utc};
use std::fmt;

pub const PRODUCT: &str = "PeerLink";
const STAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: &'static str,
    pub host: &'static str,
    /// `epoch:<secs>` as emitted by the build script.
    pub time: &'static str,
    /// Short commit id; empty outside a git checkout.
    pub commit: &'static str,
}

impl BuildInfo {
    pub const fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            host: match option_env!("PEERLINK_BUILD_HOST") {
                Some(h) => h,
                None => "unknown",
            },
            time: match option_env!("PEERLINK_BUILD_TIME") {
                Some(t) => t,
                None => "unknown",
            },
            commit: match option_env!("PEERLINK_BUILD_COMMIT") {
                Some(c) => c,
                None => "",
            },
        }
    }

    pub fn built_at(&self) -> Option<DateTime<Utc>> {
        parse_stamp(self.time)
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PRODUCT} {}", self.version)?;
        if !self.commit.is_empty() {
            write!(f, "-{}", self.commit)?;
        }
        let when = match self.built_at() {
            Some(dt) => format!("{} UTC", dt.format(STAMP_FORMAT)),
            None => self.time.to_string(),
        };
        write!(f, " (built on {} at {when}).", self.host)
    }
}

/// Accepts `epoch:<secs>` or RFC 3339.
pub fn parse_stamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Some(secs) = raw.strip_prefix("epoch:") {
        let secs = secs.trim().parse::<i64>().ok()?;
        return Utc.timestamp_opt(secs, 0).single();
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn version() -> &'static str {
    BuildInfo::current().version
}

pub fn version_line() -> String {
    format!("{PRODUCT} {}", version())
}

pub fn banner() -> String {
    BuildInfo::current().to_string()
}
