use std::fmt;

use serde::Serialize;

/// Health reported when the input carries none.
pub const DEFAULT_HEALTH: &str = "unhealthy";

/// Decoded runtime status of a database container.
///
/// Stored as a single `"<phase>:<health>"` column. Docker-style inputs such as
/// `"running (healthy)"` and bare phases such as `"exited"` are accepted and
/// normalized into that form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub phase: String,
    pub health: String,
}

impl Status {
    pub fn new(phase: impl Into<String>, health: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            health: health.into(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase.contains("running")
    }

    pub fn is_exited(&self) -> bool {
        self.phase.starts_with("exited")
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.phase, self.health)
    }
}

/// Decode any status string into a phase/health pair. Never fails.
///
/// Phase and health are trimmed in every shape, so `" running "` decodes like
/// `"running"`.
pub fn decode(raw: &str) -> Status {
    if let Some((phase, rest)) = raw.split_once('(') {
        let health = rest.split_once(')').map_or(rest, |(inner, _)| inner);
        return Status::new(phase.trim(), health_or_default(health));
    }
    if let Some((phase, health)) = raw.split_once(':') {
        return Status::new(phase.trim(), health_or_default(health));
    }
    Status::new(raw.trim(), DEFAULT_HEALTH)
}

/// Canonical storage form of a status.
pub fn encode(status: &Status) -> String {
    status.to_string()
}

/// Decode then re-encode. Applying this to an already canonical value is a no-op.
pub fn normalize(raw: &str) -> String {
    encode(&decode(raw))
}

fn health_or_default(health: &str) -> String {
    let health = health.trim();
    if health.is_empty() {
        DEFAULT_HEALTH.to_string()
    } else {
        health.to_string()
    }
}
