//! Per-context dispatch configuration.

use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Error {
    /// An environment variable held something other than a millisecond count.
    InvalidDuration { var: String, value: String },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidDuration { var, value } => {
                write!(f, "{} must be a whole number of milliseconds, got '{}'", var, value)
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

pub const CALL_TIMEOUT_VAR: &str = "DISPATCH_CALL_TIMEOUT_MS";
pub const HANDSHAKE_TIMEOUT_VAR: &str = "DISPATCH_HANDSHAKE_TIMEOUT_MS";

/// Settings for one hub or worker.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the context, attached to every log line it emits.
    pub name: String,
    /// Upper bound on waiting for a remote response. `None` waits until the
    /// response arrives or the channel is lost.
    pub call_timeout: Option<Duration>,
    /// Upper bound on the hub's handshake with a freshly attached worker.
    pub handshake_timeout: Option<Duration>,
}

impl Config {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Applies overrides from `DISPATCH_CALL_TIMEOUT_MS` and
    /// `DISPATCH_HANDSHAKE_TIMEOUT_MS`. A value of `0` disables the timeout.
    pub fn from_env(self) -> Result<Self> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup(CALL_TIMEOUT_VAR) {
            self.call_timeout = parse_millis(CALL_TIMEOUT_VAR, &raw)?;
        }
        if let Some(raw) = lookup(HANDSHAKE_TIMEOUT_VAR) {
            self.handshake_timeout = parse_millis(HANDSHAKE_TIMEOUT_VAR, &raw)?;
        }
        Ok(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "dispatch".to_string(),
            call_timeout: None,
            handshake_timeout: Some(Duration::from_secs(30)),
        }
    }
}

fn parse_millis(var: &str, raw: &str) -> Result<Option<Duration>> {
    let millis: u64 = raw.trim().parse().map_err(|_| Error::InvalidDuration {
        var: var.to_string(),
        value: raw.to_string(),
    })?;
    Ok((millis > 0).then(|| Duration::from_millis(millis)))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::named("hub");
        assert_eq!(config.name, "hub");
        assert_eq!(config.call_timeout, None);
        assert_eq!(config.handshake_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_overrides() {
        let config = Config::default()
            .apply_overrides(env(&[(CALL_TIMEOUT_VAR, "250"), (HANDSHAKE_TIMEOUT_VAR, "0")]))
            .unwrap();
        assert_eq!(config.call_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.handshake_timeout, None);
    }

    #[test]
    fn test_invalid_override() {
        let err = Config::default()
            .apply_overrides(env(&[(CALL_TIMEOUT_VAR, "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains(CALL_TIMEOUT_VAR));
    }
}
