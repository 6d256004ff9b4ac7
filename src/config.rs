//! Session configuration and environment helpers.
//!
//! Every field has a default; [`SessionConfig::from_env`] overrides them from
//! the process environment. Unset variables keep the default, unparsable ones
//! are an error.
//!
//! # Environment Variables
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `FERRORING_PORT` | `coordinator_port` | `8081` |
//! | `FERRORING_MAX_WORKERS` | `max_workers` | `100` |
//! | `FERRORING_ARRAY_LEN` | `array_len` | `100` |
//! | `FERRORING_WORKER_PORT` | `worker_port` | `0` (OS-assigned) |
//! | `FERRORING_STRICT_ROUTING` | `routing` | permissive |
//! | `FERRORING_ADVERTISE_IP` | `advertise_ip` | unset (auto-detected) |
//! | `FERRORING_REGISTRATION_TIMEOUT_MS` | `registration_timeout` | `5000` |

use crate::error::{Error, Result};
use std::env;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

/// Well-known port the coordinator listens on.
pub const COORDINATOR_PORT: u16 = 8081;

/// Registration closes once this many workers have joined.
pub const MAX_WORKERS: usize = 100;

/// Length of the generated input array.
pub const DEFAULT_ARRAY_LEN: usize = 100;

/// How long the root waits for an accepted peer to send its registration.
pub const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(5);

/// What a primitive does when handed a rank it has no link for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingPolicy {
    /// Sends are dropped and receives yield zero / an empty array.
    #[default]
    Permissive,
    /// The call fails with [`Error::InvalidRank`].
    Strict,
}

/// Tunables for one coordinator or worker session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Port the coordinator listens on for registrations.
    pub coordinator_port: u16,
    /// Registration cap.
    pub max_workers: usize,
    /// Length of the array the coordinator generates.
    pub array_len: usize,
    /// Port a worker's ring listener binds to (0 lets the OS choose).
    pub worker_port: u16,
    /// Handling of invalid ranks in primitives.
    pub routing: RoutingPolicy,
    /// IP a worker advertises for its ring listener. When unset the worker
    /// uses the local address of its coordinator connection, or a detected
    /// interface address if that one is loopback.
    pub advertise_ip: Option<Ipv4Addr>,
    /// Upper bound on the root's wait for one registration message.
    pub registration_timeout: Duration,
    /// How long the registration loop sleeps when nothing is pending.
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            coordinator_port: COORDINATOR_PORT,
            max_workers: MAX_WORKERS,
            array_len: DEFAULT_ARRAY_LEN,
            worker_port: 0,
            routing: RoutingPolicy::Permissive,
            advertise_ip: None,
            registration_timeout: REGISTRATION_TIMEOUT,
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl SessionConfig {
    /// Defaults overridden by any `FERRORING_*` variables that are set.
    pub fn from_env() -> Result<Self> {
        let mut config = SessionConfig::default();
        if let Some(port) = parse_var("FERRORING_PORT")? {
            config.coordinator_port = port;
        }
        if let Some(max) = parse_var("FERRORING_MAX_WORKERS")? {
            config.max_workers = max;
        }
        if let Some(len) = parse_var("FERRORING_ARRAY_LEN")? {
            config.array_len = len;
        }
        if let Some(port) = parse_var("FERRORING_WORKER_PORT")? {
            config.worker_port = port;
        }
        if let Some(strict) = flag_var("FERRORING_STRICT_ROUTING")? {
            config.routing = if strict {
                RoutingPolicy::Strict
            } else {
                RoutingPolicy::Permissive
            };
        }
        if let Some(ip) = parse_var("FERRORING_ADVERTISE_IP")? {
            config.advertise_ip = Some(ip);
        }
        if let Some(ms) = parse_var("FERRORING_REGISTRATION_TIMEOUT_MS")? {
            config.registration_timeout = Duration::from_millis(ms);
        }
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings no session could run with.
    pub fn validate(&self) -> Result<()> {
        if i32::try_from(self.max_workers).is_err() {
            return Err(Error::Config(format!(
                "max_workers {} exceeds the rank space",
                self.max_workers
            )));
        }
        if i32::try_from(self.array_len).is_err() {
            return Err(Error::Config(format!(
                "array_len {} does not fit a wire length",
                self.array_len
            )));
        }
        if self.registration_timeout.is_zero() {
            return Err(Error::Config("registration_timeout must be non-zero".into()));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{name}={raw:?} is not a valid value"))),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(Error::Config(format!("{name} is not UTF-8"))),
    }
}

fn flag_var(name: &str) -> Result<Option<bool>> {
    let Some(raw) = parse_var::<String>(name)? else {
        return Ok(None);
    };
    parse_flag(&raw)
        .map(Some)
        .ok_or_else(|| Error::Config(format!("{name}={raw:?} is not a boolean")))
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_well_known_values() {
        let config = SessionConfig::default();
        assert_eq!(config.coordinator_port, 8081);
        assert_eq!(config.max_workers, 100);
        assert_eq!(config.array_len, 100);
        assert_eq!(config.routing, RoutingPolicy::Permissive);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn oversized_array_is_rejected() {
        let config = SessionConfig {
            array_len: usize::MAX,
            ..SessionConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn zero_registration_timeout_is_rejected() {
        let config = SessionConfig {
            registration_timeout: Duration::ZERO,
            ..SessionConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn flag_spellings() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag("on"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn unset_variable_keeps_default() {
        // Name chosen so no real environment defines it
        assert_eq!(parse_var::<u16>("FERRORING_TEST_NEVER_SET").unwrap(), None);
    }
}
