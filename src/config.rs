//! Server Configuration
//!
//! Every knob has a default matching the reference deployment and can be
//! overridden from the environment.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::game::tick::MatchConfig;
use crate::network::auth::AuthConfig;
use crate::network::session::SessionConfig;
use crate::tournament::scheduler::TournamentConfig;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed or is out of range.
    #[error("invalid value for {key}: {value:?}")]
    Invalid {
        /// Environment variable.
        key: &'static str,
        /// Offending value.
        value: String,
    },
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Connections silent for this long are closed.
    pub idle_timeout: Duration,
    /// Physics ticks per second.
    pub physics_hz: u32,
    /// State broadcasts per second.
    pub broadcast_hz: u32,
    /// Points needed to win.
    pub max_score: u32,
    /// Pre-game countdown, seconds.
    pub start_countdown_secs: u32,
    /// Between-points countdown, seconds.
    pub serve_countdown_secs: u32,
    /// How long a finished match lingers before it is reclaimed.
    pub finished_grace: Duration,
    /// Tournament timing.
    pub tournament: TournamentConfig,
    /// JWT validation.
    pub auth: AuthConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            physics_hz: 60,
            broadcast_hz: 30,
            max_score: 3,
            start_countdown_secs: 3,
            serve_countdown_secs: 1,
            finished_grace: Duration::from_secs(5),
            tournament: TournamentConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `PONG_*` and `AUTH_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = parse(&lookup, "PONG_BIND_ADDR")? {
            config.bind_addr = v;
        }
        if let Some(v) = parse_positive(&lookup, "PONG_MAX_CONNECTIONS")? {
            config.max_connections = v;
        }
        if let Some(v) = parse_positive(&lookup, "PONG_IDLE_TIMEOUT_SECS")? {
            config.idle_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_positive(&lookup, "PONG_PHYSICS_HZ")? {
            config.physics_hz = v;
        }
        if let Some(v) = parse_positive(&lookup, "PONG_BROADCAST_HZ")? {
            config.broadcast_hz = v;
        }
        if let Some(v) = parse_positive(&lookup, "PONG_MAX_SCORE")? {
            config.max_score = v;
        }
        if let Some(v) = parse_positive(&lookup, "PONG_SIGNUP_SECONDS")? {
            config.tournament.signup_units = v;
        }
        if let Some(v) = parse::<u64>(&lookup, "PONG_FINISHED_GRACE_SECS")? {
            config.finished_grace = Duration::from_secs(v);
        }

        config.auth = AuthConfig::from_lookup(&lookup);

        Ok(config)
    }

    /// Match rules derived from this config.
    pub fn match_config(&self) -> MatchConfig {
        MatchConfig {
            max_score: self.max_score,
            tick_rate: self.physics_hz,
            start_countdown_secs: self.start_countdown_secs,
            serve_countdown_secs: self.serve_countdown_secs,
            ..MatchConfig::default()
        }
    }

    /// Session settings derived from this config.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            match_config: self.match_config(),
            broadcast_hz: self.broadcast_hz,
        }
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn parse_positive<T: FromStr + PartialOrd + Default>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match parse::<T>(lookup, key)? {
        Some(v) if v <= T::default() => Err(ConfigError::Invalid {
            key,
            value: lookup(key).unwrap_or_default(),
        }),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: BTreeMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.physics_hz, 60);
        assert_eq!(config.broadcast_hz, 30);
        assert_eq!(config.max_score, 3);
        assert_eq!(config.tournament.signup_units, 30);
        assert_eq!(config.finished_grace, Duration::from_secs(5));
        assert!(!config.auth.is_configured());
    }

    #[test]
    fn test_overrides_flow_into_match_config() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("PONG_BIND_ADDR", "127.0.0.1:9000"),
            ("PONG_PHYSICS_HZ", "120"),
            ("PONG_MAX_SCORE", "5"),
            ("PONG_SIGNUP_SECONDS", "10"),
            ("AUTH_SECRET", "s3cret"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.tournament.signup_units, 10);
        assert!(config.auth.is_configured());

        let rules = config.match_config();
        assert_eq!(rules.tick_rate, 120);
        assert_eq!(rules.max_score, 5);
        assert_eq!(rules.start_countdown_ticks(), 360);
        assert_eq!(rules.field_width, MatchConfig::default().field_width);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = ServerConfig::from_lookup(lookup(&[("PONG_PHYSICS_HZ", "fast")])).unwrap_err();
        assert_eq!(err, ConfigError::Invalid { key: "PONG_PHYSICS_HZ", value: "fast".into() });

        let err = ServerConfig::from_lookup(lookup(&[("PONG_MAX_SCORE", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PONG_MAX_SCORE", .. }));
    }

    #[test]
    fn test_session_periods() {
        let session = ServerConfig::default().session_config();
        assert_eq!(session.broadcast_period(), Duration::from_micros(33_333));
        assert_eq!(session.physics_period(), Duration::from_micros(16_666));
    }
}
