//! Mesh coordinator configuration.
//!
//! Configuration is loaded from environment variables. Every value has a
//! default, so an empty environment yields a usable configuration.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default participant cap, local participant included.
///
/// Mesh negotiation cost grows with the number of pairs, so sessions are
/// capped rather than scaled.
pub const DEFAULT_MAX_PARTICIPANTS: usize = 8;

/// Default number of dedup keys remembered per peer link.
pub const DEFAULT_DEDUP_WINDOW: usize = 256;

/// Default number of signals buffered per remote before a link exists.
pub const DEFAULT_PENDING_QUEUE_LIMIT: usize = 64;

/// Default time a link may stay out of `Stable` before it is declared failed.
pub const DEFAULT_NEGOTIATION_TIMEOUT_SECONDS: u64 = 30;

/// Default session coordinator mailbox size.
pub const DEFAULT_SESSION_MAILBOX_BUFFER: usize = 256;

/// Default peer actor mailbox size.
pub const DEFAULT_PEER_MAILBOX_BUFFER: usize = 128;

/// Default session event channel size.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Mesh coordinator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum participants in a session, local participant included.
    pub max_participants: usize,

    /// Dedup keys remembered per link (oldest evicted first).
    pub dedup_window: usize,

    /// Signals buffered per remote while no link exists.
    pub pending_queue_limit: usize,

    /// Time a link may spend negotiating before it is reported failed.
    pub negotiation_timeout: Duration,

    /// Session coordinator mailbox size.
    pub session_mailbox_buffer: usize,

    /// Peer actor mailbox size.
    pub peer_mailbox_buffer: usize,

    /// Session event channel size.
    pub event_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_participants: DEFAULT_MAX_PARTICIPANTS,
            dedup_window: DEFAULT_DEDUP_WINDOW,
            pending_queue_limit: DEFAULT_PENDING_QUEUE_LIMIT,
            negotiation_timeout: Duration::from_secs(DEFAULT_NEGOTIATION_TIMEOUT_SECONDS),
            session_mailbox_buffer: DEFAULT_SESSION_MAILBOX_BUFFER,
            peer_mailbox_buffer: DEFAULT_PEER_MAILBOX_BUFFER,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let max_participants =
            parse_positive(vars, "MESH_MAX_PARTICIPANTS", DEFAULT_MAX_PARTICIPANTS)?;
        if max_participants < 2 {
            return Err(ConfigError::InvalidValue(
                "MESH_MAX_PARTICIPANTS must be at least 2".to_string(),
            ));
        }

        let dedup_window = parse_positive(vars, "MESH_DEDUP_WINDOW", DEFAULT_DEDUP_WINDOW)?;

        let pending_queue_limit = parse_positive(
            vars,
            "MESH_PENDING_QUEUE_LIMIT",
            DEFAULT_PENDING_QUEUE_LIMIT,
        )?;

        let negotiation_timeout_seconds = parse_positive(
            vars,
            "MESH_NEGOTIATION_TIMEOUT_SECONDS",
            DEFAULT_NEGOTIATION_TIMEOUT_SECONDS,
        )?;

        let session_mailbox_buffer = parse_positive(
            vars,
            "MESH_SESSION_MAILBOX_BUFFER",
            DEFAULT_SESSION_MAILBOX_BUFFER,
        )?;

        let peer_mailbox_buffer = parse_positive(
            vars,
            "MESH_PEER_MAILBOX_BUFFER",
            DEFAULT_PEER_MAILBOX_BUFFER,
        )?;

        let event_buffer = parse_positive(vars, "MESH_EVENT_BUFFER", DEFAULT_EVENT_BUFFER)?;

        Ok(Config {
            max_participants,
            dedup_window,
            pending_queue_limit,
            negotiation_timeout: Duration::from_secs(negotiation_timeout_seconds),
            session_mailbox_buffer,
            peer_mailbox_buffer,
            event_buffer,
        })
    }
}

/// Parse an optional, strictly positive numeric variable.
fn parse_positive<T>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default,
{
    let Some(raw) = vars.get(name) else {
        return Ok(default);
    };

    let value: T = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(format!("{name} must be a number")))?;

    if value == T::default() {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must be greater than zero"
        )));
    }

    Ok(value)
}
