//! Client configuration.
//!
//! Durations are written as milliseconds in serialized form.

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

pub const ENV_CALL_TIMEOUT_MS: &str = "FARCALL_CALL_TIMEOUT_MS";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "FARCALL_CONNECT_TIMEOUT_MS";
pub const ENV_MAX_FRAME_LEN: &str = "FARCALL_MAX_FRAME_LEN";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An environment variable held something other than a positive integer.
    InvalidEnv { var: &'static str, value: String },
    /// A serialized config did not parse.
    Parse(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidEnv { var, value } => {
                write!(f, "{} must be a positive integer, got '{}'", var, value)
            }
            Self::Parse(msg) => write!(f, "Invalid client config: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// How long a call waits for its response once sent.
    #[serde(rename = "call_timeout_ms", with = "millis")]
    pub call_timeout: Duration,
    /// How long opening a new connection may take.
    #[serde(rename = "connect_timeout_ms", with = "millis")]
    pub connect_timeout: Duration,
    /// Largest frame accepted or sent, in bytes.
    pub max_frame_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(3),
            max_frame_len: farwire::DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl ClientConfig {
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    /// Parses a JSON document; missing keys keep their defaults.
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| Error::Parse(e.to_string()))
    }

    /// Defaults overridden by `FARCALL_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(ms) = parse_var(&lookup, ENV_CALL_TIMEOUT_MS)? {
            config.call_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, ENV_CONNECT_TIMEOUT_MS)? {
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(len) = parse_var(&lookup, ENV_MAX_FRAME_LEN)? {
            config.max_frame_len = len as usize;
        }
        Ok(config)
    }
}

fn parse_var(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<u64>> {
    let Some(value) = lookup(var) else { return Ok(None) };
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(Some(n)),
        _ => Err(Error::InvalidEnv { var, value }),
    }
}

mod millis {
    use std::time::Duration;

    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
