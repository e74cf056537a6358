//! Client log-level configuration
//!
//! The debug setting is parsed like C `strtol` with base 0: optional leading
//! whitespace and sign, then a `0x` (hex), `0` (octal) or decimal number.
//! Anything that does not parse cleanly falls back to silent.

use tracing::warn;

use crate::client::{self, ClientLogLevel};
use crate::config::AdapterConfig;

/// Why a debug setting was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelParseError {
    /// Value does not fit in an i64
    Overflow,
    /// No digits at the start of the value
    NoDigits,
    /// Digits followed by other characters
    TrailingGarbage,
}

/// Parse an integer with `strtol(s, &end, 0)` rules, requiring the whole
/// string to be consumed
pub fn parse_level(s: &str) -> Result<i64, LevelParseError> {
    let bytes = s.as_bytes();
    let mut i = 0;

    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }

    let mut negative = false;
    if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
        negative = bytes[i] == b'-';
        i += 1;
    }

    let radix: u32 = if bytes.len() > i + 2
        && bytes[i] == b'0'
        && (bytes[i + 1] | 0x20) == b'x'
        && bytes[i + 2].is_ascii_hexdigit()
    {
        i += 2;
        16
    } else if i < bytes.len() && bytes[i] == b'0' {
        8
    } else {
        10
    };

    let digits_start = i;
    let mut value: i64 = 0;
    let mut overflow = false;
    while i < bytes.len() {
        let Some(d) = (bytes[i] as char).to_digit(radix) else {
            break;
        };
        match value
            .checked_mul(radix as i64)
            .and_then(|v| v.checked_add(d as i64))
        {
            Some(v) => value = v,
            None => overflow = true,
        }
        i += 1;
    }

    if i == digits_start {
        return Err(LevelParseError::NoDigits);
    }
    if overflow {
        return Err(LevelParseError::Overflow);
    }
    if i != bytes.len() {
        return Err(LevelParseError::TrailingGarbage);
    }

    Ok(if negative { -value } else { value })
}

/// Map a numeric level onto the client's verbosity scale
pub fn level_from_number(n: i64) -> ClientLogLevel {
    match n {
        0 => ClientLogLevel::Silent,
        1 => ClientLogLevel::Warning,
        2 => ClientLogLevel::Verbose,
        3 => ClientLogLevel::Debug,
        _ => ClientLogLevel::All,
    }
}

/// Resolve the debug setting, warning about anything unusable
pub fn resolve_log_level(setting: Option<&str>) -> ClientLogLevel {
    let Some(raw) = setting else {
        return ClientLogLevel::Silent;
    };

    match parse_level(raw) {
        Ok(n) if n < 0 => {
            warn!(
                "Davix_Debug value {} is negative. Will use default log level 0",
                n
            );
            ClientLogLevel::Silent
        }
        Ok(n) => level_from_number(n),
        Err(LevelParseError::Overflow) => {
            warn!(
                "Got error while converting Davix_Debug env variable to integer. \
                 Will use default log level 0"
            );
            ClientLogLevel::Silent
        }
        Err(LevelParseError::NoDigits) => {
            warn!(
                "Failed to convert to integer Davix_Debug env variable; \
                 Will use default log level 0"
            );
            ClientLogLevel::Silent
        }
        Err(LevelParseError::TrailingGarbage) => {
            warn!(
                "Failed to parse extra junk from Davix_Debug env variable. \
                 Will use default log level 0"
            );
            ClientLogLevel::Silent
        }
    }
}

/// Apply the configured debug level to the client. Runs before every open
/// and before a file is torn down.
pub fn configure_client_log_level(config: &AdapterConfig) -> ClientLogLevel {
    let level = resolve_log_level(config.debug.as_deref());
    client::set_log_level(level);
    level
}
