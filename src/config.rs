//! Connection and cursor configuration
//!
//! [`Config`] carries connection-wide defaults and can be parsed from a
//! property string:
//!
//! ```text
//! autocommit=false;holdability=close;fetchsize=100;loblocators=true
//! ```
//!
//! [`CursorOptions`] describes one query; it is resolved against the
//! connection defaults into a [`StatementContext`] when the cursor opens.

use std::str::FromStr;

use crate::constants::{
    Concurrency, Holdability, ResultSetType, Sensitivity, DEFAULT_FETCH_SIZE,
};
use crate::error::{Error, Result};

/// Connection-wide cursor defaults
///
/// # Examples
///
/// ```rust
/// use netcursor::{Config, Holdability};
///
/// let config = Config::new()
///     .with_auto_commit(false)
///     .with_holdability(Holdability::CloseCursorsAtCommit)
///     .with_fetch_size(16);
///
/// let parsed: Config = "autocommit=false;holdability=close;fetchsize=16".parse().unwrap();
/// assert_eq!(parsed.fetch_size, config.fetch_size);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Commit after every statement completes
    pub auto_commit: bool,
    /// Default holdability of new cursors
    pub holdability: Holdability,
    /// Default rows per fetch (0 = server default)
    pub fetch_size: u32,
    /// Ask for LOB columns as locators
    pub lob_locators: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auto_commit: true,
            holdability: Holdability::HoldCursorsOverCommit,
            fetch_size: 0,
            lob_locators: true,
        }
    }
}

impl Config {
    /// Configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set auto-commit
    pub fn with_auto_commit(mut self, auto_commit: bool) -> Self {
        self.auto_commit = auto_commit;
        self
    }

    /// Set the default holdability
    pub fn with_holdability(mut self, holdability: Holdability) -> Self {
        self.holdability = holdability;
        self
    }

    /// Set the default fetch size
    pub fn with_fetch_size(mut self, fetch_size: u32) -> Self {
        self.fetch_size = fetch_size;
        self
    }

    /// Enable or disable LOB locators
    pub fn with_lob_locators(mut self, enabled: bool) -> Self {
        self.lob_locators = enabled;
        self
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(Error::InvalidConfig(format!(
            "invalid boolean for {}: {}",
            key, value
        ))),
    }
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut config = Config::default();

        for pair in s.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                Error::InvalidConfig(format!("expected key=value, got {}", pair))
            })?;
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "autocommit" => config.auto_commit = parse_bool(&key, value)?,
                "holdability" => {
                    config.holdability = match value.to_ascii_lowercase().as_str() {
                        "hold" => Holdability::HoldCursorsOverCommit,
                        "close" => Holdability::CloseCursorsAtCommit,
                        _ => {
                            return Err(Error::InvalidConfig(format!(
                                "invalid holdability: {}",
                                value
                            )))
                        }
                    }
                }
                "fetchsize" => {
                    config.fetch_size = value.parse().map_err(|_| {
                        Error::InvalidConfig(format!("invalid fetch size: {}", value))
                    })?
                }
                "loblocators" => config.lob_locators = parse_bool(&key, value)?,
                _ => return Err(Error::InvalidConfig(format!("unknown property: {}", key))),
            }
        }

        Ok(config)
    }
}

/// Options for one query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CursorOptions {
    /// Scrollability
    pub result_set_type: ResultSetType,
    /// Read-only or updatable
    pub concurrency: Concurrency,
    /// Requested sensitivity for scroll-sensitive cursors
    pub sensitivity: Sensitivity,
    /// Holdability override
    pub holdability: Option<Holdability>,
    /// Fetch size override
    pub fetch_size: Option<u32>,
    /// Maximum rows exposed (0 = unlimited)
    pub max_rows: u64,
}

impl CursorOptions {
    /// Forward-only, read-only defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Scroll-insensitive cursor
    pub fn scroll_insensitive() -> Self {
        Self::new().with_type(ResultSetType::ScrollInsensitive)
    }

    /// Set scrollability
    pub fn with_type(mut self, result_set_type: ResultSetType) -> Self {
        self.result_set_type = result_set_type;
        self
    }

    /// Set concurrency
    pub fn with_concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Shorthand for updatable concurrency
    pub fn updatable(self) -> Self {
        self.with_concurrency(Concurrency::Updatable)
    }

    /// Set requested sensitivity
    pub fn with_sensitivity(mut self, sensitivity: Sensitivity) -> Self {
        self.sensitivity = sensitivity;
        self
    }

    /// Override holdability
    pub fn with_holdability(mut self, holdability: Holdability) -> Self {
        self.holdability = Some(holdability);
        self
    }

    /// Override fetch size
    pub fn with_fetch_size(mut self, fetch_size: u32) -> Self {
        self.fetch_size = Some(fetch_size);
        self
    }

    /// Limit the rows exposed
    pub fn with_max_rows(mut self, max_rows: u64) -> Self {
        self.max_rows = max_rows;
        self
    }
}

/// Settings resolved for one open cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatementContext {
    /// Rows per fetch, never 0
    pub fetch_size: u32,
    /// Maximum rows exposed (0 = unlimited)
    pub max_rows: u64,
    /// Holdability
    pub holdability: Holdability,
    /// Connection auto-commit at the time of the call
    pub auto_commit: bool,
}

impl StatementContext {
    /// Resolve query options against connection defaults
    ///
    /// Updatable forward-only cursors fetch one row at a time so the server
    /// cursor stays on the row the application sees.
    pub fn resolve(config: &Config, options: &CursorOptions) -> Result<Self> {
        let requested = options.fetch_size.unwrap_or(config.fetch_size);
        validate_fetch_size(requested as i64, options.max_rows)?;

        let fetch_size = if options.result_set_type == ResultSetType::ForwardOnly
            && options.concurrency == Concurrency::Updatable
        {
            1
        } else if requested == 0 {
            DEFAULT_FETCH_SIZE
        } else {
            requested
        };

        Ok(Self {
            fetch_size,
            max_rows: options.max_rows,
            holdability: options.holdability.unwrap_or(config.holdability),
            auto_commit: config.auto_commit,
        })
    }
}

/// Reject negative fetch sizes and fetch sizes above max rows
pub fn validate_fetch_size(fetch_size: i64, max_rows: u64) -> Result<()> {
    if fetch_size < 0 || (max_rows > 0 && fetch_size > max_rows as i64) {
        return Err(Error::InvalidFetchDirectionOrSize(format!(
            "invalid fetch size {}",
            fetch_size
        )));
    }
    Ok(())
}
