//! `name = value` config file loader.
//!
//! The format is a flat sequence of `name = value` lines. Blank lines and
//! `#` comments are ignored. List-valued keys (`dnsbl`, `dnswl`, `rhsbl`)
//! may be repeated, one zone per line. Unknown keys are rejected rather than
//! silently ignored so that typos surface at startup.

use std::path::Path;
use std::time::Duration;

use tracing::info;

use crate::error::{ConfigError, Result};
use crate::models::{GrossConfig, UpdatePolicy};

/// Load and validate a config file.
pub fn load_config(path: &Path) -> Result<GrossConfig> {
    let text = std::fs::read_to_string(path)?;
    parse_config(&text)
}

/// Parse and validate config file contents.
pub fn parse_config(text: &str) -> Result<GrossConfig> {
    let mut config = GrossConfig::default();

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let stripped = match raw.split_once('#') {
            Some((before, _)) => before,
            None => raw,
        };
        let stripped = stripped.trim();
        if stripped.is_empty() {
            continue;
        }

        let (key, value) = stripped.split_once('=').ok_or_else(|| {
            ConfigError::Malformed {
                line,
                text: stripped.to_string(),
            }
        })?;
        let key = key.trim();
        let value = value.trim();

        apply(&mut config, key, value, line)?;
    }

    validate(&config)?;
    Ok(config)
}

fn apply(
    config: &mut GrossConfig,
    key: &str,
    value: &str,
    line: usize,
) -> Result<()> {
    match key {
        "host" => config.host = value.to_string(),
        "port" => config.port = parse_num(key, value, line)?,
        "synchost" => config.sync.synchost = value.to_string(),
        "syncport" => config.sync.syncport = parse_num(key, value, line)?,
        "peerhost" => {
            config.sync.peerhost = if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            };
        }
        "peerport" => config.sync.peerport = parse_num(key, value, line)?,
        "status_host" => config.status_host = value.to_string(),
        "status_port" => config.status_port = parse_num(key, value, line)?,
        "rotate_interval" => {
            config.rotate_interval =
                Duration::from_secs(parse_num(key, value, line)?);
        }
        "filter_bits" => config.filter_bits = parse_num(key, value, line)?,
        "number_buffers" => {
            config.number_buffers = parse_num(key, value, line)?;
        }
        "update" => {
            config.update = if value == "always" {
                UpdatePolicy::Always
            } else {
                UpdatePolicy::Grey
            };
        }
        "dnsbl" => config.dnsbl.push(value.to_string()),
        "dnswl" => config.dnswl.push(value.to_string()),
        "rhsbl" => config.rhsbl.push(value.to_string()),
        "spf" => config.spf = value == "on",
        "statefile" => config.statefile = Some(value.into()),
        "query_timelimit" => {
            config.query_timelimit =
                Duration::from_millis(parse_num(key, value, line)?);
        }
        "grey_threshold" => {
            config.grey_threshold = parse_num(key, value, line)?;
        }
        "max_threads" => config.max_threads = parse_num(key, value, line)?,
        _ => {
            return Err(ConfigError::UnknownKey {
                line,
                key: key.to_string(),
            });
        }
    }
    Ok(())
}

fn parse_num<T: std::str::FromStr>(
    key: &str,
    value: &str,
    line: usize,
) -> Result<T> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        line,
        key: key.to_string(),
        value: value.to_string(),
        reason: "not a valid number".to_string(),
    })
}

fn validate(config: &GrossConfig) -> Result<()> {
    if !(5..=32).contains(&config.filter_bits) {
        return Err(ConfigError::FilterBitsOutOfRange(config.filter_bits));
    }
    if config.number_buffers < 1 {
        return Err(ConfigError::BelowMinimum {
            key: "number_buffers",
            min: 1,
            got: u64::from(config.number_buffers),
        });
    }
    if config.max_threads < 1 {
        return Err(ConfigError::BelowMinimum {
            key: "max_threads",
            min: 1,
            got: config.max_threads as u64,
        });
    }

    match &config.sync.peerhost {
        Some(peer) => {
            info!("peerhost {peer} configured, replicating");
        }
        None => info!("no peerhost configured, replication suppressed"),
    }
    match config.update {
        UpdatePolicy::Always => info!("updatestyle: ALWAYS"),
        UpdatePolicy::Grey => info!("updatestyle: GREY"),
    }

    Ok(())
}
