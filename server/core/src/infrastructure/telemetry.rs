// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Logging setup for processes embedding the filesystem core.
//!
//! `RUST_LOG` takes precedence over the configured level.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::domain::config::LoggingConfig;

/// Install the global fmt subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let installed = match config.format.as_str() {
        "json" => builder.json().try_init(),
        "compact" => builder.with_target(false).compact().try_init(),
        other => anyhow::bail!("Unknown log format '{}', expected 'compact' or 'json'", other),
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_format_is_rejected() {
        let config = LoggingConfig {
            level: "info".into(),
            format: "xml".into(),
        };
        let err = init_logging(&config).unwrap_err();
        assert!(err.to_string().contains("xml"));
    }
}
