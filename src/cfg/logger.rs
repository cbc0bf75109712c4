// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize a plain formatted `tracing-subscriber` pipeline: an env filter
/// (`RUST_LOG`, falling back to `default_level`) plus timestamped,
/// target-qualified output on stderr. There is no span-capture/JSON layer
/// here: this process has no distributed tracing backend to feed.
pub fn init_logger(default_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .context("failed to build the log level filter")?;

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install global subscriber: {e}"))
}
