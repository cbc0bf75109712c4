// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub fn resolve_config_path(rel: &str) -> Result<PathBuf> {
    let p = Path::new(rel);
    let abs = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir().context("cannot get current working dir")?.join(p)
    };
    abs.canonicalize().with_context(|| format!("failed to canonicalize path {abs:?}"))
}

/// What the CLI asked the process to do: watch the bus indefinitely, or send
/// one command and wait for its reply (§4.9). Mutually exclusive.
#[derive(Debug, PartialEq)]
pub enum Mode {
    Monitor,
    Command(String),
}

#[derive(Debug)]
pub struct Args {
    pub mode: Mode,
    pub config_path: String,
    pub serial_port_override: Option<String>,
}

/// Exit code the caller should use when [`parse_args`] returns `Err`.
pub const EXIT_BAD_ARGS: i32 = 2;

pub fn parse_args(raw: &[String]) -> Result<Args, String> {
    let mut monitor = false;
    let mut command = None;
    let mut serial_port_override = None;
    let mut config_path = "config.yaml".to_string();

    let mut i = 0;
    while i < raw.len() {
        match raw[i].as_str() {
            "--monitor" => monitor = true,
            "--command" => {
                i += 1;
                command = Some(raw.get(i).ok_or("--command requires a value")?.clone());
            },
            "--serial-port" => {
                i += 1;
                serial_port_override = Some(raw.get(i).ok_or("--serial-port requires a value")?.clone());
            },
            "--config" => {
                i += 1;
                config_path = raw.get(i).ok_or("--config requires a value")?.clone();
            },
            other => return Err(format!("unrecognized argument: {other}")),
        }
        i += 1;
    }

    let mode = match (monitor, command) {
        (true, None) => Mode::Monitor,
        (false, Some(c)) => Mode::Command(c),
        (true, Some(_)) => return Err("--monitor and --command are mutually exclusive".to_string()),
        (false, None) => return Err("one of --monitor or --command is required".to_string()),
    };

    Ok(Args { mode, config_path, serial_port_override })
}
