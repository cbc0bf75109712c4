// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use thiserror::Error;

/// Errors raised anywhere in the command/response engine and topology model.
#[derive(Debug, Error)]
pub enum RamsesError {
    #[error("invalid command: {0}")]
    Validation(String),

    #[error("callback expired: {0}")]
    ExpiredCallback(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("topology conflict: {0}")]
    TopologyConflict(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed packet: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, RamsesError>;
