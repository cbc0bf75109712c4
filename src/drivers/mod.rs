// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Multi-message stateful transactions layered on top of the transport's
//! single-shot command/reply QoS engine (§4.3, §4.4).

pub mod fault_log;
pub mod schedule;
