// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Outbound command construction: QoS defaults (§4.1) and per-code payload
//! builders (§4.1 table) layered over the wire-level [`model::Command`].

pub mod builders;
pub mod model;
