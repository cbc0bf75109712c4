// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-code command constructors with the bounds each code's domain imposes
//! on its payload (§4.1).

use crate::{
    command::model::Command,
    error::{RamsesError, Result},
    protocol::{address::Address, codes::temp_to_hex, packet::Verb},
};

fn bounds(label: &str, value: f64, lo: f64, hi: f64) -> Result<()> {
    if value < lo || value > hi {
        return Err(RamsesError::Validation(format!("{label} {value} outside [{lo}, {hi}]")));
    }
    Ok(())
}

/// `10A0 W`: DHW setpoint, valid in `[30, 85]` degC.
pub fn dhw_params(ctl_addr: Address, setpoint: f64, overrun_minutes: u8, differential: f64) -> Result<Command> {
    bounds("DHW setpoint", setpoint, 30.0, 85.0)?;
    let payload = format!(
        "00{}{:02X}{}",
        temp_to_hex(Some(setpoint)),
        overrun_minutes,
        temp_to_hex(Some(differential))
    );
    Command::new(Verb::W, ctl_addr, "10A0", payload)
}

/// `1F41 W`: DHW operating mode (`00` = auto, `01` = advanced, `02` = boost).
pub fn dhw_mode(ctl_addr: Address, mode: u8) -> Result<Command> {
    if mode > 2 {
        return Err(RamsesError::Validation(format!("DHW mode {mode} is not one of 0,1,2")));
    }
    let payload = format!("00{mode:02X}FFFFFF");
    Command::new(Verb::W, ctl_addr, "1F41", payload)
}

/// `1030 W`: mix-valve parameters. `cycle_rate` must be one of `{3,6,9,12}`
/// (cycles per hour).
pub fn mix_valve_params(device_addr: Address, cycle_rate: u8, min_flow_setpoint: f64, max_flow_setpoint: f64) -> Result<Command> {
    if !matches!(cycle_rate, 3 | 6 | 9 | 12) {
        return Err(RamsesError::Validation(format!("cycle_rate {cycle_rate} is not one of 3,6,9,12")));
    }
    let payload = format!(
        "FC01{cycle_rate:02X}FC06{}FC12{}",
        temp_to_hex(Some(min_flow_setpoint)),
        temp_to_hex(Some(max_flow_setpoint))
    );
    Command::new(Verb::W, device_addr, "1030", payload)
}

/// `2E04 W`: system mode (`00` = auto .. `07` = away, per the controller's
/// enumerated mode table).
pub fn system_mode(ctl_addr: Address, mode: u8) -> Result<Command> {
    if mode > 7 {
        return Err(RamsesError::Validation(format!("system mode {mode} is out of range 0..=7")));
    }
    let payload = format!("{mode:02X}FFFFFFFFFFFF00");
    Command::new(Verb::W, ctl_addr, "2E04", payload)
}

/// `313F W`: system time, encoded via [`crate::protocol::codes::dtm_to_hex`].
pub fn system_time(ctl_addr: Address, dtm: chrono::DateTime<chrono::Utc>) -> Result<Command> {
    let payload = format!("60{}", crate::protocol::codes::dtm_to_hex(dtm));
    Command::new(Verb::W, ctl_addr, "313F", payload)
}

/// `1100 W`: TPI (boiler relay) cycle parameters.
pub fn tpi_params(device_addr: Address, cycle_rate: u8, min_on_time: f64, min_off_time: f64) -> Result<Command> {
    if !matches!(cycle_rate, 3 | 6 | 9 | 12) {
        return Err(RamsesError::Validation(format!("cycle_rate {cycle_rate} is not one of 3,6,9,12")));
    }
    let payload = format!(
        "FC{cycle_rate:02X}{:02X}{:02X}FFFF",
        (min_on_time * 4.0).round() as u8,
        (min_off_time * 4.0).round() as u8
    );
    Command::new(Verb::W, device_addr, "1100", payload)
}

/// `000A W`: zone configuration. `min_temp`/`max_temp` must lie in `[5, 35]`
/// and `[5, 35]` respectively, per the controller's valid setpoint range.
pub fn zone_config(ctl_addr: Address, zone_idx: &str, min_temp: f64, max_temp: f64) -> Result<Command> {
    bounds("zone min_temp", min_temp, 5.0, 30.0)?;
    bounds("zone max_temp", max_temp, 5.0, 35.0)?;
    let payload = format!(
        "{zone_idx}00{}{}",
        temp_to_hex(Some(min_temp)),
        temp_to_hex(Some(max_temp))
    );
    Command::new(Verb::W, ctl_addr, "000A", payload)
}

/// `2349 W`: zone mode. `until.is_some()` encodes a temporary override that
/// reverts at that timestamp (mode `04`); `None` is a permanent change
/// (mode `01`).
pub fn zone_mode(
    ctl_addr: Address,
    zone_idx: &str,
    setpoint: f64,
    until: Option<chrono::DateTime<chrono::Utc>>,
) -> Result<Command> {
    bounds("zone setpoint", setpoint, 5.0, 35.0)?;
    let temp = temp_to_hex(Some(setpoint));
    let payload = match until {
        Some(dtm) => format!("{zone_idx}{temp}04FFFFFF{}", crate::protocol::codes::dtm_to_hex(dtm)),
        None => format!("{zone_idx}{temp}01FFFFFFFF"),
    };
    Command::new(Verb::W, ctl_addr, "2349", payload)
}

/// `0004 W`: zone name, ASCII-encoded and null-padded to 20 bytes.
pub fn zone_name(ctl_addr: Address, zone_idx: &str, name: &str) -> Result<Command> {
    if !name.is_ascii() {
        return Err(RamsesError::Validation("zone name must be ASCII".to_string()));
    }
    let mut bytes = name.as_bytes().to_vec();
    bytes.truncate(20);
    bytes.resize(20, 0);
    let payload = format!("{zone_idx}00{}", hex::encode_upper(bytes));
    Command::new(Verb::W, ctl_addr, "0004", payload)
}

/// `2309 W`: zone setpoint, valid in `[5, 35]` degC.
pub fn zone_setpoint(ctl_addr: Address, zone_idx: &str, setpoint: f64) -> Result<Command> {
    bounds("zone setpoint", setpoint, 5.0, 35.0)?;
    let payload = format!("{zone_idx}{}", temp_to_hex(Some(setpoint)));
    Command::new(Verb::W, ctl_addr, "2309", payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctl() -> Address {
        Address::parse("01:145038").expect("addr")
    }

    #[test]
    fn zone_setpoint_within_bounds() {
        let cmd = zone_setpoint(ctl(), "00", 21.0).expect("valid");
        assert_eq!(cmd.payload_hex, "000834");
    }

    #[test]
    fn zone_setpoint_rejects_out_of_range() {
        assert!(zone_setpoint(ctl(), "00", 40.0).is_err());
    }

    #[test]
    fn dhw_setpoint_rejects_out_of_range() {
        assert!(dhw_params(ctl(), 20.0, 0, 1.0).is_err());
        assert!(dhw_params(ctl(), 55.0, 0, 1.0).is_ok());
    }

    #[test]
    fn cycle_rate_must_be_one_of_3_6_9_12() {
        assert!(tpi_params(Address::parse("13:237335").expect("addr"), 5, 1.0, 1.0).is_err());
        assert!(tpi_params(Address::parse("13:237335").expect("addr"), 6, 1.0, 1.0).is_ok());
    }

    #[test]
    fn zone_mode_encodes_temporary_override() {
        use chrono::TimeZone;
        let until = chrono::Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let cmd = zone_mode(ctl(), "01", 20.0, Some(until)).expect("valid");
        assert_eq!(cmd.payload_hex, "0107D004FFFFFF".to_string() + &crate::protocol::codes::dtm_to_hex(until));
    }

    #[test]
    fn zone_mode_permanent_has_no_duration() {
        let cmd = zone_mode(ctl(), "00", 18.0, None).expect("valid");
        assert!(cmd.payload_hex.ends_with("01FFFFFFFF"));
    }
}
