// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use ramses_rf::{
    cfg::{
        cli::{parse_args, resolve_config_path, Mode, EXIT_BAD_ARGS},
        config::Config,
        logger::init_logger,
    },
    command::model::Command,
    drivers::fault_log,
    protocol::{address::Address, packet::Verb},
    topology::gateway::Gateway,
    transport::{engine::Transport, io::GatewayLink},
};
use tokio::sync::mpsc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let raw_args: Vec<String> = std::env::args().skip(1).collect();
    let args = match parse_args(&raw_args) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(EXIT_BAD_ARGS);
        },
    };

    init_logger("ramses_rf=info").context("failed to initialize logging")?;

    let cfg_path = resolve_config_path(&args.config_path).context("failed to resolve config path")?;
    let mut cfg = Config::load_from_file(&cfg_path).context("failed to load config")?;
    if let Some(port) = &args.serial_port_override {
        cfg.gateway.serial_port = Some(port.clone());
        cfg.gateway.tcp_bridge_addr = None;
    }

    let gateway = Gateway::with_discovery_config(cfg.discovery.clone());
    let (line_tx, line_rx) = mpsc::unbounded_channel();
    let transport = Transport::new(line_tx, Arc::clone(&gateway));
    gateway.attach_transport(&transport);

    let link = if let Some(path) = &cfg.gateway.serial_port {
        GatewayLink::open_serial(path)?
    } else if let Some(addr) = &cfg.gateway.tcp_bridge_addr {
        GatewayLink::connect_tcp(addr).await?
    } else {
        bail!("config has neither a serial port nor a TCP bridge address");
    };

    ramses_rf::transport::io::spawn(link, Arc::clone(&transport), line_rx);
    tokio::spawn(Arc::clone(&transport).run_outbound_loop());

    match args.mode {
        Mode::Monitor => {
            info!("monitoring the bus, press ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
        },
        Mode::Command(raw) => run_one_shot_command(&transport, &gateway, &raw, &cfg).await?,
    }

    Ok(())
}

/// Interprets a `--command` string of the form `<verb> <dest> <code>
/// <payload-hex>`, e.g. `W 01:145038 2309 00082C`, and waits for its reply.
async fn run_one_shot_command(
    transport: &Arc<Transport>,
    gateway: &Arc<Gateway>,
    raw: &str,
    cfg: &Config,
) -> Result<()> {
    let parts: Vec<&str> = raw.split_whitespace().collect();
    let [verb_str, dest_str, code, payload_hex] = parts[..] else {
        bail!("--command expects '<verb> <dest> <code> <payload-hex>', got: {raw}");
    };

    let verb = Verb::parse(verb_str).with_context(|| format!("unknown verb: {verb_str}"))?;
    let dest = Address::parse(dest_str).with_context(|| format!("bad destination address: {dest_str}"))?;

    if code == "0418" {
        let system = gateway.get_or_create_system(&dest);
        let entries = fault_log::get_fault_log(transport, &system, &dest, cfg.fault_log.limit, cfg.fault_log.timeout).await?;
        println!("retrieved {} fault-log entries", entries.len());
        return Ok(());
    }

    let cmd = Command::new(verb, dest, code, payload_hex)?
        .with_callback(ramses_rf::command::model::CallbackSpec::once(Duration::from_secs(3)));
    match transport.send(cmd).await {
        Some(rx) => match rx.await {
            Ok(Some(msg)) => println!("reply: {msg:?}"),
            Ok(None) => println!("no reply received (retries exhausted)"),
            Err(_) => println!("command dropped before a reply could arrive"),
        },
        None => println!("sent (fire-and-forget)"),
    }
    Ok(())
}
