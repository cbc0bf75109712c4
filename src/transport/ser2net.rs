// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A minimal ser2net-style relay (§4.8): accepts one TCP client, shuttles
//! bytes between it and a local serial port, and drops a leading telnet IAC
//! (`0xFF`) byte from inbound network data (this crate's clients never
//! negotiate telnet options, so a lone IAC is noise, not a real sequence).

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};
use tokio_serial::SerialPortBuilderExt;
use tracing::{info, warn};

const BAUD_RATE: u32 = 115_200;
const TELNET_IAC: u8 = 0xFF;

pub async fn run(serial_path: &str, listen_addr: &str) -> Result<()> {
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    info!(%listen_addr, %serial_path, "ser2net bridge listening");

    loop {
        let (socket, peer) = listener.accept().await.context("accept failed")?;
        info!(%peer, "client connected");

        let port = tokio_serial::new(serial_path, BAUD_RATE)
            .open_native_async()
            .with_context(|| format!("failed to open serial port {serial_path}"))?;

        let (mut serial_rd, mut serial_wr) = tokio::io::split(port);
        let (mut net_rd, mut net_wr) = socket.into_split();

        let serial_to_net = tokio::spawn(async move {
            let mut buf = [0u8; 512];
            loop {
                match serial_rd.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if net_wr.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    },
                    Err(e) => {
                        warn!(error = %e, "serial read failed");
                        break;
                    },
                }
            }
        });

        let net_to_serial = tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let mut first_byte_of_stream = true;
            loop {
                match net_rd.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(mut n) => {
                        let mut start = 0;
                        if first_byte_of_stream && n > 0 && buf[0] == TELNET_IAC {
                            start = 1;
                        }
                        first_byte_of_stream = false;
                        if start >= n {
                            continue;
                        }
                        n -= start;
                        if serial_wr.write_all(&buf[start..start + n]).await.is_err() {
                            break;
                        }
                    },
                    Err(e) => {
                        warn!(error = %e, "network read failed");
                        break;
                    },
                }
            }
        });

        let _ = tokio::join!(serial_to_net, net_to_serial);
        info!(%peer, "client disconnected");
    }
}
