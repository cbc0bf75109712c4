// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The line-oriented byte transport (§4.8): either a local serial port or a
//! TCP connection to a ser2net-style relay, producing raw `\r\n`-terminated
//! lines inbound and accepting lines to write outbound.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::mpsc,
};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, warn};

use crate::{
    protocol::{message::Message, packet::Packet},
    transport::engine::Transport,
};

const BAUD_RATE: u32 = 115_200;

/// A connected gateway link, before it is split into independent read/write
/// halves for the two I/O tasks (§4.8, §5).
pub enum GatewayLink {
    Serial(tokio_serial::SerialStream),
    Tcp(TcpStream),
}

impl GatewayLink {
    pub fn open_serial(path: &str) -> Result<Self> {
        let port = tokio_serial::new(path, BAUD_RATE)
            .open_native_async()
            .with_context(|| format!("failed to open serial port {path}"))?;
        Ok(Self::Serial(port))
    }

    pub async fn connect_tcp(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.with_context(|| format!("failed to connect to {addr}"))?;
        Ok(Self::Tcp(stream))
    }

    fn into_split(self) -> (Box<dyn AsyncRead + Unpin + Send>, Box<dyn AsyncWrite + Unpin + Send>) {
        match self {
            GatewayLink::Serial(s) => {
                let (r, w) = tokio::io::split(s);
                (Box::new(r), Box::new(w))
            },
            GatewayLink::Tcp(s) => {
                let (r, w) = tokio::io::split(s);
                (Box::new(r), Box::new(w))
            },
        }
    }
}

/// Spawn the inbound reader and outbound writer tasks for `link`. The reader
/// parses each line into a [`Message`] and feeds it to `transport`; the
/// writer drains `line_rx` (fed by [`Transport::run_outbound_loop`]) onto the
/// wire.
pub fn spawn(link: GatewayLink, transport: Arc<Transport>, mut line_rx: mpsc::UnboundedReceiver<String>) {
    let (reader, mut writer) = link.into_split();

    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    let dtm = chrono::Utc::now();
                    match Packet::parse(trimmed, dtm) {
                        Ok(pkt) => transport.on_message(Message::from_packet(&pkt)).await,
                        Err(e) => warn!(error = %e, line = %trimmed, "failed to parse inbound packet"),
                    }
                },
                Ok(None) => {
                    warn!("gateway link closed, inbound reader exiting");
                    break;
                },
                Err(e) => {
                    warn!(error = %e, "error reading from gateway link");
                    break;
                },
            }
        }
    });

    tokio::spawn(async move {
        while let Some(line) = line_rx.recv().await {
            debug!(%line, "writing line to gateway link");
            if let Err(e) = writer.write_all(format!("{line}\r\n").as_bytes()).await {
                warn!(error = %e, "failed to write to gateway link, outbound writer exiting");
                break;
            }
        }
    });
}
