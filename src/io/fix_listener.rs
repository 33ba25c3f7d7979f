//! TCP line listener for position fixes
//!
//! Each connection sends newline-delimited JSON fixes:
//! `{"lat":46.05,"lon":14.50,"ts":1767617600000,"acc":4.5}\n`

use crate::io::fix_payload::parse_fix_payload;
use crate::services::engine::EngineHandle;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Bind the listener and serve until shutdown
pub async fn start_fix_listener(
    port: u16,
    engine: EngineHandle,
    shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    info!(port = %port, "fix_listener_started");
    serve(listener, engine, shutdown).await;
    Ok(())
}

/// Accept loop on an already bound listener
pub async fn serve(listener: TcpListener, engine: EngineHandle, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("fix_listener_shutdown");
                    return;
                }
            }
            result = listener.accept() => {
                match result {
                    Ok((socket, addr)) => {
                        let engine = engine.clone();
                        tokio::spawn(async move {
                            handle_connection(socket, addr, engine).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "fix_listener_accept_failed");
                    }
                }
            }
        }
    }
}

async fn handle_connection(socket: TcpStream, addr: SocketAddr, engine: EngineHandle) {
    debug!(peer = %addr, "fix_connection_accepted");

    let mut lines = BufReader::new(socket).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_fix_payload(line, engine.now_ms()) {
            Ok(fixes) => {
                for fix in fixes {
                    engine.submit_fix(fix, "tcp");
                }
            }
            Err(e) => debug!(peer = %addr, error = %e, "fix_line_parse_failed"),
        }
    }

    debug!(peer = %addr, "fix_connection_closed");
}
