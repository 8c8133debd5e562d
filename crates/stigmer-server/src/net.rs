//! Framed network acceptor
//!
//! Serves the same envelope the in-process channel uses over TCP:
//! length-prefixed JSON frames, unary calls only. Streaming subscriptions
//! stay in-process; remote callers poll queries instead.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{debug, warn};

use stigmer_core::StigmerError;

use crate::transport::{Channel, Request};

const MAX_FRAME: u32 = 64 * 1024 * 1024;

/// Accept loop; runs until `stop` is notified.
pub async fn serve(listener: TcpListener, channel: Channel, stop: Arc<Notify>) {
    loop {
        tokio::select! {
            _ = stop.notified() => {
                debug!("network listener stopping");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "connection accepted");
                        let channel = channel.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, channel).await {
                                debug!(%peer, error = %e, "connection closed");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
        }
    }
}

async fn handle_connection(mut stream: TcpStream, channel: Channel) -> std::io::Result<()> {
    loop {
        let mut len_buf = [0u8; 4];
        if stream.read_exact(&mut len_buf).await.is_err() {
            return Ok(()); // peer hung up
        }
        let len = u32::from_be_bytes(len_buf);
        if len > MAX_FRAME {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "frame too large",
            ));
        }
        let mut frame = vec![0u8; len as usize];
        stream.read_exact(&mut frame).await?;

        let response = dispatch(&channel, &frame).await;
        let payload = serde_json::to_vec(&response)?;
        stream.write_all(&(payload.len() as u32).to_be_bytes()).await?;
        stream.write_all(&payload).await?;
        stream.flush().await?;
    }
}

async fn dispatch(channel: &Channel, frame: &[u8]) -> Value {
    let parsed: Value = match serde_json::from_slice(frame) {
        Ok(v) => v,
        Err(e) => return error_frame(&StigmerError::invalid(format!("bad frame: {e}"))),
    };

    let service = parsed.get("service").and_then(Value::as_str).unwrap_or_default();
    let method = parsed.get("method").and_then(Value::as_str).unwrap_or_default();
    let body = parsed.get("body").cloned().unwrap_or(Value::Null);

    let mut request = Request::new(service, method, body);
    if let Some(ms) = parsed.get("deadline_ms").and_then(Value::as_u64) {
        request = request.with_deadline(Instant::now() + Duration::from_millis(ms));
    }

    match channel.call(request).await {
        Ok(response) => match response.into_unary() {
            Ok(value) => json!({ "ok": true, "body": value }),
            Err(e) => error_frame(&e),
        },
        Err(e) => error_frame(&e),
    }
}

fn error_frame(error: &StigmerError) -> Value {
    json!({
        "ok": false,
        "error": { "code": error.code(), "message": error.to_string() },
    })
}
