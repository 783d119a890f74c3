//! Native-messaging transport: each message is a little-endian `u32` byte
//! length followed by that many bytes of UTF-8 JSON.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc::{self, UnboundedSender},
};
use tokio_util::sync::CancellationToken;

use crate::nudge::{Notifier, NudgeRequest};
use crate::protocol::{encode_push, Push, REQUEST_ID_FIELD};
use crate::session::commands::handle_message;
use crate::AppState;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Largest message accepted from the browser.
pub const MAX_INCOMING_BYTES: usize = 64 * 1024 * 1024;
/// Browsers refuse host messages above 1 MiB.
pub const MAX_OUTGOING_BYTES: usize = 1024 * 1024;

/// Outcome of reading one frame.
#[derive(Debug)]
pub enum Frame {
    Message(Value),
    /// Well-framed bytes that are not JSON.
    Malformed(String),
}

/// `Ok(None)` on a clean end of stream before a new frame starts.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err).context("failed to read message length"),
    }

    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_INCOMING_BYTES {
        bail!("incoming message of {len} bytes exceeds limit");
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .context("stream ended inside a message body")?;

    Ok(Some(match serde_json::from_slice(&body) {
        Ok(value) => Frame::Message(value),
        Err(err) => Frame::Malformed(err.to_string()),
    }))
}

pub async fn write_frame<W>(writer: &mut W, message: &Value) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(message).context("failed to encode message")?;
    if body.len() > MAX_OUTGOING_BYTES {
        bail!("outgoing message of {} bytes exceeds limit", body.len());
    }
    let len = u32::try_from(body.len()).context("message length does not fit in u32")?;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Forwards nudges to the extension as `NUDGE` pushes.
pub struct HostNotifier {
    outbox: UnboundedSender<Value>,
}

impl HostNotifier {
    pub fn new(outbox: UnboundedSender<Value>) -> Self {
        Self { outbox }
    }
}

impl Notifier for HostNotifier {
    fn notify(&self, request: &NudgeRequest) -> Result<()> {
        let value = encode_push(&Push::Nudge(request.clone()))?;
        self.outbox
            .send(value)
            .map_err(|_| anyhow::anyhow!("extension connection closed"))
    }
}

/// Serve requests from `reader` until end of stream or `cancel`. Replies and
/// pushes queued on `outbox` are written to `writer` in order by one task.
/// Returning cancels `cancel`, so background workers stop with the connection.
pub async fn serve<R, W>(
    app: Arc<AppState>,
    mut reader: R,
    writer: W,
    outbox: UnboundedSender<Value>,
    outbox_rx: mpsc::UnboundedReceiver<Value>,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let writer_task = tokio::spawn(writer_loop(writer, outbox_rx, cancel.clone()));

    let result = loop {
        let frame = tokio::select! {
            frame = read_frame(&mut reader) => frame,
            _ = cancel.cancelled() => break Ok(()),
        };

        let reply = match frame {
            Ok(Some(Frame::Message(message))) => handle_message(&app, message).await,
            Ok(Some(Frame::Malformed(reason))) => {
                log_warn!("malformed message from extension: {reason}");
                json!({"type": "ERROR", "message": format!("invalid JSON: {reason}")})
            }
            Ok(None) => {
                log_info!("extension closed the connection");
                break Ok(());
            }
            Err(err) => break Err(err),
        };

        if outbox.send(reply).is_err() {
            log_error!("writer stopped; ending serve loop");
            break Ok(());
        }
    };

    cancel.cancel();
    drop(outbox);
    if let Err(err) = writer_task.await {
        log_error!("writer task failed: {err}");
    }
    result
}

async fn writer_loop<W>(
    mut writer: W,
    mut outbox_rx: mpsc::UnboundedReceiver<Value>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let message = tokio::select! {
            biased;
            message = outbox_rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
            _ = cancel.cancelled() => {
                // Flush what is already queued; later pushes have no reader.
                while let Ok(message) = outbox_rx.try_recv() {
                    if send_one(&mut writer, &message).await.is_err() {
                        break;
                    }
                }
                break;
            }
        };
        if send_one(&mut writer, &message).await.is_err() {
            break;
        }
    }
}

/// An oversized reply is replaced by an `ERROR` so the caller still gets an
/// answer. `Err` means the stream itself is gone.
async fn send_one<W>(writer: &mut W, message: &Value) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    match write_frame(writer, message).await {
        Ok(()) => {
            log_debug!("sent {}", message.get("type").and_then(Value::as_str).unwrap_or("?"));
            Ok(())
        }
        Err(err) if err.downcast_ref::<std::io::Error>().is_none() => {
            log_error!("failed to encode message for extension: {err:#}");
            let mut notice = json!({"type": "ERROR", "message": format!("{err:#}")});
            if let (Some(id), Some(map)) = (message.get(REQUEST_ID_FIELD), notice.as_object_mut()) {
                map.insert(REQUEST_ID_FIELD.to_string(), id.clone());
            }
            write_frame(writer, &notice).await
        }
        Err(err) => {
            log_error!("extension stream closed while writing: {err:#}");
            Err(err)
        }
    }
}
