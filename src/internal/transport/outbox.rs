use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::internal::message::envelope::Message;

/// Receiving end of the outbound channel, drained by one writer task.
pub type OutboundQueue = mpsc::UnboundedReceiver<Message>;

/// Cloneable send handle for outbound messages.
///
/// Safe to use from the dispatch loop and any number of execution tasks at
/// once; a single writer serialises everything onto the wire.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Message>,
}

impl Outbox {
    pub fn channel() -> (Outbox, OutboundQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Outbox { tx }, rx)
    }

    pub fn send(&self, message: Message) {
        tracing::debug!(
            endpoint = %message.endpoint(),
            command = %message.command.as_str(),
            content_type = %message.content_type(),
            error = message.error,
            "Sending reply"
        );
        if self.tx.send(message).is_err() {
            tracing::warn!("Outbound channel closed, dropping reply");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Writes every queued message as one JSON line until all senders are gone.
/// Returns the number of messages written.
pub async fn write_outbound<W>(mut queue: OutboundQueue, mut writer: W) -> std::io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while let Some(message) = queue.recv().await {
        let mut line = match message.encode() {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(endpoint = %message.endpoint(), "Failed to encode reply: {}", e);
                continue;
            }
        };
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        written += 1;
    }
    Ok(written)
}
