//! Message channels between the foreground and the worker.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

/// Sending end of a message channel, attached to a worker message.
#[derive(Debug, Clone)]
pub struct MessagePort {
  tx: mpsc::UnboundedSender<Value>,
}

impl MessagePort {
  /// Post a JSON message. Returns false once the other end is closed.
  pub fn post_message<T: Serialize>(&self, message: &T) -> bool {
    match serde_json::to_value(message) {
      Ok(value) => self.tx.send(value).is_ok(),
      Err(e) => {
        warn!("Failed to serialize port message: {}", e);
        false
      }
    }
  }
}

/// Receiving end of a message channel. Dropping it closes the channel.
pub struct MessageChannel {
  rx: mpsc::UnboundedReceiver<Value>,
}

impl MessageChannel {
  /// Create a channel, returning the port to hand to the worker.
  pub fn open() -> (MessagePort, Self) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MessagePort { tx }, Self { rx })
  }

  /// Receive the next message; `None` once every port is gone.
  pub async fn recv(&mut self) -> Option<Value> {
    self.rx.recv().await
  }

  /// Close the channel; later posts on any port fail.
  pub fn close(&mut self) {
    self.rx.close();
  }
}
