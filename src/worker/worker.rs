//! The background worker task.

use color_eyre::{eyre::eyre, Result};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::port::{MessageChannel, MessagePort};
use super::protocol::{ProgressMessage, WorkerMessage};
use crate::cache::{
  CacheEntry, CacheJobEngine, CacheRouter, FetchRequest, Fetcher, ResponseStorage, RouteDecision,
};

/// Lifecycle state of the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Installed, waiting to take over from a previous worker
  Waiting,
  /// Controlling requests
  Active,
}

pub(crate) enum Inbound {
  Message {
    message: WorkerMessage,
    port: Option<MessagePort>,
  },
  Fetch {
    request: FetchRequest,
    reply: oneshot::Sender<Result<RouteDecision>>,
  },
  Shutdown {
    reply: oneshot::Sender<()>,
  },
}

/// Handle used by the foreground to talk to a running worker.
#[derive(Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<Inbound>,
  state: watch::Receiver<WorkerState>,
}

impl WorkerHandle {
  pub(crate) fn new(
    tx: mpsc::UnboundedSender<Inbound>,
    state: watch::Receiver<WorkerState>,
  ) -> Self {
    Self { tx, state }
  }

  /// Post a message to the worker, optionally transferring a port.
  pub fn post_message(&self, message: WorkerMessage, port: Option<MessagePort>) -> Result<()> {
    self
      .tx
      .send(Inbound::Message { message, port })
      .map_err(|_| eyre!("Worker is not running"))
  }

  /// Route an intercepted request through the worker's cache.
  pub async fn intercept(&self, request: FetchRequest) -> Result<RouteDecision> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(Inbound::Fetch { request, reply })
      .map_err(|_| eyre!("Worker is not running"))?;
    rx.await
      .map_err(|_| eyre!("Worker stopped before answering the request"))?
  }

  /// Ask the worker for its version string.
  pub async fn version_info(&self) -> Result<String> {
    let (port, mut channel) = MessageChannel::open();
    self.post_message(WorkerMessage::GetVersionInfo, Some(port))?;

    let value = channel
      .recv()
      .await
      .ok_or_else(|| eyre!("Worker did not reply with version info"))?;
    value
      .as_str()
      .map(String::from)
      .ok_or_else(|| eyre!("Unexpected version info reply: {}", value))
  }

  pub fn state(&self) -> WorkerState {
    *self.state.borrow()
  }

  /// Stop the worker after every in-flight job has finished.
  pub async fn shutdown(&self) -> Result<()> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(Inbound::Shutdown { reply })
      .map_err(|_| eyre!("Worker is not running"))?;
    rx.await
      .map_err(|_| eyre!("Worker stopped before acknowledging shutdown"))
  }
}

/// Background worker that owns the caching engine and the request router.
pub struct Worker<S: ResponseStorage, F: Fetcher> {
  engine: Arc<CacheJobEngine<S, F>>,
  router: CacheRouter<S>,
  version: String,
  state: watch::Sender<WorkerState>,
  /// Jobs the worker must stay alive for
  keep_alive: JoinSet<()>,
}

impl<S: ResponseStorage, F: Fetcher> Worker<S, F> {
  /// Spawn the worker on the current runtime.
  pub fn spawn(engine: CacheJobEngine<S, F>, version: impl Into<String>) -> WorkerHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(WorkerState::Waiting);

    let router = CacheRouter::new(Arc::clone(engine.storage()), engine.keys().clone());
    let worker = Self {
      engine: Arc::new(engine),
      router,
      version: version.into(),
      state: state_tx,
      keep_alive: JoinSet::new(),
    };
    tokio::spawn(worker.run(rx));

    WorkerHandle::new(tx, state_rx)
  }

  async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Inbound>) {
    loop {
      tokio::select! {
        Some(inbound) = rx.recv() => {
          if let Some(reply) = self.handle(inbound) {
            rx.close();
            self.drain().await;
            let _ = reply.send(());
            return;
          }
        }
        Some(_) = self.keep_alive.join_next(), if !self.keep_alive.is_empty() => {}
        else => break,
      }
    }

    self.drain().await;
    debug!("Worker stopped");
  }

  /// Handle one inbound item; returns the reply channel on shutdown.
  fn handle(&mut self, inbound: Inbound) -> Option<oneshot::Sender<()>> {
    match inbound {
      Inbound::Message { message, port } => self.handle_message(message, port),
      Inbound::Fetch { request, reply } => {
        let _ = reply.send(self.router.handle(&request));
      }
      Inbound::Shutdown { reply } => return Some(reply),
    }
    None
  }

  fn handle_message(&mut self, message: WorkerMessage, port: Option<MessagePort>) {
    match message {
      WorkerMessage::CacheEntriesWithProgress { payload } => {
        info!(
          count = payload.entries_to_cache.len(),
          "Caching entries from the foreground"
        );
        self.start_job(payload.entries_to_cache, port);
      }
      WorkerMessage::SkipWaiting => {
        info!("Skipping waiting, activating worker");
        self.state.send_replace(WorkerState::Active);
      }
      WorkerMessage::GetVersionInfo => {
        info!("Got version info request");
        match port {
          Some(port) => {
            port.post_message(&version_info(&self.version));
          }
          None => warn!("Version info requested without a reply port"),
        }
      }
    }
  }

  fn start_job(&mut self, entries: Vec<CacheEntry>, port: Option<MessagePort>) {
    let engine = Arc::clone(&self.engine);

    self.keep_alive.spawn(async move {
      let (events_tx, mut events_rx) = mpsc::unbounded_channel();
      let forward = async {
        while let Some(event) = events_rx.recv().await {
          if let Some(port) = &port {
            port.post_message(&ProgressMessage::from(event));
          }
        }
      };
      tokio::join!(engine.run(entries, events_tx), forward);
    });
  }

  async fn drain(&mut self) {
    while let Some(result) = self.keep_alive.join_next().await {
      if let Err(e) = result {
        warn!("Caching job panicked: {}", e);
      }
    }
  }
}

/// Version string reported to the foreground: `<version> hash: <build hash>`.
pub fn version_info(version: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(env!("CARGO_PKG_NAME").as_bytes());
  hasher.update(env!("CARGO_PKG_VERSION").as_bytes());
  hasher.update(version.as_bytes());
  let hash = hex::encode(hasher.finalize());

  format!("{} hash: {}", version, &hash[..12])
}
