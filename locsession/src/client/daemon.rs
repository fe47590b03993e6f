//! The serializing message loop task.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::state::{ClientCore, Command};

/// The location client's message loop.
///
/// Owns all session state. API operations, worker continuations and
/// inbound engine messages are executed one at a time, in arrival order.
///
/// ```text
///  LocationClient ──► api queue (bounded) ───────┐
///  workers ─────────► continuations ─────────────┼──► ClientCore
///  transport ──► inbound reader ──► continuations┘
/// ```
pub struct ClientDaemon {
    core: ClientCore,
    api_rx: mpsc::Receiver<Command>,
    internal_rx: mpsc::UnboundedReceiver<Command>,
    internal_tx: mpsc::UnboundedSender<Command>,
    inbound: mpsc::UnboundedReceiver<Bytes>,
}

impl ClientDaemon {
    pub(super) fn new(
        core: ClientCore,
        api_rx: mpsc::Receiver<Command>,
        internal_rx: mpsc::UnboundedReceiver<Command>,
        internal_tx: mpsc::UnboundedSender<Command>,
        inbound: mpsc::UnboundedReceiver<Bytes>,
    ) -> Self {
        Self {
            core,
            api_rx,
            internal_rx,
            internal_tx,
            inbound,
        }
    }

    /// Runs until `shutdown` is cancelled or every client handle is dropped.
    pub async fn run(self, shutdown: CancellationToken) {
        let Self {
            mut core,
            mut api_rx,
            mut internal_rx,
            internal_tx,
            inbound,
        } = self;

        let reader = tokio::spawn(forward_inbound(inbound, internal_tx));
        core.start();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    debug!("Shutdown requested");
                    break;
                }

                Some(command) = internal_rx.recv() => core.handle(command),

                command = api_rx.recv() => match command {
                    Some(command) => core.handle(command),
                    None => {
                        debug!("All client handles dropped");
                        break;
                    }
                },
            }
        }

        reader.abort();
        drain(core, api_rx, internal_rx).await;
    }
}

/// Shuts the core down so that every callback already handed to the loop
/// is answered exactly once.
///
/// Commands still queued on the api channel run against a core that no
/// longer talks to the engine, then worker continuations are run until no
/// worker is left. Inbound engine messages are ignored from here on.
async fn drain(
    mut core: ClientCore,
    mut api_rx: mpsc::Receiver<Command>,
    mut internal_rx: mpsc::UnboundedReceiver<Command>,
) {
    api_rx.close();
    core.begin_shutdown();

    let mut queued = 0usize;
    while let Ok(command) = api_rx.try_recv() {
        if let Command::Run(job) = command {
            queued += 1;
            job(&mut core);
        }
    }
    if queued > 0 {
        debug!(queued, "Ran operations queued at shutdown");
    }

    while core.has_workers() {
        match internal_rx.recv().await {
            Some(Command::Run(job)) => job(&mut core),
            Some(Command::Inbound(_)) => {}
            None => break,
        }
    }
    core.finish_shutdown();
}

/// Moves raw transport messages onto the loop.
async fn forward_inbound(
    mut inbound: mpsc::UnboundedReceiver<Bytes>,
    tx: mpsc::UnboundedSender<Command>,
) {
    while let Some(payload) = inbound.recv().await {
        if tx.send(Command::Inbound(payload)).is_err() {
            return;
        }
    }
    debug!("Transport inbound channel closed");
}
