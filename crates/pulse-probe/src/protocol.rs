//! Probe protocol — query, subscribe, unsubscribe, and status fan-out.
//!
//! Every probe variant runs as its own tokio task with a mailbox of
//! [`ProbeCommand`]s. The [`StatusHub`] owns the current status and the
//! subscriber set; variants only decide *when* the status changes.
//!
//! Subscribers are death-watched: each registration spawns a small
//! watcher that waits for the subscriber's receiver to be dropped and
//! then tells the probe to forget it. Unsubscribing cancels the watcher.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

use crate::error::ProbeError;
use crate::status::{Signal, Status};

/// Identity of a subscriber, unique for the process lifetime.
pub type SubscriberId = u64;

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// An addressable recipient of status updates.
#[derive(Debug, Clone)]
pub struct Subscriber {
    id: SubscriberId,
    tx: mpsc::UnboundedSender<Status>,
}

impl Subscriber {
    /// Create a subscriber and the receiver its updates arrive on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Status>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed);
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }
}

/// Messages a probe understands.
#[derive(Debug)]
pub(crate) enum ProbeCommand {
    GetCurrent(oneshot::Sender<Status>),
    Subscribe(Subscriber),
    Unsubscribe(SubscriberId),
    SubscriberTerminated(SubscriberId),
}

/// The receiving end of a probe subscription.
///
/// The first update is always the probe's status at the time of
/// subscribing. `recv` returns `None` once the probe has terminated.
/// Dropping the subscription unregisters it.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::UnboundedReceiver<Status>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next status update.
    pub async fn recv(&mut self) -> Option<Status> {
        self.rx.recv().await
    }

    /// Take an already-delivered update without waiting.
    pub fn try_recv(&mut self) -> Option<Status> {
        self.rx.try_recv().ok()
    }
}

/// Cloneable address of a running probe.
#[derive(Debug, Clone)]
pub struct ProbeHandle {
    name: Arc<str>,
    signal: Signal,
    mailbox: mpsc::UnboundedSender<ProbeCommand>,
    /// Cancelled when the probe task exits, for any reason.
    done: CancellationToken,
    shutdown: CancellationToken,
}

impl ProbeHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signal(&self) -> Signal {
        self.signal
    }

    /// Ask the probe for its current status.
    pub async fn current(&self, timeout: Duration) -> Result<Status, ProbeError> {
        let (reply, rx) = oneshot::channel();
        self.send(ProbeCommand::GetCurrent(reply))?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(_)) => Err(ProbeError::Terminated(self.name.to_string())),
            Err(_) => Err(ProbeError::AskTimeout {
                name: self.name.to_string(),
                timeout,
            }),
        }
    }

    /// Subscribe with a fresh channel.
    pub fn subscribe(&self) -> Result<Subscription, ProbeError> {
        let (subscriber, rx) = Subscriber::channel();
        let id = subscriber.id();
        self.subscribe_with(subscriber)?;
        Ok(Subscription { id, rx })
    }

    /// Register an existing subscriber. Re-registering only resends the
    /// current status.
    pub fn subscribe_with(&self, subscriber: Subscriber) -> Result<(), ProbeError> {
        self.send(ProbeCommand::Subscribe(subscriber))
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> Result<(), ProbeError> {
        self.send(ProbeCommand::Unsubscribe(id))
    }

    pub fn is_terminated(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Resolves once the probe task has exited.
    pub async fn terminated(&self) {
        self.done.cancelled().await
    }

    /// Ask the probe to stop. Subscribers see their channel close.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    fn send(&self, command: ProbeCommand) -> Result<(), ProbeError> {
        if self.done.is_cancelled() {
            return Err(ProbeError::Terminated(self.name.to_string()));
        }
        self.mailbox
            .send(command)
            .map_err(|_| ProbeError::Terminated(self.name.to_string()))
    }
}

/// Everything a probe variant's task needs to run.
pub(crate) struct ProbeContext {
    pub name: Arc<str>,
    pub commands: mpsc::UnboundedReceiver<ProbeCommand>,
    pub hub: StatusHub,
    pub shutdown: CancellationToken,
}

/// Spawn a probe task and return its handle.
///
/// The handle's termination token fires when `run` returns or panics.
pub(crate) fn spawn_probe<F, Fut>(name: &str, signal: Signal, initial: Status, run: F) -> ProbeHandle
where
    F: FnOnce(ProbeContext) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (mailbox, commands) = mpsc::unbounded_channel();
    let name: Arc<str> = Arc::from(name);
    let done = CancellationToken::new();
    let shutdown = CancellationToken::new();

    let ctx = ProbeContext {
        name: name.clone(),
        commands,
        hub: StatusHub::new(name.clone(), initial, mailbox.clone()),
        shutdown: shutdown.clone(),
    };

    let guard = done.clone().drop_guard();
    tokio::spawn(async move {
        let _guard = guard;
        run(ctx).await;
    });

    debug!(probe = %name, %signal, "probe started");
    ProbeHandle {
        name,
        signal,
        mailbox,
        done,
        shutdown,
    }
}

/// Run the bare protocol until shutdown. Used by probes whose status
/// only changes from outside the mailbox.
pub(crate) async fn serve(mut ctx: ProbeContext) {
    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            Some(command) = ctx.commands.recv() => ctx.hub.handle(command),
        }
    }
    debug!(probe = %ctx.name, "probe stopped");
}

struct Watched {
    tx: mpsc::UnboundedSender<Status>,
    _watch: DropGuard,
}

/// Current status plus the subscriber set of one probe.
///
/// Only the owning probe task touches it, so no locking is needed.
pub(crate) struct StatusHub {
    name: Arc<str>,
    current: Status,
    subscribers: HashMap<SubscriberId, Watched>,
    mailbox: mpsc::UnboundedSender<ProbeCommand>,
}

impl StatusHub {
    fn new(name: Arc<str>, current: Status, mailbox: mpsc::UnboundedSender<ProbeCommand>) -> Self {
        Self {
            name,
            current,
            subscribers: HashMap::new(),
            mailbox,
        }
    }

    pub fn current(&self) -> &Status {
        &self.current
    }

    pub fn handle(&mut self, command: ProbeCommand) {
        match command {
            ProbeCommand::GetCurrent(reply) => {
                let _ = reply.send(self.current.clone());
            }
            ProbeCommand::Subscribe(subscriber) => self.subscribe(subscriber),
            ProbeCommand::Unsubscribe(id) => self.remove(id, "unsubscribed"),
            ProbeCommand::SubscriberTerminated(id) => self.remove(id, "terminated"),
        }
    }

    /// Replace the current status and push it to every subscriber.
    pub fn publish(&mut self, status: Status) {
        self.current = status;
        let current = &self.current;
        // A failed send means the subscriber is gone; its watcher will
        // report the same, removing it here just saves a turn.
        self.subscribers
            .retain(|_, watched| watched.tx.send(current.clone()).is_ok());
        debug!(
            probe = %self.name,
            up = self.current.up,
            message = %self.current.message,
            subscribers = self.subscribers.len(),
            "status published"
        );
    }

    /// Publish only if `status` differs from the current one.
    pub fn transition(&mut self, status: Status) -> bool {
        if status == self.current {
            return false;
        }
        self.publish(status);
        true
    }

    fn subscribe(&mut self, subscriber: Subscriber) {
        let id = subscriber.id;
        if let Some(existing) = self.subscribers.get(&id) {
            let _ = existing.tx.send(self.current.clone());
            return;
        }

        let _ = subscriber.tx.send(self.current.clone());

        let watch = CancellationToken::new();
        let cancelled = watch.clone();
        let tx = subscriber.tx.clone();
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tx.closed() => {
                    let _ = mailbox.send(ProbeCommand::SubscriberTerminated(id));
                }
                _ = cancelled.cancelled() => {}
            }
        });

        self.subscribers.insert(
            id,
            Watched {
                tx: subscriber.tx,
                _watch: watch.drop_guard(),
            },
        );
        debug!(probe = %self.name, subscriber = id, "subscriber added");
    }

    fn remove(&mut self, id: SubscriberId, reason: &str) {
        if self.subscribers.remove(&id).is_some() {
            debug!(probe = %self.name, subscriber = id, reason, "subscriber removed");
        }
    }

    #[cfg(test)]
    pub fn subscriber_ids(&self) -> Vec<SubscriberId> {
        let mut ids: Vec<_> = self.subscribers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
