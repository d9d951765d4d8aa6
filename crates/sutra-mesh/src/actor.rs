// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, warn};

use sutra_config::MeshConfig;

use crate::envelope::{Envelope, EnvelopeKind, Priority};
use crate::mailbox::Mailbox;

// ─── Errors & events ──────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("actor already exists: {0}")]
    DuplicateActor(String),
    #[error("unknown actor: {0}")]
    UnknownActor(String),
    #[error("mailbox full for actor: {0}")]
    MailboxFull(String),
    #[error("ask timed out")]
    Timeout,
    #[error("actor stopped: {0}")]
    ActorStopped(String),
    #[error("actor system is shut down")]
    SystemShutdown,
}

/// Best-effort lifecycle notifications.  The sink is a plain callback; it
/// must not block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshEvent {
    ActorSpawned(String),
    ActorStopped(String),
    PeerDiscovered(String),
    PeerLost(String),
}

pub type EventSink = Arc<dyn Fn(MeshEvent) + Send + Sync>;

// ─── Behaviors ────────────────────────────────────────────────────────────────

/// A stateless actor behavior: invoked once per envelope, serialized per
/// actor.  State lives in whatever the closure captures.
pub type Behavior =
    Arc<dyn Fn(Envelope, ActorContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`Behavior`].
pub fn behavior<F, Fut>(f: F) -> Behavior
where
    F: Fn(Envelope, ActorContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |envelope, ctx| Box::pin(f(envelope, ctx)))
}

#[derive(Default)]
pub struct SpawnOptions {
    pub expertise: Vec<String>,
    /// Per-actor mailbox bound; falls back to the mesh-wide default.
    pub mailbox_max: Option<usize>,
}

/// Handle returned by `spawn`; purely informational.
#[derive(Debug, Clone)]
pub struct ActorRef {
    pub id: String,
}

// ─── System internals ─────────────────────────────────────────────────────────

struct ActorCell {
    behavior: Behavior,
    mailbox: Mailbox,
    busy: bool,
    #[allow(dead_code)]
    expertise: Vec<String>,
}

struct PendingAsk {
    target: String,
    tx: oneshot::Sender<Envelope>,
}

struct Inner {
    cfg: MeshConfig,
    actors: Mutex<HashMap<String, ActorCell>>,
    /// Stable round-robin order; `actors`' hash order would starve unluckily
    /// hashed ids.
    order: Mutex<Vec<String>>,
    pending: Mutex<HashMap<String, PendingAsk>>,
    topics: Mutex<HashMap<String, HashSet<String>>>,
    notify: Notify,
    shutdown: AtomicBool,
    sink: Option<EventSink>,
}

impl Inner {
    fn emit(&self, event: MeshEvent) {
        if let Some(sink) = &self.sink {
            sink(event);
        }
    }
}

/// Cooperative actor system.
///
/// A single dispatcher task round-robins over actors with queued envelopes
/// and launches at most one behavior invocation per actor at a time, so no
/// actor ever observes concurrent invocation of its own behavior and no
/// actor with pending work is starved.
pub struct ActorSystem {
    inner: Arc<Inner>,
}

impl ActorSystem {
    pub fn new(cfg: MeshConfig) -> Self {
        Self::with_event_sink(cfg, None)
    }

    pub fn with_event_sink(cfg: MeshConfig, sink: Option<EventSink>) -> Self {
        let inner = Arc::new(Inner {
            cfg,
            actors: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
            pending: Mutex::new(HashMap::new()),
            topics: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            shutdown: AtomicBool::new(false),
            sink,
        });
        tokio::spawn(run_dispatcher(inner.clone()));
        Self { inner }
    }

    /// Register a new actor.  Fails immediately on a duplicate id.
    pub fn spawn(
        &self,
        id: impl Into<String>,
        behavior: Behavior,
        opts: SpawnOptions,
    ) -> Result<ActorRef, MeshError> {
        if self.inner.shutdown.load(Ordering::SeqCst) {
            return Err(MeshError::SystemShutdown);
        }
        let id = id.into();
        {
            let mut actors = self.inner.actors.lock().unwrap();
            if actors.contains_key(&id) {
                return Err(MeshError::DuplicateActor(id));
            }
            let max = opts.mailbox_max.unwrap_or(self.inner.cfg.max_mailbox_size);
            actors.insert(
                id.clone(),
                ActorCell {
                    behavior,
                    mailbox: Mailbox::new(max),
                    busy: false,
                    expertise: opts.expertise,
                },
            );
            self.inner.order.lock().unwrap().push(id.clone());
        }
        self.inner.emit(MeshEvent::ActorSpawned(id.clone()));
        self.inner.emit(MeshEvent::PeerDiscovered(id.clone()));
        self.inner.notify.notify_one();
        Ok(ActorRef { id })
    }

    /// Fire-and-forget send.  Dropped silently when the recipient is unknown
    /// or its mailbox is full — back-pressure without a signal.
    pub fn tell(
        &self,
        from: impl Into<String>,
        to: impl Into<String>,
        payload: Value,
        priority: Option<Priority>,
    ) {
        let mut envelope = Envelope::tell(from, to, payload).with_ttl(self.inner.cfg.default_ttl_ms);
        if let Some(p) = priority {
            envelope = envelope.with_priority(p);
        }
        if let Err(e) = route(&self.inner, envelope) {
            debug!(error = %e, "tell dropped");
        }
    }

    /// One-shot request/response.  Resolves with the reply envelope whose
    /// correlation id matches; any other reply is discarded.
    pub async fn ask(
        &self,
        from: impl Into<String>,
        to: impl Into<String>,
        payload: Value,
        timeout_ms: Option<u64>,
    ) -> Result<Envelope, MeshError> {
        let to = to.into();
        if !self.inner.actors.lock().unwrap().contains_key(&to) {
            return Err(MeshError::UnknownActor(to));
        }
        let correlation = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().unwrap().insert(
            correlation.clone(),
            PendingAsk {
                target: to.clone(),
                tx,
            },
        );

        let envelope = Envelope::new(from, to.clone(), EnvelopeKind::Ask, payload)
            .with_ttl(self.inner.cfg.default_ttl_ms)
            .with_correlation(correlation.clone());
        if let Err(e) = route(&self.inner, envelope) {
            self.inner.pending.lock().unwrap().remove(&correlation);
            return Err(e);
        }

        let timeout = timeout_ms.unwrap_or(self.inner.cfg.default_ask_timeout_ms);
        match tokio::time::timeout(Duration::from_millis(timeout), rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(MeshError::ActorStopped(to)),
            Err(_) => {
                self.inner.pending.lock().unwrap().remove(&correlation);
                Err(MeshError::Timeout)
            }
        }
    }

    /// Enqueue the payload once per other actor.
    pub fn broadcast(&self, from: impl Into<String>, payload: Value) {
        let from = from.into();
        let ids: Vec<String> = self.inner.order.lock().unwrap().clone();
        for id in ids {
            if id != from {
                self.tell(from.clone(), id, payload.clone(), None);
            }
        }
    }

    /// Deliver the payload to every subscriber of `topic`.
    pub fn publish(&self, from: impl Into<String>, topic: &str, payload: Value) {
        let from = from.into();
        let subscribers: Vec<String> = self
            .inner
            .topics
            .lock()
            .unwrap()
            .get(topic)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        for id in subscribers {
            if id == from {
                continue;
            }
            let envelope = Envelope::tell(from.clone(), id, payload.clone())
                .with_ttl(self.inner.cfg.default_ttl_ms)
                .with_topic(topic);
            if let Err(e) = route(&self.inner, envelope) {
                debug!(error = %e, "publish dropped");
            }
        }
    }

    pub fn subscribe(&self, actor_id: impl Into<String>, topic: impl Into<String>) {
        self.inner
            .topics
            .lock()
            .unwrap()
            .entry(topic.into())
            .or_default()
            .insert(actor_id.into());
    }

    pub fn unsubscribe(&self, actor_id: &str, topic: &str) {
        let mut topics = self.inner.topics.lock().unwrap();
        if let Some(set) = topics.get_mut(topic) {
            set.remove(actor_id);
            if set.is_empty() {
                topics.remove(topic);
            }
        }
    }

    /// Remove an actor; its mailbox is deleted and in-flight asks targeting
    /// it reject.  Returns `false` when the actor was not present.
    pub fn stop(&self, id: &str) -> bool {
        let removed = self.inner.actors.lock().unwrap().remove(id).is_some();
        if removed {
            self.inner.order.lock().unwrap().retain(|a| a != id);
            self.inner
                .pending
                .lock()
                .unwrap()
                .retain(|_, p| p.target != id);
            self.inner
                .topics
                .lock()
                .unwrap()
                .values_mut()
                .for_each(|set| {
                    set.remove(id);
                });
            self.inner.emit(MeshEvent::ActorStopped(id.to_string()));
            self.inner.emit(MeshEvent::PeerLost(id.to_string()));
            self.inner.notify.notify_one();
        }
        removed
    }

    /// Stop every actor and cancel pending asks.  Idempotent.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        let ids: Vec<String> = self.inner.order.lock().unwrap().drain(..).collect();
        self.inner.actors.lock().unwrap().clear();
        self.inner.pending.lock().unwrap().clear();
        self.inner.topics.lock().unwrap().clear();
        for id in ids {
            self.inner.emit(MeshEvent::ActorStopped(id.clone()));
            self.inner.emit(MeshEvent::PeerLost(id));
        }
        self.inner.notify.notify_one();
    }

    pub fn actor_count(&self) -> usize {
        self.inner.actors.lock().unwrap().len()
    }

    /// Re-route an existing envelope (forwarding path).  Unlike `tell` this
    /// surfaces delivery failures to the caller.
    pub fn route(&self, envelope: Envelope) -> Result<(), MeshError> {
        route(&self.inner, envelope)
    }
}

/// Deliver an envelope into the recipient's mailbox.
///
/// Extends the hop list; an envelope that has already visited the recipient
/// is dropped (returns `Ok` — loop protection is not a delivery failure).
fn route(inner: &Inner, mut envelope: Envelope) -> Result<(), MeshError> {
    let to = envelope.to.clone();
    if !envelope.record_hop(&to) {
        debug!(envelope = %envelope.id, actor = %to, "routing loop, envelope dropped");
        return Ok(());
    }
    {
        let mut actors = inner.actors.lock().unwrap();
        let cell = actors
            .get_mut(&to)
            .ok_or_else(|| MeshError::UnknownActor(to.clone()))?;
        if !cell.mailbox.push(envelope) {
            return Err(MeshError::MailboxFull(to));
        }
    }
    inner.notify.notify_one();
    Ok(())
}

/// Resolve a reply envelope against the pending-ask table; non-matching
/// replies are discarded.
fn resolve_reply(inner: &Inner, envelope: Envelope) {
    let Some(correlation) = envelope.correlation_id.clone() else {
        return;
    };
    let pending = inner.pending.lock().unwrap().remove(&correlation);
    if let Some(p) = pending {
        // The asker may have timed out already; that's fine.
        let _ = p.tx.send(envelope);
    }
}

// ─── Dispatcher ───────────────────────────────────────────────────────────────

async fn run_dispatcher(inner: Arc<Inner>) {
    let mut rr = 0usize;
    loop {
        if inner.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match next_work(&inner, &mut rr) {
            Some((id, behavior, envelope)) => {
                let ctx = ActorContext {
                    inner: inner.clone(),
                    actor_id: id.clone(),
                    sender: envelope.from.clone(),
                    correlation: envelope.correlation_id.clone(),
                };
                let done = inner.clone();
                tokio::spawn(async move {
                    // A behavior error is isolated: logged, never fatal to
                    // the dispatcher or the actor's mailbox.
                    if let Err(e) = (behavior)(envelope, ctx).await {
                        warn!(actor = %id, error = %e, "actor behavior failed");
                    }
                    if let Some(cell) = done.actors.lock().unwrap().get_mut(&id) {
                        cell.busy = false;
                    }
                    done.notify.notify_one();
                });
            }
            None => inner.notify.notified().await,
        }
    }
}

/// Round-robin pick: the first idle actor (starting after the last served)
/// with a non-expired envelope queued.
fn next_work(inner: &Inner, rr: &mut usize) -> Option<(String, Behavior, Envelope)> {
    let order = inner.order.lock().unwrap().clone();
    if order.is_empty() {
        return None;
    }
    let mut actors = inner.actors.lock().unwrap();
    for k in 0..order.len() {
        let idx = (*rr + k) % order.len();
        let id = &order[idx];
        let Some(cell) = actors.get_mut(id) else {
            continue;
        };
        if cell.busy {
            continue;
        }
        if let Some(envelope) = cell.mailbox.pop() {
            cell.busy = true;
            *rr = (idx + 1) % order.len();
            return Some((id.clone(), cell.behavior.clone(), envelope));
        }
    }
    None
}

// ─── Actor context ────────────────────────────────────────────────────────────

/// Capabilities handed to a behavior for the duration of one envelope.
#[derive(Clone)]
pub struct ActorContext {
    inner: Arc<Inner>,
    pub actor_id: String,
    /// The envelope's sender.
    pub sender: String,
    correlation: Option<String>,
}

impl ActorContext {
    /// Answer the current ask.  No-op for tell envelopes; a reply whose
    /// correlation no longer has a waiter is discarded.
    pub fn reply(&self, payload: Value) {
        let Some(correlation) = &self.correlation else {
            return;
        };
        let envelope =
            Envelope::new(self.actor_id.clone(), self.sender.clone(), EnvelopeKind::Reply, payload)
                .with_correlation(correlation.clone());
        resolve_reply(&self.inner, envelope);
    }

    /// Fire-and-forget send to another actor.
    pub fn tell(&self, to: impl Into<String>, payload: Value, priority: Option<Priority>) {
        let mut envelope = Envelope::tell(self.actor_id.clone(), to, payload)
            .with_ttl(self.inner.cfg.default_ttl_ms);
        if let Some(p) = priority {
            envelope = envelope.with_priority(p);
        }
        if let Err(e) = route(&self.inner, envelope) {
            debug!(error = %e, "ctx.tell dropped");
        }
    }

    /// Publish to a topic from inside a behavior.
    pub fn publish(&self, topic: &str, payload: Value) {
        let subscribers: Vec<String> = self
            .inner
            .topics
            .lock()
            .unwrap()
            .get(topic)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        for id in subscribers {
            if id == self.actor_id {
                continue;
            }
            let envelope = Envelope::tell(self.actor_id.clone(), id, payload.clone())
                .with_ttl(self.inner.cfg.default_ttl_ms)
                .with_topic(topic);
            let _ = route(&self.inner, envelope);
        }
    }

    /// Swap this actor's behavior for subsequent envelopes.
    pub fn become_behavior(&self, behavior: Behavior) {
        if let Some(cell) = self.inner.actors.lock().unwrap().get_mut(&self.actor_id) {
            cell.behavior = behavior;
        }
    }

    /// Remove this actor after the current envelope completes.
    pub fn stop_self(&self) {
        let id = self.actor_id.clone();
        let removed = self.inner.actors.lock().unwrap().remove(&id).is_some();
        if removed {
            self.inner.order.lock().unwrap().retain(|a| a != &id);
            self.inner.pending.lock().unwrap().retain(|_, p| p.target != id);
            self.inner.emit(MeshEvent::ActorStopped(id.clone()));
            self.inner.emit(MeshEvent::PeerLost(id));
        }
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
