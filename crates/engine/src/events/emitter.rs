//! Event emitter
//!
//! Renders event text from templates, stamps a sequence number and hands the
//! event to a background delivery task feeding the [`AuditSink`]. Emission
//! never waits on the sink; the delivery task drains a single queue, so the
//! sink sees events in emission order.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use super::event::EventDraft;
use super::{AuditSink, Event, EventTemplates};

enum Delivery {
    Event(Event),
    Flush(oneshot::Sender<()>),
}

struct Outbox {
    next_sequence: u64,
    tx: mpsc::UnboundedSender<Delivery>,
}

struct EmitterInner {
    templates: EventTemplates,
    outbox: Mutex<Outbox>,
    subscribers: broadcast::Sender<Event>,
    sink_name: &'static str,
}

/// Cloneable handle for emitting events
#[derive(Clone)]
pub struct EventEmitter {
    inner: Arc<EmitterInner>,
}

impl EventEmitter {
    /// Create an emitter and spawn its delivery task
    ///
    /// Must be called from within a tokio runtime. `subscriber_buffer` bounds
    /// the broadcast channel used by [`subscribe`](Self::subscribe); slow
    /// subscribers lag rather than block emission.
    pub fn spawn(
        sink: Arc<dyn AuditSink>,
        templates: EventTemplates,
        subscriber_buffer: usize,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (subscribers, _) = broadcast::channel(subscriber_buffer.max(1));
        let sink_name = sink.name();

        tokio::spawn(deliver(rx, sink));

        Self {
            inner: Arc::new(EmitterInner {
                templates,
                outbox: Mutex::new(Outbox {
                    next_sequence: 1,
                    tx,
                }),
                subscribers,
                sink_name,
            }),
        }
    }

    /// Render and emit an event, returning the emitted record
    pub(crate) fn emit(
        &self,
        draft: EventDraft,
        template: &str,
        values: minijinja::Value,
    ) -> Event {
        let status_text = match self.inner.templates.render(template, values) {
            Ok(text) => text,
            Err(err) => {
                warn!(template, error = %err, "Failed to render event template");
                template.to_string()
            }
        };

        let (progress_current, progress_total) = match draft.progress {
            Some((current, total)) => (Some(current), Some(total)),
            None => (None, None),
        };

        let mut outbox = self.inner.outbox.lock();
        let event = Event {
            sequence: outbox.next_sequence,
            level: draft.level,
            event_type: draft.event_type,
            work_order_uri: draft.work_order,
            worker_uri: draft.worker,
            step: draft.step,
            phase: draft.phase,
            status_text,
            progress_current,
            progress_total,
            error_kind: draft.error_kind,
            details: draft.details,
            emitted_at: Utc::now(),
        };
        outbox.next_sequence += 1;

        if outbox.tx.send(Delivery::Event(event.clone())).is_err() {
            debug!(sink = self.inner.sink_name, "Event delivery task has stopped");
        }
        drop(outbox);

        let _ = self.inner.subscribers.send(event.clone());
        event
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.subscribers.subscribe()
    }

    /// Wait until every event emitted so far has been handed to the sink
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        let sent = self.inner.outbox.lock().tx.send(Delivery::Flush(ack_tx));
        if sent.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Number of events emitted so far
    pub fn emitted_count(&self) -> u64 {
        self.inner.outbox.lock().next_sequence - 1
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sink", &self.inner.sink_name)
            .field("emitted", &self.emitted_count())
            .finish()
    }
}

async fn deliver(mut rx: mpsc::UnboundedReceiver<Delivery>, sink: Arc<dyn AuditSink>) {
    while let Some(delivery) = rx.recv().await {
        match delivery {
            Delivery::Event(event) => {
                let sequence = event.sequence;
                if let Err(e) = sink.record(event).await {
                    warn!(
                        sink = sink.name(),
                        sequence,
                        error = %e,
                        "Failed to record event"
                    );
                }
            }
            Delivery::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!(sink = sink.name(), "Event delivery loop exited");
}
