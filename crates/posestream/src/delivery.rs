//! Delivery of landmark sequences to the host
//!
//! The host listens on an [`EventStream`] with at most one subscriber. Every
//! sequence, whichever thread produced it, is funneled through the
//! [`Dispatcher`] onto the single "pose-delivery" thread before the
//! subscriber sees it. Nothing flows back: a slow or absent subscriber never
//! throttles the pipeline. The queue holds at most [`DELIVERY_QUEUE_DEPTH`]
//! sequences; when a stalled subscriber lets it fill up, the oldest queued
//! sequence is dropped so the newest result always gets through.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::error::Result;
use crate::tracing::prefix;
use crate::types::FlatLandmarkSequence;

/// Name of the thread every subscriber call runs on.
pub const DELIVERY_THREAD_NAME: &str = "pose-delivery";

/// Sequences waiting for the subscriber before the oldest is dropped.
pub const DELIVERY_QUEUE_DEPTH: usize = 8;

/// Host-side subscriber.
pub trait EventSink: Send + Sync {
    fn send(&self, landmarks: FlatLandmarkSequence);
}

impl<F> EventSink for F
where
    F: Fn(FlatLandmarkSequence) + Send + Sync,
{
    fn send(&self, landmarks: FlatLandmarkSequence) {
        self(landmarks)
    }
}

/// Single-subscriber outbound stream.
#[derive(Clone, Default)]
pub struct EventStream {
    sink: Arc<RwLock<Option<Arc<dyn EventSink>>>>,
}

impl EventStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the subscriber, replacing any previous one.
    pub fn listen(&self, sink: impl EventSink + 'static) {
        *self.sink.write() = Some(Arc::new(sink));
        debug!("{} Host subscribed", prefix::DELIVERY);
    }

    pub fn cancel(&self) {
        if self.sink.write().take().is_some() {
            debug!("{} Host unsubscribed", prefix::DELIVERY);
        }
    }

    pub fn is_listening(&self) -> bool {
        self.sink.read().is_some()
    }

    /// Hand `landmarks` to the subscriber, if any. Returns whether one was
    /// listening. The slot lock is not held during the call.
    pub fn emit(&self, landmarks: FlatLandmarkSequence) -> bool {
        let sink = self.sink.read().clone();
        match sink {
            Some(sink) => {
                sink.send(landmarks);
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("listening", &self.is_listening())
            .finish()
    }
}

/// Handle onto the delivery thread. Cheap to clone; the thread exits once
/// every handle is dropped.
#[derive(Clone)]
pub struct Dispatcher {
    tx: Sender<FlatLandmarkSequence>,
    // Eviction handle for the oldest queued sequence
    backlog: Receiver<FlatLandmarkSequence>,
    stream: EventStream,
}

impl Dispatcher {
    /// Start the delivery thread for `stream`.
    pub fn spawn(stream: EventStream) -> Result<Self> {
        let (tx, rx) = bounded::<FlatLandmarkSequence>(DELIVERY_QUEUE_DEPTH);
        let backlog = rx.clone();
        let worker_stream = stream.clone();

        thread::Builder::new()
            .name(DELIVERY_THREAD_NAME.to_string())
            .spawn(move || {
                for landmarks in rx {
                    let count = landmarks.landmark_count();
                    if worker_stream.emit(landmarks) {
                        trace!("{} Delivered {} landmarks", prefix::DELIVERY, count);
                    } else {
                        trace!("{} No subscriber, sequence dropped", prefix::DELIVERY);
                    }
                }
                debug!("{} Delivery thread stopped", prefix::DELIVERY);
            })?;

        Ok(Self {
            tx,
            backlog,
            stream,
        })
    }

    /// Queue `landmarks` for the delivery thread. Never blocks; a full
    /// queue loses its oldest sequence instead.
    pub fn deliver(&self, landmarks: FlatLandmarkSequence) {
        let mut pending = landmarks;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    if self.backlog.try_recv().is_ok() {
                        debug!(
                            "{} Subscriber is behind, oldest sequence dropped",
                            prefix::DELIVERY
                        );
                    }
                    pending = back;
                }
                Err(TrySendError::Disconnected(_)) => {
                    debug!("{} Delivery thread gone, sequence dropped", prefix::DELIVERY);
                    return;
                }
            }
        }
    }

    pub fn stream(&self) -> &EventStream {
        &self.stream
    }
}
