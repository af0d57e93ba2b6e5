//! Camera source boundary and keep-latest frame handoff
//!
//! The platform camera is an external collaborator behind [`CameraProvider`].
//! Frames it produces land in a single-slot mailbox: a newer frame replaces
//! an older one that the analyzer has not picked up yet, and the analyzer
//! only picks up a frame once the previous detection has completed.
//!
//! Every session of a host binds the same provider through [`SharedCamera`],
//! which remembers the session that bound last. Only that session may
//! release the camera.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::frame::{CameraFrame, CapturedFrame};
use crate::stats::PipelineStats;
use crate::types::CameraFacing;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("no {0} camera available")]
    FacingUnavailable(CameraFacing),

    #[error("use case binding failed: {0}")]
    BindFailed(String),
}

/// What a session asks the camera for on every (re)bind.
#[derive(Debug, Clone)]
pub struct BindRequest {
    pub facing: CameraFacing,
    /// Target analysis width (RGBA8888)
    pub target_width: u32,
    /// Target analysis height (RGBA8888)
    pub target_height: u32,
    /// Where analysis frames go
    pub sink: FrameSink,
}

/// Platform camera. Implementations own preview + analysis use cases and may
/// finish binding asynchronously on their own thread.
pub trait CameraProvider: Send + Sync {
    /// Bind preview and analysis for `request.facing`.
    fn bind(&self, request: BindRequest) -> Result<(), CameraError>;

    /// Release every bound use case.
    fn unbind_all(&self);
}

/// Identifies one session's claim on a [`SharedCamera`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindOwner(u64);

/// Provider shared by all sessions, with the current bind owner.
#[derive(Clone)]
pub struct SharedCamera {
    provider: Arc<dyn CameraProvider>,
    owner: Arc<Mutex<Option<BindOwner>>>,
    next_owner: Arc<AtomicU64>,
}

impl SharedCamera {
    pub fn new(provider: Arc<dyn CameraProvider>) -> Self {
        Self {
            provider,
            owner: Arc::new(Mutex::new(None)),
            next_owner: Arc::new(AtomicU64::new(1)),
        }
    }

    pub(crate) fn register(&self) -> BindOwner {
        BindOwner(self.next_owner.fetch_add(1, Ordering::Relaxed))
    }

    /// Unbind whatever is bound, then bind for `owner`. Ownership is only
    /// recorded when the provider accepts the request.
    pub(crate) fn bind(&self, owner: BindOwner, request: BindRequest) -> Result<(), CameraError> {
        let mut current = self.owner.lock();
        self.provider.unbind_all();
        *current = None;
        self.provider.bind(request)?;
        *current = Some(owner);
        Ok(())
    }

    /// Unbind only if `owner` made the last successful bind. Returns whether
    /// the camera was released.
    pub(crate) fn release(&self, owner: BindOwner) -> bool {
        let mut current = self.owner.lock();
        if *current != Some(owner) {
            return false;
        }
        self.provider.unbind_all();
        *current = None;
        true
    }

    pub fn owner(&self) -> Option<BindOwner> {
        *self.owner.lock()
    }
}

impl std::fmt::Debug for SharedCamera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedCamera")
            .field("owner", &self.owner())
            .finish()
    }
}

/// Handle the camera pushes analysis frames into.
///
/// Each bind gets its own sink so frames carry the facing they were
/// actually captured with.
#[derive(Clone)]
pub struct FrameSink {
    slot: Arc<LatestFrameSlot>,
    facing: CameraFacing,
    stats: Arc<PipelineStats>,
}

impl FrameSink {
    pub(crate) fn new(
        slot: Arc<LatestFrameSlot>,
        facing: CameraFacing,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            slot,
            facing,
            stats,
        }
    }

    /// Hand a frame to the analyzer. Never blocks; a frame still waiting in
    /// the slot is released and replaced.
    pub fn offer(&self, frame: CameraFrame) {
        self.stats.record_received();
        match self.slot.offer(CapturedFrame {
            frame,
            facing: self.facing,
        }) {
            Offer::Accepted => {}
            Offer::Replaced => self.stats.record_replaced(),
            Offer::Closed => {}
        }
    }

    pub fn facing(&self) -> CameraFacing {
        self.facing
    }

    /// False once the owning session is disposed.
    pub fn is_open(&self) -> bool {
        !self.slot.is_closed()
    }
}

impl std::fmt::Debug for FrameSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSink")
            .field("facing", &self.facing)
            .field("open", &self.is_open())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    Accepted,
    Replaced,
    Closed,
}

#[derive(Default)]
struct SlotState {
    latest: Option<CapturedFrame>,
    in_flight: bool,
    closed: bool,
}

/// Single-slot mailbox plus the one-frame-in-flight gate.
#[derive(Default)]
pub(crate) struct LatestFrameSlot {
    state: Mutex<SlotState>,
    changed: Condvar,
}

impl LatestFrameSlot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn offer(&self, frame: CapturedFrame) -> Offer {
        let previous = {
            let mut state = self.state.lock();
            if state.closed {
                drop(state);
                drop(frame);
                return Offer::Closed;
            }
            state.latest.replace(frame)
        };
        self.changed.notify_one();

        // Release the stale frame outside the lock
        match previous {
            Some(stale) => {
                drop(stale);
                Offer::Replaced
            }
            None => Offer::Accepted,
        }
    }

    /// Block until no detection is in flight and a frame is waiting, then
    /// take it and mark a detection in flight. `None` once closed.
    pub(crate) fn next_frame(&self) -> Option<CapturedFrame> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if !state.in_flight {
                if let Some(frame) = state.latest.take() {
                    state.in_flight = true;
                    return Some(frame);
                }
            }
            self.changed.wait(&mut state);
        }
    }

    /// Clear the in-flight gate so the next waiting frame can be taken.
    pub(crate) fn finish(&self) {
        self.state.lock().in_flight = false;
        self.changed.notify_one();
    }

    /// Stop accepting frames and wake the analyzer. Any waiting frame is released.
    pub(crate) fn close(&self) {
        let pending = {
            let mut state = self.state.lock();
            state.closed = true;
            state.latest.take()
        };
        self.changed.notify_all();
        drop(pending);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}
