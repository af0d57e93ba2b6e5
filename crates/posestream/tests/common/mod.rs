//! Shared test doubles: a hand-driven camera and a scripted model.

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use posestream::{
    BindRequest, CameraError, CameraFacing, CameraFrame, CameraProvider, Delegate,
    DetectionResult, EngineError, FrameSink, Landmark, LandmarkRunner, ModelAsset, ModelLoader,
    Rotation,
};
use image::RgbaImage;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Poll `condition` until it holds or the timeout expires.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// A 2x2 frame whose red channel carries `tag`.
pub fn tagged_frame(tag: u8) -> CameraFrame {
    CameraFrame::new(2, 2, Rotation::Deg0, [tag, 0, 0, 255].repeat(4))
}

/// Camera driven by the test: frames go to whichever sink was bound last.
#[derive(Default)]
pub struct ManualCamera {
    sink: Mutex<Option<FrameSink>>,
    binds: Mutex<Vec<CameraFacing>>,
    unbinds: Mutex<usize>,
    unavailable: Mutex<Vec<CameraFacing>>,
}

impl ManualCamera {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn make_unavailable(&self, facing: CameraFacing) {
        self.unavailable.lock().push(facing);
    }

    /// Deliver a frame; returns false when nothing is bound.
    pub fn push(&self, frame: CameraFrame) -> bool {
        let sink = self.sink.lock().clone();
        match sink {
            Some(sink) => {
                sink.offer(frame);
                true
            }
            None => false,
        }
    }

    pub fn binds(&self) -> Vec<CameraFacing> {
        self.binds.lock().clone()
    }

    pub fn unbinds(&self) -> usize {
        *self.unbinds.lock()
    }

    pub fn is_bound(&self) -> bool {
        self.sink.lock().is_some()
    }
}

impl CameraProvider for ManualCamera {
    fn bind(&self, request: BindRequest) -> Result<(), CameraError> {
        assert_eq!(
            (request.target_width, request.target_height),
            (480, 640),
            "analysis resolution"
        );
        if self.unavailable.lock().contains(&request.facing) {
            return Err(CameraError::FacingUnavailable(request.facing));
        }
        self.binds.lock().push(request.facing);
        *self.sink.lock() = Some(request.sink);
        Ok(())
    }

    fn unbind_all(&self) {
        *self.unbinds.lock() += 1;
        self.sink.lock().take();
    }
}

/// Model whose output is fully controlled by the test.
///
/// Each result has one landmark at `x`, with `y` set to the red value of the
/// frame's first pixel so deliveries can be traced back to frames.
pub struct ScriptedLoader {
    failing: Vec<Delegate>,
    load_delay: Duration,
    x: f32,
    empty: bool,
    gate: Option<Receiver<()>>,
    loads: Mutex<Vec<Delegate>>,
}

impl ScriptedLoader {
    pub fn new() -> Self {
        Self {
            failing: Vec::new(),
            load_delay: Duration::ZERO,
            x: 0.3,
            empty: false,
            gate: None,
            loads: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(mut self, delegate: Delegate) -> Self {
        self.failing.push(delegate);
        self
    }

    pub fn load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn empty_results(mut self) -> Self {
        self.empty = true;
        self
    }

    /// Every inference waits for one token on the returned sender.
    pub fn gated(mut self) -> (Self, Sender<()>) {
        let (tx, rx) = unbounded();
        self.gate = Some(rx);
        (self, tx)
    }

    pub fn loads(&self) -> Vec<Delegate> {
        self.loads.lock().clone()
    }
}

impl ModelLoader for ScriptedLoader {
    fn load(
        &self,
        _asset: &ModelAsset,
        delegate: Delegate,
    ) -> Result<Box<dyn LandmarkRunner>, EngineError> {
        self.loads.lock().push(delegate);
        if !self.load_delay.is_zero() {
            thread::sleep(self.load_delay);
        }
        if self.failing.contains(&delegate) {
            return Err(EngineError::DelegateUnsupported(delegate));
        }
        Ok(Box::new(ScriptedRunner {
            x: self.x,
            empty: self.empty,
            gate: self.gate.clone(),
        }))
    }
}

struct ScriptedRunner {
    x: f32,
    empty: bool,
    gate: Option<Receiver<()>>,
}

impl LandmarkRunner for ScriptedRunner {
    fn infer(&mut self, image: &RgbaImage) -> Result<DetectionResult, EngineError> {
        if let Some(gate) = &self.gate {
            gate.recv_timeout(TIMEOUT)
                .map_err(|_| EngineError::Inference("gate timed out".to_string()))?;
        }
        if self.empty {
            return Ok(DetectionResult::empty());
        }
        let tag = image.get_pixel(0, 0).0[0] as f32;
        Ok(DetectionResult::single(vec![Landmark::new(self.x, tag, 0.0, 0.8)]))
    }
}
