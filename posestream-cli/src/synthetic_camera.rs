//! Camera stand-in that renders frames on its own thread.
//!
//! Frames come out sensor-oriented (landscape, rotated 90°) like a phone's
//! back camera, so the preparer's rotation path is exercised.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use posestream::{BindRequest, CameraError, CameraFrame, CameraProvider, FrameSink, Rotation};
use tokio::sync::Notify;
use tracing::{debug, info};

struct Generator {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct SyntheticCamera {
    interval: Duration,
    /// Stop after this many frames in total (0 = never)
    frame_limit: u64,
    produced: Arc<AtomicU64>,
    finished: Arc<Notify>,
    generator: Mutex<Option<Generator>>,
}

impl SyntheticCamera {
    pub fn new(fps: u32, frame_limit: u64) -> Self {
        Self {
            interval: Duration::from_secs_f64(1.0 / fps.max(1) as f64),
            frame_limit,
            produced: Arc::new(AtomicU64::new(0)),
            finished: Arc::new(Notify::new()),
            generator: Mutex::new(None),
        }
    }

    /// Notified once the frame limit has been reached.
    pub fn finished(&self) -> Arc<Notify> {
        self.finished.clone()
    }

    pub fn produced(&self) -> u64 {
        self.produced.load(Ordering::Relaxed)
    }
}

impl CameraProvider for SyntheticCamera {
    fn bind(&self, request: BindRequest) -> Result<(), CameraError> {
        self.unbind_all();

        let running = Arc::new(AtomicBool::new(true));
        let worker = FrameLoop {
            sink: request.sink,
            // Sensor is landscape; the frame needs a 90° turn to be upright
            width: request.target_height,
            height: request.target_width,
            interval: self.interval,
            frame_limit: self.frame_limit,
            produced: self.produced.clone(),
            finished: self.finished.clone(),
            running: running.clone(),
        };

        let handle = thread::Builder::new()
            .name("synthetic-camera".to_string())
            .spawn(move || worker.run())
            .map_err(|e| CameraError::BindFailed(e.to_string()))?;

        info!(
            "Synthetic {} camera streaming {}x{}",
            request.facing, request.target_width, request.target_height
        );
        *self.generator.lock() = Some(Generator { running, handle });
        Ok(())
    }

    fn unbind_all(&self) {
        let generator = self.generator.lock().take();
        if let Some(generator) = generator {
            generator.running.store(false, Ordering::SeqCst);
            let _ = generator.handle.join();
            debug!("Synthetic camera unbound");
        }
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.unbind_all();
    }
}

struct FrameLoop {
    sink: FrameSink,
    width: u32,
    height: u32,
    interval: Duration,
    frame_limit: u64,
    produced: Arc<AtomicU64>,
    finished: Arc<Notify>,
    running: Arc<AtomicBool>,
}

impl FrameLoop {
    fn run(self) {
        while self.running.load(Ordering::SeqCst) && self.sink.is_open() {
            let index = self.produced.fetch_add(1, Ordering::Relaxed);
            if self.frame_limit > 0 && index >= self.frame_limit {
                self.finished.notify_one();
                break;
            }

            self.sink.offer(CameraFrame::new(
                self.width,
                self.height,
                Rotation::Deg90,
                render(self.width, self.height, index),
            ));
            thread::sleep(self.interval);
        }
    }
}

/// Diagonal gradient that drifts with the frame index.
fn render(width: u32, height: u32, index: u64) -> Vec<u8> {
    let shift = (index % 256) as u32;
    let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        for x in 0..width {
            let v = ((x + y + shift) % 256) as u8;
            pixels.extend_from_slice(&[v, 255 - v, 128, 255]);
        }
    }
    pixels
}
