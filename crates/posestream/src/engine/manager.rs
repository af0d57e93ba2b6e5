//! Shared engine manager
//!
//! One instance per process, shared by handle. State, the pending preload
//! queue and the loaded model sit behind a single mutex; the active listener
//! is a separate last-writer-wins slot that is never held while a listener
//! runs.

use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use crossbeam_channel::{bounded, unbounded, Sender};
use image::RgbaImage;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::detector::{AsyncDetector, CompletionRoute};
use super::{
    Completion, Delegate, EngineState, ModelAsset, ModelLoader, PreloadCallback,
};
use crate::error::Result;
use crate::frame::FrameInfo;
use crate::tracing::prefix;

/// What the manager loads and in which delegate order.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub asset: ModelAsset,
    /// Delegates tried in order; the first that loads wins
    pub delegates: Vec<Delegate>,
}

/// Identifies one `attach_listener` registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// What happened to a frame handed to [`EngineManager::detect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectOutcome {
    /// Queued for inference; the result arrives on the active listener
    Submitted,
    /// Engine is not ready; frame dropped
    NotReady,
    /// Nobody is listening; frame dropped
    NoListener,
    /// Inference thread is gone; frame dropped
    Dropped,
}

struct ActiveListener {
    id: ListenerId,
    tx: Sender<Completion>,
}

struct Inner {
    state: EngineState,
    pending: Vec<PreloadCallback>,
    detector: Option<AsyncDetector>,
    init_attempts: u64,
}

struct Shared {
    inner: Mutex<Inner>,
    listener: RwLock<Option<ActiveListener>>,
    loader: Arc<dyn ModelLoader>,
    options: EngineOptions,
}

struct InitRequest;

/// Owner of the process-wide pose model.
pub struct EngineManager {
    shared: Arc<Shared>,
    init_tx: Sender<InitRequest>,
    next_listener: AtomicU64,
}

impl EngineManager {
    /// Create an unloaded engine and start its initialization worker.
    pub fn new(loader: Arc<dyn ModelLoader>, options: EngineOptions) -> Result<Self> {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: EngineState::Unloaded,
                pending: Vec::new(),
                detector: None,
                init_attempts: 0,
            }),
            listener: RwLock::new(None),
            loader,
            options,
        });

        let (init_tx, init_rx) = unbounded::<InitRequest>();
        let worker = shared.clone();
        thread::Builder::new()
            .name("pose-engine-init".to_string())
            .spawn(move || {
                for _ in init_rx {
                    Shared::initialize(&worker);
                }
            })?;

        Ok(Self {
            shared,
            init_tx,
            next_listener: AtomicU64::new(1),
        })
    }

    pub fn state(&self) -> EngineState {
        self.shared.inner.lock().state
    }

    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    /// Number of initialization chains started so far.
    pub fn init_attempts(&self) -> u64 {
        self.shared.inner.lock().init_attempts
    }

    /// Start loading the model if nobody has yet. Never blocks.
    pub fn preload(&self) {
        self.preload_inner(None);
    }

    /// Like [`preload`](Self::preload), calling `on_done` exactly once with
    /// the outcome. Runs immediately on the caller's thread when already
    /// ready, otherwise on the initialization worker.
    pub fn preload_with(&self, on_done: impl FnOnce(bool) + Send + 'static) {
        self.preload_inner(Some(Box::new(on_done)));
    }

    /// Preload and block the calling thread until the outcome is known.
    pub fn preload_and_wait(&self) -> bool {
        let (tx, rx) = bounded(1);
        self.preload_with(move |ok| {
            let _ = tx.send(ok);
        });
        rx.recv().unwrap_or(false)
    }

    fn preload_inner(&self, on_done: Option<PreloadCallback>) {
        let mut inner = self.shared.inner.lock();
        match inner.state {
            EngineState::Ready(_) => {
                drop(inner);
                if let Some(on_done) = on_done {
                    on_done(true);
                }
            }
            EngineState::Initializing => {
                inner.pending.extend(on_done);
            }
            EngineState::Unloaded | EngineState::Failed => {
                inner.state = EngineState::Initializing;
                inner.init_attempts += 1;
                inner.pending.extend(on_done);

                if self.init_tx.send(InitRequest).is_err() {
                    error!("{} Initialization worker is gone", prefix::ENGINE);
                    inner.state = EngineState::Failed;
                    let pending = mem::take(&mut inner.pending);
                    drop(inner);
                    for callback in pending {
                        callback(false);
                    }
                }
            }
        }
    }

    /// Make `listener` the single receiver of detection results, replacing
    /// any previous one.
    pub fn attach_listener(&self, listener: Sender<Completion>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        let previous = self
            .shared
            .listener
            .write()
            .replace(ActiveListener { id, tx: listener });
        if let Some(previous) = previous {
            debug!(
                "{} Listener {:?} replaced by {:?}",
                prefix::ENGINE,
                previous.id,
                id
            );
        }
        id
    }

    /// Clear the active listener, whoever owns it.
    pub fn detach_listener(&self) {
        self.shared.listener.write().take();
    }

    /// Clear the active listener only if it is still `id`. Returns whether it was.
    pub fn detach_listener_if(&self, id: ListenerId) -> bool {
        let mut slot = self.shared.listener.write();
        if slot.as_ref().is_some_and(|l| l.id == id) {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub fn has_listener(&self) -> bool {
        self.shared.listener.read().is_some()
    }

    /// Submit a prepared frame. Never blocks; the result arrives later on the
    /// active listener from the inference thread.
    pub fn detect(&self, image: RgbaImage, source: FrameInfo) -> DetectOutcome {
        self.submit(image, source, None)
    }

    /// Submit a frame on behalf of `listener`. The frame is dropped unless
    /// `listener` is still the active listener, and its completion carries
    /// `listener` in [`Completion::submitted_by`].
    pub fn detect_as(
        &self,
        listener: ListenerId,
        image: RgbaImage,
        source: FrameInfo,
    ) -> DetectOutcome {
        self.submit(image, source, Some(listener))
    }

    fn submit(
        &self,
        image: RgbaImage,
        source: FrameInfo,
        submitted_by: Option<ListenerId>,
    ) -> DetectOutcome {
        let inner = self.shared.inner.lock();
        let state = inner.state;
        match state {
            EngineState::Ready(_) => {}
            EngineState::Unloaded => {
                drop(inner);
                debug!(
                    "{} Frame {} dropped: model not loaded, starting preload",
                    prefix::ENGINE,
                    source.timestamp_ms
                );
                self.preload();
                return DetectOutcome::NotReady;
            }
            EngineState::Initializing | EngineState::Failed => {
                debug!(
                    "{} Frame {} dropped: engine {:?}",
                    prefix::ENGINE,
                    source.timestamp_ms,
                    state
                );
                return DetectOutcome::NotReady;
            }
        }

        let active = self.shared.listener.read().as_ref().map(|l| l.id);
        let listening = match (active, submitted_by) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(active), Some(owner)) => active == owner,
        };
        if !listening {
            debug!(
                "{} Frame {} dropped: {:?} is not the active listener",
                prefix::ENGINE,
                source.timestamp_ms,
                submitted_by
            );
            return DetectOutcome::NoListener;
        }

        let Some(detector) = inner.detector.as_ref() else {
            return DetectOutcome::NotReady;
        };
        match detector.submit(image, source, submitted_by) {
            Ok(()) => DetectOutcome::Submitted,
            Err(e) => {
                warn!(
                    "{} Frame {} dropped on {} delegate: {}",
                    prefix::ENGINE,
                    source.timestamp_ms,
                    detector.delegate(),
                    e
                );
                DetectOutcome::Dropped
            }
        }
    }
}

impl Shared {
    /// One initialization chain: try each delegate in order, then settle the
    /// state and drain every queued callback with the outcome.
    fn initialize(shared: &Arc<Shared>) {
        info!(
            "{} Loading pose model {}",
            prefix::ENGINE,
            shared.options.asset.path
        );

        let weak: Weak<Shared> = Arc::downgrade(shared);
        let route: CompletionRoute = Arc::new(move |completion| {
            if let Some(shared) = weak.upgrade() {
                shared.route(completion);
            }
        });

        let mut loaded = None;
        for &delegate in &shared.options.delegates {
            let attempt = shared
                .loader
                .load(&shared.options.asset, delegate)
                .and_then(|runner| AsyncDetector::spawn(runner, delegate, route.clone()));
            match attempt {
                Ok(detector) => {
                    info!("{} Pose model initialized ({})", prefix::ENGINE, delegate);
                    loaded = Some(detector);
                    break;
                }
                Err(e) => {
                    warn!(
                        "{} {} initialization failed: {}",
                        prefix::ENGINE,
                        delegate,
                        e
                    );
                }
            }
        }

        let (pending, success) = {
            let mut inner = shared.inner.lock();
            match loaded {
                Some(detector) => {
                    inner.state = EngineState::Ready(detector.delegate());
                    inner.detector = Some(detector);
                }
                None => {
                    error!(
                        "{} Pose model failed to initialize on every delegate",
                        prefix::ENGINE
                    );
                    inner.state = EngineState::Failed;
                }
            }
            (mem::take(&mut inner.pending), inner.state.is_ready())
        };

        for callback in pending {
            callback(success);
        }
    }

    fn route(&self, completion: Completion) {
        let listener = self.listener.read().as_ref().map(|l| l.tx.clone());
        match listener {
            Some(tx) => {
                if tx.send(completion).is_err() {
                    debug!("{} Listener went away mid-delivery", prefix::ENGINE);
                }
            }
            None => {
                debug!(
                    "{} No active listener for frame {}",
                    prefix::ENGINE,
                    completion.source.timestamp_ms
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineError, LandmarkRunner};
    use crate::frame::Rotation;
    use crate::types::{CameraFacing, DetectionResult, Landmark};
    use std::time::Duration;

    struct EchoRunner;

    impl LandmarkRunner for EchoRunner {
        fn infer(&mut self, image: &RgbaImage) -> std::result::Result<DetectionResult, EngineError> {
            let x = image.width() as f32 / 100.0;
            Ok(DetectionResult::single(vec![Landmark::new(x, 0.5, 0.0, 1.0)]))
        }
    }

    struct CpuOnlyLoader;

    impl ModelLoader for CpuOnlyLoader {
        fn load(
            &self,
            _asset: &ModelAsset,
            delegate: Delegate,
        ) -> std::result::Result<Box<dyn LandmarkRunner>, EngineError> {
            match delegate {
                Delegate::Gpu => Err(EngineError::DelegateUnsupported(Delegate::Gpu)),
                Delegate::Cpu => Ok(Box::new(EchoRunner)),
            }
        }
    }

    fn options() -> EngineOptions {
        EngineOptions {
            asset: ModelAsset {
                path: "pose_landmarker_heavy.task".to_string(),
                num_threads: 0,
            },
            delegates: vec![Delegate::Gpu, Delegate::Cpu],
        }
    }

    fn info(timestamp_ms: i64) -> FrameInfo {
        FrameInfo {
            timestamp_ms,
            width: 30,
            height: 40,
            rotation: Rotation::Deg0,
            facing: CameraFacing::Back,
        }
    }

    fn wait_ready(engine: &EngineManager) -> bool {
        let (tx, rx) = bounded(1);
        engine.preload_with(move |ok| {
            let _ = tx.send(ok);
        });
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_falls_back_to_cpu() {
        let engine = EngineManager::new(Arc::new(CpuOnlyLoader), options()).unwrap();
        assert_eq!(engine.state(), EngineState::Unloaded);

        assert!(wait_ready(&engine));
        assert_eq!(engine.state(), EngineState::Ready(Delegate::Cpu));
        assert_eq!(engine.init_attempts(), 1);
    }

    #[test]
    fn test_ready_preload_runs_inline() {
        let engine = EngineManager::new(Arc::new(CpuOnlyLoader), options()).unwrap();
        assert!(wait_ready(&engine));

        let caller = thread::current().id();
        let (tx, rx) = bounded(1);
        engine.preload_with(move |ok| {
            let _ = tx.send((ok, thread::current().id()));
        });
        assert_eq!(rx.try_recv().unwrap(), (true, caller));
        assert_eq!(engine.init_attempts(), 1);
    }

    #[test]
    fn test_detect_routes_to_listener() {
        let engine = EngineManager::new(Arc::new(CpuOnlyLoader), options()).unwrap();
        assert!(wait_ready(&engine));

        let (tx, rx) = unbounded();
        engine.attach_listener(tx);

        let outcome = engine.detect(RgbaImage::new(30, 40), info(7));
        assert_eq!(outcome, DetectOutcome::Submitted);

        let completion = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(completion.source.timestamp_ms, 7);
        assert_eq!(completion.submitted_by, None);
        let result = completion.result.unwrap();
        assert_eq!(result.first_subject().unwrap()[0].x, 0.3);
    }

    #[test]
    fn test_detect_without_listener_is_dropped() {
        let engine = EngineManager::new(Arc::new(CpuOnlyLoader), options()).unwrap();
        assert!(wait_ready(&engine));

        assert_eq!(
            engine.detect(RgbaImage::new(1, 1), info(1)),
            DetectOutcome::NoListener
        );
    }

    #[test]
    fn test_detect_before_load_starts_preload() {
        let engine = EngineManager::new(Arc::new(CpuOnlyLoader), options()).unwrap();

        assert_eq!(
            engine.detect(RgbaImage::new(1, 1), info(1)),
            DetectOutcome::NotReady
        );
        assert_eq!(engine.init_attempts(), 1);
        assert!(wait_ready(&engine));
    }

    #[test]
    fn test_detect_as_stamps_and_checks_submitter() {
        let engine = EngineManager::new(Arc::new(CpuOnlyLoader), options()).unwrap();
        assert!(wait_ready(&engine));

        let (first_tx, _first_rx) = unbounded();
        let (second_tx, second_rx) = unbounded();
        let first = engine.attach_listener(first_tx);
        let second = engine.attach_listener(second_tx);

        // Replaced listener can no longer submit
        assert_eq!(
            engine.detect_as(first, RgbaImage::new(1, 1), info(1)),
            DetectOutcome::NoListener
        );
        assert_eq!(
            engine.detect_as(second, RgbaImage::new(1, 1), info(2)),
            DetectOutcome::Submitted
        );

        let completion = second_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(completion.source.timestamp_ms, 2);
        assert_eq!(completion.submitted_by, Some(second));
    }

    #[test]
    fn test_detach_if_ignores_stale_owner() {
        let engine = EngineManager::new(Arc::new(CpuOnlyLoader), options()).unwrap();
        let (first_tx, _first_rx) = unbounded();
        let (second_tx, _second_rx) = unbounded();

        let first = engine.attach_listener(first_tx);
        let second = engine.attach_listener(second_tx);

        assert!(!engine.detach_listener_if(first));
        assert!(engine.has_listener());
        assert!(engine.detach_listener_if(second));
        assert!(!engine.has_listener());
    }
}
