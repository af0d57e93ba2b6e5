//! End-to-end session behaviour: keep-latest backpressure, facing toggles,
//! empty results, bind failures, disposal and overlapping sessions.

mod common;

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver};
use pretty_assertions::assert_eq;

use common::{tagged_frame, wait_until, ManualCamera, ScriptedLoader, TIMEOUT};
use posestream::{
    CameraFacing, CommandReply, Delegate, EngineState, FlatLandmarkSequence, PipelineConfig,
    PoseHost,
};

fn host(loader: ScriptedLoader, camera: Arc<ManualCamera>) -> (PoseHost, Receiver<Vec<f64>>) {
    let host = PoseHost::new(&PipelineConfig::default(), Arc::new(loader), camera).unwrap();
    let (tx, rx) = unbounded();
    host.events().listen(move |landmarks: FlatLandmarkSequence| {
        let _ = tx.send(landmarks.into_vec());
    });
    assert!(host.engine().preload_and_wait());
    (host, rx)
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

#[test]
fn test_keep_latest_drops_intermediate_frames() {
    let camera = ManualCamera::new();
    let (loader, gate) = ScriptedLoader::new().gated();
    let (host, events) = host(loader, camera.clone());
    let session = host.create_session(1).unwrap();

    assert!(camera.push(tagged_frame(1)));
    assert!(wait_until(|| session.stats().frames_submitted == 1));

    // Frame 1 is in flight; 2 is replaced by 3 before anyone takes it
    camera.push(tagged_frame(2));
    camera.push(tagged_frame(3));
    assert_eq!(session.stats().frames_replaced, 1);

    gate.send(()).unwrap();
    let first = events.recv_timeout(TIMEOUT).unwrap();
    assert!(wait_until(|| session.stats().frames_submitted == 2));
    gate.send(()).unwrap();
    let second = events.recv_timeout(TIMEOUT).unwrap();

    assert_eq!(first[1], 1.0);
    assert_eq!(second[1], 3.0);
    assert!(events.recv_timeout(Duration::from_millis(100)).is_err());

    let stats = session.stats();
    assert_eq!(stats.frames_received, 3);
    assert_eq!(stats.frames_submitted, 2);
    assert_eq!(stats.results_delivered, 2);
}

#[test]
fn test_switching_facing_changes_mirroring() {
    let camera = ManualCamera::new();
    let (host, events) = host(ScriptedLoader::new(), camera.clone());
    let session = host.create_session(1).unwrap();
    assert_eq!(session.facing(), CameraFacing::Front);

    camera.push(tagged_frame(1));
    let front = events.recv_timeout(TIMEOUT).unwrap();
    assert!(close(front[0], 0.7), "front x = {}", front[0]);

    assert_eq!(session.switch_camera(), CameraFacing::Back);
    camera.push(tagged_frame(2));
    let back = events.recv_timeout(TIMEOUT).unwrap();
    assert!(close(back[0], 0.3), "back x = {}", back[0]);

    assert_eq!(
        host.commands().invoke("switchCamera"),
        CommandReply::Success(serde_json::Value::Null)
    );
    assert_eq!(session.facing(), CameraFacing::Front);
    camera.push(tagged_frame(3));
    let front_again = events.recv_timeout(TIMEOUT).unwrap();
    assert!(close(front_again[0], 0.7));

    assert_eq!(
        camera.binds(),
        vec![CameraFacing::Front, CameraFacing::Back, CameraFacing::Front]
    );
    assert_eq!(camera.unbinds(), 3);
}

#[test]
fn test_empty_result_is_delivered() {
    let camera = ManualCamera::new();
    let (host, events) = host(ScriptedLoader::new().empty_results(), camera.clone());
    let session = host.create_session(1).unwrap();

    camera.push(tagged_frame(1));
    let delivered = events.recv_timeout(TIMEOUT).unwrap();
    assert!(delivered.is_empty());

    assert!(wait_until(|| session.stats().empty_results == 1));
}

#[test]
fn test_preload_command_reports_success() {
    let host = PoseHost::new(
        &PipelineConfig::default(),
        Arc::new(ScriptedLoader::new()),
        ManualCamera::new(),
    )
    .unwrap();
    assert_eq!(host.engine().state(), EngineState::Unloaded);

    // No view exists yet; the model still warms up
    assert_eq!(
        host.commands().invoke("preloadModel"),
        CommandReply::Success(true.into())
    );
    assert!(host.engine().is_ready());
    assert_eq!(host.commands().invoke("switchCamera"), CommandReply::NoHandler);

    let _session = host.create_session(1).unwrap();
    assert_eq!(
        host.commands().invoke("preloadModel"),
        CommandReply::Success(true.into())
    );
    assert_eq!(host.commands().invoke("takePicture"), CommandReply::NotImplemented);
}

#[test]
fn test_preload_command_reports_failure() {
    let loader = ScriptedLoader::new()
        .failing(Delegate::Gpu)
        .failing(Delegate::Cpu);
    let host = PoseHost::new(
        &PipelineConfig::default(),
        Arc::new(loader),
        ManualCamera::new(),
    )
    .unwrap();

    assert_eq!(
        host.commands().invoke("preloadModel"),
        CommandReply::Success(false.into())
    );
    assert_eq!(host.engine().state(), EngineState::Failed);
}

#[test]
fn test_bind_failure_leaves_session_alive() {
    let camera = ManualCamera::new();
    camera.make_unavailable(CameraFacing::Back);
    let (host, events) = host(ScriptedLoader::new(), camera.clone());
    let session = host.create_session(1).unwrap();

    assert_eq!(session.switch_camera(), CameraFacing::Back);
    assert!(!camera.is_bound());
    assert!(!camera.push(tagged_frame(1)));

    assert_eq!(session.switch_camera(), CameraFacing::Front);
    assert!(camera.push(tagged_frame(2)));
    let delivered = events.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(delivered[1], 2.0);
}

#[test]
fn test_dispose_detaches_without_unloading() {
    let camera = ManualCamera::new();
    let (loader, gate) = ScriptedLoader::new().gated();
    let (host, events) = host(loader, camera.clone());

    let mut session = host.create_session(1).unwrap();
    camera.push(tagged_frame(1));
    assert!(wait_until(|| session.stats().frames_submitted == 1));

    // Completion lands after disposal and is ignored
    session.dispose();
    assert!(session.is_disposed());
    gate.send(()).unwrap();
    assert!(events.recv_timeout(Duration::from_millis(200)).is_err());

    assert!(host.engine().is_ready());
    assert!(!host.engine().has_listener());
    assert!(!host.commands().has_handler());
    assert!(!camera.is_bound());

    // A new view reuses the loaded model
    let next = host.create_session(2).unwrap();
    assert!(host.engine().has_listener());
    camera.push(tagged_frame(5));
    gate.send(()).unwrap();
    let delivered = events.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(delivered[1], 5.0);
    assert_eq!(next.view_id(), 2);
}

#[test]
fn test_switch_after_dispose_binds_nothing() {
    let camera = ManualCamera::new();
    let (host, _events) = host(ScriptedLoader::new(), camera.clone());

    let mut session = host.create_session(1).unwrap();
    session.dispose();
    assert!(!camera.is_bound());

    assert_eq!(session.switch_camera(), CameraFacing::Front);
    assert_eq!(session.facing(), CameraFacing::Front);
    assert_eq!(camera.binds(), vec![CameraFacing::Front]);
    assert!(!camera.is_bound());
}

#[test]
fn test_disposing_replaced_session_keeps_camera() {
    let camera = ManualCamera::new();
    let (host, events) = host(ScriptedLoader::new(), camera.clone());

    let mut old = host.create_session(1).unwrap();
    let new = host.create_session(2).unwrap();
    old.dispose();

    assert!(camera.is_bound());
    assert!(host.engine().has_listener());
    assert!(camera.push(tagged_frame(4)));
    let delivered = events.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(delivered[1], 4.0);

    assert_eq!(new.stats().results_delivered, 1);
    assert_eq!(old.stats().frames_received, 0);

    // The newer view still owns the camera and releases it on disposal
    drop(new);
    assert!(!camera.is_bound());
}

#[test]
fn test_disposing_replaced_session_keeps_newer_handler() {
    let camera = ManualCamera::new();
    let (host, events) = host(ScriptedLoader::new(), camera.clone());

    let mut old = host.create_session(1).unwrap();
    let new = host.create_session(2).unwrap();
    old.dispose();

    assert!(host.commands().has_handler());
    assert_eq!(
        host.commands().invoke("switchCamera"),
        CommandReply::Success(serde_json::Value::Null)
    );
    assert_eq!(new.facing(), CameraFacing::Back);
    assert_eq!(old.facing(), CameraFacing::Front);

    camera.push(tagged_frame(6));
    let delivered = events.recv_timeout(TIMEOUT).unwrap();
    assert!(close(delivered[0], 0.3), "back x = {}", delivered[0]);
    assert_eq!(delivered[1], 6.0);
}

#[test]
fn test_replaced_session_result_keeps_newer_gate_closed() {
    let camera = ManualCamera::new();
    let (loader, gate) = ScriptedLoader::new().gated();
    let (host, events) = host(loader, camera.clone());

    let old = host.create_session(1).unwrap();
    camera.push(tagged_frame(1));
    assert!(wait_until(|| old.stats().frames_submitted == 1));

    let new = host.create_session(2).unwrap();
    camera.push(tagged_frame(2));
    assert!(wait_until(|| new.stats().frames_submitted == 1));
    camera.push(tagged_frame(3));

    // Frame 1 finishes and is routed to the newer listener; frame 2 is
    // still in flight, so frame 3 must keep waiting
    gate.send(()).unwrap();
    assert!(events.recv_timeout(Duration::from_millis(200)).is_err());
    let stats = new.stats();
    assert_eq!(stats.frames_submitted, 1);
    assert_eq!(stats.results_delivered, 0);

    gate.send(()).unwrap();
    let second = events.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(second[1], 2.0);
    assert!(wait_until(|| new.stats().frames_submitted == 2));

    gate.send(()).unwrap();
    let third = events.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(third[1], 3.0);
    assert_eq!(old.stats().results_delivered, 0);
}
