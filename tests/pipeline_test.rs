//! Capture loop behaviour with stub camera and scripted inference


use emotion_stream::{
    annotator::Annotator,
    camera::CameraSource,
    emotion::{BoundingBox, Detection, Emotion},
    error::CaptureError,
    inference::EmotionInference,
    pipeline::{CaptureLoop, PipelineSettings},
    shared_state::SharedState,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use test_helpers::{face, happy_scores, sad_scores, RecordingCamera, ScriptedInference};

fn settings(skip_interval: u32) -> PipelineSettings {
    PipelineSettings {
        skip_interval,
        mirror: false,
        read_timeout: Duration::from_millis(500),
        jpeg_quality: 70,
    }
}

fn build(
    camera: &RecordingCamera,
    inference: impl EmotionInference + 'static,
    skip_interval: u32,
) -> (CaptureLoop, Arc<SharedState>) {
    let state = Arc::new(SharedState::new());
    let capture = CaptureLoop::new(
        camera.open().unwrap(),
        Box::new(inference),
        Annotator::new(),
        Arc::clone(&state),
        settings(skip_interval),
    )
    .unwrap();
    (capture, state)
}

#[test]
fn test_inference_runs_once_per_interval() {
    for (cycles, k) in [(30usize, 3u32), (30, 4), (10, 1), (7, 10)] {
        let camera = RecordingCamera::new(32, 24);
        let inference = ScriptedInference::always(vec![]);
        let calls = inference.calls();
        let (mut capture, _state) = build(&camera, inference, k);

        for _ in 0..cycles {
            capture.run_cycle().unwrap();
        }

        let expected = cycles / k as usize;
        let actual = calls.load(Ordering::SeqCst);
        assert!(
            actual == expected || actual == expected + 1,
            "{cycles} cycles with k={k}: {actual} inferences"
        );
        assert_eq!(capture.stats().inferences as usize, actual);
        assert_eq!(capture.stats().frames as usize, cycles);
    }
}

#[test]
fn test_snapshot_unchanged_between_inferences() {
    let camera = RecordingCamera::new(32, 24);
    let inference = ScriptedInference::new(vec![
        Ok(vec![face(2, 2, 10, happy_scores())]),
        Ok(vec![face(4, 4, 10, sad_scores())]),
        Ok(vec![]),
    ]);
    let (mut capture, state) = build(&camera, inference, 3);

    let mut current = None;
    for _ in 0..9 {
        let report = capture.run_cycle().unwrap();
        let snapshot = state.read_snapshot().unwrap();
        if report.inferred {
            assert_eq!(snapshot.sequence(), report.sequence);
            current = Some(snapshot);
        } else {
            let held = current.as_ref().unwrap();
            assert!(Arc::ptr_eq(held, &snapshot), "snapshot changed without inference");
        }
        // every cycle publishes a display frame for its own capture
        assert_eq!(state.read_frame().unwrap().sequence(), report.sequence);
    }
    assert!(!state.status().face_detected);
}

#[test]
fn test_no_face_reports_no_dominant() {
    let camera = RecordingCamera::new(32, 24);
    let (mut capture, state) = build(&camera, ScriptedInference::always(vec![]), 1);
    for _ in 0..3 {
        capture.run_cycle().unwrap();
    }

    let snapshot = state.read_snapshot().unwrap();
    assert!(!snapshot.face_detected());
    assert!(snapshot.dominant().is_none());

    let status = state.status();
    assert!(!status.face_detected);
    assert!(status.dominant.is_none());
    assert!(!state.read_frame().unwrap().is_annotated());
}

#[test]
fn test_dominant_emotion_reaches_status() {
    let camera = RecordingCamera::new(64, 48);
    let (mut capture, state) = build(
        &camera,
        ScriptedInference::always(vec![face(10, 10, 20, happy_scores())]),
        3,
    );
    capture.run_cycle().unwrap();

    let status = state.status();
    assert!(status.face_detected);
    assert_eq!(status.dominant, Some(Emotion::Happy));
    assert!((status.confidence - 0.85).abs() < f32::EPSILON);
    assert_eq!(status.emotions.len(), Emotion::COUNT);
    assert!(state.read_frame().unwrap().is_annotated());
}

#[test]
fn test_largest_face_is_primary() {
    let camera = RecordingCamera::new(64, 48);
    let (mut capture, state) = build(
        &camera,
        ScriptedInference::always(vec![face(0, 0, 8, happy_scores()), face(20, 10, 24, sad_scores())]),
        1,
    );
    capture.run_cycle().unwrap();

    let snapshot = state.read_snapshot().unwrap();
    assert_eq!(snapshot.detections().len(), 2);
    assert_eq!(snapshot.dominant().map(|(e, _)| e), Some(Emotion::Sad));
}

#[test]
fn test_inference_errors_do_not_stop_video() {
    let camera = RecordingCamera::new(32, 24);
    let (mut capture, state) = build(&camera, ScriptedInference::failing(), 2);

    for _ in 0..10 {
        capture.run_cycle().unwrap();
    }

    assert_eq!(capture.stats().inference_failures, 5);
    assert!(!state.status().face_detected);
    assert_eq!(state.read_frame().unwrap().sequence(), 9);
}

#[test]
fn test_failure_then_recovery() {
    let camera = RecordingCamera::new(32, 24);
    let inference = ScriptedInference::new(vec![
        Err("transient".to_string()),
        Ok(vec![face(1, 1, 12, happy_scores())]),
    ]);
    let (mut capture, state) = build(&camera, inference, 1);

    capture.run_cycle().unwrap();
    assert!(!state.status().face_detected);
    capture.run_cycle().unwrap();
    assert_eq!(state.status().dominant, Some(Emotion::Happy));
}

#[test]
fn test_capture_error_ends_run_and_closes_camera() {
    let camera = RecordingCamera::new(32, 24).failing_after(5);
    let (capture, state) = build(&camera, ScriptedInference::always(vec![]), 3);

    let exit = capture.run(&AtomicBool::new(false));

    assert!(matches!(exit.fault, Some(CaptureError::Disconnected)));
    assert!(exit.camera.is_none());
    assert_eq!(exit.stats.frames, 5);
    assert_eq!(camera.log.opens(), 1);
    assert_eq!(camera.log.closes(), 1);
    assert_eq!(state.read_frame().unwrap().sequence(), 4);
}

#[test]
fn test_stop_flag_ends_run_with_camera_open() {
    let camera = RecordingCamera::new(32, 24);
    let (capture, _state) = build(&camera, ScriptedInference::always(vec![]), 3);
    let stop = Arc::new(AtomicBool::new(false));

    let runner = {
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || capture.run(&stop))
    };
    assert!(test_helpers::wait_until(Duration::from_secs(5), || camera.log.reads() >= 3));
    stop.store(true, Ordering::Release);
    let exit = runner.join().unwrap();

    assert!(exit.fault.is_none());
    // closing is left to the caller after a requested stop
    assert_eq!(camera.log.closes(), 0);
    let mut handle = exit.camera.unwrap();
    handle.close().unwrap();
    assert_eq!(camera.log.closes(), 1);
    assert_eq!(exit.inference.name(), "scripted");
}

#[test]
fn test_discarded_run_closes_camera() {
    let camera = RecordingCamera::new(32, 24);
    let (capture, _state) = build(&camera, ScriptedInference::always(vec![]), 3);
    assert_eq!(camera.log.live(), 1);

    capture.discard();

    assert_eq!(camera.log.reads(), 0);
    assert_eq!(camera.log.closes(), 1);
    assert_eq!(camera.log.live(), 0);
}

#[test]
fn test_boxes_clipped_to_frame() {
    let camera = RecordingCamera::new(64, 48);
    let inference = ScriptedInference::always(vec![
        Detection::new(BoundingBox::new(i32::MIN, 0, 10, 10), happy_scores()),
        Detection::new(BoundingBox::new(0, 0, u32::MAX, u32::MAX), sad_scores()),
    ]);
    let (mut capture, state) = build(&camera, inference, 1);

    capture.run_cycle().unwrap();

    let snapshot = state.read_snapshot().unwrap();
    assert_eq!(snapshot.detections().len(), 1);
    assert_eq!(snapshot.detections()[0].bbox, BoundingBox::new(0, 0, 64, 48));
    assert_eq!(state.status().dominant, Some(Emotion::Sad));
    assert!(state.read_frame().unwrap().is_annotated());
}
