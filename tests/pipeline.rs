mod common;

use std::time::Duration;

use common::{registration_ok, storage_ok, MockService, Reply, DEV_ADDRESS, DEV_KEY};
use depth_witness::ingest::{open_source, SourceConfig, StereoRig};
use depth_witness::publish::{HttpRegistrationClient, HttpStorageClient, RegistrationTerms};
use depth_witness::{
    recover_signer, ArtifactKind, ArtifactStore, BlockMatchingEngine, Calibration,
    CaptureController, CaptureError, CaptureSession, CaptureSignature, CaptureState,
    CaptureStatus, Publisher,
};
use serde_json::Value;
use tempfile::tempdir;
use zeroize::Zeroizing;

const WIDTH: u32 = 64;
const HEIGHT: u32 = 32;

type HttpController = CaptureController<BlockMatchingEngine, HttpStorageClient, HttpRegistrationClient>;

fn calibrated_engine() -> BlockMatchingEngine {
    let mut calibration = Calibration::new(WIDTH, HEIGHT);
    calibration.num_disparities = 32;
    calibration.block_size = 5;
    BlockMatchingEngine::new(Some(calibration))
}

fn controller(
    store: &std::path::Path,
    engine: BlockMatchingEngine,
    service: &MockService,
) -> HttpController {
    CaptureController::new(
        engine,
        Publisher::new(
            HttpStorageClient::new(&service.url(), Duration::from_secs(5)),
            HttpRegistrationClient::new(&service.url(), Duration::from_secs(5)),
            RegistrationTerms::default(),
        ),
        ArtifactStore::open(store).unwrap(),
        Some(Zeroizing::new(DEV_KEY.to_string())),
    )
}

fn rig() -> StereoRig {
    let config = SourceConfig {
        width: WIDTH,
        height: HEIGHT,
        ..SourceConfig::default()
    };
    let mut rig = StereoRig::new(open_source(&config).unwrap()).unwrap();
    rig.poll().unwrap();
    rig
}

#[test]
fn capture_is_signed_persisted_stored_and_registered() {
    let dir = tempdir().unwrap();
    let service = MockService::spawn(|req| match req.path.as_str() {
        "/upload-json" => storage_ok(),
        _ => registration_ok(),
    });
    let mut ctl = controller(dir.path(), calibrated_engine(), &service);
    let rig = rig();

    let (session, report) = ctl.trigger(CaptureSession::new(), rig.latest().unwrap());

    assert_eq!(report.final_state, CaptureState::Done);
    assert_eq!(report.status(), CaptureStatus::Published);
    assert_eq!(report.status().exit_code(), 0);
    assert_eq!(session.sequence_number, 1);
    assert!(report.error.is_none());

    let ts = report.timestamp.unwrap();
    let store = ctl.store();
    for kind in [
        ArtifactKind::LeftImage,
        ArtifactKind::ViewsImage,
        ArtifactKind::DepthData,
        ArtifactKind::DepthMeta,
        ArtifactKind::SignedCapture,
        ArtifactKind::PublishResult,
    ] {
        assert!(store.exists(kind, ts), "missing {:?}", kind);
    }

    let signed = store.read_signed_capture(ts).unwrap();
    assert!(matches!(signed.signature, CaptureSignature::Signed(_)));
    assert_eq!(recover_signer(&signed).unwrap().to_string(), DEV_ADDRESS);

    let field = store.read_depth_data(ts).unwrap();
    assert_eq!((field.rows(), field.cols()), (HEIGHT as usize, WIDTH as usize));
    assert_eq!(signed.data.depth.to_dense().unwrap(), field);
    let meta = store.read_depth_meta(ts).unwrap();
    assert_eq!(meta, signed.data.depth.summary(ts));
    assert!(meta.valid_pixels > 0);

    let result = store.read_publish_result(ts).unwrap();
    assert_eq!(result.storage_id, "bafyimage");
    assert_eq!(result.registration_id(), Some("0xipid"));

    let upload = service.last("/upload-json").unwrap();
    let left_jpeg = store.read_left_image(ts).unwrap();
    assert!(upload.body.windows(left_jpeg.len()).any(|w| w == left_jpeg.as_slice()));
    let register: Value = serde_json::from_slice(&service.last("/register-ip").unwrap().body).unwrap();
    assert_eq!(register["deviceAddress"], DEV_ADDRESS);
    assert_eq!(register["imageCid"], "bafyimage");
}

#[test]
fn storage_failure_keeps_local_evidence_and_skips_registration() {
    let dir = tempdir().unwrap();
    let service = MockService::spawn(|req| match req.path.as_str() {
        "/upload-json" => Reply::Json(500, "storage offline".to_string()),
        _ => registration_ok(),
    });
    let mut ctl = controller(dir.path(), calibrated_engine(), &service);
    let rig = rig();

    let (session, report) = ctl.trigger(CaptureSession::new(), rig.latest().unwrap());

    assert_eq!(report.final_state, CaptureState::Errored);
    assert_eq!(report.status().exit_code(), 1);
    assert_eq!(session.sequence_number, 1);
    assert!(matches!(report.error, Some(CaptureError::Publish(_))));
    let message = report.error.as_ref().unwrap().to_string();
    assert!(message.contains("storage stage"));
    assert!(message.contains("500"));

    let ts = report.timestamp.unwrap();
    let store = ctl.store();
    assert!(store.exists(ArtifactKind::DepthData, ts));
    assert!(store.exists(ArtifactKind::DepthMeta, ts));
    assert!(store.exists(ArtifactKind::SignedCapture, ts));
    assert!(!store.exists(ArtifactKind::PublishResult, ts));
    assert_eq!(service.count("/register-ip"), 0);
}

#[test]
fn registration_failure_completes_degraded() {
    let dir = tempdir().unwrap();
    let service = MockService::spawn(|req| match req.path.as_str() {
        "/upload-json" => storage_ok(),
        _ => Reply::Json(500, r#"{"error":"chain congested"}"#.to_string()),
    });
    let mut ctl = controller(dir.path(), calibrated_engine(), &service);
    let rig = rig();

    let (session, report) = ctl.trigger(CaptureSession::new(), rig.latest().unwrap());

    assert_eq!(report.final_state, CaptureState::Done);
    assert_eq!(report.status(), CaptureStatus::Degraded);
    assert_eq!(report.storage_id(), Some("bafyimage"));
    assert_eq!(report.registration_id(), None);
    assert_eq!(session.last_result.as_ref().unwrap().status, CaptureStatus::Degraded);

    let persisted = ctl.store().read_publish_result(report.timestamp.unwrap()).unwrap();
    assert_eq!(persisted.storage_id, "bafyimage");
    assert!(persisted.registration.is_none());
    assert!(persisted
        .registration_error
        .as_deref()
        .unwrap()
        .contains("chain congested"));
}

#[test]
fn missing_calibration_refuses_trigger_without_side_effects() {
    let dir = tempdir().unwrap();
    let service = MockService::spawn(|_| storage_ok());
    let engine = BlockMatchingEngine::from_path(&dir.path().join("stereo_params.json"));
    let captures = dir.path().join("captures");
    let mut ctl = controller(&captures, engine, &service);
    let rig = rig();

    let (session, report) = ctl.trigger(CaptureSession::new(), rig.latest().unwrap());

    assert_eq!(report.final_state, CaptureState::Idle);
    assert_eq!(report.status(), CaptureStatus::Rejected);
    assert!(matches!(report.error, Some(CaptureError::Configuration(_))));
    assert_eq!(session.sequence_number, 0);
    assert!(report.timestamp.is_none());
    assert_eq!(std::fs::read_dir(&captures).unwrap().count(), 0);
    assert!(service.requests().is_empty());
}

#[test]
fn repeated_triggers_use_distinct_artifact_names() {
    let dir = tempdir().unwrap();
    let service = MockService::spawn(|req| match req.path.as_str() {
        "/upload-json" => storage_ok(),
        _ => registration_ok(),
    });
    let mut ctl = controller(dir.path(), calibrated_engine(), &service);
    let mut rig = rig();

    let mut session = CaptureSession::new();
    for _ in 0..3 {
        rig.poll().unwrap();
        let (next, report) = ctl.trigger(session, rig.latest().unwrap());
        assert_eq!(report.final_state, CaptureState::Done);
        session = next;
    }
    assert_eq!(session.sequence_number, 3);
    assert_eq!(ctl.store().list_captures().unwrap().len(), 3);
    assert_eq!(service.count("/upload-json"), 3);
}
