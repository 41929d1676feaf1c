//! Capture session controller.
//!
//! One trigger runs one capture through
//! `Idle -> ComputingDepth -> BuildingPayload -> Signing -> PublishingStorage ->
//! PublishingRegistration -> Done`, or into `Errored` from any step. Every artifact
//! computed before a failing step is already on disk when the failure is reported.
//! A registration failure ends in `Done` with a degraded outcome.
//!
//! The controller is driven through `&mut self`, so a second capture cannot start while
//! one is in flight. Session counters live in an explicit [`CaptureSession`] value that
//! is passed in and handed back by every trigger.

use std::fmt;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use zeroize::Zeroizing;

use crate::crypto::{self, Address, CaptureSignature, DeviceKey};
use crate::depth::{self, StereoEngine};
use crate::error::CaptureError;
use crate::frame::{Frame, StereoPair};
use crate::payload;
use crate::publish::{
    PublishOutcome, Publisher, RegistrationService, Stage, StorageService,
};
use crate::storage::ArtifactStore;

/// Address reported to the services when no device key is configured.
pub const UNKNOWN_DEVICE_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    ComputingDepth,
    BuildingPayload,
    Signing,
    PublishingStorage,
    PublishingRegistration,
    Done,
    Errored,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CaptureState::Idle => "idle",
            CaptureState::ComputingDepth => "computing depth",
            CaptureState::BuildingPayload => "building payload",
            CaptureState::Signing => "signing",
            CaptureState::PublishingStorage => "publishing to storage",
            CaptureState::PublishingRegistration => "registering asset",
            CaptureState::Done => "done",
            CaptureState::Errored => "errored",
        })
    }
}

/// Coarse result of one trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureStatus {
    /// Stored and registered.
    Published,
    /// Stored; registration failed.
    Degraded,
    /// A step failed; earlier artifacts are on disk.
    Errored,
    /// The trigger was refused before any work (configuration error).
    Rejected,
}

impl CaptureStatus {
    /// Exit code for scripted callers.
    pub fn exit_code(self) -> i32 {
        match self {
            CaptureStatus::Published => 0,
            CaptureStatus::Degraded => 2,
            CaptureStatus::Errored | CaptureStatus::Rejected => 1,
        }
    }
}

impl fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CaptureStatus::Published => "published",
            CaptureStatus::Degraded => "degraded",
            CaptureStatus::Errored => "errored",
            CaptureStatus::Rejected => "rejected",
        })
    }
}

/// Summary of the most recent trigger kept in the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LastCapture {
    pub timestamp: u64,
    pub status: CaptureStatus,
    pub storage_id: Option<String>,
    pub registration_id: Option<String>,
}

/// Process-wide counters, owned by the caller's loop.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptureSession {
    /// Number of triggers that reached `Done` or `Errored`.
    pub sequence_number: u64,
    pub last_result: Option<LastCapture>,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Everything observable about one trigger.
#[derive(Debug)]
pub struct CaptureReport {
    /// Capture timestamp (Unix ms); `None` when the trigger was rejected.
    pub timestamp: Option<u64>,
    /// Session sequence number after this trigger.
    pub sequence_number: u64,
    pub final_state: CaptureState,
    /// States visited, in order.
    pub trace: Vec<CaptureState>,
    /// Artifacts written, in order.
    pub artifacts: Vec<PathBuf>,
    pub signature: Option<CaptureSignature>,
    pub publish: Option<PublishOutcome>,
    /// The failure that ended the capture, if any.
    pub error: Option<CaptureError>,
    /// Non-fatal problems (e.g. a publish result that could not be persisted).
    pub warnings: Vec<String>,
}

impl CaptureReport {
    fn new() -> Self {
        Self {
            timestamp: None,
            sequence_number: 0,
            final_state: CaptureState::Idle,
            trace: vec![CaptureState::Idle],
            artifacts: Vec::new(),
            signature: None,
            publish: None,
            error: None,
            warnings: Vec::new(),
        }
    }

    pub fn status(&self) -> CaptureStatus {
        match self.final_state {
            CaptureState::Done => match &self.publish {
                Some(PublishOutcome::Published(_)) => CaptureStatus::Published,
                _ => CaptureStatus::Degraded,
            },
            CaptureState::Idle => CaptureStatus::Rejected,
            _ => CaptureStatus::Errored,
        }
    }

    pub fn storage_id(&self) -> Option<&str> {
        self.publish
            .as_ref()
            .and_then(|o| o.result())
            .map(|r| r.storage_id.as_str())
    }

    pub fn registration_id(&self) -> Option<&str> {
        self.publish
            .as_ref()
            .and_then(|o| o.result())
            .and_then(|r| r.registration_id())
    }
}

/// Strictly increasing Unix-millisecond timestamps.
#[derive(Debug, Default)]
pub struct CaptureClock {
    last: u64,
}

impl CaptureClock {
    pub fn next(&mut self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.last = now.max(self.last + 1);
        self.last
    }
}

pub struct CaptureController<E, S, R> {
    engine: E,
    publisher: Publisher<S, R>,
    store: ArtifactStore,
    signing_key: Option<Zeroizing<String>>,
    device_address: String,
    clock: CaptureClock,
}

impl<E, S, R> CaptureController<E, S, R>
where
    E: StereoEngine,
    S: StorageService,
    R: RegistrationService,
{
    /// A malformed key is kept: captures then carry the signing-error sentinel.
    pub fn new(
        engine: E,
        publisher: Publisher<S, R>,
        store: ArtifactStore,
        signing_key: Option<Zeroizing<String>>,
    ) -> Self {
        let device_address = signing_key
            .as_ref()
            .and_then(|key| DeviceKey::from_hex(key).ok())
            .map(|key| key.address().to_string())
            .unwrap_or_else(|| UNKNOWN_DEVICE_ADDRESS.to_string());
        Self {
            engine,
            publisher,
            store,
            signing_key,
            device_address,
            clock: CaptureClock::default(),
        }
    }

    pub fn device_address(&self) -> &str {
        &self.device_address
    }

    pub fn device(&self) -> Option<Address> {
        self.device_address
            .parse()
            .ok()
            .filter(|_| self.device_address != UNKNOWN_DEVICE_ADDRESS)
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn is_ready(&self) -> bool {
        self.engine.is_ready()
    }

    pub fn trigger(
        &mut self,
        session: CaptureSession,
        pair: &StereoPair,
    ) -> (CaptureSession, CaptureReport) {
        self.trigger_with(session, pair, &mut |_| {})
    }

    /// Runs one capture, calling `observe` on every state entered after `Idle`.
    pub fn trigger_with(
        &mut self,
        mut session: CaptureSession,
        pair: &StereoPair,
        observe: &mut dyn FnMut(CaptureState),
    ) -> (CaptureSession, CaptureReport) {
        let mut report = CaptureReport::new();
        report.sequence_number = session.sequence_number;

        if !self.engine.is_ready() {
            let err = CaptureError::Configuration(format!(
                "stereo engine '{}' has no calibration; capture not started",
                self.engine.name()
            ));
            log::error!("{}", err);
            report.error = Some(err);
            return (session, report);
        }

        let timestamp = self.clock.next();
        report.timestamp = Some(timestamp);
        log::info!(
            "capture {} started (sequence {})",
            timestamp,
            session.sequence_number + 1
        );

        let mut run = Run {
            report,
            observe,
        };
        let result = self.run(timestamp, pair, &mut run);
        let mut report = run.report;
        match result {
            Ok(()) => report.final_state = CaptureState::Done,
            Err(e) => {
                log::error!("capture {} failed: {}", timestamp, e);
                report.error = Some(e);
                report.trace.push(CaptureState::Errored);
                report.final_state = CaptureState::Errored;
            }
        }
        if report.final_state == CaptureState::Done {
            report.trace.push(CaptureState::Done);
        }

        session.sequence_number += 1;
        report.sequence_number = session.sequence_number;
        session.last_result = Some(LastCapture {
            timestamp,
            status: report.status(),
            storage_id: report.storage_id().map(str::to_string),
            registration_id: report.registration_id().map(str::to_string),
        });
        log::info!(
            "capture {} finished: {} (sequence {})",
            timestamp,
            report.status(),
            session.sequence_number
        );
        (session, report)
    }

    fn run(
        &mut self,
        timestamp: u64,
        pair: &StereoPair,
        run: &mut Run<'_>,
    ) -> Result<(), CaptureError> {
        run.enter(CaptureState::ComputingDepth);
        let left_jpeg = pair
            .left
            .encode_jpeg()
            .map_err(|e| CaptureError::Payload(format!("encode left frame: {:#}", e)))?;
        run.wrote(self.store.write_left_image(timestamp, &left_jpeg)?);

        let field = self
            .engine
            .compute_disparity(pair)
            .map_err(|e| CaptureError::Depth(format!("{:#}", e)))?;
        let record = depth::encode(&field);
        run.wrote(self.store.write_depth_data(timestamp, &field)?);
        let summary = record.summary(timestamp);
        run.wrote(self.store.write_depth_meta(timestamp, &summary)?);
        log::info!(
            "capture {}: {} of {} pixels valid",
            timestamp,
            summary.valid_pixels,
            summary.total_pixels
        );

        run.enter(CaptureState::BuildingPayload);
        let companion = companion_image(&pair.right, &field)?;
        let companion_jpeg = companion
            .encode_jpeg()
            .map_err(|e| CaptureError::Payload(format!("encode companion image: {:#}", e)))?;
        run.wrote(self.store.write_views_image(timestamp, &companion_jpeg)?);
        let canonical = payload::build(timestamp, &pair.left, &companion, record)
            .map_err(|e| CaptureError::Payload(format!("{:#}", e)))?;

        run.enter(CaptureState::Signing);
        let signed = crypto::sign_capture(
            canonical,
            self.signing_key.as_ref().map(|k| k.as_str()),
        );
        run.report.signature = Some(signed.signature.clone());
        run.wrote(self.store.write_signed_capture(timestamp, &signed)?);

        let outcome = self.publisher.publish_with(
            &signed,
            &left_jpeg,
            &self.device_address,
            &mut |stage| match stage {
                Stage::Storage => run.enter(CaptureState::PublishingStorage),
                Stage::Registration => run.enter(CaptureState::PublishingRegistration),
                Stage::RegistrationCheck => {}
            },
        );

        if let Some(result) = outcome.result() {
            match self.store.write_publish_result(timestamp, result) {
                Ok(path) => run.wrote(path),
                Err(e) => {
                    log::error!("capture {}: publish result not persisted: {}", timestamp, e);
                    run.report.warnings.push(e.to_string());
                }
            }
        }
        match outcome {
            PublishOutcome::StorageFailed(e) => {
                run.report.publish = None;
                Err(CaptureError::Publish(e))
            }
            other => {
                if let PublishOutcome::RegistrationDegraded { reason, .. } = &other {
                    run.report
                        .warnings
                        .push(format!("registration degraded: {}", reason));
                }
                run.report.publish = Some(other);
                Ok(())
            }
        }
    }
}

struct Run<'a> {
    report: CaptureReport,
    observe: &'a mut dyn FnMut(CaptureState),
}

impl Run<'_> {
    fn enter(&mut self, state: CaptureState) {
        log::debug!("capture state -> {}", state);
        self.report.trace.push(state);
        (self.observe)(state);
    }

    fn wrote(&mut self, path: PathBuf) {
        log::info!("artifact written: {}", path.display());
        self.report.artifacts.push(path);
    }
}

/// Right frame and the depth visualization side by side.
fn companion_image(right: &Frame, field: &depth::DisparityField) -> Result<Frame, CaptureError> {
    let visual = depth::visualize(field)
        .map_err(|e| CaptureError::Payload(format!("render depth view: {:#}", e)))?;
    Frame::hconcat(&[right, &visual])
        .map_err(|e| CaptureError::Payload(format!("compose companion image: {:#}", e)))
}
