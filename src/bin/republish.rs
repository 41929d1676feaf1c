//! republish - Explicit retry of a persisted capture.
//!
//! The publisher never retries on its own. This tool re-runs publishing for a capture
//! already on disk, using the stored signed artifact unchanged (its canonical bytes
//! and signature are stable):
//! - default: storage upload followed by registration
//! - `--registration-only`: registration using the stored `ip_registration_<ts>.json`
//!
//! The publish result file is rewritten on success or degraded success.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;

use depth_witness::publish::{PublishOutcome, PublishResult};
use depth_witness::ui::Ui;
use depth_witness::{ArtifactStore, DeviceKey, WitnessConfig};

#[derive(Parser, Debug)]
#[command(name = "republish", about = "Retry publishing a persisted capture")]
struct Args {
    /// Capture timestamp (the <ts> in capture_<ts>_signed.json)
    #[arg(value_name = "TIMESTAMP", required_unless_present = "list")]
    timestamp: Option<u64>,

    /// Only retry the registration stage, reusing stored content identifiers
    #[arg(long)]
    registration_only: bool,

    /// List captures in the output directory and whether they were published
    #[arg(long)]
    list: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = Ui::from_args(
        Some(&args.ui),
        std::io::stderr().is_terminal(),
        !std::io::stdout().is_terminal(),
    );
    let cfg = WitnessConfig::load()?;
    let store = ArtifactStore::open(&cfg.output_dir)?;

    if args.list {
        return list(&store);
    }
    let timestamp = args
        .timestamp
        .ok_or_else(|| anyhow!("a capture timestamp is required"))?;

    let capture = {
        let _stage = ui.stage("Read signed capture");
        store.read_signed_capture(timestamp)?
    };
    let device_address = match cfg.signing_key() {
        Some(key) => DeviceKey::from_hex(&key)
            .context("WITNESS_PRIVATE_KEY is not a valid device key")?
            .address()
            .to_string(),
        None => depth_witness::session::UNKNOWN_DEVICE_ADDRESS.to_string(),
    };
    let publisher = cfg.http_publisher();

    if args.registration_only {
        let mut stored = store
            .read_publish_result(timestamp)
            .context("no stored publish result; run a full republish instead")?;
        if let Some(existing) = stored.registration_id() {
            println!("capture {} is already registered as {}", timestamp, existing);
            return Ok(());
        }
        let summary = capture.data.depth.summary(timestamp);
        let mut stage = ui.stage("Register asset");
        match publisher.register(&stored, summary, &device_address) {
            Ok(receipt) => {
                stored.registration = Some(receipt);
                stored.registration_error = None;
                drop(stage);
                finish(&store, timestamp, &stored)?;
                Ok(())
            }
            Err(e) => {
                stage.fail(e.to_string());
                drop(stage);
                stored.registration_error = Some(e.to_string());
                store.write_publish_result(timestamp, &stored)?;
                std::process::exit(2);
            }
        }
    } else {
        let original = store.read_left_image(timestamp).or_else(|_| {
            log::warn!("left image artifact missing; uploading the embedded base image");
            capture.data.base_image_jpeg()
        })?;
        let outcome = {
            let mut stage = ui.stage("Publish");
            let outcome = publisher.publish(&capture, &original, &device_address);
            if !matches!(outcome, PublishOutcome::Published(_)) {
                stage.fail(outcome.label());
            }
            outcome
        };
        match outcome {
            PublishOutcome::Published(result) => finish(&store, timestamp, &result),
            PublishOutcome::RegistrationDegraded { result, reason } => {
                store.write_publish_result(timestamp, &result)?;
                eprintln!("stored as {} but registration failed: {}", result.storage_id, reason);
                std::process::exit(2);
            }
            PublishOutcome::StorageFailed(e) => Err(anyhow!(e)),
        }
    }
}

fn finish(store: &ArtifactStore, timestamp: u64, result: &PublishResult) -> Result<()> {
    let path = store.write_publish_result(timestamp, result)?;
    println!(
        "OK: capture {} stored as {} and registered as {} ({})",
        timestamp,
        result.storage_id,
        result.registration_id().unwrap_or("-"),
        path.display()
    );
    Ok(())
}

fn list(store: &ArtifactStore) -> Result<()> {
    for timestamp in store.list_captures()? {
        let status = match store.read_publish_result(timestamp) {
            Ok(result) if result.registration_id().is_some() => "registered",
            Ok(_) => "stored, unregistered",
            Err(_) => "unpublished",
        };
        println!("{}  {}", timestamp, status);
    }
    Ok(())
}
