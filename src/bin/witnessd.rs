//! witnessd - Depth Witness capture daemon
//!
//! This daemon:
//! 1. Polls the stereo source continuously at the configured frame rate
//! 2. On a trigger, runs one capture: depth, payload, signature, artifacts
//! 3. Publishes to content storage, then registers the asset
//!
//! Commands on stdin: `c` or Enter captures, `x` swaps the cameras, `q` quits.
//! With `--once`, performs one capture and exits with 0 (published), 2 (registration
//! degraded) or 1 (errored / configuration error).

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::{BufRead, IsTerminal};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::{Duration, Instant};

use depth_witness::ingest::{open_source, StereoRig};
use depth_witness::session::{CaptureReport, CaptureSession};
use depth_witness::ui::{CaptureProgress, Ui};
use depth_witness::{ArtifactStore, BlockMatchingEngine, CaptureController, WitnessConfig};

#[derive(Parser, Debug)]
#[command(name = "witnessd", about = "Stereo depth capture, signing and publishing daemon")]
struct Args {
    /// Capture once and exit (exit code reflects the outcome)
    #[arg(long)]
    once: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Command {
    Capture,
    Swap,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    match line.trim().to_ascii_lowercase().as_str() {
        "" | "c" => Some(Command::Capture),
        "x" => Some(Command::Swap),
        "q" => Some(Command::Quit),
        _ => None,
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = Ui::from_args(Some(&args.ui), std::io::stderr().is_terminal(), false);
    let cfg = WitnessConfig::load()?;

    let engine = BlockMatchingEngine::from_path(&cfg.calibration_path);
    let store = ArtifactStore::open(&cfg.output_dir)?;
    if !cfg.has_signing_key() {
        log::warn!("WITNESS_PRIVATE_KEY not set; captures will carry the unsigned sentinel");
    }
    let mut controller =
        CaptureController::new(engine, cfg.http_publisher(), store, cfg.signing_key());

    log::info!("witnessd running. writing to {}", cfg.output_dir.display());
    log::info!(
        "device={} storage={} registration={}",
        controller.device_address(),
        cfg.storage.url,
        cfg.registration.url
    );

    let mut rig = StereoRig::new(open_source(&cfg.camera)?)?;
    let mut session = CaptureSession::new();

    if args.once {
        rig.poll()?;
        let report = capture(&mut controller, &mut rig, &mut session, &ui)?;
        std::process::exit(report.status().exit_code());
    }

    let commands = spawn_command_readers()?;
    eprintln!("commands: [c|Enter] capture, [x] swap cameras, [q] quit");

    let interval = cfg.camera.frame_interval();
    let mut last_health_log = Instant::now();
    loop {
        let started = Instant::now();
        if let Err(e) = rig.poll() {
            log::warn!("stereo source: {:#}", e);
        }

        match commands.try_recv() {
            Ok(Command::Capture) => {
                interactive_capture(&mut controller, &mut rig, &mut session, &ui);
                if drain_triggers(&commands, &mut rig) {
                    break;
                }
            }
            Ok(Command::Swap) => {
                rig.swap();
            }
            Ok(Command::Quit) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        if last_health_log.elapsed() >= Duration::from_secs(30) {
            let stats = rig.stats();
            log::info!(
                "source health={} pairs={} ({}) captures={}",
                rig.is_healthy(),
                stats.pairs_captured,
                stats.description,
                session.sequence_number
            );
            last_health_log = Instant::now();
        }

        if let Some(rest) = interval.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    log::info!(
        "witnessd stopping after {} captures",
        session.sequence_number
    );
    Ok(())
}

type HttpController = CaptureController<
    BlockMatchingEngine,
    depth_witness::publish::HttpStorageClient,
    depth_witness::publish::HttpRegistrationClient,
>;

/// A trigger that cannot start is reported; the daemon keeps running.
fn interactive_capture(
    controller: &mut HttpController,
    rig: &mut StereoRig,
    session: &mut CaptureSession,
    ui: &Ui,
) -> Option<CaptureReport> {
    match capture(controller, rig, session, ui) {
        Ok(report) => Some(report),
        Err(e) => {
            log::error!("capture not started: {:#}", e);
            ui.stage("Capture").fail(format!("{:#}", e));
            None
        }
    }
}

fn capture(
    controller: &mut HttpController,
    rig: &mut StereoRig,
    session: &mut CaptureSession,
    ui: &Ui,
) -> Result<CaptureReport> {
    let pair = rig
        .latest()
        .cloned()
        .ok_or_else(|| anyhow!("no stereo pair available yet"))?;
    let mut progress = CaptureProgress::new(ui);
    let (next, report) =
        controller.trigger_with(std::mem::take(session), &pair, &mut |state| {
            progress.on_state(state)
        });
    progress.finish(&report);
    *session = next;
    ui.report(&report);
    Ok(report)
}

/// Drops capture triggers queued while a capture was running. Returns true on quit.
fn drain_triggers(commands: &Receiver<Command>, rig: &mut StereoRig) -> bool {
    let mut dropped = 0;
    let mut quit = false;
    while let Ok(command) = commands.try_recv() {
        match command {
            Command::Capture => dropped += 1,
            Command::Swap => {
                rig.swap();
            }
            Command::Quit => quit = true,
        }
    }
    if dropped > 0 {
        log::warn!("ignored {} trigger(s) received during capture", dropped);
    }
    quit
}

fn spawn_command_readers() -> Result<Receiver<Command>> {
    let (tx, rx) = mpsc::channel();
    let ctrlc_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(Command::Quit);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            match parse_command(&line) {
                Some(command) => {
                    if tx.send(command).is_err() {
                        break;
                    }
                }
                None => eprintln!("unknown command {:?}", line.trim()),
            }
        }
    });
    Ok(rx)
}
