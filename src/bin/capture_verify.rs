//! capture_verify - Verify a signed capture artifact.
//!
//! This tool proves:
//! - The artifact's canonical bytes can be re-derived from its fields
//! - The EIP-191 signature recovers a signer address
//! - The signer matches the expected device address (when given)
//! - The embedded depth record is structurally sound
//!
//! Unsigned captures and captures carrying a signing error fail verification.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use sha2::{Digest, Sha256};
use std::path::PathBuf;

use depth_witness::crypto::{recover_signer, Address, CaptureSignature};
use depth_witness::storage::read_signed_capture_file;
use depth_witness::ui::Ui;

#[derive(Parser, Debug)]
#[command(
    name = "capture_verify",
    about = "Verify the signature of a signed capture artifact"
)]
struct Args {
    /// Path to a capture_<ts>_signed.json artifact
    #[arg(value_name = "PATH")]
    capture: PathBuf,

    /// Expected device address (0x-prefixed, any casing)
    #[arg(long, value_name = "ADDRESS")]
    address: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let expected: Option<Address> = args
        .address
        .as_deref()
        .map(|a| a.parse::<Address>().context("parse --address"))
        .transpose()?;

    let capture = {
        let _stage = ui.stage("Read signed capture");
        read_signed_capture_file(&args.capture)?
    };
    println!("capture_verify: checking {}", args.capture.display());
    println!("  timestamp: {}", capture.data.timestamp);

    {
        let _stage = ui.stage("Check depth record");
        capture
            .data
            .depth
            .validate()
            .context("embedded depth record is malformed")?;
    }
    if args.verbose {
        println!("{}", capture.data.depth.summary(capture.data.timestamp));
        let bytes = capture.data.canonical_bytes()?;
        let digest: [u8; 32] = Sha256::digest(&bytes).into();
        println!("  canonical bytes: {}", bytes.len());
        println!("  payload sha256: {}", hex::encode(digest));
    }

    match &capture.signature {
        CaptureSignature::Signed(_) => {}
        CaptureSignature::Unsigned => {
            return Err(anyhow!("UNVERIFIABLE: capture is unsigned"));
        }
        CaptureSignature::Failed(reason) => {
            return Err(anyhow!("UNVERIFIABLE: signing failed on device: {}", reason));
        }
    }

    let signer = {
        let _stage = ui.stage("Recover signer");
        recover_signer(&capture).context("signature does not verify")?
    };
    println!("  signer: {}", signer);

    if let Some(expected) = expected {
        if signer != expected {
            return Err(anyhow!(
                "TAMPER: signer {} does not match expected device {}",
                signer,
                expected
            ));
        }
        println!("OK: capture signed by {}.", expected);
    } else {
        println!("OK: signature valid (no --address given; signer not pinned).");
    }
    Ok(())
}
