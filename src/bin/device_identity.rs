//! device_identity - Device key utilities.
//!
//! - `generate`: create a new secp256k1 device key and print its address
//! - `address`: print the address of the configured key
//! - `check`: ask the registration service whether an address is registered

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use depth_witness::{Address, DeviceKey, WitnessConfig};

#[derive(Parser, Debug)]
#[command(name = "device_identity", about = "Device key and registration utilities")]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Generate a new device key
    Generate {
        /// Write the private key to this file (created 0600, never overwritten)
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,
    },
    /// Print the address of the configured key (WITNESS_PRIVATE_KEY / _PATH)
    Address,
    /// Check whether a device address is registered
    Check {
        /// Address to check; defaults to the configured key's address
        #[arg(value_name = "ADDRESS")]
        address: Option<String>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match Args::parse().command {
        Cmd::Generate { out } => generate(out),
        Cmd::Address => {
            let cfg = WitnessConfig::load()?;
            println!("{}", configured_address(&cfg)?);
            Ok(())
        }
        Cmd::Check { address } => {
            let cfg = WitnessConfig::load()?;
            let address = match address {
                Some(raw) => raw.parse::<Address>().context("parse address")?,
                None => configured_address(&cfg)?,
            };
            let registered = cfg.registration_check().is_registered(&address.to_string())?;
            if registered {
                println!("{} is registered", address);
                Ok(())
            } else {
                println!("{} is NOT registered", address);
                std::process::exit(1);
            }
        }
    }
}

fn generate(out: Option<PathBuf>) -> Result<()> {
    let key = DeviceKey::generate();
    println!("address: {}", key.address());
    match out {
        Some(path) => {
            write_key_file(&path, &key)?;
            println!("private key written to {}", path.display());
            println!("set WITNESS_PRIVATE_KEY_PATH={} to use it", path.display());
        }
        None => {
            println!("private key: {}", key.to_hex().as_str());
            eprintln!("store the private key securely; it is not saved anywhere");
        }
    }
    Ok(())
}

fn write_key_file(path: &PathBuf, key: &DeviceKey) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("create key file {}", path.display()))?;
    file.write_all(key.to_hex().as_bytes())?;
    file.write_all(b"\n")?;
    file.sync_all()?;
    Ok(())
}

fn configured_address(cfg: &WitnessConfig) -> Result<Address> {
    let key = cfg
        .signing_key()
        .ok_or_else(|| anyhow!("no device key configured (WITNESS_PRIVATE_KEY or WITNESS_PRIVATE_KEY_PATH)"))?;
    Ok(DeviceKey::from_hex(&key)?.address())
}
