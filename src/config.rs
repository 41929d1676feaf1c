use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::Zeroizing;

use crate::ingest::SourceConfig;
use crate::publish::{
    HttpRegistrationClient, HttpStorageClient, Publisher, RegistrationCheck, RegistrationTerms,
    DEFAULT_COMMERCIAL_REV_SHARE, DEFAULT_MINTING_FEE,
};

const DEFAULT_STORAGE_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_REGISTRATION_URL: &str = "http://127.0.0.1:3003";
const DEFAULT_STORAGE_TIMEOUT_SECS: u64 = 150;
const DEFAULT_REGISTRATION_TIMEOUT_SECS: u64 = 180;
const DEFAULT_OUTPUT_DIR: &str = "captures";
const DEFAULT_CALIBRATION_PATH: &str = "stereo_params.json";
const DEFAULT_LEFT_SOURCE: &str = "stub://left";
const DEFAULT_RIGHT_SOURCE: &str = "stub://right";
const DEFAULT_FPS: u32 = 15;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;

#[derive(Debug, Deserialize, Default)]
struct WitnessConfigFile {
    output_dir: Option<PathBuf>,
    calibration_path: Option<PathBuf>,
    storage: Option<StorageConfigFile>,
    registration: Option<RegistrationConfigFile>,
    camera: Option<CameraConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RegistrationConfigFile {
    url: Option<String>,
    timeout_secs: Option<u64>,
    minting_fee: Option<String>,
    commercial_rev_share: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    left: Option<String>,
    right: Option<String>,
    fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct WitnessConfig {
    pub output_dir: PathBuf,
    pub calibration_path: PathBuf,
    pub storage: EndpointSettings,
    pub registration: EndpointSettings,
    pub minting_fee: String,
    pub commercial_rev_share: u32,
    pub camera: SourceConfig,
    signing_key: Option<KeyMaterial>,
}

#[derive(Debug, Clone)]
pub struct EndpointSettings {
    pub url: String,
    pub timeout: Duration,
}

/// Device private key; never printed.
#[derive(Clone)]
struct KeyMaterial(Zeroizing<String>);

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial(<redacted>)")
    }
}

impl WitnessConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("WITNESS_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: WitnessConfigFile) -> Self {
        let storage = file.storage.unwrap_or_default();
        let registration = file.registration.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        Self {
            output_dir: file
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            calibration_path: file
                .calibration_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CALIBRATION_PATH)),
            storage: EndpointSettings {
                url: storage
                    .url
                    .unwrap_or_else(|| DEFAULT_STORAGE_URL.to_string()),
                timeout: Duration::from_secs(
                    storage.timeout_secs.unwrap_or(DEFAULT_STORAGE_TIMEOUT_SECS),
                ),
            },
            registration: EndpointSettings {
                url: registration
                    .url
                    .unwrap_or_else(|| DEFAULT_REGISTRATION_URL.to_string()),
                timeout: Duration::from_secs(
                    registration
                        .timeout_secs
                        .unwrap_or(DEFAULT_REGISTRATION_TIMEOUT_SECS),
                ),
            },
            minting_fee: registration
                .minting_fee
                .unwrap_or_else(|| DEFAULT_MINTING_FEE.to_string()),
            commercial_rev_share: registration
                .commercial_rev_share
                .unwrap_or(u32::from(DEFAULT_COMMERCIAL_REV_SHARE)),
            camera: SourceConfig {
                left: camera
                    .left
                    .unwrap_or_else(|| DEFAULT_LEFT_SOURCE.to_string()),
                right: camera
                    .right
                    .unwrap_or_else(|| DEFAULT_RIGHT_SOURCE.to_string()),
                width: camera.width.unwrap_or(DEFAULT_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_HEIGHT),
                fps: camera.fps.unwrap_or(DEFAULT_FPS),
            },
            signing_key: None,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_nonempty("WITNESS_STORAGE_URL") {
            self.storage.url = url;
        }
        if let Some(url) = env_nonempty("WITNESS_REGISTRATION_URL") {
            self.registration.url = url;
        }
        if let Some(secs) = env_nonempty("WITNESS_STORAGE_TIMEOUT_SECS") {
            self.storage.timeout = Duration::from_secs(secs.parse().map_err(|_| {
                anyhow!("WITNESS_STORAGE_TIMEOUT_SECS must be an integer number of seconds")
            })?);
        }
        if let Some(secs) = env_nonempty("WITNESS_REGISTRATION_TIMEOUT_SECS") {
            self.registration.timeout = Duration::from_secs(secs.parse().map_err(|_| {
                anyhow!("WITNESS_REGISTRATION_TIMEOUT_SECS must be an integer number of seconds")
            })?);
        }
        if let Some(fee) = env_nonempty("WITNESS_MINTING_FEE") {
            self.minting_fee = fee;
        }
        if let Some(share) = env_nonempty("WITNESS_REVENUE_SHARE") {
            self.commercial_rev_share = share
                .parse()
                .map_err(|_| anyhow!("WITNESS_REVENUE_SHARE must be an integer percentage"))?;
        }
        if let Some(dir) = env_nonempty("WITNESS_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(path) = env_nonempty("WITNESS_CALIBRATION_PATH") {
            self.calibration_path = PathBuf::from(path);
        }
        if let Some(left) = env_nonempty("WITNESS_LEFT_SOURCE") {
            self.camera.left = left;
        }
        if let Some(right) = env_nonempty("WITNESS_RIGHT_SOURCE") {
            self.camera.right = right;
        }
        self.signing_key = read_signing_key()?;
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.storage.url = validate_url("storage", &self.storage.url)?;
        self.registration.url = validate_url("registration", &self.registration.url)?;
        if self.storage.timeout.is_zero() || self.registration.timeout.is_zero() {
            return Err(anyhow!("service timeouts must be greater than zero"));
        }
        self.minting_fee = self.minting_fee.trim().to_string();
        if !is_decimal(&self.minting_fee) {
            return Err(anyhow!(
                "minting fee must be a non-negative decimal (got {:?})",
                self.minting_fee
            ));
        }
        if self.commercial_rev_share > 100 {
            return Err(anyhow!(
                "commercial revenue share must be within 0..=100 (got {})",
                self.commercial_rev_share
            ));
        }
        if self.camera.fps == 0 {
            return Err(anyhow!("camera fps must be greater than zero"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera frame size must be non-zero"));
        }
        Ok(())
    }

    pub fn has_signing_key(&self) -> bool {
        self.signing_key.is_some()
    }

    /// A copy of the configured private key, wiped on drop.
    pub fn signing_key(&self) -> Option<Zeroizing<String>> {
        self.signing_key.as_ref().map(|key| key.0.clone())
    }

    pub fn registration_terms(&self) -> RegistrationTerms {
        RegistrationTerms {
            minting_fee: self.minting_fee.clone(),
            // validate() bounds this to 0..=100
            commercial_rev_share: self.commercial_rev_share.min(100) as u8,
        }
    }

    pub fn http_publisher(&self) -> Publisher<HttpStorageClient, HttpRegistrationClient> {
        Publisher::new(
            HttpStorageClient::new(&self.storage.url, self.storage.timeout),
            HttpRegistrationClient::new(&self.registration.url, self.registration.timeout),
            self.registration_terms(),
        )
    }

    pub fn registration_check(&self) -> RegistrationCheck {
        RegistrationCheck::new(&self.registration.url, self.registration.timeout)
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_signing_key() -> Result<Option<KeyMaterial>> {
    if let Some(key) = env_nonempty("WITNESS_PRIVATE_KEY") {
        return Ok(Some(KeyMaterial(Zeroizing::new(key.trim().to_string()))));
    }
    let Some(path) = env_nonempty("WITNESS_PRIVATE_KEY_PATH") else {
        return Ok(None);
    };
    let raw = Zeroizing::new(
        std::fs::read_to_string(&path)
            .map_err(|e| anyhow!("failed to read private key file {}: {}", path, e))?,
    );
    let key = raw.trim();
    if key.is_empty() {
        return Err(anyhow!("private key file {} is empty", path));
    }
    Ok(Some(KeyMaterial(Zeroizing::new(key.to_string()))))
}

fn validate_url(name: &str, raw: &str) -> Result<String> {
    let parsed = url::Url::parse(raw.trim())
        .map_err(|e| anyhow!("{} endpoint {:?} is not a valid URL: {}", name, raw, e))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(anyhow!(
            "{} endpoint must use http or https (got {})",
            name,
            parsed.scheme()
        ));
    }
    Ok(raw.trim().trim_end_matches('/').to_string())
}

fn is_decimal(value: &str) -> bool {
    let mut parts = value.splitn(2, '.');
    let whole = parts.next().unwrap_or("");
    let fraction = parts.next();
    let digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    match fraction {
        None => !whole.is_empty() && digits(whole),
        Some(frac) => {
            (!whole.is_empty() || !frac.is_empty()) && digits(whole) && digits(frac)
        }
    }
}

fn read_config_file(path: &Path) -> Result<WitnessConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
