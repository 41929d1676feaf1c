//! Blocking HTTP clients for the storage, registration, and registration-check services.

use serde::Deserialize;
use std::io;
use std::time::Duration;

use super::error::{PublishError, Stage};
use super::{
    RegistrationReceipt, RegistrationRequest, RegistrationService, StorageReceipt, StorageService,
};

pub const UPLOAD_PATH: &str = "/upload-json";
pub const REGISTER_PATH: &str = "/register-ip";
pub const CHECK_REGISTRATION_PATH: &str = "/check-registration";

const IMAGE_FILENAME: &str = "original_image.jpg";

fn endpoint_url(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

// -------------------- Storage --------------------

/// Client for `POST /upload-json`.
pub struct HttpStorageClient {
    agent: ureq::Agent,
    url: String,
}

impl HttpStorageClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            agent: build_agent(timeout),
            url: endpoint_url(base_url, UPLOAD_PATH),
        }
    }
}

impl StorageService for HttpStorageClient {
    fn endpoint(&self) -> &str {
        &self.url
    }

    fn upload(
        &self,
        image_jpeg: &[u8],
        metadata_json: &str,
        device_address: &str,
    ) -> Result<StorageReceipt, PublishError> {
        let stage = Stage::Storage;
        let mut form = Multipart::new();
        form.file("image", IMAGE_FILENAME, "image/jpeg", image_jpeg);
        form.text("metadata", metadata_json);
        form.text("wallet_address", device_address);
        let (content_type, body) = form.finish();

        log::info!(
            "storage stage: uploading {} byte image + {} byte metadata to {}",
            image_jpeg.len(),
            metadata_json.len(),
            self.url
        );
        let response = self
            .agent
            .post(&self.url)
            .set("Content-Type", &content_type)
            .send_bytes(&body)
            .map_err(|e| map_transport(stage, &self.url, e))?;
        let text = read_success_body(stage, &self.url, response)?;
        let receipt: StorageReceipt = serde_json::from_str(&text)
            .map_err(|e| PublishError::invalid(stage, &self.url, e))?;
        if receipt.cid.trim().is_empty() {
            return Err(PublishError::invalid(stage, &self.url, "empty cid"));
        }
        Ok(receipt)
    }
}

// -------------------- Registration --------------------

#[derive(Deserialize)]
struct RegistrationEnvelope {
    #[serde(default)]
    success: bool,
    data: Option<RegistrationReceipt>,
    error: Option<String>,
}

/// Client for `POST /register-ip`.
pub struct HttpRegistrationClient {
    agent: ureq::Agent,
    url: String,
}

impl HttpRegistrationClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            agent: build_agent(timeout),
            url: endpoint_url(base_url, REGISTER_PATH),
        }
    }
}

impl RegistrationService for HttpRegistrationClient {
    fn endpoint(&self) -> &str {
        &self.url
    }

    fn register(&self, request: &RegistrationRequest) -> Result<RegistrationReceipt, PublishError> {
        let stage = Stage::Registration;
        let body = serde_json::to_string(request)
            .map_err(|e| PublishError::invalid(stage, &self.url, format!("encode request: {}", e)))?;
        log::info!(
            "registration stage: registering image {} for {} at {}",
            request.image_cid,
            request.device_address,
            self.url
        );
        let response = self
            .agent
            .post(&self.url)
            .set("Content-Type", "application/json")
            .send_string(&body)
            .map_err(|e| map_transport(stage, &self.url, e))?;
        let text = read_success_body(stage, &self.url, response)?;
        let envelope: RegistrationEnvelope = serde_json::from_str(&text)
            .map_err(|e| PublishError::invalid(stage, &self.url, e))?;
        if !envelope.success {
            return Err(PublishError::Rejected {
                stage,
                endpoint: self.url.clone(),
                reason: envelope
                    .error
                    .unwrap_or_else(|| "service reported failure without a reason".to_string()),
            });
        }
        envelope
            .data
            .ok_or_else(|| PublishError::invalid(stage, &self.url, "success without data"))
    }
}

// -------------------- Registration check --------------------

#[derive(Deserialize)]
struct CheckResponse {
    registered: bool,
}

/// Client for `GET /check-registration/{address}`.
pub struct RegistrationCheck {
    agent: ureq::Agent,
    base_url: String,
}

impl RegistrationCheck {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            agent: build_agent(timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn is_registered(&self, device_address: &str) -> Result<bool, PublishError> {
        let stage = Stage::RegistrationCheck;
        let url = format!(
            "{}{}/{}",
            self.base_url, CHECK_REGISTRATION_PATH, device_address
        );
        let response = self
            .agent
            .get(&url)
            .call()
            .map_err(|e| map_transport(stage, &url, e))?;
        let text = read_success_body(stage, &url, response)?;
        let parsed: CheckResponse =
            serde_json::from_str(&text).map_err(|e| PublishError::invalid(stage, &url, e))?;
        Ok(parsed.registered)
    }
}

// -------------------- Plumbing --------------------

fn read_success_body(
    stage: Stage,
    endpoint: &str,
    response: ureq::Response,
) -> Result<String, PublishError> {
    let status = response.status();
    let body = response
        .into_string()
        .map_err(|e| map_io(stage, endpoint, &e))?;
    if !(200..300).contains(&status) {
        return Err(PublishError::service(stage, endpoint, status, body));
    }
    Ok(body)
}

fn map_transport(stage: Stage, endpoint: &str, err: ureq::Error) -> PublishError {
    match err {
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            PublishError::service(stage, endpoint, status, body)
        }
        ureq::Error::Transport(transport) => {
            if is_timeout(&transport) {
                PublishError::Timeout {
                    stage,
                    endpoint: endpoint.to_string(),
                }
            } else {
                PublishError::Network {
                    stage,
                    endpoint: endpoint.to_string(),
                    reason: transport.to_string(),
                }
            }
        }
    }
}

fn map_io(stage: Stage, endpoint: &str, err: &io::Error) -> PublishError {
    if is_timeout_kind(err.kind()) {
        PublishError::Timeout {
            stage,
            endpoint: endpoint.to_string(),
        }
    } else {
        PublishError::Network {
            stage,
            endpoint: endpoint.to_string(),
            reason: err.to_string(),
        }
    }
}

fn is_timeout_kind(kind: io::ErrorKind) -> bool {
    matches!(kind, io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    let mut source = std::error::Error::source(transport);
    while let Some(err) = source {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if is_timeout_kind(io_err.kind()) {
                return true;
            }
        }
        source = err.source();
    }
    transport.to_string().to_lowercase().contains("timed out")
}

fn is_plain_token(value: &str) -> bool {
    !value.is_empty() && !value.contains(|c: char| c == '"' || c == '\\' || c.is_control())
}

/// Minimal `multipart/form-data` body builder.
struct Multipart {
    boundary: String,
    body: Vec<u8>,
}

impl Multipart {
    fn new() -> Self {
        Self {
            boundary: format!("depth-witness-{:016x}", rand::random::<u64>()),
            body: Vec::new(),
        }
    }

    fn text(&mut self, name: &str, value: &str) {
        self.part_header(name, None);
        self.body.extend_from_slice(value.as_bytes());
        self.body.extend_from_slice(b"\r\n");
    }

    fn file(&mut self, name: &str, filename: &str, content_type: &str, bytes: &[u8]) {
        self.part_header(name, Some((filename, content_type)));
        self.body.extend_from_slice(bytes);
        self.body.extend_from_slice(b"\r\n");
    }

    /// Names and filenames are written unescaped; callers pass constants only.
    fn part_header(&mut self, name: &str, file: Option<(&str, &str)>) {
        debug_assert!(is_plain_token(name), "multipart name {:?} needs escaping", name);
        debug_assert!(
            file.map_or(true, |(filename, _)| is_plain_token(filename)),
            "multipart filename needs escaping"
        );
        let mut header = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"",
            self.boundary, name
        );
        if let Some((filename, content_type)) = file {
            header.push_str(&format!(
                "; filename=\"{}\"\r\nContent-Type: {}",
                filename, content_type
            ));
        }
        header.push_str("\r\n\r\n");
        self.body.extend_from_slice(header.as_bytes());
    }

    fn finish(mut self) -> (String, Vec<u8>) {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        (
            format!("multipart/form-data; boundary={}", self.boundary),
            self.body,
        )
    }
}
