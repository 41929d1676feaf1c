mod common;

use std::time::Duration;

use common::{registration_ok, signed_capture, storage_ok, MockService, Reply, DEV_ADDRESS, DEV_KEY};
use depth_witness::publish::{
    HttpRegistrationClient, HttpStorageClient, PublishError, PublishOutcome, Publisher,
    RegistrationCheck, RegistrationTerms, Stage,
};
use serde_json::Value;

const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0xFF, 0xD9];

fn publisher(service: &MockService) -> Publisher<HttpStorageClient, HttpRegistrationClient> {
    Publisher::new(
        HttpStorageClient::new(&service.url(), Duration::from_secs(5)),
        HttpRegistrationClient::new(&service.url(), Duration::from_secs(5)),
        RegistrationTerms::default(),
    )
}

#[test]
fn storage_500_never_reaches_registration() {
    let service = MockService::spawn(|req| match req.path.as_str() {
        "/upload-json" => Reply::Json(500, r#"{"detail":"ipfs down"}"#.to_string()),
        _ => registration_ok(),
    });
    let outcome = publisher(&service).publish(&signed_capture(Some(DEV_KEY)), JPEG, DEV_ADDRESS);

    match outcome {
        PublishOutcome::StorageFailed(PublishError::Service {
            stage,
            status,
            body,
            endpoint,
        }) => {
            assert_eq!(stage, Stage::Storage);
            assert_eq!(status, 500);
            assert!(body.contains("ipfs down"));
            assert!(endpoint.ends_with("/upload-json"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(service.count("/upload-json"), 1);
    assert_eq!(service.count("/register-ip"), 0);
}

#[test]
fn storage_upload_is_multipart_with_signed_metadata() {
    let service = MockService::spawn(|req| match req.path.as_str() {
        "/upload-json" => storage_ok(),
        _ => registration_ok(),
    });
    let capture = signed_capture(Some(DEV_KEY));
    publisher(&service).publish(&capture, JPEG, DEV_ADDRESS);

    let upload = service.last("/upload-json").expect("upload request");
    assert_eq!(upload.method, "POST");
    assert!(upload
        .headers
        .to_ascii_lowercase()
        .contains("content-type: multipart/form-data; boundary="));
    let body = upload.body_text();
    assert!(body.contains("name=\"image\"; filename=\"original_image.jpg\""));
    assert!(body.contains("name=\"wallet_address\"\r\n\r\n0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"));
    assert!(upload.body.windows(JPEG.len()).any(|w| w == JPEG));

    let expected_metadata =
        String::from_utf8(depth_witness::payload::to_canonical_bytes(&capture.metadata_document().unwrap()).unwrap())
            .unwrap();
    assert!(body.contains(&format!("name=\"metadata\"\r\n\r\n{}\r\n", expected_metadata)));
    assert!(expected_metadata.contains(&format!("\"signature\":\"{}\"", capture.signature)));
}

#[test]
fn registration_request_threads_storage_identifiers() {
    let service = MockService::spawn(|req| match req.path.as_str() {
        "/upload-json" => storage_ok(),
        _ => registration_ok(),
    });
    let outcome = publisher(&service).publish(&signed_capture(Some(DEV_KEY)), JPEG, DEV_ADDRESS);

    let result = match outcome {
        PublishOutcome::Published(result) => result,
        other => panic!("unexpected outcome {other:?}"),
    };
    assert_eq!(result.storage_id, "bafyimage");
    assert_eq!(result.metadata_id.as_deref(), Some("bafymeta"));
    assert_eq!(result.storage_url.as_deref(), Some("https://gw.example/ipfs/bafyimage"));
    assert_eq!(result.registration_id(), Some("0xipid"));
    assert_eq!(result.registration.as_ref().unwrap().token_id, "42");

    let register = service.last("/register-ip").expect("registration request");
    assert!(register.headers.to_ascii_lowercase().contains("content-type: application/json"));
    let body: Value = serde_json::from_slice(&register.body).unwrap();
    assert_eq!(body["imageCid"], "bafyimage");
    assert_eq!(body["metadataCid"], "bafymeta");
    assert_eq!(body["deviceAddress"], DEV_ADDRESS);
    assert_eq!(body["mintingFee"], "0.1");
    assert_eq!(body["commercialRevShare"], 10);
    assert_eq!(body["depthMetadata"]["valid_pixels"], 2);
    assert_eq!(body["depthMetadata"]["max"], 5.0);
    assert_eq!(body["depthMetadata"]["timestamp"], 1_700_000_000_123u64);
}

#[test]
fn registration_rejection_is_degraded_not_fatal() {
    let service = MockService::spawn(|req| match req.path.as_str() {
        "/upload-json" => storage_ok(),
        _ => Reply::Json(200, r#"{"success":false,"error":"insufficient funds"}"#.to_string()),
    });
    let outcome = publisher(&service).publish(&signed_capture(None), JPEG, DEV_ADDRESS);

    match outcome {
        PublishOutcome::RegistrationDegraded { result, reason } => {
            assert_eq!(result.storage_id, "bafyimage");
            assert_eq!(result.registration_id(), None);
            assert!(matches!(reason, PublishError::Rejected { stage: Stage::Registration, .. }));
            assert!(reason.to_string().contains("insufficient funds"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(service.count("/register-ip"), 1);
}

#[test]
fn registration_http_error_keeps_status_and_body() {
    let service = MockService::spawn(|req| match req.path.as_str() {
        "/upload-json" => storage_ok(),
        _ => Reply::Json(502, r#"{"error":"rpc unavailable"}"#.to_string()),
    });
    let outcome = publisher(&service).publish(&signed_capture(Some(DEV_KEY)), JPEG, DEV_ADDRESS);

    match outcome {
        PublishOutcome::RegistrationDegraded { result, reason } => {
            assert_eq!(result.storage_id, "bafyimage");
            assert_eq!(reason.status(), Some(502));
            assert!(reason.to_string().contains("rpc unavailable"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn storage_timeout_is_reported_as_timeout() {
    let service = MockService::spawn(|_| Reply::Stall(Duration::from_secs(3)));
    let publisher = Publisher::new(
        HttpStorageClient::new(&service.url(), Duration::from_millis(300)),
        HttpRegistrationClient::new(&service.url(), Duration::from_millis(300)),
        RegistrationTerms::default(),
    );
    match publisher.publish(&signed_capture(None), JPEG, DEV_ADDRESS) {
        PublishOutcome::StorageFailed(err) => {
            assert!(err.is_timeout(), "expected timeout, got {err}");
            assert_eq!(err.stage(), Stage::Storage);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(service.count("/register-ip"), 0);
}

#[test]
fn storage_response_without_cid_is_invalid() {
    let service = MockService::spawn(|req| match req.path.as_str() {
        "/upload-json" => Reply::Json(200, r#"{"cid":"","gateway_url":null}"#.to_string()),
        _ => registration_ok(),
    });
    match publisher(&service).publish(&signed_capture(None), JPEG, DEV_ADDRESS) {
        PublishOutcome::StorageFailed(PublishError::InvalidResponse { stage, .. }) => {
            assert_eq!(stage, Stage::Storage)
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(service.count("/register-ip"), 0);
}

#[test]
fn registration_check_reads_registered_flag() {
    let service = MockService::spawn(|req| {
        if req.path.ends_with(DEV_ADDRESS) {
            Reply::Json(200, r#"{"registered":true}"#.to_string())
        } else {
            Reply::Json(200, r#"{"registered":false}"#.to_string())
        }
    });
    let check = RegistrationCheck::new(&service.url(), Duration::from_secs(5));
    assert!(check.is_registered(DEV_ADDRESS).unwrap());
    assert!(!check.is_registered("0x0000000000000000000000000000000000000001").unwrap());
    let last = service.last("/check-registration/").unwrap();
    assert_eq!(last.method, "GET");
}

#[test]
fn registration_check_surfaces_service_errors() {
    let service = MockService::spawn(|_| Reply::Json(500, "oops".to_string()));
    let check = RegistrationCheck::new(&service.url(), Duration::from_secs(5));
    let err = check.is_registered(DEV_ADDRESS).unwrap_err();
    assert_eq!(err.stage(), Stage::RegistrationCheck);
    assert_eq!(err.status(), Some(500));
}
