#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use depth_witness::{build, encode, sign_capture, DisparityField, Frame, SignedCapture};

pub const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const DEV_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

#[derive(Clone, Debug)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub headers: String,
    pub body: Vec<u8>,
}

impl Recorded {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub enum Reply {
    Json(u16, String),
    Stall(Duration),
}

type Responder = dyn Fn(&Recorded) -> Reply + Send + Sync;

/// In-process HTTP service that records every request.
pub struct MockService {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl MockService {
    pub fn spawn(responder: impl Fn(&Recorded) -> Reply + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock service");
        let addr = listener.local_addr().expect("mock addr");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();
        let responder: Arc<Responder> = Arc::new(responder);
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else {
                    continue;
                };
                let recorded = recorded.clone();
                let responder = responder.clone();
                std::thread::spawn(move || handle(stream, &recorded, responder.as_ref()));
            }
        });
        Self { addr, requests }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.path.starts_with(path))
            .count()
    }

    pub fn last(&self, path: &str) -> Option<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.path.starts_with(path))
            .last()
    }
}

fn handle(mut stream: TcpStream, recorded: &Mutex<Vec<Recorded>>, responder: &Responder) {
    let Some(request) = read_request(&mut stream) else {
        return;
    };
    recorded.lock().unwrap().push(request.clone());
    match responder(&request) {
        Reply::Json(status, body) => {
            let response = format!(
                "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                reason(status),
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
            let _ = stream.flush();
        }
        Reply::Stall(duration) => std::thread::sleep(duration),
    }
}

fn read_request(stream: &mut TcpStream) -> Option<Recorded> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let header_end = loop {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos;
        }
    };
    let headers = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let content_length = headers
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    let mut request_line = headers.lines().next()?.split_whitespace();
    Some(Recorded {
        method: request_line.next()?.to_string(),
        path: request_line.next()?.to_string(),
        headers,
        body,
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        _ => "Status",
    }
}

pub fn storage_ok() -> Reply {
    Reply::Json(
        200,
        r#"{"cid":"bafyimage","metadata_cid":"bafymeta","gateway_url":"https://gw.example/ipfs/bafyimage"}"#
            .to_string(),
    )
}

pub fn registration_ok() -> Reply {
    Reply::Json(
        200,
        r#"{"success":true,"data":{"ipId":"0xipid","tokenId":"42","txHash":"0xtxhash","nftContract":"0xnft","explorerUrl":"https://explorer.example/ipa/0xipid"}}"#
            .to_string(),
    )
}

pub fn signed_capture(key: Option<&str>) -> SignedCapture {
    let field = DisparityField::from_fn(2, 2, |r, c| match (r, c) {
        (0, 0) => 5.0,
        (1, 1) => 3.0,
        _ => 0.0,
    })
    .unwrap();
    let left = Frame::filled(2, 2, [10, 20, 30]).unwrap();
    let companion = Frame::filled(4, 2, [30, 20, 10]).unwrap();
    sign_capture(build(1_700_000_000_123, &left, &companion, encode(&field)).unwrap(), key)
}
