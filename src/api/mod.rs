//! Minimal HTTP/1.1 front end for the ripeness service.
//!
//! Routes:
//! - `GET /health`
//! - `POST /detect` with JSON `{"image": "<data URL>"}`
//! - `GET /stats`
//! - `GET /detections.csv` (404 when no detection log is configured)

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::PipelineError;
use crate::response::ErrorBody;
use crate::service::RipenessService;

const MAX_HEADER_BYTES: usize = 8192;
const DEFAULT_MAX_REQUEST_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    /// Largest accepted request body.
    pub max_request_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    service: Arc<RipenessService>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, service: Arc<RipenessService>) -> Self {
        Self { cfg, service }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg;
        let service = self.service;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, cfg, service, shutdown_thread) {
                log::error!("ripeness api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: ApiConfig,
    service: Arc<RipenessService>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let service = service.clone();
                let max_body = cfg.max_request_bytes;
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &service, max_body) {
                        log::warn!("ripeness api request from {} rejected: {}", peer, err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(20));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

#[derive(Deserialize)]
struct DetectRequest {
    image: String,
}

fn handle_connection(mut stream: TcpStream, service: &RipenessService, max_body: usize) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = match read_request(&mut stream, max_body) {
        Ok(request) => request,
        Err(RequestError::TooLarge) => {
            write_error(&mut stream, 413, "request body too large")?;
            return Err(anyhow!("request body too large"));
        }
        Err(RequestError::Malformed(msg)) => {
            write_error(&mut stream, 400, "malformed request")?;
            return Err(anyhow!(msg));
        }
        Err(RequestError::Io(err)) => return Err(err.into()),
    };

    let allowed = match request.path.as_str() {
        "/health" | "/stats" | "/detections.csv" => "GET",
        "/detect" => "POST",
        _ => {
            write_error(&mut stream, 404, "not found")?;
            return Ok(());
        }
    };
    if request.method != allowed {
        write_error(&mut stream, 405, "method not allowed")?;
        return Ok(());
    }

    match request.path.as_str() {
        "/health" => write_response(&mut stream, 200, "application/json", br#"{"status":"ok"}"#),
        "/stats" => {
            let body = serde_json::to_vec(&service.stats())?;
            write_response(&mut stream, 200, "application/json", &body)
        }
        "/detections.csv" => match service.export_csv() {
            Ok(Some(csv)) => write_response(&mut stream, 200, "text/csv", &csv),
            Ok(None) => write_error(&mut stream, 404, "detection log not configured"),
            Err(err) => {
                log::error!("detection export failed: {:#}", err);
                write_error(&mut stream, 500, "internal error")
            }
        },
        _ => handle_detect(&mut stream, service, &request.body),
    }
}

fn handle_detect(stream: &mut TcpStream, service: &RipenessService, body: &[u8]) -> Result<()> {
    let request: DetectRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(_) => return write_error(stream, 400, "request body must be JSON {\"image\": \"<data url>\"}"),
    };
    match service.detect_data_url(&request.image) {
        Ok(payload) => {
            let body = serde_json::to_vec(&payload)?;
            log::debug!("detect: {} records", payload.detections.len());
            write_response(stream, 200, "application/json", &body)
        }
        Err(err) => match err.downcast_ref::<PipelineError>() {
            Some(pipeline_err) => {
                log::warn!("detect failed: {}", pipeline_err);
                write_error(stream, pipeline_err.status(), &pipeline_err.to_string())
            }
            None => {
                log::error!("detect failed: {:#}", err);
                write_error(stream, 500, "internal error")
            }
        },
    }
}

#[derive(Debug)]
enum RequestError {
    TooLarge,
    Malformed(String),
    Io(std::io::Error),
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        RequestError::Io(err)
    }
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}

fn read_request(stream: &mut TcpStream, max_body: usize) -> std::result::Result<HttpRequest, RequestError> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(RequestError::Malformed("headers too large".into()));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(RequestError::Malformed("connection closed before headers".into()));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| RequestError::Malformed("empty request".into()))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| RequestError::Malformed("missing method".into()))?;
    let raw_path = parts
        .next()
        .ok_or_else(|| RequestError::Malformed("missing path".into()))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| RequestError::Malformed("invalid content-length".into()))?,
        None => 0,
    };
    if content_length > max_body {
        return Err(RequestError::TooLarge);
    }

    let mut body = data.split_off(header_end + 4);
    body.truncate(content_length);
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(RequestError::Malformed("body shorter than content-length".into()));
        }
        let take = n.min(content_length - body.len());
        body.extend_from_slice(&buf[..take]);
    }

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        body,
    })
}

fn write_error(stream: &mut TcpStream, status: u16, message: &str) -> Result<()> {
    let body = serde_json::to_vec(&ErrorBody::new(message))?;
    write_response(stream, status, "application/json", &body)
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}
