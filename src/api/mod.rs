//! HTTP surface: the MJPEG feed and the camera-mode control endpoints.
//!
//! A nonblocking accept loop hands every connection to its own thread, so a
//! long-lived `/video_feed` viewer never delays a control request.

use crate::camera::CameraMode;
use crate::pipeline::Pipeline;
use crate::stream::{self, FrameStreamer, StreamSettings};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_REQUEST_BYTES: usize = 8192;

/// A viewer that cannot take a part within this window is dropped.
const STREAM_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

const ROUTES: &[&str] = &[
    "/",
    "/video_feed",
    "/switch_camera_day",
    "/switch_camera_night",
    "/status",
    "/health",
];

const INDEX_HTML: &str = "<!doctype html>\n<html>\n<head><title>habitat-cam</title></head>\n\
<body>\n<h1>habitat-cam</h1>\n<img src=\"/video_feed\" alt=\"live feed\">\n\
<p>POST /switch_camera_day or /switch_camera_night to change cameras.</p>\n</body>\n</html>\n";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub stream: StreamSettings,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:5005".to_string(),
            stream: StreamSettings::default(),
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
    /// Stop accepting connections. Open viewers end once the pipeline shuts down.
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
    pipeline: Arc<Pipeline>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, pipeline: Arc<Pipeline>) -> Self {
        Self { cfg, pipeline }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .map_err(|err| anyhow!("invalid http addr '{}': {}", self.cfg.addr, err))?;
        let listener = TcpListener::bind(configured_addr)
            .map_err(|err| anyhow!("failed to bind http server on {}: {}", configured_addr, err))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg;
        let pipeline = self.pipeline;
        let join = std::thread::Builder::new()
            .name("http-accept".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, cfg, pipeline, shutdown_thread) {
                    log::error!("http server stopped: {}", err);
                }
            })?;
        log::info!("http server listening on {}", addr);

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
    pipeline: Arc<Pipeline>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let cfg = cfg.clone();
                let pipeline = pipeline.clone();
                let spawned = std::thread::Builder::new()
                    .name("http-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &cfg, &pipeline) {
                            log::warn!("http request from {} failed: {:#}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("dropping connection from {}: {}", peer, err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, cfg: &ApiConfig, pipeline: &Arc<Pipeline>) -> Result<()> {
    // Accepted sockets inherit the listener's nonblocking flag on some platforms.
    stream.set_nonblocking(false)?;
    let request = read_request(&mut stream)?;

    if request.method == "OPTIONS" {
        return write_response(&mut stream, 204, "text/plain", b"");
    }

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/") => write_response(&mut stream, 200, "text/html; charset=utf-8", INDEX_HTML.as_bytes()),
        ("GET", "/video_feed") => stream_video(stream, cfg, pipeline),
        ("POST", "/switch_camera_day") => switch_camera(&mut stream, pipeline, CameraMode::Day),
        ("POST", "/switch_camera_night") => switch_camera(&mut stream, pipeline, CameraMode::Night),
        ("GET", "/status") => {
            let status = pipeline.status()?;
            let payload = serde_json::to_vec(&status)?;
            write_response(&mut stream, 200, "application/json", &payload)
        }
        ("GET", "/health") => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        (_, path) if ROUTES.contains(&path) => {
            write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)
        }
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

fn switch_camera(stream: &mut TcpStream, pipeline: &Pipeline, target: CameraMode) -> Result<()> {
    match pipeline.switch_mode(target) {
        Ok(outcome) => write_response(stream, 200, "text/plain; charset=utf-8", outcome.message().as_bytes()),
        Err(err) => {
            log::warn!("switch to {} mode failed: {:#}", target, err);
            let body = format!("Failed to switch to {} mode: {:#}", target, err);
            write_response(stream, 500, "text/plain; charset=utf-8", body.as_bytes())
        }
    }
}

fn stream_video(mut stream: TcpStream, cfg: &ApiConfig, pipeline: &Arc<Pipeline>) -> Result<()> {
    let peer = stream.peer_addr()?;
    stream.set_write_timeout(Some(STREAM_WRITE_TIMEOUT))?;
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nCache-Control: no-cache, no-store, must-revalidate\r\n\
Pragma: no-cache\r\nConnection: close\r\nAccess-Control-Allow-Origin: *\r\n\r\n",
        stream::content_type()
    );
    stream.write_all(header.as_bytes())?;
    log::info!("viewer {} connected", peer);

    let mut streamer = FrameStreamer::new(pipeline.clone(), cfg.stream.clone());
    loop {
        let Some(part) = streamer.next_part()? else {
            log::info!("viewer {} released at shutdown", peer);
            break;
        };
        if let Err(err) = stream.write_all(&part).and_then(|_| stream.flush()) {
            log::info!(
                "viewer {} disconnected after {} frames: {}",
                peer,
                streamer.emitted(),
                err
            );
            break;
        }
    }
    Ok(())
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break None;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break Some(pos + 4);
        }
    };
    let head_len = header_end.unwrap_or(data.len());
    let text = String::from_utf8_lossy(&data[..head_len]);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    let request = HttpRequest {
        method: method.to_uppercase(),
        path,
        headers,
    };

    // Drain a small body so closing the socket does not reset the client.
    let body_received = data.len() - head_len;
    let body_remaining = request.content_length().saturating_sub(body_received);
    if body_remaining > 0 && body_remaining <= MAX_REQUEST_BYTES {
        let mut body = vec![0u8; body_remaining];
        stream.read_exact(&mut body)?;
    }
    Ok(request)
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        204 => "HTTP/1.1 204 No Content",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\n\
Cache-Control: no-store\r\nConnection: close\r\n\
Access-Control-Allow-Origin: *\r\nAccess-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
Access-Control-Allow-Headers: *\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
}

impl HttpRequest {
    fn content_length(&self) -> usize {
        self.headers
            .get("content-length")
            .and_then(|value| value.parse().ok())
            .unwrap_or(0)
    }
}
