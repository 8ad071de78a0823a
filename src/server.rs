//! Thin HTTP transport over the controller and its shared state.
//!
//! Routes:
//! - `GET /` viewer page
//! - `GET /video_feed` MJPEG stream (`multipart/x-mixed-replace`)
//! - `GET /emotions` latest emotion status as JSON
//! - `POST /start`, `POST /stop` lifecycle controls
//! - `POST /analyze` score one base64 image from `{"image": ...}` and return it annotated
//! - `GET /warmup` push a blank frame through the inference backend
//! - `GET /health` liveness probe
//!
//! Every request runs on its own thread. Stream threads only ever read the
//! shared state, so a slow client never holds up the capture loop.

use crate::constants::{MAX_UPLOAD_BYTES, STREAM_KEEPALIVE_MS, STREAM_POLL_INTERVAL_MS};
use crate::emotion::EmotionStatus;
use crate::frame::DisplayFrame;
use crate::lifecycle::{Controller, RunState};
use crate::shared_state::SharedState;
use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use image::RgbImage;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tiny_http::{Header, Method, Request, Response, Server};

const BOUNDARY: &str = "frame";

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Emotion Stream</title>
<style>
body { background: #1e1e1e; color: #ddd; font-family: sans-serif; text-align: center; }
img { max-width: 90vw; border: 2px solid #444; }
button { font-size: 1rem; margin: 0.5rem; padding: 0.4rem 1.2rem; }
#status { font-size: 1.4rem; margin-top: 0.5rem; }
</style>
</head>
<body>
<h1>Emotion Stream</h1>
<img src="/video_feed" alt="video stream">
<div>
<button onclick="control('start')">Start</button>
<button onclick="control('stop')">Stop</button>
</div>
<div id="status">waiting for data</div>
<script>
function control(action) {
  fetch('/' + action, { method: 'POST' }).then(r => r.json()).then(s => {
    document.getElementById('status').textContent = 'capture ' + s.state;
  });
}
function poll() {
  fetch('/emotions').then(r => r.json()).then(s => {
    const el = document.getElementById('status');
    if (s.face_detected) {
      el.textContent = s.dominant + ' (' + Math.round(s.confidence * 100) + '%)';
    } else {
      el.textContent = 'no face detected';
    }
  }).catch(() => {});
}
setInterval(poll, 500);
</script>
</body>
</html>
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Index,
    VideoFeed,
    Emotions,
    Start,
    Stop,
    Analyze,
    Warmup,
    Health,
    NotFound,
}

fn route(method: &Method, url: &str) -> Route {
    let path = url.split('?').next().unwrap_or(url);
    match (method, path) {
        (Method::Get, "/") => Route::Index,
        (Method::Get, "/video_feed") => Route::VideoFeed,
        (Method::Get, "/emotions") => Route::Emotions,
        (Method::Post, "/start") => Route::Start,
        (Method::Post, "/stop") => Route::Stop,
        (Method::Post, "/analyze") => Route::Analyze,
        (Method::Get, "/warmup") => Route::Warmup,
        (Method::Get, "/health") => Route::Health,
        _ => Route::NotFound,
    }
}

#[derive(Debug, Serialize)]
struct StateBody {
    state: RunState,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    image: String,
}

#[derive(Debug, Serialize)]
struct AnalyzeResponse {
    success: bool,
    #[serde(flatten)]
    status: EmotionStatus,
    processed_image: String,
}

/// HTTP server bound to a socket
pub struct StreamServer {
    server: Server,
    controller: Arc<Controller>,
}

impl StreamServer {
    /// Bind `addr` (e.g. `0.0.0.0:5000`, port 0 picks a free port)
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServerError`] if the address cannot be bound
    pub fn bind(addr: &str, controller: Arc<Controller>) -> Result<Self> {
        let server = Server::http(addr).map_err(|e| Error::ServerError(format!("failed to bind {addr}: {e}")))?;
        Ok(Self { server, controller })
    }

    /// Address actually bound
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    /// Serve requests until [`StreamServer::unblock`] is called
    pub fn serve(&self) {
        if let Some(addr) = self.local_addr() {
            info!("Serving on http://{addr}");
        }
        for request in self.server.incoming_requests() {
            let controller = Arc::clone(&self.controller);
            let spawned = std::thread::Builder::new()
                .name("http-request".to_string())
                .spawn(move || handle(request, &controller));
            if let Err(e) = spawned {
                error!("Failed to spawn request thread: {e}");
            }
        }
        info!("Server stopped accepting requests");
    }

    /// Make a blocked [`StreamServer::serve`] return
    pub fn unblock(&self) {
        self.server.unblock();
    }
}

fn handle(request: Request, controller: &Controller) {
    let route = route(request.method(), request.url());
    debug!("{} {} -> {route:?}", request.method(), request.url());

    let result = match route {
        Route::Index => request.respond(with_content_type(
            Response::from_string(INDEX_HTML),
            "text/html; charset=utf-8",
        )),
        Route::VideoFeed => {
            let state = controller.shared_state();
            let mut writer = request.into_writer();
            match stream_frames(&mut *writer, &state) {
                Ok(()) => Ok(()),
                Err(e) => {
                    debug!("Stream client went away: {e}");
                    Ok(())
                }
            }
        }
        Route::Emotions => respond_json(request, &controller.status(), 200),
        Route::Start => match controller.start() {
            Ok(state) => respond_json(request, &StateBody { state, error: None }, 200),
            Err(e) => {
                warn!("Start request failed: {e}");
                let body = StateBody {
                    state: controller.run_state(),
                    error: Some(e.to_string()),
                };
                respond_json(request, &body, 503)
            }
        },
        Route::Stop => {
            let state = controller.stop();
            respond_json(request, &StateBody { state, error: None }, 200)
        }
        Route::Analyze => analyze(request, controller),
        Route::Warmup => match controller.warmup() {
            Ok(backend) => respond_json(
                request,
                &serde_json::json!({ "status": "model loaded", "backend": backend }),
                200,
            ),
            Err(e) => {
                warn!("Warmup failed: {e}");
                respond_json(request, &ErrorBody { error: e.to_string() }, 500)
            }
        },
        Route::Health => respond_json(request, &serde_json::json!({ "status": "healthy" }), 200),
        Route::NotFound => request.respond(Response::from_string("not found").with_status_code(404)),
    };

    if let Err(e) = result {
        debug!("Failed to write response: {e}");
    }
}

fn analyze(mut request: Request, controller: &Controller) -> io::Result<()> {
    let image = match read_upload(&mut request) {
        Ok(image) => image,
        Err((status, error)) => {
            debug!("Rejected upload: {error}");
            return respond_json(request, &ErrorBody { error }, status);
        }
    };

    match controller.analyze(image) {
        Ok(analysis) => {
            let processed_image = format!(
                "data:{};base64,{}",
                analysis.image.content_type(),
                BASE64_STANDARD.encode(analysis.image.jpeg())
            );
            let body = AnalyzeResponse {
                success: true,
                status: analysis.status,
                processed_image,
            };
            respond_json(request, &body, 200)
        }
        Err(e @ Error::InvalidInput(_)) => respond_json(request, &ErrorBody { error: e.to_string() }, 400),
        Err(e) => {
            warn!("Analyze request failed: {e}");
            respond_json(request, &ErrorBody { error: e.to_string() }, 500)
        }
    }
}

/// Decode the `{"image": "data:image/...;base64,..."}` body of an upload
///
/// The data URL prefix is optional. Errors carry the HTTP status to answer with.
fn read_upload(request: &mut Request) -> std::result::Result<RgbImage, (u16, String)> {
    let mut body = Vec::new();
    request
        .as_reader()
        .take(MAX_UPLOAD_BYTES + 1)
        .read_to_end(&mut body)
        .map_err(|e| (400, format!("Could not read request body: {e}")))?;
    if u64::try_from(body.len()).unwrap_or(u64::MAX) > MAX_UPLOAD_BYTES {
        return Err((413, format!("Upload larger than {MAX_UPLOAD_BYTES} bytes")));
    }

    let upload: AnalyzeRequest =
        serde_json::from_slice(&body).map_err(|_| (400, "No image provided".to_string()))?;
    let encoded = upload
        .image
        .split_once(',')
        .map_or(upload.image.as_str(), |(_, data)| data);
    let bytes = BASE64_STANDARD
        .decode(encoded.trim())
        .map_err(|e| (400, format!("Invalid base64 image: {e}")))?;
    let image = image::load_from_memory(&bytes).map_err(|e| (400, format!("Could not decode image: {e}")))?;
    Ok(image.to_rgb8())
}

fn respond_json<T: Serialize>(request: Request, body: &T, status: u16) -> io::Result<()> {
    match serde_json::to_string(body) {
        Ok(json) => request.respond(with_content_type(
            Response::from_string(json).with_status_code(status),
            "application/json",
        )),
        Err(e) => {
            error!("Failed to serialize response: {e}");
            request.respond(Response::from_string("internal error").with_status_code(500))
        }
    }
}

fn with_content_type<R: io::Read>(response: Response<R>, value: &str) -> Response<R> {
    match Header::from_bytes(&b"Content-Type"[..], value.as_bytes()) {
        Ok(header) => response.with_header(header),
        Err(()) => response,
    }
}

/// Write an endless MJPEG stream of the latest published frames
///
/// A frame is sent when a new one is published, and re-sent after
/// `STREAM_KEEPALIVE_MS` of inactivity so idle clients keep a picture.
/// Returns only when writing fails.
fn stream_frames(writer: &mut dyn Write, state: &SharedState) -> io::Result<()> {
    write!(
        writer,
        "HTTP/1.1 200 OK\r\n\
         Content-Type: multipart/x-mixed-replace; boundary={BOUNDARY}\r\n\
         Cache-Control: no-cache, no-store\r\n\
         Connection: close\r\n\r\n"
    )?;
    writer.flush()?;

    let poll = Duration::from_millis(STREAM_POLL_INTERVAL_MS);
    let keepalive = Duration::from_millis(STREAM_KEEPALIVE_MS);
    let mut last_sequence = None;
    let mut last_sent = Instant::now();

    loop {
        match state.read_frame() {
            Some(frame) if last_sequence != Some(frame.sequence()) || last_sent.elapsed() >= keepalive => {
                write_part(writer, &frame)?;
                last_sequence = Some(frame.sequence());
                last_sent = Instant::now();
            }
            _ => std::thread::sleep(poll),
        }
    }
}

fn write_part(writer: &mut dyn Write, frame: &DisplayFrame) -> io::Result<()> {
    write!(
        writer,
        "--{BOUNDARY}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        frame.content_type(),
        frame.jpeg().len()
    )?;
    writer.write_all(frame.jpeg())?;
    writer.write_all(b"\r\n")?;
    writer.flush()
}
