//! Constants used throughout the application

/// Number of capture cycles between two inference runs
pub const DEFAULT_SKIP_INTERVAL: u32 = 3;

/// Upper bound on a single camera pull, in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 2000;

/// Requested capture resolution
pub const DEFAULT_FRAME_WIDTH: u32 = 1280;
pub const DEFAULT_FRAME_HEIGHT: u32 = 720;

/// Frame rate of the synthetic test-pattern camera
pub const DEFAULT_PATTERN_FPS: u32 = 30;

/// JPEG quality of published display frames
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Default HTTP bind address
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:5000";

/// Emotion panel geometry
pub const PANEL_WIDTH: i32 = 250;
pub const PANEL_HEIGHT: i32 = 300;
pub const PANEL_MARGIN_RIGHT: i32 = 270;
pub const PANEL_TOP: i32 = 20;
pub const PANEL_OPACITY: f32 = 0.7;
pub const PANEL_FIRST_ROW: i32 = 100;
pub const PANEL_ROW_STEP: i32 = 35;

/// Per-emotion bar geometry
pub const BAR_WIDTH: u32 = 180;
pub const BAR_HEIGHT: u32 = 12;

/// Face outline thickness in pixels
pub const OUTLINE_THICKNESS: i32 = 3;

/// Label box above a face
pub const LABEL_BOX_HEIGHT: i32 = 30;
pub const LABEL_BOX_OFFSET: i32 = 35;
pub const LABEL_PADDING: i32 = 5;

/// Text scales in pixels
pub const LABEL_TEXT_SCALE: f32 = 24.0;
pub const TITLE_TEXT_SCALE: f32 = 20.0;
pub const ROW_TEXT_SCALE: f32 = 15.0;

/// How often the streaming layer polls the shared state, in milliseconds
pub const STREAM_POLL_INTERVAL_MS: u64 = 10;

/// Idle MJPEG streams re-send the latest frame at this interval, in milliseconds
pub const STREAM_KEEPALIVE_MS: u64 = 1000;

/// Interval between loop statistics log lines, in seconds
pub const STATS_LOG_INTERVAL_SECS: u64 = 5;

/// Tolerance when checking whether classifier outputs already form a distribution
pub const PROBABILITY_SUM_TOLERANCE: f32 = 1e-3;

/// Side length of the blank frame pushed through the backend by a warmup
pub const WARMUP_FRAME_SIZE: u32 = 64;

/// Largest accepted `/analyze` request body, in bytes
pub const MAX_UPLOAD_BYTES: u64 = 8 * 1024 * 1024;
