//! Constants shared across the pipeline.

/// DPI used for layout analysis and text detection.
pub const IMAGE_DPI: f32 = 96.0;

/// DPI used for text recognition and table recognition.
pub const IMAGE_DPI_HIGHRES: f32 = 192.0;

/// PDF user-space units per inch.
pub const PDF_POINTS_PER_INCH: f32 = 72.0;

/// Replaces path separators in document identifiers and joins page keys.
pub const ID_SEPARATOR: char = '↳';

/// Layout labels routed to table structure recognition.
pub const TABLE_LABELS: &[&str] = &["Table", "Table-of-contents"];

/// Layout labels cropped and persisted as image assets.
pub const FIGURE_LABELS: &[&str] = &["Picture", "Figure"];

/// Checkpoint ledger file name inside the output directory.
pub const CHECKPOINT_FILE_NAME: &str = "checkpoint.json";

/// Font used to render recognized text and labels.
pub const FONT_FILE_NAME: &str = "GoNotoCurrent-Regular.ttf";

/// Release the font is downloaded from when it is not present locally.
pub const FONT_DOWNLOAD_BASE: &str =
    "https://github.com/satbyy/go-noto-universal/releases/download/v7.0";

/// Interval at which the orchestrator refreshes the progress display.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Interval between resource monitor samples.
pub const DEFAULT_MONITOR_INTERVAL_MS: u64 = 1_000;

/// Exit code of a worker process whose models failed to load.
pub const WORKER_INIT_FAILED_EXIT_CODE: i32 = 3;

/// Font directory used when none is configured.
pub const DEFAULT_FONT_DIR: &str = "static/fonts";
