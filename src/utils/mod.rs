//! Utility functions for the batch pipeline.
//!
//! Image cropping, tracing setup and, behind the `visualization` feature,
//! overlay drawing and font acquisition.

pub mod bbox_crop;
#[cfg(feature = "visualization")]
pub mod font;
#[cfg(feature = "visualization")]
pub mod visualization;

pub use bbox_crop::BBoxCrop;

/// Initializes the tracing subscriber for logging.
///
/// Log output goes to stderr, filtered by `RUST_LOG`. Stdout stays free for
/// the worker event stream.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
