use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

/// Log to stderr; `RUST_LOG` overrides the default `info` level.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

pub fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar().template("{spinner} [{bar:40}] {pos}/{len} {msg}") {
        pb.set_style(style);
    }
    pb
}

/// Feed a core progress callback into a bar.
pub fn report(pb: &ProgressBar, stage: &str, current: u64, total: u64, message: &str) {
    pb.set_length(total);
    pb.set_position((current + 1).min(total));
    pb.set_message(format!("[{stage}] {message}"));
}
