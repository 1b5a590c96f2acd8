use env_logger::{Env, TimestampPrecision};
#[cfg(test)]
use log::LevelFilter;

/// Logs to stderr, `info` and above unless `RUST_LOG` says otherwise.
pub fn init() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();
}

/// Safe to call from every test; only the first call installs the logger.
#[cfg(test)]
pub fn init_test(level: LevelFilter) {
    let _ = env_logger::builder()
        .filter_level(level)
        .is_test(true)
        .try_init();
}
