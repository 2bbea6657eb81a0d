//! Logging setup
//!
//! Thin wrappers around `env_logger`. The crate logs through the `log`
//! macros: `info!` for pass entry and summary, `debug!` for solver events
//! (splits, worklist traffic), `trace!` for per-node retyping.
//!
//! Set `RUST_LOG` to control output, e.g.
//! `RUST_LOG=basalt::opt::combine=debug`.

use log::LevelFilter;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize logging from the `RUST_LOG` environment variable, defaulting
/// to warnings only. Subsequent calls are no-ops.
pub fn init_from_env() {
    INIT.call_once(|| {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    });
}

/// Initialize logging for tests; safe to call from every test.
pub fn init_test() {
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Warn)
        .parse_default_env()
        .is_test(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_test();
        init_test();
        log::debug!("logging initialized twice without panicking");
    }
}
