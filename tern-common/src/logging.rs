//! Tracing setup and the per-direction logging macros.
//!
//! Every event is recorded inside a span naming the direction of the traffic
//! it concerns: `incoming` for client commands, `outgoing` for server replies
//! and `internal` for everything else. Each macro defaults to `TRACE` and
//! takes `level = INFO` (or any other [`tracing::Level`] name) to override it.

use std::str::FromStr;

use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

/// Environment variable holding the maximum level to emit.
pub const LEVEL_VARIABLE: &str = "LOG_LEVEL";

#[doc(hidden)]
#[macro_export]
macro_rules! spanned {
    ($level:expr, $direction:literal, $($msg:expr),*) => {{
        let span = $crate::tracing::span!($level, $direction);
        let _entered = span.enter();

        $crate::tracing::event!($level, $($msg),*)
    }};
}

/// A command line received from a client.
#[macro_export]
macro_rules! incoming {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::spanned!($crate::tracing::Level::$level, "incoming", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::incoming!(level = TRACE, $($msg),*)
    };
}

/// A reply on its way to a client.
#[macro_export]
macro_rules! outgoing {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::spanned!($crate::tracing::Level::$level, "outgoing", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::outgoing!(level = TRACE, $($msg),*)
    };
}

#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::spanned!($crate::tracing::Level::$level, "internal", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::internal!(level = TRACE, $($msg),*)
    };
}

const fn fallback_level() -> LevelFilter {
    if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    }
}

/// Resolve the configured level, falling back when it is unset or unknown.
fn resolve_level(configured: Option<&str>) -> Result<LevelFilter, String> {
    match configured {
        None => Ok(fallback_level()),
        Some(name) => LevelFilter::from_str(name.trim()).map_err(|_| name.to_string()),
    }
}

/// Install the global subscriber for `tern*` targets, filtered by
/// [`LEVEL_VARIABLE`]. Later calls leave the first subscriber in place.
pub fn init() {
    let configured = std::env::var(LEVEL_VARIABLE).ok();
    let level = resolve_level(configured.as_deref()).unwrap_or_else(|unknown| {
        eprintln!("Unknown {LEVEL_VARIABLE} {unknown:?}, using {}", fallback_level());
        fallback_level()
    });

    let installed = tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(true)
                .with_file(false)
                .with_line_number(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                .with_filter(level)
                .with_filter(FilterFn::new(|metadata| metadata.target().starts_with("tern"))),
        )
        .try_init();

    if installed.is_err() {
        internal!(level = DEBUG, "Logging was already initialised");
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn configured_levels() {
        assert_eq!(resolve_level(Some("debug")), Ok(LevelFilter::DEBUG));
        assert_eq!(resolve_level(Some(" WARN ")), Ok(LevelFilter::WARN));
        assert_eq!(resolve_level(Some("off")), Ok(LevelFilter::OFF));
        assert_eq!(resolve_level(None), Ok(fallback_level()));
        assert_eq!(resolve_level(Some("chatty")), Err("chatty".to_string()));
    }

    #[test]
    fn repeated_init_is_harmless() {
        init();
        init();
        internal!(level = INFO, "still logging {}", 42);
        incoming!("EHLO client.example");
        outgoing!(level = DEBUG, "250 OK");
    }
}
