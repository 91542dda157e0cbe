//! Minimal stderr logger, gated by the `PBD_LOG` environment variable.
//!
//! Kept deliberately small and dependency-free: the reporter sinks own
//! stdout (and possibly a user-chosen output file), so diagnostics here
//! always go to stderr and never interleave with a trace.

use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;

#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(usize)]
pub enum LogLevel {
    LogDebug = 0,
    LogInfo = 1,
    LogWarn = 2,
    LogError = 3,
    LogFatal = 4,
}

impl LogLevel {
    fn tag(self) -> &'static str {
        match self {
            LogLevel::LogDebug => "debug",
            LogLevel::LogInfo => "info",
            LogLevel::LogWarn => "warn",
            LogLevel::LogError => "error",
            LogLevel::LogFatal => "fatal",
        }
    }
}

static THRESHOLD: AtomicUsize = AtomicUsize::new(LogLevel::LogWarn as usize);
static INIT: Once = Once::new();

fn init_threshold() {
    INIT.call_once(|| {
        if let Ok(v) = env::var("PBD_LOG") {
            let lvl = match v.to_lowercase().as_str() {
                "debug" => Some(LogLevel::LogDebug),
                "info" => Some(LogLevel::LogInfo),
                "warn" => Some(LogLevel::LogWarn),
                "error" => Some(LogLevel::LogError),
                "fatal" => Some(LogLevel::LogFatal),
                _ => None,
            };
            if let Some(lvl) = lvl {
                THRESHOLD.store(lvl as usize, Ordering::Relaxed);
            }
        }
    });
}

#[doc(hidden)]
pub fn enabled(level: LogLevel) -> bool {
    init_threshold();
    level as usize >= THRESHOLD.load(Ordering::Relaxed)
}

#[doc(hidden)]
pub fn emit(level: LogLevel, args: std::fmt::Arguments) {
    if enabled(level) {
        eprintln!("pbd: [{}] {}", level.tag(), args);
    }
}

/// Log a formatted message at the given level, e.g. `log!(LogLevel::LogDebug, "depth={}", d)`.
macro_rules! log {
    ($level:expr, $($arg:tt)*) => {
        $crate::log::emit($level, format_args!($($arg)*))
    };
}

pub(crate) use log;
