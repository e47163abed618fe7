//! Osmium logging subsystem.

pub mod logger;

pub use logger::{init, set_min_level, set_sink, try_get_logger, LogEntry, Logger, Severity};

#[macro_export]
macro_rules! log_debug {
    ($sub:expr, $($arg:tt)*) => {
        $crate::log::logger::log($crate::log::Severity::Debug, $sub, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($sub:expr, $($arg:tt)*) => {
        $crate::log::logger::log($crate::log::Severity::Info, $sub, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($sub:expr, $($arg:tt)*) => {
        $crate::log::logger::log($crate::log::Severity::Warn, $sub, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_err {
    ($sub:expr, $($arg:tt)*) => {
        $crate::log::logger::log($crate::log::Severity::Error, $sub, format_args!($($arg)*))
    };
}
