//! Severity-levelled kernel logger.
//!
//! Entries land in a fixed-capacity ring buffer; a byte sink (serial or
//! VGA text, installed by the console driver) mirrors them as they arrive.
//! Formatting never allocates, so logging is usable from the earliest
//! stages of boot and from the panic path.

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use spin::Mutex;

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Severity {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
    Fatal = 4,
}

impl Severity {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }
}

const MESSAGE_CAPACITY: usize = 256;
const LOG_BUFFER_SIZE: usize = 1024;

#[derive(Clone)]
pub struct LogEntry {
    pub timestamp: u64,
    pub severity: Severity,
    pub message: heapless::String<MESSAGE_CAPACITY>,
}

pub struct Logger {
    entries: Mutex<heapless::Deque<LogEntry, LOG_BUFFER_SIZE>>,
    sink: Mutex<Option<fn(&str)>>,
    min_level: Mutex<Severity>,
    panic_mode: AtomicBool,
    dropped: AtomicU64,
}

static LOGGER: Logger = Logger {
    entries: Mutex::new(heapless::Deque::new()),
    sink: Mutex::new(None),
    min_level: Mutex::new(Severity::Debug),
    panic_mode: AtomicBool::new(false),
    dropped: AtomicU64::new(0),
};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize the logging subsystem
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }
    log(Severity::Info, "LOG", format_args!("logger initialized"));
}

/// Get logger if initialized
pub fn try_get_logger() -> Option<&'static Logger> {
    if INITIALIZED.load(Ordering::Relaxed) {
        Some(&LOGGER)
    } else {
        None
    }
}

/// Install the console byte sink. Replaces any previous sink.
pub fn set_sink(sink: fn(&str)) {
    *LOGGER.sink.lock() = Some(sink);
}

pub fn set_min_level(level: Severity) {
    *LOGGER.min_level.lock() = level;
}

/// Switch the logger to panic mode: bypass the ring and write straight to
/// the sink so a corrupted heap or a held entry lock cannot eat the dump.
pub fn enter_panic_mode() {
    LOGGER.panic_mode.store(true, Ordering::SeqCst);
}

pub fn log(severity: Severity, subsystem: &str, args: fmt::Arguments) {
    LOGGER.log(severity, subsystem, args);
}

impl Logger {
    pub fn log(&self, severity: Severity, subsystem: &str, args: fmt::Arguments) {
        if severity < *self.min_level.lock() {
            return;
        }

        let timestamp = crate::time::cycles();

        let mut message: heapless::String<MESSAGE_CAPACITY> = heapless::String::new();
        let _ = write!(message, "[{}] {}: ", severity.as_str(), subsystem);
        let _ = message.write_fmt(args);

        if let Some(sink) = *self.sink.lock() {
            sink(message.as_str());
            sink("\n");
        }

        if self.panic_mode.load(Ordering::Relaxed) {
            return;
        }

        let mut entries = self.entries.lock();
        if entries.is_full() {
            entries.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        let _ = entries.push_back(LogEntry { timestamp, severity, message });
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Run `f` over the buffered entries, oldest first.
    pub fn for_each_entry<F: FnMut(&LogEntry)>(&self, mut f: F) {
        for entry in self.entries.lock().iter() {
            f(entry);
        }
    }
}
