//! Category-based logging for the emulator core.
//!
//! Every component logs through [`log`], which checks a global [`LogConfig`]
//! before the message closure is evaluated, so disabled categories cost one
//! atomic load.
//!
//! - **LogLevel**: Off < Error < Warn < Info < Debug < Trace
//! - **LogCategory**: CPU, Memory, Disk, Video, Interrupts, Stubs
//! - Output goes to stderr, or to a file written by a background thread
//! - Each category is rate limited so a tight guest loop cannot flood output
//!
//! ```rust
//! use emu_core::logging::{log, LogCategory, LogLevel};
//!
//! log(LogCategory::CPU, LogLevel::Trace, || {
//!     format!("CPU: fetch at EIP={:05X}", 0x7C00)
//! });
//! ```

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

const CATEGORY_COUNT: usize = 6;

/// Log level for controlling verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    /// Parse log level from string (case-insensitive)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "off" | "none" | "0" => Some(LogLevel::Off),
            "error" | "err" | "1" => Some(LogLevel::Error),
            "warn" | "warning" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    fn from_u8(val: u8) -> Self {
        match val {
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            5 => LogLevel::Trace,
            _ => LogLevel::Off,
        }
    }
}

/// Log category for the emulator components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    /// Instruction fetch, decode and execution
    CPU,
    /// Memory loads and out-of-range accesses
    Memory,
    /// Storage image reads
    Disk,
    /// Text display writes
    Video,
    /// Software interrupt dispatch
    Interrupts,
    /// Unimplemented services and probes
    Stubs,
}

impl LogCategory {
    /// All categories, in index order
    pub const ALL: [LogCategory; CATEGORY_COUNT] = [
        LogCategory::CPU,
        LogCategory::Memory,
        LogCategory::Disk,
        LogCategory::Video,
        LogCategory::Interrupts,
        LogCategory::Stubs,
    ];

    fn index(self) -> usize {
        match self {
            LogCategory::CPU => 0,
            LogCategory::Memory => 1,
            LogCategory::Disk => 2,
            LogCategory::Video => 3,
            LogCategory::Interrupts => 4,
            LogCategory::Stubs => 5,
        }
    }
}

/// Recover a guard even if a writer panicked while holding the lock.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Sliding one-second window per category.
struct RateLimiter {
    max_per_second: AtomicUsize,
    windows: Mutex<[VecDeque<Instant>; CATEGORY_COUNT]>,
    dropped: Mutex<[usize; CATEGORY_COUNT]>,
}

impl RateLimiter {
    fn new(max_per_second: usize) -> Self {
        Self {
            max_per_second: AtomicUsize::new(max_per_second),
            windows: Mutex::new(Default::default()),
            dropped: Mutex::new([0; CATEGORY_COUNT]),
        }
    }

    /// Returns (allowed, number of messages dropped since the last allowed one)
    fn admit(&self, category: LogCategory) -> (bool, usize) {
        let now = Instant::now();
        let idx = category.index();
        let mut windows = lock(&self.windows);
        let mut dropped = lock(&self.dropped);

        let window = &mut windows[idx];
        while let Some(&front) = window.front() {
            if now.duration_since(front) > Duration::from_secs(1) {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() < self.max_per_second.load(Ordering::Relaxed) {
            window.push_back(now);
            let count = std::mem::take(&mut dropped[idx]);
            (true, count)
        } else {
            dropped[idx] += 1;
            (false, 0)
        }
    }
}

/// Global logging configuration
pub struct LogConfig {
    global_level: AtomicU8,
    levels: [AtomicU8; CATEGORY_COUNT],
    file_sender: Mutex<Option<Sender<String>>>,
    file_enabled: AtomicBool,
    rate_limiter: RateLimiter,
}

impl LogConfig {
    fn new() -> Self {
        Self {
            global_level: AtomicU8::new(LogLevel::Off as u8),
            levels: Default::default(),
            file_sender: Mutex::new(None),
            file_enabled: AtomicBool::new(false),
            rate_limiter: RateLimiter::new(200),
        }
    }

    /// Get the global singleton instance
    pub fn global() -> &'static Self {
        static INSTANCE: OnceLock<LogConfig> = OnceLock::new();
        INSTANCE.get_or_init(LogConfig::new)
    }

    pub fn set_global_level(&self, level: LogLevel) {
        self.global_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn get_global_level(&self) -> LogLevel {
        LogLevel::from_u8(self.global_level.load(Ordering::Relaxed))
    }

    /// Override the level of one category
    pub fn set_level(&self, category: LogCategory, level: LogLevel) {
        self.levels[category.index()].store(level as u8, Ordering::Relaxed);
    }

    pub fn get_level(&self, category: LogCategory) -> LogLevel {
        LogLevel::from_u8(self.levels[category.index()].load(Ordering::Relaxed))
    }

    /// A category level other than Off takes precedence over the global level.
    pub fn should_log(&self, category: LogCategory, level: LogLevel) -> bool {
        if level == LogLevel::Off {
            return false;
        }
        let category_level = self.get_level(category);
        if category_level != LogLevel::Off {
            level <= category_level
        } else {
            level <= self.get_global_level()
        }
    }

    /// Reset all logging to Off
    pub fn reset(&self) {
        self.set_global_level(LogLevel::Off);
        for category in LogCategory::ALL {
            self.set_level(category, LogLevel::Off);
        }
    }

    /// Maximum messages per second per category
    pub fn set_rate_limit(&self, max_logs_per_second: usize) {
        self.rate_limiter
            .max_per_second
            .store(max_logs_per_second, Ordering::Relaxed);
    }

    pub fn get_rate_limit(&self) -> usize {
        self.rate_limiter.max_per_second.load(Ordering::Relaxed)
    }

    /// Send log output to a file, appended by a background writer thread.
    pub fn set_log_file(&self, path: PathBuf) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let (sender, receiver) = channel::<String>();

        thread::Builder::new()
            .name("log-writer".to_string())
            .spawn(move || {
                while let Ok(message) = receiver.recv() {
                    let _ = writeln!(file, "{}", message);
                    let _ = file.flush();
                }
            })?;

        *lock(&self.file_sender) = Some(sender);
        self.file_enabled.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Stop file logging; output returns to stderr
    pub fn clear_log_file(&self) {
        *lock(&self.file_sender) = None;
        self.file_enabled.store(false, Ordering::Relaxed);
    }

    fn write_message(&self, message: String) {
        if self.file_enabled.load(Ordering::Relaxed) {
            if let Some(sender) = lock(&self.file_sender).as_ref() {
                if let Err(failed) = sender.send(message) {
                    eprintln!("{}", failed.0);
                }
                return;
            }
        }
        eprintln!("{}", message);
    }
}

/// Log a message in `category` at `level`.
///
/// `message_fn` only runs when the category is enabled at that level and the
/// rate limit admits the message.
pub fn log<F>(category: LogCategory, level: LogLevel, message_fn: F)
where
    F: FnOnce() -> String,
{
    let config = LogConfig::global();
    if !config.should_log(category, level) {
        return;
    }

    let (allowed, dropped) = config.rate_limiter.admit(category);
    if dropped > 0 {
        config.write_message(format!(
            "[{:?}] WARNING: rate limit exceeded, {} message(s) dropped",
            category, dropped
        ));
    }
    if allowed {
        config.write_message(message_fn());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::from_str("off"), Some(LogLevel::Off));
        assert_eq!(LogLevel::from_str("ERR"), Some(LogLevel::Error));
        assert_eq!(LogLevel::from_str("Warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_str("3"), Some(LogLevel::Info));
        assert_eq!(LogLevel::from_str(" debug "), Some(LogLevel::Debug));
        assert_eq!(LogLevel::from_str("TRACE"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::from_str("loud"), None);
    }

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Off < LogLevel::Error);
        assert!(LogLevel::Warn < LogLevel::Info);
        assert!(LogLevel::Debug < LogLevel::Trace);
    }

    #[test]
    fn test_category_level_overrides_global() {
        let config = LogConfig::new();
        config.set_global_level(LogLevel::Warn);
        config.set_level(LogCategory::CPU, LogLevel::Trace);

        assert!(config.should_log(LogCategory::CPU, LogLevel::Trace));
        assert!(config.should_log(LogCategory::Disk, LogLevel::Warn));
        assert!(!config.should_log(LogCategory::Disk, LogLevel::Info));
    }

    #[test]
    fn test_off_is_never_logged() {
        let config = LogConfig::new();
        config.set_global_level(LogLevel::Trace);
        assert!(!config.should_log(LogCategory::Video, LogLevel::Off));
    }

    #[test]
    fn test_reset_disables_everything() {
        let config = LogConfig::new();
        config.set_global_level(LogLevel::Info);
        config.set_level(LogCategory::Interrupts, LogLevel::Debug);
        config.reset();

        for category in LogCategory::ALL {
            assert_eq!(config.get_level(category), LogLevel::Off);
            assert!(!config.should_log(category, LogLevel::Error));
        }
    }

    #[test]
    fn test_rate_limiter_drops_after_limit() {
        let limiter = RateLimiter::new(2);
        assert_eq!(limiter.admit(LogCategory::CPU), (true, 0));
        assert_eq!(limiter.admit(LogCategory::CPU), (true, 0));
        assert_eq!(limiter.admit(LogCategory::CPU), (false, 0));
        // Other categories have their own window
        assert_eq!(limiter.admit(LogCategory::Disk), (true, 0));
    }

    #[test]
    fn test_disabled_category_skips_closure() {
        let config = LogConfig::global();
        assert!(!config.should_log(LogCategory::Stubs, LogLevel::Trace));
        log(LogCategory::Stubs, LogLevel::Trace, || {
            panic!("message closure must not run when disabled")
        });
    }
}
