//! Kernel logging subsystem.
//!
//! All kernel log output funnels through a single **backend** function pointer
//! that accepts raw text. Until a backend is registered, output is discarded;
//! the boot crate registers a COM1 backend as soon as the UART is up.
//!
//! # Line atomicity
//!
//! Every log line is assembled in a fixed buffer and handed to the backend
//! under one acquisition of a global spin lock, followed by its newline, so
//! lines from different CPUs never interleave. [`KlogWriter`] exposes the same
//! machinery as a [`fmt::Write`] sink for multi-line dumps.
//!
//! # Registration
//!
//! ```ignore
//! // In the console driver init:
//! trapgate_lib::klog::klog_register_backend(my_backend_fn);
//! ```

use core::fmt;
use core::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

use spin::Mutex;

// ---------------------------------------------------------------------------
// Log levels
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KlogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl KlogLevel {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => KlogLevel::Error,
            1 => KlogLevel::Warn,
            2 => KlogLevel::Info,
            3 => KlogLevel::Debug,
            _ => KlogLevel::Trace,
        }
    }
}

static CURRENT_LEVEL: AtomicU8 = AtomicU8::new(KlogLevel::Info as u8);

#[inline(always)]
fn is_enabled(level: KlogLevel) -> bool {
    level as u8 <= CURRENT_LEVEL.load(Ordering::Relaxed)
}

// ---------------------------------------------------------------------------
// Backend dispatch
// ---------------------------------------------------------------------------

/// Signature of a klog backend: writes `text` verbatim, no newline added.
pub type KlogBackend = fn(&str);

/// Stored as a raw pointer; `null` means "discard".
static BACKEND: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

/// Serializes whole lines across CPUs.
static LINE_LOCK: Mutex<()> = Mutex::new(());

/// Longest line emitted in one piece; longer lines are split.
pub const KLOG_LINE_MAX: usize = 256;

fn backend() -> Option<KlogBackend> {
    let ptr = BACKEND.load(Ordering::Acquire);
    if ptr.is_null() {
        return None;
    }
    // SAFETY: `klog_register_backend` only stores valid `KlogBackend` fn
    // pointers, which are the same size as `*mut ()` on x86_64.
    Some(unsafe { core::mem::transmute::<*mut (), KlogBackend>(ptr) })
}

fn emit_line(text: &str) {
    let Some(backend) = backend() else {
        return;
    };
    let _line = LINE_LOCK.lock();
    backend(text);
    backend("\n");
}

// ---------------------------------------------------------------------------
// Line writer
// ---------------------------------------------------------------------------

/// [`fmt::Write`] sink that buffers one line at a time and emits each
/// complete line atomically. A trailing partial line is emitted on drop.
pub struct KlogWriter {
    level: KlogLevel,
    buf: [u8; KLOG_LINE_MAX],
    len: usize,
}

impl KlogWriter {
    pub const fn new(level: KlogLevel) -> Self {
        Self {
            level,
            buf: [0; KLOG_LINE_MAX],
            len: 0,
        }
    }

    fn flush_line(&mut self) {
        if is_enabled(self.level) {
            // Only whole chars are ever copied into `buf`.
            if let Ok(text) = core::str::from_utf8(&self.buf[..self.len]) {
                emit_line(text);
            }
        }
        self.len = 0;
    }

    fn push_char(&mut self, ch: char) {
        if ch == '\n' {
            self.flush_line();
            return;
        }
        if self.len + ch.len_utf8() > KLOG_LINE_MAX {
            self.flush_line();
        }
        let encoded = ch.encode_utf8(&mut self.buf[self.len..]);
        self.len += encoded.len();
    }

    /// Emit any buffered partial line.
    pub fn finish(mut self) {
        if self.len > 0 {
            self.flush_line();
        }
    }
}

impl fmt::Write for KlogWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if !is_enabled(self.level) {
            return Ok(());
        }
        for ch in s.chars() {
            self.push_char(ch);
        }
        Ok(())
    }
}

impl Drop for KlogWriter {
    fn drop(&mut self) {
        if self.len > 0 {
            self.flush_line();
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Register the backend that receives every log line.
pub fn klog_register_backend(backend: KlogBackend) {
    BACKEND.store(backend as *mut (), Ordering::Release);
}

/// Initialise klog (sets default level).  Called very early in boot.
pub fn klog_init() {
    CURRENT_LEVEL.store(KlogLevel::Info as u8, Ordering::Relaxed);
}

pub fn klog_set_level(level: KlogLevel) {
    CURRENT_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn klog_get_level() -> KlogLevel {
    KlogLevel::from_raw(CURRENT_LEVEL.load(Ordering::Relaxed))
}

pub fn klog_is_enabled(level: KlogLevel) -> bool {
    is_enabled(level)
}

/// Emit a formatted log line at the given level.
///
/// Callers should **not** include a trailing newline in their format string.
pub fn log_args(level: KlogLevel, args: fmt::Arguments<'_>) {
    if !is_enabled(level) {
        return;
    }
    let mut writer = KlogWriter::new(level);
    let _ = fmt::Write::write_fmt(&mut writer, args);
    writer.flush_line();
}

// ---------------------------------------------------------------------------
// Macros
// ---------------------------------------------------------------------------

#[macro_export]
macro_rules! klog {
    ($level:expr, $($arg:tt)*) => {{
        $crate::klog::log_args($level, ::core::format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! klog_error {
    ($($arg:tt)*) => {
        $crate::klog::log_args($crate::klog::KlogLevel::Error, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_warn {
    ($($arg:tt)*) => {
        $crate::klog::log_args($crate::klog::KlogLevel::Warn, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_info {
    ($($arg:tt)*) => {
        $crate::klog::log_args($crate::klog::KlogLevel::Info, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_debug {
    ($($arg:tt)*) => {
        $crate::klog::log_args($crate::klog::KlogLevel::Debug, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_trace {
    ($($arg:tt)*) => {
        $crate::klog::log_args($crate::klog::KlogLevel::Trace, ::core::format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::String;
    use std::sync::Mutex as StdMutex;

    static CAPTURED: StdMutex<String> = StdMutex::new(String::new());

    fn capture(text: &str) {
        CAPTURED.lock().unwrap().push_str(text);
    }

    // Level and backend are global, so everything runs in one test.
    #[test]
    fn lines_levels_and_writer() {
        klog_register_backend(capture);
        klog_set_level(KlogLevel::Info);

        crate::klog_info!("hello {}", 7);
        crate::klog_debug!("hidden");
        crate::klog_error!("bad {:#x}", 0x10);
        assert_eq!(CAPTURED.lock().unwrap().as_str(), "hello 7\nbad 0x10\n");
        CAPTURED.lock().unwrap().clear();

        {
            use core::fmt::Write;
            let mut w = KlogWriter::new(KlogLevel::Info);
            write!(w, "a\nb").unwrap();
            assert_eq!(CAPTURED.lock().unwrap().as_str(), "a\n");
        }
        assert_eq!(CAPTURED.lock().unwrap().as_str(), "a\nb\n");
        CAPTURED.lock().unwrap().clear();

        let long: String = core::iter::repeat('x').take(KLOG_LINE_MAX + 4).collect();
        crate::klog_info!("{}", long);
        let out = CAPTURED.lock().unwrap().clone();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), KLOG_LINE_MAX);
        assert_eq!(lines[1].len(), 4);

        klog_set_level(KlogLevel::Trace);
        assert!(klog_is_enabled(KlogLevel::Trace));
        assert_eq!(klog_get_level(), KlogLevel::Trace);
        klog_init();
        assert_eq!(klog_get_level(), KlogLevel::Info);
    }
}
