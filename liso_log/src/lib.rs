use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// Rough, dependency-free timestamp for console lines. Good enough for a
/// human staring at a terminal; the persisted log uses the same stamp.
pub fn format_time(now: SystemTime) -> String {
    let duration = now.duration_since(UNIX_EPOCH).unwrap();
    let secs = duration.as_secs();

    let year = 1970 + (secs / 31_557_600); // Rough years
    let month = ((secs % 31_557_600) / 2_628_000) as u8 + 1;
    let day = ((secs % 2_628_000) / 86_400) as u8 + 1;
    let hour = ((secs % 86_400) / 3600) as u8;
    let minute = ((secs % 3600) / 60) as u8;
    let second = (secs % 60) as u8;

    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        year, month, day, hour, minute, second
    )
}

#[macro_export]
macro_rules! log {
    ($level:expr, $color:expr, $($arg:tt)*) => {
        let ts = $crate::format_time(std::time::SystemTime::now());
        let message = format!($($arg)*);
        println!(
            "[{}] \x1b[30m#|| liso ||#\x1b[0m \x1b[{}m{}\x1b[0m: {}",
            ts,
            $color,
            $level,
            message
        );
        $crate::sink_line(&ts, $level, &message);
    };
}

#[macro_export]
macro_rules! info { ($($arg:tt)*) => { $crate::log!("INFO ", "32", $($arg)*); }; } // Green
#[macro_export]
macro_rules! warn { ($($arg:tt)*) => { $crate::log!("WARN ", "33", $($arg)*); }; } // Yellow
#[macro_export]
macro_rules! errors { ($($arg:tt)*) => { $crate::log!("ERROR", "31", $($arg)*); }; } // Red
#[macro_export]
macro_rules! debug { ($($arg:tt)*) => { $crate::log!("DEBUG", "36", $($arg)*); }; } // Cyan
#[macro_export]
macro_rules! trace { ($($arg:tt)*) => { $crate::log!("TRACE", "34", $($arg)*); }; } // Blue

/// Append-only file sink: open once, append lines, never seek or rotate.
/// This is the "logger with a single append operation" the core treats as
/// an external collaborator.
pub struct FileLog {
    file: Mutex<File>,
}

impl FileLog {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Appends one newline-terminated line, preceded by a textual timestamp.
    pub fn append(&self, line: &str) {
        let ts = format_time(SystemTime::now());
        self.append_raw(&format!("{} {}", ts, line));
    }

    fn append_raw(&self, line: &str) {
        let mut file = self.file.lock().unwrap();
        let _ = writeln!(file, "{}", line);
        let _ = file.flush();
    }

    pub fn close(&self) {
        self.append("Closing log...");
    }
}

/// Process-wide handle the `log!` macro writes through, set once at
/// startup by `install`. This is a singleton touched only by the loop
/// thread. Never installed in unit tests, so `sink_line` is a no-op there.
static SINK: OnceLock<FileLog> = OnceLock::new();

/// Installs the process-wide file sink. Must be called at most once,
/// before the event loop starts; a second call is ignored.
pub fn install(log: FileLog) {
    let _ = SINK.set(log);
}

#[doc(hidden)]
pub fn sink_line(ts: &str, level: &str, message: &str) {
    if let Some(log) = SINK.get() {
        log.append_raw(&format!("{} {}: {}", ts, level.trim(), message));
    }
}

/// Appends the closing line to the installed sink, if any. Called during
/// an orderly shutdown so the log file records that the process exited
/// cleanly rather than just stopping mid-stream.
pub fn close() {
    if let Some(log) = SINK.get() {
        log.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn append_writes_newline_terminated_timestamped_line() {
        let path = std::env::temp_dir().join(format!("liso-log-test-{}.log", std::process::id()));
        let log = FileLog::open(&path).unwrap();
        log.append("hello");
        log.append("world");

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("hello"));
        assert!(lines[1].ends_with("world"));

        fs::remove_file(&path).ok();
    }

    #[test]
    fn open_appends_to_existing_file_without_truncating() {
        let path = std::env::temp_dir().join(format!("liso-log-test-append-{}.log", std::process::id()));
        fs::write(&path, "pre-existing line\n").unwrap();

        let log = FileLog::open(&path).unwrap();
        log.append("new line");

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("pre-existing line\n"));
        assert!(contents.contains("new line"));

        fs::remove_file(&path).ok();
    }
}
