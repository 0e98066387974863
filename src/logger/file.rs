/// Optional file sink for log lines
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

static LOG_FILE: OnceCell<Mutex<BufWriter<File>>> = OnceCell::new();

/// Open the log file in append mode; no-op without a path
pub fn init_file_logging(path: Option<&str>) {
    let Some(path) = path else {
        return;
    };

    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => {
            let _ = LOG_FILE.set(Mutex::new(BufWriter::new(file)));
        }
        Err(e) => {
            eprintln!("Failed to open log file '{}': {}", path, e);
        }
    }
}

/// Append one line (silently ignored when file logging is off)
pub fn write_to_file(line: &str) {
    if let Some(writer) = LOG_FILE.get() {
        let mut writer = writer.lock();
        let _ = writeln!(writer, "{}", line);
    }
}

pub fn flush_file_logging() {
    if let Some(writer) = LOG_FILE.get() {
        let _ = writer.lock().flush();
    }
}
