//! Append-only JSONL file sink.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing_subscriber::fmt::MakeWriter;

/// One log file shared by every clone. Each event locks the file for the
/// duration of its line, so concurrent events never interleave.
#[derive(Clone)]
pub struct AppendFile {
    file: Arc<Mutex<File>>,
}

impl AppendFile {
    /// Open `path` for appending, creating parent directories.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }
}

/// Exclusive access to the file while one event is written.
pub struct AppendGuard<'a>(MutexGuard<'a, File>);

impl Write for AppendGuard<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<'a> MakeWriter<'a> for AppendFile {
    type Writer = AppendGuard<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        AppendGuard(self.file.lock())
    }
}
