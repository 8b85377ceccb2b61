use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

/// Global JSONL file writer. Set once in main(), read by emit().
static JSONL_WRITER: OnceLock<Mutex<BufWriter<File>>> = OnceLock::new();

/// Build the JSONL output path, creating the directory.
/// Pattern: `<dir>/<mode>_<YYYYMMDD-HHMMSS>.jsonl`
pub fn resolve_jsonl_path(dir: &Path, mode: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
    Ok(find_unique_path(dir, &format!("{mode}_{timestamp}"), "jsonl"))
}

/// First of `base.ext`, `base_2.ext`, `base_3.ext`... that does not exist.
fn find_unique_path(dir: &Path, base: &str, ext: &str) -> PathBuf {
    let mut candidate = dir.join(format!("{base}.{ext}"));
    let mut i = 2;
    while candidate.exists() {
        candidate = dir.join(format!("{base}_{i}.{ext}"));
        i += 1;
    }
    candidate
}

pub fn init_jsonl_writer(path: &Path) -> io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    JSONL_WRITER
        .set(Mutex::new(BufWriter::new(file)))
        .map_err(|_| io::Error::new(io::ErrorKind::AlreadyExists, "JSONL writer already set"))
}

/// Append a line to the JSONL file, if one was configured.
pub fn write_jsonl_line(line: &str) {
    if let Some(writer) = JSONL_WRITER.get() {
        if let Ok(mut w) = writer.lock() {
            let _ = writeln!(w, "{line}");
            let _ = w.flush();
        }
    }
}
