use crate::domain::{ports::OutputWriter, verification::VerificationRun};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use self::json::JsonWriter;

pub mod json;

/// Register available writers
pub fn all_writers() -> Vec<Box<dyn OutputWriter>> {
    vec![Box::new(JsonWriter)]
}

/// The registered writer whose extension is `format`.
pub fn writer_for(format: &str) -> Option<Box<dyn OutputWriter>> {
    all_writers().into_iter().find(|w| w.extension() == format)
}

/// Writes the run history to `<dir>/<name>.<ext>` via the chosen writer and
/// returns the path written.
pub fn write_to_file(
    writer: &dyn OutputWriter,
    runs: &[VerificationRun],
    dir: &Path,
    name: &str,
) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let content = writer.format(runs)?;
    let path = dir.join(format!("{}.{}", name, writer.extension()));
    fs::write(&path, &content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}
