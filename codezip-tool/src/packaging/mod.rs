use anyhow::Result;
use std::path::{Path, PathBuf};
use tokio::runtime::Builder;

use crate::packaging::zip::write_zip;

pub mod zip;

/// Represents a file to include in the ZIP archive.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub name_in_archive: String,
}

/// Writes `files` into a new deflate archive at `output`, managing its own async runtime.
///
/// `on_added` runs after each entry is stored. Returns the number of entries written.
/// This is the main entrypoint for synchronous callers.
pub fn create_zip_sync(
    output: &Path,
    files: &[FileEntry],
    on_added: impl FnMut(&FileEntry) -> std::io::Result<()>,
) -> Result<usize> {
    // Entries are written one after another on this thread.
    let rt = Builder::new_current_thread().enable_all().build()?;

    rt.block_on(write_zip(output, files, on_added))
}
