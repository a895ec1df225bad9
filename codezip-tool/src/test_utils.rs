//! Helpers shared by unit tests.

use async_zip::tokio::read::fs::ZipFileReader;
use std::path::Path;

/// Reads back every entry of an archive as `(name, contents)`, in stored order.
pub async fn read_entries(path: &Path) -> Vec<(String, String)> {
    let zip = ZipFileReader::new(path.to_path_buf()).await.unwrap();
    let mut entries = Vec::new();
    for index in 0..zip.file().entries().len() {
        let name = zip.file().entries()[index]
            .filename()
            .as_str()
            .unwrap()
            .to_string();
        let mut reader = zip.reader_with_entry(index).await.unwrap();
        let mut contents = String::new();
        reader.read_to_string_checked(&mut contents).await.unwrap();
        entries.push((name, contents));
    }
    entries
}

/// Blocking variant for tests that are not async themselves.
pub fn read_entries_blocking(path: &Path) -> Vec<(String, String)> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(read_entries(path))
}
