use anyhow::{Context, Result};
use async_zip::tokio::write::ZipFileWriter;
use async_zip::{Compression, ZipDateTime, ZipEntryBuilder};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use std::path::Path;
use std::time::SystemTime;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::compat::TokioAsyncReadCompatExt;

use crate::packaging::FileEntry;

/// Creates `output` and stores every file in it with deflate compression.
///
/// Entries are written one at a time in the given order, and `on_added` is told
/// about each one once it is fully stored. The first failure (reporting included)
/// aborts the archive; the writer and file handle are released on every path out
/// of this function.
pub async fn write_zip(
    output: &Path,
    files: &[FileEntry],
    mut on_added: impl FnMut(&FileEntry) -> std::io::Result<()>,
) -> Result<usize> {
    let mut file = File::create(output)
        .await
        .with_context(|| format!("creating archive {}", output.display()))?;
    let mut writer = ZipFileWriter::with_tokio(&mut file);

    let mut count = 0;
    for fe in files {
        add_file(&mut writer, fe)
            .await
            .with_context(|| format!("adding {} to archive", fe.name_in_archive))?;
        count += 1;
        on_added(fe).context("reporting progress")?;
    }

    writer
        .close()
        .await
        .with_context(|| format!("finishing archive {}", output.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing archive {}", output.display()))?;

    Ok(count)
}

async fn add_file(writer: &mut ZipFileWriter<&mut File>, fe: &FileEntry) -> Result<()> {
    let input = File::open(&fe.path).await?;
    let meta = input.metadata().await?;

    let mut builder = ZipEntryBuilder::new(fe.name_in_archive.clone().into(), Compression::Deflate);
    if let Ok(modified) = meta.modified() {
        builder = builder.last_modification_date(zip_timestamp(modified));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // st_mode fits in 16 bits: file type plus permission bits
        builder = builder.unix_permissions(meta.permissions().mode() as u16);
    }

    let mut entry_writer = writer.write_entry_stream(builder).await?;
    let written = futures::io::copy(&mut input.compat(), &mut entry_writer).await?;
    entry_writer.close().await?;

    log::trace!("stored {} ({written} bytes)", fe.name_in_archive);
    Ok(())
}

/// Local wall-clock time of `modified`, clamped to the range a zip date can hold.
fn zip_timestamp(modified: SystemTime) -> ZipDateTime {
    let local = DateTime::<Local>::from(modified).naive_local();
    let local = match zip_date_range() {
        Some((first, last)) => local.clamp(first, last),
        None => local,
    };
    ZipDateTime::from_chrono(&local.and_utc())
}

// 7-bit year offset from 1980, seconds stored in 2s steps
fn zip_date_range() -> Option<(NaiveDateTime, NaiveDateTime)> {
    let first = NaiveDate::from_ymd_opt(1980, 1, 1)?.and_hms_opt(0, 0, 0)?;
    let last = NaiveDate::from_ymd_opt(2107, 12, 31)?.and_hms_opt(23, 59, 58)?;
    Some((first, last))
}
