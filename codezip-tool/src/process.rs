use anyhow::{Context, Result};
use codezip_lib::ArchiveTask;
use std::{fs, io::Write, path::Path};

use crate::{
    fs_utils::{encode_size, list_matching_files, total_size},
    packaging::create_zip_sync,
};

/// Archives every file under `task.source` ending with `task.suffix` into `task.output`.
///
/// Relative task paths are resolved against `cwd`. A pre-existing archive is
/// removed first, so the result never holds entries from an earlier run.
/// Progress goes to `out`; the number of archived files is returned.
pub fn run(task: &ArchiveTask, cwd: &Path, out: &mut impl Write) -> Result<usize> {
    let output = cwd.join(&task.output);
    let name = task.output_name();

    if output.exists() {
        fs::remove_file(&output).with_context(|| format!("removing existing archive {name}"))?;
        writeln!(out, "Removed existing {name}")?;
    }

    let files = list_matching_files(task, cwd)?;
    log::info!(
        "archiving {} files from {} into {name}",
        files.len(),
        task.source.display()
    );

    let count = create_zip_sync(&output, &files, |fe| {
        writeln!(out, "Added: {}", fe.name_in_archive)
    })?;

    writeln!(out, "\n✅ {name} created successfully with {count} files!")?;
    Ok(count)
}

/// Lists what `run` would archive without touching the filesystem.
pub fn dry_run(task: &ArchiveTask, cwd: &Path, out: &mut impl Write) -> Result<usize> {
    let files = list_matching_files(task, cwd)?;
    let total = total_size(&files)?;

    for f in &files {
        writeln!(out, "{}", f.name_in_archive)?;
    }
    writeln!(out, "Total files: {}", files.len())?;
    writeln!(out, "Total size: {}", encode_size(total))?;

    Ok(files.len())
}
