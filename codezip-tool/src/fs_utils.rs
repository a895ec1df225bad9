use anyhow::{Context, Result};
use codezip_lib::ArchiveTask;
use std::{
    fs,
    path::{Component, Path, PathBuf},
};

use glob::Pattern;

use crate::packaging::FileEntry;

/// Compiles skip patterns, failing on the first invalid one.
pub fn compile_skip_patterns(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| Pattern::new(p).with_context(|| format!("invalid skip pattern: {p}")))
        .collect()
}

/// Recursively lists every file under `task.source` whose name ends with `task.suffix`.
///
/// Relative paths in `task` are resolved against `cwd`, and each entry is named
/// by its path relative to `cwd`. The files of a directory come before its
/// subdirectories, and siblings are visited in file name order. A missing
/// source directory yields no files.
pub fn list_matching_files(task: &ArchiveTask, cwd: &Path) -> Result<Vec<FileEntry>> {
    let walker = Walker {
        cwd,
        suffix: &task.suffix,
        skip: compile_skip_patterns(&task.skip)?,
        output: absolutize(&task.output, cwd),
    };

    let root = cwd.join(&task.source);
    let mut result = Vec::new();

    if !root.exists() {
        log::debug!("source {} does not exist, nothing to archive", root.display());
        return Ok(result);
    }

    if root.is_file() {
        walker.consider_file(&root, &mut result)?;
    } else {
        walker.walk_dir(&root, &mut result)?;
    }

    Ok(result)
}

struct Walker<'a> {
    cwd: &'a Path,
    suffix: &'a str,
    skip: Vec<Pattern>,
    output: PathBuf,
}

impl Walker<'_> {
    fn walk_dir(&self, dir: &Path, result: &mut Vec<FileEntry>) -> Result<()> {
        let mut entries = fs::read_dir(dir)
            .with_context(|| format!("reading directory {}", dir.display()))?
            .collect::<std::io::Result<Vec<_>>>()
            .with_context(|| format!("reading directory {}", dir.display()))?;
        entries.sort_by_key(|e| e.file_name());

        let mut subdirs = Vec::new();
        for entry in entries {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .with_context(|| format!("reading file type of {}", path.display()))?;

            if file_type.is_dir() {
                if self.is_skipped(&path) {
                    log::debug!("skipping directory {}", path.display());
                } else {
                    subdirs.push(path);
                }
            } else if file_type.is_symlink() && fs::metadata(&path).is_ok_and(|m| m.is_dir()) {
                log::debug!("not following directory link {}", path.display());
            } else {
                self.consider_file(&path, result)?;
            }
        }

        for sub in subdirs {
            self.walk_dir(&sub, result)?;
        }
        Ok(())
    }

    /// Adds `path` if it matches. A matching file whose name cannot be stored
    /// exactly in the archive aborts the walk.
    fn consider_file(&self, path: &Path, result: &mut Vec<FileEntry>) -> Result<()> {
        let matches = path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().ends_with(self.suffix));
        if !matches {
            return Ok(());
        }
        if absolutize(path, self.cwd) == self.output {
            log::debug!("not adding the output archive {} to itself", path.display());
            return Ok(());
        }
        if self.is_skipped(path) {
            log::debug!("skipping file {}", path.display());
            return Ok(());
        }
        result.push(FileEntry {
            path: path.to_path_buf(),
            name_in_archive: archive_name(path, self.cwd)?,
        });
        Ok(())
    }

    // Patterns only select, so a lossy name is good enough to match against.
    fn is_skipped(&self, path: &Path) -> bool {
        if self.skip.is_empty() {
            return false;
        }
        let name = relative_path(path, self.cwd)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        self.skip.iter().any(|p| p.matches(&name))
    }
}

/// Name of `path` inside the archive: its path relative to `cwd`, `/`-separated.
///
/// Fails when a component is not valid UTF-8, since zip names are text and a
/// lossy conversion could give two files the same name.
pub fn archive_name(path: &Path, cwd: &Path) -> Result<String> {
    let parts = relative_path(path, cwd)
        .components()
        .map(|c| {
            c.as_os_str()
                .to_str()
                .map(str::to_string)
                .with_context(|| format!("file name of {} is not valid UTF-8", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join("/"))
}

fn relative_path(path: &Path, cwd: &Path) -> PathBuf {
    relative_to(&absolutize(path, cwd), &normalize(cwd))
}

/// Joins a relative `path` onto `cwd` and removes `.` and `..` lexically.
fn absolutize(path: &Path, cwd: &Path) -> PathBuf {
    normalize(&cwd.join(path))
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Path from `base` to `path`, both already normalized.
fn relative_to(path: &Path, base: &Path) -> PathBuf {
    let path_comps: Vec<_> = path.components().collect();
    let base_comps: Vec<_> = base.components().collect();

    let common = path_comps
        .iter()
        .zip(&base_comps)
        .take_while(|(a, b)| a == b)
        .count();

    // different roots (e.g. another drive): nothing to be relative to
    if common == 0 && path.has_root() {
        return path.to_path_buf();
    }

    let mut rel = PathBuf::new();
    for _ in common..base_comps.len() {
        rel.push("..");
    }
    for comp in &path_comps[common..] {
        rel.push(comp);
    }
    rel
}

/// Sums the sizes of all files.
pub fn total_size(files: &[FileEntry]) -> Result<u64> {
    let mut total: u64 = 0;
    for entry in files {
        let meta = fs::metadata(&entry.path)
            .with_context(|| format!("reading metadata of {}", entry.path.display()))?;
        total += meta.len();
    }
    Ok(total)
}

/// Convert bytes into a human-friendly string using binary (KiB, MiB, GiB...) units.
pub fn encode_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    // 1.0 MiB prints as 1 MiB
    if (size * 10.0).round() % 10.0 == 0.0 {
        format!("{:.0} {}", size, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codezip_lib::Config;
    use tempfile::TempDir;

    fn task(suffix: &str, skip: &[&str]) -> ArchiveTask {
        Config {
            suffix: Some(suffix.into()),
            skip: Some(skip.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }
        .to_task()
    }

    fn names(files: &[FileEntry]) -> Vec<&str> {
        files.iter().map(|f| f.name_in_archive.as_str()).collect()
    }

    fn sample_tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        let lib = temp.path().join("lib");
        fs::create_dir_all(lib.join("sub/deeper")).unwrap();
        fs::create_dir_all(lib.join("gen")).unwrap();
        fs::write(lib.join("a.dart"), "a").unwrap();
        fs::write(lib.join("readme.md"), "r").unwrap();
        fs::write(lib.join("sub/b.dart"), "b").unwrap();
        fs::write(lib.join("sub/deeper/c.dart"), "c").unwrap();
        fs::write(lib.join("sub/C.DART"), "upper").unwrap();
        fs::write(lib.join("gen/model.g.dart"), "g").unwrap();
        fs::write(lib.join("z.dart"), "z").unwrap();
        temp
    }

    #[test]
    fn lists_matching_files_files_before_subdirectories() {
        let temp = sample_tree();
        let files = list_matching_files(&task(".dart", &[]), temp.path()).unwrap();
        assert_eq!(
            names(&files),
            vec![
                "lib/a.dart",
                "lib/z.dart",
                "lib/gen/model.g.dart",
                "lib/sub/b.dart",
                "lib/sub/deeper/c.dart",
            ]
        );
        assert_eq!(files[0].path, temp.path().join("lib").join("a.dart"));
    }

    #[test]
    fn suffix_match_is_case_sensitive() {
        let temp = sample_tree();
        let files = list_matching_files(&task(".DART", &[]), temp.path()).unwrap();
        assert_eq!(names(&files), vec!["lib/sub/C.DART"]);
    }

    #[test]
    fn missing_source_yields_nothing() {
        let temp = TempDir::new().unwrap();
        let files = list_matching_files(&task(".dart", &[]), temp.path()).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn skip_patterns_prune_directories_and_files() {
        let temp = sample_tree();
        let files =
            list_matching_files(&task(".dart", &["lib/gen", "**/c.dart"]), temp.path()).unwrap();
        assert_eq!(names(&files), vec!["lib/a.dart", "lib/z.dart", "lib/sub/b.dart"]);
    }

    #[test]
    fn invalid_skip_pattern_is_an_error() {
        let temp = sample_tree();
        let err = list_matching_files(&task(".dart", &["lib/[x"]), temp.path()).unwrap_err();
        assert!(err.to_string().contains("invalid skip pattern"));
    }

    #[test]
    fn output_archive_is_never_listed() {
        let temp = sample_tree();
        fs::write(temp.path().join("lib/codes.zip"), "old").unwrap();
        fs::write(temp.path().join("lib/other.zip"), "zip").unwrap();
        let task = Config {
            output: Some("lib/codes.zip".into()),
            suffix: Some(".zip".into()),
            ..Default::default()
        }
        .to_task();
        let files = list_matching_files(&task, temp.path()).unwrap();
        assert_eq!(names(&files), vec!["lib/other.zip"]);
    }

    #[cfg(unix)]
    #[test]
    fn directory_links_are_not_followed() {
        let temp = sample_tree();
        std::os::unix::fs::symlink(temp.path().join("lib/sub"), temp.path().join("lib/link"))
            .unwrap();
        std::os::unix::fs::symlink(temp.path().join("lib/a.dart"), temp.path().join("lib/l.dart"))
            .unwrap();
        let files = list_matching_files(&task(".dart", &["lib/gen"]), temp.path()).unwrap();
        assert_eq!(
            names(&files),
            vec![
                "lib/a.dart",
                "lib/l.dart",
                "lib/z.dart",
                "lib/sub/b.dart",
                "lib/sub/deeper/c.dart",
            ]
        );
    }

    #[test]
    fn archive_names_are_relative_to_cwd() {
        let cwd = Path::new("/work/project");
        let name = |p: &str| archive_name(Path::new(p), cwd).unwrap();
        assert_eq!(name("lib/a.dart"), "lib/a.dart");
        assert_eq!(name("./lib/./a.dart"), "lib/a.dart");
        assert_eq!(name("/work/project/lib/a.dart"), "lib/a.dart");
        assert_eq!(name("/work/other/x.dart"), "../other/x.dart");
        assert_eq!(name("../other/x.dart"), "../other/x.dart");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn non_utf8_matching_name_aborts_the_walk() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp = sample_tree();
        let lib = temp.path().join("lib");
        fs::write(lib.join(OsStr::from_bytes(b"x\xff.dart")), "ff").unwrap();
        fs::write(lib.join(OsStr::from_bytes(b"x\xfe.dart")), "fe").unwrap();

        let err = list_matching_files(&task(".dart", &[]), temp.path()).unwrap_err();
        assert!(err.to_string().contains("is not valid UTF-8"));

        let err = archive_name(&lib.join(OsStr::from_bytes(b"x\xff.dart")), temp.path())
            .unwrap_err();
        assert!(err.to_string().starts_with("file name of"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn non_utf8_names_that_do_not_match_are_ignored() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp = sample_tree();
        fs::write(temp.path().join("lib").join(OsStr::from_bytes(b"x\xff.md")), "md").unwrap();

        let files = list_matching_files(&task(".dart", &["lib/gen", "lib/sub"]), temp.path())
            .unwrap();
        assert_eq!(names(&files), vec!["lib/a.dart", "lib/z.dart"]);
    }

    #[test]
    fn source_outside_cwd_gets_parent_relative_names() {
        let temp = sample_tree();
        let cwd = temp.path().join("lib/sub");
        let task = Config {
            source: Some("../gen".into()),
            ..Default::default()
        }
        .to_task();
        let files = list_matching_files(&task, &cwd).unwrap();
        assert_eq!(names(&files), vec!["../gen/model.g.dart"]);
    }

    #[test]
    fn total_size_sums_file_lengths() {
        let temp = sample_tree();
        let files = list_matching_files(&task(".dart", &[]), temp.path()).unwrap();
        assert_eq!(total_size(&files).unwrap(), 5);
    }

    #[test]
    fn encode_size_picks_binary_units() {
        assert_eq!(encode_size(0), "0 B");
        assert_eq!(encode_size(512), "512 B");
        assert_eq!(encode_size(1024), "1 KiB");
        assert_eq!(encode_size(1536), "1.5 KiB");
        assert_eq!(encode_size(5 * 1024 * 1024), "5 MiB");
    }
}
