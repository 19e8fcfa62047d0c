//! Writing fetched resources and warnings to disk.

use apicollect_common::{Error, Result};
use std::collections::BTreeMap;
use std::fs::{DirBuilder, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[cfg(unix)]
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};

const DIR_MODE: u32 = 0o700;
const FILE_MODE: u32 = 0o600;

/// Directory and file name a dump path is written to under `root`.
///
/// `/api/v1/nodes/foo/proxy/configz` maps to `<root>/api/v1/nodes/foo/proxy`
/// and `configz`.
pub fn save_location(root: &Path, dump_path: &str) -> Result<(PathBuf, String)> {
    if dump_path.split('/').any(|segment| segment == "..") {
        return Err(Error::BadDumpPath(dump_path.to_string()));
    }

    let base = base_name(dump_path);
    if base == "." || base == "/" {
        return Err(Error::BadDumpPath(dump_path.to_string()));
    }
    let dir = dir_name(dump_path);
    if dir == "." {
        return Err(Error::BadDumpPath(dump_path.to_string()));
    }

    Ok((root.join(dir.trim_start_matches('/')), base.to_string()))
}

/// Write every result under `root`, one file per dump path.
///
/// All dump paths are checked before anything is written, so a bad path
/// leaves `root` untouched.
pub fn save_resources(root: &Path, results: &BTreeMap<String, Vec<u8>>) -> Result<()> {
    let locations = results
        .iter()
        .map(|(dump_path, contents)| {
            let (dir, file) = save_location(root, dump_path)?;
            Ok((dir, file, contents))
        })
        .collect::<Result<Vec<_>>>()?;

    for (dir, file, contents) in locations {
        let path = dir.join(file);
        info!("Saving fetched resource to: '{}'", path.display());

        create_dir_all(&dir)?;
        write_private(&path, contents)?;
    }
    Ok(())
}

/// Write `warnings` newline-joined to `path`. Nothing is written when there
/// are none; returns whether the file was written.
pub fn save_warnings(warnings: &[String], path: &Path) -> Result<bool> {
    if warnings.is_empty() {
        return Ok(false);
    }
    debug!("Persisting {} warnings to {}", warnings.len(), path.display());
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir_all(parent)?;
    }
    write_private(path, warnings.join("\n").as_bytes())?;
    Ok(true)
}

fn create_dir_all(dir: &Path) -> Result<()> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(DIR_MODE);
    builder.create(dir)?;
    Ok(())
}

fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(FILE_MODE);
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    Ok(())
}

/// Last element of a slash-separated path, trailing slashes ignored.
fn base_name(path: &str) -> &str {
    if path.is_empty() {
        return ".";
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/";
    }
    match trimmed.rfind('/') {
        Some(i) => &trimmed[i + 1..],
        None => trimmed,
    }
}

/// Everything but the last element, lexically cleaned.
fn dir_name(path: &str) -> String {
    match path.rfind('/') {
        Some(i) => clean(&path[..=i]),
        None => ".".to_string(),
    }
}

fn clean(path: &str) -> String {
    let rooted = path.starts_with('/');
    let segments: Vec<&str> = path
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    let joined = segments.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}
