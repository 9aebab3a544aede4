//! Storage path allocation
//!
//! Every uploaded file gets a fresh, versioned place in the permanent
//! store: `<segments>/<stem>-<NNNNN><extension>`, where the counter is the
//! lowest value whose path is neither on disk nor reserved by another
//! registration. Existing files are never overwritten.

use specimen_common::{Error, Result};
use std::collections::HashSet;
use std::path::Path;

/// Highest counter that still fits the five-digit field
pub const MAX_VERSION: u32 = 99_999;

/// Suffixes kept whole when splitting the extension off a name
const COMPOUND_EXTENSIONS: &[&str] = &[".tar.gz", ".tar.bz2", ".tar.xz", ".tar.zst", ".nii.gz"];

/// Longest trailing dot-segment treated as an extension
const MAX_EXTENSION_LEN: usize = 5;

/// Where a file will be archived
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Path relative to the store root, `/`-separated
    pub relative_path: String,
    pub version: u32,
}

/// Allocate a path under `root`, considering only what is on disk
pub fn allocate<S: AsRef<str>>(root: &Path, segments: &[S], filename: &str) -> Result<Placement> {
    allocate_avoiding(root, segments, filename, &HashSet::new())
}

/// Allocate a path under `root` that is neither on disk nor in `reserved`
pub fn allocate_avoiding<S: AsRef<str>>(
    root: &Path,
    segments: &[S],
    filename: &str,
    reserved: &HashSet<String>,
) -> Result<Placement> {
    let name = base_name(filename)?;
    let (stem, extension) = split_extension(name);
    let directory = segments
        .iter()
        .map(|s| s.as_ref().trim_matches('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    for version in 0..=MAX_VERSION {
        let versioned = format!("{}-{:05}{}", stem, version, extension);
        let relative_path = if directory.is_empty() {
            versioned
        } else {
            format!("{}/{}", directory, versioned)
        };

        if reserved.contains(&relative_path) || root.join(&relative_path).try_exists()? {
            continue;
        }
        return Ok(Placement {
            relative_path,
            version,
        });
    }

    Err(Error::Conflict(format!(
        "every version of {} under {} is taken",
        name, directory
    )))
}

/// Final path component of an uploaded name
fn base_name(filename: &str) -> Result<&str> {
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if name.is_empty() || name == "." || name == ".." {
        return Err(Error::InvalidInput(format!(
            "\"{}\" does not name a file",
            filename
        )));
    }
    Ok(name)
}

/// Split `name` into stem and extension (with its dot)
///
/// A dotfile such as `.bashrc` has no extension, nor does a name whose last
/// dot-segment is long or not alphanumeric (`run.2024-05-01`).
pub fn split_extension(name: &str) -> (&str, &str) {
    let lower = name.to_ascii_lowercase();
    for compound in COMPOUND_EXTENSIONS {
        if lower.len() > compound.len() && lower.ends_with(compound) {
            let at = name.len() - compound.len();
            return (&name[..at], &name[at..]);
        }
    }

    if let Some(dot) = name.rfind('.') {
        let extension = &name[dot + 1..];
        if dot > 0
            && (1..=MAX_EXTENSION_LEN).contains(&extension.len())
            && extension.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return (&name[..dot], &name[dot..]);
        }
    }

    (name, "")
}
