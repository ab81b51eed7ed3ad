//! Zip archive ingestion into a service's data directory.
//!
//! Every entry is resolved against the destination before anything is
//! written. Resolution walks the entry path one component at a time, so
//! `..` is applied to the real location reached so far and symlinks that
//! already exist on disk (or that the archive itself declares) are followed.
//! The walk is the same for a symlink entry's target, and the archive's own
//! links are settled against each other first, whatever their order. Any
//! entry that lands outside the destination rejects the whole archive.
//!
//! Regular files and directories are written in archive order and symlinks
//! last, so no file is ever written through a link created by the same
//! archive.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use zip::ZipArchive;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

pub type ArchiveResult<T> = Result<T, ArchiveError>;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("entry {entry:?} resolves outside the destination")]
    PathTraversal { entry: String },

    #[error("{0}")]
    Extraction(String),
}

fn extraction_err(e: impl ToString) -> ArchiveError {
    ArchiveError::Extraction(e.to_string())
}

enum Planned {
    Directory,
    File { mode: Option<u32> },
    Symlink { link: String },
}

struct PlannedEntry {
    index: usize,
    target: PathBuf,
    kind: Planned,
}

/// Extract `archive_path` into `dest`, returning the number of entries written.
///
/// `dest` must exist. On a mid-extraction I/O error the entries already
/// written stay on disk.
pub fn extract(archive_path: &Path, dest: &Path) -> ArchiveResult<usize> {
    let file = File::open(archive_path).map_err(extraction_err)?;
    let mut archive = ZipArchive::new(file).map_err(extraction_err)?;
    let root = dest.canonicalize().map_err(extraction_err)?;

    let plan = plan_entries(&mut archive, &root)?;

    let (links, regular): (Vec<_>, Vec<_>) = plan
        .into_iter()
        .partition(|e| matches!(e.kind, Planned::Symlink { .. }));

    for entry in regular.iter().chain(links.iter()) {
        write_entry(&mut archive, entry)?;
    }

    let count = regular.len() + links.len();
    debug!(archive = ?archive_path, dest = ?root, entries = count, "archive extracted");
    Ok(count)
}

fn plan_entries(archive: &mut ZipArchive<File>, root: &Path) -> ArchiveResult<Vec<PlannedEntry>> {
    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(extraction_err)?;
        let name = entry.name().to_string();
        let mode = entry.unix_mode();
        let kind = if mode.is_some_and(|m| m & S_IFMT == S_IFLNK) {
            let mut link = String::new();
            entry.read_to_string(&mut link).map_err(extraction_err)?;
            Planned::Symlink { link }
        } else if entry.is_dir() {
            Planned::Directory
        } else {
            Planned::File { mode }
        };
        entries.push((index, name, kind));
    }

    let links = settle_links(root, &entries)?;

    entries
        .into_iter()
        .map(|(index, name, kind)| -> ArchiveResult<PlannedEntry> {
            let target = match &kind {
                Planned::Symlink { .. } => locate(root, &name, &links)
                    .filter(|at| links.get(at).is_some_and(|t| t.starts_with(root))),
                _ => resolve(root, Path::new(&name), &links),
            }
            .filter(|p| p.starts_with(root))
            .ok_or_else(|| ArchiveError::PathTraversal {
                entry: name.clone(),
            })?;
            Ok(PlannedEntry {
                index,
                target,
                kind,
            })
        })
        .collect()
}

/// Resolve every symlink the archive declares against all the others.
///
/// A link may pass through links declared after it, so targets are
/// recomputed until no target changes. Each round settles at least one more
/// level of an acyclic chain; links that still move after one round per
/// link form a cycle.
fn settle_links(
    root: &Path,
    entries: &[(usize, String, Planned)],
) -> ArchiveResult<HashMap<PathBuf, PathBuf>> {
    let links: Vec<(&str, &str)> = entries
        .iter()
        .filter_map(|(_, name, kind)| match kind {
            Planned::Symlink { link } => Some((name.as_str(), link.as_str())),
            _ => None,
        })
        .collect();

    let mut settled = HashMap::new();
    for _ in 0..=links.len() {
        let mut next = HashMap::with_capacity(links.len());
        for (name, link) in &links {
            let traversal = || ArchiveError::PathTraversal {
                entry: name.to_string(),
            };
            let at = locate(root, name, &settled).ok_or_else(traversal)?;
            let base = at.parent().unwrap_or(root).to_path_buf();
            let target = resolve(&base, Path::new(link), &settled).ok_or_else(traversal)?;
            if next.insert(at, target).is_some() {
                return Err(ArchiveError::Extraction(format!(
                    "duplicate symlink entry {name:?}"
                )));
            }
        }
        if next == settled {
            return Ok(settled);
        }
        settled = next;
    }
    Err(extraction_err("symlink entries form a cycle"))
}

/// Where a symlink entry is created: the parent is walked, the final
/// component is not followed.
fn locate(root: &Path, name: &str, links: &HashMap<PathBuf, PathBuf>) -> Option<PathBuf> {
    let path = Path::new(name);
    let file_name = path.file_name()?;
    let parent = path.parent().unwrap_or(Path::new(""));
    Some(resolve(root, parent, links)?.join(file_name))
}

/// Walk `relative` from `base`, following symlinks on disk and the ones
/// the archive plans to create. `None` if the walk cannot be completed.
fn resolve(base: &Path, relative: &Path, links: &HashMap<PathBuf, PathBuf>) -> Option<PathBuf> {
    let mut current = base.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Prefix(_) => return None,
            Component::RootDir => current = PathBuf::from("/"),
            Component::CurDir => {}
            Component::ParentDir => {
                current.pop();
            }
            Component::Normal(part) => {
                current.push(part);
                if let Some(target) = links.get(&current) {
                    current = target.clone();
                } else if current.is_symlink() {
                    current = current.canonicalize().ok()?;
                }
            }
        }
    }
    Some(current)
}

fn write_entry(archive: &mut ZipArchive<File>, entry: &PlannedEntry) -> ArchiveResult<()> {
    match &entry.kind {
        Planned::Directory => fs::create_dir_all(&entry.target).map_err(extraction_err),
        Planned::File { mode } => {
            if let Some(parent) = entry.target.parent() {
                fs::create_dir_all(parent).map_err(extraction_err)?;
            }
            let mut source = archive.by_index(entry.index).map_err(extraction_err)?;
            let mut out = File::create(&entry.target).map_err(extraction_err)?;
            io::copy(&mut source, &mut out).map_err(extraction_err)?;
            set_mode(&entry.target, *mode)
        }
        Planned::Symlink { link } => create_symlink(link, &entry.target),
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: Option<u32>) -> ArchiveResult<()> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o777))
            .map_err(extraction_err)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: Option<u32>) -> ArchiveResult<()> {
    Ok(())
}

#[cfg(unix)]
fn create_symlink(link: &str, target: &Path) -> ArchiveResult<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(extraction_err)?;
    }
    std::os::unix::fs::symlink(link, target).map_err(extraction_err)
}

#[cfg(not(unix))]
fn create_symlink(link: &str, target: &Path) -> ArchiveResult<()> {
    tracing::warn!(?target, link, "skipping symlink entry on this platform");
    Ok(())
}
