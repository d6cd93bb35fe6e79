//! Linking local dependencies into `node_modules`

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::NODE_MODULES;
use crate::error::SetupError;
use crate::monorepo::DiscoveredPackage;

/// Directory name of linked executables inside `node_modules`
pub const BIN_DIR: &str = ".bin";

/// `node_modules` directory of a package
pub fn node_modules_dir(package_dir: &Path) -> PathBuf {
    package_dir.join(NODE_MODULES)
}

/// Remove whatever is at `path`, if anything. Symbolic links are removed
/// without touching their target.
pub fn clear_link(path: &Path) -> io::Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    let file_type = metadata.file_type();
    if file_type.is_dir() {
        std::fs::remove_dir_all(path)
    } else if file_type.is_symlink() {
        remove_symlink(path)
    } else {
        std::fs::remove_file(path)
    }
}

/// Link `dependency` into `node_modules`, replacing any existing entry.
///
/// Scoped names get their scope directory created first. Returns the path
/// of the link.
pub fn link_dependency(
    node_modules: &Path,
    dependency: &DiscoveredPackage,
) -> Result<PathBuf, SetupError> {
    let dest = node_modules.join(&dependency.name);
    let link_error = |source: io::Error| SetupError::Link {
        src: dependency.path.clone(),
        dest: dest.clone(),
        source,
    };

    let src = std::fs::canonicalize(&dependency.path).map_err(link_error)?;
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(link_error)?;
    }
    clear_link(&dest).map_err(link_error)?;
    symlink_dir(&src, &dest).map_err(link_error)?;

    debug!(src = %src.display(), dest = %dest.display(), "linked dependency");
    Ok(dest)
}

/// Expose the executables of `dependency` in `node_modules/.bin`.
///
/// Returns the command names that were linked.
pub fn link_executables(
    node_modules: &Path,
    dependency: &DiscoveredPackage,
) -> Result<Vec<String>, SetupError> {
    if dependency.bin.is_empty() {
        return Ok(Vec::new());
    }

    let bin_dir = node_modules.join(BIN_DIR);
    std::fs::create_dir_all(&bin_dir).map_err(|source| SetupError::Link {
        src: dependency.path.clone(),
        dest: bin_dir.clone(),
        source,
    })?;

    let mut linked = Vec::with_capacity(dependency.bin.len());
    for (command, script) in &dependency.bin {
        let src = dependency.path.join(script);
        let dest = bin_dir.join(command);
        let link_error = |source: io::Error| SetupError::Link {
            src: src.clone(),
            dest: dest.clone(),
            source,
        };

        let src_abs = std::fs::canonicalize(&src).map_err(link_error)?;
        clear_link(&dest).map_err(link_error)?;
        link_file(&src_abs, &dest).map_err(link_error)?;
        debug!(command = %command, dest = %dest.display(), "linked executable");
        linked.push(command.clone());
    }

    Ok(linked)
}

#[cfg(unix)]
fn symlink_dir(src: &Path, dest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(src, dest)
}

#[cfg(windows)]
fn symlink_dir(src: &Path, dest: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(src, dest)
}

#[cfg(unix)]
fn link_file(src: &Path, dest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(src, dest)
}

// File symlinks need elevated privileges on Windows.
#[cfg(windows)]
fn link_file(src: &Path, dest: &Path) -> io::Result<()> {
    std::fs::copy(src, dest).map(|_| ())
}

#[cfg(unix)]
fn remove_symlink(path: &Path) -> io::Result<()> {
    std::fs::remove_file(path)
}

#[cfg(windows)]
fn remove_symlink(path: &Path) -> io::Result<()> {
    std::fs::remove_dir(path).or_else(|_| std::fs::remove_file(path))
}
