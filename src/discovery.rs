//! Locating RCS files in a local CVSROOT and mapping their paths into the
//! repository namespace.

use std::{
    ffi::OsStr,
    os::unix::prelude::OsStrExt,
    path::{Path, PathBuf},
};

use walkdir::WalkDir;

use crate::Error;

/// Walks the module subtree below `cvsroot` and returns every ",v" file,
/// Attic included, in a stable order. The `CVSROOT` administrative subtree is
/// never entered.
pub(crate) fn find_rcs_files(cvsroot: &Path, module: &str) -> Result<Vec<PathBuf>, Error> {
    let root = cvsroot.join(module);
    if !root.is_dir() {
        return Err(Error::NotFound(format!(
            "CVS module {} not found under {}",
            module,
            cvsroot.display()
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(&root)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != "CVSROOT")
    {
        let entry =
            entry.map_err(|e| Error::NotFound(format!("cannot walk {}: {}", root.display(), e)))?;
        if entry.file_type().is_file() && entry.path().as_os_str().as_bytes().ends_with(b",v") {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}

/// True when any ",v" file below `cvsroot` parses as RCS; tells an empty or
/// foreign directory apart from a real repository copy.
pub(crate) fn has_rcs_files(cvsroot: &Path) -> bool {
    WalkDir::new(cvsroot)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != "CVSROOT")
        .flatten()
        .any(|entry| {
            entry.file_type().is_file()
                && entry.path().as_os_str().as_bytes().ends_with(b",v")
                && rcs_file::RcsFile::open(entry.path()).is_ok()
        })
}

/// Strips the CVSROOT-specific parts of an RCS file path: the prefix, the
/// ",v" suffix, and a trailing `Attic` directory.
pub(crate) fn munge_rcs_path(input: &Path, prefix: &Path) -> PathBuf {
    let unprefixed = input.strip_prefix(prefix).unwrap_or(input);

    if let Some(input_file) = unprefixed.file_name() {
        let file = strip_comma_v_suffix(input_file).unwrap_or_else(|| PathBuf::from(input_file));
        strip_attic_suffix(unprefixed)
            .map(|path| path.join(&file))
            .unwrap_or_else(|| input_file.into())
    } else {
        unprefixed.into()
    }
}

fn strip_attic_suffix(path: &Path) -> Option<&Path> {
    path.parent().and_then(|parent| {
        if parent.ends_with(OsStr::from_bytes(b"Attic")) {
            parent.parent()
        } else {
            Some(parent)
        }
    })
}

fn strip_comma_v_suffix(file: &OsStr) -> Option<PathBuf> {
    file.as_bytes()
        .strip_suffix(b",v")
        .map(|stripped| PathBuf::from(OsStr::from_bytes(stripped)))
}
