// Atomic file plumbing shared by the renderer and the secrets exporter.
//
// Everything written here is consumed by external processes (the polling
// agent, the dashboard engine), so a partially written file must never
// be observable. Write to a sibling temp file, then rename into place.

use std::fs;
use std::path::Path;

use crate::error::CoreError;

/// Write `content` to `path` atomically (temp file + rename).
pub(crate) fn write_atomic(path: &Path, content: &str) -> Result<(), CoreError> {
    let wrap = |source: std::io::Error| CoreError::Write {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(wrap)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, content).map_err(wrap)?;
    fs::rename(&tmp, path).map_err(wrap)
}

/// Write `content` only when it differs from what is already on disk.
///
/// Returns `true` when the file changed. Callers use this to decide
/// whether downstream consumers need a reload signal; an unchanged file
/// means a byte-identical pass and no signal.
pub(crate) fn write_if_changed(path: &Path, content: &str) -> Result<bool, CoreError> {
    if fs::read_to_string(path).is_ok_and(|existing| existing == content) {
        return Ok(false);
    }
    write_atomic(path, content)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_if_changed_reports_change_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.conf");

        assert!(write_if_changed(&path, "a").expect("first write"));
        assert!(!write_if_changed(&path, "a").expect("no-op write"));
        assert!(write_if_changed(&path, "b").expect("changed write"));
        assert_eq!(fs::read_to_string(&path).expect("readable"), "b");
    }

    #[test]
    fn write_atomic_creates_parent_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/deeper/out.conf");

        write_atomic(&path, "x").expect("write");
        assert_eq!(fs::read_to_string(&path).expect("readable"), "x");
        // No temp file left behind.
        assert!(!path.with_extension("conf.tmp").exists());
    }
}
