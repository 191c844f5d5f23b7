//! Content-addressed file placement under the storage root:
//! `<root>/<study UID>/<series UID>/<SOP instance UID>.dcm`.
//!
//! Writes go to a temporary sibling first and are renamed into place,
//! so a crashed transfer never leaves a partial file at its final path.
use snafu::Snafu;
use std::io::Write;
use std::path::{Path, PathBuf};

// ENOSPC
const NO_SPACE_LEFT: i32 = 28;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum StorageError {
    #[snafu(display("no permission to access {}", path.display()))]
    PathPermission {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("storage device full while writing {}", path.display()))]
    DiskFull {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("could not write {}", path.display()))]
    WriteObject {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("could not read {}", path.display()))]
    ReadObject {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("`{}` cannot name a storage path component", value))]
    InvalidPathComponent { value: String },
}

pub type Result<T, E = StorageError> = std::result::Result<T, E>;

fn classify_write(path: &Path, source: std::io::Error) -> StorageError {
    if source.kind() == std::io::ErrorKind::PermissionDenied {
        return StorageError::PathPermission {
            path: path.to_owned(),
            source,
        };
    }
    if source.raw_os_error() == Some(NO_SPACE_LEFT) {
        return StorageError::DiskFull {
            path: path.to_owned(),
            source,
        };
    }
    StorageError::WriteObject {
        path: path.to_owned(),
        source,
    }
}

/// Turn a UID into a path component.
///
/// Separators and other hostile characters are substituted,
/// and a value that would resolve to the current or parent directory
/// is rejected outright: substitution alone would let a bare `..`
/// walk out of the storage root.
fn safe_component(uid: &str) -> Result<String> {
    let component: String = uid
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if component.is_empty() || component == "." || component == ".." {
        return InvalidPathComponentSnafu {
            value: uid.to_string(),
        }
        .fail();
    }
    Ok(component)
}

/// The storage manager owning the filesystem tree under its root.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Storage { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The final path of an instance.
    /// Fails when any identifier cannot name a path component.
    pub fn path_for(
        &self,
        study_uid: &str,
        series_uid: &str,
        sop_instance_uid: &str,
    ) -> Result<PathBuf> {
        Ok(self
            .root
            .join(safe_component(study_uid)?)
            .join(safe_component(series_uid)?)
            .join(format!("{}.dcm", safe_component(sop_instance_uid)?)))
    }

    /// Atomically place the encoded file,
    /// creating missing directories on demand.
    /// Placement of the same instance twice is idempotent.
    pub fn place(
        &self,
        study_uid: &str,
        series_uid: &str,
        sop_instance_uid: &str,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let path = self.path_for(study_uid, series_uid, sop_instance_uid)?;
        let dir = path.parent().expect("instance paths always have a parent");
        std::fs::create_dir_all(dir).map_err(|e| classify_write(dir, e))?;

        let temp = dir.join(format!(
            ".{}.part",
            safe_component(sop_instance_uid)?
        ));
        let write_outcome = std::fs::File::create(&temp)
            .and_then(|mut f| f.write_all(bytes).and_then(|_| f.sync_all()));
        if let Err(e) = write_outcome {
            let _ = std::fs::remove_file(&temp);
            return Err(classify_write(&temp, e));
        }
        std::fs::rename(&temp, &path).map_err(|e| classify_write(&path, e))?;
        tracing::debug!(path = %path.display(), size = bytes.len(), "stored instance");
        Ok(path)
    }

    /// Stream back the stored bytes without re-parsing them.
    pub fn read(&self, path: &Path) -> Result<Vec<u8>> {
        std::fs::read(path).map_err(|source| StorageError::ReadObject {
            path: path.to_owned(),
            source,
        })
    }

    /// Remove a stored instance and prune directories left empty.
    pub fn remove(&self, path: &Path) -> Result<()> {
        std::fs::remove_file(path).map_err(|source| StorageError::WriteObject {
            path: path.to_owned(),
            source,
        })?;
        let mut dir = path.parent();
        while let Some(current) = dir {
            if current == self.root || std::fs::remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_study_series_instance() {
        let storage = Storage::new("/var/pacs");
        assert_eq!(
            storage.path_for("1.2", "3.4", "5.6").unwrap(),
            PathBuf::from("/var/pacs/1.2/3.4/5.6.dcm")
        );
    }

    #[test]
    fn placement_is_atomic_and_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());
        let path = storage.place("1.2", "3.4", "5.6", b"first").unwrap();
        assert_eq!(storage.read(&path).unwrap(), b"first");
        // no temporary remnants
        let siblings: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .collect();
        assert_eq!(siblings.len(), 1);

        let again = storage.place("1.2", "3.4", "5.6", b"second").unwrap();
        assert_eq!(again, path);
        assert_eq!(storage.read(&path).unwrap(), b"second");
    }

    #[test]
    fn remove_prunes_empty_directories() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());
        let a = storage.place("1.2", "3.4", "5.6", b"x").unwrap();
        let b = storage.place("1.2", "3.4", "5.7", b"y").unwrap();

        storage.remove(&a).unwrap();
        assert!(b.exists());
        storage.remove(&b).unwrap();
        assert!(!dir.path().join("1.2").exists());
        assert!(dir.path().exists());
    }

    #[test]
    fn dot_components_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());
        // a bare `..` needs no embedded separator to walk upward,
        // so each identifier must be rejected as a whole
        for hostile in ["..", ".", ""] {
            for (study, series, sop) in [
                (hostile, "3.4", "5.6"),
                ("1.2", hostile, "5.6"),
                ("1.2", "3.4", hostile),
            ] {
                let err = storage.place(study, series, sop, b"x").unwrap_err();
                assert!(
                    matches!(err, StorageError::InvalidPathComponent { .. }),
                    "({study:?},{series:?},{sop:?}) must not name a path"
                );
            }
        }
        // nothing was written next to the root
        let parent = dir.path().parent().unwrap();
        assert!(!parent.join("3.4").exists());
        assert!(!parent.join("5.6.dcm").exists());
    }

    #[test]
    fn embedded_separators_are_neutralized() {
        let storage = Storage::new("/var/pacs");
        let path = storage.path_for("../..", "a/b", "c").unwrap();
        assert!(path.starts_with("/var/pacs"));
        assert!(path
            .components()
            .all(|c| !matches!(c, std::path::Component::ParentDir)));
    }
}
