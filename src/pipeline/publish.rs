//! Write encoded artifacts to the output directory and purge their sources.

use super::{EncodedArtifact, PipelineError, write_durably};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Write `artifact` under its sanitized variant name. Returns the written path.
pub fn publish_artifact(
    output_dir: &Path,
    artifact: &EncodedArtifact,
) -> Result<PathBuf, PipelineError> {
    let file_name = artifact.file_name();
    let dest = output_dir.join(&file_name);
    write_durably(&dest, &artifact.bytes)
        .map_err(|source| PipelineError::Publish { file_name, source })?;
    Ok(dest)
}

/// Remove a fully published working source. Already gone counts as success.
pub fn purge_source(path: &Path) -> Result<(), PipelineError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(PipelineError::Cleanup {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::OutputFormat;
    use crate::test_helpers::write_file;

    fn artifact(stem: &str, width: u32) -> EncodedArtifact {
        EncodedArtifact {
            source: PathBuf::from("/working").join(format!("{stem}.jpg")),
            stem: stem.to_string(),
            target_width: width,
            format: OutputFormat::Jpeg,
            bytes: b"encoded".to_vec(),
        }
    }

    #[test]
    fn writes_sanitized_name() {
        let tmp = tempfile::TempDir::new().unwrap();
        let written = publish_artifact(tmp.path(), &artifact("My Photo 2", 320)).unwrap();
        assert_eq!(written, tmp.path().join("My_Photo_2_320.jpg"));
        assert_eq!(fs::read(&written).unwrap(), b"encoded");
    }

    #[test]
    fn overwrites_previous_variant() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_file(tmp.path(), "photo_320.jpg", b"old");
        publish_artifact(tmp.path(), &artifact("photo", 320)).unwrap();
        assert_eq!(fs::read(tmp.path().join("photo_320.jpg")).unwrap(), b"encoded");
    }

    #[test]
    fn missing_output_dir_is_publish_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = publish_artifact(&tmp.path().join("nope"), &artifact("photo", 320)).unwrap_err();
        assert!(matches!(err, PipelineError::Publish { ref file_name, .. } if file_name == "photo_320.jpg"));
    }

    #[test]
    fn purge_removes_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_file(tmp.path(), "photo.jpg", b"x");
        purge_source(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn purge_of_missing_file_is_ok() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(purge_source(&tmp.path().join("gone.jpg")).is_ok());
    }
}
