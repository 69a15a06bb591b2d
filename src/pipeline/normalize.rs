//! Convert proprietary-format intake files into the standard format.
//!
//! Every intake file with a configured proprietary extension (HEIC/HEIF by
//! default) is read whole, piped through the [`FormatConverter`] at maximum
//! quality and written into the working directory as `<name>.jpg`
//! (`photo.HEIC` → `photo.HEIC.jpg`). The original is removed only after the
//! converted file is on disk.
//!
//! A conversion never replaces an existing file. If the staged name is
//! already taken in working or intake, the original stays in intake and the
//! attempt is recorded as a failure.
//!
//! [`FormatConverter`]: crate::imaging::FormatConverter

use super::{
    PipelineError, RunContext, RunEvent, SourceImage, SourceStage, StageEnv, StageKind,
    file_name_of, list_files, quarantine, write_durably,
};
use crate::imaging::{BackendError, OutputFormat};
use crate::naming::{has_extension_in, normalized_file_name};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

/// Format every proprietary source is converted to.
pub const NORMALIZED_FORMAT: OutputFormat = OutputFormat::Jpeg;

/// Converter quality on the `0.0..=1.0` scale.
pub const NORMALIZED_QUALITY: f32 = 1.0;

pub fn is_proprietary(path: &Path, extensions: &[String]) -> bool {
    has_extension_in(&file_name_of(path), extensions)
}

pub fn normalize_stage(env: &StageEnv<'_>, mut ctx: RunContext) -> RunContext {
    let config = env.config;
    let intake = &config.directories.intake;
    let candidates = match list_files(intake, |p| is_proprietary(p, &config.normalize.extensions)) {
        Ok(c) => c,
        Err(e) => {
            env.fail(&mut ctx, StageKind::Normalize, intake, &e.into());
            return ctx;
        }
    };
    if candidates.is_empty() {
        return ctx;
    }
    log::info!("converting {} file(s)", candidates.len());

    let results: Vec<(PathBuf, Result<PathBuf, PipelineError>)> = env.pool.install(|| {
        candidates
            .par_iter()
            .map(|path| (path.clone(), convert_one(env, path)))
            .collect()
    });

    for (path, result) in results {
        let mut source = SourceImage::new(&path, SourceStage::Normalizing);
        match result {
            Ok(staged) => {
                env.ledger.clear(&path);
                let staged_name = file_name_of(&staged);
                env.emit(RunEvent::Converted {
                    source: source.file_name(),
                    staged: staged_name.clone(),
                });
                ctx.converted.push(staged_name);
                source.path = staged;
                source.stage = SourceStage::Working;
            }
            Err(e) => {
                env.fail(&mut ctx, StageKind::Normalize, &path, &e);
                quarantine::handle_failure(env, &mut ctx, &path);
                source.stage = SourceStage::Failed;
            }
        }
        ctx.track_source(source);
    }
    ctx
}

/// Convert one file and stage the result. Returns the staged path.
///
/// Fails with [`PipelineError::Collision`] before converting anything if the
/// staged name is taken. A failure to delete the original afterwards is
/// logged, not returned: the file is already staged.
pub fn convert_one(env: &StageEnv<'_>, path: &Path) -> Result<PathBuf, PipelineError> {
    let conversion = |source: BackendError| PipelineError::Conversion {
        path: path.to_path_buf(),
        source,
    };

    let dirs = &env.config.directories;
    let staged_name = normalized_file_name(&file_name_of(path), NORMALIZED_FORMAT);
    let staged = dirs.working.join(&staged_name);
    for taken in [&staged, &dirs.intake.join(&staged_name)] {
        if taken.exists() {
            return Err(PipelineError::Collision {
                path: path.to_path_buf(),
                existing: taken.clone(),
            });
        }
    }

    log::debug!("converting {}", path.display());
    let input = fs::read(path).map_err(|e| conversion(e.into()))?;
    let bytes = env
        .converter
        .convert(&input, NORMALIZED_FORMAT, NORMALIZED_QUALITY)
        .map_err(conversion)?;

    write_durably(&staged, &bytes).map_err(|e| conversion(e.into()))?;

    if let Err(e) = fs::remove_file(path) {
        let err = PipelineError::Cleanup {
            path: path.to_path_buf(),
            source: e,
        };
        log::warn!("{err}");
    }
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::Harness;
    use crate::test_helpers::write_file;

    #[test]
    fn proprietary_detection_ignores_case() {
        let exts = vec!["heic".to_string()];
        assert!(is_proprietary(Path::new("/in/a.HEIC"), &exts));
        assert!(is_proprietary(Path::new("/in/a.heic"), &exts));
        assert!(!is_proprietary(Path::new("/in/a.jpg"), &exts));
    }

    #[test]
    fn converts_into_working_and_removes_original() {
        let h = Harness::new(&[320]);
        write_file(&h.dirs.intake, "photo.HEIC", b"heic bytes");

        let ctx = normalize_stage(&h.env(None), RunContext::new());

        assert!(ctx.is_clean());
        assert_eq!(ctx.converted, vec!["photo.HEIC.jpg"]);
        assert!(!h.dirs.intake.join("photo.HEIC").exists());
        let staged = fs::read(h.dirs.working.join("photo.HEIC.jpg")).unwrap();
        assert!(image::load_from_memory(&staged).is_ok());

        let calls = h.converter.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], (10, OutputFormat::Jpeg, 1.0));
    }

    #[test]
    fn leaves_standard_files_alone() {
        let h = Harness::new(&[320]);
        write_file(&h.dirs.intake, "photo.jpg", b"jpeg");

        let ctx = normalize_stage(&h.env(None), RunContext::new());

        assert!(ctx.converted.is_empty());
        assert!(h.dirs.intake.join("photo.jpg").exists());
        assert_eq!(h.converter.call_count(), 0);
    }

    #[test]
    fn failure_is_isolated_and_original_kept() {
        let h = Harness::new(&[320]);
        write_file(&h.dirs.intake, "bad.heic", b"CORRUPT data");
        write_file(&h.dirs.intake, "good.heic", b"fine data");

        let ctx = normalize_stage(&h.env(None), RunContext::new());

        assert_eq!(ctx.converted, vec!["good.heic.jpg"]);
        assert_eq!(ctx.failures.len(), 1);
        assert_eq!(ctx.failures[0].stage, "normalize");
        assert_eq!(ctx.failures[0].file, "bad.heic");
        assert!(h.dirs.intake.join("bad.heic").exists());
        assert!(!h.dirs.working.join("bad.heic.jpg").exists());
        assert_eq!(h.ledger.attempts(&h.dirs.intake.join("bad.heic")), 1);
    }

    #[test]
    fn success_clears_earlier_failures() {
        let h = Harness::new(&[320]);
        let path = h.dirs.intake.join("photo.heic");
        h.ledger.record_failure(&path);
        write_file(&h.dirs.intake, "photo.heic", b"ok");

        normalize_stage(&h.env(None), RunContext::new());
        assert_eq!(h.ledger.attempts(&path), 0);
    }

    #[test]
    fn same_stem_jpeg_is_not_touched() {
        let h = Harness::new(&[320]);
        write_file(&h.dirs.intake, "photo.HEIC", b"heic bytes");
        write_file(&h.dirs.intake, "photo.jpg", b"user jpeg");

        let ctx = normalize_stage(&h.env(None), RunContext::new());

        assert_eq!(ctx.converted, vec!["photo.HEIC.jpg"]);
        assert_eq!(fs::read(h.dirs.intake.join("photo.jpg")).unwrap(), b"user jpeg");
        assert!(!h.dirs.working.join("photo.jpg").exists());
    }

    #[test]
    fn existing_staged_name_is_a_collision() {
        let h = Harness::new(&[320]);
        write_file(&h.dirs.intake, "photo.HEIC", b"heic bytes");
        write_file(&h.dirs.working, "photo.HEIC.jpg", b"earlier");

        let ctx = normalize_stage(&h.env(None), RunContext::new());

        assert!(ctx.converted.is_empty());
        assert_eq!(ctx.failures.len(), 1);
        assert!(ctx.failures[0].message.contains("would overwrite"));
        assert!(h.dirs.intake.join("photo.HEIC").exists());
        assert_eq!(fs::read(h.dirs.working.join("photo.HEIC.jpg")).unwrap(), b"earlier");
        assert_eq!(h.converter.call_count(), 0);
    }

    #[test]
    fn sources_record_stage_outcomes() {
        let h = Harness::new(&[320]);
        write_file(&h.dirs.intake, "bad.heic", b"CORRUPT data");
        write_file(&h.dirs.intake, "good.heic", b"fine data");

        let ctx = normalize_stage(&h.env(None), RunContext::new());

        let stages: Vec<(String, SourceStage)> = ctx
            .sources
            .iter()
            .map(|s| (s.file_name(), s.stage))
            .collect();
        assert_eq!(
            stages,
            vec![
                ("bad.heic".to_string(), SourceStage::Failed),
                ("good.heic.jpg".to_string(), SourceStage::Working),
            ]
        );
        assert!(ctx.sources.iter().all(|s| s.original_format == "heic"));
    }
}
