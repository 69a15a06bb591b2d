//! Move matched intake files into the working directory.
//!
//! A move is copy, sync, then delete: the intake copy disappears only once
//! the working copy is durable. An interruption can leave a file in both
//! places, never in neither. Moving a file that is already gone is a no-op,
//! so relocation can be repeated safely.
//!
//! A move never replaces a different file at the destination. When the
//! destination already holds identical bytes, the move was interrupted after
//! its copy and only the delete is left to do; otherwise the move fails with
//! [`PipelineError::Collision`] and the source stays where it is.

use super::normalize::is_proprietary;
use super::{
    PipelineError, RunContext, RunEvent, SourceImage, SourceStage, StageEnv, StageKind,
    file_name_of, list_files,
};
use rayon::prelude::*;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub fn relocate_stage(env: &StageEnv<'_>, mut ctx: RunContext) -> RunContext {
    let config = env.config;
    let dirs = &config.directories;
    // Proprietary files belong to normalize, even if also listed as inputs.
    let candidates = match list_files(&dirs.intake, |p| {
        config.input_pattern.matches_path(p) && !is_proprietary(p, &config.normalize.extensions)
    }) {
        Ok(c) => c,
        Err(e) => {
            env.fail(&mut ctx, StageKind::Relocate, &dirs.intake, &e.into());
            return ctx;
        }
    };
    if candidates.is_empty() {
        return ctx;
    }
    log::info!("relocating {} file(s)", candidates.len());

    let results: Vec<(PathBuf, Result<Option<PathBuf>, PipelineError>)> = env.pool.install(|| {
        candidates
            .par_iter()
            .map(|path| (path.clone(), move_into(path, &dirs.working)))
            .collect()
    });

    for (path, result) in results {
        let mut source = SourceImage::new(&path, SourceStage::Intake);
        match result {
            Ok(Some(dest)) => {
                let file = source.file_name();
                env.emit(RunEvent::Relocated { file: file.clone() });
                ctx.relocated.push(file);
                source.path = dest;
                source.stage = SourceStage::Working;
            }
            Ok(None) => {
                log::debug!("{} already relocated", path.display());
                continue;
            }
            Err(e) => {
                env.fail(&mut ctx, StageKind::Relocate, &path, &e);
                source.stage = SourceStage::Failed;
            }
        }
        ctx.track_source(source);
    }
    ctx
}

/// Move `path` into `dest_dir`, keeping its file name.
///
/// Returns `Ok(None)` when `path` no longer exists.
pub fn move_into(path: &Path, dest_dir: &Path) -> Result<Option<PathBuf>, PipelineError> {
    let relocate_err = |source: std::io::Error| PipelineError::Relocate {
        path: path.to_path_buf(),
        source,
    };
    let name = path.file_name().ok_or_else(|| {
        relocate_err(std::io::Error::new(
            ErrorKind::InvalidInput,
            "path has no file name",
        ))
    })?;
    let dest = dest_dir.join(name);

    if dest.exists() {
        if !path.exists() {
            return Ok(None);
        }
        if !same_contents(path, &dest).map_err(relocate_err)? {
            return Err(PipelineError::Collision {
                path: path.to_path_buf(),
                existing: dest,
            });
        }
        log::debug!("{} already copied, finishing move", path.display());
        return match fs::remove_file(path) {
            Ok(()) => Ok(Some(dest)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Some(dest)),
            Err(e) => Err(relocate_err(e)),
        };
    }
    move_file(path, &dest)
}

/// Copy, sync, then delete `path`, landing it at exactly `dest`.
///
/// Returns `Ok(None)` when `path` no longer exists.
pub fn move_file(path: &Path, dest: &Path) -> Result<Option<PathBuf>, PipelineError> {
    let relocate_err = |source: std::io::Error| PipelineError::Relocate {
        path: path.to_path_buf(),
        source,
    };
    let dest = dest.to_path_buf();

    match fs::copy(path, &dest) {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound && !path.exists() => return Ok(None),
        Err(e) => return Err(relocate_err(e)),
    }
    fs::File::open(&dest)
        .and_then(|f| f.sync_all())
        .map_err(relocate_err)?;

    match fs::remove_file(path) {
        Ok(()) => Ok(Some(dest)),
        // Another run removed it between copy and delete.
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Some(dest)),
        Err(e) => Err(relocate_err(e)),
    }
}

fn same_contents(a: &Path, b: &Path) -> std::io::Result<bool> {
    if fs::metadata(a)?.len() != fs::metadata(b)?.len() {
        return Ok(false);
    }
    Ok(fs::read(a)? == fs::read(b)?)
}
