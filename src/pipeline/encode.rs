//! Scale and compress a single work item.

use super::{EncodedArtifact, PipelineError, WorkItem};
use crate::imaging::{CompressParams, ImageBackend, Quality, ScaleParams};

/// Resize `item` to its target width and encode it.
///
/// Either step failing yields [`PipelineError::ScaleCompress`] for this item
/// only; siblings are encoded independently by the caller.
pub fn encode_item(
    backend: &dyn ImageBackend,
    item: WorkItem,
    quality: Quality,
) -> Result<EncodedArtifact, PipelineError> {
    let WorkItem {
        source,
        stem,
        image,
        target_width,
        format,
    } = item;

    let fail = |e| PipelineError::ScaleCompress {
        path: source.clone(),
        width: target_width,
        source: e,
    };

    let scaled = backend
        .scale(
            image,
            &ScaleParams {
                max_edge: target_width,
            },
        )
        .map_err(fail)?;
    let bytes = backend
        .compress(&scaled, &CompressParams { format, quality })
        .map_err(fail)?;

    Ok(EncodedArtifact {
        source,
        stem,
        target_width,
        format,
        bytes,
    })
}
