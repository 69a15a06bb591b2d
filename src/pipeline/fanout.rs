//! One-to-many expansion of a decoded source into size-tagged work items.

use super::{SourceImage, WorkItem};
use crate::imaging::OutputFormat;
use image::DynamicImage;

/// Produce one [`WorkItem`] per target width, in width order.
///
/// Each item owns its own copy of the pixel buffer: `DynamicImage::clone`
/// copies the buffer, so items can be scaled concurrently without touching
/// each other. The last item takes the decoded image itself.
///
/// An empty `widths` slice yields no items.
pub fn fan_out(
    source: &SourceImage,
    image: DynamicImage,
    widths: &[u32],
    format: OutputFormat,
) -> Vec<WorkItem> {
    let stem = source.stem();
    let mut items = Vec::with_capacity(widths.len());
    let mut image = Some(image);

    for (i, &target_width) in widths.iter().enumerate() {
        let handle = if i + 1 == widths.len() {
            image.take()
        } else {
            image.clone()
        };
        let Some(handle) = handle else {
            break;
        };
        items.push(WorkItem {
            source: source.path.clone(),
            stem: stem.clone(),
            image: handle,
            target_width,
            format,
        });
    }
    items
}
