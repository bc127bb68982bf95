use crate::error::MediaResult;
use crate::pipeline::cv::{mask_to_mat, mat_to_mask};
use crate::pipeline::types::{BoundingBox, MaskBuffer};
use clap::ValueEnum;
use opencv::core::{Mat, Size};
use opencv::imgproc;

/// Detector output under-covers a subject's silhouette by roughly this many pixels.
pub const DEFAULT_EXPANSION_PX: u32 = 25;

/// Shape used when dilating a mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum StructuringElement {
    #[default]
    Disk,
    Square,
}

impl StructuringElement {
    fn morph_shape(&self) -> i32 {
        match self {
            StructuringElement::Disk => imgproc::MORPH_ELLIPSE,
            StructuringElement::Square => imgproc::MORPH_RECT,
        }
    }
}

/// Grows a mask outward by `margin_px` with a `(2r+1)`-sized element. The
/// result always contains the input and has the same dimensions.
pub fn expand_mask(
    mask: &MaskBuffer,
    margin_px: u32,
    element: StructuringElement,
) -> MediaResult<MaskBuffer> {
    let (width, height) = mask.dimensions();
    if margin_px == 0 || width == 0 || height == 0 || mask.coverage() == 0 {
        return Ok(mask.clone());
    }

    let k = 2 * margin_px as i32 + 1;
    let kernel = imgproc::get_structuring_element_def(element.morph_shape(), Size::new(k, k))?;
    let src = mask_to_mat(mask)?;
    let mut dst = Mat::default();
    imgproc::dilate_def(&src, &mut dst, &kernel)?;
    mat_to_mask(&dst)
}

/// Grows a box by `margin_px` on every side, clamped to `(width, height)`.
pub fn expand_box(bbox: BoundingBox, margin_px: u32, bounds: (u32, u32)) -> BoundingBox {
    let m = margin_px as i32;
    let (w, h) = (bounds.0 as i32, bounds.1 as i32);

    let x1 = (bbox.x1 - m).clamp(0, w);
    let y1 = (bbox.y1 - m).clamp(0, h);
    let x2 = (bbox.x2 + m).clamp(0, w);
    let y2 = (bbox.y2 + m).clamp(0, h);

    BoundingBox {
        x1,
        y1,
        x2: x2.max(x1),
        y2: y2.max(y1),
    }
}
