//! Resize planning: turns a preset, the base-dimension policy and the
//! source orientation into a crop rectangle and output size.

use folio_model::{BaseDimension, Orientation, ThumbnailPreset};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizePlan {
    /// Region of the source to keep; `None` keeps the whole image.
    pub crop: Option<CropRect>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drive {
    Width,
    Height,
    Square,
}

/// Plan the output for one preset.
///
/// Under [`BaseDimension::Auto`] a width-only preset scales landscape and
/// square sources to that width and crops portrait sources to a square of
/// that size (their height is capped at the width); height-only presets
/// mirror this. A preset with both dimensions always cover-crops to that
/// exact aspect. Explicit `Width`/`Height` policies use the preset's single
/// value as that dimension without cropping. Outputs never upscale.
pub fn plan_resize(
    source_width: u32,
    source_height: u32,
    preset: &ThumbnailPreset,
    base: BaseDimension,
) -> ResizePlan {
    let src_w = source_width.max(1);
    let src_h = source_height.max(1);
    let width = preset.width.filter(|w| *w > 0);
    let height = preset.height.filter(|h| *h > 0);

    match (width, height) {
        (Some(w), Some(h)) => cover(src_w, src_h, w, h),
        (Some(size), None) => single(src_w, src_h, size, Drive::Width, base),
        (None, Some(size)) => single(src_w, src_h, size, Drive::Height, base),
        (None, None) => ResizePlan {
            crop: None,
            width: src_w,
            height: src_h,
        },
    }
}

fn single(
    src_w: u32,
    src_h: u32,
    size: u32,
    axis: Drive,
    base: BaseDimension,
) -> ResizePlan {
    let drive = match base {
        BaseDimension::Width => Drive::Width,
        BaseDimension::Height => Drive::Height,
        BaseDimension::Auto => {
            match (axis, Orientation::classify(src_w, src_h)) {
                (Drive::Width, Orientation::Vertical)
                | (Drive::Height, Orientation::Horizontal) => Drive::Square,
                (axis, _) => axis,
            }
        }
    };

    match drive {
        Drive::Width => {
            let width = size.min(src_w);
            ResizePlan {
                crop: None,
                width,
                height: scale(src_h, width, src_w),
            }
        }
        Drive::Height => {
            let height = size.min(src_h);
            ResizePlan {
                crop: None,
                width: scale(src_w, height, src_h),
                height,
            }
        }
        Drive::Square => cover(src_w, src_h, size, size),
    }
}

/// Centre-crop the source to the target aspect, then size to the target,
/// shrinking the target (aspect preserved) when the source is smaller.
fn cover(src_w: u32, src_h: u32, width: u32, height: u32) -> ResizePlan {
    let (out_w, out_h) = if width > src_w || height > src_h {
        // Limited by whichever side runs out first.
        if u64::from(src_w) * u64::from(height)
            <= u64::from(src_h) * u64::from(width)
        {
            (src_w, scale(height, src_w, width))
        } else {
            (scale(width, src_h, height), src_h)
        }
    } else {
        (width, height)
    };

    let source_is_wider =
        u64::from(src_w) * u64::from(out_h) > u64::from(src_h) * u64::from(out_w);
    let (crop_w, crop_h) = if source_is_wider {
        (scale(src_h, out_w, out_h).min(src_w), src_h)
    } else {
        (src_w, scale(src_w, out_h, out_w).min(src_h))
    };

    let crop = (crop_w != src_w || crop_h != src_h).then(|| CropRect {
        x: (src_w - crop_w) / 2,
        y: (src_h - crop_h) / 2,
        width: crop_w,
        height: crop_h,
    });
    ResizePlan {
        crop,
        width: out_w,
        height: out_h,
    }
}

/// `value * num / den`, rounded, never below one pixel.
fn scale(value: u32, num: u32, den: u32) -> u32 {
    let den = u64::from(den.max(1));
    let scaled = (u64::from(value) * u64::from(num) + den / 2) / den;
    u32::try_from(scaled).unwrap_or(u32::MAX).max(1)
}
