use std::path::Path;

use folio_model::{BaseDimension, EncodedFormat, ThumbnailPreset};
use image::codecs::avif::AvifEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageEncoder, ImageError};

use super::plan::{ResizePlan, plan_resize};
use crate::error::{LibraryError, Result};

/// Encoder speed for AVIF (1 = slowest/best, 10 = fastest).
const AVIF_SPEED: u8 = 8;

/// Everything rendered for one source image.
#[derive(Debug)]
pub(crate) struct RenderedSource {
    pub width: u32,
    pub height: u32,
    pub variants: Vec<RenderedVariant>,
}

#[derive(Debug)]
pub(crate) struct RenderedVariant {
    pub preset: String,
    pub format: EncodedFormat,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decode `source` and encode every preset in every format. CPU bound;
/// run on the blocking pool.
pub(crate) fn render_source(
    source: &Path,
    presets: &[(String, ThumbnailPreset)],
    base: BaseDimension,
    formats: &[EncodedFormat],
    quality: u8,
) -> Result<RenderedSource> {
    let image = image::open(source).map_err(|err| match err {
        ImageError::IoError(err) => LibraryError::Io(err),
        other => LibraryError::Encode(format!(
            "failed to decode {}: {other}",
            source.display()
        )),
    })?;
    let (width, height) = (image.width(), image.height());

    let mut variants = Vec::with_capacity(presets.len() * formats.len());
    for (name, preset) in presets {
        let plan = plan_resize(width, height, preset, base);
        let resized = apply_plan(&image, &plan);
        for format in formats {
            let bytes = encode(&resized, *format, quality).map_err(|err| {
                LibraryError::Encode(format!(
                    "{} preset {name} as {format}: {err}",
                    source.display()
                ))
            })?;
            variants.push(RenderedVariant {
                preset: name.clone(),
                format: *format,
                bytes,
                width: resized.width(),
                height: resized.height(),
            });
        }
    }

    Ok(RenderedSource {
        width,
        height,
        variants,
    })
}

pub(crate) fn apply_plan(image: &DynamicImage, plan: &ResizePlan) -> DynamicImage {
    let cropped = match plan.crop {
        Some(rect) => image.crop_imm(rect.x, rect.y, rect.width, rect.height),
        None => image.clone(),
    };
    if cropped.width() == plan.width && cropped.height() == plan.height {
        cropped
    } else {
        cropped.resize_exact(plan.width, plan.height, FilterType::Lanczos3)
    }
}

pub(crate) fn encode(
    image: &DynamicImage,
    format: EncodedFormat,
    quality: u8,
) -> std::result::Result<Vec<u8>, String> {
    let prepared = if image.color().has_alpha() {
        DynamicImage::ImageRgba8(image.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(image.to_rgb8())
    };

    match format {
        EncodedFormat::Webp => {
            let encoder = webp::Encoder::from_image(&prepared)
                .map_err(|err| err.to_string())?;
            Ok(encoder.encode(f32::from(quality)).to_vec())
        }
        EncodedFormat::Avif => {
            let mut buffer = Vec::new();
            AvifEncoder::new_with_speed_quality(&mut buffer, AVIF_SPEED, quality)
                .write_image(
                    prepared.as_bytes(),
                    prepared.width(),
                    prepared.height(),
                    prepared.color().into(),
                )
                .map_err(|err| err.to_string())?;
            Ok(buffer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }))
    }

    #[test]
    fn webp_output_decodes_at_planned_size() {
        let image = gradient(400, 200);
        let plan = plan_resize(
            400,
            200,
            &ThumbnailPreset::width(100),
            BaseDimension::Auto,
        );
        let resized = apply_plan(&image, &plan);
        let bytes = encode(&resized, EncodedFormat::Webp, 80).unwrap();

        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (100, 50));
    }

    #[test]
    fn render_reports_source_dimensions_and_every_variant() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("tall.png");
        gradient(60, 120).save(&source).unwrap();

        let presets = vec![
            ("thumb".to_string(), ThumbnailPreset::width(30)),
            ("wide".to_string(), ThumbnailPreset::exact(40, 20)),
        ];
        let rendered = render_source(
            &source,
            &presets,
            BaseDimension::Auto,
            &[EncodedFormat::Webp],
            70,
        )
        .unwrap();

        assert_eq!((rendered.width, rendered.height), (60, 120));
        let sizes: Vec<_> = rendered
            .variants
            .iter()
            .map(|v| (v.preset.as_str(), v.width, v.height))
            .collect();
        assert_eq!(sizes, vec![("thumb", 30, 30), ("wide", 40, 20)]);
    }

    #[test]
    fn undecodable_source_is_an_encode_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("broken.jpg");
        std::fs::write(&source, b"definitely not a jpeg").unwrap();
        let err = render_source(
            &source,
            &[("thumb".into(), ThumbnailPreset::width(10))],
            BaseDimension::Auto,
            &[EncodedFormat::Webp],
            80,
        )
        .unwrap_err();
        assert!(matches!(err, LibraryError::Encode(_)));
    }
}
