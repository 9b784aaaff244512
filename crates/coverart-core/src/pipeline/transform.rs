//! Source artwork to published variants.
//!
//! Two stages, kept separate:
//! 1. **resize**: decode, scale to each width class (longest edge), and
//!    re-encode as a lossless PNG intermediate.
//! 2. **compress**: re-encode each intermediate into a lossy primary encoding
//!    (palette-quantized PNG or progressive JPEG) and lossy WebP, each with
//!    its own quality setting.
//!
//! Both stages are CPU-bound and run on the blocking pool.

use color_quant::NeuQuant;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use jpeg_encoder::{ColorType as JpegColor, Encoder as JpegEncoder};
use image::{DynamicImage, ImageFormat};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{Config, PrimaryFormat, TransformConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::types::{Encoding, KeyLayout, Variant, VariantPayload, WidthClass};

use super::decode::ImageDecoder;
use super::digest::Digest;
use super::fetch::ImageSource;
use super::retry::RetryPolicy;

/// Lossless PNG rendition of one width class.
pub struct Intermediate {
    pub width_class: WidthClass,
    pub size: u32,
    pub png: Vec<u8>,
}

/// Fetches a source image and produces its four variant payloads.
pub struct Transformer {
    source: Arc<dyn ImageSource>,
    decoder: ImageDecoder,
    layout: KeyLayout,
    config: TransformConfig,
    retry: RetryPolicy,
}

impl Transformer {
    pub fn new(config: &Config, source: Arc<dyn ImageSource>) -> Self {
        Self {
            source,
            decoder: ImageDecoder::new(config.limits.clone()),
            layout: KeyLayout::from_config(config),
            config: config.transform.clone(),
            retry: RetryPolicy::from_config(&config.pipeline),
        }
    }

    /// Fetch, decode, resize and compress. Returns exactly four payloads in
    /// [`KeyLayout::variants`] order.
    pub async fn transform(
        &self,
        source_url: &str,
        digest: &Digest,
    ) -> PipelineResult<Vec<VariantPayload>> {
        let start = Instant::now();

        let bytes = self
            .retry
            .run(source_url, || self.source.fetch(source_url))
            .await?;
        let fetch_time = start.elapsed();

        let decoded = self.decoder.decode(bytes, source_url).await?;
        tracing::trace!(
            digest = %digest,
            width = decoded.width,
            height = decoded.height,
            "Decoded source"
        );

        let sizes = [
            (WidthClass::Large, self.layout.large_size),
            (WidthClass::Small, self.layout.small_size),
        ];
        let image = decoded.image;
        let intermediates = run_blocking(move || resize_stage(&image, &sizes)).await?;

        let variants = self.layout.variants(digest);
        let config = self.config.clone();
        let payloads =
            run_blocking(move || compress_stage(intermediates, &variants, &config)).await?;

        tracing::debug!(
            digest = %digest,
            "Transformed in {:?} (fetch {:?})",
            start.elapsed(),
            fetch_time
        );
        Ok(payloads)
    }
}

async fn run_blocking<T, F>(task: F) -> PipelineResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> PipelineResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| PipelineError::Encode {
            variant: "transform task".to_string(),
            message: format!("Task join error: {e}"),
        })?
}

fn encode_error(variant: impl ToString, err: impl ToString) -> PipelineError {
    PipelineError::Encode {
        variant: variant.to_string(),
        message: err.to_string(),
    }
}

/// Scale to each `(class, max_edge)` preserving aspect ratio, as lossless PNG.
///
/// Smaller sources are scaled up so every variant has the advertised width.
pub fn resize_stage(
    image: &DynamicImage,
    sizes: &[(WidthClass, u32)],
) -> PipelineResult<Vec<Intermediate>> {
    sizes
        .iter()
        .map(|&(width_class, size)| {
            let resized = image.resize(size, size, FilterType::Lanczos3);
            let mut png = Vec::new();
            resized
                .write_with_encoder(PngEncoder::new(&mut png))
                .map_err(|e| encode_error(format!("{size}w intermediate"), e))?;
            Ok(Intermediate {
                width_class,
                size,
                png,
            })
        })
        .collect()
}

/// Re-encode every intermediate into each variant that shares its width class.
pub fn compress_stage(
    intermediates: Vec<Intermediate>,
    variants: &[Variant],
    config: &TransformConfig,
) -> PipelineResult<Vec<VariantPayload>> {
    let mut rasters = Vec::with_capacity(intermediates.len());
    for intermediate in intermediates {
        let raster = image::load_from_memory_with_format(&intermediate.png, ImageFormat::Png)
            .map_err(|e| encode_error(format!("{}w intermediate", intermediate.size), e))?;
        rasters.push((intermediate.width_class, raster));
    }

    variants
        .iter()
        .map(|variant| {
            let raster = rasters
                .iter()
                .find(|(class, _)| *class == variant.width_class)
                .map(|(_, raster)| raster)
                .ok_or_else(|| encode_error(variant, "no intermediate for width class"))?;
            let bytes = encode_variant(raster, variant.encoding, config)
                .map_err(|message| encode_error(variant, message))?;
            Ok(VariantPayload {
                variant: variant.clone(),
                bytes,
            })
        })
        .collect()
}

fn encode_variant(
    raster: &DynamicImage,
    encoding: Encoding,
    config: &TransformConfig,
) -> Result<Vec<u8>, String> {
    match encoding {
        Encoding::Primary(PrimaryFormat::Png) => quantized_png(raster, config.png_sample_factor),
        Encoding::Primary(PrimaryFormat::Jpeg) => progressive_jpeg(raster, config.jpeg_quality),
        Encoding::Webp => {
            // libwebp only accepts 8-bit RGB or RGBA
            let input = if raster.color().has_alpha() {
                DynamicImage::ImageRgba8(raster.to_rgba8())
            } else {
                DynamicImage::ImageRgb8(raster.to_rgb8())
            };
            let encoder = webp::Encoder::from_image(&input).map_err(|e| e.to_string())?;
            let memory = encoder
                .encode_simple(false, config.webp_quality)
                .map_err(|e| format!("{e:?}"))?;
            Ok(memory.to_vec())
        }
    }
}

/// Reduce to a 256-colour palette and write an indexed PNG.
fn quantized_png(raster: &DynamicImage, sample_factor: i32) -> Result<Vec<u8>, String> {
    let rgba = raster.to_rgba8();
    let (width, height) = rgba.dimensions();
    let quantizer = NeuQuant::new(sample_factor, 256, rgba.as_raw());
    let indices: Vec<u8> = rgba
        .as_raw()
        .chunks_exact(4)
        .map(|pixel| quantizer.index_of(pixel) as u8)
        .collect();

    let colors = quantizer.color_map_rgba();
    let palette: Vec<u8> = colors
        .chunks_exact(4)
        .flat_map(|c| [c[0], c[1], c[2]])
        .collect();
    let alpha: Vec<u8> = colors.chunks_exact(4).map(|c| c[3]).collect();

    let mut buf = Vec::new();
    let mut encoder = png::Encoder::new(&mut buf, width, height);
    encoder.set_color(png::ColorType::Indexed);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_compression(png::Compression::Best);
    encoder.set_palette(palette);
    if alpha.iter().any(|&a| a < u8::MAX) {
        encoder.set_trns(alpha);
    }
    let mut writer = encoder.write_header().map_err(|e| e.to_string())?;
    writer.write_image_data(&indices).map_err(|e| e.to_string())?;
    writer.finish().map_err(|e| e.to_string())?;
    Ok(buf)
}

/// Progressive JPEG. Alpha is dropped.
fn progressive_jpeg(raster: &DynamicImage, quality: u8) -> Result<Vec<u8>, String> {
    let rgb = raster.to_rgb8();
    let too_large = |_| format!("{}x{} exceeds the JPEG size limit", rgb.width(), rgb.height());
    let width = u16::try_from(rgb.width()).map_err(too_large)?;
    let height = u16::try_from(rgb.height()).map_err(too_large)?;

    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new(&mut buf, quality);
    encoder.set_progressive(true);
    encoder
        .encode(rgb.as_raw(), width, height, JpegColor::Rgb)
        .map_err(|e| e.to_string())?;
    Ok(buf)
}
