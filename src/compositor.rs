//! Tile compositing: many viewport-sized rasters in, one image out.

use crate::mapper::Diagnostic;
use crate::{Error, ImageFormat, Result};
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{imageops, DynamicImage, ExtendedColorType, ImageEncoder, RgbaImage};
use sha2::{Digest, Sha256};

/// One captured slice, already cropped to the region it contributes.
///
/// All numbers are device pixels.
#[derive(Debug, Clone)]
pub struct RasterTile {
    pub image: RgbaImage,
    /// Output row where this tile starts
    pub document_y: u32,
    /// Rows this tile contributes to the output
    pub height: u32,
    pub is_last: bool,
}

/// Encoded capture handed back to the caller.
#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub image: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub diagnostics: Vec<Diagnostic>,
}

impl CaptureResult {
    /// `data:` URL of the encoded image, the form clipboard and download
    /// collaborators consume.
    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.format.mime_type(),
            base64::engine::general_purpose::STANDARD.encode(&self.image)
        )
    }

    /// Hex SHA-256 of the encoded bytes.
    pub fn sha256_hex(&self) -> String {
        hex::encode(Sha256::digest(&self.image))
    }
}

/// Most rows a middle tile may come up short of its slot and still be
/// stretched to fit. Device-pixel rounding never costs more than one.
const MAX_ROW_FILL: u32 = 2;

/// Draw `tiles` into a `total_width x total_height` surface.
///
/// Every tile but the last is drawn from its top at `document_y`, limited to
/// its `height`, to `tile_step_height` and to the start of the following
/// tile. At fractional device pixel ratios a tile's raster can be a row
/// shorter than its slot; its bottom row is then repeated to close the gap.
/// The last tile contributes only its bottom `height` rows, placed
/// flush with the bottom of the output; whatever it shows above that was
/// already covered by earlier tiles. Tiles are ordered by `document_y` first,
/// so the input order does not affect the result.
pub fn composite(mut tiles: Vec<RasterTile>, total_width: u32, total_height: u32, tile_step_height: u32) -> Result<RgbaImage> {
    if total_width == 0 || total_height == 0 {
        return Err(Error::ImageError(format!("empty output surface {}x{}", total_width, total_height)));
    }
    tiles.sort_by_key(|t| (t.is_last, t.document_y));

    let mut out = RgbaImage::new(total_width, total_height);
    let starts: Vec<u32> = tiles.iter().map(|t| t.document_y).collect();

    for (i, tile) in tiles.iter().enumerate() {
        let (img_w, img_h) = tile.image.dimensions();
        let width = img_w.min(total_width);
        if width == 0 || img_h == 0 {
            continue;
        }

        let (src_y, dst_y, rows, slot) = if tile.is_last {
            let rows = tile.height.min(img_h).min(total_height);
            (img_h - rows, total_height - rows, rows, rows)
        } else {
            if tile.document_y >= total_height {
                continue;
            }
            let next = starts.get(i + 1).copied().unwrap_or(total_height).max(tile.document_y);
            let slot = tile
                .height
                .min(next - tile.document_y)
                .min(total_height - tile.document_y);
            let rows = slot.min(img_h).min(tile_step_height.max(1));
            (0, tile.document_y, rows, slot)
        };
        if rows == 0 {
            continue;
        }

        let slice = imageops::crop_imm(&tile.image, 0, src_y, width, rows).to_image();
        imageops::replace(&mut out, &slice, 0, i64::from(dst_y));

        let missing = slot - rows;
        if missing > 0 && missing <= MAX_ROW_FILL {
            let edge = imageops::crop_imm(&tile.image, 0, src_y + rows - 1, width, 1).to_image();
            for k in 0..missing {
                imageops::replace(&mut out, &edge, 0, i64::from(dst_y + rows + k));
            }
        }
    }

    Ok(out)
}

/// Encode `img` in `format`. `quality` (1-100) only affects JPEG.
pub fn encode(img: &RgbaImage, format: ImageFormat, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let (w, h) = img.dimensions();
    match format {
        ImageFormat::Png => {
            PngEncoder::new(&mut buf).write_image(img.as_raw(), w, h, ExtendedColorType::Rgba8)?;
        }
        ImageFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(img.clone()).to_rgb8();
            JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
                .write_image(rgb.as_raw(), w, h, ExtendedColorType::Rgb8)?;
        }
    }
    Ok(buf)
}

/// Composite and encode in one go.
pub fn composite_encoded(
    tiles: Vec<RasterTile>,
    total_width: u32,
    total_height: u32,
    tile_step_height: u32,
    format: ImageFormat,
    quality: u8,
    diagnostics: Vec<Diagnostic>,
) -> Result<CaptureResult> {
    let img = composite(tiles, total_width, total_height, tile_step_height)?;
    Ok(CaptureResult {
        image: encode(&img, format, quality)?,
        width: img.width(),
        height: img.height(),
        format,
        diagnostics,
    })
}
