//! Tile rasters and source-over compositing.

use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader, Limits, Rgba, RgbaImage};
use streaming::{PixelOffset, TileGrid, TileId};

use crate::error::{StampError, StorageError, StorageOp};

/// Largest edge accepted when decoding a submitted image.
pub const MAX_STAMP_DIMENSION: u32 = 8192;

/// Largest RGBA buffer a submitted image may decode to (4096 x 4096).
pub const MAX_STAMP_DECODE_BYTES: u64 = 64 * 1024 * 1024;

/// One decoded texture tile.
///
/// Tiles handed out by the pipeline are immutable snapshots; writers
/// composite into a private copy and publish it whole.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub id: TileId,
    pub path: String,
    pub image: RgbaImage,
}

impl Tile {
    /// Fully transparent tile of the grid's tile size.
    pub fn blank(id: TileId, grid: &TileGrid) -> Self {
        Self {
            id,
            path: id.content_path(),
            image: RgbaImage::new(grid.tile_width, grid.tile_height),
        }
    }

    /// Decode stored PNG bytes, rejecting rasters of the wrong size.
    pub fn decode(id: TileId, bytes: &[u8], grid: &TileGrid) -> Result<Self, StorageError> {
        let image = image::load_from_memory_with_format(bytes, ImageFormat::Png)
            .map_err(|e| {
                StorageError::with_source(StorageOp::DecodeTile, "stored tile is not a PNG", e)
                    .for_tile(id)
            })?
            .to_rgba8();

        if image.dimensions() != (grid.tile_width, grid.tile_height) {
            return Err(StorageError::new(
                StorageOp::DecodeTile,
                format!(
                    "stored tile is {}x{}, grid expects {}x{}",
                    image.width(),
                    image.height(),
                    grid.tile_width,
                    grid.tile_height
                ),
            )
            .for_tile(id));
        }

        Ok(Self {
            id,
            path: id.content_path(),
            image,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, StorageError> {
        encode_png(&self.image).map_err(|e| e.for_tile(self.id))
    }
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, StorageError> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| StorageError::with_source(StorageOp::EncodeTile, "png encode failed", e))?;
    Ok(buf.into_inner())
}

/// Decode a submitted stamp image of any supported format.
///
/// The header is checked before any pixel data is inflated, so a small file
/// cannot expand past [`MAX_STAMP_DECODE_BYTES`].
pub fn decode_stamp_image(bytes: &[u8]) -> Result<RgbaImage, StampError> {
    decode_within(bytes, MAX_STAMP_DECODE_BYTES)
}

fn decode_within(bytes: &[u8], max_bytes: u64) -> Result<RgbaImage, StampError> {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_STAMP_DIMENSION);
    limits.max_image_height = Some(MAX_STAMP_DIMENSION);
    limits.max_alloc = Some(MAX_STAMP_DECODE_BYTES);

    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| StampError::invalid("image", format!("unreadable image: {e}")))?;
    reader.limits(limits);

    let decoder = reader
        .into_decoder()
        .map_err(|e| StampError::invalid("image", format!("cannot decode image: {e}")))?;
    let (width, height) = decoder.dimensions();
    let rgba_bytes = u64::from(width) * u64::from(height) * 4;
    if rgba_bytes > max_bytes {
        return Err(StampError::invalid(
            "image",
            format!("{width}x{height} image exceeds the {max_bytes} byte decode budget"),
        ));
    }

    let image = DynamicImage::from_decoder(decoder)
        .map_err(|e| StampError::invalid("image", format!("cannot decode image: {e}")))?
        .to_rgba8();
    if image.width() == 0 || image.height() == 0 {
        return Err(StampError::invalid("image", "image has no pixels"));
    }
    Ok(image)
}

/// Resample `image` to exactly `width` x `height`.
pub fn scale_to(image: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let (width, height) = (width.max(1), height.max(1));
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    imageops::resize(image, width, height, FilterType::Triangle)
}

/// Source-over blend of one pixel. Fully transparent source pixels leave the
/// destination untouched.
pub fn alpha_blend(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    if src[3] == 0 {
        return dst;
    }
    if src[3] == 255 || dst[3] == 0 {
        return src;
    }
    let sa = src[3] as f32 / 255.0;
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    let inv = 1.0 / out_a;
    let channel = |i: usize| {
        ((src[i] as f32 * sa + dst[i] as f32 * da * (1.0 - sa)) * inv)
            .round()
            .clamp(0.0, 255.0) as u8
    };
    Rgba([
        channel(0),
        channel(1),
        channel(2),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}

/// Blend `src` onto `dst` with its top-left corner at `offset`.
///
/// The offset may be negative or run past the far edges; only the
/// overlapping pixels are touched.
pub fn composite(dst: &mut RgbaImage, src: &RgbaImage, offset: PixelOffset) {
    let (dst_w, dst_h) = (dst.width() as i64, dst.height() as i64);
    let (src_w, src_h) = (src.width() as i64, src.height() as i64);

    let x0 = offset.x.max(0);
    let y0 = offset.y.max(0);
    let x1 = (offset.x + src_w).min(dst_w);
    let y1 = (offset.y + src_h).min(dst_h);
    if x0 >= x1 || y0 >= y1 {
        return;
    }

    for y in y0..y1 {
        for x in x0..x1 {
            let s = *src.get_pixel((x - offset.x) as u32, (y - offset.y) as u32);
            let d = dst.get_pixel_mut(x as u32, y as u32);
            *d = alpha_blend(*d, s);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);
    const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);

    fn solid(w: u32, h: u32, px: Rgba<u8>) -> RgbaImage {
        RgbaImage::from_pixel(w, h, px)
    }

    #[test]
    fn transparent_source_keeps_destination() {
        assert_eq!(alpha_blend(RED, CLEAR), RED);
        assert_eq!(alpha_blend(RED, Rgba([0, 255, 0, 0])), RED);
    }

    #[test]
    fn opaque_source_replaces_destination() {
        assert_eq!(alpha_blend(RED, BLUE), BLUE);
        assert_eq!(alpha_blend(CLEAR, Rgba([1, 2, 3, 40])), Rgba([1, 2, 3, 40]));
    }

    #[test]
    fn half_alpha_mixes_over_opaque() {
        let out = alpha_blend(RED, Rgba([0, 0, 255, 128]));
        assert_eq!(out[3], 255);
        assert!((126..=128).contains(&out[0]), "red {}", out[0]);
        assert!((127..=129).contains(&out[2]), "blue {}", out[2]);
    }

    #[test]
    fn composite_clips_negative_offset() {
        let mut dst = solid(4, 4, CLEAR);
        let src = solid(3, 3, RED);
        composite(&mut dst, &src, PixelOffset { x: -2, y: -1 });

        for y in 0..4 {
            for x in 0..4 {
                let expected = if x < 1 && y < 2 { RED } else { CLEAR };
                assert_eq!(*dst.get_pixel(x, y), expected, "pixel ({x}, {y})");
            }
        }
    }

    #[test]
    fn composite_clips_far_edges_and_ignores_misses() {
        let mut dst = solid(4, 4, CLEAR);
        let src = solid(3, 3, BLUE);
        composite(&mut dst, &src, PixelOffset { x: 3, y: 3 });
        assert_eq!(*dst.get_pixel(3, 3), BLUE);
        assert_eq!(*dst.get_pixel(2, 3), CLEAR);

        let before = dst.clone();
        composite(&mut dst, &src, PixelOffset { x: 10, y: 0 });
        composite(&mut dst, &src, PixelOffset { x: 0, y: -3 });
        assert_eq!(dst, before);
    }

    #[test]
    fn transparent_stamp_pixels_do_not_erase() {
        let mut dst = solid(2, 1, RED);
        let mut src = solid(2, 1, BLUE);
        src.put_pixel(1, 0, CLEAR);
        composite(&mut dst, &src, PixelOffset { x: 0, y: 0 });
        assert_eq!(*dst.get_pixel(0, 0), BLUE);
        assert_eq!(*dst.get_pixel(1, 0), RED);
    }

    #[test]
    fn tile_png_round_trip_and_size_check() {
        let grid = TileGrid::new(2, 1, 8, 8);
        let mut tile = Tile::blank(TileId::new(1, 0), &grid);
        assert_eq!(tile.path, "tiles/1_0.png");
        tile.image.put_pixel(3, 4, RED);

        let bytes = tile.encode().unwrap();
        assert_eq!(Tile::decode(tile.id, &bytes, &grid).unwrap(), tile);

        let other = TileGrid::new(2, 1, 16, 16);
        let err = Tile::decode(tile.id, &bytes, &other).unwrap_err();
        assert_eq!(err.op, StorageOp::DecodeTile);
        assert_eq!(err.tile, Some(TileId::new(1, 0)));
    }

    #[test]
    fn stamp_decode_rejects_garbage() {
        let err = decode_stamp_image(b"definitely not an image").unwrap_err();
        assert_eq!(err.field(), Some("image"));

        let png = encode_png(&solid(5, 3, BLUE)).unwrap();
        assert_eq!(decode_stamp_image(&png).unwrap().dimensions(), (5, 3));
    }

    #[test]
    fn stamp_decode_is_bounded_by_rgba_size() {
        let png = encode_png(&solid(5, 3, BLUE)).unwrap();
        assert!(decode_within(&png, 5 * 3 * 4).is_ok());

        let err = decode_within(&png, 5 * 3 * 4 - 1).unwrap_err();
        assert_eq!(err.field(), Some("image"));
        assert!(err.to_string().contains("5x3"), "{err}");
    }

    #[test]
    fn scale_to_hits_exact_size() {
        let src = solid(4, 4, RED);
        let out = scale_to(&src, 10, 3);
        assert_eq!(out.dimensions(), (10, 3));
        assert_eq!(*out.get_pixel(5, 1), RED);
    }
}
