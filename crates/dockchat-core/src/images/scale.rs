//! Decode and width-fit helpers for inline images.

/// Decoded, display-ready image.
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    pub pixels: image::RgbaImage,
    pub source_width: u32,
    pub source_height: u32,
}

impl Bitmap {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

/// Decodes an encoded image payload and downscales it to `max_width`.
///
/// Scaling is width-bound only and keeps the aspect ratio. Images already
/// narrower than `max_width` are never upscaled. A `max_width` of 0 means the
/// viewport is unknown and disables scaling.
///
/// # Errors
/// Returns an error string if format detection, decoding or resizing fails.
pub fn decode_to_width(data: &[u8], max_width: u32) -> Result<Bitmap, String> {
    let reader = image::ImageReader::new(std::io::Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| format!("decode: {e}"))?;
    let decoded = reader.decode().map_err(|e| format!("decode: {e}"))?;

    let (width, height) = (decoded.width(), decoded.height());
    if width == 0 || height == 0 {
        return Err("decode: empty image".to_string());
    }

    let pixels = match fit_dimensions(width, height, max_width) {
        Some((dst_w, dst_h)) => resize_rgba(&decoded, dst_w, dst_h)?,
        None => decoded.to_rgba8(),
    };

    Ok(Bitmap {
        pixels,
        source_width: width,
        source_height: height,
    })
}

/// Target size when `width` exceeds `max_width`, otherwise `None`.
pub fn fit_dimensions(width: u32, height: u32, max_width: u32) -> Option<(u32, u32)> {
    if max_width == 0 || width <= max_width {
        return None;
    }
    let scaled_height = (u64::from(height) * u64::from(max_width) / u64::from(width)).max(1);
    Some((max_width, scaled_height as u32))
}

fn resize_rgba(
    src: &image::DynamicImage,
    dst_w: u32,
    dst_h: u32,
) -> Result<image::RgbaImage, String> {
    use fast_image_resize as fir;

    let src_rgba = src.to_rgba8();
    let src_w = src_rgba.width();
    let src_h = src_rgba.height();

    let src_image =
        fir::images::Image::from_vec_u8(src_w, src_h, src_rgba.into_raw(), fir::PixelType::U8x4)
            .map_err(|e| format!("resize: {e}"))?;

    let mut dst_image = fir::images::Image::new(dst_w, dst_h, fir::PixelType::U8x4);
    let mut resizer = fir::Resizer::new();
    let options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Bilinear));
    resizer
        .resize(&src_image, &mut dst_image, Some(&options))
        .map_err(|e| format!("resize: {e}"))?;

    image::RgbaImage::from_raw(dst_w, dst_h, dst_image.into_vec())
        .ok_or_else(|| "resize: invalid output buffer".to_string())
}

#[cfg(test)]
pub(crate) fn encode_test_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 120, 200, 255]));
    let mut buf = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_image_is_downscaled_keeping_aspect() {
        let png = encode_test_png(400, 200);
        let bitmap = decode_to_width(&png, 100).unwrap();
        assert_eq!((bitmap.width(), bitmap.height()), (100, 50));
        assert_eq!((bitmap.source_width, bitmap.source_height), (400, 200));
    }

    #[test]
    fn narrow_image_is_never_upscaled() {
        let png = encode_test_png(40, 30);
        let bitmap = decode_to_width(&png, 800).unwrap();
        assert_eq!((bitmap.width(), bitmap.height()), (40, 30));
    }

    #[test]
    fn unknown_viewport_keeps_size() {
        assert_eq!(fit_dimensions(5000, 10, 0), None);
    }

    #[test]
    fn very_flat_image_keeps_one_row() {
        assert_eq!(fit_dimensions(1000, 1, 10), Some((10, 1)));
    }

    #[test]
    fn garbage_payload_fails_to_decode() {
        let err = decode_to_width(b"<html>not an image</html>", 100).unwrap_err();
        assert!(err.starts_with("decode:"));
    }
}
