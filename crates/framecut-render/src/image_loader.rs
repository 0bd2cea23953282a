//! Image decoding and PNG output.
//! Decodes PNG, JPEG, WebP and the other formats `image` supports into Pictures.

use std::path::Path;

use image::{DynamicImage, ImageBuffer, Rgb};

use framecut_core::{FrameCutError, FrameCutResult, Picture};

/// Load an image file. 16-bit sources keep their precision, everything
/// else is decoded at 8 bits.
pub fn load_picture(path: &Path) -> FrameCutResult<Picture> {
    let img = image::open(path).map_err(|e| {
        FrameCutError::resource(
            format!("failed to load image '{}': {}", path.display(), e),
            path,
        )
    })?;
    picture_from_image(img)
}

/// Load an image from raw bytes.
pub fn load_picture_from_bytes(data: &[u8]) -> FrameCutResult<Picture> {
    let img = image::load_from_memory(data)
        .map_err(|e| FrameCutError::Image(format!("failed to decode image: {}", e)))?;
    picture_from_image(img)
}

fn picture_from_image(img: DynamicImage) -> FrameCutResult<Picture> {
    let sixteen_bit = matches!(
        img,
        DynamicImage::ImageLuma16(_)
            | DynamicImage::ImageLumaA16(_)
            | DynamicImage::ImageRgb16(_)
            | DynamicImage::ImageRgba16(_)
    );
    if sixteen_bit {
        let rgba = img.to_rgba16();
        let (width, height) = rgba.dimensions();
        Picture::from_rgba16(width, height, rgba.as_raw())
    } else {
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        Picture::from_rgba8(width, height, rgba.as_raw())
    }
}

/// Write `picture` as an 8-bit RGB PNG. Alpha is dropped.
pub fn save_png_rgb8(picture: &Picture, path: &Path) -> FrameCutResult<()> {
    let buffer: ImageBuffer<Rgb<u8>, Vec<u8>> =
        ImageBuffer::from_raw(picture.width, picture.height, picture.to_rgb8()).ok_or_else(
            || FrameCutError::invalid(format!("picture planes do not match {}x{}", picture.width, picture.height)),
        )?;
    buffer
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| FrameCutError::Image(format!("failed to write '{}': {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use framecut_core::{BitDepth, Color};

    fn temp_png(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("framecut_{}_{}.png", tag, uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_load_picture_missing_file() {
        let result = load_picture(Path::new("/nonexistent/image.png"));
        assert!(matches!(result, Err(FrameCutError::Resource { .. })));
    }

    #[test]
    fn test_load_from_garbage_bytes() {
        assert!(matches!(
            load_picture_from_bytes(b"not an image"),
            Err(FrameCutError::Image(_))
        ));
    }

    #[test]
    fn test_png_write_then_load() {
        let path = temp_png("roundtrip");
        let pic = Picture::solid(3, 2, &Color::rgb16(65535, 0, 257));
        save_png_rgb8(&pic, &path).unwrap();
        let loaded = load_picture(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded.depth, BitDepth::Eight);
        assert_eq!((loaded.width, loaded.height), (3, 2));
        assert_eq!(loaded.get_pixel(2, 1), Some(([255, 0, 1], 1.0)));
    }

    #[test]
    fn test_load_sixteen_bit_with_alpha() {
        let path = temp_png("deep");
        let raw: Vec<u16> = vec![1000, 2000, 3000, 32768];
        let buf: ImageBuffer<image::Rgba<u16>, Vec<u16>> = ImageBuffer::from_raw(1, 1, raw).unwrap();
        buf.save_with_format(&path, image::ImageFormat::Png).unwrap();
        let loaded = load_picture(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded.depth, BitDepth::Sixteen);
        let (rgb, a) = loaded.get_pixel(0, 0).unwrap();
        assert_eq!(rgb, [1000, 2000, 3000]);
        assert!((a - 32768.0 / 65535.0).abs() < 1e-6);
    }
}
