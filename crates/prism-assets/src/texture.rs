// SPDX-License-Identifier: CEPL-1.0
use crate::LoadError;
use std::path::Path;

/// Tightly packed 8-bit RGBA pixels, rows top to bottom.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rgba8Image {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Rgba8Image {
    pub fn row_bytes(&self) -> usize {
        self.width as usize * 4
    }
}

pub fn load_rgba8(path: impl AsRef<Path>) -> Result<Rgba8Image, LoadError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    decode_rgba8(&bytes)
}

pub fn decode_rgba8(bytes: &[u8]) -> Result<Rgba8Image, LoadError> {
    let img = image::load_from_memory(bytes)?.to_rgba8();
    let (width, height) = img.dimensions();
    Ok(Rgba8Image {
        width,
        height,
        pixels: img.into_raw(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    #[test]
    fn decodes_png_to_rgba8() {
        let mut src = RgbaImage::new(3, 2);
        src.put_pixel(2, 1, Rgba([10, 20, 30, 255]));
        let mut png = Vec::new();
        src.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .expect("encode");

        let img = decode_rgba8(&png).expect("decode");
        assert_eq!((img.width, img.height), (3, 2));
        assert_eq!(img.pixels.len(), 3 * 2 * 4);
        let last = &img.pixels[img.row_bytes() + 8..];
        assert_eq!(last, &[10, 20, 30, 255]);
    }

    #[test]
    fn garbage_is_an_image_error() {
        assert!(matches!(decode_rgba8(b"nope"), Err(LoadError::Image(_))));
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            load_rgba8("does/not/exist.png"),
            Err(LoadError::Io { .. })
        ));
    }
}
