// SPDX-License-Identifier: CEPL-1.0
//! KTX 1.1 cubemap containers.
//!
//! The file stores mip levels outermost and faces inside each level. Texel
//! data is repacked face-major here (face 0 level 0, face 0 level 1, ...)
//! so a face's mip chain is contiguous in [`CubemapAsset::data`].
use crate::LoadError;
use std::path::Path;
use tracing::debug;

pub const CUBE_FACES: usize = 6;

const IDENTIFIER: [u8; 12] = [
    0xAB, 0x4B, 0x54, 0x58, 0x20, 0x31, 0x31, 0xBB, 0x0D, 0x0A, 0x1A, 0x0A,
];
const HEADER_LEN: usize = 64;
const ENDIAN_NATIVE: u32 = 0x0403_0201;
const ENDIAN_SWAPPED: u32 = 0x0102_0304;

const GL_RGBA8: u32 = 0x8058;
const GL_RGBA16F: u32 = 0x881A;
const GL_RGBA32F: u32 = 0x8814;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TexelFormat {
    Rgba8Unorm,
    Rgba16Float,
    Rgba32Float,
}

impl TexelFormat {
    pub fn bytes_per_texel(self) -> usize {
        match self {
            TexelFormat::Rgba8Unorm => 4,
            TexelFormat::Rgba16Float => 8,
            TexelFormat::Rgba32Float => 16,
        }
    }

    fn from_gl_internal(v: u32) -> Option<Self> {
        match v {
            GL_RGBA8 => Some(TexelFormat::Rgba8Unorm),
            GL_RGBA16F => Some(TexelFormat::Rgba16Float),
            GL_RGBA32F => Some(TexelFormat::Rgba32Float),
            _ => None,
        }
    }
}

/// Location of one (face, level) image inside [`CubemapAsset::data`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MipLevel {
    pub offset: usize,
    pub size: usize,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CubemapAsset {
    pub width: u32,
    pub height: u32,
    pub format: TexelFormat,
    pub mip_levels: u32,
    pub data: Vec<u8>,
    /// Indexed `[face][level]`.
    pub levels: Vec<Vec<MipLevel>>,
}

impl CubemapAsset {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let asset = Self::parse(&bytes)?;
        debug!(
            "ktx {}: {}x{} {:?}, {} mips, {} bytes",
            path.display(),
            asset.width,
            asset.height,
            asset.format,
            asset.mip_levels,
            asset.data.len()
        );
        Ok(asset)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, LoadError> {
        if bytes.len() < HEADER_LEN || bytes[..12] != IDENTIFIER {
            return Err(LoadError::Ktx("missing KTX 1.1 identifier".into()));
        }
        let swap = match le_u32(bytes, 12) {
            ENDIAN_NATIVE => false,
            ENDIAN_SWAPPED => true,
            other => return Err(LoadError::Ktx(format!("bad endianness marker {other:#x}"))),
        };
        let word = |off: usize| -> u32 {
            let v = le_u32(bytes, off);
            if swap {
                v.swap_bytes()
            } else {
                v
            }
        };

        let internal_format = word(28);
        let width = word(36);
        let height = word(40).max(1);
        let depth = word(44);
        let array_elements = word(48);
        let faces = word(52);
        let mip_levels = word(56).max(1);
        let kv_bytes = word(60) as usize;

        let format = TexelFormat::from_gl_internal(internal_format).ok_or_else(|| {
            LoadError::Ktx(format!("unsupported glInternalFormat {internal_format:#x}"))
        })?;
        if faces as usize != CUBE_FACES {
            return Err(LoadError::Ktx(format!("expected 6 faces, found {faces}")));
        }
        if depth > 1 || array_elements > 1 {
            return Err(LoadError::Ktx("array and 3D cubemaps are not supported".into()));
        }
        if width == 0 {
            return Err(LoadError::Ktx("zero width".into()));
        }
        if width != height {
            return Err(LoadError::Ktx(format!(
                "cube faces must be square, found {width}x{height}"
            )));
        }
        let max_levels = full_chain_len(width, height);
        if mip_levels > max_levels {
            return Err(LoadError::Ktx(format!(
                "{mip_levels} mip levels declared, {width}x{height} allows at most {max_levels}"
            )));
        }

        let mut cursor = HEADER_LEN
            .checked_add(kv_bytes)
            .filter(|&c| c <= bytes.len())
            .ok_or_else(|| LoadError::Ktx("key/value data overruns file".into()))?;

        // file order is [level][face]; gather slices then repack [face][level]
        let mut slices: Vec<Vec<&[u8]>> = vec![Vec::with_capacity(mip_levels as usize); CUBE_FACES];
        for level in 0..mip_levels {
            if cursor + 4 > bytes.len() {
                return Err(LoadError::Ktx(format!("truncated at level {level}")));
            }
            let face_size = word(cursor) as usize;
            cursor += 4;
            let (w, h) = level_extent(width, height, level);
            let expected = w as usize * h as usize * format.bytes_per_texel();
            if face_size != expected {
                return Err(LoadError::Ktx(format!(
                    "level {level} reports {face_size} bytes per face, expected {expected}"
                )));
            }
            for face in slices.iter_mut() {
                let end = cursor + face_size;
                if end > bytes.len() {
                    return Err(LoadError::Ktx(format!("truncated at level {level}")));
                }
                face.push(&bytes[cursor..end]);
                cursor = align4(end);
            }
            cursor = align4(cursor);
        }

        let mut data = Vec::with_capacity(slices.iter().flatten().map(|s| s.len()).sum());
        let mut levels = Vec::with_capacity(CUBE_FACES);
        for face in &slices {
            let mut chain = Vec::with_capacity(face.len());
            for (level, texels) in face.iter().enumerate() {
                let (w, h) = level_extent(width, height, level as u32);
                chain.push(MipLevel {
                    offset: data.len(),
                    size: texels.len(),
                    width: w,
                    height: h,
                });
                data.extend_from_slice(texels);
            }
            levels.push(chain);
        }

        Ok(Self {
            width,
            height,
            format,
            mip_levels,
            data,
            levels,
        })
    }

    /// Single-level cubemap where every texel has the same RGBA32F value.
    pub fn solid(size: u32, rgba: [f32; 4]) -> Self {
        let size = size.max(1);
        let texel: Vec<u8> = rgba.iter().flat_map(|c| c.to_le_bytes()).collect();
        let face_size = size as usize * size as usize * texel.len();
        let mut data = Vec::with_capacity(face_size * CUBE_FACES);
        let mut levels = Vec::with_capacity(CUBE_FACES);
        for _ in 0..CUBE_FACES {
            levels.push(vec![MipLevel {
                offset: data.len(),
                size: face_size,
                width: size,
                height: size,
            }]);
            for _ in 0..size * size {
                data.extend_from_slice(&texel);
            }
        }
        Self {
            width: size,
            height: size,
            format: TexelFormat::Rgba32Float,
            mip_levels: 1,
            data,
            levels,
        }
    }

    pub fn level(&self, face: usize, level: usize) -> Option<&MipLevel> {
        self.levels.get(face)?.get(level)
    }
}

/// Number of levels down to 1x1.
fn full_chain_len(width: u32, height: u32) -> u32 {
    32 - width.max(height).leading_zeros()
}

fn level_extent(width: u32, height: u32, level: u32) -> (u32, u32) {
    ((width >> level).max(1), (height >> level).max(1))
}

fn align4(v: usize) -> usize {
    (v + 3) & !3
}

fn le_u32(bytes: &[u8], off: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&bytes[off..off + 4]);
    u32::from_le_bytes(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// RGBA8 cubemap whose texel bytes encode (level, face).
    fn build_ktx(size: u32, mips: u32, kv: &[u8]) -> Vec<u8> {
        let mut out = IDENTIFIER.to_vec();
        let header = [
            ENDIAN_NATIVE,
            0x1401, // GL_UNSIGNED_BYTE
            1,
            0x1908, // GL_RGBA
            GL_RGBA8,
            0x1908,
            size,
            size,
            0,
            0,
            6,
            mips,
            kv.len() as u32,
        ];
        for w in header {
            out.extend_from_slice(&w.to_le_bytes());
        }
        out.extend_from_slice(kv);
        for level in 0..mips {
            let (w, h) = level_extent(size, size, level);
            let face_size = (w * h * 4) as usize;
            out.extend_from_slice(&(face_size as u32).to_le_bytes());
            for face in 0..6u8 {
                out.extend(std::iter::repeat(level as u8 * 16 + face).take(face_size));
            }
        }
        out
    }

    #[test]
    fn parses_and_repacks_face_major() {
        let bytes = build_ktx(4, 3, &[]);
        let asset = CubemapAsset::parse(&bytes).expect("parse");
        assert_eq!((asset.width, asset.height, asset.mip_levels), (4, 4, 3));
        assert_eq!(asset.format, TexelFormat::Rgba8Unorm);
        // 6 * (64 + 16 + 4)
        assert_eq!(asset.data.len(), 6 * 84);

        let mut expected_offset = 0;
        for face in 0..6 {
            for level in 0..3 {
                let lvl = asset.level(face, level).expect("level");
                assert_eq!(lvl.offset, expected_offset);
                assert_eq!(lvl.width, 4 >> level);
                let texels = &asset.data[lvl.offset..lvl.offset + lvl.size];
                let tag = level as u8 * 16 + face as u8;
                assert!(texels.iter().all(|&b| b == tag));
                expected_offset += lvl.size;
            }
        }
    }

    #[test]
    fn skips_key_value_block() {
        let bytes = build_ktx(2, 1, &[7u8; 12]);
        let asset = CubemapAsset::parse(&bytes).expect("parse");
        assert_eq!(asset.data.len(), 6 * 16);
        assert_eq!(asset.data[0], 0);
    }

    #[test]
    fn rejects_wrong_magic_and_truncation() {
        assert!(matches!(
            CubemapAsset::parse(&[0u8; 80]),
            Err(LoadError::Ktx(_))
        ));
        let mut bytes = build_ktx(4, 1, &[]);
        bytes.truncate(bytes.len() - 10);
        assert!(matches!(CubemapAsset::parse(&bytes), Err(LoadError::Ktx(_))));
    }

    #[test]
    fn rejects_non_cube_containers() {
        let mut bytes = build_ktx(2, 1, &[]);
        // numberOfFaces lives at byte 52
        bytes[52..56].copy_from_slice(&1u32.to_le_bytes());
        assert!(matches!(CubemapAsset::parse(&bytes), Err(LoadError::Ktx(_))));
    }

    #[test]
    fn mip_count_is_bounded_by_face_size() {
        assert_eq!(full_chain_len(1, 1), 1);
        assert_eq!(full_chain_len(4, 4), 3);
        assert_eq!(full_chain_len(5, 5), 3);

        let mut bytes = build_ktx(1, 1, &[]);
        // numberOfMipmapLevels lives at byte 56
        bytes[56..60].copy_from_slice(&40u32.to_le_bytes());
        assert!(matches!(CubemapAsset::parse(&bytes), Err(LoadError::Ktx(_))));

        let bytes = build_ktx(4, 4, &[]);
        assert!(matches!(CubemapAsset::parse(&bytes), Err(LoadError::Ktx(_))));
    }

    #[test]
    fn rejects_non_square_faces() {
        let mut bytes = build_ktx(4, 1, &[]);
        // pixelHeight lives at byte 40
        bytes[40..44].copy_from_slice(&2u32.to_le_bytes());
        assert!(matches!(CubemapAsset::parse(&bytes), Err(LoadError::Ktx(_))));
    }

    #[test]
    fn solid_cubemap_layout() {
        let asset = CubemapAsset::solid(2, [0.5, 0.5, 0.5, 1.0]);
        assert_eq!(asset.levels.len(), 6);
        assert_eq!(asset.data.len(), 6 * 4 * 16);
        assert_eq!(asset.level(5, 0).map(|l| l.offset), Some(5 * 64));
    }
}
