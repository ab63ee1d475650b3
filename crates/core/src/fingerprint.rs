use crate::error::FingerprintError;
use crate::exif_reader::{apply_orientation, extract_embedded_preview, read_orientation};
use image::{DynamicImage, ImageError, ImageFormat};
use image_hasher::{HashAlg, Hasher, HasherConfig};
use std::fmt;
use std::fs;
use std::path::Path;

pub const DEFAULT_HASH_SIZE: u32 = 16;

/// Fixed-length perceptual descriptor of an image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    bits: Box<[u8]>,
}

impl Fingerprint {
    pub fn from_bytes(bytes: impl Into<Box<[u8]>>) -> Self {
        Self { bits: bytes.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    pub fn bit_len(&self) -> usize {
        self.bits.len() * 8
    }

    /// Number of differing bits. Bits past the end of the shorter
    /// fingerprint all count as different.
    pub fn hamming_distance(&self, other: &Fingerprint) -> u32 {
        let common: u32 = self
            .bits
            .iter()
            .zip(other.bits.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum();
        let extra = self.bits.len().abs_diff(other.bits.len()) * 8;
        common + extra as u32
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.bits.iter() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Turns an image file into a fingerprint and compares fingerprints.
pub trait FingerprintProvider {
    fn fingerprint(&self, path: &Path) -> Result<Fingerprint, FingerprintError>;

    fn distance(&self, a: &Fingerprint, b: &Fingerprint) -> u32 {
        a.hamming_distance(b)
    }
}

impl<P: FingerprintProvider + ?Sized> FingerprintProvider for &P {
    fn fingerprint(&self, path: &Path) -> Result<Fingerprint, FingerprintError> {
        (**self).fingerprint(path)
    }

    fn distance(&self, a: &Fingerprint, b: &Fingerprint) -> u32 {
        (**self).distance(a, b)
    }
}

/// Gradient (difference) hash over the upright image. RAW files are hashed
/// through their embedded JPEG preview.
pub struct DHashProvider {
    hasher: Hasher,
    hash_size: u32,
}

impl DHashProvider {
    pub fn new(hash_size: u32) -> Self {
        let hasher = HasherConfig::new()
            .hash_alg(HashAlg::Gradient)
            .hash_size(hash_size, hash_size)
            .to_hasher();
        Self { hasher, hash_size }
    }

    pub fn hash_size(&self) -> u32 {
        self.hash_size
    }

    pub fn fingerprint_image(&self, image: &DynamicImage) -> Fingerprint {
        Fingerprint::from_bytes(self.hasher.hash_image(image).as_bytes().to_vec())
    }
}

impl Default for DHashProvider {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_SIZE)
    }
}

impl FingerprintProvider for DHashProvider {
    fn fingerprint(&self, path: &Path) -> Result<Fingerprint, FingerprintError> {
        let image = load_upright_image(path)?;
        Ok(self.fingerprint_image(&image))
    }
}

fn load_upright_image(path: &Path) -> Result<DynamicImage, FingerprintError> {
    let data = fs::read(path).map_err(|source| FingerprintError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let image = match ImageFormat::from_path(path) {
        Ok(format) => image::load_from_memory_with_format(&data, format).map_err(|source| {
            match source {
                ImageError::IoError(source) => FingerprintError::Io {
                    path: path.to_path_buf(),
                    source,
                },
                source => FingerprintError::Decode {
                    path: path.to_path_buf(),
                    source,
                },
            }
        })?,
        Err(_) => extract_embedded_preview(&data)
            .ok_or_else(|| FingerprintError::NoPreview(path.to_path_buf()))?,
    };

    Ok(apply_orientation(image, read_orientation(&data)))
}
