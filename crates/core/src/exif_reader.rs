use exif::{In, Reader, Tag};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

const SOI: [u8; 3] = [0xFF, 0xD8, 0xFF];
const MAX_SCAN_ATTEMPTS: usize = 64;

/// EXIF orientation (1-8) of a JPEG or TIFF-based container, 1 when absent.
pub fn read_orientation(data: &[u8]) -> u8 {
    let Ok(exif) = Reader::new().read_from_container(&mut Cursor::new(data)) else {
        return 1;
    };
    exif.get_field(Tag::Orientation, In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .filter(|v| (1..=8).contains(v))
        .map(|v| v as u8)
        .unwrap_or(1)
}

/// Rotates/mirrors a decoded image so it is displayed upright.
pub fn apply_orientation(image: DynamicImage, orientation: u8) -> DynamicImage {
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

/// Decodes the largest JPEG preview embedded in a RAW file.
///
/// TIFF-based RAWs (CR2, NEF, ARW, DNG, PEF, SRW) point at their previews
/// through IFD0/IFD1 tags; those are tried first. Formats kamadak-exif cannot
/// parse (RAF, ORF, RW2) fall through to a marker scan of the raw bytes.
pub fn extract_embedded_preview(data: &[u8]) -> Option<DynamicImage> {
    decode_largest(exif_preview_candidates(data)).or_else(|| decode_largest(scan_jpeg_segments(data)))
}

struct Candidate<'a> {
    bytes: &'a [u8],
    pixels: u64,
}

fn decode_largest(mut candidates: Vec<Candidate<'_>>) -> Option<DynamicImage> {
    candidates.sort_by_key(|c| std::cmp::Reverse(c.pixels));
    candidates.iter().find_map(|c| {
        image::load_from_memory_with_format(c.bytes, ImageFormat::Jpeg).ok()
    })
}

fn exif_preview_candidates(data: &[u8]) -> Vec<Candidate<'_>> {
    let Ok(exif) = Reader::new().read_from_container(&mut Cursor::new(data)) else {
        return Vec::new();
    };
    // Offsets are relative to the TIFF header, which is the file start only
    // for TIFF containers.
    if exif.buf().len() != data.len() {
        return Vec::new();
    }

    let uint = |tag: Tag, ifd: In| {
        exif.get_field(tag, ifd)
            .and_then(|field| field.value.get_uint(0))
            .map(|v| v as usize)
    };

    let mut ranges = Vec::new();
    for ifd in [In::THUMBNAIL, In::PRIMARY] {
        if let (Some(offset), Some(len)) = (
            uint(Tag::JPEGInterchangeFormat, ifd),
            uint(Tag::JPEGInterchangeFormatLength, ifd),
        ) {
            ranges.push((offset, len));
        }
    }
    if matches!(uint(Tag::Compression, In::PRIMARY), Some(6 | 7)) {
        if let (Some(offset), Some(len)) = (
            uint(Tag::StripOffsets, In::PRIMARY),
            uint(Tag::StripByteCounts, In::PRIMARY),
        ) {
            ranges.push((offset, len));
        }
    }

    ranges
        .into_iter()
        .filter_map(|(offset, len)| data.get(offset..offset.checked_add(len)?))
        .filter(|bytes| bytes.starts_with(&SOI[..2]))
        .map(|bytes| Candidate {
            bytes,
            pixels: jpeg_extent(bytes, 0).map(|(_, pixels)| pixels).unwrap_or(0),
        })
        .collect()
}

fn scan_jpeg_segments(data: &[u8]) -> Vec<Candidate<'_>> {
    let mut segments = Vec::new();
    let mut pos = 0usize;
    for _ in 0..MAX_SCAN_ATTEMPTS {
        let Some(found) = data[pos..].windows(SOI.len()).position(|w| w == SOI) else {
            break;
        };
        let start = pos + found;
        match jpeg_extent(data, start) {
            Some((end, pixels)) => {
                segments.push(Candidate {
                    bytes: &data[start..end],
                    pixels,
                });
                pos = end;
            }
            None => pos = start + 1,
        }
    }
    segments
}

/// Walks the marker structure of a JPEG starting at `start` (an SOI).
/// Returns the offset one past its EOI and the frame's pixel count.
fn jpeg_extent(data: &[u8], start: usize) -> Option<(usize, u64)> {
    let mut pos = start + 2;
    let mut pixels = None;

    loop {
        if *data.get(pos)? != 0xFF {
            return None;
        }
        let mut marker = *data.get(pos + 1)?;
        while marker == 0xFF {
            pos += 1;
            marker = *data.get(pos + 1)?;
        }
        pos += 2;

        match marker {
            0xD9 => return pixels.map(|p| (pos, p)),
            0x01 | 0xD0..=0xD7 => continue,
            _ => {}
        }

        let len = u16::from_be_bytes([*data.get(pos)?, *data.get(pos + 1)?]) as usize;
        if len < 2 {
            return None;
        }
        let segment = data.get(pos + 2..pos + len)?;
        if matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC) {
            let height = u16::from_be_bytes([*segment.get(1)?, *segment.get(2)?]);
            let width = u16::from_be_bytes([*segment.get(3)?, *segment.get(4)?]);
            pixels = Some(u64::from(width) * u64::from(height));
        }
        pos += len;

        if marker == 0xDA {
            // Entropy-coded data runs until the first marker that is neither
            // a stuffed 0xFF00 nor a restart marker.
            loop {
                if *data.get(pos)? == 0xFF {
                    let next = *data.get(pos + 1)?;
                    if next == 0x00 || (0xD0..=0xD7).contains(&next) {
                        pos += 2;
                        continue;
                    }
                    break;
                }
                pos += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{apply_orientation, extract_embedded_preview, jpeg_extent, read_orientation};
    use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn encode_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 4) as u8, (y * 4) as u8, ((x + y) * 2) as u8])
        });
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
            .expect("encode jpeg");
        out
    }

    #[test]
    fn orientation_defaults_to_normal_without_exif() {
        assert_eq!(read_orientation(b"not an image at all"), 1);
        assert_eq!(read_orientation(&encode_jpeg(8, 8)), 1);
    }

    #[test]
    fn orientation_six_rotates_clockwise() {
        let img = RgbImage::from_fn(3, 2, |x, y| Rgb([(y * 3 + x) as u8, 0, 0]));
        let rotated = apply_orientation(DynamicImage::ImageRgb8(img), 6).to_rgb8();

        assert_eq!(rotated.dimensions(), (2, 3));
        // [0 1 2]      [3 0]
        // [3 4 5]  ->  [4 1]
        //              [5 2]
        let values: Vec<u8> = rotated.pixels().map(|p| p[0]).collect();
        assert_eq!(values, vec![3, 0, 4, 1, 5, 2]);
    }

    #[test]
    fn transposing_orientations_swap_dimensions() {
        for orientation in [5u8, 6, 7, 8] {
            let img = DynamicImage::new_rgb8(4, 3);
            assert_eq!(apply_orientation(img, orientation).dimensions(), (3, 4));
        }
        for orientation in [1u8, 2, 3, 4, 0, 9] {
            let img = DynamicImage::new_rgb8(4, 3);
            assert_eq!(apply_orientation(img, orientation).dimensions(), (4, 3));
        }
    }

    #[test]
    fn jpeg_extent_covers_whole_stream() {
        let jpeg = encode_jpeg(40, 30);
        let mut data = b"pad".to_vec();
        data.extend_from_slice(&jpeg);
        data.extend_from_slice(b"trailing");

        let (end, pixels) = jpeg_extent(&data, 3).expect("extent");
        assert_eq!(end, 3 + jpeg.len());
        assert_eq!(pixels, 40 * 30);
    }

    #[test]
    fn finds_preview_inside_unknown_container() {
        let mut raw = b"FAKERAW\x00header".to_vec();
        raw.extend_from_slice(&encode_jpeg(32, 24));
        raw.extend_from_slice(b"\x00\x01sensor-data-trailer");

        let preview = extract_embedded_preview(&raw).expect("preview should be found");
        assert_eq!(preview.dimensions(), (32, 24));
    }

    #[test]
    fn prefers_largest_embedded_preview() {
        let mut raw = b"HDR".to_vec();
        raw.extend_from_slice(&encode_jpeg(16, 16));
        raw.extend_from_slice(b"gap");
        raw.extend_from_slice(&encode_jpeg(64, 48));

        let preview = extract_embedded_preview(&raw).expect("preview should be found");
        assert_eq!(preview.dimensions(), (64, 48));
    }

    #[test]
    fn returns_none_without_preview() {
        assert!(extract_embedded_preview(b"no jpeg markers in here").is_none());
        assert!(extract_embedded_preview(&[0xFF, 0xD8, 0xFF, 0x00, 0xFF, 0xD9]).is_none());
    }
}
