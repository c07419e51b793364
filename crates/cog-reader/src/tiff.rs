//! TIFF header and image file directory parsing.
//!
//! Only the first IFD (full resolution) is read. Tag values stored out of
//! line are served from the header prefetch when possible and fetched with
//! an extra range read otherwise.

use bytes::Bytes;

use crate::source::RangeSource;
use crate::{CogError, CogResult};

pub mod tags {
    pub const IMAGE_WIDTH: u16 = 256;
    pub const IMAGE_LENGTH: u16 = 257;
    pub const BITS_PER_SAMPLE: u16 = 258;
    pub const COMPRESSION: u16 = 259;
    pub const STRIP_OFFSETS: u16 = 273;
    pub const SAMPLES_PER_PIXEL: u16 = 277;
    pub const ROWS_PER_STRIP: u16 = 278;
    pub const STRIP_BYTE_COUNTS: u16 = 279;
    pub const PLANAR_CONFIG: u16 = 284;
    pub const PREDICTOR: u16 = 317;
    pub const TILE_WIDTH: u16 = 322;
    pub const TILE_LENGTH: u16 = 323;
    pub const TILE_OFFSETS: u16 = 324;
    pub const TILE_BYTE_COUNTS: u16 = 325;
    pub const SAMPLE_FORMAT: u16 = 339;
    pub const MODEL_PIXEL_SCALE: u16 = 33550;
    pub const MODEL_TIEPOINT: u16 = 33922;
    pub const MODEL_TRANSFORMATION: u16 = 34264;
    pub const GEO_KEY_DIRECTORY: u16 = 34735;
    pub const GDAL_NODATA: u16 = 42113;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    pub fn u16(self, b: &[u8]) -> u16 {
        let a = [b[0], b[1]];
        match self {
            ByteOrder::LittleEndian => u16::from_le_bytes(a),
            ByteOrder::BigEndian => u16::from_be_bytes(a),
        }
    }

    pub fn u32(self, b: &[u8]) -> u32 {
        let a = [b[0], b[1], b[2], b[3]];
        match self {
            ByteOrder::LittleEndian => u32::from_le_bytes(a),
            ByteOrder::BigEndian => u32::from_be_bytes(a),
        }
    }

    pub fn u64(self, b: &[u8]) -> u64 {
        let a = [b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]];
        match self {
            ByteOrder::LittleEndian => u64::from_le_bytes(a),
            ByteOrder::BigEndian => u64::from_be_bytes(a),
        }
    }
}

/// Parse the 8-byte classic TIFF header. Returns byte order and first IFD offset.
pub fn parse_header(bytes: &[u8]) -> CogResult<(ByteOrder, u32)> {
    if bytes.len() < 8 {
        return Err(CogError::NotTiff(format!("only {} bytes", bytes.len())));
    }
    let order = match &bytes[0..2] {
        b"II" => ByteOrder::LittleEndian,
        b"MM" => ByteOrder::BigEndian,
        other => return Err(CogError::NotTiff(format!("bad byte order mark {:?}", other))),
    };
    match order.u16(&bytes[2..4]) {
        42 => Ok((order, order.u32(&bytes[4..8]))),
        43 => Err(CogError::BigTiff),
        magic => Err(CogError::NotTiff(format!("bad magic {}", magic))),
    }
}

/// A raw 12-byte IFD entry.
#[derive(Debug, Clone, Copy)]
pub struct RawEntry {
    pub tag: u16,
    pub field_type: u16,
    pub count: u32,
    pub value: [u8; 4],
}

impl RawEntry {
    fn type_size(&self) -> Option<u64> {
        match self.field_type {
            1 | 2 | 6 | 7 => Some(1),
            3 | 8 => Some(2),
            4 | 9 | 11 => Some(4),
            5 | 10 | 12 => Some(8),
            _ => None,
        }
    }

    fn byte_len(&self) -> CogResult<u64> {
        self.type_size()
            .map(|s| s * self.count as u64)
            .ok_or_else(|| CogError::unsupported("TIFF field type", self.field_type))
    }
}

/// Decoded tag values, widened.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Unsigned(Vec<u64>),
    Signed(Vec<i64>),
    Float(Vec<f64>),
    Ascii(String),
}

impl TagValue {
    fn decode(order: ByteOrder, entry: &RawEntry, data: &[u8]) -> CogResult<Self> {
        let n = entry.count as usize;
        let need = entry.byte_len()? as usize;
        if data.len() < need {
            return Err(CogError::InvalidStructure(format!(
                "tag {} needs {} bytes, have {}",
                entry.tag,
                need,
                data.len()
            )));
        }
        Ok(match entry.field_type {
            1 | 7 => TagValue::Unsigned(data[..n].iter().map(|&b| b as u64).collect()),
            2 => TagValue::Ascii(
                String::from_utf8_lossy(&data[..n])
                    .trim_end_matches('\0')
                    .to_string(),
            ),
            3 => TagValue::Unsigned(data.chunks_exact(2).take(n).map(|c| order.u16(c) as u64).collect()),
            4 => TagValue::Unsigned(data.chunks_exact(4).take(n).map(|c| order.u32(c) as u64).collect()),
            6 => TagValue::Signed(data[..n].iter().map(|&b| b as i8 as i64).collect()),
            8 => TagValue::Signed(data.chunks_exact(2).take(n).map(|c| order.u16(c) as i16 as i64).collect()),
            9 => TagValue::Signed(data.chunks_exact(4).take(n).map(|c| order.u32(c) as i32 as i64).collect()),
            11 => TagValue::Float(
                data.chunks_exact(4)
                    .take(n)
                    .map(|c| f32::from_bits(order.u32(c)) as f64)
                    .collect(),
            ),
            12 => TagValue::Float(
                data.chunks_exact(8)
                    .take(n)
                    .map(|c| f64::from_bits(order.u64(c)))
                    .collect(),
            ),
            5 | 10 => TagValue::Float(
                data.chunks_exact(8)
                    .take(n)
                    .map(|c| {
                        let (num, den) = (order.u32(&c[..4]), order.u32(&c[4..]));
                        if entry.field_type == 10 {
                            num as i32 as f64 / den as i32 as f64
                        } else {
                            num as f64 / den as f64
                        }
                    })
                    .collect(),
            ),
            other => return Err(CogError::unsupported("TIFF field type", other)),
        })
    }

    pub fn as_u64s(&self) -> Option<Vec<u64>> {
        match self {
            TagValue::Unsigned(v) => Some(v.clone()),
            TagValue::Signed(v) => v.iter().map(|&x| u64::try_from(x).ok()).collect(),
            _ => None,
        }
    }

    pub fn first_u64(&self) -> Option<u64> {
        self.as_u64s().and_then(|v| v.first().copied())
    }

    pub fn as_f64s(&self) -> Option<Vec<f64>> {
        match self {
            TagValue::Float(v) => Some(v.clone()),
            TagValue::Unsigned(v) => Some(v.iter().map(|&x| x as f64).collect()),
            TagValue::Signed(v) => Some(v.iter().map(|&x| x as f64).collect()),
            TagValue::Ascii(_) => None,
        }
    }

    pub fn as_ascii(&self) -> Option<&str> {
        match self {
            TagValue::Ascii(s) => Some(s),
            _ => None,
        }
    }
}

/// Bytes from the start of the file, plus range reads for anything beyond.
pub struct Prefetched<'a> {
    source: &'a dyn RangeSource,
    prefix: Bytes,
}

impl<'a> Prefetched<'a> {
    pub fn new(source: &'a dyn RangeSource, prefix: Bytes) -> Self {
        Self { source, prefix }
    }

    pub fn prefix(&self) -> &Bytes {
        &self.prefix
    }

    pub async fn bytes(&self, offset: u64, length: u64) -> CogResult<Bytes> {
        let end = offset.checked_add(length).ok_or(CogError::Truncated { offset, length })?;
        if end <= self.prefix.len() as u64 {
            return Ok(self.prefix.slice(offset as usize..end as usize));
        }
        self.source.read_range(offset, length).await
    }
}

/// Structural and georeferencing tags of the first image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDirectory {
    pub width: u32,
    pub height: u32,
    pub bits_per_sample: u16,
    pub sample_format: u16,
    pub samples_per_pixel: u16,
    pub planar_config: u16,
    pub compression: u16,
    pub predictor: u16,
    pub tiled: bool,
    pub block_width: u32,
    pub block_height: u32,
    pub block_offsets: Vec<u64>,
    pub block_byte_counts: Vec<u64>,
    pub pixel_scale: Option<Vec<f64>>,
    pub tiepoint: Option<Vec<f64>>,
    pub transformation: Option<Vec<f64>>,
    pub geo_keys: Option<Vec<u64>>,
    pub gdal_nodata: Option<String>,
}

const WANTED: &[u16] = &[
    tags::IMAGE_WIDTH,
    tags::IMAGE_LENGTH,
    tags::BITS_PER_SAMPLE,
    tags::COMPRESSION,
    tags::STRIP_OFFSETS,
    tags::SAMPLES_PER_PIXEL,
    tags::ROWS_PER_STRIP,
    tags::STRIP_BYTE_COUNTS,
    tags::PLANAR_CONFIG,
    tags::PREDICTOR,
    tags::TILE_WIDTH,
    tags::TILE_LENGTH,
    tags::TILE_OFFSETS,
    tags::TILE_BYTE_COUNTS,
    tags::SAMPLE_FORMAT,
    tags::MODEL_PIXEL_SCALE,
    tags::MODEL_TIEPOINT,
    tags::MODEL_TRANSFORMATION,
    tags::GEO_KEY_DIRECTORY,
    tags::GDAL_NODATA,
];

impl ImageDirectory {
    /// Read the header and first IFD.
    pub async fn read(data: &Prefetched<'_>) -> CogResult<(ByteOrder, Self)> {
        let (order, ifd_offset) = parse_header(data.prefix())?;
        let ifd_offset = ifd_offset as u64;
        if ifd_offset < 8 {
            return Err(CogError::InvalidStructure(format!("IFD offset {}", ifd_offset)));
        }

        let count_bytes = data.bytes(ifd_offset, 2).await?;
        let count = order.u16(&count_bytes) as u64;
        if count == 0 {
            return Err(CogError::InvalidStructure("empty IFD".to_string()));
        }
        let entries_bytes = data.bytes(ifd_offset + 2, count * 12).await?;

        let mut values: Vec<(u16, TagValue)> = Vec::new();
        for raw in entries_bytes.chunks_exact(12) {
            let entry = RawEntry {
                tag: order.u16(&raw[0..2]),
                field_type: order.u16(&raw[2..4]),
                count: order.u32(&raw[4..8]),
                value: [raw[8], raw[9], raw[10], raw[11]],
            };
            if !WANTED.contains(&entry.tag) {
                continue;
            }
            let len = entry.byte_len()?;
            let value = if len <= 4 {
                TagValue::decode(order, &entry, &entry.value)?
            } else {
                let offset = order.u32(&entry.value) as u64;
                let bytes = data.bytes(offset, len).await?;
                TagValue::decode(order, &entry, &bytes)?
            };
            values.push((entry.tag, value));
        }

        Self::from_tags(&values).map(|dir| (order, dir))
    }

    fn from_tags(values: &[(u16, TagValue)]) -> CogResult<Self> {
        let get = |tag: u16| values.iter().find(|(t, _)| *t == tag).map(|(_, v)| v);
        let scalar = |tag: u16| get(tag).and_then(TagValue::first_u64);
        let required = |tag: u16, name: &'static str| scalar(tag).ok_or(CogError::MissingTag(name));

        let width = required(tags::IMAGE_WIDTH, "ImageWidth")? as u32;
        let height = required(tags::IMAGE_LENGTH, "ImageLength")? as u32;
        if width == 0 || height == 0 {
            return Err(CogError::InvalidStructure(format!("{}x{} image", width, height)));
        }

        let tiled = get(tags::TILE_OFFSETS).is_some();
        let (block_width, block_height, offsets_tag, counts_tag) = if tiled {
            (
                required(tags::TILE_WIDTH, "TileWidth")? as u32,
                required(tags::TILE_LENGTH, "TileLength")? as u32,
                tags::TILE_OFFSETS,
                tags::TILE_BYTE_COUNTS,
            )
        } else {
            let rows = scalar(tags::ROWS_PER_STRIP).unwrap_or(height as u64).min(height as u64);
            (width, rows as u32, tags::STRIP_OFFSETS, tags::STRIP_BYTE_COUNTS)
        };
        if block_width == 0 || block_height == 0 {
            return Err(CogError::InvalidStructure("zero block size".to_string()));
        }

        let block_offsets = get(offsets_tag)
            .and_then(TagValue::as_u64s)
            .ok_or(CogError::MissingTag("block offsets"))?;
        let block_byte_counts = get(counts_tag)
            .and_then(TagValue::as_u64s)
            .ok_or(CogError::MissingTag("block byte counts"))?;
        if block_offsets.len() != block_byte_counts.len() {
            return Err(CogError::InvalidStructure(
                "block offsets and byte counts differ in length".to_string(),
            ));
        }

        Ok(Self {
            width,
            height,
            bits_per_sample: scalar(tags::BITS_PER_SAMPLE).unwrap_or(1) as u16,
            sample_format: scalar(tags::SAMPLE_FORMAT).unwrap_or(1) as u16,
            samples_per_pixel: scalar(tags::SAMPLES_PER_PIXEL).unwrap_or(1) as u16,
            planar_config: scalar(tags::PLANAR_CONFIG).unwrap_or(1) as u16,
            compression: scalar(tags::COMPRESSION).unwrap_or(1) as u16,
            predictor: scalar(tags::PREDICTOR).unwrap_or(1) as u16,
            tiled,
            block_width,
            block_height,
            block_offsets,
            block_byte_counts,
            pixel_scale: get(tags::MODEL_PIXEL_SCALE).and_then(TagValue::as_f64s),
            tiepoint: get(tags::MODEL_TIEPOINT).and_then(TagValue::as_f64s),
            transformation: get(tags::MODEL_TRANSFORMATION).and_then(TagValue::as_f64s),
            geo_keys: get(tags::GEO_KEY_DIRECTORY).and_then(TagValue::as_u64s),
            gdal_nodata: get(tags::GDAL_NODATA)
                .and_then(TagValue::as_ascii)
                .map(|s| s.trim().to_string()),
        })
    }

    pub fn blocks_across(&self) -> u32 {
        self.width.div_ceil(self.block_width)
    }

    pub fn blocks_down(&self) -> u32 {
        self.height.div_ceil(self.block_height)
    }

    /// Samples stored per pixel inside one block.
    pub fn samples_per_block_pixel(&self) -> usize {
        if self.planar_config == 2 {
            1
        } else {
            self.samples_per_pixel.max(1) as usize
        }
    }

    /// Rows actually stored in block row `block_row`. Strips at the bottom
    /// edge are short; tiles are always full size.
    pub fn rows_in_block(&self, block_row: u32) -> u32 {
        if self.tiled {
            self.block_height
        } else {
            self.block_height.min(self.height - block_row * self.block_height)
        }
    }

    /// The GDAL nodata value, if present and numeric.
    pub fn nodata(&self) -> Option<f64> {
        self.gdal_nodata.as_deref().and_then(|s| s.parse::<f64>().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemorySource, RangeSource};

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header(b"II\x2a\x00\x08\x00\x00\x00").unwrap(),
            (ByteOrder::LittleEndian, 8)
        );
        assert_eq!(
            parse_header(b"MM\x00\x2a\x00\x00\x00\x10").unwrap(),
            (ByteOrder::BigEndian, 16)
        );
        assert!(matches!(
            parse_header(b"II\x2b\x00\x08\x00\x00\x00"),
            Err(CogError::BigTiff)
        ));
        assert!(matches!(parse_header(b"\x89PNG\r\n\x1a\n"), Err(CogError::NotTiff(_))));
        assert!(parse_header(b"II").is_err());
    }

    #[test]
    fn test_decode_short_and_ascii() {
        let entry = RawEntry {
            tag: 258,
            field_type: 3,
            count: 2,
            value: [16, 0, 32, 0],
        };
        assert_eq!(
            TagValue::decode(ByteOrder::LittleEndian, &entry, &entry.value).unwrap(),
            TagValue::Unsigned(vec![16, 32])
        );

        let entry = RawEntry {
            tag: 42113,
            field_type: 2,
            count: 5,
            value: [0; 4],
        };
        assert_eq!(
            TagValue::decode(ByteOrder::LittleEndian, &entry, b"-999\0").unwrap(),
            TagValue::Ascii("-999".into())
        );
    }

    #[tokio::test]
    async fn test_prefetch_serves_prefix_without_reads() {
        let source = MemorySource::new(vec![7u8; 64]);
        let prefix = source.read_range(0, 32).await.unwrap();
        let data = Prefetched::new(&source, prefix);

        assert_eq!(data.bytes(4, 8).await.unwrap().len(), 8);
        assert_eq!(source.reads(), 1);
        assert_eq!(data.bytes(30, 10).await.unwrap().len(), 10);
        assert_eq!(source.reads(), 2);
        assert!(data.bytes(60, 10).await.is_err());
    }
}
