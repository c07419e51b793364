//! Block decompression, predictor reversal and sample conversion.

use std::io::Read;

use flate2::read::ZlibDecoder;
use salzweg::decoder::TiffStyleDecoder;

use crate::tiff::{ByteOrder, ImageDirectory};
use crate::{CogError, CogResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Lzw,
    Deflate,
}

impl Compression {
    pub fn from_code(code: u16) -> CogResult<Self> {
        match code {
            1 => Ok(Compression::None),
            5 => Ok(Compression::Lzw),
            8 | 32946 => Ok(Compression::Deflate),
            other => Err(CogError::unsupported("compression", other)),
        }
    }

    pub fn decompress(self, data: &[u8]) -> CogResult<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Lzw => {
                TiffStyleDecoder::decode_to_vec(data).map_err(|e| CogError::Decompress(format!("LZW: {:?}", e)))
            }
            Compression::Deflate => {
                let mut out = Vec::new();
                ZlibDecoder::new(data)
                    .read_to_end(&mut out)
                    .map_err(|e| CogError::Decompress(format!("deflate: {}", e)))?;
                Ok(out)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    U8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl SampleType {
    pub fn from_tags(bits: u16, format: u16) -> CogResult<Self> {
        match (format, bits) {
            (1, 8) => Ok(SampleType::U8),
            (1, 16) => Ok(SampleType::U16),
            (2, 16) => Ok(SampleType::I16),
            (1, 32) => Ok(SampleType::U32),
            (2, 32) => Ok(SampleType::I32),
            (3, 32) => Ok(SampleType::F32),
            (3, 64) => Ok(SampleType::F64),
            _ => Err(CogError::unsupported("sample type", format!("format {} / {} bits", format, bits))),
        }
    }

    pub fn size(self) -> usize {
        match self {
            SampleType::U8 => 1,
            SampleType::U16 | SampleType::I16 => 2,
            SampleType::U32 | SampleType::I32 | SampleType::F32 => 4,
            SampleType::F64 => 8,
        }
    }

    fn is_float(self) -> bool {
        matches!(self, SampleType::F32 | SampleType::F64)
    }

    fn read(self, order: ByteOrder, b: &[u8]) -> f64 {
        match self {
            SampleType::U8 => b[0] as f64,
            SampleType::U16 => order.u16(b) as f64,
            SampleType::I16 => order.u16(b) as i16 as f64,
            SampleType::U32 => order.u32(b) as f64,
            SampleType::I32 => order.u32(b) as i32 as f64,
            SampleType::F32 => f32::from_bits(order.u32(b)) as f64,
            SampleType::F64 => f64::from_bits(order.u64(b)),
        }
    }
}

/// Everything needed to turn a stored block into samples.
#[derive(Debug, Clone, Copy)]
pub struct BlockDecoder {
    pub order: ByteOrder,
    pub compression: Compression,
    pub predictor: u16,
    pub sample_type: SampleType,
    /// Interleaved samples per pixel; only the first is kept
    pub samples_per_pixel: usize,
    pub block_width: usize,
}

impl BlockDecoder {
    pub fn new(order: ByteOrder, dir: &ImageDirectory) -> CogResult<Self> {
        let sample_type = SampleType::from_tags(dir.bits_per_sample, dir.sample_format)?;
        let predictor = dir.predictor;
        match predictor {
            1 | 2 => {}
            3 if sample_type.is_float() => {}
            other => return Err(CogError::unsupported("predictor", other)),
        }
        if predictor == 2 && sample_type.is_float() {
            return Err(CogError::unsupported("predictor", "2 on floating point samples"));
        }
        Ok(Self {
            order,
            compression: Compression::from_code(dir.compression)?,
            predictor,
            sample_type,
            samples_per_pixel: dir.samples_per_block_pixel(),
            block_width: dir.block_width as usize,
        })
    }

    /// Decode `rows` rows of a stored block into first-band samples.
    pub fn decode(&self, stored: &[u8], rows: usize) -> CogResult<Vec<f64>> {
        let mut raw = self.compression.decompress(stored)?;
        let size = self.sample_type.size();
        let row_samples = self.block_width * self.samples_per_pixel;
        let row_bytes = row_samples * size;
        let need = row_bytes * rows;
        if raw.len() < need {
            return Err(CogError::Decompress(format!(
                "block has {} bytes, expected {}",
                raw.len(),
                need
            )));
        }
        raw.truncate(need);

        let order = match self.predictor {
            2 => {
                for row in raw.chunks_exact_mut(row_bytes) {
                    undo_horizontal(row, self.order, self.sample_type, self.samples_per_pixel);
                }
                self.order
            }
            3 => {
                for row in raw.chunks_exact_mut(row_bytes) {
                    undo_floating_point(row, size);
                }
                ByteOrder::BigEndian
            }
            _ => self.order,
        };

        let stride = self.samples_per_pixel * size;
        Ok(raw
            .chunks_exact(stride)
            .map(|px| self.sample_type.read(order, &px[..size]))
            .collect())
    }
}

/// Reverse horizontal differencing in place. Addition wraps in the sample's
/// integer width.
fn undo_horizontal(row: &mut [u8], order: ByteOrder, sample_type: SampleType, spp: usize) {
    match sample_type.size() {
        1 => {
            for i in spp..row.len() {
                row[i] = row[i].wrapping_add(row[i - spp]);
            }
        }
        2 => {
            let n = row.len() / 2;
            for i in spp..n {
                let prev = order.u16(&row[(i - spp) * 2..]);
                let cur = order.u16(&row[i * 2..]);
                let sum = cur.wrapping_add(prev);
                let bytes = match order {
                    ByteOrder::LittleEndian => sum.to_le_bytes(),
                    ByteOrder::BigEndian => sum.to_be_bytes(),
                };
                row[i * 2..i * 2 + 2].copy_from_slice(&bytes);
            }
        }
        _ => {
            let n = row.len() / 4;
            for i in spp..n {
                let prev = order.u32(&row[(i - spp) * 4..]);
                let cur = order.u32(&row[i * 4..]);
                let sum = cur.wrapping_add(prev);
                let bytes = match order {
                    ByteOrder::LittleEndian => sum.to_le_bytes(),
                    ByteOrder::BigEndian => sum.to_be_bytes(),
                };
                row[i * 4..i * 4 + 4].copy_from_slice(&bytes);
            }
        }
    }
}

/// Reverse the floating point predictor: byte-wise differencing over the
/// whole row, then byte planes (most significant first) back into samples.
/// The result is big-endian regardless of file byte order.
fn undo_floating_point(row: &mut [u8], size: usize) {
    for i in 1..row.len() {
        row[i] = row[i].wrapping_add(row[i - 1]);
    }
    let n = row.len() / size;
    let planes = row.to_vec();
    for i in 0..n {
        for b in 0..size {
            row[i * size + b] = planes[b * n + i];
        }
    }
}
