//! Synthetic GeoTIFF writer for raster reader tests.
//!
//! Produces classic (non-Big) TIFFs laid out the way cloud-optimized files
//! are: header, IFD and tag values up front, then the pixel blocks. Enough
//! of the format is covered to exercise tiled and stripped layouts, the
//! common compressions and predictors, and GeoTIFF georeferencing.

use std::io::Write;

use flate2::write::ZlibEncoder;
use salzweg::encoder::TiffStyleEncoder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    U8,
    U16,
    I16,
    F32,
}

impl SampleKind {
    fn bytes(self) -> usize {
        match self {
            SampleKind::U8 => 1,
            SampleKind::U16 | SampleKind::I16 => 2,
            SampleKind::F32 => 4,
        }
    }

    fn sample_format(self) -> u16 {
        match self {
            SampleKind::U8 | SampleKind::U16 => 1,
            SampleKind::I16 => 2,
            SampleKind::F32 => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TiffCompression {
    None,
    Lzw,
    Deflate,
}

impl TiffCompression {
    fn code(self) -> u16 {
        match self {
            TiffCompression::None => 1,
            TiffCompression::Lzw => 5,
            TiffCompression::Deflate => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Tiled { tile_width: u32, tile_height: u32 },
    Stripped { rows_per_strip: u32 },
}

/// Upper-left origin and pixel size in CRS units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoRef {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
    pub epsg: u16,
    /// Write a ModelTransformation matrix instead of scale + tiepoint
    pub use_transformation: bool,
}

#[derive(Debug, Clone)]
pub struct GeoTiffBuilder {
    width: u32,
    height: u32,
    values: Vec<f64>,
    kind: SampleKind,
    compression: TiffCompression,
    predictor: u16,
    layout: Layout,
    big_endian: bool,
    geo: Option<GeoRef>,
    nodata: Option<String>,
}

impl GeoTiffBuilder {
    /// `values` are row-major, `width * height` long.
    pub fn new(width: u32, height: u32, values: Vec<f64>) -> Self {
        assert_eq!(values.len(), (width * height) as usize, "value count must match dimensions");
        Self {
            width,
            height,
            values,
            kind: SampleKind::F32,
            compression: TiffCompression::None,
            predictor: 1,
            layout: Layout::Tiled {
                tile_width: 16,
                tile_height: 16,
            },
            big_endian: false,
            geo: None,
            nodata: None,
        }
    }

    pub fn sample(mut self, kind: SampleKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn compression(mut self, compression: TiffCompression) -> Self {
        self.compression = compression;
        self
    }

    /// 1 = none, 2 = horizontal differencing, 3 = floating point.
    pub fn predictor(mut self, predictor: u16) -> Self {
        self.predictor = predictor;
        self
    }

    pub fn tiled(mut self, tile_width: u32, tile_height: u32) -> Self {
        self.layout = Layout::Tiled {
            tile_width,
            tile_height,
        };
        self
    }

    pub fn stripped(mut self, rows_per_strip: u32) -> Self {
        self.layout = Layout::Stripped { rows_per_strip };
        self
    }

    pub fn big_endian(mut self) -> Self {
        self.big_endian = true;
        self
    }

    /// EPSG:4326 raster with its upper-left corner at `(west, north)`.
    pub fn geographic(mut self, west: f64, north: f64, pixel_deg: f64) -> Self {
        self.geo = Some(GeoRef {
            origin_x: west,
            origin_y: north,
            pixel_width: pixel_deg,
            pixel_height: pixel_deg,
            epsg: 4326,
            use_transformation: false,
        });
        self
    }

    pub fn georef(mut self, geo: GeoRef) -> Self {
        self.geo = Some(geo);
        self
    }

    pub fn nodata(mut self, value: f64) -> Self {
        self.nodata = Some(format!("{}", value));
        self
    }

    /// Lon/lat bounds of a geographic raster as `(west, south, east, north)`.
    pub fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        self.geo.map(|g| {
            (
                g.origin_x,
                g.origin_y - g.pixel_height * self.height as f64,
                g.origin_x + g.pixel_width * self.width as f64,
                g.origin_y,
            )
        })
    }

    pub fn build(&self) -> Vec<u8> {
        let blocks = self.encode_blocks();
        let w = Writer {
            big_endian: self.big_endian,
        };

        let mut tags: Vec<Tag> = vec![
            Tag::long(256, &[self.width]),
            Tag::long(257, &[self.height]),
            Tag::short(258, &[(self.kind.bytes() * 8) as u16]),
            Tag::short(259, &[self.compression.code()]),
            Tag::short(262, &[1]),
            Tag::short(277, &[1]),
            Tag::short(284, &[1]),
            Tag::short(339, &[self.kind.sample_format()]),
        ];
        if self.predictor != 1 {
            tags.push(Tag::short(317, &[self.predictor]));
        }

        let placeholder = vec![0u32; blocks.len()];
        let counts: Vec<u32> = blocks.iter().map(|b| b.len() as u32).collect();
        let (offsets_tag, counts_tag) = match self.layout {
            Layout::Tiled {
                tile_width,
                tile_height,
            } => {
                tags.push(Tag::long(322, &[tile_width]));
                tags.push(Tag::long(323, &[tile_height]));
                (324, 325)
            }
            Layout::Stripped { rows_per_strip } => {
                tags.push(Tag::long(278, &[rows_per_strip]));
                (273, 279)
            }
        };
        tags.push(Tag::long(offsets_tag, &placeholder));
        tags.push(Tag::long(counts_tag, &counts));

        if let Some(g) = self.geo {
            if g.use_transformation {
                let m = [
                    g.pixel_width, 0.0, 0.0, g.origin_x,
                    0.0, -g.pixel_height, 0.0, g.origin_y,
                    0.0, 0.0, 0.0, 0.0,
                    0.0, 0.0, 0.0, 1.0,
                ];
                tags.push(Tag::double(34264, &m));
            } else {
                tags.push(Tag::double(33550, &[g.pixel_width, g.pixel_height, 0.0]));
                tags.push(Tag::double(33922, &[0.0, 0.0, 0.0, g.origin_x, g.origin_y, 0.0]));
            }
            let (model, crs_key) = if g.epsg == 4326 { (2, 2048) } else { (1, 3072) };
            tags.push(Tag::short(
                34735,
                &[1, 1, 0, 3, 1024, 0, 1, model, 1025, 0, 1, 1, crs_key, 0, 1, g.epsg],
            ));
        }
        if let Some(nodata) = &self.nodata {
            let mut ascii = nodata.clone().into_bytes();
            ascii.push(0);
            tags.push(Tag::ascii(42113, ascii));
        }
        tags.sort_by_key(|t| t.id);

        // header | IFD | out-of-line values | blocks
        let ifd_offset = 8u32;
        let ifd_len = 2 + 12 * tags.len() as u32 + 4;
        let mut cursor = ifd_offset + ifd_len;
        let mut value_offsets = Vec::with_capacity(tags.len());
        for tag in &tags {
            if tag.payload_len(&w) > 4 {
                value_offsets.push(Some(cursor));
                cursor += tag.payload_len(&w) as u32;
                cursor += cursor % 2;
            } else {
                value_offsets.push(None);
            }
        }
        let mut block_offsets = Vec::with_capacity(blocks.len());
        for block in &blocks {
            block_offsets.push(cursor);
            cursor += block.len() as u32;
        }
        if let Some(tag) = tags.iter_mut().find(|t| t.id == offsets_tag) {
            *tag = Tag::long(offsets_tag, &block_offsets);
        }

        let mut out = Vec::with_capacity(cursor as usize);
        out.extend_from_slice(if self.big_endian { b"MM" } else { b"II" });
        out.extend(w.u16(42));
        out.extend(w.u32(ifd_offset));

        out.extend(w.u16(tags.len() as u16));
        for (tag, offset) in tags.iter().zip(&value_offsets) {
            out.extend(w.u16(tag.id));
            out.extend(w.u16(tag.field_type));
            out.extend(w.u32(tag.count()));
            match offset {
                Some(off) => out.extend(w.u32(*off)),
                None => {
                    let mut inline = tag.payload(&w);
                    inline.resize(4, 0);
                    out.extend(inline);
                }
            }
        }
        out.extend(w.u32(0));

        for (tag, offset) in tags.iter().zip(&value_offsets) {
            if offset.is_some() {
                out.extend(tag.payload(&w));
                if out.len() % 2 == 1 {
                    out.push(0);
                }
            }
        }
        for block in &blocks {
            out.extend_from_slice(block);
        }
        out
    }

    fn block_geometry(&self) -> (u32, u32, u32, u32) {
        match self.layout {
            Layout::Tiled {
                tile_width,
                tile_height,
            } => (
                tile_width,
                tile_height,
                self.width.div_ceil(tile_width),
                self.height.div_ceil(tile_height),
            ),
            Layout::Stripped { rows_per_strip } => {
                (self.width, rows_per_strip, 1, self.height.div_ceil(rows_per_strip))
            }
        }
    }

    fn encode_blocks(&self) -> Vec<Vec<u8>> {
        let (bw, bh, across, down) = self.block_geometry();
        let stripped = matches!(self.layout, Layout::Stripped { .. });
        let mut blocks = Vec::new();

        for by in 0..down {
            for bx in 0..across {
                // Strips are truncated at the bottom edge, tiles are padded.
                let rows = if stripped { bh.min(self.height - by * bh) } else { bh };
                let mut raw = Vec::with_capacity((bw * rows) as usize * self.kind.bytes());
                for r in 0..rows {
                    let y = by * bh + r;
                    let row: Vec<f64> = (0..bw)
                        .map(|c| {
                            let x = bx * bw + c;
                            if x < self.width && y < self.height {
                                self.values[(y * self.width + x) as usize]
                            } else {
                                0.0
                            }
                        })
                        .collect();
                    raw.extend(self.encode_row(&row));
                }
                blocks.push(self.compress(&raw));
            }
        }
        blocks
    }

    fn encode_row(&self, row: &[f64]) -> Vec<u8> {
        let w = Writer {
            big_endian: self.big_endian,
        };
        match (self.kind, self.predictor) {
            (SampleKind::F32, 3) => {
                let n = row.len();
                let mut planes = vec![0u8; n * 4];
                for (i, v) in row.iter().enumerate() {
                    for (b, byte) in (*v as f32).to_be_bytes().iter().enumerate() {
                        planes[b * n + i] = *byte;
                    }
                }
                for j in (1..planes.len()).rev() {
                    planes[j] = planes[j].wrapping_sub(planes[j - 1]);
                }
                planes
            }
            (SampleKind::F32, _) => row.iter().flat_map(|v| w.f32(*v as f32)).collect(),
            (SampleKind::U8, p) => {
                let s: Vec<u8> = row.iter().map(|v| *v as u8).collect();
                if p == 2 {
                    differenced(&s, |a, b| a.wrapping_sub(b))
                } else {
                    s
                }
            }
            (SampleKind::U16, p) => {
                let mut s: Vec<u16> = row.iter().map(|v| *v as u16).collect();
                if p == 2 {
                    s = differenced(&s, |a, b| a.wrapping_sub(b));
                }
                s.into_iter().flat_map(|v| w.u16(v)).collect()
            }
            (SampleKind::I16, p) => {
                let mut s: Vec<i16> = row.iter().map(|v| *v as i16).collect();
                if p == 2 {
                    s = differenced(&s, |a, b| a.wrapping_sub(b));
                }
                s.into_iter().flat_map(|v| w.u16(v as u16)).collect()
            }
        }
    }

    fn compress(&self, raw: &[u8]) -> Vec<u8> {
        match self.compression {
            TiffCompression::None => raw.to_vec(),
            TiffCompression::Deflate => {
                let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(raw).unwrap();
                encoder.finish().unwrap()
            }
            TiffCompression::Lzw => TiffStyleEncoder::encode_to_vec(raw).unwrap(),
        }
    }
}

fn differenced<T: Copy>(samples: &[T], sub: impl Fn(T, T) -> T) -> Vec<T> {
    let mut out = samples.to_vec();
    for i in (1..samples.len()).rev() {
        out[i] = sub(samples[i], samples[i - 1]);
    }
    out
}

struct Writer {
    big_endian: bool,
}

impl Writer {
    fn u16(&self, v: u16) -> Vec<u8> {
        if self.big_endian {
            v.to_be_bytes().to_vec()
        } else {
            v.to_le_bytes().to_vec()
        }
    }

    fn u32(&self, v: u32) -> Vec<u8> {
        if self.big_endian {
            v.to_be_bytes().to_vec()
        } else {
            v.to_le_bytes().to_vec()
        }
    }

    fn f32(&self, v: f32) -> Vec<u8> {
        self.u32(v.to_bits())
    }

    fn f64(&self, v: f64) -> Vec<u8> {
        let bits = v.to_bits();
        if self.big_endian {
            bits.to_be_bytes().to_vec()
        } else {
            bits.to_le_bytes().to_vec()
        }
    }
}

enum TagValues {
    Short(Vec<u16>),
    Long(Vec<u32>),
    Double(Vec<f64>),
    Ascii(Vec<u8>),
}

struct Tag {
    id: u16,
    field_type: u16,
    values: TagValues,
}

impl Tag {
    fn short(id: u16, v: &[u16]) -> Self {
        Self {
            id,
            field_type: 3,
            values: TagValues::Short(v.to_vec()),
        }
    }

    fn long(id: u16, v: &[u32]) -> Self {
        Self {
            id,
            field_type: 4,
            values: TagValues::Long(v.to_vec()),
        }
    }

    fn double(id: u16, v: &[f64]) -> Self {
        Self {
            id,
            field_type: 12,
            values: TagValues::Double(v.to_vec()),
        }
    }

    fn ascii(id: u16, v: Vec<u8>) -> Self {
        Self {
            id,
            field_type: 2,
            values: TagValues::Ascii(v),
        }
    }

    fn count(&self) -> u32 {
        (match &self.values {
            TagValues::Short(v) => v.len(),
            TagValues::Long(v) => v.len(),
            TagValues::Double(v) => v.len(),
            TagValues::Ascii(v) => v.len(),
        }) as u32
    }

    fn payload(&self, w: &Writer) -> Vec<u8> {
        match &self.values {
            TagValues::Short(v) => v.iter().flat_map(|x| w.u16(*x)).collect(),
            TagValues::Long(v) => v.iter().flat_map(|x| w.u32(*x)).collect(),
            TagValues::Double(v) => v.iter().flat_map(|x| w.f64(*x)).collect(),
            TagValues::Ascii(v) => v.clone(),
        }
    }

    fn payload_len(&self, w: &Writer) -> usize {
        self.payload(w).len()
    }
}
