//! Minimal baseline TIFF directory walker.
//!
//! Supports what pixel conversion needs and nothing more: classic
//! (non-Big) TIFF in either byte order, uncompressed strips, one sample per
//! pixel, 8/16/32-bit integer or 32-bit float samples. The directory index
//! selects one image of a multi-image document.

use crate::error::{PixError, Result};
use crate::types::PixelHeader;
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

const TAG_WIDTH: u16 = 256;
const TAG_HEIGHT: u16 = 257;
const TAG_BITS_PER_SAMPLE: u16 = 258;
const TAG_COMPRESSION: u16 = 259;
const TAG_STRIP_OFFSETS: u16 = 273;
const TAG_SAMPLES_PER_PIXEL: u16 = 277;
const TAG_ROWS_PER_STRIP: u16 = 278;
const TAG_STRIP_BYTE_COUNTS: u16 = 279;
const TAG_SAMPLE_FORMAT: u16 = 339;

const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;

const SAMPLE_FORMAT_UINT: u16 = 1;
const SAMPLE_FORMAT_INT: u16 = 2;
const SAMPLE_FORMAT_FLOAT: u16 = 3;

/// One strip of image data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffStrip {
    pub offset: u64,
    pub byte_count: u64,
}

/// One parsed image directory.
#[derive(Debug, Clone)]
pub struct TiffDirectory {
    pub big_endian: bool,
    pub width: u32,
    pub height: u32,
    pub bits_per_sample: u32,
    pub sample_format: u16,
    pub strips: Vec<TiffStrip>,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    field_type: u16,
    count: u32,
    raw: [u8; 4],
}

struct Parser {
    file: fs::File,
    big_endian: bool,
}

impl Parser {
    async fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file
            .read_exact(buf)
            .await
            .map_err(|_| PixError::Engine("truncated TIFF document".to_string()))?;
        Ok(())
    }

    fn u16_of(&self, bytes: [u8; 2]) -> u16 {
        if self.big_endian {
            u16::from_be_bytes(bytes)
        } else {
            u16::from_le_bytes(bytes)
        }
    }

    fn u32_of(&self, bytes: [u8; 4]) -> u32 {
        if self.big_endian {
            u32::from_be_bytes(bytes)
        } else {
            u32::from_le_bytes(bytes)
        }
    }

    /// Scalar value of an inline SHORT or LONG entry.
    fn scalar(&self, entry: &Entry) -> Result<u32> {
        match entry.field_type {
            TYPE_SHORT => Ok(self.u16_of([entry.raw[0], entry.raw[1]]) as u32),
            TYPE_LONG => Ok(self.u32_of(entry.raw)),
            other => Err(PixError::Engine(format!(
                "unsupported TIFF field type {}",
                other
            ))),
        }
    }

    /// Array of SHORT or LONG values, inline or out-of-line.
    async fn array(&mut self, entry: &Entry) -> Result<Vec<u32>> {
        let elem = match entry.field_type {
            TYPE_SHORT => 2usize,
            TYPE_LONG => 4usize,
            other => {
                return Err(PixError::Engine(format!(
                    "unsupported TIFF field type {}",
                    other
                )));
            }
        };
        let total = elem * entry.count as usize;
        let data = if total <= 4 {
            entry.raw[..total].to_vec()
        } else {
            let mut buf = vec![0u8; total];
            let offset = self.u32_of(entry.raw) as u64;
            self.read_at(offset, &mut buf).await?;
            buf
        };
        let mut out = Vec::with_capacity(entry.count as usize);
        for chunk in data.chunks_exact(elem) {
            out.push(match elem {
                2 => self.u16_of([chunk[0], chunk[1]]) as u32,
                _ => self.u32_of([chunk[0], chunk[1], chunk[2], chunk[3]]),
            });
        }
        Ok(out)
    }
}

impl TiffDirectory {
    /// Parse the directory at `dir_index` from a TIFF document.
    pub async fn read(path: &Path, dir_index: u32) -> Result<Self> {
        let file = fs::File::open(path)
            .await
            .map_err(|e| PixError::Engine(format!("cannot open TIFF source: {}", e)))?;
        let mut parser = Parser {
            file,
            big_endian: false,
        };

        let mut header = [0u8; 8];
        parser.read_at(0, &mut header).await?;
        parser.big_endian = match &header[0..2] {
            b"II" => false,
            b"MM" => true,
            _ => {
                return Err(PixError::Engine(
                    "not a TIFF document (bad byte-order mark)".to_string(),
                ));
            }
        };
        if parser.u16_of([header[2], header[3]]) != 42 {
            return Err(PixError::Engine("not a TIFF document (bad magic)".to_string()));
        }

        // walk the directory chain to the requested index
        let mut ifd_offset = parser.u32_of([header[4], header[5], header[6], header[7]]) as u64;
        for _ in 0..dir_index {
            let mut count_buf = [0u8; 2];
            parser.read_at(ifd_offset, &mut count_buf).await?;
            let count = parser.u16_of(count_buf) as u64;
            let mut next_buf = [0u8; 4];
            parser.read_at(ifd_offset + 2 + count * 12, &mut next_buf).await?;
            ifd_offset = parser.u32_of(next_buf) as u64;
            if ifd_offset == 0 {
                return Err(PixError::Engine(format!(
                    "TIFF directory index {} is out of range",
                    dir_index
                )));
            }
        }

        let mut count_buf = [0u8; 2];
        parser.read_at(ifd_offset, &mut count_buf).await?;
        let count = parser.u16_of(count_buf) as usize;
        let mut entries_buf = vec![0u8; count * 12];
        parser.read_at(ifd_offset + 2, &mut entries_buf).await?;

        let mut entries: HashMap<u16, Entry> = HashMap::new();
        for raw in entries_buf.chunks_exact(12) {
            let tag = parser.u16_of([raw[0], raw[1]]);
            entries.insert(
                tag,
                Entry {
                    field_type: parser.u16_of([raw[2], raw[3]]),
                    count: parser.u32_of([raw[4], raw[5], raw[6], raw[7]]),
                    raw: [raw[8], raw[9], raw[10], raw[11]],
                },
            );
        }

        let required = |tag: u16| -> Result<Entry> {
            entries
                .get(&tag)
                .copied()
                .ok_or_else(|| PixError::Engine(format!("TIFF tag {} missing", tag)))
        };

        let width = parser.scalar(&required(TAG_WIDTH)?)?;
        let height = parser.scalar(&required(TAG_HEIGHT)?)?;

        let compression = match entries.get(&TAG_COMPRESSION) {
            Some(entry) => parser.scalar(entry)?,
            None => 1,
        };
        if compression != 1 {
            return Err(PixError::Engine(format!(
                "compressed TIFF (scheme {}) is not supported",
                compression
            )));
        }

        let samples_per_pixel = match entries.get(&TAG_SAMPLES_PER_PIXEL) {
            Some(entry) => parser.scalar(entry)?,
            None => 1,
        };
        if samples_per_pixel != 1 {
            return Err(PixError::Engine(
                "multi-sample TIFF pixels are not supported".to_string(),
            ));
        }

        let bits_per_sample = match entries.get(&TAG_BITS_PER_SAMPLE).copied() {
            Some(entry) => parser.array(&entry).await?.first().copied().unwrap_or(1),
            None => 1,
        };
        let sample_format = match entries.get(&TAG_SAMPLE_FORMAT).copied() {
            Some(entry) => parser
                .array(&entry)
                .await?
                .first()
                .copied()
                .unwrap_or(SAMPLE_FORMAT_UINT as u32) as u16,
            None => SAMPLE_FORMAT_UINT,
        };

        let rows_per_strip = match entries.get(&TAG_ROWS_PER_STRIP) {
            Some(entry) => parser.scalar(entry)?.max(1),
            None => height.max(1),
        };
        let expected_strips = (height.max(1) + rows_per_strip - 1) / rows_per_strip;

        let offsets = parser.array(&required(TAG_STRIP_OFFSETS)?).await?;
        let byte_counts = parser.array(&required(TAG_STRIP_BYTE_COUNTS)?).await?;
        if offsets.len() != byte_counts.len()
            || offsets.is_empty()
            || offsets.len() as u32 != expected_strips
        {
            return Err(PixError::Engine("malformed TIFF strip layout".to_string()));
        }
        let strips = offsets
            .iter()
            .zip(byte_counts.iter())
            .map(|(&offset, &byte_count)| TiffStrip {
                offset: offset as u64,
                byte_count: byte_count as u64,
            })
            .collect();

        Ok(Self {
            big_endian: parser.big_endian,
            width,
            height,
            bits_per_sample,
            sample_format,
            strips,
        })
    }

    /// Total strip payload in bytes.
    pub fn payload_bytes(&self) -> u64 {
        self.strips.iter().map(|s| s.byte_count).sum()
    }

    /// Verify this image matches the destination plane's geometry and
    /// sample type.
    pub fn check_compatible(&self, header: &PixelHeader) -> Result<()> {
        let shape = header.shape;
        if self.width != shape.dx || self.height != shape.dy {
            return Err(PixError::Engine(format!(
                "TIFF image is {}x{} but the plane is {}x{}",
                self.width, self.height, shape.dx, shape.dy
            )));
        }
        if self.bits_per_sample != header.bytes_per_pixel as u32 * 8 {
            return Err(PixError::Engine(format!(
                "TIFF has {} bits per sample but the pixel set stores {}",
                self.bits_per_sample,
                header.bytes_per_pixel as u32 * 8
            )));
        }
        let expected = if header.float {
            SAMPLE_FORMAT_FLOAT
        } else if header.signed {
            SAMPLE_FORMAT_INT
        } else {
            SAMPLE_FORMAT_UINT
        };
        if self.sample_format != expected {
            return Err(PixError::Engine(format!(
                "TIFF sample format {} does not match the pixel type",
                self.sample_format
            )));
        }
        Ok(())
    }
}
