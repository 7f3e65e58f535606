//! Typed accessor for the self-describing framed messages of the V2 wire
//! variant.
//!
//! A framed message is a segment table (a leading `segment count - 1`
//! word, one 32-bit size in 8-byte words per segment, the whole preamble
//! padded to an 8-byte boundary) followed by the concatenated segment
//! payloads. Inside the segments live pointer-linked structs; the engine
//! only ever consumes them through the typed getters here, which decode a
//! message to a tagged union of header and data records.
//!
//! Single-segment messages (what the instruments emit) are fully
//! resolved. Inter-segment "far" pointers are reported as unimplemented.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

const WORD: usize = 8;

/// Round a byte count up to an 8-byte boundary.
pub fn pad8(len: usize) -> usize {
    (len + 7) & !7
}

fn bad(msg: &str) -> Error {
    Error::BadFormat(format!("framed message: {}", msg))
}

/// A decoded framed message.
#[derive(Debug)]
pub enum FileElement {
    Header(HeaderMsg),
    Data(DataMsg),
}

/// Header record: instrument identity, timing, and per-channel
/// descriptor strings.
#[derive(Debug)]
pub struct HeaderMsg {
    pub instrument_id: i8,
    pub instrument_version: i16,
    pub time_step: f64,
    pub start_time: i64,
    pub start_offset: f64,
    pub channels: Vec<ChannelMsg>,
    pub format_string: String,
    pub header_string: String,
}

#[derive(Debug)]
pub struct ChannelMsg {
    pub number: i8,
    pub calibration: f64,
    pub record_format: String,
    pub proc_format: String,
}

/// Data record: one run of payload bytes for one channel.
#[derive(Debug)]
pub struct DataMsg {
    pub channel: i8,
    pub data: Vec<u8>,
}

const TAG_HEADER: u16 = 0;
const TAG_DATA: u16 = 1;

impl FileElement {
    /// Decode one complete framed message. `buf` must hold exactly the
    /// message: segment table plus all segment payloads.
    pub fn decode(buf: &[u8]) -> Result<FileElement> {
        let segments = Segments::parse(buf)?;
        let root = segments.struct_at(Location { segment: 0, word: 0 })?;
        let which = root.data_u16(0);
        match which {
            TAG_HEADER => Ok(FileElement::Header(read_header(&segments, &root)?)),
            TAG_DATA => Ok(FileElement::Data(read_data(&segments, &root)?)),
            other => Err(bad(&format!("unknown union tag {}", other))),
        }
    }
}

fn read_header(segments: &Segments, element: &StructReader) -> Result<HeaderMsg> {
    let header = segments.struct_at(element.pointer(0)?)?;
    let mut channels = Vec::new();
    for channel in segments.struct_list_at(header.pointer(0)?)? {
        channels.push(ChannelMsg {
            number: channel.data_u8(0) as i8,
            calibration: f64::from_bits(channel.data_u64(8)),
            record_format: segments.text_at(channel.pointer(0)?)?,
            proc_format: segments.text_at(channel.pointer(1)?)?,
        });
    }
    Ok(HeaderMsg {
        instrument_id: header.data_u8(0) as i8,
        instrument_version: header.data_u16(2) as i16,
        time_step: f64::from_bits(header.data_u64(8)),
        start_time: header.data_u64(16) as i64,
        start_offset: f64::from_bits(header.data_u64(24)),
        channels,
        format_string: segments.text_at(header.pointer(1)?)?,
        header_string: segments.text_at(header.pointer(2)?)?,
    })
}

fn read_data(segments: &Segments, element: &StructReader) -> Result<DataMsg> {
    let data = segments.struct_at(element.pointer(0)?)?;
    Ok(DataMsg {
        channel: data.data_u8(0) as i8,
        data: segments.bytes_at(data.pointer(0)?)?,
    })
}

// Pointer plumbing

/// A word position inside one segment. `NULL_SEGMENT` marks a synthetic
/// location that always reads as a null pointer word.
#[derive(Debug, Clone, Copy)]
struct Location {
    segment: usize,
    word: usize,
}

const NULL_SEGMENT: usize = usize::MAX;

/// The segment payloads of one message.
struct Segments<'a> {
    segments: Vec<&'a [u8]>,
}

impl<'a> Segments<'a> {
    fn parse(buf: &'a [u8]) -> Result<Segments<'a>> {
        if buf.len() < 4 {
            return Err(bad("truncated segment table"));
        }
        let count = LittleEndian::read_u32(&buf[..4]) as usize + 1;
        let preamble = pad8(4 + count * 4);
        if buf.len() < preamble {
            return Err(bad("truncated segment table"));
        }
        let mut segments = Vec::with_capacity(count);
        let mut at = preamble;
        for i in 0..count {
            let words = LittleEndian::read_u32(&buf[4 + i * 4..8 + i * 4]) as usize;
            let len = words * WORD;
            if at + len > buf.len() {
                return Err(bad("segment extends past message"));
            }
            segments.push(&buf[at..at + len]);
            at += len;
        }
        Ok(Segments { segments })
    }

    fn word(&self, loc: Location) -> Result<u64> {
        if loc.segment == NULL_SEGMENT {
            return Ok(0);
        }
        let segment = self
            .segments
            .get(loc.segment)
            .ok_or_else(|| bad("segment index out of range"))?;
        let at = loc.word * WORD;
        if at + WORD > segment.len() {
            return Err(bad("pointer outside its segment"));
        }
        Ok(LittleEndian::read_u64(&segment[at..at + WORD]))
    }

    /// Resolve the pointer stored at `loc` as a struct.
    fn struct_at(&self, loc: Location) -> Result<StructReader<'a>> {
        let word = self.word(loc)?;
        if word == 0 {
            // Null pointer: a struct of default values
            return Ok(StructReader {
                data: &[],
                pointers: loc,
                pointer_count: 0,
            });
        }
        match word & 3 {
            0 => {}
            2 => return Err(Error::Unimplemented("inter-segment far pointer".into())),
            _ => return Err(bad("expected a struct pointer")),
        }
        let offset = (word as u32 as i32) >> 2;
        let data_words = (word >> 32) as u16 as usize;
        let pointer_words = (word >> 48) as u16 as usize;
        let target = checked_target(loc.word, offset)?;
        let segment = &self.segments[loc.segment];
        let data_start = target * WORD;
        let data_end = data_start + data_words * WORD;
        let end = data_end + pointer_words * WORD;
        if end > segment.len() {
            return Err(bad("struct extends past its segment"));
        }
        Ok(StructReader {
            data: &segment[data_start..data_end],
            pointers: Location {
                segment: loc.segment,
                word: target + data_words,
            },
            pointer_count: pointer_words,
        })
    }

    /// Resolve the pointer stored at `loc` as a list of bytes (data or
    /// text payloads).
    fn byte_list_at(&self, loc: Location) -> Result<&'a [u8]> {
        let word = self.word(loc)?;
        if word == 0 {
            return Ok(&[]);
        }
        match word & 3 {
            1 => {}
            2 => return Err(Error::Unimplemented("inter-segment far pointer".into())),
            _ => return Err(bad("expected a list pointer")),
        }
        let offset = (word as u32 as i32) >> 2;
        let element_size = (word >> 32) & 7;
        if element_size != 2 {
            return Err(bad("expected a byte list"));
        }
        let count = (word >> 35) as usize;
        let target = checked_target(loc.word, offset)?;
        let segment = &self.segments[loc.segment];
        let start = target * WORD;
        if start + count > segment.len() {
            return Err(bad("list extends past its segment"));
        }
        Ok(&segment[start..start + count])
    }

    /// NUL-terminated UTF-8 text.
    fn text_at(&self, loc: Location) -> Result<String> {
        let bytes = self.byte_list_at(loc)?;
        let trimmed = match bytes.last() {
            Some(0) => &bytes[..bytes.len() - 1],
            _ => bytes,
        };
        Ok(String::from_utf8(trimmed.to_vec())?)
    }

    /// Raw data payload.
    fn bytes_at(&self, loc: Location) -> Result<Vec<u8>> {
        Ok(self.byte_list_at(loc)?.to_vec())
    }

    /// Resolve the pointer stored at `loc` as a composite struct list.
    fn struct_list_at(&self, loc: Location) -> Result<Vec<StructReader<'a>>> {
        let word = self.word(loc)?;
        if word == 0 {
            return Ok(Vec::new());
        }
        match word & 3 {
            1 => {}
            2 => return Err(Error::Unimplemented("inter-segment far pointer".into())),
            _ => return Err(bad("expected a list pointer")),
        }
        let offset = (word as u32 as i32) >> 2;
        let element_size = (word >> 32) & 7;
        if element_size != 7 {
            return Err(bad("expected a composite struct list"));
        }
        let total_words = (word >> 35) as usize;
        let tag_at = checked_target(loc.word, offset)?;
        let segment = &self.segments[loc.segment];
        if (tag_at + 1 + total_words) * WORD > segment.len() {
            return Err(bad("list extends past its segment"));
        }
        // The first word is a tag carrying the element count and the
        // per-element section sizes
        let tag = self.word(Location {
            segment: loc.segment,
            word: tag_at,
        })?;
        let count = ((tag as u32) >> 2) as usize;
        let data_words = (tag >> 32) as u16 as usize;
        let pointer_words = (tag >> 48) as u16 as usize;
        let stride = data_words + pointer_words;
        if stride * count > total_words {
            return Err(bad("composite list overruns its word count"));
        }
        let mut elements = Vec::with_capacity(count);
        for i in 0..count {
            let element_at = tag_at + 1 + i * stride;
            let data_start = element_at * WORD;
            elements.push(StructReader {
                data: &segment[data_start..data_start + data_words * WORD],
                pointers: Location {
                    segment: loc.segment,
                    word: element_at + data_words,
                },
                pointer_count: pointer_words,
            });
        }
        Ok(elements)
    }
}

fn checked_target(word: usize, offset: i32) -> Result<usize> {
    let target = word as i64 + 1 + i64::from(offset);
    if target < 0 {
        return Err(bad("pointer target before its segment"));
    }
    Ok(target as usize)
}

/// Field access into one struct's data and pointer sections. Fields
/// beyond the encoded data section read as zero.
struct StructReader<'a> {
    data: &'a [u8],
    pointers: Location,
    pointer_count: usize,
}

impl StructReader<'_> {
    fn data_u8(&self, at: usize) -> u8 {
        if at < self.data.len() {
            self.data[at]
        } else {
            0
        }
    }

    fn data_u16(&self, at: usize) -> u16 {
        if at + 2 <= self.data.len() {
            LittleEndian::read_u16(&self.data[at..at + 2])
        } else {
            0
        }
    }

    fn data_u64(&self, at: usize) -> u64 {
        if at + 8 <= self.data.len() {
            LittleEndian::read_u64(&self.data[at..at + 8])
        } else {
            0
        }
    }

    fn pointer(&self, index: usize) -> Result<Location> {
        if index >= self.pointer_count {
            // Out-of-range pointers read as null
            return Ok(Location {
                segment: NULL_SEGMENT,
                word: 0,
            });
        }
        Ok(Location {
            segment: self.pointers.segment,
            word: self.pointers.word + index,
        })
    }
}
