//! The incremental reader state machine.
//!
//! `LogReader` consumes an arbitrarily fragmented LI log byte stream fed
//! in through [`LogReader::put`] and answers pull-style queries. Nothing
//! blocks: a query that cannot be satisfied yet fails with
//! [`Error::NeedMoreData`] and [`LogReader::suggested_put`] reports how
//! many more bytes the engine wants before it can make progress.
//!
//! # Examples
//!
//! ```no_run
//! use lilog_parser::LogReader;
//!
//! let mut reader = LogReader::new();
//! let stream_bytes = std::fs::read("capture.li")?;
//! reader.put(&stream_bytes);
//! let mut row = vec![0.0; 4];
//! match reader.next_row(&mut row) {
//!     Ok(()) => println!("decoded {:?}", row),
//!     Err(e) if e.is_need_more_data() => { /* feed more bytes */ }
//!     Err(e) => return Err(e.into()),
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use log::debug;

use crate::error::{Error, Result};
use crate::framing::{pad8, FileElement};
use crate::number::{Kind, Number};
use crate::parse::{self, FieldType, Operation, Record};
use crate::queue::{BitQueue, ByteQueue};

/// Leading two-byte tag of every LI log stream.
pub const MAGIC: [u8; 2] = *b"LI";

/// Version selector byte for the fixed-layout V1 wire variant; any other
/// value selects the framed V2 variant.
pub const VERSION_V1: u8 = b'1';

/// What stage of reading the stream we are in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for the magic tag and version selector
    Init,
    /// Waiting for the complete header
    Header,
    /// Demultiplexing body records
    Body,
    /// Terminal: the stream violated the format
    Bad,
}

/// Raw header fields as carried on the wire.
#[derive(Debug, Default)]
struct Header {
    instrument_id: i8,
    instrument_version: i16,
    time_step: f64,
    start_time: i64,
    start_offset: f64,
    channels: Vec<HeaderChannel>,
    format_string: String,
    header_string: String,
}

#[derive(Debug, Default, Clone)]
struct HeaderChannel {
    number: u8,
    calibration: f64,
    record_format: String,
    proc_format: String,
}

/// Per-channel decode context derived from the header.
struct ChannelState {
    number: u8,
    records: Vec<Record>,
    chains: Vec<Vec<Operation>>,
    record_bytes: usize,
    queue: ByteQueue,
}

/// Incremental decoder for LI log streams.
pub struct LogReader {
    state: State,
    version: u8,
    input: ByteQueue,
    suggested_put: u64,
    header: Header,
    channels: Vec<ChannelState>,
    row_bytes: usize,
}

impl Default for LogReader {
    fn default() -> Self {
        Self::new()
    }
}

impl LogReader {
    /// Create an empty reader. Three bytes of input are needed before it
    /// can classify the stream.
    pub fn new() -> Self {
        Self {
            state: State::Init,
            version: 0,
            input: ByteQueue::new(),
            suggested_put: 3,
            header: Header::default(),
            channels: Vec::new(),
            row_bytes: 0,
        }
    }

    /// Append raw stream bytes to the input buffer.
    pub fn put(&mut self, bytes: &[u8]) {
        self.input.put(bytes);
    }

    /// Bytes still needed before the engine can make further progress:
    /// the outstanding demand minus what is already buffered, floored at
    /// zero. Does not itself drive the state machine.
    pub fn suggested_put(&self) -> Result<u64> {
        if self.state == State::Bad {
            return Err(failed_error());
        }
        Ok(self.suggested_put.saturating_sub(self.input.len() as u64))
    }

    /// Bitmask of channels present in the stream; bit `i` set means
    /// channel `i + 1` carries data.
    pub fn channel_mask(&mut self) -> Result<u8> {
        self.require_body()?;
        let mut mask = 0u8;
        for channel in &self.header.channels {
            mask |= 1 << (channel.number - 1);
        }
        Ok(mask)
    }

    /// ID of the instrument that produced the stream.
    pub fn instrument_id(&mut self) -> Result<u64> {
        self.require_body()?;
        Ok(self.header.instrument_id as u64)
    }

    /// Version of the instrument that produced the stream.
    pub fn instrument_version(&mut self) -> Result<u64> {
        self.require_body()?;
        Ok(self.header.instrument_version as u64)
    }

    /// Sample time step in seconds.
    pub fn time_step(&mut self) -> Result<f64> {
        self.require_body()?;
        Ok(self.header.time_step)
    }

    /// Coarse start time in whole seconds.
    pub fn start_time(&mut self) -> Result<i64> {
        self.require_body()?;
        Ok(self.header.start_time)
    }

    /// Sample time offset of the first row.
    pub fn start_offset(&mut self) -> Result<f64> {
        self.require_body()?;
        Ok(self.header.start_offset)
    }

    /// Width of one decoded output row in bytes (a multiple of 8; one
    /// f64 per emitted field across all channels).
    pub fn row_bytes(&mut self) -> Result<u64> {
        self.require_body()?;
        Ok(self.row_bytes as u64)
    }

    /// Number of emitted fields for one channel, used by exporters to
    /// flatten per-channel subscripts into packed row offsets.
    pub fn field_count(&mut self, channel: u8) -> Result<u64> {
        self.require_body()?;
        self.channels
            .iter()
            .find(|c| c.number == channel)
            .map(|c| c.chains.len() as u64)
            .ok_or_else(|| Error::InvalidArgument(format!("no channel {}", channel)))
    }

    /// The stream's output-row format string.
    pub fn format_string(&mut self) -> Result<&str> {
        self.require_body()?;
        Ok(&self.header.format_string)
    }

    /// The stream's descriptive header/comment string.
    pub fn header_string(&mut self) -> Result<&str> {
        self.require_body()?;
        Ok(&self.header.header_string)
    }

    /// Decode the next output row into `dest`.
    ///
    /// Drains any buffered raw input into the per-channel queues first.
    /// The decode is all-or-nothing: if any channel holds less than one
    /// full record, no channel is consumed and the call fails with
    /// [`Error::NeedMoreData`]. `dest` must hold at least
    /// `row_bytes() / 8` values; the remainder is left untouched.
    pub fn next_row(&mut self, dest: &mut [f64]) -> Result<()> {
        self.require_body()?;
        match self.decode_row(dest) {
            Err(e) if !e.is_need_more_data() && !matches!(e, Error::SmallDestination) => {
                self.state = State::Bad;
                Err(e)
            }
            other => other,
        }
    }

    fn decode_row(&mut self, dest: &mut [f64]) -> Result<()> {
        if dest.len() * 8 < self.row_bytes {
            return Err(Error::SmallDestination);
        }
        for channel in &self.channels {
            if channel.queue.len() < channel.record_bytes {
                return Err(Error::NeedMoreData);
            }
        }
        let mut at = 0;
        for channel in &mut self.channels {
            let mut bits = BitQueue::new();
            bits.put(
                &channel.queue.as_slice()[..channel.record_bytes],
                channel.record_bytes * 8,
            );
            channel.queue.drop_front(channel.record_bytes)?;

            let mut chains = channel.chains.iter();
            for record in &channel.records {
                let mut raw = [0u8; 8];
                bits.get(&mut raw, record.width).map_err(|_| {
                    Error::Corrupt(format!(
                        "channel {} record layout overruns its record bytes",
                        channel.number
                    ))
                })?;
                let mut value = Number {
                    bits: u64::from_le_bytes(raw),
                    kind: kind_for(record.field_type),
                    width: record.width,
                };
                value.fix_sign();
                if let Some(literal) = record.literal {
                    if !value.numerically_equal(&literal)? {
                        return Err(Error::Corrupt(format!(
                            "channel {} marker field does not match its literal",
                            channel.number
                        )));
                    }
                } else {
                    let chain = chains.next().ok_or_else(|| {
                        Error::Corrupt(format!(
                            "channel {} has more emitted fields than operation chains",
                            channel.number
                        ))
                    })?;
                    dest[at] = parse::apply_chain(chain, value.to_f64()?);
                    at += 1;
                }
            }
        }
        debug_assert_eq!(at * 8, self.row_bytes);
        Ok(())
    }

    // State machine

    /// Drive the machine as far as the buffered input allows, then require
    /// that the header has been fully absorbed.
    fn require_body(&mut self) -> Result<()> {
        self.advance()?;
        if self.state != State::Body {
            return Err(Error::NeedMoreData);
        }
        Ok(())
    }

    fn advance(&mut self) -> Result<()> {
        if self.state == State::Bad {
            return Err(failed_error());
        }
        match self.step() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state = State::Bad;
                Err(e)
            }
        }
    }

    /// One pass over the state progression. Stalling for input is not an
    /// error; any `Err` is a structural failure that parks the reader in
    /// the terminal state.
    fn step(&mut self) -> Result<()> {
        if self.state == State::Init {
            self.read_preamble()?;
        }
        if self.state == State::Header {
            match self.version {
                VERSION_V1 => self.read_header_v1()?,
                _ => self.read_header_v2()?,
            }
        }
        if self.state == State::Body {
            match self.version {
                VERSION_V1 => self.demux_v1()?,
                _ => self.demux_v2()?,
            }
        }
        Ok(())
    }

    /// INIT -> HEADER: magic tag and version selector.
    fn read_preamble(&mut self) -> Result<()> {
        if self.input.len() < 3 {
            return Ok(());
        }
        let mut magic = [0u8; 2];
        self.input.get_into(&mut magic)?;
        if magic != MAGIC {
            // Leave the offending bytes visible to the caller
            self.input.unget(2)?;
            return Err(Error::BadFormat("bad magic tag".into()));
        }
        self.version = self.input.get_u8()?;
        self.suggested_put = match self.version {
            VERSION_V1 => 2,
            _ => 4,
        };
        self.state = State::Header;
        debug!("stream preamble ok, version {:?}", self.version as char);
        Ok(())
    }

    /// HEADER -> BODY, V1: a 2-byte length prefix followed by the fixed
    /// fields and four length-prefixed text blocks.
    fn read_header_v1(&mut self) -> Result<()> {
        let buffered = self.input.len();
        if buffered < 2 {
            return Ok(());
        }
        let declared = self.input.get_u16()? as usize;
        if buffered < 2 + declared {
            // Roll back and tell the caller exactly what is missing
            self.input.unget(2)?;
            self.suggested_put = (2 + declared) as u64;
            return Ok(());
        }

        // The whole header is buffered; any shortfall from here on means
        // the declared length lied
        let before = self.input.len();
        self.parse_header_v1_fields().map_err(|e| match e {
            Error::NeedMoreData => {
                Error::BadFormat("header shorter than its declared length".into())
            }
            other => other,
        })?;
        let consumed = before - self.input.len();
        if consumed > declared {
            return Err(Error::BadFormat(
                "header longer than its declared length".into(),
            ));
        }
        // Tolerate declared padding after the last text block
        self.input.drop_front(declared - consumed)?;

        self.state = State::Body;
        self.suggested_put = 3;
        self.derive_channels()?;
        Ok(())
    }

    fn parse_header_v1_fields(&mut self) -> Result<()> {
        let channel_select = self.input.get_u8()?;
        for i in 0..8 {
            if (channel_select >> i) & 1 == 1 {
                self.header.channels.push(HeaderChannel {
                    number: i + 1,
                    ..HeaderChannel::default()
                });
            }
        }
        self.header.instrument_id = self.input.get_u8()? as i8;
        self.header.instrument_version = self.input.get_i16()?;
        self.header.time_step = self.input.get_f64()?;
        self.header.start_time = self.input.get_i64()?;
        self.header.start_offset = 0.0;

        for i in 0..self.header.channels.len() {
            self.header.channels[i].calibration = self.input.get_f64()?;
        }
        // One record format string shared by every channel
        let record_format = self.read_block_string()?;
        for channel in &mut self.header.channels {
            channel.record_format = record_format.clone();
        }
        for i in 0..self.header.channels.len() {
            self.header.channels[i].proc_format = self.read_block_string()?;
        }
        self.header.format_string = self.read_block_string()?;
        self.header.header_string = self.read_block_string()?;
        Ok(())
    }

    /// A 2-byte length prefix followed by that many bytes of UTF-8.
    fn read_block_string(&mut self) -> Result<String> {
        let len = self.input.get_u16()? as usize;
        let bytes = self.input.get_vec(len)?;
        String::from_utf8(bytes)
            .map_err(|_| Error::BadFormat("descriptor string is not valid UTF-8".into()))
    }

    /// HEADER -> BODY, V2: one framed message carrying the header record.
    fn read_header_v2(&mut self) -> Result<()> {
        let total = match self.frame_total()? {
            Some(total) => total,
            None => return Ok(()),
        };
        let message = self.input.get_vec(total)?;
        let header = match FileElement::decode(&message)? {
            FileElement::Header(header) => header,
            FileElement::Data(_) => {
                return Err(Error::Corrupt(
                    "first framed message is not a header".into(),
                ))
            }
        };

        self.header.instrument_id = header.instrument_id;
        self.header.instrument_version = header.instrument_version;
        self.header.time_step = header.time_step;
        self.header.start_time = header.start_time;
        self.header.start_offset = header.start_offset;
        for channel in header.channels {
            self.header.channels.push(HeaderChannel {
                number: channel.number as u8,
                calibration: channel.calibration,
                record_format: channel.record_format,
                proc_format: channel.proc_format,
            });
        }
        self.header.format_string = header.format_string;
        self.header.header_string = header.header_string;

        self.state = State::Body;
        self.suggested_put = 4;
        self.derive_channels()?;
        Ok(())
    }

    /// Size of the next complete framed message, or `None` (with the
    /// backpressure hint updated) if it is not fully buffered yet.
    fn frame_total(&mut self) -> Result<Option<usize>> {
        let buf = self.input.as_slice();
        if buf.len() < 4 {
            self.suggested_put = 4;
            return Ok(None);
        }
        let segments = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
            .checked_add(1)
            .ok_or_else(|| Error::BadFormat("framed message segment count overflow".into()))?
            as usize;
        if segments > 4096 {
            return Err(Error::BadFormat(
                "framed message declares an unreasonable segment count".into(),
            ));
        }
        let preamble = pad8(4 + segments * 4);
        if buf.len() < preamble {
            self.suggested_put = preamble as u64;
            return Ok(None);
        }
        let mut payload = 0usize;
        for i in 0..segments {
            let at = 4 + i * 4;
            let words = u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
            payload = payload
                .checked_add(words as usize * 8)
                .ok_or_else(|| Error::BadFormat("framed message size overflow".into()))?;
        }
        let total = preamble + payload;
        if buf.len() < total {
            self.suggested_put = total as u64;
            return Ok(None);
        }
        Ok(Some(total))
    }

    /// Compile per-channel state from the header descriptor strings and
    /// compute the derived output geometry.
    fn derive_channels(&mut self) -> Result<()> {
        self.row_bytes = 0;
        for hc in &self.header.channels {
            if !(1..=8).contains(&hc.number) {
                return Err(Error::Corrupt(format!(
                    "channel number {} out of range",
                    hc.number
                )));
            }
            let records = parse::parse_record_list(&hc.record_format);
            let mut bits = 0usize;
            for record in &records {
                if record.width == 0 || record.width > 64 {
                    return Err(Error::Corrupt(format!(
                        "channel {} field width {} out of range",
                        hc.number, record.width
                    )));
                }
                bits += record.width;
            }
            if bits % 8 != 0 {
                return Err(Error::Corrupt(format!(
                    "channel {} record layout is not a whole number of bytes",
                    hc.number
                )));
            }
            let chains = parse::parse_operation_chains(&hc.proc_format, hc.calibration);
            let emitted = records.iter().filter(|r| r.literal.is_none()).count();
            if emitted != chains.len() {
                return Err(Error::Corrupt(format!(
                    "channel {} declares {} operation chains for {} emitted fields",
                    hc.number,
                    chains.len(),
                    emitted
                )));
            }
            self.row_bytes += chains.len() * 8;
            self.channels.push(ChannelState {
                number: hc.number,
                records,
                chains,
                record_bytes: bits / 8,
                queue: ByteQueue::new(),
            });
        }
        if self.row_bytes == 0 {
            return Err(Error::Corrupt("derived output width is zero".into()));
        }
        debug!(
            "header derived: {} channels, {} bytes per output row",
            self.channels.len(),
            self.row_bytes
        );
        Ok(())
    }

    /// BODY, V1: route `[channel, length, payload]` records into the
    /// per-channel queues until the input runs dry.
    fn demux_v1(&mut self) -> Result<()> {
        loop {
            let buffered = self.input.len();
            if buffered < 3 {
                self.suggested_put = 3;
                return Ok(());
            }
            // Stored zero-based on the wire
            let channel = self.input.get_u8()?.wrapping_add(1);
            let length = self.input.get_u16()? as usize;
            if buffered < 3 + length {
                self.input.unget(3)?;
                self.suggested_put = (3 + length) as u64;
                return Ok(());
            }
            let state = self
                .channels
                .iter_mut()
                .find(|c| c.number == channel)
                .ok_or_else(|| {
                    Error::Corrupt(format!("body data for undeclared channel {}", channel))
                })?;
            state.queue.put(&self.input.as_slice()[..length]);
            self.input.drop_front(length)?;
        }
    }

    /// BODY, V2: decode framed data messages until one is unavailable.
    fn demux_v2(&mut self) -> Result<()> {
        loop {
            let total = match self.frame_total()? {
                Some(total) => total,
                None => return Ok(()),
            };
            let message = self.input.get_vec(total)?;
            let data = match FileElement::decode(&message)? {
                FileElement::Data(data) => data,
                FileElement::Header(_) => {
                    return Err(Error::Corrupt("unexpected header message in body".into()))
                }
            };
            let channel = data.channel as u8;
            let state = self
                .channels
                .iter_mut()
                .find(|c| c.number == channel)
                .ok_or_else(|| {
                    Error::Corrupt(format!("body data for undeclared channel {}", channel))
                })?;
            state.queue.put(&data.data);
        }
    }
}

fn kind_for(field_type: FieldType) -> Kind {
    match field_type {
        FieldType::Signed => Kind::Signed,
        FieldType::Float => Kind::Float,
        FieldType::Unsigned | FieldType::Bitfield | FieldType::PackedUnsigned => Kind::Unsigned,
    }
}

fn failed_error() -> Error {
    Error::BadFormat("reader previously rejected the stream".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_reader_wants_three_bytes() {
        let reader = LogReader::new();
        assert_eq!(reader.suggested_put().unwrap(), 3);
    }

    #[test]
    fn test_suggested_put_accounts_for_buffered_bytes() {
        let mut reader = LogReader::new();
        reader.put(b"L");
        assert_eq!(reader.suggested_put().unwrap(), 2);
        reader.put(b"I");
        assert_eq!(reader.suggested_put().unwrap(), 1);
    }

    #[test]
    fn test_bad_magic_is_terminal() {
        let mut reader = LogReader::new();
        reader.put(b"XY1");
        let mut row = [0.0];
        assert!(matches!(reader.next_row(&mut row), Err(Error::BadFormat(_))));
        // Every later call keeps failing, including the hint
        assert!(matches!(reader.next_row(&mut row), Err(Error::BadFormat(_))));
        assert!(reader.suggested_put().is_err());
        assert!(reader.channel_mask().is_err());
    }

    #[test]
    fn test_magic_alone_is_not_enough() {
        let mut reader = LogReader::new();
        reader.put(b"LI");
        let mut row = [0.0];
        assert!(matches!(reader.next_row(&mut row), Err(Error::NeedMoreData)));
    }
}
