//! NumPy `.npy` container output.
//!
//! The array shape is only known once the stream has been fully decoded,
//! so a fixed-size header region is reserved up front, the rows are
//! streamed as little-endian f8 values, and the header is written last
//! with a seek back to the start.

use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use log::debug;

use crate::error::{Error, Result};
use crate::parse::PlaceholderTarget;
use crate::writer::{ExportLayout, StreamFeeder, WriteStats};

/// Total reserved bytes for the magic, version, length field and the
/// padded header dictionary.
const HEADER_SIZE: usize = 96;

/// Writer for converting an LI log stream to a NumPy array file.
///
/// Produces a version 1.0 `.npy` file of shape `(rows, columns)` in C
/// order, with the columns defined by the stream's output format string
/// (or, without one, time followed by every decoded value).
///
/// # Examples
///
/// ```no_run
/// use lilog_parser::NpyWriter;
/// use std::fs::File;
///
/// let input = File::open("capture.li")?;
/// let output = File::create("capture.npy")?;
/// let stats = NpyWriter::new().convert(input, output)?;
/// println!("{}", stats.summary());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Default)]
pub struct NpyWriter;

impl NpyWriter {
    pub fn new() -> Self {
        Self
    }

    /// Stream `input` through the decoder and write an `.npy` array to
    /// `output`. The output must be seekable so the header can be
    /// completed once the row count is known.
    pub fn convert<R: Read, W: Write + Seek>(&self, input: R, mut output: W) -> Result<WriteStats> {
        let mut feeder = StreamFeeder::new(input);

        let layout = loop {
            match ExportLayout::load(&mut feeder.reader) {
                Ok(layout) => break layout,
                Err(Error::NeedMoreData) if !feeder.eof => feeder.feed()?,
                Err(Error::NeedMoreData) => {
                    return Err(Error::BadFormat(
                        "stream ended before the header was complete".into(),
                    ))
                }
                Err(e) => return Err(e),
            }
        };

        // Rows and columns are unknown until the end; skip the header
        output.seek(SeekFrom::Start(HEADER_SIZE as u64))?;

        let mut row = vec![0.0f64; layout.row_values];
        let mut rows = 0u64;
        loop {
            match feeder.reader.next_row(&mut row) {
                Ok(()) => {
                    self.write_row(&mut output, &layout, &row, rows)?;
                    rows += 1;
                }
                Err(Error::NeedMoreData) => {
                    if feeder.eof {
                        break;
                    }
                    feeder.feed()?;
                }
                Err(e) => return Err(e),
            }
        }
        if rows == 0 {
            return Err(Error::BadFormat("stream contained no decodable rows".into()));
        }

        let columns = layout.columns();
        self.write_header(&mut output, rows, columns)?;
        output.flush()?;
        debug!("npy conversion finished after {} rows", rows);
        Ok(WriteStats { rows, columns })
    }

    fn write_row<W: Write>(
        &self,
        output: &mut W,
        layout: &ExportLayout,
        row: &[f64],
        index: u64,
    ) -> Result<()> {
        let time = layout.start_offset + layout.time_step * index as f64;
        if layout.replacements.is_empty() {
            output.write_f64::<LittleEndian>(time)?;
            for value in row {
                output.write_f64::<LittleEndian>(*value)?;
            }
        } else {
            for replacement in &layout.replacements {
                let value = match replacement.target() {
                    PlaceholderTarget::Time => time,
                    PlaceholderTarget::RowIndex => index as f64,
                    PlaceholderTarget::Channel(_) => row[replacement.index],
                    PlaceholderTarget::Unknown => 0.0,
                };
                output.write_f64::<LittleEndian>(value)?;
            }
        }
        Ok(())
    }

    fn write_header<W: Write + Seek>(&self, output: &mut W, rows: u64, columns: usize) -> Result<()> {
        let dict = format!(
            "{{'descr': '<f8', 'fortran_order': False, 'shape': ({}, {}), }}",
            rows, columns
        );
        // Magic (6) + version (2) + length field (2) + dict + padding + newline
        if 10 + dict.len() + 1 > HEADER_SIZE {
            return Err(Error::InvalidArgument(
                "array shape does not fit the fixed npy header".into(),
            ));
        }
        output.seek(SeekFrom::Start(0))?;
        output.write_all(b"\x93NUMPY\x01\x00")?;
        output.write_u16::<LittleEndian>((HEADER_SIZE - 10) as u16)?;
        output.write_all(dict.as_bytes())?;
        for _ in 10 + dict.len()..HEADER_SIZE - 1 {
            output.write_all(b" ")?;
        }
        output.write_all(b"\n")?;
        Ok(())
    }
}
