//! Streaming conversion of LI log data to delimited text.
//!
//! `CsvWriter` drives a [`LogReader`] purely through the put/query loop:
//! ask for the backpressure hint, feed at least that many bytes, then
//! drain decoded rows until the engine asks for more input. The shared
//! plumbing here (the feed loop and the output column layout) is also
//! used by the NPY container writer.

use std::io::{Read, Write};

use log::debug;

use crate::error::{Error, Result};
use crate::parse::{parse_replacement_list, PlaceholderTarget, Replacement};
use crate::reader::LogReader;

/// Minimum read size; the engine's hint can ask for more.
const FEED_CHUNK: usize = 4096;

/// Pulls bytes from a `Read` source into a `LogReader` on demand.
pub(crate) struct StreamFeeder<R: Read> {
    pub reader: LogReader,
    source: R,
    buffer: Vec<u8>,
    pub eof: bool,
}

impl<R: Read> StreamFeeder<R> {
    pub fn new(source: R) -> Self {
        Self {
            reader: LogReader::new(),
            source,
            buffer: Vec::new(),
            eof: false,
        }
    }

    /// Read at least the suggested byte count (when available) and hand
    /// it to the reader.
    pub fn feed(&mut self) -> Result<()> {
        let want = (self.reader.suggested_put()? as usize).max(FEED_CHUNK);
        if self.buffer.len() < want {
            self.buffer.resize(want, 0);
        }
        let got = self.source.read(&mut self.buffer)?;
        if got == 0 {
            self.eof = true;
        }
        self.reader.put(&self.buffer[..got]);
        Ok(())
    }
}

/// Output column layout shared by the text and array exporters: the
/// packed row geometry plus the compiled, flattened replacement list.
pub(crate) struct ExportLayout {
    pub row_values: usize,
    pub time_step: f64,
    pub start_offset: f64,
    pub replacements: Vec<Replacement>,
    pub header_string: String,
}

impl ExportLayout {
    /// Column count of the emitted output.
    pub fn columns(&self) -> usize {
        if self.replacements.is_empty() {
            // Default layout: time followed by every packed value
            1 + self.row_values
        } else {
            self.replacements.len()
        }
    }

    /// Query the reader for the header metadata and compile the output
    /// format string. Fails with `NeedMoreData` until the header has been
    /// absorbed; once the first query succeeds the rest follow.
    pub fn load(reader: &mut LogReader) -> Result<ExportLayout> {
        let row_values = (reader.row_bytes()? / 8) as usize;
        let time_step = reader.time_step()?;
        let start_offset = reader.start_offset()?;
        let format_string = reader.format_string()?.to_string();
        let header_string = reader.header_string()?.to_string();

        let mut replacements = parse_replacement_list(&format_string);

        // The replacement subscripts count within one channel; convert
        // them to offsets into the packed row using cumulative per-channel
        // field counts, accumulated in channel-number order.
        let mut cumulative = [0u64; 9];
        for channel in 1..=8usize {
            // Allowed to fail for channels not present in the stream
            let count = reader.field_count(channel as u8).unwrap_or(0);
            cumulative[channel] = cumulative[channel - 1] + count;
        }
        for replacement in &mut replacements {
            if let PlaceholderTarget::Channel(ch) = replacement.target() {
                replacement.index += cumulative[(ch as usize).saturating_sub(1)] as usize;
            }
            if replacement.index >= row_values {
                return Err(Error::Corrupt(
                    "format string addresses a value outside the packed row".into(),
                ));
            }
        }

        Ok(ExportLayout {
            row_values,
            time_step,
            start_offset,
            replacements,
            header_string,
        })
    }
}

// printf-style rendering for replacement formats

/// Render a value through a C-printf-style specifier such as `09.8f` or
/// `.8e`. Anything outside the supported subset falls back to the default
/// scientific form.
pub(crate) fn render_value(spec: Option<&str>, value: f64) -> String {
    let spec = match spec {
        Some(spec) => spec,
        None => return c_scientific(value, 10),
    };
    let parsed = match PrintfSpec::parse(spec) {
        Some(parsed) => parsed,
        None => return c_scientific(value, 10),
    };
    parsed.render(value)
}

struct PrintfSpec {
    zero: bool,
    left: bool,
    plus: bool,
    width: usize,
    precision: Option<usize>,
    conversion: char,
}

impl PrintfSpec {
    fn parse(spec: &str) -> Option<PrintfSpec> {
        let mut chars = spec.chars().peekable();
        let mut parsed = PrintfSpec {
            zero: false,
            left: false,
            plus: false,
            width: 0,
            precision: None,
            conversion: 'e',
        };
        while let Some(&ch) = chars.peek() {
            match ch {
                '0' => parsed.zero = true,
                '-' => parsed.left = true,
                '+' => parsed.plus = true,
                ' ' | '#' => {}
                _ => break,
            }
            chars.next();
        }
        let mut width = String::new();
        while let Some(&ch) = chars.peek() {
            if ch.is_ascii_digit() {
                width.push(ch);
                chars.next();
            } else {
                break;
            }
        }
        if !width.is_empty() {
            parsed.width = width.parse().ok()?;
        }
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut precision = String::new();
            while let Some(&ch) = chars.peek() {
                if ch.is_ascii_digit() {
                    precision.push(ch);
                    chars.next();
                } else {
                    break;
                }
            }
            parsed.precision = Some(precision.parse().unwrap_or(0));
        }
        parsed.conversion = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        if !matches!(parsed.conversion, 'e' | 'E' | 'f' | 'F' | 'g') {
            return None;
        }
        Some(parsed)
    }

    fn render(&self, value: f64) -> String {
        let precision = self.precision.unwrap_or(6);
        let mut text = match self.conversion {
            'f' | 'F' => format!("{:.*}", precision, value),
            'g' => format!("{}", value),
            'E' => c_scientific(value, precision).to_uppercase(),
            _ => c_scientific(value, precision),
        };
        if self.plus && !text.starts_with('-') {
            text.insert(0, '+');
        }
        if text.len() >= self.width {
            return text;
        }
        let pad = self.width - text.len();
        if self.left {
            text.push_str(&" ".repeat(pad));
        } else if self.zero {
            let digits_at = usize::from(text.starts_with('-') || text.starts_with('+'));
            text.insert_str(digits_at, &"0".repeat(pad));
        } else {
            text.insert_str(0, &" ".repeat(pad));
        }
        text
    }
}

/// C-style scientific notation: sign, mantissa, `e`, signed two-digit
/// exponent (`1.2345678900e+00`).
pub(crate) fn c_scientific(value: f64, precision: usize) -> String {
    let text = format!("{:.*e}", precision, value);
    match text.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exponent.abs())
        }
        None => text,
    }
}

/// Statistics about one conversion.
#[derive(Debug, Clone)]
pub struct WriteStats {
    /// Output rows written
    pub rows: u64,
    /// Output columns per row
    pub columns: usize,
}

impl WriteStats {
    /// Human-readable one-line summary.
    pub fn summary(&self) -> String {
        format!("wrote {} row(s) of {} column(s)", self.rows, self.columns)
    }
}

/// Writer for converting an LI log stream to comma-separated text.
///
/// # Examples
///
/// ```no_run
/// use lilog_parser::CsvWriter;
/// use std::fs::File;
///
/// let input = File::open("capture.li")?;
/// let output = File::create("capture.csv")?;
/// let stats = CsvWriter::new().convert(input, output)?;
/// println!("{}", stats.summary());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Default)]
pub struct CsvWriter;

impl CsvWriter {
    pub fn new() -> Self {
        Self
    }

    /// Stream `input` through the decoder and write CSV text to
    /// `output`.
    ///
    /// The stream's descriptive header string is emitted first. Rows
    /// follow its output format string when one is present, otherwise
    /// the default layout of time followed by every decoded value. Rows
    /// end with CR+LF. A stream that ends before one complete row was
    /// decoded is a format error.
    pub fn convert<R: Read, W: Write>(&self, input: R, mut output: W) -> Result<WriteStats> {
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

        output.write_all(layout.header_string.as_bytes())?;

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
        output.flush()?;
        debug!("csv conversion finished after {} rows", rows);
        Ok(WriteStats {
            rows,
            columns: layout.columns(),
        })
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
            // No (usable) format string: time followed by everything
            write!(output, "{}", c_scientific(time, 10))?;
            for value in row {
                write!(output, ", {}", c_scientific(*value, 16))?;
            }
        } else {
            for (i, replacement) in layout.replacements.iter().enumerate() {
                if i > 0 {
                    write!(output, ", ")?;
                }
                match replacement.target() {
                    PlaceholderTarget::Time => {
                        write!(output, "{}", render_value(replacement.format.as_deref(), time))?;
                    }
                    PlaceholderTarget::RowIndex => {
                        write!(output, "{}", index)?;
                    }
                    PlaceholderTarget::Channel(_) => {
                        write!(
                            output,
                            "{}",
                            render_value(replacement.format.as_deref(), row[replacement.index])
                        )?;
                    }
                    PlaceholderTarget::Unknown => {}
                }
            }
        }
        write!(output, "\r\n")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_c_scientific_shapes() {
        assert_eq!(c_scientific(42.0, 10), "4.2000000000e+01");
        assert_eq!(c_scientific(-0.25, 2), "-2.50e-01");
        assert_eq!(c_scientific(0.0, 3), "0.000e+00");
        assert_eq!(c_scientific(1.0e100, 1), "1.0e+100");
    }

    #[test]
    fn test_render_fixed_point() {
        assert_eq!(render_value(Some(".3f"), 1.23456), "1.235");
        assert_eq!(render_value(Some("09.3f"), 1.5), "00001.500");
        assert_eq!(render_value(Some("8.2f"), -1.5), "   -1.50");
        assert_eq!(render_value(Some("-8.2f"), 1.5), "1.50    ");
    }

    #[test]
    fn test_render_scientific() {
        assert_eq!(render_value(Some(".8e"), 42.0), "4.20000000e+01");
        assert_eq!(render_value(Some(".2E"), 42.0), "4.20E+01");
    }

    #[test]
    fn test_render_default_and_fallback() {
        assert_eq!(render_value(None, 42.0), "4.2000000000e+01");
        // Unsupported conversions fall back to the default form
        assert_eq!(render_value(Some("5d"), 42.0), "4.2000000000e+01");
        assert_eq!(render_value(Some("bogus"), 42.0), "4.2000000000e+01");
    }

    #[test]
    fn test_render_plus_flag() {
        assert_eq!(render_value(Some("+.1f"), 1.5), "+1.5");
    }
}
