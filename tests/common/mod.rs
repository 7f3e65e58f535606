/// Test utilities for building LI log byte streams
use byteorder::{LittleEndian, WriteBytesExt};

/// One channel of a V2 header message
pub struct V2Channel<'a> {
    pub number: i8,
    pub calibration: f64,
    pub record_format: &'a str,
    pub proc_format: &'a str,
}

/// Builder for creating LI log test streams, wire-exact for both the
/// fixed-layout V1 variant and the framed V2 variant
pub struct LogBuilder {
    data: Vec<u8>,
}

impl LogBuilder {
    /// Start a V1 stream: magic tag plus the `'1'` version selector
    pub fn v1() -> Self {
        Self {
            data: b"LI1".to_vec(),
        }
    }

    /// Start a V2 stream; any selector byte other than `'1'` works
    pub fn v2() -> Self {
        Self {
            data: b"LI2".to_vec(),
        }
    }

    /// Append the V1 header block with its 2-byte length prefix.
    ///
    /// `calibrations` must carry one value per set mask bit, and
    /// `proc_formats` one descriptor per set mask bit.
    #[allow(clippy::too_many_arguments)]
    pub fn v1_header(
        mut self,
        channel_mask: u8,
        instrument_id: u8,
        instrument_version: u16,
        time_step: f64,
        start_time: i64,
        calibrations: &[f64],
        record_format: &str,
        proc_formats: &[&str],
        format_string: &str,
        header_string: &str,
    ) -> Self {
        let mut header = Vec::new();
        header.push(channel_mask);
        header.push(instrument_id);
        header.write_u16::<LittleEndian>(instrument_version).unwrap();
        header.write_f64::<LittleEndian>(time_step).unwrap();
        header.write_i64::<LittleEndian>(start_time).unwrap();
        for &calibration in calibrations {
            header.write_f64::<LittleEndian>(calibration).unwrap();
        }
        write_block(&mut header, record_format);
        for proc_format in proc_formats {
            write_block(&mut header, proc_format);
        }
        write_block(&mut header, format_string);
        write_block(&mut header, header_string);

        self.data
            .write_u16::<LittleEndian>(header.len() as u16)
            .unwrap();
        self.data.extend_from_slice(&header);
        self
    }

    /// Append one V1 body record: zero-based channel id, 2-byte length,
    /// payload
    pub fn v1_data(mut self, channel_zero_based: u8, payload: &[u8]) -> Self {
        self.data.push(channel_zero_based);
        self.data
            .write_u16::<LittleEndian>(payload.len() as u16)
            .unwrap();
        self.data.extend_from_slice(payload);
        self
    }

    /// Append one framed V2 header message
    #[allow(clippy::too_many_arguments)]
    pub fn v2_header(
        mut self,
        instrument_id: i8,
        instrument_version: i16,
        time_step: f64,
        start_time: i64,
        start_offset: f64,
        channels: &[V2Channel],
        format_string: &str,
        header_string: &str,
    ) -> Self {
        let n = channels.len();

        // Word map: 0 root ptr, 1 union data, 2 union ptr, 3..7 header
        // data, 7..10 header ptrs, 10 list tag, then 4 words per channel,
        // then the text payloads
        let mut texts: Vec<&str> = Vec::new();
        for channel in channels {
            texts.push(channel.record_format);
            texts.push(channel.proc_format);
        }
        texts.push(format_string);
        texts.push(header_string);

        let texts_start = 11 + 4 * n;
        let mut text_at = Vec::new();
        let mut next = texts_start;
        for text in &texts {
            text_at.push(next);
            next += (text.len() + 1 + 7) / 8;
        }
        let total_words = next;

        let mut words = vec![0u64; total_words];
        words[0] = struct_ptr(0, 1, 1, 1);
        words[1] = 0; // union tag: header
        words[2] = struct_ptr(2, 3, 4, 3);
        words[3] = u64::from(instrument_id as u8)
            | (u64::from(instrument_version as u16) << 16);
        words[4] = time_step.to_bits();
        words[5] = start_time as u64;
        words[6] = start_offset.to_bits();
        words[7] = composite_list_ptr(7, 10, n);
        words[8] = text_ptr(8, text_at[2 * n], texts[2 * n].len() + 1);
        words[9] = text_ptr(9, text_at[2 * n + 1], texts[2 * n + 1].len() + 1);
        words[10] = ((n as u64) << 2) | (2u64 << 32) | (2u64 << 48); // tag
        for (i, channel) in channels.iter().enumerate() {
            let base = 11 + 4 * i;
            words[base] = u64::from(channel.number as u8);
            words[base + 1] = channel.calibration.to_bits();
            words[base + 2] = text_ptr(base + 2, text_at[2 * i], texts[2 * i].len() + 1);
            words[base + 3] = text_ptr(base + 3, text_at[2 * i + 1], texts[2 * i + 1].len() + 1);
        }

        let mut segment = words_to_bytes(&words);
        for (text, &at) in texts.iter().zip(&text_at) {
            segment[at * 8..at * 8 + text.len()].copy_from_slice(text.as_bytes());
            // NUL terminator is already zero
        }
        self.data.extend_from_slice(&frame_message(&segment));
        self
    }

    /// Append one framed V2 data message
    pub fn v2_data(mut self, channel: i8, payload: &[u8]) -> Self {
        let payload_words = (payload.len() + 7) / 8;
        let total_words = 5 + payload_words;
        let mut words = vec![0u64; total_words];
        words[0] = struct_ptr(0, 1, 1, 1);
        words[1] = 1; // union tag: data
        words[2] = struct_ptr(2, 3, 1, 1);
        words[3] = u64::from(channel as u8);
        words[4] = byte_list_ptr(4, 5, payload.len());

        let mut segment = words_to_bytes(&words);
        segment[5 * 8..5 * 8 + payload.len()].copy_from_slice(payload);
        self.data.extend_from_slice(&frame_message(&segment));
        self
    }

    /// Build and return the final stream bytes
    pub fn build(self) -> Vec<u8> {
        self.data
    }
}

fn write_block(out: &mut Vec<u8>, text: &str) {
    out.write_u16::<LittleEndian>(text.len() as u16).unwrap();
    out.extend_from_slice(text.as_bytes());
}

fn struct_ptr(at: usize, target: usize, data_words: u64, pointer_words: u64) -> u64 {
    let offset = (target - (at + 1)) as u64;
    (offset << 2) | (data_words << 32) | (pointer_words << 48)
}

fn byte_list_ptr(at: usize, target: usize, count: usize) -> u64 {
    let offset = (target - (at + 1)) as u64;
    (offset << 2) | 1 | (2u64 << 32) | ((count as u64) << 35)
}

fn text_ptr(at: usize, target: usize, count_with_nul: usize) -> u64 {
    byte_list_ptr(at, target, count_with_nul)
}

fn composite_list_ptr(at: usize, target: usize, element_count: usize) -> u64 {
    let offset = (target - (at + 1)) as u64;
    // 4 words per element, excluding the tag word
    (offset << 2) | 1 | (7u64 << 32) | (((4 * element_count) as u64) << 35)
}

fn words_to_bytes(words: &[u64]) -> Vec<u8> {
    let mut bytes = vec![0u8; words.len() * 8];
    for (i, word) in words.iter().enumerate() {
        bytes[i * 8..(i + 1) * 8].copy_from_slice(&word.to_le_bytes());
    }
    bytes
}

/// Wrap one segment in the framed-message preamble: a `count - 1` word
/// and one size word, which for a single segment pads to exactly 8 bytes
fn frame_message(segment: &[u8]) -> Vec<u8> {
    assert_eq!(segment.len() % 8, 0);
    let mut out = Vec::new();
    out.write_u32::<LittleEndian>(0).unwrap();
    out.write_u32::<LittleEndian>((segment.len() / 8) as u32)
        .unwrap();
    out.extend_from_slice(segment);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v1_stream_shape() {
        let data = LogBuilder::v1()
            .v1_header(0b1, 0, 0, 0.0, 0, &[0.0], "<u8", &[""], "", "")
            .v1_data(0, &[0x2A])
            .build();
        assert_eq!(&data[..3], b"LI1");
        // Declared header length: fixed fields + one calibration + four
        // length-prefixed strings ("<u8" and three empties)
        assert_eq!(u16::from_le_bytes([data[3], data[4]]), 39);
        assert_eq!(data.len(), 3 + 2 + 39 + 3 + 1);
    }

    #[test]
    fn test_v2_message_framing() {
        let data = LogBuilder::v2().v2_data(1, &[1, 2, 3]).build();
        // Preamble: magic + version, then [count-1, words] table
        assert_eq!(&data[..3], b"LI2");
        assert_eq!(u32::from_le_bytes([data[3], data[4], data[5], data[6]]), 0);
        let words = u32::from_le_bytes([data[7], data[8], data[9], data[10]]);
        assert_eq!(data.len(), 3 + 8 + words as usize * 8);
    }
}
