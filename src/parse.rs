//! Parsers for the per-channel format descriptor mini-languages.
//!
//! Three textual grammars are compiled here: record layout descriptors
//! (`"<s32,10:u8"`), calibration operation chains (`"*C:+1"`), and output
//! placeholder strings (`"{t},{ch1[0]:09.8f}"`).
//!
//! Matchers share one signature: they take a `&mut &str` cursor, return
//! whether they matched, and advance the cursor to the end of the match or
//! leave it untouched. Composite matchers are ordinary closures over those
//! functions. Matching is greedy, leftmost and backtracking-free, and in
//! every grammar a non-whitespace unparsed remainder invalidates the whole
//! list: callers receive an empty list and fall back to their defaults.

use crate::number::Number;

// Single-character matchers

fn match_char(input: &mut &str, ch: char) -> bool {
    if let Some(rest) = input.strip_prefix(ch) {
        *input = rest;
        true
    } else {
        false
    }
}

/// Match one character if it appears in `set`, returning it.
fn match_from(input: &mut &str, set: &str) -> Option<char> {
    let ch = input.chars().next()?;
    if set.contains(ch) {
        *input = &input[ch.len_utf8()..];
        Some(ch)
    } else {
        None
    }
}

/// Match one character satisfying a predicate.
fn match_is(input: &mut &str, pred: impl Fn(char) -> bool) -> bool {
    match input.chars().next() {
        Some(ch) if pred(ch) => {
            *input = &input[ch.len_utf8()..];
            true
        }
        _ => false,
    }
}

// Composite matchers

/// Match zero or more repetitions. Always succeeds.
fn match_star(input: &mut &str, mut matcher: impl FnMut(&mut &str) -> bool) -> bool {
    while matcher(input) {}
    true
}

/// Match one or more repetitions.
fn match_plus(input: &mut &str, mut matcher: impl FnMut(&mut &str) -> bool) -> bool {
    matcher(input) && match_star(input, matcher)
}

/// Match the first of two alternatives.
fn match_either(
    input: &mut &str,
    mut first: impl FnMut(&mut &str) -> bool,
    mut second: impl FnMut(&mut &str) -> bool,
) -> bool {
    first(input) || second(input)
}

/// Skip contiguous whitespace of any length. Always succeeds.
fn match_whitespace(input: &mut &str) -> bool {
    match_star(input, |i| match_is(i, char::is_whitespace))
}

// Number matchers

fn match_unsigned(input: &mut &str) -> Option<u64> {
    let mut cursor = *input;
    let (digits, radix): (&str, u32) =
        if (cursor.starts_with("0x") || cursor.starts_with("0X")) && cursor.len() > 2 {
            (&cursor[2..], 16)
        } else {
            (cursor, 10)
        };
    let end = digits
        .find(|ch: char| !ch.is_digit(radix))
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    let value = u64::from_str_radix(&digits[..end], radix).ok()?;
    cursor = &digits[end..];
    *input = cursor;
    Some(value)
}

fn match_signed(input: &mut &str) -> Option<i64> {
    let mut cursor = *input;
    let negative = match_char(&mut cursor, '-');
    if !negative {
        match_char(&mut cursor, '+');
    }
    let magnitude = match_unsigned(&mut cursor)?;
    *input = cursor;
    Some(if negative {
        (magnitude as i64).wrapping_neg()
    } else {
        magnitude as i64
    })
}

/// Greedy float literal: optional sign, digits with optional fraction,
/// optional exponent.
fn match_f64(input: &mut &str) -> Option<f64> {
    let source = *input;
    let mut cursor = *input;
    match_either(
        &mut cursor,
        |i| match_char(i, '-'),
        |i| match_char(i, '+'),
    );
    let digits_before = match_plus(&mut cursor, |i| match_is(i, |c| c.is_ascii_digit()));
    let mut digits_after = false;
    {
        let mut after_point = cursor;
        if match_char(&mut after_point, '.') {
            digits_after = match_plus(&mut after_point, |i| match_is(i, |c| c.is_ascii_digit()))
                || digits_before;
            cursor = after_point;
        }
    }
    if !digits_before && !digits_after {
        return None;
    }
    {
        let mut after_exp = cursor;
        if match_either(
            &mut after_exp,
            |i| match_char(i, 'e'),
            |i| match_char(i, 'E'),
        ) {
            match_either(
                &mut after_exp,
                |i| match_char(i, '-'),
                |i| match_char(i, '+'),
            );
            if match_plus(&mut after_exp, |i| match_is(i, |c| c.is_ascii_digit())) {
                cursor = after_exp;
            }
        }
    }
    let matched = &source[..source.len() - cursor.len()];
    let value = matched.parse::<f64>().ok()?;
    *input = cursor;
    Some(value)
}

// Record layout grammar

/// Field type letter of a record layout descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Signed,
    Unsigned,
    Bitfield,
    PackedUnsigned,
    Float,
}

/// One field of a channel's record layout: a type, a bit width, and an
/// optional literal the decoded field must equal (marker fields, not
/// emitted).
#[derive(Debug, Clone, Copy)]
pub struct Record {
    pub field_type: FieldType,
    pub width: usize,
    pub literal: Option<Number>,
}

fn match_record(input: &mut &str) -> Option<Record> {
    let mut cursor = *input;
    let type_ch = match_from(&mut cursor, "subpf")?;
    let field_type = match type_ch {
        's' => FieldType::Signed,
        'u' => FieldType::Unsigned,
        'b' => FieldType::Bitfield,
        'p' => FieldType::PackedUnsigned,
        'f' => FieldType::Float,
        _ => unreachable!(),
    };
    let width = match_unsigned(&mut cursor)? as usize;
    let literal = if match_char(&mut cursor, ',') {
        Some(match field_type {
            FieldType::Signed => Number::signed(width, match_signed(&mut cursor).unwrap_or(0)),
            FieldType::Unsigned | FieldType::Bitfield | FieldType::PackedUnsigned => {
                Number::unsigned(width, match_unsigned(&mut cursor).unwrap_or(0))
            }
            FieldType::Float => {
                let value = match_f64(&mut cursor).unwrap_or(0.0);
                match width {
                    64 => Number::float64(value),
                    32 => Number::float32(value as f32),
                    _ => return None,
                }
            }
        })
    } else {
        None
    };
    *input = cursor;
    Some(Record {
        field_type,
        width,
        literal,
    })
}

/// Compile a record layout descriptor such as `"<s32,10:u8"`.
///
/// A missing leading `<` or any unparsed non-whitespace remainder yields
/// an empty list.
pub fn parse_record_list(input: &str) -> Vec<Record> {
    let mut cursor = input;
    let mut result = Vec::new();
    if !match_char(&mut cursor, '<') {
        return result;
    }
    while let Some(record) = match_record(&mut cursor) {
        result.push(record);
        match_char(&mut cursor, ':');
    }
    match_whitespace(&mut cursor);
    if !cursor.is_empty() {
        result.clear();
    }
    result
}

// Operation chain grammar

/// One step of a calibration pipeline. `C` in the source descriptor
/// substitutes the channel calibration constant for the operand at parse
/// time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operation {
    Multiply(f64),
    Divide(f64),
    Add(f64),
    Subtract(f64),
    BitAnd(f64),
    Sqrt,
    Power(f64),
    Floor,
    Ceil,
}

impl Operation {
    /// Apply this step to a value.
    pub fn apply(&self, value: f64) -> f64 {
        match *self {
            Operation::Multiply(operand) => value * operand,
            Operation::Divide(operand) => value / operand,
            Operation::Add(operand) => value + operand,
            Operation::Subtract(operand) => value - operand,
            Operation::BitAnd(operand) => ((value as i64) & (operand as i64)) as f64,
            Operation::Sqrt => value.sqrt(),
            Operation::Power(operand) => value.powf(operand),
            Operation::Floor => value.floor(),
            Operation::Ceil => value.ceil(),
        }
    }
}

/// Apply a whole chain in order.
pub fn apply_chain(chain: &[Operation], value: f64) -> f64 {
    chain.iter().fold(value, |acc, op| op.apply(acc))
}

fn match_operation(input: &mut &str, calibration: f64) -> Option<Operation> {
    let mut cursor = *input;
    let op_ch = match_from(&mut cursor, "*/+-&s^fc")?;
    let operation = match op_ch {
        's' => Operation::Sqrt,
        'f' => Operation::Floor,
        'c' => Operation::Ceil,
        _ => {
            let operand = if match_char(&mut cursor, 'C') {
                calibration
            } else {
                match_f64(&mut cursor)?
            };
            match op_ch {
                '*' => Operation::Multiply(operand),
                '/' => Operation::Divide(operand),
                '+' => Operation::Add(operand),
                '-' => Operation::Subtract(operand),
                '&' => Operation::BitAnd(operand),
                '^' => Operation::Power(operand),
                _ => unreachable!(),
            }
        }
    };
    *input = cursor;
    Some(operation)
}

/// Compile a proc descriptor into one operation chain per emitted field.
///
/// Groups are separated by `:`; an empty group is an identity chain. The
/// calibration constant substitutes for the `C` placeholder. Unparsed
/// non-whitespace remainder yields an empty list.
pub fn parse_operation_chains(input: &str, calibration: f64) -> Vec<Vec<Operation>> {
    let mut cursor = input;
    let mut result = Vec::new();
    loop {
        match_whitespace(&mut cursor);
        let mut chain = Vec::new();
        while let Some(operation) = match_operation(&mut cursor, calibration) {
            chain.push(operation);
        }
        result.push(chain);
        match_whitespace(&mut cursor);
        if !match_char(&mut cursor, ':') {
            break;
        }
    }
    match_whitespace(&mut cursor);
    if !cursor.is_empty() {
        result.clear();
    }
    result
}

// Replacement string grammar

/// One placeholder of an output format string, such as `{ch1[0]:09.8f}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub identifier: String,
    pub index: usize,
    pub format: Option<String>,
}

/// What a replacement identifier refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderTarget {
    /// `t`: the sample time
    Time,
    /// `n`: the output row index
    RowIndex,
    /// `ch<digit>`: a value of the numbered channel
    Channel(u8),
    Unknown,
}

impl Replacement {
    pub fn target(&self) -> PlaceholderTarget {
        let bytes = self.identifier.as_bytes();
        match bytes {
            b"t" => PlaceholderTarget::Time,
            b"n" => PlaceholderTarget::RowIndex,
            [b'c', b'h', digit] if digit.is_ascii_digit() => {
                PlaceholderTarget::Channel(digit - b'0')
            }
            _ => PlaceholderTarget::Unknown,
        }
    }
}

fn is_identifier_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_'
}

fn is_identifier_continue(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

fn match_identifier(input: &mut &str) -> Option<String> {
    let source = *input;
    let mut cursor = *input;
    if !match_is(&mut cursor, is_identifier_start) {
        return None;
    }
    match_star(&mut cursor, |i| match_is(i, is_identifier_continue));
    let identifier = source[..source.len() - cursor.len()].to_string();
    *input = cursor;
    Some(identifier)
}

/// Bracketed digits, such as `"[0]"`.
fn match_subscript(input: &mut &str) -> Option<usize> {
    let mut cursor = *input;
    if !match_char(&mut cursor, '[') {
        return None;
    }
    let index = match_signed(&mut cursor)?;
    if !match_char(&mut cursor, ']') {
        return None;
    }
    // A negative subscript can never address the packed output
    let index = usize::try_from(index).ok()?;
    *input = cursor;
    Some(index)
}

/// Everything up to the closing brace; the format specifier itself is not
/// validated here.
fn match_format_text(input: &mut &str) -> String {
    let end = input.find('}').unwrap_or(input.len());
    let text = input[..end].to_string();
    *input = &input[end..];
    text
}

fn match_replacement(input: &mut &str) -> Option<Replacement> {
    let mut cursor = *input;
    if !match_char(&mut cursor, '{') {
        return None;
    }
    let identifier = match_identifier(&mut cursor)?;
    let index = match_subscript(&mut cursor).unwrap_or(0);
    let format = if match_char(&mut cursor, ':') {
        Some(match_format_text(&mut cursor))
    } else {
        None
    };
    if !match_char(&mut cursor, '}') {
        return None;
    }
    *input = cursor;
    Some(Replacement {
        identifier,
        index,
        format,
    })
}

/// Scan an output format string for `{identifier[index]:format}` tokens.
///
/// Tokens may be separated by whitespace and commas; trailing whitespace
/// is tolerated. A malformed token or any other residue erases the whole
/// list, which callers treat as "use the default column layout".
pub fn parse_replacement_list(input: &str) -> Vec<Replacement> {
    let mut cursor = input;
    let mut result = Vec::new();
    while let Some(replacement) = match_replacement(&mut cursor) {
        result.push(replacement);
        match_whitespace(&mut cursor);
        match_char(&mut cursor, ',');
        match_whitespace(&mut cursor);
    }
    match_whitespace(&mut cursor);
    if !cursor.is_empty() {
        result.clear();
    }
    result
}
