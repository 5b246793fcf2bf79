//! Cursor-based reading of packed binary values.
//!
//! An [`Unpacker`] walks an immutable byte buffer,
//! interpreting the bytes at its current position
//! according to a compact format specification
//! (`"4i"`, `"64si4s3i"`, ...)
//! in the spirit of the conventional `struct` format strings.
//! Compiled formats are cached by their specification string,
//! since the same handful of formats is used thousands of times
//! when decoding a single CSA header.
use byteorder::{BigEndian, ByteOrder, LittleEndian, NativeEndian};
use smallvec::SmallVec;
use snafu::{ensure, Backtrace, OptionExt, Snafu};
use std::convert::TryFrom;
use std::collections::HashMap;
use std::marker::PhantomData;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// A read would go past the end of the buffer.
    #[snafu(display(
        "Cannot read {} bytes at position {} (buffer length is {})",
        requested,
        position,
        length
    ))]
    OutOfBounds {
        position: usize,
        requested: usize,
        length: usize,
        backtrace: Backtrace,
    },

    #[snafu(display("Invalid format specification `{}`: {}", format, reason))]
    InvalidFormat {
        format: String,
        reason: &'static str,
        backtrace: Backtrace,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The byte order requested by a format specification prefix.
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq)]
enum Endian {
    Little,
    Big,
    Native,
}

/// A single field type in a format specification.
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq)]
enum Code {
    /// `b`
    I8,
    /// `B`
    U8,
    /// `h`
    I16,
    /// `H`
    U16,
    /// `i`
    I32,
    /// `I`
    U32,
    /// `q`
    I64,
    /// `Q`
    U64,
    /// `f`
    F32,
    /// `d`
    F64,
    /// `s`, a fixed size byte string
    Bytes,
    /// `x`, padding
    Pad,
}

impl Code {
    fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'b' => Code::I8,
            'B' => Code::U8,
            'h' => Code::I16,
            'H' => Code::U16,
            'i' | 'l' => Code::I32,
            'I' | 'L' => Code::U32,
            'q' => Code::I64,
            'Q' => Code::U64,
            'f' => Code::F32,
            'd' => Code::F64,
            's' => Code::Bytes,
            'x' => Code::Pad,
            _ => return None,
        })
    }

    fn size(self) -> usize {
        match self {
            Code::I8 | Code::U8 | Code::Bytes | Code::Pad => 1,
            Code::I16 | Code::U16 => 2,
            Code::I32 | Code::U32 | Code::F32 => 4,
            Code::I64 | Code::U64 | Code::F64 => 8,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq)]
struct Item {
    code: Code,
    count: usize,
}

/// A compiled format specification.
///
/// The grammar is an optional byte order prefix
/// (`<` little endian, `>` or `!` big endian, `=` or `@` native)
/// followed by a sequence of `[count]code` items.
/// A count before `s` gives the length of a single byte string field,
/// a count before `x` gives a number of padding bytes to skip,
/// and a count before any other code repeats that field.
#[derive(Debug, Clone, Eq, Hash, PartialEq)]
pub struct Format {
    byte_order: Option<Endian>,
    items: SmallVec<[Item; 6]>,
    size: usize,
}

impl Format {
    /// Compile a format specification.
    pub fn parse(spec: &str) -> Result<Self> {
        let mut chars = spec.chars().peekable();
        let byte_order = match chars.peek() {
            Some('<') => Some(Endian::Little),
            Some('>') | Some('!') => Some(Endian::Big),
            Some('=') | Some('@') => Some(Endian::Native),
            _ => None,
        };
        if byte_order.is_some() {
            chars.next();
        }

        let mut items = SmallVec::new();
        let mut size = 0_usize;
        let mut count: Option<usize> = None;
        for c in chars {
            if let Some(digit) = c.to_digit(10) {
                let current = count.unwrap_or(0);
                count = Some(
                    current
                        .checked_mul(10)
                        .and_then(|v| v.checked_add(digit as usize))
                        .context(InvalidFormatSnafu {
                            format: spec,
                            reason: "repeat count is too large",
                        })?,
                );
                continue;
            }
            if c.is_whitespace() {
                ensure!(
                    count.is_none(),
                    InvalidFormatSnafu {
                        format: spec,
                        reason: "repeat count without a field code",
                    }
                );
                continue;
            }
            let code = Code::from_char(c).context(InvalidFormatSnafu {
                format: spec,
                reason: "unknown field code",
            })?;
            let count = count.take().unwrap_or(1);
            size = count
                .checked_mul(code.size())
                .and_then(|s| s.checked_add(size))
                .context(InvalidFormatSnafu {
                    format: spec,
                    reason: "format size overflows",
                })?;
            items.push(Item { code, count });
        }
        ensure!(
            count.is_none(),
            InvalidFormatSnafu {
                format: spec,
                reason: "trailing repeat count",
            }
        );

        Ok(Format {
            byte_order,
            items,
            size,
        })
    }

    /// The number of bytes consumed by this format.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The number of fields produced by this format.
    pub fn field_count(&self) -> usize {
        self.items
            .iter()
            .map(|item| match item.code {
                Code::Bytes => 1,
                Code::Pad => 0,
                _ => item.count,
            })
            .sum()
    }

    /// Interpret `bytes` (of exactly [`size`](Format::size) bytes),
    /// using `B` unless the format declares its own byte order.
    fn decode<'b, B: ByteOrder>(&self, bytes: &'b [u8]) -> Fields<'b> {
        match self.byte_order {
            Some(Endian::Little) => self.decode_as::<LittleEndian>(bytes),
            Some(Endian::Big) => self.decode_as::<BigEndian>(bytes),
            Some(Endian::Native) => self.decode_as::<NativeEndian>(bytes),
            None => self.decode_as::<B>(bytes),
        }
    }

    fn decode_as<'b, B: ByteOrder>(&self, bytes: &'b [u8]) -> Fields<'b> {
        let mut fields = Fields::new();
        let mut offset = 0;
        for item in &self.items {
            match item.code {
                Code::Bytes => {
                    fields.push(Field::Bytes(&bytes[offset..offset + item.count]));
                    offset += item.count;
                }
                Code::Pad => offset += item.count,
                code => {
                    for _ in 0..item.count {
                        let data = &bytes[offset..offset + code.size()];
                        fields.push(match code {
                            Code::I8 => Field::Int(i64::from(data[0] as i8)),
                            Code::U8 => Field::UInt(u64::from(data[0])),
                            Code::I16 => Field::Int(i64::from(B::read_i16(data))),
                            Code::U16 => Field::UInt(u64::from(B::read_u16(data))),
                            Code::I32 => Field::Int(i64::from(B::read_i32(data))),
                            Code::U32 => Field::UInt(u64::from(B::read_u32(data))),
                            Code::I64 => Field::Int(B::read_i64(data)),
                            Code::U64 => Field::UInt(B::read_u64(data)),
                            Code::F32 => Field::Float(f64::from(B::read_f32(data))),
                            Code::F64 => Field::Float(B::read_f64(data)),
                            Code::Bytes | Code::Pad => unreachable!(),
                        });
                        offset += code.size();
                    }
                }
            }
        }
        fields
    }
}

/// A single unpacked value.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Field<'a> {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bytes(&'a [u8]),
}

impl<'a> Field<'a> {
    /// Retrieve the field as a signed integer,
    /// if it is an integer which fits.
    pub fn to_int(&self) -> Option<i64> {
        match *self {
            Field::Int(v) => Some(v),
            Field::UInt(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Retrieve the field as a byte string.
    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        match *self {
            Field::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// The values produced by a single [`Unpacker::unpack`] call.
pub type Fields<'a> = SmallVec<[Field<'a>; 8]>;

/// A reader of packed values over a byte buffer.
///
/// The byte order `B` applies to all formats
/// which do not declare their own.
#[derive(Debug)]
pub struct Unpacker<'a, B = LittleEndian> {
    buffer: &'a [u8],
    position: usize,
    cache: HashMap<String, Format>,
    byte_order: PhantomData<B>,
}

impl<'a> Unpacker<'a> {
    /// Create a little endian unpacker at the start of `buffer`.
    pub fn new(buffer: &'a [u8]) -> Self {
        Unpacker::with_byte_order(buffer)
    }
}

impl<'a, B> Unpacker<'a, B>
where
    B: ByteOrder,
{
    /// Create an unpacker with the byte order `B`
    /// at the start of `buffer`.
    pub fn with_byte_order(buffer: &'a [u8]) -> Self {
        Unpacker {
            buffer,
            position: 0,
            cache: HashMap::new(),
            byte_order: PhantomData,
        }
    }

    /// The current read position.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Move the read position.
    /// Positions past the end are allowed,
    /// but any subsequent read will fail.
    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }

    /// Advance the read position by `n` bytes without reading.
    pub fn skip(&mut self, n: usize) {
        self.position = self.position.saturating_add(n);
    }

    /// The length of the underlying buffer.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the underlying buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// The number of bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Unpack the values described by `spec` at the current position
    /// and advance past them.
    pub fn unpack(&mut self, spec: &str) -> Result<Fields<'a>> {
        if !self.cache.contains_key(spec) {
            let format = Format::parse(spec)?;
            self.cache.insert(spec.to_owned(), format);
        }
        let format = &self.cache[spec];
        let bytes = take(self.buffer, self.position, format.size())?;
        let fields = format.decode::<B>(bytes);
        self.position += format.size();
        Ok(fields)
    }

    /// Read the next `n` bytes and advance past them.
    pub fn read(&mut self, n: usize) -> Result<&'a [u8]> {
        let bytes = take(self.buffer, self.position, n)?;
        self.position += n;
        Ok(bytes)
    }

    /// Read all remaining bytes.
    pub fn read_to_end(&mut self) -> &'a [u8] {
        let start = self.position.min(self.buffer.len());
        self.position = self.buffer.len();
        &self.buffer[start..]
    }
}

fn take(buffer: &[u8], position: usize, n: usize) -> Result<&[u8]> {
    let end = position.checked_add(n).filter(|end| *end <= buffer.len());
    match end {
        Some(end) => Ok(&buffer[position..end]),
        None => OutOfBoundsSnafu {
            position,
            requested: n,
            length: buffer.len(),
        }
        .fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn unpack_and_read_advance_the_cursor() {
        let mut upk = Unpacker::new(b"1234567890");
        assert_eq!(upk.unpack("2s").unwrap().as_slice(), &[Field::Bytes(b"12")]);
        assert_eq!(upk.unpack("2s").unwrap().as_slice(), &[Field::Bytes(b"34")]);
        assert_eq!(upk.position(), 4);
        assert_eq!(upk.read(3).unwrap(), b"567");
        assert_eq!(upk.position(), 7);
        assert_eq!(upk.read_to_end(), b"890");
        assert_eq!(upk.remaining(), 0);
    }

    #[test]
    fn integers_follow_the_byte_order() {
        let data = [1, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF];
        let mut upk = Unpacker::new(&data);
        let fields = upk.unpack("2i").unwrap();
        assert_eq!(fields.as_slice(), &[Field::Int(1), Field::Int(-1)]);

        let mut upk = Unpacker::<BigEndian>::with_byte_order(&data);
        let fields = upk.unpack("I").unwrap();
        assert_eq!(fields.as_slice(), &[Field::UInt(0x0100_0000)]);

        // an explicit prefix overrides the default
        let mut upk = Unpacker::<BigEndian>::with_byte_order(&data);
        let fields = upk.unpack("<I").unwrap();
        assert_eq!(fields.as_slice(), &[Field::UInt(1)]);
    }

    #[test]
    fn tag_header_format() {
        let format = Format::parse("64si4s3i").unwrap();
        assert_eq!(format.size(), 84);
        assert_eq!(format.field_count(), 6);

        let format = Format::parse("<2xH d").unwrap();
        assert_eq!(format.size(), 12);
        assert_eq!(format.field_count(), 2);
    }

    #[test]
    fn formats_are_cached() {
        let data = [0_u8; 64];
        let mut upk = Unpacker::new(&data);
        for _ in 0..4 {
            upk.unpack("4i").unwrap();
        }
        assert_eq!(upk.cache.len(), 1);
        upk.unpack("2I").unwrap();
        assert_eq!(upk.cache.len(), 2);
    }

    #[test]
    fn reading_past_the_end_fails() {
        let mut upk = Unpacker::new(&[0_u8; 6]);
        upk.unpack("i").unwrap();
        assert!(matches!(
            upk.unpack("i"),
            Err(Error::OutOfBounds {
                position: 4,
                requested: 4,
                length: 6,
                ..
            })
        ));
        // the position is untouched by a failed read
        assert_eq!(upk.position(), 4);
        assert!(upk.read(3).is_err());

        upk.seek(100);
        assert!(upk.read(0).is_err());
        assert_eq!(upk.read_to_end(), b"");
    }

    #[rstest]
    #[case("3")]
    #[case("4z")]
    #[case("4 i")]
    #[case("99999999999999999999999i")]
    fn invalid_formats(#[case] spec: &str) {
        assert!(matches!(
            Format::parse(spec),
            Err(Error::InvalidFormat { .. })
        ));
    }
}
