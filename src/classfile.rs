//! Minimal class file reader: just enough of the format to recover the
//! internal name of the class a file declares.
//!
//! Only the header and constant pool are decoded; everything after
//! `this_class` is ignored.

use std::fmt;

const MAGIC: u32 = 0xCAFE_BABE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassFileError {
    Truncated,
    InvalidMagic(u32),
    UnknownConstantTag { tag: u8, index: u32 },
    BadIndex(u16),
    InvalidUtf8,
}

impl fmt::Display for ClassFileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "unexpected end of class file"),
            Self::InvalidMagic(magic) => write!(f, "invalid classfile magic: 0x{magic:08x}"),
            Self::UnknownConstantTag { tag, index } => {
                write!(f, "unknown constant pool tag {tag} at index {index}")
            }
            Self::BadIndex(index) => write!(f, "constant pool index {index} is not a class reference"),
            Self::InvalidUtf8 => write!(f, "class name is not valid modified UTF-8"),
        }
    }
}

impl std::error::Error for ClassFileError {}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ClassFileError> {
        let end = self.pos.checked_add(n).ok_or(ClassFileError::Truncated)?;
        let slice = self.bytes.get(self.pos..end).ok_or(ClassFileError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn read_u1(&mut self) -> Result<u8, ClassFileError> {
        Ok(self.take(1)?[0])
    }

    fn read_u2(&mut self) -> Result<u16, ClassFileError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u4(&mut self) -> Result<u32, ClassFileError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

enum Constant<'a> {
    Utf8(&'a [u8]),
    Class(u16),
    Other,
}

/// Returns the slash-separated internal name declared by `this_class`,
/// e.g. `org/example/Foo$Bar`.
pub fn this_class_name(bytes: &[u8]) -> Result<String, ClassFileError> {
    let mut reader = Reader::new(bytes);
    let magic = reader.read_u4()?;
    if magic != MAGIC {
        return Err(ClassFileError::InvalidMagic(magic));
    }
    let _minor = reader.read_u2()?;
    let _major = reader.read_u2()?;

    let count = reader.read_u2()?;
    let mut pool: Vec<Constant<'_>> = Vec::with_capacity(count as usize);
    // Index 0 is unused. Counted in u32 so a wide constant in the last
    // slot cannot wrap.
    pool.push(Constant::Other);
    let mut index = 1u32;
    while index < u32::from(count) {
        let tag = reader.read_u1()?;
        let entry = match tag {
            1 => {
                let len = reader.read_u2()? as usize;
                Constant::Utf8(reader.take(len)?)
            }
            7 => Constant::Class(reader.read_u2()?),
            8 | 16 | 19 | 20 => {
                reader.take(2)?;
                Constant::Other
            }
            15 => {
                reader.take(3)?;
                Constant::Other
            }
            3 | 4 | 9 | 10 | 11 | 12 | 17 | 18 => {
                reader.take(4)?;
                Constant::Other
            }
            5 | 6 => {
                reader.take(8)?;
                // Long and double occupy two slots.
                pool.push(Constant::Other);
                index += 1;
                Constant::Other
            }
            _ => return Err(ClassFileError::UnknownConstantTag { tag, index }),
        };
        pool.push(entry);
        index += 1;
    }

    let _access_flags = reader.read_u2()?;
    let this_class = reader.read_u2()?;
    let name_index = match pool.get(this_class as usize) {
        Some(Constant::Class(name_index)) => *name_index,
        _ => return Err(ClassFileError::BadIndex(this_class)),
    };
    match pool.get(name_index as usize) {
        Some(Constant::Utf8(raw)) => decode_modified_utf8(raw),
        _ => Err(ClassFileError::BadIndex(name_index)),
    }
}

fn decode_modified_utf8(raw: &[u8]) -> Result<String, ClassFileError> {
    // Class names practically never carry NUL or supplementary characters,
    // the only places where modified UTF-8 differs from standard UTF-8.
    std::str::from_utf8(raw)
        .map(str::to_string)
        .map_err(|_| ClassFileError::InvalidUtf8)
}

/// Test helper: a syntactically valid class file header declaring
/// `internal_name`.
#[cfg(test)]
pub(crate) fn synthesize(internal_name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&52u16.to_be_bytes());
    // #1 Long (takes #1 and #2), #3 Utf8 name, #4 Class -> #3, #5 Utf8 "java/lang/Object", #6 Class -> #5
    out.extend_from_slice(&7u16.to_be_bytes());
    out.push(5);
    out.extend_from_slice(&42u64.to_be_bytes());
    out.push(1);
    out.extend_from_slice(&(internal_name.len() as u16).to_be_bytes());
    out.extend_from_slice(internal_name.as_bytes());
    out.push(7);
    out.extend_from_slice(&3u16.to_be_bytes());
    out.push(1);
    let object = b"java/lang/Object";
    out.extend_from_slice(&(object.len() as u16).to_be_bytes());
    out.extend_from_slice(object);
    out.push(7);
    out.extend_from_slice(&5u16.to_be_bytes());
    // access_flags, this_class, super_class
    out.extend_from_slice(&0x0021u16.to_be_bytes());
    out.extend_from_slice(&4u16.to_be_bytes());
    out.extend_from_slice(&6u16.to_be_bytes());
    // interfaces, fields, methods, attributes
    out.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0]);
    out
}
