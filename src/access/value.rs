use bytes::{Buf, BufMut};

use crate::storage::error::{StorageError, StorageResult};

/// Maximum number of bytes stored for a string field.
pub const STRING_LEN: usize = 128;

/// Field types supported by the engine. Every type has a fixed width.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Int = 1,
    String = 2,
}

impl Type {
    pub fn from_u8(value: u8) -> StorageResult<Self> {
        match value {
            1 => Ok(Type::Int),
            2 => Ok(Type::String),
            _ => Err(StorageError::SchemaMismatch(format!(
                "unknown type tag {}",
                value
            ))),
        }
    }

    /// Serialized width in bytes.
    pub fn size(&self) -> usize {
        match self {
            Type::Int => 4,
            // length prefix + padded payload
            Type::String => 4 + STRING_LEN,
        }
    }

    /// Reads one field of this type from `buf`.
    pub fn parse(&self, buf: &mut impl Buf) -> StorageResult<Field> {
        if buf.remaining() < self.size() {
            return Err(StorageError::SchemaMismatch(format!(
                "{} field needs {} bytes, {} left",
                self,
                self.size(),
                buf.remaining()
            )));
        }
        match self {
            Type::Int => Ok(Field::Int(buf.get_i32())),
            Type::String => {
                let len = (buf.get_i32().max(0) as usize).min(STRING_LEN);
                let mut payload = vec![0u8; STRING_LEN];
                buf.copy_to_slice(&mut payload);
                payload.truncate(len);
                let s = String::from_utf8(payload).map_err(|e| {
                    StorageError::SchemaMismatch(format!("string field is not utf-8: {}", e))
                })?;
                Ok(Field::Str(s))
            }
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Int => write!(f, "INT"),
            Type::String => write!(f, "STRING"),
        }
    }
}

impl std::str::FromStr for Type {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int" | "integer" => Ok(Type::Int),
            "string" | "str" | "text" => Ok(Type::String),
            other => Err(StorageError::SchemaMismatch(format!(
                "unknown type name {:?}",
                other
            ))),
        }
    }
}

/// A typed field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Int(i32),
    Str(String),
}

impl Field {
    pub fn field_type(&self) -> Type {
        match self {
            Field::Int(_) => Type::Int,
            Field::Str(_) => Type::String,
        }
    }

    /// The value as it will be stored: strings longer than [`STRING_LEN`]
    /// bytes are cut at the last char boundary that fits.
    pub fn fitted(self) -> Field {
        match self {
            Field::Str(mut s) => {
                s.truncate(stored_len(&s));
                Field::Str(s)
            }
            other => other,
        }
    }

    /// Writes the fixed-width encoding.
    pub fn serialize(&self, buf: &mut impl BufMut) {
        match self {
            Field::Int(v) => buf.put_i32(*v),
            Field::Str(s) => {
                let bytes = &s.as_bytes()[..stored_len(s)];
                buf.put_i32(bytes.len() as i32);
                buf.put_slice(bytes);
                buf.put_bytes(0, STRING_LEN - bytes.len());
            }
        }
    }
}

/// Bytes of `s` that fit in a string field without splitting a char.
fn stored_len(s: &str) -> usize {
    let mut end = s.len().min(STRING_LEN);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Field::Int(v) => write!(f, "{}", v),
            Field::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<i32> for Field {
    fn from(v: i32) -> Self {
        Field::Int(v)
    }
}

impl From<&str> for Field {
    fn from(s: &str) -> Self {
        Field::Str(s[..stored_len(s)].to_string())
    }
}

impl From<String> for Field {
    fn from(s: String) -> Self {
        Field::Str(s).fitted()
    }
}
