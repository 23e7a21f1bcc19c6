//! Result-set backend messages: RowDescription, DataRow, CommandComplete.

use std::mem::size_of;

use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_bytes, read_cstr, read_i16, read_i32};
use crate::protocol::types::{FormatCode, I16BE, I32BE, Oid, U16BE, U32BE};

/// Fixed 18-byte tail that follows each column name in a RowDescription.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct FieldDescriptionTail {
    pub table_oid: U32BE,
    pub column_id: I16BE,
    pub type_oid: U32BE,
    pub type_size: I16BE,
    pub type_modifier: I32BE,
    pub format: U16BE,
}

/// One result column as announced by RowDescription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Owning table (0 if the column is computed)
    pub table_oid: Oid,
    /// Attribute number within the table (0 if computed)
    pub column_id: i16,
    pub type_oid: Oid,
    /// Negative values denote variable-width types
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: FormatCode,
}

impl ColumnDescriptor {
    fn new(name: &str, tail: &FieldDescriptionTail) -> Self {
        Self {
            name: name.to_string(),
            table_oid: tail.table_oid.get(),
            column_id: tail.column_id.get(),
            type_oid: tail.type_oid.get(),
            type_size: tail.type_size.get(),
            type_modifier: tail.type_modifier.get(),
            format: FormatCode::from_u16(tail.format.get()),
        }
    }
}

/// RowDescription ('T').
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowDescription {
    pub columns: Vec<ColumnDescriptor>,
}

impl RowDescription {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        const TAIL_SIZE: usize = size_of::<FieldDescriptionTail>();

        let (count, mut data) = read_i16(payload)?;
        let mut columns = Vec::with_capacity(count.max(0) as usize);

        for _ in 0..count {
            let (name, rest) = read_cstr(data)?;
            let (tail, rest) = read_bytes(rest, TAIL_SIZE)?;
            let tail = FieldDescriptionTail::ref_from_bytes(tail)
                .map_err(|e| Error::Protocol(format!("RowDescription field: {e:?}")))?;
            columns.push(ColumnDescriptor::new(name, tail));
            data = rest;
        }

        Ok(Self { columns })
    }
}

/// DataRow ('D').
#[derive(Debug, Clone, Copy)]
pub struct DataRow<'a> {
    count: usize,
    data: &'a [u8],
}

impl<'a> DataRow<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (count, data) = read_i16(payload)?;
        if count < 0 {
            return Err(Error::Protocol(format!("DataRow: negative column count {count}")));
        }
        Ok(Self {
            count: count as usize,
            data,
        })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Raw column values in wire order; `None` is SQL NULL.
    ///
    /// A length of -1 consumes no value bytes.
    pub fn raw_values(&self) -> Result<Vec<Option<&'a [u8]>>> {
        let mut values = Vec::with_capacity(self.count);
        let mut data = self.data;
        for _ in 0..self.count {
            let (len, rest) = read_i32(data)?;
            if len == -1 {
                values.push(None);
                data = rest;
                continue;
            }
            if len < 0 {
                return Err(Error::Protocol(format!("DataRow: invalid value length {len}")));
            }
            let (value, rest) = read_bytes(rest, len as usize)?;
            values.push(Some(value));
            data = rest;
        }
        Ok(values)
    }

    /// Column values decoded as text.
    ///
    /// Binary-format values are decoded lossily; the client does not interpret them.
    pub fn text_values(&self) -> Result<Vec<Option<String>>> {
        Ok(self
            .raw_values()?
            .into_iter()
            .map(|value| value.map(decode_text))
            .collect())
    }
}

fn decode_text(bytes: &[u8]) -> String {
    match simdutf8::basic::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// CommandComplete ('C').
#[derive(Debug, Clone, Copy)]
pub struct CommandComplete<'a> {
    /// e.g. "SELECT 5", "INSERT 0 1", "CREATE TABLE"
    pub tag: &'a str,
}

impl<'a> CommandComplete<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (tag, _) = read_cstr(payload)?;
        Ok(Self { tag })
    }

    /// Row count carried by the tag, if the command reports one.
    pub fn rows_affected(&self) -> Option<u64> {
        let parts: Vec<&str> = self.tag.split_whitespace().collect();
        match parts.as_slice() {
            ["INSERT", _oid, count] => count.parse().ok(),
            ["SELECT" | "UPDATE" | "DELETE" | "MERGE" | "COPY" | "MOVE" | "FETCH", count] => {
                count.parse().ok()
            }
            _ => None,
        }
    }

    /// Leading command word of the tag.
    pub fn command(&self) -> Option<&'a str> {
        self.tag.split_whitespace().next()
    }
}
