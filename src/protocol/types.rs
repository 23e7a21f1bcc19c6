//! Common PostgreSQL wire protocol types.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// PostgreSQL Object Identifier (OID)
pub type Oid = u32;

/// Type OIDs from `pg_type` that parameters and result columns commonly use.
pub mod oid {
    use super::Oid;

    pub const BOOL: Oid = 16;
    pub const BYTEA: Oid = 17;
    pub const INT8: Oid = 20;
    pub const INT2: Oid = 21;
    pub const INT4: Oid = 23;
    pub const TEXT: Oid = 25;
    pub const FLOAT4: Oid = 700;
    pub const FLOAT8: Oid = 701;
    pub const BPCHAR: Oid = 1042;
    pub const VARCHAR: Oid = 1043;
    pub const DATE: Oid = 1082;
    pub const TIMESTAMP: Oid = 1114;
    pub const TIMESTAMPTZ: Oid = 1184;
    pub const NUMERIC: Oid = 1700;
    pub const UUID: Oid = 2950;
    pub const JSONB: Oid = 3802;
}

/// Format code of a parameter or column. Only text is ever requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum FormatCode {
    #[default]
    Text = 0,
    Binary = 1,
}

impl FormatCode {
    /// Unknown codes are treated as text.
    pub fn from_u16(value: u16) -> Self {
        if value == 1 { Self::Binary } else { Self::Text }
    }
}

/// Status byte of ReadyForQuery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TransactionStatus {
    #[default]
    Idle = b'I',
    InTransaction = b'T',
    /// Statements are rejected until the block is rolled back
    Failed = b'E',
}

impl TransactionStatus {
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            b'I' => Some(Self::Idle),
            b'T' => Some(Self::InTransaction),
            b'E' => Some(Self::Failed),
            _ => None,
        }
    }

    /// Inside a transaction block, failed or not.
    pub fn in_transaction(self) -> bool {
        self != Self::Idle
    }
}

/// Big-endian integers that can be cast straight out of a payload.
macro_rules! big_endian {
    ($($name:ident($native:ty, $len:literal);)*) => {$(
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
        #[repr(C)]
        pub struct $name([u8; $len]);

        impl $name {
            pub const fn new(value: $native) -> Self {
                Self(value.to_be_bytes())
            }

            pub const fn get(self) -> $native {
                <$native>::from_be_bytes(self.0)
            }
        }
    )*};
}

big_endian! {
    U16BE(u16, 2);
    I16BE(i16, 2);
    U32BE(u32, 4);
    I32BE(i32, 4);
}
