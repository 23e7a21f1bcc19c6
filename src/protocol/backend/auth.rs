//! Startup and authentication backend messages.

use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_bytes, read_cstr, read_i32, read_u32};
use crate::protocol::types::{TransactionStatus, U32BE};

/// Authentication request codes (leading int32 of an 'R' message).
pub mod auth_code {
    pub const OK: i32 = 0;
    pub const KERBEROS_V5: i32 = 2;
    pub const CLEARTEXT_PASSWORD: i32 = 3;
    pub const MD5_PASSWORD: i32 = 5;
    pub const GSS: i32 = 7;
    pub const GSS_CONTINUE: i32 = 8;
    pub const SSPI: i32 = 9;
    pub const SASL: i32 = 10;
    pub const SASL_CONTINUE: i32 = 11;
    pub const SASL_FINAL: i32 = 12;
}

/// SASL mechanism this client implements.
pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// Authentication request or result sent by the server.
#[derive(Debug, PartialEq, Eq)]
pub enum AuthenticationMessage<'a> {
    Ok,
    KerberosV5,
    CleartextPassword,
    Md5Password { salt: [u8; 4] },
    Gss,
    GssContinue { data: &'a [u8] },
    Sspi,
    /// SASL requested; mechanisms in server preference order
    Sasl { mechanisms: Vec<&'a str> },
    /// server-first-message
    SaslContinue { data: &'a [u8] },
    /// server-final-message
    SaslFinal { data: &'a [u8] },
}

impl<'a> AuthenticationMessage<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (code, rest) = read_i32(payload)?;

        let message = match code {
            auth_code::OK => Self::Ok,
            auth_code::KERBEROS_V5 => Self::KerberosV5,
            auth_code::CLEARTEXT_PASSWORD => Self::CleartextPassword,
            auth_code::MD5_PASSWORD => {
                let (bytes, _) = read_bytes(rest, 4)
                    .map_err(|_| Error::Protocol("AuthenticationMD5Password: missing salt".into()))?;
                let mut salt = [0u8; 4];
                salt.copy_from_slice(bytes);
                Self::Md5Password { salt }
            }
            auth_code::GSS => Self::Gss,
            auth_code::GSS_CONTINUE => Self::GssContinue { data: rest },
            auth_code::SSPI => Self::Sspi,
            auth_code::SASL => {
                let mut mechanisms = Vec::new();
                let mut data = rest;
                while let Some(&first) = data.first() {
                    if first == 0 {
                        break;
                    }
                    let (mechanism, remaining) = read_cstr(data)?;
                    mechanisms.push(mechanism);
                    data = remaining;
                }
                Self::Sasl { mechanisms }
            }
            auth_code::SASL_CONTINUE => Self::SaslContinue { data: rest },
            auth_code::SASL_FINAL => Self::SaslFinal { data: rest },
            other => {
                return Err(Error::Protocol(format!(
                    "unknown authentication request code {other}"
                )));
            }
        };
        Ok(message)
    }

    /// Human-readable name for log and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ok => "AuthenticationOk",
            Self::KerberosV5 => "AuthenticationKerberosV5",
            Self::CleartextPassword => "AuthenticationCleartextPassword",
            Self::Md5Password { .. } => "AuthenticationMD5Password",
            Self::Gss => "AuthenticationGSS",
            Self::GssContinue { .. } => "AuthenticationGSSContinue",
            Self::Sspi => "AuthenticationSSPI",
            Self::Sasl { .. } => "AuthenticationSASL",
            Self::SaslContinue { .. } => "AuthenticationSASLContinue",
            Self::SaslFinal { .. } => "AuthenticationSASLFinal",
        }
    }
}

/// BackendKeyData: process ID and secret key for cancel requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct BackendKeyData {
    pid: U32BE,
    secret_key: U32BE,
}

impl BackendKeyData {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Self::read_from_bytes(payload)
            .map_err(|e| Error::Protocol(format!("BackendKeyData: {e:?}")))
    }

    pub fn process_id(&self) -> u32 {
        self.pid.get()
    }

    pub fn secret_key(&self) -> u32 {
        self.secret_key.get()
    }
}

/// ParameterStatus: one server run-time parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterStatus<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

impl<'a> ParameterStatus<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (name, rest) = read_cstr(payload)?;
        let (value, _) = read_cstr(rest)?;
        Ok(Self { name, value })
    }
}

/// ReadyForQuery: the server is idle.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct ReadyForQuery {
    status: u8,
}

impl ReadyForQuery {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Self::read_from_bytes(payload)
            .map_err(|e| Error::Protocol(format!("ReadyForQuery: {e:?}")))
    }

    pub fn transaction_status(&self) -> Result<TransactionStatus> {
        TransactionStatus::from_byte(self.status).ok_or_else(|| {
            Error::Protocol(format!(
                "ReadyForQuery: unknown transaction status {:?}",
                self.status as char
            ))
        })
    }
}

/// NegotiateProtocolVersion: the server only speaks an older minor version.
#[derive(Debug, Clone)]
pub struct NegotiateProtocolVersion<'a> {
    pub newest_minor_version: u32,
    pub unrecognized_options: Vec<&'a str>,
}

impl<'a> NegotiateProtocolVersion<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (newest_minor_version, rest) = read_u32(payload)?;
        let (count, mut rest) = read_u32(rest)?;

        let mut unrecognized_options = Vec::new();
        for _ in 0..count {
            let (option, remaining) = read_cstr(rest)?;
            unrecognized_options.push(option);
            rest = remaining;
        }

        Ok(Self {
            newest_minor_version,
            unrecognized_options,
        })
    }
}
