//! In-memory PostgreSQL backend for driving `Conn` without a server.
//!
//! The backend parses every frame the client writes, answers the startup
//! handshake itself and hands everything after it to a test-supplied
//! responder. Replies are queued and served to the client's reads in order.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use md5::Md5;
use sha2::{Digest, Sha256};
use wirepg::protocol::codec::write_frame;

pub const SCRAM_SALT: &[u8] = b"wirepg-salt-0001";
pub const SCRAM_ITERATIONS: u32 = 4096;

/// Frame as the client wrote it. The startup packet has type byte 0.
pub type Frame = (u8, Vec<u8>);

pub type Responder = Box<dyn FnMut(u8, &[u8]) -> Vec<u8> + Send>;

pub enum Auth {
    Trust,
    Cleartext(&'static str),
    Md5(&'static str),
    Scram(&'static str),
    /// SCRAM where the server-final signature is wrong
    ScramBadSignature(&'static str),
    /// SASL offering only a mechanism the client does not implement
    SaslUnknownMechanism,
}

enum Phase {
    Startup,
    Password,
    SaslInitial,
    SaslFinal { client_first_bare: String, server_first: String },
    Ready,
}

pub struct MockBackend {
    auth: Auth,
    phase: Phase,
    user: String,
    inbox: Vec<u8>,
    outgoing: VecDeque<u8>,
    log: Arc<Mutex<Vec<Frame>>>,
    responder: Responder,
}

impl MockBackend {
    pub fn new(auth: Auth, responder: impl FnMut(u8, &[u8]) -> Vec<u8> + Send + 'static) -> Self {
        Self {
            auth,
            phase: Phase::Startup,
            user: String::new(),
            inbox: Vec::new(),
            outgoing: VecDeque::new(),
            log: Arc::new(Mutex::new(Vec::new())),
            responder: Box::new(responder),
        }
    }

    /// A backend that only handles startup.
    pub fn trust() -> Self {
        Self::new(Auth::Trust, |_, _| Vec::new())
    }

    /// Shared view of the frames the client has written.
    pub fn log(&self) -> Arc<Mutex<Vec<Frame>>> {
        Arc::clone(&self.log)
    }

    fn push(&mut self, bytes: &[u8]) {
        self.outgoing.extend(bytes);
    }

    fn take_frames(&mut self) {
        loop {
            let startup = matches!(self.phase, Phase::Startup);
            let header = if startup { 4 } else { 5 };
            if self.inbox.len() < header {
                return;
            }
            let (type_byte, len_at) = if startup { (0, 0) } else { (self.inbox[0], 1) };
            let len = i32::from_be_bytes([
                self.inbox[len_at],
                self.inbox[len_at + 1],
                self.inbox[len_at + 2],
                self.inbox[len_at + 3],
            ]) as usize;
            let total = len_at + len;
            if self.inbox.len() < total {
                return;
            }
            let payload = self.inbox[len_at + 4..total].to_vec();
            self.inbox.drain(..total);
            self.log.lock().unwrap().push((type_byte, payload.clone()));
            self.handle(type_byte, &payload);
        }
    }

    fn handle(&mut self, type_byte: u8, payload: &[u8]) {
        match std::mem::replace(&mut self.phase, Phase::Ready) {
            Phase::Startup => self.on_startup(payload),
            Phase::Password => self.on_password(payload),
            Phase::SaslInitial => self.on_sasl_initial(payload),
            Phase::SaslFinal {
                client_first_bare,
                server_first,
            } => self.on_sasl_final(payload, &client_first_bare, &server_first),
            Phase::Ready => {
                let reply = (self.responder)(type_byte, payload);
                self.push(&reply);
            }
        }
    }

    fn on_startup(&mut self, payload: &[u8]) {
        assert_eq!(&payload[..4], &[0, 3, 0, 0]);
        let params = startup_params(&payload[4..]);
        self.user = params
            .iter()
            .find(|(k, _)| k == "user")
            .map(|(_, v)| v.clone())
            .unwrap_or_default();

        match self.auth {
            Auth::Trust => self.finish_startup(),
            Auth::Cleartext(_) => {
                self.push(&auth(3, b""));
                self.phase = Phase::Password;
            }
            Auth::Md5(_) => {
                self.push(&auth(5, &[1, 2, 3, 4]));
                self.phase = Phase::Password;
            }
            Auth::Scram(_) | Auth::ScramBadSignature(_) => {
                self.push(&auth(10, b"SCRAM-SHA-256\0\0"));
                self.phase = Phase::SaslInitial;
            }
            Auth::SaslUnknownMechanism => {
                self.push(&auth(10, b"SCRAM-SHA-512\0\0"));
                self.phase = Phase::SaslInitial;
            }
        }
    }

    fn on_password(&mut self, payload: &[u8]) {
        let sent = std::str::from_utf8(&payload[..payload.len() - 1]).unwrap();
        let expected = match self.auth {
            Auth::Cleartext(password) => password.to_string(),
            Auth::Md5(password) => md5_hash(&self.user, password, &[1, 2, 3, 4]),
            _ => unreachable!(),
        };
        if sent == expected {
            self.finish_startup();
        } else {
            self.push(&error(
                "FATAL",
                "28P01",
                &format!("password authentication failed for user \"{}\"", self.user),
            ));
        }
    }

    fn on_sasl_initial(&mut self, payload: &[u8]) {
        let nul = payload.iter().position(|&b| b == 0).unwrap();
        assert_eq!(&payload[..nul], b"SCRAM-SHA-256");
        let data = &payload[nul + 5..];
        let client_first = std::str::from_utf8(data).unwrap();
        let client_first_bare = client_first.strip_prefix("n,,").unwrap().to_string();
        let client_nonce = client_first_bare.split("r=").nth(1).unwrap();

        let server_first = format!(
            "r={client_nonce}srvNonce,s={},i={SCRAM_ITERATIONS}",
            BASE64.encode(SCRAM_SALT)
        );
        self.push(&auth(11, server_first.as_bytes()));
        self.phase = Phase::SaslFinal {
            client_first_bare,
            server_first,
        };
    }

    fn on_sasl_final(&mut self, payload: &[u8], client_first_bare: &str, server_first: &str) {
        let password = match self.auth {
            Auth::Scram(p) | Auth::ScramBadSignature(p) => p,
            _ => unreachable!(),
        };
        let client_final = std::str::from_utf8(payload).unwrap();
        let (without_proof, proof) = client_final.rsplit_once(",p=").unwrap();
        let proof = BASE64.decode(proof).unwrap();

        let mut salted = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), SCRAM_SALT, SCRAM_ITERATIONS, &mut salted);
        let client_key = hmac(&salted, b"Client Key");
        let stored_key = Sha256::digest(client_key);
        let auth_message = format!("{client_first_bare},{server_first},{without_proof}");
        let client_signature = hmac(&stored_key, auth_message.as_bytes());
        let recovered: Vec<u8> = proof
            .iter()
            .zip(client_signature.iter())
            .map(|(p, s)| p ^ s)
            .collect();

        if Sha256::digest(&recovered).as_slice() != stored_key.as_slice() {
            self.push(&error("FATAL", "28P01", "SCRAM proof mismatch"));
            return;
        }

        let server_key = hmac(&salted, b"Server Key");
        let mut signature = hmac(&server_key, auth_message.as_bytes());
        if matches!(self.auth, Auth::ScramBadSignature(_)) {
            signature[0] ^= 0xff;
        }
        let server_final = format!("v={}", BASE64.encode(signature));
        self.push(&auth(12, server_final.as_bytes()));
        self.finish_startup();
    }

    fn finish_startup(&mut self) {
        let mut out = auth(0, b"");
        out.extend(parameter_status("server_version", "16.3"));
        out.extend(parameter_status("client_encoding", "UTF8"));
        out.extend(frame(b'K', &[0, 0, 0, 42, 0, 0, 0, 7]));
        out.extend(ready(b'I'));
        self.push(&out);
        self.phase = Phase::Ready;
    }

    fn read_into(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.outgoing.len());
        for (slot, byte) in buf.iter_mut().zip(self.outgoing.drain(..n)) {
            *slot = byte;
        }
        n
    }

    fn write_from(&mut self, buf: &[u8]) -> usize {
        self.inbox.extend_from_slice(buf);
        self.take_frames();
        buf.len()
    }
}

impl Read for MockBackend {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(self.read_into(buf))
    }
}

impl Write for MockBackend {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(self.write_from(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl tokio::io::AsyncRead for MockBackend {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let n = this.read_into(buf.initialize_unfilled());
        buf.advance(n);
        Poll::Ready(Ok(()))
    }
}

impl tokio::io::AsyncWrite for MockBackend {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Poll::Ready(Ok(self.get_mut().write_from(buf)))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn startup_params(mut data: &[u8]) -> Vec<(String, String)> {
    let mut params = Vec::new();
    loop {
        let nul = data.iter().position(|&b| b == 0).unwrap();
        if nul == 0 {
            return params;
        }
        let key = String::from_utf8(data[..nul].to_vec()).unwrap();
        data = &data[nul + 1..];
        let nul = data.iter().position(|&b| b == 0).unwrap();
        let value = String::from_utf8(data[..nul].to_vec()).unwrap();
        data = &data[nul + 1..];
        params.push((key, value));
    }
}

fn hmac(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).unwrap();
    mac.update(data);
    mac.finalize().into_bytes().into()
}

pub fn md5_hash(user: &str, password: &str, salt: &[u8; 4]) -> String {
    let inner = format!("{:x}", Md5::digest(format!("{password}{user}")));
    let mut outer = Md5::new();
    outer.update(inner.as_bytes());
    outer.update(salt);
    format!("md5{:x}", outer.finalize())
}

/// Parameters of the startup packet the client sent.
pub fn sent_startup_params(log: &Arc<Mutex<Vec<Frame>>>) -> Vec<(String, String)> {
    let log = log.lock().unwrap();
    let (type_byte, payload) = &log[0];
    assert_eq!(*type_byte, 0);
    startup_params(&payload[4..])
}

/// Type bytes of every frame the client wrote, startup excluded.
pub fn sent_types(log: &Arc<Mutex<Vec<Frame>>>) -> Vec<u8> {
    log.lock()
        .unwrap()
        .iter()
        .skip(1)
        .map(|(t, _)| *t)
        .collect()
}

// === Server message builders ===

pub fn frame(type_byte: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    write_frame(&mut buf, type_byte, payload);
    buf
}

pub fn auth(code: i32, rest: &[u8]) -> Vec<u8> {
    let mut payload = code.to_be_bytes().to_vec();
    payload.extend_from_slice(rest);
    frame(b'R', &payload)
}

pub fn parameter_status(name: &str, value: &str) -> Vec<u8> {
    frame(b'S', format!("{name}\0{value}\0").as_bytes())
}

pub fn ready(status: u8) -> Vec<u8> {
    frame(b'Z', &[status])
}

pub fn command_complete(tag: &str) -> Vec<u8> {
    frame(b'C', format!("{tag}\0").as_bytes())
}

pub fn fields(severity: &str, code: &str, message: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    for (field, value) in [(b'S', severity), (b'V', severity), (b'C', code), (b'M', message)] {
        payload.push(field);
        payload.extend_from_slice(value.as_bytes());
        payload.push(0);
    }
    payload.push(0);
    payload
}

pub fn error(severity: &str, code: &str, message: &str) -> Vec<u8> {
    frame(b'E', &fields(severity, code, message))
}

pub fn notice(message: &str) -> Vec<u8> {
    frame(b'N', &fields("NOTICE", "00000", message))
}

/// RowDescription with text columns.
pub fn row_description(names: &[&str]) -> Vec<u8> {
    let mut payload = (names.len() as i16).to_be_bytes().to_vec();
    for name in names {
        payload.extend_from_slice(name.as_bytes());
        payload.push(0);
        payload.extend_from_slice(&0u32.to_be_bytes());
        payload.extend_from_slice(&0i16.to_be_bytes());
        payload.extend_from_slice(&25u32.to_be_bytes());
        payload.extend_from_slice(&(-1i16).to_be_bytes());
        payload.extend_from_slice(&(-1i32).to_be_bytes());
        payload.extend_from_slice(&0u16.to_be_bytes());
    }
    frame(b'T', &payload)
}

pub fn data_row(values: &[Option<&str>]) -> Vec<u8> {
    let mut payload = (values.len() as i16).to_be_bytes().to_vec();
    for value in values {
        match value {
            Some(v) => {
                payload.extend_from_slice(&(v.len() as i32).to_be_bytes());
                payload.extend_from_slice(v.as_bytes());
            }
            None => payload.extend_from_slice(&(-1i32).to_be_bytes()),
        }
    }
    frame(b'D', &payload)
}

pub fn parameter_description(oids: &[u32]) -> Vec<u8> {
    let mut payload = (oids.len() as i16).to_be_bytes().to_vec();
    for oid in oids {
        payload.extend_from_slice(&oid.to_be_bytes());
    }
    frame(b't', &payload)
}

/// Text of a Query or Parse payload up to its first NUL.
pub fn cstr(payload: &[u8]) -> &str {
    let nul = payload.iter().position(|&b| b == 0).unwrap();
    std::str::from_utf8(&payload[..nul]).unwrap()
}

/// A responder for the extended protocol that returns `rows` for every Execute.
pub fn extended_responder(rows: Vec<Vec<Option<&'static str>>>) -> Responder {
    Box::new(move |type_byte: u8, _payload: &[u8]| match type_byte {
        b'P' => frame(b'1', b""),
        b'B' => frame(b'2', b""),
        b'E' => {
            let mut out = Vec::new();
            for row in &rows {
                out.extend(data_row(row));
            }
            out.extend(command_complete(&format!("SELECT {}", rows.len())));
            out
        }
        b'D' => {
            let mut out = parameter_description(&[1043, 1043]);
            out.extend(row_description(&["table_name", "table_type"]));
            out
        }
        b'C' => frame(b'3', b""),
        b'S' => ready(b'I'),
        _ => Vec::new(),
    })
}
