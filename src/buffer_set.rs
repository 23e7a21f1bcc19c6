//! Buffers shared between a driver and the state machines it runs.

/// Buffers for one connection.
///
/// The driver fills `type_byte` and `read_buffer` with the last frame read;
/// state machines fill `write_buffer` with frames to send.
#[derive(Debug)]
pub struct BufferSet {
    /// Payload of the last frame read (length field stripped)
    pub read_buffer: Vec<u8>,
    /// Frames waiting to be written
    pub write_buffer: Vec<u8>,
    /// Type byte of the last frame read
    pub type_byte: u8,
}

impl BufferSet {
    pub fn new() -> Self {
        Self {
            read_buffer: Vec::with_capacity(8192),
            write_buffer: Vec::with_capacity(8192),
            type_byte: 0,
        }
    }
}

impl Default for BufferSet {
    fn default() -> Self {
        Self::new()
    }
}
