//! I/O requests emitted by state machines.

/// What the driver must do before calling `step()` again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Read one frame into the buffer set.
    ///
    /// The driver reads the type byte, the length (big-endian i32 that counts
    /// itself) and `length - 4` payload bytes.
    ReadMessage,

    /// Write and flush `buffer_set.write_buffer`.
    Write,

    /// Write and flush `buffer_set.write_buffer`, then read one frame.
    WriteAndReadMessage,

    /// Apply an asynchronous message to the connection, then read one frame.
    HandleAsyncMessageAndReadMessage(AsyncMessage),

    /// The exchange is complete.
    Finished,
}

/// Message the server may send between any two responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsyncMessage {
    /// A run-time parameter changed (ParameterStatus after startup).
    ParameterChanged { name: String, value: String },
}
