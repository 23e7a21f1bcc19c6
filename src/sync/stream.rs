//! Default blocking transport.

use std::io::{Read, Write};
use std::net::TcpStream;
#[cfg(unix)]
use std::os::unix::net::UnixStream;

use crate::error::{Error, Result};
use crate::opts::Opts;

/// TCP or Unix-domain socket.
///
/// Any other `Read + Write` transport (a TLS stream, an in-memory pipe) can
/// be handed to [`Conn::new_with_stream`](super::Conn::new_with_stream).
#[derive(Debug)]
pub enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Stream {
    /// Open the socket described by `opts`. `socket` takes precedence over `host`.
    pub fn connect(opts: &Opts) -> Result<Self> {
        if let Some(path) = &opts.socket {
            #[cfg(unix)]
            {
                return Ok(Self::Unix(UnixStream::connect(path)?));
            }
            #[cfg(not(unix))]
            {
                return Err(Error::Unsupported(format!("unix socket {path}")));
            }
        }

        if opts.host.is_empty() {
            return Err(Error::InvalidUsage("host is empty".into()));
        }
        let tcp = TcpStream::connect((opts.host.as_str(), opts.port))?;
        tcp.set_nodelay(true)?;
        Ok(Self::Tcp(tcp))
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Stream::Unix(s) => s.flush(),
        }
    }
}
