use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

/// A duplex byte stream usable as a serial link.
///
/// The transport reads from one handle on a background thread and writes
/// through another, so the stream must be clonable. Serial adapters, pipes
/// and sockets (serial-over-TCP bridges) all fit.
pub trait SerialPort: Read + Write + Send + fmt::Debug + Sized + 'static {
    /// Second handle onto the same stream.
    fn try_clone_port(&self) -> io::Result<Self>;

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Wake up blocked readers and refuse further I/O.
    fn shutdown(&self) -> io::Result<()>;

    fn port_name(&self) -> String;
}

#[cfg(unix)]
impl SerialPort for std::os::unix::net::UnixStream {
    fn try_clone_port(&self) -> io::Result<Self> {
        self.try_clone()
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        std::os::unix::net::UnixStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        std::os::unix::net::UnixStream::set_write_timeout(self, timeout)
    }

    fn shutdown(&self) -> io::Result<()> {
        std::os::unix::net::UnixStream::shutdown(self, Shutdown::Both)
    }

    fn port_name(&self) -> String {
        match self.peer_addr().ok().and_then(|a| a.as_pathname().map(|p| p.display().to_string())) {
            Some(path) => path,
            None => "unix-stream".into(),
        }
    }
}

impl SerialPort for TcpStream {
    fn try_clone_port(&self) -> io::Result<Self> {
        self.try_clone()
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_write_timeout(self, timeout)
    }

    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }

    fn port_name(&self) -> String {
        self.peer_addr()
            .map(|a| format!("tcp://{a}"))
            .unwrap_or_else(|_| "tcp".into())
    }
}
