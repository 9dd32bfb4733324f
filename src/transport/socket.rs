use std::{
    io::{self, Write as _},
    net::{Ipv4Addr, Shutdown, TcpStream, UdpSocket},
    time::Duration,
};

#[cfg(target_os = "linux")]
use std::os::unix::net::{UnixDatagram, UnixStream};

use super::RemoteAddr;

pub(crate) enum SocketWriter {
    Udp(UdpSocket),
    Tcp(TcpStream),

    #[cfg(target_os = "linux")]
    Unixgram(UnixDatagram),

    #[cfg(target_os = "linux")]
    Unix(UnixStream),

    #[cfg(test)]
    Mock(mock::PacketLog),
}

impl SocketWriter {
    pub fn connect(addr: &RemoteAddr, write_timeout: Duration) -> io::Result<Self> {
        let set_timeout = |timeout: Duration| {
            if timeout.is_zero() {
                None
            } else {
                Some(timeout)
            }
        };

        match addr {
            RemoteAddr::Udp(addrs) => {
                UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).and_then(|socket| {
                    socket.connect(&addrs[..])?;
                    socket.set_write_timeout(set_timeout(write_timeout))?;
                    Ok(SocketWriter::Udp(socket))
                })
            }

            RemoteAddr::Tcp(addrs) => TcpStream::connect(&addrs[..]).and_then(|socket| {
                socket.set_write_timeout(set_timeout(write_timeout))?;
                Ok(SocketWriter::Tcp(socket))
            }),

            #[cfg(target_os = "linux")]
            RemoteAddr::Unixgram(path) => UnixDatagram::unbound().and_then(|socket| {
                socket.connect(path)?;
                socket.set_write_timeout(set_timeout(write_timeout))?;
                Ok(SocketWriter::Unixgram(socket))
            }),

            #[cfg(target_os = "linux")]
            RemoteAddr::Unix(path) => UnixStream::connect(path).and_then(|socket| {
                socket.set_write_timeout(set_timeout(write_timeout))?;
                Ok(SocketWriter::Unix(socket))
            }),
        }
    }

    pub fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            SocketWriter::Udp(socket) => socket.send(buf),
            SocketWriter::Tcp(socket) => socket.write_all(buf).map(|()| buf.len()),

            #[cfg(target_os = "linux")]
            SocketWriter::Unixgram(socket) => socket.send(buf),

            #[cfg(target_os = "linux")]
            SocketWriter::Unix(socket) => socket.write_all(buf).map(|()| buf.len()),

            #[cfg(test)]
            SocketWriter::Mock(log) => log.send(buf),
        }
    }

    /// Releases the socket, shutting down stream transports cleanly.
    ///
    /// Datagram sockets have no shutdown handshake and are simply dropped.
    pub fn release(self) -> io::Result<()> {
        match self {
            SocketWriter::Udp(_) => Ok(()),
            SocketWriter::Tcp(socket) => socket.shutdown(Shutdown::Both),

            #[cfg(target_os = "linux")]
            SocketWriter::Unixgram(_) => Ok(()),

            #[cfg(target_os = "linux")]
            SocketWriter::Unix(socket) => socket.shutdown(Shutdown::Both),

            #[cfg(test)]
            SocketWriter::Mock(_) => Ok(()),
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::{
        io,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc, Mutex,
        },
    };

    /// A socket stand-in that records every packet handed to it.
    #[derive(Clone, Default)]
    pub(crate) struct PacketLog {
        packets: Arc<Mutex<Vec<Vec<u8>>>>,
        failing: Arc<AtomicBool>,
    }

    impl PacketLog {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
            if self.failing.load(Ordering::Relaxed) {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "daemon away"));
            }

            self.packets.lock().unwrap().push(buf.to_vec());
            Ok(buf.len())
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::Relaxed);
        }

        pub fn packets(&self) -> Vec<Vec<u8>> {
            self.packets.lock().unwrap().clone()
        }
    }
}
