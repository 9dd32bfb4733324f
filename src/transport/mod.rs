use std::{
    io,
    net::{SocketAddr, ToSocketAddrs as _},
    sync::{Arc, Weak},
    thread::JoinHandle,
    time::Duration,
};

#[cfg(target_os = "linux")]
use std::path::PathBuf;

use bytes::BytesMut;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{error, trace};

mod socket;
pub(crate) use self::socket::SocketWriter;

#[cfg(test)]
pub(crate) use self::socket::mock::PacketLog;

pub(crate) type ErrorHandler = Box<dyn Fn(io::Error) + Send + Sync>;

#[derive(Clone)]
pub(crate) enum RemoteAddr {
    Udp(Vec<SocketAddr>),
    Tcp(Vec<SocketAddr>),

    #[cfg(target_os = "linux")]
    Unixgram(PathBuf),

    #[cfg(target_os = "linux")]
    Unix(PathBuf),
}

impl RemoteAddr {
    /// Returns the transport ID for the remote address.
    ///
    /// This is a simple acronym related to the transport that will be used
    /// for the remote address, such as `udp` for UDP, and so on.
    pub const fn transport_id(&self) -> &'static str {
        match self {
            RemoteAddr::Udp(_) => "udp",
            RemoteAddr::Tcp(_) => "tcp",

            #[cfg(target_os = "linux")]
            RemoteAddr::Unixgram(_) => "uds",

            #[cfg(target_os = "linux")]
            RemoteAddr::Unix(_) => "uds-stream",
        }
    }
}

fn resolve(addr: &str) -> Result<Vec<SocketAddr>, String> {
    match addr.to_socket_addrs() {
        Ok(addrs) => Ok(addrs.collect()),
        Err(e) => Err(e.to_string()),
    }
}

impl<'a> TryFrom<&'a str> for RemoteAddr {
    type Error = String;

    fn try_from(addr: &'a str) -> Result<Self, Self::Error> {
        if let Some((scheme, rest)) = addr.split_once("://") {
            return match scheme {
                "udp" => resolve(rest).map(RemoteAddr::Udp),
                "tcp" => resolve(rest).map(RemoteAddr::Tcp),

                #[cfg(target_os = "linux")]
                "unix" => Ok(RemoteAddr::Unix(PathBuf::from(rest))),

                #[cfg(target_os = "linux")]
                "unixgram" => Ok(RemoteAddr::Unixgram(PathBuf::from(rest))),

                _ => Err(format!("invalid scheme '{scheme}'")),
            };
        }

        resolve(addr).map(RemoteAddr::Udp)
    }
}

struct Inner {
    buf: BytesMut,
    socket: Option<SocketWriter>,
    closed: bool,
}

struct FlusherHandle {
    shutdown_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// The buffering engine behind every client handle.
///
/// Holds the outbound socket, the pending-packet buffer, and the closed flag
/// under a single mutex. Socket writes happen while the lock is held, so
/// packets reach the wire in the same order their buffers were sealed. An
/// optional background thread flushes the buffer every flush period; it is
/// stopped and joined inside `close`, so it can never touch a released
/// socket.
pub(crate) struct Transport {
    inner: Mutex<Inner>,
    max_packet_size: usize,
    error_handler: ErrorHandler,
    flusher: Mutex<Option<FlusherHandle>>,
}

impl Transport {
    /// Starts a transport over the given socket.
    ///
    /// When `flush_period` is non-zero, a named background thread is spawned
    /// to flush the buffer on every period tick; a zero period means the
    /// buffer is only flushed on overflow or on an explicit flush/close.
    pub fn start(
        socket: SocketWriter,
        max_packet_size: usize,
        flush_period: Duration,
        error_handler: ErrorHandler,
    ) -> io::Result<Arc<Self>> {
        let transport = Arc::new(Transport {
            inner: Mutex::new(Inner {
                buf: BytesMut::with_capacity(max_packet_size),
                socket: Some(socket),
                closed: false,
            }),
            max_packet_size,
            error_handler,
            flusher: Mutex::new(None),
        });

        if !flush_period.is_zero() {
            let (shutdown_tx, shutdown_rx) = bounded(1);
            let weak = Arc::downgrade(&transport);
            let handle = std::thread::Builder::new()
                .name("statsd-client-flusher".to_string())
                .spawn(move || run_flusher(&weak, &shutdown_rx, flush_period))?;

            *transport.flusher.lock() = Some(FlusherHandle { shutdown_tx, handle });
        }

        Ok(transport)
    }

    /// Creates a transport that was never connected.
    ///
    /// Used when construction of the real endpoint fails: the client still
    /// gets a transport to hang on to, but it is born closed, so every
    /// operation on it is a no-op.
    pub fn disconnected() -> Arc<Self> {
        Arc::new(Transport {
            inner: Mutex::new(Inner { buf: BytesMut::new(), socket: None, closed: true }),
            max_packet_size: 0,
            error_handler: Box::new(|_| {}),
            flusher: Mutex::new(None),
        })
    }

    /// Buffers one formatted, newline-terminated metric line.
    ///
    /// If appending the line would push the buffer past the maximum packet
    /// size, the buffered content is sent first and the line starts a fresh
    /// buffer. A line that alone exceeds the maximum is sent standalone:
    /// the size bound is there to avoid fragmentation, not to lose calls.
    pub fn emit(&self, line: &[u8]) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }

        if !inner.buf.is_empty() && inner.buf.len() + line.len() > self.max_packet_size {
            self.flush_locked(&mut inner);
        }

        if line.len() > self.max_packet_size {
            self.send_line_locked(&mut inner, line);
        } else {
            inner.buf.extend_from_slice(line);
        }
    }

    /// Sends the buffered lines as one packet and clears the buffer.
    ///
    /// An empty buffer is a true no-op: no syscall is made.
    pub fn flush(&self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }

        self.flush_locked(&mut inner);
    }

    /// Stops the flush thread, drains the buffer, and releases the socket.
    ///
    /// The flush thread is joined before the socket is torn down, so no tick
    /// can fire once close has begun. Tolerates being called more than once;
    /// every operation after the first close is a no-op.
    pub fn close(&self) {
        if let Some(flusher) = self.flusher.lock().take() {
            // Disconnecting the channel wakes the thread out of its timed wait.
            drop(flusher.shutdown_tx);
            if flusher.handle.join().is_err() {
                error!("flush thread panicked during shutdown");
            }
        }

        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }

        self.flush_locked(&mut inner);
        if let Some(socket) = inner.socket.take() {
            if let Err(e) = socket.release() {
                (self.error_handler)(e);
            }
        }
        inner.closed = true;
    }

    fn flush_locked(&self, inner: &mut Inner) {
        if inner.buf.is_empty() {
            return;
        }

        let Inner { buf, socket, .. } = inner;
        if let Some(socket) = socket.as_mut() {
            trace!(bytes = buf.len(), "sending metrics packet");
            if let Err(e) = socket.send(buf) {
                error!(error = %e, "failed to send metrics packet");
                (self.error_handler)(e);
            }
        }
        buf.clear();
    }

    fn send_line_locked(&self, inner: &mut Inner, line: &[u8]) {
        if let Some(socket) = inner.socket.as_mut() {
            trace!(bytes = line.len(), "sending oversized metric line standalone");
            if let Err(e) = socket.send(line) {
                error!(error = %e, "failed to send metrics packet");
                (self.error_handler)(e);
            }
        }
    }
}

fn run_flusher(transport: &Weak<Transport>, shutdown: &Receiver<()>, period: Duration) {
    loop {
        match shutdown.recv_timeout(period) {
            Err(RecvTimeoutError::Timeout) => match transport.upgrade() {
                Some(transport) => transport.flush(),
                // Every client handle is gone; nothing left to flush for.
                None => break,
            },
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{Arc, Mutex},
        thread::sleep,
        time::{Duration, Instant},
    };

    use proptest::{collection::vec as arb_vec, prelude::*, proptest};

    use super::{socket::mock::PacketLog, RemoteAddr, SocketWriter, Transport};

    fn mock_transport(
        max_packet_size: usize,
        flush_period: Duration,
    ) -> (Arc<Transport>, PacketLog) {
        let log = PacketLog::new();
        let transport = Transport::start(
            SocketWriter::Mock(log.clone()),
            max_packet_size,
            flush_period,
            Box::new(|_| {}),
        )
        .unwrap();
        (transport, log)
    }

    fn wait_for_packets(log: &PacketLog, count: usize) -> Vec<Vec<u8>> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let packets = log.packets();
            if packets.len() >= count {
                return packets;
            }
            assert!(Instant::now() < deadline, "timed out waiting for {count} packet(s)");
            sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn batches_lines_into_a_single_packet() {
        let (transport, log) = mock_transport(1440, Duration::ZERO);

        transport.emit(b"requests:1|c\n");
        transport.emit(b"latency:25|ms\n");
        transport.emit(b"depth:3|g\n");
        transport.flush();

        assert_eq!(log.packets(), vec![b"requests:1|c\nlatency:25|ms\ndepth:3|g\n".to_vec()]);
    }

    #[test]
    fn overflow_seals_previous_packet_first() {
        let line = b"aaaaaa:1|c\n";
        let (transport, log) = mock_transport(line.len() + 4, Duration::ZERO);

        transport.emit(line);
        transport.emit(line);
        transport.flush();

        assert_eq!(log.packets(), vec![line.to_vec(), line.to_vec()]);
    }

    #[test]
    fn flush_of_empty_buffer_is_a_noop() {
        let (transport, log) = mock_transport(1440, Duration::ZERO);

        transport.flush();
        transport.flush();

        assert!(log.packets().is_empty());
    }

    #[test]
    fn oversized_line_goes_out_standalone() {
        let (transport, log) = mock_transport(16, Duration::ZERO);

        transport.emit(b"ok:1|c\n");
        transport.emit(b"a.very.long.bucket.name:1|c\n");
        transport.flush();

        // The buffered line is sealed first, then the oversized one ships on
        // its own; nothing is left behind for the explicit flush.
        assert_eq!(
            log.packets(),
            vec![b"ok:1|c\n".to_vec(), b"a.very.long.bucket.name:1|c\n".to_vec()]
        );
    }

    #[test]
    fn close_drains_and_terminates() {
        let (transport, log) = mock_transport(1440, Duration::ZERO);

        transport.emit(b"requests:1|c\n");
        transport.close();
        assert_eq!(log.packets(), vec![b"requests:1|c\n".to_vec()]);

        transport.emit(b"requests:2|c\n");
        transport.flush();
        transport.close();
        assert_eq!(log.packets(), vec![b"requests:1|c\n".to_vec()]);
    }

    #[test]
    fn periodic_flush_sends_without_explicit_request() {
        let (transport, log) = mock_transport(1440, Duration::from_millis(10));

        transport.emit(b"requests:1|c\n");
        let packets = wait_for_packets(&log, 1);
        assert_eq!(packets[0], b"requests:1|c\n".to_vec());

        transport.close();
    }

    #[test]
    fn zero_period_never_flushes_on_its_own() {
        let (transport, log) = mock_transport(1440, Duration::ZERO);

        transport.emit(b"requests:1|c\n");
        sleep(Duration::from_millis(50));
        assert!(log.packets().is_empty());

        transport.flush();
        assert_eq!(log.packets().len(), 1);
    }

    #[test]
    fn write_errors_reach_the_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_by_handler = Arc::clone(&seen);

        let log = PacketLog::new();
        log.set_failing(true);
        let transport = Transport::start(
            SocketWriter::Mock(log.clone()),
            1440,
            Duration::ZERO,
            Box::new(move |e: io::Error| seen_by_handler.lock().unwrap().push(e.kind())),
        )
        .unwrap();

        transport.emit(b"requests:1|c\n");
        transport.flush();
        assert_eq!(*seen.lock().unwrap(), vec![io::ErrorKind::ConnectionRefused]);

        // The failed buffer is discarded, not retried.
        transport.flush();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn remote_addr_parsing() {
        assert!(matches!(RemoteAddr::try_from("127.0.0.1:8125"), Ok(RemoteAddr::Udp(_))));
        assert!(matches!(RemoteAddr::try_from("udp://127.0.0.1:8125"), Ok(RemoteAddr::Udp(_))));
        assert!(matches!(RemoteAddr::try_from("tcp://127.0.0.1:8125"), Ok(RemoteAddr::Tcp(_))));
        assert!(RemoteAddr::try_from("carrier-pigeon://127.0.0.1:8125").is_err());
        assert!(RemoteAddr::try_from("not an address").is_err());
    }

    fn arb_line() -> impl Strategy<Value = Vec<u8>> {
        // Lines long enough to exercise both the batching and the
        // oversized-standalone paths against a 64-byte packet limit.
        "[a-z]{1,80}".prop_map(|name| format!("{name}:1|c\n").into_bytes())
    }

    proptest! {
        #[test]
        fn property_test_gauntlet(lines in arb_vec(arb_line(), 1..64)) {
            let max_packet_size = 64;
            let (transport, log) = mock_transport(max_packet_size, Duration::ZERO);

            for line in &lines {
                transport.emit(line);
            }
            transport.flush();

            let packets = log.packets();

            // No packet exceeds the limit unless it is a single oversized line.
            for packet in &packets {
                prop_assert!(
                    packet.len() <= max_packet_size
                        || packet.iter().filter(|b| **b == b'\n').count() == 1
                );
            }

            // Every emitted byte arrives exactly once, in call order.
            let sent: Vec<u8> = packets.into_iter().flatten().collect();
            let emitted: Vec<u8> = lines.into_iter().flatten().collect();
            prop_assert_eq!(sent, emitted);
        }
    }
}
