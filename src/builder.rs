use std::{io, time::Duration};

use thiserror::Error;
use tracing::debug;

use crate::{
    client::StatsdClient,
    tags::{TagDialect, TagSet},
    transport::{ErrorHandler, RemoteAddr, SocketWriter, Transport},
};

const DEFAULT_ADDRESS: &str = "127.0.0.1:8125";
const DEFAULT_FLUSH_PERIOD: Duration = Duration::from_millis(100);
// Worst-case scenario: Ethernet MTU - IPv6 header - TCP header = 1500 - 40 - 20 = 1440.
const DEFAULT_MAX_PACKET_SIZE: usize = 1440;
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

const SMALLEST_VALID_LINE: &[u8] = b"a:0|c\n";

/// Errors that could occur while building a statsd client.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Failed to parse the remote address.
    #[error("invalid remote address: {reason}")]
    InvalidRemoteAddress {
        /// Details about the parsing failure.
        reason: String,
    },

    /// Failed to open the socket to the statsd daemon.
    #[error("failed to open connection to the statsd daemon: {source}")]
    Connect {
        /// The underlying I/O error.
        source: io::Error,
    },

    /// Failed to spawn the background flush thread.
    #[error("failed to spawn background flush thread")]
    FlushThread,
}

/// Builder for a statsd client.
pub struct StatsdBuilder {
    addr: String,
    flush_period: Duration,
    max_packet_size: usize,
    write_timeout: Duration,
    error_handler: Option<ErrorHandler>,
    sample_rate: f64,
    prefix: String,
    tags: TagSet,
    dialect: Option<TagDialect>,
    muted: bool,
}

impl StatsdBuilder {
    /// Set the address of the statsd daemon.
    ///
    /// A plain `<host>:<port>` address is reached over UDP. Prefix the
    /// address with a scheme to pick another transport: `tcp://<host>:<port>`
    /// for a TCP stream, and (Linux only) `unix://<path>` or
    /// `unixgram://<path>` for a stream or datagram Unix domain socket.
    ///
    /// Defaults to sending to `127.0.0.1:8125` over UDP.
    #[must_use]
    pub fn with_address<A>(mut self, addr: A) -> Self
    where
        A: Into<String>,
    {
        self.addr = addr.into();
        self
    }

    /// Set how often the buffer is flushed.
    ///
    /// A zero period disables the background flush thread entirely; the
    /// buffer is then only written when it fills up, or on an explicit
    /// flush or close.
    ///
    /// Defaults to 100 milliseconds.
    #[must_use]
    pub fn with_flush_period(mut self, period: Duration) -> Self {
        self.flush_period = period;
        self
    }

    /// Set the maximum packet size in bytes.
    ///
    /// Metric lines are batched into packets of at most this many bytes; a
    /// single line larger than this is sent in a packet of its own. The
    /// default of 1440 bytes keeps packets under typical MTU budgets so they
    /// are not fragmented in flight.
    ///
    /// # Panics
    ///
    /// Panics if `max_packet_size` is too small to hold any metric line.
    #[must_use]
    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        assert!(
            max_packet_size >= SMALLEST_VALID_LINE.len(),
            "maximum packet size is too small to allow any metrics to be written (must be {} or greater)",
            SMALLEST_VALID_LINE.len()
        );

        self.max_packet_size = max_packet_size;
        self
    }

    /// Set the write timeout applied to the underlying socket.
    ///
    /// A write that times out is dropped and reported through the error
    /// handler, like any other write failure. A zero duration removes the
    /// timeout.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the handler called with every transport write/close error.
    ///
    /// Errors are reported out-of-band: they are never returned from the
    /// metric-emitting calls, never retried, and never fatal.
    ///
    /// By default, these errors are discarded.
    #[must_use]
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(io::Error) + Send + Sync + 'static,
    {
        self.error_handler = Some(Box::new(handler));
        self
    }

    /// Set the sample rate.
    ///
    /// With a rate below 1, each metric call is sent with the corresponding
    /// probability and carries a `|@<rate>` suffix so the daemon can scale
    /// counts back up. Useful on hot paths.
    ///
    /// # Panics
    ///
    /// Panics if `rate` is outside `(0, 1]`.
    #[must_use]
    pub fn with_sample_rate(mut self, rate: f64) -> Self {
        assert!(rate > 0.0 && rate <= 1.0, "sample rate must be in (0, 1]");

        self.sample_rate = rate;
        self
    }

    /// Append to the prefix applied to every bucket name.
    ///
    /// The prefix is normalized to end with a single `.`, and repeated calls
    /// concatenate.
    #[must_use]
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        append_prefix(&mut self.prefix, prefix);
        self
    }

    /// Merge tags into the set sent with every metric.
    ///
    /// Tags already present keep their value. Tags are only put on the wire
    /// when a dialect is configured with [`with_tag_dialect`][Self::with_tag_dialect].
    #[must_use]
    pub fn with_common_tags(mut self, tags: TagSet) -> Self {
        self.tags.merge(&tags);
        self
    }

    /// Set the tag wire dialect.
    ///
    /// Without a dialect, tags are silently dropped.
    #[must_use]
    pub fn with_tag_dialect(mut self, dialect: TagDialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    /// Set whether the client starts muted.
    ///
    /// A muted client does no work at all: no formatting, no buffering, no
    /// network traffic. Mutedness propagates to every derived clone.
    #[must_use]
    pub fn muted(mut self, muted: bool) -> Self {
        self.muted = muted;
        self
    }

    /// Builds the client, consuming the builder.
    ///
    /// Construction never leaves the caller without a client: if the
    /// endpoint cannot be opened, a muted client is returned together with
    /// the error, so a broken metrics setup cannot take the application down
    /// with it.
    pub fn build(self) -> (StatsdClient, Option<BuildError>) {
        let error_handler = self.error_handler.unwrap_or_else(|| Box::new(|_| {}));

        let remote_addr = match RemoteAddr::try_from(self.addr.as_str()) {
            Ok(remote_addr) => remote_addr,
            Err(reason) => {
                return (
                    StatsdClient::disconnected(),
                    Some(BuildError::InvalidRemoteAddress { reason }),
                )
            }
        };

        let socket = match SocketWriter::connect(&remote_addr, self.write_timeout) {
            Ok(socket) => socket,
            Err(source) => {
                return (StatsdClient::disconnected(), Some(BuildError::Connect { source }))
            }
        };

        let transport = match Transport::start(
            socket,
            self.max_packet_size,
            self.flush_period,
            error_handler,
        ) {
            Ok(transport) => transport,
            Err(_) => return (StatsdClient::disconnected(), Some(BuildError::FlushThread)),
        };

        debug!(
            addr = %self.addr,
            transport = remote_addr.transport_id(),
            "statsd client connected"
        );

        let client = StatsdClient::new(
            transport,
            self.muted,
            self.sample_rate,
            self.prefix,
            self.tags,
            self.dialect,
        );
        (client, None)
    }
}

impl Default for StatsdBuilder {
    fn default() -> Self {
        StatsdBuilder {
            addr: DEFAULT_ADDRESS.to_string(),
            flush_period: DEFAULT_FLUSH_PERIOD,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            error_handler: None,
            sample_rate: 1.0,
            prefix: String::new(),
            tags: TagSet::new(),
            dialect: None,
            muted: false,
        }
    }
}

/// Appends `suffix` to a bucket-name prefix, normalizing it to end with a
/// single `.` so concatenated prefixes always stay dot-separated.
pub(crate) fn append_prefix(prefix: &mut String, suffix: &str) {
    if suffix.is_empty() {
        return;
    }

    prefix.push_str(suffix.strip_suffix('.').unwrap_or(suffix));
    prefix.push('.');
}

#[cfg(test)]
mod tests {
    use super::{append_prefix, BuildError, StatsdBuilder};

    #[test]
    fn invalid_address_yields_muted_client_and_error() {
        let (client, err) =
            StatsdBuilder::default().with_address("carrier-pigeon://nowhere").build();

        assert!(matches!(err, Some(BuildError::InvalidRemoteAddress { .. })));

        // The client that comes back is inert but safe to use.
        client.count("requests", 1);
        client.flush();
        client.close();
    }

    #[test]
    fn prefix_normalization() {
        let cases = [("app", "app."), ("app.", "app."), ("", "")];
        for (input, expected) in cases {
            let mut prefix = String::new();
            append_prefix(&mut prefix, input);
            assert_eq!(prefix, expected);
        }

        let mut prefix = String::new();
        append_prefix(&mut prefix, "app");
        append_prefix(&mut prefix, "web");
        assert_eq!(prefix, "app.web.");
    }

    #[test]
    #[should_panic(expected = "sample rate")]
    fn out_of_range_sample_rate_panics() {
        let _ = StatsdBuilder::default().with_sample_rate(1.5);
    }

    #[test]
    #[should_panic(expected = "maximum packet size")]
    fn tiny_max_packet_size_panics() {
        let _ = StatsdBuilder::default().with_max_packet_size(3);
    }
}
