//! A buffering [statsd] client.
//!
//! [statsd]: https://github.com/statsd/statsd
//!
//! # Usage
//!
//! Build a client, emit metrics, and close it on the way out:
//!
//! ```no_run
//! use statsd_client::StatsdBuilder;
//!
//! // First, create a builder.
//! //
//! // The builder can configure every aspect of the client: the daemon
//! // address and transport, the flush period, the maximum packet size,
//! // sampling, tag dialects, and more.
//! let (client, error) = StatsdBuilder::default()
//!     .with_address("127.0.0.1:8125")
//!     .with_prefix("app")
//!     .build();
//!
//! // Construction never leaves you without a client. If the endpoint could
//! // not be opened, the client comes back muted alongside the error, so a
//! // broken metrics setup cannot stop the application from starting.
//! if let Some(error) = error {
//!     eprintln!("metrics disabled: {error}");
//! }
//!
//! client.incr("boot");
//! client.time("boot.duration", 420);
//!
//! // Close flushes whatever is still buffered and releases the socket.
//! client.close();
//! ```
//!
//! # Batching and flushing
//!
//! Metric lines are not written to the network one by one. They accumulate
//! in a buffer that is sent as a single packet when appending another line
//! would push it past the maximum packet size (1440 bytes by default, chosen
//! to avoid IP fragmentation), when the flush period elapses (100 ms by
//! default), or on an explicit flush or close. A line that alone exceeds the
//! maximum is sent in a packet of its own rather than dropped.
//!
//! Delivery is deliberately best-effort: there are no acknowledgements, no
//! retries, and no back-pressure. Write failures are handed to the error
//! handler configured on the builder and are otherwise invisible to the
//! instrumented code.
//!
//! # Tags
//!
//! The plain statsd protocol has no tags; the client can render a
//! [`TagSet`] in either the InfluxDB or the Datadog dialect. Without a
//! configured dialect, tags are silently dropped.
//!
//! # Clones
//!
//! [`StatsdClient::clone_with`] derives scoped clients — extra prefix
//! segments, extra tags, a different sample rate, or a muted handle — that
//! all share one transport. Only an explicit [`StatsdClient::close`] ends
//! the transport's life, no matter how many clones exist.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]

mod builder;
pub use self::builder::{BuildError, StatsdBuilder};

mod client;
pub use self::client::{CloneBuilder, StatsdClient, Timing};

mod tags;
pub use self::tags::{TagDialect, TagSet};

mod transport;

mod value;
pub use self::value::MetricValue;
