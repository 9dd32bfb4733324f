use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    builder::append_prefix,
    tags::{TagDialect, TagSet},
    transport::Transport,
    value::{MetricValue, ValueFormatter},
};

#[derive(Clone, Copy)]
enum MetricType {
    Counter,
    Gauge,
    Timing,
    Histogram,
    Set,
}

impl MetricType {
    fn as_bytes(self) -> &'static [u8] {
        match self {
            MetricType::Counter => b"|c",
            MetricType::Gauge => b"|g",
            MetricType::Timing => b"|ms",
            MetricType::Histogram => b"|h",
            MetricType::Set => b"|s",
        }
    }
}

mod sampling {
    use std::cell::UnsafeCell;

    use rand::{rngs::OsRng, Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256StarStar;

    thread_local! {
        static SAMPLE_RNG: UnsafeCell<Xoshiro256StarStar> = {
            UnsafeCell::new(Xoshiro256StarStar::try_from_rng(&mut OsRng).unwrap())
        };
    }

    pub(super) fn accept(rate: f64) -> bool {
        SAMPLE_RNG.with(|rng| {
            // SAFETY: We know it's safe to take a mutable reference since we're getting a pointer to a thread-local
            // value, and the reference never outlives the closure executing on this thread.
            let rng = unsafe { &mut *rng.get() };
            accept_with(rng, rate)
        })
    }

    pub(super) fn accept_with<R: Rng>(rng: &mut R, rate: f64) -> bool {
        rng.random::<f64>() < rate
    }
}

/// A statsd client.
///
/// Emits counters, gauges, timings, histograms, and set values to the
/// configured daemon. Every handle derived via [`clone_with`][Self::clone_with]
/// (or plain [`Clone`]) shares one transport, so cloning is cheap and never
/// duplicates the socket or the outbound buffer.
///
/// Delivery is fire-and-forget: the metric calls never block beyond brief
/// lock contention, never return errors, and never retry. Transport failures
/// are reported through the error handler configured at build time.
#[derive(Clone)]
pub struct StatsdClient {
    transport: Arc<Transport>,
    muted: bool,
    rate: f64,
    prefix: String,
    tags: TagSet,
    dialect: Option<TagDialect>,
}

impl StatsdClient {
    pub(crate) fn new(
        transport: Arc<Transport>,
        muted: bool,
        rate: f64,
        prefix: String,
        tags: TagSet,
        dialect: Option<TagDialect>,
    ) -> Self {
        StatsdClient { transport, muted, rate, prefix, tags, dialect }
    }

    /// A muted client over a transport that was never connected.
    pub(crate) fn disconnected() -> Self {
        StatsdClient::new(Transport::disconnected(), true, 1.0, String::new(), TagSet::new(), None)
    }

    /// Adds `value` to the counter `bucket`.
    pub fn count<V: Into<MetricValue>>(&self, bucket: &str, value: V) {
        self.count_with_tags(bucket, value, &[]);
    }

    /// Adds `value` to the counter `bucket`, with metric-level tags.
    pub fn count_with_tags<V: Into<MetricValue>>(
        &self,
        bucket: &str,
        value: V,
        tags: &[(&str, &str)],
    ) {
        self.send(bucket, value.into(), MetricType::Counter, tags);
    }

    /// Increments the counter `bucket`. Equivalent to a count of 1.
    pub fn incr(&self, bucket: &str) {
        self.count(bucket, 1);
    }

    /// Increments the counter `bucket`, with metric-level tags.
    pub fn incr_with_tags(&self, bucket: &str, tags: &[(&str, &str)]) {
        self.count_with_tags(bucket, 1, tags);
    }

    /// Records an absolute value for the gauge `bucket`.
    pub fn gauge<V: Into<MetricValue>>(&self, bucket: &str, value: V) {
        self.gauge_with_tags(bucket, value, &[]);
    }

    /// Records an absolute value for the gauge `bucket`, with metric-level tags.
    pub fn gauge_with_tags<V: Into<MetricValue>>(
        &self,
        bucket: &str,
        value: V,
        tags: &[(&str, &str)],
    ) {
        self.send(bucket, value.into(), MetricType::Gauge, tags);
    }

    /// Records a timing value, in milliseconds, for `bucket`.
    pub fn time<V: Into<MetricValue>>(&self, bucket: &str, millis: V) {
        self.time_with_tags(bucket, millis, &[]);
    }

    /// Records a timing value, in milliseconds, for `bucket`, with
    /// metric-level tags.
    pub fn time_with_tags<V: Into<MetricValue>>(
        &self,
        bucket: &str,
        millis: V,
        tags: &[(&str, &str)],
    ) {
        self.send(bucket, millis.into(), MetricType::Timing, tags);
    }

    /// Records a histogram value for `bucket`.
    pub fn histogram<V: Into<MetricValue>>(&self, bucket: &str, value: V) {
        self.histogram_with_tags(bucket, value, &[]);
    }

    /// Records a histogram value for `bucket`, with metric-level tags.
    pub fn histogram_with_tags<V: Into<MetricValue>>(
        &self,
        bucket: &str,
        value: V,
        tags: &[(&str, &str)],
    ) {
        self.send(bucket, value.into(), MetricType::Histogram, tags);
    }

    /// Records `value` as a member of the set `bucket`.
    ///
    /// The daemon counts the number of distinct values seen per flush
    /// interval.
    pub fn unique(&self, bucket: &str, value: &str) {
        self.unique_with_tags(bucket, value, &[]);
    }

    /// Records `value` as a member of the set `bucket`, with metric-level tags.
    pub fn unique_with_tags(&self, bucket: &str, value: &str, tags: &[(&str, &str)]) {
        self.send_value_str(bucket, value, MetricType::Set, tags);
    }

    /// Starts a stopwatch whose elapsed time can be sent as a timing metric.
    pub fn start_timing(&self) -> Timing<'_> {
        Timing { start: Instant::now(), client: self }
    }

    /// Derives a new client sharing this client's transport.
    ///
    /// The returned builder starts from this client's policy: the prefix
    /// concatenates onto the parent's, tags merge into the parent's, and a
    /// muted parent always produces a muted clone.
    pub fn clone_with(&self) -> CloneBuilder<'_> {
        CloneBuilder {
            parent: self,
            muted: self.muted,
            rate: self.rate,
            prefix: self.prefix.clone(),
            tags: self.tags.clone(),
        }
    }

    /// Sends any buffered metric lines to the daemon immediately.
    pub fn flush(&self) {
        if self.muted {
            return;
        }
        self.transport.flush();
    }

    /// Flushes and releases the shared transport.
    ///
    /// Terminal for every clone sharing it: all of their operations become
    /// no-ops afterward. Safe to call more than once.
    pub fn close(&self) {
        if self.muted {
            return;
        }
        self.transport.close();
    }

    fn skip(&self) -> bool {
        self.muted || (self.rate < 1.0 && !sampling::accept(self.rate))
    }

    fn send(&self, bucket: &str, value: MetricValue, ty: MetricType, tags: &[(&str, &str)]) {
        if self.skip() {
            return;
        }

        let mut formatter = ValueFormatter::new();
        let line = self.format_line(bucket, formatter.format(value), ty, tags);
        self.transport.emit(&line);
    }

    fn send_value_str(&self, bucket: &str, value: &str, ty: MetricType, tags: &[(&str, &str)]) {
        if self.skip() {
            return;
        }

        let line = self.format_line(bucket, value, ty, tags);
        self.transport.emit(&line);
    }

    fn format_line(
        &self,
        bucket: &str,
        value: &str,
        ty: MetricType,
        metric_tags: &[(&str, &str)],
    ) -> Vec<u8> {
        let tag_suffix = self.merged_tags(metric_tags);

        let mut line = Vec::with_capacity(
            self.prefix.len() + bucket.len() + value.len() + tag_suffix.len() + 16,
        );
        line.extend_from_slice(self.prefix.as_bytes());
        line.extend_from_slice(bucket.as_bytes());
        // InfluxDB tags sit between the bucket name and the value; Datadog
        // tags go at the end of the line.
        if self.dialect == Some(TagDialect::InfluxDb) {
            line.extend_from_slice(tag_suffix.as_bytes());
        }
        line.push(b':');
        line.extend_from_slice(value.as_bytes());
        line.extend_from_slice(ty.as_bytes());
        if self.rate < 1.0 {
            let mut rate_writer = ryu::Buffer::new();
            line.extend_from_slice(b"|@");
            line.extend_from_slice(rate_writer.format(self.rate).as_bytes());
        }
        if self.dialect == Some(TagDialect::Datadog) {
            line.extend_from_slice(tag_suffix.as_bytes());
        }
        line.push(b'\n');
        line
    }

    fn merged_tags(&self, metric_tags: &[(&str, &str)]) -> String {
        if metric_tags.is_empty() {
            return self.tags.format(self.dialect);
        }

        // Metric-level tags come first; common tags fill in behind them.
        let mut merged = TagSet::from_pairs(metric_tags);
        merged.merge(&self.tags);
        merged.format(self.dialect)
    }
}

/// Builder for a client derived from an existing one.
///
/// Created by [`StatsdClient::clone_with`]. The derived client shares the
/// parent's transport and tag dialect; prefix, sample rate, tags, and
/// mutedness can be layered on top of the parent's.
pub struct CloneBuilder<'a> {
    parent: &'a StatsdClient,
    muted: bool,
    rate: f64,
    prefix: String,
    tags: TagSet,
}

impl CloneBuilder<'_> {
    /// Append to the parent's bucket-name prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        append_prefix(&mut self.prefix, prefix);
        self
    }

    /// Override the sample rate.
    ///
    /// # Panics
    ///
    /// Panics if `rate` is outside `(0, 1]`.
    #[must_use]
    pub fn with_sample_rate(mut self, rate: f64) -> Self {
        assert!(rate > 0.0 && rate <= 1.0, "sample rate must be in (0, 1]");

        self.rate = rate;
        self
    }

    /// Merge tags into the inherited common tag set.
    ///
    /// Inherited tags keep their value on key collision.
    #[must_use]
    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags.merge(&tags);
        self
    }

    /// Mute the derived client.
    ///
    /// Mute state only widens: a muted parent produces a muted clone no
    /// matter what is passed here.
    #[must_use]
    pub fn muted(mut self, muted: bool) -> Self {
        self.muted = self.muted || muted;
        self
    }

    /// Builds the derived client.
    pub fn build(self) -> StatsdClient {
        StatsdClient {
            transport: Arc::clone(&self.parent.transport),
            muted: self.muted,
            rate: self.rate,
            prefix: self.prefix,
            tags: self.tags,
            dialect: self.parent.dialect,
        }
    }
}

/// A running stopwatch tied to a client.
///
/// Created by [`StatsdClient::start_timing`].
pub struct Timing<'a> {
    start: Instant,
    client: &'a StatsdClient,
}

impl Timing<'_> {
    /// Returns the time elapsed since the stopwatch was started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Sends the elapsed time as a timing metric for `bucket`.
    pub fn send(self, bucket: &str) {
        let millis = i64::try_from(self.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.client.time(bucket, millis);
    }
}
