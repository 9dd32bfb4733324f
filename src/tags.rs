/// Tag wire dialects supported by statsd-compatible daemons.
///
/// The plain statsd protocol has no notion of tags; the two common extensions
/// differ both in syntax and in where the tags sit on the line. When no
/// dialect is configured, tags are silently dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagDialect {
    /// InfluxDB-style tags: `,key=value,key2=value2`, spliced directly after
    /// the bucket name.
    InfluxDb,

    /// Datadog-style tags: `|#key:value,key2:value2`, appended at the end of
    /// the line.
    Datadog,
}

/// An ordered collection of unique tag keys.
///
/// Insertion order is preserved and is the serialization order, so the bytes
/// put on the wire for a given set of tags never depend on hash iteration
/// order. Merging keeps the receiver's value when both sides carry the same
/// key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagSet {
    entries: Vec<(String, String)>,
}

impl TagSet {
    /// Creates an empty `TagSet`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a `TagSet` from a flat `key, value, key, value, ...` list.
    ///
    /// # Panics
    ///
    /// Panics if given an odd number of elements. An unpaired key is a
    /// mistake at the call site, not a runtime condition.
    pub fn from_interleaved<S: AsRef<str>>(kvs: &[S]) -> Self {
        assert!(kvs.len() % 2 == 0, "tags must be passed as an even number of key/value elements");

        let mut tags = TagSet { entries: Vec::with_capacity(kvs.len() / 2) };
        for kv in kvs.chunks_exact(2) {
            tags.insert(kv[0].as_ref(), kv[1].as_ref());
        }
        tags
    }

    pub(crate) fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let mut tags = TagSet { entries: Vec::with_capacity(pairs.len()) };
        for (key, value) in pairs {
            tags.insert(*key, *value);
        }
        tags
    }

    /// Inserts a tag.
    ///
    /// If the key is already present, its value is updated in place and its
    /// position in the serialization order is unchanged.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value.into(),
            None => self.entries.push((key, value.into())),
        }
    }

    /// Merges `other` into this set.
    ///
    /// Every key of `other` not already present is appended, preserving
    /// `other`'s relative order. Keys already present are left untouched:
    /// the first writer wins.
    pub fn merge(&mut self, other: &TagSet) {
        for (key, value) in &other.entries {
            if !self.contains_key(key) {
                self.entries.push((key.clone(), value.clone()));
            }
        }
    }

    /// Returns `true` if the set contains `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Returns the number of tags in the set.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the set holds no tags.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renders the set in the given dialect.
    ///
    /// An empty set, or no dialect at all, renders as the empty string.
    pub(crate) fn format(&self, dialect: Option<TagDialect>) -> String {
        if self.entries.is_empty() {
            return String::new();
        }

        match dialect {
            Some(TagDialect::InfluxDb) => {
                let mut buf = String::new();
                for (key, value) in &self.entries {
                    buf.push(',');
                    buf.push_str(key);
                    buf.push('=');
                    buf.push_str(value);
                }
                buf
            }
            Some(TagDialect::Datadog) => {
                let mut buf = String::from("|#");
                let mut wrote_tag = false;
                for (key, value) in &self.entries {
                    if wrote_tag {
                        buf.push(',');
                    }
                    buf.push_str(key);
                    buf.push(':');
                    buf.push_str(value);
                    wrote_tag = true;
                }
                buf
            }
            None => String::new(),
        }
    }
}
