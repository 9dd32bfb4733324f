/// A metric value.
///
/// Values are either integers or floating-point numbers; anything else is
/// unrepresentable at the API boundary. Both kinds are formatted with a
/// single canonical rule (`itoa` for integers, `ryu` for floats), so a given
/// value always produces the same bytes on the wire.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MetricValue {
    /// An integer value.
    Integer(i64),

    /// A floating-point value.
    Float(f64),
}

macro_rules! impl_from_integer {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for MetricValue {
                fn from(value: $ty) -> Self {
                    MetricValue::Integer(i64::from(value))
                }
            }
        )*
    };
}

impl_from_integer!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for MetricValue {
    fn from(value: f32) -> Self {
        MetricValue::Float(f64::from(value))
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Float(value)
    }
}

pub(crate) struct ValueFormatter {
    int_writer: itoa::Buffer,
    float_writer: ryu::Buffer,
}

impl ValueFormatter {
    pub fn new() -> Self {
        Self { int_writer: itoa::Buffer::new(), float_writer: ryu::Buffer::new() }
    }

    pub fn format(&mut self, value: MetricValue) -> &str {
        match value {
            MetricValue::Integer(v) => self.int_writer.format(v),
            MetricValue::Float(v) => self.float_writer.format(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MetricValue, ValueFormatter};

    #[test]
    fn conversions() {
        assert_eq!(MetricValue::from(1u8), MetricValue::Integer(1));
        assert_eq!(MetricValue::from(-7i32), MetricValue::Integer(-7));
        assert_eq!(MetricValue::from(42i64), MetricValue::Integer(42));
        assert_eq!(MetricValue::from(2.5f64), MetricValue::Float(2.5));
    }

    #[test]
    fn canonical_formatting() {
        let mut formatter = ValueFormatter::new();

        let cases = [
            (MetricValue::Integer(0), "0"),
            (MetricValue::Integer(-15), "-15"),
            (MetricValue::Integer(91919), "91919"),
            (MetricValue::Float(42.0), "42.0"),
            (MetricValue::Float(3.13232), "3.13232"),
        ];
        for (value, expected) in cases {
            assert_eq!(formatter.format(value), expected);
        }
    }
}
