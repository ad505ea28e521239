//! Signal values exchanged with the codec.

use std::collections::BTreeMap;
use std::fmt;

/// A decoded or to-be-encoded signal value.
///
/// Enumerated signals decode to [`SignalValue::Symbol`]; numeric signals to
/// [`SignalValue::Unsigned`] or [`SignalValue::Signed`] depending on the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalValue {
    Unsigned(u64),
    Signed(i64),
    Symbol(&'static str),
}

impl SignalValue {
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            SignalValue::Unsigned(v) => Some(v),
            SignalValue::Signed(v) => u64::try_from(v).ok(),
            SignalValue::Symbol(_) => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&'static str> {
        match *self {
            SignalValue::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric value widened for range checks.
    pub(crate) fn as_i128(&self) -> Option<i128> {
        match *self {
            SignalValue::Unsigned(v) => Some(v as i128),
            SignalValue::Signed(v) => Some(v as i128),
            SignalValue::Symbol(_) => None,
        }
    }
}

impl From<u64> for SignalValue {
    fn from(v: u64) -> Self {
        SignalValue::Unsigned(v)
    }
}

impl From<u32> for SignalValue {
    fn from(v: u32) -> Self {
        SignalValue::Unsigned(v as u64)
    }
}

impl From<i64> for SignalValue {
    fn from(v: i64) -> Self {
        SignalValue::Signed(v)
    }
}

impl From<&'static str> for SignalValue {
    fn from(v: &'static str) -> Self {
        SignalValue::Symbol(v)
    }
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Unsigned(v) => write!(f, "{v}"),
            SignalValue::Signed(v) => write!(f, "{v}"),
            SignalValue::Symbol(s) => f.write_str(s),
        }
    }
}

/// Signals of one frame, keyed by signal name.
pub type SignalMap = BTreeMap<&'static str, SignalValue>;

/// Build a [`SignalMap`] from `name => value` pairs.
#[macro_export]
macro_rules! signals {
    () => {
        $crate::codec::SignalMap::new()
    };
    ($($name:literal => $value:expr),+ $(,)?) => {{
        let mut map = $crate::codec::SignalMap::new();
        $(map.insert($name, $crate::codec::SignalValue::from($value));)+
        map
    }};
}

/// Result of decoding one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub name: &'static str,
    pub id: u32,
    /// Selected branch of a multiplexed frame.
    pub mux: Option<&'static str>,
    /// Signals of the frame; the multiplexer itself is never included.
    pub signals: SignalMap,
}

impl DecodedFrame {
    pub fn get(&self, name: &str) -> Option<&SignalValue> {
        self.signals.get(name)
    }

    pub fn symbol(&self, name: &str) -> Option<&'static str> {
        self.get(name).and_then(SignalValue::as_symbol)
    }

    pub fn unsigned(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(SignalValue::as_u64)
    }
}
