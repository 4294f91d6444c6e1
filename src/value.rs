//! Runtime values for serialization/deserialization.

use std::collections::HashMap;
use std::fmt;

/// A single field value, array or composite record.
///
/// Void fields never appear in a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    UInt(u64),
    Int(i64),
    Float(f64),
    Array(Vec<Value>),
    Composite(HashMap<String, Value>),
}

impl Value {
    /// Composite from `(name, value)` pairs.
    pub fn composite<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Composite(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Array of `uint8` elements.
    pub fn bytes(b: &[u8]) -> Self {
        Value::Array(b.iter().map(|&x| Value::UInt(u64::from(x))).collect())
    }

    /// Field of a composite.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.as_composite().and_then(|m| m.get(field))
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(x) => Some(*x),
            Value::UInt(x) => i64::try_from(*x).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_composite(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Composite(m) => Some(m),
            _ => None,
        }
    }

    /// The array as bytes, if every element is an unsigned integer below 256.
    pub fn as_bytes(&self) -> Option<Vec<u8>> {
        self.as_array()?
            .iter()
            .map(|v| v.as_u64().and_then(|x| u8::try_from(x).ok()))
            .collect()
    }

    /// Multi-line dump: composites as `{ key: value }` with sorted keys, byte arrays in hex.
    pub fn dump(&self, indent: usize) -> String {
        let pad = "  ".repeat(indent);
        match self {
            Value::Bool(_) | Value::UInt(_) | Value::Int(_) | Value::Float(_) => {
                format!("{}{}", pad, scalar(self))
            }
            Value::Array(items) if items.is_empty() => format!("{}[]", pad),
            Value::Array(items) => {
                if let Some(b) = self.as_bytes() {
                    return format!("{}hex({})", pad, hex_string(&b));
                }
                if items.iter().all(is_scalar) {
                    let parts: Vec<String> = items.iter().map(scalar).collect();
                    return format!("{}[{}]", pad, parts.join(", "));
                }
                let mut lines = vec![format!("{}[", pad)];
                for (i, item) in items.iter().enumerate() {
                    let sub = item.dump(indent + 1);
                    lines.push(format!("{}  [{}] {}", pad, i, sub.trim_start()));
                }
                lines.push(format!("{}]", pad));
                lines.join("\n")
            }
            Value::Composite(m) => {
                let mut keys: Vec<&String> = m.keys().collect();
                keys.sort();
                let mut lines = vec![format!("{}{{", pad)];
                for k in keys {
                    if let Some(v) = m.get(k) {
                        let sub = v.dump(indent + 1);
                        lines.push(format!("{}  {}: {}", pad, k, sub.trim_start()));
                    }
                }
                lines.push(format!("{}}}", pad));
                lines.join("\n")
            }
        }
    }
}

fn is_scalar(v: &Value) -> bool {
    !matches!(v, Value::Array(_) | Value::Composite(_))
}

fn scalar(v: &Value) -> String {
    match v {
        Value::Bool(x) => x.to_string(),
        Value::UInt(x) => x.to_string(),
        Value::Int(x) => x.to_string(),
        Value::Float(x) => x.to_string(),
        _ => format!("{:?}", v),
    }
}

fn hex_string(b: &[u8]) -> String {
    b.iter().map(|x| format!("{:02x}", x)).collect::<Vec<_>>().join(" ")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dump(0))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

macro_rules! value_from {
    ($variant:ident, $target:ty: $($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(x: $t) -> Self {
                Value::$variant(<$target>::from(x))
            }
        })*
    };
}

value_from!(UInt, u64: u8, u16, u32, u64);
value_from!(Int, i64: i8, i16, i32, i64);
value_from!(Float, f64: f32, f64);

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}
