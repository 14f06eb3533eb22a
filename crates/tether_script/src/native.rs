//! Host-native value tree
//!
//! [`Native`] is what guest values turn into on the host side, and what host
//! code hands back to the guest. Every host integer width converts into it,
//! so callers rarely spell out variants by hand:
//!
//! ```ignore
//! object.set("count", 3u16)?;
//! object.set("samples", vec![0.5f32, 1.5])?;
//! ```

use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// A host closure callable from guest code.
///
/// Arguments arrive already converted; the returned value is converted back
/// for the guest caller. An `Err` surfaces in the guest as a thrown exception.
#[derive(Clone)]
pub struct HostFn(Rc<dyn Fn(Vec<Native>) -> anyhow::Result<Native>>);

impl HostFn {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Vec<Native>) -> anyhow::Result<Native> + 'static,
    {
        Self(Rc::new(f))
    }

    pub fn call(&self, args: Vec<Native>) -> anyhow::Result<Native> {
        (self.0)(args)
    }
}

impl fmt::Debug for HostFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostFn({:p})", Rc::as_ptr(&self.0))
    }
}

/// Two host functions are equal when they share the same closure.
impl PartialEq for HostFn {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Native {
    /// Guest `null` and `undefined`.
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    BigInt(BigInt),
    String(String),
    Array(Vec<Native>),
    /// Contents of an `ArrayBuffer`.
    Bytes(Vec<u8>),
    Int8Array(Vec<i8>),
    Int16Array(Vec<i16>),
    Int32Array(Vec<i32>),
    Uint8Array(Vec<u8>),
    Uint16Array(Vec<u16>),
    Uint32Array(Vec<u32>),
    Float32Array(Vec<f32>),
    Float64Array(Vec<f64>),
    BigInt64Array(Vec<i64>),
    BigUint64Array(Vec<u64>),
    Map(HashMap<String, Native>),
    Set(Vec<Native>),
    Date(DateTime<Utc>),
    Function(HostFn),
    /// Symbols, plain objects and guest functions. Conversion is lossy here.
    Opaque,
}

impl Native {
    /// Short name of the variant, used in conversion errors.
    pub fn shape(&self) -> &'static str {
        match self {
            Native::Null => "null",
            Native::Bool(_) => "bool",
            Native::Int(_) => "int",
            Native::Float(_) => "float",
            Native::BigInt(_) => "bigint",
            Native::String(_) => "string",
            Native::Array(_) => "array",
            Native::Bytes(_) => "bytes",
            Native::Int8Array(_) => "Int8Array",
            Native::Int16Array(_) => "Int16Array",
            Native::Int32Array(_) => "Int32Array",
            Native::Uint8Array(_) => "Uint8Array",
            Native::Uint16Array(_) => "Uint16Array",
            Native::Uint32Array(_) => "Uint32Array",
            Native::Float32Array(_) => "Float32Array",
            Native::Float64Array(_) => "Float64Array",
            Native::BigInt64Array(_) => "BigInt64Array",
            Native::BigUint64Array(_) => "BigUint64Array",
            Native::Map(_) => "map",
            Native::Set(_) => "set",
            Native::Date(_) => "date",
            Native::Function(_) => "function",
            Native::Opaque => "opaque",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Native::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Native::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Native::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value as a float, for both `Int` and `Float`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Native::Int(i) => Some(*i as f64),
            Native::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Native::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Native]> {
        match self {
            Native::Array(items) | Native::Set(items) => Some(items),
            _ => None,
        }
    }
}

macro_rules! native_from {
    ($($ty:ty => |$v:ident| $body:expr;)*) => {
        $(
            impl From<$ty> for Native {
                fn from($v: $ty) -> Self {
                    $body
                }
            }
        )*
    };
}

native_from! {
    bool => |v| Native::Bool(v);
    i8 => |v| Native::Int(v.into());
    i16 => |v| Native::Int(v.into());
    i32 => |v| Native::Int(v.into());
    i64 => |v| Native::Int(v);
    isize => |v| Native::Int(v as i64);
    u8 => |v| Native::Int(v.into());
    u16 => |v| Native::Int(v.into());
    u32 => |v| Native::Int(v.into());
    // Above i64::MAX there is no lossless integer; precision past 2^53 is lost.
    u64 => |v| i64::try_from(v).map(Native::Int).unwrap_or(Native::Float(v as f64));
    usize => |v| i64::try_from(v).map(Native::Int).unwrap_or(Native::Float(v as f64));
    f32 => |v| Native::Float(v.into());
    f64 => |v| Native::Float(v);
    BigInt => |v| Native::BigInt(v);
    String => |v| Native::String(v);
    &str => |v| Native::String(v.to_string());
    Vec<Native> => |v| Native::Array(v);
    Vec<u8> => |v| Native::Bytes(v);
    &[u8] => |v| Native::Bytes(v.to_vec());
    Vec<i8> => |v| Native::Int8Array(v);
    Vec<i16> => |v| Native::Int16Array(v);
    Vec<i32> => |v| Native::Int32Array(v);
    Vec<u16> => |v| Native::Uint16Array(v);
    Vec<u32> => |v| Native::Uint32Array(v);
    Vec<f32> => |v| Native::Float32Array(v);
    Vec<f64> => |v| Native::Float64Array(v);
    Vec<i64> => |v| Native::BigInt64Array(v);
    Vec<u64> => |v| Native::BigUint64Array(v);
    HashMap<String, Native> => |v| Native::Map(v);
    DateTime<Utc> => |v| Native::Date(v);
    HostFn => |v| Native::Function(v);
}

impl<T: Into<Native>> From<Option<T>> for Native {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Native::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_integer_width_becomes_int() {
        assert_eq!(Native::from(-1i8), Native::Int(-1));
        assert_eq!(Native::from(1u16), Native::Int(1));
        assert_eq!(Native::from(u32::MAX), Native::Int(4_294_967_295));
        assert_eq!(Native::from(i64::MIN), Native::Int(i64::MIN));
        assert_eq!(Native::from(i64::MAX as u64), Native::Int(i64::MAX));
    }

    #[test]
    fn u64_past_i64_range_degrades_to_float() {
        assert_eq!(Native::from(u64::MAX), Native::Float(u64::MAX as f64));
        assert_eq!(Native::from(usize::MAX).shape(), "float");
    }

    #[test]
    fn bytes_and_typed_vectors_stay_distinct() {
        assert_eq!(Native::from(vec![1u8, 2]), Native::Bytes(vec![1, 2]));
        assert_eq!(Native::from(vec![1u16, 2]), Native::Uint16Array(vec![1, 2]));
        assert_eq!(Native::from(vec![1.0f32]).shape(), "Float32Array");
    }

    #[test]
    fn option_maps_none_to_null() {
        assert_eq!(Native::from(None::<i32>), Native::Null);
        assert_eq!(Native::from(Some("x")), Native::String("x".into()));
    }

    #[test]
    fn host_functions_compare_by_identity() {
        let f = HostFn::new(|_| Ok(Native::Null));
        let g = HostFn::new(|_| Ok(Native::Null));
        assert_eq!(f, f.clone());
        assert_ne!(f, g);
    }

    #[test]
    fn host_function_call_forwards_arguments() {
        let sum = HostFn::new(|args| {
            Ok(Native::Int(args.iter().filter_map(Native::as_i64).sum()))
        });
        let result = sum.call(vec![1.into(), 2.into(), 3.into()]).unwrap();
        assert_eq!(result, Native::Int(6));
    }
}
