//! Guest ↔ host conversion
//!
//! Both directions run inside an active `Ctx`, so they are usable from the
//! callback trampolines as well as from the public handles.

use crate::callback;
use crate::config::Unmapped;
use crate::context::ContextShared;
use crate::error::{check, Error, Result};
use crate::kind::Kind;
use crate::native::Native;
use crate::object::{self, Element};
use crate::value::Type;
use num_bigint::BigInt;
use rquickjs::function::Constructor;
use rquickjs::{ArrayBuffer, Ctx, Value};
use std::rc::Rc;

/// 2^53 - 1: the largest magnitude a float holds as an exact integer.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

pub(crate) fn to_native<'js>(
    ctx: &Ctx<'js>,
    shared: &ContextShared,
    value: &Value<'js>,
) -> Result<Native> {
    match Type::of(value) {
        Type::Null | Type::Undefined => Ok(Native::Null),
        Type::Bool => Ok(Native::Bool(value.as_bool().unwrap_or_default())),
        Type::Number => Ok(number_to_native(value)),
        Type::BigInt => big_int_to_native(ctx, value),
        Type::String => check(ctx, value.get::<String>()).map(Native::String),
        Type::Object => {
            let object = value
                .as_object()
                .ok_or_else(|| Error::conversion("value", "object"))?;
            object::to_native(ctx, shared, object)
        }
        Type::Symbol | Type::Other => Ok(Native::Opaque),
    }
}

fn number_to_native(value: &Value<'_>) -> Native {
    if let Some(int) = value.as_int() {
        return Native::Int(int.into());
    }
    let float = value.as_float().unwrap_or(f64::NAN);
    let negative_zero = float == 0.0 && float.is_sign_negative();
    if float.fract() == 0.0 && float.abs() <= MAX_SAFE_INTEGER && !negative_zero {
        Native::Int(float as i64)
    } else {
        Native::Float(float)
    }
}

fn big_int_to_native<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> Result<Native> {
    let decimal = check(ctx, value.get::<rquickjs::convert::Coerced<String>>())?.0;
    if let Ok(small) = decimal.parse::<i64>() {
        return Ok(Native::BigInt(BigInt::from(small)));
    }
    decimal
        .parse::<BigInt>()
        .map(Native::BigInt)
        .map_err(|_| Error::conversion(format!("bigint {decimal:?}"), "BigInt"))
}

pub(crate) fn to_foreign<'js>(
    ctx: &Ctx<'js>,
    shared: &Rc<ContextShared>,
    native: &Native,
) -> Result<Value<'js>> {
    let value = match native {
        Native::Null => Value::new_null(ctx.clone()),
        Native::Bool(b) => Value::new_bool(ctx.clone(), *b),
        Native::Int(i) => match i32::try_from(*i) {
            Ok(small) => Value::new_int(ctx.clone(), small),
            Err(_) => Value::new_float(ctx.clone(), *i as f64),
        },
        Native::Float(f) => Value::new_float(ctx.clone(), *f),
        Native::BigInt(big) => {
            let big_int = shared.builtins()?.big_int(ctx)?;
            check(ctx, big_int.call((big.to_string(),)))?
        }
        Native::String(s) => check(ctx, rquickjs::String::from_str(ctx.clone(), s))?.into_value(),
        Native::Array(items) => {
            let array = check(ctx, rquickjs::Array::new(ctx.clone()))?;
            for (index, item) in items.iter().enumerate() {
                let item = to_foreign(ctx, shared, item)?;
                check(ctx, array.set(index, item))?;
            }
            array.into_value()
        }
        Native::Bytes(bytes) => {
            check(ctx, ArrayBuffer::new_copy(ctx.clone(), bytes.as_slice()))?.into_value()
        }
        Native::Int8Array(v) => typed_array(ctx, shared, v)?,
        Native::Int16Array(v) => typed_array(ctx, shared, v)?,
        Native::Int32Array(v) => typed_array(ctx, shared, v)?,
        Native::Uint8Array(v) => typed_array(ctx, shared, v)?,
        Native::Uint16Array(v) => typed_array(ctx, shared, v)?,
        Native::Uint32Array(v) => typed_array(ctx, shared, v)?,
        Native::Float32Array(v) => typed_array(ctx, shared, v)?,
        Native::Float64Array(v) => typed_array(ctx, shared, v)?,
        Native::BigInt64Array(v) => typed_array(ctx, shared, v)?,
        Native::BigUint64Array(v) => typed_array(ctx, shared, v)?,
        Native::Map(entries) => {
            let map = construct(ctx, shared, Kind::Map, ())?;
            let object = map
                .as_object()
                .ok_or_else(|| Error::conversion("Map", "object"))?;
            for (key, value) in entries {
                let value = to_foreign(ctx, shared, value)?;
                let key = check(ctx, rquickjs::String::from_str(ctx.clone(), key))?.into_value();
                object::call_method(ctx, object, "set", vec![key, value])?;
            }
            map
        }
        Native::Set(items) => {
            let set = construct(ctx, shared, Kind::Set, ())?;
            let object = set
                .as_object()
                .ok_or_else(|| Error::conversion("Set", "object"))?;
            for item in items {
                let item = to_foreign(ctx, shared, item)?;
                object::call_method(ctx, object, "add", vec![item])?;
            }
            set
        }
        Native::Date(date) => {
            construct(ctx, shared, Kind::Date, (date.timestamp_millis() as f64,))?
        }
        Native::Function(callback) => {
            let (_, function) = callback::expose(ctx, shared, callback.clone())?;
            function.into_value()
        }
        Native::Opaque => match shared.unmapped() {
            Unmapped::Null => {
                tracing::warn!("opaque host value has no guest form; passing null");
                Value::new_null(ctx.clone())
            }
            Unmapped::Error => return Err(Error::conversion(native.shape(), "guest value")),
        },
    };
    Ok(value)
}

fn construct<'js, A>(
    ctx: &Ctx<'js>,
    shared: &ContextShared,
    kind: Kind,
    args: A,
) -> Result<Value<'js>>
where
    A: rquickjs::function::IntoArgs<'js>,
{
    let constructor = shared.builtins()?.constructor(ctx, kind)?;
    let constructor: Constructor = check(ctx, constructor.get())?;
    check(ctx, constructor.construct(args))
}

fn typed_array<'js, T: Element>(
    ctx: &Ctx<'js>,
    shared: &ContextShared,
    values: &[T],
) -> Result<Value<'js>> {
    let bytes: &[u8] = bytemuck::cast_slice(values);
    let buffer = check(ctx, ArrayBuffer::new_copy(ctx.clone(), bytes))?;
    construct(ctx, shared, T::KIND, (buffer,))
}
