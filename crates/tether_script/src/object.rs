//! Guest objects and their structural views
//!
//! [`Object`] is the general handle. Once its [`Kind`] is known, a view
//! ([`Array`], [`Map`], [`TypedArray`], ...) extracts a typed host value:
//!
//! ```ignore
//! let samples = object.downcast::<TypedArray<f32>>()?.to_native()?;
//! ```

use crate::callback::{self, CallbackHandle};
use crate::context::ContextShared;
use crate::convert;
use crate::error::{check, Error, Result};
use crate::kind::Kind;
use crate::native::{HostFn, Native};
use crate::value::Value;
use chrono::{DateTime, Utc};
use rquickjs::convert::Coerced;
use rquickjs::function::{Rest, This};
use rquickjs::{Ctx, Function};
use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;

/// A guest value known to be an object.
#[derive(Clone, Debug)]
pub struct Object {
    value: Value,
}

impl Object {
    pub(crate) fn from_value(value: Value) -> Self {
        Self { value }
    }

    pub(crate) fn with<R, F>(&self, f: F) -> Result<R>
    where
        F: for<'js> FnOnce(&Ctx<'js>, &Rc<ContextShared>, rquickjs::Object<'js>) -> Result<R>,
    {
        self.value.with(|ctx, shared, value| {
            let object = value
                .into_object()
                .ok_or_else(|| Error::conversion("non-object value", "object"))?;
            f(ctx, shared, object)
        })
    }

    pub fn as_value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    /// Structural kind, resolved against the context's builtin constructors.
    pub fn kind(&self) -> Result<Kind> {
        self.with(|ctx, shared, object| shared.builtins()?.resolve(ctx, &object))
    }

    pub fn to_native(&self) -> Result<Native> {
        self.with(|ctx, shared, object| to_native(ctx, shared, &object))
    }

    /// Reads property `name`.
    pub fn get(&self, name: &str) -> Result<Value> {
        self.with(|ctx, shared, object| {
            let value: rquickjs::Value = check(ctx, object.get(name))?;
            Ok(Value::save(ctx, shared, value))
        })
    }

    /// Reads the integer-keyed property `index`.
    pub fn get_index(&self, index: u32) -> Result<Value> {
        self.with(|ctx, shared, object| {
            let value: rquickjs::Value = check(ctx, object.get(index))?;
            Ok(Value::save(ctx, shared, value))
        })
    }

    /// Converts `value` into a new guest value and stores it as property `name`.
    pub fn set(&self, name: &str, value: impl Into<Native>) -> Result<()> {
        let native = value.into();
        self.with(|ctx, shared, object| {
            let value = convert::to_foreign(ctx, shared, &native)?;
            check(ctx, object.set(name, value))
        })
    }

    /// Stores an existing guest value as property `name`.
    pub fn set_value(&self, name: &str, value: &Value) -> Result<()> {
        if !Rc::ptr_eq(&self.value.shared, &value.shared) {
            return Err(Error::conversion("value of another context", "property"));
        }
        self.with(|ctx, _, object| {
            let value = value.restore(ctx)?;
            check(ctx, object.set(name, value))
        })
    }

    /// Calls method `name` with this object as `this`.
    pub fn call(&self, name: &str, args: &[Native]) -> Result<Value> {
        self.with(|ctx, shared, object| {
            let args = args
                .iter()
                .map(|arg| convert::to_foreign(ctx, shared, arg))
                .collect::<Result<Vec<_>>>()?;
            let result = call_method(ctx, &object, name, args)?;
            Ok(Value::save(ctx, shared, result))
        })
    }

    /// Exposes a host closure to the guest as method `name`.
    ///
    /// The closure stays registered while the guest function is reachable;
    /// overwriting or deleting the property releases it.
    pub fn set_function<F>(&self, name: &str, f: F) -> Result<CallbackHandle>
    where
        F: Fn(Vec<Native>) -> anyhow::Result<Native> + 'static,
    {
        let handle = self.with(|ctx, shared, object| {
            let (handle, function) = callback::expose(ctx, shared, HostFn::new(f))?;
            check(ctx, object.set(name, function))?;
            Ok(handle)
        })?;
        tracing::debug!(name, index = handle.index(), "host function exposed");
        Ok(handle)
    }

    /// Wraps this object in a view after checking its kind.
    pub fn downcast<V: View>(&self) -> Result<V> {
        let kind = self.kind()?;
        if V::accepts(kind) {
            Ok(V::wrap(self.clone()))
        } else {
            Err(Error::conversion(kind.to_string(), V::NAME))
        }
    }
}

/// A typed view over an [`Object`] of a particular [`Kind`].
pub trait View: Sized {
    const NAME: &'static str;

    fn accepts(kind: Kind) -> bool;

    fn wrap(object: Object) -> Self;
}

macro_rules! define_view {
    ($(#[$meta:meta])* $name:ident, $kind:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug)]
        pub struct $name(Object);

        impl View for $name {
            const NAME: &'static str = stringify!($name);

            fn accepts(kind: Kind) -> bool {
                kind == $kind
            }

            fn wrap(object: Object) -> Self {
                Self(object)
            }
        }

        impl $name {
            pub fn as_object(&self) -> &Object {
                &self.0
            }
        }
    };
}

define_view!(
    /// A guest `Array`.
    Array,
    Kind::Array
);
define_view!(
    /// A guest `ArrayBuffer`.
    ArrayBuffer,
    Kind::ArrayBuffer
);
define_view!(Map, Kind::Map);
define_view!(Set, Kind::Set);
define_view!(Date, Kind::Date);

impl Array {
    pub fn len(&self) -> Result<usize> {
        self.0.with(|ctx, _, object| length(ctx, &object, "length"))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn get(&self, index: u32) -> Result<Value> {
        self.0.get_index(index)
    }

    pub fn to_native(&self) -> Result<Vec<Native>> {
        self.0.with(|ctx, shared, object| array_items(ctx, shared, &object))
    }
}

impl ArrayBuffer {
    pub fn len(&self) -> Result<usize> {
        self.0.with(|ctx, _, object| length(ctx, &object, "byteLength"))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn to_native(&self) -> Result<Vec<u8>> {
        self.0.with(|ctx, _, object| buffer_bytes(ctx, &object))
    }
}

impl Map {
    pub fn size(&self) -> Result<usize> {
        self.0.with(|ctx, _, object| length(ctx, &object, "size"))
    }

    pub fn to_native(&self) -> Result<HashMap<String, Native>> {
        self.0.with(|ctx, shared, object| map_entries(ctx, shared, &object))
    }
}

impl Set {
    pub fn size(&self) -> Result<usize> {
        self.0.with(|ctx, _, object| length(ctx, &object, "size"))
    }

    pub fn to_native(&self) -> Result<Vec<Native>> {
        self.0.with(|ctx, shared, object| set_items(ctx, shared, &object))
    }
}

impl Date {
    pub fn to_native(&self) -> Result<DateTime<Utc>> {
        self.0.with(|ctx, _, object| date_value(ctx, &object))
    }
}

/// Element types a guest typed array can hold.
pub trait Element: bytemuck::Pod {
    const KIND: Kind;

    fn wrap(values: Vec<Self>) -> Native;
}

macro_rules! element {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const KIND: Kind = Kind::$kind;

                fn wrap(values: Vec<Self>) -> Native {
                    Native::$kind(values)
                }
            }
        )*
    };
}

element! {
    i8 => Int8Array,
    i16 => Int16Array,
    i32 => Int32Array,
    u8 => Uint8Array,
    u16 => Uint16Array,
    u32 => Uint32Array,
    f32 => Float32Array,
    f64 => Float64Array,
    i64 => BigInt64Array,
    u64 => BigUint64Array,
}

/// A guest typed array whose element type is `T`.
///
/// [`Object::downcast`] only produces this view when the guest array's
/// concrete type matches `T`, so the byte reinterpretation is always sound.
#[derive(Clone, Debug)]
pub struct TypedArray<T: Element> {
    object: Object,
    _element: PhantomData<T>,
}

impl<T: Element> View for TypedArray<T> {
    const NAME: &'static str = "TypedArray";

    fn accepts(kind: Kind) -> bool {
        kind == T::KIND
    }

    fn wrap(object: Object) -> Self {
        Self {
            object,
            _element: PhantomData,
        }
    }
}

impl<T: Element> TypedArray<T> {
    pub fn as_object(&self) -> &Object {
        &self.object
    }

    pub fn len(&self) -> Result<usize> {
        self.object.with(|ctx, _, object| length(ctx, &object, "length"))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn to_native(&self) -> Result<Vec<T>> {
        self.object.with(|ctx, _, object| typed_items(ctx, &object))
    }
}

// ============================================================================
// Extraction inside an active context
// ============================================================================

pub(crate) fn to_native<'js>(
    ctx: &Ctx<'js>,
    shared: &ContextShared,
    object: &rquickjs::Object<'js>,
) -> Result<Native> {
    let kind = shared.builtins()?.resolve(ctx, object)?;
    let native = match kind {
        Kind::Array => Native::Array(array_items(ctx, shared, object)?),
        Kind::ArrayBuffer => Native::Bytes(buffer_bytes(ctx, object)?),
        Kind::Int8Array => typed::<i8>(ctx, object)?,
        Kind::Int16Array => typed::<i16>(ctx, object)?,
        Kind::Int32Array => typed::<i32>(ctx, object)?,
        Kind::Uint8Array => typed::<u8>(ctx, object)?,
        Kind::Uint16Array => typed::<u16>(ctx, object)?,
        Kind::Uint32Array => typed::<u32>(ctx, object)?,
        Kind::Float32Array => typed::<f32>(ctx, object)?,
        Kind::Float64Array => typed::<f64>(ctx, object)?,
        Kind::BigInt64Array => typed::<i64>(ctx, object)?,
        Kind::BigUint64Array => typed::<u64>(ctx, object)?,
        Kind::Map => Native::Map(map_entries(ctx, shared, object)?),
        Kind::Set => Native::Set(set_items(ctx, shared, object)?),
        Kind::Date => Native::Date(date_value(ctx, object)?),
        Kind::Unknown => Native::Opaque,
    };
    Ok(native)
}

/// Calls `object[name](...args)` with `object` as `this`.
pub(crate) fn call_method<'js>(
    ctx: &Ctx<'js>,
    object: &rquickjs::Object<'js>,
    name: &str,
    args: Vec<rquickjs::Value<'js>>,
) -> Result<rquickjs::Value<'js>> {
    let method: Function = check(ctx, object.get(name))?;
    check(ctx, method.call((This(object.clone()), Rest(args))))
}

/// Upper bound on capacity reserved from a guest-reported length.
const MAX_RESERVE: usize = 1024;

fn length<'js>(ctx: &Ctx<'js>, object: &rquickjs::Object<'js>, property: &str) -> Result<usize> {
    let length: f64 = check(ctx, object.get(property))?;
    Ok(length as usize)
}

fn array_items<'js>(
    ctx: &Ctx<'js>,
    shared: &ContextShared,
    object: &rquickjs::Object<'js>,
) -> Result<Vec<Native>> {
    let length = length(ctx, object, "length")?;
    let mut items = Vec::with_capacity(length.min(MAX_RESERVE));
    for index in 0..length as u32 {
        let item: rquickjs::Value = check(ctx, object.get(index))?;
        items.push(convert::to_native(ctx, shared, &item)?);
    }
    Ok(items)
}

fn buffer_bytes<'js>(ctx: &Ctx<'js>, object: &rquickjs::Object<'js>) -> Result<Vec<u8>> {
    let byte_length = length(ctx, object, "byteLength")?;
    let buffer: rquickjs::ArrayBuffer = check(ctx, object.clone().into_value().get())?;
    let bytes = buffer
        .as_bytes()
        .ok_or_else(|| Error::conversion("detached ArrayBuffer", "bytes"))?;
    Ok(bytes[..byte_length.min(bytes.len())].to_vec())
}

fn typed<'js, T: Element>(ctx: &Ctx<'js>, object: &rquickjs::Object<'js>) -> Result<Native> {
    typed_items::<T>(ctx, object).map(T::wrap)
}

fn typed_items<'js, T: Element>(ctx: &Ctx<'js>, object: &rquickjs::Object<'js>) -> Result<Vec<T>> {
    let buffer: rquickjs::Value = check(ctx, object.get("buffer"))?;
    let buffer: rquickjs::ArrayBuffer = check(ctx, buffer.get())?;
    let offset = length(ctx, object, "byteOffset")?;
    let byte_length = length(ctx, object, "byteLength")?;
    let bytes = buffer
        .as_bytes()
        .and_then(|bytes| bytes.get(offset..offset + byte_length))
        .ok_or_else(|| Error::conversion(format!("detached {}", T::KIND), "elements"))?;
    Ok(bytes
        .chunks_exact(std::mem::size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect())
}

/// Runs the guest's `forEach` and hands back the raw callback arguments.
fn for_each<'js>(
    ctx: &Ctx<'js>,
    object: &rquickjs::Object<'js>,
) -> Result<Vec<Vec<rquickjs::Value<'js>>>> {
    let calls: Rc<RefCell<Vec<Vec<rquickjs::Value<'js>>>>> = Rc::default();
    let sink = Rc::clone(&calls);
    let collect = Function::new(ctx.clone(), move |args: Rest<rquickjs::Value<'js>>| {
        sink.borrow_mut().push(args.0);
    });
    let collect = check(ctx, collect)?;
    call_method(ctx, object, "forEach", vec![collect.into_value()])?;
    let calls = calls.take();
    Ok(calls)
}

fn map_entries<'js>(
    ctx: &Ctx<'js>,
    shared: &ContextShared,
    object: &rquickjs::Object<'js>,
) -> Result<HashMap<String, Native>> {
    let mut entries = HashMap::with_capacity(length(ctx, object, "size")?.min(MAX_RESERVE));
    for args in for_each(ctx, object)? {
        // forEach passes (value, key, map)
        let mut args = args.into_iter();
        let (Some(value), Some(key)) = (args.next(), args.next()) else {
            continue;
        };
        let key = check(ctx, key.get::<Coerced<String>>())?.0;
        entries.insert(key, convert::to_native(ctx, shared, &value)?);
    }
    Ok(entries)
}

fn set_items<'js>(
    ctx: &Ctx<'js>,
    shared: &ContextShared,
    object: &rquickjs::Object<'js>,
) -> Result<Vec<Native>> {
    let mut items = Vec::with_capacity(length(ctx, object, "size")?.min(MAX_RESERVE));
    for args in for_each(ctx, object)? {
        if let Some(value) = args.first() {
            items.push(convert::to_native(ctx, shared, value)?);
        }
    }
    Ok(items)
}

fn date_value<'js>(ctx: &Ctx<'js>, object: &rquickjs::Object<'js>) -> Result<DateTime<Utc>> {
    let millis: f64 = check(ctx, call_method(ctx, object, "getTime", Vec::new())?.get())?;
    if !millis.is_finite() {
        return Err(Error::conversion("invalid date", "DateTime<Utc>"));
    }
    DateTime::from_timestamp_millis(millis as i64)
        .ok_or_else(|| Error::conversion(format!("date at {millis} ms"), "DateTime<Utc>"))
}
