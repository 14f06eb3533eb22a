//! Structural classification of guest objects
//!
//! Guest objects carry no host-visible tag for "this is a Map" or "this is a
//! Float32Array". The resolver asks the engine's `is_array` predicate first and
//! otherwise runs an instance-of scan against builtin constructors captured
//! when the context was created, so later reassignment of `globalThis.Map`
//! does not change classification.

use crate::error::{check, Result};
use rquickjs::{Ctx, Function, Object, Persistent, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Array,
    ArrayBuffer,
    Int8Array,
    Int16Array,
    Int32Array,
    Uint8Array,
    Uint16Array,
    Uint32Array,
    Float32Array,
    Float64Array,
    BigInt64Array,
    BigUint64Array,
    Map,
    Set,
    Date,
    Unknown,
}

impl Kind {
    /// Every kind backed by a builtin constructor, in scan order.
    pub const BUILTINS: [Kind; 15] = [
        Kind::Array,
        Kind::ArrayBuffer,
        Kind::Int8Array,
        Kind::Int16Array,
        Kind::Int32Array,
        Kind::Uint8Array,
        Kind::Uint16Array,
        Kind::Uint32Array,
        Kind::Float32Array,
        Kind::Float64Array,
        Kind::BigInt64Array,
        Kind::BigUint64Array,
        Kind::Map,
        Kind::Set,
        Kind::Date,
    ];

    /// Name of the global constructor for this kind.
    pub fn constructor_name(self) -> &'static str {
        match self {
            Kind::Array => "Array",
            Kind::ArrayBuffer => "ArrayBuffer",
            Kind::Int8Array => "Int8Array",
            Kind::Int16Array => "Int16Array",
            Kind::Int32Array => "Int32Array",
            Kind::Uint8Array => "Uint8Array",
            Kind::Uint16Array => "Uint16Array",
            Kind::Uint32Array => "Uint32Array",
            Kind::Float32Array => "Float32Array",
            Kind::Float64Array => "Float64Array",
            Kind::BigInt64Array => "BigInt64Array",
            Kind::BigUint64Array => "BigUint64Array",
            Kind::Map => "Map",
            Kind::Set => "Set",
            Kind::Date => "Date",
            Kind::Unknown => "Object",
        }
    }

    pub fn is_typed_array(self) -> bool {
        matches!(
            self,
            Kind::Int8Array
                | Kind::Int16Array
                | Kind::Int32Array
                | Kind::Uint8Array
                | Kind::Uint16Array
                | Kind::Uint32Array
                | Kind::Float32Array
                | Kind::Float64Array
                | Kind::BigInt64Array
                | Kind::BigUint64Array
        )
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.constructor_name())
    }
}

/// Builtins captured from a fresh global object.
pub(crate) struct Builtins {
    constructors: Vec<(Kind, Persistent<Value<'static>>)>,
    big_int: Persistent<Function<'static>>,
}

impl Builtins {
    pub fn capture<'js>(ctx: &Ctx<'js>, global: &Object<'js>) -> Result<Self> {
        let mut constructors = Vec::with_capacity(Kind::BUILTINS.len());
        for kind in Kind::BUILTINS {
            let constructor: Value = check(ctx, global.get(kind.constructor_name()))?;
            constructors.push((kind, Persistent::save(ctx, constructor)));
        }
        let big_int: Function = check(ctx, global.get("BigInt"))?;
        Ok(Self {
            constructors,
            big_int: Persistent::save(ctx, big_int),
        })
    }

    /// The captured constructor for `kind`.
    pub fn constructor<'js>(&self, ctx: &Ctx<'js>, kind: Kind) -> Result<Value<'js>> {
        let persistent = self
            .constructors
            .iter()
            .find(|(candidate, _)| *candidate == kind)
            .map(|(_, persistent)| persistent.clone())
            .ok_or_else(|| crate::Error::conversion(kind.to_string(), "builtin constructor"))?;
        check(ctx, persistent.restore(ctx))
    }

    /// The `BigInt` conversion function.
    pub fn big_int<'js>(&self, ctx: &Ctx<'js>) -> Result<Function<'js>> {
        check(ctx, self.big_int.clone().restore(ctx))
    }

    pub fn resolve<'js>(&self, ctx: &Ctx<'js>, object: &Object<'js>) -> Result<Kind> {
        if object.as_value().is_array() {
            return Ok(Kind::Array);
        }
        for (kind, persistent) in self.constructors.iter().skip(1) {
            let constructor = check(ctx, persistent.clone().restore(ctx))?;
            if object.is_instance_of(&constructor) {
                tracing::trace!(%kind, "resolved object kind");
                return Ok(*kind);
            }
        }
        Ok(Kind::Unknown)
    }
}
