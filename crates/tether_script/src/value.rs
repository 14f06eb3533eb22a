//! Handles to guest-resident values

use crate::context::ContextShared;
use crate::convert;
use crate::error::{check, Error, Result};
use crate::native::Native;
use crate::object::Object;
use rquickjs::convert::Coerced;
use rquickjs::{Ctx, Persistent};
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

/// Primitive type tag of a guest value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Undefined,
    Null,
    Bool,
    Number,
    BigInt,
    String,
    Symbol,
    Object,
    /// Engine-internal values (uninitialized slots, modules, ...).
    Other,
}

impl Type {
    pub(crate) fn of(value: &rquickjs::Value<'_>) -> Type {
        if value.is_undefined() {
            Type::Undefined
        } else if value.is_null() {
            Type::Null
        } else if value.is_bool() {
            Type::Bool
        } else if value.is_int() || value.is_float() {
            Type::Number
        } else if value.type_of() == rquickjs::Type::BigInt {
            Type::BigInt
        } else if value.is_string() {
            Type::String
        } else if value.is_symbol() {
            Type::Symbol
        } else if value.is_object() {
            Type::Object
        } else {
            Type::Other
        }
    }
}

/// A guest value plus the context that owns it.
///
/// The guest collector stays the primary owner; this handle holds one counted
/// reference that is released on drop. Cloning takes another reference.
#[derive(Clone)]
pub struct Value {
    // Declared first: the reference must go before the context it points into.
    handle: Persistent<rquickjs::Value<'static>>,
    pub(crate) shared: Rc<ContextShared>,
}

impl Value {
    pub(crate) fn save<'js>(
        ctx: &Ctx<'js>,
        shared: &Rc<ContextShared>,
        value: rquickjs::Value<'js>,
    ) -> Self {
        Self {
            handle: Persistent::save(ctx, value),
            shared: Rc::clone(shared),
        }
    }

    /// Runs `f` with the value restored inside its context.
    pub(crate) fn with<R, F>(&self, f: F) -> Result<R>
    where
        F: for<'js> FnOnce(&Ctx<'js>, &Rc<ContextShared>, rquickjs::Value<'js>) -> Result<R>,
    {
        self.shared.with(|ctx| {
            let value = self.restore(ctx)?;
            f(ctx, &self.shared, value)
        })
    }

    /// Restores the value inside an already active context.
    pub(crate) fn restore<'js>(&self, ctx: &Ctx<'js>) -> Result<rquickjs::Value<'js>> {
        check(ctx, self.handle.clone().restore(ctx))
    }

    pub fn type_of(&self) -> Result<Type> {
        self.with(|_, _, value| Ok(Type::of(&value)))
    }

    pub fn is_null_or_undefined(&self) -> Result<bool> {
        Ok(matches!(self.type_of()?, Type::Null | Type::Undefined))
    }

    /// Converts the value into a host-native tree.
    pub fn to_native(&self) -> Result<Native> {
        self.with(|ctx, shared, value| convert::to_native(ctx, shared, &value))
    }

    /// The guest's own string conversion (`String(value)`).
    pub fn coerce_string(&self) -> Result<String> {
        self.with(|ctx, _, value| check(ctx, value.get::<Coerced<String>>()).map(|s| s.0))
    }

    pub fn as_object(&self) -> Option<Object> {
        match self.type_of() {
            Ok(Type::Object) => Some(Object::from_value(self.clone())),
            _ => None,
        }
    }

    /// Like [`as_object`](Self::as_object) but fails with a conversion error.
    pub fn into_object(self) -> Result<Object> {
        match self.type_of()? {
            Type::Object => Ok(Object::from_value(self)),
            other => Err(Error::conversion(format!("{other:?}"), "object")),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.type_of() {
            Ok(ty) => write!(f, "Value({ty:?})"),
            Err(Error::Reentrant) => f.write_str("Value(<busy>)"),
            Err(_) => f.write_str("Value(<freed>)"),
        }
    }
}

/// The most recent evaluation result of a [`Context`](crate::Context).
///
/// Borrows the context, so the next `eval` cannot start while this is alive.
/// Call [`retain`](Self::retain) or convert the value to keep it longer.
pub struct Pending<'a> {
    value: &'a Value,
}

impl<'a> Pending<'a> {
    pub(crate) fn new(value: &'a Value) -> Self {
        Self { value }
    }

    /// An owned reference that outlives the next evaluation.
    pub fn retain(&self) -> Value {
        self.value.clone()
    }
}

impl Deref for Pending<'_> {
    type Target = Value;

    fn deref(&self) -> &Value {
        self.value
    }
}

impl fmt::Debug for Pending<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pending").field(self.value).finish()
    }
}
