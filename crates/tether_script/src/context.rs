//! Execution contexts
//!
//! A [`Context`] is one global environment inside a [`Runtime`]. Handles
//! created from it ([`Value`], [`Object`]) share its state through an `Rc`,
//! so the underlying engine context outlives every handle that points into it.
//! Freeing a context is logical: the global object, captured builtins and
//! registered callbacks are released immediately and every later operation
//! through a surviving handle fails with [`Error::Freed`].

use crate::bytecode::{self, Bytecode};
use crate::callback::{self, CallbackHandle, Registry};
use crate::config::{Cleanup, Unmapped};
use crate::error::{check, Error, Result};
use crate::kind::Builtins;
use crate::native::HostFn;
use crate::object::Object;
use crate::runtime::{Runtime, RuntimeShared};
use crate::value::{Pending, Value};
use rquickjs::{Ctx, Persistent};
use std::cell::{Ref, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

struct Live {
    global: Persistent<rquickjs::Object<'static>>,
    builtins: Builtins,
}

/// State shared between a [`Context`] and every handle derived from it.
pub(crate) struct ContextShared {
    // Released before `raw` so no reference outlives the engine context.
    live: RefCell<Option<Live>>,
    registry: RefCell<Registry>,
    raw: rquickjs::Context,
    runtime: Rc<RuntimeShared>,
    freed: AtomicBool,
    unmapped: Unmapped,
}

impl ContextShared {
    /// Enters the engine context. Fails once the context has been freed.
    ///
    /// Not reentrant: a host callback that reaches back into the runtime
    /// running it, through any context's handle, gets [`Error::Reentrant`].
    pub fn with<R, F>(&self, f: F) -> Result<R>
    where
        F: for<'js> FnOnce(&Ctx<'js>) -> Result<R>,
    {
        if self.is_freed() {
            return Err(Error::Freed("context"));
        }
        let _entered = self.runtime.enter()?;
        self.raw.with(|ctx| f(&ctx))
    }

    pub fn builtins(&self) -> Result<Ref<'_, Builtins>> {
        Ref::filter_map(self.live.borrow(), |live| {
            live.as_ref().map(|live| &live.builtins)
        })
        .map_err(|_| Error::Freed("context"))
    }

    pub fn global<'js>(&self, ctx: &Ctx<'js>) -> Result<rquickjs::Object<'js>> {
        let global = self
            .live
            .borrow()
            .as_ref()
            .map(|live| live.global.clone())
            .ok_or(Error::Freed("context"))?;
        check(ctx, global.restore(ctx))
    }

    pub fn register(&self, callback: HostFn) -> Result<CallbackHandle> {
        if self.is_freed() {
            return Err(Error::Freed("context"));
        }
        let handle = self.registry.borrow_mut().insert(callback)?;
        tracing::debug!(
            index = handle.index(),
            generation = handle.generation(),
            "registered host callback"
        );
        Ok(handle)
    }

    pub fn unregister(&self, handle: CallbackHandle) -> bool {
        let removed = self.registry.borrow_mut().remove(handle);
        if removed.is_some() {
            tracing::debug!(index = handle.index(), "unregistered host callback");
        }
        removed.is_some()
    }

    pub fn callback(&self, handle: CallbackHandle) -> Option<HostFn> {
        self.registry.borrow().get(handle)
    }

    pub fn callback_count(&self) -> usize {
        self.registry.borrow().len()
    }

    pub fn unmapped(&self) -> Unmapped {
        self.unmapped
    }

    pub fn is_freed(&self) -> bool {
        self.freed.load(Ordering::Acquire)
    }

    /// Releases everything the context holds. Idempotent.
    pub fn release(&self) {
        if self.freed.swap(true, Ordering::AcqRel) {
            return;
        }
        let live = self.live.borrow_mut().take();
        // Closures may own handles into this context; drop them outside the borrow.
        let stale = self.registry.borrow_mut().clear();
        tracing::debug!(callbacks = stale.len(), "dropping host callbacks");
        drop(stale);
        drop(live);
        self.runtime.release_context();
        tracing::debug!("context released");
    }
}

impl Drop for ContextShared {
    fn drop(&mut self) {
        self.release();
    }
}

/// One global environment with its own builtins and callback registry.
///
/// Holds at most one unretained evaluation result: the next [`eval`] or
/// [`eval_binary`] replaces it. Contexts are single-threaded and are neither
/// `Send` nor `Sync`.
///
/// [`eval`]: Context::eval
/// [`eval_binary`]: Context::eval_binary
pub struct Context {
    pending: Option<Value>,
    shared: Rc<ContextShared>,
}

impl Context {
    pub(crate) fn new(runtime: &Runtime) -> Result<Self> {
        let runtime = Rc::clone(runtime.shared());
        let raw = runtime.new_engine_context()?;
        let entered = runtime.enter()?;
        let live = raw.with(|ctx| -> Result<Live> {
            let global = ctx.globals();
            let builtins = Builtins::capture(&ctx, &global)?;
            Ok(Live {
                global: Persistent::save(&ctx, global),
                builtins,
            })
        })?;
        drop(entered);
        runtime.acquire_context();
        let config = runtime.config();
        let shared = Rc::new(ContextShared {
            live: RefCell::new(Some(live)),
            registry: RefCell::new(Registry::new(config.max_callbacks)),
            raw,
            unmapped: config.unmapped,
            freed: AtomicBool::new(false),
            runtime,
        });
        tracing::debug!("context created");
        Ok(Self {
            pending: None,
            shared,
        })
    }

    /// Evaluates `source` and returns its completion value.
    ///
    /// Source starting with `import` or `export` is evaluated as a module.
    /// The previous pending result is released first, whether or not this
    /// evaluation succeeds.
    pub fn eval(&mut self, source: &str) -> Result<Pending<'_>> {
        self.pending = None;
        let shared = &self.shared;
        let value = shared.with(|ctx| {
            let value = bytecode::eval(ctx, source)?;
            Ok(Value::save(ctx, shared, value))
        })?;
        Ok(Pending::new(self.pending.insert(value)))
    }

    /// Loads and runs a program produced by [`compile`](Self::compile).
    pub fn eval_binary(&mut self, bytecode: &Bytecode) -> Result<Pending<'_>> {
        self.pending = None;
        let shared = &self.shared;
        let value = shared.with(|ctx| {
            let value = bytecode::eval_binary(ctx, bytecode.as_bytes())?;
            Ok(Value::save(ctx, shared, value))
        })?;
        Ok(Pending::new(self.pending.insert(value)))
    }

    /// Parses `source` without running it.
    pub fn compile(&self, source: &str) -> Result<Bytecode> {
        self.shared.with(|ctx| bytecode::compile(ctx, source))
    }

    pub fn global_object(&self) -> Result<Object> {
        let shared = &self.shared;
        shared.with(|ctx| {
            let global = shared.global(ctx)?;
            Ok(Object::from_value(Value::save(
                ctx,
                shared,
                global.into_value(),
            )))
        })
    }

    /// Registers `callback` and returns its handle with the guest function
    /// that invokes it. The function is not attached to any object.
    ///
    /// The registry entry lives as long as the guest function: once the
    /// returned value and every guest reference to it are gone, the handle
    /// goes stale.
    pub fn register<F>(&self, callback: F) -> Result<(CallbackHandle, Value)>
    where
        F: Fn(Vec<crate::Native>) -> anyhow::Result<crate::Native> + 'static,
    {
        let shared = &self.shared;
        shared.with(|ctx| {
            let (handle, function) = callback::expose(ctx, shared, HostFn::new(callback))?;
            Ok((handle, Value::save(ctx, shared, function.into_value())))
        })
    }

    /// Removes a callback. The guest function stays callable but throws.
    pub fn unregister(&self, handle: CallbackHandle) -> bool {
        self.shared.unregister(handle)
    }

    pub fn callback_count(&self) -> usize {
        self.shared.callback_count()
    }

    /// Releases the context. Safe to call more than once.
    pub fn free(&mut self) {
        self.pending = None;
        self.shared.release();
    }

    pub fn is_freed(&self) -> bool {
        self.shared.is_freed()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.pending = None;
        if self.shared.is_freed() {
            return;
        }
        match self.shared.runtime.config().cleanup {
            Cleanup::Finalizer => self.shared.release(),
            Cleanup::Manual => {
                tracing::warn!("context dropped without free; parked until the runtime is freed");
                self.shared.runtime.park(Rc::clone(&self.shared));
            }
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("freed", &self.is_freed())
            .field("callbacks", &self.callback_count())
            .finish()
    }
}
