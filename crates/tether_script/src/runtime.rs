//! Runtime lifecycle
//!
//! A [`Runtime`] owns the engine heap. Contexts keep the runtime state alive
//! through an `Rc`, so freeing the runtime while contexts are still open only
//! marks it; the engine itself is torn down when the last context goes.

use crate::config::{self, Cleanup, Config};
use crate::context::{Context, ContextShared};
use crate::error::{Error, Result};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Heap statistics reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub malloc_size: i64,
    pub memory_used_size: i64,
    pub object_count: i64,
}

pub(crate) struct RuntimeShared {
    engine: RefCell<Option<rquickjs::Runtime>>,
    config: Config,
    contexts: Cell<usize>,
    freed: AtomicBool,
    /// Contexts dropped without `free` under [`Cleanup::Manual`].
    parked: RefCell<Vec<Rc<ContextShared>>>,
    /// Set while some scope holds the engine lock.
    entered: Cell<bool>,
}

/// Clears the entered flag when an engine scope ends, unwinding included.
pub(crate) struct Entered<'a>(&'a Cell<bool>);

impl Drop for Entered<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl RuntimeShared {
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Marks the engine as entered until the guard drops. Host callbacks run
    /// inside such a scope, so any engine access they make is refused here.
    pub fn enter(&self) -> Result<Entered<'_>> {
        if self.entered.replace(true) {
            return Err(Error::Reentrant);
        }
        Ok(Entered(&self.entered))
    }

    pub fn new_engine_context(&self) -> Result<rquickjs::Context> {
        if self.freed.load(Ordering::Acquire) {
            return Err(Error::Freed("runtime"));
        }
        let _entered = self.enter()?;
        let engine = self.engine.borrow();
        let engine = engine.as_ref().ok_or(Error::Freed("runtime"))?;
        rquickjs::Context::full(engine).map_err(Error::Engine)
    }

    pub fn acquire_context(&self) {
        self.contexts.set(self.contexts.get() + 1);
    }

    pub fn release_context(&self) {
        let remaining = self.contexts.get().saturating_sub(1);
        self.contexts.set(remaining);
        if remaining == 0 && self.freed.load(Ordering::Acquire) {
            self.teardown();
        }
    }

    pub fn park(&self, context: Rc<ContextShared>) {
        self.parked.borrow_mut().push(context);
    }

    fn teardown(&self) {
        if self.engine.borrow_mut().take().is_some() {
            tracing::debug!("engine released");
        }
    }

    fn with_engine<R>(&self, f: impl FnOnce(&rquickjs::Runtime) -> R) -> Result<R> {
        if self.freed.load(Ordering::Acquire) {
            return Err(Error::Freed("runtime"));
        }
        let _entered = self.enter()?;
        let engine = self.engine.borrow();
        let engine = engine.as_ref().ok_or(Error::Freed("runtime"))?;
        Ok(f(engine))
    }
}

/// An isolated engine heap from which contexts are created.
///
/// Runtimes are single-threaded and are neither `Send` nor `Sync`.
pub struct Runtime {
    shared: Rc<RuntimeShared>,
}

impl Runtime {
    /// Creates a runtime with the process-wide configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(config::current().clone())
    }

    pub fn with_config(config: Config) -> Result<Self> {
        let engine = rquickjs::Runtime::new().map_err(Error::Engine)?;
        if let Some(limit) = config.memory_limit {
            engine.set_memory_limit(limit);
        }
        if let Some(limit) = config.max_stack_size {
            engine.set_max_stack_size(limit);
        }
        if let Some(threshold) = config.gc_threshold {
            engine.set_gc_threshold(threshold);
        }
        tracing::debug!(
            cleanup = ?config.cleanup,
            memory_limit = ?config.memory_limit,
            "runtime created"
        );
        Ok(Self {
            shared: Rc::new(RuntimeShared {
                engine: RefCell::new(Some(engine)),
                config,
                contexts: Cell::new(0),
                freed: AtomicBool::new(false),
                parked: RefCell::new(Vec::new()),
                entered: Cell::new(false),
            }),
        })
    }

    pub(crate) fn shared(&self) -> &Rc<RuntimeShared> {
        &self.shared
    }

    pub fn new_context(&self) -> Result<Context> {
        Context::new(self)
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Frees the runtime. Safe to call more than once.
    ///
    /// Parked contexts are released here. If contexts are still open, the
    /// engine stays alive until the last of them is freed.
    pub fn free(&self) {
        if self.shared.freed.swap(true, Ordering::AcqRel) {
            return;
        }
        let parked = std::mem::take(&mut *self.shared.parked.borrow_mut());
        if !parked.is_empty() {
            tracing::debug!(count = parked.len(), "releasing parked contexts");
        }
        for context in parked {
            context.release();
        }
        let open = self.shared.contexts.get();
        if open == 0 {
            self.shared.teardown();
        } else {
            tracing::debug!(open, "runtime freed with open contexts");
        }
    }

    pub fn is_freed(&self) -> bool {
        self.shared.freed.load(Ordering::Acquire)
    }

    /// Number of contexts created from this runtime and not yet freed.
    pub fn context_count(&self) -> usize {
        self.shared.contexts.get()
    }

    /// Contexts dropped without `free` and waiting for [`free`](Self::free).
    pub fn parked_count(&self) -> usize {
        self.shared.parked.borrow().len()
    }

    /// Forces a full collection.
    pub fn run_gc(&self) -> Result<()> {
        self.shared.with_engine(|engine| engine.run_gc())
    }

    pub fn memory_usage(&self) -> Result<MemoryUsage> {
        self.shared.with_engine(|engine| {
            let usage = engine.memory_usage();
            MemoryUsage {
                malloc_size: usage.malloc_size,
                memory_used_size: usage.memory_used_size,
                object_count: usage.obj_count,
            }
        })
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if self.is_freed() {
            return;
        }
        match self.shared.config.cleanup {
            Cleanup::Finalizer => self.free(),
            Cleanup::Manual => {
                let parked = self.parked_count();
                if parked > 0 {
                    // Parked contexts and the runtime keep each other alive.
                    tracing::warn!(
                        parked,
                        "runtime dropped without free; parked contexts and the engine are leaked"
                    );
                } else {
                    tracing::debug!(
                        contexts = self.context_count(),
                        "runtime dropped without free; engine released with its last context"
                    );
                }
            }
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("freed", &self.is_freed())
            .field("contexts", &self.context_count())
            .finish()
    }
}
