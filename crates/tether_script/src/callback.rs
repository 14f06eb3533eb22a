//! Host closures callable from guest code
//!
//! Closures live in a per-context [`Registry`]. The guest only ever sees a
//! trampoline function that carries a [`CallbackHandle`]; the handle is looked
//! up on every call, so a closure removed from the registry can never run
//! again even if the guest kept the trampoline around. Each trampoline also
//! holds a [`Lease`] on its entry, so the entry is released when the engine
//! frees the function.

use crate::context::ContextShared;
use crate::error::{check, Error, Result};
use crate::native::{HostFn, Native};
use crate::convert;
use rquickjs::function::Rest;
use rquickjs::{Ctx, Exception, Function, Value};
use std::rc::{Rc, Weak};

/// Generation-checked identity of a registered host closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackHandle {
    index: u32,
    generation: u32,
}

impl CallbackHandle {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

#[derive(Default)]
struct Slot {
    generation: u32,
    entry: Option<HostFn>,
}

/// Arena of host closures keyed by [`CallbackHandle`].
pub(crate) struct Registry {
    slots: Vec<Slot>,
    /// Where the next free-slot search starts. Wraps at `limit`.
    cursor: usize,
    live: usize,
    limit: usize,
}

impl Registry {
    pub fn new(limit: usize) -> Self {
        Self {
            slots: Vec::new(),
            cursor: 0,
            live: 0,
            limit: limit.max(1),
        }
    }

    pub fn insert(&mut self, callback: HostFn) -> Result<CallbackHandle> {
        if self.live >= self.limit {
            return Err(Error::RegistryFull { limit: self.limit });
        }
        for step in 0..self.limit {
            let index = (self.cursor + step) % self.limit;
            if index == self.slots.len() {
                self.slots.push(Slot::default());
            }
            let slot = &mut self.slots[index];
            if slot.entry.is_none() {
                slot.entry = Some(callback);
                self.cursor = index + 1;
                self.live += 1;
                return Ok(CallbackHandle {
                    index: index as u32,
                    generation: slot.generation,
                });
            }
        }
        Err(Error::RegistryFull { limit: self.limit })
    }

    pub fn get(&self, handle: CallbackHandle) -> Option<HostFn> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.clone())
    }

    pub fn remove(&mut self, handle: CallbackHandle) -> Option<HostFn> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)?;
        let callback = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.live -= 1;
        Some(callback)
    }

    pub fn len(&self) -> usize {
        self.live
    }

    /// Empties the registry and hands back the closures so the caller can
    /// drop them after releasing its borrow. Outstanding handles all go stale.
    pub fn clear(&mut self) -> Vec<HostFn> {
        let mut removed = Vec::with_capacity(self.live);
        for slot in &mut self.slots {
            if let Some(callback) = slot.entry.take() {
                slot.generation = slot.generation.wrapping_add(1);
                removed.push(callback);
            }
        }
        self.live = 0;
        self.cursor = 0;
        removed
    }
}

/// Ties a registry entry to the trampoline that owns it.
struct Lease {
    shared: Weak<ContextShared>,
    handle: CallbackHandle,
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.unregister(self.handle);
        }
    }
}

/// Registers `callback` and creates the guest function that invokes it.
pub(crate) fn expose<'js>(
    ctx: &Ctx<'js>,
    shared: &Rc<ContextShared>,
    callback: HostFn,
) -> Result<(CallbackHandle, Function<'js>)> {
    let handle = shared.register(callback)?;
    let function = trampoline(ctx, shared, handle)?;
    Ok((handle, function))
}

/// Creates the guest function that forwards calls to the closure behind
/// `handle`. Dropping the function, or failing to create it, unregisters the
/// closure.
fn trampoline<'js>(
    ctx: &Ctx<'js>,
    shared: &Rc<ContextShared>,
    handle: CallbackHandle,
) -> Result<Function<'js>> {
    let lease = Lease {
        shared: Rc::downgrade(shared),
        handle,
    };
    let function = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, args: Rest<Value<'js>>| {
            dispatch(&ctx, &lease.shared, lease.handle, args.0)
        },
    );
    check(ctx, function)
}

fn dispatch<'js>(
    ctx: &Ctx<'js>,
    shared: &Weak<ContextShared>,
    handle: CallbackHandle,
    args: Vec<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    let Some(shared) = shared.upgrade() else {
        return Err(Exception::throw_message(ctx, "host context has been released"));
    };
    // Cloned out so the registry is not borrowed while the closure runs.
    let Some(callback) = shared.callback(handle) else {
        return Err(Exception::throw_message(
            ctx,
            &format!("host callback #{} is no longer registered", handle.index),
        ));
    };
    let args = args
        .iter()
        .map(|arg| convert::to_native(ctx, &shared, arg))
        .collect::<Result<Vec<Native>>>()
        .map_err(|err| rethrow(ctx, &err))?;
    let result = callback
        .call(args)
        .map_err(|err| Exception::throw_message(ctx, &format!("{err:#}")))?;
    convert::to_foreign(ctx, &shared, &result).map_err(|err| rethrow(ctx, &err))
}

fn rethrow(ctx: &Ctx<'_>, err: &Error) -> rquickjs::Error {
    Exception::throw_message(ctx, &err.to_string())
}
