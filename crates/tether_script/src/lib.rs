//! Tether Scripting Bridge
//!
//! Embeds a QuickJS engine and exchanges structured values with it.
//!
//! ## Architecture
//!
//! - **Lifecycle:** [`Runtime`] owns the engine heap, [`Context`] owns one
//!   global environment. Both free explicitly and follow [`Cleanup`] on drop.
//! - **Values:** [`Value`] and [`Object`] are counted handles into a context.
//!   [`Kind`] classifies objects structurally and views such as
//!   [`TypedArray`] extract them into [`Native`] host values.
//! - **Callbacks:** host closures are stored in a generation-checked registry
//!   and reached from the guest through a trampoline.
//! - **Bytecode:** [`Context::compile`] produces a [`Bytecode`] blob that
//!   [`Context::eval_binary`] runs later.
//!
//! ```ignore
//! let runtime = Runtime::new()?;
//! let mut context = runtime.new_context()?;
//! let sum = context.eval("[1, 2, 3].reduce((a, b) => a + b)")?.to_native()?;
//! assert_eq!(sum, Native::Int(6));
//! ```
//!
//! Nothing here is `Send`: a runtime and everything created from it stay on
//! the thread that made them.

pub mod bytecode;
pub mod callback;
pub mod config;
pub mod context;
pub mod error;
pub mod kind;
pub mod native;
pub mod object;
pub mod runtime;
pub mod value;

mod convert;

pub use bytecode::{Bytecode, SourceKind};
pub use callback::CallbackHandle;
pub use config::{Cleanup, Config, Unmapped};
pub use context::Context;
pub use error::{Error, Exception, Result};
pub use kind::Kind;
pub use native::{HostFn, Native};
pub use object::{Array, ArrayBuffer, Date, Element, Map, Object, Set, TypedArray, View};
pub use runtime::{MemoryUsage, Runtime};
pub use value::{Pending, Type, Value};

pub use rquickjs;

/// Bridge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
