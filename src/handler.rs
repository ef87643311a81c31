//! Handler trait, type erasure and the handler chain.
//!
//! A handler is any function that takes the request [`Context`]:
//!
//! ```text
//! fn name(ctx: &mut Context)        ← user writes this
//!        ↓ Chain::new().with(name)
//! name.into_boxed_handler()         ← Handler blanket impl
//!        ↓
//! Arc<dyn Fn(&mut Context)>         ← stored in the chain
//!        ↓
//! ctx.next()                        ← one virtual call per step
//! ```
//!
//! Handlers return nothing. They signal the outcome by writing to the
//! response and by calling (or not calling) [`Context::next`].

use std::fmt;
use std::sync::Arc;

use crate::context::Context;

/// A heap-allocated, type-erased handler shared across concurrent requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn Fn(&mut Context) + Send + Sync + 'static>;

/// Implemented for every valid chain handler.
///
/// You never implement this yourself. It is satisfied by any function or
/// closure with the signature `Fn(&mut Context)`. Closures need the
/// parameter type written out: `|ctx: &mut Context| { … }`.
///
/// The trait is **sealed**: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F> private::Sealed for F where F: Fn(&mut Context) + Send + Sync + 'static {}

impl<F> Handler for F
where
    F: Fn(&mut Context) + Send + Sync + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(self)
    }
}

// ── Chain ─────────────────────────────────────────────────────────────────────

/// An ordered, immutable-once-built sequence of handlers.
///
/// Build it at startup; every [`Context`] gets a cheap clone of it.
/// Each [`Chain::with`] call returns `self` so registrations chain naturally.
///
/// ```rust
/// use strand::{Chain, Context};
///
/// fn log(ctx: &mut Context) { ctx.next() }
/// fn hello(ctx: &mut Context) { let _ = ctx.write_string("hello"); }
///
/// let chain = Chain::new().with(log).with(hello);
/// assert_eq!(chain.len(), 2);
/// ```
#[derive(Clone, Default)]
pub struct Chain {
    handlers: Vec<BoxedHandler>,
}

impl Chain {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Appends `handler` to the end of the chain.
    pub fn with(mut self, handler: impl Handler) -> Self {
        self.handlers.push(handler.into_boxed_handler());
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub(crate) fn get(&self, index: usize) -> Option<BoxedHandler> {
        self.handlers.get(index).map(Arc::clone)
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain").field("len", &self.handlers.len()).finish()
    }
}
