//! limn-runtime: the CPS evaluator, cooperative scheduler, and embedding
//! surface built on top of `limn-core`'s heap and allocator (§4.F–§4.I,
//! §6).
//!
//! `limn-core` owns the substrate (tagged values, cons arena, GC, symbol
//! table); this crate owns evaluation semantics: special forms,
//! closures, the concurrency fundamentals, and the context lifecycle a
//! host drives through [`api`]'s `extern "C"` surface.

pub mod api;
pub mod callable;
pub mod channel;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod frame;
pub mod fundamentals;
#[cfg(feature = "image")]
pub mod image;
pub mod runtime;
pub mod scheduler;

// Core evaluation types.
pub use callable::Callable;
pub use context::{Context, ContextId, ContextState};
pub use frame::Frame;

// Evaluator entry point (exported for embedding and for direct use from
// a host that drives its own scheduling loop).
pub use evaluator::run_context;

// Scheduler.
pub use scheduler::{Event, RunOutcome, Scheduler, StepOutcome};

// Character-channel contract consumed by an external parser.
pub use channel::{CharChannel, StrChannel};

// The aggregate value threaded through the embedding API (§9 "no hidden
// global singletons").
pub use runtime::Runtime;

// FFI-safe error reporting, exported for hosts linking the `staticlib`.
pub use error::{clear_runtime_error, has_runtime_error, set_runtime_error, take_runtime_error};
pub use error::{limn_clear_error, limn_get_error, limn_has_error, limn_take_error};

#[cfg(feature = "image")]
pub use image::{ImageError, ImageHeader, IMAGE_MAGIC, IMAGE_VERSION};
