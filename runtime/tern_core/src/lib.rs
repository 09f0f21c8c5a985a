//! Execution core of the Tern runtime.
//!
//! # Architecture
//!
//! - [`value`]: the tagged [`Value`] slot
//! - [`handler`]: the [`TypeHandler`] operator protocol and its registry
//! - [`gc`]: the instance arena and mark-and-sweep collector
//! - [`context`]: per-task data and continuation stacks, going deep,
//!   idle/unidle suspension
//! - [`vm`]: the view operators run against, and the interpreter loop
//! - [`step`]: resumable steps
//! - [`runtime`]: the runtime object and cooperative scheduler
//!
//! Built-in scalar handlers and the string type live in [`builtins`].
//! Containers and library functions are in `tern_std`.

pub mod builtins;
pub mod config;
pub mod context;
pub mod describe;
pub mod errors;
pub mod gc;
pub mod handler;
pub mod runtime;
pub mod step;
pub mod type_id;
pub mod value;
pub mod vm;

#[cfg(test)]
mod test_support;

use std::sync::Once;

pub use config::RuntimeConfig;
pub use context::{BlockingOp, CancelToken, DeepMark, ExecutionContext, TaskId, TaskState};
pub use describe::Describer;
pub use errors::{Failure, FailureClass, FailureKind, Outcome, RegistryError};
pub use gc::{CollectStats, Epoch, GcStats, Heap, Instance, InstanceData, Tracer};
pub use handler::{
    native_fn, FunctionRef, HandlerInfo, HandlerRef, HandlerRegistry, NativeFunction, Operator,
    TypeHandler,
};
pub use runtime::{RootId, Runtime, RuntimeBuilder};
pub use step::{Step, StepRef};
pub use type_id::TypeId;
pub use value::{Kind, Value, ValueFlags};
pub use vm::{Completion, Vm};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for debug output.
///
/// Call this once at startup. Safe to call multiple times.
/// Enable with `RUST_LOG=tern_core=debug` or `RUST_LOG=tern_core=trace`.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        // Only initialize if RUST_LOG is set
        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .init();
        }
    });
}
