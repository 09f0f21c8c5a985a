//! Containers and core native functions for the Tern runtime.
//!
//! [`install`] registers the [`ArrayHandler`] and [`DictHandler`] types and
//! binds the core functions (`toString`, `describe`, `len`, `sleep`) as
//! globals of a [`Runtime`].

pub mod array;
pub mod dict;
pub mod functions;

use tern_core::errors::access_error;
use tern_core::{HandlerRef, Outcome, RegistryError, Runtime, TypeId, Vm};

pub use array::ArrayHandler;
pub use dict::DictHandler;

/// Register the container types and core functions on `runtime`.
pub fn install(runtime: &mut Runtime) -> Result<(), RegistryError> {
    runtime.register_handler(array::handler())?;
    runtime.register_handler(dict::handler())?;
    for function in functions::all() {
        runtime.register_function(function);
    }
    tracing::debug!("installed standard library");
    Ok(())
}

/// The handler registered under `id`, or an access failure naming `name`.
pub(crate) fn registered(vm: &Vm<'_>, id: TypeId, name: &str) -> Outcome<HandlerRef> {
    vm.registry()
        .by_type(id)
        .cloned()
        .ok_or_else(|| access_error(format!("type '{name}' is not registered")))
}
