//! `RuntimeBuilder` for creating runtimes with non-default configuration.

use super::Runtime;
use crate::config::RuntimeConfig;
use crate::errors::RegistryError;
use crate::handler::{FunctionRef, HandlerRef};

/// Builder for [`Runtime`].
///
/// Handlers and functions added here are registered in order by
/// [`RuntimeBuilder::build`], which fails on the first duplicate.
#[derive(Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    handlers: Vec<HandlerRef>,
    functions: Vec<FunctionRef>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn gc_threshold(mut self, threshold: usize) -> Self {
        self.config.gc_threshold = threshold;
        self
    }

    #[must_use]
    pub fn describe_limits(mut self, depth: Option<usize>, max_len: Option<usize>) -> Self {
        self.config.describe_depth = depth;
        self.config.describe_max_len = max_len;
        self
    }

    #[must_use]
    pub fn io_thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.io_thread_name = name.into();
        self
    }

    #[must_use]
    pub fn collect_on_completion(mut self, enabled: bool) -> Self {
        self.config.collect_on_completion = enabled;
        self
    }

    #[must_use]
    pub fn handler(mut self, handler: HandlerRef) -> Self {
        self.handlers.push(handler);
        self
    }

    #[must_use]
    pub fn function(mut self, function: FunctionRef) -> Self {
        self.functions.push(function);
        self
    }

    pub fn build(self) -> Result<Runtime, RegistryError> {
        let mut runtime = Runtime::with_config(self.config);
        for handler in self.handlers {
            runtime.register_handler(handler)?;
        }
        for function in self.functions {
            runtime.register_function(function);
        }
        Ok(runtime)
    }
}
