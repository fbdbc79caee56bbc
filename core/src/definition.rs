//! Resource definitions.
//!
//! A [`ResourceDefinition`] bundles what a resource author supplies: handlers for each
//! request type, validation rules, the keys whose change forces a replacement, and an
//! optional long-running configuration. Handlers may be given in callback form or as
//! async functions; [`ResourceDefinitionBuilder::build`] resolves each request type to a
//! single callback handler once, so the dispatcher never inspects handler shapes.

use crate::handler::{
    AsyncCreateFn, AsyncDeleteFn, AsyncNoUpdateFn, AsyncUpdateFn, CreateFn, DeleteFn,
    HandlerError, HandlerResult, NoUpdateFn, Reply, UpdateFn, adapt_create,
    adapt_delete, adapt_no_update, adapt_update,
};
use crate::long_running::LongRunning;
use crate::validation::ValidationRules;
use futures::FutureExt as _;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Everything the dispatcher needs to know about a resource.
#[derive(Clone, Default)]
pub struct ResourceDefinition {
    /// Create handler
    pub create: Option<CreateFn>,
    /// Update handler
    pub update: Option<UpdateFn>,
    /// Delete handler
    pub delete: Option<DeleteFn>,
    /// Handler for updates whose parameters did not change
    pub no_update: Option<NoUpdateFn>,
    /// Validation mechanisms
    pub validation: ValidationRules,
    /// Top-level keys whose change turns an Update into a Create
    pub triggers_replacement: Vec<String>,
    /// Long-running configuration
    pub long_running: Option<LongRunning>,
}

impl fmt::Debug for ResourceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDefinition")
            .field("create", &self.create.is_some())
            .field("update", &self.update.is_some())
            .field("delete", &self.delete.is_some())
            .field("no_update", &self.no_update.is_some())
            .field("validation", &self.validation)
            .field("triggers_replacement", &self.triggers_replacement)
            .field("long_running", &self.long_running)
            .finish()
    }
}

impl ResourceDefinition {
    /// Start building a definition.
    #[must_use]
    pub fn builder() -> ResourceDefinitionBuilder {
        ResourceDefinitionBuilder::default()
    }
}

/// Builder for [`ResourceDefinition`].
#[derive(Default)]
pub struct ResourceDefinitionBuilder {
    create: Option<CreateFn>,
    update: Option<UpdateFn>,
    delete: Option<DeleteFn>,
    no_update: Option<NoUpdateFn>,
    async_create: Option<AsyncCreateFn>,
    async_update: Option<AsyncUpdateFn>,
    async_delete: Option<AsyncDeleteFn>,
    async_no_update: Option<AsyncNoUpdateFn>,
    validation: ValidationRules,
    triggers_replacement: Vec<String>,
    long_running: Option<LongRunning>,
}

impl ResourceDefinitionBuilder {
    /// Callback Create handler: `(params, reply)`.
    #[must_use]
    pub fn create<F>(mut self, handler: F) -> Self
    where
        F: Fn(Value, Reply) + Send + Sync + 'static,
    {
        self.create = Some(Arc::new(handler));
        self
    }

    /// Callback Update handler: `(physical_id, params, old_params, reply)`.
    #[must_use]
    pub fn update<F>(mut self, handler: F) -> Self
    where
        F: Fn(String, Value, Value, Reply) + Send + Sync + 'static,
    {
        self.update = Some(Arc::new(handler));
        self
    }

    /// Callback Delete handler: `(physical_id, params, reply)`.
    #[must_use]
    pub fn delete<F>(mut self, handler: F) -> Self
    where
        F: Fn(String, Value, Reply) + Send + Sync + 'static,
    {
        self.delete = Some(Arc::new(handler));
        self
    }

    /// Callback NoUpdate handler: `(physical_id, params, reply)`.
    #[must_use]
    pub fn no_update<F>(mut self, handler: F) -> Self
    where
        F: Fn(String, Value, Reply) + Send + Sync + 'static,
    {
        self.no_update = Some(Arc::new(handler));
        self
    }

    /// Async Create handler: `(params)`.
    #[must_use]
    pub fn create_async<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HandlerResult, HandlerError>> + Send + 'static,
    {
        self.async_create = Some(Arc::new(move |params| handler(params).boxed()));
        self
    }

    /// Async Update handler: `(physical_id, params, old_params)`.
    #[must_use]
    pub fn update_async<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(String, Value, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HandlerResult, HandlerError>> + Send + 'static,
    {
        self.async_update = Some(Arc::new(move |id, params, old| handler(id, params, old).boxed()));
        self
    }

    /// Async Delete handler: `(physical_id, params)`.
    #[must_use]
    pub fn delete_async<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HandlerResult, HandlerError>> + Send + 'static,
    {
        self.async_delete = Some(Arc::new(move |id, params| handler(id, params).boxed()));
        self
    }

    /// Async NoUpdate handler: `(physical_id, params)`.
    #[must_use]
    pub fn no_update_async<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HandlerResult, HandlerError>> + Send + 'static,
    {
        self.async_no_update = Some(Arc::new(move |id, params| handler(id, params).boxed()));
        self
    }

    /// Custom validation predicate; `Some(message)` means invalid.
    #[must_use]
    pub fn validate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(Option<&Value>) -> Option<String> + Send + Sync + 'static,
    {
        self.validation.validate = Some(Arc::new(predicate));
        self
    }

    /// Inline JSON Schema (draft 4).
    #[must_use]
    pub fn schema(mut self, schema: Value) -> Self {
        self.validation.schema = Some(schema);
        self
    }

    /// Path segments of a JSON Schema file.
    #[must_use]
    pub fn schema_path<I, S>(mut self, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.validation.schema_path = Some(segments.into_iter().map(Into::into).collect());
        self
    }

    /// Keys whose change turns an Update into a Create.
    #[must_use]
    pub fn triggers_replacement<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.triggers_replacement = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Long-running configuration.
    #[must_use]
    pub fn long_running(mut self, config: LongRunning) -> Self {
        self.long_running = Some(config);
        self
    }

    /// Resolve handlers and produce the definition.
    ///
    /// When both a callback and an async handler are given for the same request type, the
    /// callback is used and a warning is logged.
    #[must_use]
    pub fn build(self) -> ResourceDefinition {
        ResourceDefinition {
            create: resolve("Create", self.create, self.async_create.map(adapt_create)),
            update: resolve("Update", self.update, self.async_update.map(adapt_update)),
            delete: resolve("Delete", self.delete, self.async_delete.map(adapt_delete)),
            no_update: resolve(
                "NoUpdate",
                self.no_update,
                self.async_no_update.map(adapt_no_update),
            ),
            validation: self.validation,
            triggers_replacement: self.triggers_replacement,
            long_running: self.long_running,
        }
    }
}

fn resolve<T>(name: &str, callback: Option<T>, adapted: Option<T>) -> Option<T> {
    match (callback, adapted) {
        (Some(callback), Some(_)) => {
            tracing::warn!(
                handler = name,
                "Both {name} and Async{name} are defined; using the callback {name} handler"
            );
            Some(callback)
        }
        (callback, adapted) => callback.or(adapted),
    }
}
