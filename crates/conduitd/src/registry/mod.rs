//! Command registry mapping method names to handler descriptors.
//!
//! Handlers are registered on a [`RegistryBuilder`] during start-up. Calling
//! [`RegistryBuilder::freeze`] consumes the builder and produces the
//! immutable [`CommandRegistry`] shared by the dispatcher, so registration
//! after the server starts is impossible by construction and lookups need no
//! synchronisation.
//!
//! Names under the `rpc.` prefix are reserved for built-in methods:
//!
//! - `rpc.ping` answers `{}`.
//! - `rpc.methods` lists every registered method with its description,
//!   thread affinity, and parameter schema.
//!
//! Parameter schemas are JSON Schema documents. They are compiled when the
//! method is registered and published verbatim by `rpc.methods`.

mod handler;
mod schema;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Value, json};
use thiserror::Error;

use crate::dispatch::CallContext;

pub use self::handler::{Handler, HandlerError};
pub use self::schema::{CompiledSchema, SchemaViolation, accept_any};

/// Prefix reserved for built-in methods.
pub const RESERVED_PREFIX: &str = "rpc.";

/// Thread a handler must run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ThreadAffinity {
    /// Only the designated execution thread may run the handler.
    #[default]
    MainThread,
    /// The handler touches no thread-bound state.
    AnyThread,
}

impl ThreadAffinity {
    /// Snake-case name used in listings and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MainThread => "main_thread",
            Self::AnyThread => "any_thread",
        }
    }
}

impl fmt::Display for ThreadAffinity {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Errors raised while registering or resolving methods.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("method '{method}' is already registered")]
    DuplicateMethod { method: String },
    #[error("invalid method name '{method}': {reason}")]
    InvalidName { method: String, reason: &'static str },
    #[error("method '{method}' uses the reserved '{RESERVED_PREFIX}' prefix")]
    ReservedName { method: String },
    #[error("method '{method}' is not registered")]
    UnknownMethod { method: String },
    #[error("method '{method}' declares an invalid params schema: {reason}")]
    InvalidSchema { method: String, reason: String },
}

/// Registration record for one method.
pub struct HandlerDescriptor {
    method: String,
    description: String,
    schema: Value,
    validator: Option<CompiledSchema>,
    affinity: ThreadAffinity,
    handler: Arc<dyn Handler>,
}

impl HandlerDescriptor {
    /// Creates a main-thread descriptor that accepts any params.
    pub fn new<F>(method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&CallContext, Value) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        Self::from_handler(method, Arc::new(handler))
    }

    /// Creates a descriptor around an existing handler object.
    pub fn from_handler(method: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self {
            method: method.into(),
            description: String::new(),
            schema: accept_any(),
            validator: None,
            affinity: ThreadAffinity::default(),
            handler,
        }
    }

    /// Sets the human-readable description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the JSON Schema that params must satisfy.
    #[must_use]
    pub fn schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    /// Sets the thread affinity.
    #[must_use]
    pub fn affinity(mut self, affinity: ThreadAffinity) -> Self {
        self.affinity = affinity;
        self
    }

    /// Method name.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Thread the handler must run on.
    pub fn thread_affinity(&self) -> ThreadAffinity {
        self.affinity
    }

    /// Declared JSON Schema for params.
    pub fn param_schema(&self) -> &Value {
        &self.schema
    }

    /// Checks `params` against the compiled schema.
    ///
    /// Built-in methods are never compiled and accept any params.
    ///
    /// # Errors
    ///
    /// Returns the first [`SchemaViolation`] reported by the validator.
    pub fn validate_params(&self, params: &Value) -> Result<(), SchemaViolation> {
        match &self.validator {
            Some(validator) => validator.validate(params),
            None => Ok(()),
        }
    }

    /// Registered callable.
    pub fn handler(&self) -> &dyn Handler {
        self.handler.as_ref()
    }

    fn listing(&self) -> Value {
        json!({
            "name": self.method,
            "description": self.description,
            "affinity": self.affinity.as_str(),
            "params": self.schema,
        })
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("HandlerDescriptor")
            .field("method", &self.method)
            .field("affinity", &self.affinity)
            .finish_non_exhaustive()
    }
}

/// Mutable registration phase of the registry.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entries: HashMap<String, Arc<HandlerDescriptor>>,
}

impl RegistryBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateMethod`] when the name is taken,
    /// [`RegistryError::ReservedName`] for names under `rpc.`, and
    /// [`RegistryError::InvalidName`] for empty names or names containing
    /// whitespace, and [`RegistryError::InvalidSchema`] when the params
    /// schema does not compile.
    pub fn register(
        &mut self,
        mut descriptor: HandlerDescriptor,
    ) -> Result<&mut Self, RegistryError> {
        validate_name(&descriptor.method)?;
        if descriptor.method.starts_with(RESERVED_PREFIX) {
            return Err(RegistryError::ReservedName {
                method: descriptor.method,
            });
        }
        if self.entries.contains_key(&descriptor.method) {
            return Err(RegistryError::DuplicateMethod {
                method: descriptor.method,
            });
        }
        let validator = CompiledSchema::compile(&descriptor.schema).map_err(|reason| {
            RegistryError::InvalidSchema {
                method: descriptor.method.clone(),
                reason,
            }
        })?;
        descriptor.validator = Some(validator);
        self.entries
            .insert(descriptor.method.clone(), Arc::new(descriptor));
        Ok(self)
    }

    /// Number of user methods registered so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ends registration, adding the built-in methods.
    pub fn freeze(mut self) -> CommandRegistry {
        let ping = HandlerDescriptor::new("rpc.ping", |_context: &CallContext, _params: Value| {
            Ok(json!({}))
        })
        .description("Checks that the bridge is responsive.")
        .affinity(ThreadAffinity::AnyThread);
        self.entries
            .insert(ping.method.clone(), Arc::new(ping));

        let methods_description = "Lists the registered methods.";
        let mut listing: Vec<Value> = self.entries.values().map(|entry| entry.listing()).collect();
        listing.push(json!({
            "name": "rpc.methods",
            "description": methods_description,
            "affinity": ThreadAffinity::AnyThread.as_str(),
            "params": accept_any(),
        }));
        listing.sort_by(|left, right| {
            left["name"]
                .as_str()
                .unwrap_or_default()
                .cmp(right["name"].as_str().unwrap_or_default())
        });
        let listing = json!({ "methods": listing });
        let methods = HandlerDescriptor::new(
            "rpc.methods",
            move |_context: &CallContext, _params: Value| Ok(listing.clone()),
        )
        .description(methods_description)
        .affinity(ThreadAffinity::AnyThread);
        self.entries
            .insert(methods.method.clone(), Arc::new(methods));

        CommandRegistry {
            entries: Arc::new(self.entries),
        }
    }
}

/// Frozen method table. Cloning shares the table.
#[derive(Debug, Clone)]
pub struct CommandRegistry {
    entries: Arc<HashMap<String, Arc<HandlerDescriptor>>>,
}

impl CommandRegistry {
    /// Resolves a method to its descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownMethod`] when nothing is registered
    /// under `method`.
    pub fn lookup(&self, method: &str) -> Result<&Arc<HandlerDescriptor>, RegistryError> {
        self.entries
            .get(method)
            .ok_or_else(|| RegistryError::UnknownMethod {
                method: method.to_owned(),
            })
    }

    /// Returns true when `method` is registered.
    pub fn contains(&self, method: &str) -> bool {
        self.entries.contains_key(method)
    }

    /// Registered method names in sorted order, built-ins included.
    pub fn methods(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

fn validate_name(method: &str) -> Result<(), RegistryError> {
    let reason = if method.is_empty() {
        "name is empty"
    } else if method.chars().any(char::is_whitespace) {
        "name contains whitespace"
    } else {
        return Ok(());
    };
    Err(RegistryError::InvalidName {
        method: method.to_owned(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::dispatch::CallContext;

    fn echo(_context: &CallContext, params: Value) -> Result<Value, HandlerError> {
        Ok(params)
    }

    #[fixture]
    fn builder() -> RegistryBuilder {
        let mut builder = RegistryBuilder::new();
        builder
            .register(
                HandlerDescriptor::new("asset.list", echo)
                    .description("Lists assets.")
                    .schema(json!({
                        "type": "object",
                        "properties": { "path": { "type": "string" } },
                        "required": ["path"]
                    })),
            )
            .expect("register asset.list");
        builder
    }

    #[rstest]
    fn duplicate_methods_are_rejected(mut builder: RegistryBuilder) {
        let error = builder
            .register(HandlerDescriptor::new("asset.list", echo))
            .expect_err("duplicate must fail");
        assert_eq!(
            error,
            RegistryError::DuplicateMethod {
                method: "asset.list".into()
            }
        );
    }

    #[rstest]
    #[case("")]
    #[case("asset list")]
    #[case("asset.list\n")]
    fn malformed_names_are_rejected(mut builder: RegistryBuilder, #[case] name: &str) {
        let error = builder
            .register(HandlerDescriptor::new(name, echo))
            .expect_err("name must be rejected");
        assert!(matches!(error, RegistryError::InvalidName { .. }));
    }

    #[rstest]
    fn reserved_prefix_is_rejected(mut builder: RegistryBuilder) {
        let error = builder
            .register(HandlerDescriptor::new("rpc.ping", echo))
            .expect_err("reserved name must be rejected");
        assert!(matches!(error, RegistryError::ReservedName { .. }));
    }

    #[rstest]
    fn uncompilable_schemas_are_rejected(mut builder: RegistryBuilder) {
        let error = builder
            .register(HandlerDescriptor::new("asset.rename", echo).schema(json!({ "type": 7 })))
            .expect_err("schema must be rejected");
        assert!(
            matches!(&error, RegistryError::InvalidSchema { method, .. } if method == "asset.rename"),
            "unexpected error: {error}"
        );
        assert_eq!(builder.len(), 1);
    }

    #[rstest]
    fn registered_schemas_validate_params(builder: RegistryBuilder) {
        let registry = builder.freeze();
        let listing = registry.lookup("asset.list").expect("asset.list registered");
        assert_eq!(listing.validate_params(&json!({ "path": "/Game" })), Ok(()));
        let violation = listing
            .validate_params(&json!({ "path": false }))
            .expect_err("boolean path must be rejected");
        assert!(violation.message().contains("string"), "{violation}");

        let ping = registry.lookup("rpc.ping").expect("ping registered");
        assert_eq!(ping.validate_params(&json!(["anything"])), Ok(()));
    }

    #[rstest]
    fn freeze_adds_builtins(builder: RegistryBuilder) {
        let registry = builder.freeze();
        assert_eq!(registry.methods(), vec!["asset.list", "rpc.methods", "rpc.ping"]);
        let ping = registry.lookup("rpc.ping").expect("ping registered");
        assert_eq!(ping.thread_affinity(), ThreadAffinity::AnyThread);
    }

    #[rstest]
    fn lookup_reports_unknown_methods(builder: RegistryBuilder) {
        let registry = builder.freeze();
        assert_eq!(
            registry.lookup("foo.bar").map(|entry| entry.method().to_owned()),
            Err(RegistryError::UnknownMethod {
                method: "foo.bar".into()
            })
        );
    }

    #[rstest]
    fn method_listing_describes_every_entry(builder: RegistryBuilder) {
        let registry = builder.freeze();
        let descriptor = registry.lookup("rpc.methods").expect("listing registered");
        let context = CallContext::detached("rpc.methods");
        let listing = descriptor
            .handler()
            .call(&context, json!({}))
            .expect("listing succeeds");
        let methods = listing["methods"].as_array().expect("methods array");
        assert_eq!(methods.len(), 3);
        assert_eq!(methods[0]["name"], "asset.list");
        assert_eq!(methods[0]["affinity"], "main_thread");
        assert_eq!(
            methods[0]["params"],
            json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"]
            })
        );
        assert_eq!(methods[1]["params"], json!({}));
    }
}
