//! Sample editor handlers served by the `conduitd` host.
//!
//! The host has no real editor behind it, so these handlers work over an
//! in-memory asset library. They run on the execution thread like real
//! editor operations would.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use serde_json::{Value, json};

use crate::dispatch::CallContext;
use crate::registry::{HandlerDescriptor, HandlerError, RegistryBuilder, RegistryError};

const WAIT_SLICE: Duration = Duration::from_millis(5);

/// In-memory stand-in for the editor's asset database.
#[derive(Debug, Clone, Default)]
pub struct AssetLibrary {
    assets: Arc<Mutex<BTreeSet<String>>>,
}

impl AssetLibrary {
    /// Builds a library holding `paths`.
    pub fn with_assets<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            assets: Arc::new(Mutex::new(paths.into_iter().map(Into::into).collect())),
        }
    }

    /// Assets directly under `folder`, or anywhere below it when `recursive`.
    pub fn list(&self, folder: &str, recursive: bool) -> Vec<String> {
        let prefix = format!("{}/", folder.trim_end_matches('/'));
        self.assets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|asset| {
                let rest = asset.strip_prefix(&prefix)?;
                (recursive || !rest.contains('/')).then(|| asset.clone())
            })
            .collect()
    }

    /// Adds an asset; returns false when it already exists.
    pub fn create(&self, path: &str) -> bool {
        self.assets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_owned())
    }
}

/// Registers `asset.list`, `asset.create` and `editor.wait` over `library`.
///
/// # Errors
///
/// Returns [`RegistryError`] when one of the methods is already registered
/// or one of the params schemas fails to compile.
pub fn register_sample_handlers(
    builder: &mut RegistryBuilder,
    library: &AssetLibrary,
) -> Result<(), RegistryError> {
    let listing = library.clone();
    builder.register(
        HandlerDescriptor::new("asset.list", move |_context: &CallContext, params: Value| {
            let folder = params["path"].as_str().unwrap_or("/");
            let recursive = params["recursive"].as_bool().unwrap_or(false);
            Ok(json!({ "assets": listing.list(folder, recursive) }))
        })
        .description("Lists the assets stored under a content folder.")
        .schema(json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "recursive": { "type": "boolean" }
            },
            "required": ["path"],
            "additionalProperties": false
        })),
    )?;

    let creating = library.clone();
    builder.register(
        HandlerDescriptor::new("asset.create", move |_context: &CallContext, params: Value| {
            let path = params["path"].as_str().unwrap_or_default();
            if !path.starts_with('/') {
                return Err(HandlerError::invalid_params("asset paths must be absolute"));
            }
            if !creating.create(path) {
                return Err(HandlerError::failed_with_data(
                    "asset already exists",
                    json!({ "path": path }),
                ));
            }
            Ok(json!({ "created": path }))
        })
        .description("Creates an empty asset at an absolute content path.")
        .schema(json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"],
            "additionalProperties": false
        })),
    )?;

    builder.register(
        HandlerDescriptor::new("editor.wait", |context: &CallContext, params: Value| {
            let requested = Duration::from_millis(params["ms"].as_u64().unwrap_or(0));
            while context.elapsed() < requested {
                context.checkpoint()?;
                if context.cancel_requested() {
                    return Err(HandlerError::failed("wait abandoned"));
                }
                thread::sleep(WAIT_SLICE.min(requested.saturating_sub(context.elapsed())));
            }
            Ok(json!({ "waited_ms": params["ms"] }))
        })
        .description("Blocks the editor thread for a number of milliseconds.")
        .schema(json!({
            "type": "object",
            "properties": { "ms": { "type": "integer", "minimum": 0 } },
            "required": ["ms"]
        })),
    )?;
    Ok(())
}
