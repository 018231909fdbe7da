//! Tool registry: the session's snapshot of discovered tools.
//!
//! The snapshot is replaced wholesale on every refresh and handed out as an
//! `Arc`, so a call in flight keeps the descriptors it started with while a
//! refresh installs new ones.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};

use crate::correlator::Correlator;
use crate::error::McpError;
use crate::protocol::{methods, McpToolDef, ToolsListResult};
use crate::schema::{InputSchema, SchemaViolations};

/// Upper bound on `tools/list` pages, in case a server keeps handing out
/// cursors.
const MAX_PAGES: usize = 100;

/// An invocable tool as the server described it.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// The structural view used for argument validation.
    pub schema: InputSchema,
    /// The schema exactly as received.
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn validate(&self, arguments: &Value) -> Result<(), SchemaViolations> {
        self.schema.validate(&self.name, arguments)
    }
}

impl From<McpToolDef> for ToolDescriptor {
    fn from(def: McpToolDef) -> Self {
        Self {
            schema: InputSchema::from_json_schema(&def.input_schema),
            name: def.name,
            description: def.description,
            input_schema: def.input_schema,
        }
    }
}

/// Immutable set of descriptors, keyed by name.
#[derive(Debug, Default)]
pub struct ToolSnapshot {
    tools: BTreeMap<String, Arc<ToolDescriptor>>,
}

impl ToolSnapshot {
    /// Build a snapshot; a later duplicate name replaces an earlier one.
    pub fn new(defs: impl IntoIterator<Item = McpToolDef>) -> Self {
        let mut tools = BTreeMap::new();
        for def in defs {
            let name = def.name.clone();
            if tools.insert(name.clone(), Arc::new(ToolDescriptor::from(def))).is_some() {
                tracing::warn!(tool = %name, "MCP server listed tool twice, keeping the last");
            }
        }
        Self { tools }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ToolDescriptor>> {
        self.tools.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ToolDescriptor>> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    snapshot: RwLock<Arc<ToolSnapshot>>,
    stale: AtomicBool,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot. Cheap; no round-trip.
    pub fn snapshot(&self) -> Arc<ToolSnapshot> {
        self.snapshot.read().clone()
    }

    /// Install a new snapshot and clear the stale flag.
    pub fn replace(&self, snapshot: ToolSnapshot) {
        *self.snapshot.write() = Arc::new(snapshot);
        self.stale.store(false, Ordering::SeqCst);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Result<Arc<ToolDescriptor>, McpError> {
        self.snapshot
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| McpError::NotFound(name.to_string()))
    }

    /// Check `arguments` against the named tool's schema.
    pub fn validate(&self, name: &str, arguments: &Value) -> Result<Arc<ToolDescriptor>, McpError> {
        let tool = self.get(name)?;
        tool.validate(arguments)?;
        Ok(tool)
    }

    /// Re-run discovery and replace the snapshot.
    ///
    /// All pages are fetched before anything is installed; a failure on any
    /// page leaves the current snapshot in place.
    pub async fn refresh(&self, correlator: &Correlator, timeout: Duration) -> Result<Arc<ToolSnapshot>, McpError> {
        let mut defs = Vec::new();
        let mut cursor: Option<String> = None;

        for page in 0..MAX_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = correlator.request(methods::TOOLS_LIST, params, timeout).await?;
            let list: ToolsListResult = serde_json::from_value(result)
                .map_err(|e| McpError::Malformed(format!("invalid tools/list result: {e}")))?;

            tracing::debug!(page, count = list.tools.len(), "received MCP tools page");
            defs.extend(list.tools);

            match list.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => {
                    let snapshot = ToolSnapshot::new(defs);
                    tracing::info!(tool_count = snapshot.len(), "MCP tools discovered");
                    self.replace(snapshot);
                    return Ok(self.snapshot());
                }
            }
        }

        Err(McpError::Malformed(format!("tools/list did not finish within {MAX_PAGES} pages")))
    }

    /// Mark the snapshot as out of date (the server said its list changed).
    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::SeqCst);
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }
}
