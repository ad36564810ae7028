//! Aggregated, name-addressable view over every connected provider's tools.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ConnectionHandle, ToolError};
use crate::error::{Error, Result};
use crate::model::ToolSpec;

/// Separator between provider label and tool name for namespaced tools.
pub const NAMESPACE_SEPARATOR: &str = "__";

/// What to do when two providers expose the same tool name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// The later registration fails catalog construction.
    #[default]
    Reject,
    /// The later registration is exposed as `<provider>__<tool>`.
    Namespace,
}

/// One tool in the catalog, routed to the connection that owns it.
#[derive(Clone)]
pub struct ToolDescriptor {
    /// Name exposed to the model; unique within the catalog.
    pub name: String,
    /// Name the provider knows the tool by.
    pub upstream_name: String,
    /// Label of the owning provider.
    pub provider: String,
    pub description: String,
    pub input_schema: Value,
    handle: Arc<ConnectionHandle>,
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("upstream_name", &self.upstream_name)
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

impl ToolDescriptor {
    pub fn spec(&self) -> ToolSpec {
        ToolSpec::new(&self.name, &self.description, self.input_schema.clone())
    }

    pub async fn invoke(&self, arguments: Value) -> std::result::Result<Value, ToolError> {
        self.handle.invoke(&self.upstream_name, arguments).await
    }
}

#[derive(Debug, Default)]
struct CatalogInner {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

/// Frozen snapshot of the tools available to an agent.
///
/// Cloning is cheap; all clones share the same snapshot. Iteration follows
/// provider configuration order, then each provider's listing order.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    inner: Arc<CatalogInner>,
}

impl ToolCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.tools.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.inner.index.get(name).map(|&i| &self.inner.tools[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.inner.tools.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.iter().map(|tool| tool.name.as_str()).collect()
    }

    /// Specs in catalog order, as offered to the model.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.iter().map(ToolDescriptor::spec).collect()
    }

    pub async fn invoke(&self, name: &str, arguments: Value) -> std::result::Result<Value, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tool.invoke(arguments).await
    }
}

/// Builds a [`ToolCatalog`] one connection at a time.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    policy: CollisionPolicy,
    inner: CatalogInner,
}

impl CatalogBuilder {
    pub fn new(policy: CollisionPolicy) -> Self {
        Self {
            policy,
            inner: CatalogInner::default(),
        }
    }

    /// Register every tool of a ready connection.
    pub fn register(&mut self, handle: &Arc<ConnectionHandle>) -> Result<()> {
        for spec in handle.tools() {
            let name = match self.owner_of(&spec.name) {
                None => spec.name.clone(),
                Some(first) => match self.policy {
                    CollisionPolicy::Reject => {
                        return Err(Error::ToolNameCollision {
                            name: spec.name.clone(),
                            first: first.to_string(),
                            second: handle.label().to_string(),
                        });
                    }
                    CollisionPolicy::Namespace => {
                        let namespaced =
                            format!("{}{NAMESPACE_SEPARATOR}{}", handle.label(), spec.name);
                        if let Some(first) = self.owner_of(&namespaced) {
                            return Err(Error::ToolNameCollision {
                                name: namespaced,
                                first: first.to_string(),
                                second: handle.label().to_string(),
                            });
                        }
                        namespaced
                    }
                },
            };

            self.inner.index.insert(name.clone(), self.inner.tools.len());
            self.inner.tools.push(ToolDescriptor {
                name,
                upstream_name: spec.name.clone(),
                provider: handle.label().to_string(),
                description: spec.description.clone(),
                input_schema: spec.input_schema.clone(),
                handle: Arc::clone(handle),
            });
        }
        Ok(())
    }

    fn owner_of(&self, name: &str) -> Option<&str> {
        self.inner
            .index
            .get(name)
            .map(|&i| self.inner.tools[i].provider.as_str())
    }

    pub fn build(self) -> ToolCatalog {
        ToolCatalog {
            inner: Arc::new(self.inner),
        }
    }
}
