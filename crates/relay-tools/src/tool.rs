use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use relay_llm::ToolSchema;
use relay_types::RelayError;
use serde::{Deserialize, Serialize};

/// Definition of a tool that can be presented to a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// A tool the loop can invoke locally.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    async fn execute(&self, arguments: serde_json::Value) -> relay_types::Result<String>;
}

/// A registered definition and, when the tool is locally runnable, its executor.
#[derive(Clone)]
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub executor: Option<Arc<dyn Tool>>,
}

impl RegisteredTool {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn has_executor(&self) -> bool {
        self.executor.is_some()
    }
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("definition", &self.definition)
            .field("has_executor", &self.has_executor())
            .finish()
    }
}

/// Registry that holds named tools and provides lookup.
#[derive(Clone, Default, Debug)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let definition = tool.definition();
        tracing::debug!(tool = %definition.name, "Registered tool");
        self.tools.insert(
            definition.name.clone(),
            RegisteredTool {
                definition,
                executor: Some(Arc::new(tool)),
            },
        );
    }

    /// Register a schema the model may see but that has no local executor.
    pub fn register_definition(&mut self, definition: ToolDefinition) {
        self.tools.insert(
            definition.name.clone(),
            RegisteredTool {
                definition,
                executor: None,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    /// Look up every selected name, failing on the first unknown one.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<RegisteredTool>, RelayError> {
        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                self.tools
                    .get(name)
                    .cloned()
                    .ok_or_else(|| RelayError::ToolNotFound {
                        tool: name.to_string(),
                    })
            })
            .collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition.clone()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
