use std::collections::HashMap;
use std::sync::Arc;

use claw_core::ids::ToolCallId;
use claw_core::tools::{Tool, ToolArguments, ToolDefinition, ToolError, ToolInvocation};

/// Tools available to the model, keyed by name.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. A tool with the same name is replaced.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::debug!(tool = %name, "replaced registered tool");
        }
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(Arc::clone)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tool definitions for the model, sorted by name.
    pub fn list(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Bind `arguments` to the named tool.
    pub fn build(
        &self,
        call_id: ToolCallId,
        name: &str,
        arguments: ToolArguments,
    ) -> Result<Box<dyn ToolInvocation>, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.build(call_id, arguments)
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::EchoTool;
    use claw_core::tools::ToolCategory;

    #[test]
    fn register_and_get() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool::new("read_file", ToolCategory::Read)));
        assert!(reg.contains("read_file"));
        assert!(reg.get("read_file").is_some());
        assert!(reg.get("nonexistent").is_none());
        assert_eq!(reg.count(), 1);
    }

    #[test]
    fn register_replaces_same_name() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool::new("shell", ToolCategory::Read)));
        reg.register(Arc::new(EchoTool::new("shell", ToolCategory::Execute)));
        assert_eq!(reg.count(), 1);
        assert_eq!(reg.get("shell").map(|t| t.category()), Some(ToolCategory::Execute));
    }

    #[test]
    fn unregister() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool::new("grep", ToolCategory::Search)));
        assert!(reg.unregister("grep"));
        assert!(!reg.contains("grep"));
        assert!(!reg.unregister("grep"));
    }

    #[test]
    fn names_and_list_are_sorted() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool::new("write_file", ToolCategory::Edit)));
        reg.register(Arc::new(EchoTool::new("glob", ToolCategory::Search)));
        reg.register(Arc::new(EchoTool::new("read_file", ToolCategory::Read)));

        assert_eq!(reg.names(), vec!["glob", "read_file", "write_file"]);
        let defs = reg.list();
        assert_eq!(defs[0].name, "glob");
        assert_eq!(defs[2].category, ToolCategory::Edit);
    }

    #[test]
    fn build_unknown_tool() {
        let reg = ToolRegistry::new();
        let err = reg
            .build(ToolCallId::from_raw("c1"), "nope", ToolArguments::new())
            .err()
            .map(|e| e.to_string());
        assert_eq!(err.as_deref(), Some("tool 'nope' not found"));
    }

    #[test]
    fn build_binds_call_id() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool::new("echo", ToolCategory::Read)));
        let invocation = reg
            .build(ToolCallId::from_raw("c7"), "echo", ToolArguments::new())
            .unwrap();
        assert_eq!(invocation.call_id().as_str(), "c7");
    }
}
