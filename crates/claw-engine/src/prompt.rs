use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::warn;

use claw_core::tools::ToolDefinition;

use crate::executor::panic_message;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Claw, a helpful AI assistant with access to tools.

When using tools:
1. Explain your intent before calling a tool
2. Use the exact tool name and parameters
3. Wait for results before proceeding
4. Report the outcome to the user

Be concise but thorough in your responses.";

const TOOL_GUIDELINES: &str = "## Tool Usage Guidelines

You have access to various tools. When you need to use a tool:
1. Explain your intent before calling the tool
2. Use the exact tool name and parameters
3. Wait for the tool result before proceeding

Available tools are provided in the function definitions.";

/// Produces a block of text for the system prompt (skills, memory, project
/// notes). Called once per turn.
pub trait ContextGenerator: Send + Sync {
    fn generate(&self) -> anyhow::Result<String>;
}

impl<F> ContextGenerator for F
where
    F: Fn() -> anyhow::Result<String> + Send + Sync,
{
    fn generate(&self) -> anyhow::Result<String> {
        self()
    }
}

/// Assembles the system prompt for each model call.
pub struct PromptBuilder {
    base: String,
    generators: Vec<(String, Arc<dyn ContextGenerator>)>,
}

impl PromptBuilder {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            generators: Vec::new(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Register a generator under `name`, replacing one with the same name.
    pub fn add_generator(&mut self, name: impl Into<String>, generator: Arc<dyn ContextGenerator>) {
        let name = name.into();
        match self.generators.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = generator,
            None => self.generators.push((name, generator)),
        }
    }

    pub fn remove_generator(&mut self, name: &str) -> bool {
        let before = self.generators.len();
        self.generators.retain(|(n, _)| n != name);
        self.generators.len() != before
    }

    pub fn generator_names(&self) -> Vec<&str> {
        self.generators.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Base prompt, then each generator's output in registration order, then
    /// the tool guidelines. A failing generator contributes nothing.
    pub fn build(&self, tools: &[ToolDefinition]) -> String {
        let mut parts = vec![self.base.clone()];

        for (name, generator) in &self.generators {
            let text = match catch_unwind(AssertUnwindSafe(|| generator.generate())) {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => {
                    warn!(generator = %name, error = %e, "context generator failed");
                    continue;
                }
                Err(panic) => {
                    warn!(generator = %name, panic = %panic_message(&panic), "context generator panicked");
                    continue;
                }
            };
            if !text.trim().is_empty() {
                parts.push(text);
            }
        }

        let mut guidelines = TOOL_GUIDELINES.to_string();
        if !tools.is_empty() {
            let names: Vec<String> = tools.iter().map(|t| format!("`{}`", t.name)).collect();
            guidelines.push_str(&format!("\nCurrently available: {}.", names.join(", ")));
        }
        parts.push(guidelines);

        parts.join("\n\n")
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_PROMPT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claw_core::tools::ToolCategory;

    fn gen(text: &'static str) -> Arc<dyn ContextGenerator> {
        Arc::new(move || -> anyhow::Result<String> { Ok(text.to_string()) })
    }

    #[test]
    fn default_prompt_layout() {
        let prompt = PromptBuilder::default().build(&[]);
        assert!(prompt.starts_with("You are Claw, a helpful AI assistant"));
        assert!(prompt.ends_with("Available tools are provided in the function definitions."));
        assert!(prompt.contains("\n\n## Tool Usage Guidelines\n\n"));
    }

    #[test]
    fn generators_in_registration_order() {
        let mut builder = PromptBuilder::new("base");
        builder.add_generator("memory", gen("## Memory\nremember this"));
        builder.add_generator("skills", gen("## Skills\nnone"));
        let prompt = builder.build(&[]);
        let memory = prompt.find("## Memory").unwrap();
        let skills = prompt.find("## Skills").unwrap();
        assert!(prompt.starts_with("base\n\n## Memory"));
        assert!(memory < skills);
    }

    #[test]
    fn failing_and_empty_generators_contribute_nothing() {
        let mut builder = PromptBuilder::new("base");
        builder.add_generator("broken", Arc::new(|| -> anyhow::Result<String> { anyhow::bail!("disk gone") }));
        builder.add_generator("empty", gen("   "));
        builder.add_generator(
            "panics",
            Arc::new(|| -> anyhow::Result<String> { panic!("generator bug") }),
        );
        builder.add_generator("ok", gen("fine"));
        let prompt = builder.build(&[]);
        assert!(prompt.starts_with("base\n\nfine\n\n## Tool Usage Guidelines"));
    }

    #[test]
    fn add_replaces_and_remove() {
        let mut builder = PromptBuilder::new("base");
        builder.add_generator("notes", gen("old"));
        builder.add_generator("notes", gen("new"));
        assert_eq!(builder.generator_names(), vec!["notes"]);
        assert!(builder.build(&[]).contains("new"));

        assert!(builder.remove_generator("notes"));
        assert!(!builder.remove_generator("notes"));
        assert!(!builder.build(&[]).contains("new"));
    }

    #[test]
    fn lists_tool_names() {
        let tools = vec![ToolDefinition {
            name: "read_file".into(),
            description: "Read a file".into(),
            category: ToolCategory::Read,
            parameters_schema: serde_json::json!({"type": "object"}),
        }];
        let prompt = PromptBuilder::new("base").build(&tools);
        assert!(prompt.ends_with("Currently available: `read_file`."));
    }
}
