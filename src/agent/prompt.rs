//! System prompt assembly.

use serde_json::Value;

use super::types::{AgentConfig, AgentContext};

/// Build the system prompt for one run: the agent's base instructions plus a
/// context section describing the patient, the requester and whatever earlier
/// pipeline steps produced.
pub fn build_system_prompt(config: &AgentConfig, ctx: &AgentContext) -> String {
    let tool_descriptions = config
        .tools
        .list_tools()
        .iter()
        .map(|t| format!("- **{}**: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n");

    let mut prompt = config.system_prompt.trim_end().to_string();

    if !tool_descriptions.is_empty() {
        prompt.push_str("\n\n## Available Tools\n\n");
        prompt.push_str(&tool_descriptions);
    }

    prompt.push_str("\n\n## Context\n\n");
    prompt.push_str(&format!("- Patient ID: {}\n", ctx.subject_id));
    prompt.push_str(&format!("- Requested by: {}\n", ctx.actor_id));

    if let Some(pipeline) = &ctx.pipeline {
        let available = pipeline.artifacts.to_map();
        if !available.is_empty() {
            prompt.push_str("\n### Artifacts from earlier steps\n\n");
            for (key, value) in &available {
                prompt.push_str(&format!("- {}: {}\n", key, render_value(value)));
            }
        }
    }

    if !ctx.extra.is_empty() {
        prompt.push_str("\n### Additional context\n\n");
        for (key, value) in &ctx.extra {
            prompt.push_str(&format!("- {}: {}\n", key, render_value(value)));
        }
    }

    prompt
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::EchoTool;
    use crate::tools::ToolRegistry;
    use serde_json::{json, Map};
    use std::sync::Arc;

    fn config() -> AgentConfig {
        AgentConfig {
            name: "scribe".to_string(),
            description: "writes notes".to_string(),
            model: "m".to_string(),
            system_prompt: "You write clinical notes.\n".to_string(),
            tools: ToolRegistry::from_tools(vec![Arc::new(EchoTool::named("echo"))]).unwrap(),
            max_iterations: 3,
            temperature: 0.2,
            max_tokens: 256,
        }
    }

    #[test]
    fn includes_tools_and_identity() {
        let prompt = build_system_prompt(&config(), &AgentContext::new("p-1", "dr-9"));
        assert!(prompt.starts_with("You write clinical notes."));
        assert!(prompt.contains("- **echo**: Echo the input"));
        assert!(prompt.contains("Patient ID: p-1"));
        assert!(prompt.contains("Requested by: dr-9"));
        assert!(!prompt.contains("Additional context"));
    }

    #[test]
    fn renders_extra_context() {
        let mut extra = Map::new();
        extra.insert("language".to_string(), json!("es"));
        extra.insert("allergies".to_string(), json!(["penicillin"]));
        let ctx = AgentContext::new("p-1", "dr-9").with_extra(extra);

        let prompt = build_system_prompt(&config(), &ctx);
        assert!(prompt.contains("- language: es"));
        assert!(prompt.contains(r#"- allergies: ["penicillin"]"#));
    }
}
