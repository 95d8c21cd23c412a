//! Loads the task-specific prompt files (spec section 6) at startup and
//! renders `{named}` placeholders. Grounded on the teacher's
//! `ai_analysis.rs::generate_ai_report`, which builds its prompt as one
//! large hand-formatted string; this generalizes that into data-driven
//! templates so adding a task doesn't require a code change.

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Clone, Debug, Deserialize)]
pub struct PromptTemplate {
    pub system_prompt: String,
    pub user_prompt_template: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

pub struct PromptBuilder {
    templates: HashMap<String, PromptTemplate>,
}

impl PromptBuilder {
    pub fn load_from_dir(dir: &Path) -> Result<Self, std::io::Error> {
        let mut templates = HashMap::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default().to_string();
            let raw = fs::read_to_string(&path)?;
            let template: PromptTemplate = serde_json::from_str(&raw)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, format!("{}: {e}", path.display())))?;
            templates.insert(name, template);
        }
        Ok(Self { templates })
    }

    pub fn template(&self, name: &str) -> Option<&PromptTemplate> {
        self.templates.get(name)
    }

    /// Renders `(system_prompt, user_prompt)` substituting `{named}`
    /// placeholders in the user template. Missing variables are left as-is
    /// rather than erroring, matching a prompt file authored with optional
    /// fields.
    pub fn render(&self, name: &str, vars: &HashMap<&str, String>) -> Option<(String, String)> {
        let template = self.templates.get(name)?;
        let mut user = template.user_prompt_template.clone();
        for (key, value) in vars {
            user = user.replace(&format!("{{{key}}}"), value);
        }
        Some((template.system_prompt.clone(), user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    #[test]
    fn render_substitutes_named_placeholders() {
        let mut templates = StdHashMap::new();
        templates.insert(
            "rag".to_string(),
            PromptTemplate {
                system_prompt: "You are a security analyst.".to_string(),
                user_prompt_template: "Context:\n{context}\n\nQuestion: {query}".to_string(),
                max_tokens: Some(1024),
                temperature: Some(0.0),
            },
        );
        let builder = PromptBuilder { templates };

        let mut vars = StdHashMap::new();
        vars.insert("context", "firewall logs".to_string());
        vars.insert("query", "any blocked IPs?".to_string());

        let (system, user) = builder.render("rag", &vars).unwrap();
        assert_eq!(system, "You are a security analyst.");
        assert_eq!(user, "Context:\nfirewall logs\n\nQuestion: any blocked IPs?");
    }

    #[test]
    fn render_returns_none_for_unknown_template() {
        let builder = PromptBuilder { templates: StdHashMap::new() };
        assert!(builder.render("missing", &StdHashMap::new()).is_none());
    }
}
