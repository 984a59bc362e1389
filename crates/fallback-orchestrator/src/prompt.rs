//! Prompt templating.

use fallback_core::GenerationContext;
use std::fmt::Write;

/// Fixed preamble plus caller context plus the user message
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    preamble: String,
}

impl PromptTemplate {
    /// Create a template with the given system preamble
    #[must_use]
    pub fn new(preamble: impl Into<String>) -> Self {
        Self {
            preamble: preamble.into(),
        }
    }

    /// The system preamble
    #[must_use]
    pub fn preamble(&self) -> &str {
        &self.preamble
    }

    /// Render the prompt sent to providers
    #[must_use]
    pub fn render(&self, message: &str, context: &GenerationContext) -> String {
        let mut prompt = String::new();
        let preamble = self.preamble.trim();
        if !preamble.is_empty() {
            prompt.push_str(preamble);
            prompt.push_str("\n\n");
        }

        if !context.is_empty() {
            prompt.push_str("Known data:\n");
            for (key, value) in context.iter() {
                let _ = writeln!(prompt, "- {key}: {}", GenerationContext::display_value(value));
            }
            prompt.push('\n');
        }

        let _ = write!(prompt, "User: {}", message.trim());
        prompt
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new(fallback_config::PromptSettings::default().system_preamble)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_without_context() {
        let template = PromptTemplate::new("Be brief.");
        assert_eq!(
            template.render("  Analyze BTC ", &GenerationContext::new()),
            "Be brief.\n\nUser: Analyze BTC"
        );
    }

    #[test]
    fn test_render_with_context() {
        let template = PromptTemplate::new("Be brief.");
        let context = GenerationContext::new()
            .with("price", 64_000)
            .with("symbol", "BTC");

        assert_eq!(
            template.render("Analyze BTC", &context),
            "Be brief.\n\nKnown data:\n- price: 64000\n- symbol: BTC\n\nUser: Analyze BTC"
        );
    }

    #[test]
    fn test_empty_preamble_is_omitted() {
        let template = PromptTemplate::new("   ");
        assert_eq!(template.render("hi", &GenerationContext::new()), "User: hi");
    }
}
