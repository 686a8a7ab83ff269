//! Keyword-driven classifier + rule-table lookup producing an ordered
//! candidate list and a human-readable rationale. Pure function of message
//! text and configuration; holds no state of its own.

use serde::{Deserialize, Serialize};

use crate::config::RoutingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskClass {
    CodeEditing,
    Research,
    TerminalAutomation,
    GeneralChat,
}

impl TaskClass {
    fn rule_key(&self) -> &'static str {
        match self {
            TaskClass::CodeEditing => "code_editing",
            TaskClass::Research => "research",
            // Terminal automation collapses onto the general rule, per spec.md §4.F.
            TaskClass::TerminalAutomation | TaskClass::GeneralChat => "general_chat",
        }
    }
}

const CODE_EDITING_KEYWORDS: &[&str] = &[
    "refactor", "edit", "fix", "bug", "function", "class", "import", "code", "file", "module", "package",
    "syntax", "error", "compile", "test", "debug", "implement", "rewrite", "optimize", "generate", "create",
    "write", "make", "build", "new", "scaffold", "boilerplate", "template",
];

const RESEARCH_KEYWORDS: &[&str] = &[
    "research", "find", "search", "what is", "explain", "how does", "information", "article", "paper",
    "source", "citation", "reference", "learn about", "tell me about", "investigate",
];

const TERMINAL_KEYWORDS: &[&str] =
    &["run", "execute", "command", "terminal", "shell", "script", "automate", "workflow", "cli", "bash", "zsh"];

fn classify(message: &str) -> TaskClass {
    let lower = message.to_lowercase();
    if CODE_EDITING_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        TaskClass::CodeEditing
    } else if RESEARCH_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        TaskClass::Research
    } else if TERMINAL_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        TaskClass::TerminalAutomation
    } else {
        TaskClass::GeneralChat
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub selected_tools: Vec<String>,
    pub reasoning: String,
}

/// Route a chat request to an ordered list of provider candidates.
///
/// `explicit_tool`, when present, always wins outright per the testable
/// property `route(m, explicit_tool=T) == [T]`.
pub fn route(message: &str, explicit_tool: Option<&str>, config: &RoutingConfig) -> RoutingDecision {
    if let Some(tool) = explicit_tool {
        return RoutingDecision { selected_tools: vec![tool.to_string()], reasoning: "explicit".to_string() };
    }

    let class = classify(message);
    let rule_key = class.rule_key();
    let candidates = match rule_key {
        "code_editing" => &config.code_editing,
        "research" => &config.research,
        _ => &config.general_chat,
    };

    if candidates.is_empty() {
        RoutingDecision {
            selected_tools: vec![config.default_tool.clone()],
            reasoning: format!("classified as {rule_key}; rule table empty, falling back to default tool"),
        }
    } else {
        RoutingDecision { selected_tools: candidates.clone(), reasoning: format!("classified as {rule_key}") }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RoutingConfig {
        RoutingConfig {
            default_tool: "gpt".to_string(),
            code_editing: vec!["claude".to_string(), "gpt".to_string()],
            research: vec!["perplexity".to_string()],
            general_chat: vec!["gpt".to_string()],
        }
    }

    #[test]
    fn explicit_tool_always_wins() {
        let decision = route("refactor this code please", Some("gemini"), &config());
        assert_eq!(decision.selected_tools, vec!["gemini".to_string()]);
        assert_eq!(decision.reasoning, "explicit");
    }

    #[test]
    fn code_editing_keywords_route_to_code_editing_rule() {
        let decision = route("please refactor this function", None, &config());
        assert_eq!(decision.selected_tools, vec!["claude".to_string(), "gpt".to_string()]);
    }

    #[test]
    fn research_keywords_route_to_research_rule() {
        let decision = route("can you research this topic for me", None, &config());
        assert_eq!(decision.selected_tools, vec!["perplexity".to_string()]);
    }

    #[test]
    fn terminal_keywords_collapse_to_general_rule() {
        let decision = route("run this shell script", None, &config());
        assert_eq!(decision.selected_tools, vec!["gpt".to_string()]);
    }

    #[test]
    fn unclassified_message_falls_back_to_general_chat() {
        let decision = route("hello, how are you?", None, &config());
        assert_eq!(decision.selected_tools, vec!["gpt".to_string()]);
    }

    #[test]
    fn empty_rule_table_falls_back_to_default_tool() {
        let cfg = RoutingConfig { code_editing: vec![], ..config() };
        let decision = route("fix this bug", None, &cfg);
        assert_eq!(decision.selected_tools, vec!["gpt".to_string()]);
    }

    #[test]
    fn first_match_wins_ordering() {
        assert_eq!(classify("please refactor and also research this"), TaskClass::CodeEditing);
    }
}
