//! Prompt rendering and response parsing.

use minijinja::Environment;
use serde::Serialize;

use super::{ChatMessage, DecisionContext, DecisionError, LlmDecision, Role};

const DECISION_TEMPLATE: &str = include_str!("../templates/decision-prompt.md.jinja");

const CONTEXT_OPEN: &str = "<context>";
const CONTEXT_CLOSE: &str = "</context>";

pub const SYSTEM_PROMPT: &str = "You are a careful git workflow assistant. \
You look at what a developer has been doing and propose at most one git action. \
Prefer doing nothing over doing something surprising. Never commit directly to a protected branch. \
Always answer with a single JSON object.";

#[derive(Serialize)]
struct PromptContext<'a> {
    #[serde(flatten)]
    ctx: &'a DecisionContext,
    context_json: String,
}

/// Render the chat transcript sent to the provider for `ctx`.
pub fn build_messages(ctx: &DecisionContext) -> Result<Vec<ChatMessage>, DecisionError> {
    let context_json = serde_json::to_string(ctx)
        .map_err(|e| DecisionError::Config(format!("serializing decision context: {e}")))?;

    let mut env = Environment::new();
    env.add_template("decision-prompt", DECISION_TEMPLATE)
        .map_err(|e| DecisionError::Config(format!("decision prompt template: {e}")))?;
    let rendered = env
        .get_template("decision-prompt")
        .and_then(|t| t.render(PromptContext { ctx, context_json }))
        .map_err(|e| DecisionError::Config(format!("rendering decision prompt: {e}")))?;

    Ok(vec![
        ChatMessage::new(Role::System, SYSTEM_PROMPT),
        ChatMessage::new(Role::User, &rendered),
    ])
}

/// Recover the structured context embedded in a rendered prompt.
pub fn extract_context(prompt: &str) -> Option<DecisionContext> {
    let start = prompt.rfind(CONTEXT_OPEN)? + CONTEXT_OPEN.len();
    let end = prompt[start..].find(CONTEXT_CLOSE)? + start;
    serde_json::from_str(prompt[start..end].trim()).ok()
}

/// Pull the JSON object out of a model reply, tolerating code fences and
/// surrounding prose.
fn json_block(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// Parse and validate a raw provider reply into a decision.
///
/// `action`, a numeric `confidence` and `reasoning` are required; confidence
/// is clamped to 0..=1.
pub fn parse_decision(raw: &str) -> Result<LlmDecision, DecisionError> {
    let block = json_block(raw).ok_or_else(|| DecisionError::Parse("no JSON object in response".into()))?;
    let value: serde_json::Value =
        serde_json::from_str(block).map_err(|e| DecisionError::Parse(e.to_string()))?;

    let action = value
        .get("action")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| DecisionError::Parse("missing \"action\"".into()))?;
    let confidence = value
        .get("confidence")
        .and_then(serde_json::Value::as_f64)
        .filter(|c| c.is_finite())
        .ok_or_else(|| DecisionError::Parse("missing numeric \"confidence\"".into()))?;
    let reasoning = value
        .get("reasoning")
        .and_then(|v| v.as_str())
        .ok_or_else(|| DecisionError::Parse("missing \"reasoning\"".into()))?;

    let mut decision = LlmDecision::new(&action.to_ascii_lowercase(), confidence, reasoning);
    decision.requires_approval = value
        .get("requires_approval")
        .or_else(|| value.get("requiresApproval"))
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);
    decision.alternative_actions = value
        .get("alternative_actions")
        .or_else(|| value.get("alternativeActions"))
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();
    decision.risk_assessment = value
        .get("risk_assessment")
        .or_else(|| value.get("riskAssessment"))
        .and_then(|v| v.as_str())
        .map(String::from);
    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::testing;
    use crate::events::EventType;

    #[test]
    fn parses_plain_json() {
        let decision =
            parse_decision(r#"{"action":"commit","confidence":0.92,"reasoning":"lots of changes"}"#)
                .unwrap();
        assert_eq!(decision.action, "commit");
        assert!((decision.confidence - 0.92).abs() < f64::EPSILON);
        assert!(!decision.requires_approval);
    }

    #[test]
    fn parses_fenced_json_with_prose() {
        let raw = "Sure.\n```json\n{\"action\":\"Branch\",\"confidence\":0.7,\"reasoning\":\"on main\",\"requiresApproval\":true,\"alternativeActions\":[\"stash\"]}\n```";
        let decision = parse_decision(raw).unwrap();
        assert_eq!(decision.action, "branch");
        assert!(decision.requires_approval);
        assert_eq!(decision.alternative_actions, vec!["stash"]);
    }

    #[test]
    fn clamps_confidence() {
        let decision =
            parse_decision(r#"{"action":"commit","confidence":3,"reasoning":"x"}"#).unwrap();
        assert_eq!(decision.confidence, 1.0);
    }

    #[test]
    fn rejects_missing_fields() {
        for raw in [
            r#"{"confidence":0.5,"reasoning":"x"}"#,
            r#"{"action":"commit","reasoning":"x"}"#,
            r#"{"action":"commit","confidence":"high","reasoning":"x"}"#,
            r#"{"action":"commit","confidence":0.5}"#,
            "no json here",
        ] {
            assert!(
                matches!(parse_decision(raw), Err(DecisionError::Parse(_))),
                "accepted: {raw}"
            );
        }
    }

    #[test]
    fn prompt_embeds_recoverable_context() {
        let ctx = testing::context(EventType::UncommittedChanges, "main", true, 4).at_hour(22);
        let messages = build_messages(&ctx).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        let user = &messages[1].content;
        assert!(user.contains("Branch: main (protected) (main)"));
        assert!(user.contains("outside working hours"));
        assert!(user.contains("commit, checkpoint, branch, pr, stash, none"));
        assert_eq!(extract_context(user), Some(ctx));
    }
}
