//! Turn classification.
//!
//! A trainee turn is classified into one of the scenario's turn types. The
//! classifier asks the LLM first and trusts its answer only when it exactly
//! names a configured type id; otherwise it falls back to keyword scoring.
//! Classification is best-effort: an unclassifiable turn earns zero points
//! but never aborts the turn.

use salescoach_types::llm::{LlmError, Message, TaskKind};
use salescoach_types::scenario::ScenarioConfig;

use crate::llm::TaskRouter;

/// Result of analyzing a trainee turn.
#[derive(Debug, Clone, Default)]
pub struct TurnAnalysis {
    /// Matched turn type id, if any.
    pub turn_type: Option<String>,
    /// Progress points the type earns (zero when unclassified).
    pub points: u32,
    /// Whether the turn referenced the client's previous reply.
    pub contextual: bool,
}

/// Classify a turn against the scenario's turn types.
pub async fn classify_turn(
    router: &TaskRouter,
    scenario: &ScenarioConfig,
    turn: &str,
    last_client_reply: Option<&str>,
) -> TurnAnalysis {
    let turn_type = match ask_llm(router, scenario, turn).await {
        Ok(Some(id)) => Some(id),
        Ok(None) => keyword_match(scenario, turn),
        Err(err) => {
            tracing::warn!(error = %err, "Classification unavailable, using keyword fallback");
            keyword_match(scenario, turn)
        }
    };

    let points = turn_type
        .as_deref()
        .and_then(|id| scenario.turn_type(id))
        .map(|t| t.points)
        .unwrap_or(0);

    TurnAnalysis {
        turn_type,
        points,
        contextual: last_client_reply.is_some_and(|reply| references_reply(turn, reply)),
    }
}

/// Ask the classification route. The answer is trusted only when it exactly
/// names a configured turn type id (trimmed, case-insensitive).
async fn ask_llm(
    router: &TaskRouter,
    scenario: &ScenarioConfig,
    turn: &str,
) -> Result<Option<String>, LlmError> {
    let type_ids: Vec<&str> = scenario.turn_types.iter().map(|t| t.id.as_str()).collect();
    let prompt = format!(
        "Question: {turn}\n\nAnswer with exactly one of: {}",
        type_ids.join(", ")
    );

    let answer = router
        .complete(
            TaskKind::InputClassification,
            &scenario.prompts.classification_system,
            &[Message::user(prompt)],
        )
        .await?;

    let answer = answer
        .trim()
        .trim_matches(&['.', '"', '\''][..])
        .to_lowercase();
    Ok(scenario
        .turn_types
        .iter()
        .find(|t| t.id.to_lowercase() == answer)
        .map(|t| t.id.clone()))
}

/// Keyword fallback: the first turn type (in configured order) with a
/// keyword contained in the turn wins.
fn keyword_match(scenario: &ScenarioConfig, turn: &str) -> Option<String> {
    let lowered = turn.to_lowercase();
    scenario
        .turn_types
        .iter()
        .find(|t| t.keywords.iter().any(|kw| lowered.contains(&kw.to_lowercase())))
        .map(|t| t.id.clone())
}

/// Lexical check for active listening: does the turn pick up a significant
/// word from the client's previous reply?
fn references_reply(turn: &str, reply: &str) -> bool {
    let turn_lowered = turn.to_lowercase();
    reply
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() > 4)
        .any(|word| turn_lowered.contains(word))
}

#[cfg(test)]
mod tests {
    use super::*;
    use salescoach_types::scenario::{
        ClientCase, GameRules, LevelThreshold, Messages, Prompts, TurnType,
    };

    fn scenario() -> ScenarioConfig {
        ScenarioConfig {
            bot_name: "spin-sales".into(),
            game_rules: GameRules {
                max_turns: 10,
                target_progress: 80,
                min_turns_for_completion: 4,
                min_turn_length: 10,
                completion_bonus_xp: 50,
                contextual_bonus: 3,
                feedback_cooldown_secs: 5,
                feedback_cache_ttl_secs: 1200,
            },
            turn_types: vec![
                TurnType {
                    id: "situational".into(),
                    name: "Situational".into(),
                    keywords: vec!["how many".into(), "currently".into()],
                    points: 5,
                },
                TurnType {
                    id: "problem".into(),
                    name: "Problem".into(),
                    keywords: vec!["difficult".into(), "challenge".into()],
                    points: 8,
                },
            ],
            levels: vec![LevelThreshold { level: 1, min_xp: 0 }],
            badges: vec![],
            cases: vec![ClientCase {
                id: "c1".into(),
                text: "case".into(),
            }],
            prompts: Prompts {
                reply_system: "client: {case}".into(),
                feedback_system: "coach".into(),
                classification_system: "classify".into(),
            },
            messages: Messages {
                greeting: "hi".into(),
                turn_too_short: "short".into(),
                feedback_cooldown: "wait".into(),
                run_summary: "done".into(),
                level_up: "up".into(),
                badge_earned: "badge".into(),
                providers_unavailable: "later".into(),
            },
        }
    }

    #[test]
    fn test_keyword_match_first_configured_type_wins() {
        let s = scenario();
        assert_eq!(
            keyword_match(&s, "How many trucks do you run currently?"),
            Some("situational".to_string())
        );
        assert_eq!(
            keyword_match(&s, "What is the most difficult part?"),
            Some("problem".to_string())
        );
        assert_eq!(keyword_match(&s, "Hello there"), None);
    }

    #[test]
    fn test_references_reply_needs_significant_word() {
        assert!(references_reply(
            "You mentioned maintenance costs, how bad is it?",
            "Our maintenance budget doubled last year."
        ));
        // Only short/common words shared.
        assert!(!references_reply("Is it bad?", "Our costs are up."));
    }

    #[tokio::test]
    async fn test_classify_trusts_exact_llm_answer() {
        use crate::llm::router::{Candidate, TaskRoute};
        use crate::llm::{BoxLlmProvider, LlmProvider};
        use futures_util::Stream;
        use salescoach_types::llm::{
            CompletionRequest, CompletionResponse, ProviderCapabilities, StopReason, StreamEvent,
            Usage,
        };
        use std::collections::HashMap;
        use std::pin::Pin;
        use std::time::Duration;

        struct Fixed(&'static str, ProviderCapabilities);
        impl LlmProvider for Fixed {
            fn name(&self) -> &str {
                "fixed"
            }
            fn capabilities(&self) -> &ProviderCapabilities {
                &self.1
            }
            fn complete(
                &self,
                _request: &CompletionRequest,
            ) -> impl std::future::Future<Output = Result<CompletionResponse, LlmError>> + Send
            {
                let text = self.0;
                async move {
                    Ok(CompletionResponse {
                        id: "1".into(),
                        content: text.to_string(),
                        model: "m".into(),
                        stop_reason: StopReason::EndTurn,
                        usage: Usage::default(),
                    })
                }
            }
            fn stream(
                &self,
                _request: CompletionRequest,
            ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>>
            {
                Box::pin(futures_util::stream::empty())
            }
        }

        let caps = ProviderCapabilities {
            streaming: false,
            max_context_tokens: 8192,
            max_output_tokens: 256,
        };
        let mut routes = HashMap::new();
        routes.insert(
            TaskKind::InputClassification,
            TaskRoute {
                candidates: vec![Candidate::new(
                    BoxLlmProvider::new(Fixed("Problem", caps.clone())),
                    "m",
                )],
                max_tokens: 20,
                temperature: 0.0,
                max_transient_retries: 0,
            },
        );
        let router = TaskRouter::new(routes, Duration::from_secs(1));
        let s = scenario();

        // "Problem" matches the "problem" id case-insensitively.
        let analysis = classify_turn(&router, &s, "anything", None).await;
        assert_eq!(analysis.turn_type.as_deref(), Some("problem"));
        assert_eq!(analysis.points, 8);
    }
}
