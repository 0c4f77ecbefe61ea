// Result reconciliation: parse model output into typed results and join batch
// output lines back to the tasks that produced them.

use serde::de::DeserializeOwned;
use std::collections::HashMap;
use tracing::warn;

use crate::core::errors::{ItemError, ItemResult, ProviderError};
use crate::core::types::{AnalysisResult, AnalysisTask, PromptVariant};
use crate::services::inference::client::{ChatResponse, OutputLine, TokenUsage};

/// Parse the model's text into the result shape of `variant`.
///
/// Models sometimes wrap JSON in a markdown fence; that is tolerated.
/// Anything else that does not match the variant's schema is a parse error.
pub fn parse_payload(
    custom_id: &str,
    variant: PromptVariant,
    content: &str,
) -> ItemResult<AnalysisResult> {
    let body = strip_code_fence(content);
    let fail = |reason: String| ItemError::ResponseParse {
        custom_id: custom_id.to_string(),
        reason,
        raw: content.to_string(),
    };

    let result = match variant {
        PromptVariant::FashionAttributes => {
            AnalysisResult::FashionAttributes(decode(body).map_err(&fail)?)
        }
        PromptVariant::HookSlide => AnalysisResult::HookSlide(decode(body).map_err(&fail)?),
        PromptVariant::BackgroundColor => {
            AnalysisResult::BackgroundColor(decode(body).map_err(&fail)?)
        }
    };

    check_ranges(&result).map_err(fail)?;
    Ok(result)
}

/// Parse a chat-completions body, returning the result and its token usage
pub fn parse_chat_response(
    custom_id: &str,
    variant: PromptVariant,
    response: &ChatResponse,
) -> ItemResult<(AnalysisResult, TokenUsage)> {
    let content = response.content().ok_or_else(|| ItemError::ResponseParse {
        custom_id: custom_id.to_string(),
        reason: "response has no message content".to_string(),
        raw: serde_json::to_string(response).unwrap_or_default(),
    })?;
    let result = parse_payload(custom_id, variant, content)?;
    let usage = response.usage.unwrap_or_else(|| {
        warn!(custom_id, "Response carries no token usage, charging nothing");
        TokenUsage::default()
    });
    Ok((result, usage))
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, String> {
    serde_json::from_str(body).map_err(|e| e.to_string())
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag on the opening fence
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn check_ranges(result: &AnalysisResult) -> Result<(), String> {
    let (field, value) = match result {
        AnalysisResult::FashionAttributes(_) => return Ok(()),
        AnalysisResult::HookSlide(hook) => ("confidence", hook.confidence),
        AnalysisResult::BackgroundColor(bg) => ("uniformity", bg.uniformity),
    };
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(format!("{} {} is outside [0, 1]", field, value))
    }
}

/// What became of one line of batch output
#[derive(Debug)]
pub enum LineOutcome {
    Parsed {
        task: AnalysisTask,
        result: AnalysisResult,
        usage: TokenUsage,
    },
    /// The line belongs to a task, but that task produced no usable result
    Failed { task: AnalysisTask, error: ItemError },
    /// The line cannot be attributed to exactly one pending task
    Dropped { custom_id: String, reason: String },
}

/// Joins batch output lines to the tasks submitted with the job.
///
/// Each task is removed from the index the first time a line claims it, so a
/// task is reconciled at most once and a line is only ever attributed to the
/// task whose id it carries.
pub struct Reconciler {
    pending: HashMap<String, AnalysisTask>,
}

impl Reconciler {
    pub fn new(tasks: impl IntoIterator<Item = AnalysisTask>) -> Self {
        Self {
            pending: tasks
                .into_iter()
                .map(|task| (task.custom_id.clone(), task))
                .collect(),
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn reconcile_line(&mut self, line: &str) -> LineOutcome {
        let parsed: OutputLine = match serde_json::from_str(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                return LineOutcome::Dropped {
                    custom_id: String::new(),
                    reason: format!("unparseable output line: {}", e),
                }
            }
        };

        let Some(task) = self.pending.remove(&parsed.custom_id) else {
            return LineOutcome::Dropped {
                custom_id: parsed.custom_id,
                reason: "no pending task with this custom_id".to_string(),
            };
        };

        if let Some(error) = parsed.error {
            let message = match error.code {
                Some(code) => format!("{}: {}", code, error.message),
                None => error.message,
            };
            return LineOutcome::Failed {
                error: ItemError::ProviderCall {
                    custom_id: task.custom_id.clone(),
                    source: ProviderError::InvalidResponse(message),
                },
                task,
            };
        }

        let Some(response) = parsed.response else {
            return LineOutcome::Failed {
                error: ItemError::ResponseParse {
                    custom_id: task.custom_id.clone(),
                    reason: "line has neither response nor error".to_string(),
                    raw: line.to_string(),
                },
                task,
            };
        };

        if response.status_code != 200 {
            return LineOutcome::Failed {
                error: ItemError::ProviderCall {
                    custom_id: task.custom_id.clone(),
                    source: ProviderError::Status {
                        status: response.status_code,
                        body: response.body.to_string(),
                    },
                },
                task,
            };
        }

        let outcome = serde_json::from_value::<ChatResponse>(response.body)
            .map_err(|e| ItemError::ResponseParse {
                custom_id: task.custom_id.clone(),
                reason: format!("response body: {}", e),
                raw: line.to_string(),
            })
            .and_then(|body| parse_chat_response(&task.custom_id, task.variant, &body));

        match outcome {
            Ok((result, usage)) => LineOutcome::Parsed { task, result, usage },
            Err(error) => LineOutcome::Failed { task, error },
        }
    }

    /// Tasks no output line referred to
    pub fn into_unmatched(self) -> Vec<AnalysisTask> {
        let mut tasks: Vec<AnalysisTask> = self.pending.into_values().collect();
        tasks.sort_by_key(|task| task.sequence);
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AnalysisItem, BackgroundType, Brightness};
    use crate::services::inference::testing::{
        chat_response, error_line, fashion_json, hook_json, output_line,
    };

    fn task(sequence: usize, post: &str, variant: PromptVariant) -> AnalysisTask {
        AnalysisTask {
            custom_id: format!("{}-{}-{}", variant, sequence, post),
            sequence,
            item: AnalysisItem::new(post, format!("https://cdn/{}.jpg", sequence)),
            variant,
        }
    }

    #[test]
    fn test_parse_each_variant() {
        let fashion = parse_payload("c", PromptVariant::FashionAttributes, &fashion_json("grunge"))
            .unwrap();
        assert!(matches!(fashion, AnalysisResult::FashionAttributes(ref f) if f.aesthetic == "grunge"));

        let hook = parse_payload("c", PromptVariant::HookSlide, &hook_json(true, 0.92)).unwrap();
        assert_eq!(hook.variant(), PromptVariant::HookSlide);

        let bg = parse_payload(
            "c",
            PromptVariant::BackgroundColor,
            r##"{"primary_color":"beige","secondary_color":null,"hex":"#F5F5DC","type":"solid",
                "brightness":"light","uniformity":0.95,"suitable_for_matching":true}"##,
        )
        .unwrap();
        match bg {
            AnalysisResult::BackgroundColor(bg) => {
                assert_eq!(bg.background_type, BackgroundType::Solid);
                assert_eq!(bg.brightness, Brightness::Light);
            }
            other => panic!("unexpected variant {:?}", other),
        }
    }

    #[test]
    fn test_camel_case_payload_keys_are_accepted() {
        let hook = parse_payload(
            "c",
            PromptVariant::HookSlide,
            r#"{"isHookSlide":true,"confidence":0.8,"targetVibe":"cozy"}"#,
        )
        .unwrap();
        match &hook {
            AnalysisResult::HookSlide(hook) => {
                assert!(hook.is_hook_slide);
                assert_eq!(hook.target_vibe.as_deref(), Some("cozy"));
            }
            other => panic!("unexpected variant {:?}", other),
        }
        // Output stays snake_case
        let json = serde_json::to_value(&hook).unwrap();
        assert_eq!(json["is_hook_slide"], true);
        assert_eq!(json["target_vibe"], "cozy");

        let bg = parse_payload(
            "c",
            PromptVariant::BackgroundColor,
            r#"{"primaryColor":"sage","secondaryColor":"white","type":"gradient",
                "brightness":"medium","uniformity":0.4,"suitableForMatching":false}"#,
        )
        .unwrap();
        match bg {
            AnalysisResult::BackgroundColor(bg) => {
                assert_eq!(bg.primary_color, "sage");
                assert_eq!(bg.secondary_color.as_deref(), Some("white"));
                assert!(!bg.suitable_for_matching);
            }
            other => panic!("unexpected variant {:?}", other),
        }
    }

    #[test]
    fn test_response_without_usage_is_charged_nothing() {
        let mut response = chat_response(&hook_json(true, 0.6), TokenUsage::default());
        response.usage = None;

        let (result, usage) =
            parse_chat_response("hook_slide-0-p1", PromptVariant::HookSlide, &response).unwrap();
        assert_eq!(result.variant(), PromptVariant::HookSlide);
        assert_eq!(usage, TokenUsage::default());
    }

    #[test]
    fn test_fenced_payload_is_accepted() {
        let fenced = format!("```json\n{}\n```", hook_json(false, 0.1));
        assert!(parse_payload("c", PromptVariant::HookSlide, &fenced).is_ok());
    }

    #[test]
    fn test_wrong_shape_keeps_raw_payload() {
        let err = parse_payload("hook_slide-0-p1", PromptVariant::HookSlide, "sure! here you go")
            .unwrap_err();
        match err {
            ItemError::ResponseParse { custom_id, raw, .. } => {
                assert_eq!(custom_id, "hook_slide-0-p1");
                assert_eq!(raw, "sure! here you go");
            }
            other => panic!("unexpected error {:?}", other),
        }

        // Valid JSON for a different variant is still the wrong shape
        assert!(parse_payload("c", PromptVariant::HookSlide, &fashion_json("boho")).is_err());
    }

    #[test]
    fn test_out_of_range_confidence_rejected() {
        let err = parse_payload("c", PromptVariant::HookSlide, &hook_json(true, 1.7)).unwrap_err();
        assert_eq!(err.kind(), "response_parse");
    }

    #[test]
    fn test_reconciliation_is_a_bijection() {
        let tasks = vec![
            task(0, "p1", PromptVariant::HookSlide),
            task(1, "p1", PromptVariant::HookSlide),
            task(2, "p2", PromptVariant::HookSlide),
        ];
        let mut reconciler = Reconciler::new(tasks.clone());

        let lines = [
            output_line("hook_slide-2-p2", &hook_json(false, 0.2)),
            output_line("hook_slide-0-p1", &hook_json(true, 0.9)),
            output_line("hook_slide-0-p1", &hook_json(true, 0.8)),
            output_line("hook_slide-7-ghost", &hook_json(true, 0.8)),
        ];

        let mut matched = Vec::new();
        let mut dropped = Vec::new();
        for line in &lines {
            match reconciler.reconcile_line(line) {
                LineOutcome::Parsed { task, .. } => matched.push(task.custom_id),
                LineOutcome::Dropped { custom_id, .. } => dropped.push(custom_id),
                LineOutcome::Failed { error, .. } => panic!("unexpected failure {}", error),
            }
        }

        assert_eq!(matched, vec!["hook_slide-2-p2", "hook_slide-0-p1"]);
        assert_eq!(dropped, vec!["hook_slide-0-p1", "hook_slide-7-ghost"]);

        let unmatched = reconciler.into_unmatched();
        assert_eq!(unmatched.len(), 1);
        assert_eq!(unmatched[0].custom_id, "hook_slide-1-p1");
    }

    #[test]
    fn test_error_and_garbage_lines() {
        let mut reconciler = Reconciler::new(vec![
            task(0, "p1", PromptVariant::FashionAttributes),
            task(1, "p1", PromptVariant::FashionAttributes),
        ]);

        match reconciler.reconcile_line(&error_line("fashion_attributes-0-p1", "image too large")) {
            LineOutcome::Failed { task, error } => {
                assert_eq!(task.sequence, 0);
                assert_eq!(error.kind(), "provider_call");
                assert!(error.to_string().contains("image too large"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        match reconciler.reconcile_line(&output_line("fashion_attributes-1-p1", "not json")) {
            LineOutcome::Failed { error, .. } => assert_eq!(error.kind(), "response_parse"),
            other => panic!("unexpected outcome {:?}", other),
        }

        assert!(matches!(
            reconciler.reconcile_line("{{{"),
            LineOutcome::Dropped { .. }
        ));
        assert_eq!(reconciler.pending(), 0);
    }
}
