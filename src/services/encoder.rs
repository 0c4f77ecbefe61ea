use tracing::debug;

use crate::core::config::Config;
use crate::core::errors::ItemResult;
use crate::core::types::{AnalysisItem, AnalysisTask, PromptVariant};
use crate::services::inference::client::{
    ChatMessage, ChatRequest, ContentPart, ImageUrl, TaskLine, CHAT_COMPLETIONS_PATH,
};
use crate::utils::image_ops::resolve_image_ref;

const FASHION_PROMPT: &str = r#"Analyze the outfit in this image. Respond with a single JSON object and nothing else, using exactly these keys:
{"aesthetic": string, "colors": [string], "season": string, "occasion": string, "additional": [string]}
"aesthetic" is the dominant style (e.g. "streetwear", "old money", "coquette"). "colors" lists the main garment colors. "season" is one of spring, summer, autumn, winter or all-season. "additional" holds any other notable style tags."#;

const HOOK_SLIDE_PROMPT: &str = r#"Decide whether this image is a "hook slide": a cover image with a text overlay announcing the theme of the post (e.g. "Back to School Outfits"). Respond with a single JSON object and nothing else, using exactly these keys:
{"is_hook_slide": boolean, "confidence": number between 0 and 1, "theme": string or null, "text": string or null, "target_vibe": string or null}
"text" is the overlay text verbatim. Use null for fields that do not apply."#;

const BACKGROUND_PROMPT: &str = r#"Describe the background behind the subject of this image. Respond with a single JSON object and nothing else, using exactly these keys:
{"primary_color": string, "secondary_color": string or null, "hex": string or null, "type": "solid" | "gradient" | "textured" | "complex", "brightness": "light" | "medium" | "dark", "uniformity": number between 0 and 1, "suitable_for_matching": boolean}
"uniformity" is 1 for a perfectly flat color. "suitable_for_matching" is true when the background is clean enough to pair with other images by color."#;

pub fn prompt_for(variant: PromptVariant) -> &'static str {
    match variant {
        PromptVariant::FashionAttributes => FASHION_PROMPT,
        PromptVariant::HookSlide => HOOK_SLIDE_PROMPT,
        PromptVariant::BackgroundColor => BACKGROUND_PROMPT,
    }
}

/// A task plus the provider request built for it
#[derive(Debug, Clone)]
pub struct EncodedTask {
    pub task: AnalysisTask,
    pub request: ChatRequest,
}

/// Binds items to a prompt variant and builds provider-ready requests.
///
/// Construction is pure; only [`TaskEncoder::encode`] touches the filesystem,
/// and only for local image paths.
#[derive(Debug, Clone)]
pub struct TaskEncoder {
    model: String,
    max_tokens: u32,
    variant: PromptVariant,
}

impl TaskEncoder {
    pub fn new(model: impl Into<String>, max_tokens: u32, variant: PromptVariant) -> Self {
        Self {
            model: model.into(),
            max_tokens,
            variant,
        }
    }

    pub fn from_config(config: &Config, variant: PromptVariant) -> Self {
        Self::new(config.model(), config.provider.max_tokens, variant)
    }

    pub fn variant(&self) -> PromptVariant {
        self.variant
    }

    /// `{variant}-{sequence}-{post_id}`; the sequence keeps ids unique when a
    /// post contributes several images to one run
    pub fn custom_id(variant: PromptVariant, sequence: usize, post_id: &str) -> String {
        format!("{}-{}-{}", variant, sequence, post_id)
    }

    pub fn task(&self, sequence: usize, item: &AnalysisItem) -> AnalysisTask {
        AnalysisTask {
            custom_id: Self::custom_id(self.variant, sequence, &item.post_id),
            sequence,
            item: item.clone(),
            variant: self.variant,
        }
    }

    /// Resolve the item's image and build its request.
    /// Fails with `ItemError::Unreadable` when a local image cannot be used.
    pub async fn encode(&self, sequence: usize, item: &AnalysisItem) -> ItemResult<EncodedTask> {
        let image_ref = resolve_image_ref(&item.image_path).await?;
        let task = self.task(sequence, item);
        debug!("Encoded task {}", task.custom_id);

        Ok(EncodedTask {
            request: self.build_request(image_ref),
            task,
        })
    }

    pub fn build_request(&self, image_ref: String) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: vec![
                    ContentPart::Text {
                        text: prompt_for(self.variant).to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: image_ref },
                    },
                ],
            }],
            max_tokens: self.max_tokens,
            temperature: 0.0,
        }
    }

    pub fn task_line(&self, encoded: &EncodedTask) -> TaskLine {
        TaskLine {
            custom_id: encoded.task.custom_id.clone(),
            method: "POST".to_string(),
            url: CHAT_COMPLETIONS_PATH.to_string(),
            body: encoded.request.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder() -> TaskEncoder {
        TaskEncoder::new("gpt-4o-mini", 500, PromptVariant::HookSlide)
    }

    #[test]
    fn test_custom_id_format() {
        assert_eq!(
            TaskEncoder::custom_id(PromptVariant::FashionAttributes, 7, "p42"),
            "fashion_attributes-7-p42"
        );
    }

    #[test]
    fn test_same_post_twice_gets_distinct_ids() {
        let item = AnalysisItem::new("p1", "https://cdn/a.jpg");
        let first = encoder().task(0, &item);
        let second = encoder().task(1, &item);
        assert_ne!(first.custom_id, second.custom_id);
    }

    #[tokio::test]
    async fn test_encode_builds_vision_request() {
        let item = AnalysisItem::new("p1", "https://cdn/a.jpg");
        let encoded = encoder().encode(3, &item).await.unwrap();

        assert_eq!(encoded.task.custom_id, "hook_slide-3-p1");
        assert_eq!(encoded.task.sequence, 3);
        assert_eq!(encoded.request.temperature, 0.0);
        assert_eq!(encoded.request.max_tokens, 500);
        assert_eq!(encoded.request.image_url(), Some("https://cdn/a.jpg"));

        let line = serde_json::to_value(encoder().task_line(&encoded)).unwrap();
        assert_eq!(line["custom_id"], "hook_slide-3-p1");
        assert_eq!(line["method"], "POST");
        assert_eq!(line["url"], "/v1/chat/completions");
        assert_eq!(line["body"]["messages"][0]["content"][1]["type"], "image_url");
    }

    #[tokio::test]
    async fn test_unreadable_local_image() {
        let item = AnalysisItem::new("p1", "/no/such/image.png");
        let err = encoder().encode(0, &item).await.unwrap_err();
        assert_eq!(err.kind(), "item_unreadable");
    }

    #[test]
    fn test_every_variant_has_prompt() {
        for variant in [
            PromptVariant::FashionAttributes,
            PromptVariant::HookSlide,
            PromptVariant::BackgroundColor,
        ] {
            assert!(prompt_for(variant).contains("JSON"));
        }
    }
}
