// Data model shared by every analysis strategy

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// One image handed over by the external producer.
///
/// `post_id` and `image_path` are mandatory. They default to empty strings on
/// deserialization so that a missing field surfaces as a per-item validation
/// skip instead of rejecting the whole request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisItem {
    #[serde(default, alias = "postId")]
    pub post_id: String,
    #[serde(default, alias = "imagePath")]
    pub image_path: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl AnalysisItem {
    pub fn new(post_id: impl Into<String>, image_path: impl Into<String>) -> Self {
        Self {
            post_id: post_id.into(),
            image_path: image_path.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Account name of the post author, if the producer supplied one
    pub fn username(&self) -> Option<&str> {
        self.metadata
            .get("username")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }
}

/// Which prompt (and therefore which result shape) a task uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptVariant {
    FashionAttributes,
    HookSlide,
    BackgroundColor,
}

impl PromptVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptVariant::FashionAttributes => "fashion_attributes",
            PromptVariant::HookSlide => "hook_slide",
            PromptVariant::BackgroundColor => "background_color",
        }
    }
}

impl fmt::Display for PromptVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PromptVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fashion_attributes" | "fashion" => Ok(PromptVariant::FashionAttributes),
            "hook_slide" | "hook" => Ok(PromptVariant::HookSlide),
            "background_color" | "background" => Ok(PromptVariant::BackgroundColor),
            other => Err(format!("unknown prompt variant: {}", other)),
        }
    }
}

/// Execution strategy used for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Sequential,
    Concurrent,
    Batch,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Sequential => "sequential",
            Strategy::Concurrent => "concurrent",
            Strategy::Batch => "batch",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An item bound to a prompt and a correlation id.
///
/// `custom_id` is the only join key between a request and its response.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisTask {
    pub custom_id: String,
    pub sequence: usize,
    pub item: AnalysisItem,
    pub variant: PromptVariant,
}

/// Server-side batch job lifecycle, as observed by polling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Validating,
    InProgress,
    Finalizing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }

    /// Position in the lifecycle; a job never moves to a lower rank.
    /// Both terminal states share the last rank.
    pub fn rank(&self) -> u8 {
        match self {
            BatchStatus::Validating => 0,
            BatchStatus::InProgress => 1,
            BatchStatus::Finalizing => 2,
            BatchStatus::Completed | BatchStatus::Failed => 3,
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BatchStatus::Validating => "validating",
            BatchStatus::InProgress => "in_progress",
            BatchStatus::Finalizing => "finalizing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestCounts {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Provider-managed batch job. The orchestrator only submits and polls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    pub job_id: String,
    pub status: BatchStatus,
    pub input_file_id: String,
    pub output_file_id: Option<String>,
    pub error_file_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub counts: RequestCounts,
    /// Provider explanation when the job ends up `Failed`
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FashionAttributes {
    pub aesthetic: String,
    pub colors: Vec<String>,
    pub season: String,
    pub occasion: String,
    #[serde(default)]
    pub additional: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookSlide {
    #[serde(alias = "isHookSlide")]
    pub is_hook_slide: bool,
    pub confidence: f64,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, alias = "targetVibe")]
    pub target_vibe: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundType {
    Solid,
    Gradient,
    Textured,
    Complex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Brightness {
    Light,
    Medium,
    Dark,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundColor {
    #[serde(alias = "primaryColor")]
    pub primary_color: String,
    #[serde(default, alias = "secondaryColor")]
    pub secondary_color: Option<String>,
    #[serde(default)]
    pub hex: Option<String>,
    #[serde(rename = "type")]
    pub background_type: BackgroundType,
    pub brightness: Brightness,
    pub uniformity: f64,
    #[serde(alias = "suitableForMatching")]
    pub suitable_for_matching: bool,
}

/// Structured model output, one shape per prompt variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum AnalysisResult {
    FashionAttributes(FashionAttributes),
    HookSlide(HookSlide),
    BackgroundColor(BackgroundColor),
}

impl AnalysisResult {
    pub fn variant(&self) -> PromptVariant {
        match self {
            AnalysisResult::FashionAttributes(_) => PromptVariant::FashionAttributes,
            AnalysisResult::HookSlide(_) => PromptVariant::HookSlide,
            AnalysisResult::BackgroundColor(_) => PromptVariant::BackgroundColor,
        }
    }
}

/// Per-post persistence unit.
///
/// Image N's path always pairs with analysis N; the only way to grow an
/// aggregate is [`PostAggregate::push`], which appends to both lists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostAggregate {
    pub post_id: String,
    pub username: String,
    image_paths: Vec<String>,
    analyses: Vec<AnalysisResult>,
}

impl PostAggregate {
    pub fn new(post_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            post_id: post_id.into(),
            username: username.into(),
            image_paths: Vec::new(),
            analyses: Vec::new(),
        }
    }

    pub fn push(&mut self, image_path: impl Into<String>, analysis: AnalysisResult) {
        self.image_paths.push(image_path.into());
        self.analyses.push(analysis);
    }

    pub fn image_paths(&self) -> &[String] {
        &self.image_paths
    }

    pub fn analyses(&self) -> &[AnalysisResult] {
        &self.analyses
    }

    pub fn len(&self) -> usize {
        self.analyses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.analyses.is_empty()
    }

    /// (image path, analysis) pairs in arrival order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &AnalysisResult)> {
        self.image_paths
            .iter()
            .map(String::as_str)
            .zip(self.analyses.iter())
    }
}

/// Running totals for one analyzer instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CostLedger {
    pub processed_count: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
}

/// Snapshot of a ledger handed to callers after (or during) a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CostSummary {
    pub processed_count: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub average_per_image: f64,
}

impl From<CostLedger> for CostSummary {
    fn from(ledger: CostLedger) -> Self {
        let average_per_image = if ledger.processed_count > 0 {
            ledger.total_cost / ledger.processed_count as f64
        } else {
            0.0
        };
        Self {
            processed_count: ledger.processed_count,
            total_tokens: ledger.total_tokens,
            total_cost: ledger.total_cost,
            average_per_image,
        }
    }
}
