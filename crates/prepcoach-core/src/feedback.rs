use serde::{Deserialize, Serialize};

/// Upper bound of every score.
pub const MAX_SCORE: u8 = 100;

/// Score and commentary for one PREP rubric area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackArea {
    /// Score in `0..=100`.
    pub score: u8,
    /// What went well.
    pub strengths: Vec<String>,
    /// What to work on.
    pub improvements: Vec<String>,
}

impl FeedbackArea {
    /// Builds an area from string slices.
    pub fn new(score: u8, strengths: &[&str], improvements: &[&str]) -> Self {
        Self {
            score: score.min(MAX_SCORE),
            strengths: strengths.iter().map(|s| (*s).to_string()).collect(),
            improvements: improvements.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    fn is_well_formed(&self) -> bool {
        self.score <= MAX_SCORE && !self.strengths.is_empty() && !self.improvements.is_empty()
    }
}

/// The three rubric areas of a [`Feedback`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackAreas {
    /// Point, Reason, Example, Point adherence.
    pub prep_framework: FeedbackArea,
    /// Content and arguments.
    pub content: FeedbackArea,
    /// Delivery and communication.
    pub delivery: FeedbackArea,
}

/// A structured PREP performance score for one conversation.
///
/// Serialized in camelCase so it matches the JSON shape requested from the
/// analysis model and stored in the feedback log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    /// Overall score in `0..=100`.
    pub overall_score: u8,
    /// Per-area breakdown.
    pub areas: FeedbackAreas,
}

impl Feedback {
    /// `true` when every score is in range and every area carries at least one
    /// strength and one improvement.
    pub fn is_well_formed(&self) -> bool {
        self.overall_score <= MAX_SCORE
            && self.areas.prep_framework.is_well_formed()
            && self.areas.content.is_well_formed()
            && self.areas.delivery.is_well_formed()
    }

    /// The overall score the area scores imply (40/30/30 weighting).
    ///
    /// Remote and model-produced feedback is not recomputed with this; it is
    /// offered for callers that want to cross-check.
    pub fn weighted_area_score(&self) -> u8 {
        weighted_overall(
            self.areas.prep_framework.score,
            self.areas.content.score,
            self.areas.delivery.score,
        )
    }
}

/// `round(0.4 × prep + 0.3 × content + 0.3 × delivery)`.
pub fn weighted_overall(prep: u8, content: u8, delivery: u8) -> u8 {
    let blended = f64::from(prep) * 0.4 + f64::from(content) * 0.3 + f64::from(delivery) * 0.3;
    // Inputs are bounded by 100, so the rounded blend is as well.
    blended.round().clamp(0.0, f64::from(MAX_SCORE)) as u8
}

/// Clamps an arbitrary numeric score into `0..=100`, rounding to the nearest integer.
pub fn clamp_score(raw: f64) -> u8 {
    if raw.is_nan() {
        return 0;
    }
    raw.round().clamp(0.0, f64::from(MAX_SCORE)) as u8
}

/// Provenance tag of a [`Feedback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackSource {
    /// Model analysis of the provider transcript, fetched on the first pass.
    ElevenlabsApiTranscript,
    /// Model analysis of the provider transcript, fetched by the retry poll.
    ElevenlabsApiPolling,
    /// Model analysis of the locally captured messages.
    Claude,
    /// Keyword heuristic over a transcript.
    SyntheticFromTranscript,
    /// Fixed exemplar feedback.
    SyntheticDefault,
    /// Feedback the voice agent handed over through its client tool.
    AgentFeedbackTool,
}

impl FeedbackSource {
    /// The stored tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackSource::ElevenlabsApiTranscript => "elevenlabs_api_transcript",
            FeedbackSource::ElevenlabsApiPolling => "elevenlabs_api_polling",
            FeedbackSource::Claude => "claude",
            FeedbackSource::SyntheticFromTranscript => "synthetic_from_transcript",
            FeedbackSource::SyntheticDefault => "synthetic_default",
            FeedbackSource::AgentFeedbackTool => "agent_feedback_tool",
        }
    }
}

impl std::fmt::Display for FeedbackSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
