//! Deterministic keyword scoring over the user's side of a conversation.

use prepcoach_core::feedback::weighted_overall;
use prepcoach_core::{Feedback, FeedbackArea, FeedbackAreas, FeedbackSource};
use regex::Regex;
use std::sync::OnceLock;

const PREP_KEYWORDS: &[&str] = &["point", "reason", "example", "point again"];
const CONTENT_KEYWORDS: &[&str] = &["cost", "value", "price", "quality", "service", "partnership"];
const DELIVERY_KEYWORDS: &[&str] = &["agree", "understand", "perspective", "proposal", "solution", "offer"];

/// Below this many user messages the heuristic has nothing to go on.
pub const MIN_USER_MESSAGES: usize = 2;

static PREP_RE: OnceLock<Vec<Regex>> = OnceLock::new();
static CONTENT_RE: OnceLock<Vec<Regex>> = OnceLock::new();
static DELIVERY_RE: OnceLock<Vec<Regex>> = OnceLock::new();

fn keyword_patterns(cell: &'static OnceLock<Vec<Regex>>, keywords: &[&str]) -> &'static [Regex] {
    cell.get_or_init(|| {
        keywords
            .iter()
            .filter_map(|kw| Regex::new(&format!(r"(?i)\b{}\b", regex::escape(kw))).ok())
            .collect()
    })
}

/// Whole-word, case-insensitive hits of every keyword, summed.
fn count_keywords(text: &str, patterns: &[Regex]) -> u32 {
    patterns
        .iter()
        .map(|re| re.find_iter(text).count() as u32)
        .sum()
}

/// Area scores `(prep, content, delivery)` for the given user messages.
pub fn keyword_scores(user_messages: &[&str]) -> (u8, u8, u8) {
    let text = user_messages.join(" ");
    let avg_len = if user_messages.is_empty() {
        0.0
    } else {
        text.chars().count() as f64 / user_messages.len() as f64
    };

    let prep_hits = count_keywords(&text, keyword_patterns(&PREP_RE, PREP_KEYWORDS));
    let content_hits = count_keywords(&text, keyword_patterns(&CONTENT_RE, CONTENT_KEYWORDS));
    let delivery_hits = count_keywords(&text, keyword_patterns(&DELIVERY_RE, DELIVERY_KEYWORDS));
    let length_bonus = if avg_len > 100.0 { 10 } else { 0 };

    let prep = 50u32.saturating_add(prep_hits.saturating_mul(10)).min(100);
    let content = 60u32.saturating_add(content_hits.saturating_mul(5)).min(100);
    let delivery = (65u32 + length_bonus)
        .saturating_add(delivery_hits.saturating_mul(5))
        .min(100);

    // All three are capped at 100 above.
    (prep as u8, content as u8, delivery as u8)
}

/// Synthesizes feedback from the user's messages.
///
/// With fewer than [`MIN_USER_MESSAGES`] messages this is the fixed
/// [`default_feedback`] tagged `synthetic_default`; otherwise the keyword
/// scores tagged `synthetic_from_transcript`.
pub fn synthesize(user_messages: &[&str]) -> (Feedback, FeedbackSource) {
    if user_messages.len() < MIN_USER_MESSAGES {
        return (default_feedback(), FeedbackSource::SyntheticDefault);
    }

    let (prep, content, delivery) = keyword_scores(user_messages);
    let feedback = Feedback {
        overall_score: weighted_overall(prep, content, delivery),
        areas: FeedbackAreas {
            prep_framework: FeedbackArea::new(
                prep,
                &[
                    "You articulated your main points clearly",
                    "You provided some reasoning for your position",
                    "Your approach was structured",
                ],
                &[
                    "Consider including more specific examples",
                    "Circle back to your main points more consistently",
                    "Strengthen the connection between your reasons and examples",
                ],
            ),
            content: FeedbackArea::new(
                content,
                &[
                    "You addressed the core negotiation objectives",
                    "Your arguments were generally relevant",
                    "You maintained focus on the key issues",
                ],
                &[
                    "Quantify your value proposition more specifically",
                    "Anticipate and address counterarguments proactively",
                    "Develop more creative win-win solutions",
                ],
            ),
            delivery: FeedbackArea::new(
                delivery,
                &[
                    "You maintained a professional tone throughout",
                    "Your communication was clear and direct",
                    "You showed active listening to the other party",
                ],
                &[
                    "Vary your sentence structure for more persuasive impact",
                    "Use more confident language when presenting your case",
                    "Ask more probing questions to understand the other side",
                ],
            ),
        },
    };
    (feedback, FeedbackSource::SyntheticFromTranscript)
}

/// Exemplar feedback used when nothing better is available.
pub fn default_feedback() -> Feedback {
    Feedback {
        overall_score: 76,
        areas: FeedbackAreas {
            prep_framework: FeedbackArea::new(
                78,
                &[
                    "You clearly articulated your main points",
                    "You provided solid reasoning for your position",
                    "You circled back to reinforce key messages",
                ],
                &[
                    "Include more specific examples to illustrate your points",
                    "Strengthen the connection between your reasons and examples",
                    "Prepare more concise summaries of your main arguments",
                ],
            ),
            content: FeedbackArea::new(
                82,
                &[
                    "You demonstrated good understanding of the business context",
                    "Your arguments were relevant and focused on value",
                    "You effectively addressed the cost reduction concern",
                ],
                &[
                    "Quantify your value proposition more specifically",
                    "Prepare more data points to support your position",
                    "Develop a clearer fallback position",
                ],
            ),
            delivery: FeedbackArea::new(
                70,
                &[
                    "You maintained a professional tone throughout",
                    "You expressed your points with clarity",
                    "You showed patience during challenging moments",
                ],
                &[
                    "Use more confident language when presenting your case",
                    "Vary your pace to emphasize key points",
                    "Practice smoother transitions between topics",
                ],
            ),
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_content_keywords_example() {
        let (_, content, _) =
            keyword_scores(&["Let's discuss the price and value of this partnership"]);
        assert_eq!(content, 75);
    }

    #[test]
    fn test_point_again_counts_twice() {
        // "point again" matches both "point" and "point again".
        let (prep, _, _) = keyword_scores(&["My point again is simple"]);
        assert_eq!(prep, 70);
    }

    #[test]
    fn test_whole_word_case_insensitive() {
        let (_, content, delivery) = keyword_scores(&["PRICE pricey Offer offers"]);
        assert_eq!(content, 65);
        assert_eq!(delivery, 70);
    }

    #[test]
    fn test_scores_are_capped() {
        let spam = "point ".repeat(20);
        let (prep, _, _) = keyword_scores(&[spam.as_str()]);
        assert_eq!(prep, 100);
    }

    #[test]
    fn test_long_messages_earn_delivery_bonus() {
        let long = "a".repeat(120);
        let (_, _, delivery) = keyword_scores(&[long.as_str(), long.as_str()]);
        assert_eq!(delivery, 75);
    }

    #[test]
    fn test_synthesize_needs_two_user_messages() {
        let (feedback, source) = synthesize(&["Only one message about price"]);
        assert_eq!(source, FeedbackSource::SyntheticDefault);
        assert_eq!(feedback, default_feedback());
        assert_eq!(feedback.overall_score, 76);
    }

    #[test]
    fn test_synthesize_is_deterministic() {
        let messages = ["I agree the price matters.", "Here is an example of our value."];
        let (first, source) = synthesize(&messages);
        let (second, _) = synthesize(&messages);
        assert_eq!(source, FeedbackSource::SyntheticFromTranscript);
        assert_eq!(first, second);
        assert!(first.is_well_formed());
        // prep 60, content 70, delivery 70 -> 24 + 21 + 21
        assert_eq!(first.overall_score, 66);
    }

    #[test]
    fn test_default_feedback_is_well_formed() {
        let feedback = default_feedback();
        assert!(feedback.is_well_formed());
        assert_eq!(feedback.areas.prep_framework.score, 78);
        assert_eq!(feedback.areas.content.score, 82);
        assert_eq!(feedback.areas.delivery.score, 70);
    }
}
