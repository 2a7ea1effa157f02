//! Two-tier parsing of a model reply into [`Feedback`].
//!
//! Tier one looks for JSON (a fenced ```` ```json ```` block, else the outermost
//! brace-delimited substring). Tier two scrapes `… score: N` lines and bullet
//! lists out of prose. Neither tier panics; a reply neither can read is
//! [`ParsedFeedback::Unparsed`].

use crate::heuristic::default_feedback;
use prepcoach_core::feedback::clamp_score;
use prepcoach_core::{Feedback, FeedbackArea, FeedbackAreas};
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

/// Score assumed for a section whose score line is missing.
const DEFAULT_SECTION_SCORE: u8 = 75;
const MAX_POINTS: usize = 3;

/// What a model reply yielded.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedFeedback {
    /// JSON or prose feedback was found.
    Parsed(Feedback),
    /// Neither form could be read.
    Unparsed,
}

impl ParsedFeedback {
    /// The feedback, if any was parsed.
    pub fn into_feedback(self) -> Option<Feedback> {
        match self {
            ParsedFeedback::Parsed(f) => Some(f),
            ParsedFeedback::Unparsed => None,
        }
    }
}

/// Reads feedback from a model reply.
///
/// A JSON object anywhere in the text wins; otherwise the prose headings
/// are scanned for scores and bullet points.
pub fn parse_feedback(text: &str) -> ParsedFeedback {
    if let Some(feedback) = extract_json(text).and_then(parse_json) {
        return ParsedFeedback::Parsed(feedback);
    }
    match parse_prose(text) {
        Some(feedback) => ParsedFeedback::Parsed(feedback),
        None => ParsedFeedback::Unparsed,
    }
}

static FENCED_RE: OnceLock<Option<Regex>> = OnceLock::new();
static OVERALL_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

/// The JSON candidate inside `text`, if any.
pub fn extract_json(text: &str) -> Option<&str> {
    if let Some(re) = cached(&FENCED_RE, r"(?s)```json\s*\n(.*?)\n\s*```") {
        if let Some(m) = re.captures(text).and_then(|c| c.get(1)) {
            return Some(m.as_str());
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LooseFeedback {
    overall_score: f64,
    areas: LooseAreas,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LooseAreas {
    prep_framework: LooseArea,
    content: LooseArea,
    delivery: LooseArea,
}

#[derive(Deserialize)]
struct LooseArea {
    score: f64,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    improvements: Vec<String>,
}

impl LooseArea {
    /// Clamps the score and backfills empty lists from `fallback`.
    fn settle(self, fallback: &FeedbackArea) -> FeedbackArea {
        let keep = |items: Vec<String>, fallback: &[String]| {
            let items: Vec<String> = items
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if items.is_empty() {
                fallback.to_vec()
            } else {
                items
            }
        };
        FeedbackArea {
            score: clamp_score(self.score),
            strengths: keep(self.strengths, &fallback.strengths),
            improvements: keep(self.improvements, &fallback.improvements),
        }
    }
}

fn parse_json(candidate: &str) -> Option<Feedback> {
    let loose: LooseFeedback = serde_json::from_str(candidate).ok()?;
    let defaults = default_feedback().areas;
    Some(Feedback {
        overall_score: clamp_score(loose.overall_score),
        areas: FeedbackAreas {
            prep_framework: loose.areas.prep_framework.settle(&defaults.prep_framework),
            content: loose.areas.content.settle(&defaults.content),
            delivery: loose.areas.delivery.settle(&defaults.delivery),
        },
    })
}

fn parse_prose(text: &str) -> Option<Feedback> {
    let defaults = default_feedback();
    let mut matched_any = false;

    let overall = cached(&OVERALL_RE, r"(?i)overall score:?\s*(\d+)")
        .and_then(|re| re.captures(text))
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(|n| {
            matched_any = true;
            clamp_score(n)
        })
        .unwrap_or(defaults.overall_score);

    let mut section = |section: Section, fallback: &FeedbackArea| {
        let score = section_score(text, section)
            .map(|s| {
                matched_any = true;
                s
            })
            .unwrap_or(DEFAULT_SECTION_SCORE);
        let patterns = section.patterns();
        FeedbackArea {
            score,
            strengths: section_points(text, patterns.strengths.as_ref())
                .unwrap_or_else(|| fallback.strengths.clone()),
            improvements: section_points(text, patterns.improvements.as_ref())
                .unwrap_or_else(|| fallback.improvements.clone()),
        }
    };

    let areas = FeedbackAreas {
        prep_framework: section(Section::PrepFramework, &defaults.areas.prep_framework),
        content: section(Section::Content, &defaults.areas.content),
        delivery: section(Section::Delivery, &defaults.areas.delivery),
    };

    matched_any.then_some(Feedback {
        overall_score: overall,
        areas,
    })
}

/// A rubric area as it is headed in a prose reply.
#[derive(Debug, Clone, Copy)]
enum Section {
    PrepFramework = 0,
    Content = 1,
    Delivery = 2,
}

struct SectionPatterns {
    score: Option<Regex>,
    strengths: Option<Regex>,
    improvements: Option<Regex>,
}

static SECTION_PATTERNS: [OnceLock<SectionPatterns>; 3] =
    [OnceLock::new(), OnceLock::new(), OnceLock::new()];

impl Section {
    fn heading(self) -> &'static str {
        match self {
            Section::PrepFramework => "prep framework",
            Section::Content => "content",
            Section::Delivery => "delivery",
        }
    }

    fn patterns(self) -> &'static SectionPatterns {
        SECTION_PATTERNS[self as usize].get_or_init(|| {
            let heading = regex::escape(self.heading());
            let points = |kind: &str| {
                Regex::new(&format!(r"(?is){heading}.*?{kind}:?\s*(.+?)(?:\n\n|\n\w|\z)")).ok()
            };
            SectionPatterns {
                score: Regex::new(&format!(r"(?is){heading}.*?score:?\s*(\d+)")).ok(),
                strengths: points("strengths"),
                improvements: points("improvements"),
            }
        })
    }
}

fn section_score(text: &str, section: Section) -> Option<u8> {
    let re = section.patterns().score.as_ref()?;
    let digits = re.captures(text)?.get(1)?.as_str();
    digits.parse::<f64>().ok().map(clamp_score)
}

fn section_points(text: &str, re: Option<&Regex>) -> Option<Vec<String>> {
    let body = re?.captures(text)?.get(1)?.as_str();
    let points: Vec<String> = body
        .split(['\n', '-', '*'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(MAX_POINTS)
        .map(str::to_string)
        .collect();
    (!points.is_empty()).then_some(points)
}
