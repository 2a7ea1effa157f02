use prepcoach_core::{Message, TranscriptTurn};

/// Renders live messages as `User: …` / `Agent: …` paragraphs.
pub fn format_messages(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", if m.is_user { "User" } else { "Agent" }, m.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Renders a provider transcript the same way as [`format_messages`].
pub fn format_turns(turns: &[TranscriptTurn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", if t.is_user() { "User" } else { "Agent" }, t.text()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// The negotiation-coach analysis prompt around `conversation`.
pub fn analysis_prompt(conversation: &str) -> String {
    format!(
        r#"You are an expert negotiation coach. Please analyze this negotiation conversation and provide detailed feedback:

{conversation}

Provide a comprehensive analysis with:
1. An overall score from 0-100
2. Feedback on the PREP framework (Point, Reason, Example, Point restated)
3. Feedback on content & arguments
4. Feedback on delivery & communication
5. Specific strengths (3-5 bullet points for each area)
6. Areas for improvement (3-5 bullet points for each area)

Format your response as a JSON object exactly matching this structure:
{{
  "overallScore": number,
  "areas": {{
    "prepFramework": {{
      "score": number,
      "strengths": [string, string, string],
      "improvements": [string, string, string]
    }},
    "content": {{
      "score": number,
      "strengths": [string, string, string],
      "improvements": [string, string, string]
    }},
    "delivery": {{
      "score": number,
      "strengths": [string, string, string],
      "improvements": [string, string, string]
    }}
  }}
}}"#
    )
}
