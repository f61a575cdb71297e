use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ChatError, Result};
use crate::gemini::{GenerateRequest, TextModel};
use crate::logging;

/// Shown on the dashboard when the user has no history to project from.
pub const FALLBACK_PROJECTION: &str =
    "Your future is a blank canvas, full of potential. Your conversations haven't yet painted a clear picture.";

/// Substituted for any analysis field the model failed to produce.
pub const ANALYSIS_PLACEHOLDER: &str = "Could not be determined.";

/// Topic categories checked in order; the first category with the highest
/// keyword hit count wins, so order doubles as the tie-break.
const TOPIC_CATEGORIES: &[(&str, &[&str])] = &[
    (
        "Health & Fitness",
        &["gym", "workout", "diet", "sleep", "healthy", "run", "exercise"],
    ),
    (
        "Career & Finance",
        &["work", "job", "project", "deadline", "promotion", "invest", "budget", "money"],
    ),
    (
        "Learning & Growth",
        &["learn", "book", "course", "skill", "study", "read"],
    ),
    (
        "Social Life",
        &["friends", "party", "hang out", "family", "relationship"],
    ),
];

const DEFAULT_TOPIC: &str = "General Well-being";

/// Persona framing for the chat assistant itself. The gender hint, when
/// present, is interpolated into the instruction text.
pub fn chat_system_prompt(gender_hint: Option<&str>) -> String {
    let hint = gender_hint
        .map(|g| format!(" The user is {}.", g))
        .unwrap_or_default();
    format!(
        "You are Shadow, an AI assistant from ShadowLink, a company founded by \
Zenova (Taimiya Amjad), CEO, and Zenlor (Ansh Yadav), Co-Founder. You are a \
proactive agent that learns to mirror the user's way of writing and thinking. \
Study the user's messages in the conversation history and respond the way they \
would respond: match their vocabulary, sentence length, punctuation habits, and \
tone.{} You are in a hurry, so keep replies quick and natural, never stiff or \
formal.",
        hint
    )
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationAnalysis {
    pub writing_style: Option<String>,
    pub tone: Option<String>,
    pub response_patterns: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SummaryOutput {
    summary: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersonalityOutput {
    personality_profile: String,
}

/// Analyze how the user writes: style, tone, and response patterns.
pub async fn analyze_conversation_patterns(
    model: &dyn TextModel,
    history: &str,
) -> Result<ConversationAnalysis> {
    let prompt = format!(
        r#"You are a communication analyst. Study the user's messages in this conversation history and describe how they communicate.

CONVERSATION HISTORY:
{}

Describe:
1. writingStyle: vocabulary, sentence structure, punctuation habits
2. tone: the emotional register they tend to use
3. responsePatterns: how they typically open, continue, and close exchanges

Respond with ONLY valid JSON:
{{"writingStyle": "...", "tone": "...", "responsePatterns": "..."}}"#,
        history
    );

    logging::log_flow(None, "Running conversation pattern analysis");

    let response = model
        .generate(GenerateRequest::text(prompt).json())
        .await?;
    parse_json_output(&response)
}

/// The core chat turn: reply to the latest message in the user's own voice.
/// This is the one template that returns prose rather than JSON.
pub async fn generate_chat_response(
    model: &dyn TextModel,
    history: &str,
    latest: &str,
    gender_hint: Option<&str>,
    style_profile: Option<&str>,
) -> Result<String> {
    let mut system = chat_system_prompt(gender_hint);
    if let Some(profile) = style_profile {
        system.push_str("\n\nSTYLE PROFILE OF THE USER:\n");
        system.push_str(profile);
    }

    let prompt = format!(
        "CONVERSATION HISTORY:\n{}\n\nLATEST MESSAGE:\n{}\n\nReply to the latest message in the user's own style:",
        history, latest
    );

    model
        .generate(GenerateRequest::text(prompt).with_system(system))
        .await
}

/// Condense the user's full conversation history into a short summary.
pub async fn summarize_conversation_history(model: &dyn TextModel, history: &str) -> Result<String> {
    let prompt = format!(
        r#"Summarize the following conversation history in under 200 words. Focus on the topics the user keeps returning to and what seems to matter to them.

CONVERSATION HISTORY:
{}

Respond with ONLY valid JSON:
{{"summary": "..."}}"#,
        history
    );

    logging::log_flow(None, "Summarizing conversation history");

    let response = model
        .generate(GenerateRequest::text(prompt).json())
        .await?;
    let output: SummaryOutput = parse_json_output(&response)?;
    Ok(output.summary)
}

#[derive(Debug, Clone)]
pub struct FutureProjection {
    pub topic: String,
    pub projection: String,
}

/// Two-stage projection: extract the dominant life topic from the history,
/// then generate a dramatic one-sentence picture of the user's 2040 self
/// conditioned on that topic.
pub async fn project_future_self(model: &dyn TextModel, history: &str) -> Result<FutureProjection> {
    if history.trim().is_empty() {
        return Ok(FutureProjection {
            topic: DEFAULT_TOPIC.to_string(),
            projection: FALLBACK_PROJECTION.to_string(),
        });
    }

    let topic = extract_key_topic(&[history]);

    let prompt = format!(
        r#"You are a futurist. This person's conversations revolve around the topic "{}". Based on the habits and ambitions visible in the history below, write ONE dramatic sentence describing who this person will be in the year 2040. Extrapolate from what they actually talk about: if they keep mentioning the gym, picture the athlete; if they keep mentioning a side project, picture the founder.

CONVERSATION HISTORY:
{}

Respond with only the sentence, no preamble."#,
        topic, history
    );

    logging::log_flow(None, &format!("Projecting future self (topic: {})", topic));

    let projection = model.generate(GenerateRequest::text(prompt)).await?;
    Ok(FutureProjection { topic, projection })
}

/// Distill a free-text description of the user into a persistent style
/// profile. Callers may pass a self-description or rendered message history.
pub async fn generate_initial_personality(
    model: &dyn TextModel,
    description: &str,
) -> Result<String> {
    let prompt = format!(
        r#"You are building a style profile of a person, so an assistant can write the way they do.

DESCRIPTION:
{}

Produce a compact profile covering their vocabulary, humor, formality, and recurring concerns.

Respond with ONLY valid JSON:
{{"personalityProfile": "..."}}"#,
        description
    );

    logging::log_flow(None, "Generating personality profile");

    let response = model
        .generate(GenerateRequest::text(prompt).json())
        .await?;
    let output: PersonalityOutput = parse_json_output(&response)?;
    Ok(output.personality_profile)
}

/// Pick the topic category whose keywords appear most often in the user's
/// messages. Case-insensitive, whole-word matches only.
pub fn extract_key_topic(user_texts: &[&str]) -> String {
    let combined = user_texts.join(" ").to_lowercase();

    let mut best_topic = DEFAULT_TOPIC;
    let mut best_count = 0usize;

    for (topic, keywords) in TOPIC_CATEGORIES {
        let count: usize = keywords
            .iter()
            .map(|kw| count_whole_word(&combined, kw))
            .sum();
        if count > best_count {
            best_count = count;
            best_topic = topic;
        }
    }

    best_topic.to_string()
}

/// Count occurrences of `word` in `text` bounded by non-alphanumeric
/// characters, so "gym" does not match inside "gymnasium".
fn count_whole_word(text: &str, word: &str) -> usize {
    let text_bytes = text.as_bytes();
    let mut count = 0;
    let mut from = 0;

    while let Some(pos) = text[from..].find(word) {
        let start = from + pos;
        let end = start + word.len();

        let left_ok = start == 0 || !is_word_byte(text_bytes[start - 1]);
        let right_ok = end == text.len() || !is_word_byte(text_bytes[end]);
        if left_ok && right_ok {
            count += 1;
        }

        from = start + 1;
    }

    count
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric()
}

/// Strip an optional markdown fence and parse the model's JSON output.
pub fn parse_json_output<T: DeserializeOwned>(response: &str) -> Result<T> {
    let cleaned = response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    serde_json::from_str(cleaned).map_err(|e| {
        ChatError::MalformedResponse(format!(
            "Failed to parse model response: {}. Response was: {}",
            e, cleaned
        ))
    })
}
