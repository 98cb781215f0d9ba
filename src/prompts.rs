//! Prompts for the LLM classifier tiers.
//!
//! Both tiers send the same two messages: a system prompt that lists the
//! subject's closed topic vocabulary and fixes the JSON reply contract, and
//! a user prompt carrying the question text (plus mark-scheme text when the
//! question is linked). Keeping them here lets tests inspect the exact text
//! without a provider.

use crate::classifier::ClassificationRequest;
use crate::topics::TopicVocabulary;

/// Characters of question / mark-scheme text sent per request.
pub const MAX_QUESTION_CHARS: usize = 6_000;
pub const MAX_MARKSCHEME_CHARS: usize = 3_000;

const SYSTEM_PREAMBLE: &str = r#"You are an experienced examiner. You label exam questions for a revision platform.

For the question you are given, choose exactly ONE topic from the list below and rate its difficulty for a typical candidate.

Rules:
1. The "topic" field MUST be one of the codes listed below, copied exactly.
2. "difficulty" is one of "easy", "medium", "hard".
3. "confidence" is a number between 0 and 1: how sure you are of the topic.
4. Reply with a single JSON object and nothing else:
   {"topic": "<code>", "difficulty": "easy|medium|hard", "confidence": 0.0}
5. Do NOT add commentary, markdown or extra keys."#;

/// System prompt listing every topic as `code: name - description`.
pub fn system_prompt(vocabulary: &TopicVocabulary) -> String {
    let mut prompt = String::from(SYSTEM_PREAMBLE);
    prompt.push_str(&format!("\n\nSubject: {}\nTopics:\n", vocabulary.subject()));
    for topic in vocabulary.topics() {
        prompt.push_str(&format!("- {}: {}", topic.code.trim(), topic.name));
        if let Some(desc) = topic.description.as_deref().filter(|d| !d.trim().is_empty()) {
            prompt.push_str(&format!(" - {}", desc.trim()));
        }
        prompt.push('\n');
    }
    prompt
}

/// User prompt with the question (and mark scheme when linked).
pub fn user_prompt(request: &ClassificationRequest<'_>) -> String {
    let mut prompt = format!(
        "Question {}:\n\"\"\"\n{}\n\"\"\"",
        request.question_number,
        truncate(request.question_text, MAX_QUESTION_CHARS)
    );
    if let Some(marks) = request.marks {
        prompt.push_str(&format!("\nTotal marks: {marks}"));
    }
    if let Some(ms) = request.markscheme_text.filter(|t| !t.trim().is_empty()) {
        prompt.push_str(&format!(
            "\n\nMark scheme:\n\"\"\"\n{}\n\"\"\"",
            truncate(ms, MAX_MARKSCHEME_CHARS)
        ));
    }
    prompt
}

/// Cut `text` to at most `max` chars on a char boundary.
fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
