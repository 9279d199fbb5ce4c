//! Prompt templates for the pipeline stages

use crate::retrieval::chunk::RetrievedChunk;
use crate::session::entities::ConversationTurn;

/// Render history turns into a `User:` / `Assistant:` transcript,
/// optionally ending with the current (not yet appended) user message.
fn transcript(history: &[ConversationTurn], current_message: Option<&str>) -> String {
    let mut lines: Vec<String> = history
        .iter()
        .map(|turn| format!("{}: {}", turn.role.label(), turn.text))
        .collect();
    if let Some(message) = current_message {
        lines.push(format!("User: {}", message));
    }
    lines.join("\n")
}

/// Templates for generating prompts at each pipeline stage
pub struct PromptTemplate;

impl PromptTemplate {
    /// Prompt for the safety classifier.
    ///
    /// The classifier is asked for a two-line answer: `safe`/`unsafe`,
    /// then a brief explanation. Parsed by
    /// [`parse_safety_response`](crate::guardrail::parsing::parse_safety_response).
    pub fn safety_check(message: &str, history: &[ConversationTurn]) -> String {
        format!(
            r#"You are a professional content moderator. Determine whether the latest
user message is safe and appropriate, considering the entire conversation.

<BEGIN_CONVERSATION>
{}
<END_CONVERSATION>

Your response must contain exactly two lines:
1. One word: 'safe' if the conversation is safe, or 'unsafe' if it is not.
2. A brief explanation of your decision."#,
            transcript(history, Some(message))
        )
    }

    /// Prompt for the topic classifier.
    ///
    /// Single-word yes/no answer, parsed by
    /// [`parse_topic_response`](crate::guardrail::parsing::parse_topic_response).
    pub fn topic_check(message: &str, history: &[ConversationTurn]) -> String {
        format!(
            r#"You are a topic gatekeeper for an assistant that only answers questions
within its configured subject area. Decide whether the latest user message
is on topic, taking the conversation into account.

<BEGIN_CONVERSATION>
{}
<END_CONVERSATION>

Answer with a single word: 'yes' if the message is on topic, 'no' if it is not."#,
            transcript(history, Some(message))
        )
    }

    /// Prompt asking the model to rewrite the latest user message into a
    /// standalone, context-free query.
    pub fn reformulate(message: &str, history: &[ConversationTurn]) -> String {
        format!(
            r#"Given the following chat history and the latest user message, reformulate
the user's message into a standalone query that carries the context of the
conversation.

### Guidelines
1. The reformulated message must capture what the user means, resolving
   references to earlier messages.
2. Respond with ONLY the reformulated message.
3. The reformulated message must keep the same meaning and grammatical
   form as the original. A question stays a question.

### Chat History:
{}

### Latest User Message:
{}"#,
            transcript(history, None),
            message
        )
    }

    /// System instructions for answer generation.
    pub fn answer_system() -> &'static str {
        r#"You are a helpful AI assistant. Respond to the user query based on the
conversation history, falling back to earlier messages when the query refers
to them. If context documents are provided, use them to ground your response."#
    }

    /// Final generation prompt: system instructions, bounded recent
    /// history, retrieved chunks attributed to their sources, and the
    /// current message. An empty `chunks` slice omits the context block —
    /// the model then answers from conversation knowledge alone.
    pub fn answer(message: &str, history: &[ConversationTurn], chunks: &[RetrievedChunk]) -> String {
        let mut prompt = String::from(Self::answer_system());

        if !history.is_empty() {
            prompt.push_str("\n\n### Conversation so far:\n");
            prompt.push_str(&transcript(history, None));
        }

        if !chunks.is_empty() {
            prompt.push_str(
                "\n\n### Context documents (use them to ground your response):\n",
            );
            for chunk in chunks {
                prompt.push_str(&format!("\n[source: {}]\n{}\n", chunk.source_id, chunk.text));
            }
        }

        prompt.push_str(&format!("\n\n### User message:\n{}", message));
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> Vec<ConversationTurn> {
        vec![
            ConversationTurn::user("When does enrollment open?"),
            ConversationTurn::assistant("Enrollment opens on June 1st."),
        ]
    }

    #[test]
    fn safety_prompt_includes_full_conversation() {
        let prompt = PromptTemplate::safety_check("And when does it close?", &history());
        assert!(prompt.contains("User: When does enrollment open?"));
        assert!(prompt.contains("Assistant: Enrollment opens on June 1st."));
        assert!(prompt.contains("User: And when does it close?"));
        assert!(prompt.contains("'safe'"));
    }

    #[test]
    fn topic_prompt_asks_for_single_word() {
        let prompt = PromptTemplate::topic_check("hello", &[]);
        assert!(prompt.contains("single word"));
        assert!(prompt.contains("User: hello"));
    }

    #[test]
    fn reformulate_prompt_separates_history_and_message() {
        let prompt = PromptTemplate::reformulate("And when does it close?", &history());
        assert!(prompt.contains("### Chat History:"));
        assert!(prompt.contains("### Latest User Message:\nAnd when does it close?"));
        // Current message must not leak into the history transcript
        assert!(!prompt.contains("User: And when does it close?"));
    }

    #[test]
    fn answer_prompt_attributes_chunks_to_sources() {
        let chunks = vec![
            RetrievedChunk::new("Deadline is July 15.", "admissions-faq", 0.9),
            RetrievedChunk::new("Fees are due August 1.", "fees-page", 0.7),
        ];
        let prompt = PromptTemplate::answer("What is the deadline?", &history(), &chunks);
        assert!(prompt.contains("[source: admissions-faq]\nDeadline is July 15."));
        assert!(prompt.contains("[source: fees-page]"));
        assert!(prompt.ends_with("### User message:\nWhat is the deadline?"));
    }

    #[test]
    fn answer_prompt_omits_context_block_when_empty() {
        let prompt = PromptTemplate::answer("What is the deadline?", &[], &[]);
        assert!(!prompt.contains("Context documents"));
        assert!(!prompt.contains("Conversation so far"));
    }
}
