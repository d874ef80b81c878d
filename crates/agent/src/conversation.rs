use frontdesk_core::text::normalize;
use frontdesk_core::{Session, Speaker};
use serde_json::Value;

use crate::llm::{OracleMessage, OracleRequest, OracleToolCall, Role};

const AFFIRMATIVE_WORDS: &[&str] = &[
    "yes", "yeah", "yep", "yup", "correct", "right", "sure", "perfect", "great", "ok", "okay",
    "confirm", "confirmed", "absolutely", "exactly",
];

const AFFIRMATIVE_PHRASES: &[&str] = &["sounds good", "that works", "works for me", "go ahead"];

const NEGATIVE_WORDS: &[&str] = &[
    "no", "nope", "nah", "not", "wrong", "incorrect", "isnt", "dont", "cancel", "change",
    "different", "wait", "actually",
];

/// The caller's answer to a booking readback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadbackReply {
    Affirmative,
    Negative,
    Unclear,
}

/// Mixed signals ("yes, but not Tuesday") are unclear and go to the oracle.
pub fn classify_readback_reply(text: &str) -> ReadbackReply {
    let normalized = normalize(text);
    let padded = format!(" {normalized} ");
    let tokens: Vec<&str> = normalized.split(' ').filter(|token| !token.is_empty()).collect();

    let affirmative = tokens.iter().any(|token| AFFIRMATIVE_WORDS.contains(token))
        || AFFIRMATIVE_PHRASES.iter().any(|phrase| padded.contains(&format!(" {phrase} ")));
    let negative = tokens.iter().any(|token| NEGATIVE_WORDS.contains(token));

    match (affirmative, negative) {
        (true, false) => ReadbackReply::Affirmative,
        (false, true) => ReadbackReply::Negative,
        _ => ReadbackReply::Unclear,
    }
}

/// Builds the oracle's view of the call: the system prompt, then the
/// transcript in order. Tool entries become a call/result message pair.
pub fn oracle_request(system_prompt: String, session: &Session, tools: Vec<Value>) -> OracleRequest {
    let mut messages = vec![OracleMessage::new(Role::System, system_prompt)];

    for (index, utterance) in session.transcript.iter().enumerate() {
        match (&utterance.speaker, &utterance.tool_call) {
            (_, Some(record)) => {
                let call = OracleToolCall {
                    id: format!("call_{index}"),
                    name: record.tool.clone(),
                    arguments: record.arguments.clone(),
                };
                let result = record.result.as_ref().map(Value::to_string).unwrap_or_default();
                messages.push(OracleMessage {
                    role: Role::Assistant,
                    content: String::new(),
                    tool_call: Some(call.clone()),
                });
                messages.push(OracleMessage { role: Role::Tool, content: result, tool_call: Some(call) });
            }
            (Speaker::Caller, None) => messages.push(OracleMessage::new(Role::User, &utterance.text)),
            (Speaker::Agent, None) => {
                messages.push(OracleMessage::new(Role::Assistant, &utterance.text))
            }
            (Speaker::System, None) => messages.push(OracleMessage::new(Role::System, &utterance.text)),
        }
    }

    OracleRequest { messages, tools }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use frontdesk_core::domain::session::{ToolCallRecord, Utterance};
    use frontdesk_core::{ProviderId, Session, SessionId, Speaker};
    use serde_json::json;

    use super::{classify_readback_reply, oracle_request, ReadbackReply};
    use crate::llm::Role;

    #[test]
    fn classifies_plain_answers() {
        assert_eq!(classify_readback_reply("Yes, that's right."), ReadbackReply::Affirmative);
        assert_eq!(classify_readback_reply("sounds good to me"), ReadbackReply::Affirmative);
        assert_eq!(classify_readback_reply("No, that's the wrong day"), ReadbackReply::Negative);
        assert_eq!(classify_readback_reply("That isn't what I asked for"), ReadbackReply::Negative);
    }

    #[test]
    fn mixed_or_unrelated_answers_are_unclear() {
        assert_eq!(classify_readback_reply("yes but not at 9"), ReadbackReply::Unclear);
        assert_eq!(classify_readback_reply("what's the address again"), ReadbackReply::Unclear);
        assert_eq!(classify_readback_reply(""), ReadbackReply::Unclear);
    }

    #[test]
    fn request_replays_transcript_with_tool_pairs() {
        let mut session = Session::new(SessionId("s-1".to_owned()), ProviderId("p".to_owned()), Utc::now());
        session.say(Speaker::Agent, "Thanks for calling.").expect("agent");
        session.say(Speaker::Caller, "What are your hours?").expect("caller");
        session
            .push_utterance(Utterance {
                speaker: Speaker::System,
                text: "tool:search_knowledge_base".to_owned(),
                at: Utc::now(),
                tool_call: Some(ToolCallRecord {
                    tool: "search_knowledge_base".to_owned(),
                    arguments: json!({ "query": "hours" }),
                    result: Some(json!({ "status": "found" })),
                }),
            })
            .expect("tool");

        let request = oracle_request("prompt".to_owned(), &session, Vec::new());
        let roles: Vec<Role> = request.messages.iter().map(|message| message.role).collect();

        assert_eq!(roles, vec![Role::System, Role::Assistant, Role::User, Role::Assistant, Role::Tool]);
        assert_eq!(request.messages[4].content, "{\"status\":\"found\"}");
        assert_eq!(
            request.messages[3].tool_call.as_ref().map(|call| call.id.as_str()),
            Some("call_2")
        );
    }
}
