use genchat_contracts::{DEFAULT_IMAGE_MIME, Message, MessagePart, RawParts, Role};

pub const DEFAULT_HISTORY_ROUNDS: usize = 10;
/// Stands in for any past model turn whose provider parts were not kept.
pub const MODEL_TURN_PLACEHOLDER: &str = "The image was generated from the previous request.";
/// Sent when the outgoing turn would otherwise carry no content.
pub const CONTINUATION_PROMPT: &str = "Keep refining the previous image.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryPart {
    Text(String),
    InlineData { mime_type: String, data: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnBody {
    /// Provider-native parts replayed exactly as received.
    Raw(RawParts),
    Parts(Vec<HistoryPart>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryTurn {
    pub role: Role,
    pub body: TurnBody,
}

/// Hard cap on how many past messages are sent upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryWindow {
    max_rounds: usize,
}

impl Default for HistoryWindow {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_ROUNDS)
    }
}

impl HistoryWindow {
    pub fn new(max_rounds: usize) -> Self {
        Self { max_rounds }
    }

    pub fn max_messages(&self) -> usize {
        self.max_rounds.saturating_mul(2)
    }

    /// Builds the contents for the next request: windowed past turns followed
    /// by the new user turn. The last turn is never empty.
    pub fn build(&self, past: &[Message], new_parts: &[MessagePart]) -> Vec<HistoryTurn> {
        let start = past.len().saturating_sub(self.max_messages());
        let mut contents = past[start..].iter().filter_map(past_turn).collect::<Vec<_>>();

        let mut current = Vec::new();
        if !new_parts.iter().any(MessagePart::is_image)
            && let Some(MessagePart::Image { content, mime_type }) = find_recent_image(past)
        {
            current.push(inline_data(content, mime_type));
        }
        for part in new_parts {
            match part {
                MessagePart::Text { content } => current.push(HistoryPart::Text(content.clone())),
                MessagePart::Image { content, mime_type } => {
                    current.push(inline_data(content, mime_type))
                }
                MessagePart::Video { .. } => {}
            }
        }
        if current.is_empty() {
            current.push(HistoryPart::Text(CONTINUATION_PROMPT.to_string()));
        }

        contents.push(HistoryTurn { role: Role::User, body: TurnBody::Parts(current) });
        contents
    }
}

fn past_turn(message: &Message) -> Option<HistoryTurn> {
    match message.role {
        Role::Model => {
            let body = match &message.raw_parts {
                Some(raw) if !raw.is_empty() => TurnBody::Raw(raw.clone()),
                _ => TurnBody::Parts(vec![HistoryPart::Text(MODEL_TURN_PLACEHOLDER.to_string())]),
            };
            Some(HistoryTurn { role: Role::Model, body })
        }
        Role::User => {
            let texts = message
                .parts
                .iter()
                .filter_map(MessagePart::as_text)
                .map(|text| HistoryPart::Text(text.to_string()))
                .collect::<Vec<_>>();
            if texts.is_empty() {
                return None;
            }
            Some(HistoryTurn { role: Role::User, body: TurnBody::Parts(texts) })
        }
    }
}

fn inline_data(content: &str, mime_type: &str) -> HistoryPart {
    let mime_type = if mime_type.trim().is_empty() { DEFAULT_IMAGE_MIME } else { mime_type };
    HistoryPart::InlineData {
        mime_type: mime_type.to_string(),
        data: strip_data_url_prefix(content).to_string(),
    }
}

/// Most recent image part across the whole conversation, newest message first.
pub fn find_recent_image(messages: &[Message]) -> Option<&MessagePart> {
    messages.iter().rev().find_map(|message| message.parts.iter().find(|part| part.is_image()))
}

/// Drops a `data:...;base64,` prefix if present.
pub fn strip_data_url_prefix(content: &str) -> &str {
    match content.split_once("base64,") {
        Some((_, data)) => data,
        None => content,
    }
}
