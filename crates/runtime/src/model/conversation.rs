use std::collections::HashSet;

use super::errors::ConversationError;
use super::types::{Message, Part, Role};

/// Append-only message history.
///
/// Every tool result must answer a tool call made earlier in the same
/// conversation; appends that would break this are rejected.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    requested: HashSet<String>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Append a message, checking it against the history so far.
    pub fn push(&mut self, message: Message) -> Result<(), ConversationError> {
        for part in &message.parts {
            match part {
                Part::ToolCall(_) if message.role != Role::Assistant => {
                    return Err(ConversationError::MisplacedPart {
                        role: message.role,
                        part: "tool call",
                    });
                }
                Part::ToolResult(_) if message.role != Role::Tool => {
                    return Err(ConversationError::MisplacedPart {
                        role: message.role,
                        part: "tool result",
                    });
                }
                Part::ToolResult(result) if !self.requested.contains(&result.tool_call_id) => {
                    return Err(ConversationError::UnmatchedToolResult(
                        result.tool_call_id.clone(),
                    ));
                }
                _ => {}
            }
        }

        for part in &message.parts {
            if let Part::ToolCall(call) = part {
                self.requested.insert(call.id.clone());
            }
        }
        self.messages.push(message);
        Ok(())
    }
}
