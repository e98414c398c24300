//! Store-backed conversation transcript.

use std::sync::Arc;

use relay_core::types::Turn;
use relay_storage::{Database, MessageRepository, NewMessage};

use crate::error::ChatError;
use crate::exchange::{CommittedIds, ExchangeOutcome, ExchangeRequest, TurnExchange, TurnPair, TurnSink};

/// A stored conversation used as both history source and sink.
///
/// History is reloaded from the database before every exchange, and the
/// resulting turn pair is written in a single transaction.
pub struct StoredTranscript {
    messages: MessageRepository,
    conversation_id: String,
}

impl StoredTranscript {
    pub fn new(db: Arc<Database>, conversation_id: impl Into<String>) -> Self {
        Self {
            messages: MessageRepository::new(db),
            conversation_id: conversation_id.into(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// The conversation so far, oldest first, with adjacent turns from the
    /// same speaker merged.
    ///
    /// Client-supplied timestamps may run backwards, which can sort two user
    /// turns next to each other; the model API only accepts alternating roles.
    pub fn history(&self) -> Result<Vec<Turn>, ChatError> {
        let messages = self.messages.list(&self.conversation_id)?;
        Ok(coalesce(messages.iter().map(|m| m.to_turn())))
    }

    /// Load history, run the exchange, and persist both turns.
    pub async fn exchange(
        &mut self,
        engine: &TurnExchange,
        request: ExchangeRequest,
    ) -> Result<ExchangeOutcome, ChatError> {
        let history = self.history()?;
        engine.exchange(request, &history, self).await
    }
}

fn coalesce(turns: impl IntoIterator<Item = Turn>) -> Vec<Turn> {
    let mut merged: Vec<Turn> = Vec::new();
    for turn in turns {
        match merged.last_mut() {
            Some(last) if last.role == turn.role => {
                last.text.push_str("\n\n");
                last.text.push_str(&turn.text);
            }
            _ => merged.push(turn),
        }
    }
    merged
}

impl TurnSink for StoredTranscript {
    fn commit(&mut self, pair: &TurnPair) -> Result<CommittedIds, ChatError> {
        let (user_message_id, assistant_message_id) = self.messages.append_exchange(
            &self.conversation_id,
            &NewMessage {
                speaker: pair.user.role,
                content: &pair.user.text,
                timestamp: pair.user_timestamp,
            },
            &NewMessage {
                speaker: pair.assistant.role,
                content: &pair.assistant.text,
                timestamp: pair.assistant_timestamp,
            },
        )?;

        Ok(CommittedIds {
            user_message_id,
            assistant_message_id,
        })
    }
}
