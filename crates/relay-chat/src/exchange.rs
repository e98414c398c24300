//! The turn exchange: validate, ask the model, commit both turns.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use relay_core::types::{new_id, Turn};
use relay_gateway::ModelGateway;

use crate::error::ChatError;

/// One user utterance to exchange for a model reply.
#[derive(Debug, Clone)]
pub struct ExchangeRequest {
    pub system_prompt: Option<String>,
    pub user_text: String,
    pub user_timestamp: DateTime<Utc>,
}

/// The user turn and the model's reply, ready to be committed together.
#[derive(Debug, Clone)]
pub struct TurnPair {
    pub user: Turn,
    pub user_timestamp: DateTime<Utc>,
    pub assistant: Turn,
    pub assistant_timestamp: DateTime<Utc>,
}

/// Identifiers assigned by a sink to a committed pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedIds {
    pub user_message_id: String,
    pub assistant_message_id: String,
}

/// Result of a successful exchange.
#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    pub reply_text: String,
    pub user_message_id: String,
    pub assistant_message_id: String,
    pub assistant_timestamp: DateTime<Utc>,
    pub input_tokens: u32,
}

/// Destination for a completed turn pair.
///
/// A sink either keeps both turns or neither.
pub trait TurnSink {
    fn commit(&mut self, pair: &TurnPair) -> Result<CommittedIds, ChatError>;
}

/// Process-memory history: both turns are appended in order.
impl TurnSink for Vec<Turn> {
    fn commit(&mut self, pair: &TurnPair) -> Result<CommittedIds, ChatError> {
        self.push(pair.user.clone());
        self.push(pair.assistant.clone());
        Ok(CommittedIds {
            user_message_id: new_id(),
            assistant_message_id: new_id(),
        })
    }
}

/// Runs exchanges against a model gateway.
#[derive(Clone)]
pub struct TurnExchange {
    gateway: Arc<dyn ModelGateway>,
    max_message_chars: usize,
}

impl TurnExchange {
    pub fn new(gateway: Arc<dyn ModelGateway>, max_message_chars: usize) -> Self {
        Self {
            gateway,
            max_message_chars,
        }
    }

    /// Check user text against the exchange's length rules.
    pub fn validate(&self, user_text: &str) -> Result<(), ChatError> {
        if user_text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if user_text.chars().count() > self.max_message_chars {
            return Err(ChatError::MessageTooLong(self.max_message_chars));
        }
        Ok(())
    }

    /// Exchange one user utterance for a model reply.
    ///
    /// `history` is the conversation so far, oldest first. Nothing reaches
    /// `sink` unless the gateway call succeeds. The reply is stamped no
    /// earlier than the user turn, so the pair stays ordered even when the
    /// client clock runs ahead of ours.
    pub async fn exchange<S>(
        &self,
        request: ExchangeRequest,
        history: &[Turn],
        sink: &mut S,
    ) -> Result<ExchangeOutcome, ChatError>
    where
        S: TurnSink + ?Sized,
    {
        self.validate(&request.user_text)?;

        let user_turn = Turn::user(request.user_text);
        let mut turns = Vec::with_capacity(history.len() + 1);
        turns.extend_from_slice(history);
        turns.push(user_turn.clone());

        let completion = self
            .gateway
            .complete(request.system_prompt.as_deref(), &turns)
            .await
            .map_err(|e| {
                warn!(error = %e, history_len = history.len(), "Model call failed, nothing committed");
                ChatError::Upstream(e)
            })?;

        let assistant_timestamp = Utc::now().max(request.user_timestamp);
        let pair = TurnPair {
            user: user_turn,
            user_timestamp: request.user_timestamp,
            assistant: Turn::assistant(completion.text.clone()),
            assistant_timestamp,
        };
        let ids = sink.commit(&pair)?;

        debug!(
            assistant_message_id = %ids.assistant_message_id,
            input_tokens = completion.input_tokens,
            "Exchange complete"
        );

        Ok(ExchangeOutcome {
            reply_text: completion.text,
            user_message_id: ids.user_message_id,
            assistant_message_id: ids.assistant_message_id,
            assistant_timestamp,
            input_tokens: completion.input_tokens,
        })
    }
}
