//! Turn exchange protocol for the chat relay.
//!
//! One exchange validates the user's text, asks the model gateway for a
//! reply given the prior history, and commits the user turn and the reply
//! together through a [`TurnSink`]. History comes either from the store
//! ([`StoredTranscript`]) or from per-session process memory
//! ([`PageSessions`]).

pub mod error;
pub mod exchange;
pub mod sessions;
pub mod stored;

pub use error::ChatError;
pub use exchange::{CommittedIds, ExchangeOutcome, ExchangeRequest, TurnExchange, TurnPair, TurnSink};
pub use sessions::{PageExchange, PageSessions};
pub use stored::StoredTranscript;
