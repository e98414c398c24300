//! In-memory history for the rendered chat page.
//!
//! Each page session owns its own transcript behind an async mutex that is
//! held for the whole exchange, so posts to one session are serialized while
//! other sessions proceed independently. The session table itself is a
//! bounded LRU behind a plain mutex that is only held while looking up or
//! inserting an entry. Once full, starting a session drops the least
//! recently used one.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use tracing::debug;

use relay_core::types::Turn;

use crate::error::ChatError;
use crate::exchange::{ExchangeOutcome, ExchangeRequest, TurnExchange};

type Transcript = Arc<tokio::sync::Mutex<Vec<Turn>>>;

const DEFAULT_MAX_SESSIONS: NonZeroUsize = match NonZeroUsize::new(1000) {
    Some(n) => n,
    None => unreachable!(),
};

/// Result of a page exchange: the outcome plus the session's full transcript.
#[derive(Debug, Clone)]
pub struct PageExchange {
    pub outcome: ExchangeOutcome,
    pub transcript: Vec<Turn>,
}

/// Page-session transcripts keyed by session id.
pub struct PageSessions {
    sessions: Mutex<LruCache<String, Transcript>>,
}

impl Default for PageSessions {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_SESSIONS.get())
    }
}

impl PageSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `max_sessions` transcripts; zero falls back to the default.
    pub fn with_capacity(max_sessions: usize) -> Self {
        let capacity = NonZeroUsize::new(max_sessions).unwrap_or(DEFAULT_MAX_SESSIONS);
        Self {
            sessions: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn table(&self) -> Result<std::sync::MutexGuard<'_, LruCache<String, Transcript>>, ChatError> {
        self.sessions
            .lock()
            .map_err(|e| ChatError::Storage(format!("page session table poisoned: {}", e)))
    }

    fn get_or_create(&self, session_id: &str) -> Result<Transcript, ChatError> {
        let mut sessions = self.table()?;
        if let Some(transcript) = sessions.get(session_id) {
            return Ok(Arc::clone(transcript));
        }

        let transcript = Transcript::default();
        debug!(session_id = %session_id, "Page session started");
        // The id was absent, so anything returned here was evicted.
        if let Some((evicted, _)) = sessions.push(session_id.to_string(), Arc::clone(&transcript)) {
            debug!(session_id = %evicted, "Page session evicted");
        }
        Ok(transcript)
    }

    fn get(&self, session_id: &str) -> Result<Option<Transcript>, ChatError> {
        Ok(self.table()?.get(session_id).cloned())
    }

    /// Snapshot of a session's transcript; empty for unknown sessions.
    pub async fn transcript(&self, session_id: &str) -> Result<Vec<Turn>, ChatError> {
        match self.get(session_id)? {
            Some(transcript) => Ok(transcript.lock().await.clone()),
            None => Ok(Vec::new()),
        }
    }

    /// Run one exchange against the session's in-memory history.
    pub async fn exchange(
        &self,
        engine: &TurnExchange,
        session_id: &str,
        request: ExchangeRequest,
    ) -> Result<PageExchange, ChatError> {
        let transcript = self.get_or_create(session_id)?;
        let mut turns = transcript.lock().await;

        let history = turns.clone();
        let outcome = engine.exchange(request, &history, &mut *turns).await?;

        Ok(PageExchange {
            outcome,
            transcript: turns.clone(),
        })
    }

    /// Number of sessions currently held.
    pub fn len(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn capacity(&self) -> usize {
        self.sessions.lock().map(|s| s.cap().get()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
