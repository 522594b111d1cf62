//! Room Directory
//!
//! Maps match ids to running sessions and session keys to the match they
//! are bound to. Anonymous joins are matched into the oldest open room, or a
//! fresh one when none is open.
//!
//! The directory lock is never held while awaiting a match lock. Candidate
//! selection reads the sessions' lock-free mirrors and the join itself is
//! retried if the room filled up in between.

use std::collections::BTreeMap;
use std::sync::Arc;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::game::state::{MatchError, MatchId, PerPaddle, SessionKey};
use crate::network::fanout::Notifier;
use crate::network::protocol::ErrorCode;
use crate::network::session::{
    ConnectionHandle, ConnectionId, MatchOutcome, MatchSession, SessionConfig, SessionJoin,
};

/// Attempts before a racing join gives up.
const JOIN_ATTEMPTS: usize = 4;

/// Lobby listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyInfo {
    /// Match id.
    pub match_id: MatchId,
    /// Occupied paddles.
    pub players_count: usize,
    /// Phase name.
    pub phase: String,
    /// Occupants.
    pub players: PerPaddle<Option<SessionKey>>,
}

/// Directory errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    /// No seat after repeated attempts.
    #[error("match is full")]
    MatchFull,

    /// Session is bound to a different unfinished match.
    #[error("already bound to match {current}")]
    AlreadyInAnotherMatch {
        /// Bound match.
        current: MatchId,
    },

    /// Session is not bound to any match.
    #[error("not in a match")]
    NotInMatch,

    /// Unknown match id.
    #[error("match not found")]
    NotFound,

    /// Match id already registered.
    #[error("match id already in use")]
    AlreadyExists,

    /// Rejected by the match itself.
    #[error(transparent)]
    Match(#[from] MatchError),
}

impl DirectoryError {
    /// Wire error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            DirectoryError::MatchFull => ErrorCode::MatchFull,
            DirectoryError::AlreadyInAnotherMatch { .. } => ErrorCode::AlreadyInAnotherMatch,
            DirectoryError::NotInMatch => ErrorCode::NotInMatch,
            DirectoryError::NotFound => ErrorCode::NotFound,
            DirectoryError::AlreadyExists => ErrorCode::AlreadyExists,
            DirectoryError::Match(err) => ErrorCode::from(err),
        }
    }
}

/// Result of a directory join.
pub struct JoinedMatch {
    /// Session joined.
    pub session: Arc<MatchSession>,
    /// Paddle assignment and topic subscription.
    pub join: SessionJoin,
}

#[derive(Default)]
struct DirectoryInner {
    matches: BTreeMap<MatchId, Arc<MatchSession>>,
    /// Creation order, for anonymous matching and listing.
    order: Vec<MatchId>,
    bindings: BTreeMap<SessionKey, MatchId>,
    /// Reserved pairs, kept until the match is reclaimed so an emptied
    /// reservation comes back reserved.
    reservations: BTreeMap<MatchId, [SessionKey; 2]>,
}

impl DirectoryInner {
    fn insert(&mut self, session: Arc<MatchSession>) {
        let id = session.id().clone();
        self.order.push(id.clone());
        self.matches.insert(id, session);
    }

    fn remove(&mut self, id: &MatchId) -> Option<Arc<MatchSession>> {
        let session = self.matches.remove(id)?;
        self.order.retain(|m| m != id);
        self.bindings.retain(|_, m| m != id);
        Some(session)
    }
}

/// Registry of running matches.
pub struct RoomDirectory {
    config: SessionConfig,
    inner: RwLock<DirectoryInner>,
    notifier: Arc<dyn Notifier>,
    outcomes: mpsc::UnboundedSender<MatchOutcome>,
}

impl RoomDirectory {
    /// Create an empty directory. Finished matches report to `outcomes`.
    pub fn new(
        config: SessionConfig,
        notifier: Arc<dyn Notifier>,
        outcomes: mpsc::UnboundedSender<MatchOutcome>,
    ) -> Self {
        Self {
            config,
            inner: RwLock::new(DirectoryInner::default()),
            notifier,
            outcomes,
        }
    }

    /// Session configuration used for new matches.
    pub fn session_config(&self) -> &SessionConfig {
        &self.config
    }

    /// Number of registered matches.
    pub async fn match_count(&self) -> usize {
        self.inner.read().await.matches.len()
    }

    /// Look up a match.
    pub async fn get(&self, id: &MatchId) -> Option<Arc<MatchSession>> {
        self.inner.read().await.matches.get(id).cloned()
    }

    /// Match `key` is bound to.
    pub async fn session_for(&self, key: &SessionKey) -> Option<Arc<MatchSession>> {
        let inner = self.inner.read().await;
        let id = inner.bindings.get(key)?;
        inner.matches.get(id).cloned()
    }

    // =========================================================================
    // JOIN / LEAVE
    // =========================================================================

    /// Bind `key` to a match.
    ///
    /// With `explicit`, joins (or creates) that match. Without it, rejoins the
    /// unfinished match `key` is already bound to, or falls back to the oldest
    /// open room.
    pub async fn join_or_create(
        &self,
        key: &SessionKey,
        explicit: Option<MatchId>,
        connection: ConnectionHandle,
    ) -> Result<JoinedMatch, DirectoryError> {
        let mut last_err = DirectoryError::MatchFull;

        for attempt in 0..JOIN_ATTEMPTS {
            let session = self.resolve(key, explicit.as_ref()).await?;

            match session.join(key, connection.clone()).await {
                Ok(join) => {
                    self.bind(key, &session).await;
                    return Ok(JoinedMatch { session, join });
                }
                Err(MatchError::Closed) => {
                    debug!(match_id = %session.id(), attempt, "Raced with match close, retrying");
                    self.discard(session.id()).await;
                    last_err = DirectoryError::Match(MatchError::Closed);
                }
                Err(MatchError::MatchFull) if explicit.is_none() => {
                    debug!(match_id = %session.id(), attempt, "Room filled during join, retrying");
                    last_err = DirectoryError::MatchFull;
                }
                Err(err) => return Err(err.into()),
            }
        }

        warn!(session = %key, "Giving up on join after {} attempts", JOIN_ATTEMPTS);
        Err(last_err)
    }

    /// Release `key`'s paddle and unbind it.
    pub async fn leave(&self, key: &SessionKey) -> Result<(), DirectoryError> {
        let session = self.session_for(key).await.ok_or(DirectoryError::NotInMatch)?;
        session.leave(key).await;
        self.unbind(key, &session).await;
        Ok(())
    }

    /// Handle a dropped connection. Ignored unless `connection` is the one
    /// currently bound to `key`.
    pub async fn disconnect(&self, key: &SessionKey, connection: ConnectionId) {
        let Some(session) = self.session_for(key).await else { return };
        if session.disconnect(key, connection).await.is_some() {
            self.unbind(key, &session).await;
        }
    }

    async fn resolve(
        &self,
        key: &SessionKey,
        explicit: Option<&MatchId>,
    ) -> Result<Arc<MatchSession>, DirectoryError> {
        if let Some(bound) = self.session_for(key).await {
            let named = explicit.map(|id| id == bound.id());
            match (bound.is_finished(), named) {
                // Explicit rejoin of a finished match replays its result.
                (true, Some(true)) => return Ok(bound),
                (true, _) => {
                    bound.leave(key).await;
                    self.unbind(key, &bound).await;
                }
                (false, Some(false)) => {
                    return Err(DirectoryError::AlreadyInAnotherMatch { current: bound.id().clone() });
                }
                (false, _) => return Ok(bound),
            }
        }

        match explicit {
            Some(id) => self.get_or_create(id).await,
            None => Ok(self.find_open_or_create().await),
        }
    }

    async fn get_or_create(&self, id: &MatchId) -> Result<Arc<MatchSession>, DirectoryError> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.matches.get(id) {
            return Ok(Arc::clone(existing));
        }
        let session = match inner.reservations.get(id) {
            Some(participants) => {
                debug!(match_id = %id, "Recreating emptied reserved match");
                self.reserved_session(id.clone(), participants.clone())
            }
            None => self.open_session(id.clone()),
        };
        inner.insert(Arc::clone(&session));
        Ok(session)
    }

    async fn find_open_or_create(&self) -> Arc<MatchSession> {
        let mut inner = self.inner.write().await;
        let open = inner
            .order
            .iter()
            .filter_map(|id| inner.matches.get(id))
            .find(|session| session.is_open())
            .cloned();

        if let Some(session) = open {
            return session;
        }

        let session = self.open_session(MatchId::generate());
        inner.insert(Arc::clone(&session));
        session
    }

    fn open_session(&self, id: MatchId) -> Arc<MatchSession> {
        MatchSession::new(
            id,
            self.config.clone(),
            Arc::clone(&self.notifier),
            self.outcomes.clone(),
        )
    }

    fn reserved_session(&self, id: MatchId, participants: [SessionKey; 2]) -> Arc<MatchSession> {
        MatchSession::reserved(
            id,
            self.config.clone(),
            participants,
            Arc::clone(&self.notifier),
            self.outcomes.clone(),
        )
    }

    async fn bind(&self, key: &SessionKey, session: &Arc<MatchSession>) {
        let mut inner = self.inner.write().await;
        if inner.matches.contains_key(session.id()) {
            inner.bindings.insert(key.clone(), session.id().clone());
        }
    }

    async fn unbind(&self, key: &SessionKey, session: &Arc<MatchSession>) {
        let mut inner = self.inner.write().await;
        if inner.bindings.get(key) == Some(session.id()) {
            inner.bindings.remove(key);
        }
        if session.is_closed() && inner.remove(session.id()).is_some() {
            self.notifier.close(session.topic());
            info!(match_id = %session.id(), "Closed match removed from directory");
        }
    }

    async fn discard(&self, id: &MatchId) {
        let removed = self.inner.write().await.remove(id);
        if let Some(session) = removed {
            self.notifier.close(session.topic());
        }
    }

    // =========================================================================
    // RESERVATIONS
    // =========================================================================

    /// Register a match only `participants` may join.
    pub async fn reserve(
        &self,
        id: MatchId,
        participants: [SessionKey; 2],
    ) -> Result<Arc<MatchSession>, DirectoryError> {
        let mut inner = self.inner.write().await;
        if inner.matches.contains_key(&id) || inner.reservations.contains_key(&id) {
            return Err(DirectoryError::AlreadyExists);
        }

        inner.reservations.insert(id.clone(), participants.clone());
        let session = self.reserved_session(id, participants);
        inner.insert(Arc::clone(&session));
        Ok(session)
    }

    /// Remove a match and stop it. Bound sessions become unbound and any
    /// reservation under `id` is dropped.
    pub async fn reclaim(&self, id: &MatchId) -> bool {
        let removed = {
            let mut inner = self.inner.write().await;
            inner.reservations.remove(id);
            inner.remove(id)
        };
        match removed {
            Some(session) => {
                session.shutdown().await;
                self.notifier.close(session.topic());
                info!(match_id = %id, "Match reclaimed");
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // LISTING
    // =========================================================================

    /// All registered matches in creation order.
    pub async fn list(&self) -> Vec<LobbyInfo> {
        let sessions: Vec<Arc<MatchSession>> = {
            let inner = self.inner.read().await;
            inner.order.iter().filter_map(|id| inner.matches.get(id).cloned()).collect()
        };

        let mut lobbies = Vec::with_capacity(sessions.len());
        for session in sessions {
            lobbies.push(session.summary().await);
        }
        lobbies
    }
}
