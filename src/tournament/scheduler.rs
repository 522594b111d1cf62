//! Tournament Scheduler
//!
//! At most one tournament runs at a time. Every roster change, countdown
//! step, bracket generation and result goes through one lock, and every
//! change is broadcast to the tournament topic while that lock is held, so
//! subscribers see mutations in order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::game::state::{MatchId, SessionKey};
use crate::network::directory::{DirectoryError, RoomDirectory};
use crate::network::fanout::{Notifier, Topic};
use crate::network::protocol::{ErrorCode, ServerMessage};
use crate::tournament::bracket::{final_result, round_robin, FinalResult, Pairing};

/// Longest accepted display name.
const MAX_DISPLAY_NAME_LEN: usize = 32;

// =============================================================================
// CONFIG / ERRORS
// =============================================================================

/// Tournament timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TournamentConfig {
    /// Sign-up window length, in units.
    pub signup_units: u32,
    /// Length of one unit.
    pub unit: Duration,
}

impl Default for TournamentConfig {
    fn default() -> Self {
        Self {
            signup_units: 30,
            unit: Duration::from_secs(1),
        }
    }
}

/// Tournament errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TournamentError {
    /// A tournament is already running.
    #[error("a tournament already exists")]
    AlreadyExists,

    /// No tournament is running.
    #[error("no active tournament")]
    NoActiveTournament,

    /// Roster is frozen.
    #[error("sign-up is closed")]
    SignUpClosed,

    /// Identity already on the roster.
    #[error("already signed up")]
    AlreadySignedUp,

    /// Display name taken by another roster entry.
    #[error("display name already in use")]
    DuplicateDisplayName,

    /// Display name empty or too long.
    #[error("invalid display name")]
    InvalidDisplayName,

    /// Identity not on the roster.
    #[error("not signed up")]
    NotSignedUp,

    /// Bracket not generated yet.
    #[error("tournament has not started")]
    NotStarted,

    /// Unknown pairing index or match id.
    #[error("pairing not found")]
    NotFound,

    /// Pairing already has a match.
    #[error("pairing already has a match")]
    AlreadyAssigned,

    /// Reported winner does not play in the pairing.
    #[error("winner is not a participant")]
    NotAParticipant,

    /// Match reservation failed.
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),
}

impl TournamentError {
    /// Wire error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            TournamentError::AlreadyExists => ErrorCode::AlreadyExists,
            TournamentError::NoActiveTournament => ErrorCode::NoActiveTournament,
            TournamentError::SignUpClosed => ErrorCode::SignUpClosed,
            TournamentError::AlreadySignedUp => ErrorCode::AlreadySignedUp,
            TournamentError::DuplicateDisplayName => ErrorCode::DuplicateDisplayName,
            TournamentError::InvalidDisplayName => ErrorCode::InvalidInput,
            TournamentError::NotSignedUp => ErrorCode::NotSignedUp,
            TournamentError::NotStarted => ErrorCode::NotStarted,
            TournamentError::NotFound => ErrorCode::NotFound,
            TournamentError::AlreadyAssigned => ErrorCode::AlreadyAssigned,
            TournamentError::NotAParticipant => ErrorCode::NotAParticipant,
            TournamentError::Directory(err) => err.code(),
        }
    }
}

// =============================================================================
// STATE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TournamentPhase {
    SigningUp,
    Started,
}

struct Tournament {
    organizer: SessionKey,
    roster: Vec<SessionKey>,
    display_names: BTreeMap<SessionKey, String>,
    timer: u32,
    phase: TournamentPhase,
    pairings: Vec<Pairing>,
    final_result: Option<FinalResult>,
    countdown: Option<AbortHandle>,
    epoch: u64,
}

impl Tournament {
    fn view(&self) -> TournamentView {
        TournamentView {
            organizer: self.organizer.clone(),
            players: self.roster.clone(),
            display_names: self.display_names.clone(),
            timer: self.timer,
            is_started: self.phase == TournamentPhase::Started,
            matches: self.pairings.clone(),
            final_result: self.final_result.clone(),
        }
    }

    fn require_signing_up(&self) -> Result<(), TournamentError> {
        match self.phase {
            TournamentPhase::SigningUp => Ok(()),
            TournamentPhase::Started => Err(TournamentError::SignUpClosed),
        }
    }
}

/// Broadcast rendering of a tournament.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TournamentView {
    /// Creator.
    pub organizer: SessionKey,
    /// Roster in sign-up order.
    pub players: Vec<SessionKey>,
    /// Display name per roster entry.
    pub display_names: BTreeMap<SessionKey, String>,
    /// Sign-up units left.
    pub timer: u32,
    /// Whether the bracket exists.
    pub is_started: bool,
    /// Bracket.
    pub matches: Vec<Pairing>,
    /// Final standing once every pairing is decided.
    pub final_result: Option<FinalResult>,
}

/// Match handed out for a pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchAssignment {
    /// Reserved match.
    pub match_id: MatchId,
    /// Whether this call created it.
    pub newly_created: bool,
}

// =============================================================================
// SCHEDULER
// =============================================================================

/// Owner of the single active tournament.
pub struct TournamentScheduler {
    config: TournamentConfig,
    state: Mutex<Option<Tournament>>,
    next_epoch: AtomicU64,
    notifier: Arc<dyn Notifier>,
    directory: Arc<RoomDirectory>,
}

impl TournamentScheduler {
    /// Create a scheduler with no active tournament.
    pub fn new(
        config: TournamentConfig,
        notifier: Arc<dyn Notifier>,
        directory: Arc<RoomDirectory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(None),
            next_epoch: AtomicU64::new(0),
            notifier,
            directory,
        })
    }

    /// Current state, `None` when no tournament is active.
    pub async fn snapshot(&self) -> Option<TournamentView> {
        self.state.lock().await.as_ref().map(Tournament::view)
    }

    /// Open a tournament and start its sign-up countdown.
    pub async fn create(self: &Arc<Self>, organizer: &SessionKey) -> Result<TournamentView, TournamentError> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Err(TournamentError::AlreadyExists);
        }

        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        let countdown = tokio::spawn(Arc::clone(self).run_countdown(epoch));

        let tournament = state.insert(Tournament {
            organizer: organizer.clone(),
            roster: Vec::new(),
            display_names: BTreeMap::new(),
            timer: self.config.signup_units,
            phase: TournamentPhase::SigningUp,
            pairings: Vec::new(),
            final_result: None,
            countdown: Some(countdown.abort_handle()),
            epoch,
        });

        info!(organizer = %organizer, signup_units = self.config.signup_units, "Tournament created");
        let view = tournament.view();
        self.broadcast(Some(view.clone()));
        Ok(view)
    }

    /// Add `identity` to the roster.
    pub async fn sign_up(&self, identity: &SessionKey, display_name: &str) -> Result<(), TournamentError> {
        let display_name = display_name.trim();
        if display_name.is_empty()
            || display_name.chars().count() > MAX_DISPLAY_NAME_LEN
            || display_name.chars().any(char::is_control)
        {
            return Err(TournamentError::InvalidDisplayName);
        }

        let mut state = self.state.lock().await;
        let t = state.as_mut().ok_or(TournamentError::NoActiveTournament)?;
        t.require_signing_up()?;

        if t.roster.contains(identity) {
            return Err(TournamentError::AlreadySignedUp);
        }
        if t.display_names.values().any(|name| name == display_name) {
            return Err(TournamentError::DuplicateDisplayName);
        }

        t.roster.push(identity.clone());
        t.display_names.insert(identity.clone(), display_name.to_string());

        info!(identity = %identity, display_name, roster = t.roster.len(), "Tournament sign-up");
        self.broadcast(Some(t.view()));
        Ok(())
    }

    /// Remove `identity` from the roster.
    pub async fn withdraw(&self, identity: &SessionKey) -> Result<(), TournamentError> {
        let mut state = self.state.lock().await;
        let t = state.as_mut().ok_or(TournamentError::NoActiveTournament)?;
        t.require_signing_up()?;

        let position = t
            .roster
            .iter()
            .position(|entry| entry == identity)
            .ok_or(TournamentError::NotSignedUp)?;
        t.roster.remove(position);
        t.display_names.remove(identity);

        info!(identity = %identity, roster = t.roster.len(), "Tournament withdrawal");
        self.broadcast(Some(t.view()));
        Ok(())
    }

    async fn run_countdown(self: Arc<Self>, epoch: u64) {
        let unit = self.config.unit;
        let mut ticker = interval_at(Instant::now() + unit, unit);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if !self.tick_countdown(epoch).await {
                break;
            }
        }
    }

    /// One countdown step. Returns whether the countdown keeps running.
    async fn tick_countdown(&self, epoch: u64) -> bool {
        let mut state = self.state.lock().await;
        let Some(t) = state.as_mut() else { return false };
        if t.epoch != epoch || t.phase != TournamentPhase::SigningUp {
            return false;
        }

        t.timer = t.timer.saturating_sub(1);
        if t.timer > 0 {
            self.broadcast(Some(t.view()));
            return true;
        }

        t.countdown = None;
        if t.roster.len() < 2 {
            info!(roster = t.roster.len(), "Sign-up closed with too few players, tournament discarded");
            *state = None;
            self.broadcast(None);
            return false;
        }

        t.pairings = round_robin(&t.roster);
        t.phase = TournamentPhase::Started;
        info!(roster = t.roster.len(), pairings = t.pairings.len(), "Tournament started");
        self.broadcast(Some(t.view()));
        false
    }

    /// Match for `pairing`, reserving one on first request.
    pub async fn assign_match(&self, pairing: usize) -> Result<MatchAssignment, TournamentError> {
        let mut state = self.state.lock().await;
        let t = state.as_mut().ok_or(TournamentError::NoActiveTournament)?;
        if t.phase != TournamentPhase::Started {
            return Err(TournamentError::NotStarted);
        }

        let entry = t.pairings.get_mut(pairing).ok_or(TournamentError::NotFound)?;
        if let Some(match_id) = &entry.match_id {
            return Ok(MatchAssignment { match_id: match_id.clone(), newly_created: false });
        }

        let match_id = MatchId::generate();
        self.directory.reserve(match_id.clone(), entry.players.clone()).await?;
        entry.match_id = Some(match_id.clone());

        info!(pairing, match_id = %match_id, "Tournament match assigned");
        self.broadcast(Some(t.view()));
        Ok(MatchAssignment { match_id, newly_created: true })
    }

    /// Like [`assign_match`](Self::assign_match), but fails if the pairing
    /// already has a match.
    pub async fn claim_match(&self, pairing: usize) -> Result<MatchId, TournamentError> {
        let assignment = self.assign_match(pairing).await?;
        if !assignment.newly_created {
            return Err(TournamentError::AlreadyAssigned);
        }
        Ok(assignment.match_id)
    }

    /// Record `winner` for the pairing played in `match_id`. `points` is the
    /// `(winner, loser)` score when known.
    ///
    /// `Ok(false)` when a winner was already recorded; the first one stands.
    pub async fn report_result(
        &self,
        match_id: &MatchId,
        winner: &SessionKey,
        points: Option<(u32, u32)>,
    ) -> Result<bool, TournamentError> {
        let mut state = self.state.lock().await;
        let t = state.as_mut().ok_or(TournamentError::NoActiveTournament)?;

        let entry = t
            .pairings
            .iter_mut()
            .find(|p| p.match_id.as_ref() == Some(match_id))
            .ok_or(TournamentError::NotFound)?;
        if !entry.involves(winner) {
            return Err(TournamentError::NotAParticipant);
        }

        let recorded = entry.winner.is_none();
        if recorded {
            entry.winner = Some(winner.clone());
            if let Some((won, lost)) = points {
                entry.score = if &entry.players[0] == winner { [won, lost] } else { [lost, won] };
            }
            info!(match_id = %match_id, winner = %winner, score = ?entry.score, "Tournament result recorded");

            if t.final_result.is_none() {
                t.final_result = final_result(&t.pairings);
                if let Some(result) = &t.final_result {
                    info!(kind = ?result.kind, usernames = ?result.usernames, "Tournament final result");
                }
            }
        } else {
            debug!(match_id = %match_id, "Result already recorded, keeping the first");
        }

        self.broadcast(Some(t.view()));
        Ok(recorded)
    }

    /// Tear the tournament down from any phase.
    pub async fn close(&self) -> Result<(), TournamentError> {
        let closed = {
            let mut state = self.state.lock().await;
            let t = state.take().ok_or(TournamentError::NoActiveTournament)?;
            if let Some(countdown) = &t.countdown {
                countdown.abort();
            }
            self.broadcast(None);
            t
        };

        info!(organizer = %closed.organizer, "Tournament closed");
        for match_id in closed.pairings.iter().filter_map(|p| p.match_id.as_ref()) {
            if !self.directory.reclaim(match_id).await {
                debug!(match_id = %match_id, "Tournament match already reclaimed");
            }
        }
        Ok(())
    }

    fn broadcast(&self, view: Option<TournamentView>) {
        let reached = self.notifier.publish(&Topic::Tournament, ServerMessage::Tournament { state: view });
        if reached == 0 {
            debug!("Tournament update had no subscribers");
        }
    }
}
