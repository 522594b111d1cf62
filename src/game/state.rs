//! Match State Definitions
//!
//! The complete mutable state of one pong match and the state machine that
//! guards it. Everything here is synchronous and deterministic; the network
//! layer owns the clock and the locking.

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::fixed::{Fixed, PADDLE_START_Y, to_float};
use crate::core::vec2::FixedVec2;
use crate::game::events::{CountdownKind, GameEvent, GameEventData};
use crate::game::input::PaddleDirection;
use crate::game::tick::MatchConfig;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Stable per-player token, supplied by the client or the auth layer.
///
/// Survives reconnects; the transient connection is tracked separately.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(pub String);

impl SessionKey {
    /// Create from anything string-like.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow as str.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Match identifier. Either client-chosen (explicit room) or generated.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchId(pub String);

impl MatchId {
    /// Create from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow as str.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MatchId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// PADDLES
// =============================================================================

/// One of the two player slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Paddle {
    /// Defends x = 0.
    Left,
    /// Defends x = field width.
    Right,
}

impl Paddle {
    /// Assignment order: left before right.
    pub const ALL: [Paddle; 2] = [Paddle::Left, Paddle::Right];

    /// The other paddle.
    #[inline]
    pub fn opponent(self) -> Paddle {
        match self {
            Paddle::Left => Paddle::Right,
            Paddle::Right => Paddle::Left,
        }
    }
}

impl fmt::Display for Paddle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Paddle::Left => f.write_str("left"),
            Paddle::Right => f.write_str("right"),
        }
    }
}

/// A value kept per paddle. Serializes as `{ "left": .., "right": .. }`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerPaddle<T> {
    /// Left paddle's value.
    pub left: T,
    /// Right paddle's value.
    pub right: T,
}

impl<T> PerPaddle<T> {
    /// Same value on both sides.
    pub fn splat(value: T) -> Self
    where
        T: Clone,
    {
        Self { left: value.clone(), right: value }
    }

    /// Borrow one side.
    #[inline]
    pub fn get(&self, paddle: Paddle) -> &T {
        match paddle {
            Paddle::Left => &self.left,
            Paddle::Right => &self.right,
        }
    }

    /// Mutably borrow one side.
    #[inline]
    pub fn get_mut(&mut self, paddle: Paddle) -> &mut T {
        match paddle {
            Paddle::Left => &mut self.left,
            Paddle::Right => &mut self.right,
        }
    }

    /// Map both sides.
    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> PerPaddle<U> {
        PerPaddle { left: f(&self.left), right: f(&self.right) }
    }
}

/// Vertical state of one paddle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaddleState {
    /// Top edge (Q16.16).
    pub y: Fixed,
    /// Direction currently driven.
    pub direction: PaddleDirection,
}

impl Default for PaddleState {
    fn default() -> Self {
        Self { y: PADDLE_START_Y, direction: PaddleDirection::Stop }
    }
}

/// Ball position and velocity (units per tick).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallState {
    /// Centre point.
    pub position: FixedVec2,
    /// Velocity per physics tick.
    pub velocity: FixedVec2,
}

impl BallState {
    /// Ball at the serve point travelling with the given velocity.
    pub fn served(config: &MatchConfig, velocity: FixedVec2) -> Self {
        Self { position: config.serve_point(), velocity }
    }
}

/// Rendered view of a match, the payload of every state broadcast.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchSnapshot {
    /// Paddle top edges.
    pub paddles: PerPaddle<f32>,
    /// Ball position and velocity.
    pub ball: BallSnapshot,
    /// Points per side.
    pub score: PerPaddle<u32>,
}

/// Ball as sent to clients.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BallSnapshot {
    /// Centre x
    pub x: f32,
    /// Centre y
    pub y: f32,
    /// Horizontal velocity per tick
    pub dx: f32,
    /// Vertical velocity per tick
    pub dy: f32,
}

// =============================================================================
// MATCH PHASE
// =============================================================================

/// Lifecycle phase of a match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchPhase {
    /// Fewer than two players, or not everyone is ready.
    Waiting,
    /// Pre-serve delay. Loops are running.
    Countdown {
        /// Physics ticks until the ball goes live.
        ticks_remaining: u32,
        /// Why the countdown is running.
        kind: CountdownKind,
    },
    /// Ball is live.
    Playing,
    /// Terminal. `winner` is `None` when the match was terminated by a fault.
    Finished {
        /// Winning paddle, if any.
        winner: Option<Paddle>,
    },
}

impl MatchPhase {
    /// Whether the physics/broadcast loops should be running.
    #[inline]
    pub fn is_active(self) -> bool {
        matches!(self, MatchPhase::Countdown { .. } | MatchPhase::Playing)
    }

    /// Short name for logs and lobby listings.
    pub fn name(self) -> &'static str {
        match self {
            MatchPhase::Waiting => "waiting",
            MatchPhase::Countdown { .. } => "countdown",
            MatchPhase::Playing => "playing",
            MatchPhase::Finished { .. } => "finished",
        }
    }
}

// =============================================================================
// STATE MACHINE RESULTS
// =============================================================================

/// Result of a successful join.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Paddle owned by the session.
    pub paddle: Paddle,
    /// True when the session already owned this paddle (reconnect).
    pub rejoined: bool,
}

/// Result of a leave.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// Paddle that was freed.
    pub paddle: Paddle,
    /// Players still holding a paddle.
    pub remaining: usize,
    /// True if the leave stopped an active countdown or rally.
    pub halted: bool,
}

/// Result of a ready request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadyOutcome {
    /// Flag recorded; still waiting on the other side.
    Waiting,
    /// Both sides ready: the start countdown is running.
    CountdownStarted,
    /// Match is not in `Waiting`; nothing changed.
    Ignored,
}

/// Match state machine errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchError {
    /// Both paddles are taken.
    #[error("Match is full")]
    MatchFull,

    /// Match is reserved for other participants.
    #[error("Not a participant of this match")]
    NotAParticipant,

    /// Session holds no paddle here.
    #[error("Not in this match")]
    NotInMatch,

    /// Match already finished.
    #[error("Match is over")]
    MatchOver,

    /// Match emptied out and is being reclaimed.
    #[error("Match is closed")]
    Closed,
}

// =============================================================================
// MATCH STATE
// =============================================================================

/// Complete state of one match.
#[derive(Clone, Debug)]
pub struct MatchState {
    /// Rules and geometry.
    pub config: MatchConfig,
    /// Physics ticks simulated while `Playing`.
    pub tick: u32,
    /// Lifecycle phase.
    pub phase: MatchPhase,
    /// Session holding each paddle.
    pub players: PerPaddle<Option<SessionKey>>,
    /// Ready flags.
    pub ready: PerPaddle<bool>,
    /// Paddle positions.
    pub paddles: PerPaddle<PaddleState>,
    /// Ball.
    pub ball: BallState,
    /// Points per side.
    pub score: PerPaddle<u32>,
    /// Only these keys may join (tournament reservations).
    pub allowed: Option<[SessionKey; 2]>,
    /// Set once the last player left; never reopened.
    closed: bool,
    /// Events since last drain.
    events: Vec<GameEvent>,
}

impl MatchState {
    /// Empty match in `Waiting`.
    pub fn new(config: MatchConfig) -> Self {
        let serve = config.ball_serve_speed;
        let ball = BallState::served(&config, FixedVec2::new(serve, serve));
        Self {
            config,
            tick: 0,
            phase: MatchPhase::Waiting,
            players: PerPaddle::default(),
            ready: PerPaddle::default(),
            paddles: PerPaddle::default(),
            ball,
            score: PerPaddle::default(),
            allowed: None,
            closed: false,
            events: Vec::new(),
        }
    }

    /// Empty match only the given sessions may join.
    pub fn reserved(config: MatchConfig, participants: [SessionKey; 2]) -> Self {
        let mut state = Self::new(config);
        state.allowed = Some(participants);
        state
    }

    /// Number of occupied paddles.
    pub fn occupancy(&self) -> usize {
        Paddle::ALL.iter().filter(|p| self.players.get(**p).is_some()).count()
    }

    /// Paddle owned by `key`.
    pub fn paddle_of(&self, key: &SessionKey) -> Option<Paddle> {
        Paddle::ALL
            .into_iter()
            .find(|p| self.players.get(*p).as_ref() == Some(key))
    }

    /// Session owning `paddle`.
    pub fn player_on(&self, paddle: Paddle) -> Option<&SessionKey> {
        self.players.get(paddle).as_ref()
    }

    /// Whether the match was emptied and must not be reused.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether the match reached `Finished`.
    pub fn is_finished(&self) -> bool {
        matches!(self.phase, MatchPhase::Finished { .. })
    }

    /// Whether this match is restricted to a fixed pair of sessions.
    pub fn is_reserved(&self) -> bool {
        self.allowed.is_some()
    }

    /// Take a paddle, or re-take the one this session already owns.
    pub fn join(&mut self, key: &SessionKey) -> Result<JoinOutcome, MatchError> {
        if self.closed {
            return Err(MatchError::Closed);
        }

        if let Some(paddle) = self.paddle_of(key) {
            self.push_event(GameEventData::PlayerJoined {
                paddle,
                session_key: key.clone(),
                rejoined: true,
            });
            return Ok(JoinOutcome { paddle, rejoined: true });
        }

        if self.is_finished() {
            return Err(MatchError::MatchOver);
        }

        if let Some(allowed) = &self.allowed {
            if !allowed.contains(key) {
                return Err(MatchError::NotAParticipant);
            }
        }

        let paddle = Paddle::ALL
            .into_iter()
            .find(|p| self.players.get(*p).is_none())
            .ok_or(MatchError::MatchFull)?;

        *self.players.get_mut(paddle) = Some(key.clone());
        *self.ready.get_mut(paddle) = false;
        *self.paddles.get_mut(paddle) = PaddleState::default();

        self.push_event(GameEventData::PlayerJoined {
            paddle,
            session_key: key.clone(),
            rejoined: false,
        });

        Ok(JoinOutcome { paddle, rejoined: false })
    }

    /// Free the session's paddle.
    ///
    /// Dropping below two players during a countdown or rally reverts to
    /// `Waiting`, re-centres the ball and clears both ready flags. The score
    /// is kept. Returns `None` if the session holds no paddle.
    pub fn leave(&mut self, key: &SessionKey) -> Option<LeaveOutcome> {
        let paddle = self.paddle_of(key)?;

        *self.players.get_mut(paddle) = None;
        *self.ready.get_mut(paddle) = false;
        self.paddles.get_mut(paddle).direction = PaddleDirection::Stop;

        self.push_event(GameEventData::PlayerLeft {
            paddle,
            session_key: key.clone(),
        });

        let remaining = self.occupancy();
        let mut halted = false;

        if remaining < 2 && self.phase.is_active() {
            self.phase = MatchPhase::Waiting;
            self.ready = PerPaddle::default();
            self.paddles.left.direction = PaddleDirection::Stop;
            self.paddles.right.direction = PaddleDirection::Stop;
            self.recenter_ball();
            self.push_event(GameEventData::Halted);
            halted = true;
        }

        if remaining == 0 {
            self.closed = true;
        }

        Some(LeaveOutcome { paddle, remaining, halted })
    }

    /// Mark the session's paddle ready and start the countdown once both
    /// paddles are occupied and ready.
    pub fn set_ready(&mut self, key: &SessionKey) -> Result<ReadyOutcome, MatchError> {
        let paddle = self.paddle_of(key).ok_or(MatchError::NotInMatch)?;

        if self.phase != MatchPhase::Waiting {
            return Ok(ReadyOutcome::Ignored);
        }

        *self.ready.get_mut(paddle) = true;
        self.push_event(GameEventData::ReadyChanged { ready: self.ready });

        if self.occupancy() == 2 && self.ready.left && self.ready.right {
            self.begin_countdown(CountdownKind::Start);
            return Ok(ReadyOutcome::CountdownStarted);
        }

        Ok(ReadyOutcome::Waiting)
    }

    /// Drive the session's paddle.
    ///
    /// Returns `Ok(false)` when the input was dropped because the ball is
    /// not in play. Dropped input is never queued.
    pub fn apply_input(
        &mut self,
        key: &SessionKey,
        direction: PaddleDirection,
    ) -> Result<bool, MatchError> {
        let paddle = self.paddle_of(key).ok_or(MatchError::NotInMatch)?;

        let accepts = matches!(
            self.phase,
            MatchPhase::Playing
                | MatchPhase::Countdown { kind: CountdownKind::Serve, .. }
        );
        if !accepts {
            return Ok(false);
        }

        self.paddles.get_mut(paddle).direction = direction;
        Ok(true)
    }

    /// Terminate without a winner after an internal fault.
    pub fn terminate(&mut self) {
        if self.is_finished() {
            return;
        }
        self.phase = MatchPhase::Finished { winner: None };
        self.push_event(GameEventData::MatchOver { winner: None });
    }

    /// Start a countdown of the configured length.
    pub(crate) fn begin_countdown(&mut self, kind: CountdownKind) {
        let ticks_remaining = match kind {
            CountdownKind::Start => self.config.start_countdown_ticks(),
            CountdownKind::Serve => self.config.serve_countdown_ticks(),
        };
        self.phase = MatchPhase::Countdown { ticks_remaining, kind };
        self.push_event(GameEventData::CountdownStarted { kind });
    }

    /// Put the ball back on the serve point without changing direction.
    pub(crate) fn recenter_ball(&mut self) {
        let serve = self.config.ball_serve_speed;
        let dx = if self.ball.velocity.x < 0 { -serve } else { serve };
        self.ball = BallState::served(&self.config, FixedVec2::new(dx, serve));
    }

    /// Re-serve after a point: the horizontal direction flips relative to
    /// the ball's direction before the reset, so serves alternate sides.
    pub(crate) fn reset_ball(&mut self) {
        let serve = self.config.ball_serve_speed;
        let dx = if self.ball.velocity.x > 0 { -serve } else { serve };
        self.ball = BallState::served(&self.config, FixedVec2::new(dx, serve));
    }

    /// Render the current state for clients.
    pub fn snapshot(&self) -> MatchSnapshot {
        let (x, y) = self.ball.position.to_floats();
        let (dx, dy) = self.ball.velocity.to_floats();
        MatchSnapshot {
            paddles: self.paddles.map(|p| to_float(p.y)),
            ball: BallSnapshot { x, y, dx, dy },
            score: self.score,
        }
    }

    /// Record an event.
    pub(crate) fn push_event(&mut self, data: GameEventData) {
        self.events.push(GameEvent::new(self.tick, data));
    }

    /// Drain recorded events.
    pub fn take_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(s: &str) -> SessionKey {
        SessionKey::from(s)
    }

    fn two_player_match() -> MatchState {
        let mut state = MatchState::new(MatchConfig::default());
        state.join(&key("k1")).unwrap();
        state.join(&key("k2")).unwrap();
        state
    }

    #[test]
    fn test_join_assigns_left_then_right() {
        let mut state = MatchState::new(MatchConfig::default());

        let first = state.join(&key("k1")).unwrap();
        assert_eq!(first, JoinOutcome { paddle: Paddle::Left, rejoined: false });
        assert_eq!(state.occupancy(), 1);
        assert_eq!(state.phase, MatchPhase::Waiting);

        let second = state.join(&key("k2")).unwrap();
        assert_eq!(second.paddle, Paddle::Right);
        assert_eq!(state.occupancy(), 2);
        assert_eq!(state.phase, MatchPhase::Waiting);
    }

    #[test]
    fn test_third_player_rejected() {
        let mut state = two_player_match();
        assert_eq!(state.join(&key("k3")), Err(MatchError::MatchFull));
        assert_eq!(state.occupancy(), 2);
    }

    #[test]
    fn test_rejoin_rebinds_same_paddle() {
        let mut state = two_player_match();
        let again = state.join(&key("k2")).unwrap();
        assert_eq!(again, JoinOutcome { paddle: Paddle::Right, rejoined: true });
        assert_eq!(state.occupancy(), 2);
    }

    #[test]
    fn test_single_ready_never_starts() {
        let mut state = MatchState::new(MatchConfig::default());
        state.join(&key("k1")).unwrap();

        assert_eq!(state.set_ready(&key("k1")), Ok(ReadyOutcome::Waiting));
        assert_eq!(state.phase, MatchPhase::Waiting);
    }

    #[test]
    fn test_both_ready_starts_countdown() {
        let mut state = two_player_match();
        assert_eq!(state.set_ready(&key("k1")), Ok(ReadyOutcome::Waiting));
        assert_eq!(state.set_ready(&key("k2")), Ok(ReadyOutcome::CountdownStarted));
        assert!(matches!(
            state.phase,
            MatchPhase::Countdown { kind: CountdownKind::Start, .. }
        ));
    }

    #[test]
    fn test_ready_unknown_session() {
        let mut state = two_player_match();
        assert_eq!(state.set_ready(&key("nobody")), Err(MatchError::NotInMatch));
    }

    #[test]
    fn test_leave_during_play_reverts_to_waiting() {
        let mut state = two_player_match();
        state.set_ready(&key("k1")).unwrap();
        state.set_ready(&key("k2")).unwrap();
        state.phase = MatchPhase::Playing;
        state.score.right = 1;
        state.ball.position = FixedVec2::from_ints(100, 100);

        let outcome = state.leave(&key("k1")).unwrap();
        assert_eq!(outcome, LeaveOutcome { paddle: Paddle::Left, remaining: 1, halted: true });
        assert_eq!(state.phase, MatchPhase::Waiting);
        assert_eq!(state.ready, PerPaddle::splat(false));
        assert_eq!(state.score.right, 1);
        assert_eq!(state.ball.position, state.config.serve_point());

        // Reconnecting restores the left paddle without a third slot.
        let back = state.join(&key("k1")).unwrap();
        assert_eq!(back.paddle, Paddle::Left);
        assert_eq!(state.occupancy(), 2);
    }

    #[test]
    fn test_last_leave_closes_match() {
        let mut state = MatchState::new(MatchConfig::default());
        state.join(&key("k1")).unwrap();
        let outcome = state.leave(&key("k1")).unwrap();
        assert_eq!(outcome.remaining, 0);
        assert!(state.is_closed());
        assert_eq!(state.join(&key("k2")), Err(MatchError::Closed));
    }

    #[test]
    fn test_input_ignored_while_waiting() {
        let mut state = two_player_match();
        assert_eq!(state.apply_input(&key("k1"), PaddleDirection::Up), Ok(false));
        assert_eq!(state.paddles.left.direction, PaddleDirection::Stop);
    }

    #[test]
    fn test_input_accepted_while_playing() {
        let mut state = two_player_match();
        state.phase = MatchPhase::Playing;
        assert_eq!(state.apply_input(&key("k2"), PaddleDirection::Down), Ok(true));
        assert_eq!(state.paddles.right.direction, PaddleDirection::Down);
    }

    #[test]
    fn test_reserved_match_rejects_outsiders() {
        let mut state = MatchState::reserved(
            MatchConfig::default(),
            [key("alice"), key("bob")],
        );
        assert_eq!(state.join(&key("mallory")), Err(MatchError::NotAParticipant));
        assert_eq!(state.join(&key("bob")).unwrap().paddle, Paddle::Left);
    }

    #[test]
    fn test_serve_alternates_direction() {
        let mut state = MatchState::new(MatchConfig::default());
        state.ball.velocity = FixedVec2::from_ints(-7, 3);
        state.reset_ball();
        assert!(state.ball.velocity.x > 0);
        state.reset_ball();
        assert!(state.ball.velocity.x < 0);
    }

    #[test]
    fn test_snapshot_renders_field_units() {
        let state = MatchState::new(MatchConfig::default());
        let snapshot = state.snapshot();
        assert_eq!(snapshot.paddles, PerPaddle::splat(240.0));
        assert_eq!((snapshot.ball.x, snapshot.ball.y), (462.0, 278.0));
        assert_eq!((snapshot.ball.dx, snapshot.ball.dy), (4.0, 4.0));
        assert_eq!(snapshot.score, PerPaddle::splat(0));
    }

    #[test]
    fn test_terminate_is_terminal() {
        let mut state = two_player_match();
        state.terminate();
        assert_eq!(state.phase, MatchPhase::Finished { winner: None });
        assert_eq!(state.join(&key("k3")), Err(MatchError::MatchOver));
        assert_eq!(state.set_ready(&key("k1")), Ok(ReadyOutcome::Ignored));
    }

    proptest! {
        #[test]
        fn prop_never_more_than_two_players(ops in proptest::collection::vec((0u8..5, any::<bool>()), 0..64)) {
            let mut state = MatchState::new(MatchConfig::default());
            for (who, join) in ops {
                let k = SessionKey::new(format!("k{}", who));
                if join {
                    let _ = state.join(&k);
                } else {
                    let _ = state.leave(&k);
                }
                prop_assert!(state.occupancy() <= 2);
                if let (Some(l), Some(r)) = (&state.players.left, &state.players.right) {
                    prop_assert_ne!(l, r);
                }
            }
        }
    }
}
