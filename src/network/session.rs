//! Match Session
//!
//! Runtime owner of one match. All access to the match state goes through a
//! single async mutex that is held for exactly one handler call or one tick,
//! never across a sleep. While a countdown or rally is running the session
//! drives two fixed-rate loops: physics and state broadcast.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::game::events::{CountdownKind, GameEvent, GameEventData};
use crate::game::input::PaddleDirection;
use crate::game::state::{
    JoinOutcome, LeaveOutcome, MatchError, MatchId, MatchPhase, MatchSnapshot, MatchState,
    Paddle, PerPaddle, ReadyOutcome, SessionKey,
};
use crate::game::tick::{tick, MatchConfig};
use crate::network::directory::LobbyInfo;
use crate::network::fanout::{Notifier, Topic};
use crate::network::protocol::ServerMessage;

/// Server-assigned id of one WebSocket connection.
pub type ConnectionId = u64;

/// Direct line to one connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Connection id.
    pub id: ConnectionId,
    /// Outbound queue drained by the connection's writer task.
    pub sender: mpsc::Sender<ServerMessage>,
}

impl ConnectionHandle {
    /// Create a handle.
    pub fn new(id: ConnectionId, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self { id, sender }
    }

    /// Queue a message without waiting. A full queue drops the message.
    pub fn deliver(&self, message: ServerMessage) -> bool {
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Outbound queue full for connection {}, dropping message", self.id);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Configuration for match sessions.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Rules, geometry and physics rate.
    pub match_config: MatchConfig,
    /// State broadcasts per second.
    pub broadcast_hz: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            match_config: MatchConfig::default(),
            broadcast_hz: 30,
        }
    }
}

impl SessionConfig {
    /// Time between physics ticks.
    pub fn physics_period(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.match_config.tick_rate.max(1) as u64)
    }

    /// Time between state broadcasts.
    pub fn broadcast_period(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.broadcast_hz.max(1) as u64)
    }
}

/// Final result of a match, emitted exactly once when it finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    /// Finished match.
    pub match_id: MatchId,
    /// Winning session. `None` when the match was terminated by a fault.
    pub winner: Option<SessionKey>,
    /// Losing session.
    pub loser: Option<SessionKey>,
    /// Paddle the winner played.
    pub winner_side: Option<Paddle>,
    /// Final score.
    pub score: PerPaddle<u32>,
}

impl MatchOutcome {
    /// `(winner, loser)` points of a decided match.
    pub fn points(&self) -> Option<(u32, u32)> {
        self.winner_side
            .map(|side| (*self.score.get(side), *self.score.get(side.opponent())))
    }
}

/// Result of a successful session join.
#[derive(Debug)]
pub struct SessionJoin {
    /// Paddle and reconnect flag.
    pub outcome: JoinOutcome,
    /// Match topic subscription, opened while the join was applied.
    pub updates: broadcast::Receiver<ServerMessage>,
}

/// Abort handles of the running loops.
struct MatchLoops {
    physics: AbortHandle,
    broadcast: AbortHandle,
}

struct SessionInner {
    state: MatchState,
    connections: BTreeMap<SessionKey, ConnectionHandle>,
    loops: Option<MatchLoops>,
    /// Bumped whenever loops are started or stopped; stale loops exit.
    generation: u64,
    outcome_sent: bool,
}

/// A running match.
pub struct MatchSession {
    id: MatchId,
    topic: Topic,
    config: SessionConfig,
    reserved: bool,
    inner: Mutex<SessionInner>,
    // Lock-free mirrors for the directory, updated under `inner`.
    occupancy: AtomicUsize,
    finished: AtomicBool,
    closed: AtomicBool,
    notifier: Arc<dyn Notifier>,
    outcomes: mpsc::UnboundedSender<MatchOutcome>,
}

impl MatchSession {
    /// Create an open match anyone may join.
    pub fn new(
        id: MatchId,
        config: SessionConfig,
        notifier: Arc<dyn Notifier>,
        outcomes: mpsc::UnboundedSender<MatchOutcome>,
    ) -> Arc<Self> {
        let state = MatchState::new(config.match_config.clone());
        Self::with_state(id, config, state, notifier, outcomes)
    }

    /// Create a match only `participants` may join.
    pub fn reserved(
        id: MatchId,
        config: SessionConfig,
        participants: [SessionKey; 2],
        notifier: Arc<dyn Notifier>,
        outcomes: mpsc::UnboundedSender<MatchOutcome>,
    ) -> Arc<Self> {
        let state = MatchState::reserved(config.match_config.clone(), participants);
        Self::with_state(id, config, state, notifier, outcomes)
    }

    fn with_state(
        id: MatchId,
        config: SessionConfig,
        state: MatchState,
        notifier: Arc<dyn Notifier>,
        outcomes: mpsc::UnboundedSender<MatchOutcome>,
    ) -> Arc<Self> {
        info!(match_id = %id, reserved = state.is_reserved(), "Match created");
        Arc::new(Self {
            topic: Topic::Match(id.clone()),
            id,
            config,
            reserved: state.is_reserved(),
            inner: Mutex::new(SessionInner {
                state,
                connections: BTreeMap::new(),
                loops: None,
                generation: 0,
                outcome_sent: false,
            }),
            occupancy: AtomicUsize::new(0),
            finished: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            notifier,
            outcomes,
        })
    }

    /// Match id.
    pub fn id(&self) -> &MatchId {
        &self.id
    }

    /// Topic carrying this match's broadcasts.
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Whether only a fixed pair may join.
    pub fn is_reserved(&self) -> bool {
        self.reserved
    }

    /// Occupied paddles as of the last handler call.
    pub fn occupancy(&self) -> usize {
        self.occupancy.load(Ordering::Acquire)
    }

    /// Whether the match reached `Finished`.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Whether the match emptied out and must not be reused.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether an anonymous join may land here.
    pub fn is_open(&self) -> bool {
        !self.reserved && !self.is_closed() && !self.is_finished() && self.occupancy() < 2
    }

    // =========================================================================
    // HANDLERS
    // =========================================================================

    /// Bind `key` to a paddle and route its messages to `connection`.
    ///
    /// Re-joining with a bound key keeps the paddle and replaces the previous
    /// connection, which is told it was superseded.
    pub async fn join(
        &self,
        key: &SessionKey,
        connection: ConnectionHandle,
    ) -> Result<SessionJoin, MatchError> {
        let mut inner = self.inner.lock().await;
        let outcome = inner.state.join(key)?;

        if let Some(previous) = inner.connections.insert(key.clone(), connection.clone()) {
            if previous.id != connection.id {
                info!(match_id = %self.id, session = %key, "Connection superseded");
                previous.deliver(ServerMessage::Superseded);
            }
        }

        let updates = self.notifier.subscribe(&self.topic);

        connection.deliver(ServerMessage::AssignPaddle {
            paddle: outcome.paddle,
            match_id: self.id.clone(),
            players: inner.state.players.clone(),
        });
        connection.deliver(ServerMessage::PlayerReadyState { ready: inner.state.ready });
        connection.deliver(ServerMessage::Update(inner.state.snapshot()));
        if let MatchPhase::Finished { winner } = inner.state.phase {
            connection.deliver(ServerMessage::GameOver { winner, score: inner.state.score });
        }

        self.flush(&mut inner);

        info!(
            match_id = %self.id,
            session = %key,
            paddle = %outcome.paddle,
            rejoined = outcome.rejoined,
            occupancy = inner.state.occupancy(),
            "Player joined"
        );

        Ok(SessionJoin { outcome, updates })
    }

    /// Release `key`'s paddle.
    pub async fn leave(&self, key: &SessionKey) -> Option<LeaveOutcome> {
        let mut inner = self.inner.lock().await;
        self.leave_locked(&mut inner, key)
    }

    /// Release `key`'s paddle if `connection` is still the one bound to it.
    ///
    /// A superseded connection dropping does not remove the player.
    pub async fn disconnect(&self, key: &SessionKey, connection: ConnectionId) -> Option<LeaveOutcome> {
        let mut inner = self.inner.lock().await;
        match inner.connections.get(key) {
            Some(bound) if bound.id == connection => {}
            _ => {
                debug!(match_id = %self.id, session = %key, connection, "Ignoring disconnect of stale connection");
                return None;
            }
        }
        self.leave_locked(&mut inner, key)
    }

    /// Mark `key` ready; starts the countdown and loops once both are ready.
    pub async fn set_ready(self: &Arc<Self>, key: &SessionKey) -> Result<ReadyOutcome, MatchError> {
        let mut inner = self.inner.lock().await;
        let outcome = inner.state.set_ready(key)?;

        if outcome == ReadyOutcome::CountdownStarted {
            info!(match_id = %self.id, "Both players ready, countdown started");
            self.start_loops(&mut inner);
        }

        self.flush(&mut inner);
        Ok(outcome)
    }

    /// Drive `key`'s paddle. `Ok(false)` when the input was ignored.
    pub async fn apply_input(
        &self,
        key: &SessionKey,
        direction: PaddleDirection,
    ) -> Result<bool, MatchError> {
        let mut inner = self.inner.lock().await;
        inner.state.apply_input(key, direction)
    }

    /// Current rendered state.
    pub async fn snapshot(&self) -> MatchSnapshot {
        self.inner.lock().await.state.snapshot()
    }

    /// Current phase.
    pub async fn phase(&self) -> MatchPhase {
        self.inner.lock().await.state.phase
    }

    /// Lobby listing entry.
    pub async fn summary(&self) -> LobbyInfo {
        let inner = self.inner.lock().await;
        LobbyInfo {
            match_id: self.id.clone(),
            players_count: inner.state.occupancy(),
            phase: inner.state.phase.name().to_string(),
            players: inner.state.players.clone(),
        }
    }

    /// Stop the loops for good. Used when the directory reclaims the match.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        Self::stop_loops(&mut inner);
        debug!(match_id = %self.id, "Match shut down");
    }

    fn leave_locked(&self, inner: &mut SessionInner, key: &SessionKey) -> Option<LeaveOutcome> {
        let outcome = inner.state.leave(key)?;
        inner.connections.remove(key);

        if outcome.halted {
            Self::stop_loops(inner);
            info!(match_id = %self.id, session = %key, "Player left mid-game, match paused");
        } else {
            info!(match_id = %self.id, session = %key, remaining = outcome.remaining, "Player left");
        }
        if outcome.remaining == 0 {
            info!(match_id = %self.id, "Match empty, closing");
        }

        self.flush(inner);
        Some(outcome)
    }

    // =========================================================================
    // LOOPS
    // =========================================================================

    fn start_loops(self: &Arc<Self>, inner: &mut SessionInner) {
        Self::stop_loops(inner);
        let generation = inner.generation;

        let physics = tokio::spawn(Self::run_physics_loop(Arc::clone(self), generation));
        let broadcast = tokio::spawn(Self::run_broadcast_loop(Arc::clone(self), generation));

        inner.loops = Some(MatchLoops {
            physics: physics.abort_handle(),
            broadcast: broadcast.abort_handle(),
        });

        tokio::spawn(Self::supervise(Arc::clone(self), generation, "physics", physics));
        tokio::spawn(Self::supervise(Arc::clone(self), generation, "broadcast", broadcast));
    }

    fn stop_loops(inner: &mut SessionInner) {
        inner.generation = inner.generation.wrapping_add(1);
        if let Some(loops) = inner.loops.take() {
            loops.physics.abort();
            loops.broadcast.abort();
        }
    }

    async fn run_physics_loop(session: Arc<Self>, generation: u64) {
        let mut ticker = interval(session.config.physics_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let mut inner = session.inner.lock().await;
            if inner.generation != generation {
                break;
            }

            match tick(&mut inner.state) {
                Ok(result) => {
                    #[cfg(feature = "debug-tracing")]
                    tracing::trace!(match_id = %session.id, tick = inner.state.tick, "Physics tick");

                    session.publish_events(&inner, result.events);

                    if result.match_ended {
                        info!(
                            match_id = %session.id,
                            winner = ?result.winner,
                            score = ?inner.state.score,
                            "Match finished"
                        );
                        session.finish(&mut inner);
                        break;
                    }

                    if !inner.state.phase.is_active() {
                        Self::stop_loops(&mut inner);
                        session.sync_flags(&inner);
                        break;
                    }
                }
                Err(fault) => {
                    error!(
                        match_id = %session.id,
                        %fault,
                        phase = ?inner.state.phase,
                        ball = ?inner.state.ball,
                        score = ?inner.state.score,
                        "Internal fault in physics tick, terminating match"
                    );
                    session.fail(&mut inner);
                    break;
                }
            }
        }
    }

    async fn run_broadcast_loop(session: Arc<Self>, generation: u64) {
        let mut ticker = interval(session.config.broadcast_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let inner = session.inner.lock().await;
            if inner.generation != generation {
                break;
            }
            if inner.state.phase.is_active() {
                session.notifier.publish(&session.topic, ServerMessage::Update(inner.state.snapshot()));
            }
        }
    }

    /// Terminate the match if one of its loops panics.
    async fn supervise(session: Arc<Self>, generation: u64, name: &'static str, handle: JoinHandle<()>) {
        let Err(err) = handle.await else { return };
        if !err.is_panic() {
            return;
        }

        let mut inner = session.inner.lock().await;
        error!(
            match_id = %session.id,
            loop_name = name,
            phase = ?inner.state.phase,
            score = ?inner.state.score,
            "Match loop panicked, terminating match"
        );
        if inner.generation == generation {
            session.fail(&mut inner);
        }
    }

    // =========================================================================
    // OUTPUT
    // =========================================================================

    fn fail(&self, inner: &mut SessionInner) {
        inner.state.terminate();
        self.flush(inner);
        self.finish(inner);
    }

    fn finish(&self, inner: &mut SessionInner) {
        Self::stop_loops(inner);
        self.sync_flags(inner);

        if inner.outcome_sent {
            return;
        }
        inner.outcome_sent = true;

        let winner_paddle = match inner.state.phase {
            MatchPhase::Finished { winner } => winner,
            _ => None,
        };
        let outcome = MatchOutcome {
            match_id: self.id.clone(),
            winner: winner_paddle.and_then(|p| inner.state.player_on(p).cloned()),
            loser: winner_paddle.and_then(|p| inner.state.player_on(p.opponent()).cloned()),
            winner_side: winner_paddle,
            score: inner.state.score,
        };

        if self.outcomes.send(outcome).is_err() {
            warn!(match_id = %self.id, "Outcome receiver gone, result not recorded");
        }
    }

    /// Publish whatever the state machine recorded and refresh the mirrors.
    fn flush(&self, inner: &mut SessionInner) {
        let events = inner.state.take_events();
        self.publish_events(inner, events);
        self.sync_flags(inner);
    }

    fn sync_flags(&self, inner: &SessionInner) {
        self.occupancy.store(inner.state.occupancy(), Ordering::Release);
        self.finished.store(inner.state.is_finished(), Ordering::Release);
        self.closed.store(inner.state.is_closed(), Ordering::Release);
    }

    fn publish_events(&self, inner: &SessionInner, events: Vec<GameEvent>) {
        for event in events {
            if event.forces_snapshot() {
                self.publish(ServerMessage::Update(inner.state.snapshot()));
            }
            self.publish(self.event_message(inner, &event));
        }
    }

    fn event_message(&self, inner: &SessionInner, event: &GameEvent) -> ServerMessage {
        let state = &inner.state;
        match &event.data {
            GameEventData::PlayerJoined { .. } | GameEventData::PlayerLeft { .. } => {
                ServerMessage::PlayersConnected {
                    count: state.occupancy(),
                    players: state.players.clone(),
                }
            }
            GameEventData::ReadyChanged { ready } => ServerMessage::PlayerReadyState { ready: *ready },
            GameEventData::CountdownStarted { kind } => {
                let value = match kind {
                    CountdownKind::Start => state.config.start_countdown_secs,
                    CountdownKind::Serve => state.config.serve_countdown_secs,
                };
                ServerMessage::CountdownStart { kind: *kind, value }
            }
            GameEventData::CountdownTick { seconds } => ServerMessage::CountdownTick { value: *seconds },
            GameEventData::CountdownEnded => ServerMessage::CountdownEnd,
            GameEventData::Halted => ServerMessage::Paused,
            GameEventData::PointScored { scorer, score } => {
                info!(match_id = %self.id, scorer = %scorer, ?score, "Point scored");
                ServerMessage::PointScored { scorer: *scorer, score: *score }
            }
            GameEventData::MatchOver { winner } => {
                ServerMessage::GameOver { winner: *winner, score: state.score }
            }
        }
    }

    fn publish(&self, message: ServerMessage) {
        self.notifier.publish(&self.topic, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vec2::FixedVec2;
    use crate::game::state::Paddle;
    use crate::network::fanout::TopicHub;
    use tokio::sync::broadcast::error::TryRecvError;

    struct Harness {
        session: Arc<MatchSession>,
        outcomes: mpsc::UnboundedReceiver<MatchOutcome>,
    }

    fn harness() -> Harness {
        let hub: Arc<dyn Notifier> = Arc::new(TopicHub::new());
        let (tx, outcomes) = mpsc::unbounded_channel();
        let session = MatchSession::new(MatchId::from("m1"), SessionConfig::default(), hub, tx);
        Harness { session, outcomes }
    }

    fn connection(id: ConnectionId) -> (ConnectionHandle, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(1024);
        (ConnectionHandle::new(id, tx), rx)
    }

    fn drain_direct(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn drain_topic(rx: &mut broadcast::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(msg) => out.push(msg),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        out
    }

    async fn start_two_player_game(h: &Harness) -> (broadcast::Receiver<ServerMessage>, broadcast::Receiver<ServerMessage>) {
        let (c1, _rx1) = connection(1);
        let (c2, _rx2) = connection(2);
        let j1 = h.session.join(&SessionKey::from("k1"), c1).await.unwrap();
        let j2 = h.session.join(&SessionKey::from("k2"), c2).await.unwrap();
        (j1.updates, j2.updates)
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_assigns_paddles_in_order() {
        let h = harness();
        let (c1, mut rx1) = connection(1);
        let (c2, _rx2) = connection(2);

        let j1 = h.session.join(&SessionKey::from("k1"), c1).await.unwrap();
        assert_eq!(j1.outcome.paddle, Paddle::Left);
        assert_eq!(h.session.occupancy(), 1);

        let j2 = h.session.join(&SessionKey::from("k2"), c2).await.unwrap();
        assert_eq!(j2.outcome.paddle, Paddle::Right);
        assert_eq!(h.session.occupancy(), 2);
        assert_eq!(h.session.phase().await, MatchPhase::Waiting);

        let direct = drain_direct(&mut rx1);
        assert!(matches!(
            direct.first(),
            Some(ServerMessage::AssignPaddle { paddle: Paddle::Left, .. })
        ));

        // k1 hears about k2 on the match topic.
        let mut updates = j1.updates;
        let published = drain_topic(&mut updates);
        assert!(published
            .iter()
            .any(|m| matches!(m, ServerMessage::PlayersConnected { count: 2, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_then_playing_with_broadcasts() {
        let h = harness();
        let (mut updates, _) = start_two_player_game(&h).await;

        h.session.set_ready(&SessionKey::from("k1")).await.unwrap();
        assert_eq!(h.session.phase().await, MatchPhase::Waiting);
        h.session.set_ready(&SessionKey::from("k2")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(3_200)).await;
        assert_eq!(h.session.phase().await, MatchPhase::Playing);

        let published = drain_topic(&mut updates);
        assert!(published.iter().any(|m| matches!(m, ServerMessage::CountdownEnd)));
        assert!(published.iter().any(|m| matches!(m, ServerMessage::Update(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_mid_game_pauses_and_reconnect_restores() {
        let h = harness();
        let _subs = start_two_player_game(&h).await;
        let k1 = SessionKey::from("k1");

        h.session.set_ready(&k1).await.unwrap();
        h.session.set_ready(&SessionKey::from("k2")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(3_200)).await;
        assert_eq!(h.session.phase().await, MatchPhase::Playing);

        let left = h.session.disconnect(&k1, 1).await.unwrap();
        assert!(left.halted);
        assert_eq!(h.session.occupancy(), 1);
        assert_eq!(h.session.phase().await, MatchPhase::Waiting);

        // Loops are stopped: nothing moves while waiting.
        let before = h.session.snapshot().await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.session.snapshot().await, before);

        let (c3, _rx3) = connection(3);
        let back = h.session.join(&k1, c3).await.unwrap();
        assert_eq!(back.outcome.paddle, Paddle::Left);
        assert_eq!(h.session.occupancy(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_connection_does_not_leave() {
        let h = harness();
        let key = SessionKey::from("k1");
        let (old, mut old_rx) = connection(1);
        let (new, _new_rx) = connection(2);

        h.session.join(&key, old).await.unwrap();
        let again = h.session.join(&key, new).await.unwrap();
        assert!(again.outcome.rejoined);

        assert!(drain_direct(&mut old_rx)
            .iter()
            .any(|m| matches!(m, ServerMessage::Superseded)));

        // The old socket closing must not release the paddle.
        assert!(h.session.disconnect(&key, 1).await.is_none());
        assert_eq!(h.session.occupancy(), 1);

        assert!(h.session.disconnect(&key, 2).await.is_some());
        assert_eq!(h.session.occupancy(), 0);
        assert!(h.session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_match_point_finishes_and_emits_outcome_once() {
        let mut h = harness();
        let (mut updates, _) = start_two_player_game(&h).await;
        h.session.set_ready(&SessionKey::from("k1")).await.unwrap();
        h.session.set_ready(&SessionKey::from("k2")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(3_200)).await;

        {
            let mut inner = h.session.inner.lock().await;
            inner.state.score.left = 2;
            inner.state.paddles.right.y = 0;
            inner.state.ball.position = FixedVec2::from_ints(922, 500);
            inner.state.ball.velocity = FixedVec2::from_ints(4, 0);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(h.session.is_finished());
        let outcome = h.outcomes.try_recv().unwrap();
        assert_eq!(outcome.winner, Some(SessionKey::from("k1")));
        assert_eq!(outcome.loser, Some(SessionKey::from("k2")));
        assert_eq!(outcome.score.left, 3);
        assert_eq!(outcome.winner_side, Some(Paddle::Left));
        assert_eq!(outcome.points(), Some((3, outcome.score.right)));
        assert!(h.outcomes.try_recv().is_err());

        let published = drain_topic(&mut updates);
        assert!(published.iter().any(|m| matches!(
            m,
            ServerMessage::GameOver { winner: Some(Paddle::Left), .. }
        )));

        // Finished: input and ready are ignored.
        assert_eq!(
            h.session.apply_input(&SessionKey::from("k1"), PaddleDirection::Up).await,
            Ok(false)
        );
        assert_eq!(
            h.session.set_ready(&SessionKey::from("k1")).await,
            Ok(ReadyOutcome::Ignored)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_fault_terminates_without_winner() {
        let mut h = harness();
        let (mut updates, _) = start_two_player_game(&h).await;
        h.session.set_ready(&SessionKey::from("k1")).await.unwrap();
        h.session.set_ready(&SessionKey::from("k2")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(3_200)).await;

        {
            let mut inner = h.session.inner.lock().await;
            inner.state.ball.position = FixedVec2::from_ints(400, 5_000);
            inner.state.ball.velocity = FixedVec2::ZERO;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(h.session.phase().await, MatchPhase::Finished { winner: None });
        let outcome = h.outcomes.try_recv().unwrap();
        assert_eq!(outcome.winner, None);
        assert_eq!(outcome.points(), None);

        let published = drain_topic(&mut updates);
        assert!(published
            .iter()
            .any(|m| matches!(m, ServerMessage::GameOver { winner: None, .. })));
    }

    #[tokio::test]
    async fn test_input_outside_play_is_ignored() {
        let h = harness();
        let _subs = start_two_player_game(&h).await;
        let accepted = h
            .session
            .apply_input(&SessionKey::from("k1"), PaddleDirection::Down)
            .await
            .unwrap();
        assert!(!accepted);
        assert_eq!(
            h.session.apply_input(&SessionKey::from("stranger"), PaddleDirection::Down).await,
            Err(MatchError::NotInMatch)
        );
    }

    #[tokio::test]
    async fn test_summary_lists_players() {
        let h = harness();
        let _subs = start_two_player_game(&h).await;
        let summary = h.session.summary().await;
        assert_eq!(summary.players_count, 2);
        assert_eq!(summary.phase, "waiting");
        assert_eq!(summary.players.right, Some(SessionKey::from("k2")));
    }
}
