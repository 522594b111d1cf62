//! Match Results
//!
//! Finished matches emit a [`MatchOutcome`] exactly once. The outcome pump
//! turns each one into two result records, forwards tournament matches to
//! the scheduler, and reclaims the match after a grace period.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::game::state::{MatchId, SessionKey};
use crate::network::directory::RoomDirectory;
use crate::network::session::MatchOutcome;
use crate::tournament::scheduler::{TournamentError, TournamentScheduler};

/// Result from one player's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    /// Player won.
    Win,
    /// Player lost.
    Loss,
}

/// One row of match history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// Finished match.
    pub match_id: MatchId,
    /// Player the row is about.
    pub player: SessionKey,
    /// Their opponent.
    pub opponent: SessionKey,
    /// Win or loss.
    pub outcome: RecordOutcome,
    /// When the result was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl MatchRecord {
    /// Both rows for a decided match. Empty when there is no winner.
    pub fn pair_from(outcome: &MatchOutcome, recorded_at: DateTime<Utc>) -> Vec<MatchRecord> {
        let (Some(winner), Some(loser)) = (&outcome.winner, &outcome.loser) else {
            return Vec::new();
        };
        vec![
            MatchRecord {
                match_id: outcome.match_id.clone(),
                player: winner.clone(),
                opponent: loser.clone(),
                outcome: RecordOutcome::Win,
                recorded_at,
            },
            MatchRecord {
                match_id: outcome.match_id.clone(),
                player: loser.clone(),
                opponent: winner.clone(),
                outcome: RecordOutcome::Loss,
                recorded_at,
            },
        ]
    }
}

/// Sink errors.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Backend refused or failed the write.
    #[error("result sink unavailable: {0}")]
    Unavailable(String),
}

/// Persistent store for match results.
pub trait ResultSink: Send + Sync {
    /// Persist one record.
    fn record(&self, record: &MatchRecord) -> Result<(), SinkError>;
}

/// Sink that writes results to the log.
#[derive(Debug, Default)]
pub struct TracingResultSink;

impl ResultSink for TracingResultSink {
    fn record(&self, record: &MatchRecord) -> Result<(), SinkError> {
        info!(
            match_id = %record.match_id,
            player = %record.player,
            opponent = %record.opponent,
            outcome = ?record.outcome,
            recorded_at = %record.recorded_at.to_rfc3339(),
            "Match result"
        );
        Ok(())
    }
}

/// Sink that keeps results in memory.
#[derive(Debug, Default)]
pub struct MemoryResultSink {
    records: Mutex<Vec<MatchRecord>>,
}

impl MemoryResultSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far.
    pub fn records(&self) -> Vec<MatchRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ResultSink for MemoryResultSink {
    fn record(&self, record: &MatchRecord) -> Result<(), SinkError> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).push(record.clone());
        Ok(())
    }
}

/// Consume match outcomes until every sender is gone.
pub async fn run_outcome_pump(
    mut outcomes: mpsc::UnboundedReceiver<MatchOutcome>,
    sink: Arc<dyn ResultSink>,
    tournament: Arc<TournamentScheduler>,
    directory: Arc<RoomDirectory>,
    grace: Duration,
) {
    while let Some(outcome) = outcomes.recv().await {
        handle_outcome(&outcome, sink.as_ref(), &tournament).await;

        let directory = Arc::clone(&directory);
        let match_id = outcome.match_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            directory.reclaim(&match_id).await;
        });
    }
    debug!("Outcome pump stopped");
}

async fn handle_outcome(outcome: &MatchOutcome, sink: &dyn ResultSink, tournament: &TournamentScheduler) {
    for record in MatchRecord::pair_from(outcome, Utc::now()) {
        // A failed write never undoes the match result.
        if let Err(e) = sink.record(&record) {
            warn!(match_id = %record.match_id, player = %record.player, "Failed to record result: {}", e);
        }
    }

    let Some(winner) = &outcome.winner else {
        info!(match_id = %outcome.match_id, "Match ended without a winner, nothing to report");
        return;
    };

    match tournament.report_result(&outcome.match_id, winner, outcome.points()).await {
        Ok(true) => info!(match_id = %outcome.match_id, winner = %winner, "Tournament result reported"),
        Ok(false) => debug!(match_id = %outcome.match_id, "Tournament result already recorded"),
        Err(TournamentError::NotFound) | Err(TournamentError::NoActiveTournament) => {
            debug!(match_id = %outcome.match_id, "Not a tournament match");
        }
        Err(e) => warn!(match_id = %outcome.match_id, "Tournament rejected result: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{Paddle, PerPaddle};
    use crate::network::fanout::{Notifier, TopicHub};
    use crate::network::session::SessionConfig;
    use crate::tournament::scheduler::TournamentConfig;

    fn decided(id: &str, winner: &str, loser: &str) -> MatchOutcome {
        MatchOutcome {
            match_id: MatchId::from(id),
            winner: Some(SessionKey::from(winner)),
            loser: Some(SessionKey::from(loser)),
            winner_side: Some(Paddle::Left),
            score: PerPaddle { left: 3, right: 1 },
        }
    }

    #[test]
    fn test_records_both_sides() {
        let rows = MatchRecord::pair_from(&decided("m", "alice", "bob"), Utc::now());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].player, SessionKey::from("alice"));
        assert_eq!(rows[0].outcome, RecordOutcome::Win);
        assert_eq!(rows[1].player, SessionKey::from("bob"));
        assert_eq!(rows[1].opponent, SessionKey::from("alice"));
        assert_eq!(rows[1].outcome, RecordOutcome::Loss);
    }

    #[test]
    fn test_no_records_without_winner() {
        let outcome = MatchOutcome {
            match_id: MatchId::from("m"),
            winner: None,
            loser: None,
            winner_side: None,
            score: PerPaddle::default(),
        };
        assert!(MatchRecord::pair_from(&outcome, Utc::now()).is_empty());
    }

    #[test]
    fn test_points_follow_winner_side() {
        let outcome = MatchOutcome {
            winner_side: Some(Paddle::Right),
            score: PerPaddle { left: 1, right: 3 },
            ..decided("m", "bob", "alice")
        };
        assert_eq!(outcome.points(), Some((3, 1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pump_reports_score_to_tournament() {
        let hub: Arc<dyn Notifier> = Arc::new(TopicHub::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let directory = Arc::new(RoomDirectory::new(SessionConfig::default(), hub.clone(), tx.clone()));
        let tournament = TournamentScheduler::new(TournamentConfig::default(), hub, directory.clone());

        tournament.create(&SessionKey::from("org")).await.unwrap();
        tournament.sign_up(&SessionKey::from("alice"), "Alice").await.unwrap();
        tournament.sign_up(&SessionKey::from("bob"), "Bob").await.unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;
        let match_id = tournament.claim_match(0).await.unwrap();

        let pump = tokio::spawn(run_outcome_pump(
            rx,
            Arc::new(MemoryResultSink::new()),
            tournament.clone(),
            directory,
            Duration::from_secs(5),
        ));

        // bob won 3-1 playing the left paddle.
        tx.send(decided(match_id.as_str(), "bob", "alice")).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let view = tournament.snapshot().await.unwrap();
        assert_eq!(view.matches[0].winner, Some(SessionKey::from("bob")));
        assert_eq!(view.matches[0].score, [1, 3]);

        pump.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pump_records_and_reclaims() {
        let hub: Arc<dyn Notifier> = Arc::new(TopicHub::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let directory = Arc::new(RoomDirectory::new(SessionConfig::default(), hub.clone(), tx.clone()));
        let tournament = TournamentScheduler::new(TournamentConfig::default(), hub, directory.clone());
        let sink = Arc::new(MemoryResultSink::new());

        directory
            .reserve(MatchId::from("m1"), [SessionKey::from("alice"), SessionKey::from("bob")])
            .await
            .unwrap();

        let pump = tokio::spawn(run_outcome_pump(
            rx,
            sink.clone(),
            tournament,
            directory.clone(),
            Duration::from_secs(5),
        ));

        tx.send(decided("m1", "alice", "bob")).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sink.records().len(), 2);
        assert!(directory.get(&MatchId::from("m1")).await.is_some());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(directory.get(&MatchId::from("m1")).await.is_none());

        drop(tx);
        drop(directory);
        pump.abort();
    }
}
