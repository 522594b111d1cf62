//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every message is a JSON object tagged by its `type` field.

use serde::{Serialize, Deserialize};

use crate::game::events::CountdownKind;
use crate::game::state::{MatchError, MatchId, MatchSnapshot, Paddle, PerPaddle, SessionKey};
use crate::network::directory::LobbyInfo;
use crate::tournament::scheduler::TournamentView;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start driving the paddle. `key` is `up`/`down` or a raw key name.
    PaddleMove {
        /// Key name.
        key: String,
    },

    /// Stop the paddle.
    PaddleStop,

    /// Mark this paddle ready.
    PlayerReady,

    /// Leave the match and close the connection.
    Leave,

    /// Latency check.
    Ping {
        /// Client timestamp, echoed back.
        #[serde(default)]
        timestamp: u64,
    },

    /// Request the lobby listing.
    ListLobbies,

    /// Open a tournament with the sender as organizer.
    CreateTournament,

    /// Join the tournament roster.
    SignUp {
        /// Name shown in the bracket.
        display_name: String,
    },

    /// Leave the tournament roster.
    Withdraw,

    /// Get (or create) the match for a bracket pairing.
    AssignMatch {
        /// Pairing index.
        pairing: usize,
    },

    /// Record the winner of a tournament match.
    ReportResult {
        /// Assigned match.
        match_id: MatchId,
        /// Winning identity.
        winner: SessionKey,
    },

    /// Tear the tournament down.
    CloseTournament,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Paddle bound to this connection.
    AssignPaddle {
        /// Assigned paddle.
        paddle: Paddle,
        /// Match joined.
        match_id: MatchId,
        /// Occupants.
        players: PerPaddle<Option<SessionKey>>,
    },

    /// Occupancy changed.
    PlayersConnected {
        /// Occupied paddles.
        count: usize,
        /// Occupants.
        players: PerPaddle<Option<SessionKey>>,
    },

    /// Ready flags changed.
    PlayerReadyState {
        /// Flags per paddle.
        ready: PerPaddle<bool>,
    },

    /// A countdown began.
    CountdownStart {
        /// Start or serve.
        kind: CountdownKind,
        /// Seconds to go.
        value: u32,
    },

    /// Whole seconds left.
    CountdownTick {
        /// Seconds to go.
        value: u32,
    },

    /// Ball is live.
    CountdownEnd,

    /// Full state snapshot.
    Update(MatchSnapshot),

    /// A side scored.
    PointScored {
        /// Scoring paddle.
        scorer: Paddle,
        /// Score after the point.
        score: PerPaddle<u32>,
    },

    /// Match is over. `winner` is null when it was terminated by a fault.
    GameOver {
        /// Winning paddle.
        winner: Option<Paddle>,
        /// Final score.
        score: PerPaddle<u32>,
    },

    /// Play stopped because a player left.
    Paused,

    /// This connection was replaced by a newer one for the same session.
    Superseded,

    /// Lobby listing.
    Lobbies {
        /// Open matches in creation order.
        lobbies: Vec<LobbyInfo>,
    },

    /// Full tournament state; null when no tournament is active.
    Tournament {
        /// Current state.
        state: Option<TournamentView>,
    },

    /// Match assigned to a bracket pairing.
    MatchAssigned {
        /// Pairing index.
        pairing: usize,
        /// Match to join.
        match_id: MatchId,
    },

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server time (ms since epoch).
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is closing this connection.
    Shutdown {
        /// Why.
        reason: String,
    },
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Identity could not be established.
    Unauthenticated,
    /// Message could not be parsed or is not valid on this endpoint.
    InvalidInput,
    /// Both paddles are taken.
    MatchFull,
    /// Session is bound to another match.
    AlreadyInAnotherMatch,
    /// Not bound to any match.
    NotInMatch,
    /// Match reserved for other players.
    NotAParticipant,
    /// Match already finished.
    MatchOver,
    /// Unknown match or pairing.
    NotFound,
    /// A tournament or match with that id already exists.
    AlreadyExists,
    /// Pairing already has a match.
    AlreadyAssigned,
    /// Identity already on the roster.
    AlreadySignedUp,
    /// Display name taken.
    DuplicateDisplayName,
    /// Identity not on the roster.
    NotSignedUp,
    /// Roster is frozen.
    SignUpClosed,
    /// Bracket not generated yet.
    NotStarted,
    /// No tournament running.
    NoActiveTournament,
    /// Too many connections.
    ServerOverloaded,
    /// Unexpected server-side failure.
    InternalFault,
}

impl From<&MatchError> for ErrorCode {
    fn from(err: &MatchError) -> Self {
        match err {
            MatchError::MatchFull => ErrorCode::MatchFull,
            MatchError::NotAParticipant => ErrorCode::NotAParticipant,
            MatchError::NotInMatch => ErrorCode::NotInMatch,
            MatchError::MatchOver => ErrorCode::MatchOver,
            MatchError::Closed => ErrorCode::NotFound,
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Build an error message.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError { code, message: message.into() })
    }

    /// Whether the connection must close after delivering this message.
    pub fn closes_connection(&self) -> bool {
        matches!(self, ServerMessage::Superseded | ServerMessage::Shutdown { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{BallSnapshot, PerPaddle};
    use serde_json::json;

    #[test]
    fn test_paddle_move_wire_format() {
        let msg = ClientMessage::from_json(r#"{"type":"paddle_move","key":"ArrowUp"}"#).unwrap();
        assert_eq!(msg, ClientMessage::PaddleMove { key: "ArrowUp".into() });

        let msg = ClientMessage::from_json(r#"{"type":"player_ready"}"#).unwrap();
        assert_eq!(msg, ClientMessage::PlayerReady);
    }

    #[test]
    fn test_ping_timestamp_optional() {
        let msg = ClientMessage::from_json(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping { timestamp: 0 });
    }

    #[test]
    fn test_unknown_message_rejected() {
        assert!(ClientMessage::from_json(r#"{"type":"teleport"}"#).is_err());
        assert!(ClientMessage::from_json("not json").is_err());
    }

    #[test]
    fn test_report_result_wire_format() {
        let msg = ClientMessage::from_json(
            r#"{"type":"report_result","match_id":"m-1","winner":"alice"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::ReportResult {
                match_id: MatchId::from("m-1"),
                winner: SessionKey::from("alice"),
            }
        );
    }

    #[test]
    fn test_update_wire_format() {
        let msg = ServerMessage::Update(MatchSnapshot {
            paddles: PerPaddle { left: 240.0, right: 100.0 },
            ball: BallSnapshot { x: 462.0, y: 278.0, dx: 4.0, dy: 4.0 },
            score: PerPaddle { left: 1, right: 2 },
        });

        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "update",
                "paddles": { "left": 240.0, "right": 100.0 },
                "ball": { "x": 462.0, "y": 278.0, "dx": 4.0, "dy": 4.0 },
                "score": { "left": 1, "right": 2 },
            })
        );
    }

    #[test]
    fn test_game_over_null_winner() {
        let msg = ServerMessage::GameOver { winner: None, score: PerPaddle::default() };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "game_over");
        assert!(value["winner"].is_null());
    }

    #[test]
    fn test_error_codes() {
        let msg = ServerMessage::error(ErrorCode::DuplicateDisplayName, "name taken");
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"error\""));
        assert!(json.contains("duplicate_display_name"));
    }

    #[test]
    fn test_closing_messages() {
        assert!(ServerMessage::Superseded.closes_connection());
        assert!(ServerMessage::Shutdown { reason: "bye".into() }.closes_connection());
        assert!(!ServerMessage::CountdownEnd.closes_connection());
    }
}
