//! Network Layer
//!
//! Async runtime around the match logic: sessions, matchmaking, fan-out and
//! the WebSocket adapter. This layer is **non-deterministic** - all game
//! logic runs through `game/`.

pub mod auth;
pub mod directory;
pub mod fanout;
pub mod protocol;
pub mod results;
pub mod server;
pub mod session;

pub use auth::{
    validate_token, AuthConfig, AuthError, IdentityProvider, JwtIdentityProvider,
    QueryKeyProvider, TokenClaims,
};
pub use directory::{DirectoryError, JoinedMatch, LobbyInfo, RoomDirectory};
pub use fanout::{Notifier, Topic, TopicHub};
pub use protocol::{ClientMessage, ErrorCode, ServerError, ServerMessage};
pub use results::{
    run_outcome_pump, MatchRecord, MemoryResultSink, RecordOutcome, ResultSink, SinkError,
    TracingResultSink,
};
pub use server::{Endpoint, GameServer, GameServerError};
pub use session::{ConnectionHandle, ConnectionId, MatchOutcome, MatchSession, SessionConfig};
