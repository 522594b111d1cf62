//! Round-Robin Bracket
//!
//! Pure bracket arithmetic: every unordered pair of the roster plays once,
//! and the final standing is whoever won the most pairings.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

use crate::game::state::{MatchId, SessionKey};

/// One scheduled game between two roster members.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pairing {
    /// Index into the bracket.
    pub id: usize,
    /// The two participants, in roster order.
    pub players: [SessionKey; 2],
    /// Recorded winner. Never overwritten once set.
    pub winner: Option<SessionKey>,
    /// Points scored, in `players` order.
    pub score: [u32; 2],
    /// Match assigned to this pairing.
    #[serde(rename = "game_id")]
    pub match_id: Option<MatchId>,
}

impl Pairing {
    /// Whether `identity` plays in this pairing.
    pub fn involves(&self, identity: &SessionKey) -> bool {
        self.players.contains(identity)
    }

    /// The other participant.
    pub fn opponent_of(&self, identity: &SessionKey) -> Option<&SessionKey> {
        match &self.players {
            [a, b] if a == identity => Some(b),
            [a, b] if b == identity => Some(a),
            _ => None,
        }
    }
}

/// Kind of final standing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    /// A single identity has the most wins.
    Winner,
    /// Several identities share the most wins.
    Draw,
}

/// Final standing of a completed tournament.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalResult {
    /// Winner or draw.
    #[serde(rename = "type")]
    pub kind: ResultKind,
    /// Top identities, in roster order.
    pub usernames: Vec<SessionKey>,
}

/// All unordered pairs of `roster`, in roster order: `(0,1), (0,2), .. (1,2), ..`.
pub fn round_robin(roster: &[SessionKey]) -> Vec<Pairing> {
    let mut pairings = Vec::with_capacity(roster.len() * roster.len().saturating_sub(1) / 2);

    for (i, first) in roster.iter().enumerate() {
        for second in &roster[i + 1..] {
            pairings.push(Pairing {
                id: pairings.len(),
                players: [first.clone(), second.clone()],
                winner: None,
                score: [0, 0],
                match_id: None,
            });
        }
    }

    pairings
}

/// Standing once every pairing has a winner, `None` before that.
///
/// Ties are reported in the order identities first appear in the bracket.
pub fn final_result(pairings: &[Pairing]) -> Option<FinalResult> {
    if pairings.is_empty() || pairings.iter().any(|p| p.winner.is_none()) {
        return None;
    }

    let mut order: Vec<&SessionKey> = Vec::new();
    let mut wins: BTreeMap<&SessionKey, u32> = BTreeMap::new();

    for pairing in pairings {
        for player in &pairing.players {
            if !wins.contains_key(player) {
                wins.insert(player, 0);
                order.push(player);
            }
        }
        if let Some(winner) = &pairing.winner {
            *wins.entry(winner).or_insert(0) += 1;
        }
    }

    let best = wins.values().copied().max()?;
    let usernames: Vec<SessionKey> = order
        .into_iter()
        .filter(|id| wins.get(id).copied() == Some(best))
        .cloned()
        .collect();

    let kind = if usernames.len() == 1 { ResultKind::Winner } else { ResultKind::Draw };
    Some(FinalResult { kind, usernames })
}
