//! Authoritative Simulation Tick
//!
//! One fixed-rate physics step for a match. Deterministic: integer math only,
//! no clocks, no randomness. The network layer decides when to call it.

use crate::core::fixed::{
    Fixed, FIELD_WIDTH, FIELD_HEIGHT, PADDLE_HEIGHT, PADDLE_BAND,
    PADDLE_SPEED, BALL_SERVE_SPEED, BALL_MAX_SPEED, PADDLE_HIT_ACCELERATION,
    fixed_abs, fixed_clamp, fixed_min, fixed_mul, fixed_with_sign,
};
use crate::core::vec2::FixedVec2;
use crate::game::events::{CountdownKind, GameEvent, GameEventData};
use crate::game::state::{MatchPhase, MatchState, Paddle};

/// Rules, geometry and timing of a match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchConfig {
    /// Field width (Q16.16)
    pub field_width: Fixed,
    /// Field height (Q16.16)
    pub field_height: Fixed,
    /// Paddle height (Q16.16)
    pub paddle_height: Fixed,
    /// Contact band in front of each goal line (Q16.16)
    pub paddle_band: Fixed,
    /// Paddle travel per tick
    pub paddle_speed: Fixed,
    /// Ball speed per axis at serve
    pub ball_serve_speed: Fixed,
    /// Ball speed cap per axis
    pub ball_max_speed: Fixed,
    /// Multiplier applied to both velocity components on a paddle hit
    pub paddle_hit_acceleration: Fixed,
    /// Points needed to win
    pub max_score: u32,
    /// Physics ticks per second
    pub tick_rate: u32,
    /// Seconds counted down before the first serve
    pub start_countdown_secs: u32,
    /// Seconds counted down before each re-serve
    pub serve_countdown_secs: u32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            field_width: FIELD_WIDTH,
            field_height: FIELD_HEIGHT,
            paddle_height: PADDLE_HEIGHT,
            paddle_band: PADDLE_BAND,
            paddle_speed: PADDLE_SPEED,
            ball_serve_speed: BALL_SERVE_SPEED,
            ball_max_speed: BALL_MAX_SPEED,
            paddle_hit_acceleration: PADDLE_HIT_ACCELERATION,
            max_score: 3,
            tick_rate: 60,
            start_countdown_secs: 3,
            serve_countdown_secs: 1,
        }
    }
}

impl MatchConfig {
    /// Ticks in the pre-game countdown.
    pub fn start_countdown_ticks(&self) -> u32 {
        self.start_countdown_secs.saturating_mul(self.tick_rate.max(1))
    }

    /// Ticks in the between-points countdown.
    pub fn serve_countdown_ticks(&self) -> u32 {
        self.serve_countdown_secs.saturating_mul(self.tick_rate.max(1))
    }

    /// Centre of the field, where the ball is served from.
    pub fn serve_point(&self) -> FixedVec2 {
        FixedVec2::new(self.field_width / 2, self.field_height / 2)
    }

    /// Lowest allowed paddle top edge.
    pub fn paddle_travel(&self) -> Fixed {
        self.field_height - self.paddle_height
    }
}

/// Result of a tick.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Events generated this tick
    pub events: Vec<GameEvent>,
    /// Whether the match ended this tick
    pub match_ended: bool,
    /// Winner (if match ended with winner)
    pub winner: Option<Paddle>,
}

/// Simulation reached a state it must never be in.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TickFault {
    /// Ball left the field without being scored.
    #[error("ball escaped the field at {position}")]
    BallEscaped {
        /// Offending position
        position: FixedVec2,
    },

    /// A score went past the winning total.
    #[error("score {score} exceeds max score {max_score}")]
    ScoreOverflow {
        /// Offending score
        score: u32,
        /// Configured limit
        max_score: u32,
    },
}

/// Run one simulation tick.
///
/// * `Waiting` / `Finished`: nothing moves.
/// * `Countdown`: the timer runs down, emitting whole seconds, then the ball
///   goes live.
/// * `Playing`: paddles and ball move, contacts and goals are resolved.
///
/// A returned [`TickFault`] is fatal to the match; the caller must terminate
/// it rather than keep simulating.
pub fn tick(state: &mut MatchState) -> Result<TickResult, TickFault> {
    let mut result = TickResult::default();

    match state.phase {
        MatchPhase::Waiting | MatchPhase::Finished { .. } => {
            result.events = state.take_events();
            return Ok(result);
        }
        MatchPhase::Countdown { ticks_remaining, kind } => {
            advance_countdown(state, ticks_remaining, kind);
            result.events = state.take_events();
            return Ok(result);
        }
        MatchPhase::Playing => {}
    }

    state.tick = state.tick.wrapping_add(1);

    // 1. Paddles
    move_paddles(state);

    // 2. Ball
    state.ball.position = state.ball.position + state.ball.velocity;

    // 3. Walls
    bounce_walls(state);

    // 4. Paddle contact
    resolve_paddle_contact(state);

    // 5. Goals
    if let Some(scorer) = goal_scorer(state) {
        award_point(state, scorer);
    }

    validate(state)?;

    if let MatchPhase::Finished { winner } = state.phase {
        result.match_ended = true;
        result.winner = winner;
    }
    result.events = state.take_events();

    Ok(result)
}

fn advance_countdown(state: &mut MatchState, ticks_remaining: u32, kind: CountdownKind) {
    let remaining = ticks_remaining.saturating_sub(1);

    if remaining == 0 {
        if state.occupancy() == 2 {
            state.phase = MatchPhase::Playing;
            state.push_event(GameEventData::CountdownEnded);
        } else {
            state.phase = MatchPhase::Waiting;
            state.push_event(GameEventData::Halted);
        }
        return;
    }

    state.phase = MatchPhase::Countdown { ticks_remaining: remaining, kind };

    let rate = state.config.tick_rate.max(1);
    if remaining % rate == 0 {
        state.push_event(GameEventData::CountdownTick { seconds: remaining / rate });
    }
}

fn move_paddles(state: &mut MatchState) {
    let speed = state.config.paddle_speed;
    let travel = state.config.paddle_travel();

    for paddle in Paddle::ALL {
        let p = state.paddles.get_mut(paddle);
        let step = speed * p.direction.sign();
        p.y = fixed_clamp(p.y.saturating_add(step), 0, travel);
    }
}

fn bounce_walls(state: &mut MatchState) {
    let ball = &mut state.ball;
    if ball.position.y <= 0 {
        ball.velocity.y = fixed_abs(ball.velocity.y);
    } else if ball.position.y >= state.config.field_height {
        ball.velocity.y = -fixed_abs(ball.velocity.y);
    }
}

fn resolve_paddle_contact(state: &mut MatchState) {
    let config = &state.config;
    let ball = state.ball;

    // Only the paddle the ball is travelling towards can be hit.
    let (paddle, in_band) = if ball.velocity.x < 0 {
        (Paddle::Left, ball.position.x <= config.paddle_band)
    } else if ball.velocity.x > 0 {
        (Paddle::Right, ball.position.x >= config.field_width - config.paddle_band)
    } else {
        return;
    };

    if !in_band {
        return;
    }

    let top = state.paddles.get(paddle).y;
    let within = ball.position.y >= top && ball.position.y <= top + config.paddle_height;
    if !within {
        return;
    }

    let accel = config.paddle_hit_acceleration;
    let cap = config.ball_max_speed;
    let dx = fixed_min(fixed_abs(fixed_mul(ball.velocity.x, accel)), cap);
    let dy = fixed_min(fixed_abs(fixed_mul(ball.velocity.y, accel)), cap);

    state.ball.velocity = FixedVec2::new(
        fixed_with_sign(dx, -ball.velocity.x),
        fixed_with_sign(dy, ball.velocity.y),
    );
}

fn goal_scorer(state: &MatchState) -> Option<Paddle> {
    let x = state.ball.position.x;
    if x < 0 {
        Some(Paddle::Right)
    } else if x > state.config.field_width {
        Some(Paddle::Left)
    } else {
        None
    }
}

fn award_point(state: &mut MatchState, scorer: Paddle) {
    let points = state.score.get_mut(scorer);
    *points = points.saturating_add(1);
    let reached = *points >= state.config.max_score;

    state.push_event(GameEventData::PointScored { scorer, score: state.score });

    if reached {
        state.phase = MatchPhase::Finished { winner: Some(scorer) };
        state.push_event(GameEventData::MatchOver { winner: Some(scorer) });
        return;
    }

    state.reset_ball();
    state.begin_countdown(CountdownKind::Serve);
}

fn validate(state: &MatchState) -> Result<(), TickFault> {
    let config = &state.config;
    let margin = config.ball_max_speed.saturating_mul(2);
    let position = state.ball.position;
    if !position.is_near_field(config.field_width, config.field_height, margin) {
        return Err(TickFault::BallEscaped { position });
    }

    for paddle in Paddle::ALL {
        let score = *state.score.get(paddle);
        if score > config.max_score {
            return Err(TickFault::ScoreOverflow { score, max_score: config.max_score });
        }
    }

    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
