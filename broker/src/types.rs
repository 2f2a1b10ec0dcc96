//! Core value types shared across the broker.
//!
//! A [`Position`] is opaque to the broker beyond validation, side to move,
//! and ply count; the actual chess happens inside the engines. Requests are
//! hashable by their [`RequestKey`] so concurrent identical work can be
//! collapsed, and results are immutable once produced so a single
//! [`AnalysisResult`] can be shared by every waiter.

use std::time::Duration;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{BrokerError, BrokerResult};

/// Identifier for a configured engine kind (e.g. `stockfish`).
pub type EngineId = String;

/// Side to move / requested perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    /// Parse a perspective string as sent by board clients.
    pub fn parse(s: &str) -> BrokerResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "w" | "white" => Ok(Color::White),
            "b" | "black" => Ok(Color::Black),
            other => Err(BrokerError::InvalidInput(format!(
                "unknown perspective '{other}'"
            ))),
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Color::White => write!(f, "white"),
            Color::Black => write!(f, "black"),
        }
    }
}

/// A validated board state in FEN encoding. Immutable once created.
///
/// Validation is structural only: six fields, eight well-formed ranks,
/// legal side-to-move and clock fields. Move legality is an engine concern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Position {
    fen: String,
    side_to_move: Color,
    fullmove_number: u32,
}

impl Position {
    /// Parse and validate a FEN string.
    pub fn parse(fen: &str) -> BrokerResult<Self> {
        let fen = fen.trim();
        let fields: Vec<&str> = fen.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(BrokerError::InvalidInput(format!(
                "FEN must have 6 fields, got {}",
                fields.len()
            )));
        }

        let ranks: Vec<&str> = fields[0].split('/').collect();
        if ranks.len() != 8 {
            return Err(BrokerError::InvalidInput(format!(
                "FEN board must have 8 ranks, got {}",
                ranks.len()
            )));
        }
        for (i, rank) in ranks.iter().enumerate() {
            let mut files = 0u32;
            for c in rank.chars() {
                match c {
                    '1'..='8' => files += c as u32 - '0' as u32,
                    'p' | 'n' | 'b' | 'r' | 'q' | 'k' | 'P' | 'N' | 'B' | 'R' | 'Q' | 'K' => {
                        files += 1
                    }
                    other => {
                        return Err(BrokerError::InvalidInput(format!(
                            "invalid piece character '{other}' in rank {}",
                            i + 1
                        )))
                    }
                }
            }
            if files != 8 {
                return Err(BrokerError::InvalidInput(format!(
                    "rank {} describes {files} files, expected 8",
                    i + 1
                )));
            }
        }

        let side_to_move = match fields[1] {
            "w" => Color::White,
            "b" => Color::Black,
            other => {
                return Err(BrokerError::InvalidInput(format!(
                    "side to move must be 'w' or 'b', got '{other}'"
                )))
            }
        };

        if fields[2] != "-" && !fields[2].chars().all(|c| "KQkq".contains(c)) {
            return Err(BrokerError::InvalidInput(format!(
                "invalid castling field '{}'",
                fields[2]
            )));
        }

        let ep = fields[3];
        let ep_ok = ep == "-"
            || (ep.len() == 2
                && ep.as_bytes()[0].is_ascii_lowercase()
                && (b'a'..=b'h').contains(&ep.as_bytes()[0])
                && (ep.as_bytes()[1] == b'3' || ep.as_bytes()[1] == b'6'));
        if !ep_ok {
            return Err(BrokerError::InvalidInput(format!(
                "invalid en passant field '{ep}'"
            )));
        }

        fields[4].parse::<u32>().map_err(|_| {
            BrokerError::InvalidInput(format!("invalid halfmove clock '{}'", fields[4]))
        })?;
        let fullmove_number = fields[5].parse::<u32>().map_err(|_| {
            BrokerError::InvalidInput(format!("invalid fullmove number '{}'", fields[5]))
        })?;
        if fullmove_number == 0 {
            return Err(BrokerError::InvalidInput(
                "fullmove number must be >= 1".into(),
            ));
        }

        Ok(Self {
            fen: fields.join(" "),
            side_to_move,
            fullmove_number,
        })
    }

    pub fn fen(&self) -> &str {
        &self.fen
    }

    pub fn side_to_move(&self) -> Color {
        self.side_to_move
    }

    pub fn fullmove_number(&self) -> u32 {
        self.fullmove_number
    }
}

/// Engine evaluation of a position: centipawns XOR forced mate distance.
///
/// The exclusivity invariant holds by construction; the wire shape
/// `{"cp": int|null, "mate": int|null}` is produced by the Serialize impl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// Score in hundredths of a pawn, from the side to move unless
    /// normalized to a requested perspective by the broker.
    Centipawns(i32),
    /// Forced mate in N moves; negative means the evaluated side gets mated.
    MateIn(i32),
}

impl Evaluation {
    pub fn cp(&self) -> Option<i32> {
        match self {
            Evaluation::Centipawns(cp) => Some(*cp),
            Evaluation::MateIn(_) => None,
        }
    }

    pub fn mate(&self) -> Option<i32> {
        match self {
            Evaluation::Centipawns(_) => None,
            Evaluation::MateIn(m) => Some(*m),
        }
    }

    /// Flip the score to the opposite point of view.
    pub fn negated(self) -> Self {
        match self {
            Evaluation::Centipawns(cp) => Evaluation::Centipawns(-cp),
            Evaluation::MateIn(m) => Evaluation::MateIn(-m),
        }
    }

    /// Normalize a side-to-move score to the requested perspective.
    pub fn from_perspective(self, side_to_move: Color, perspective: Color) -> Self {
        if side_to_move == perspective {
            self
        } else {
            self.negated()
        }
    }

    /// Collapse to a single comparable scalar: mates dominate any material
    /// score, closer mates dominate farther ones.
    pub fn as_score(&self) -> f64 {
        match self {
            Evaluation::Centipawns(cp) => *cp as f64,
            Evaluation::MateIn(m) if *m >= 0 => 100_000.0 - *m as f64,
            Evaluation::MateIn(m) => -100_000.0 - *m as f64,
        }
    }
}

impl Serialize for Evaluation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut st = serializer.serialize_struct("Evaluation", 2)?;
        st.serialize_field("cp", &self.cp())?;
        st.serialize_field("mate", &self.mate())?;
        st.end()
    }
}

/// How a request chooses its backend(s).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EngineSelector {
    /// Route to one specific engine kind.
    Engine(EngineId),
    /// Fan out to a set of engine kinds and vote. An empty set means
    /// "every configured engine". Normalized (sorted, deduplicated) so the
    /// selector hashes identically regardless of request ordering.
    Ensemble(Vec<EngineId>),
    /// Let the broker pick the least-loaded available kind.
    Any,
}

impl EngineSelector {
    /// Parse the `engine` field of a best-move request.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "ensemble" => EngineSelector::Ensemble(Vec::new()),
            "any" => EngineSelector::Any,
            _ => EngineSelector::Engine(s.trim().to_string()),
        }
    }

    /// Ensemble selector over an explicit engine set.
    pub fn ensemble_of(engines: impl IntoIterator<Item = EngineId>) -> Self {
        let mut set: Vec<EngineId> = engines.into_iter().collect();
        set.sort();
        set.dedup();
        EngineSelector::Ensemble(set)
    }
}

impl std::fmt::Display for EngineSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineSelector::Engine(id) => write!(f, "{id}"),
            EngineSelector::Ensemble(_) => write!(f, "ensemble"),
            EngineSelector::Any => write!(f, "any"),
        }
    }
}

/// One analysis request as accepted by the broker façade. Value type.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub position: Position,
    /// Target search depth in plies, clamped to >= 1.
    pub depth: u32,
    /// Wall-clock budget for the engine-side search.
    pub time_budget: Duration,
    /// Upper bound on playing strength; engines at or above this are
    /// uncapped.
    pub elo_limit: u32,
    pub selector: EngineSelector,
}

impl AnalysisRequest {
    pub fn new(
        position: Position,
        depth: u32,
        time_budget: Duration,
        elo_limit: u32,
        selector: EngineSelector,
    ) -> Self {
        Self {
            position,
            depth: depth.max(1),
            time_budget,
            elo_limit,
            selector,
        }
    }

    /// Deduplication signature: identical keys collapse onto one
    /// computation.
    pub fn key(&self) -> RequestKey {
        RequestKey {
            fen: self.position.fen().to_string(),
            depth: self.depth,
            elo_limit: self.elo_limit,
            selector: self.selector.clone(),
        }
    }
}

/// Signature of an analysis request, used as the in-flight/cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub fen: String,
    pub depth: u32,
    pub elo_limit: u32,
    pub selector: EngineSelector,
}

/// Completed analysis from one engine. Immutable after creation; shared
/// between waiters behind `Arc`.
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    /// Best move in coordinate notation (`e2e4`, `e7e8q`).
    pub best_move: String,
    pub evaluation: Evaluation,
    /// Expected continuation, best move first.
    pub principal_variation: Vec<String>,
    pub engine_id: EngineId,
    pub depth_reached: u32,
    pub elapsed: Duration,
}

/// One engine's contribution to an ensemble decision. Ephemeral.
#[derive(Debug, Clone)]
pub struct EnsembleVote {
    pub engine_id: EngineId,
    pub best_move: String,
    pub evaluation: Evaluation,
    /// Trust weight in [0, 1], injected from configuration.
    pub weight: f64,
}

/// What a brokered request ultimately produces: the winning result plus,
/// for ensemble routes, the per-engine votes behind it.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub result: AnalysisResult,
    /// Empty for single-engine routes.
    pub votes: Vec<EnsembleVote>,
    /// Consensus confidence in [0, 100]; `None` for single-engine routes.
    pub confidence: Option<f64>,
}

impl AnalysisOutcome {
    pub fn single(result: AnalysisResult) -> Self {
        Self {
            result,
            votes: Vec::new(),
            confidence: None,
        }
    }
}

pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
