//! UCI wire plumbing: parsing engine output, formatting commands.
//!
//! Everything here is pure string handling so it can be tested without a
//! live engine process. The process adapter feeds lines through
//! [`parse_info_line`] / [`parse_bestmove`]; the cloud adapter reuses
//! [`clean_move`] for response hygiene.

use crate::types::Evaluation;

/// Useful fields parsed from one `info` line. Engines interleave many
/// variants; fields missing from a given line stay `None`/empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfoLine {
    pub depth: Option<u32>,
    pub evaluation: Option<Evaluation>,
    pub pv: Vec<String>,
}

impl InfoLine {
    /// Whether this line carries anything worth snapshotting.
    pub fn is_useful(&self) -> bool {
        self.depth.is_some() || self.evaluation.is_some() || !self.pv.is_empty()
    }
}

/// Parse a `info depth .. score .. pv ..` line. Returns `None` for
/// non-info lines; malformed tokens inside an info line are skipped rather
/// than failing the whole analysis.
pub fn parse_info_line(line: &str) -> Option<InfoLine> {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("info") {
        return None;
    }

    let mut parsed = InfoLine::default();
    while let Some(token) = tokens.next() {
        match token {
            "depth" => {
                if let Some(d) = tokens.next().and_then(|t| t.parse().ok()) {
                    parsed.depth = Some(d);
                }
            }
            "score" => match tokens.next() {
                Some("cp") => {
                    if let Some(cp) = tokens.next().and_then(|t| t.parse().ok()) {
                        parsed.evaluation = Some(Evaluation::Centipawns(cp));
                    }
                }
                Some("mate") => {
                    if let Some(m) = tokens.next().and_then(|t| t.parse().ok()) {
                        parsed.evaluation = Some(Evaluation::MateIn(m));
                    }
                }
                _ => {}
            },
            "pv" => {
                parsed.pv = tokens.by_ref().map(str::to_string).collect();
            }
            // multipv, nodes, nps, time, hashfull, ... — not needed here
            _ => {}
        }
    }

    parsed.is_useful().then_some(parsed)
}

/// Extract the move from a `bestmove <move> [ponder <move>]` line.
pub fn parse_bestmove(line: &str) -> Option<String> {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("bestmove") {
        return None;
    }
    tokens.next().and_then(clean_move)
}

/// Normalize a raw move string from an engine or cloud API to bare
/// coordinate notation, or reject it. Accepts `e2e4` / `e7e8q` shapes and
/// strips `bestmove …` / `ponder …` decoration.
pub fn clean_move(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let candidate = if let Some(rest) = raw.strip_prefix("bestmove") {
        rest.split_whitespace().next()?
    } else {
        raw.split_whitespace().next()?
    };

    is_coordinate_move(candidate).then(|| candidate.to_string())
}

/// `e2e4`-shaped: from-square, to-square, optional promotion piece.
pub fn is_coordinate_move(s: &str) -> bool {
    let b = s.as_bytes();
    if !(4..=5).contains(&b.len()) {
        return false;
    }
    let square = |file: u8, rank: u8| (b'a'..=b'h').contains(&file) && (b'1'..=b'8').contains(&rank);
    if !square(b[0], b[1]) || !square(b[2], b[3]) {
        return false;
    }
    b.len() == 4 || matches!(b[4], b'q' | b'r' | b'b' | b'n')
}

/// Commands to cap an engine's strength at the requested Elo, or none at
/// full strength.
pub fn elo_limit_commands(elo_limit: u32, full_strength: u32) -> Vec<String> {
    if elo_limit >= full_strength {
        return Vec::new();
    }
    vec![
        "setoption name UCI_LimitStrength value true".to_string(),
        format!("setoption name UCI_Elo value {elo_limit}"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_info_line() {
        let line = "info depth 18 seldepth 24 multipv 1 score cp 34 nodes 912042 nps 1204211 pv e2e4 e7e5 g1f3";
        let info = parse_info_line(line).unwrap();
        assert_eq!(info.depth, Some(18));
        assert_eq!(info.evaluation, Some(Evaluation::Centipawns(34)));
        assert_eq!(info.pv, vec!["e2e4", "e7e5", "g1f3"]);
    }

    #[test]
    fn parses_negative_mate_score() {
        let info = parse_info_line("info depth 12 score mate -3 pv h7h8").unwrap();
        assert_eq!(info.evaluation, Some(Evaluation::MateIn(-3)));
    }

    #[test]
    fn skips_noise_lines() {
        assert!(parse_info_line("info string NNUE evaluation using nn.nnue").is_none());
        assert!(parse_info_line("readyok").is_none());
        assert!(parse_info_line("info currmove e2e4 currmovenumber 1").is_none());
    }

    #[test]
    fn malformed_tokens_do_not_poison_the_line() {
        let info = parse_info_line("info depth banana score cp 15").unwrap();
        assert_eq!(info.depth, None);
        assert_eq!(info.evaluation, Some(Evaluation::Centipawns(15)));
    }

    #[test]
    fn bestmove_with_ponder() {
        assert_eq!(
            parse_bestmove("bestmove c7c6 ponder d5c4"),
            Some("c7c6".to_string())
        );
        assert_eq!(parse_bestmove("bestmove e7e8q"), Some("e7e8q".to_string()));
        assert_eq!(parse_bestmove("bestmove (none)"), None);
        assert_eq!(parse_bestmove("info depth 1"), None);
    }

    #[test]
    fn clean_move_hygiene() {
        assert_eq!(clean_move("e2e4"), Some("e2e4".to_string()));
        assert_eq!(clean_move("  e7e8q "), Some("e7e8q".to_string()));
        assert_eq!(clean_move("bestmove c7c6 ponder d5c4"), Some("c7c6".to_string()));
        assert_eq!(clean_move("O-O"), None);
        assert_eq!(clean_move("e9e4"), None);
        assert_eq!(clean_move("e2e4x"), None);
        assert_eq!(clean_move(""), None);
    }

    #[test]
    fn elo_commands_only_below_full_strength() {
        assert!(elo_limit_commands(3200, 3200).is_empty());
        let cmds = elo_limit_commands(1800, 3200);
        assert_eq!(cmds.len(), 2);
        assert!(cmds[1].ends_with("1800"));
    }
}
