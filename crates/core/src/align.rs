//! Block alignment: anchors split both block lists into segments, each
//! segment is aligned with a gap-penalised dynamic program.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::anchors::{auto_anchors, explicit_anchors, merge_anchors, AnchorPair};
use crate::config::AlignConfig;
use crate::lexicon::{Lexicon, LexiconDiagnostics};
use crate::segment::TextBlock;
use crate::similarity::{normalize_for_similarity, PairScorer};

/// Diagonal floor used when neither the caller nor the anchor scan gives one.
pub const FALLBACK_MIN_SIM: f64 = 0.12;
/// Share of the best anchor score used as the derived diagonal floor.
pub const AUTO_MIN_SIM_FACTOR: f64 = 0.6;
/// Diagonal floor for cue blocks of A.
pub const CUE_MIN_SIM: f64 = 0.08;

const NEG_INF: f64 = -1e9;

/// One step of a full alignment. At most one side is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlockAlignment {
    pub a_index: Option<usize>,
    pub b_index: Option<usize>,
    pub score: f64,
}

impl BlockAlignment {
    pub fn matched(a: usize, b: usize, score: f64) -> Self {
        Self {
            a_index: Some(a),
            b_index: Some(b),
            score,
        }
    }

    pub fn only_a(a: usize) -> Self {
        Self {
            a_index: Some(a),
            b_index: None,
            score: 0.0,
        }
    }

    pub fn only_b(b: usize) -> Self {
        Self {
            a_index: None,
            b_index: Some(b),
            score: 0.0,
        }
    }

    pub fn pair(&self) -> Option<(usize, usize)> {
        self.a_index.zip(self.b_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Move {
    Diag,
    Up,
    Left,
}

/// Aligns `a_range` against `b_range`. The result visits every index of
/// both ranges once, in increasing order per side.
pub fn align_segment(
    scorer: &PairScorer<'_>,
    a_range: Range<usize>,
    b_range: Range<usize>,
    min_sim: f64,
    config: &AlignConfig,
) -> Vec<BlockAlignment> {
    let n = a_range.len();
    let m = b_range.len();
    if n == 0 && m == 0 {
        return Vec::new();
    }
    let gap = config.gap_penalty;
    let mut dp = vec![vec![NEG_INF; m + 1]; n + 1];
    let mut moves = vec![vec![Move::Diag; m + 1]; n + 1];
    dp[0][0] = 0.0;
    for i in 1..=n {
        dp[i][0] = dp[i - 1][0] + gap;
        moves[i][0] = Move::Up;
    }
    for j in 1..=m {
        dp[0][j] = dp[0][j - 1] + gap;
        moves[0][j] = Move::Left;
    }

    for i in 1..=n {
        let a = a_range.start + i - 1;
        let cue_a = scorer.is_cue_a(a);
        let eff_min = if cue_a { min_sim.min(CUE_MIN_SIM) } else { min_sim };
        for j in 1..=m {
            let b = b_range.start + j - 1;
            let within_band = config.band == 0 || i.abs_diff(j) <= config.band;
            let mut diag = NEG_INF;
            if within_band {
                let sim = scorer.similarity(a, b);
                let ratio = scorer.len_ratio(a, b);
                let len_ok = config.min_len_ratio <= 0.0 || ratio >= config.min_len_ratio || cue_a;
                if sim >= eff_min && len_ok {
                    let penalty = if config.len_penalty > 0.0 && !cue_a {
                        (1.0 - ratio) * config.len_penalty
                    } else {
                        0.0
                    };
                    diag = dp[i - 1][j - 1] + sim - penalty;
                }
            }
            let up = dp[i - 1][j] + gap;
            let left = dp[i][j - 1] + gap;
            let (score, mv) = if diag >= up && diag >= left {
                (diag, Move::Diag)
            } else if up >= left {
                (up, Move::Up)
            } else {
                (left, Move::Left)
            };
            dp[i][j] = score;
            moves[i][j] = mv;
        }
    }

    let mut out = Vec::with_capacity(n + m);
    let (mut x, mut y) = (n, m);
    while x > 0 || y > 0 {
        let a = a_range.start + x.saturating_sub(1);
        let b = b_range.start + y.saturating_sub(1);
        if x > 0 && y > 0 && moves[x][y] == Move::Diag {
            out.push(BlockAlignment::matched(a, b, scorer.similarity(a, b)));
            x -= 1;
            y -= 1;
        } else if x > 0 && (y == 0 || moves[x][y] == Move::Up) {
            out.push(BlockAlignment::only_a(a));
            x -= 1;
        } else {
            out.push(BlockAlignment::only_b(b));
            y -= 1;
        }
    }
    out.reverse();
    out
}

/// Full alignment of two block lists plus what produced it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Alignment {
    pub normalized_a: Vec<String>,
    pub normalized_b: Vec<String>,
    pub anchors: Vec<AnchorPair>,
    pub auto_max_sim: f64,
    pub lexicon: LexiconDiagnostics,
    pub pairs: Vec<BlockAlignment>,
}

pub fn align_blocks(
    blocks_a: &[TextBlock],
    blocks_b: &[TextBlock],
    lexicon: &Lexicon,
    config: &AlignConfig,
) -> Alignment {
    let normalized_a: Vec<String> = blocks_a.iter().map(|b| normalize_for_similarity(&b.text)).collect();
    let normalized_b: Vec<String> = blocks_b.iter().map(|b| normalize_for_similarity(&b.text)).collect();
    let scorer = PairScorer::new(&normalized_a, &normalized_b);

    let mut auto_max_sim = 0.0;
    let mut anchors = if config.has_anchor_floors() {
        explicit_anchors(&scorer, config.anchor_min_sim, config.anchor_min_len_ratio)
    } else {
        let auto = auto_anchors(&scorer, config.min_len_ratio);
        auto_max_sim = auto.max_sim;
        auto.anchors
    };

    let mut lexicon_diagnostics = LexiconDiagnostics::default();
    if config.use_lexicon && !lexicon.is_empty() {
        let found = lexicon.anchors(&scorer, &normalized_a, &normalized_b, config.min_len_ratio);
        anchors = merge_anchors(&anchors, &found.anchors);
        lexicon_diagnostics = found.diagnostics;
        lexicon_diagnostics.mark_used(&anchors);
    }

    let (n, m) = (normalized_a.len(), normalized_b.len());
    let pairs = if anchors.is_empty() {
        let eff_min = if config.min_sim > 0.0 {
            config.min_sim
        } else if auto_max_sim > 0.0 {
            FALLBACK_MIN_SIM.max(auto_max_sim * AUTO_MIN_SIM_FACTOR)
        } else {
            FALLBACK_MIN_SIM
        };
        debug!(eff_min, blocks_a = n, blocks_b = m, "aligning without anchors");
        align_segment(&scorer, 0..n, 0..m, eff_min, config)
    } else {
        let mut pairs = Vec::with_capacity(n.max(m));
        let (mut prev_a, mut prev_b) = (0usize, 0usize);
        for anchor in &anchors {
            pairs.extend(align_segment(
                &scorer,
                prev_a..anchor.a_index,
                prev_b..anchor.b_index,
                config.min_sim,
                config,
            ));
            pairs.push(BlockAlignment::matched(anchor.a_index, anchor.b_index, anchor.score));
            prev_a = anchor.a_index + 1;
            prev_b = anchor.b_index + 1;
        }
        pairs.extend(align_segment(&scorer, prev_a..n, prev_b..m, config.min_sim, config));
        pairs
    };

    debug!(anchors = anchors.len(), steps = pairs.len(), "block alignment done");
    Alignment {
        normalized_a,
        normalized_b,
        anchors,
        auto_max_sim,
        lexicon: lexicon_diagnostics,
        pairs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks(texts: &[&str]) -> Vec<TextBlock> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| TextBlock::from_text(i + 1, i + 1, i + 1, t.to_string(), t.to_string()))
            .collect()
    }

    fn strings(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    fn assert_total(pairs: &[BlockAlignment], n: usize, m: usize) {
        let a: Vec<usize> = pairs.iter().filter_map(|p| p.a_index).collect();
        let b: Vec<usize> = pairs.iter().filter_map(|p| p.b_index).collect();
        assert_eq!(a, (0..n).collect::<Vec<_>>());
        assert_eq!(b, (0..m).collect::<Vec<_>>());
        assert!(pairs.iter().all(|p| p.a_index.is_some() || p.b_index.is_some()));
    }

    #[test]
    fn empty_segment_is_empty() {
        let a = strings(&[]);
        let scorer = PairScorer::new(&a, &a);
        assert!(align_segment(&scorer, 0..0, 0..0, 0.0, &AlignConfig::default()).is_empty());
    }

    #[test]
    fn one_sided_segment_is_all_gaps() {
        let a = strings(&["alpha", "beta"]);
        let b = strings(&[]);
        let scorer = PairScorer::new(&a, &b);
        let pairs = align_segment(&scorer, 0..2, 0..0, 0.0, &AlignConfig::default());
        assert_eq!(pairs, vec![BlockAlignment::only_a(0), BlockAlignment::only_a(1)]);
    }

    #[test]
    fn identical_lists_align_diagonally() {
        let a = strings(&["nome do autor", "endereco completo", "valor da causa"]);
        let scorer = PairScorer::new(&a, &a);
        let pairs = align_segment(&scorer, 0..3, 0..3, 0.12, &AlignConfig::default());
        let matched: Vec<_> = pairs.iter().filter_map(BlockAlignment::pair).collect();
        assert_eq!(matched, vec![(0, 0), (1, 1), (2, 2)]);
    }

    #[test]
    fn floor_turns_weak_pairs_into_gaps() {
        let a = strings(&["aaaaaaaaaa"]);
        let b = strings(&["zzzzzzzzzz"]);
        let scorer = PairScorer::new(&a, &b);
        let pairs = align_segment(&scorer, 0..1, 0..1, 0.5, &AlignConfig::default());
        assert_eq!(pairs, vec![BlockAlignment::only_b(0), BlockAlignment::only_a(0)]);
    }

    #[test]
    fn trailing_extra_block_becomes_gap() {
        let a = blocks(&["PROCESSO: 001", "VALOR: R$ 100,00", "Assinado eletronicamente"]);
        let b = blocks(&["PROCESSO: 001", "VALOR: R$ 250,00"]);
        let alignment = align_blocks(&a, &b, &Lexicon::default(), &AlignConfig::default());
        assert_total(&alignment.pairs, 3, 2);
        assert_eq!(alignment.pairs.last(), Some(&BlockAlignment::only_a(2)));
    }

    #[test]
    fn anchors_are_emitted_in_the_alignment() {
        let a = blocks(&["PROCESSO: 001", "VALOR: R$ 100,00"]);
        let b = blocks(&["PROCESSO: 001", "VALOR: R$ 250,00"]);
        let alignment = align_blocks(&a, &b, &Lexicon::default(), &AlignConfig::default());
        assert!(!alignment.anchors.is_empty());
        let matched: Vec<_> = alignment.pairs.iter().filter_map(BlockAlignment::pair).collect();
        assert_eq!(matched, vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn lexicon_anchor_sits_between_automatic_ones() {
        let a = blocks(&[
            "Tribunal de Justica do Estado",
            "Perito nomeado: Fulano de Tal",
            "Assinatura do responsavel",
        ]);
        let b = blocks(&[
            "Tribunal de Justica do Estado",
            "Perito nomeado: Beltrano Souza Lima",
            "Assinatura do responsavel",
        ]);
        let lexicon = Lexicon::builder()
            .add_phrases("perito", ["Perito nomeado"], 0.86, false, false)
            .build();
        let alignment = align_blocks(&a, &b, &lexicon, &AlignConfig::default());

        let anchors: Vec<_> = alignment.anchors.iter().map(|p| (p.a_index, p.b_index)).collect();
        assert_eq!(anchors, vec![(0, 0), (1, 1), (2, 2)]);
        assert_eq!((alignment.lexicon.hits_a, alignment.lexicon.hits_b), (1, 1));
        assert_eq!(alignment.lexicon.accepted, 1);
        assert_eq!(alignment.lexicon.used_in_final_anchors, 1);
        assert_total(&alignment.pairs, 3, 3);

        let plain = align_blocks(&a, &b, &lexicon, &AlignConfig::default().use_lexicon(false));
        assert_eq!(plain.lexicon, LexiconDiagnostics::default());
        assert_total(&plain.pairs, 3, 3);
    }
}
