//! Anchor pairs: confidently matching blocks that split the alignment into
//! independent segments.

use std::cmp::Ordering;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::similarity::PairScorer;

/// Share of cue blocks in A above which the looser anchor thresholds apply.
pub const ANCHOR_MODE_CUE_RATE: f64 = 0.25;

/// Zero-based block indexes of a matched pair and its score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorPair {
    pub a_index: usize,
    pub b_index: usize,
    pub score: f64,
}

impl AnchorPair {
    pub fn new(a_index: usize, b_index: usize, score: f64) -> Self {
        Self {
            a_index,
            b_index,
            score,
        }
    }
}

/// Result of automatic anchor detection; `max_sim` feeds the fallback
/// threshold when no anchor survives.
#[derive(Debug, Clone, Default)]
pub struct AutoAnchors {
    pub anchors: Vec<AnchorPair>,
    pub max_sim: f64,
}

/// Highest-scoring chain whose A and B indexes both strictly increase.
pub fn select_monotonic(candidates: &[AnchorPair]) -> Vec<AnchorPair> {
    let mut ordered = candidates.to_vec();
    ordered.sort_by(|x, y| {
        x.a_index
            .cmp(&y.a_index)
            .then(x.b_index.cmp(&y.b_index))
            .then(y.score.partial_cmp(&x.score).unwrap_or(Ordering::Equal))
    });
    if ordered.is_empty() {
        return Vec::new();
    }

    let mut dp: Vec<f64> = ordered.iter().map(|c| c.score).collect();
    let mut prev: Vec<Option<usize>> = vec![None; ordered.len()];
    for i in 0..ordered.len() {
        for j in 0..i {
            if ordered[j].a_index < ordered[i].a_index && ordered[j].b_index < ordered[i].b_index {
                let cand = dp[j] + ordered[i].score;
                if cand > dp[i] {
                    dp[i] = cand;
                    prev[i] = Some(j);
                }
            }
        }
    }

    let mut best = 0usize;
    for i in 1..dp.len() {
        if dp[i] > dp[best] {
            best = i;
        }
    }

    let mut chain = Vec::new();
    let mut cur = Some(best);
    while let Some(i) = cur {
        chain.push(ordered[i]);
        cur = prev[i];
    }
    chain.reverse();
    chain
}

/// Mutual-best pairs above a threshold relative to the best score seen.
pub fn auto_anchors(scorer: &PairScorer<'_>, min_len_ratio: f64) -> AutoAnchors {
    let (n, m) = (scorer.len_a(), scorer.len_b());
    if n == 0 || m == 0 {
        return AutoAnchors::default();
    }
    let anchor_mode = scorer.cue_rate_a() >= ANCHOR_MODE_CUE_RATE;
    let min_len = if min_len_ratio > 0.0 {
        if anchor_mode {
            (min_len_ratio * 0.35).max(0.02)
        } else {
            min_len_ratio.max(0.3)
        }
    } else if anchor_mode {
        0.08
    } else {
        0.3
    };

    let best = mutual_best(scorer);
    let threshold = if anchor_mode {
        (best.max_sim - 0.30).max(0.10)
    } else {
        (best.max_sim - 0.15).max(0.35)
    };

    let mut candidates = Vec::new();
    for (i, entry) in best.best_a.iter().enumerate() {
        let Some((j, sim)) = *entry else {
            continue;
        };
        if best.best_b[j].map(|(bi, _)| bi) != Some(i) {
            continue;
        }
        let cue = scorer.is_cue_pair(i, j);
        let local_threshold = if cue { threshold.min(0.12) } else { threshold };
        if sim < local_threshold {
            continue;
        }
        if scorer.len_ratio(i, j) < min_len && !cue {
            continue;
        }
        candidates.push(AnchorPair::new(i, j, sim));
    }
    let anchors = select_monotonic(&candidates);
    debug!(
        anchor_mode,
        threshold,
        candidates = candidates.len(),
        selected = anchors.len(),
        "automatic anchors"
    );
    AutoAnchors {
        anchors,
        max_sim: best.max_sim,
    }
}

/// Anchors from caller-supplied floors. Empty when both floors are unset.
pub fn explicit_anchors(scorer: &PairScorer<'_>, min_sim: f64, min_len_ratio: f64) -> Vec<AnchorPair> {
    if min_sim <= 0.0 && min_len_ratio <= 0.0 {
        return Vec::new();
    }
    let best = mutual_best(scorer);
    let mut candidates = Vec::new();
    for i in 0..scorer.len_a() {
        for j in 0..scorer.len_b() {
            let Some(&sim) = best.sims.get(&(i, j)) else {
                continue;
            };
            if min_sim > 0.0 && sim < min_sim {
                continue;
            }
            if min_len_ratio > 0.0 && scorer.len_ratio(i, j) < min_len_ratio && !scorer.is_cue_pair(i, j) {
                continue;
            }
            let mutual = best.best_a[i].map(|(bj, _)| bj) == Some(j)
                && best.best_b[j].map(|(bi, _)| bi) == Some(i);
            if mutual {
                candidates.push(AnchorPair::new(i, j, sim));
            }
        }
    }
    select_monotonic(&candidates)
}

/// Union of two anchor sets, keeping the best score per pair, reduced to a
/// monotonic chain. A lone non-empty set is returned ordered as is.
pub fn merge_anchors(primary: &[AnchorPair], extra: &[AnchorPair]) -> Vec<AnchorPair> {
    let by_position = |x: &AnchorPair, y: &AnchorPair| {
        x.a_index.cmp(&y.a_index).then(x.b_index.cmp(&y.b_index))
    };
    if primary.is_empty() || extra.is_empty() {
        let mut only: Vec<AnchorPair> = if primary.is_empty() { extra } else { primary }.to_vec();
        only.sort_by(by_position);
        return only;
    }
    let mut best: FxHashMap<(usize, usize), f64> = FxHashMap::default();
    for pair in primary.iter().chain(extra) {
        let entry = best.entry((pair.a_index, pair.b_index)).or_insert(pair.score);
        if pair.score > *entry {
            *entry = pair.score;
        }
    }
    let mut merged: Vec<AnchorPair> = best
        .into_iter()
        .map(|((a, b), score)| AnchorPair::new(a, b, score))
        .collect();
    merged.sort_by(by_position);
    select_monotonic(&merged)
}

struct MutualBest {
    sims: FxHashMap<(usize, usize), f64>,
    best_a: Vec<Option<(usize, f64)>>,
    best_b: Vec<Option<(usize, f64)>>,
    max_sim: f64,
}

/// Best partner per block on each side, skipping hard label conflicts. A
/// partner must beat the running best, which starts at zero.
fn mutual_best(scorer: &PairScorer<'_>) -> MutualBest {
    let (n, m) = (scorer.len_a(), scorer.len_b());
    let mut out = MutualBest {
        sims: FxHashMap::default(),
        best_a: vec![None; n],
        best_b: vec![None; m],
        max_sim: 0.0,
    };
    for i in 0..n {
        for j in 0..m {
            if scorer.rejects(i, j) {
                continue;
            }
            let sim = scorer.similarity(i, j);
            out.sims.insert((i, j), sim);
            out.max_sim = out.max_sim.max(sim);
            if sim > out.best_a[i].map_or(0.0, |(_, s)| s) {
                out.best_a[i] = Some((j, sim));
            }
            if sim > out.best_b[j].map_or(0.0, |(_, s)| s) {
                out.best_b[j] = Some((i, sim));
            }
        }
    }
    out
}
