//! Phrase lexicon that recognises known field markers in block text and
//! turns same-key hits on both sides into anchor candidates.

use itertools::Itertools;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::anchors::{select_monotonic, AnchorPair};
use crate::normalization::fold_for_search;
use crate::similarity::PairScorer;

/// Minimum best-phrase score for a block to count as a hit.
pub const LEXICON_HIT_THRESHOLD: f64 = 0.86;
/// Diagnostics keep at most this many decisions.
pub const MAX_DECISIONS: usize = 300;
/// Weight used for a phrase group that does not set one.
pub const DEFAULT_GROUP_WEIGHT: f64 = 0.88;

const PREFIX_WINDOW: usize = 24;
const POSITION_BONUS_WINDOW: usize = 36;
const POSITION_BONUS: f64 = 0.12;
const MAX_POSITION_DELTA: f64 = 0.35;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phrase {
    pub key: String,
    pub phrase: String,
    pub normalized: String,
    pub compact: String,
    pub weight: f64,
    pub require_prefix: bool,
}

/// Immutable set of marker phrases; build once and share by reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lexicon {
    phrases: Vec<Phrase>,
}

/// One group of phrases as written in a lexicon file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhraseGroup {
    pub key: String,
    #[serde(default)]
    pub phrases: Vec<String>,
    /// Field templates; the literal parts around `{{value}}` become phrases.
    #[serde(default)]
    pub templates: Vec<String>,
    /// Bare labels; each also matches with a trailing colon.
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default = "default_group_weight")]
    pub weight: f64,
    #[serde(default)]
    pub require_prefix: bool,
    #[serde(default)]
    pub allow_single_token: bool,
}

fn default_group_weight() -> f64 {
    DEFAULT_GROUP_WEIGHT
}

/// Top-level shape of a YAML or TOML lexicon file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LexiconFile {
    #[serde(default)]
    pub groups: Vec<PhraseGroup>,
}

#[derive(Debug, Clone, Default)]
pub struct LexiconBuilder {
    phrases: Vec<Phrase>,
    seen: FxHashSet<(String, String)>,
}

impl LexiconBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds every usable phrase under `key`. Phrases shorter than three
    /// characters, duplicates, and single words under a prefix rule (unless
    /// allowed and at least eight characters) are skipped.
    pub fn add_phrases<I, S>(
        mut self,
        key: &str,
        phrases: I,
        base_weight: f64,
        require_prefix: bool,
        allow_single_token: bool,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if key.trim().is_empty() {
            return self;
        }
        for raw in phrases {
            let phrase = raw.as_ref().trim();
            if phrase.chars().count() < 3 {
                continue;
            }
            let normalized = fold_for_search(phrase);
            let normalized_len = normalized.chars().count();
            if normalized_len < 3 {
                continue;
            }
            let token_count = normalized.split(' ').filter(|t| !t.is_empty()).count();
            if require_prefix && token_count < 2 && (!allow_single_token || normalized_len < 8) {
                continue;
            }
            let compact = normalized.replace(' ', "");
            if compact.chars().count() < 3 {
                continue;
            }
            if !self.seen.insert((key.to_string(), normalized.clone())) {
                continue;
            }
            let boost = (normalized_len as f64 / 120.0).min(0.08);
            self.phrases.push(Phrase {
                key: key.to_string(),
                phrase: phrase.to_string(),
                normalized,
                compact,
                weight: (base_weight + boost).min(0.98),
                require_prefix,
            });
        }
        self
    }

    pub fn add_group(self, group: &PhraseGroup) -> Self {
        let weight = group.weight;
        self.add_phrases(
            &group.key,
            &group.phrases,
            weight,
            group.require_prefix,
            group.allow_single_token,
        )
        .add_phrases(&group.key, expand_templates(&group.templates), weight, true, false)
        .add_phrases(&group.key, label_phrases(&group.labels), weight, true, true)
    }

    pub fn build(self) -> Lexicon {
        Lexicon {
            phrases: self.phrases,
        }
    }
}

/// Literal template parts around `{{value}}` that are long enough to match.
pub fn expand_templates<S: AsRef<str>>(templates: &[S]) -> Vec<String> {
    let mut out = Vec::new();
    for template in templates {
        let template = template.as_ref().trim();
        if template.is_empty() {
            continue;
        }
        if template.to_lowercase().contains("{{value}}") {
            out.extend(
                split_case_insensitive(template, "{{value}}")
                    .into_iter()
                    .map(|part| part.trim().to_string())
                    .filter(|part| part.chars().count() >= 3),
            );
        } else {
            out.push(template.to_string());
        }
    }
    out
}

/// Each label plus its `label:` form.
pub fn label_phrases<S: AsRef<str>>(labels: &[S]) -> Vec<String> {
    let mut out = Vec::new();
    for label in labels {
        let label = label.as_ref().trim();
        if label.is_empty() {
            continue;
        }
        out.push(label.to_string());
        if !label.ends_with(':') {
            out.push(format!("{label}:"));
        }
    }
    out
}

fn split_case_insensitive<'a>(text: &'a str, needle: &str) -> Vec<&'a str> {
    let lowered = text.to_lowercase();
    if lowered.len() != text.len() {
        return text.split(needle).collect();
    }
    let mut parts = Vec::new();
    let mut start = 0usize;
    for (idx, _) in lowered.match_indices(needle) {
        parts.push(&text[start..idx]);
        start = idx + needle.len();
    }
    parts.push(&text[start..]);
    parts
}

/// Best lexicon phrase found in one block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LexiconHit {
    pub index: usize,
    pub key: String,
    pub phrase: String,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexiconDecision {
    pub a_index: usize,
    pub b_index: usize,
    pub key: String,
    pub status: DecisionStatus,
    pub reason: String,
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LexiconDiagnostics {
    pub hits_a: usize,
    pub hits_b: usize,
    pub candidates: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub used_in_final_anchors: usize,
    pub decisions: Vec<LexiconDecision>,
}

impl LexiconDiagnostics {
    fn record(&mut self, a_index: usize, b_index: usize, key: &str, status: DecisionStatus, reason: &str, score: f64) {
        if self.decisions.len() >= MAX_DECISIONS {
            return;
        }
        self.decisions.push(LexiconDecision {
            a_index,
            b_index,
            key: key.to_string(),
            status,
            reason: reason.to_string(),
            score,
        });
    }

    /// Counts the pairs of `anchors` that came from the lexicon.
    pub fn mark_used(&mut self, anchors: &[AnchorPair]) {
        let selected: FxHashSet<(usize, usize)> = self
            .decisions
            .iter()
            .filter(|d| d.status == DecisionStatus::Accepted)
            .map(|d| (d.a_index, d.b_index))
            .collect();
        self.used_in_final_anchors = anchors
            .iter()
            .filter(|a| selected.contains(&(a.a_index, a.b_index)))
            .count();
    }
}

/// Lexicon anchors and the trail of decisions that produced them.
#[derive(Debug, Clone, Default)]
pub struct LexiconAnchors {
    pub anchors: Vec<AnchorPair>,
    pub diagnostics: LexiconDiagnostics,
}

impl Lexicon {
    pub fn builder() -> LexiconBuilder {
        LexiconBuilder::new()
    }

    pub fn from_groups(groups: &[PhraseGroup]) -> Self {
        groups
            .iter()
            .fold(LexiconBuilder::new(), |builder, group| builder.add_group(group))
            .build()
    }

    pub fn phrases(&self) -> &[Phrase] {
        &self.phrases
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    /// Best phrase for one block text, when it clears the hit threshold.
    pub fn detect(&self, index: usize, block_text: &str) -> Option<LexiconHit> {
        let text = fold_for_search(block_text);
        if text.is_empty() {
            return None;
        }
        let compact = text.replace(' ', "");
        let mut best: Option<(&Phrase, f64)> = None;
        for phrase in &self.phrases {
            if phrase.normalized.is_empty() {
                continue;
            }
            let pos = text
                .find(&phrase.normalized)
                .map(|byte| text[..byte].chars().count());
            let long_compact = phrase.compact.chars().count() >= 4;
            let matched = if phrase.require_prefix {
                pos.is_some_and(|p| p <= PREFIX_WINDOW)
                    || (long_compact && compact.starts_with(&phrase.compact))
            } else {
                pos.is_some() || (long_compact && compact.contains(&phrase.compact))
            };
            if !matched {
                continue;
            }
            let bonus = if pos.is_some_and(|p| p <= POSITION_BONUS_WINDOW) {
                POSITION_BONUS
            } else {
                0.0
            };
            let score = (phrase.weight + bonus).min(0.99);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((phrase, score));
            }
        }
        let (phrase, score) = best?;
        (score >= LEXICON_HIT_THRESHOLD).then(|| LexiconHit {
            index,
            key: phrase.key.clone(),
            phrase: phrase.phrase.clone(),
            score,
        })
    }

    pub fn hits(&self, blocks: &[String]) -> Vec<LexiconHit> {
        if self.is_empty() {
            return Vec::new();
        }
        blocks
            .iter()
            .enumerate()
            .filter_map(|(i, text)| self.detect(i, text))
            .collect()
    }

    /// Pairs same-key hits of both documents into a monotonic anchor chain.
    pub fn anchors(&self, scorer: &PairScorer<'_>, norm_a: &[String], norm_b: &[String], min_len_ratio: f64) -> LexiconAnchors {
        let mut diagnostics = LexiconDiagnostics::default();
        if self.is_empty() || norm_a.is_empty() || norm_b.is_empty() {
            return LexiconAnchors::default();
        }
        let hits_a = self.hits(norm_a);
        let hits_b = self.hits(norm_b);
        diagnostics.hits_a = hits_a.len();
        diagnostics.hits_b = hits_b.len();
        if hits_a.is_empty() || hits_b.is_empty() {
            return LexiconAnchors {
                anchors: Vec::new(),
                diagnostics,
            };
        }

        let by_key_b = hits_b.iter().into_group_map_by(|h| h.key.as_str());
        let relative = |idx: usize, count: usize| {
            if count <= 1 {
                0.0
            } else {
                idx as f64 / (count - 1) as f64
            }
        };

        let mut candidates: Vec<(AnchorPair, &str)> = Vec::new();
        for hit_a in &hits_a {
            let Some(same_key) = by_key_b.get(hit_a.key.as_str()) else {
                continue;
            };
            for hit_b in same_key {
                let (i, j) = (hit_a.index, hit_b.index);
                let key = hit_a.key.as_str();
                let sim = scorer.similarity(i, j);
                if min_len_ratio > 0.0 && scorer.len_ratio(i, j) < min_len_ratio * 0.5 {
                    diagnostics.record(i, j, key, DecisionStatus::Rejected, "len_ratio", sim);
                    continue;
                }
                if sim < 0.08 {
                    diagnostics.record(i, j, key, DecisionStatus::Rejected, "low_similarity", sim);
                    continue;
                }
                let delta = (relative(i, norm_a.len()) - relative(j, norm_b.len())).abs();
                if delta > MAX_POSITION_DELTA {
                    diagnostics.record(i, j, key, DecisionStatus::Rejected, "position_delta", sim);
                    continue;
                }
                let score = sim.max(hit_a.score.min(hit_b.score)) - delta * 0.20;
                if score < 0.10 {
                    diagnostics.record(i, j, key, DecisionStatus::Rejected, "low_score", score);
                    continue;
                }
                candidates.push((AnchorPair::new(i, j, (score + 0.08).min(1.0)), key));
            }
        }

        diagnostics.candidates = candidates.len();
        let pairs: Vec<AnchorPair> = candidates.iter().map(|(pair, _)| *pair).collect();
        let selected = select_monotonic(&pairs);
        let chosen: FxHashSet<(usize, usize)> =
            selected.iter().map(|p| (p.a_index, p.b_index)).collect();
        for (pair, key) in &candidates {
            if chosen.contains(&(pair.a_index, pair.b_index)) {
                diagnostics.record(pair.a_index, pair.b_index, key, DecisionStatus::Accepted, "selected", pair.score);
            } else {
                diagnostics.record(
                    pair.a_index,
                    pair.b_index,
                    key,
                    DecisionStatus::Rejected,
                    "non_monotonic_pruned",
                    pair.score,
                );
            }
        }
        diagnostics.accepted = diagnostics
            .decisions
            .iter()
            .filter(|d| d.status == DecisionStatus::Accepted)
            .count();
        diagnostics.rejected = diagnostics.decisions.len() - diagnostics.accepted;
        debug!(
            hits_a = diagnostics.hits_a,
            hits_b = diagnostics.hits_b,
            candidates = diagnostics.candidates,
            selected = selected.len(),
            "lexicon anchors"
        );
        LexiconAnchors {
            anchors: selected,
            diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lexicon() -> Lexicon {
        Lexicon::builder()
            .add_phrases("comarca", ["Comarca de"], 0.84, true, false)
            .add_phrases("perito", ["Perito nomeado"], 0.86, false, false)
            .add_phrases("vara", ["Vara"], 0.84, true, false)
            .build()
    }

    #[test]
    fn builder_filters_and_weights() {
        let lex = Lexicon::builder()
            .add_phrases("k", ["ab", "  ", "Requerente", "Nome completo", "nome  COMPLETO"], 0.88, true, false)
            .add_phrases("k", ["Requerente"], 0.88, true, true)
            .build();
        let normalized: Vec<&str> = lex.phrases().iter().map(|p| p.normalized.as_str()).collect();
        assert_eq!(normalized, vec!["nome completo", "requerente"]);
        let weight = lex.phrases()[0].weight;
        assert!((weight - 0.96).abs() < 1e-9);
    }

    #[test]
    fn templates_and_labels_expand() {
        assert_eq!(
            expand_templates(&["Processo nº {{value}} da {{VALUE}} Vara", "ok"]),
            vec!["Processo nº", "Vara", "ok"]
        );
        assert_eq!(label_phrases(&["Perito", "CPF:"]), vec!["Perito", "Perito:", "CPF:"]);
    }

    #[test]
    fn groups_deserialize_with_defaults() {
        let file: LexiconFile = serde_json::from_str(
            r#"{"groups":[{"key":"perito","labels":["Perito nomeado"]},{"key":"valor","phrases":["valor arbitrado"],"weight":0.9}]}"#,
        )
        .unwrap();
        assert_eq!(file.groups[0].weight, DEFAULT_GROUP_WEIGHT);
        let lex = Lexicon::from_groups(&file.groups);
        assert_eq!(lex.len(), 2);
        assert!(lex.phrases().iter().all(|p| p.key != "perito" || p.require_prefix));
    }

    #[test]
    fn detection_respects_prefix_window() {
        let lex = lexicon();
        let hit = lex.detect(0, "comarca de campinas").unwrap();
        assert_eq!(hit.key, "comarca");
        assert!((hit.score - 0.99).abs() < 1e-9);
        let far = format!("{} comarca de campinas", "x".repeat(30));
        assert!(lex.detect(0, &far).is_none());
        let prose = format!("{} perito nomeado", "y".repeat(40));
        let hit = lex.detect(2, &prose).unwrap();
        assert_eq!(hit.key, "perito");
        assert_eq!(hit.index, 2);
        assert!(lex.detect(0, "vara").is_none());
        assert!(Lexicon::default().detect(0, "comarca de").is_none());
    }

    #[test]
    fn pairing_selects_same_key_hits() {
        let lex = lexicon();
        let a: Vec<String> = ["comarca de campinas", "texto", "perito nomeado: fulano"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let b: Vec<String> = ["comarca de santos", "outro texto", "mais", "perito nomeado: beltrano"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let scorer = PairScorer::new(&a, &b);
        let result = lex.anchors(&scorer, &a, &b, 0.05);
        let pairs: Vec<(usize, usize)> = result.anchors.iter().map(|p| (p.a_index, p.b_index)).collect();
        assert_eq!(pairs, vec![(0, 0), (2, 3)]);
        assert_eq!(result.diagnostics.hits_a, 2);
        assert_eq!(result.diagnostics.accepted, 2);
        assert!(result.anchors.iter().all(|p| p.score <= 1.0));
    }

    #[test]
    fn distant_positions_are_rejected() {
        let lex = lexicon();
        let a: Vec<String> = ["comarca de campinas", "a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let b: Vec<String> = ["x", "y", "z", "comarca de campinas"].iter().map(|s| s.to_string()).collect();
        let scorer = PairScorer::new(&a, &b);
        let result = lex.anchors(&scorer, &a, &b, 0.05);
        assert!(result.anchors.is_empty());
        assert_eq!(result.diagnostics.decisions[0].reason, "position_delta");
        assert_eq!(result.diagnostics.rejected, 1);
    }
}
