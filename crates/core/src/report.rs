//! Serializable view of one alignment: blocks, anchors, pair kinds and the
//! resulting ranges.

use serde::{Deserialize, Serialize};
use similar::{Algorithm, ChangeTag, TextDiff};

use crate::align::Alignment;
use crate::config::AlignConfig;
use crate::lexicon::LexiconDiagnostics;
use crate::normalization::{collapse_spaced_letters, fix_missing_spaces, normalize_whitespace};
use crate::ranges::{is_fixed_pair, RangeResult, RegionMode};
use crate::segment::TextBlock;
use crate::similarity::word_similarity;

/// Fixed runs shorter than this are folded into the surrounding variable
/// segment.
pub const MIN_FIXED_CHARS: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugBlock {
    pub index: usize,
    pub start_op: usize,
    pub end_op: usize,
    pub text: String,
    pub pattern: String,
    pub max_token_len: usize,
    pub ops_label: String,
}

impl From<&TextBlock> for DebugBlock {
    fn from(block: &TextBlock) -> Self {
        let text = collapse_spaced_letters(&block.text);
        Self {
            index: block.index,
            start_op: block.start_op,
            end_op: block.end_op,
            text: normalize_whitespace(&fix_missing_spaces(&text)),
            pattern: block.pattern.clone(),
            max_token_len: block.max_token_len,
            ops_label: block.ops_label.clone(),
        }
    }
}

/// `gap_b` marks an A block with no counterpart in B, `gap_a` the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairKind {
    Anchor,
    Fixed,
    Variable,
    GapA,
    GapB,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugPair {
    pub a_index: Option<usize>,
    pub b_index: Option<usize>,
    pub score: f64,
    pub kind: PairKind,
    /// Token-level similarity of the two texts, for matched pairs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a: Option<DebugBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b: Option<DebugBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segments: Option<PairSegments>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlignReport {
    pub label: String,
    pub source_a: String,
    pub source_b: String,
    pub region: RegionMode,
    pub params: AlignConfig,
    pub anchors: Vec<DebugPair>,
    pub lexicon: LexiconDiagnostics,
    pub blocks_a: Vec<DebugBlock>,
    pub blocks_b: Vec<DebugBlock>,
    pub alignments: Vec<DebugPair>,
    pub variable_blocks_a: Vec<DebugBlock>,
    pub variable_blocks_b: Vec<DebugBlock>,
    pub fixed_pairs: Vec<DebugPair>,
    pub ranges: RangeResult,
    pub timed_out: bool,
}

impl AlignReport {
    /// Classifies every step of `alignment`. Source names, region and ranges
    /// are left for the caller to fill in.
    pub fn build(
        blocks_a: &[TextBlock],
        blocks_b: &[TextBlock],
        alignment: &Alignment,
        params: &AlignConfig,
    ) -> Self {
        let mut report = Self {
            params: params.clone(),
            lexicon: alignment.lexicon.clone(),
            blocks_a: blocks_a.iter().map(DebugBlock::from).collect(),
            blocks_b: blocks_b.iter().map(DebugBlock::from).collect(),
            ..Self::default()
        };

        report.anchors = alignment
            .anchors
            .iter()
            .filter(|a| a.a_index < blocks_a.len() && a.b_index < blocks_b.len())
            .map(|a| DebugPair {
                a_index: Some(a.a_index),
                b_index: Some(a.b_index),
                score: a.score,
                kind: PairKind::Anchor,
                word_score: Some(word_similarity(&blocks_a[a.a_index].text, &blocks_b[a.b_index].text)),
                a: Some(DebugBlock::from(&blocks_a[a.a_index])),
                b: Some(DebugBlock::from(&blocks_b[a.b_index])),
                segments: None,
            })
            .collect();

        for step in &alignment.pairs {
            let block_a = step.a_index.map(|i| &blocks_a[i]);
            let block_b = step.b_index.map(|j| &blocks_b[j]);
            let (kind, segments) = match (block_a, block_b) {
                (Some(a), Some(b)) if is_fixed_pair(a, b) => (PairKind::Fixed, None),
                (Some(a), Some(b)) => {
                    report.variable_blocks_a.push(DebugBlock::from(a));
                    report.variable_blocks_b.push(DebugBlock::from(b));
                    (PairKind::Variable, Some(PairSegments::compute(&a.text, &b.text)))
                }
                (Some(a), None) => {
                    report.variable_blocks_a.push(DebugBlock::from(a));
                    (PairKind::GapB, None)
                }
                (None, Some(b)) => {
                    report.variable_blocks_b.push(DebugBlock::from(b));
                    (PairKind::GapA, None)
                }
                (None, None) => continue,
            };
            let pair = DebugPair {
                a_index: step.a_index,
                b_index: step.b_index,
                score: step.score,
                kind,
                word_score: block_a.zip(block_b).map(|(a, b)| word_similarity(&a.text, &b.text)),
                a: block_a.map(DebugBlock::from),
                b: block_b.map(DebugBlock::from),
                segments,
            };
            if kind == PairKind::Fixed {
                report.fixed_pairs.push(pair.clone());
            }
            report.alignments.push(pair);
        }
        report
    }

    pub fn count(&self, kind: PairKind) -> usize {
        self.alignments.iter().filter(|p| p.kind == kind).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Fixed,
    Variable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairSegment {
    pub kind: SegmentKind,
    pub a: String,
    pub b: String,
}

/// Character-level split of two texts into shared and differing runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairSegments {
    pub segments: Vec<PairSegment>,
}

impl PairSegments {
    pub fn compute(a: &str, b: &str) -> Self {
        let diff = TextDiff::configure()
            .algorithm(Algorithm::Myers)
            .diff_chars(a, b);

        let mut runs: Vec<PairSegment> = Vec::new();
        for change in diff.iter_all_changes() {
            let kind = match change.tag() {
                ChangeTag::Equal => SegmentKind::Fixed,
                ChangeTag::Delete | ChangeTag::Insert => SegmentKind::Variable,
            };
            let value = change.value();
            if runs.last().map(|r| r.kind) != Some(kind) {
                runs.push(PairSegment {
                    kind,
                    a: String::new(),
                    b: String::new(),
                });
            }
            let Some(run) = runs.last_mut() else {
                continue;
            };
            match change.tag() {
                ChangeTag::Equal => {
                    run.a.push_str(value);
                    run.b.push_str(value);
                }
                ChangeTag::Delete => run.a.push_str(value),
                ChangeTag::Insert => run.b.push_str(value),
            }
        }

        let has_variable = |i: usize| runs.get(i).is_some_and(|r| r.kind == SegmentKind::Variable);
        let kinds: Vec<SegmentKind> = (0..runs.len())
            .map(|i| {
                let run = &runs[i];
                let short = run.kind == SegmentKind::Fixed && run.a.chars().count() < MIN_FIXED_CHARS;
                let beside_variable = (i > 0 && has_variable(i - 1)) || has_variable(i + 1);
                if short && beside_variable {
                    SegmentKind::Variable
                } else {
                    run.kind
                }
            })
            .collect();

        let mut segments: Vec<PairSegment> = Vec::with_capacity(runs.len());
        for (mut run, kind) in runs.into_iter().zip(kinds) {
            run.kind = kind;
            match segments.last_mut() {
                Some(last) if last.kind == run.kind => {
                    last.a.push_str(&run.a);
                    last.b.push_str(&run.b);
                }
                _ => segments.push(run),
            }
        }
        Self { segments }
    }

    pub fn fixed(&self) -> impl Iterator<Item = &str> + '_ {
        self.segments
            .iter()
            .filter(|s| s.kind == SegmentKind::Fixed)
            .map(|s| s.a.as_str())
    }

    pub fn variables(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.segments
            .iter()
            .filter(|s| s.kind == SegmentKind::Variable)
            .map(|s| (s.a.as_str(), s.b.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::align_blocks;
    use crate::lexicon::Lexicon;

    fn blocks(texts: &[&str]) -> Vec<TextBlock> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| TextBlock::from_text(i + 1, i + 1, i + 1, t.to_string(), t.to_string()))
            .collect()
    }

    #[test]
    fn segments_absorb_single_shared_characters() {
        let segments = PairSegments::compute("Nome: Ana", "Nome: Bia");
        assert_eq!(segments.fixed().collect::<Vec<_>>(), vec!["Nome: "]);
        assert_eq!(segments.variables().collect::<Vec<_>>(), vec![("Ana", "Bia")]);
    }

    #[test]
    fn identical_texts_are_one_fixed_segment() {
        let segments = PairSegments::compute("x", "x");
        assert_eq!(segments.segments.len(), 1);
        assert_eq!(segments.segments[0].kind, SegmentKind::Fixed);
        assert!(PairSegments::compute("", "").segments.is_empty());
    }

    #[test]
    fn report_classifies_steps() {
        let a = blocks(&["PROCESSO: 001", "VALOR: R$ 100,00", "Assinado eletronicamente"]);
        let b = blocks(&["PROCESSO: 001", "VALOR: R$ 250,00"]);
        let config = AlignConfig::default();
        let alignment = align_blocks(&a, &b, &Lexicon::default(), &config);
        let report = AlignReport::build(&a, &b, &alignment, &config);
        assert_eq!(report.count(PairKind::Fixed), 1);
        assert_eq!(report.count(PairKind::Variable), 1);
        assert_eq!(report.count(PairKind::GapB), 1);
        assert_eq!(report.fixed_pairs.len(), 1);
        assert_eq!(report.variable_blocks_a.len(), 2);
        assert_eq!(report.variable_blocks_b.len(), 1);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["alignments"][2]["kind"], "gap_b");
        assert!(json["alignments"][2].get("word_score").is_none());
        assert_eq!(report.alignments[0].word_score, Some(1.0));
    }

    fn render(segments: &PairSegments) -> String {
        segments
            .segments
            .iter()
            .map(|s| match s.kind {
                SegmentKind::Fixed => format!("fixed    {:?}", s.a),
                SegmentKind::Variable => format!("variable {:?} -> {:?}", s.a, s.b),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn snapshot_pair_segments() {
        let segments = PairSegments::compute("Nome: Ana", "Nome: Bia");
        insta::assert_snapshot!(render(&segments), @r###"
        fixed    "Nome: "
        variable "Ana" -> "Bia"
        "###);
    }
}
