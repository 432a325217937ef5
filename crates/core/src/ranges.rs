use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::align::BlockAlignment;
use crate::error::TmplDiffError;
use crate::normalization::comparison_form;
use crate::segment::TextBlock;
use crate::tokenizer::{is_text_show_operator, Token};

/// Span of text-showing occurrences covered by variable blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableRange {
    pub has_value: bool,
    pub first_start_op: usize,
    pub last_end_op: usize,
}

impl VariableRange {
    pub fn add_block(self, block: &TextBlock) -> Self {
        if !self.has_value {
            return Self {
                has_value: true,
                first_start_op: block.start_op,
                last_end_op: block.end_op,
            };
        }
        Self {
            last_end_op: self.last_end_op.max(block.end_op),
            ..self
        }
    }

    /// First block start to last block end; empty for no blocks.
    pub fn full_span(blocks: &[TextBlock]) -> Self {
        match (blocks.first(), blocks.last()) {
            (Some(first), Some(last)) => Self {
                has_value: true,
                first_start_op: first.start_op,
                last_end_op: last.end_op,
            },
            _ => Self::default(),
        }
    }

    /// `(0, 0)` without a value; otherwise the start moved back by
    /// `backoff` occurrences, never below 1, and an end no smaller than it.
    pub fn apply_backoff(&self, backoff: usize) -> (usize, usize) {
        if !self.has_value {
            return (0, 0);
        }
        let start = self.first_start_op.saturating_sub(backoff).max(1);
        let end = self.last_end_op.max(start);
        (start, end)
    }
}

/// Which end of a document a region covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionMode {
    #[default]
    FrontHead,
    BackTail,
}

impl RegionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegionMode::FrontHead => "front_head",
            RegionMode::BackTail => "back_tail",
        }
    }
}

impl fmt::Display for RegionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegionMode {
    type Err = TmplDiffError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "front_head" | "front" | "head" => Ok(RegionMode::FrontHead),
            "back_tail" | "back" | "tail" => Ok(RegionMode::BackTail),
            other => Err(TmplDiffError::UnknownRegion(other.to_string())),
        }
    }
}

/// True when a matched pair carries the same template text.
pub fn is_fixed_pair(a: &TextBlock, b: &TextBlock) -> bool {
    comparison_form(&a.text) == comparison_form(&b.text)
}

/// Folds every variable block of the alignment into its side's range.
pub fn variable_ranges(
    pairs: &[BlockAlignment],
    blocks_a: &[TextBlock],
    blocks_b: &[TextBlock],
) -> (VariableRange, VariableRange) {
    pairs.iter().fold(
        (VariableRange::default(), VariableRange::default()),
        |(range_a, range_b), pair| match (pair.a_index, pair.b_index) {
            (Some(i), Some(j)) => {
                let (a, b) = (&blocks_a[i], &blocks_b[j]);
                if is_fixed_pair(a, b) {
                    (range_a, range_b)
                } else {
                    (range_a.add_block(a), range_b.add_block(b))
                }
            }
            (Some(i), None) => (range_a.add_block(&blocks_a[i]), range_b),
            (None, Some(j)) => (range_a, range_b.add_block(&blocks_b[j])),
            (None, None) => (range_a, range_b),
        },
    )
}

/// Final `(start, end)` of one side for a region.
///
/// `back_tail` stretches a found range to the last block and to the
/// stream's total occurrence count. Sides without variable blocks fall back
/// to the full block span.
pub fn region_range(
    range: VariableRange,
    blocks: &[TextBlock],
    total_text_ops: usize,
    mode: RegionMode,
    backoff: usize,
) -> (usize, usize) {
    let mut range = range;
    if mode == RegionMode::BackTail {
        if let (true, Some(last)) = (range.has_value, blocks.last()) {
            range.last_end_op = last.end_op;
        }
    }
    if !range.has_value {
        range = VariableRange::full_span(blocks);
    }
    if mode == RegionMode::BackTail && range.has_value && total_text_ops > range.last_end_op {
        range.last_end_op = total_text_ops;
    }
    range.apply_backoff(backoff)
}

/// First block start to last block end, used when only one document is
/// at hand.
pub fn full_range(blocks: &[TextBlock]) -> Option<(usize, usize)> {
    let span = VariableRange::full_span(blocks);
    span.has_value.then_some((span.first_start_op, span.last_end_op))
}

/// Every text-showing occurrence of a token stream, filtered or not.
pub fn total_text_ops(tokens: &[Token]) -> usize {
    tokens
        .iter()
        .filter(|t| t.is_operator() && is_text_show_operator(&t.text))
        .count()
}

/// One side of a region: its occurrence range and reconstructed text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub start_op: usize,
    pub end_op: usize,
    pub value_full: String,
}

impl RangeValue {
    pub fn is_empty(&self) -> bool {
        self.start_op == 0 && self.end_op == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeResult {
    pub a: RangeValue,
    pub b: RangeValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(index: usize, start: usize, end: usize, text: &str) -> TextBlock {
        TextBlock::from_text(index, start, end, text.to_string(), text.to_string())
    }

    #[test]
    fn fold_keeps_first_start_and_max_end() {
        let range = VariableRange::default()
            .add_block(&block(1, 4, 6, "x"))
            .add_block(&block(2, 2, 3, "y"));
        assert_eq!(
            range,
            VariableRange {
                has_value: true,
                first_start_op: 4,
                last_end_op: 6
            }
        );
    }

    #[test]
    fn backoff_is_clamped() {
        assert_eq!(VariableRange::default().apply_backoff(2), (0, 0));
        let range = VariableRange {
            has_value: true,
            first_start_op: 2,
            last_end_op: 1,
        };
        assert_eq!(range.apply_backoff(5), (1, 1));
        let range = VariableRange {
            has_value: true,
            first_start_op: 10,
            last_end_op: 12,
        };
        assert_eq!(range.apply_backoff(2), (8, 12));
    }

    #[test]
    fn fixed_pairs_do_not_contribute() {
        let a = vec![block(1, 1, 1, "PROCESSO: 001"), block(2, 2, 3, "VALOR: R$ 100,00")];
        let b = vec![block(1, 1, 1, "PROCESSO: 001"), block(2, 2, 2, "VALOR: R$ 250,00")];
        let pairs = vec![BlockAlignment::matched(0, 0, 1.0), BlockAlignment::matched(1, 1, 1.0)];
        let (ra, rb) = variable_ranges(&pairs, &a, &b);
        assert_eq!((ra.first_start_op, ra.last_end_op), (2, 3));
        assert_eq!((rb.first_start_op, rb.last_end_op), (2, 2));
    }

    #[test]
    fn gaps_fold_into_their_side() {
        let a = vec![block(1, 1, 1, "x"), block(2, 5, 7, "extra")];
        let b = vec![block(1, 1, 1, "x")];
        let pairs = vec![BlockAlignment::matched(0, 0, 1.0), BlockAlignment::only_a(1)];
        let (ra, rb) = variable_ranges(&pairs, &a, &b);
        assert_eq!(ra.apply_backoff(0), (5, 7));
        assert!(!rb.has_value);
    }

    #[test]
    fn back_tail_extends_to_stream_end() {
        let blocks = vec![block(1, 1, 2, "a"), block(2, 3, 4, "b"), block(3, 5, 6, "c")];
        let range = VariableRange::default().add_block(&blocks[1]);
        assert_eq!(region_range(range, &blocks, 9, RegionMode::FrontHead, 0), (3, 4));
        assert_eq!(region_range(range, &blocks, 9, RegionMode::BackTail, 0), (3, 9));
        assert_eq!(region_range(range, &blocks, 0, RegionMode::BackTail, 1), (2, 6));
        assert_eq!(
            region_range(VariableRange::default(), &blocks, 0, RegionMode::FrontHead, 0),
            (1, 6)
        );
        assert_eq!(region_range(VariableRange::default(), &[], 4, RegionMode::BackTail, 0), (0, 0));
    }

    #[test]
    fn region_mode_parses_aliases() {
        assert_eq!("back-tail".parse::<RegionMode>().unwrap(), RegionMode::BackTail);
        assert_eq!("front_head".parse::<RegionMode>().unwrap(), RegionMode::FrontHead);
        assert!("middle".parse::<RegionMode>().is_err());
        assert_eq!(RegionMode::BackTail.to_string(), "back_tail");
    }

    #[test]
    fn full_range_spans_all_blocks() {
        assert_eq!(full_range(&[]), None);
        let blocks = vec![block(1, 2, 3, "a"), block(2, 4, 8, "b")];
        assert_eq!(full_range(&blocks), Some((2, 8)));
    }
}
