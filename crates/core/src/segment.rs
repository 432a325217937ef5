use std::collections::VecDeque;
use std::str::FromStr;

use indexmap::IndexSet;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::deadline::Deadline;
use crate::layout::{bounding_box, count_lines, regroup_lines, text_from_items, BoundingBox, TextItem};
use crate::normalization::{
    clean_fallback_line, fix_missing_spaces, normalize_full_text, normalize_whitespace,
};
use crate::payload::{chunks_for_occurrence, resolve_text};
use crate::source::DecodedText;
use crate::tokenizer::{is_line_show_operator, is_text_show_operator, Token};

/// Vertical movement (user-space units) that starts a new block.
pub const LINE_TOLERANCE: f64 = 0.1;
/// A token this long means words were glued together.
pub const GLUED_TOKEN_LEN: usize = 25;
/// Space density below which a segmentation needs spacing repair.
pub const MIN_SPACE_RATIO: f64 = 0.08;

/// A run of consecutive text-showing operators rendered as one logical line
/// or field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    /// 1-based position in its block list.
    pub index: usize,
    /// 1-based index of the first allowed text-showing occurrence.
    pub start_op: usize,
    pub end_op: usize,
    pub text: String,
    pub raw_text: String,
    pub raw_tokens: Vec<String>,
    pub pattern: String,
    pub max_token_len: usize,
    pub line_count: usize,
    pub ops_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
}

impl TextBlock {
    /// Block built from already cleaned text; pattern and token stats are
    /// derived from it.
    pub fn from_text(index: usize, start_op: usize, end_op: usize, text: String, raw_text: String) -> Self {
        let (pattern, max_token_len) = length_pattern(&text);
        let raw_tokens = raw_text.split_whitespace().map(str::to_string).collect();
        Self {
            index,
            start_op,
            end_op,
            text,
            raw_text,
            raw_tokens,
            pattern,
            max_token_len,
            line_count: 1,
            ops_label: "Tj".to_string(),
            bbox: None,
        }
    }
}

/// `1` for single-character tokens, `W` otherwise, plus the longest token.
pub fn length_pattern(text: &str) -> (String, usize) {
    text.split(' ')
        .filter(|t| !t.is_empty())
        .fold((String::new(), 0usize), |(mut pattern, max), token| {
            let len = token.chars().count();
            pattern.push(if len == 1 { '1' } else { 'W' });
            (pattern, max.max(len))
        })
}

/// Which text-showing operators take part in segmentation. Empty allows all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperatorFilter(FxHashSet<String>);

impl OperatorFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn only<I, S>(ops: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(ops.into_iter().map(Into::into).collect())
    }

    pub fn allows(&self, op: &str) -> bool {
        self.0.is_empty() || self.0.contains(op)
    }
}

impl FromStr for OperatorFilter {
    type Err = std::convert::Infallible;

    /// Comma or whitespace separated operator names, e.g. `Tj,TJ`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::only(
            s.split(|c: char| c == ',' || c.is_whitespace())
                .map(str::trim)
                .filter(|op| !op.is_empty()),
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStrategy {
    Operators,
    ExtractedText,
    PositionedItems,
    SingleBlock,
}

#[derive(Debug, Clone)]
pub struct SegmentOptions {
    pub filter: OperatorFilter,
    pub allow_spacing_fix: bool,
    pub deadline: Deadline,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self {
            filter: OperatorFilter::all(),
            allow_spacing_fix: true,
            deadline: Deadline::none(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Segmentation {
    pub blocks: Vec<TextBlock>,
    /// Allowed text-showing occurrences seen in the stream.
    pub text_op_count: usize,
    pub strategy: SegmentStrategy,
    pub timed_out: bool,
}

#[derive(Default)]
struct BlockBuilder {
    tokens: Vec<String>,
    ops: Vec<String>,
    items: Vec<TextItem>,
    start_op: usize,
    end_op: usize,
}

impl BlockBuilder {
    fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    fn flush(&mut self, blocks: &mut Vec<TextBlock>) {
        if self.tokens.is_empty() {
            return;
        }
        let tokens = std::mem::take(&mut self.tokens);
        let ops = std::mem::take(&mut self.ops);
        let items = std::mem::take(&mut self.items);

        let raw_text = tokens.concat();
        let has_pos = items.iter().any(TextItem::has_extent);
        let positioned = if has_pos {
            text_from_items(&items)
        } else {
            String::new()
        };
        let text = if positioned.trim().is_empty() {
            raw_text.clone()
        } else {
            positioned
        };
        if text.trim().is_empty() {
            return;
        }
        let text = normalize_full_text(&text);
        let (pattern, max_token_len) = length_pattern(&text);
        if pattern.is_empty() {
            return;
        }
        let ops_label = ops
            .iter()
            .map(String::as_str)
            .collect::<IndexSet<&str>>()
            .into_iter()
            .collect::<Vec<_>>()
            .join(",");
        blocks.push(TextBlock {
            index: blocks.len() + 1,
            start_op: self.start_op,
            end_op: self.end_op,
            text,
            raw_text,
            raw_tokens: tokens,
            pattern,
            max_token_len,
            line_count: if has_pos { count_lines(&items) } else { 1 },
            ops_label,
            bbox: bounding_box(&items),
        });
    }
}

/// Tracks the text line matrix y so that cursor moves can end a block.
#[derive(Default)]
struct CursorTracker {
    y: Option<f64>,
}

impl CursorTracker {
    fn should_flush(&mut self, op: &str, operands: &[Token]) -> bool {
        match op {
            "BT" | "T*" => {
                self.y = None;
                true
            }
            "ET" => true,
            "Tm" if operands.len() >= 6 => match last_number(operands) {
                Some(y) => {
                    let changed = self.y.is_some_and(|cur| (y - cur).abs() > LINE_TOLERANCE);
                    self.y = Some(y);
                    changed
                }
                None => false,
            },
            "Td" | "TD" if operands.len() >= 2 => match last_number(operands) {
                Some(ty) => {
                    let new_y = self.y.map_or(ty, |cur| cur + ty);
                    let changed = self.y.is_some_and(|cur| (new_y - cur).abs() > LINE_TOLERANCE);
                    self.y = Some(new_y);
                    changed
                }
                None => false,
            },
            _ => false,
        }
    }
}

fn last_number(operands: &[Token]) -> Option<f64> {
    operands.last().and_then(|t| t.text.parse::<f64>().ok())
}

/// Groups the text-showing occurrences of a tokenized stream into blocks,
/// falling back to whole-stream text or positioned items when the result
/// looks badly spaced or degenerate.
pub fn segment(tokens: &[Token], decoded: &DecodedText, options: &SegmentOptions) -> Segmentation {
    let mut queue: VecDeque<String> = decoded.occurrences.iter().cloned().collect();
    let mut item_queue: VecDeque<TextItem> = decoded.items.iter().cloned().collect();
    let mut blocks = Vec::new();
    let mut builder = BlockBuilder::default();
    let mut cursor = CursorTracker::default();
    let mut operands: Vec<Token> = Vec::new();
    let mut text_op_index = 0usize;
    let mut seen_ops = 0usize;
    let mut timed_out = false;

    for token in tokens {
        if options.deadline.expired() {
            timed_out = true;
            break;
        }
        if !token.is_operator() {
            operands.push(token.clone());
            continue;
        }
        let op = token.text.as_str();
        if is_text_show_operator(op) {
            seen_ops += 1;
            let text = resolve_text(op, &operands, &mut queue);
            if options.filter.allows(op) {
                text_op_index += 1;
                if builder.is_empty() {
                    builder.start_op = text_op_index;
                }
                builder.end_op = text_op_index;
                let wanted = chunks_for_occurrence(op, &operands);
                let before = builder.items.len();
                for _ in 0..wanted {
                    match item_queue.pop_front() {
                        Some(item) => builder.items.push(item),
                        None => break,
                    }
                }
                if builder.items.len() == before && !text.trim().is_empty() {
                    builder.items.push(TextItem::unboxed(text.clone()));
                }
                builder.tokens.push(text);
                builder.ops.push(op.to_string());
            }
            if is_line_show_operator(op) {
                builder.flush(&mut blocks);
            }
        } else if cursor.should_flush(op, &operands) {
            builder.flush(&mut blocks);
        }
        operands.clear();
    }
    builder.flush(&mut blocks);

    let result = |blocks, strategy| Segmentation {
        blocks,
        text_op_count: text_op_index,
        strategy,
        timed_out,
    };

    if timed_out {
        tracing::warn!(blocks = blocks.len(), "[timeout] segmentation stopped early");
        return result(blocks, SegmentStrategy::Operators);
    }

    if options.allow_spacing_fix && needs_spacing_fix(&blocks) {
        let from_text = blocks_from_extracted_text(decoded.stream_text.as_deref());
        if !from_text.is_empty() {
            tracing::debug!(blocks = from_text.len(), "spacing repair: using extracted text");
            return result(from_text, SegmentStrategy::ExtractedText);
        }
        let from_items = blocks_from_items(&decoded.items);
        if !from_items.is_empty() {
            tracing::debug!(blocks = from_items.len(), "spacing repair: regrouping items");
            return result(from_items, SegmentStrategy::PositionedItems);
        }
    }

    if blocks.len() <= 1 {
        if blocks.len() == 1 && count_spaces(&blocks[0].text) < 5 {
            let from_text = blocks_from_extracted_text(decoded.stream_text.as_deref());
            if from_text.len() > blocks.len() {
                return result(from_text, SegmentStrategy::ExtractedText);
            }
        }
        let from_items = blocks_from_items(&decoded.items);
        if from_items.len() > blocks.len() {
            return result(from_items, SegmentStrategy::PositionedItems);
        }
    }

    // Readable TJ arrays leave their chunk queued; compare counts instead.
    if !decoded.occurrences.is_empty() && seen_ops < decoded.occurrences.len() {
        tracing::debug!(
            seen = seen_ops,
            decoded = decoded.occurrences.len(),
            "decoded text outnumbers stream occurrences; using a single block"
        );
        let single = single_block(&decoded.occurrences);
        return result(single, SegmentStrategy::SingleBlock);
    }

    result(blocks, SegmentStrategy::Operators)
}

/// True when the blocks look glued together: a very long token, or too few
/// spaces across a non-trivial amount of text.
pub fn needs_spacing_fix(blocks: &[TextBlock]) -> bool {
    let mut total_len = 0usize;
    let mut total_spaces = 0usize;
    for block in blocks.iter().filter(|b| !b.text.trim().is_empty()) {
        if block.max_token_len >= GLUED_TOKEN_LEN {
            return true;
        }
        total_len += block.text.chars().count();
        total_spaces += count_spaces(&block.text);
    }
    if total_len < 20 {
        return false;
    }
    total_spaces == 0 || (total_spaces as f64 / total_len as f64) < MIN_SPACE_RATIO
}

fn count_spaces(text: &str) -> usize {
    text.chars().filter(|c| *c == ' ').count()
}

/// One block per non-empty line of the whole-stream text.
pub fn blocks_from_extracted_text(text: Option<&str>) -> Vec<TextBlock> {
    let Some(text) = text else {
        return Vec::new();
    };
    text.replace('\r', "\n")
        .split('\n')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter_map(|line| {
            let cleaned = clean_fallback_line(line);
            (!cleaned.trim().is_empty()).then(|| (cleaned, normalize_whitespace(line)))
        })
        .enumerate()
        .map(|(i, (text, raw))| TextBlock::from_text(i + 1, i + 1, i + 1, text, raw))
        .collect()
}

/// One block per visual line of the positioned items.
pub fn blocks_from_items(items: &[TextItem]) -> Vec<TextBlock> {
    regroup_lines(items)
        .into_iter()
        .filter_map(|(raw_line, x_min, x_max)| {
            let cleaned = clean_fallback_line(&raw_line);
            (!cleaned.trim().is_empty()).then(|| (cleaned, normalize_whitespace(&raw_line), x_min, x_max))
        })
        .enumerate()
        .map(|(i, (text, raw, x_min, x_max))| {
            let mut block = TextBlock::from_text(i + 1, i + 1, i + 1, text, raw);
            block.bbox = Some(BoundingBox {
                x_min,
                y_min: 0.0,
                x_max,
                y_max: 0.0,
            });
            block
        })
        .collect()
}

fn single_block(occurrences: &[String]) -> Vec<TextBlock> {
    let joined = occurrences.join(" ");
    let cleaned = normalize_whitespace(&fix_missing_spaces(&joined));
    if cleaned.trim().is_empty() {
        return Vec::new();
    }
    vec![TextBlock::from_text(
        1,
        1,
        occurrences.len().max(1),
        cleaned,
        normalize_whitespace(&joined),
    )]
}

/// Words (at least four characters, not all digits) usable to re-space text
/// of a sibling document, longest first.
pub fn vocabulary(blocks: &[TextBlock]) -> Vec<String> {
    let mut seen: FxHashSet<String> = FxHashSet::default();
    let mut words: Vec<String> = Vec::new();
    for block in blocks {
        for word in block
            .text
            .split(|c: char| !(c.is_ascii_alphanumeric() || ('\u{C0}'..='\u{FF}').contains(&c)))
        {
            if word.chars().count() < 4 || word.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            if seen.insert(word.to_lowercase()) {
                words.push(word.to_string());
            }
        }
    }
    words.sort_by_key(|w| std::cmp::Reverse(w.chars().count()));
    words
}

/// Inserts spaces where a known word is glued to neighbouring letters.
pub fn respace_with_vocabulary(blocks: &[TextBlock], words: &[String]) -> Vec<TextBlock> {
    if words.is_empty() {
        return blocks.to_vec();
    }
    blocks
        .iter()
        .map(|block| {
            let text = words
                .iter()
                .fold(block.text.clone(), |acc, word| space_around(&acc, word));
            if text == block.text {
                return block.clone();
            }
            let (pattern, max_token_len) = length_pattern(&text);
            TextBlock {
                text,
                pattern,
                max_token_len,
                ..block.clone()
            }
        })
        .collect()
}

fn space_around(text: &str, word: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let needle: Vec<char> = word.chars().collect();
    let n = needle.len();
    if n == 0 || n > chars.len() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len() + 4);
    let mut i = 0usize;
    while i < chars.len() {
        let hit = i + n <= chars.len()
            && chars[i..i + n]
                .iter()
                .zip(&needle)
                .all(|(a, b)| a.to_lowercase().eq(b.to_lowercase()));
        if hit {
            if i > 0 && chars[i - 1].is_alphabetic() {
                out.push(' ');
            }
            out.extend(&chars[i..i + n]);
            if chars.get(i + n).is_some_and(|c| c.is_alphabetic()) {
                out.push(' ');
            }
            i += n;
            continue;
        }
        out.push(chars[i]);
        i += 1;
    }
    normalize_whitespace(&out)
}
