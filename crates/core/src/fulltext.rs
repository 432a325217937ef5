//! Whole-stream text with the occurrence index of every character, used to
//! cut the text of a range back out of a stream.

use std::collections::VecDeque;

use crate::normalization::{normalize_full_text, normalize_whitespace};
use crate::payload::resolve_text;
use crate::segment::OperatorFilter;
use crate::tokenizer::{is_line_show_operator, is_text_show_operator, Token};

const MOVE_EPSILON: f64 = 0.01;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FullText {
    chars: Vec<char>,
    ops: Vec<usize>,
    /// Allowed text-showing occurrences seen while walking the stream.
    pub op_count: usize,
}

impl FullText {
    /// Walks the stream once, tagging each shown character with the 1-based
    /// index of its allowed occurrence. Line breaks become a single space.
    pub fn reconstruct(tokens: &[Token], decoded: &[String], filter: &OperatorFilter) -> Self {
        let mut out = Self::default();
        let mut queue: VecDeque<String> = decoded.iter().cloned().collect();
        let mut operands: Vec<Token> = Vec::new();
        let mut last_op = 0usize;
        let mut last_tm_y: Option<f64> = None;

        for token in tokens {
            if !token.is_operator() {
                operands.push(token.clone());
                continue;
            }
            let op = token.text.as_str();
            if is_text_show_operator(op) {
                let text = resolve_text(op, &operands, &mut queue);
                if filter.allows(op) {
                    out.op_count += 1;
                    out.push_str(&text, out.op_count);
                    last_op = out.op_count;
                }
                if is_line_show_operator(op) {
                    out.push_break(last_op);
                }
            } else {
                match op {
                    "T*" => out.push_break(last_op),
                    "Td" | "TD" if operands.len() >= 2 => {
                        if last_number(&operands).is_some_and(|ty| ty.abs() > MOVE_EPSILON) {
                            out.push_break(last_op);
                        }
                    }
                    "Tm" if operands.len() >= 6 => {
                        if let Some(y) = last_number(&operands) {
                            if last_tm_y.is_some_and(|prev| (y - prev).abs() > MOVE_EPSILON) {
                                out.push_break(last_op);
                            }
                            last_tm_y = Some(y);
                        }
                    }
                    _ => {}
                }
            }
            operands.clear();
        }

        if !decoded.is_empty() && out.op_count < decoded.len() {
            tracing::debug!(
                seen = out.op_count,
                decoded = decoded.len(),
                "rebuilding full text from decoded occurrences"
            );
            return Self::from_occurrences(decoded);
        }
        out
    }

    /// One occurrence per decoded text, each followed by a space.
    pub fn from_occurrences(decoded: &[String]) -> Self {
        let mut out = Self::default();
        for (i, text) in decoded.iter().enumerate() {
            out.push_str(text, i + 1);
            if !text.ends_with(char::is_whitespace) {
                out.chars.push(' ');
                out.ops.push(i + 1);
            }
        }
        out.op_count = decoded.len();
        out
    }

    fn push_str(&mut self, text: &str, op: usize) {
        for c in text.chars() {
            self.chars.push(c);
            self.ops.push(op);
        }
    }

    fn push_break(&mut self, op: usize) {
        if self.chars.last().is_some_and(|c| c.is_whitespace()) {
            return;
        }
        self.chars.push(' ');
        self.ops.push(op);
    }

    pub fn text(&self) -> String {
        self.chars.iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Characters whose occurrence index lies in `[start, end]`, with
    /// `start >= 1` and `end >= start` enforced.
    pub fn slice(&self, start: usize, end: usize) -> String {
        let start = start.max(1);
        let end = end.max(start);
        self.chars
            .iter()
            .zip(&self.ops)
            .filter(|(_, op)| (start..=end).contains(*op))
            .map(|(c, _)| *c)
            .collect()
    }

    /// Cleaned text of a range; empty when the range is unset.
    pub fn value_full(&self, start: usize, end: usize) -> String {
        if start == 0 || end == 0 {
            return String::new();
        }
        normalize_whitespace(&normalize_full_text(&self.slice(start, end)))
    }
}

fn last_number(operands: &[Token]) -> Option<f64> {
    operands.last().and_then(|t| t.text.parse::<f64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::tokenize;

    fn full(stream: &str) -> FullText {
        FullText::reconstruct(&tokenize(stream.as_bytes()), &[], &OperatorFilter::all())
    }

    #[test]
    fn characters_carry_their_occurrence() {
        let text = full("BT (Nome) Tj 0 -12 Td (Fulano) Tj ET");
        assert_eq!(text.op_count, 2);
        assert_eq!(text.text(), "Nome Fulano");
        assert_eq!(text.slice(2, 2), "Fulano");
        assert_eq!(text.slice(0, 0), "Nome ");
    }

    #[test]
    fn horizontal_moves_do_not_break() {
        let text = full("BT (AB) Tj 5 0 Td (CD) Tj ET");
        assert_eq!(text.text(), "ABCD");
    }

    #[test]
    fn breaks_collapse_to_one_space() {
        let text = full("BT (A) ' T* T* 1 0 0 1 10 700 Tm (B) Tj 1 0 0 1 10 680 Tm (C) Tj ET");
        assert_eq!(text.text(), "A B C");
    }

    #[test]
    fn filtered_occurrences_are_skipped() {
        let tokens = tokenize(b"BT (x) Tj [(y)] TJ ET");
        let text = FullText::reconstruct(&tokens, &[], &OperatorFilter::only(["TJ"]));
        assert_eq!(text.op_count, 1);
        assert_eq!(text.text(), "y");
    }

    #[test]
    fn decoded_surplus_rebuilds_from_occurrences() {
        let tokens = tokenize(b"BT (a) Tj ET");
        let decoded = vec!["um".to_string(), "dois ".to_string(), "tres".to_string()];
        let text = FullText::reconstruct(&tokens, &decoded, &OperatorFilter::all());
        assert_eq!(text.op_count, 3);
        assert_eq!(text.text(), "um dois tres ");
        assert_eq!(text.value_full(2, 3), "dois tres");
    }

    #[test]
    fn unset_range_has_no_value() {
        let text = full("BT (Valor) Tj ET");
        assert_eq!(text.value_full(0, 0), "");
        assert_eq!(text.value_full(1, 1), "Valor");
    }
}
