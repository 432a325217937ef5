use std::collections::VecDeque;

use crate::tokenizer::{Token, TokenKind};

/// Kerning at or below this value is rendered as a word space (strict pass).
pub const STRICT_SPACE_THRESHOLD: f64 = -120.0;
/// Permissive word-space threshold for array-form text.
pub const LOOSE_SPACE_THRESHOLD: f64 = -20.0;
/// Above this share of one-character tokens a reconstruction counts as broken.
pub const WEIRD_SPACING_LIMIT: f64 = 0.85;

#[derive(Debug, Clone, PartialEq)]
enum ArrayPart {
    Text(String),
    Adjust(f64),
}

/// Decoded text for one text-showing occurrence.
///
/// `queue` holds externally decoded chunks in stream order; it is consumed
/// as occurrences are resolved and the raw operand is decoded once it runs
/// dry.
pub fn resolve_text(op: &str, operands: &[Token], queue: &mut VecDeque<String>) -> String {
    if queue.is_empty() {
        return raw_operand_text(op, operands);
    }
    if op != "TJ" {
        return queue.pop_front().unwrap_or_default();
    }
    let Some(array) = array_operand(operands) else {
        return queue.pop_front().unwrap_or_default();
    };
    let spaced = best_spaced_array_text(array);
    if weird_spacing_ratio(&spaced) > WEIRD_SPACING_LIMIT && !queue.is_empty() {
        let chunks = count_text_chunks(array).max(1);
        let joined = dequeue_joined(queue, chunks);
        if !joined.trim().is_empty() {
            return joined;
        }
    }
    spaced
}

/// Decodes the operand of a text-showing operator without any font
/// information.
pub fn raw_operand_text(op: &str, operands: &[Token]) -> String {
    if op == "TJ" {
        return array_operand(operands)
            .map(|array| array_text(array, None))
            .unwrap_or_default();
    }
    operands
        .iter()
        .rev()
        .find_map(|t| match t.kind {
            TokenKind::LiteralString => Some(unwrap_literal(&t.text).to_string()),
            TokenKind::HexString => Some(decode_hex(&t.text)),
            _ => None,
        })
        .unwrap_or_default()
}

/// Number of literal and hex pieces in an array operand.
pub fn count_text_chunks(array: &str) -> usize {
    parse_array(array)
        .iter()
        .filter(|p| matches!(p, ArrayPart::Text(_)))
        .count()
}

/// How many decoded items an occurrence owns.
pub fn chunks_for_occurrence(op: &str, operands: &[Token]) -> usize {
    if op == "TJ" {
        array_operand(operands)
            .map(count_text_chunks)
            .unwrap_or(1)
            .max(1)
    } else {
        1
    }
}

/// Concatenates the text pieces of an array operand, inserting a space for
/// every adjustment at or below `threshold`.
pub fn array_text(array: &str, threshold: Option<f64>) -> String {
    let mut out = String::new();
    for part in parse_array(array) {
        match part {
            ArrayPart::Text(text) => out.push_str(&text),
            ArrayPart::Adjust(n) => {
                if threshold.is_some_and(|t| n <= t) {
                    out.push(' ');
                }
            }
        }
    }
    out
}

/// Picks between the strict and loose spacing reconstructions.
pub fn best_spaced_array_text(array: &str) -> String {
    let raw = array_text(array, None);
    let strict = or_raw(array_text(array, Some(STRICT_SPACE_THRESHOLD)), &raw);
    let loose = or_raw(array_text(array, Some(LOOSE_SPACE_THRESHOLD)), &raw);
    let ra = weird_spacing_ratio(&strict);
    let rb = weird_spacing_ratio(&loose);
    if rb < ra - 0.05 {
        return loose;
    }
    if ra < rb - 0.05 {
        return strict;
    }
    if count_spaces(&loose) > count_spaces(&strict) {
        loose
    } else {
        strict
    }
}

/// Share of whitespace-separated tokens that are a single letter or digit.
pub fn weird_spacing_ratio(text: &str) -> f64 {
    let mut total = 0usize;
    let mut single = 0usize;
    for token in text.split_whitespace() {
        total += 1;
        let mut chars = token.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            if c.is_alphanumeric() {
                single += 1;
            }
        }
    }
    if total == 0 {
        0.0
    } else {
        single as f64 / total as f64
    }
}

/// Strips the outer parentheses of a literal string; escapes are kept.
pub fn unwrap_literal(token: &str) -> &str {
    if token.len() >= 2 && token.starts_with('(') && token.ends_with(')') {
        &token[1..token.len() - 1]
    } else {
        token
    }
}

/// Decodes `<hex>` as ISO-8859-1. Odd lengths are padded with `0`; pairs that
/// are not hex become a space.
pub fn decode_hex(token: &str) -> String {
    if token.chars().count() < 2 {
        return String::new();
    }
    let mut hex: Vec<char> = token.trim_matches(|c| c == '<' || c == '>').chars().collect();
    if hex.len() % 2 != 0 {
        hex.push('0');
    }
    hex.chunks(2)
        .map(|pair| {
            let s: String = pair.iter().collect();
            u8::from_str_radix(&s, 16).unwrap_or(0x20) as char
        })
        .collect()
}

fn or_raw(text: String, raw: &str) -> String {
    if text.trim().is_empty() {
        raw.to_string()
    } else {
        text
    }
}

fn count_spaces(text: &str) -> usize {
    text.chars().filter(|c| *c == ' ').count()
}

fn dequeue_joined(queue: &mut VecDeque<String>, count: usize) -> String {
    let mut out = String::new();
    for _ in 0..count {
        match queue.pop_front() {
            Some(chunk) => out.push_str(&chunk),
            None => break,
        }
    }
    out
}

fn array_operand(operands: &[Token]) -> Option<&str> {
    operands
        .iter()
        .find(|t| t.kind == TokenKind::Array)
        .map(|t| t.text.as_str())
        .filter(|s| !s.trim().is_empty())
}

fn parse_array(array: &str) -> Vec<ArrayPart> {
    let chars: Vec<char> = array.chars().collect();
    let mut parts = Vec::new();
    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '(' => {
                let start = i;
                let mut depth = 1usize;
                i += 1;
                while i < chars.len() && depth > 0 {
                    match chars[i] {
                        '\\' => {
                            i += 2;
                            continue;
                        }
                        '(' => depth += 1,
                        ')' => depth -= 1,
                        _ => {}
                    }
                    i += 1;
                }
                i = i.min(chars.len());
                let literal: String = chars[start..i].iter().collect();
                parts.push(ArrayPart::Text(unwrap_literal(&literal).to_string()));
            }
            '<' => {
                let start = i;
                while i < chars.len() && chars[i] != '>' {
                    i += 1;
                }
                if i < chars.len() {
                    i += 1;
                }
                let hex: String = chars[start..i].iter().collect();
                parts.push(ArrayPart::Text(decode_hex(&hex)));
            }
            '+' | '-' | '.' | '0'..='9' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_digit() || matches!(chars[i], '+' | '-' | '.' | 'e' | 'E'))
                {
                    i += 1;
                }
                let number: String = chars[start..i].iter().collect();
                if let Ok(n) = number.parse::<f64>() {
                    parts.push(ArrayPart::Adjust(n));
                }
            }
            _ => i += 1,
        }
    }
    parts
}
