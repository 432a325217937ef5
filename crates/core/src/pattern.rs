//! Compact type-tagged encodings of block text, used to group blocks with
//! the same shape across documents.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::layout::BoundingBox;
use crate::normalization::{normalize_pattern_text, remove_diacritics};
use crate::segment::TextBlock;

const PARTICLES: &[&str] = &[
    "da", "de", "do", "dos", "das", "e", "em", "no", "na", "nos", "nas", "ao", "aos", "a", "o",
    "nº", "n°", "n.", "nr", "n", "art", "sr", "sra", "sr.", "sra.",
];

const MONTHS: &[&str] = &[
    "janeiro", "fevereiro", "marco", "abril", "maio", "junho", "julho", "agosto", "setembro",
    "outubro", "novembro", "dezembro",
];

static MONEY_JUNK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\d.,\-\s]+").unwrap());
static MONEY_DECIMALS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[,.](\d{1,2})$").unwrap());
static NUMERIC_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})([/-])(\d{1,2})([/-])(\d{2}|\d{4})$").unwrap());
static ISO_DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$").unwrap());
static WRITTEN_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})\s+de\s+([a-zç]+)\s+de\s+(\d{4})\b").unwrap());

/// A block in the shape the `pattern` report lists it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternBlock {
    pub index: usize,
    pub start_op: usize,
    pub end_op: usize,
    pub text: String,
    pub raw_text: String,
    pub pattern: String,
    pub pattern_typed: String,
    pub max_token_len: usize,
    pub line_count: usize,
    pub ops_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
}

impl From<&TextBlock> for PatternBlock {
    fn from(block: &TextBlock) -> Self {
        let text = normalize_pattern_text(&block.text);
        let pattern_typed = encode_pattern_typed(&text);
        Self {
            index: block.index,
            start_op: block.start_op,
            end_op: block.end_op,
            text,
            raw_text: block.raw_text.clone(),
            pattern: block.pattern.clone(),
            pattern_typed,
            max_token_len: block.max_token_len,
            line_count: block.line_count,
            ops_label: block.ops_label.clone(),
            bbox: block.bbox,
        }
    }
}

pub fn pattern_blocks(blocks: &[TextBlock]) -> Vec<PatternBlock> {
    blocks.iter().map(PatternBlock::from).collect()
}

/// `:` for a lone colon, `1` for single-character tokens, `W` otherwise.
pub fn encode_pattern_simple(text: &str) -> String {
    normalize_pattern_text(text)
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(|t| {
            if t == ":" {
                ':'
            } else if t.chars().count() == 1 {
                '1'
            } else {
                'W'
            }
        })
        .collect()
}

/// One type code per token of the repaired text.
pub fn encode_pattern_typed(text: &str) -> String {
    normalize_pattern_text(text)
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(classify_token)
        .collect()
}

fn classify_token(token: &str) -> String {
    let raw = token.trim();
    if raw.is_empty() {
        return "S".to_string();
    }
    if raw == ":" {
        return ":".to_string();
    }
    let has_colon = raw.ends_with(':');
    let raw = raw.strip_suffix(':').unwrap_or(raw);
    if raw.contains('@') && raw.contains('.') {
        return "E".to_string();
    }
    if raw.to_uppercase().starts_with("R$") {
        return "V".to_string();
    }
    let tagged = |code: &str, size: char| {
        let mut out = format!("{code}{size}");
        if has_colon {
            out.push(':');
        }
        out
    };
    if is_numero_marker(raw) {
        return tagged("R", size_suffix(raw));
    }

    let core = raw.trim_matches(is_edge_punct);
    if core.is_empty() {
        return "S".to_string();
    }
    let size = size_suffix(core);
    if let Some(ordinal) = ordinal_suffix(core) {
        let mut out = format!("N{size}{ordinal}");
        if has_colon {
            out.push(':');
        }
        return out;
    }
    let digits = core.chars().filter(char::is_ascii_digit).count();
    match digits {
        11 => return tagged("F", size),
        14 => return tagged("J", size),
        16 | 20 => return tagged("Q", size),
        _ => {}
    }
    if looks_like_money(raw) && parse_money(raw).is_some() {
        return tagged("V", size);
    }
    if parse_date(raw).is_some() {
        return tagged("A", size);
    }
    if PARTICLES.contains(&core.to_lowercase().as_str()) {
        return tagged("P", size);
    }

    let has_digit = core.chars().any(|c| c.is_ascii_digit());
    let has_letter = core.chars().any(char::is_alphabetic);
    let has_upper = core.chars().any(|c| c.is_alphabetic() && c.is_uppercase());
    let has_lower = core.chars().any(|c| c.is_alphabetic() && c.is_lowercase());
    let code = match (has_letter, has_digit) {
        (false, true) => "N",
        (true, false) if has_upper && !has_lower => "U",
        (true, false) if has_lower && !has_upper => "L",
        (true, false) if is_title_case(core) => "T",
        (true, _) => "M",
        (false, false) => "S",
    };
    tagged(code, size)
}

fn size_suffix(token: &str) -> char {
    if token.chars().count() <= 1 {
        '1'
    } else {
        '2'
    }
}

fn is_numero_marker(token: &str) -> bool {
    matches!(token.to_lowercase().as_str(), "nº" | "n°" | "n.")
}

fn is_edge_punct(c: char) -> bool {
    !c.is_alphanumeric() && !c.is_whitespace()
}

fn ordinal_suffix(token: &str) -> Option<char> {
    let mut chars: Vec<char> = token.chars().collect();
    if chars.len() < 2 {
        return None;
    }
    let last = chars.pop()?;
    if !chars.iter().all(char::is_ascii_digit) {
        return None;
    }
    match last {
        'ª' | 'a' | 'A' => Some('a'),
        'º' | 'o' | 'O' => Some('o'),
        _ => None,
    }
}

fn is_title_case(token: &str) -> bool {
    let mut letters = token.chars().filter(|c| c.is_alphabetic());
    match letters.next() {
        Some(first) if first.is_uppercase() => letters.all(|c| !c.is_uppercase()),
        _ => false,
    }
}

fn looks_like_money(raw: &str) -> bool {
    raw.to_uppercase().contains("R$") || raw.contains(',')
}

/// Lenient currency parser for amounts like `R$ 1.234,56` or OCR-broken
/// `45 0, 00`. A trailing separator followed by one or two digits is the
/// decimal part.
pub fn parse_money(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().replace('\u{00A0}', " ");
    let cleaned = MONEY_JUNK_RE.replace_all(&cleaned, "");
    let mut cleaned: String = cleaned.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return None;
    }
    let mut sign = 1.0;
    if cleaned.starts_with('-') {
        sign = -1.0;
        cleaned = cleaned.trim_start_matches('-').to_string();
    }
    if cleaned.is_empty() {
        return None;
    }
    let digits_of = |s: &str| s.chars().filter(char::is_ascii_digit).collect::<String>();
    let canonical = match MONEY_DECIMALS_RE.captures(&cleaned) {
        Some(caps) => {
            let whole = caps.get(0)?;
            let decimals = format!("{:0<2}", &caps[1]);
            let mut integer = digits_of(&cleaned[..whole.start()]);
            if integer.is_empty() {
                integer.push('0');
            }
            format!("{integer}.{decimals}")
        }
        None => {
            let integer = digits_of(&cleaned);
            if integer.is_empty() {
                return None;
            }
            integer
        }
    };
    canonical.parse::<f64>().ok().map(|v| v * sign)
}

/// Parses `dd/mm/yyyy`, `d/m/yy`, the `-` variants, `yyyy-mm-dd` and
/// `10 de março de 2024`, returning `yyyy-mm-dd`.
pub fn parse_date(raw: &str) -> Option<String> {
    let r = raw.trim();
    if r.is_empty() {
        return None;
    }
    if let Some(caps) = ISO_DATE_RE.captures(r) {
        return iso_date(caps[1].parse().ok()?, caps[2].parse().ok()?, caps[3].parse().ok()?);
    }
    if let Some(caps) = NUMERIC_DATE_RE.captures(r) {
        if caps[2] != caps[4] {
            return None;
        }
        let year_text = &caps[5];
        let mut year: i32 = year_text.parse().ok()?;
        if year_text.len() == 2 {
            year += if year < 30 { 2000 } else { 1900 };
        }
        return iso_date(year, caps[3].parse().ok()?, caps[1].parse().ok()?);
    }
    let caps = WRITTEN_DATE_RE.captures(r)?;
    let month_name = remove_diacritics(&caps[2]).to_lowercase();
    let month = MONTHS.iter().position(|m| *m == month_name)? as u32 + 1;
    iso_date(caps[3].parse().ok()?, month, caps[1].parse().ok()?)
}

fn iso_date(year: i32, month: u32, day: u32) -> Option<String> {
    if !(1..=12).contains(&month) || day == 0 || day > days_in_month(year, month) {
        return None;
    }
    Some(format!("{year:04}-{month:02}-{day:02}"))
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        2 if (year % 4 == 0 && year % 100 != 0) || year % 400 == 0 => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_pattern() {
        assert_eq!(encode_pattern_simple("Nome : a Fulano"), "W:1W");
        assert_eq!(encode_pattern_simple("   "), "");
    }

    #[test]
    fn typed_codes() {
        assert_eq!(classify_token("PROCESSO:"), "U2:");
        assert_eq!(classify_token(":"), ":");
        assert_eq!(classify_token("fulano@tj.jus.br"), "E");
        assert_eq!(classify_token("R$"), "V");
        assert_eq!(classify_token("Nº"), "R2");
        assert_eq!(classify_token("1ª"), "N2a");
        assert_eq!(classify_token("2º:"), "N2o:");
        assert_eq!(classify_token("123.456.789-00"), "F2");
        assert_eq!(classify_token("12.345.678/0001-90"), "J2");
        assert_eq!(classify_token("0801234-56.2023.8.15.0001"), "Q2");
        assert_eq!(classify_token("1.200,00"), "V2");
        assert_eq!(classify_token("12/03/2024"), "A2");
        assert_eq!(classify_token("de"), "P2");
        assert_eq!(classify_token("e"), "P1");
        assert_eq!(classify_token("2024"), "N2");
        assert_eq!(classify_token("campinas"), "L2");
        assert_eq!(classify_token("Campinas,"), "T2");
        assert_eq!(classify_token("McDonald"), "M2");
        assert_eq!(classify_token("A1"), "M2");
        assert_eq!(classify_token("--"), "S");
    }

    #[test]
    fn money_parsing() {
        assert_eq!(parse_money("R$ 1.234,56"), Some(1234.56));
        assert_eq!(parse_money("45 0, 0"), Some(450.0));
        assert_eq!(parse_money("-10"), Some(-10.0));
        assert_eq!(parse_money("abc"), None);
        assert_eq!(parse_money("R$ ,5"), Some(0.5));
    }

    #[test]
    fn date_parsing() {
        assert_eq!(parse_date("12/03/2024").as_deref(), Some("2024-03-12"));
        assert_eq!(parse_date("1-2-99").as_deref(), Some("1999-02-01"));
        assert_eq!(parse_date("5/6/07").as_deref(), Some("2007-06-05"));
        assert_eq!(parse_date("2024-02-29").as_deref(), Some("2024-02-29"));
        assert_eq!(parse_date("10 de março de 2024").as_deref(), Some("2024-03-10"));
        assert!(parse_date("31/02/2024").is_none());
        assert!(parse_date("12/03-2024").is_none());
        assert!(parse_date("10 de brumario de 2024").is_none());
    }

    #[test]
    fn pattern_block_carries_typed_pattern() {
        let block = TextBlock::from_text(1, 3, 4, "VALOR: R$ 100,00".into(), "VALOR: R$ 100,00".into());
        let pattern = PatternBlock::from(&block);
        assert_eq!(pattern.pattern_typed, "U2:VV2");
        assert_eq!(pattern.start_op, 3);
    }
}
