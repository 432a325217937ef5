use serde::Serialize;

use crate::deadline::Deadline;

const OPERATORS: &[&str] = &[
    "b", "B", "b*", "B*", "BDC", "BI", "BMC", "BT", "BX", "c", "cm", "CS", "cs", "d", "d0", "d1",
    "Do", "DP", "EI", "EMC", "ET", "EX", "f", "F", "f*", "G", "g", "gs", "h", "i", "ID", "j", "J",
    "K", "k", "l", "m", "M", "MP", "n", "q", "Q", "re", "rg", "RG", "ri", "s", "S", "SC", "sc",
    "SCN", "scn", "sh", "T*", "Tc", "Td", "TD", "Tf", "Tj", "TJ", "TL", "Tm", "Tr", "Ts", "Tw", "Tz",
    "v", "w", "W", "W*", "y", "'", "\"",
];

const TEXT_OPERATORS: &[&str] = &[
    "BT", "ET", "Tf", "Tm", "Td", "TD", "Tj", "TJ", "'", "\"", "T*", "Ts", "Tc", "Tw", "Tz", "Tr",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    LiteralString,
    HexString,
    Array,
    Dict,
    Name,
    Operator,
    Bare,
    Delimiter,
}

/// One lexical unit of a content stream. `text` is the ISO-8859-1 decoding of
/// the raw bytes `start..end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    pub text: String,
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn is_operator(&self) -> bool {
        self.kind == TokenKind::Operator
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Tokenized {
    pub tokens: Vec<Token>,
    pub timed_out: bool,
}

pub fn is_operator(token: &str) -> bool {
    OPERATORS.contains(&token)
}

pub fn is_text_operator(token: &str) -> bool {
    TEXT_OPERATORS.contains(&token)
}

pub fn is_text_show_operator(token: &str) -> bool {
    matches!(token, "Tj" | "TJ" | "'" | "\"")
}

/// `'` and `"` move to the next line before showing text.
pub fn is_line_show_operator(token: &str) -> bool {
    matches!(token, "'" | "\"")
}

pub fn tokenize(bytes: &[u8]) -> Vec<Token> {
    tokenize_with_deadline(bytes, Deadline::none()).tokens
}

/// Lexes `bytes` into tokens. Malformed input never fails: unterminated
/// strings, arrays and dictionaries run to the end of the buffer.
pub fn tokenize_with_deadline(bytes: &[u8], deadline: Deadline) -> Tokenized {
    let mut tokens = Vec::new();
    let len = bytes.len();
    let mut i = 0usize;
    while i < len {
        if deadline.expired() {
            tracing::warn!(
                tokens = tokens.len(),
                offset = i,
                "[timeout] tokenizer stopped early"
            );
            return Tokenized {
                tokens,
                timed_out: true,
            };
        }
        let c = bytes[i];
        if is_whitespace(c) {
            i += 1;
            continue;
        }
        if c == b'%' {
            while i < len && bytes[i] != b'\n' && bytes[i] != b'\r' {
                i += 1;
            }
            continue;
        }
        let start = i;
        let kind = match c {
            b'(' => {
                i = scan_balanced(bytes, start + 1, b'(', b')');
                TokenKind::LiteralString
            }
            b'<' if bytes.get(i + 1) == Some(&b'<') => {
                i = scan_dict(bytes, start);
                TokenKind::Dict
            }
            b'<' => {
                i = start + 1;
                while i < len && bytes[i] != b'>' {
                    i += 1;
                }
                if i < len {
                    i += 1;
                }
                TokenKind::HexString
            }
            b'[' => {
                i = scan_balanced(bytes, start + 1, b'[', b']');
                TokenKind::Array
            }
            b'/' => {
                i = start + 1;
                while i < len && !is_whitespace(bytes[i]) && !is_delimiter(bytes[i]) {
                    i += 1;
                }
                TokenKind::Name
            }
            _ if is_delimiter(c) => {
                i = start + 1;
                TokenKind::Delimiter
            }
            _ => {
                while i < len && !is_whitespace(bytes[i]) && !is_delimiter(bytes[i]) {
                    i += 1;
                }
                TokenKind::Bare
            }
        };
        let text = latin1(&bytes[start..i]);
        let kind = if kind == TokenKind::Bare && is_operator(&text) {
            TokenKind::Operator
        } else {
            kind
        };
        tokens.push(Token {
            text,
            kind,
            start,
            end: i,
        });
    }
    Tokenized {
        tokens,
        timed_out: false,
    }
}

pub fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn is_whitespace(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | b'\n' | b'\x0c')
}

fn is_delimiter(c: u8) -> bool {
    matches!(
        c,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

/// Scans from just after an opening delimiter until depth returns to zero.
/// A backslash skips the byte after it.
fn scan_balanced(bytes: &[u8], from: usize, open: u8, close: u8) -> usize {
    let mut depth = 1usize;
    let mut i = from;
    while i < bytes.len() && depth > 0 {
        let c = bytes[i];
        if c == b'\\' {
            i += 2;
            continue;
        }
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
        }
        i += 1;
    }
    i.min(bytes.len())
}

fn scan_dict(bytes: &[u8], from: usize) -> usize {
    let mut depth = 0usize;
    let mut i = from;
    while i < bytes.len() {
        if bytes[i] == b'<' && bytes.get(i + 1) == Some(&b'<') {
            depth += 1;
            i += 2;
            continue;
        }
        if bytes[i] == b'>' && bytes.get(i + 1) == Some(&b'>') {
            depth = depth.saturating_sub(1);
            i += 2;
            if depth == 0 {
                break;
            }
            continue;
        }
        i += 1;
    }
    i.min(bytes.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn texts(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(|t| t.text.as_str()).collect()
    }

    #[test]
    fn splits_simple_show_sequence() {
        let tokens = tokenize(b"1 0 0 1 (Hello) Tj");
        assert_eq!(texts(&tokens), vec!["1", "0", "0", "1", "(Hello)", "Tj"]);
        assert_eq!(tokens[4].kind, TokenKind::LiteralString);
        assert!(tokens[5].is_operator());
        assert!(!tokens[0].is_operator());
    }

    #[test]
    fn keeps_nested_and_escaped_parentheses_in_one_literal() {
        let tokens = tokenize(br"(a\(b)c) Tj (x(y)z) Tj");
        assert_eq!(texts(&tokens), vec![r"(a\(b)c)", "Tj", "(x(y)z)", "Tj"]);
    }

    #[test]
    fn separates_hex_strings_from_dictionaries() {
        let tokens = tokenize(b"<48656C6C6F> Tj /P <</MCID 3 /Sub <</A 1>> >> BDC EMC");
        assert_eq!(
            texts(&tokens),
            vec![
                "<48656C6C6F>",
                "Tj",
                "/P",
                "<</MCID 3 /Sub <</A 1>> >>",
                "BDC",
                "EMC"
            ]
        );
        assert_eq!(tokens[0].kind, TokenKind::HexString);
        assert_eq!(tokens[2].kind, TokenKind::Name);
        assert_eq!(tokens[3].kind, TokenKind::Dict);
    }

    #[test]
    fn arrays_and_quote_operators() {
        let tokens = tokenize(b"[(A) -120 (B[1])] TJ (next) ' 1 2 (q) \"");
        assert_eq!(
            texts(&tokens),
            vec!["[(A) -120 (B[1])]", "TJ", "(next)", "'", "1", "2", "(q)", "\""]
        );
        assert_eq!(tokens[0].kind, TokenKind::Array);
        assert!(tokens[3].is_operator());
        assert!(tokens[7].is_operator());
    }

    #[test]
    fn skips_comments_and_keeps_stray_delimiters() {
        let tokens = tokenize(b"% header\r\nBT } ET");
        assert_eq!(texts(&tokens), vec!["BT", "}", "ET"]);
        assert_eq!(tokens[1].kind, TokenKind::Delimiter);
    }

    #[test]
    fn unterminated_literal_runs_to_end() {
        let tokens = tokenize(b"BT (never closed Tj");
        assert_eq!(texts(&tokens), vec!["BT", "(never closed Tj"]);
        let tokens = tokenize(b"(trailing escape\\");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].end, 17);
    }

    #[test]
    fn decodes_bytes_as_latin1() {
        let tokens = tokenize(b"(Jos\xe9) Tj");
        assert_eq!(tokens[0].text, "(José)");
    }

    #[test]
    fn expired_deadline_returns_partial_result() {
        let result = tokenize_with_deadline(b"BT (a) Tj ET", Deadline::after(Duration::ZERO));
        assert!(result.timed_out);
        assert!(result.tokens.is_empty());
    }

    #[test]
    fn operator_classes() {
        assert!(is_text_operator("Tf"));
        assert!(!is_text_operator("re"));
        assert!(is_text_show_operator("'"));
        assert!(!is_text_show_operator("Td"));
        assert!(is_line_show_operator("\""));
        assert!(!is_line_show_operator("T*"));
    }
}
