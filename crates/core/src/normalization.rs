//! Repair passes for text recovered from content streams: letter-spaced
//! runs, glued words, missing separators and OCR-style splits.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

const CONNECTORS: &[&str] = &[
    "DE", "DA", "DO", "DOS", "DAS", "E", "EM", "NO", "NA", "NOS", "NAS", "POR", "PELO", "PELA",
];

const GLUE_CONNECTORS: &[&str] = &[
    "DA", "DE", "DO", "DAS", "DOS", "E", "EM", "NO", "NA", "NOS", "NAS", "AO", "AOS",
];

/// Tokens shorter than this are never split by the uppercase glue pass.
const GLUE_MIN_TOKEN_LETTERS: usize = 12;
/// Each side of a glued connector must keep at least this many letters.
const GLUE_MIN_SIDE_LETTERS: usize = 4;

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// NFD, drop combining marks, recompose.
pub fn remove_diacritics(text: &str) -> String {
    text.nfd().filter(|c| !is_combining_mark(*c)).nfc().collect()
}

/// Lowercase ASCII-ish search form: no diacritics, every run of
/// non-alphanumerics becomes one space.
pub fn fold_for_search(text: &str) -> String {
    let lowered = remove_diacritics(text).to_lowercase();
    let replaced: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    normalize_whitespace(&replaced)
}

/// Inserts the separators that extraction tends to lose: after `, : ;` and
/// `)`, before `(`, between letters and digits and at lower→upper
/// boundaries. Numeric separators such as `100,00` or `10:30` stay intact.
pub fn fix_missing_spaces(text: &str) -> String {
    if text.trim().is_empty() {
        return text.to_string();
    }
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 8);
    for (i, &c) in chars.iter().enumerate() {
        if i > 0 && needs_space_between(&chars, i) {
            out.push(' ');
        }
        out.push(c);
    }
    normalize_whitespace(&out)
}

fn needs_space_between(chars: &[char], i: usize) -> bool {
    let prev = chars[i - 1];
    let next = chars[i];
    if next.is_whitespace() || prev.is_whitespace() {
        return false;
    }
    if matches!(prev, ',' | ':' | ';') {
        let numeric = i >= 2 && chars[i - 2].is_ascii_digit() && next.is_ascii_digit();
        return !numeric;
    }
    if prev == ')' || next == '(' {
        return true;
    }
    if is_latin_letter(prev) && next.is_ascii_digit() {
        return true;
    }
    if prev.is_ascii_digit() && is_latin_letter(next) {
        return true;
    }
    is_latin_lower(prev) && is_latin_upper(next)
}

fn is_latin_letter(c: char) -> bool {
    c.is_ascii_alphabetic() || ('\u{C0}'..='\u{FF}').contains(&c)
}

fn is_latin_lower(c: char) -> bool {
    c.is_ascii_lowercase() || ('\u{E0}'..='\u{FF}').contains(&c)
}

fn is_latin_upper(c: char) -> bool {
    c.is_ascii_uppercase() || "ÁÂÃÀÉÊÍÓÔÕÚÇ".contains(c)
}

/// Joins letter-spaced runs such as `P R O C E S S O` or `1 0 0`.
pub fn collapse_spaced_letters(text: &str) -> String {
    if text.trim().is_empty() {
        return String::new();
    }
    let cleaned: String = text
        .chars()
        .map(|c| match c {
            '\u{00A0}' | '\u{2007}' | '\u{202F}' | '\u{200B}' | '\u{200C}' | '\u{200D}'
            | '\u{FEFF}' => ' ',
            other => other,
        })
        .collect();

    let mut pieces: Vec<String> = Vec::new();
    let mut buffer = String::new();
    let mut pending_ws: Option<&str> = None;
    for part in split_runs(&cleaned) {
        if part.chars().all(char::is_whitespace) {
            pending_ws = Some(part);
            continue;
        }
        let joinable = is_join_token(part);
        if joinable && !buffer.is_empty() && pending_ws.is_some_and(is_tight_space) {
            buffer.push_str(part);
        } else {
            if !buffer.is_empty() {
                pieces.push(std::mem::take(&mut buffer));
            }
            if joinable {
                buffer.push_str(part);
            } else {
                pieces.push(part.to_string());
            }
        }
        pending_ws = None;
    }
    if !buffer.is_empty() {
        pieces.push(buffer);
    }
    normalize_whitespace(&pieces.join(" "))
}

/// Splits into alternating maximal whitespace / non-whitespace runs.
fn split_runs(text: &str) -> Vec<&str> {
    let mut runs = Vec::new();
    let mut start = 0usize;
    let mut current: Option<bool> = None;
    for (idx, c) in text.char_indices() {
        let ws = c.is_whitespace();
        match current {
            Some(kind) if kind == ws => {}
            Some(_) => {
                runs.push(&text[start..idx]);
                start = idx;
                current = Some(ws);
            }
            None => current = Some(ws),
        }
    }
    if start < text.len() {
        runs.push(&text[start..]);
    }
    runs
}

fn is_tight_space(ws: &str) -> bool {
    if ws.is_empty() || ws.contains('\n') || ws.contains('\r') {
        return false;
    }
    ws.chars().count() <= 2
        && ws
            .chars()
            .all(|c| matches!(c, ' ' | '\t' | '\u{00A0}' | '\u{2007}' | '\u{202F}'))
}

fn is_join_token(token: &str) -> bool {
    let mut chars = token.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_alphanumeric() || matches!(c, '$' | '/' | '-' | '–' | '.' | ',' | 'ª' | 'º' | '°') {
            return true;
        }
    }
    token.chars().count() <= 3
        && token.chars().all(|c| c.is_alphabetic() && c.is_uppercase())
        && !is_connector(token)
}

fn is_connector(token: &str) -> bool {
    let upper = token.to_uppercase();
    CONNECTORS.contains(&upper.as_str())
}

fn is_prefix_connector(token: &str) -> bool {
    let upper = token.to_uppercase();
    is_connector(token) || upper == "AO" || upper == "AOS"
}

fn letter_count(token: &str) -> usize {
    token.chars().filter(|c| c.is_alphabetic()).count()
}

/// Every letter is uppercase and there is at least one letter; other
/// characters are ignored.
fn is_upper_token(token: &str) -> bool {
    let mut letters = token.chars().filter(|c| c.is_alphabetic()).peekable();
    letters.peek().is_some() && letters.all(char::is_uppercase)
}

fn is_upper_word(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_alphabetic() && c.is_uppercase())
}

fn is_word(token: &str) -> bool {
    !token.is_empty() && token.chars().all(char::is_alphabetic)
}

/// Merges runs of at least three short (≤ 3 letters) uppercase tokens.
pub fn fix_uppercase_token_runs(text: &str) -> String {
    let parts: Vec<&str> = text.split_whitespace().collect();
    if parts.len() < 3 {
        return text.to_string();
    }
    let short = |t: &str| t.chars().count() <= 3 && is_upper_word(t);
    let mut out: Vec<String> = Vec::with_capacity(parts.len());
    let mut i = 0usize;
    while i < parts.len() {
        if !short(parts[i]) {
            out.push(parts[i].to_string());
            i += 1;
            continue;
        }
        let mut j = i;
        while j < parts.len() && short(parts[j]) {
            j += 1;
        }
        if j - i >= 3 {
            out.push(parts[i..j].concat());
        } else {
            out.extend(parts[i..j].iter().map(|p| p.to_string()));
        }
        i = j;
    }
    normalize_whitespace(&out.join(" "))
}

/// Merges runs of non-connector uppercase fragments (1–3 letters each) that
/// together hold at least four letters.
pub fn fix_uppercase_split_tokens(text: &str) -> String {
    let parts: Vec<&str> = text.split_whitespace().collect();
    if parts.len() < 2 {
        return text.to_string();
    }
    let fragment =
        |t: &str| (1..=3).contains(&letter_count(t)) && is_upper_token(t) && !is_connector(t);
    let mut out: Vec<String> = Vec::with_capacity(parts.len());
    let mut i = 0usize;
    while i < parts.len() {
        if !fragment(parts[i]) {
            out.push(parts[i].to_string());
            i += 1;
            continue;
        }
        let mut j = i;
        let mut letters = 0usize;
        while j < parts.len() && fragment(parts[j]) {
            letters += letter_count(parts[j]);
            j += 1;
        }
        if j - i >= 2 && letters >= 4 {
            out.push(parts[i..j].concat());
            i = j;
        } else {
            out.push(parts[i].to_string());
            i += 1;
        }
    }
    normalize_whitespace(&out.join(" "))
}

/// Splits connectors and digits out of long glued uppercase tokens such as
/// `COMARCADESAOPAULO`. Only mostly-uppercase texts with at most two spaces
/// are touched.
pub fn fix_uppercase_glue(text: &str) -> String {
    if text.trim().is_empty() || !is_mostly_uppercase(text) || count_space_like(text) > 2 {
        return text.to_string();
    }
    let tokens: Vec<String> = text.split_whitespace().map(split_glued_token).collect();
    normalize_whitespace(&tokens.join(" "))
}

fn split_glued_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    let long = letter_count(token) >= GLUE_MIN_TOKEN_LETTERS;
    let mut out = String::with_capacity(token.len() + 8);
    let mut segment_start = 0usize;
    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        if long && i > 0 && chars[i - 1].is_uppercase() {
            if let Some(len) = glued_connector_at(&chars, segment_start, i) {
                out.push(' ');
                out.extend(&chars[i..i + len]);
                out.push(' ');
                i += len;
                segment_start = i;
                continue;
            }
        }
        if i > 0 {
            let prev = chars[i - 1];
            if (prev.is_ascii_digit() && c.is_uppercase()) || (prev.is_uppercase() && c.is_ascii_digit()) {
                out.push(' ');
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

fn glued_connector_at(chars: &[char], segment_start: usize, i: usize) -> Option<usize> {
    let left_letters = chars[segment_start..i]
        .iter()
        .rev()
        .take_while(|c| c.is_alphabetic())
        .count();
    if left_letters < GLUE_MIN_SIDE_LETTERS {
        return None;
    }
    GLUE_CONNECTORS.iter().find_map(|conn| {
        let len = conn.chars().count();
        let end = i + len;
        if end >= chars.len() || !chars[i..end].iter().copied().eq(conn.chars()) {
            return None;
        }
        let right_letters = chars[end..]
            .iter()
            .take_while(|c| c.is_alphabetic())
            .count();
        (chars[end].is_uppercase() && right_letters >= GLUE_MIN_SIDE_LETTERS).then_some(len)
    })
}

fn is_mostly_uppercase(text: &str) -> bool {
    let letters = letter_count(text);
    if letters == 0 {
        return false;
    }
    let upper = text
        .chars()
        .filter(|c| c.is_alphabetic() && c.is_uppercase())
        .count();
    upper as f64 / letters as f64 >= 0.75
}

fn count_space_like(text: &str) -> usize {
    text.chars()
        .filter(|c| matches!(c, ' ' | '\t' | '\u{00A0}' | '\u{2007}' | '\u{202F}'))
        .count()
}

/// Re-joins words broken by extraction (`Pro cesso`, `da dosPessoais`).
pub fn fix_broken_words(text: &str) -> String {
    let parts: Vec<&str> = text.split_whitespace().collect();
    if parts.len() < 2 {
        return text.to_string();
    }
    let mut out: Vec<String> = Vec::with_capacity(parts.len());
    let mut current = parts[0].to_string();
    for next in &parts[1..] {
        match merge_broken_tokens(&current, next) {
            Some((merged, Some(remainder))) => {
                out.push(merged);
                current = remainder;
            }
            Some((merged, None)) => current = merged,
            None => {
                out.push(std::mem::replace(&mut current, next.to_string()));
            }
        }
    }
    out.push(current);
    normalize_whitespace(&out.join(" "))
}

fn merge_broken_tokens(left: &str, right: &str) -> Option<(String, Option<String>)> {
    if !is_word(left) || !is_word(right) {
        return None;
    }
    let left_len = left.chars().count();
    let right_chars: Vec<char> = right.chars().collect();
    if is_upper_word(left) && is_upper_word(right) && right_chars.len() <= 3 {
        return Some((format!("{left}{right}"), None));
    }
    if is_connector(left) || is_connector(right) {
        return None;
    }
    if right_chars.len() >= 2 && right_chars[0].is_lowercase() && right_chars[1].is_uppercase() {
        let merged = format!("{left}{}", right_chars[0]);
        let remainder: String = right_chars[1..].iter().collect();
        return Some((merged, Some(remainder)));
    }
    if right_chars.len() <= 2 {
        return Some((format!("{left}{right}"), None));
    }
    if left_len <= 3 && right_chars.len() <= 3 && right_chars[0].is_lowercase() {
        return Some((format!("{left}{right}"), None));
    }
    None
}

/// `PROCES SO` → `PROCESSO`: a long uppercase word followed by a short
/// uppercase tail. A token closing a label (`VALOR:`) never merges.
pub fn fix_uppercase_word_splits(text: &str) -> String {
    merge_pairs(text, |a, b| {
        is_upper_token(a)
            && is_upper_token(b)
            && !is_connector(b)
            && letter_count(a) >= 3
            && letter_count(b) <= 4
    })
}

/// `PR OCESSO` → `PROCESSO`: a short uppercase head followed by a longer
/// uppercase word.
pub fn fix_uppercase_prefix_splits(text: &str) -> String {
    merge_pairs(text, |a, b| {
        is_upper_token(a)
            && is_upper_token(b)
            && a.chars().count() <= 3
            && b.chars().count() >= 4
            && !is_prefix_connector(a)
    })
}

fn merge_pairs(text: &str, should_merge: impl Fn(&str, &str) -> bool) -> String {
    let parts: Vec<&str> = text.split_whitespace().collect();
    if parts.len() < 2 {
        return text.to_string();
    }
    let mut out: Vec<String> = Vec::with_capacity(parts.len());
    let mut i = 0usize;
    while i < parts.len() {
        if i + 1 < parts.len() && !parts[i].ends_with(':') && should_merge(parts[i], parts[i + 1]) {
            out.push(format!("{}{}", parts[i], parts[i + 1]));
            i += 2;
            continue;
        }
        out.push(parts[i].to_string());
        i += 1;
    }
    normalize_whitespace(&out.join(" "))
}

/// `JoãoSilva` → `João Silva` when both sides hold at least three letters.
pub fn fix_title_glue(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 8);
    for (i, &c) in chars.iter().enumerate() {
        if i > 0 && chars[i - 1].is_lowercase() && c.is_uppercase() {
            let back = chars[..i].iter().rev().take_while(|c| c.is_alphabetic()).count();
            let forward = chars[i..].iter().take_while(|c| c.is_alphabetic()).count();
            if back >= 3 && forward >= 3 {
                out.push(' ');
            }
        }
        out.push(c);
    }
    normalize_whitespace(&out)
}

/// Repair chain used before pattern encoding.
pub fn normalize_pattern_text(text: &str) -> String {
    if text.trim().is_empty() {
        return String::new();
    }
    let t = collapse_spaced_letters(text);
    let t = normalize_whitespace(&fix_missing_spaces(&t));
    let t = fix_uppercase_token_runs(&t);
    let t = fix_broken_words(&t);
    let t = fix_uppercase_word_splits(&t);
    fix_uppercase_prefix_splits(&t)
}

/// Full repair chain applied to block text and extracted values.
pub fn normalize_full_text(text: &str) -> String {
    if text.trim().is_empty() {
        return String::new();
    }
    let t = normalize_pattern_text(text);
    let t = fix_uppercase_split_tokens(&t);
    let t = fix_uppercase_glue(&t);
    fix_title_glue(&t)
}

/// Cleanup for one reconstructed line of a fallback segmentation.
pub fn clean_fallback_line(text: &str) -> String {
    let t = collapse_spaced_letters(text);
    let t = fix_missing_spaces(&t);
    fix_uppercase_glue(&normalize_whitespace(&t))
}

/// Form used to decide whether two aligned blocks carry the same template
/// text. Digits are kept so that differing values stay different.
pub fn comparison_form(text: &str) -> String {
    let full = normalize_whitespace(&normalize_full_text(text));
    normalize_whitespace(&fix_missing_spaces(&full)).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_runs_collapse() {
        assert_eq!(normalize_whitespace("  a \t b\n\nc "), "a b c");
        assert_eq!(normalize_whitespace("   "), "");
    }

    #[test]
    fn diacritics_and_search_folding() {
        assert_eq!(remove_diacritics("Perícia Judiciária ção"), "Pericia Judiciaria cao");
        assert_eq!(fold_for_search("N. do Processo: 0800-12"), "n do processo 0800 12");
    }

    #[test]
    fn missing_spaces_are_inserted() {
        assert_eq!(fix_missing_spaces("Nome:Fulano;CPF"), "Nome: Fulano; CPF");
        assert_eq!(fix_missing_spaces("(a)b"), "(a) b");
        assert_eq!(fix_missing_spaces("x(y"), "x (y");
        assert_eq!(fix_missing_spaces("Vara1Civel"), "Vara 1 Civel");
        assert_eq!(fix_missing_spaces("periciaJudicial"), "pericia Judicial");
    }

    #[test]
    fn numeric_separators_survive_space_repair() {
        assert_eq!(fix_missing_spaces("R$ 1.250,00 às 10:30"), "R$ 1.250,00 às 10:30");
    }

    #[test]
    fn spaced_letters_are_joined() {
        assert_eq!(collapse_spaced_letters("P R O C E S S O   n º 1 2"), "PROCESSO nº12");
        assert_eq!(collapse_spaced_letters("VALOR   DA CAUSA"), "VALOR DA CAUSA");
        assert_eq!(collapse_spaced_letters("a\u{00A0}b"), "ab");
        assert_eq!(collapse_spaced_letters("a\n b"), "a b");
    }

    #[test]
    fn uppercase_runs_merge() {
        assert_eq!(fix_uppercase_token_runs("PRO CES SO de"), "PROCESSO de");
        assert_eq!(fix_uppercase_token_runs("AB CD ef"), "AB CD ef");
        assert_eq!(fix_uppercase_split_tokens("PE RI TO de"), "PERITO de");
        assert_eq!(fix_uppercase_split_tokens("CPF DE AB"), "CPF DE AB");
    }

    #[test]
    fn glued_connectors_split_only_in_long_tokens() {
        assert_eq!(fix_uppercase_glue("COMARCADESAOPAULO"), "COMARCA DE SAOPAULO");
        assert_eq!(fix_uppercase_glue("PROCESSO: 001"), "PROCESSO: 001");
        assert_eq!(fix_uppercase_glue("VARA2"), "VARA 2");
        assert_eq!(fix_uppercase_glue("texto normal DEJUSTICA"), "texto normal DEJUSTICA");
    }

    #[test]
    fn broken_words_rejoin() {
        assert_eq!(fix_broken_words("sol ta"), "solta");
        assert_eq!(fix_broken_words("Pro ces"), "Proces");
        assert_eq!(fix_broken_words("perit o"), "perito");
        assert_eq!(fix_broken_words("dadosP essoais"), "dadosP essoais");
        assert_eq!(fix_broken_words("nom eSilva"), "nome Silva");
        assert_eq!(fix_broken_words("casa de campo"), "casa de campo");
    }

    #[test]
    fn uppercase_split_pairs() {
        assert_eq!(fix_uppercase_word_splits("PROCES SO"), "PROCESSO");
        assert_eq!(fix_uppercase_word_splits("VALOR: R$"), "VALOR: R$");
        assert_eq!(fix_uppercase_prefix_splits("PR OCESSO"), "PROCESSO");
        assert_eq!(fix_uppercase_prefix_splits("DE JUSTICA"), "DE JUSTICA");
    }

    #[test]
    fn title_glue_needs_three_letters_each_side() {
        assert_eq!(fix_title_glue("JoãoSilva"), "João Silva");
        assert_eq!(fix_title_glue("iPhone"), "iPhone");
    }

    #[test]
    fn full_text_keeps_field_lines_readable() {
        assert_eq!(normalize_full_text("PROCESSO: 001"), "PROCESSO: 001");
        assert_eq!(normalize_full_text("VALOR: R$ 100,00"), "VALOR: R$ 100,00");
        assert_eq!(normalize_full_text("  "), "");
    }

    #[test]
    fn comparison_form_keeps_digits() {
        assert_eq!(comparison_form("VALOR:R$ 100,00"), "valor: r$ 100,00");
        assert_ne!(comparison_form("VALOR: R$ 100,00"), comparison_form("VALOR: R$ 250,00"));
    }

    #[test]
    fn fallback_line_cleanup() {
        assert_eq!(clean_fallback_line("C O M A R C A  de  X"), "COMARCA de X");
    }
}
