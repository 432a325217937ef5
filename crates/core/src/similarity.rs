//! Comparable block forms and the similarity scores that drive alignment.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::labels::{is_critical_label, leading_label, LabelInfo};
use crate::normalization::{fold_for_search, normalize_full_text, normalize_whitespace, remove_diacritics};

/// Cue texts longer than this are ordinary prose, not field markers.
pub const MAX_CUE_LEN: usize = 44;

const CUE_PHRASES: &[&str] = &[
    "vara",
    "comarca",
    "cpf",
    "perito",
    "especialidade",
    "pericia",
    "processo administrativo",
    "processo judicial",
    "movido por",
    "em face de",
    "valor r",
    "data",
];

/// Marker keyword to the prose it stands for, first match wins.
const SEMANTIC_HINTS: &[(&[&str], &str)] = &[
    (&["PROCESSOADMIN", "PROCESSO_ADMIN"], "processo administrativo"),
    (&["PROCESSOJUDICIAL", "PROCESSO_JUDICIAL"], "processo judicial"),
    (&["VARA"], "vara"),
    (&["COMARCA"], "comarca"),
    (&["CPF"], "cpf"),
    (&["PERITO"], "perito"),
    (&["PROMOVENTE"], "movido por"),
    (&["PROMOVIDO"], "em face de"),
    (&["ESPECIALIDADE"], "especialidade"),
    (&["ESPECIE", "PERICIA"], "pericia"),
    (&["VALOR"], "valor r"),
    (&["TRIBUNAL"], "tribunal de justica"),
    (&["DIRETORIA"], "diretoria especial"),
    (&["ASSINATURA"], "assinatura"),
    (&["ENCAMINHE"], "encaminhe se"),
    (&["DATA"], "data"),
];

static ANGLE_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<\s*[A-Za-z_][A-Za-z0-9_]*\s*>").unwrap());
static WORD_TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z0-9#]+").unwrap());

/// Form compared during alignment: repaired text, marker substitution,
/// lowercase, every digit folded to `#`.
pub fn normalize_for_similarity(text: &str) -> String {
    let mut t = normalize_whitespace(&normalize_full_text(text));
    if has_anchor_marker(&t) || is_anchor_cue(&t) {
        if let Some(hint) = semantic_hint(&t) {
            t = hint.to_string();
        }
    }
    let mut out = String::with_capacity(t.len());
    for c in t.chars() {
        if c.is_ascii_digit() {
            out.push('#');
        } else {
            out.extend(c.to_lowercase());
        }
    }
    out
}

/// `<name>`, `ANC_...`, `[ANC...` or a leading `ANC ` marker.
pub fn has_anchor_marker(text: &str) -> bool {
    if text.trim().is_empty() {
        return false;
    }
    if ANGLE_MARKER_RE.is_match(text) {
        return true;
    }
    let upper = text.to_uppercase();
    upper.contains("ANC_") || upper.contains("[ANC") || upper.starts_with("ANC ")
}

/// Short texts that are themselves a field marker ("Vara", "Comarca", ...).
pub fn is_anchor_cue(text: &str) -> bool {
    let lowered = remove_diacritics(text).to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == ' ' {
                c
            } else {
                ' '
            }
        })
        .collect();
    let s = normalize_whitespace(&cleaned);
    if s.is_empty() {
        return false;
    }
    if s.split(' ').any(|t| t == "anc" || t.starts_with("anc_")) {
        return true;
    }
    if s.chars().count() > MAX_CUE_LEN {
        return false;
    }
    CUE_PHRASES.contains(&s.as_str())
}

/// Canonical prose for a marker such as `[ANC_PROCESSO_ADMIN]`.
pub fn semantic_hint(text: &str) -> Option<&'static str> {
    let upper = remove_diacritics(text).to_uppercase();
    let compact: String = upper
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    let token = match compact.find("ANC") {
        Some(idx) => compact[idx + 3..].trim_matches('_'),
        None => compact.as_str(),
    };
    if token.is_empty() {
        return None;
    }
    SEMANTIC_HINTS
        .iter()
        .find(|(keys, _)| keys.iter().any(|k| token.contains(k)))
        .map(|(_, hint)| *hint)
}

/// Character edit similarity blended with a length term. Symmetric, and
/// `similarity(a, a) == 1`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let la = a.chars().count();
    let lb = b.chars().count();
    if la == 0 && lb == 0 {
        return 1.0;
    }
    if la == 0 || lb == 0 {
        return 0.0;
    }
    let max = la.max(lb) as f64;
    let dist = strsim::levenshtein(a, b) as f64;
    let text_sim = 1.0 - dist / max;
    let len_sim = 1.0 - (la as f64 - lb as f64).abs() / max;
    text_sim * 0.7 + len_sim * 0.3
}

/// [`similarity`] biased by the leading field labels of both texts.
pub fn alignment_similarity(a: &str, b: &str) -> f64 {
    label_adjusted(similarity(a, b), leading_label(a).as_ref(), leading_label(b).as_ref())
}

fn label_adjusted(mut sim: f64, la: Option<&LabelInfo>, lb: Option<&LabelInfo>) -> f64 {
    match (la, lb) {
        (Some(la), Some(lb)) => {
            let c = la.confidence.min(lb.confidence);
            if la.label == lb.label {
                sim += if c >= 0.9 { 0.24 } else { 0.16 };
            } else {
                let critical = is_critical_label(&la.label) && is_critical_label(&lb.label);
                sim -= if critical && c >= 0.9 {
                    0.64
                } else if critical && c >= 0.75 {
                    0.44
                } else if c >= 0.9 {
                    0.34
                } else if c >= 0.7 {
                    0.24
                } else {
                    0.14
                };
            }
        }
        (Some(only), None) | (None, Some(only)) => {
            sim -= if only.confidence >= 0.9 { 0.16 } else { 0.10 };
        }
        (None, None) => {}
    }
    sim.clamp(-1.0, 1.0)
}

/// Two confidently labelled critical fields with different labels must
/// never anchor each other.
pub fn reject_as_anchor_mismatch(a: &str, b: &str) -> bool {
    labels_conflict(leading_label(a).as_ref(), leading_label(b).as_ref())
}

fn labels_conflict(la: Option<&LabelInfo>, lb: Option<&LabelInfo>) -> bool {
    let (Some(la), Some(lb)) = (la, lb) else {
        return false;
    };
    la.label != lb.label
        && is_critical_label(&la.label)
        && is_critical_label(&lb.label)
        && la.confidence >= 0.9
        && lb.confidence >= 0.9
}

/// Scores pairs between two normalized block lists, with labels and cue
/// flags computed once per block.
#[derive(Debug, Clone)]
pub struct PairScorer<'a> {
    a: &'a [String],
    b: &'a [String],
    labels_a: Vec<Option<LabelInfo>>,
    labels_b: Vec<Option<LabelInfo>>,
    cues_a: Vec<bool>,
    cues_b: Vec<bool>,
}

impl<'a> PairScorer<'a> {
    pub fn new(a: &'a [String], b: &'a [String]) -> Self {
        Self {
            a,
            b,
            labels_a: a.iter().map(|t| leading_label(t)).collect(),
            labels_b: b.iter().map(|t| leading_label(t)).collect(),
            cues_a: a.iter().map(|t| is_anchor_cue(t)).collect(),
            cues_b: b.iter().map(|t| is_anchor_cue(t)).collect(),
        }
    }

    pub fn len_a(&self) -> usize {
        self.a.len()
    }

    pub fn len_b(&self) -> usize {
        self.b.len()
    }

    /// Same value as [`alignment_similarity`] on the two texts.
    pub fn similarity(&self, i: usize, j: usize) -> f64 {
        label_adjusted(
            similarity(&self.a[i], &self.b[j]),
            self.labels_a[i].as_ref(),
            self.labels_b[j].as_ref(),
        )
    }

    pub fn len_ratio(&self, i: usize, j: usize) -> f64 {
        len_ratio(&self.a[i], &self.b[j])
    }

    pub fn rejects(&self, i: usize, j: usize) -> bool {
        labels_conflict(self.labels_a[i].as_ref(), self.labels_b[j].as_ref())
    }

    pub fn is_cue_a(&self, i: usize) -> bool {
        self.cues_a[i]
    }

    pub fn is_cue_pair(&self, i: usize, j: usize) -> bool {
        self.cues_a[i] || self.cues_b[j]
    }

    /// Share of A blocks that are anchor cues.
    pub fn cue_rate_a(&self) -> f64 {
        if self.a.is_empty() {
            return 0.0;
        }
        self.cues_a.iter().filter(|c| **c).count() as f64 / self.a.len() as f64
    }
}

/// Shorter over longer character length; 0 when either side is empty.
pub fn len_ratio(a: &str, b: &str) -> f64 {
    let la = a.chars().count();
    let lb = b.chars().count();
    if la == 0 || lb == 0 {
        return 0.0;
    }
    la.min(lb) as f64 / la.max(lb) as f64
}

/// Token-level similarity. Letter-spaced runs of three or more single
/// letters count as one word.
pub fn word_similarity(a: &str, b: &str) -> f64 {
    let ta = word_tokens(a);
    let tb = word_tokens(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let max = ta.len().max(tb.len()) as f64;
    let dist = strsim::generic_levenshtein(&ta, &tb) as f64;
    let text_sim = 1.0 - dist / max;
    let len_sim = 1.0 - (ta.len() as f64 - tb.len() as f64).abs() / max;
    text_sim * 0.78 + len_sim * 0.22
}

fn word_tokens(text: &str) -> Vec<String> {
    let folded = fold_for_search(text);
    let raw: Vec<&str> = WORD_TOKEN_RE.find_iter(&folded).map(|m| m.as_str()).collect();
    let single_letter = |t: &str| {
        let mut chars = t.chars();
        matches!((chars.next(), chars.next()), (Some(c), None) if c.is_alphabetic())
    };
    let mut merged = Vec::with_capacity(raw.len());
    let mut i = 0usize;
    while i < raw.len() {
        if single_letter(raw[i]) {
            let run = raw[i..].iter().take_while(|t| single_letter(*t)).count();
            if run >= 3 {
                merged.push(raw[i..i + run].concat());
                i += run;
                continue;
            }
        }
        merged.push(raw[i].to_string());
        i += 1;
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn similarity_bounds_and_identity() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("abc", ""), 0.0);
        assert_eq!(similarity("valor", "valor"), 1.0);
        let s = similarity("abcd", "abce");
        assert!((s - (0.7 * 0.75 + 0.3)).abs() < 1e-9);
        assert_eq!(similarity("abc", "abcdef"), similarity("abcdef", "abc"));
    }

    #[test]
    fn digits_fold_and_markers_become_prose() {
        assert_eq!(normalize_for_similarity("VALOR: R$ 100,00"), "valor: r$ ###,##");
        assert_eq!(normalize_for_similarity("[ANC_PROCESSO_ADMIN]"), "processo administrativo");
        assert_eq!(normalize_for_similarity("<promovente>"), "movido por");
        assert_eq!(normalize_for_similarity("Comarca"), "comarca");
    }

    #[test]
    fn anchor_cues() {
        assert!(is_anchor_cue("Vara"));
        assert!(is_anchor_cue("Perícia"));
        assert!(is_anchor_cue("ANC_VALOR"));
        assert!(is_anchor_cue("em face de"));
        assert!(!is_anchor_cue("Vara Cível de Campinas"));
        // "anc" inside an ordinary word is not a marker
        assert!(!is_anchor_cue("Lançamento bancário"));
        assert!(!is_anchor_cue(""));
    }

    #[test]
    fn markers() {
        assert!(has_anchor_marker("<valor_cm>"));
        assert!(has_anchor_marker("texto [anc perito]"));
        assert!(has_anchor_marker("ANC vara"));
        assert!(!has_anchor_marker("3 < 5 > 4"));
        assert_eq!(semantic_hint("ANC_DATA"), Some("data"));
        assert_eq!(semantic_hint("anc__"), None);
    }

    #[test]
    fn same_label_is_boosted_and_conflicts_penalised() {
        let a = "processo: ####";
        let b = "processo: #####";
        assert!(alignment_similarity(a, b) > similarity(a, b));
        let cpf = "cpf: ###.###.###-##";
        let comarca = "comarca: campinas";
        assert!(alignment_similarity(cpf, comarca) < similarity(cpf, comarca) - 0.6);
        assert!(reject_as_anchor_mismatch(cpf, comarca));
        assert!(!reject_as_anchor_mismatch(cpf, "cpf: ###"));
        assert!(!reject_as_anchor_mismatch(cpf, "texto livre"));
    }

    #[test]
    fn one_sided_label_costs_a_little() {
        let a = "comarca: campinas";
        let b = "texto corrido qualquer";
        let expected = (similarity(a, b) - 0.16).clamp(-1.0, 1.0);
        assert!((alignment_similarity(a, b) - expected).abs() < 1e-9);
    }

    #[test]
    fn pair_scorer_matches_free_functions() {
        let a = vec!["processo: ####".to_string(), "vara".to_string()];
        let b = vec!["cpf: ###".to_string(), "processo: #####".to_string()];
        let scorer = PairScorer::new(&a, &b);
        for i in 0..a.len() {
            for j in 0..b.len() {
                assert_eq!(scorer.similarity(i, j), alignment_similarity(&a[i], &b[j]));
                assert_eq!(scorer.rejects(i, j), reject_as_anchor_mismatch(&a[i], &b[j]));
            }
        }
        assert!(scorer.is_cue_a(1));
        assert_eq!(scorer.cue_rate_a(), 0.5);
    }

    #[test]
    fn length_ratio() {
        assert_eq!(len_ratio("", "abc"), 0.0);
        assert_eq!(len_ratio("ab", "abcd"), 0.5);
    }

    #[test]
    fn word_similarity_merges_spaced_letters() {
        assert_eq!(word_similarity("", ""), 1.0);
        assert_eq!(word_similarity("a", ""), 0.0);
        assert_eq!(word_similarity("d i r e t o r i a especial", "Diretoria Especial"), 1.0);
        let partial = word_similarity("vara civel", "vara criminal");
        assert!((partial - (0.78 * 0.5 + 0.22)).abs() < 1e-9);
    }
}
