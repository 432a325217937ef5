//! Leading field-label detection ("Processo:", "CPF -", "Vara ...") used to
//! bias block similarity towards the right field.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::normalization::{collapse_spaced_letters, normalize_whitespace, remove_diacritics};

/// Labels whose cross-matching is treated as a hard conflict.
pub const CRITICAL_LABELS: &[&str] = &[
    "processo_administrativo",
    "processo_judicial",
    "requerente",
    "interessado",
    "promovente",
    "promovido",
    "assunto",
    "perito",
    "cpf_perito",
    "cpf",
    "cnpj",
    "comarca",
    "vara",
];

/// Ordered prefix table: first prefix that matches the label head wins.
const CANONICAL_PREFIXES: &[(&[&str], &str)] = &[
    (&["processo administrativo", "processoadministrativo", "sei", "adme"], "processo_administrativo"),
    (&["processo judicial", "processojudicial", "acao", "acaon"], "processo_judicial"),
    (&["requerente"], "requerente"),
    (&["interessad"], "interessado"),
    (&["promovent"], "promovente"),
    (&["promovid"], "promovido"),
    (&["assunto"], "assunto"),
    (&["processo"], "processo"),
    (&["cpf"], "cpf"),
    (&["cnpj"], "cnpj"),
    (&["perito", "perita"], "perito"),
    (&["vara"], "vara"),
    (&["comarca"], "comarca"),
    (&["especialidade"], "especialidade"),
    (&["pericia"], "especie_da_pericia"),
    (&["adiantamento"], "adiantamento"),
    (&["parcela"], "parcela"),
    (&["percentual"], "percentual"),
    (&["valor"], "valor"),
    (&["data"], "data"),
];

// Digits may already be folded to `#` by the similarity normal form.
static MONEY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"r\$\s*[0-9#]").unwrap());
static NUMERIC_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^0-9#a-z])[0-9#]{1,2}[./-][0-9#]{1,2}[./-][0-9#]{2,4}(?:$|[^0-9#a-z])").unwrap()
});
static WRITTEN_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^0-9#a-z])[0-9#]{1,2}\s+de\s+[a-zçãõáéíóúâêô]+\s+de\s+[0-9#]{4}(?:$|[^0-9#a-z])").unwrap()
});
static CNJ_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9#]{7}-?[0-9#]{2}\.?[0-9#]{4}\.?[0-9#]\.?[0-9#]{2}\.?[0-9#]{4}").unwrap()
});
static ADMIN_NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9#]{6,7}-?[0-9#]{2}\.?[0-9#]{4}\.?[0-9#]\.?[0-9#]{2}(?:\.?[0-9#]{4})?").unwrap()
});
static SEI_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bsei\b").unwrap());
static REQUERENTE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\brequerente\b").unwrap());
static INTERESSADO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\binteressad[oa]\b").unwrap());
static PROMOVENTE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bpromovent[eo]\b").unwrap());
static PROMOVIDO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bpromovid[oa]\b").unwrap());
static ASSUNTO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bassunto\b").unwrap());
static CPF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bcpf\b").unwrap());
static CNPJ_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bcnpj\b").unwrap());
static PERITO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bperit[oa]\b").unwrap());
static ESPECIALIDADE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bespecialidade\b").unwrap());
static PERICIA_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bpericia\b").unwrap());
static COMARCA_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bcomarca\b").unwrap());
static VARA_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bvara\b|\bjuizo\b|\bjuizado\b").unwrap());
static ADIANTAMENTO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\badiantamento\b").unwrap());
static PARCELA_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bparcela\b").unwrap());
static PERCENTUAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bpercentual\b|%").unwrap());

/// A detected field label and how sure the detector is about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelInfo {
    pub label: String,
    pub confidence: f64,
}

impl LabelInfo {
    fn new(label: &str, confidence: f64) -> Self {
        Self {
            label: label.to_string(),
            confidence,
        }
    }
}

pub fn is_critical_label(label: &str) -> bool {
    CRITICAL_LABELS.contains(&label)
}

/// Best label for the start of `text`, or `None` when nothing looks like a
/// field label.
pub fn leading_label(text: &str) -> Option<LabelInfo> {
    if text.trim().is_empty() {
        return None;
    }
    let t = normalize_whitespace(&collapse_spaced_letters(text.trim()));
    let t = normalize_whitespace(&split_lower_upper(&t));
    let chars: Vec<char> = t.chars().collect();
    let mut best: Option<LabelInfo> = None;

    if let Some(colon) = chars.iter().position(|&c| c == ':') {
        if (1..=60).contains(&colon) {
            let head: String = chars[..colon].iter().collect();
            if let Some(label) = canonical_label(&head) {
                best = Some(LabelInfo::new(label, 0.95));
            }
        }
    }

    if let Some(dash) = chars.iter().position(|c| matches!(c, '-' | '–' | '—' | ',')) {
        if (1..=40).contains(&dash) {
            let head: String = chars[..dash].iter().collect();
            if let Some(label) = canonical_label(&head) {
                if confidence(&best) < 0.75 {
                    best = Some(LabelInfo::new(label, 0.75));
                }
            }
        }
    }

    let probe: String = chars.iter().take(48).collect();
    if let Some(label) = canonical_label(&probe) {
        let conf = if label.starts_with("processo") || label == "cpf" || label == "cnpj" {
            0.70
        } else {
            0.60
        };
        if conf > confidence(&best) {
            best = Some(LabelInfo::new(label, conf));
        }
    }

    if let Some(cue) = semantic_cue(&t) {
        if cue.confidence > confidence(&best) {
            best = Some(cue);
        }
    }
    best
}

/// Maps a label head ("Nº do Processo", "CPF do perito") to its canonical
/// label by prefix.
pub fn canonical_label(head: &str) -> Option<&'static str> {
    let lowered = remove_diacritics(head).to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    let s = normalize_whitespace(&cleaned);
    if s.is_empty() {
        return None;
    }
    let compact = s.replace(' ', "");
    CANONICAL_PREFIXES
        .iter()
        .find(|(prefixes, _)| {
            prefixes
                .iter()
                .any(|p| s.starts_with(p) || compact.starts_with(p))
        })
        .map(|(_, label)| *label)
}

/// Content-based label detection: keywords anywhere in the text and value
/// shapes (case numbers, money, dates).
pub fn semantic_cue(text: &str) -> Option<LabelInfo> {
    if text.trim().is_empty() {
        return None;
    }
    let s = normalize_whitespace(&remove_diacritics(text).to_lowercase());
    let compact = s.replace(' ', "");
    let has_cnj = CNJ_RE.is_match(&compact);
    let has_admin_number = ADMIN_NUMBER_RE.is_match(&compact);

    let hit = |label: &str, conf: f64| Some(LabelInfo::new(label, conf));

    if s.contains("processo administrativo") || SEI_RE.is_match(&s) {
        return hit("processo_administrativo", 0.93);
    }
    if (s.contains("processo judicial") || s.contains("acao n")) && has_cnj {
        return hit("processo_judicial", 0.93);
    }
    if s.starts_with("processo") && has_cnj {
        return hit("processo_judicial", 0.90);
    }
    if s.starts_with("processo") && has_admin_number {
        return hit("processo_administrativo", 0.88);
    }

    if REQUERENTE_RE.is_match(&s) {
        return hit("requerente", 0.92);
    }
    if INTERESSADO_RE.is_match(&s) {
        return hit("interessado", 0.92);
    }
    if PROMOVENTE_RE.is_match(&s) {
        return hit("promovente", 0.90);
    }
    if PROMOVIDO_RE.is_match(&s) {
        return hit("promovido", 0.90);
    }
    if ASSUNTO_RE.is_match(&s) {
        return hit("assunto", 0.88);
    }

    let has_cpf = CPF_RE.is_match(&s);
    let has_perito = PERITO_RE.is_match(&s);
    if has_cpf && has_perito {
        return hit("cpf_perito", 0.90);
    }
    if has_cpf {
        return hit("cpf", 0.80);
    }
    if CNPJ_RE.is_match(&s) {
        return hit("cnpj", 0.88);
    }
    if has_perito {
        return hit("perito", 0.86);
    }
    if ESPECIALIDADE_RE.is_match(&s) {
        return hit("especialidade", 0.86);
    }
    if PERICIA_RE.is_match(&s) {
        return hit("especie_da_pericia", 0.74);
    }
    if COMARCA_RE.is_match(&s) {
        return hit("comarca", 0.86);
    }
    if VARA_RE.is_match(&s) {
        return hit("vara", 0.84);
    }
    if ADIANTAMENTO_RE.is_match(&s) {
        return hit("adiantamento", 0.86);
    }
    if PARCELA_RE.is_match(&s) {
        return hit("parcela", 0.86);
    }
    if PERCENTUAL_RE.is_match(&s) {
        return hit("percentual", 0.82);
    }

    if MONEY_RE.is_match(&s) {
        if s.contains("conselho da magistratura") || compact.contains("valorarbitradocm") {
            return hit("valor_arbitrado_cm", 0.84);
        }
        if s.contains("honorario") || s.contains("arbitrad") {
            return hit("valor_arbitrado", 0.80);
        }
        return hit("valor", 0.70);
    }

    if NUMERIC_DATE_RE.is_match(&s) || WRITTEN_DATE_RE.is_match(&s) {
        return hit("data", 0.72);
    }
    None
}

fn confidence(info: &Option<LabelInfo>) -> f64 {
    info.as_ref().map_or(0.0, |i| i.confidence)
}

fn split_lower_upper(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 4);
    let mut prev: Option<char> = None;
    for c in text.chars() {
        if let Some(p) = prev {
            if p.is_lowercase() && c.is_uppercase() {
                out.push(' ');
            }
        }
        out.push(c);
        prev = Some(c);
    }
    out
}
