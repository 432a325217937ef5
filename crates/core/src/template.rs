//! Single-document template hints: which blocks of one document look like
//! filled-in values, and the fixed text around each of them.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use regex::RegexBuilder;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TmplDiffError};
use crate::segment::TextBlock;

pub const ANCHORS_FILE_VERSION: u32 = 1;

/// Blocks whose longest token reaches `min_token_len` and whose length
/// pattern occurs at most `pattern_max` times in the document.
pub fn select_self_variable_blocks(
    blocks: &[TextBlock],
    min_token_len: usize,
    pattern_max: usize,
) -> Vec<&TextBlock> {
    let mut counts: FxHashMap<&str, usize> = FxHashMap::default();
    for block in blocks {
        *counts.entry(block.pattern.as_str()).or_default() += 1;
    }
    blocks
        .iter()
        .filter(|b| b.max_token_len >= min_token_len)
        .filter(|b| counts.get(b.pattern.as_str()).is_some_and(|&c| c <= pattern_max))
        .collect()
}

/// Text predicate; every set condition must hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockRule {
    pub name: Option<String>,
    pub regex: Option<String>,
    pub contains: Option<String>,
    pub starts_with: Option<String>,
    pub ends_with: Option<String>,
    pub min_len: Option<usize>,
    pub max_len: Option<usize>,
}

impl BlockRule {
    /// Case-insensitive. An invalid regex never matches.
    pub fn matches(&self, text: &str) -> bool {
        let len = text.chars().count();
        if self.min_len.is_some_and(|min| len < min) || self.max_len.is_some_and(|max| len > max) {
            return false;
        }
        let lowered = text.to_lowercase();
        let set = |v: &Option<String>| v.as_deref().filter(|s| !s.trim().is_empty()).map(str::to_lowercase);
        if set(&self.starts_with).is_some_and(|p| !lowered.starts_with(&p)) {
            return false;
        }
        if set(&self.ends_with).is_some_and(|p| !lowered.ends_with(&p)) {
            return false;
        }
        if set(&self.contains).is_some_and(|p| !lowered.contains(&p)) {
            return false;
        }
        if let Some(pattern) = self.regex.as_deref().filter(|s| !s.trim().is_empty()) {
            return match RegexBuilder::new(pattern).case_insensitive(true).build() {
                Ok(re) => re.is_match(text),
                Err(err) => {
                    tracing::debug!(pattern, %err, "ignoring invalid rule regex");
                    false
                }
            };
        }
        true
    }
}

/// Overrides for self classification. `fixed` rules apply first, then
/// `variable` rules win.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockRules {
    pub min_token_len: Option<usize>,
    pub pattern_max: Option<usize>,
    pub fixed: Vec<BlockRule>,
    pub variable: Vec<BlockRule>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelfClassification {
    pub variable: Vec<TextBlock>,
    pub fixed: Vec<TextBlock>,
}

pub fn classify_self_blocks(
    blocks: &[TextBlock],
    min_token_len: usize,
    pattern_max: usize,
    rules: Option<&BlockRules>,
) -> SelfClassification {
    let min_len = rules.and_then(|r| r.min_token_len).unwrap_or(min_token_len);
    let max = rules.and_then(|r| r.pattern_max).unwrap_or(pattern_max);
    let default_variable: Vec<usize> = select_self_variable_blocks(blocks, min_len, max)
        .iter()
        .map(|b| b.index)
        .collect();

    let mut out = SelfClassification::default();
    for block in blocks {
        let mut variable = default_variable.contains(&block.index);
        if let Some(rules) = rules {
            if rules.fixed.iter().any(|r| r.matches(&block.text)) {
                variable = false;
            }
            if rules.variable.iter().any(|r| r.matches(&block.text)) {
                variable = true;
            }
        }
        if variable {
            out.variable.push(block.clone());
        } else {
            out.fixed.push(block.clone());
        }
    }
    out
}

/// A variable block with its nearest fixed neighbours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorHint {
    pub var_index: usize,
    pub block: usize,
    pub start_op: usize,
    pub end_op: usize,
    pub var: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_block: Option<usize>,
    #[serde(default)]
    pub prev: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_block: Option<usize>,
    #[serde(default)]
    pub next: String,
}

pub fn build_self_anchors(variable: &[TextBlock], fixed: &[TextBlock]) -> Vec<AnchorHint> {
    let mut fixed_sorted: Vec<&TextBlock> = fixed.iter().collect();
    fixed_sorted.sort_by_key(|b| b.index);
    variable
        .iter()
        .enumerate()
        .map(|(i, block)| {
            let prev = fixed_sorted.iter().rev().find(|f| f.index < block.index);
            let next = fixed_sorted.iter().find(|f| f.index > block.index);
            AnchorHint {
                var_index: i + 1,
                block: block.index,
                start_op: block.start_op,
                end_op: block.end_op,
                var: block.text.clone(),
                prev_block: prev.map(|b| b.index),
                prev: prev.map(|b| b.text.clone()).unwrap_or_default(),
                next_block: next.map(|b| b.index),
                next: next.map(|b| b.text.clone()).unwrap_or_default(),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorsFile {
    pub version: u32,
    #[serde(default)]
    pub doc: Option<String>,
    #[serde(default)]
    pub source_file: Option<String>,
    pub obj: u32,
    pub anchors: Vec<AnchorHint>,
}

impl AnchorsFile {
    pub fn new(obj: u32, anchors: Vec<AnchorHint>) -> Self {
        Self {
            version: ANCHORS_FILE_VERSION,
            doc: None,
            source_file: None,
            obj,
            anchors,
        }
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = File::create(path)?;
        serde_json::to_writer_pretty(&mut file, self)?;
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    /// One anchor record per line, without the file envelope.
    pub fn save_jsonl<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = JsonlWriter::new(BufWriter::new(File::create(path)?));
        for anchor in &self.anchors {
            writer.write_record(anchor)?;
        }
        writer.into_inner().flush()?;
        Ok(())
    }

    pub fn load_jsonl<P: AsRef<Path>>(path: P, obj: u32) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut anchors = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            anchors.push(serde_json::from_str(&line)?);
        }
        Ok(Self::new(obj, anchors))
    }
}

pub struct JsonlWriter<W> {
    writer: W,
}

impl<W: Write> JsonlWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write_record<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let mut buf = serde_json::to_vec(record)?;
        buf.push(b'\n');
        self.writer.write_all(&buf)?;
        Ok(())
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// `"3"` → `(3, 3)`, `"2-5"` → `(2, 5)`.
pub fn parse_block_range(raw: &str) -> Result<(usize, usize)> {
    let invalid = || TmplDiffError::InvalidBlockRange(raw.to_string());
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(invalid());
    }
    let parse = |s: &str| s.trim().parse::<usize>().map_err(|_| invalid());
    match raw.split_once('-') {
        Some((start, end)) => Ok((parse(start)?, parse(end)?)),
        None => {
            let single = parse(raw)?;
            Ok((single, single))
        }
    }
}

/// Blocks whose 1-based index falls in `range`, inclusive.
pub fn blocks_in_range(blocks: &[TextBlock], range: (usize, usize)) -> Vec<TextBlock> {
    let (start, end) = (range.0.min(range.1), range.0.max(range.1));
    blocks
        .iter()
        .filter(|b| (start..=end).contains(&b.index))
        .cloned()
        .collect()
}
