mod align;
mod anchors;
mod config;
mod deadline;
mod error;
mod fulltext;
mod labels;
mod layout;
mod lexicon;
mod normalization;
mod pattern;
mod payload;
mod pipeline;
mod ranges;
mod report;
mod segment;
mod similarity;
mod source;
mod template;
mod tokenizer;

pub use align::{align_blocks, align_segment, Alignment, BlockAlignment};
pub use anchors::{
    auto_anchors, explicit_anchors, merge_anchors, select_monotonic, AnchorPair, AutoAnchors,
    ANCHOR_MODE_CUE_RATE,
};
pub use config::{
    AlignConfig, EngineConfig, DEFAULT_ANCHOR_MIN_LEN_RATIO, DEFAULT_ANCHOR_MIN_SIM, DEFAULT_BACKOFF,
    DEFAULT_BAND, DEFAULT_GAP_PENALTY, DEFAULT_LEN_PENALTY, DEFAULT_MIN_LEN_RATIO, DEFAULT_MIN_SIM,
};
pub use deadline::{run_with_budget, Deadline};
pub use error::{Result, TmplDiffError};
pub use fulltext::FullText;
pub use labels::{canonical_label, is_critical_label, leading_label, semantic_cue, LabelInfo};
pub use layout::{BoundingBox, TextItem};
pub use lexicon::{
    expand_templates, label_phrases, DecisionStatus, Lexicon, LexiconAnchors, LexiconBuilder,
    LexiconDecision, LexiconDiagnostics, LexiconFile, LexiconHit, Phrase, PhraseGroup,
};
pub use normalization::{
    collapse_spaced_letters, comparison_form, fix_missing_spaces, normalize_full_text,
    normalize_pattern_text, normalize_whitespace, remove_diacritics,
};
pub use pattern::{
    encode_pattern_simple, encode_pattern_typed, parse_date, parse_money, pattern_blocks,
    PatternBlock,
};
pub use payload::resolve_text;
pub use pipeline::{Engine, EngineBuilder, LoadedDocument, RegionResult};
pub use ranges::{
    full_range, region_range, total_text_ops, variable_ranges, RangeResult, RangeValue, RegionMode,
    VariableRange,
};
pub use report::{
    AlignReport, DebugBlock, DebugPair, PairKind, PairSegment, PairSegments, SegmentKind,
};
pub use segment::{
    needs_spacing_fix, segment, OperatorFilter, SegmentOptions, SegmentStrategy, Segmentation,
    TextBlock,
};
pub use similarity::{
    alignment_similarity, is_anchor_cue, len_ratio, normalize_for_similarity,
    reject_as_anchor_mismatch, similarity, word_similarity, PairScorer,
};
pub use source::{DecodedText, MemorySource, TextOpsSource};
pub use template::{
    blocks_in_range, build_self_anchors, classify_self_blocks, parse_block_range,
    select_self_variable_blocks, AnchorHint, AnchorsFile, BlockRule, BlockRules, JsonlWriter,
    SelfClassification,
};
pub use tokenizer::{
    is_operator, is_text_show_operator, tokenize, tokenize_with_deadline, Token, TokenKind,
    Tokenized,
};
