use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::segment::OperatorFilter;

pub const DEFAULT_MIN_SIM: f64 = 0.0;
pub const DEFAULT_BAND: usize = 0;
pub const DEFAULT_MIN_LEN_RATIO: f64 = 0.05;
pub const DEFAULT_LEN_PENALTY: f64 = 0.0;
pub const DEFAULT_ANCHOR_MIN_SIM: f64 = 0.0;
pub const DEFAULT_ANCHOR_MIN_LEN_RATIO: f64 = 0.0;
pub const DEFAULT_GAP_PENALTY: f64 = -0.35;
pub const DEFAULT_BACKOFF: usize = 2;

/// Tunables of block alignment and range extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignConfig {
    /// Diagonal floor inside a segment; 0 derives one from the best anchor score.
    pub min_sim: f64,
    /// Maximum |i - j| for a diagonal step; 0 disables the band.
    pub band: usize,
    pub min_len_ratio: f64,
    pub len_penalty: f64,
    pub anchor_min_sim: f64,
    pub anchor_min_len_ratio: f64,
    pub gap_penalty: f64,
    pub backoff: usize,
    pub use_lexicon: bool,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            min_sim: DEFAULT_MIN_SIM,
            band: DEFAULT_BAND,
            min_len_ratio: DEFAULT_MIN_LEN_RATIO,
            len_penalty: DEFAULT_LEN_PENALTY,
            anchor_min_sim: DEFAULT_ANCHOR_MIN_SIM,
            anchor_min_len_ratio: DEFAULT_ANCHOR_MIN_LEN_RATIO,
            gap_penalty: DEFAULT_GAP_PENALTY,
            backoff: DEFAULT_BACKOFF,
            use_lexicon: true,
        }
    }
}

impl AlignConfig {
    pub fn min_sim(mut self, value: f64) -> Self {
        self.min_sim = value;
        self
    }

    pub fn band(mut self, value: usize) -> Self {
        self.band = value;
        self
    }

    pub fn min_len_ratio(mut self, value: f64) -> Self {
        self.min_len_ratio = value;
        self
    }

    pub fn len_penalty(mut self, value: f64) -> Self {
        self.len_penalty = value;
        self
    }

    pub fn anchor_min_sim(mut self, value: f64) -> Self {
        self.anchor_min_sim = value;
        self
    }

    pub fn anchor_min_len_ratio(mut self, value: f64) -> Self {
        self.anchor_min_len_ratio = value;
        self
    }

    pub fn gap_penalty(mut self, value: f64) -> Self {
        self.gap_penalty = value;
        self
    }

    pub fn backoff(mut self, value: usize) -> Self {
        self.backoff = value;
        self
    }

    pub fn use_lexicon(mut self, enabled: bool) -> Self {
        self.use_lexicon = enabled;
        self
    }

    /// Explicit anchor floors replace automatic anchor detection.
    pub fn has_anchor_floors(&self) -> bool {
        self.anchor_min_sim > 0.0 || self.anchor_min_len_ratio > 0.0
    }
}

/// Everything an [`Engine`](crate::Engine) needs besides the lexicon.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub align: AlignConfig,
    pub filter: OperatorFilter,
    pub allow_spacing_fix: bool,
    /// Wall-clock budget per document for stream acquisition and tokenizing.
    pub budget: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            align: AlignConfig::default(),
            filter: OperatorFilter::all(),
            allow_spacing_fix: true,
            budget: None,
        }
    }
}
