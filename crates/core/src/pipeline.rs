use std::time::Duration;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::align::{align_blocks, Alignment};
use crate::config::{AlignConfig, EngineConfig};
use crate::deadline::Deadline;
use crate::error::Result;
use crate::fulltext::FullText;
use crate::lexicon::Lexicon;
use crate::ranges::{full_range, region_range, total_text_ops, variable_ranges, RangeResult, RangeValue, RegionMode};
use crate::report::AlignReport;
use crate::segment::{
    needs_spacing_fix, respace_with_vocabulary, segment, vocabulary, OperatorFilter, SegmentOptions,
    Segmentation, TextBlock,
};
use crate::source::{DecodedText, TextOpsSource};
use crate::tokenizer::{tokenize_with_deadline, Token};

/// One content stream taken apart: tokens, blocks and the reconstructed
/// text used to cut values out of it.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub label: String,
    pub page: Option<u32>,
    pub tokens: Vec<Token>,
    pub decoded: DecodedText,
    pub segmentation: Segmentation,
    /// Every text-showing occurrence of the stream, ignoring the filter.
    pub total_text_ops: usize,
    pub full_text: FullText,
    pub timed_out: bool,
}

impl LoadedDocument {
    pub fn blocks(&self) -> &[TextBlock] {
        &self.segmentation.blocks
    }

    pub fn range_value(&self, start: usize, end: usize) -> RangeValue {
        RangeValue {
            page: self.page,
            start_op: start,
            end_op: end,
            value_full: self.full_text.value_full(start, end),
        }
    }
}

/// Outcome of aligning one document pair for one region.
#[derive(Debug, Clone)]
pub struct RegionResult {
    pub region: RegionMode,
    pub ranges: RangeResult,
    pub alignment: Alignment,
    pub report: AlignReport,
    pub timed_out: bool,
}

#[derive(Debug, Clone)]
pub struct EngineBuilder {
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    pub fn align(mut self, align: AlignConfig) -> Self {
        self.config.align = align;
        self
    }

    pub fn filter(mut self, filter: OperatorFilter) -> Self {
        self.config.filter = filter;
        self
    }

    pub fn allow_spacing_fix(mut self, allow: bool) -> Self {
        self.config.allow_spacing_fix = allow;
        self
    }

    pub fn budget(mut self, budget: Option<Duration>) -> Self {
        self.config.budget = budget;
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            config: self.config,
        }
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Reads, tokenizes and segments one source within the configured budget.
    pub fn load<S: TextOpsSource + ?Sized>(&self, source: &S) -> Result<LoadedDocument> {
        let deadline = Deadline::from_budget(self.config.budget);
        let bytes = source.stream_bytes()?;
        let tokenized = tokenize_with_deadline(&bytes, deadline);
        let decoded = source.decoded();
        let options = SegmentOptions {
            filter: self.config.filter.clone(),
            allow_spacing_fix: self.config.allow_spacing_fix,
            deadline,
        };
        let segmentation = segment(&tokenized.tokens, &decoded, &options);
        let full_text = FullText::reconstruct(&tokenized.tokens, &decoded.occurrences, &self.config.filter);
        let timed_out = tokenized.timed_out || segmentation.timed_out;
        let label = source.label();
        if timed_out {
            warn!(source = %label, "[timeout] partial segmentation");
        }
        debug!(
            source = %label,
            tokens = tokenized.tokens.len(),
            blocks = segmentation.blocks.len(),
            strategy = ?segmentation.strategy,
            "document loaded"
        );
        Ok(LoadedDocument {
            label,
            page: source.page(),
            total_text_ops: total_text_ops(&tokenized.tokens),
            tokens: tokenized.tokens,
            decoded,
            segmentation,
            full_text,
            timed_out,
        })
    }

    /// Range of the whole stream, for when there is no second document.
    pub fn full_value<S: TextOpsSource + ?Sized>(&self, source: &S) -> Result<Option<RangeValue>> {
        let doc = self.load(source)?;
        Ok(full_range(doc.blocks()).map(|(start, end)| doc.range_value(start, end)))
    }

    pub fn align_pair<A, B>(&self, a: &A, b: &B, lexicon: &Lexicon, region: RegionMode) -> Result<RegionResult>
    where
        A: TextOpsSource + ?Sized,
        B: TextOpsSource + ?Sized,
    {
        let doc_a = self.load(a)?;
        let doc_b = self.load(b)?;
        Ok(self.align_documents(&doc_a, &doc_b, lexicon, region))
    }

    /// Aligns two loaded documents. Glued text on one side is re-spaced with
    /// the other side's vocabulary before alignment.
    pub fn align_documents(
        &self,
        doc_a: &LoadedDocument,
        doc_b: &LoadedDocument,
        lexicon: &Lexicon,
        region: RegionMode,
    ) -> RegionResult {
        let align = &self.config.align;
        let (blocks_a, blocks_b) = self.respaced(doc_a.blocks(), doc_b.blocks());
        let timed_out = doc_a.timed_out || doc_b.timed_out;

        if blocks_a.is_empty() || blocks_b.is_empty() {
            warn!(
                a = %doc_a.label,
                b = %doc_b.label,
                blocks_a = blocks_a.len(),
                blocks_b = blocks_b.len(),
                "no blocks to align"
            );
            let ranges = RangeResult {
                a: RangeValue {
                    page: doc_a.page,
                    ..RangeValue::default()
                },
                b: RangeValue {
                    page: doc_b.page,
                    ..RangeValue::default()
                },
            };
            return RegionResult {
                region,
                report: self.report(doc_a, doc_b, region, AlignReport::default(), &ranges, timed_out),
                ranges,
                alignment: Alignment::default(),
                timed_out,
            };
        }

        let alignment = align_blocks(&blocks_a, &blocks_b, lexicon, align);
        let (range_a, range_b) = variable_ranges(&alignment.pairs, &blocks_a, &blocks_b);
        let (start_a, end_a) = region_range(range_a, &blocks_a, doc_a.total_text_ops, region, align.backoff);
        let (start_b, end_b) = region_range(range_b, &blocks_b, doc_b.total_text_ops, region, align.backoff);
        let ranges = RangeResult {
            a: doc_a.range_value(start_a, end_a),
            b: doc_b.range_value(start_b, end_b),
        };
        let report = AlignReport::build(&blocks_a, &blocks_b, &alignment, align);
        RegionResult {
            region,
            report: self.report(doc_a, doc_b, region, report, &ranges, timed_out),
            ranges,
            alignment,
            timed_out,
        }
    }

    /// Aligns many pairs in parallel; results keep the input order.
    pub fn align_batch<A, B>(&self, pairs: &[(A, B)], lexicon: &Lexicon, region: RegionMode) -> Vec<Result<RegionResult>>
    where
        A: TextOpsSource + Sync,
        B: TextOpsSource + Sync,
    {
        pairs
            .par_iter()
            .map(|(a, b)| self.align_pair(a, b, lexicon, region))
            .collect()
    }

    fn respaced(&self, a: &[TextBlock], b: &[TextBlock]) -> (Vec<TextBlock>, Vec<TextBlock>) {
        if !self.config.allow_spacing_fix {
            return (a.to_vec(), b.to_vec());
        }
        match (needs_spacing_fix(a), needs_spacing_fix(b)) {
            (false, true) => {
                debug!("re-spacing B with A's vocabulary");
                (a.to_vec(), respace_with_vocabulary(b, &vocabulary(a)))
            }
            (true, false) => {
                debug!("re-spacing A with B's vocabulary");
                (respace_with_vocabulary(a, &vocabulary(b)), b.to_vec())
            }
            _ => (a.to_vec(), b.to_vec()),
        }
    }

    fn report(
        &self,
        doc_a: &LoadedDocument,
        doc_b: &LoadedDocument,
        region: RegionMode,
        report: AlignReport,
        ranges: &RangeResult,
        timed_out: bool,
    ) -> AlignReport {
        AlignReport {
            label: region.to_string(),
            source_a: doc_a.label.clone(),
            source_b: doc_b.label.clone(),
            region,
            params: self.config.align.clone(),
            ranges: ranges.clone(),
            timed_out,
            ..report
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    const A: &str = "BT /F1 10 Tf 1 0 0 1 50 700 Tm (PROCESSO: 001) Tj 1 0 0 1 50 680 Tm (VALOR: R$ 100,00) Tj ET";
    const B: &str = "BT /F1 10 Tf 1 0 0 1 50 700 Tm (PROCESSO: 001) Tj 1 0 0 1 50 680 Tm (VALOR: R$ 250,00) Tj ET";

    fn engine() -> Engine {
        Engine::builder().align(AlignConfig::default().backoff(0)).build()
    }

    #[test]
    fn pair_ranges_cover_the_differing_block() {
        let a = MemorySource::new("a", A.as_bytes().to_vec());
        let b = MemorySource::new("b", B.as_bytes().to_vec());
        let result = engine()
            .align_pair(&a, &b, &Lexicon::default(), RegionMode::FrontHead)
            .unwrap();
        assert_eq!((result.ranges.a.start_op, result.ranges.a.end_op), (2, 2));
        assert_eq!((result.ranges.b.start_op, result.ranges.b.end_op), (2, 2));
        assert_eq!(result.ranges.b.value_full, "VALOR: R$ 250,00");
        assert_eq!(result.report.source_a, "a");
        assert!(!result.timed_out);
    }

    #[test]
    fn missing_stream_is_an_error() {
        let a = MemorySource::new("a", Vec::new());
        let b = MemorySource::new("b", B.as_bytes().to_vec());
        assert!(engine()
            .align_pair(&a, &b, &Lexicon::default(), RegionMode::FrontHead)
            .is_err());
    }

    #[test]
    fn empty_side_yields_empty_ranges() {
        let a = MemorySource::new("a", b"q 1 0 0 1 0 0 cm Q".to_vec());
        let b = MemorySource::new("b", B.as_bytes().to_vec());
        let result = engine()
            .align_pair(&a, &b, &Lexicon::default(), RegionMode::BackTail)
            .unwrap();
        assert!(result.ranges.a.is_empty());
        assert!(result.ranges.b.is_empty());
        assert!(result.alignment.pairs.is_empty());
    }

    #[test]
    fn batch_keeps_input_order() {
        let pairs = vec![
            (
                MemorySource::new("a1", A.as_bytes().to_vec()),
                MemorySource::new("b1", B.as_bytes().to_vec()),
            ),
            (
                MemorySource::new("a2", A.as_bytes().to_vec()),
                MemorySource::new("b2", A.as_bytes().to_vec()),
            ),
        ];
        let results = engine().align_batch(&pairs, &Lexicon::default(), RegionMode::FrontHead);
        assert_eq!(results.len(), 2);
        let first = results[0].as_ref().unwrap();
        assert_eq!(first.report.source_b, "b1");
        let second = results[1].as_ref().unwrap();
        // No variable block: the range falls back to every block.
        assert_eq!((second.ranges.a.start_op, second.ranges.a.end_op), (1, 2));
    }

    #[test]
    fn full_value_spans_the_stream() {
        let a = MemorySource::new("a", A.as_bytes().to_vec());
        let value = engine().full_value(&a).unwrap().unwrap();
        assert_eq!((value.start_op, value.end_op), (1, 2));
        assert_eq!(value.value_full, "PROCESSO: 001 VALOR: R$ 100,00");
    }
}
