use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use tmpldiff_core::{
    alignment_similarity, blocks_in_range, build_self_anchors, classify_self_blocks,
    encode_pattern_simple, encode_pattern_typed, is_anchor_cue, len_ratio, normalize_pattern_text,
    parse_block_range, pattern_blocks, similarity, tokenize_with_deadline, word_similarity,
    AnchorsFile, BlockRules, Deadline, Engine, EngineConfig, PairSegments, PatternBlock,
    RangeResult, RangeValue, RegionMode, SegmentStrategy, TextOpsSource,
};

use crate::cli::{AlignArgs, AnchorsFormat, Commands, LoadArgs};
use crate::config::{
    lexicon, read_structured, resolve_align_config, resolve_engine_config, resolve_regions,
    self_thresholds, AppConfig, Defaults,
};
use crate::output::Output;
use crate::source::{FileSource, SourceSpec};

pub fn run(command: Commands, config: &AppConfig) -> Result<()> {
    let defaults = &config.defaults;
    match command {
        Commands::Tokenize { source, load, out } => tokenize(source, &load, defaults, out.as_deref()),
        Commands::Blocks {
            source,
            decoded,
            load,
            out,
        } => blocks(source, decoded.as_deref(), &load, defaults, out.as_deref()),
        Commands::Value {
            source,
            decoded,
            load,
        } => value(source, decoded.as_deref(), &load, defaults),
        Commands::Align {
            a,
            b,
            decoded_a,
            decoded_b,
            align,
            report,
            out,
        } => align_pair(
            (a, decoded_a),
            (b, decoded_b),
            &align,
            defaults,
            report.as_deref(),
            out.as_deref(),
        ),
        Commands::Batch {
            manifest,
            align,
            jobs,
            out,
        } => batch(&manifest, &align, jobs, defaults, out.as_deref()),
        Commands::Anchors {
            source,
            decoded,
            load,
            blocks,
            min_token_len,
            pattern_max,
            rules,
            format,
            out,
        } => {
            let options = AnchorOptions {
                blocks,
                min_token_len,
                pattern_max,
                rules,
                format,
            };
            anchors(source, decoded.as_deref(), &load, &options, defaults, out.as_deref())
        }
        Commands::Compare { a, b } => compare(&a, &b),
        Commands::Pattern { text } => pattern(&text),
        #[cfg(feature = "pdf")]
        Commands::Streams { pdf } => streams(&pdf),
    }
}

fn engine(config: EngineConfig) -> Engine {
    Engine::builder()
        .align(config.align)
        .filter(config.filter)
        .allow_spacing_fix(config.allow_spacing_fix)
        .budget(config.budget)
        .build()
}

fn load_engine(load: &LoadArgs, defaults: &Defaults) -> Engine {
    engine(resolve_engine_config(load, defaults.align.clone(), defaults))
}

fn tokenize(spec: SourceSpec, load: &LoadArgs, defaults: &Defaults, out: Option<&Path>) -> Result<()> {
    let config = resolve_engine_config(load, defaults.align.clone(), defaults);
    let source = FileSource::open(spec, None, config.budget)?;
    let bytes = source.stream_bytes()?;
    let tokenized = tokenize_with_deadline(&bytes, Deadline::from_budget(config.budget));
    if tokenized.timed_out {
        warn!(source = %source.label(), "[timeout] token list is partial");
    }
    Output::open(out)?.json(&tokenized)
}

#[derive(Debug, Serialize)]
struct BlocksView {
    source: String,
    strategy: SegmentStrategy,
    text_op_count: usize,
    total_text_ops: usize,
    timed_out: bool,
    blocks: Vec<PatternBlock>,
}

fn blocks(
    spec: SourceSpec,
    decoded: Option<&Path>,
    load: &LoadArgs,
    defaults: &Defaults,
    out: Option<&Path>,
) -> Result<()> {
    let engine = load_engine(load, defaults);
    let source = FileSource::open(spec, decoded, engine.config().budget)?;
    let doc = engine.load(&source)?;
    let view = BlocksView {
        source: doc.label.clone(),
        strategy: doc.segmentation.strategy,
        text_op_count: doc.segmentation.text_op_count,
        total_text_ops: doc.total_text_ops,
        timed_out: doc.timed_out,
        blocks: pattern_blocks(doc.blocks()),
    };
    Output::open(out)?.json(&view)
}

fn value(spec: SourceSpec, decoded: Option<&Path>, load: &LoadArgs, defaults: &Defaults) -> Result<()> {
    let engine = load_engine(load, defaults);
    let source = FileSource::open(spec, decoded, engine.config().budget)?;
    let value = engine.full_value(&source)?;
    if value.is_none() {
        warn!(source = %source.label(), "no text blocks in stream");
    }
    Output::open(None)?.json(&serde_json::json!({
        "source": source.label(),
        "value": value,
    }))
}

#[derive(Debug, Serialize)]
struct RegionSummary {
    region: RegionMode,
    a: RangeValue,
    b: RangeValue,
    anchors: usize,
    variable_blocks: usize,
    timed_out: bool,
}

fn align_pair(
    (a, decoded_a): (SourceSpec, Option<PathBuf>),
    (b, decoded_b): (SourceSpec, Option<PathBuf>),
    args: &AlignArgs,
    defaults: &Defaults,
    report: Option<&Path>,
    out: Option<&Path>,
) -> Result<()> {
    let regions = resolve_regions(args, defaults)?;
    let engine = engine(resolve_engine_config(
        &args.load,
        resolve_align_config(args, defaults),
        defaults,
    ));
    let lexicon = lexicon(args, defaults);
    let budget = engine.config().budget;
    let source_a = FileSource::open(a, decoded_a.as_deref(), budget)?;
    let source_b = FileSource::open(b, decoded_b.as_deref(), budget)?;
    let doc_a = engine
        .load(&source_a)
        .with_context(|| format!("failed to load {}", source_a.label()))?;
    let doc_b = engine
        .load(&source_b)
        .with_context(|| format!("failed to load {}", source_b.label()))?;

    let mut summaries = Vec::with_capacity(regions.len());
    let mut reports = Vec::with_capacity(regions.len());
    for region in regions {
        let result = engine.align_documents(&doc_a, &doc_b, lexicon, region);
        info!(
            region = %region,
            a = ?(result.ranges.a.start_op, result.ranges.a.end_op),
            b = ?(result.ranges.b.start_op, result.ranges.b.end_op),
            "aligned"
        );
        summaries.push(RegionSummary {
            region,
            a: result.ranges.a.clone(),
            b: result.ranges.b.clone(),
            anchors: result.alignment.anchors.len(),
            variable_blocks: result.report.variable_blocks_a.len(),
            timed_out: result.timed_out,
        });
        reports.push(result.report);
    }

    if let Some(path) = report {
        let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(file, &reports)?;
        debug!(path = %path.display(), "report written");
    }
    Output::open(out)?.json(&summaries)
}

/// One line of a batch manifest.
#[derive(Debug, Clone, Deserialize)]
struct BatchEntry {
    a: SourceSpec,
    b: SourceSpec,
    #[serde(default)]
    decoded_a: Option<PathBuf>,
    #[serde(default)]
    decoded_b: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct BatchRecord {
    a: String,
    b: String,
    region: RegionMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    ranges: Option<RangeResult>,
    timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn read_manifest(path: &Path) -> Result<Vec<BatchEntry>> {
    let is_jsonl = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("jsonl"));
    if !is_jsonl {
        return read_structured(path);
    }
    let reader = BufReader::new(
        File::open(path).with_context(|| format!("failed to open manifest {}", path.display()))?,
    );
    let mut entries = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid manifest entry", path.display(), line_no + 1))?;
        entries.push(entry);
    }
    Ok(entries)
}

fn batch(
    manifest: &Path,
    args: &AlignArgs,
    jobs: Option<usize>,
    defaults: &Defaults,
    out: Option<&Path>,
) -> Result<()> {
    let regions = resolve_regions(args, defaults)?;
    let engine = engine(resolve_engine_config(
        &args.load,
        resolve_align_config(args, defaults),
        defaults,
    ));
    let lexicon = lexicon(args, defaults);
    let budget = engine.config().budget;

    let entries = read_manifest(manifest)?;
    let mut pairs = Vec::with_capacity(entries.len());
    for entry in entries {
        let a = FileSource::open(entry.a, entry.decoded_a.as_deref(), budget)?;
        let b = FileSource::open(entry.b, entry.decoded_b.as_deref(), budget)?;
        pairs.push((a, b));
    }
    info!(pairs = pairs.len(), regions = regions.len(), "batch started");

    let pool = match jobs {
        Some(n) => Some(
            rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .context("failed to start worker pool")?,
        ),
        None => None,
    };
    let output = Output::open(out)?;
    let mut failures = 0usize;
    for region in regions {
        let results = match &pool {
            Some(pool) => pool.install(|| engine.align_batch(&pairs, lexicon, region)),
            None => engine.align_batch(&pairs, lexicon, region),
        };
        for ((a, b), result) in pairs.iter().zip(results) {
            let record = match result {
                Ok(result) => BatchRecord {
                    a: a.label(),
                    b: b.label(),
                    region,
                    ranges: Some(result.ranges),
                    timed_out: result.timed_out,
                    error: None,
                },
                Err(err) => {
                    failures += 1;
                    warn!(a = %a.label(), b = %b.label(), error = %err, "pair skipped");
                    BatchRecord {
                        a: a.label(),
                        b: b.label(),
                        region,
                        ranges: None,
                        timed_out: false,
                        error: Some(err.to_string()),
                    }
                }
            };
            output.record(&record)?;
        }
    }
    info!(failures, "batch finished");
    Ok(())
}

struct AnchorOptions {
    blocks: Option<String>,
    min_token_len: Option<usize>,
    pattern_max: Option<usize>,
    rules: Option<PathBuf>,
    format: AnchorsFormat,
}

fn anchors(
    spec: SourceSpec,
    decoded: Option<&Path>,
    load: &LoadArgs,
    options: &AnchorOptions,
    defaults: &Defaults,
    out: Option<&Path>,
) -> Result<()> {
    let engine = load_engine(load, defaults);
    let source = FileSource::open(spec, decoded, engine.config().budget)?;
    let doc = engine.load(&source)?;

    let blocks = match options.blocks.as_deref() {
        Some(raw) => blocks_in_range(doc.blocks(), parse_block_range(raw)?),
        None => doc.blocks().to_vec(),
    };
    let rules: Option<BlockRules> = options
        .rules
        .as_deref()
        .or(defaults.rules.as_deref())
        .map(read_structured::<BlockRules>)
        .transpose()?;
    let (min_token_len, pattern_max) = self_thresholds(options.min_token_len, options.pattern_max, defaults);
    let classified = classify_self_blocks(&blocks, min_token_len, pattern_max, rules.as_ref());
    debug!(
        variable = classified.variable.len(),
        fixed = classified.fixed.len(),
        "self classification"
    );

    let spec = source.spec();
    let mut file = AnchorsFile::new(spec.obj(), build_self_anchors(&classified.variable, &classified.fixed));
    file.doc = spec
        .path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned());
    file.source_file = Some(spec.path.display().to_string());

    match (options.format, out) {
        (AnchorsFormat::Json, Some(path)) => file.save_json(path)?,
        (AnchorsFormat::Jsonl, Some(path)) => file.save_jsonl(path)?,
        (AnchorsFormat::Json, None) => Output::open(None)?.json(&file)?,
        (AnchorsFormat::Jsonl, None) => {
            let output = Output::open(None)?;
            for anchor in &file.anchors {
                output.record(anchor)?;
            }
        }
    }
    info!(anchors = file.anchors.len(), "anchor hints written");
    Ok(())
}

fn compare(a: &str, b: &str) -> Result<()> {
    Output::open(None)?.json(&serde_json::json!({
        "similarity": similarity(a, b),
        "alignment_similarity": alignment_similarity(a, b),
        "word_similarity": word_similarity(a, b),
        "len_ratio": len_ratio(a, b),
        "anchor_cue_a": is_anchor_cue(a),
        "segments": PairSegments::compute(a, b),
    }))
}

fn pattern(text: &str) -> Result<()> {
    Output::open(None)?.json(&serde_json::json!({
        "text": text,
        "normalized": normalize_pattern_text(text),
        "simple": encode_pattern_simple(text),
        "typed": encode_pattern_typed(text),
    }))
}

#[cfg(feature = "pdf")]
fn streams(pdf: &Path) -> Result<()> {
    let pages = crate::source::pdf::list_streams(pdf)?;
    let output = Output::open(None)?;
    for page in &pages {
        output.record(page)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const FORM_A: &str = "BT 1 0 0 1 50 700 Tm (PROCESSO: 001) Tj 1 0 0 1 50 680 Tm (VALOR: R$ 100,00) Tj ET";
    const FORM_B: &str = "BT 1 0 0 1 50 700 Tm (PROCESSO: 001) Tj 1 0 0 1 50 680 Tm (VALOR: R$ 250,00) Tj ET";

    #[test]
    fn manifest_reads_json_and_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("pairs.json");
        fs::write(&json, r#"[{"a": "a.pdf#obj=3", "b": "b.pdf#page=1"}]"#).unwrap();
        let entries = read_manifest(&json).unwrap();
        assert_eq!(entries[0].a.obj(), 3);
        assert_eq!(entries[0].b.page(), Some(1));

        let jsonl = dir.path().join("pairs.jsonl");
        fs::write(
            &jsonl,
            "{\"a\": \"a.bin\", \"b\": \"b.bin\", \"decoded_a\": \"a.json\"}\n\n{\"a\": \"c.bin\", \"b\": \"d.bin\"}\n",
        )
        .unwrap();
        let entries = read_manifest(&jsonl).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].decoded_a.as_deref(), Some(Path::new("a.json")));

        fs::write(&jsonl, "{\"a\": \"a.pdf#x\", \"b\": \"b.bin\"}\n").unwrap();
        assert!(read_manifest(&jsonl).is_err());
    }

    #[test]
    fn align_writes_summary_and_report() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        fs::write(&a, FORM_A).unwrap();
        fs::write(&b, FORM_B).unwrap();
        let out = dir.path().join("summary.json");
        let report = dir.path().join("report.json");
        let args = AlignArgs {
            backoff: Some(0),
            no_lexicon: true,
            ..AlignArgs::default()
        };
        align_pair(
            (a.to_string_lossy().parse().unwrap(), None),
            (b.to_string_lossy().parse().unwrap(), None),
            &args,
            &Defaults::default(),
            Some(&report),
            Some(&out),
        )
        .unwrap();

        let summary: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(summary[0]["region"], "front_head");
        assert_eq!(summary[0]["b"]["value_full"], "VALOR: R$ 250,00");
        let reports: serde_json::Value = serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
        assert_eq!(reports[0]["alignments"][1]["kind"], "variable");
    }

    #[test]
    fn batch_reports_unreadable_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        fs::write(&a, FORM_A).unwrap();
        let missing = dir.path().join("missing.bin");
        let manifest = dir.path().join("pairs.jsonl");
        let line = |x: &Path, y: &Path| {
            serde_json::json!({"a": x.to_string_lossy(), "b": y.to_string_lossy()}).to_string()
        };
        fs::write(&manifest, format!("{}\n{}\n", line(&a, &a), line(&a, &missing))).unwrap();
        let out = dir.path().join("out.jsonl");
        batch(&manifest, &AlignArgs::default(), Some(2), &Defaults::default(), Some(&out)).unwrap();

        let written = fs::read_to_string(&out).unwrap();
        let records: Vec<serde_json::Value> = written
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert!(records[0]["error"].is_null());
        assert!(records[1]["error"].is_string());
    }

    #[test]
    fn anchors_are_saved_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("form.bin");
        fs::write(&a, FORM_A).unwrap();
        let out = dir.path().join("anchors.jsonl");
        let options = AnchorOptions {
            blocks: None,
            min_token_len: Some(1),
            pattern_max: Some(1),
            rules: None,
            format: AnchorsFormat::Jsonl,
        };
        anchors(
            a.to_string_lossy().parse().unwrap(),
            None,
            &LoadArgs::default(),
            &options,
            &Defaults::default(),
            Some(&out),
        )
        .unwrap();
        let file = AnchorsFile::load_jsonl(&out, 0).unwrap();
        assert_eq!(file.anchors.len(), 2);
        assert_eq!(file.anchors[0].var, "PROCESSO: 001");
    }
}
