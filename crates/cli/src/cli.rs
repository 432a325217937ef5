use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::source::SourceSpec;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const VERSION_LONG: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (features: ",
    env!("TMPLDIFF_FEATURES"),
    ")"
);

/// Sources are `file.pdf#obj=12`, `file.pdf#page=2` (or `file.pdf#12` for an
/// object) and plain paths to already decompressed content streams.
#[derive(Parser, Debug)]
#[command(
    name = "tmpldiff",
    version = VERSION,
    long_version = VERSION_LONG,
    about = "Locate the filled-in parts of PDF form streams by diffing them against a template"
)]
pub struct Cli {
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Dump the lexical tokens of one content stream.
    Tokenize {
        source: SourceSpec,
        #[command(flatten)]
        load: LoadArgs,
        #[arg(short = 'o', long = "out")]
        out: Option<PathBuf>,
    },
    /// Segment one stream into text blocks with their length and type patterns.
    Blocks {
        source: SourceSpec,
        #[arg(long)]
        decoded: Option<PathBuf>,
        #[command(flatten)]
        load: LoadArgs,
        #[arg(short = 'o', long = "out")]
        out: Option<PathBuf>,
    },
    /// Range and text of a whole stream.
    Value {
        source: SourceSpec,
        #[arg(long)]
        decoded: Option<PathBuf>,
        #[command(flatten)]
        load: LoadArgs,
    },
    /// Align two streams and print the variable ranges of each region.
    Align {
        a: SourceSpec,
        b: SourceSpec,
        #[arg(long = "decoded-a")]
        decoded_a: Option<PathBuf>,
        #[arg(long = "decoded-b")]
        decoded_b: Option<PathBuf>,
        #[command(flatten)]
        align: AlignArgs,
        /// Write the full alignment report (one per region) as JSON.
        #[arg(long)]
        report: Option<PathBuf>,
        #[arg(short = 'o', long = "out")]
        out: Option<PathBuf>,
    },
    /// Align many pairs listed in a JSON or JSONL manifest.
    Batch {
        manifest: PathBuf,
        #[command(flatten)]
        align: AlignArgs,
        #[arg(long)]
        jobs: Option<usize>,
        #[arg(short = 'o', long = "out")]
        out: Option<PathBuf>,
    },
    /// Guess the variable blocks of a single document and write anchor hints.
    Anchors {
        source: SourceSpec,
        #[arg(long)]
        decoded: Option<PathBuf>,
        #[command(flatten)]
        load: LoadArgs,
        /// Restrict to 1-based block indexes, e.g. `3` or `2-9`.
        #[arg(long)]
        blocks: Option<String>,
        #[arg(long = "min-token-len")]
        min_token_len: Option<usize>,
        #[arg(long = "pattern-max")]
        pattern_max: Option<usize>,
        /// YAML, TOML or JSON file with fixed/variable block rules.
        #[arg(long)]
        rules: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = AnchorsFormat::Json)]
        format: AnchorsFormat,
        #[arg(short = 'o', long = "out")]
        out: Option<PathBuf>,
    },
    /// Score two texts and split them into fixed and variable segments.
    Compare {
        a: String,
        b: String,
    },
    /// Type and length patterns of a piece of text.
    Pattern {
        text: String,
    },
    /// List the pages of a PDF and the objects holding their content streams.
    #[cfg(feature = "pdf")]
    Streams {
        pdf: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AnchorsFormat {
    Json,
    Jsonl,
}

/// How a stream is read and segmented.
#[derive(Args, Debug, Clone, Default)]
pub struct LoadArgs {
    /// Text-showing operators to keep, e.g. `Tj,TJ`.
    #[arg(long)]
    pub ops: Option<String>,
    #[arg(long = "budget-ms")]
    pub budget_ms: Option<u64>,
    #[arg(long = "no-spacing-fix", action = ArgAction::SetTrue)]
    pub no_spacing_fix: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct AlignArgs {
    #[command(flatten)]
    pub load: LoadArgs,
    /// `front_head` or `back_tail`; repeat for both.
    #[arg(long)]
    pub region: Vec<String>,
    /// YAML or TOML phrase lexicon.
    #[arg(long)]
    pub lexicon: Option<PathBuf>,
    #[arg(long = "no-lexicon", action = ArgAction::SetTrue)]
    pub no_lexicon: bool,
    #[arg(long = "min-sim")]
    pub min_sim: Option<f64>,
    #[arg(long)]
    pub band: Option<usize>,
    #[arg(long = "min-len-ratio")]
    pub min_len_ratio: Option<f64>,
    #[arg(long = "len-penalty")]
    pub len_penalty: Option<f64>,
    #[arg(long = "anchor-min-sim")]
    pub anchor_min_sim: Option<f64>,
    #[arg(long = "anchor-min-len-ratio")]
    pub anchor_min_len_ratio: Option<f64>,
    #[arg(long = "gap-penalty", allow_hyphen_values = true)]
    pub gap_penalty: Option<f64>,
    #[arg(long)]
    pub backoff: Option<usize>,
}
