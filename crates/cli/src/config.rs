use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{info, warn};

use tmpldiff_core::{
    AlignConfig, EngineConfig, Lexicon, LexiconFile, OperatorFilter, RegionMode,
};

use crate::cli::{AlignArgs, LoadArgs};

pub const DEFAULT_CONFIG: &str = "tmpldiff.toml";
const DEFAULT_MIN_TOKEN_LEN: usize = 1;
const DEFAULT_PATTERN_MAX: usize = 1;

static LEXICON: OnceCell<Lexicon> = OnceCell::new();

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub defaults: Defaults,
}

/// `[defaults]` of `tmpldiff.toml`; every field is overridden by its flag.
#[derive(Debug, Default, Deserialize)]
pub struct Defaults {
    #[serde(default)]
    pub align: AlignConfig,
    #[serde(default)]
    pub region: Vec<String>,
    pub lexicon: Option<PathBuf>,
    pub ops: Option<String>,
    pub budget_ms: Option<u64>,
    pub allow_spacing_fix: Option<bool>,
    pub rules: Option<PathBuf>,
    pub min_token_len: Option<usize>,
    pub pattern_max: Option<usize>,
}

pub fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&contents).map_err(|e| anyhow!("invalid config: {e}"))
}

pub fn resolve_engine_config(load: &LoadArgs, align: AlignConfig, defaults: &Defaults) -> EngineConfig {
    let filter = load
        .ops
        .as_deref()
        .or(defaults.ops.as_deref())
        .map(|ops| OperatorFilter::from_str(ops).unwrap_or_default())
        .unwrap_or_default();
    let allow_spacing_fix = if load.no_spacing_fix {
        false
    } else {
        defaults.allow_spacing_fix.unwrap_or(true)
    };
    let budget = load
        .budget_ms
        .or(defaults.budget_ms)
        .map(Duration::from_millis);
    EngineConfig {
        align,
        filter,
        allow_spacing_fix,
        budget,
    }
}

pub fn resolve_align_config(args: &AlignArgs, defaults: &Defaults) -> AlignConfig {
    let mut config = defaults.align.clone();
    if let Some(v) = args.min_sim {
        config = config.min_sim(v);
    }
    if let Some(v) = args.band {
        config = config.band(v);
    }
    if let Some(v) = args.min_len_ratio {
        config = config.min_len_ratio(v);
    }
    if let Some(v) = args.len_penalty {
        config = config.len_penalty(v);
    }
    if let Some(v) = args.anchor_min_sim {
        config = config.anchor_min_sim(v);
    }
    if let Some(v) = args.anchor_min_len_ratio {
        config = config.anchor_min_len_ratio(v);
    }
    if let Some(v) = args.gap_penalty {
        config = config.gap_penalty(v);
    }
    if let Some(v) = args.backoff {
        config = config.backoff(v);
    }
    if args.no_lexicon {
        config = config.use_lexicon(false);
    }
    config
}

pub fn resolve_regions(args: &AlignArgs, defaults: &Defaults) -> Result<Vec<RegionMode>> {
    let raw = if args.region.is_empty() {
        &defaults.region
    } else {
        &args.region
    };
    if raw.is_empty() {
        return Ok(vec![RegionMode::default()]);
    }
    let mut regions = Vec::with_capacity(raw.len());
    for value in raw {
        let region: RegionMode = value.parse()?;
        if !regions.contains(&region) {
            regions.push(region);
        }
    }
    Ok(regions)
}

pub fn self_thresholds(
    min_token_len: Option<usize>,
    pattern_max: Option<usize>,
    defaults: &Defaults,
) -> (usize, usize) {
    let min_token_len = min_token_len
        .or(defaults.min_token_len)
        .unwrap_or(DEFAULT_MIN_TOKEN_LEN);
    let pattern_max = pattern_max.or(defaults.pattern_max).unwrap_or(DEFAULT_PATTERN_MAX);
    (min_token_len.max(1), pattern_max.max(1))
}

/// Loaded on first use and shared by every alignment of the run. A file
/// that cannot be read leaves the lexicon empty.
pub fn lexicon(args: &AlignArgs, defaults: &Defaults) -> &'static Lexicon {
    LEXICON.get_or_init(|| {
        if args.no_lexicon {
            return Lexicon::default();
        }
        let Some(path) = args.lexicon.as_deref().or(defaults.lexicon.as_deref()) else {
            return Lexicon::default();
        };
        match read_structured::<LexiconFile>(path) {
            Ok(file) => {
                let lexicon = Lexicon::from_groups(&file.groups);
                info!(path = %path.display(), phrases = lexicon.len(), "lexicon loaded");
                lexicon
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "lexicon not loaded, aligning without it");
                Lexicon::default()
            }
        }
    })
}

/// Deserializes a YAML, TOML or JSON file picked by extension.
pub fn read_structured<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("invalid YAML in {}", path.display())),
        "toml" => toml::from_str(&contents)
            .with_context(|| format!("invalid TOML in {}", path.display())),
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("invalid JSON in {}", path.display())),
        other => bail!("unsupported file format {other:?} for {}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tmpldiff_core::{BlockRules, DEFAULT_BACKOFF};

    #[test]
    fn missing_config_file_uses_defaults() {
        let config = load_config(Path::new("does-not-exist.toml")).unwrap();
        assert_eq!(config.defaults.align, AlignConfig::default());
        assert!(config.defaults.lexicon.is_none());
    }

    #[test]
    fn flags_override_file_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [defaults]
            region = ["back_tail"]
            ops = "Tj"

            [defaults.align]
            min_sim = 0.4
            backoff = 5
            "#,
        )
        .unwrap();
        let args = AlignArgs {
            backoff: Some(0),
            ..AlignArgs::default()
        };
        let align = resolve_align_config(&args, &config.defaults);
        assert_eq!(align.min_sim, 0.4);
        assert_eq!(align.backoff, 0);
        assert_eq!(
            resolve_regions(&args, &config.defaults).unwrap(),
            vec![RegionMode::BackTail]
        );
        let engine = resolve_engine_config(&args.load, align, &config.defaults);
        assert!(engine.filter.allows("Tj"));
        assert!(!engine.filter.allows("TJ"));
        assert!(engine.allow_spacing_fix);
    }

    #[test]
    fn regions_default_and_dedupe() {
        let defaults = Defaults::default();
        let args = AlignArgs {
            region: vec!["front".into(), "front_head".into(), "tail".into()],
            ..AlignArgs::default()
        };
        assert_eq!(
            resolve_regions(&args, &defaults).unwrap(),
            vec![RegionMode::FrontHead, RegionMode::BackTail]
        );
        assert_eq!(
            resolve_regions(&AlignArgs::default(), &defaults).unwrap(),
            vec![RegionMode::FrontHead]
        );
        let bad = AlignArgs {
            region: vec!["middle".into()],
            ..AlignArgs::default()
        };
        assert!(resolve_regions(&bad, &defaults).is_err());
        assert_eq!(
            resolve_align_config(&AlignArgs::default(), &defaults).backoff,
            DEFAULT_BACKOFF
        );
    }

    #[test]
    fn structured_files_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("rules.yaml");
        fs::write(&yaml, "variable:\n  - regex: '^\\d+$'\n").unwrap();
        let rules: BlockRules = read_structured(&yaml).unwrap();
        assert_eq!(rules.variable.len(), 1);

        let toml_path = dir.path().join("lexicon.toml");
        fs::write(&toml_path, "[[groups]]\nkey = \"nome\"\nlabels = [\"Nome\"]\n").unwrap();
        let file: LexiconFile = read_structured(&toml_path).unwrap();
        assert_eq!(file.groups[0].key, "nome");

        let txt = dir.path().join("lexicon.txt");
        fs::write(&txt, "").unwrap();
        assert!(read_structured::<LexiconFile>(&txt).is_err());
    }
}
