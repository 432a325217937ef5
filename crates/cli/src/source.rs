use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context};
use serde::Deserialize;

use tmpldiff_core::{
    run_with_budget, DecodedText, Result as CoreResult, TextItem, TextOpsSource, TmplDiffError,
};

/// Which content stream of a file to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    /// The file is a decompressed content stream.
    Raw,
    Object(u32),
    Page(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct SourceSpec {
    pub path: PathBuf,
    pub selector: Selector,
}

impl SourceSpec {
    pub fn obj(&self) -> u32 {
        match self.selector {
            Selector::Object(obj) => obj,
            _ => 0,
        }
    }

    pub fn page(&self) -> Option<u32> {
        match self.selector {
            Selector::Page(page) => Some(page),
            _ => None,
        }
    }
}

impl FromStr for SourceSpec {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> anyhow::Result<Self> {
        let Some((path, selector)) = raw.rsplit_once('#') else {
            return Ok(Self {
                path: PathBuf::from(raw),
                selector: Selector::Raw,
            });
        };
        let selector = selector.trim().to_ascii_lowercase();
        let number = |value: &str| {
            value
                .trim()
                .parse::<u32>()
                .with_context(|| format!("invalid stream selector in {raw:?}"))
        };
        let selector = if let Some(page) = selector.strip_prefix("page=") {
            Selector::Page(number(page)?)
        } else if let Some(obj) = selector.strip_prefix("obj=") {
            Selector::Object(number(obj)?)
        } else {
            Selector::Object(number(&selector)?)
        };
        if path.is_empty() {
            return Err(anyhow!("missing file in {raw:?}"));
        }
        Ok(Self {
            path: PathBuf::from(path),
            selector,
        })
    }
}

impl TryFrom<String> for SourceSpec {
    type Error = anyhow::Error;

    fn try_from(value: String) -> anyhow::Result<Self> {
        value.parse()
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.selector {
            Selector::Raw => write!(f, "{}", self.path.display()),
            Selector::Object(obj) => write!(f, "{}#obj={obj}", self.path.display()),
            Selector::Page(page) => write!(f, "{}#page={page}", self.path.display()),
        }
    }
}

/// A content stream read from disk, plus the decoded-text sidecar when one
/// was given.
#[derive(Debug, Clone)]
pub struct FileSource {
    spec: SourceSpec,
    decoded: DecodedText,
    budget: Option<Duration>,
}

impl FileSource {
    pub fn open(spec: SourceSpec, decoded: Option<&Path>, budget: Option<Duration>) -> anyhow::Result<Self> {
        let decoded = match decoded {
            Some(path) => DecodedText::from_json_file(path)
                .with_context(|| format!("failed to read decoded text {}", path.display()))?,
            None => DecodedText::default(),
        };
        Ok(Self {
            spec,
            decoded,
            budget,
        })
    }

    pub fn spec(&self) -> &SourceSpec {
        &self.spec
    }
}

impl TextOpsSource for FileSource {
    fn stream_bytes(&self) -> CoreResult<Vec<u8>> {
        let label = self.spec.to_string();
        let bytes = match self.spec.selector {
            Selector::Raw => fs::read(&self.spec.path)?,
            selector => {
                let path = self.spec.path.clone();
                run_with_budget(self.budget, move || pdf_stream(&path, selector))
                    .ok_or_else(|| TmplDiffError::StreamUnavailable(format!("{label}: timed out")))??
            }
        };
        if bytes.is_empty() {
            return Err(TmplDiffError::StreamUnavailable(label));
        }
        Ok(bytes)
    }

    fn decoded_occurrences(&self) -> Vec<String> {
        self.decoded.occurrences.clone()
    }

    fn decoded_items(&self) -> Vec<TextItem> {
        self.decoded.items.clone()
    }

    fn stream_text(&self) -> Option<String> {
        self.decoded
            .stream_text
            .clone()
            .or_else(|| self.spec.page().and_then(|page| page_text(&self.spec.path, page)))
    }

    fn label(&self) -> String {
        self.spec.to_string()
    }

    fn page(&self) -> Option<u32> {
        self.spec.page()
    }
}

#[cfg(feature = "pdf")]
fn pdf_stream(path: &Path, selector: Selector) -> CoreResult<Vec<u8>> {
    match selector {
        Selector::Raw => Ok(fs::read(path)?),
        Selector::Object(obj) => pdf::object_stream(path, obj),
        Selector::Page(page) => pdf::page_stream(path, page),
    }
}

#[cfg(not(feature = "pdf"))]
fn pdf_stream(path: &Path, selector: Selector) -> CoreResult<Vec<u8>> {
    match selector {
        Selector::Raw => Ok(fs::read(path)?),
        _ => Err(TmplDiffError::StreamUnavailable(format!(
            "{}: built without pdf support",
            path.display()
        ))),
    }
}

#[cfg(feature = "pdf")]
fn page_text(path: &Path, page: u32) -> Option<String> {
    pdf::page_text(path, page)
}

#[cfg(not(feature = "pdf"))]
fn page_text(_path: &Path, _page: u32) -> Option<String> {
    None
}

#[cfg(feature = "pdf")]
pub mod pdf {
    use std::path::Path;

    use lopdf::{Document, Object, ObjectId, Stream};
    use serde::Serialize;
    use tmpldiff_core::{Result as CoreResult, TmplDiffError};

    #[derive(Debug, Clone, Serialize)]
    pub struct PageStreams {
        pub page: u32,
        pub object: u32,
        pub contents: Vec<u32>,
    }

    fn unavailable(path: &Path, what: impl std::fmt::Display) -> TmplDiffError {
        TmplDiffError::StreamUnavailable(format!("{}: {what}", path.display()))
    }

    fn load(path: &Path) -> CoreResult<Document> {
        Document::load(path).map_err(|e| unavailable(path, e))
    }

    fn decode_stream(path: &Path, stream: &Stream) -> CoreResult<Vec<u8>> {
        if stream.dict.get(b"Filter").is_ok() {
            stream
                .decompressed_content()
                .map_err(|e| unavailable(path, format!("stream decompression failed: {e}")))
        } else {
            Ok(stream.content.clone())
        }
    }

    fn page_id(doc: &Document, path: &Path, page: u32) -> CoreResult<ObjectId> {
        doc.get_pages()
            .get(&page)
            .copied()
            .ok_or_else(|| unavailable(path, format!("no page {page}")))
    }

    pub fn object_stream(path: &Path, obj: u32) -> CoreResult<Vec<u8>> {
        let doc = load(path)?;
        let stream = doc
            .get_object((obj, 0))
            .and_then(Object::as_stream)
            .map_err(|e| unavailable(path, format!("object {obj}: {e}")))?;
        decode_stream(path, stream)
    }

    /// Every content stream of the page, concatenated.
    pub fn page_stream(path: &Path, page: u32) -> CoreResult<Vec<u8>> {
        let doc = load(path)?;
        let id = page_id(&doc, path, page)?;
        doc.get_page_content(id)
            .map_err(|e| unavailable(path, format!("page {page}: {e}")))
    }

    pub fn page_text(path: &Path, page: u32) -> Option<String> {
        let doc = Document::load(path).ok()?;
        doc.extract_text(&[page]).ok()
    }

    pub fn list_streams(path: &Path) -> CoreResult<Vec<PageStreams>> {
        let doc = load(path)?;
        Ok(doc
            .get_pages()
            .into_iter()
            .map(|(page, id)| PageStreams {
                page,
                object: id.0,
                contents: doc.get_page_contents(id).into_iter().map(|c| c.0).collect(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_parse() {
        let spec: SourceSpec = "form.pdf#obj=12".parse().unwrap();
        assert_eq!(spec.selector, Selector::Object(12));
        assert_eq!(spec.obj(), 12);
        assert_eq!(spec.to_string(), "form.pdf#obj=12");

        let spec: SourceSpec = "form.pdf#7".parse().unwrap();
        assert_eq!(spec.selector, Selector::Object(7));

        let spec: SourceSpec = "form.pdf#PAGE=2".parse().unwrap();
        assert_eq!(spec.page(), Some(2));
        assert_eq!(spec.obj(), 0);

        let spec: SourceSpec = "stream.bin".parse().unwrap();
        assert_eq!(spec.selector, Selector::Raw);

        assert!("form.pdf#obj=x".parse::<SourceSpec>().is_err());
        assert!("#3".parse::<SourceSpec>().is_err());
    }

    #[test]
    fn raw_stream_files_are_read_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.bin");
        fs::write(&path, b"BT (Nome) Tj ET").unwrap();
        let spec: SourceSpec = path.to_string_lossy().parse().unwrap();
        let source = FileSource::open(spec, None, None).unwrap();
        assert_eq!(source.stream_bytes().unwrap(), b"BT (Nome) Tj ET");
        assert!(source.stream_text().is_none());

        let empty = dir.path().join("empty.bin");
        fs::write(&empty, b"").unwrap();
        let source = FileSource::open(empty.to_string_lossy().parse().unwrap(), None, None).unwrap();
        assert!(matches!(
            source.stream_bytes(),
            Err(TmplDiffError::StreamUnavailable(_))
        ));
    }

    #[test]
    fn sidecar_text_is_attached() {
        let dir = tempfile::tempdir().unwrap();
        let sidecar = dir.path().join("a.json");
        fs::write(&sidecar, r#"{"occurrences":["Nome"],"stream_text":"Nome"}"#).unwrap();
        let source = FileSource::open("a.bin".parse().unwrap(), Some(&sidecar), None).unwrap();
        assert_eq!(source.decoded_occurrences(), vec!["Nome"]);
        assert_eq!(source.stream_text().as_deref(), Some("Nome"));
        assert_eq!(source.label(), "a.bin");
    }
}
