use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use tmpldiff_core::JsonlWriter;

type Sink = JsonlWriter<Box<dyn Write + Send>>;

/// The single writer every command prints through.
pub struct Output {
    inner: Mutex<Sink>,
}

impl Output {
    /// `path` or stdout.
    pub fn open(path: Option<&Path>) -> Result<Self> {
        let writer: Box<dyn Write + Send> = match path {
            Some(path) => Box::new(BufWriter::new(
                File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
            )),
            None => Box::new(BufWriter::new(io::stdout())),
        };
        Ok(Self {
            inner: Mutex::new(JsonlWriter::new(writer)),
        })
    }

    pub fn json<T: Serialize>(&self, value: &T) -> Result<()> {
        let mut sink = self.lock()?;
        let writer = sink.get_mut();
        serde_json::to_writer_pretty(&mut *writer, value)?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }

    /// One compact JSON line.
    pub fn record<T: Serialize>(&self, value: &T) -> Result<()> {
        let mut sink = self.lock()?;
        sink.write_record(value)?;
        sink.get_mut().flush()?;
        Ok(())
    }

    pub fn line(&self, text: &str) -> Result<()> {
        let mut sink = self.lock()?;
        let writer = sink.get_mut();
        writeln!(writer, "{text}")?;
        writer.flush()?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Sink>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("output writer poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn records_are_one_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let output = Output::open(Some(&path)).unwrap();
        output.record(&serde_json::json!({"a": 1})).unwrap();
        output.record(&serde_json::json!({"a": 2})).unwrap();
        output.line("done").unwrap();
        drop(output);
        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(written, "{\"a\":1}\n{\"a\":2}\ndone\n");
    }
}
