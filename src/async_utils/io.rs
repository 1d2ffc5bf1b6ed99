//! JSONL input and output.
//!
//! Trigger events arrive one JSON object per line, from a file or from
//! standard input (typically piped from a queue consumer). Outcome records
//! leave the same way.

use futures::{TryStreamExt as _, pin_mut, stream::StreamExt as _};
use serde::de::DeserializeOwned;
use tokio::{
    fs::File,
    io::{AsyncBufRead, AsyncBufReadExt as _, AsyncWrite, AsyncWriteExt as _, BufReader, BufWriter},
};
use tokio_stream::wrappers::LinesStream;

use crate::{
    prelude::*,
    ui::{ProgressConfig, Ui},
};

use super::BoxedStream;

/// Open a file or standard input for line-by-line reading.
async fn open_lines(
    path: Option<&Path>,
) -> Result<(String, Box<dyn AsyncBufRead + Unpin + Send + 'static>)> {
    match path {
        Some(path) => {
            let file = File::open(path)
                .await
                .with_context(|| format!("Failed to open file at path: {:?}", path))?;
            Ok((
                path.to_string_lossy().into_owned(),
                Box::new(BufReader::new(file)),
            ))
        }
        None => Ok((
            "stdin".to_owned(),
            Box::new(BufReader::new(tokio::io::stdin())),
        )),
    }
}

/// Count the non-blank lines in a JSONL file, so we can show a real progress
/// bar. Returns `None` for anything that isn't a regular file.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn count_jsonl_records(ui: &Ui, path: &Path) -> Result<Option<usize>> {
    // Named pipes and the like can only be read once.
    if !path.is_file() {
        return Ok(None);
    }

    let spinner = ui.new_spinner(&ProgressConfig {
        emoji: "🧮",
        msg: "Counting input records",
        done_msg: "Counted input records",
    });
    let (_, reader) = open_lines(Some(path)).await?;
    let count = LinesStream::new(reader.lines())
        .try_fold(0, |acc, line| async move {
            Ok(if line.trim().is_empty() { acc } else { acc + 1 })
        })
        .await
        .with_context(|| format!("Failed to read {:?}", path))?;
    spinner.finish_with_message(format!("Found {count} records"));
    Ok(Some(count))
}

/// Read JSONL records from a file or standard input.
///
/// Blank lines are skipped. Each remaining line yields either a parsed record
/// or an error naming the line, so that callers can decide whether one bad
/// line should stop the stream.
pub async fn read_jsonl<T>(path: Option<&Path>) -> Result<BoxedStream<Result<T>>>
where
    T: DeserializeOwned + Send + 'static,
{
    let (description, reader) = open_lines(path).await?;
    let lines = LinesStream::new(reader.lines())
        .enumerate()
        .filter(|(_, line)| {
            let blank = matches!(line, Ok(line) if line.trim().is_empty());
            async move { !blank }
        })
        .map(move |(idx, line)| {
            let line = line
                .with_context(|| format!("Failed to read line {} of {}", idx + 1, description))?;
            serde_json::from_str::<T>(&line).with_context(|| {
                format!(
                    "Failed to parse JSON from line {} of {}: {:?}",
                    idx + 1,
                    description,
                    line
                )
            })
        });
    Ok(lines.boxed())
}

/// Create an [`AsyncWrite`] for a file or stdout.
pub async fn create_writer(
    path: Option<&Path>,
) -> Result<Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .await
                .with_context(|| format!("Failed to create file at path: {:?}", path))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}

/// Write a stream of records as JSONL to either standard output or a file.
///
/// Each record is flushed as soon as it is written, so a downstream reader
/// sees outcomes while the stream is still running.
pub async fn write_output<T>(path: Option<&Path>, stream: BoxedStream<Result<T>>) -> Result<()>
where
    T: Serialize,
{
    let mut writer = BufWriter::new(create_writer(path).await?);
    pin_mut!(stream);
    while let Some(record) = stream.next().await {
        let record = record?;
        let mut json =
            serde_json::to_vec(&record).context("Failed to serialize output record")?;
        json.push(b'\n');
        writer
            .write_all(&json)
            .await
            .context("Failed to write JSON to output")?;
        writer.flush().await.context("Failed to flush output")?;
    }
    writer.flush().await.context("Failed to flush output")?;
    Ok(())
}
