//! The OCR pipeline: fetch an image, recognize it, store the text, notify.
//!
//! [`PipelineOrchestrator`] runs one [`TriggerEvent`] through the stages in
//! [`Stage`], using [`OperationPoller`] to wait on the OCR service and
//! [`assembler::assemble`] to build the stored document.

use std::fmt;

use schemars::JsonSchema;

use crate::{prelude::*, storage::BlobLocation};

pub mod assembler;
pub mod error;
#[cfg(test)]
pub(crate) mod fakes;
pub mod orchestrator;
pub mod poller;

pub use self::{
    assembler::RecognitionDocument,
    error::PipelineError,
    orchestrator::{PipelineOrchestrator, Stores},
    poller::{OperationPoller, PollPolicy},
};

/// A notice that a new image has landed in the input store.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
pub struct TriggerEvent {
    /// The blob name. May be prefixed with `<container>/`, as blob trigger
    /// paths are.
    pub name: String,

    /// Size of the blob in bytes, as reported by the trigger.
    pub length: u64,

    /// The container holding the blob. Defaults to the input container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

impl TriggerEvent {
    /// Where to fetch the image from.
    pub fn source(&self, default_container: &str) -> BlobLocation {
        let container = self.container.as_deref().unwrap_or(default_container);
        let name = self
            .name
            .strip_prefix(container)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(&self.name);
        BlobLocation::new(container, name)
    }
}

/// The steps of a pipeline run, used to say where a run failed.
#[derive(Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Reading the image from the input store.
    Fetch,
    /// Handing the image to the OCR service.
    Submit,
    /// Waiting for the OCR job to finish.
    Poll,
    /// The OCR job finished, but did not succeed.
    Ocr,
    /// Building the result document.
    Assemble,
    /// Writing the result to the output store.
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Submit => "submit",
            Stage::Poll => "poll",
            Stage::Ocr => "ocr",
            Stage::Assemble => "assemble",
            Stage::Persist => "persist",
        };
        f.write_str(name)
    }
}

/// How a pipeline run ended.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineOutcome {
    /// The document was stored. Says nothing about the notification.
    Success { output_location: BlobLocation },

    /// The run stopped at `stage`. `cause` is the full error chain.
    Failure { stage: Stage, cause: String },
}

impl PipelineOutcome {
    /// Did the run store a document?
    pub fn is_success(&self) -> bool {
        matches!(self, PipelineOutcome::Success { .. })
    }
}

/// One line of the outcome report.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
pub struct OutcomeRecord {
    /// The event's `name`, as received.
    pub name: String,

    #[serde(flatten)]
    pub outcome: PipelineOutcome,
}

/// The name of the JSON result for an input blob.
///
/// Replaces the extension of the last path segment with `.json`, or appends
/// `.json` if there isn't one. Leading dots don't start an extension, so
/// `.profile` becomes `.profile.json`.
pub fn output_name(input_name: &str) -> String {
    let (dir, file) = match input_name.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, input_name),
    };
    let leading_dots = file.len() - file.trim_start_matches('.').len();
    let stem = match file[leading_dots..].rfind('.') {
        Some(idx) => &file[..leading_dots + idx],
        None => file,
    };
    match dir {
        Some(dir) => format!("{dir}/{stem}.json"),
        None => format!("{stem}.json"),
    }
}
