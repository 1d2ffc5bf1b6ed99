//! Running one trigger event through the whole pipeline.

use std::{sync::Arc, time::Duration};

use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::{
    notify::{Notification, Notifier},
    ocr::JobStatus,
    prelude::*,
    storage::{BlobLocation, BlobStore},
};

use super::{
    OperationPoller, PipelineError, PipelineOutcome, Stage, TriggerEvent, assembler::assemble,
    output_name,
};

/// Subject line of the "result stored" notification.
const NOTIFICATION_SUBJECT: &str = "OCR Output Ready";

/// Default limit on each fetch, submission, write or notification. Polling
/// has its own deadline.
const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(180);

/// A pipeline error, tagged with the stage where it happened.
type StageResult<T> = Result<T, (Stage, PipelineError)>;

/// Tag an error with the stage that produced it.
trait AtStage<T> {
    fn at(self, stage: Stage) -> StageResult<T>;
}

impl<T> AtStage<T> for Result<T, PipelineError> {
    fn at(self, stage: Stage) -> StageResult<T> {
        self.map_err(|err| (stage, err))
    }
}

/// Where images come from and where results go.
#[derive(Clone, Debug)]
pub struct Stores {
    pub input: Arc<dyn BlobStore>,
    pub input_container: String,
    pub output: Arc<dyn BlobStore>,
    pub output_container: String,
}

/// Runs trigger events through fetch, OCR, assembly, storage and
/// notification.
///
/// Holds only shared, read-only handles, so one orchestrator can serve many
/// concurrent runs.
#[derive(Clone, Debug)]
pub struct PipelineOrchestrator {
    stores: Stores,
    poller: OperationPoller,
    notifier: Arc<dyn Notifier>,
    cancel: CancellationToken,
    stage_timeout: Duration,
}

impl PipelineOrchestrator {
    /// Create an orchestrator. Work in progress stops early once `cancel`
    /// fires.
    pub fn new(
        stores: Stores,
        poller: OperationPoller,
        notifier: Arc<dyn Notifier>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            stores,
            poller,
            notifier,
            cancel,
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
        }
    }

    /// Limit each fetch, submission, write and notification to `timeout`.
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    /// Run one stage, giving up once it takes too long.
    async fn limited<T>(
        &self,
        stage: impl Future<Output = Result<T, PipelineError>>,
    ) -> Result<T, PipelineError> {
        time::timeout(self.stage_timeout, stage)
            .await
            .unwrap_or_else(|_| {
                Err(PipelineError::StageTimeout {
                    timeout: self.stage_timeout,
                })
            })
    }

    /// Like [`Self::limited`], but also give up on shutdown. A stage that is
    /// already finished wins over a shutdown.
    async fn interruptible<T>(
        &self,
        stage: impl Future<Output = Result<T, PipelineError>>,
    ) -> Result<T, PipelineError> {
        tokio::select! {
            biased;
            result = self.limited(stage) => result,
            _ = self.cancel.cancelled() => Err(PipelineError::Interrupted),
        }
    }

    /// Process one event.
    ///
    /// Never fails: errors become [`PipelineOutcome::Failure`]. A failed
    /// notification is logged but still counts as a success, because the
    /// result has already been stored.
    #[instrument(level = "info", skip_all, fields(name = %event.name))]
    pub async fn process(&self, event: &TriggerEvent) -> PipelineOutcome {
        match self.store_result(event).await {
            Ok(output_location) => {
                info!(output = %output_location, "Stored OCR result");
                self.notify(&output_location).await;
                PipelineOutcome::Success { output_location }
            }
            Err((stage, err)) => {
                let cause = err.full_cause();
                error!(%stage, "Pipeline run failed: {cause}");
                PipelineOutcome::Failure { stage, cause }
            }
        }
    }

    /// Everything up to and including writing the result.
    async fn store_result(&self, event: &TriggerEvent) -> StageResult<BlobLocation> {
        let source = event.source(&self.stores.input_container);

        let image = self
            .interruptible(async {
                self.stores
                    .input
                    .get(&source)
                    .await
                    .map_err(PipelineError::Storage)
            })
            .await
            .at(Stage::Fetch)?;
        if image.len() as u64 != event.length {
            warn!(
                expected = event.length,
                actual = image.len(),
                "Fetched size differs from event, using fetched bytes"
            );
        }

        let handle = self
            .interruptible(self.poller.submit(&image))
            .await
            .at(Stage::Submit)?;
        debug!(%handle, "Submitted OCR job");
        let job = self
            .poller
            .await_completion(handle, &self.cancel)
            .await
            .at(Stage::Poll)?;
        if job.status != JobStatus::Succeeded {
            return Err((
                Stage::Ocr,
                PipelineError::JobFailed {
                    handle: job.handle,
                    detail: job.failure_detail,
                },
            ));
        }

        let document = assemble(&source.name, &job).at(Stage::Assemble)?;
        debug!(lines = document.lines.len(), "Assembled document");
        let json = document
            .to_json()
            .map_err(PipelineError::from)
            .at(Stage::Persist)?;

        let destination =
            BlobLocation::new(&self.stores.output_container, output_name(&source.name));
        self.interruptible(async {
            self.stores
                .output
                .put(&destination, json, "application/json")
                .await
                .map_err(PipelineError::Storage)
        })
        .await
        .at(Stage::Persist)?;
        Ok(destination)
    }

    /// Tell someone about a stored result. Failures are only logged.
    ///
    /// The result is already stored, so a shutdown doesn't cut this short.
    async fn notify(&self, output_location: &BlobLocation) {
        let notification = Notification {
            subject: NOTIFICATION_SUBJECT.to_owned(),
            body: format!("The OCR result has been uploaded: {}", output_location.name),
        };
        let sent = self
            .limited(async {
                self.notifier
                    .send(&notification)
                    .await
                    .map_err(PipelineError::Notification)
            })
            .await;
        if let Err(err) = sent {
            error!("Could not send notification: {}", err.full_cause());
        }
    }
}
