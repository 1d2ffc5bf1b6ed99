//! The `run` subcommand: a trigger host for the OCR pipeline.

use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex},
    time::Duration,
};

use clap::Args;
use futures::{StreamExt as _, future};
use tokio_util::sync::CancellationToken;

use crate::{
    async_utils::io::{count_jsonl_records, read_jsonl, write_output},
    notify::NotifyOpts,
    ocr::OcrOpts,
    pipeline::{
        OperationPoller, OutcomeRecord, PipelineOrchestrator, PollPolicy, Stores, TriggerEvent,
    },
    prelude::*,
    storage::StoreOpts,
    ui::{ProgressConfig, Ui},
};

/// Options for the `run` subcommand.
#[derive(Args, Clone, Debug)]
pub struct RunOpts {
    /// JSONL file of trigger events, one `{"name": ..., "length": ...}` object
    /// per line. Reads standard input if omitted.
    pub input_path: Option<PathBuf>,

    /// Where to write outcome records (JSONL). Defaults to standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    /// Max number of events to process at a time.
    #[clap(short = 'j', long = "jobs", default_value = "8")]
    pub job_count: NonZeroUsize,

    /// Seconds to wait between OCR status checks.
    #[clap(long, env = "POLL_INTERVAL_SECS", default_value = "1",
           value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval_secs: u64,

    /// Seconds to wait for an OCR job before giving up on it.
    #[clap(long, env = "POLL_DEADLINE_SECS", default_value = "300",
           value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_deadline_secs: u64,

    /// Seconds to allow each fetch, submission, write or notification.
    #[clap(long, env = "STAGE_TIMEOUT_SECS", default_value = "180",
           value_parser = clap::value_parser!(u64).range(1..))]
    pub stage_timeout_secs: u64,

    #[clap(flatten)]
    pub store_opts: StoreOpts,

    #[clap(flatten)]
    pub ocr_opts: OcrOpts,

    #[clap(flatten)]
    pub notify_opts: NotifyOpts,
}

/// The `run` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_run(ui: Ui, opts: &RunOpts) -> Result<()> {
    // Build every client up front, so bad configuration fails before we
    // touch any events.
    let store = opts.store_opts.create_store().await?;
    let ocr = opts.ocr_opts.create_client()?;
    let notifier = opts.notify_opts.create_notifier()?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let poller = OperationPoller::new(
        ocr,
        PollPolicy {
            interval: Duration::from_secs(opts.poll_interval_secs),
            deadline: Duration::from_secs(opts.poll_deadline_secs),
        },
    );
    let orchestrator = Arc::new(PipelineOrchestrator::new(
        Stores {
            input: store.clone(),
            input_container: opts.store_opts.input_container.clone(),
            output: store,
            output_container: opts.store_opts.output_container.clone(),
        },
        poller,
        notifier,
        cancel.clone(),
    )
    .with_stage_timeout(Duration::from_secs(opts.stage_timeout_secs)));

    let count = match opts.input_path.as_deref() {
        Some(path) => count_jsonl_records(&ui, path).await?,
        None => None,
    };
    let pb = ui.new_from_count(
        &ProgressConfig {
            emoji: "🔎",
            msg: "Recognizing images",
            done_msg: "Recognized images",
        },
        count,
    );

    let counters = Arc::new(Mutex::new(RunCounters::default()));
    let events = read_jsonl::<TriggerEvent>(opts.input_path.as_deref()).await?;
    let outcomes = events
        // Stop taking new events once we've been interrupted.
        .take_until(cancel.clone().cancelled_owned())
        .filter_map({
            let counters = counters.clone();
            move |event| {
                future::ready(match event {
                    Ok(event) => Some(event),
                    Err(err) => {
                        error!("Skipping malformed event: {err:#}");
                        counters.lock().expect("lock poisoned").skipped += 1;
                        None
                    }
                })
            }
        })
        .map(move |event| {
            let orchestrator = orchestrator.clone();
            async move {
                let outcome = orchestrator.process(&event).await;
                OutcomeRecord {
                    name: event.name,
                    outcome,
                }
            }
        })
        .buffer_unordered(opts.job_count.get())
        .map({
            let counters = counters.clone();
            let pb = pb.clone();
            move |record| {
                counters.lock().expect("lock poisoned").update(&record);
                pb.inc(1);
                Ok::<_, anyhow::Error>(record)
            }
        })
        .boxed();
    write_output(opts.output_path.as_deref(), outcomes).await?;
    pb.finish_using_style();

    let counters = counters.lock().expect("lock poisoned").clone();
    counters.display(&ui, cancel.is_cancelled());
    Ok(())
}

/// Cancel `cancel` when the user presses Ctrl-C.
async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            warn!("Interrupted, abandoning events in progress");
            cancel.cancel();
        }
        Err(err) => warn!("Cannot listen for Ctrl-C: {err}"),
    }
}

/// What happened during a `run`.
#[derive(Clone, Debug, Default)]
struct RunCounters {
    succeeded: usize,
    failed: usize,
    skipped: usize,
}

impl RunCounters {
    fn update(&mut self, record: &OutcomeRecord) {
        if record.outcome.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }

    fn display(&self, ui: &Ui, interrupted: bool) {
        ui.display_message(
            "📄",
            &format!(
                "{} stored, {} failed, {} malformed events skipped",
                self.succeeded, self.failed, self.skipped
            ),
        );
        if interrupted {
            ui.display_message("✋", "Interrupted before the end of the input");
        }
    }
}
