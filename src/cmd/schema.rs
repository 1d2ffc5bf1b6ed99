//! The `schema` subcommand.

use clap::{Args, ValueEnum};
use schemars::schema_for;
use tokio::io::AsyncWriteExt as _;

use crate::{
    async_utils::io::create_writer,
    pipeline::{OutcomeRecord, RecognitionDocument, TriggerEvent},
    prelude::*,
};

/// The different schema types we support.
///
/// We parse these as PascalCase, because they represent type names.
#[derive(Debug, Clone, Copy, ValueEnum)]
#[clap(rename_all = "PascalCase")]
pub enum SchemaType {
    /// One line of `run` input.
    TriggerEvent,
    /// The JSON document stored for each image.
    RecognitionDocument,
    /// One line of `run` output.
    PipelineOutcome,
}

/// Schema command line arguments.
#[derive(Debug, Args)]
pub struct SchemaOpts {
    /// The schema type to generate.
    #[clap(value_enum, value_name = "TYPE")]
    pub schema_type: SchemaType,

    /// The output path to write the schema to.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,
}

/// The `schema` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_schema(schema_opts: &SchemaOpts) -> Result<()> {
    let schema = match schema_opts.schema_type {
        SchemaType::TriggerEvent => schema_for!(TriggerEvent),
        SchemaType::RecognitionDocument => schema_for!(RecognitionDocument),
        SchemaType::PipelineOutcome => schema_for!(OutcomeRecord),
    };

    let mut wtr = create_writer(schema_opts.output_path.as_deref()).await?;
    let mut schema_json =
        serde_json::to_vec_pretty(&schema).context("failed to serialize schema")?;
    schema_json.push(b'\n');
    wtr.write_all(&schema_json)
        .await
        .context("failed to write schema")?;
    wtr.flush().await.context("failed to flush schema")?;
    Ok(())
}
