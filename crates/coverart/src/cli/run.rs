//! The `coverart run` command: optimise every pending record.

use anyhow::Context;
use clap::Args;
use coverart_core::pipeline::{HttpSource, ItemOutcome, Pipeline};
use coverart_core::records::connect_pool;
use coverart_core::{Config, Digest, KeyLayout, PgRecordStore, RecordStore, RunSummary, S3Store};
use std::path::Path;
use std::sync::Arc;

/// Arguments for the `run` command.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Table to process; repeat for several (defaults to `database.tables`)
    #[arg(short, long = "table", value_name = "NAME")]
    pub tables: Vec<String>,

    /// Items processed concurrently (overrides `pipeline.parallel_workers`)
    #[arg(short, long)]
    pub parallel: Option<usize>,

    /// List pending records and their keys; touch neither storage nor rows
    #[arg(long)]
    pub dry_run: bool,

    /// Print run summaries as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

/// Execute the run command.
pub async fn execute(args: RunArgs, explicit_path: Option<&Path>) -> anyhow::Result<()> {
    let config = effective_config(super::load_config(explicit_path)?, &args)?;

    let url = config.database_url()?;
    let pool = connect_pool(&config.database, &url)
        .await
        .context("Cannot connect to the database")?;
    let mut tables = Vec::with_capacity(config.database.tables.len());
    for table in &config.database.tables {
        tables.push(PgRecordStore::connect(pool.clone(), table.as_str()).await?);
    }

    let result = if args.dry_run {
        dry_run(&config, &tables).await.map(|()| Vec::new())
    } else {
        run_pipeline(&config, &tables).await
    };
    pool.close().await;
    let summaries = result?;

    if args.json && !summaries.is_empty() {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    }
    for summary in &summaries {
        print_summary(summary);
    }

    if summaries.iter().any(|s| s.aborted) {
        anyhow::bail!("Run aborted after a connection failure; remaining items were skipped");
    }
    Ok(())
}

/// Apply command-line overrides and re-validate.
fn effective_config(mut config: Config, args: &RunArgs) -> anyhow::Result<Config> {
    if let Some(parallel) = args.parallel {
        config.pipeline.parallel_workers = parallel;
    }
    if !args.tables.is_empty() {
        config.database.tables = args.tables.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn run_pipeline(
    config: &Config,
    tables: &[PgRecordStore],
) -> anyhow::Result<Vec<RunSummary>> {
    let store = Arc::new(S3Store::from_config(config).await?);
    tracing::info!(bucket = store.bucket(), "Publishing to object storage");
    let source = Arc::new(HttpSource::new(&config.limits)?);
    let pipeline = Pipeline::new(config, store, source);
    process_tables(&pipeline, tables, true).await
}

/// Run every table through one pipeline, sharing its existence cache.
///
/// A failed pending query ends the run with an error; an aborted table stops
/// the remaining tables.
pub(crate) async fn process_tables<R: RecordStore>(
    pipeline: &Pipeline,
    tables: &[R],
    show_progress: bool,
) -> anyhow::Result<Vec<RunSummary>> {
    let mut summaries = Vec::with_capacity(tables.len());

    for records in tables {
        let items = records
            .pending()
            .await
            .with_context(|| format!("Pending query failed for {}", records.name()))?;

        let progress = if show_progress {
            create_progress_bar(items.len() as u64, records.name())?
        } else {
            indicatif::ProgressBar::hidden()
        };

        let summary = pipeline
            .process_items(records, items, |item, outcome| {
                progress.inc(1);
                if let ItemOutcome::Failed { stage, .. } = outcome {
                    progress.set_message(format!("{} failed at {stage}", item.id));
                }
            })
            .await;
        progress.finish_and_clear();

        let aborted = summary.aborted;
        summaries.push(summary);
        if aborted {
            break;
        }
    }

    Ok(summaries)
}

async fn dry_run<R: RecordStore>(config: &Config, tables: &[R]) -> anyhow::Result<()> {
    let layout = KeyLayout::from_config(config);
    for records in tables {
        let items = records
            .pending()
            .await
            .with_context(|| format!("Pending query failed for {}", records.name()))?;
        eprintln!("{}: {} pending", records.name(), items.len());
        for item in &items {
            println!("{}", dry_run_line(&layout, records.name(), &item.id, &item.source_url));
        }
    }
    Ok(())
}

fn dry_run_line(layout: &KeyLayout, table: &str, id: &str, source_url: &str) -> String {
    let digest = Digest::from_source_url(source_url);
    let probe = layout.key(&layout.probe(&digest));
    format!("{table}\t{id}\t{digest}\t{probe}\t{source_url}")
}

fn create_progress_bar(total: u64, table: &str) -> anyhow::Result<indicatif::ProgressBar> {
    use indicatif::{ProgressBar, ProgressStyle};

    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {prefix} {msg}",
            )?
            .progress_chars("##-"),
    );
    pb.set_prefix(table.to_string());
    pb.set_message("starting...");
    Ok(pb)
}

fn print_summary(summary: &RunSummary) {
    let elapsed = summary.elapsed.as_secs_f64();
    let rate = if elapsed > 0.0 {
        summary.total as f64 / elapsed
    } else {
        0.0
    };

    eprintln!();
    eprintln!("  ====================================");
    eprintln!("    Summary: {}", summary.table);
    eprintln!("  ====================================");
    eprintln!("    Published:    {:>8}", summary.published);
    eprintln!("    Existing:     {:>8}", summary.already_present);
    if summary.failed > 0 {
        eprintln!("    Failed:       {:>8}", summary.failed);
    }
    if summary.skipped > 0 {
        eprintln!("    Skipped:      {:>8}", summary.skipped);
    }
    eprintln!("  ------------------------------------");
    eprintln!("    Total:        {:>8}", summary.total);
    eprintln!("    Duration:     {:>7.1}s", elapsed);
    eprintln!("    Rate:         {:>7.1} items/sec", rate);
    if summary.aborted {
        eprintln!("    ABORTED: connection lost");
    }
    eprintln!("  ====================================");
}
