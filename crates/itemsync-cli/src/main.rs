use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use itemsync_core::Classification;
use itemsync_sync::{config_from_env, ReconcileConfig, ReconcileRun, SettingsFile};
use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "itemsync")]
#[command(about = "Reconcile sales_data classification attributes against the item mappings")]
struct Cli {
    /// YAML settings file layered over the environment.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Entity whose sales rows are scanned (default from ITEMSYNC_ENTITY, then Japan).
    #[arg(long, global = true)]
    entity: Option<String>,
    /// Only rows of this year.
    #[arg(long, global = true)]
    year: Option<i32>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scan the sales rows and write corrected classifications.
    Run(RunArgs),
    /// Load and merge both mapping sources, then report counts.
    Mappings,
    /// Show the mapping entry and pending update for specific item numbers.
    Inspect {
        #[arg(required = true)]
        items: Vec<String>,
    },
}

#[derive(Debug, Default, Args)]
struct RunArgs {
    /// Compute updates without writing them.
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    page_size: Option<usize>,
    #[arg(long)]
    delay_ms: Option<u64>,
}

impl Cli {
    /// Flags shared by every command.
    fn apply(&self, config: &mut ReconcileConfig) {
        if let Some(entity) = &self.entity {
            config.set_entity(entity);
        }
        if self.year.is_some() {
            config.year = self.year;
        }
    }
}

impl RunArgs {
    fn apply(&self, config: &mut ReconcileConfig) {
        config.dry_run |= self.dry_run;
        if let Some(size) = self.batch_size {
            config.batch_size = size;
        }
        if let Some(size) = self.page_size {
            config.page_size = size;
        }
        if let Some(ms) = self.delay_ms {
            config.delay = Duration::from_millis(ms);
        }
    }
}

fn init_tracing(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stdout)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}

fn describe(fields: &Classification) -> String {
    fields
        .fields()
        .into_iter()
        .map(|(name, value)| format!("{name}={}", value.unwrap_or("-")))
        .collect::<Vec<_>>()
        .join(" ")
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing("info")?;
    let cli = Cli::parse();

    let settings = cli.config.as_deref().map(SettingsFile::load).transpose()?;
    let mut config = config_from_env(settings)?;
    cli.apply(&mut config);

    match cli.command.unwrap_or_else(|| Commands::Run(RunArgs::default())) {
        Commands::Run(args) => {
            args.apply(&mut config);
            let summary = ReconcileRun::connect(config).await?.run().await?;
            println!(
                "update complete: run_id={} entity={} mappings={} pages={} processed={} updated={} batches={} unchanged={} unmapped={} blank_keys={}{}",
                summary.run_id,
                summary.entity,
                summary.mappings,
                summary.pages,
                summary.processed,
                summary.updated,
                summary.batches,
                summary.unchanged,
                summary.unmapped,
                summary.skipped_blank_key,
                if summary.dry_run { " (dry run)" } else { "" }
            );
        }
        Commands::Mappings => {
            let table = ReconcileRun::connect(config).await?.load_mappings().await?;
            println!(
                "mappings: total={} primary={} secondary={} shadowed={}",
                table.len(),
                table.primary_count,
                table.secondary_count,
                table.shadowed_count()
            );
        }
        Commands::Inspect { items } => {
            let report = ReconcileRun::connect(config).await?.inspect(&items).await?;
            for item in report {
                match &item.entry {
                    Some(entry) => println!(
                        "{}: {} mapping {}{}",
                        item.item,
                        entry.provenance,
                        describe(&entry.fields),
                        if item.shadowed_secondary {
                            " (secondary entry shadowed)"
                        } else {
                            ""
                        }
                    ),
                    None => println!("{}: no mapping", item.item),
                }
                if item.rows.is_empty() {
                    println!("  no matching sales rows");
                }
                for row in &item.rows {
                    match &row.update {
                        Some(update) => println!(
                            "  id={} {} -> changes {}",
                            row.record.id,
                            describe(&row.record.current),
                            row.record.current.differing_fields(&update.proposed).join(",")
                        ),
                        None => println!("  id={} {} (up to date)", row.record.id, describe(&row.record.current)),
                    }
                }
            }
        }
    }

    Ok(())
}
