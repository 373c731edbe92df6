use attend_sup::{cli::analytics, AttendanceLedger, Config, DevMode, Kiosk};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "attendsup")]
#[command(about = "Face-authenticated attendance kiosk with gesture control")]
struct Cli {
    /// Enable development mode (keeps data under ./dev_data)
    #[arg(long, global = true)]
    dev: bool,

    /// Config file to use instead of the default search path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the kiosk
    Run,
    /// Export the emotion pie chart and summary from the ledger
    Analytics,
    /// Print attendance records
    Ledger {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate the configuration and check that models and dataset exist
    CheckConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.dev);

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;
    let dev_mode = DevMode::new(cli.dev)?;

    match cli.command {
        Commands::Run => {
            let kiosk = Kiosk::new(config, &dev_mode).context("Failed to start kiosk")?;
            kiosk.run()?;
        }
        Commands::Analytics => {
            let ledger = AttendanceLedger::open(dev_mode.ledger_path(&config))?;
            match analytics::export(&ledger, &dev_mode.analytics_path(&config))? {
                Some(export) => {
                    println!("📊 Chart: {}", export.chart.display());
                    println!("📝 Summary: {}", export.summary.display());
                    print!("{}", analytics::summary_text(&analytics::summarize(&ledger.emotion_counts())));
                }
                None => println!("No attendance records yet."),
            }
        }
        Commands::Ledger { json } => {
            let ledger = AttendanceLedger::open(dev_mode.ledger_path(&config))?;
            if json {
                println!("{}", serde_json::to_string_pretty(ledger.records())?);
            } else if ledger.is_empty() {
                println!("No attendance records in {}", ledger.path().display());
            } else {
                println!("{:<10}  {:<8}  {:<24}  {:<10}  {}", "date", "time", "name", "id", "emotion");
                for r in ledger.records() {
                    println!("{:<10}  {:<8}  {:<24}  {:<10}  {}", r.date, r.time, r.name, r.external_id, r.emotion);
                }
                println!("\n{} records", ledger.len());
            }
        }
        Commands::CheckConfig => {
            println!("✅ Configuration is valid");
            let models = [
                ("face detector", &config.models.detector_path),
                ("face recognizer", &config.models.recognizer_path),
                ("emotion classifier", &config.models.emotion_path),
                ("hand landmarks", &config.models.hand_path),
            ];
            for (name, path) in models {
                let mark = if path.exists() { "✅" } else { "❌" };
                println!("{} {}: {}", mark, name, path.display());
            }
            let dataset = &config.gallery.dataset_dir;
            let mark = if dataset.is_dir() { "✅" } else { "❌" };
            println!("{} dataset: {}", mark, dataset.display());
            println!("📁 ledger: {}", dev_mode.ledger_path(&config).display());
        }
    }

    Ok(())
}

fn setup_logging(dev_mode: bool) {
    if dev_mode {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt::init();
    }
}
