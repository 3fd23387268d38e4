//! Sheetclean CLI - clean, profile and audit spreadsheets
//!
//! # Commands
//!
//! ```bash
//! sheetclean process balance.xlsx                  # Report JSON to stdout
//! sheetclean process data.csv -o report.json -e cleaned.xlsx
//! sheetclean process huge.csv --chunked            # Accept inputs above the size ceiling
//! sheetclean infer balance.xlsx                    # Show inferred column types
//! sheetclean config                                # Print the default configuration
//! ```

use clap::{Parser, Subcommand};
use sheetclean::logs::LOG_BROADCASTER;
use sheetclean::{
    read_path, InputFormat, OverallStatus, Pipeline, PipelineConfig, ProcessOptions, SheetExporter,
    SheetStatus, Stage, TypeInferencer,
};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "sheetclean")]
#[command(about = "Type-aware cleaning and profiling of messy spreadsheets", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clean and profile every sheet of a file
    Process {
        /// Input file (CSV, XLSX or XLS)
        input: PathBuf,

        /// Input format (default: from the file extension)
        #[arg(short, long)]
        format: Option<InputFormat>,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output file for the report (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the cleaned sheets to an xlsx workbook
        #[arg(short, long)]
        export: Option<PathBuf>,

        /// Process in chunks; also accepts inputs above the size ceiling
        #[arg(long)]
        chunked: bool,

        /// Do not echo progress to stderr
        #[arg(short, long)]
        quiet: bool,
    },

    /// Show the inferred type of every column
    Infer {
        /// Input file (CSV, XLSX or XLS)
        input: PathBuf,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the default configuration as JSON
    Config,
}

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Process {
            input,
            format,
            config,
            output,
            export,
            chunked,
            quiet,
        } => {
            cmd_process(
                &input,
                format,
                config.as_deref(),
                output.as_deref(),
                export.as_deref(),
                chunked,
                quiet,
            )
            .await
        }

        Commands::Infer { input, config } => cmd_infer(&input, config.as_deref()),

        Commands::Config => cmd_config(),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(p) => PipelineConfig::load(p)?,
        None => PipelineConfig::default(),
    };
    Ok(config.apply_env()?)
}

async fn cmd_process(
    input: &Path,
    format: Option<InputFormat>,
    config_path: Option<&Path>,
    output: Option<&Path>,
    export: Option<&Path>,
    chunked: bool,
    quiet: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if quiet {
        LOG_BROADCASTER.set_echo(false);
    }
    let config = load_config(config_path)?;
    let format = match format {
        Some(f) => f,
        None => InputFormat::from_path(input)?,
    };

    if !quiet {
        eprintln!("📄 Processing: {} ({})", input.display(), format);
    }
    let bytes = fs::read(input)?;

    let mut options = ProcessOptions::new(format).chunked(chunked);
    if let Some(stem) = input.file_stem().and_then(|s| s.to_str()) {
        options = options.sheet_name(stem);
    }

    let pipeline = Pipeline::new(config);
    let report = pipeline.process_bytes_parallel(&bytes, &options).await?;

    if !quiet {
        for sheet in &report.sheets {
            let icon = match sheet.status {
                SheetStatus::Success => "✅",
                SheetStatus::Degraded => "⚠️ ",
                SheetStatus::Failed => "❌",
            };
            let score = sheet
                .quality
                .as_ref()
                .map_or("-".to_string(), |q| format!("{:.1}", q.score));
            let level = sheet.fallback_level.map_or("-", |l| l.as_str());
            let cleaning = sheet
                .audit
                .stage_duration_ms(Stage::Cleaning)
                .map_or("-".to_string(), |ms| format!("{} ms", ms));
            eprintln!(
                "   {} {} (level: {}, quality: {}, {} ms, cleaning: {})",
                icon, sheet.name, level, score, sheet.duration_ms, cleaning
            );
        }
    }

    if let Some(path) = export {
        let outcome = SheetExporter::new().export_to_path(&report.sheets, path)?;
        for skipped in &outcome.skipped {
            eprintln!("   ⚠️  Not exported: {} ({})", skipped.source, skipped.reason);
        }
    }

    let json = report.to_json()?;
    write_output(&json, output, quiet)?;

    if report.status == OverallStatus::Failed {
        return Err("every sheet failed".into());
    }
    Ok(())
}

fn cmd_infer(input: &Path, config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let (format, sheets) = read_path(input)?;
    eprintln!("🔎 Inferring types: {} ({})", input.display(), format);

    let inferencer = TypeInferencer::new(&config);
    for sheet in sheets {
        println!("📋 {}", sheet.name);
        match sheet.table {
            Ok(table) => {
                for info in inferencer.infer(&table) {
                    println!(
                        "  [{:2}] {:<24} {:<10} {:.2}{}  {}",
                        info.index + 1,
                        info.name,
                        info.semantic_type,
                        info.confidence,
                        if info.ambiguous { " (ambiguous)" } else { "" },
                        info.reasoning
                    );
                }
            }
            Err(e) => println!("  ❌ unreadable: {}", e),
        }
    }
    Ok(())
}

fn cmd_config() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", PipelineConfig::default().to_json()?);
    Ok(())
}

fn write_output(content: &str, path: Option<&Path>, quiet: bool) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            if !quiet {
                eprintln!("💾 Report written to: {}", p.display());
            }
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
