mod combine;
mod config;
mod error;
mod extract;
mod matcher;
mod naming;
mod parser;
mod pipeline;
mod pool;
mod tool;

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};

use crate::config::{InvalidPolicy, Settings};
use crate::extract::{is_produced, ExtractStats};
use crate::matcher::MatchStats;
use crate::pipeline::Pipeline;

#[derive(Parser)]
#[command(
    name = "siftify",
    about = "Run a SIFT extractor over a directory of images and combine the keypoints into one table"
)]
struct Cli {
    /// Config file (default: ./siftify.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Image directory, overriding the configured one
    #[arg(short, long, global = true)]
    dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract missing artifacts, then rebuild the combined table
    Run {
        /// Also match every image pair afterwards
        #[arg(long = "match")]
        with_matches: bool,
        /// Leave invalid descriptor files out instead of aborting
        #[arg(long)]
        skip_invalid: bool,
    },
    /// Produce missing keypoint images and descriptor files only
    Extract,
    /// Rebuild the combined table from existing descriptor files
    Combine {
        /// Leave invalid descriptor files out instead of aborting
        #[arg(long)]
        skip_invalid: bool,
        /// Where to write the table (default: <dir>/../sift_combined.txt)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Match every pair of images whose descriptors exist
    Match,
    /// Show what has been produced so far
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(dir) = cli.dir {
        settings.image_dir = dir;
    }

    let result = match cli.command {
        Commands::Run {
            with_matches,
            skip_invalid,
        } => {
            if skip_invalid {
                settings.on_invalid = InvalidPolicy::Skip;
            }
            let pipeline = Pipeline::new(settings)?;
            let report = pipeline.run(with_matches).await?;
            println!("Found {} images", report.images);
            print_extract(&report.extract);
            print_combine(&report.combine, &pipeline.settings().combined_path());
            if let Some(matches) = &report.matches {
                print_matches(matches);
            }
            Ok(())
        }
        Commands::Extract => {
            let pipeline = Pipeline::new(settings)?;
            let images = pipeline.discover()?;
            if images.is_empty() {
                println!("No input images in {}", pipeline.settings().image_dir.display());
                return Ok(());
            }
            println!("Extracting {} images...", images.len());
            let stats = pipeline.extract(images).await?;
            print_extract(&stats);
            Ok(())
        }
        Commands::Combine {
            skip_invalid,
            output,
        } => {
            let policy = if skip_invalid {
                InvalidPolicy::Skip
            } else {
                settings.on_invalid
            };
            let output = output.unwrap_or_else(|| settings.combined_path());
            let pipeline = Pipeline::new(settings)?;
            let stats = pipeline.combine(policy, &output)?;
            print_combine(&stats, &output);
            Ok(())
        }
        Commands::Match => {
            let pipeline = Pipeline::new(settings)?;
            let images = pipeline.discover()?;
            if images.len() < 2 {
                println!("Need at least two images to match.");
                return Ok(());
            }
            let stats = pipeline.match_pairs(&images).await?;
            print_matches(&stats);
            Ok(())
        }
        Commands::Stats => {
            let pipeline = Pipeline::new(settings)?;
            let s = pipeline.settings();
            let images = pipeline.discover()?;
            let produced = |name: String| is_produced(&s.image_dir.join(name));
            let visualized = images
                .iter()
                .filter(|i| produced(naming::visualization_name(i)))
                .count();
            let described = images
                .iter()
                .filter(|i| produced(naming::descriptor_name(i)))
                .count();
            let combined = s.combined_path();
            let descriptors = combine::descriptor_files(&s.image_dir, Some(combined.as_path()))?;
            println!("Directory:   {}", s.image_dir.display());
            println!("Images:      {}", images.len());
            println!("Visualized:  {}", visualized);
            println!("Described:   {}", described);
            println!("Descriptors: {}", descriptors.len());
            match std::fs::read_to_string(&combined) {
                Ok(table) => println!(
                    "Combined:    {} rows in {}",
                    table.lines().count().saturating_sub(1),
                    combined.display()
                ),
                Err(_) => println!("Combined:    not built ({})", combined.display()),
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn print_extract(stats: &ExtractStats) {
    println!(
        "Extracted {} images ({} produced, {} already done, {} failed).",
        stats.total,
        stats.produced,
        stats.cached,
        stats.failed.len()
    );
    for (image, error) in &stats.failed {
        println!("  failed {}: {}", image, error);
    }
}

fn print_combine(stats: &combine::CombineStats, output: &std::path::Path) {
    println!(
        "Combined {} rows from {} descriptor files into {}.",
        stats.rows,
        stats.files,
        output.display()
    );
    for (file, reason) in &stats.skipped {
        println!("  skipped {}: {}", file, reason);
    }
}

fn print_matches(stats: &MatchStats) {
    println!(
        "Matched {} pairs ({} produced, {} already done, {} missing descriptors, {} failed).",
        stats.pairs,
        stats.produced,
        stats.cached,
        stats.missing,
        stats.failed.len()
    );
    for (pair, error) in &stats.failed {
        println!("  failed {}: {}", pair, error);
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
