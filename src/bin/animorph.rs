//! Command-line interface for the animorph conversion pipeline.

use std::{path::PathBuf, process, sync::Arc};

use clap::{ArgAction, Args, Parser, Subcommand};
use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use animorph::{
    CancellationToken, Classifier, ConvertOptions, Orchestrator, OutputFormat, ProgressCallback,
    ProgressInfo, Quality, Stage, ToolGateway,
};

const EXAMPLES: &str = "\
Examples:
  # Convert an animated WebP to APNG next to the input
  animorph convert sticker.webp

  # Batch-convert a folder to GIF and animated WebP at quality 80
  animorph convert ./stickers --to gif,webp --quality 80

  # Resample a screen recording into a 12 fps JPEG sequence
  animorph convert capture.mp4 --to jpg-seq --fps 12

  # Check which external tools are available
  animorph doctor
";

#[derive(Parser)]
#[command(
    name = "animorph",
    version,
    about = "Convert animated images, vector animations, and videos between formats",
    after_help = EXAMPLES
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Convert one or more sources into the requested formats.
    Convert(ConvertArgs),
    /// Report which external tools can be resolved.
    Doctor(ToolArgs),
}

#[derive(Args)]
struct ConvertArgs {
    /// Input files or directories (directories are walked recursively).
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output formats: apng, gif, webp, png-seq, jpg-seq.
    #[arg(long = "to", value_delimiter = ',', default_value = "apng")]
    formats: Vec<String>,

    /// Override the output frame rate.
    #[arg(long)]
    fps: Option<f64>,

    /// Encode quality target, 0-100.
    #[arg(long)]
    quality: Option<u8>,

    /// Floyd-Steinberg dithering level for quantization, 0.0-1.0.
    #[arg(long)]
    floyd: Option<f32>,

    /// Loop count for animated outputs (0 = forever).
    #[arg(long, default_value_t = 0)]
    loops: u32,

    /// Suffix appended to output names.
    #[arg(long, default_value = "")]
    suffix: String,

    #[command(flatten)]
    tools: ToolArgs,
}

#[derive(Args)]
struct ToolArgs {
    /// Pin a tool to a binary, e.g. --tool ffmpeg=/opt/ffmpeg/bin/ffmpeg.
    #[arg(long = "tool", value_name = "NAME=PATH")]
    tool: Vec<String>,

    /// Directory of bundled tool binaries, consulted before PATH.
    #[arg(long, value_name = "DIR")]
    tools_dir: Option<PathBuf>,

    /// Kill any single tool invocation that runs longer than this.
    #[arg(long, value_name = "SECS")]
    tool_timeout: Option<u64>,
}

impl ToolArgs {
    fn gateway(&self) -> Result<ToolGateway, String> {
        let mut gateway = ToolGateway::new();
        if let Some(dir) = &self.tools_dir {
            gateway = gateway.with_bundled_dir(dir);
        }
        if let Some(secs) = self.tool_timeout {
            gateway = gateway.with_timeout(std::time::Duration::from_secs(secs));
        }
        for pin in &self.tool {
            let (name, path) = pin
                .split_once('=')
                .ok_or_else(|| format!("--tool expects NAME=PATH, got '{pin}'"))?;
            gateway = gateway.with_override(name, path);
        }
        Ok(gateway)
    }
}

/// Renders per-item progress bars.
struct BarSink {
    bars: Vec<ProgressBar>,
}

impl BarSink {
    fn new(multi: &MultiProgress, labels: &[String]) -> Self {
        let style = ProgressStyle::with_template(
            "{spinner:.green} {prefix:>24.bold} [{bar:28.cyan/blue}] {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");

        let bars = labels
            .iter()
            .map(|label| {
                let bar = multi.add(ProgressBar::new(100));
                bar.set_style(style.clone());
                bar.set_prefix(label.clone());
                bar
            })
            .collect();
        Self { bars }
    }
}

impl ProgressCallback for BarSink {
    fn on_progress(&self, info: &ProgressInfo) {
        let Some(bar) = self.bars.get(info.item_index) else {
            return;
        };
        match info.stage {
            Stage::Succeeded => {
                bar.set_position(100);
                bar.finish_with_message("done".green().to_string());
            }
            Stage::Failed => {
                bar.abandon_with_message(info.message.red().to_string());
            }
            Stage::Cancelled => {
                bar.abandon_with_message("cancelled".yellow().to_string());
            }
            _ => {
                if info.fraction >= 0.0 {
                    bar.set_position((info.fraction * 100.0) as u64);
                }
                bar.set_message(info.message.clone());
            }
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();
}

fn parse_formats(names: &[String]) -> Result<Vec<OutputFormat>, String> {
    names
        .iter()
        .map(|name| {
            OutputFormat::parse(name)
                .ok_or_else(|| format!("unknown format '{name}' (try apng, gif, webp, png-seq, jpg-seq)"))
        })
        .collect()
}

async fn run_convert(args: ConvertArgs) -> i32 {
    let formats = match parse_formats(&args.formats) {
        Ok(formats) => formats,
        Err(msg) => {
            eprintln!("{} {msg}", "error:".red().bold());
            return 2;
        }
    };

    let gateway = match args.tools.gateway() {
        Ok(gateway) => gateway,
        Err(msg) => {
            eprintln!("{} {msg}", "error:".red().bold());
            return 2;
        }
    };

    let sources = match Classifier::new().classify_paths(&args.inputs) {
        Ok(sources) => sources,
        Err(err) => {
            eprintln!("{} {err}", "error:".red().bold());
            return 1;
        }
    };
    if sources.is_empty() {
        eprintln!("{} no convertible sources found", "error:".red().bold());
        return 1;
    }

    let mut options = ConvertOptions::new()
        .with_formats(formats)
        .with_loop_count(args.loops)
        .with_output_suffix(args.suffix.clone());
    if let Some(fps) = args.fps {
        options = options.with_frame_rate(fps);
    }
    if let Some(quality) = args.quality {
        options = options.with_quality(Quality::target(quality));
    }
    if let Some(floyd) = args.floyd {
        options = options.with_floyd(floyd);
    }

    let labels: Vec<String> = sources
        .iter()
        .map(|s| {
            s.path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| s.path.display().to_string())
        })
        .collect();
    let multi = MultiProgress::new();
    let sink = Arc::new(BarSink::new(&multi, &labels));

    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n{}", "cancelling, terminating tools…".yellow());
                token.cancel();
            }
        });
    }

    let report = Orchestrator::new()
        .with_gateway(gateway)
        .with_progress(sink)
        .convert_all(sources, options, token.clone())
        .await;

    println!();
    for item in &report.items {
        match &item.status {
            animorph::ItemStatus::Succeeded(outcome) => {
                for output in &outcome.outputs {
                    println!("  {} {}", "✓".green(), output.display());
                }
                for warning in &outcome.warnings {
                    println!("  {} {}: {warning}", "!".yellow(), item.source.display());
                }
            }
            animorph::ItemStatus::Failed(err) => {
                println!("  {} {}: {err}", "✗".red(), item.source.display());
            }
            animorph::ItemStatus::Cancelled => {
                println!("  {} {}: cancelled", "-".yellow(), item.source.display());
            }
        }
    }
    println!(
        "\n{} succeeded, {} failed, {} cancelled",
        report.succeeded().to_string().green(),
        report.failed().to_string().red(),
        report.cancelled().to_string().yellow()
    );

    if token.is_cancelled() {
        130
    } else if report.failed() > 0 {
        1
    } else {
        0
    }
}

fn run_doctor(args: ToolArgs) -> i32 {
    let gateway = match args.gateway() {
        Ok(gateway) => gateway,
        Err(msg) => {
            eprintln!("{} {msg}", "error:".red().bold());
            return 2;
        }
    };

    let mut missing = 0;
    for (tool, path) in gateway.capabilities() {
        match path {
            Some(path) => println!("  {} {tool:<10} {}", "✓".green(), path.display()),
            None => {
                println!("  {} {tool:<10} {}", "✗".red(), "not found".dimmed());
                missing += 1;
            }
        }
    }
    if missing > 0 {
        println!(
            "\n{missing} tool(s) missing; the affected formats fall back or fail with a clear error"
        );
    }
    0
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match cli.command {
        Command::Convert(args) => run_convert(args).await,
        Command::Doctor(args) => run_doctor(args),
    };
    process::exit(code);
}
