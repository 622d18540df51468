// towel_joiner - Towel Video Joiner
// Terminal front end for the join form: three inputs, one trigger, a log console

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use towel_joiner::{
    ffmpeg, FfmpegBackend, JoinController, JoinForm, JoinerConfig, Notification, ScanFilter,
    ShellEvent,
};

#[derive(Parser)]
#[command(name = "towel_joiner", version, about = "Towel Video Joiner - join a folder of videos into one file")]
struct Args {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join every file of a folder, in name order, into joined_video.<format>
    Join {
        /// Input folder (prompted for when omitted)
        #[arg(long)]
        input: Option<PathBuf>,

        /// Output folder (prompted for when omitted)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Output format, e.g. mp4 (prompted for when omitted)
        #[arg(long)]
        format: Option<String>,

        /// Files per intermediate chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Which files of the input folder are candidates
        #[arg(long, value_enum)]
        filter: Option<FilterArg>,

        /// Comma-separated extensions for --filter ext
        #[arg(long, value_delimiter = ',')]
        extensions: Option<Vec<String>>,

        #[command(flatten)]
        common: CommonArgs,

        /// Print the run report as JSON on success
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Show which encoder binaries would be used
    Locate {
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(clap::Args)]
struct CommonArgs {
    /// Explicit ffmpeg binary
    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum FilterArg {
    /// Every regular file
    Any,
    /// Known video extensions (or --extensions)
    Ext,
    /// Detect videos from file contents
    Sniff,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.cmd {
        Commands::Join {
            input,
            output,
            format,
            chunk_size,
            filter,
            extensions,
            common,
            json,
        } => {
            let mut config = load_config(&common)?;
            if let Some(k) = chunk_size {
                config.chunk_size = k;
            }
            if let Some(filter) = filter {
                config.filter = match filter {
                    FilterArg::Any => ScanFilter::Any,
                    FilterArg::Sniff => ScanFilter::Sniff,
                    FilterArg::Ext => match extensions {
                        Some(list) => ScanFilter::Extensions(list),
                        None => ScanFilter::video_extensions(),
                    },
                };
            }
            config.validate()?;
            run_join(config, input, output, format, json).await
        }
        Commands::Locate { common } => {
            let config = load_config(&common)?;
            let toolchain = config.locator().resolve()?;
            for (name, path, from) in [
                ("ffmpeg", &toolchain.ffmpeg, toolchain.ffmpeg_from),
                ("ffprobe", &toolchain.ffprobe, toolchain.ffprobe_from),
            ] {
                let status = if ffmpeg::is_runnable(path) { "ok" } else { "not runnable" };
                println!("{:<8} {} ({:?}, {})", name, path.display(), from, status);
            }
            Ok(())
        }
    }
}

fn load_config(common: &CommonArgs) -> Result<JoinerConfig> {
    let mut config = match &common.config {
        Some(path) => JoinerConfig::load(path)?,
        None => JoinerConfig::default(),
    }
    .with_env()?;
    if let Some(ffmpeg) = &common.ffmpeg {
        config.ffmpeg_path = Some(ffmpeg.clone());
    }
    Ok(config)
}

async fn run_join(
    config: JoinerConfig,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    format: Option<String>,
    json: bool,
) -> Result<()> {
    // The encoder must be known before any file is touched
    let toolchain = config
        .locator()
        .resolve()
        .context("Cannot join videos without ffmpeg")?;
    let backend = Arc::new(FfmpegBackend::new(toolchain));

    let form = JoinForm {
        input_dir: field(input, "Input Folder")?,
        output_dir: field(output, "Output Folder")?,
        format: match format {
            Some(f) => f,
            None => prompt("Output Format", Some(&config.default_format))?,
        },
    };

    let mut controller = JoinController::new(backend, config);
    let job = controller.start(&form)?;
    info!("Joining with chunks of {}", job.chunk_size);

    while let Some(event) = controller.next_event().await {
        match event {
            ShellEvent::Log(entry) => println!("{}", entry.render()),
            ShellEvent::Finished(notification) => return finish(notification, json),
        }
    }
    bail!("Join worker went away without reporting")
}

fn finish(notification: Notification, json: bool) -> Result<()> {
    match &notification {
        Notification::Done { report, .. } => {
            println!("{}: {}", notification.title(), notification.message());
            if !report.skipped.is_empty() {
                println!("Skipped {} file(s)", report.skipped.len());
            }
            if json {
                println!("{}", serde_json::to_string_pretty(report)?);
            }
            Ok(())
        }
        Notification::Error { .. } => {
            bail!("{}: {}", notification.title(), notification.message())
        }
    }
}

fn field(value: Option<PathBuf>, label: &str) -> Result<String> {
    match value {
        Some(path) => Ok(path.to_string_lossy().into_owned()),
        None => prompt(label, None),
    }
}

/// Read one form field from stdin
fn prompt(label: &str, default: Option<&str>) -> Result<String> {
    match default {
        Some(d) => print!("{} [{}]: ", label, d),
        None => print!("{}: ", label),
    }
    std::io::stdout().flush()?;

    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    let value = line.trim().to_string();

    Ok(match default {
        Some(d) if value.is_empty() => d.to_string(),
        _ => value,
    })
}
