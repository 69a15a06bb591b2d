use clap::{Parser, Subcommand};
use dropsize::config::{self, Config, RunConfig};
use dropsize::coordinator::{Coordinator, TriggerOutcome};
use dropsize::imaging::{MagickConverter, RustBackend};
use dropsize::selection::{PromptSelector, resolve_selection};
use dropsize::watch::IntakeWatcher;
use dropsize::{logging, output};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Profile override shared by the commands that process images.
#[derive(clap::Args, Clone)]
struct ProfileArgs {
    /// Comma-separated size profiles to activate, bypassing the configured selection
    #[arg(long, value_delimiter = ',')]
    profiles: Vec<String>,
}

impl ProfileArgs {
    fn forced(&self) -> Option<&[String]> {
        if self.profiles.is_empty() {
            None
        } else {
            Some(&self.profiles)
        }
    }
}

#[derive(Parser)]
#[command(name = "dropsize")]
#[command(about = "Watch a drop folder and publish resized image variants")]
#[command(long_about = "\
Watch a drop folder and publish resized image variants

Photos dropped into the intake directory are normalized, moved into the
working directory and published as one file per target width:

  input/                      # intake: drop files here
  │   ├── IMG 0001.HEIC       # proprietary formats are converted first
  │   └── beach.png
  processing/                 # working: owned by the running pipeline
  output/
  │   ├── IMG_0001.HEIC_320.jpg   # spaces become underscores, width suffix
  │   ├── IMG_0001.HEIC_1080.jpg
  │   ├── beach_320.jpg
  │   └── beach_1080.jpg
  quarantine/                 # files that failed retry.max_attempts times

Target widths come from the size profiles selected at startup, either
statically (selection.active), interactively, or with --profiles.

Run 'dropsize gen-config' to generate a documented config.toml.")]
#[command(version)]
struct Cli {
    /// Configuration file (stock defaults are used when it does not exist)
    #[arg(long, default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Intake directory (overrides directories.intake)
    #[arg(long, global = true)]
    intake: Option<PathBuf>,

    /// Working directory (overrides directories.working)
    #[arg(long, global = true)]
    working: Option<PathBuf>,

    /// Output directory (overrides directories.output)
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Clear the directories, process what is there, then watch the intake
    Watch(ProfileArgs),
    /// Process intake and working once, without clearing anything
    Run {
        #[command(flatten)]
        profiles: ProfileArgs,
        /// Print the run report as JSON instead of progress lines
        #[arg(long)]
        json: bool,
    },
    /// Validate the configuration and print the resolved widths
    Check(ProfileArgs),
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match &cli.command {
        Command::Watch(profiles) => {
            let config = load(&cli)?;
            let run_config = resolve(&config, profiles)?;
            let debounce = Duration::from_millis(config.watch.debounce_ms);

            let (tx, printer) = spawn_printer();
            let coordinator = build_coordinator(run_config)?.with_events(tx);
            coordinator.start()?;
            println!("==> Cleared {}", dirs_line(coordinator.config()));

            // Watch before the first run so drops during it are not missed.
            let (batch_tx, batch_rx) = mpsc::channel();
            let watcher = IntakeWatcher::new(
                &coordinator.config().directories.intake,
                debounce,
                batch_tx,
            )?;
            println!("==> Watching {}", watcher.dir().display());
            coordinator.trigger();
            coordinator.serve(batch_rx);

            drop(watcher);
            drop(coordinator);
            join_printer(printer)?;
        }
        Command::Run { profiles, json } => {
            let config = load(&cli)?;
            let run_config = resolve(&config, profiles)?;

            let (coordinator, printer) = if *json {
                (build_coordinator(run_config)?, None)
            } else {
                let (tx, printer) = spawn_printer();
                (
                    build_coordinator(run_config)?.with_events(tx),
                    Some(printer),
                )
            };
            coordinator.prepare_directories()?;
            let outcome = coordinator.trigger();
            drop(coordinator);
            if let Some(printer) = printer {
                join_printer(printer)?;
            }

            let runs = match outcome {
                TriggerOutcome::Completed(runs) => runs,
                TriggerOutcome::Queued | TriggerOutcome::Skipped => Vec::new(),
            };
            if *json {
                println!("{}", serde_json::to_string_pretty(&runs)?);
            } else if runs.is_empty() {
                println!("Nothing to process");
            } else {
                for ctx in &runs {
                    output::print_run_summary(ctx);
                }
            }
        }
        Command::Check(profiles) => {
            let config = load(&cli)?;
            let run_config = resolve(&config, profiles)?;
            output::print_check_output(&run_config);
            println!("==> Configuration is valid");
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Load the config file and apply directory overrides from the command line.
fn load(cli: &Cli) -> Result<Config, config::ConfigError> {
    let mut config = config::load_config(&cli.config)?;
    if let Some(intake) = &cli.intake {
        config.directories.intake = intake.clone();
    }
    if let Some(working) = &cli.working {
        config.directories.working = working.clone();
    }
    if let Some(output) = &cli.output {
        config.directories.output = output.clone();
    }
    Ok(config)
}

/// Select profiles and freeze the run configuration.
///
/// Runs before any directory is touched, so an empty selection aborts
/// startup with the filesystem unchanged.
fn resolve(config: &Config, profiles: &ProfileArgs) -> Result<RunConfig, config::ConfigError> {
    let mut prompt = PromptSelector::stdio();
    let selected = resolve_selection(config, profiles.forced(), &mut prompt)?;
    RunConfig::resolve(config, &selected)
}

fn build_coordinator(
    run_config: RunConfig,
) -> Result<Coordinator, dropsize::coordinator::CoordinatorError> {
    let converter = MagickConverter::new(run_config.normalize.program.clone());
    Coordinator::new(run_config, Box::new(RustBackend::new()), Box::new(converter))
}

fn spawn_printer() -> (mpsc::Sender<dropsize::pipeline::RunEvent>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel();
    let printer = std::thread::spawn(move || {
        for event in rx {
            for line in output::format_run_event(&event) {
                println!("{}", line);
            }
        }
    });
    (tx, printer)
}

fn join_printer(printer: JoinHandle<()>) -> Result<(), Box<dyn std::error::Error>> {
    printer
        .join()
        .map_err(|_| "output thread panicked".into())
}

fn dirs_line(config: &RunConfig) -> String {
    let dirs = &config.directories;
    format!(
        "{}, {}, {}",
        dirs.intake.display(),
        dirs.working.display(),
        dirs.output.display()
    )
}
