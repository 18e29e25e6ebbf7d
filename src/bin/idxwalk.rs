//! idxwalk CLI: operator interface to the walker and the table exporter.

use std::io::Write as _;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use idxwalk::config::Config;
use idxwalk::event::EventKind;
use idxwalk::index::{HttpIndex, build_client};
use idxwalk::model::{Current, FetchOutcome, StepOutcome, Worklist};
use idxwalk::repodata::{self, Repodata};
use idxwalk::storage::Storage;
use idxwalk::table;
use idxwalk::telemetry::{TelemetryConfig, init_telemetry};
use idxwalk::walker::{FolderLocator, Walker};

#[derive(Parser)]
#[command(
    name = "idxwalk",
    version,
    about = "Fetch named files from a static file index, resumably"
)]
struct Cli {
    /// TOML file overriding environment configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a walk, or resume the one in progress
    Walk {
        /// Comma-separated item names (prompted for when omitted)
        #[arg(long)]
        items: Option<String>,
        /// Run a single step and exit
        #[arg(long)]
        once: bool,
        /// Expand wildcards and add dependencies from repository metadata
        #[arg(long)]
        with_deps: bool,
    },
    /// List repository packages matching shell-style patterns
    Search {
        #[arg(required = true)]
        patterns: Vec<String>,
    },
    /// Show a package's dependency closure
    Deps { name: String },
    /// Show the walk in progress
    Status,
    /// Print the event log
    Events {
        /// Only events after this sequence number
        #[arg(long, default_value_t = 0)]
        since: u64,
    },
    /// Abandon the walk in progress
    Reset {
        /// Also forget the current location
        #[arg(long)]
        all: bool,
    },
    /// Export the first HTML table of a page to CSV
    Table {
        /// URL or local file
        source: String,
        /// Output path
        #[arg(short, long, default_value = table::DEFAULT_OUTPUT)]
        out: PathBuf,
    },
    /// Configuration helpers
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (proxy redacted)
    Show,
    /// Write a default configuration file
    Init {
        #[arg(default_value = "idxwalk.toml")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "idxwalk".to_string(),
        default_filter: config.log_level.clone(),
    })?;

    match cli.command {
        Command::Walk {
            items,
            once,
            with_deps,
        } => cmd_walk(&config, items, once, with_deps).await,
        Command::Search { patterns } => cmd_search(&config, &patterns).await,
        Command::Deps { name } => cmd_deps(&config, &name).await,
        Command::Status => cmd_status(&config),
        Command::Events { since } => cmd_events(&config, since),
        Command::Reset { all } => cmd_reset(&config, all),
        Command::Table { source, out } => cmd_table(&config, &source, out).await,
        Command::Config { action } => match action {
            ConfigAction::Show => {
                print!("{}", config.to_toml()?);
                Ok(())
            }
            ConfigAction::Init { path } => {
                Config::write_default(&path)?;
                println!("Wrote {}", path.display());
                Ok(())
            }
        },
    }
}

fn open_walker(config: &Config) -> anyhow::Result<Walker> {
    let storage = Storage::open(&config.state_path)?;
    let locator = FolderLocator::new(config.extension.clone());
    Ok(Walker::new(storage, locator, config.restart_delay)?)
}

async fn cmd_walk(
    config: &Config,
    items: Option<String>,
    once: bool,
    with_deps: bool,
) -> anyhow::Result<()> {
    let mut walker = open_walker(config)?;

    let worklist = if walker.needs_input() {
        let raw = match items {
            Some(raw) => raw,
            None => prompt_items()?,
        };
        let mut worklist = Worklist::parse(&raw)?;
        if with_deps {
            let repo = load_repodata(config).await?;
            worklist = repo.expand(&worklist)?;
        }
        walker.start(worklist)?
    } else {
        walker.begin(items.as_deref())?
    };
    println!("Walking {} item(s): {}", worklist.len(), worklist.items().join(", "));

    let site = HttpIndex::from_config(config)?;
    println!(
        "Index: {}  Saving to: {}",
        site.base_url(),
        site.download_dir().display()
    );

    if once {
        match walker.step(&site).await? {
            StepOutcome::Navigated { item, location } => {
                println!("Navigated to '{location}' for {item}");
            }
            StepOutcome::Fetched {
                item,
                outcome,
                cursor,
            } => {
                print_fetch(&item, &outcome);
                println!("Cursor now {cursor}/{}", worklist.len());
            }
            StepOutcome::Done { .. } => println!("All items processed."),
        }
        return Ok(());
    }

    let shutdown = walker.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        shutdown.notify_one();
    });

    let summary = walker.run(&site).await?;

    println!(
        "Downloaded: {}  Not found: {}  Navigations: {}",
        summary.downloaded, summary.not_found, summary.navigations
    );
    if summary.completed {
        println!("All items processed.");
    } else if summary.interrupted {
        println!("Paused. Run `idxwalk walk` again to resume.");
    }
    Ok(())
}

async fn load_repodata(config: &Config) -> anyhow::Result<Repodata> {
    let client = build_client(config)?;
    Ok(repodata::fetch(&client, &config.repo_url, config.weak_deps).await?)
}

async fn cmd_search(config: &Config, patterns: &[String]) -> anyhow::Result<()> {
    let repo = load_repodata(config).await?;
    let matches = repo.filter(patterns)?;
    if matches.is_empty() {
        println!("No packages found.");
        return Ok(());
    }
    for name in &matches {
        println!("{name}");
    }
    println!("\n{} package(s)", matches.len());
    Ok(())
}

async fn cmd_deps(config: &Config, name: &str) -> anyhow::Result<()> {
    let repo = load_repodata(config).await?;
    let Some(closure) = repo.dependencies(name) else {
        anyhow::bail!("{name} is not in the repository metadata");
    };
    for dep in closure.iter().filter(|dep| *dep != name) {
        println!("{dep}");
    }
    println!("\n{name} needs {} other package(s)", closure.len() - 1);
    Ok(())
}

fn print_fetch(item: &str, outcome: &FetchOutcome) {
    match outcome {
        FetchOutcome::Downloaded { file_name, bytes } => {
            println!("{item}: downloaded {file_name} ({bytes} bytes)");
        }
        FetchOutcome::NotFound => println!("{item}: no matching file"),
    }
}

fn prompt_items() -> anyhow::Result<String> {
    print!("Item names (comma-separated): ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line)
}

fn cmd_status(config: &Config) -> anyhow::Result<()> {
    let walker = open_walker(config)?;
    let storage = walker.storage();

    println!("Phase:      {}", walker.phase());
    println!("Location:   '{}'", storage.location()?);

    let (Some(worklist), Some(cursor)) = (storage.worklist()?, storage.cursor()?) else {
        println!("No walk in progress.");
        return Ok(());
    };

    println!("Items:      {}", worklist.items().join(", "));
    println!("Cursor:     {cursor}/{}", worklist.len());
    match worklist.current(cursor) {
        Current::Item(item) => println!("Next:       {item}"),
        Current::Done => println!("Next:       (finished, cleared on next run)"),
    }
    Ok(())
}

fn cmd_events(config: &Config, since: u64) -> anyhow::Result<()> {
    let storage = Storage::open(&config.state_path)?;
    let events = storage.get_events_since(since)?;

    if events.is_empty() {
        println!("No events.");
        return Ok(());
    }

    for event in &events {
        println!(
            "{:>6}  {}  {}",
            event.seq,
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.kind
        );
    }
    println!("\n{} event(s)", events.len());
    Ok(())
}

fn cmd_reset(config: &Config, all: bool) -> anyhow::Result<()> {
    let mut storage = Storage::open(&config.state_path)?;
    if storage.clear_walk(EventKind::WalkReset)? {
        println!("Walk cleared.");
    } else {
        println!("No walk in progress.");
    }
    if all {
        storage.clear_location()?;
        println!("Location reset to index root.");
    }
    Ok(())
}

async fn cmd_table(config: &Config, source: &str, out: PathBuf) -> anyhow::Result<()> {
    let client = build_client(config)?;
    let html = table::load_source(&client, source).await?;
    let scraped = table::scrape_table(&html)?;
    tokio::fs::write(&out, scraped.to_csv()?).await?;
    println!(
        "Wrote {} row(s) x {} column(s) to {}",
        scraped.records.len(),
        scraped.headers.len(),
        out.display()
    );
    Ok(())
}
