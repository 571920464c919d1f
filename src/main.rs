//! TimeIndex CLI
//!
//! Command-line interface for TimeIndex operations:
//! - Create indexes and append items
//! - Inspect headers and cache statistics
//! - Locate timestamps and dump items

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use timeindex::config::{generate_default_config, Config};
use timeindex::index::{IndexDirectory, IndexView, Interval, Lifetime, Overlap, Selector};
use timeindex::registry::TypeRegistry;
use timeindex::storage::{IndexItem, IndexKind, IndexSpec};
use timeindex::timestamp::{Scale, Timestamp, TimestampKind};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "timeindex")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Time-indexed append-only data store")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Index directory (default: from config)
    #[arg(short, long, global = true)]
    pub dir: Option<PathBuf>,

    /// Config file (default: search standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new index
    Create {
        name: String,
        /// Index kind (incore, inline, external, shadow)
        #[arg(short, long, default_value = "inline")]
        kind: IndexKind,
        /// Data file for shadow indexes
        #[arg(long)]
        datapath: Option<PathBuf>,
        /// Default data type name (e.g. text/plain)
        #[arg(long)]
        datatype: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },

    /// Append an item
    Append {
        name: String,
        /// Payload text
        payload: Option<String>,
        /// Read the payload from a file instead
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Index timestamp (default: now). Supports RFC 3339, "now", seconds, or "<n>ms"
        #[arg(short, long)]
        time: Option<String>,
        /// Data timestamp (default: index timestamp)
        #[arg(long)]
        data_time: Option<String>,
        /// Data type name
        #[arg(long = "type")]
        data_type: Option<String>,
    },

    /// Show index header and cache statistics
    Info {
        name: String,
        #[arg(long)]
        json: bool,
    },

    /// Find the item current at a timestamp
    Locate {
        name: String,
        time: String,
        #[arg(short, long, value_enum, default_value = "data")]
        selector: SelectorArg,
        /// Items are instants rather than valid until the next item
        #[arg(long)]
        discrete: bool,
    },

    /// Print items, optionally restricted to a time range
    Dump {
        name: String,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
        #[arg(short, long, value_enum, default_value = "data")]
        selector: SelectorArg,
        #[arg(short, long)]
        limit: Option<u64>,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SelectorArg {
    Index,
    Data,
}

impl From<SelectorArg> for Selector {
    fn from(arg: SelectorArg) -> Self {
        match arg {
            SelectorArg::Index => Selector::Index,
            SelectorArg::Data => Selector::Data,
        }
    }
}

#[derive(Serialize)]
struct InfoReport {
    name: String,
    id: String,
    kind: String,
    uri: String,
    length: u64,
    terminated: bool,
    in_time_order: bool,
    fixed_size: bool,
    item_size: Option<u32>,
    first_time: Option<String>,
    last_time: Option<String>,
    first_data_time: Option<String>,
    last_data_time: Option<String>,
    description: Option<String>,
    data_types: Vec<String>,
    referenced: Vec<String>,
    stats: timeindex::index::CacheStats,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(dir) = &cli.dir {
        config.storage.index_dir = dir.display().to_string();
    }
    init_logging(&config);

    if let Commands::Config { output } = &cli.command {
        return write_config(output.as_deref());
    }

    let directory = Arc::new(config.directory()?);
    let index_dir = config.storage.index_dir();
    let result = run(&directory, &index_dir, cli.command);
    directory.shutdown();
    result
}

fn run(directory: &Arc<IndexDirectory>, index_dir: &std::path::Path, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Create {
            name,
            kind,
            datapath,
            datatype,
            description,
        } => {
            if kind == IndexKind::InCore {
                bail!("in-core indexes do not outlive the process");
            }
            let mut spec = IndexSpec::file(kind, &name, index_dir);
            if let Some(path) = datapath {
                spec = spec.data_path(path);
            }
            if let Some(datatype) = datatype {
                spec = spec.data_type(datatype);
            }
            if let Some(description) = description {
                spec = spec.description(description);
            }

            let view = directory.create(spec)?;
            println!("Created {} ({})", name, view.store().uri());
        }

        Commands::Append {
            name,
            payload,
            file,
            time,
            data_time,
            data_type,
        } => {
            let bytes = match (payload, file) {
                (_, Some(path)) => {
                    std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?
                }
                (Some(text), None) => text.into_bytes(),
                (None, None) => bail!("either a payload or --file is required"),
            };

            let index_time = parse_time(time.as_deref().unwrap_or("now"))?;
            let mut item = IndexItem::with_bytes(index_time, bytes);
            if let Some(data_time) = data_time {
                item = item.data_time(parse_time(&data_time)?);
            }

            let mut view = open(directory, index_dir, &name)?;
            if let Some(type_name) = data_type {
                let code = directory
                    .context()
                    .registry
                    .resolve_by_name(&type_name)
                    .with_context(|| format!("unknown data type {}", type_name))?;
                item = item.data_type(code);
            }

            view.store().activate()?;
            let length = view.add_item(item)?;
            view.store().commit()?;
            println!("Appended item {} to {}", length - 1, name);
        }

        Commands::Info { name, json } => {
            let view = open(directory, index_dir, &name)?;
            let report = info_report(&view);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_info(&report);
            }
        }

        Commands::Locate {
            name,
            time,
            selector,
            discrete,
        } => {
            let view = open(directory, index_dir, &name)?;
            let lifetime = if discrete {
                Lifetime::Discrete
            } else {
                Lifetime::Continuous
            };
            let location = view.locate(parse_time(&time)?, selector.into(), lifetime)?;
            match location.timestamp {
                Some(at) => println!("{} @ {}", location.position, at),
                None => println!("{}", location.position),
            }
        }

        Commands::Dump {
            name,
            from,
            to,
            selector,
            limit,
        } => {
            let view = open(directory, index_dir, &name)?;
            let selector = Selector::from(selector);
            let view = match (from, to) {
                (None, None) => view,
                (from, to) => {
                    let start = match from {
                        Some(s) => Some(parse_time(&s)?),
                        None => view.first_time(selector)?,
                    };
                    let end = match to {
                        Some(s) => Some(parse_time(&s)?),
                        None => view.last_time(selector)?,
                    };
                    match start.zip(end) {
                        Some((start, end)) => view.select(
                            Interval::new(start, end)?,
                            selector,
                            Overlap::Inside,
                            Lifetime::Continuous,
                        )?,
                        None => view,
                    }
                }
            };

            let offset = view.start();
            let limit = limit.unwrap_or(u64::MAX);
            for (n, item) in view.items().enumerate().take(limit as usize) {
                let item = item?;
                println!(
                    "{:>8}  {}  {}  type={}  {}",
                    offset + n as u64,
                    item.index_timestamp(),
                    item.data_timestamp(),
                    item.kind().0,
                    preview(item.data())
                );
            }
        }

        Commands::Config { output } => write_config(output.as_deref())?,
    }

    Ok(())
}

fn write_config(output: Option<&std::path::Path>) -> anyhow::Result<()> {
    let content = generate_default_config();
    match output {
        Some(path) => {
            std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
            println!("Config written to {}", path.display());
        }
        None => print!("{}", content),
    }
    Ok(())
}

fn open(directory: &Arc<IndexDirectory>, index_dir: &std::path::Path, name: &str) -> anyhow::Result<IndexView> {
    let spec = IndexSpec::file(IndexKind::External, name, index_dir);
    directory
        .open(spec)
        .with_context(|| format!("opening index {} in {}", name, index_dir.display()))
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("timeindex={}", config.logging.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Parse "now", RFC 3339, whole seconds, or "<n>ms"
fn parse_time(s: &str) -> anyhow::Result<Timestamp> {
    if s == "now" {
        return Ok(Timestamp::now());
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        let nanos = dt.timestamp_subsec_nanos();
        let kind = if nanos == 0 {
            TimestampKind::ABSOLUTE_SECONDS
        } else {
            TimestampKind::ABSOLUTE_NANOS
        };
        return Ok(Timestamp::new(kind, dt.timestamp(), nanos)?);
    }
    if let Some(ms) = s.strip_suffix("ms") {
        return Ok(Timestamp::absolute(Scale::Millis, ms.parse()?)?);
    }
    match s.parse::<i64>() {
        Ok(seconds) => Ok(Timestamp::absolute(Scale::Seconds, seconds)?),
        Err(_) => bail!("Invalid timestamp format: {}", s),
    }
}

fn info_report(view: &IndexView) -> InfoReport {
    let store = view.store();
    let header = store.header();
    let show = |t: Option<Timestamp>| t.map(|t| t.to_string());

    InfoReport {
        name: header.name.clone(),
        id: header.id.to_string(),
        kind: header.kind.to_string(),
        uri: store.uri().to_string(),
        length: header.length,
        terminated: header.terminated,
        in_time_order: header.in_time_order,
        fixed_size: header.fixed_size,
        item_size: header.item_size,
        first_time: show(header.first_time),
        last_time: show(header.last_time),
        first_data_time: show(header.first_data_time),
        last_data_time: show(header.last_data_time),
        description: header.options.description.clone(),
        data_types: header
            .options
            .data_types
            .iter()
            .map(|(code, name)| format!("{}={}", code, name))
            .collect(),
        referenced: header
            .options
            .referenced
            .values()
            .map(|r| format!("{} {}", r.id, r.uri))
            .collect(),
        stats: store.stats(),
    }
}

fn print_info(report: &InfoReport) {
    println!("Index:          {} ({})", report.name, report.kind);
    println!("ID:             {}", report.id);
    println!("URI:            {}", report.uri);
    if let Some(description) = &report.description {
        println!("Description:    {}", description);
    }
    println!("Items:          {}", report.length);
    println!("Terminated:     {}", report.terminated);
    println!("In time order:  {}", report.in_time_order);
    match report.item_size {
        Some(size) if report.fixed_size => println!("Item size:      {} bytes (fixed)", size),
        _ => println!("Item size:      variable"),
    }
    let or_dash = |t: &Option<String>| t.clone().unwrap_or_else(|| "-".to_string());
    println!(
        "Index times:    {} .. {}",
        or_dash(&report.first_time),
        or_dash(&report.last_time)
    );
    println!(
        "Data times:     {} .. {}",
        or_dash(&report.first_data_time),
        or_dash(&report.last_data_time)
    );
    if !report.data_types.is_empty() {
        println!("Data types:     {}", report.data_types.join(", "));
    }
    for reference in &report.referenced {
        println!("References:     {}", reference);
    }
    println!(
        "Cache:          {} accesses, {:.1}% hits, {} lazy loads, {} resident bytes",
        report.stats.accesses,
        report.stats.hit_ratio() * 100.0,
        report.stats.lazy_loads,
        report.stats.resident_bytes
    );
}

fn preview(data: Option<&[u8]>) -> String {
    match data {
        None => "<hollow>".to_string(),
        Some(bytes) => {
            let text = String::from_utf8_lossy(&bytes[..bytes.len().min(40)]);
            let text: String = text.chars().map(|c| if c.is_control() { '.' } else { c }).collect();
            if bytes.len() > 40 {
                format!("{:?}... ({} bytes)", text, bytes.len())
            } else {
                format!("{:?}", text)
            }
        }
    }
}
