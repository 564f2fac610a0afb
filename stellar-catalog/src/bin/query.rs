use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use stellar_catalog::lightcone::{EventDirection, LightConeRequest, LightConeResult};
use stellar_catalog::query::{CoarseSector, QueryBuilder, QueryEngine, QuerySpec, ResultSet};
use stellar_catalog::{CatalogConfig, StoreHandle};
use stellar_core::Vector3;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Clone, Copy, ValueEnum)]
enum Sampling {
    Brightest,
    Uniform,
}

#[derive(Parser)]
#[command(name = "stellar-query")]
#[command(about = "Query a partitioned stellar catalog")]
#[command(version)]
struct Cli {
    /// Store root directory (overrides [store].root)
    #[arg(long)]
    store: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Worker threads (0 = all cores, overrides [parallel].threads)
    #[arg(short, long)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print store layout and partition headers
    Info,
    /// Stars in a distance band, optionally in one coarse sky sector
    Shell {
        /// Inner distance in light-years (inclusive)
        #[arg(long, default_value = "0.0")]
        min: f64,
        /// Outer distance in light-years (exclusive)
        #[arg(long)]
        max: f64,
        /// Coarse sky sector 1..=12 (all sectors when omitted)
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=12))]
        sector: Option<u8>,
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Stars inside a sphere in light-year space
    Sphere {
        #[arg(allow_hyphen_values = true)]
        x: f64,
        #[arg(allow_hyphen_values = true)]
        y: f64,
        #[arg(allow_hyphen_values = true)]
        z: f64,
        /// Radius in light-years
        #[arg(long)]
        radius: f64,
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Stars inside an axis-aligned box in light-year space
    Box {
        #[arg(long, num_args = 2, value_names = ["MIN", "MAX"], allow_hyphen_values = true, required = true)]
        x: Vec<f64>,
        #[arg(long, num_args = 2, value_names = ["MIN", "MAX"], allow_hyphen_values = true, required = true)]
        y: Vec<f64>,
        #[arg(long, num_args = 2, value_names = ["MIN", "MAX"], allow_hyphen_values = true, required = true)]
        z: Vec<f64>,
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Stars that can currently see an event on Earth
    Lightcone {
        /// Event latitude in degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        /// Event longitude in degrees
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// Event time, UTC ("YYYY-MM-DD HH:MM:SS" or RFC 3339)
        #[arg(long)]
        event: String,
        /// Reference present (defaults to the current time)
        #[arg(long)]
        now: Option<String>,
        #[arg(long, default_value = "0")]
        days: i64,
        #[arg(long, default_value = "0")]
        hours: i64,
        #[arg(long, default_value = "0")]
        minutes: i64,
        /// Number of stars to report (overrides [causality].max_results)
        #[arg(long)]
        limit: Option<usize>,
        /// Scan every candidate for the true top results by wait
        #[arg(long)]
        exhaustive: bool,
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Args)]
struct QueryArgs {
    /// Target epoch as a Julian year
    #[arg(long, default_value = "2016.0", allow_hyphen_values = true)]
    epoch: f64,
    /// Maximum number of results (default from the result-size policy)
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long, value_enum, default_value = "brightest")]
    sampling: Sampling,
    /// Seed for uniform sampling (default from [query].default_seed)
    #[arg(long)]
    seed: Option<u64>,
    /// Print query timing
    #[arg(long)]
    timing: bool,
    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormat,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => CatalogConfig::load(path)?,
        None => CatalogConfig::default(),
    };
    if let Some(threads) = cli.threads {
        config.parallel.threads = threads;
    }
    let root = cli
        .store
        .clone()
        .or_else(|| config.store.root.clone())
        .context("no store root: pass --store or set [store].root")?;
    let layout = config.store.layout;
    let engine = QueryEngine::new(config)?;

    match cli.command {
        Commands::Info => print_info(&StoreHandle::open(&root, layout)?)?,
        Commands::Shell {
            min,
            max,
            sector,
            query,
        } => {
            let sector = sector.and_then(CoarseSector::new);
            run_range(&engine, &root, QuerySpec::shell(min, max, sector), &query);
        }
        Commands::Sphere {
            x,
            y,
            z,
            radius,
            query,
        } => run_range(
            &engine,
            &root,
            QuerySpec::sphere(Vector3::new(x, y, z), radius),
            &query,
        ),
        Commands::Box { x, y, z, query } => run_range(
            &engine,
            &root,
            QuerySpec::aabb((x[0], x[1]), (y[0], y[1]), (z[0], z[1])),
            &query,
        ),
        Commands::Lightcone {
            lat,
            lon,
            event,
            now,
            days,
            hours,
            minutes,
            limit,
            exhaustive,
            format,
        } => {
            let window = TimeDelta::try_days(days)
                .zip(TimeDelta::try_hours(hours))
                .zip(TimeDelta::try_minutes(minutes))
                .and_then(|((d, h), m)| d.checked_add(&h)?.checked_add(&m))
                .context("window is out of range")?;
            let request = LightConeRequest {
                direction: EventDirection::from_geographic(lat, lon),
                event_time: parse_time(&event)?,
                now: match now {
                    Some(s) => parse_time(&s)?,
                    None => Utc::now(),
                },
                window,
            };
            let mut causality = engine.config().causality.clone();
            if let Some(k) = limit {
                causality.max_results = k;
            }
            if exhaustive {
                causality.early_stop = false;
            }
            let result = match StoreHandle::open(&root, layout) {
                Ok(store) => engine.light_cone_with(&store, &request, &causality),
                Err(e) => {
                    warn!("{}; no stars searched", e);
                    LightConeResult {
                        sightings: Vec::new(),
                        report: Default::default(),
                        stopped_early: false,
                    }
                }
            };
            print_sightings(&result, format)?;
        }
    }

    Ok(())
}

fn init_tracing() {
    // STELLAR_LOG_FORMAT=json switches to machine-parseable output.
    let log_format = std::env::var("STELLAR_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "stellar_catalog=info".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn run_range(engine: &QueryEngine, root: &Path, builder: QueryBuilder, args: &QueryArgs) {
    let mut builder = builder.epoch(args.epoch);
    if let Some(limit) = args.limit {
        builder = builder.limit(limit);
    }
    builder = match args.sampling {
        Sampling::Brightest => builder.brightest(),
        Sampling::Uniform => {
            builder.uniform(args.seed.unwrap_or(engine.config().query.default_seed))
        }
    };
    let spec = builder.build();

    let start = Instant::now();
    let result = engine.execute_at(root, engine.config().store.layout, &spec);
    if args.timing {
        eprintln!(
            "Query completed in {:.2} ms ({} partitions scanned, {} pruned)",
            start.elapsed().as_secs_f64() * 1000.0,
            result.report.partitions_scanned,
            result.report.partitions_pruned
        );
    }

    match args.format {
        OutputFormat::Table => print_table(&result),
        OutputFormat::Json => print_json(&result),
        OutputFormat::Csv => print_csv(&result),
    }
}

fn print_info(store: &StoreHandle) -> anyhow::Result<()> {
    println!("Store: {}", store.root().display());
    match store.layout() {
        Some(layout) => println!("Layout: {:?}", layout),
        None => println!("Layout: (empty store)"),
    }
    println!(
        "Partitions: {} ({} skipped)",
        store.partitions().len(),
        store.skipped()
    );
    if let Some(width) = store.bin_width_ly() {
        println!("Bin width: {} ly", width);
    }
    let mut total = 0u64;
    for part in store.partitions() {
        match part.open() {
            Ok(p) => {
                total += p.header().rows;
                println!("  {:<28} {}", part.key.file_name(), p.header());
            }
            Err(e) => println!("  {:<28} unreadable: {}", part.key.file_name(), e),
        }
    }
    println!("Total rows: {}", total);
    Ok(())
}

fn print_table(result: &ResultSet) {
    for (i, s) in result.stars.iter().enumerate() {
        println!(
            "{:6}: {:>20} x={:12.4} y={:12.4} z={:12.4} Mag={:6.2} Dist={:10.3} ly",
            i + 1,
            s.source_id,
            s.x,
            s.y,
            s.z,
            s.magnitude,
            s.distance_ly
        );
    }
    if result.is_empty() {
        println!("No stars found matching the query.");
    } else {
        println!("\nTotal results: {} (epoch J{})", result.count(), result.epoch);
    }
}

fn print_json(result: &ResultSet) {
    match serde_json::to_string_pretty(result) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Cannot encode result: {}", e),
    }
}

fn print_csv(result: &ResultSet) {
    println!("source_id,x,y,z,magnitude,distance_ly");
    for s in &result.stars {
        println!(
            "{},{},{},{},{},{}",
            s.source_id, s.x, s.y, s.z, s.magnitude, s.distance_ly
        );
    }
}

fn print_sightings(result: &LightConeResult, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Table => {
            if result.sightings.is_empty() {
                println!("No stars can see this event. Try a longer window or an earlier event.");
                return Ok(());
            }
            for (i, s) in result.sightings.iter().enumerate() {
                println!(
                    "#{:<3} ID: {:>20} | Distance: {:10.2} ly | Wait: {}",
                    i + 1,
                    s.source_id,
                    s.distance_ly,
                    s.wait_breakdown()
                );
            }
            if result.stopped_early {
                println!("\n(first results found; rerun with --exhaustive for the shortest waits)");
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(result)?),
        OutputFormat::Csv => {
            println!("source_id,distance_ly,offset_years,arrival,wait");
            for s in &result.sightings {
                println!(
                    "{},{},{},{},{}",
                    s.source_id,
                    s.distance_ly,
                    s.offset_years,
                    s.arrival.to_rfc3339(),
                    s.wait_breakdown()
                );
            }
        }
    }
    Ok(())
}

fn parse_time(s: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|t| t.and_utc())
        .with_context(|| format!("Cannot parse time '{}', expected YYYY-MM-DD HH:MM:SS", s))
}
