use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error, info};

use property_pipeline::analytics::{
    raw_expensive_suburbs, raw_price_by_distance_range, raw_properties_by_type,
};
use property_pipeline::{
    check_tables, clean_data, drop_all_tables, explore_data, house_vs_apartment, latest_processed_file,
    load_csv_to_raw, load_raw_data, most_expensive_suburbs, price_by_distance, render_table,
    save_processed_data, setup_database, summary_stats, top_suburbs_by_value, verify_raw, with_session,
    Config, ImportMode, Pipeline, Session,
};

#[derive(Parser, Debug)]
#[command(name = "property-pipeline")]
#[command(about = "Sydney property sales ETL: CSV -> SQLite -> quality checks -> analytics")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Database file (overrides PROPERTY_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create tables and indexes
    Setup,
    /// Read, explore and clean the raw CSV, then save a timestamped snapshot
    LoadRaw,
    /// Import a cleaned CSV into properties_raw (latest snapshot by default)
    Import {
        #[arg(long)]
        file: Option<PathBuf>,
        /// Clear properties_raw before inserting
        #[arg(long)]
        replace: bool,
    },
    /// Extract, transform, load and run quality checks
    Etl,
    /// Summary statistics of the processed table
    Summary,
    /// Analytical reports over the processed table
    Analytics,
    /// Exploration queries over the raw table
    ExploreRaw,
    /// Run all four pipeline tasks in order
    Run,
    /// Drop every pipeline table
    DropTables,
}

fn setup_logging(config: &Config) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("property_pipeline={}", config.log_level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_writer(std::io::stderr),
        )
        .init();

    debug!("Logging initialized at level: {}", config.log_level);
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    setup_logging(&config);

    match run(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command, config: &Config) -> Result<()> {
    match command {
        Command::Setup => with_session(&config.db_path, |session| {
            setup_database(session.conn())?;
            println!("✓ Tables: {}", check_tables(session.conn())?.join(", "));
            Ok(())
        }),
        Command::LoadRaw => run_load_raw(config),
        Command::Import { file, replace } => run_import(config, file, replace),
        Command::Etl => with_session(&config.db_path, |session| {
            setup_database(session.conn())?;
            let report = Pipeline::new(config, session).run_etl()?;
            println!("✓ Loaded {} records ({} outliers removed)", report.loaded, report.transform.outliers_removed);
            println!("✓ {}", report.quality.summary());
            Ok(())
        }),
        Command::Summary => with_session(&config.db_path, |session| {
            let stats = summary_stats(session.conn())?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }),
        Command::Analytics => with_session(&config.db_path, |session| run_analytics(session, config)),
        Command::ExploreRaw => with_session(&config.db_path, |session| {
            let conn = session.conn();
            println!("\n📊 Top 10 Most Expensive Suburbs\n{}", render_table(&raw_expensive_suburbs(conn)?));
            println!("\n🏘️  Properties by Type\n{}", render_table(&raw_properties_by_type(conn)?));
            println!("\n📍 Price by Distance from CBD\n{}", render_table(&raw_price_by_distance_range(conn)?));
            Ok(())
        }),
        Command::Run => with_session(&config.db_path, |session| {
            setup_database(session.conn())?;
            let outcome = Pipeline::new(config, session).run();
            for task in &outcome.tasks {
                let mark = if task.succeeded { "✓" } else { "✗" };
                println!("{} {} ({} attempt(s))", mark, task.task.id(), task.attempts);
            }
            let finished = outcome.into_result()?;
            println!("✅ Pipeline run {} complete", finished.run_id);
            Ok(())
        }),
        Command::DropTables => with_session(&config.db_path, |session| {
            drop_all_tables(session.conn())?;
            println!("✓ Property tables dropped");
            Ok(())
        }),
    }
}

fn run_load_raw(config: &Config) -> Result<()> {
    let records = load_raw_data(&config.raw_data_path())?;

    let overview = explore_data(&records);
    println!("Dataset shape: {} rows x {} columns", overview.rows, overview.columns);
    for column in overview.missing.iter().filter(|c| c.missing > 0) {
        println!("  {:<26} {} missing", column.column, column.missing);
    }

    let (cleaned, stats) = clean_data(records);
    println!(
        "Cleaned: {} -> {} rows ({} duplicates, {} incomplete)",
        stats.input_rows, stats.output_rows, stats.duplicates_removed, stats.incomplete_removed
    );

    let path = save_processed_data(&cleaned, config.processed_dir(), None)?;
    println!("✓ Saved {}", path.display());
    Ok(())
}

fn run_import(config: &Config, file: Option<PathBuf>, replace: bool) -> Result<()> {
    let path = match file {
        Some(path) => path,
        None => latest_processed_file(config.processed_dir())?,
    };
    info!("Using file: {}", path.display());

    let mode = if replace { ImportMode::Replace } else { ImportMode::Append };
    with_session(&config.db_path, |session| {
        setup_database(session.conn())?;
        let inserted = load_csv_to_raw(session, &path, config.page_size, mode)?;
        let stats = verify_raw(session.conn())?;
        println!("✓ Inserted {} rows, {} now in properties_raw", inserted, stats.total_rows);
        Ok(())
    })
}

fn run_analytics(session: &mut Session, config: &Config) -> Result<()> {
    let conn = session.conn();
    println!("\n📍 Price by Distance from CBD\n{}", render_table(&price_by_distance(conn)?));
    println!("\n🏠 House vs Apartment\n{}", render_table(&house_vs_apartment(conn)?));
    println!(
        "\n💰 Top Suburbs by Value\n{}",
        render_table(&top_suburbs_by_value(conn, config.value_min_group)?)
    );
    println!(
        "\n📊 Most Expensive Suburbs\n{}",
        render_table(&most_expensive_suburbs(conn, config.expensive_min_group)?)
    );
    Ok(())
}
