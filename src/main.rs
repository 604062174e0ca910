//! CLI entry point for the traffic pulse toolkit.
//!
//! Provides subcommands for ingesting traffic samples, querying derived
//! analytics views, and computing congestion predictions. Each subcommand
//! loads routes and samples from CSV, runs one operation against the
//! engines, and answers with the uniform JSON response envelope on stdout.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Datelike, Timelike, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use traffic_pulse::analytics::engine::AggregationEngine;
use traffic_pulse::analytics::rollup::{RollupCache, spawn_refresher};
use traffic_pulse::config::EngineConfig;
use traffic_pulse::error::Error;
use traffic_pulse::loader::{load_routes, load_sample_drafts};
use traffic_pulse::output::{self, Envelope};
use traffic_pulse::predict::baseline::BaselineStrategy;
use traffic_pulse::predict::engine::PredictionEngine;
use traffic_pulse::predict::types::PredictionRequest;
use traffic_pulse::registry::StaticRegistry;
use traffic_pulse::store::{Page, SampleDraft, SampleStore, SampleView};

#[derive(Parser)]
#[command(name = "traffic_pulse")]
#[command(about = "Road traffic aggregation and congestion prediction", long_about = None)]
struct Cli {
    /// CSV file with route metadata
    #[arg(long, default_value = "routes.csv")]
    routes: String,

    /// CSV file with traffic samples
    #[arg(long, default_value = "samples.csv")]
    samples: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query stored samples, paginated or by window/time range
    Samples {
        /// Restrict to one route
        #[arg(long)]
        route_id: Option<String>,

        /// Trailing window in hours
        #[arg(long)]
        hours: Option<i64>,

        /// Range start (RFC 3339, inclusive)
        #[arg(long)]
        start: Option<DateTime<Utc>>,

        /// Range end (RFC 3339, exclusive)
        #[arg(long)]
        end: Option<DateTime<Utc>>,

        #[arg(long, default_value_t = 1)]
        page: usize,

        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// The latest sample per route
    Live,
    /// Ingest a single sample from flags, or a CSV batch from a file
    Ingest {
        /// CSV file to bulk-ingest (all-or-nothing)
        #[arg(short, long)]
        file: Option<String>,

        #[arg(long)]
        route_id: Option<String>,

        /// RFC 3339 timestamp
        #[arg(long)]
        timestamp: Option<DateTime<Utc>>,

        #[arg(long)]
        avg_speed: Option<f64>,

        #[arg(long)]
        vehicle_count: Option<u64>,

        #[arg(long)]
        congestion_index: Option<f64>,

        #[arg(long)]
        latitude: Option<f64>,

        #[arg(long)]
        longitude: Option<f64>,

        #[arg(long)]
        weather_condition: Option<String>,

        #[arg(long)]
        temperature: Option<f64>,
    },
    /// Rolling traffic summary over the trailing window
    Summary {
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
    /// Hour-aligned trend buckets over the trailing window
    Trends {
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
    /// Historical congestion heatmap per route and hour of day
    Heatmap {
        #[arg(long)]
        route_id: Option<String>,
    },
    /// Hourly traffic patterns (the heatmap rollup, by hour)
    Patterns {
        #[arg(long)]
        route_id: Option<String>,
    },
    /// Compare routes over the trailing window
    Compare {
        /// Route ids to compare
        #[arg(required = true)]
        route_ids: Vec<String>,

        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
    /// Recent daily statistics for a route
    Stats {
        route_id: String,

        #[arg(long, default_value_t = 7)]
        days: usize,
    },
    /// Predict congestion for a route and time context
    Predict {
        route_id: String,

        #[arg(long)]
        hour: u8,

        /// 0 = Sunday .. 6 = Saturday
        #[arg(long)]
        day_of_week: u8,

        #[arg(long, default_value_t = 80)]
        vehicle_count: u64,

        #[arg(long)]
        weekend: Option<bool>,

        #[arg(long)]
        rush_hour: Option<bool>,

        /// CSV file to append the prediction to
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Predictions for the next N hours of a route
    PredictWindow {
        route_id: String,

        #[arg(long, default_value_t = 24)]
        hours: u8,

        /// CSV file to append the predictions to
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Predictions for all 24 hours of a day
    PredictDay {
        route_id: String,

        /// 0 = Sunday .. 6 = Saturday
        #[arg(long)]
        day_of_week: u8,

        /// CSV file to append the predictions to
        #[arg(short, long)]
        output: Option<String>,
    },
    /// One prediction per known route for an hour and day
    PredictAll {
        /// Defaults to the current UTC hour
        #[arg(long)]
        hour: Option<u8>,

        /// Defaults to the current day; 0 = Sunday .. 6 = Saturday
        #[arg(long)]
        day_of_week: Option<u8>,
    },
    /// Periodically re-ingest the samples file and report a live summary
    Monitor {
        /// Seconds between rounds
        #[arg(short = 'r', long, default_value_t = 60)]
        interval: u64,

        /// Number of rounds (0 = infinite)
        #[arg(short = 'n', long, default_value_t = 0)]
        rounds: usize,
    },
}

/// The loaded store plus both engines, wired through shared handles.
struct World {
    store: Arc<SampleStore>,
    rollups: Arc<RollupCache>,
    aggregation: AggregationEngine,
    prediction: PredictionEngine,
    config: Arc<EngineConfig>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/traffic_pulse.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("traffic_pulse.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let config = Arc::new(EngineConfig::from_env());
    let world = load_world(&cli.routes, &cli.samples, config.clone()).await?;

    match cli.command {
        Commands::Samples {
            route_id,
            hours,
            start,
            end,
            page,
            limit,
        } => {
            if let (Some(start), Some(end)) = (start, end) {
                let views = sample_views(
                    world.store.query_range(route_id.as_deref(), start, end),
                    &world.config,
                );
                output::emit(&Envelope::ok(views))?;
            } else if let Some(hours) = hours {
                let views = sample_views(
                    world.store.window(route_id.as_deref(), hours, Utc::now()),
                    &world.config,
                );
                output::emit(&Envelope::ok(views))?;
            } else {
                let page = world.store.paginate(route_id.as_deref(), page, limit);
                let page = Page {
                    data: sample_views(page.data, &world.config),
                    page: page.page,
                    limit: page.limit,
                    total: page.total,
                    total_pages: page.total_pages,
                };
                output::emit(&Envelope::ok(page))?;
            }
        }
        Commands::Live => {
            respond(world.aggregation.live().await, &world.config)?;
        }
        Commands::Ingest {
            file,
            route_id,
            timestamp,
            avg_speed,
            vehicle_count,
            congestion_index,
            latitude,
            longitude,
            weather_condition,
            temperature,
        } => {
            if let Some(file) = file {
                let drafts = load_sample_drafts(&file)?;
                respond(world.store.bulk_ingest(drafts).await, &world.config)?;
            } else {
                let draft = SampleDraft {
                    route_id,
                    timestamp,
                    avg_speed,
                    vehicle_count,
                    congestion_index,
                    latitude,
                    longitude,
                    weather_condition,
                    temperature,
                };
                let result = world.store.ingest(draft).await;
                respond(
                    result.map(|s| s.view(&world.config.thresholds)),
                    &world.config,
                )?;
            }
        }
        Commands::Summary { hours } => {
            respond(world.aggregation.summary(hours).await, &world.config)?;
        }
        Commands::Trends { hours } => {
            respond(world.aggregation.trends(hours).await, &world.config)?;
        }
        Commands::Heatmap { route_id } => {
            respond(
                world.aggregation.heatmap(route_id.as_deref()).await,
                &world.config,
            )?;
        }
        Commands::Patterns { route_id } => {
            respond(
                world.aggregation.hourly_patterns(route_id.as_deref()).await,
                &world.config,
            )?;
        }
        Commands::Compare { route_ids, hours } => {
            respond(
                world.aggregation.compare(&route_ids, hours).await,
                &world.config,
            )?;
        }
        Commands::Stats { route_id, days } => {
            respond(
                world.aggregation.daily_stats(&route_id, days).await,
                &world.config,
            )?;
        }
        Commands::Predict {
            route_id,
            hour,
            day_of_week,
            vehicle_count,
            weekend,
            rush_hour,
            output: output_path,
        } => {
            let request = PredictionRequest {
                route_id,
                hour,
                day_of_week,
                vehicle_count,
                is_weekend: weekend,
                is_rush_hour: rush_hour,
            };
            let result = world.prediction.predict(request).await;
            if let (Ok(prediction), Some(path)) = (&result, &output_path) {
                output::append_predictions(path, std::slice::from_ref(prediction))?;
            }
            respond(result, &world.config)?;
        }
        Commands::PredictWindow {
            route_id,
            hours,
            output: output_path,
        } => {
            let result = world.prediction.upcoming_predictions(&route_id, hours).await;
            if let (Ok(predictions), Some(path)) = (&result, &output_path) {
                output::append_predictions(path, predictions)?;
            }
            respond(result, &world.config)?;
        }
        Commands::PredictDay {
            route_id,
            day_of_week,
            output: output_path,
        } => {
            let result = world
                .prediction
                .hourly_predictions(&route_id, day_of_week)
                .await;
            if let (Ok(predictions), Some(path)) = (&result, &output_path) {
                output::append_predictions(path, predictions)?;
            }
            respond(result, &world.config)?;
        }
        Commands::PredictAll { hour, day_of_week } => {
            let now = Utc::now();
            let hour = hour.unwrap_or(now.hour() as u8);
            let day_of_week =
                day_of_week.unwrap_or(now.weekday().num_days_from_sunday() as u8);
            respond(
                world.prediction.all_routes_predictions(hour, day_of_week).await,
                &world.config,
            )?;
        }
        Commands::Monitor { interval, rounds } => {
            monitor(&cli.samples, &world, interval, rounds).await?;
        }
    }

    Ok(())
}

/// Loads routes and any existing samples, wires the store, rollup cache,
/// and both engines together, and materializes the first rollup set.
async fn load_world(
    routes_path: &str,
    samples_path: &str,
    config: Arc<EngineConfig>,
) -> Result<World> {
    let routes = load_routes(routes_path)?;
    let registry = Arc::new(StaticRegistry::new(routes));
    let store = Arc::new(SampleStore::new(registry.clone()));

    if Path::new(samples_path).exists() {
        let drafts = load_sample_drafts(samples_path)?;
        let outcome = store.bulk_ingest(drafts).await?;
        info!(inserted = outcome.inserted, "Base samples ingested");
    } else {
        info!(path = samples_path, "No base samples file, starting empty");
    }

    let rollups = Arc::new(RollupCache::new());
    let aggregation = AggregationEngine::new(
        store.clone(),
        registry.clone(),
        rollups.clone(),
        config.clone(),
    );
    aggregation.refresh_rollups();

    let prediction = PredictionEngine::new(
        registry,
        rollups.clone(),
        Arc::new(BaselineStrategy::new(config.clone())),
        config.clone(),
    );

    Ok(World {
        store,
        rollups,
        aggregation,
        prediction,
        config,
    })
}

/// Periodically re-reads the samples file, appends records not seen yet,
/// and reports a live summary. Rollups refresh on their own cadence in the
/// background, decoupled from ingestion.
async fn monitor(samples_path: &str, world: &World, interval: u64, rounds: usize) -> Result<()> {
    let refresher = spawn_refresher(
        world.store.clone(),
        world.rollups.clone(),
        world.config.thresholds,
        world.config.rollup_refresh_interval,
    );

    if rounds == 0 {
        info!(interval, "Monitoring indefinitely. Press Ctrl+C to stop.");
    } else {
        info!(rounds, interval, "Starting monitor rounds");
    }

    let mut round = 0;
    loop {
        if rounds > 0 && round >= rounds {
            break;
        }
        round += 1;

        match load_sample_drafts(samples_path) {
            Ok(drafts) => {
                let mut appended = 0;
                let mut known = 0;
                for draft in drafts {
                    match world.store.ingest(draft).await {
                        Ok(_) => appended += 1,
                        Err(Error::Conflict { .. }) => known += 1,
                        Err(e) => warn!(error = %e, "Sample rejected"),
                    }
                }
                info!(
                    round,
                    appended,
                    known,
                    total = world.store.len(),
                    "Ingest round complete"
                );
            }
            Err(e) => warn!(error = %e, "Could not re-read samples file"),
        }

        match world.aggregation.summary(24).await {
            Ok(summary) => output::emit(&Envelope::ok(summary))?,
            Err(e) => error!(error = %e, "Summary failed"),
        }

        if rounds == 0 || round < rounds {
            tokio::time::sleep(std::time::Duration::from_secs(interval)).await;
        }
    }

    refresher.abort();
    Ok(())
}

fn sample_views(
    samples: Vec<Arc<traffic_pulse::store::TrafficSample>>,
    config: &EngineConfig,
) -> Vec<SampleView> {
    samples
        .iter()
        .map(|s| s.view(&config.thresholds))
        .collect()
}

/// Emits the success or failure envelope for one engine result. Failures
/// exit nonzero after reporting.
fn respond<T: Serialize>(
    result: traffic_pulse::error::Result<T>,
    config: &EngineConfig,
) -> Result<()> {
    match result {
        Ok(data) => output::emit(&Envelope::ok(data)),
        Err(err) => {
            error!(status = err.status(), error = %err, "Request failed");
            output::emit(&Envelope::<()>::fail(&err, config.expose_error_detail))?;
            std::process::exit(1);
        }
    }
}
