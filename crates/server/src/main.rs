//! MA-Crossover — moving-average crossover backtester and optimizer
//!
//! Usage:
//!   ma-crossover serve --port 3001                  — Launch HTTP API
//!   ma-crossover backtest --short 5 --long 20       — Single backtest
//!   ma-crossover optimize --top-n 10                — Grid search
//!   ma-crossover series --seed 42 --export s.json   — Dump a synthetic series

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use engine::{
    generate_default_series, generate_seeded_series, optimize, run_backtest, run_optimization,
    validate_series, BacktestResult, OptimizationResult, OptimizeProgress, OptimizeRequest,
    PriceBar, StrategyParameters, DEFAULT_INITIAL_CAPITAL,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_PORT: u16 = 3001;
const SEED_ENV: &str = "MA_CROSSOVER_SEED";
const PORT_ENV: &str = "MA_CROSSOVER_PORT";
/// Ranked results included in a status poll unless `?top=` says otherwise
const STATUS_TOP_N: usize = 10;

#[derive(Parser)]
#[command(name = "ma-crossover")]
#[command(about = "Moving-average crossover backtester and parameter optimizer", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the HTTP API
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on (falls back to MA_CROSSOVER_PORT, then 3001)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Generate a synthetic daily series
    Series {
        /// RNG seed (falls back to MA_CROSSOVER_SEED)
        #[arg(long)]
        seed: Option<u64>,
        /// Optional JSON export path
        #[arg(long)]
        export: Option<String>,
    },
    /// Backtest a single short/long window pair
    Backtest {
        /// Short moving-average window
        #[arg(long, default_value_t = 5)]
        short: usize,
        /// Long moving-average window
        #[arg(long, default_value_t = 20)]
        long: usize,
        /// Starting capital
        #[arg(long)]
        capital: Option<Decimal>,
        /// RNG seed for the synthetic series
        #[arg(long)]
        seed: Option<u64>,
        /// JSON file with a PriceBar array to use instead of synthetic data
        #[arg(long)]
        input: Option<String>,
        /// Optional JSON export path
        #[arg(long)]
        export: Option<String>,
    },
    /// Grid search over short/long window pairs
    Optimize {
        /// Candidate short windows (comma-separated)
        #[arg(long, value_delimiter = ',')]
        short_windows: Vec<usize>,
        /// Candidate long windows (comma-separated)
        #[arg(long, value_delimiter = ',')]
        long_windows: Vec<usize>,
        /// Starting capital
        #[arg(long)]
        capital: Option<Decimal>,
        /// RNG seed for the synthetic series
        #[arg(long)]
        seed: Option<u64>,
        /// JSON file with a PriceBar array to use instead of synthetic data
        #[arg(long)]
        input: Option<String>,
        /// Number of ranked results to print
        #[arg(long, default_value_t = 10)]
        top_n: usize,
        /// Optional JSON export path
        #[arg(long)]
        export: Option<String>,
    },
}

#[derive(Clone)]
struct AppState {
    optimize_progress: Arc<OptimizeProgress>,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,ma_crossover=debug")
    } else {
        EnvFilter::new("info,engine=info,ma_crossover=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

fn env_seed() -> Option<u64> {
    std::env::var(SEED_ENV).ok().and_then(|s| s.parse().ok())
}

fn env_port() -> Option<u16> {
    std::env::var(PORT_ENV).ok().and_then(|s| s.parse().ok())
}

/// Synthetic series, seeded when a seed is given or configured
fn synthetic_series(seed: Option<u64>) -> anyhow::Result<Vec<PriceBar>> {
    let bars = match seed.or_else(env_seed) {
        Some(seed) => generate_seeded_series(seed)?,
        None => generate_default_series()?,
    };
    Ok(bars)
}

/// Load a PriceBar array from `input`, or fall back to synthetic data
fn load_series(input: Option<&str>, seed: Option<u64>) -> anyhow::Result<Vec<PriceBar>> {
    match input {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path, e))?;
            let bars: Vec<PriceBar> = serde_json::from_str(&raw)?;
            validate_series(&bars)?;
            info!(path, bars = bars.len(), "Loaded price series");
            Ok(bars)
        }
        None => synthetic_series(seed),
    }
}

fn export_json<T: serde::Serialize>(path: &str, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    println!("\nResults exported to {}", path);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    match cli.command {
        Commands::Serve { host, port } => {
            let port = port.or_else(env_port).unwrap_or(DEFAULT_PORT);
            cmd_serve(&host, port).await?;
        }
        Commands::Series { seed, export } => {
            cmd_series(seed, export)?;
        }
        Commands::Backtest {
            short,
            long,
            capital,
            seed,
            input,
            export,
        } => {
            cmd_backtest(short, long, capital, seed, input, export)?;
        }
        Commands::Optimize {
            short_windows,
            long_windows,
            capital,
            seed,
            input,
            top_n,
            export,
        } => {
            cmd_optimize(
                short_windows,
                long_windows,
                capital,
                seed,
                input,
                top_n,
                export,
            )
            .await?;
        }
    }

    Ok(())
}

// ============================================================================
// Serve command — Axum web server
// ============================================================================

async fn cmd_serve(host: &str, port: u16) -> anyhow::Result<()> {
    info!("MA-Crossover v{} starting...", APP_VERSION);

    let state = AppState {
        optimize_progress: Arc::new(OptimizeProgress::new()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(api_health))
        .route("/series", get(api_series))
        .route("/backtest", post(api_backtest))
        .route("/optimize", post(api_start_optimization))
        .route("/optimize/status", get(api_optimize_status))
        .route("/optimize/cancel", post(api_cancel_optimization))
        .with_state(state);

    let app = Router::new().nest("/api", api_routes).layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== MA-Crossover v{} ===", APP_VERSION);
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET  /api/health              - Health check");
    println!("  GET  /api/series              - Synthetic price series (?seed=)");
    println!("  POST /api/backtest            - Single-pair backtest");
    println!("  POST /api/optimize            - Start grid search");
    println!("  GET  /api/optimize/status     - Poll grid search progress");
    println!("  POST /api/optimize/cancel     - Cancel running grid search");
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// CLI commands
// ============================================================================

fn cmd_series(seed: Option<u64>, export: Option<String>) -> anyhow::Result<()> {
    let bars = synthetic_series(seed)?;
    println!("\n=== MA-Crossover v{} ===", APP_VERSION);
    if let (Some(first), Some(last)) = (bars.first(), bars.last()) {
        println!(
            "{} bars: {} ({:.2}) → {} ({:.2})",
            bars.len(),
            first.date,
            first.close,
            last.date,
            last.close
        );
    }
    if let Some(path) = export {
        export_json(&path, &bars)?;
    }
    Ok(())
}

fn cmd_backtest(
    short: usize,
    long: usize,
    capital: Option<Decimal>,
    seed: Option<u64>,
    input: Option<String>,
    export: Option<String>,
) -> anyhow::Result<()> {
    println!("\n=== MA-Crossover v{} ===", APP_VERSION);
    let bars = load_series(input.as_deref(), seed)?;
    let result = run_backtest(
        &bars,
        StrategyParameters::new(short, long),
        capital.unwrap_or(DEFAULT_INITIAL_CAPITAL),
    )?;

    print_summary(&result);
    print_trades(&result);

    if let Some(path) = export {
        export_json(&path, &result)?;
    }
    Ok(())
}

async fn cmd_optimize(
    short_windows: Vec<usize>,
    long_windows: Vec<usize>,
    capital: Option<Decimal>,
    seed: Option<u64>,
    input: Option<String>,
    top_n: usize,
    export: Option<String>,
) -> anyhow::Result<()> {
    println!("\n=== MA-Crossover v{} ===", APP_VERSION);

    let mut request = OptimizeRequest::default();
    if !short_windows.is_empty() {
        request.short_windows = short_windows;
    }
    if !long_windows.is_empty() {
        request.long_windows = long_windows;
    }
    if let Some(capital) = capital {
        request.initial_capital = capital;
    }

    let bars = load_series(input.as_deref(), seed)?;
    println!(
        "Bars: {} | Short: {:?} | Long: {:?} | Capital: {}",
        bars.len(),
        request.short_windows,
        request.long_windows,
        request.initial_capital
    );

    let result: OptimizationResult =
        tokio::task::spawn_blocking(move || optimize(&bars, &request)).await??;

    print_ranking(&result, top_n);
    println!("\nBest parameters: {}", result.best_parameters);
    print_summary(&result.best_result);

    if let Some(path) = export {
        export_json(&path, &result)?;
    }
    Ok(())
}

fn print_summary(r: &BacktestResult) {
    println!("\nParameters {} (short/long):", r.parameters);
    println!(
        "  Total return     {:>10.2}%   Annualized {:>8.2}%",
        r.total_return_pct, r.annualized_return_pct
    );
    println!(
        "  Buy & hold       {:>10.2}%   Outperf.   {:>+8.2}%",
        r.benchmark_return_pct, r.outperformance_pct
    );
    println!(
        "  Max drawdown     {:>10.2}%   Sharpe     {:>8.2}",
        r.max_drawdown_pct, r.sharpe_ratio
    );
    println!(
        "  Trades {:>4} ({} won, {} lost)   Win rate {:.1}%   Final equity {:.2}",
        r.total_trades, r.winning_trades, r.losing_trades, r.win_rate_pct, r.final_equity
    );
}

fn print_trades(r: &BacktestResult) {
    if r.trades.is_empty() {
        println!("\nNo trades.");
        return;
    }
    println!(
        "\n  {:<10} {:>10} {:<10} {:>10} {:>12} {:>8}",
        "Entry", "Price", "Exit", "Price", "Profit", "%"
    );
    println!("  {}", "-".repeat(66));
    for t in &r.trades {
        println!(
            "  {:<10} {:>10.2} {:<10} {:>10.2} {:>+12.2} {:>+7.2}%",
            t.entry_date, t.entry_price, t.exit_date, t.exit_price, t.profit, t.profit_pct
        );
    }
}

fn print_ranking(result: &OptimizationResult, top_n: usize) {
    let shown = result.top(top_n);
    println!("\nTop {} of {} Results:", shown.len(), result.all_results.len());
    println!(
        "  {:>3}  {:>5} {:>5} {:>8} {:>9} {:>8} {:>7} {:>6} {:>9}",
        "#", "Short", "Long", "Sharpe", "Return%", "MaxDD%", "Trades", "WR%", "vs B&H"
    );
    println!("  {}", "-".repeat(72));
    for (i, r) in shown.iter().enumerate() {
        println!(
            "  {:>3}  {:>5} {:>5} {:>8.3} {:>+9.2} {:>8.2} {:>7} {:>6.1} {:>+9.2}",
            i + 1,
            r.parameters.short_window,
            r.parameters.long_window,
            r.sharpe_ratio,
            r.total_return_pct,
            r.max_drawdown_pct,
            r.total_trades,
            r.win_rate_pct,
            r.outperformance_pct,
        );
    }
}

// ============================================================================
// API Handlers
// ============================================================================

type ApiError = (StatusCode, Json<serde_json::Value>);

fn bad_request(err: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({
            "success": false,
            "message": err.to_string(),
        })),
    )
}

/// Caller-supplied bars take precedence over a seeded synthetic series
fn request_series(series: Option<Vec<PriceBar>>, seed: Option<u64>) -> Result<Vec<PriceBar>, ApiError> {
    match series {
        Some(bars) => {
            validate_series(&bars).map_err(bad_request)?;
            Ok(bars)
        }
        None => synthetic_series(seed).map_err(bad_request),
    }
}

/// GET /api/health
async fn api_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "ma-crossover",
        "version": APP_VERSION,
    }))
}

#[derive(Debug, Deserialize)]
struct SeriesQuery {
    seed: Option<u64>,
}

/// GET /api/series — Synthetic daily series
async fn api_series(Query(query): Query<SeriesQuery>) -> Result<Json<Vec<PriceBar>>, ApiError> {
    synthetic_series(query.seed).map(Json).map_err(bad_request)
}

#[derive(Debug, Deserialize)]
struct BacktestBody {
    short_window: usize,
    long_window: usize,
    initial_capital: Option<Decimal>,
    seed: Option<u64>,
    series: Option<Vec<PriceBar>>,
}

/// POST /api/backtest — Single-pair backtest
async fn api_backtest(Json(body): Json<BacktestBody>) -> Result<Json<BacktestResult>, ApiError> {
    let bars = request_series(body.series, body.seed)?;
    let parameters = StrategyParameters::new(body.short_window, body.long_window);
    let capital = body.initial_capital.unwrap_or(DEFAULT_INITIAL_CAPITAL);

    tokio::task::spawn_blocking(move || run_backtest(&bars, parameters, capital))
        .await
        .map_err(|e| {
            error!("Backtest task failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "success": false, "message": e.to_string() })),
            )
        })?
        .map(Json)
        .map_err(bad_request)
}

#[derive(Debug, Deserialize)]
struct OptimizeBody {
    #[serde(flatten)]
    request: OptimizeRequest,
    seed: Option<u64>,
    series: Option<Vec<PriceBar>>,
}

/// POST /api/optimize — Start grid search in background
async fn api_start_optimization(
    State(state): State<AppState>,
    Json(body): Json<OptimizeBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let bars = request_series(body.series, body.seed)?;
    let request = body.request;

    if !state.optimize_progress.try_start() {
        let pct = state.optimize_progress.progress_pct();
        return Ok(Json(serde_json::json!({
            "success": false,
            "message": format!("Optimization already in progress ({:.0}% complete)", pct),
        })));
    }

    info!(
        short_windows = ?request.short_windows,
        long_windows = ?request.long_windows,
        bars = bars.len(),
        "Spawning optimization task"
    );

    let progress = state.optimize_progress.clone();
    tokio::task::spawn_blocking(move || {
        run_optimization(&request, &bars, &progress);
    });

    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Optimization started",
    })))
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    top: Option<usize>,
}

/// GET /api/optimize/status — Poll grid search progress
async fn api_optimize_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Json<serde_json::Value> {
    Json(status_body(
        &state.optimize_progress,
        query.top.unwrap_or(STATUS_TOP_N),
    ))
}

/// Progress snapshot with the best result and the `top_n` ranked results
fn status_body(progress: &OptimizeProgress, top_n: usize) -> serde_json::Value {
    let result = progress.result();
    serde_json::json!({
        "status": progress.status(),
        "progress_pct": progress.progress_pct(),
        "completed": progress.completed.load(Ordering::Relaxed),
        "total": progress.total_combinations.load(Ordering::Relaxed),
        "best_parameters": result.as_ref().map(|r| r.best_parameters),
        "best_result": result.as_ref().map(|r| &r.best_result),
        "results": result.as_ref().map(|r| r.top(top_n)),
        "error": progress.error_message(),
    })
}

/// POST /api/optimize/cancel
async fn api_cancel_optimization(State(state): State<AppState>) -> Json<serde_json::Value> {
    let running = state.optimize_progress.is_running();
    if running {
        state.optimize_progress.cancel();
        info!("Optimization cancel requested");
    }
    let message = if running {
        "Cancel requested"
    } else {
        "No optimization running"
    };
    Json(serde_json::json!({
        "success": running,
        "message": message,
    }))
}
