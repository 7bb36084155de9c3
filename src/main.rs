mod agi;
mod audio;
mod audit;
mod config;
mod flow;
mod progress;
pub mod registry;
mod services;
mod setup;
mod validate;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use config::Config;
use progress::{FieldValue, ProgressStore};
use registry::{CallRegistry, RegistryStatus};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("--serve") => {
            let rt = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");
            rt.block_on(server());
        }
        Some("--setup") => setup::run(),
        Some("--validate") => validate_value(args.get(2).map(|s| s.as_str())),
        Some("--save-json") => save_json(&args[2..]),
        Some("--version") => println!("taxi-agi {VERSION}"),
        Some("--help") | Some("-h") => print_usage(),
        Some(other) => {
            eprintln!("Unknown option: {other}");
            print_usage();
            std::process::exit(1);
        }
        None => agi_call(),
    }
}

fn print_usage() {
    println!("taxi-agi {VERSION}");
    println!("Automated taxi booking over Asterisk AGI");
    println!();
    println!("Usage: taxi-agi [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --serve                      Run the FastAGI server");
    println!("  --setup                      Run interactive tenant wizard");
    println!("  --validate <value>           Print 1 if the value is usable, else 0");
    println!("  --save-json <key> <value> <file>");
    println!("                               Store one field in a progress file");
    println!("  --version                    Print version");
    println!("  --help, -h                   Print this help message");
    println!();
    println!("Without options, handles one call on stdin/stdout (AGI).");
}

/// stdout is the AGI channel, so logs go to stderr.
fn init_tracing(to_stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "taxi_agi=info,tower_http=info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if to_stderr {
        builder.with_writer(std::io::stderr).init();
    } else {
        builder.init();
    }
}

fn agi_call() {
    init_tracing(true);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to create tokio runtime");

    rt.block_on(async {
        let config = Config::load_or_default();
        let reader = BufReader::new(tokio::io::stdin());
        match flow::handle_call(reader, tokio::io::stdout(), &config).await {
            Ok(outcome) => tracing::info!(?outcome, "Call done"),
            Err(e) => tracing::warn!("AGI session failed: {e}"),
        }
    });
}

fn validate_value(value: Option<&str>) {
    let Some(value) = value else {
        println!("0");
        return;
    };
    let policy = Config::load_or_default().collection.low_confidence;
    println!("{}", validate::validate(value).as_flag(policy));
}

fn save_json(args: &[String]) {
    let [key, value, path] = args else {
        eprintln!("Usage: taxi-agi --save-json <key> <value> <file>");
        std::process::exit(1);
    };

    if let Err(e) = ProgressStore::new(path).set_field(key, FieldValue::from_raw(value)) {
        eprintln!("Failed to save {key}: {e}");
        std::process::exit(1);
    }
}

async fn server() {
    init_tracing(false);

    let config = match Config::load() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        host = %config.fastagi.host,
        port = config.fastagi.port,
        tenants = %config.paths.tenants.display(),
        "Starting taxi-agi"
    );

    let registry = CallRegistry::new();
    let cancel = CancellationToken::new();

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
        }
        shutdown.cancel();
    });

    if let Some(port) = config.fastagi.health_port {
        let addr: SocketAddr = match format!("{}:{}", config.fastagi.host, port).parse() {
            Ok(a) => a,
            Err(e) => {
                eprintln!("Invalid health address: {e}");
                std::process::exit(1);
            }
        };
        tokio::spawn(health_server(addr, registry.clone(), cancel.clone()));
    }

    if let Err(e) = agi::fastagi::serve(config, registry, cancel).await {
        eprintln!("FastAGI server error: {e}");
        std::process::exit(1);
    }
}

async fn health_server(addr: SocketAddr, registry: CallRegistry, cancel: CancellationToken) {
    let app = Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(registry);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(%addr, "Health endpoint unavailable: {e}");
            return;
        }
    };
    tracing::info!(%addr, "Health endpoint listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await;
    if let Err(e) = served {
        tracing::error!("Health server error: {e}");
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn status(State(registry): State<CallRegistry>) -> Json<RegistryStatus> {
    Json(registry.status().await)
}
