use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::{self, TraceLayer};
use tracing::{Level, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use appointment_cell::{BookingGateway, CalendarClient, HttpCalendarClient, InMemoryCalendar};
use conversation_cell::{
    AppState, BookingStateMachine, ConversationService, InMemorySessionStore, RedisSessionStore,
    SessionReaper, SessionStore,
};
use doctor_cell::DoctorDirectory;
use shared_config::AppConfig;
use shared_utils::{Clock, SystemClock};

const REAPER_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting booking assistant API server");

    // Load configuration
    let config = Arc::new(AppConfig::from_env());

    // Calendar backend
    let calendar: Arc<dyn CalendarClient> = if config.is_calendar_configured() {
        info!("Using REST calendar at {}", config.calendar_base_url);
        Arc::new(HttpCalendarClient::new(&config))
    } else {
        warn!("Calendar not configured; bookings go to an in-memory calendar");
        Arc::new(InMemoryCalendar::new())
    };
    let gateway = Arc::new(BookingGateway::new(calendar, &config));

    // Session store; only the in-memory store needs the reaper
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (store, reaper) = if config.redis_url.is_some() {
        let store: Arc<dyn SessionStore> = Arc::new(
            RedisSessionStore::new(&config)
                .await
                .context("failed to connect session store to Redis")?,
        );
        (store, None)
    } else {
        warn!("REDIS_URL not set; sessions are kept in memory");
        let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let reaper = SessionReaper::new(store.clone(), clock.clone(), REAPER_INTERVAL).spawn();
        (store, Some(reaper))
    };

    let machine = BookingStateMachine::new(DoctorDirectory::clinic_default(), gateway, &config);
    let conversations = ConversationService::new(machine, store, &config).with_clock(clock);

    // Create shared state
    let state = AppState {
        config: config.clone(),
        conversations: Arc::new(conversations),
    };

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new()
                    .level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new()
                    .level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(reaper) = reaper {
        reaper.shutdown().await;
    }
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
