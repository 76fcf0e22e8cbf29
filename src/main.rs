use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use leadmarket_api::config::Config;
use leadmarket_api::db::Database;
use leadmarket_api::handlers;
use leadmarket_api::notifier::PartnerNotifier;
use leadmarket_api::settings::SettingsStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "leadmarket_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let db = Database::new(&config.database_url, config.max_db_connections).await?;
    tracing::info!("Database connection pool established");

    let settings = SettingsStore::new(db.pool.clone());

    let notifier = match config.notify_webhook_url.clone() {
        Some(url) => match PartnerNotifier::new(url, config.notify_webhook_token.clone()) {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::error!("Failed to initialize notification client: {}", e);
                None
            }
        },
        None => None,
    };

    let app_state = Arc::new(handlers::AppState {
        db: db.pool.clone(),
        config: config.clone(),
        settings,
        notifier,
    });

    // Rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .expect("rate limiter configuration is static and valid"),
    );

    let protected_routes = Router::new()
        // Leads and assignment
        .route("/api/v1/leads", post(handlers::create_lead))
        .route("/api/v1/leads/:id", get(handlers::get_lead))
        .route("/api/v1/leads/:id/assign", post(handlers::auto_assign))
        .route(
            "/api/v1/leads/:id/assignments/:partner_id/status",
            post(handlers::update_assignment),
        )
        .route(
            "/api/v1/leads/:id/assignments/:partner_id/cancellation",
            post(handlers::decide_cancellation),
        )
        // Partners
        .route("/api/v1/partners", post(handlers::create_partner))
        // Billing
        .route("/api/v1/invoices", post(handlers::generate_invoice))
        .route(
            "/api/v1/invoices/bulk",
            post(handlers::generate_bulk_invoices),
        )
        .route("/api/v1/billing/ready", get(handlers::billing_ready))
        // Reporting
        .route("/api/v1/reports/income", get(handlers::income_report))
        // Settings
        .route(
            "/api/v1/settings",
            get(handlers::get_settings).put(handlers::update_settings),
        )
        .layer(
            ServiceBuilder::new()
                // 5MB max payload
                .layer(RequestBodyLimitLayer::new(5 * 1024 * 1024))
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Health check bypasses rate limiting
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
