// Main entry point for the Aegis GRC service

use std::sync::Arc;

use aegis_grc::api::cache::ResponseCache;
use aegis_grc::api::{create_router, AppState};
use aegis_grc::auth::{password, AuthState, SecurityEventLogger};
use aegis_grc::config::Config;
use aegis_grc::iam::{self, AccessEngine};
use aegis_grc::loader::library;
use aegis_grc::store::Stores;
use anyhow::Context;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configuration first, before any logging.
    let config = Config::from_env().context("configuration")?;
    init_tracing(&config)?;

    info!("Starting Aegis GRC");
    info!(
        bind_address = %config.bind_address,
        port = config.port,
        "Configuration loaded"
    );

    let db_pool = aegis_grc::db::connect(&config.database_url, config.database_max_connections)
        .await
        .context("database connection")?;
    aegis_grc::db::migrate(&db_pool).await.context("migrations")?;
    info!("Database ready");

    let stores = Arc::new(Stores::new(db_pool.clone()));

    // Builtin IAM objects must exist before anything else touches the
    // folder tree.
    iam::seed_builtin_roles(&stores).await?;
    let root = iam::seed_root_folder(&stores).await?;
    let admin_group = iam::seed_admin_group(&stores, &root).await?;
    if let (Some(email), Some(secret)) = (
        config.bootstrap_admin_email.as_deref(),
        config.bootstrap_admin_password.as_deref(),
    ) {
        let hash = password::hash_password(secret)?;
        iam::seed_bootstrap_admin(&stores, &admin_group, email, &hash).await?;
        info!(email, "Bootstrap administrator seeded");
    }

    // Object libraries land in the root folder and are visible to every
    // domain through published-library access.
    if let Some(library_dir) = &config.library_path {
        let stats = library::import_dir(&stores, root.id, library_dir)
            .await
            .context("library import")?;
        info!(
            frameworks = stats.frameworks,
            risk_matrices = stats.risk_matrices,
            "Object libraries loaded"
        );
    }

    let audit = SecurityEventLogger::new(stores.security_events.clone());
    let auth_state = Arc::new(AuthState {
        sessions: stores.sessions.clone(),
        users: stores.users.clone(),
        audit: audit.clone(),
    });
    let app_state = AppState {
        stores: stores.clone(),
        engine: AccessEngine::new(db_pool),
        cache: ResponseCache::new(),
        audit,
        config: Arc::new(config.clone()),
    };

    let router = create_router(app_state, auth_state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {}", addr))?;
    info!(addr = %addr, "Server listening");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize the tracing subscriber. Must run exactly once.
fn init_tracing(config: &Config) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_env_filter(filter);

    if config.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
    Ok(())
}

/// Graceful shutdown on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            info!("SIGTERM received, starting graceful shutdown");
        },
    }
}
