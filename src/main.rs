use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use oauth_keeper::auth::{self, AuthManager, OAuthClient, TokenStore};
use oauth_keeper::config::{self, Command, Config};
use oauth_keeper::{login, middleware, routes};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let (mut config, command) = Config::load()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    match command {
        Command::Serve => serve(config).await,
        Command::Login => {
            config::prompt_for_credentials(&mut config)?;
            run_login(config).await
        }
        Command::Status => show_status(config).await,
        Command::Logout => {
            let manager = build_auth_manager(&config)?;
            manager.logout().await?;
            println!("Stored token removed ({})", config.token_path.display());
            Ok(())
        }
    }
}

fn build_auth_manager(config: &Config) -> Result<AuthManager> {
    let client = OAuthClient::new(
        config.endpoints(),
        config.credentials(),
        Duration::from_secs(config.http_request_timeout),
        Duration::from_secs(config.http_connect_timeout),
    )?;
    Ok(AuthManager::new(
        TokenStore::new(config.token_path.clone()),
        client,
    ))
}

async fn serve(config: Config) -> Result<()> {
    config.validate()?;

    tracing::info!("🚀 OAuth Keeper starting...");
    tracing::info!(
        "Server configured: {}:{}",
        config.server_host,
        config.server_port
    );

    tracing::info!("Initializing authentication...");
    let auth_manager = Arc::new(build_auth_manager(&config)?);

    // Startup check: refreshes an expired token if possible
    match auth_manager.get_valid_access_token().await {
        Some(token) => {
            tracing::info!(
                "✅ Authentication available (token: {})",
                auth::mask_token(&token)
            );
        }
        None => {
            tracing::warn!(
                "No valid token stored; visit http://{}:{}/auth/login to authenticate",
                config.server_host,
                config.server_port
            );
        }
    }

    let app_state = routes::AppState { auth_manager };

    // Build the application with routes and middleware
    let app = build_app(app_state);

    // Bind to configured host and port
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    print_startup_banner(&config);

    // Start server with graceful shutdown
    tracing::info!("🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("👋 Server shutdown complete");

    Ok(())
}

async fn run_login(config: Config) -> Result<()> {
    config.validate()?;

    let manager = build_auth_manager(&config)?;
    let timeout = Duration::from_secs(config.callback_timeout);

    let record = login::run_login_flow(&manager, config.callback_port, timeout, |url| {
        println!();
        println!("Open the following URL in your browser to authenticate:");
        println!();
        println!("  {}", url);
        println!();
    })
    .await?;

    println!("✅ Authentication successful");
    println!("  Token file:  {}", config.token_path.display());
    println!("  Expires at:  {}", auth::format_expiry(record.expires_at));

    Ok(())
}

async fn show_status(config: Config) -> Result<()> {
    let manager = build_auth_manager(&config)?;

    let authenticated = manager.is_authenticated().await;
    println!("  Authenticated: {}", if authenticated { "yes" } else { "no" });

    match manager.store().load() {
        Some(record) => {
            println!("  Token file:    {}", config.token_path.display());
            println!("  Expires at:    {}", auth::format_expiry(record.expires_at));
            println!(
                "  Refreshable:   {}",
                if record.refresh_token().is_some() {
                    "yes"
                } else {
                    "no"
                }
            );
        }
        None => {
            println!("  No token stored at {}", config.token_path.display());
        }
    }

    Ok(())
}

/// Build the application router with middleware
fn build_app(state: routes::AppState) -> axum::Router {
    use axum::Router;

    Router::new()
        .merge(routes::health_routes())
        .merge(routes::auth_routes(state))
        .layer(axum::middleware::from_fn(middleware::log_requests))
}

/// Print startup banner
fn print_startup_banner(config: &Config) {
    let banner = r#"
╔═══════════════════════════════════════════════════════════╗
║                                                           ║
║                    🔑 OAuth Keeper                        ║
║                                                           ║
║  Authorization-code login with automatic token refresh    ║
║                                                           ║
╚═══════════════════════════════════════════════════════════╝
"#;

    println!("{}", banner);
    println!("  Version:     {}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Server:      http://{}:{}",
        config.server_host, config.server_port
    );
    println!("  API:         {}", config.api_base_url);
    println!("  Redirect:    {}", config.redirect_uri);
    println!("  Token file:  {}", config.token_path.display());
    println!("  Log Level:   {}", config.log_level);
    println!();
}

/// Handle graceful shutdown signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
