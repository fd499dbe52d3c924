use coral_redirect::auth::TokenAuthenticator;
use coral_redirect::cli::{ApiKeyAction, Cli, Command};
use coral_redirect::config::Config;
use coral_redirect::error::AppError;
use coral_redirect::server::{self, AppState, Handler};
use coral_redirect::storage::{Buckets, StorageError, StorageFactory};
use coral_redirect::telemetry::{self, LogLevel, Telemetry};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    telemetry::init_logging(LogLevel::from_flags(cli.verbose, cli.debug))?;

    if let Err(e) = run(cli).await {
        error!("Fatal: {}", e);
        return Err(e.into());
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let config = Config::from_sources(&cli)?;

    // Metrics must be wired up before any store handle records into them.
    let telemetry = Arc::new(Telemetry::init(&config.telemetry)?);

    let backend = StorageFactory::from_config(&config.storage)?;
    info!("Opened {} storage backend", backend.name());
    let buckets = Buckets::initialize(backend.as_ref()).await?;

    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config, &buckets, telemetry.clone()).await,
        Command::ApiKey { action } => manage_api_key(&buckets, action).await,
    };

    if let Err(e) = backend.sync() {
        warn!("Failed to sync storage on shutdown: {}", e);
    }
    telemetry.shutdown();
    info!("Shutdown complete");
    result
}

async fn serve(config: &Config, buckets: &Buckets, telemetry: Arc<Telemetry>) -> Result<(), AppError> {
    let bind_addr = config.server.bind_addr();
    let listener = TcpListener::bind(&bind_addr).await?;
    info!("Redirect server listening on {}", bind_addr);

    let state = AppState::new(buckets, &config.server, telemetry);
    let handler = Handler::new(Arc::new(state));

    server::run(listener, handler, shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn manage_api_key(buckets: &Buckets, action: ApiKeyAction) -> Result<(), AppError> {
    let auth = TokenAuthenticator::new(buckets.api_keys.clone());
    match action {
        ApiKeyAction::Add { token } => {
            auth.add_token(&token).await?;
            println!("API token added");
        }
        ApiKeyAction::Revoke { token } => match auth.revoke_token(&token).await {
            Ok(()) => println!("API token revoked"),
            Err(StorageError::DoesNotExist(_)) => {
                println!("API token was not authorized");
            }
            Err(e) => return Err(e.into()),
        },
    }
    Ok(())
}
