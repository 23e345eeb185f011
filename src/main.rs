use std::{process, str::FromStr, sync::Arc};

use axum::http::HeaderName;
use tokio::try_join;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;
use usericon::{
    application::{
        error::AppError,
        icons::IconService,
        reactions::ReactionFeedService,
        repos::{HealthRepo, IconsRepo, ReactionsRepo, ThemesRepo, UsersRepo},
        users::UserProfileService,
    },
    cache::{BlobCache, IconCache, IconCacheConfig},
    config,
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, AdminState, HttpState},
        telemetry,
    },
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::ClearCache(_) => run_clear_cache(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let app = build_application_context(repositories, &settings)?;
    serve_http(&settings, app.http_state, app.admin_state).await
}

/// Offline reset of the blob directory. The hash index lives in the serving
/// process and is cleared through the admin listener instead.
async fn run_clear_cache(settings: config::Settings) -> Result<(), AppError> {
    let blobs = BlobCache::new(settings.icons.cache_dir.clone())
        .map_err(|err| AppError::from(InfraError::Io(err)))?;
    let report = blobs.clear_all().await;
    blobs
        .ensure_dir()
        .await
        .map_err(|err| AppError::from(InfraError::Io(err)))?;

    info!(
        target = "usericon::clear_cache",
        dir = %blobs.root().display(),
        removed = report.removed,
        failed = report.failed,
        "icon blob cache cleared"
    );
    Ok(())
}

struct ApplicationContext {
    http_state: HttpState,
    admin_state: AdminState,
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

fn build_application_context(
    repositories: Arc<PostgresRepositories>,
    settings: &config::Settings,
) -> Result<ApplicationContext, AppError> {
    let icons_repo: Arc<dyn IconsRepo> = repositories.clone();
    let users_repo: Arc<dyn UsersRepo> = repositories.clone();
    let themes_repo: Arc<dyn ThemesRepo> = repositories.clone();
    let reactions_repo: Arc<dyn ReactionsRepo> = repositories.clone();
    let health_repo: Arc<dyn HealthRepo> = repositories;

    let icon_cache = IconCache::new(&IconCacheConfig::from(&settings.icons))
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let icons = IconService::new(Arc::new(icon_cache), icons_repo);
    let profiles = UserProfileService::new(users_repo, themes_repo, icons.clone());
    let reactions = ReactionFeedService::new(reactions_repo, profiles.clone());

    let auth_header = settings
        .auth
        .user_header
        .as_deref()
        .map(HeaderName::from_str)
        .transpose()
        .map_err(|err| {
            AppError::from(InfraError::configuration(format!(
                "invalid auth.user_header: {err}"
            )))
        })?;
    if auth_header.is_none() {
        info!(
            target = "usericon::startup",
            "auth.user_header is not set; icon uploads will be rejected"
        );
    }

    let upload_limit_bytes = usize::try_from(settings.icons.max_upload_bytes.get())
        .map_err(|_| AppError::validation("icons.max_upload_bytes exceeds usize"))?;

    let http_state = HttpState {
        icons: icons.clone(),
        profiles,
        reactions,
        health: health_repo.clone(),
        auth_header,
        upload_limit_bytes,
    };
    let admin_state = AdminState {
        icons,
        health: health_repo,
    };

    Ok(ApplicationContext {
        http_state,
        admin_state,
    })
}

async fn serve_http(
    settings: &config::Settings,
    http_state: HttpState,
    admin_state: AdminState,
) -> Result<(), AppError> {
    let public_router = http::build_router(http_state);
    let admin_router = http::build_admin_router(admin_state);

    let public_listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let admin_listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "usericon::startup",
        public_addr = %settings.server.public_addr,
        admin_addr = %settings.server.admin_addr,
        "listening"
    );

    let public_server = axum::serve(public_listener, public_router.into_make_service());
    let admin_server = axum::serve(admin_listener, admin_router.into_make_service());

    try_join!(public_server, admin_server)
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}
