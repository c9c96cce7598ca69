use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use anyhow::Context;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use grove::config::Config;
use grove::openapi::ApiDoc;
use grove::payments::{PaymentGateway, StripeGateway};
use grove::rate_limit::{InMemoryRateLimiter, RateLimiterFacade};
use grove::repo::inmem::InMemRepo;
use grove::repo::pg::PgRepo;
use grove::repo::Repo;
use grove::storage::build_image_store;
use grove::{configure, AppState, SecurityHeaders};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds; production sets the environment externally.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = Config::from_env().context("invalid configuration")?;
    info!("Bootstrapping Grove API");
    info!("Frontend URL: {}", cfg.frontend_url);
    info!("Stripe configured: {}", cfg.stripe.secret_key.is_some());

    let repo: Arc<dyn Repo> = match &cfg.database_url {
        Some(url) => {
            use sqlx::postgres::PgPoolOptions;
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await
                .context("connecting to DATABASE_URL")?;
            let pg = PgRepo::new(pool);
            pg.migrate().await.context("running migrations")?;
            info!("Using Postgres repository backend");
            Arc::new(pg)
        }
        None => {
            let path = cfg.snapshot_path();
            info!("DATABASE_URL not set; using in-memory store with snapshot '{}'", path.display());
            Arc::new(InMemRepo::with_snapshot(path))
        }
    };

    let image_store = build_image_store(cfg.s3.as_ref(), cfg.image_dir()).await?;
    let payments: Arc<dyn PaymentGateway> = Arc::new(StripeGateway::new(cfg.stripe.clone()));
    let rate_limiter = RateLimiterFacade::new(InMemoryRateLimiter::new(true), cfg.rate_limit.clone());
    let state = AppState::new(repo, image_store, payments)
        .with_rate_limiter(rate_limiter)
        .with_admin_emails(cfg.bootstrap_admin_emails.clone())
        .with_trusted_proxy(cfg.trust_proxy);

    let openapi = ApiDoc::openapi();
    info!("OpenAPI spec generated");

    let mut origins = cfg.allowed_origins.clone();
    if !origins.contains(&cfg.frontend_url) {
        origins.push(cfg.frontend_url.clone());
    }
    let enable_hsts = cfg.enable_hsts;

    let server = HttpServer::new(move || {
        let cors = origins
            .iter()
            .fold(Cors::default(), |c, o| c.allowed_origin(o))
            .allow_any_header()
            .allowed_methods(["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(SecurityHeaders::new(enable_hsts))
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(configure)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind(("0.0.0.0", cfg.port))?;

    info!("Listening on http://0.0.0.0:{}", cfg.port);
    server.run().await?;
    Ok(())
}
