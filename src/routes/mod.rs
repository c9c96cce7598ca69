use std::sync::Arc;

use actix_web::{web, HttpRequest};

use crate::error::ApiError;
use crate::payments::PaymentGateway;
use crate::rate_limit::RateLimiterFacade;
use crate::repo::Repo;
use crate::storage::ImageStore;

pub mod autos;
pub mod citas;
pub mod comentarios;
pub mod pagos;
pub mod usuarios;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config()).app_data(query_config());
    cfg.service(
        web::scope("/api")
            .service(web::resource("/categorias").route(web::get().to(autos::list_categorias)))
            .service(
                web::resource("/autos")
                    .route(web::get().to(autos::list_autos))
                    .route(web::post().to(autos::create_auto)),
            )
            .service(
                web::resource("/autos/{id}")
                    .route(web::get().to(autos::get_auto))
                    .route(web::put().to(autos::replace_auto))
                    .route(web::patch().to(autos::update_auto))
                    .route(web::delete().to(autos::delete_auto)),
            )
            .service(web::resource("/register").route(web::post().to(usuarios::register)))
            .service(web::resource("/login").route(web::post().to(usuarios::login)))
            .service(web::resource("/me").route(web::get().to(usuarios::me)))
            .service(web::resource("/users").route(web::get().to(usuarios::list_usuarios)))
            .service(
                web::resource("/users/{id}")
                    .route(web::get().to(usuarios::get_usuario))
                    .route(web::put().to(usuarios::update_usuario))
                    .route(web::delete().to(usuarios::delete_usuario)),
            )
            .service(web::resource("/users/{id}/imagen").route(web::delete().to(usuarios::delete_imagen)))
            .service(web::resource("/comentarios").route(web::post().to(comentarios::create_comentario)))
            .service(
                web::resource("/comentarios/auto/{auto_id}").route(web::get().to(comentarios::list_comentarios)),
            )
            .service(
                web::resource("/comentarios/{id}")
                    .route(web::get().to(comentarios::get_comentario))
                    .route(web::put().to(comentarios::update_comentario)),
            )
            .service(
                web::resource("/citas")
                    .route(web::get().to(citas::list_citas))
                    .route(web::post().to(citas::create_cita)),
            )
            .service(web::resource("/pago").route(web::post().to(pagos::create_checkout_session)))
            .service(web::resource("/create-checkout-session").route(web::post().to(pagos::create_checkout_session)))
            .service(web::resource("/checkout-session").route(web::get().to(pagos::get_checkout_session)))
            .service(
                web::resource("/ventas")
                    .route(web::get().to(pagos::list_ventas))
                    .route(web::post().to(pagos::record_venta)),
            )
            .service(web::resource("/stripe/webhook").route(web::post().to(pagos::stripe_webhook))),
    );
    // Outside /api so <img src="/imagenes/{key}"> works directly.
    cfg.route("/imagenes/{key}", web::get().to(usuarios::get_imagen));
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub image_store: Arc<dyn ImageStore>,
    pub payments: Arc<dyn PaymentGateway>,
    pub rate_limiter: Option<RateLimiterFacade>,
    /// Lower-cased emails that register with the admin role.
    pub admin_emails: Arc<Vec<String>>,
    /// Honour `Forwarded`/`X-Forwarded-For` when keying the rate limiter.
    pub trust_proxy: bool,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repo>, image_store: Arc<dyn ImageStore>, payments: Arc<dyn PaymentGateway>) -> Self {
        Self { repo, image_store, payments, rate_limiter: None, admin_emails: Arc::new(Vec::new()), trust_proxy: false }
    }

    pub fn with_rate_limiter(mut self, rl: RateLimiterFacade) -> Self {
        self.rate_limiter = Some(rl);
        self
    }

    pub fn with_admin_emails(mut self, emails: Vec<String>) -> Self {
        self.admin_emails = Arc::new(emails);
        self
    }

    pub fn with_trusted_proxy(mut self, trust: bool) -> Self {
        self.trust_proxy = trust;
        self
    }
}

/// Malformed or mistyped JSON (including an unknown `categoria`) is a 400 in
/// the `{error, detalles}` shape rather than actix's plain-text default.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(256 * 1024)
        .error_handler(|err, _req| ApiError::Validation(err.to_string()).into())
}

fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, _req| ApiError::Validation(err.to_string()).into())
}

/// Rate-limit key. Forwarded headers are client-controlled, so they are only
/// read when a reverse proxy in front of us is known to overwrite them.
pub(crate) fn client_ip(req: &HttpRequest, trust_proxy: bool) -> String {
    if trust_proxy {
        if let Some(ip) = req.connection_info().realip_remote_addr() {
            return ip.to_string();
        }
    }
    req.peer_addr().map(|a| a.ip().to_string()).unwrap_or_else(|| "unknown".into())
}
