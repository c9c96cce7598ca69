use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::error::ApiErrorBody;
use crate::models::{
    Auto, CategoriaInfo, Categoria, Cita, Comentario, ComentarioVista, LoginRequest, LoginResponse, MessageResponse,
    NewAuto, NewCita, NewComentario, RegisterRequest, RegisterResponse, UpdateAuto, UpdateComentario, UpdateUsuario,
    Usuario, Venta,
};
use crate::payments::CheckoutSession;
use crate::routes::pagos::{CheckoutBody, CheckoutCreated, RecordVentaBody, WebhookAck};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::autos::list_categorias,
        crate::routes::autos::list_autos,
        crate::routes::autos::create_auto,
        crate::routes::autos::get_auto,
        crate::routes::autos::replace_auto,
        crate::routes::autos::update_auto,
        crate::routes::autos::delete_auto,
        crate::routes::usuarios::register,
        crate::routes::usuarios::login,
        crate::routes::usuarios::me,
        crate::routes::usuarios::list_usuarios,
        crate::routes::usuarios::get_usuario,
        crate::routes::usuarios::update_usuario,
        crate::routes::usuarios::delete_usuario,
        crate::routes::usuarios::delete_imagen,
        crate::routes::usuarios::get_imagen,
        crate::routes::comentarios::list_comentarios,
        crate::routes::comentarios::create_comentario,
        crate::routes::comentarios::get_comentario,
        crate::routes::comentarios::update_comentario,
        crate::routes::citas::create_cita,
        crate::routes::citas::list_citas,
        crate::routes::pagos::create_checkout_session,
        crate::routes::pagos::get_checkout_session,
        crate::routes::pagos::list_ventas,
        crate::routes::pagos::record_venta,
        crate::routes::pagos::stripe_webhook,
    ),
    components(schemas(
        ApiErrorBody, MessageResponse,
        Auto, NewAuto, UpdateAuto, Categoria, CategoriaInfo,
        Usuario, RegisterRequest, RegisterResponse, LoginRequest, LoginResponse, UpdateUsuario,
        Comentario, NewComentario, UpdateComentario, ComentarioVista,
        Cita, NewCita, Venta,
        CheckoutSession, CheckoutBody, CheckoutCreated, RecordVentaBody, WebhookAck
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "autos", description = "Listing catalog"),
        (name = "usuarios", description = "Accounts and profiles"),
        (name = "comentarios", description = "Threaded listing comments"),
        (name = "pagos", description = "Checkout, sales and processor webhooks"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).bearer_format("JWT").build()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in ["/api/autos/{id}", "/api/comentarios/auto/{auto_id}", "/api/stripe/webhook", "/imagenes/{key}"] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
