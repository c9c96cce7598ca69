use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::AppState;
use crate::error::{ApiError, OrNotFound};
use crate::models::*;
use crate::payments::{CheckoutRequest, CheckoutSession};
use crate::repo::RepoError;

const SIGNATURE_HEADER: &str = "Stripe-Signature";
const PAID_EVENTS: &[&str] = &["checkout.session.completed", "checkout.session.async_payment_succeeded"];

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutBody {
    pub auto_id: Id,
    #[serde(default)]
    pub usuario_id: Option<Id>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckoutCreated {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SessionQuery {
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecordVentaBody {
    #[serde(default, alias = "session_id")]
    pub session_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
}

#[utoipa::path(
    post,
    path = "/api/create-checkout-session",
    request_body = CheckoutBody,
    responses(
        (status = 200, description = "Hosted checkout session created", body = CheckoutCreated),
        (status = 400, description = "Listing has no price", body = ApiErrorBody),
        (status = 404, description = "Listing not found", body = ApiErrorBody),
        (status = 503, description = "Payments not configured", body = ApiErrorBody)
    )
)]
pub async fn create_checkout_session(
    data: web::Data<AppState>,
    payload: web::Json<CheckoutBody>,
) -> Result<HttpResponse, ApiError> {
    let body = payload.into_inner();
    let auto = data.repo.get_auto(body.auto_id).await.or_not_found("Auto")?;
    let req = CheckoutRequest::for_auto(&auto, body.usuario_id)
        .ok_or_else(|| ApiError::validation("El auto no tiene un precio válido"))?;
    let session = data.payments.create_checkout_session(&req).await?;
    tracing::info!(auto_id = auto.id, session_id = %session.id, "checkout session created");
    Ok(HttpResponse::Ok().json(CheckoutCreated { id: session.id, url: session.url }))
}

#[utoipa::path(
    get,
    path = "/api/checkout-session",
    params(SessionQuery),
    responses(
        (status = 200, description = "Checkout session status", body = CheckoutSession),
        (status = 400, description = "session_id missing", body = ApiErrorBody),
        (status = 404, description = "Unknown session", body = ApiErrorBody)
    )
)]
pub async fn get_checkout_session(
    data: web::Data<AppState>,
    query: web::Query<SessionQuery>,
) -> Result<HttpResponse, ApiError> {
    let id = query.into_inner().session_id.filter(|s| !s.trim().is_empty());
    let Some(id) = id else {
        return Err(ApiError::validation("No se proporcionó session_id"));
    };
    let session = data.payments.retrieve_checkout_session(&id).await?;
    Ok(HttpResponse::Ok().json(session))
}

#[utoipa::path(
    get,
    path = "/api/ventas",
    params(VentaFiltro),
    responses((status = 200, description = "Recorded sales, optionally filtered", body = [Venta]))
)]
pub async fn list_ventas(data: web::Data<AppState>, query: web::Query<VentaFiltro>) -> Result<HttpResponse, ApiError> {
    let ventas = data.repo.list_ventas(query.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ventas))
}

/// Insert the sale for a paid session. The second `bool` is false when the
/// session had already been recorded.
async fn record_sale(data: &AppState, session: &CheckoutSession) -> Result<(Venta, bool), ApiError> {
    let new = session.to_new_venta().map_err(ApiError::Validation)?;
    match data.repo.create_venta(new).await {
        Ok(v) => {
            tracing::info!(venta_id = v.id, session_id = %v.session_id, monto = v.monto, "sale recorded");
            Ok((v, true))
        }
        Err(RepoError::Conflict) => {
            let existing = data.repo.get_venta_by_session(&session.id).await?;
            Ok((existing, false))
        }
        Err(e) => Err(e.into()),
    }
}

#[utoipa::path(
    post,
    path = "/api/ventas",
    request_body = RecordVentaBody,
    responses(
        (status = 201, description = "Sale recorded", body = Venta),
        (status = 200, description = "Sale already recorded for this session", body = Venta),
        (status = 400, description = "Session not paid", body = ApiErrorBody),
        (status = 404, description = "Unknown session", body = ApiErrorBody)
    )
)]
pub async fn record_venta(
    data: web::Data<AppState>,
    payload: web::Json<RecordVentaBody>,
) -> Result<HttpResponse, ApiError> {
    let session_id = payload.into_inner().session_id;
    if session_id.trim().is_empty() {
        return Err(ApiError::validation("sessionId es requerido"));
    }
    // Amount and ids come from the processor, never from the client.
    let session = data.payments.retrieve_checkout_session(session_id.trim()).await?;
    let (venta, created) = record_sale(&data, &session).await?;
    if created {
        Ok(HttpResponse::Created().json(venta))
    } else {
        Ok(HttpResponse::Ok().json(venta))
    }
}

#[utoipa::path(
    post,
    path = "/api/stripe/webhook",
    request_body(content = String, description = "Raw processor event, signed in the Stripe-Signature header"),
    responses(
        (status = 200, description = "Event accepted", body = WebhookAck),
        (status = 400, description = "Missing or invalid signature", body = ApiErrorBody),
        (status = 503, description = "Webhook secret not configured", body = ApiErrorBody)
    )
)]
pub async fn stripe_webhook(
    req: HttpRequest,
    data: web::Data<AppState>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let signature = req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::validation("falta la cabecera Stripe-Signature"))?;
    let event = data.payments.verify_webhook(&body, signature).map_err(|e| {
        tracing::warn!("webhook rejected: {e}");
        ApiError::from(e)
    })?;

    match (&event.session, PAID_EVENTS.contains(&event.event_type.as_str())) {
        (Some(session), true) if session.is_paid() => {
            record_sale(&data, session).await?;
        }
        _ => tracing::debug!(event_type = %event.event_type, "webhook event ignored"),
    }
    Ok(HttpResponse::Ok().json(WebhookAck { received: true }))
}
