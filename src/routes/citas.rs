use actix_web::{web, HttpResponse};

use super::AppState;
use crate::error::ApiError;
use crate::models::*;

#[utoipa::path(
    post,
    path = "/api/citas",
    request_body = NewCita,
    responses(
        (status = 201, description = "Appointment booked", body = Cita),
        (status = 400, description = "Missing or invalid fields", body = ApiErrorBody)
    )
)]
pub async fn create_cita(data: web::Data<AppState>, payload: web::Json<NewCita>) -> Result<HttpResponse, ApiError> {
    let new = payload.into_inner();
    new.validate().map_err(ApiError::Validation)?;
    let cita = data.repo.create_cita(new).await?;
    tracing::info!(cita_id = cita.id, auto_id = cita.auto_id, "appointment booked");
    Ok(HttpResponse::Created().json(cita))
}

#[utoipa::path(
    get,
    path = "/api/citas",
    params(CitaFiltro),
    responses((status = 200, description = "Appointments, optionally filtered", body = [Cita]))
)]
pub async fn list_citas(data: web::Data<AppState>, query: web::Query<CitaFiltro>) -> Result<HttpResponse, ApiError> {
    let citas = data.repo.list_citas(query.into_inner()).await?;
    Ok(HttpResponse::Ok().json(citas))
}
