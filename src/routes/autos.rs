use actix_web::{web, HttpResponse};

use super::AppState;
use crate::error::{ApiError, OrNotFound};
use crate::models::*;

#[utoipa::path(
    get,
    path = "/api/categorias",
    responses((status = 200, description = "Listing categories", body = [CategoriaInfo]))
)]
pub async fn list_categorias() -> HttpResponse {
    let cats: Vec<CategoriaInfo> = Categoria::ALL.into_iter().map(CategoriaInfo::from).collect();
    HttpResponse::Ok().json(cats)
}

#[utoipa::path(
    get,
    path = "/api/autos",
    responses((status = 200, description = "List listings", body = [Auto]))
)]
pub async fn list_autos(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let autos = data.repo.list_autos().await?;
    Ok(HttpResponse::Ok().json(autos))
}

#[utoipa::path(
    post,
    path = "/api/autos",
    request_body = NewAuto,
    responses(
        (status = 201, description = "Listing created", body = Auto),
        (status = 400, description = "Invalid listing", body = ApiErrorBody)
    )
)]
pub async fn create_auto(data: web::Data<AppState>, payload: web::Json<NewAuto>) -> Result<HttpResponse, ApiError> {
    let new = payload.into_inner();
    new.validate().map_err(ApiError::Validation)?;
    let auto = data.repo.create_auto(new).await?;
    tracing::info!(auto_id = auto.id, "listing created");
    Ok(HttpResponse::Created().json(auto))
}

#[utoipa::path(
    get,
    path = "/api/autos/{id}",
    params(("id" = Id, Path, description = "Listing id")),
    responses(
        (status = 200, description = "Listing", body = Auto),
        (status = 404, description = "Listing not found", body = ApiErrorBody)
    )
)]
pub async fn get_auto(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let auto = data.repo.get_auto(path.into_inner()).await.or_not_found("Auto")?;
    Ok(HttpResponse::Ok().json(auto))
}

#[utoipa::path(
    put,
    path = "/api/autos/{id}",
    request_body = NewAuto,
    params(("id" = Id, Path, description = "Listing id")),
    responses(
        (status = 200, description = "Listing replaced", body = Auto),
        (status = 400, description = "Invalid listing", body = ApiErrorBody),
        (status = 404, description = "Listing not found", body = ApiErrorBody)
    )
)]
pub async fn replace_auto(
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<NewAuto>,
) -> Result<HttpResponse, ApiError> {
    let new = payload.into_inner();
    new.validate().map_err(ApiError::Validation)?;
    let auto = data.repo.replace_auto(path.into_inner(), new).await.or_not_found("Auto")?;
    Ok(HttpResponse::Ok().json(auto))
}

#[utoipa::path(
    patch,
    path = "/api/autos/{id}",
    request_body = UpdateAuto,
    params(("id" = Id, Path, description = "Listing id")),
    responses(
        (status = 200, description = "Listing updated", body = Auto),
        (status = 400, description = "Invalid field", body = ApiErrorBody),
        (status = 404, description = "Listing not found", body = ApiErrorBody)
    )
)]
pub async fn update_auto(
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdateAuto>,
) -> Result<HttpResponse, ApiError> {
    let upd = payload.into_inner();
    upd.validate().map_err(ApiError::Validation)?;
    let auto = data.repo.update_auto(path.into_inner(), upd).await.or_not_found("Auto")?;
    Ok(HttpResponse::Ok().json(auto))
}

#[utoipa::path(
    delete,
    path = "/api/autos/{id}",
    params(("id" = Id, Path, description = "Listing id")),
    responses(
        (status = 200, description = "Listing deleted", body = MessageResponse),
        (status = 404, description = "Listing not found", body = ApiErrorBody)
    )
)]
pub async fn delete_auto(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    data.repo.delete_auto(id).await.or_not_found("Auto")?;
    tracing::info!(auto_id = id, "listing deleted");
    Ok(HttpResponse::Ok().json(MessageResponse::new("Auto eliminado correctamente")))
}
