use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::TryStreamExt as _;

use super::{client_ip, AppState};
use crate::auth::{create_jwt, Auth, Role};
use crate::error::{ApiError, OrNotFound};
use crate::models::*;
use crate::password::{hash_password, verify_password};
use crate::repo::{normalize_email, RepoError};
use crate::storage::{is_valid_key, new_key, sniff_mime, ImageStoreError};

pub const IMAGE_SIZE_LIMIT: usize = 5 * 1024 * 1024;
const ALLOWED_IMAGE_MIME: &[&str] = &["image/png", "image/jpeg", "image/webp", "image/gif"];
const PROFILE_JSON_LIMIT: usize = 64 * 1024;
// One message for both cases so login does not reveal which emails exist.
const BAD_CREDENTIALS: &str = "Credenciales inválidas";

#[utoipa::path(
    post,
    path = "/api/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = RegisterResponse),
        (status = 400, description = "Missing or invalid fields, or email already registered", body = ApiErrorBody),
        (status = 429, description = "Too many attempts", body = ApiErrorBody)
    )
)]
pub async fn register(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<RegisterRequest>,
) -> Result<HttpResponse, ApiError> {
    if let Some(rl) = &data.rate_limiter {
        if !rl.allow_register(&client_ip(&req, data.trust_proxy)) {
            return Err(ApiError::TooManyRequests);
        }
    }
    let body = payload.into_inner();
    body.validate().map_err(ApiError::Validation)?;

    let email = normalize_email(&body.email);
    let rol = if data.admin_emails.iter().any(|e| *e == email) { Role::Admin } else { Role::User };
    let password = body.password;
    let password_hash = web::block(move || hash_password(&password))
        .await
        .map_err(|e| {
            tracing::error!("hashing task failed: {e}");
            ApiError::Internal
        })?
        .map_err(|e| {
            tracing::error!("password hashing failed: {e}");
            ApiError::Internal
        })?;

    let new = NewUsuario { email, nombre: body.nombre.trim().to_string(), rol, password_hash };
    let usuario = match data.repo.create_usuario(new).await {
        Ok(u) => u,
        Err(RepoError::Conflict) => return Err(ApiError::validation("El usuario ya existe")),
        Err(e) => return Err(e.into()),
    };
    tracing::info!(user_id = usuario.id, rol = %usuario.rol, "account registered");
    Ok(HttpResponse::Created().json(RegisterResponse { message: "Usuario registrado exitosamente".into(), id: usuario.id }))
}

#[utoipa::path(
    post,
    path = "/api/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated", body = LoginResponse),
        (status = 401, description = "Bad credentials", body = ApiErrorBody),
        (status = 429, description = "Too many attempts", body = ApiErrorBody)
    )
)]
pub async fn login(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    if let Some(rl) = &data.rate_limiter {
        if !rl.allow_login(&client_ip(&req, data.trust_proxy)) {
            return Err(ApiError::TooManyRequests);
        }
    }
    let body = payload.into_inner();
    if body.email.trim().is_empty() || body.password.is_empty() {
        return Err(ApiError::validation("email y password son requeridos"));
    }

    let cred = match data.repo.find_credentials(&normalize_email(&body.email)).await {
        Ok(c) => c,
        Err(RepoError::NotFound) => return Err(ApiError::Unauthorized(BAD_CREDENTIALS.into())),
        Err(e) => return Err(e.into()),
    };
    let password = body.password;
    let hash = cred.password_hash;
    let ok = web::block(move || verify_password(&password, &hash))
        .await
        .map_err(|e| {
            tracing::error!("verify task failed: {e}");
            ApiError::Internal
        })?
        .map_err(|e| {
            tracing::error!("stored hash unreadable: {e}");
            ApiError::Internal
        })?;
    if !ok {
        return Err(ApiError::Unauthorized(BAD_CREDENTIALS.into()));
    }

    let u = cred.usuario;
    let token = create_jwt(u.id, vec![u.rol]).map_err(|e| {
        tracing::error!("token issue failed: {e}");
        ApiError::Internal
    })?;
    Ok(HttpResponse::Ok().json(LoginResponse::new(u, token)))
}

#[utoipa::path(
    get,
    path = "/api/me",
    responses(
        (status = 200, description = "Account of the bearer token", body = Usuario),
        (status = 401, description = "Missing or invalid token", body = ApiErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn me(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let id = auth.user_id().ok_or_else(|| ApiError::Unauthorized("Token inválido".into()))?;
    let usuario = data.repo.get_usuario(id).await.or_not_found("Usuario")?;
    Ok(HttpResponse::Ok().json(usuario))
}

#[utoipa::path(
    get,
    path = "/api/users",
    responses((status = 200, description = "List accounts", body = [Usuario]))
)]
pub async fn list_usuarios(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let usuarios = data.repo.list_usuarios().await?;
    Ok(HttpResponse::Ok().json(usuarios))
}

#[utoipa::path(
    get,
    path = "/api/users/{id}",
    params(("id" = Id, Path, description = "Account id")),
    responses(
        (status = 200, description = "Account", body = Usuario),
        (status = 404, description = "Account not found", body = ApiErrorBody)
    )
)]
pub async fn get_usuario(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let usuario = data.repo.get_usuario(path.into_inner()).await.or_not_found("Usuario")?;
    Ok(HttpResponse::Ok().json(usuario))
}

/// Profile fields plus an optional new image, from either body format.
#[derive(Debug, Default)]
struct PerfilUpload {
    campos: UpdateUsuario,
    imagen: Option<Vec<u8>>,
}

async fn read_perfil(req: &HttpRequest, payload: web::Payload) -> Result<PerfilUpload, ApiError> {
    let is_multipart = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("multipart/form-data"))
        .unwrap_or(false);
    if is_multipart {
        read_multipart(Multipart::new(req.headers(), payload)).await
    } else {
        read_json(payload).await
    }
}

async fn read_json(mut payload: web::Payload) -> Result<PerfilUpload, ApiError> {
    let mut body = web::BytesMut::new();
    while let Some(chunk) = payload.try_next().await.map_err(|e| ApiError::Validation(e.to_string()))? {
        if body.len() + chunk.len() > PROFILE_JSON_LIMIT {
            return Err(ApiError::validation("cuerpo demasiado grande"));
        }
        body.extend_from_slice(&chunk);
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(PerfilUpload::default());
    }
    let campos: UpdateUsuario = serde_json::from_slice(&body).map_err(|e| ApiError::Validation(e.to_string()))?;
    Ok(PerfilUpload { campos, imagen: None })
}

async fn read_multipart(mut payload: Multipart) -> Result<PerfilUpload, ApiError> {
    let mut out = PerfilUpload::default();
    while let Some(mut field) = payload.try_next().await.map_err(|e| ApiError::Validation(e.to_string()))? {
        let Some(name) = field.content_disposition().get_name().map(str::to_string) else { continue };
        let limit = if name == "imagen" { IMAGE_SIZE_LIMIT } else { PROFILE_JSON_LIMIT };
        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(|e| ApiError::Validation(e.to_string()))? {
            if bytes.len() + chunk.len() > limit {
                return Err(ApiError::Validation(format!("{name} supera el tamaño máximo")));
            }
            bytes.extend_from_slice(&chunk);
        }
        if name == "imagen" {
            if !bytes.is_empty() {
                out.imagen = Some(bytes);
            }
            continue;
        }
        let slot = match name.as_str() {
            "nombre" | "name" => &mut out.campos.nombre,
            "telefono" => &mut out.campos.telefono,
            "direccion" => &mut out.campos.direccion,
            _ => continue,
        };
        let text = String::from_utf8(bytes).map_err(|_| ApiError::Validation(format!("{name} no es texto válido")))?;
        *slot = Some(text);
    }
    Ok(out)
}

fn check_image(bytes: &[u8]) -> Result<String, ApiError> {
    let mime = sniff_mime(bytes);
    if ALLOWED_IMAGE_MIME.contains(&mime.as_str()) {
        Ok(mime)
    } else {
        Err(ApiError::Validation(format!("formato de imagen no soportado: {mime}")))
    }
}

async fn discard_image(data: &AppState, key: &str) {
    match data.image_store.delete(key).await {
        Ok(()) | Err(ImageStoreError::NotFound) => {}
        Err(e) => tracing::warn!(key, "could not delete stored image: {e}"),
    }
}

#[utoipa::path(
    put,
    path = "/api/users/{id}",
    params(("id" = Id, Path, description = "Account id")),
    request_body(
        content = UpdateUsuario,
        description = "JSON fields, or multipart/form-data with the same fields plus an `imagen` file"
    ),
    responses(
        (status = 200, description = "Profile updated", body = Usuario),
        (status = 400, description = "Invalid field or image", body = ApiErrorBody),
        (status = 401, description = "Missing or invalid token", body = ApiErrorBody),
        (status = 403, description = "Not this account", body = ApiErrorBody),
        (status = 404, description = "Account not found", body = ApiErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn update_usuario(
    auth: Auth,
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Payload,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    auth.ensure_can_act_for(id)?;
    let perfil = read_perfil(&req, payload).await?;
    perfil.campos.validate().map_err(ApiError::Validation)?;
    let actual = data.repo.get_usuario(id).await.or_not_found("Usuario")?;

    let nueva = match perfil.imagen {
        Some(bytes) => {
            let mime = check_image(&bytes)?;
            let key = new_key();
            data.image_store.save(&key, &mime, &bytes).await.map_err(|e| {
                tracing::error!("image upload failed: {e}");
                ApiError::Internal
            })?;
            if let Some(anterior) = &actual.imagen {
                discard_image(&data, anterior).await;
            }
            Some(key)
        }
        None => None,
    };

    let result = data.repo.update_perfil(id, perfil.campos, nueva.clone()).await;
    if result.is_err() {
        if let Some(key) = &nueva {
            discard_image(&data, key).await;
        }
    }
    let usuario = result.or_not_found("Usuario")?;
    Ok(HttpResponse::Ok().json(usuario))
}

#[utoipa::path(
    delete,
    path = "/api/users/{id}/imagen",
    params(("id" = Id, Path, description = "Account id")),
    responses(
        (status = 200, description = "Image removed", body = Usuario),
        (status = 400, description = "Account has no image", body = ApiErrorBody),
        (status = 403, description = "Not this account", body = ApiErrorBody),
        (status = 404, description = "Account not found", body = ApiErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn delete_imagen(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    auth.ensure_can_act_for(id)?;
    let usuario = data.repo.get_usuario(id).await.or_not_found("Usuario")?;
    let Some(key) = usuario.imagen else {
        return Err(ApiError::validation("El usuario no tiene imagen de perfil"));
    };
    discard_image(&data, &key).await;
    let usuario = data.repo.clear_imagen(id).await.or_not_found("Usuario")?;
    Ok(HttpResponse::Ok().json(usuario))
}

#[utoipa::path(
    delete,
    path = "/api/users/{id}",
    params(("id" = Id, Path, description = "Account id")),
    responses(
        (status = 200, description = "Account deleted", body = MessageResponse),
        (status = 403, description = "Not this account", body = ApiErrorBody),
        (status = 404, description = "Account not found", body = ApiErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn delete_usuario(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    auth.ensure_can_act_for(id)?;
    let usuario = data.repo.delete_usuario(id).await.or_not_found("Usuario")?;
    if let Some(key) = &usuario.imagen {
        discard_image(&data, key).await;
    }
    tracing::info!(user_id = id, "account deleted");
    Ok(HttpResponse::Ok().json(MessageResponse::new("Usuario eliminado correctamente")))
}

#[utoipa::path(
    get,
    path = "/imagenes/{key}",
    params(("key" = String, Path, description = "Image key")),
    responses(
        (status = 200, description = "Image bytes"),
        (status = 404, description = "Image not found", body = ApiErrorBody)
    )
)]
pub async fn get_imagen(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let key = path.into_inner();
    if !is_valid_key(&key) {
        return Err(ApiError::not_found("Imagen"));
    }
    match data.image_store.load(&key).await {
        Ok((bytes, mime)) => Ok(HttpResponse::Ok().insert_header((header::CONTENT_TYPE, mime)).body(bytes)),
        Err(ImageStoreError::NotFound) => Err(ApiError::not_found("Imagen")),
        Err(e) => {
            tracing::error!("image load failed: {e}");
            Err(ApiError::Internal)
        }
    }
}
