use std::collections::HashMap;

use actix_web::{web, HttpResponse};

use super::AppState;
use crate::auth::Auth;
use crate::error::{ApiError, OrNotFound};
use crate::models::*;

const ANONIMO: &str = "Anónimo";

fn autor(c: &Comentario, nombres: &HashMap<Id, String>) -> String {
    c.usuario_id
        .and_then(|u| nombres.get(&u).cloned())
        .or_else(|| c.nombre_anonimo.clone().filter(|n| !n.trim().is_empty()))
        .unwrap_or_else(|| ANONIMO.to_string())
}

fn vista(c: &Comentario, nombres: &HashMap<Id, String>, respuestas: Vec<ComentarioVista>) -> ComentarioVista {
    ComentarioVista {
        id: c.id,
        auto_id: c.auto_id,
        usuario_id: c.usuario_id,
        autor: autor(c, nombres),
        contenido: c.contenido.clone(),
        calificacion: c.calificacion,
        parent_id: c.parent_id,
        fecha: c.fecha,
        respuestas,
    }
}

/// Root comments in store order, each with its direct replies resolved one
/// level deep. Deeper replies are reachable through `GET /api/comentarios/{id}`.
pub fn build_hilos(comentarios: &[Comentario], nombres: &HashMap<Id, String>) -> Vec<ComentarioVista> {
    let mut hijos: HashMap<Id, Vec<&Comentario>> = HashMap::new();
    for c in comentarios {
        if let Some(p) = c.parent_id {
            hijos.entry(p).or_default().push(c);
        }
    }
    comentarios
        .iter()
        .filter(|c| c.parent_id.is_none())
        .map(|raiz| {
            let respuestas = hijos
                .get(&raiz.id)
                .map(|rs| rs.iter().map(|r| vista(r, nombres, Vec::new())).collect())
                .unwrap_or_default();
            vista(raiz, nombres, respuestas)
        })
        .collect()
}

#[utoipa::path(
    get,
    path = "/api/comentarios/auto/{auto_id}",
    params(("auto_id" = Id, Path, description = "Listing id")),
    responses((status = 200, description = "Root comments with their replies", body = [ComentarioVista]))
)]
pub async fn list_comentarios(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let comentarios = data.repo.list_comentarios(path.into_inner()).await?;
    let mut ids: Vec<Id> = comentarios.iter().filter_map(|c| c.usuario_id).collect();
    ids.sort_unstable();
    ids.dedup();
    let nombres: HashMap<Id, String> = if ids.is_empty() {
        HashMap::new()
    } else {
        data.repo.usuarios_by_ids(&ids).await?.into_iter().map(|u| (u.id, u.nombre)).collect()
    };
    Ok(HttpResponse::Ok().json(build_hilos(&comentarios, &nombres)))
}

#[utoipa::path(
    post,
    path = "/api/comentarios",
    request_body = NewComentario,
    responses(
        (status = 201, description = "Comment created", body = Comentario),
        (status = 400, description = "Invalid comment or parent", body = ApiErrorBody)
    )
)]
pub async fn create_comentario(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    payload: web::Json<NewComentario>,
) -> Result<HttpResponse, ApiError> {
    let mut new = payload.into_inner();
    if new.usuario_id.is_none() {
        new.usuario_id = auth.as_ref().and_then(Auth::user_id);
    }
    new.validate().map_err(ApiError::Validation)?;
    let comentario = data.repo.create_comentario(new).await?;
    Ok(HttpResponse::Created().json(comentario))
}

#[utoipa::path(
    get,
    path = "/api/comentarios/{id}",
    params(("id" = Id, Path, description = "Comment id")),
    responses(
        (status = 200, description = "Comment", body = Comentario),
        (status = 404, description = "Comment not found", body = ApiErrorBody)
    )
)]
pub async fn get_comentario(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let comentario = data.repo.get_comentario(path.into_inner()).await.or_not_found("Comentario")?;
    Ok(HttpResponse::Ok().json(comentario))
}

#[utoipa::path(
    put,
    path = "/api/comentarios/{id}",
    request_body = UpdateComentario,
    params(("id" = Id, Path, description = "Comment id")),
    responses(
        (status = 200, description = "Comment updated", body = Comentario),
        (status = 400, description = "Invalid content or rating", body = ApiErrorBody),
        (status = 404, description = "Comment not found", body = ApiErrorBody)
    )
)]
pub async fn update_comentario(
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdateComentario>,
) -> Result<HttpResponse, ApiError> {
    let upd = payload.into_inner();
    upd.validate().map_err(ApiError::Validation)?;
    let comentario = data.repo.update_comentario(path.into_inner(), upd).await.or_not_found("Comentario")?;
    Ok(HttpResponse::Ok().json(comentario))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(id: Id, parent_id: Option<Id>, usuario_id: Option<Id>, anon: Option<&str>) -> Comentario {
        Comentario {
            id,
            auto_id: 1,
            usuario_id,
            nombre_anonimo: anon.map(str::to_string),
            contenido: format!("comentario {id}"),
            calificacion: None,
            parent_id,
            respuestas: Vec::new(),
            fecha: chrono::Utc::now(),
        }
    }

    #[test]
    fn replies_nest_under_their_root_in_order() {
        let all = vec![
            c(1, None, Some(10), None),
            c(2, Some(1), None, Some("Luis")),
            c(3, None, None, None),
            c(4, Some(1), Some(99), None),
            c(5, Some(2), None, Some("Ana")),
        ];
        let nombres = HashMap::from([(10, "Carla".to_string())]);
        let hilos = build_hilos(&all, &nombres);

        assert_eq!(hilos.iter().map(|h| h.id).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(hilos[0].autor, "Carla");
        assert_eq!(hilos[0].respuestas.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2, 4]);
        assert_eq!(hilos[0].respuestas[0].autor, "Luis");
        // account id with no known account and no alias
        assert_eq!(hilos[0].respuestas[1].autor, ANONIMO);
        assert!(hilos[0].respuestas[0].respuestas.is_empty());
        assert_eq!(hilos[1].autor, ANONIMO);
    }
}
