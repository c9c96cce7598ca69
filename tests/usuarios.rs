mod common;

use std::time::Duration;

use actix_web::{test, web, App};
use grove::auth::Role;
use grove::configure;
use grove::models::NewUsuario;
use grove::password::hash_password;
use grove::rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
use grove::repo::UsuarioRepo;
use serde_json::json;
use serial_test::serial;

use common::*;

fn registro(email: &str) -> serde_json::Value {
    json!({"email": email, "password": "clave-segura-1", "nombre": "Ana López"})
}

#[actix_web::test]
#[serial]
async fn register_then_login() {
    let h = harness();
    let app = test::init_service(App::new().app_data(web::Data::new(h.state.clone())).configure(configure)).await;

    let req = test::TestRequest::post().uri("/api/register").set_json(registro("Ana@Grove.mx")).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let body = json(resp).await;
    let id = body["id"].as_i64().unwrap();
    assert!(body["message"].is_string());

    // same email, different case: rejected as a bad request
    let req = test::TestRequest::post().uri("/api/register").set_json(registro("ana@grove.mx")).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    assert_eq!(json(resp).await["error"], "El usuario ya existe");

    // good login
    let req = test::TestRequest::post()
        .uri("/api/login")
        .set_json(json!({"email": "ana@grove.mx", "password": "clave-segura-1"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let login = json(resp).await;
    assert_eq!(login["id"], id);
    assert_eq!(login["nombre"], "Ana López");
    assert_eq!(login["name"], "Ana López");
    assert_eq!(login["rol"], "user");
    let token = login["token"].as_str().unwrap().to_string();

    // the token identifies the account
    let req = test::TestRequest::get().uri("/api/me").insert_header(bearer(&token)).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(json(resp).await["email"], "ana@grove.mx");

    // wrong password and unknown email look the same
    let req = test::TestRequest::post()
        .uri("/api/login")
        .set_json(json!({"email": "ana@grove.mx", "password": "otra-clave"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
    let wrong_password = json(resp).await;
    let req = test::TestRequest::post()
        .uri("/api/login")
        .set_json(json!({"email": "nadie@grove.mx", "password": "otra-clave"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
    assert_eq!(json(resp).await, wrong_password);
}

#[actix_web::test]
#[serial]
async fn register_validation() {
    let h = harness();
    let app = test::init_service(App::new().app_data(web::Data::new(h.state.clone())).configure(configure)).await;

    for body in [
        json!({"email": "a@grove.mx", "password": "clave-segura-1"}),
        json!({"email": "", "password": "clave-segura-1", "nombre": "A"}),
        json!({"email": "a@grove.mx", "password": "corta", "nombre": "A"}),
        json!({"email": "sin-arroba", "password": "clave-segura-1", "nombre": "A"}),
    ] {
        let resp = test::call_service(&app, test::TestRequest::post().uri("/api/register").set_json(body).to_request()).await;
        assert_eq!(resp.status(), 400);
    }

    // legacy `name` key is accepted
    let req = test::TestRequest::post()
        .uri("/api/register")
        .set_json(json!({"email": "legacy@grove.mx", "password": "clave-segura-1", "name": "Legado"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);
}

#[actix_web::test]
#[serial]
async fn bootstrap_admin_registers_as_admin() {
    let h = harness();
    let state = h.state.clone().with_admin_emails(vec!["jefe@grove.mx".into()]);
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

    let req = test::TestRequest::post().uri("/api/register").set_json(registro(" JEFE@grove.mx ")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);
    let req = test::TestRequest::post()
        .uri("/api/login")
        .set_json(json!({"email": "jefe@grove.mx", "password": "clave-segura-1"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(json(resp).await["rol"], "admin");
}

#[actix_web::test]
#[serial]
async fn account_listing_never_contains_credentials() {
    let h = harness();
    let app = test::init_service(App::new().app_data(web::Data::new(h.state.clone())).configure(configure)).await;
    for email in ["uno@grove.mx", "dos@grove.mx"] {
        let req = test::TestRequest::post().uri("/api/register").set_json(registro(email)).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 201);
    }

    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/users").to_request()).await;
    assert_eq!(resp.status(), 200);
    let body = test::read_body(resp).await;
    let text = std::str::from_utf8(&body).unwrap();
    assert!(!text.to_lowercase().contains("password"));
    assert!(!text.contains("$argon2"));
    let usuarios: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(usuarios.as_array().unwrap().len(), 2);

    let id = usuarios[0]["id"].as_i64().unwrap();
    let resp = test::call_service(&app, test::TestRequest::get().uri(&format!("/api/users/{id}")).to_request()).await;
    assert_eq!(resp.status(), 200);
    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/users/424242").to_request()).await;
    assert_eq!(resp.status(), 404);
}

async fn registrar(h: &Harness, email: &str) -> i64 {
    let password_hash = hash_password("clave-segura-1").unwrap();
    let nuevo = NewUsuario { email: email.into(), nombre: "Ana López".into(), rol: Role::User, password_hash };
    h.repo.create_usuario(nuevo).await.unwrap().id
}

#[actix_web::test]
#[serial]
async fn profile_update_requires_owner_or_admin() {
    let h = harness();
    let app = test::init_service(App::new().app_data(web::Data::new(h.state.clone())).configure(configure)).await;
    let id = registrar(&h, "perfil@grove.mx").await;
    let otro = registrar(&h, "otro@grove.mx").await;
    let cambios = json!({"nombre": "Nuevo Nombre", "telefono": "555-0199"});

    let req = test::TestRequest::put().uri(&format!("/api/users/{id}")).set_json(&cambios).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::put()
        .uri(&format!("/api/users/{id}"))
        .insert_header(bearer(&token(otro, Role::User)))
        .set_json(&cambios)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::put()
        .uri(&format!("/api/users/{id}"))
        .insert_header(bearer(&token(id, Role::User)))
        .set_json(&cambios)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let u = json(resp).await;
    assert_eq!(u["nombre"], "Nuevo Nombre");
    assert_eq!(u["telefono"], "555-0199");
    assert!(u["direccion"].is_null());

    // admins may edit anyone
    let req = test::TestRequest::put()
        .uri(&format!("/api/users/{id}"))
        .insert_header(bearer(&token(otro, Role::Admin)))
        .set_json(json!({"direccion": "Av. Reforma 1"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let u = json(resp).await;
    assert_eq!(u["direccion"], "Av. Reforma 1");
    assert_eq!(u["nombre"], "Nuevo Nombre");

    // blank name is refused
    let req = test::TestRequest::put()
        .uri(&format!("/api/users/{id}"))
        .insert_header(bearer(&token(id, Role::User)))
        .set_json(json!({"nombre": " "}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
}

#[actix_web::test]
#[serial]
async fn profile_image_upload_replace_and_delete() {
    let h = harness();
    let app = test::init_service(App::new().app_data(web::Data::new(h.state.clone())).configure(configure)).await;
    let id = registrar(&h, "foto@grove.mx").await;
    let tok = token(id, Role::User);

    // first image
    let (ct, body) = multipart(&[("nombre", "Con Foto")], Some(&sample_png()));
    let req = test::TestRequest::put()
        .uri(&format!("/api/users/{id}"))
        .insert_header(bearer(&tok))
        .insert_header(("Content-Type", ct))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let u = json(resp).await;
    assert_eq!(u["nombre"], "Con Foto");
    let primera = u["imagen"].as_str().unwrap().to_string();
    assert_eq!(h.images.keys(), vec![primera.clone()]);

    // served with its sniffed type
    let resp = test::call_service(&app, test::TestRequest::get().uri(&format!("/imagenes/{primera}")).to_request()).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("content-type").unwrap(), "image/png");
    assert_eq!(test::read_body(resp).await.to_vec(), sample_png());

    // second image replaces the first in storage
    let (ct, body) = multipart(&[], Some(&sample_png()));
    let req = test::TestRequest::put()
        .uri(&format!("/api/users/{id}"))
        .insert_header(bearer(&tok))
        .insert_header(("Content-Type", ct))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let segunda = json(resp).await["imagen"].as_str().unwrap().to_string();
    assert_ne!(segunda, primera);
    assert_eq!(h.images.keys(), vec![segunda.clone()]);
    let resp = test::call_service(&app, test::TestRequest::get().uri(&format!("/imagenes/{primera}")).to_request()).await;
    assert_eq!(resp.status(), 404);

    // not an image
    let (ct, body) = multipart(&[], Some(b"%PDF-1.4 not an image"));
    let req = test::TestRequest::put()
        .uri(&format!("/api/users/{id}"))
        .insert_header(bearer(&tok))
        .insert_header(("Content-Type", ct))
        .set_payload(body)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
    assert_eq!(h.images.keys(), vec![segunda.clone()]);

    // delete the image, then there is nothing left to delete
    let req = test::TestRequest::delete().uri(&format!("/api/users/{id}/imagen")).insert_header(bearer(&tok)).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert!(json(resp).await["imagen"].is_null());
    assert!(h.images.keys().is_empty());
    let req = test::TestRequest::delete().uri(&format!("/api/users/{id}/imagen")).insert_header(bearer(&tok)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
}

fn subir_foto(id: i64, tok: &str) -> test::TestRequest {
    let (ct, body) = multipart(&[], Some(&sample_png()));
    test::TestRequest::put()
        .uri(&format!("/api/users/{id}"))
        .insert_header(bearer(tok))
        .insert_header(("Content-Type", ct))
        .set_payload(body)
}

#[actix_web::test]
#[serial]
async fn failed_old_image_delete_does_not_block_update() {
    let h = harness();
    let app = test::init_service(App::new().app_data(web::Data::new(h.state.clone())).configure(configure)).await;
    let id = registrar(&h, "borrado@grove.mx").await;
    let tok = token(id, Role::User);

    let resp = test::call_service(&app, subir_foto(id, &tok).to_request()).await;
    assert_eq!(resp.status(), 200);
    let primera = json(resp).await["imagen"].as_str().unwrap().to_string();

    h.images.fail_delete.store(true, std::sync::atomic::Ordering::SeqCst);
    let resp = test::call_service(&app, subir_foto(id, &tok).to_request()).await;
    assert_eq!(resp.status(), 200);
    let segunda = json(resp).await["imagen"].as_str().unwrap().to_string();
    assert_ne!(segunda, primera);
    assert_eq!(h.repo.get_usuario(id).await.unwrap().imagen.as_deref(), Some(segunda.as_str()));
    // the old object is left behind, nothing else breaks
    let mut keys = h.images.keys();
    keys.sort();
    let mut esperadas = vec![primera, segunda];
    esperadas.sort();
    assert_eq!(keys, esperadas);
}

#[actix_web::test]
#[serial]
async fn uploaded_image_is_discarded_when_profile_write_fails() {
    let h = harness();
    let app = test::init_service(App::new().app_data(web::Data::new(h.state.clone())).configure(configure)).await;
    let id = registrar(&h, "carrera@grove.mx").await;
    let tok = token(id, Role::User);

    // the account disappears between the upload and the profile write
    h.images.remove_account_on_next_save(h.repo.clone(), id);
    let resp = test::call_service(&app, subir_foto(id, &tok).to_request()).await;
    assert_eq!(resp.status(), 404);
    assert!(h.images.keys().is_empty());
}

#[actix_web::test]
#[serial]
async fn delete_account_removes_its_image() {
    let h = harness();
    let app = test::init_service(App::new().app_data(web::Data::new(h.state.clone())).configure(configure)).await;
    let id = registrar(&h, "baja@grove.mx").await;
    let tok = token(id, Role::User);

    let (ct, body) = multipart(&[], Some(&sample_png()));
    let req = test::TestRequest::put()
        .uri(&format!("/api/users/{id}"))
        .insert_header(bearer(&tok))
        .insert_header(("Content-Type", ct))
        .set_payload(body)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
    assert_eq!(h.images.keys().len(), 1);

    let req = test::TestRequest::delete().uri(&format!("/api/users/{id}")).insert_header(bearer(&tok)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
    assert!(h.images.keys().is_empty());

    let resp = test::call_service(&app, test::TestRequest::get().uri(&format!("/api/users/{id}")).to_request()).await;
    assert_eq!(resp.status(), 404);
    // an admin deleting a missing account gets a 404
    let req = test::TestRequest::delete().uri(&format!("/api/users/{id}")).insert_header(bearer(&token(999, Role::Admin))).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
#[serial]
async fn register_is_rate_limited_per_client() {
    let h = harness();
    let cfg = RateLimitConfig { register_limit: 1, register_window: Duration::from_secs(300), ..RateLimitConfig::default() };
    let state = h.state.clone().with_rate_limiter(RateLimiterFacade::new(InMemoryRateLimiter::new(true), cfg));
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

    let req = test::TestRequest::post().uri("/api/register").set_json(registro("rl1@grove.mx")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);
    let req = test::TestRequest::post().uri("/api/register").set_json(registro("rl2@grove.mx")).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 429);
    assert_eq!(json(resp).await["error"], "Demasiadas solicitudes");
}

#[actix_web::test]
#[serial]
async fn bad_tokens_are_rejected() {
    let h = harness();
    let app = test::init_service(App::new().app_data(web::Data::new(h.state.clone())).configure(configure)).await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/me").to_request()).await;
    assert_eq!(resp.status(), 401);
    let req = test::TestRequest::get().uri("/api/me").insert_header(bearer("not.a.jwt")).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
    assert_eq!(json(resp).await["error"], "Token inválido");
}
