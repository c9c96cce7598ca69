mod common;

use std::net::SocketAddr;
use std::time::Duration;

use actix_web::{test, web, App};
use grove::configure;
use grove::rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
use serde_json::json;
use serial_test::serial;

use common::*;

fn login_from(peer: &str, forwarded: Option<&str>) -> test::TestRequest {
    let req = test::TestRequest::post()
        .uri("/api/login")
        .peer_addr(peer.parse::<SocketAddr>().unwrap())
        .set_json(json!({"email": "nadie@grove.mx", "password": "incorrecta"}));
    match forwarded {
        Some(ip) => req.insert_header(("X-Forwarded-For", ip.to_string())),
        None => req,
    }
}

#[actix_web::test]
#[serial]
async fn login_attempts_are_limited_per_ip() {
    let h = harness();
    // two attempts per large window so the third is denied immediately
    let cfg = RateLimitConfig { login_limit: 2, login_window: Duration::from_secs(300), ..RateLimitConfig::default() };
    let state = h.state.clone().with_rate_limiter(RateLimiterFacade::new(InMemoryRateLimiter::new(true), cfg));
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

    for _ in 0..2 {
        assert_eq!(test::call_service(&app, login_from("10.0.0.1:4000", None).to_request()).await.status(), 401);
    }
    let resp = test::call_service(&app, login_from("10.0.0.1:4001", None).to_request()).await;
    assert_eq!(resp.status(), 429);
    assert_eq!(json(resp).await["error"], "Demasiadas solicitudes");

    // a different client still gets through to the credential check
    assert_eq!(test::call_service(&app, login_from("10.0.0.2:4000", None).to_request()).await.status(), 401);
}

#[actix_web::test]
#[serial]
async fn forwarded_header_cannot_dodge_the_limit() {
    let h = harness();
    let cfg = RateLimitConfig { login_limit: 1, login_window: Duration::from_secs(300), ..RateLimitConfig::default() };
    let state = h.state.clone().with_rate_limiter(RateLimiterFacade::new(InMemoryRateLimiter::new(true), cfg));
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

    let mut statuses = Vec::new();
    for i in 0..5 {
        let spoofed = format!("10.9.9.{i}");
        let resp = test::call_service(&app, login_from("203.0.113.9:5000", Some(&spoofed)).to_request()).await;
        statuses.push(resp.status().as_u16());
    }
    assert_eq!(statuses, vec![401, 429, 429, 429, 429]);
}

#[actix_web::test]
#[serial]
async fn trusted_proxy_keys_on_forwarded_client() {
    let h = harness();
    let cfg = RateLimitConfig { login_limit: 1, login_window: Duration::from_secs(300), ..RateLimitConfig::default() };
    let state = h
        .state
        .clone()
        .with_rate_limiter(RateLimiterFacade::new(InMemoryRateLimiter::new(true), cfg))
        .with_trusted_proxy(true);
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

    // every request arrives from the proxy; the forwarded client decides the bucket
    let proxy = "172.16.0.1:8080";
    assert_eq!(test::call_service(&app, login_from(proxy, Some("198.51.100.1")).to_request()).await.status(), 401);
    assert_eq!(test::call_service(&app, login_from(proxy, Some("198.51.100.1")).to_request()).await.status(), 429);
    assert_eq!(test::call_service(&app, login_from(proxy, Some("198.51.100.2")).to_request()).await.status(), 401);
}

#[actix_web::test]
#[serial]
async fn disabled_limiter_never_blocks() {
    let h = harness();
    let cfg = RateLimitConfig { login_limit: 1, ..RateLimitConfig::default() };
    let state = h.state.clone().with_rate_limiter(RateLimiterFacade::new(InMemoryRateLimiter::new(false), cfg));
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

    for _ in 0..5 {
        assert_eq!(test::call_service(&app, login_from("10.0.0.3:4000", None).to_request()).await.status(), 401);
    }
}
