//! Hosted-checkout payment processor delegate (Stripe REST API).
//!
//! The service never sees card data. It creates checkout sessions, reads them
//! back to confirm payment, and accepts signed webhook notifications. Sales
//! are only ever recorded from data obtained through one of those two
//! verified channels.

use std::collections::HashMap;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use utoipa::ToSchema;

use crate::config::StripeSettings;
use crate::models::{Auto, Id, NewVenta};

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted age of a webhook signature timestamp.
pub const WEBHOOK_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("payment processor not configured")]
    NotConfigured,
    #[error("checkout session not found")]
    NotFound,
    #[error("invalid webhook signature: {0}")]
    InvalidSignature(String),
    #[error("processor error: {0}")]
    Provider(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for PaymentError {
    fn from(e: reqwest::Error) -> Self {
        PaymentError::Transport(e.to_string())
    }
}

/// What we ask the processor to charge for.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub auto_id: Id,
    pub usuario_id: Option<Id>,
    pub nombre: String,
    pub descripcion: String,
    /// Minor currency units (centavos).
    pub monto_centavos: i64,
}

impl CheckoutRequest {
    /// `None` when the listing has no usable price.
    pub fn for_auto(auto: &Auto, usuario_id: Option<Id>) -> Option<Self> {
        let precio = auto.precio.filter(|p| p.is_finite() && *p > 0.0)?;
        Some(Self {
            auto_id: auto.id,
            usuario_id,
            nombre: format!("{} {}", auto.marca, auto.modelo),
            descripcion: auto
                .descripcion
                .clone()
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| "Auto en venta".into()),
            monto_centavos: (precio * 100.0).round() as i64,
        })
    }
}

/// Checkout session as returned to API clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    pub status: Option<String>,
    pub payment_status: Option<String>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status.as_deref() == Some("paid")
    }

    /// Build the sale record this paid session represents.
    pub fn to_new_venta(&self) -> Result<NewVenta, String> {
        if !self.is_paid() {
            return Err(format!("la sesión {} no está pagada", self.id));
        }
        let auto_id = self
            .metadata
            .get("auto_id")
            .and_then(|v| v.parse::<Id>().ok())
            .ok_or_else(|| format!("la sesión {} no tiene auto_id", self.id))?;
        let usuario_id = self.metadata.get("usuario_id").and_then(|v| v.parse::<Id>().ok());
        let amount = self.amount_total.ok_or_else(|| format!("la sesión {} no tiene monto", self.id))?;
        Ok(NewVenta {
            auto_id,
            usuario_id,
            monto: amount as f64 / 100.0,
            moneda: self.currency.clone().unwrap_or_default(),
            session_id: self.id.clone(),
        })
    }
}

/// Processor session object (snake_case wire format).
#[derive(Debug, Deserialize)]
struct StripeSession {
    id: String,
    url: Option<String>,
    status: Option<String>,
    payment_status: Option<String>,
    amount_total: Option<i64>,
    currency: Option<String>,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
}

impl From<StripeSession> for CheckoutSession {
    fn from(s: StripeSession) -> Self {
        Self {
            id: s.id,
            url: s.url,
            status: s.status,
            payment_status: s.payment_status,
            amount_total: s.amount_total,
            currency: s.currency,
            metadata: s.metadata.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    message: Option<String>,
    code: Option<String>,
}

/// A verified webhook notification.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub event_type: String,
    /// Present for `checkout.session.*` events.
    pub session: Option<CheckoutSession>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(&self, req: &CheckoutRequest) -> Result<CheckoutSession, PaymentError>;
    async fn retrieve_checkout_session(&self, id: &str) -> Result<CheckoutSession, PaymentError>;
    fn verify_webhook(&self, payload: &[u8], signature_header: &str) -> Result<WebhookEvent, PaymentError>;
}

pub struct StripeGateway {
    http: reqwest::Client,
    settings: StripeSettings,
}

impl StripeGateway {
    pub fn new(settings: StripeSettings) -> Self {
        Self { http: reqwest::Client::new(), settings }
    }

    fn secret_key(&self) -> Result<&str, PaymentError> {
        self.settings.secret_key.as_deref().ok_or(PaymentError::NotConfigured)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.api_base.trim_end_matches('/'), path)
    }

    fn checkout_form(&self, req: &CheckoutRequest) -> Vec<(String, String)> {
        let front = self.settings.frontend_url.trim_end_matches('/');
        let mut form: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("payment_method_types[0]".into(), "card".into()),
            ("line_items[0][quantity]".into(), "1".into()),
            ("line_items[0][price_data][currency]".into(), self.settings.currency.clone()),
            ("line_items[0][price_data][unit_amount]".into(), req.monto_centavos.to_string()),
            ("line_items[0][price_data][product_data][name]".into(), req.nombre.clone()),
            ("line_items[0][price_data][product_data][description]".into(), req.descripcion.clone()),
            // {CHECKOUT_SESSION_ID} is substituted by the processor.
            ("success_url".into(), format!("{front}/autos/exito?session_id={{CHECKOUT_SESSION_ID}}")),
            ("cancel_url".into(), format!("{front}/autos/{}", req.auto_id)),
            ("metadata[auto_id]".into(), req.auto_id.to_string()),
        ];
        if let Some(u) = req.usuario_id {
            form.push(("metadata[usuario_id]".into(), u.to_string()));
            form.push(("client_reference_id".into(), u.to_string()));
        }
        form
    }

    async fn parse_session(resp: reqwest::Response) -> Result<CheckoutSession, PaymentError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<StripeSession>().await?.into());
        }
        let body = resp.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<StripeErrorEnvelope>(&body).ok().map(|e| e.error);
        if status == reqwest::StatusCode::NOT_FOUND
            || detail.as_ref().and_then(|d| d.code.as_deref()) == Some("resource_missing")
        {
            return Err(PaymentError::NotFound);
        }
        let message = detail.and_then(|d| d.message).unwrap_or(body);
        Err(PaymentError::Provider(format!("{status}: {message}")))
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_checkout_session(&self, req: &CheckoutRequest) -> Result<CheckoutSession, PaymentError> {
        let key = self.secret_key()?;
        let resp = self
            .http
            .post(self.url("/v1/checkout/sessions"))
            .bearer_auth(key)
            .form(&self.checkout_form(req))
            .send()
            .await?;
        Self::parse_session(resp).await
    }

    async fn retrieve_checkout_session(&self, id: &str) -> Result<CheckoutSession, PaymentError> {
        let key = self.secret_key()?;
        let resp = self
            .http
            .get(self.url(&format!("/v1/checkout/sessions/{}", urlencoding::encode(id))))
            .bearer_auth(key)
            .send()
            .await?;
        Self::parse_session(resp).await
    }

    fn verify_webhook(&self, payload: &[u8], signature_header: &str) -> Result<WebhookEvent, PaymentError> {
        let secret = self.settings.webhook_secret.as_deref().ok_or(PaymentError::NotConfigured)?;
        verify_signature(payload, signature_header, secret, chrono::Utc::now().timestamp(), WEBHOOK_TOLERANCE_SECS)?;
        parse_event(payload)
    }
}

/// Decode a (verified) event body.
pub fn parse_event(payload: &[u8]) -> Result<WebhookEvent, PaymentError> {
    let event: StripeEvent = serde_json::from_slice(payload)
        .map_err(|e| PaymentError::InvalidSignature(format!("malformed event: {e}")))?;
    let session = if event.event_type.starts_with("checkout.session.") {
        let s: StripeSession = serde_json::from_value(event.data.object)
            .map_err(|e| PaymentError::InvalidSignature(format!("malformed session: {e}")))?;
        Some(s.into())
    } else {
        None
    };
    Ok(WebhookEvent { event_type: event.event_type, session })
}

/// Check a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=...]`) against
/// HMAC-SHA256(secret, "<t>.<payload>").
pub fn verify_signature(payload: &[u8], header: &str, secret: &str, now: i64, tolerance_secs: i64) -> Result<(), PaymentError> {
    let mut timestamp: Option<&str> = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = Some(v),
            Some(("v1", v)) => candidates.push(v),
            _ => {}
        }
    }
    let ts_raw = timestamp.ok_or_else(|| PaymentError::InvalidSignature("missing timestamp".into()))?;
    let ts: i64 = ts_raw
        .parse()
        .map_err(|_| PaymentError::InvalidSignature("bad timestamp".into()))?;
    if now.abs_diff(ts) > tolerance_secs.unsigned_abs() {
        return Err(PaymentError::InvalidSignature("timestamp outside tolerance".into()));
    }
    for candidate in candidates {
        let Ok(expected) = hex::decode(candidate) else { continue };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| PaymentError::InvalidSignature(e.to_string()))?;
        mac.update(ts_raw.as_bytes());
        mac.update(b".");
        mac.update(payload);
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }
    Err(PaymentError::InvalidSignature("no matching v1 signature".into()))
}

/// Produce a header value in the processor's format. Used to drive the
/// webhook endpoint from tests and local tooling.
pub fn signature_header(payload: &[u8], secret: &str, timestamp: i64) -> String {
    // new_from_slice only fails for fixed-size-key MACs; HMAC takes any length.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return String::new(),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Categoria;

    const SECRET: &str = "whsec_test";

    #[test]
    fn signature_roundtrip_and_tamper() {
        let body = br#"{"type":"ping","data":{"object":{}}}"#;
        let header = signature_header(body, SECRET, 1_700_000_000);
        assert!(verify_signature(body, &header, SECRET, 1_700_000_010, WEBHOOK_TOLERANCE_SECS).is_ok());
        assert!(verify_signature(b"{}", &header, SECRET, 1_700_000_010, WEBHOOK_TOLERANCE_SECS).is_err());
        assert!(verify_signature(body, &header, "other", 1_700_000_010, WEBHOOK_TOLERANCE_SECS).is_err());
    }

    #[test]
    fn stale_signature_is_rejected() {
        let body = b"{}";
        let header = signature_header(body, SECRET, 1_700_000_000);
        let err = verify_signature(body, &header, SECRET, 1_700_000_000 + 301, WEBHOOK_TOLERANCE_SECS).unwrap_err();
        assert!(matches!(err, PaymentError::InvalidSignature(_)));
    }

    #[test]
    fn extreme_timestamps_are_rejected_without_overflow() {
        for t in [i64::MIN, i64::MAX] {
            let header = format!("t={t},v1=00");
            let err = verify_signature(b"{}", &header, SECRET, 1_700_000_000, WEBHOOK_TOLERANCE_SECS).unwrap_err();
            assert!(matches!(err, PaymentError::InvalidSignature(_)));
        }
    }

    #[test]
    fn any_matching_v1_is_enough() {
        let body = b"{}";
        let good = signature_header(body, SECRET, 42);
        let v1 = good.split_once(",v1=").unwrap().1;
        let header = format!("t=42,v1=deadbeef,v1={v1},v0=ignored");
        assert!(verify_signature(body, &header, SECRET, 42, WEBHOOK_TOLERANCE_SECS).is_ok());
    }

    #[test]
    fn paid_session_becomes_sale() {
        let mut s = CheckoutSession {
            id: "cs_test_1".into(),
            url: None,
            status: Some("complete".into()),
            payment_status: Some("unpaid".into()),
            amount_total: Some(123_456),
            currency: Some("mxn".into()),
            metadata: HashMap::from([("auto_id".into(), "7".into()), ("usuario_id".into(), "3".into())]),
        };
        assert!(s.to_new_venta().is_err());
        s.payment_status = Some("paid".into());
        let v = s.to_new_venta().unwrap();
        assert_eq!(v.auto_id, 7);
        assert_eq!(v.usuario_id, Some(3));
        assert!((v.monto - 1234.56).abs() < 1e-9);
        assert_eq!(v.session_id, "cs_test_1");
    }

    #[test]
    fn checkout_request_rounds_price_to_centavos() {
        let auto = Auto {
            id: 9,
            marca: "Porsche".into(),
            modelo: "911".into(),
            anio: None,
            precio: Some(1_234.56),
            descripcion: Some("  ".into()),
            potencia: None,
            caballos_fuerza: None,
            cilindrada: None,
            tamano_motor: None,
            tipo_combustible: None,
            transmision: None,
            traccion: None,
            largo: None,
            ancho: None,
            alto: None,
            peso: None,
            imagenes: vec![],
            videos: vec![],
            categoria: Categoria::Supercar,
        };
        let req = CheckoutRequest::for_auto(&auto, None).unwrap();
        assert_eq!(req.nombre, "Porsche 911");
        assert_eq!(req.descripcion, "Auto en venta");
        assert_eq!(req.monto_centavos, 123_456);
        let free = Auto { precio: None, ..auto };
        assert!(CheckoutRequest::for_auto(&free, None).is_none());
    }
}
