#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use actix_web::dev::ServiceResponse;
use actix_web::test;
use grove::auth::{create_jwt, Role};
use grove::models::Id;
use grove::payments::{
    parse_event, verify_signature, CheckoutRequest, CheckoutSession, PaymentError, PaymentGateway, WebhookEvent,
    WEBHOOK_TOLERANCE_SECS,
};
use grove::repo::inmem::InMemRepo;
use grove::repo::UsuarioRepo;
use grove::storage::{ImageStore, ImageStoreError};
use grove::AppState;

pub const JWT_SECRET: &str = "test-secret-must-be-32-bytes-long!!";
pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

pub fn set_secret() {
    std::env::set_var("JWT_SECRET", JWT_SECRET);
}

pub fn token(id: Id, role: Role) -> String {
    set_secret();
    create_jwt(id, vec![role]).unwrap()
}

pub fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {token}"))
}

pub async fn json(resp: ServiceResponse) -> serde_json::Value {
    serde_json::from_slice(&test::read_body(resp).await).unwrap()
}

// ---------------- In-memory Mock ImageStore (tests only) ----------------
#[derive(Default)]
pub struct MockImageStore {
    inner: Mutex<HashMap<String, (Vec<u8>, String)>>,
    /// When set, every delete fails with a backend error.
    pub fail_delete: AtomicBool,
    /// Account removed right after the next successful save.
    remove_on_save: Mutex<Option<(InMemRepo, Id)>>,
}

impl MockImageStore {
    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().unwrap().keys().cloned().collect()
    }

    pub fn remove_account_on_next_save(&self, repo: InMemRepo, id: Id) {
        *self.remove_on_save.lock().unwrap() = Some((repo, id));
    }
}

#[async_trait::async_trait]
impl ImageStore for MockImageStore {
    async fn save(&self, key: &str, mime: &str, bytes: &[u8]) -> Result<(), ImageStoreError> {
        {
            let mut map = self.inner.lock().unwrap();
            if map.contains_key(key) {
                return Err(ImageStoreError::Duplicate);
            }
            map.insert(key.to_string(), (bytes.to_vec(), mime.to_string()));
        }
        let pending = self.remove_on_save.lock().unwrap().take();
        if let Some((repo, id)) = pending {
            let _ = repo.delete_usuario(id).await;
        }
        Ok(())
    }
    async fn load(&self, key: &str) -> Result<(Vec<u8>, String), ImageStoreError> {
        let map = self.inner.lock().unwrap();
        map.get(key).cloned().ok_or(ImageStoreError::NotFound)
    }
    async fn delete(&self, key: &str) -> Result<(), ImageStoreError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(ImageStoreError::Other("bucket unavailable".into()));
        }
        let mut map = self.inner.lock().unwrap();
        map.remove(key).map(|_| ()).ok_or(ImageStoreError::NotFound)
    }
}

// ---------------- Scripted payment processor ----------------
/// Hands out `cs_test_<n>` sessions and keeps them so tests can flip them to paid.
pub struct MockGateway {
    sessions: Mutex<HashMap<String, CheckoutSession>>,
    pub requests: Mutex<Vec<CheckoutRequest>>,
    counter: AtomicUsize,
    configured: bool,
}

impl MockGateway {
    pub fn new() -> Self {
        Self { sessions: Mutex::default(), requests: Mutex::default(), counter: AtomicUsize::new(0), configured: true }
    }

    pub fn unconfigured() -> Self {
        Self { configured: false, ..Self::new() }
    }

    pub fn mark_paid(&self, id: &str) {
        if let Some(s) = self.sessions.lock().unwrap().get_mut(id) {
            s.status = Some("complete".into());
            s.payment_status = Some("paid".into());
        }
    }

    pub fn session(&self, id: &str) -> Option<CheckoutSession> {
        self.sessions.lock().unwrap().get(id).cloned()
    }
}

#[async_trait::async_trait]
impl PaymentGateway for MockGateway {
    async fn create_checkout_session(&self, req: &CheckoutRequest) -> Result<CheckoutSession, PaymentError> {
        if !self.configured {
            return Err(PaymentError::NotConfigured);
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("cs_test_{n}");
        let mut metadata = HashMap::from([("auto_id".to_string(), req.auto_id.to_string())]);
        if let Some(u) = req.usuario_id {
            metadata.insert("usuario_id".into(), u.to_string());
        }
        let session = CheckoutSession {
            id: id.clone(),
            url: Some(format!("https://checkout.test/{id}")),
            status: Some("open".into()),
            payment_status: Some("unpaid".into()),
            amount_total: Some(req.monto_centavos),
            currency: Some("mxn".into()),
            metadata,
        };
        self.sessions.lock().unwrap().insert(id, session.clone());
        self.requests.lock().unwrap().push(req.clone());
        Ok(session)
    }

    async fn retrieve_checkout_session(&self, id: &str) -> Result<CheckoutSession, PaymentError> {
        if !self.configured {
            return Err(PaymentError::NotConfigured);
        }
        self.session(id).ok_or(PaymentError::NotFound)
    }

    fn verify_webhook(&self, payload: &[u8], signature_header: &str) -> Result<WebhookEvent, PaymentError> {
        verify_signature(payload, signature_header, WEBHOOK_SECRET, chrono::Utc::now().timestamp(), WEBHOOK_TOLERANCE_SECS)?;
        parse_event(payload)
    }
}

pub struct Harness {
    pub state: AppState,
    pub repo: InMemRepo,
    pub images: Arc<MockImageStore>,
    pub payments: Arc<MockGateway>,
}

pub fn harness() -> Harness {
    harness_with(MockGateway::new())
}

pub fn harness_with(gateway: MockGateway) -> Harness {
    set_secret();
    let repo = InMemRepo::new();
    let images = Arc::new(MockImageStore::default());
    let payments = Arc::new(gateway);
    let state = AppState::new(Arc::new(repo.clone()), images.clone(), payments.clone());
    Harness { state, repo, images, payments }
}

pub fn ferrari() -> serde_json::Value {
    serde_json::json!({
        "marca": "Ferrari",
        "modelo": "SF90",
        "año": 2023,
        "precio": 8_500_000.5,
        "descripcion": "Híbrido enchufable",
        "caballosFuerza": 986,
        "transmision": "DCT 8 vel.",
        "imagenes": ["https://img.test/sf90.jpg"],
        "categoria": "hypercar"
    })
}

// Minimal 1x1 PNG (transparent)
pub fn sample_png() -> Vec<u8> {
    vec![
        0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, // signature
        0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D', b'R', 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
        0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, b'I',
        b'D', b'A', b'T', 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A,
        0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, b'I', b'E', b'N', b'D', 0xAE, 0x42, 0x60, 0x82,
    ]
}

/// Multipart body with text fields and an optional `imagen` file part.
pub fn multipart(fields: &[(&str, &str)], imagen: Option<&[u8]>) -> (String, Vec<u8>) {
    let boundary = "grove-test-boundary";
    let mut body: Vec<u8> = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!("--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").as_bytes(),
        );
    }
    if let Some(bytes) = imagen {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"imagen\"; filename=\"perfil\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}
