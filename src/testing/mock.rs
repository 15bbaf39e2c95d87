//! In-process stand-ins for Apple's services
//!
//! [`MockAppleServer`] serves the three DeviceCheck endpoints over real HTTP
//! on a random local port. It keeps two bits per device token, records every
//! request it receives, and can be told to answer an endpoint with a fixed
//! status or to stall long enough to trip client timeouts.

use super::authority::TestAuthority;
use super::{TEST_BUNDLE_ID, TEST_TEAM_ID};
use crate::attest::{AppAttestService, AttestationVerifier};
use crate::challenge::ChallengeIssuer;
use crate::devicecheck::{
    AppleDeviceCheckGateway, AuthKeyConfig, AuthTokenProvider, DeviceBits, DeviceTokenGateway,
};
use crate::handlers::AppState;
use crate::models::{AppEnvironment, AppIdentity};
use crate::store::MemoryCredentialStore;
use actix_web::dev::ServerHandle;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use openssl::ec::{EcGroup, EcKey};
use openssl::nid::Nid;
use openssl::pkey::PKey;
use serde_json::Value;
use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Service trusting `authority`, configured for the fixture app in development
#[must_use]
pub fn test_service(authority: &TestAuthority) -> AppAttestService {
    let app = AppIdentity::new(TEST_TEAM_ID, TEST_BUNDLE_ID, AppEnvironment::Development);
    AppAttestService::new(
        AttestationVerifier::new(authority.trust_anchor(), app),
        Arc::new(MemoryCredentialStore::new()),
        ChallengeIssuer::default(),
    )
}

/// Gateway whose auth key is not configured and whose upstream is unreachable
#[must_use]
pub fn unconfigured_gateway() -> AppleDeviceCheckGateway {
    let auth = AuthTokenProvider::new(AuthKeyConfig {
        team_id: "YOUR_TEAM_ID".to_string(),
        key_id: "YOUR_KEY_ID".to_string(),
        private_key_path: PathBuf::from("AuthKey.p8"),
        lifetime_seconds: 3600,
    });
    AppleDeviceCheckGateway::new("http://127.0.0.1:9/v1", Duration::from_secs(1), auth)
        .expect("static URL is valid")
}

/// Handler state around [`test_service`] with failure details exposed
#[must_use]
pub fn test_app_state(authority: &TestAuthority) -> AppState {
    AppState::new(
        Arc::new(test_service(authority)),
        Arc::new(unconfigured_gateway()),
        true,
    )
}

/// Write a fresh PKCS#8 P-256 key to `dir/AuthKey_TEST.p8`
///
/// # Panics
///
/// Panics if the key cannot be generated or written
#[must_use]
pub fn write_auth_key(dir: &Path) -> PathBuf {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).expect("P-256 group");
    let key = PKey::from_ec_key(EcKey::generate(&group).expect("ec key")).expect("pkey");
    let pem = key.private_key_to_pem_pkcs8().expect("pkcs8 pem");
    let path = dir.join("AuthKey_TEST.p8");
    std::fs::write(&path, pem).expect("write auth key");
    path
}

/// One request as seen by the mock
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub endpoint: String,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub body: Value,
}

#[derive(Debug, Clone)]
struct CannedReply {
    status: u16,
    body: String,
}

#[derive(Default)]
struct MockState {
    requests: Mutex<Vec<RecordedRequest>>,
    replies: Mutex<HashMap<String, CannedReply>>,
    bits: Mutex<HashMap<String, DeviceBits>>,
    delay: Mutex<Option<Duration>>,
}

fn guard<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn header(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}

/// A JWT is three dot-separated segments
fn is_bearer_jwt(authorization: Option<&str>) -> bool {
    authorization
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| token.split('.').count() == 3)
}

async fn apple_endpoint(
    req: HttpRequest,
    endpoint: web::Path<String>,
    body: web::Bytes,
    state: web::Data<MockState>,
) -> HttpResponse {
    let endpoint = endpoint.into_inner();
    let authorization = header(&req, "authorization");
    let json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    guard(&state.requests).push(RecordedRequest {
        endpoint: endpoint.clone(),
        authorization: authorization.clone(),
        content_type: header(&req, "content-type"),
        body: json.clone(),
    });

    let delay = *guard(&state.delay);
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    if !is_bearer_jwt(authorization.as_deref()) {
        return HttpResponse::Unauthorized()
            .body("Unable to verify authorization token");
    }

    let canned = guard(&state.replies).get(&endpoint).cloned();
    if let Some(reply) = canned {
        return HttpResponse::build(
            actix_web::http::StatusCode::from_u16(reply.status)
                .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR),
        )
        .body(reply.body);
    }

    let Some(token) = json.get("device_token").and_then(Value::as_str) else {
        return HttpResponse::BadRequest().body("Missing or incorrectly formatted device token payload");
    };

    match endpoint.as_str() {
        "query_two_bits" => match guard(&state.bits).get(token) {
            Some(bits) => HttpResponse::Ok().json(bits),
            None => HttpResponse::Ok().body("Failed to find bit state"),
        },
        "update_two_bits" => {
            let bits = DeviceBits {
                bit0: json.get("bit0").and_then(Value::as_bool),
                bit1: json.get("bit1").and_then(Value::as_bool),
                last_update_time: Some(chrono::Utc::now().format("%Y-%m").to_string()),
            };
            guard(&state.bits).insert(token.to_string(), bits);
            HttpResponse::Ok().finish()
        }
        "validate_device_token" => HttpResponse::Ok().finish(),
        _ => HttpResponse::NotFound().finish(),
    }
}

/// Apple DeviceCheck API double served on `127.0.0.1`
pub struct MockAppleServer {
    addr: SocketAddr,
    state: web::Data<MockState>,
    handle: ServerHandle,
}

impl MockAppleServer {
    /// Bind a random port and start serving; call inside a Tokio runtime
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let state = web::Data::new(MockState::default());

        let app_state = state.clone();
        let server = HttpServer::new(move || {
            App::new()
                .app_data(app_state.clone())
                .route("/v1/{endpoint}", web::post().to(apple_endpoint))
        })
        .workers(1)
        .disable_signals()
        .listen(listener)?
        .run();
        let handle = server.handle();
        tokio::spawn(server);

        Ok(Self {
            addr,
            state,
            handle,
        })
    }

    /// Base URL including the `/v1` version path
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    /// Gateway pointed at this server, signing with the key at `key_path`
    ///
    /// # Panics
    ///
    /// Panics if the base URL is rejected
    #[must_use]
    pub fn gateway(&self, key_path: &Path, timeout: Duration) -> AppleDeviceCheckGateway {
        let auth = AuthTokenProvider::new(AuthKeyConfig {
            team_id: TEST_TEAM_ID.to_string(),
            key_id: "KEYID56789".to_string(),
            private_key_path: key_path.to_path_buf(),
            lifetime_seconds: 3600,
        });
        AppleDeviceCheckGateway::new(&self.base_url(), timeout, auth).expect("mock URL is valid")
    }

    /// Same as [`Self::gateway`], as a trait object for [`AppState`]
    #[must_use]
    pub fn shared_gateway(&self, key_path: &Path) -> Arc<dyn DeviceTokenGateway> {
        Arc::new(self.gateway(key_path, Duration::from_secs(5)))
    }

    /// Answer every call to `endpoint` with `status` and `body`
    pub fn respond_with(&self, endpoint: &str, status: u16, body: &str) {
        guard(&self.state.replies).insert(
            endpoint.to_string(),
            CannedReply {
                status,
                body: body.to_string(),
            },
        );
    }

    /// Stall every answer by `delay`
    pub fn set_delay(&self, delay: Duration) {
        *guard(&self.state.delay) = Some(delay);
    }

    /// Preset the bits Apple holds for `device_token`
    pub fn set_bits(&self, device_token: &str, bits: DeviceBits) {
        guard(&self.state.bits).insert(device_token.to_string(), bits);
    }

    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        guard(&self.state.requests).clone()
    }

    /// Stop accepting connections and wait for the workers to exit
    pub async fn stop(self) {
        self.handle.stop(false).await;
    }
}
