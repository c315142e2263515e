use std::sync::Arc;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use crate::accessory::Accessory;
use super::hap::{self, ReadItem, WriteRequest};
use super::pairing::PairingContext;
use super::session::Session;
use super::tlv::Tlv;

pub const HAP_JSON: &str = "application/hap+json";
pub const PAIRING_TLV: &str = "application/pairing+tlv8";

/// Status returned until the connection has been verified
const CONNECTION_AUTHORIZATION_REQUIRED: u16 = 470;

#[derive(Clone)]
pub struct AppState {
    pub accessory: Arc<Accessory>,
    pub pairing: Arc<PairingContext>,
}

#[derive(Deserialize)]
pub struct CharacteristicQuery {
    pub id: String,
}

#[derive(Serialize)]
pub struct ReadResponse {
    pub characteristics: Vec<ReadItem>,
}

/// Every handler expects the connection's [`Session`] as a request extension.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/accessories", get(get_accessories))
        .route("/characteristics", get(get_characteristics).put(put_characteristics))
        .route("/identify", post(identify))
        .route("/pair-setup", post(pair_setup))
        .route("/pair-verify", post(pair_verify))
        .route("/pairings", post(pairings))
        .with_state(state)
}

fn hap_json(status: StatusCode, body: Value) -> Response {
    (status, [(header::CONTENT_TYPE, HAP_JSON)], body.to_string()).into_response()
}

fn tlv(response: Tlv) -> Response {
    ([(header::CONTENT_TYPE, PAIRING_TLV)], response.encode()).into_response()
}

/// Reject requests on connections that have not completed pair-verify
fn authorize(session: &Session) -> Result<(), Response> {
    if session.is_verified() {
        return Ok(());
    }

    let status = StatusCode::from_u16(CONNECTION_AUTHORIZATION_REQUIRED).unwrap_or(StatusCode::UNAUTHORIZED);
    Err(hap_json(status, json!({ "status": hap::STATUS_INSUFFICIENT_PRIVILEGES })))
}

async fn get_accessories(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
) -> Response {
    if let Err(denied) = authorize(&session) {
        return denied;
    }
    hap_json(StatusCode::OK, hap::accessory_database(&state.accessory))
}

async fn get_characteristics(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
    Query(params): Query<CharacteristicQuery>,
) -> Response {
    if let Err(denied) = authorize(&session) {
        return denied;
    }

    let mut characteristics = Vec::new();
    for (aid, iid) in hap::parse_ids(&params.id) {
        let value = hap::read(&state.accessory, aid, iid).await;
        let status = value.is_none().then_some(hap::STATUS_NOT_FOUND);
        characteristics.push(ReadItem { aid, iid, value, status });
    }

    let status = if characteristics.iter().any(|c| c.status.is_some()) {
        StatusCode::MULTI_STATUS
    } else {
        StatusCode::OK
    };
    hap_json(status, json!(ReadResponse { characteristics }))
}

/// Writes always report success; device failures only show up in the log.
async fn put_characteristics(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
    body: Bytes,
) -> Response {
    if let Err(denied) = authorize(&session) {
        return denied;
    }

    let request: WriteRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!("Malformed characteristic write: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    for item in request.characteristics {
        if let Some(enabled) = item.ev {
            session.set_events(item.aid, item.iid, enabled);
        }

        let Some(value) = item.value else {
            continue;
        };

        if !hap::write(&state.accessory, item.aid, item.iid, &value).await {
            tracing::debug!(
                "Ignored write of {} to {}.{} on {:?}",
                value,
                item.aid,
                item.iid,
                state.accessory.info.name
            );
        }
    }

    StatusCode::NO_CONTENT.into_response()
}

/// Unpaired accessories may be asked to identify themselves without a session
async fn identify(State(state): State<AppState>) -> Response {
    if state.pairing.is_paired() {
        return hap_json(
            StatusCode::BAD_REQUEST,
            json!({ "status": hap::STATUS_INSUFFICIENT_PRIVILEGES }),
        );
    }

    state.accessory.handler().identify().await;
    StatusCode::NO_CONTENT.into_response()
}

async fn pair_setup(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
    body: Bytes,
) -> Response {
    tlv(state.pairing.pair_setup(&session, &body))
}

async fn pair_verify(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
    body: Bytes,
) -> Response {
    tlv(state.pairing.pair_verify(&session, &body))
}

async fn pairings(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
    body: Bytes,
) -> Response {
    tlv(state.pairing.manage(&session, &body))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;
    use crate::accessory::build;
    use crate::accessory::builder::tests::{app, identity};
    use crate::controller::DeviceController;
    use crate::device::fake::{Call, FakeClient};
    use crate::device::Key;
    use crate::transport::pairing::tests::context;
    use crate::transport::session::{Controller, SessionKeys};

    pub(crate) fn state(client: FakeClient) -> AppState {
        let controller = Arc::new(DeviceController::new(client, identity()));
        AppState {
            accessory: Arc::new(build(&identity(), &[app("Netflix", "12")], controller)),
            pairing: Arc::new(context()),
        }
    }

    fn verified() -> Arc<Session> {
        let session = Session::default();
        session.establish(
            Controller {
                id: "controller-1".to_string(),
                admin: true,
            },
            SessionKeys::accessory(&[0u8; 32]).unwrap(),
        );
        Arc::new(session)
    }

    async fn send(
        state: &AppState,
        session: &Arc<Session>,
        method: &str,
        uri: &str,
        body: Value,
    ) -> (StatusCode, Value) {
        let body = if body.is_null() { Body::empty() } else { Body::from(body.to_string()) };
        let mut request = Request::builder().method(method).uri(uri).body(body).unwrap();
        request.extensions_mut().insert(session.clone());

        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_get_accessories() {
        let state = state(FakeClient::new());

        let (status, body) = send(&state, &verified(), "GET", "/accessories", Value::Null).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["accessories"][0]["aid"], 1);
        assert_eq!(body["accessories"][0]["services"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unverified_connection_is_refused() {
        let client = FakeClient::new();
        let state = state(client.clone());
        let session = Arc::new(Session::default());

        let (status, body) = send(&state, &session, "GET", "/accessories", Value::Null).await;
        assert_eq!(status.as_u16(), 470);
        assert_eq!(body["status"], hap::STATUS_INSUFFICIENT_PRIVILEGES);

        let (status, _) = send(
            &state,
            &session,
            "PUT",
            "/characteristics",
            json!({ "characteristics": [{ "aid": 1, "iid": 9, "value": 0 }] }),
        )
        .await;
        assert_eq!(status.as_u16(), 470);

        let (status, _) = send(&state, &session, "GET", "/characteristics?id=1.9", Value::Null).await;
        assert_eq!(status.as_u16(), 470);

        // Nothing reached the device
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_read_falls_back_when_device_unreachable() {
        let client = FakeClient::new();
        let state = state(client.clone());

        let (status, body) = send(&state, &verified(), "GET", "/characteristics?id=1.9,1.10,1.99", Value::Null).await;

        assert_eq!(status, StatusCode::MULTI_STATUS);
        let items = body["characteristics"].as_array().unwrap();
        // Startup identity reported PowerOn
        assert_eq!(items[0]["value"], 1);
        assert_eq!(items[1]["value"], 0);
        assert_eq!(items[2]["status"], hap::STATUS_NOT_FOUND);
        assert_eq!(client.calls(), vec![Call::DeviceInfo, Call::ActiveApp]);
    }

    #[tokio::test]
    async fn test_failed_write_still_succeeds() {
        let client = FakeClient::new().failing_commands();
        let state = state(client.clone());
        let session = verified();

        let (status, _) = send(
            &state,
            &session,
            "PUT",
            "/characteristics",
            json!({
                "characteristics": [
                    { "aid": 1, "iid": 9, "value": 0 },
                    { "aid": 1, "iid": 13, "value": 200 },
                    { "aid": 1, "iid": 10, "ev": true }
                ]
            }),
        )
        .await;

        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(client.commands(), vec![Call::SendKey(Key::PowerOff)]);
        assert!(session.wants_events(1, 10));
        assert!(!session.wants_events(1, 9));
    }

    #[tokio::test]
    async fn test_event_subscription_can_be_cleared() {
        let state = state(FakeClient::new());
        let session = verified();

        for enabled in [true, false] {
            send(
                &state,
                &session,
                "PUT",
                "/characteristics",
                json!({ "characteristics": [{ "aid": 1, "iid": 9, "ev": enabled }] }),
            )
            .await;
            assert_eq!(session.wants_events(1, 9), enabled);
        }
    }

    #[tokio::test]
    async fn test_identify_only_while_unpaired() {
        let client = FakeClient::new();
        let state = state(client.clone());
        let session = Arc::new(Session::default());

        let (status, _) = send(&state, &session, "POST", "/identify", Value::Null).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(client.commands(), vec![Call::FindRemote]);

        let paired = Tlv::state(1)
            .with(crate::transport::tlv::METHOD, [crate::transport::tlv::METHOD_ADD_PAIRING])
            .with(crate::transport::tlv::IDENTIFIER, b"controller-1")
            .with(crate::transport::tlv::PUBLIC_KEY, [1u8; 32])
            .with(crate::transport::tlv::PERMISSIONS, [1]);
        state.pairing.manage(&verified(), &paired.encode());

        let (status, body) = send(&state, &session, "POST", "/identify", Value::Null).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], hap::STATUS_INSUFFICIENT_PRIVILEGES);
        assert_eq!(client.commands(), vec![Call::FindRemote]);
    }
}
