//! HTTP surface tests, driven through the router without a socket

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use duelgate::api::create_router;
use duelgate::config::ServerEntry;
use duelgate::games::GameKind;
use duelgate::tasks::InMemoryTaskStore;
use duelgate::{App, DuelgateConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const REFEREE_KEY: &str = "referee-secret";
const ADMIN_KEY: &str = "admin-secret";

async fn setup() -> (Arc<App>, Router) {
    let mut config = DuelgateConfig::default();
    config.api.referee_api_key = Some(REFEREE_KEY.to_string());
    config.api.admin_api_key = Some(ADMIN_KEY.to_string());
    config.servers.pool = vec![ServerEntry {
        game: GameKind::Arena,
        region: "eu".to_string(),
        link: "https://play.example/arena/eu-1".to_string(),
    }];

    let app = Arc::new(App::with_task_store(config, Arc::new(InMemoryTaskStore::new())));
    app.identities
        .link_account("alice", GameKind::Arena, "AliceGG")
        .await
        .unwrap();
    app.identities
        .link_account("bob", GameKind::Arena, "BobTheBuilder")
        .await
        .unwrap();
    app.ledger.deposit("alice", 500).unwrap();
    app.ledger.deposit("bob", 50).unwrap();

    let router = create_router(app.clone());
    (app, router)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn with_key(mut request: Request<Body>, key: &str) -> Request<Body> {
    request
        .headers_mut()
        .insert("x-api-key", key.parse().unwrap());
    request
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn challenge_body(wager: u64) -> Value {
    json!({
        "challenger_id": "alice",
        "opponent_id": "bob",
        "game": "arena",
        "wager": wager,
        "match_parameters": { "map": "docks", "region": "eu" }
    })
}

#[tokio::test]
async fn test_health() {
    let (_, router) = setup().await;
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Running");
    assert_eq!(body["settlement_enabled"], false);
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let (_, router) = setup().await;
    let request = Request::builder()
        .uri("/api/duels/missing")
        .header("x-request-id", "req-42")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers()["x-request-id"], "req-42");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["request_id"], "req-42");
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_precheck_reports_short_balance() {
    let (_, router) = setup().await;
    let (status, body) = send(
        &router,
        post(
            "/api/duels/precheck",
            json!({ "challenger_id": "alice", "opponent_id": "bob", "game": "arena", "wager": 100 }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "INSUFFICIENT_BALANCE");
    assert_eq!(body["error"]["details"]["participant_id"], "bob");
    assert_eq!(body["error"]["details"]["available"], 50);
    assert_eq!(body["error"]["details"]["required"], 100);
}

#[tokio::test]
async fn test_create_rejects_bad_input() {
    let (_, router) = setup().await;

    let mut bad_map = challenge_body(10);
    bad_map["match_parameters"]["map"] = json!("volcano");
    let (status, body) = send(&router, post("/api/duels", bad_map)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_PARAMETERS");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("Unknown map 'volcano'"));

    let request = Request::builder()
        .method("POST")
        .uri("/api/duels")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_BODY");
}

#[tokio::test]
async fn test_challenge_accept_over_http() {
    let (app, router) = setup().await;
    let (status, duel) = send(&router, post("/api/duels", challenge_body(20))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(duel["status"], "pending");
    let id = duel["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &router,
        post(&format!("/api/duels/{}/accept", id), json!({ "participant_id": "alice" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_FAILED");

    let (status, body) = send(
        &router,
        post(&format!("/api/duels/{}/accept", id), json!({ "participant_id": "mallory" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "NOT_PARTICIPANT");

    let accept = json!({ "participant_id": "bob" });
    let (status, body) = send(&router, post(&format!("/api/duels/{}/accept", id), accept.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], true);
    assert_eq!(body["duel"]["status"], "accepted");

    let (_, body) = send(&router, post(&format!("/api/duels/{}/accept", id), accept)).await;
    assert_eq!(body["applied"], false);
    assert_eq!(app.ledger.balance("bob"), 30);

    let (status, body) = send(
        &router,
        post(&format!("/api/duels/{}/confirm", id), json!({ "participant_id": "bob" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");
    assert_eq!(body["error"]["details"]["status"], "accepted");
}

#[tokio::test]
async fn test_referee_routes_need_key() {
    let (app, router) = setup().await;
    let duel = app
        .duels
        .create_challenge(serde_json::from_value(challenge_body(20)).unwrap())
        .await
        .unwrap();
    app.duels.accept(&duel.id, "bob").await.unwrap();
    app.duels.start(&duel.id, "alice").await.unwrap();

    let uri = format!("/api/duels/{}/result", duel.id);
    let (status, body) = send(&router, post(&uri, json!({ "winner": "AliceGG" }))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let (status, _) = send(
        &router,
        with_key(post(&uri, json!({ "winner": "AliceGG" })), "guess"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &router,
        with_key(post(&uri, json!({ "winner": "AliceGG" })), REFEREE_KEY),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "resolved");
    assert_eq!(body["duel"]["winner_id"], "alice");

    let (_, body) = send(
        &router,
        with_key(post(&uri, json!({ "winner": "BobTheBuilder" })), REFEREE_KEY),
    )
    .await;
    assert_eq!(body["outcome"], "already_resolved");
    assert_eq!(body["duel"]["winner_id"], "alice");
}

#[tokio::test]
async fn test_admin_deposit_and_game_flag() {
    let (_, router) = setup().await;

    let (status, _) = send(
        &router,
        post("/api/admin/accounts/bob/deposit", json!({ "amount": 100 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &router,
        with_key(
            post("/api/admin/accounts/bob/deposit", json!({ "amount": 100 })),
            ADMIN_KEY,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["balance"], 150);

    let balance = Request::builder()
        .uri("/api/accounts/bob/balance")
        .body(Body::empty())
        .unwrap();
    let (_, body) = send(&router, balance).await;
    assert_eq!(body["balance"], 150);

    let (status, body) = send(
        &router,
        with_key(
            post("/api/admin/flags", json!({ "key": "game:arena", "enabled": false })),
            ADMIN_KEY,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["flags"]["game:arena"], false);

    let (status, body) = send(&router, post("/api/duels", challenge_body(20))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "GAME_DISABLED");
}

#[tokio::test]
async fn test_link_conflict_and_queue() {
    let (_, router) = setup().await;

    let (status, body) = send(
        &router,
        post(
            "/api/accounts/link",
            json!({ "participant_id": "carol", "game": "arena", "username": "alicegg" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "USERNAME_TAKEN");

    let join = |participant: &str| {
        post(
            "/api/queue/join",
            json!({
                "participant_id": participant,
                "game": "arena",
                "wager": 10,
                "match_parameters": { "map": "temple", "region": "eu" }
            }),
        )
    };
    let (status, body) = send(&router, join("alice")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "waiting");
    assert_eq!(body["position"], 1);

    let (_, body) = send(&router, join("alice")).await;
    assert_eq!(body["status"], "already_queued");

    let (_, body) = send(&router, join("bob")).await;
    assert_eq!(body["status"], "matched");
    assert_eq!(body["duel"]["status"], "accepted");
    assert_eq!(body["duel"]["origin"], "quick_match");

    let list = Request::builder().uri("/api/queue").body(Body::empty()).unwrap();
    let (status, body) = send(&router, list).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}
