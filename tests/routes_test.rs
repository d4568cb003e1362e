mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::{pull_request_event, push_event, store_token, test_state, test_state_with_targets};
use pr_relay::database::models::NewToken;
use pr_relay::github::webhooks::{compute_signature, EVENT_HEADER, SIGNATURE_HEADER};
use pr_relay::relay::SendRequest;
use pr_relay::repos::{RelayDetails, Repo};
use pr_relay::server::{router, Service};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn call(app: Router, request: Request<Body>) -> (StatusCode, String, Option<String>) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let location = response
        .headers()
        .get(header::LOCATION)
        .map(|v| v.to_str().unwrap().to_string());
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap(), location)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, payload: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(payload).unwrap()))
        .unwrap()
}

#[tokio::test]
async fn test_health_names_service() {
    let github = MockServer::start().await;
    let app = router(Service::Sender, test_state(&github, &[]).await);

    let (status, body, _) = call(app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "sender");
}

#[tokio::test]
async fn test_localhost_redirect_keeps_path_and_query() {
    let github = MockServer::start().await;
    let app = router(Service::Sender, test_state(&github, &[]).await);

    let (status, _, location) = call(app, get("/localhost/token?code=abc&state=xyz")).await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(
        location.as_deref(),
        Some("http://localhost:8080/token?code=abc&state=xyz")
    );
}

#[tokio::test]
async fn test_manual_requires_arguments() {
    let github = MockServer::start().await;
    let state = test_state(&github, &[]).await;

    let (status, body, _) = call(router(Service::UpstreamSync, state.clone()), get("/manual")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Missing required \"repo\" argument.");

    let (status, body, _) = call(
        router(Service::UpstreamSync, state),
        get("/manual?repo=OpenROAD"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Missing required \"branch\" argument.");
}

#[tokio::test]
async fn test_push_to_untracked_branch_dispatches_nothing() {
    let github = MockServer::start().await;
    let state = test_state_with_targets(&github, &[], vec!["mithro".to_string()]).await;
    let app = router(Service::UpstreamSync, state);

    let (status, body, _) = call(
        app,
        post_json("/hook", &push_event("OpenROAD", "refs/heads/feature")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "[]");
    assert!(github.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_push_to_master_dispatches_to_every_installation() {
    let github = MockServer::start().await;
    for owner in ["mithro", "org"] {
        Mock::given(method("POST"))
            .and(path(format!(
                "/repos/{}/OpenROAD/actions/workflows/sync.yml/dispatches",
                owner
            )))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&github)
            .await;
    }
    let targets = vec!["mithro".to_string(), "org".to_string()];
    let state = test_state_with_targets(&github, &[], targets).await;

    let (status, body, _) = call(
        router(Service::UpstreamSync, state.clone()),
        post_json("/hook", &push_event("OpenROAD", "refs/heads/master")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let results: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(results["mithro"]["result"], "dispatched");
    assert_eq!(results["org"]["result"], "dispatched");

    let (_, body, _) = call(router(Service::UpstreamSync, state), get("/")).await;
    let listed: Vec<String> = serde_json::from_str(&body).unwrap();
    assert_eq!(listed, vec!["mithro".to_string(), "org".to_string()]);
}

#[tokio::test]
async fn test_push_without_ref_is_echoed() {
    let github = MockServer::start().await;
    let app = router(Service::UpstreamSync, test_state(&github, &[]).await);

    let (status, body, _) = call(app, post_json("/hook", &json!({"zen": "Keep it simple."}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("repository.name"));
    assert!(body.contains("\"zen\": \"Keep it simple.\""));
}

#[tokio::test]
async fn test_auth_hook_reports_unknown_events() {
    let github = MockServer::start().await;
    let app = router(Service::AuthCheck, test_state(&github, &[]).await);

    let mut request = post_json("/hook", &json!({"zen": "Design for failure.", "hook_id": 1}));
    request
        .headers_mut()
        .insert(EVENT_HEADER, "ping".parse().unwrap());
    let (status, body, _) = call(app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with("Unknown hook action?\n{\n  \"hook_id\": 1,"));
}

#[tokio::test]
async fn test_auth_hook_echoes_malformed_pull_request() {
    let github = MockServer::start().await;
    let app = router(Service::AuthCheck, test_state(&github, &[]).await);

    let mut payload = pull_request_event();
    payload["pull_request"]
        .as_object_mut()
        .unwrap()
        .remove("head");
    let (status, body, _) = call(app, post_json("/hook", &payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("\"pull_request\""));
}

#[tokio::test]
async fn test_auth_hook_runs_check() {
    let github = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/mithro/OpenROAD-1/commits/abc123/check-runs"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"total_count": 0, "check_runs": []})),
        )
        .mount(&github)
        .await;
    Mock::given(method("POST"))
        .and(path("/repos/mithro/OpenROAD-1/check-runs"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 42})))
        .expect(1)
        .mount(&github)
        .await;
    let app = router(Service::AuthCheck, test_state(&github, &[]).await);

    let (status, body, _) = call(app, post_json("/hook", &pull_request_event())).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with("Need to *create* this check."));
}

/// Mounts an empty check-run listing for the PR head and a create call that
/// must carry `conclusion`.
async fn mount_new_check(github: &MockServer, conclusion: &str) {
    Mock::given(method("GET"))
        .and(path("/repos/mithro/OpenROAD-1/commits/abc123/check-runs"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"total_count": 0, "check_runs": []})),
        )
        .mount(github)
        .await;
    Mock::given(method("POST"))
        .and(path("/repos/mithro/OpenROAD-1/check-runs"))
        .and(body_string_contains(format!("\"conclusion\":\"{}\"", conclusion)))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 42})))
        .expect(1)
        .mount(github)
        .await;
}

#[tokio::test]
async fn test_auth_hook_runs_check_for_review_events() {
    let github = MockServer::start().await;
    mount_new_check(&github, "action_required").await;
    let app = router(Service::AuthCheck, test_state(&github, &[]).await);

    let mut payload = pull_request_event();
    payload["action"] = json!("submitted");
    payload["review"] = json!({"state": "approved"});
    let mut request = post_json("/hook", &payload);
    request
        .headers_mut()
        .insert(EVENT_HEADER, "pull_request_review".parse().unwrap());
    let (status, body, _) = call(app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with("Need to *create* this check."));
}

#[tokio::test]
async fn test_auth_revoke_forgets_sender_and_returns_to_pull_request() {
    let github = MockServer::start().await;
    mount_new_check(&github, "action_required").await;
    let state = test_state(&github, &[]).await;
    store_token(&state.database, "mithro").await;
    let token = state.links.to_token(&common::pr_info());

    let (status, _, location) = call(
        router(Service::AuthCheck, state.clone()),
        get(&format!("/revoke?state={}", token)),
    )
    .await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(
        location.as_deref(),
        Some("https://github.com/mithro/OpenROAD-1/pull/2")
    );
    assert!(state.database.latest_token("mithro").await.unwrap().is_none());
}

#[tokio::test]
async fn test_auth_hook_redirect_reruns_check() {
    let github = MockServer::start().await;
    mount_new_check(&github, "success").await;
    let state = test_state(&github, &[]).await;
    store_token(&state.database, "mithro").await;
    let token = state.links.to_token(&common::pr_info());

    let (status, _, location) = call(
        router(Service::AuthCheck, state),
        get(&format!("/hook?state={}", token)),
    )
    .await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(
        location.as_deref(),
        Some("https://github.com/mithro/OpenROAD-1/pull/2")
    );
}

#[tokio::test]
async fn test_auth_routes_require_state() {
    let github = MockServer::start().await;
    let state = test_state(&github, &[]).await;

    for uri in ["/revoke", "/hook"] {
        let (status, _, _) = call(router(Service::AuthCheck, state.clone()), get(uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
    }
    assert!(github.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_webhook_secret_is_enforced() {
    let github = MockServer::start().await;
    let state = test_state(&github, &[("github_webhook_secret", "hook-secret")]).await;
    let payload = json!({"zen": "Approachable is better than simple."});

    let (status, _, _) = call(
        router(Service::AuthCheck, state.clone()),
        post_json("/hook", &payload),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut request = post_json("/hook", &payload);
    let signature = compute_signature("hook-secret", &serde_json::to_vec(&payload).unwrap());
    request
        .headers_mut()
        .insert(SIGNATURE_HEADER, signature.parse().unwrap());
    let (status, body, _) = call(router(Service::AuthCheck, state), request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with("Unknown hook action?"));
}

#[tokio::test]
async fn test_tampered_state_is_rejected() {
    let github = MockServer::start().await;
    let state = test_state(&github, &[]).await;
    let token = state.links.to_token(&common::pr_info());
    let mut tampered = token.clone().into_bytes();
    let middle = tampered.len() / 2;
    tampered[middle] = if tampered[middle] == b'A' { b'B' } else { b'A' };
    let tampered = String::from_utf8(tampered).unwrap();

    let (status, _, _) = call(
        router(Service::Sender, state),
        get(&format!("/auth?state={}", tampered)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_auth_redirects_to_github_for_pr_author() {
    let github = MockServer::start().await;
    let state = test_state(&github, &[]).await;
    let token = state.links.to_token(&common::pr_info());

    let (status, _, location) = call(
        router(Service::Sender, state),
        get(&format!("/auth?state={}", token)),
    )
    .await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    let location = location.unwrap();
    assert!(location.starts_with(&format!(
        "{}/login/oauth/authorize?client_id=Iv1.client",
        github.uri()
    )));
    assert!(location.contains("login=mithro"));
    assert!(location.contains("allow_signup=false"));
    assert!(location.contains("redirect_uri=https%3A%2F%2Fpr.example%2Ftoken"));
}

#[tokio::test]
async fn test_token_callback_stores_credentials_and_returns_to_check() {
    let github = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(common::token_response("ghu_callback")),
        )
        .mount(&github)
        .await;
    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"login": "mithro"})))
        .mount(&github)
        .await;
    let state = test_state(&github, &[]).await;
    let token = state.links.to_token(&common::pr_info());

    let (status, _, location) = call(
        router(Service::Sender, state.clone()),
        get(&format!("/token?state={}&code=abc", token)),
    )
    .await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert!(location.unwrap().starts_with("https://a.example/hook?state="));
    assert!(state.database.latest_token("mithro").await.unwrap().is_some());
}

#[tokio::test]
async fn test_sender_revoke_and_index() {
    let github = MockServer::start().await;
    let state = test_state(&github, &[]).await;
    store_token(&state.database, "mithro").await;
    let token = state.links.to_token(&common::pr_info());

    let (status, body, _) = call(
        router(Service::Sender, state.clone()),
        get(&format!("/?state={}", token)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<th>Login</th><td>mithro</td>"));

    let (status, body, _) = call(
        router(Service::Sender, state.clone()),
        get("/revoke?user=mithro"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Removed tokens for mithro");

    let (status, _, _) = call(
        router(Service::Sender, state),
        get(&format!("/?state={}", token)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_sender_hook_echoes_sorted_payload() {
    let github = MockServer::start().await;
    let app = router(Service::Sender, test_state(&github, &[]).await);

    let (status, body, _) = call(app, post_json("/hook", &json!({"b": 1, "a": {"d": 2, "c": 3}}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        "{\n  \"a\": {\n    \"c\": 3,\n    \"d\": 2\n  },\n  \"b\": 1\n}\n"
    );
}

#[tokio::test]
async fn test_sender_refresh_shows_before_and_after() {
    let github = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=ghr_stored"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(common::token_response("ghu_refreshed")),
        )
        .expect(1)
        .mount(&github)
        .await;
    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"login": "mithro"})))
        .mount(&github)
        .await;
    let state = test_state(&github, &[]).await;
    store_token(&state.database, "mithro").await;

    let (status, body, _) = call(
        router(Service::Sender, state.clone()),
        get("/refresh?user=mithro"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let before = body.find("<h1>Before Refresh</h1>").unwrap();
    let after = body.find("<h1>After Refresh</h1>").unwrap();
    assert!(before < after);
    assert_eq!(body.matches("<th>Login</th><td>mithro</td>").count(), 2);

    let latest = state.database.latest_token("mithro").await.unwrap().unwrap();
    assert_eq!(latest.access_token, "ghu_refreshed");
    assert_eq!(state.database.tokens_for_login("mithro").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_sender_refresh_unknown_user_is_not_found() {
    let github = MockServer::start().await;
    let app = router(Service::Sender, test_state(&github, &[]).await);

    let (status, _, _) = call(app, get("/refresh?user=octocat")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_send_renders_oauth_failure_page() {
    let github = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "error=bad_refresh_token&error_description=The+refresh+token+passed+is+incorrect+or+expired.&error_uri=https%3A%2F%2Fdocs.github.com%2Fapps",
        ))
        .mount(&github)
        .await;
    let state = test_state(&github, &[]).await;
    store_token(&state.database, "mithro").await;

    let repo = |owner: &str, name: &str, branch: &str| Repo {
        owner: owner.to_string(),
        repo: name.to_string(),
        branch: branch.to_string(),
        pr: None,
        sender: None,
    };
    let request = SendRequest {
        event_json: common::private_pull_request_event("send-upstream"),
        env: RelayDetails {
            private: Repo {
                pr: Some(12),
                sender: Some("mithro".to_string()),
                ..repo("org", "OpenROAD-private", "feature")
            },
            staging: repo("staging-org", "OpenROAD", "feature"),
            upstream: repo("The-OpenROAD-Project", "OpenROAD", "master"),
            pr_sha: Some("abc123".to_string()),
        },
    };

    let (status, body, _) = call(
        router(Service::Sender, state),
        post_json("/send", &serde_json::to_value(&request).unwrap()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains(
        "<a href=\"https://docs.github.com/apps\">The refresh token passed is incorrect or expired.</a>"
    ));
    assert!(body.contains("bad_refresh_token"));
}

#[tokio::test]
async fn test_index_renders_token_with_out_of_range_lifetime() {
    let github = MockServer::start().await;
    let state = test_state(&github, &[]).await;
    state
        .database
        .insert_token(&NewToken {
            login: "mithro".to_string(),
            access_token: "ghu_forever".to_string(),
            expires_in: i64::MAX,
            refresh_token: "ghr_forever".to_string(),
            refresh_token_expires_in: i64::MAX,
            token_type: "bearer".to_string(),
        })
        .await
        .unwrap();
    let token = state.links.to_token(&common::pr_info());

    let (status, body, _) = call(
        router(Service::Sender, state),
        get(&format!("/?state={}", token)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<td>never</td>"));
}
