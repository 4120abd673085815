use airzone_cloud::{AirzoneClient, DeviceMode, Error, SetpointField, Temperature, Units};
use reqwest::Method;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_partial_json, header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> AirzoneClient {
    AirzoneClient::builder("user@example.com", "hunter2")
        .base_url(Url::parse(&server.uri()).unwrap())
        .build()
}

fn login_mock(token: &str) -> Mock {
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": token,
            "refreshToken": format!("{token}-refresh"),
        })))
}

#[tokio::test]
async fn login_stores_token_pair() {
    let server = MockServer::start().await;
    login_mock("tok-1").expect(1).mount(&server).await;

    let client = client_for(&server);
    let token = client.login().await.expect("login should succeed");
    assert_eq!(token, "tok-1");
    assert_eq!(client.token_watch().borrow().as_deref(), Some("tok-1"));
}

#[tokio::test]
async fn login_failure_is_auth_error_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"msg": "bad credentials"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.login().await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)), "got {err:?}");
}

#[tokio::test]
async fn first_request_logs_in_automatically() {
    let server = MockServer::start().await;
    login_mock("tok-1").expect(1).mount(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/installations"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "installations": [{"installation_id": "inst1", "name": "Home"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let installations = client.installations().await.unwrap();
    assert_eq!(installations.len(), 1);
    assert_eq!(installations[0].id, "inst1");
    assert_eq!(installations[0].name, "Home");
}

#[tokio::test]
async fn single_401_refreshes_and_replays_once() {
    let server = MockServer::start().await;
    login_mock("tok-1").expect(1).mount(&server).await;

    // First call with the stale token fails, the replay with tok-2 works.
    Mock::given(method("GET"))
        .and(path("/api/v1/installations"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"/api/v1/auth/refreshToken/.+"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "tok-2",
            "refreshToken": "tok-2-refresh",
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/installations"))
        .and(header("authorization", "Bearer tok-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"installations": []})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client.login().await.unwrap();
    let installations = client.installations().await.unwrap();
    assert!(installations.is_empty());
    // The new token pair is published for the realtime client.
    assert_eq!(client.token_watch().borrow().as_deref(), Some("tok-2"));
}

#[tokio::test]
async fn second_401_after_replay_is_auth_error() {
    let server = MockServer::start().await;
    login_mock("tok-1").mount(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/installations"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2) // original + exactly one replay, never a loop
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"/api/v1/auth/refreshToken/.+"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "tok-2",
            "refreshToken": "tok-2-refresh",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client.login().await.unwrap();
    let err = client.installations().await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)), "got {err:?}");
}

#[tokio::test]
async fn failed_refresh_falls_back_to_relogin() {
    let server = MockServer::start().await;
    login_mock("tok-1").expect(2).mount(&server).await; // initial + fallback
    Mock::given(method("GET"))
        .and(path_regex(r"/api/v1/auth/refreshToken/.+"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    let unauthorized = Mock::given(method("GET"))
        .and(path("/api/v1/user"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount_as_scoped(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_id": "u1",
            "email": "user@example.com",
            "config": {"units": 1}
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    client.login().await.unwrap();
    let user = client.user().await.unwrap();
    assert_eq!(user.config.unwrap().units, Units::Fahrenheit);
    drop(unauthorized);
}

#[tokio::test]
async fn non_401_error_carries_status_and_body() {
    let server = MockServer::start().await;
    login_mock("tok-1").mount(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/installations"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({"msg": "internal error"})),
        )
        .expect(1) // server errors are not retried by this layer
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.installations().await.unwrap_err();
    match err {
        Error::Api { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body.unwrap()["msg"], "internal error");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn patch_returning_204_succeeds() {
    let server = MockServer::start().await;
    login_mock("tok-1").mount(&server).await;
    Mock::given(method("PATCH"))
        .and(path("/api/v1/user"))
        .and(body_partial_json(json!({"units": 1})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client.set_user_units(Units::Fahrenheit).await.unwrap();
}

#[tokio::test]
async fn device_patch_carries_param_value_and_units() {
    let server = MockServer::start().await;
    login_mock("tok-1").mount(&server).await;
    Mock::given(method("PATCH"))
        .and(path("/api/v1/devices/d1"))
        .and(body_partial_json(json!({
            "param": "setpoint_air_heat",
            "value": 21.5,
            "installation_id": "inst1",
            "opts": {"units": 0}
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client
        .set_device_setpoint(
            "d1",
            "inst1",
            SetpointField::Heat,
            Temperature::from_celsius(21.5),
            Units::Celsius,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn group_stop_uses_put_with_mode_params() {
    let server = MockServer::start().await;
    login_mock("tok-1").mount(&server).await;
    Mock::given(method("PUT"))
        .and(path("/api/v1/installations/inst1/group/g1"))
        .and(body_partial_json(json!({"params": {"mode": 0}})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client
        .set_group_mode("inst1", "g1", DeviceMode::Stop)
        .await
        .unwrap();
}

#[tokio::test]
async fn webserver_status_injects_id() {
    let server = MockServer::start().await;
    login_mock("tok-1").mount(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/devices/ws/ws1/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "config": {"mac": "AA:BB:CC", "ws_fw": "3.44"},
            "status": {"isConnected": true}
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let webserver = client.webserver_status("inst1", "ws1", false).await.unwrap();
    assert_eq!(webserver.id, "ws1");
    assert_eq!(webserver.config.unwrap().mac.as_deref(), Some("AA:BB:CC"));
}

#[tokio::test]
async fn malformed_payload_is_rejected() {
    let server = MockServer::start().await;
    login_mock("tok-1").mount(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/installations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"unexpected": true})))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.installations().await.unwrap_err();
    assert!(matches!(err, Error::Malformed { .. }), "got {err:?}");
}

#[tokio::test]
async fn raw_request_returns_parsed_json() {
    let server = MockServer::start().await;
    login_mock("tok-1").mount(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/devices/d1/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "device_id": "d1",
            "power": true,
            "mode": 3,
            "local_temp": {"celsius": 21.0, "fah": 69.8},
            "setpoint_air_heat": {"celsius": 22.0, "fah": 71.6}
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let value = client
        .request(
            Method::GET,
            "/api/v1/devices/d1/status",
            &[("installation_id", "inst1".to_string())],
            None,
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(value["power"], true);

    let status = client.device_status("d1", "inst1").await.unwrap();
    assert_eq!(status.power, Some(true));
    assert_eq!(status.mode, Some(3));
    let setpoint = status.active_setpoint().unwrap().unwrap();
    assert!((setpoint.celsius() - 22.0).abs() < 0.01);
}
