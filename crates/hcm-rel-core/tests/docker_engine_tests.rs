//! ---
//! hcm_section: "02-monitoring-engine"
//! hcm_subsection: "tests"
//! hcm_type: "source"
//! hcm_scope: "code"
//! hcm_description: "Docker Engine client against a mocked engine API."
//! hcm_version: "v0.1.0"
//! hcm_owner: "tbd"
//! ---
use hcm_rel_core::{ContainerRuntime, DockerEngine, RuntimeError};
use serde_json::json;
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn engine(server: &MockServer) -> DockerEngine {
    DockerEngine::new(Url::parse(&server.uri()).unwrap()).unwrap()
}

#[tokio::test]
async fn ping_and_inspect_state() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_ping"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/containers/hcm-redis/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Id": "abc123",
            "State": { "Status": "running", "Running": true, "Pid": 42 }
        })))
        .mount(&server)
        .await;

    let engine = engine(&server);
    engine.ping().await.unwrap();
    let state = engine.state("hcm-redis").await.unwrap();
    assert!(state.running);
    assert_eq!(state.status, "running");
}

#[tokio::test]
async fn stop_and_start_accept_not_modified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/containers/neo4j/stop"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/containers/neo4j/start"))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(&server);
    engine.stop("neo4j").await.unwrap();
    engine.start("neo4j").await.unwrap();
}

#[tokio::test]
async fn missing_container_maps_to_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/containers/ghost/json"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({ "message": "No such container: ghost" })),
        )
        .mount(&server)
        .await;

    let err = engine(&server).state("ghost").await.unwrap_err();
    assert!(matches!(err, RuntimeError::NotFound(name) if name == "ghost"));
}

#[tokio::test]
async fn server_errors_carry_engine_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/containers/hcm-postgres/start"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({ "message": "port is already allocated" })),
        )
        .mount(&server)
        .await;

    let err = engine(&server).start("hcm-postgres").await.unwrap_err();
    match err {
        RuntimeError::Api {
            container,
            status,
            message,
        } => {
            assert_eq!(container, "hcm-postgres");
            assert_eq!(status, 500);
            assert_eq!(message, "port is already allocated");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn one_shot_stats_are_decoded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/containers/hcm-postgres/stats"))
        .and(query_param("stream", "false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "cpu_stats": { "cpu_usage": { "total_usage": 1500 }, "system_cpu_usage": 12000 },
            "precpu_stats": { "cpu_usage": { "total_usage": 1000 }, "system_cpu_usage": 10000 },
            "memory_stats": { "usage": 256, "limit": 1024 }
        })))
        .mount(&server)
        .await;

    let stats = engine(&server).stats("hcm-postgres").await.unwrap();
    assert_eq!(stats.cpu_total_usage, 1500);
    assert_eq!(stats.precpu_total_usage, 1000);
    assert_eq!(stats.system_cpu_usage, 12000);
    assert_eq!(stats.presystem_cpu_usage, 10000);
    assert_eq!(stats.memory_usage, 256);
    assert_eq!(stats.memory_limit, 1024);
}
