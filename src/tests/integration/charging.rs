//! Credit control integration tests
//!
//! CCRs go over TCP into a running agent backed by the mock session service.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cgr_agent::value::DataValue;
use cgr_agent::{CgrEvent, DataProvider, FullPath};
use cgr_diameter::cc::CcRequestType;
use cgr_diameter::{CgrConfig, DiameterDataProvider, DiameterMessage, Dictionary};

use crate::common::{event_ccr, voice_ccr, AgentHarness, MockSessions, AGENT_CONFIG};

/// Read an answer AVP by path, the way templates see it
fn read(msg: &DiameterMessage, path: &str) -> Option<String> {
    let dict = Arc::new(Dictionary::builtin().ok()?);
    let dp = DiameterDataProvider::new(msg.clone(), dict, None);
    dp.field_as_string(&FullPath::parse(path).ok()?).ok()
}

fn usage(event: &CgrEvent) -> Option<Duration> {
    event.get("Usage").and_then(|u| u.as_duration().ok())
}

#[tokio::test]
async fn test_initial_request_is_granted() {
    let harness = AgentHarness::start(MockSessions::granting(Duration::from_secs(300)))
        .await
        .unwrap();
    let mut client = harness.connect().await.unwrap();

    let cca = client
        .request(voice_ccr("voice;1", CcRequestType::InitialRequest, 0, 600))
        .await
        .unwrap();

    assert_eq!(cca.result_code(), Some(2001));
    assert!(!cca.header.is_error());
    assert_eq!(cca.session_id(), Some("voice;1"));
    assert_eq!(cca.origin_host(), Some("CGR-DA"));
    assert_eq!(read(&cca, "Granted-Service-Unit.CC-Time").as_deref(), Some("300"));
    assert_eq!(read(&cca, "CC-Request-Type").as_deref(), Some("1"));
    assert_eq!(read(&cca, "Auth-Application-Id").as_deref(), Some("4"));

    let calls = harness.sessions.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, "initiate_session");
    assert_eq!(
        calls[0].event.get("Account").map(|a| a.to_string()).as_deref(),
        Some("4986517174963")
    );
    assert_eq!(usage(&calls[0].event), Some(Duration::from_secs(600)));

    harness.stop().await;
}

#[tokio::test]
async fn test_unmatched_request_is_rejected() {
    let harness = AgentHarness::start(MockSessions::granting(Duration::from_secs(300)))
        .await
        .unwrap();
    let mut client = harness.connect().await.unwrap();

    let answer = client
        .request(voice_ccr("voice;2", CcRequestType::UpdateRequest, 1, 60))
        .await
        .unwrap();

    assert_eq!(answer.result_code(), Some(5012));
    assert!(answer.header.is_error());
    assert_eq!(answer.session_id(), Some("voice;2"));
    assert_eq!(answer.origin_realm(), Some("cgrates.org"));
    assert!(harness.sessions.calls().is_empty());

    harness.stop().await;
}

#[tokio::test]
async fn test_busy_backend_does_not_block_other_sessions() {
    let sessions = MockSessions::granting(Duration::from_secs(300))
        .busy_for("busy;1")
        .with_delay(Duration::from_millis(50));
    let harness = AgentHarness::start(sessions).await.unwrap();
    let mut client = harness.connect().await.unwrap();

    client
        .send(voice_ccr("busy;1", CcRequestType::InitialRequest, 0, 60))
        .await
        .unwrap();
    client
        .send(voice_ccr("ok;1", CcRequestType::InitialRequest, 0, 60))
        .await
        .unwrap();

    let mut codes = HashMap::new();
    for _ in 0..2 {
        let answer = client.recv().await.unwrap();
        codes.insert(answer.session_id().unwrap_or_default().to_string(), answer.result_code());
    }
    assert_eq!(codes["busy;1"], Some(3004));
    assert_eq!(codes["ok;1"], Some(2001));

    // the listener still takes new peers
    let mut other = harness.connect().await.unwrap();
    let cca = other
        .request(voice_ccr("ok;2", CcRequestType::InitialRequest, 0, 60))
        .await
        .unwrap();
    assert_eq!(cca.result_code(), Some(2001));

    harness.stop().await;
}

#[tokio::test]
async fn test_concurrency_cap_answers_too_busy() {
    let mut cfg = CgrConfig::from_yaml(AGENT_CONFIG).unwrap();
    cfg.diameter_agent.concurrent_requests = 1;
    let sessions = MockSessions::granting(Duration::from_secs(300)).with_delay(Duration::from_millis(200));
    let harness = AgentHarness::start_with(cfg, sessions).await.unwrap();
    let mut client = harness.connect().await.unwrap();

    for session_id in ["cap;1", "cap;2"] {
        client
            .send(voice_ccr(session_id, CcRequestType::InitialRequest, 0, 60))
            .await
            .unwrap();
    }
    let mut codes = Vec::new();
    for _ in 0..2 {
        let answer = client.recv().await.unwrap();
        codes.push(answer.result_code());
    }
    codes.sort();
    assert_eq!(codes, vec![Some(2001), Some(3004)]);

    harness.stop().await;
}

#[tokio::test]
async fn test_event_rating_error_zeroes_usage_before_cdr() {
    let sessions = MockSessions::granting(Duration::from_secs(300)).rating_error("INSUFFICIENT_CREDIT");
    let harness = AgentHarness::start(sessions).await.unwrap();
    let mut client = harness.connect().await.unwrap();

    let cca = client.request(event_ccr("sms;1", 120)).await.unwrap();
    assert_eq!(cca.result_code(), Some(5030));
    assert_eq!(cca.session_id(), Some("sms;1"));

    let calls = harness.sessions.calls();
    let methods: Vec<_> = calls.iter().map(|c| c.method).collect();
    assert_eq!(methods, vec!["process_event", "process_cdr"]);
    assert_eq!(usage(&calls[0].event), Some(Duration::from_secs(120)));
    assert_eq!(calls[1].event.get("Usage"), Some(&DataValue::Int(0)));

    harness.stop().await;
}
