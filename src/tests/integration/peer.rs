//! Base protocol integration tests

use std::time::Duration;

use cgr_diameter::cc::CcRequestType;
use cgr_diameter::{avp_code, base_cmd, Avp, AvpData, DiameterTransport};

use crate::common::{base_request, voice_ccr, AgentHarness, MockSessions};

#[tokio::test]
async fn test_watchdog_then_disconnect() {
    let harness = AgentHarness::start(MockSessions::granting(Duration::from_secs(60)))
        .await
        .unwrap();
    let mut client = harness.connect().await.unwrap();

    let dwa = client.request(base_request(base_cmd::DEVICE_WATCHDOG)).await.unwrap();
    assert_eq!(dwa.result_code(), Some(2001));
    assert_eq!(dwa.origin_host(), Some("CGR-DA"));

    let mut dpr = base_request(base_cmd::DISCONNECT_PEER);
    dpr.add_avp(Avp::mandatory(avp_code::DISCONNECT_CAUSE, AvpData::Enumerated(2)));
    let dpa = client.request(dpr).await.unwrap();
    assert_eq!(dpa.result_code(), Some(2001));

    // the agent closes its side after the DPA
    assert!(client.recv().await.is_err());

    harness.stop().await;
}

#[tokio::test]
async fn test_application_request_before_capabilities_closes_connection() {
    let harness = AgentHarness::start(MockSessions::granting(Duration::from_secs(60)))
        .await
        .unwrap();

    let mut transport = DiameterTransport::connect(harness.addr).await.unwrap();
    transport
        .send(&voice_ccr("early;1", CcRequestType::InitialRequest, 0, 60))
        .await
        .unwrap();
    assert!(transport.recv().await.is_err());
    assert!(harness.sessions.calls().is_empty());

    harness.stop().await;
}
