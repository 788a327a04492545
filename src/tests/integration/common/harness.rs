//! Agent test harness
//!
//! Starts a `DiameterAgent` on an ephemeral port and gives tests a client
//! that has already exchanged capabilities.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use cgr_diameter::{
    avp_code, base_cmd, Avp, AvpData, CgrConfig, DiameterAgent, DiameterListener, DiameterMessage,
    DiameterTransport, Dictionary, BASE_APPLICATION_ID,
};
use tokio::task::JoinHandle;

use super::message::{CLIENT_HOST, CLIENT_REALM};
use super::sessions::MockSessions;

/// Agent configuration shared by the scenarios
pub const AGENT_CONFIG: &str = r#"
general:
  default_tenant: cgrates.org
  default_timezone: UTC
filters:
  FLTR_CCR: ["*string:~*vars.*cmd:CCR"]
diameter_agent:
  enabled: true
  listen: 127.0.0.1:3868
  origin_host: CGR-DA
  origin_realm: cgrates.org
  request_processors:
    - id: voice_init
      filters: ["FLTR_CCR", "*string:~*req.CC-Request-Type:1"]
      flags: ["*initiate", "*accounts"]
      request_fields:
        - { tag: OriginID, path: "*cgreq.OriginID", type: "*variable", value: "~*req.Session-Id", mandatory: true }
        - { tag: Account, path: "*cgreq.Account", type: "*variable", value: "~*req.Subscription-Id.Subscription-Id-Data", mandatory: true }
        - { tag: Usage, path: "*cgreq.Usage", type: "*variable", value: "~*req.Requested-Service-Unit.CC-Time:s/(.*)/${1}s/", mandatory: true }
      reply_fields:
        - { tag: CCATemplate, type: "*template", value: "*cca" }
        - { tag: GrantedUnits, path: "*rep.Granted-Service-Unit.CC-Time", type: "*variable", value: "~*cgrep.MaxUsage{*duration_seconds}" }
    - id: voice_event
      filters: ["FLTR_CCR", "*string:~*req.CC-Request-Type:4"]
      flags: ["*event", "*accounts", "*cdrs"]
      request_fields:
        - { tag: OriginID, path: "*cgreq.OriginID", type: "*variable", value: "~*req.Session-Id", mandatory: true }
        - { tag: Account, path: "*cgreq.Account", type: "*variable", value: "~*req.Subscription-Id.Subscription-Id-Data", mandatory: true }
        - { tag: Usage, path: "*cgreq.Usage", type: "*variable", value: "~*req.Used-Service-Unit.CC-Time:s/(.*)/${1}s/", mandatory: true }
      reply_fields:
        - { tag: CCATemplate, type: "*template", value: "*cca" }
"#;

/// Running agent bound to an ephemeral port
pub struct AgentHarness {
    pub addr: SocketAddr,
    pub sessions: Arc<MockSessions>,
    running: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl AgentHarness {
    /// Start with [`AGENT_CONFIG`]
    pub async fn start(sessions: MockSessions) -> Result<Self> {
        Self::start_with(CgrConfig::from_yaml(AGENT_CONFIG)?, sessions).await
    }

    pub async fn start_with(cfg: CgrConfig, sessions: MockSessions) -> Result<Self> {
        let _ = env_logger::try_init();
        cfg.validate().context("invalid test configuration")?;

        let sessions = Arc::new(sessions);
        let dict = Arc::new(Dictionary::builtin()?);
        let agent = Arc::new(DiameterAgent::new(&cfg, dict, sessions.clone())?);

        let listener = DiameterListener::bind(([127, 0, 0, 1], 0).into()).await?;
        let addr = listener.local_addr()?;
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = agent.serve(listener, flag).await {
                log::error!("agent stopped: {e}");
            }
        });

        Ok(Self {
            addr,
            sessions,
            running,
            task,
        })
    }

    /// Connect and complete the capabilities exchange
    pub async fn connect(&self) -> Result<TestClient> {
        let transport = DiameterTransport::connect(self.addr).await?;
        let mut client = TestClient { transport, next_id: 1 };
        let cea = client.request(base_request(base_cmd::CAPABILITIES_EXCHANGE)).await?;
        anyhow::ensure!(cea.result_code() == Some(2001), "CER rejected: {cea:?}");
        Ok(client)
    }

    pub async fn stop(self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.task.await;
    }
}

/// Client side of one connection
pub struct TestClient {
    transport: DiameterTransport,
    next_id: u32,
}

impl TestClient {
    /// Stamp fresh hop-by-hop and end-to-end ids and send; returns the hop-by-hop id
    pub async fn send(&mut self, mut msg: DiameterMessage) -> Result<u32> {
        let id = self.next_id;
        self.next_id += 1;
        msg.header.hop_by_hop_id = id;
        msg.header.end_to_end_id = id;
        self.transport.send(&msg).await?;
        Ok(id)
    }

    pub async fn recv(&mut self) -> Result<DiameterMessage> {
        Ok(self.transport.recv().await?)
    }

    /// Send and wait for the matching answer
    pub async fn request(&mut self, msg: DiameterMessage) -> Result<DiameterMessage> {
        let id = self.send(msg).await?;
        let answer = self.recv().await?;
        anyhow::ensure!(
            answer.header.hop_by_hop_id == id,
            "answer for {} while waiting for {id}",
            answer.header.hop_by_hop_id
        );
        Ok(answer)
    }
}

/// Base protocol request carrying the client origin
pub fn base_request(cmd: u32) -> DiameterMessage {
    let mut msg = DiameterMessage::new_request(cmd, BASE_APPLICATION_ID);
    msg.add_avp(Avp::mandatory(
        avp_code::ORIGIN_HOST,
        AvpData::DiameterIdentity(CLIENT_HOST.to_string()),
    ));
    msg.add_avp(Avp::mandatory(
        avp_code::ORIGIN_REALM,
        AvpData::DiameterIdentity(CLIENT_REALM.to_string()),
    ));
    msg
}
