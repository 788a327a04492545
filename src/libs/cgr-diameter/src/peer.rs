//! Diameter peer state machine per RFC 6733 Section 5.6, responder side
//!
//! Answers the base protocol on every accepted connection:
//! - Capabilities Exchange (CER/CEA) opens the peer
//! - Device Watchdog (DWR/DWA) keeps it alive
//! - Disconnect Peer (DPR/DPA) closes it
//!
//! Simplified state machine:
//!   WaitCER -> Open (received CER, sent CEA)
//!   Open -> Closed (received DPR, sent DPA)
//!
//! The peer never touches the socket; [`DiameterPeer::handle`] tells the
//! connection task what to do with each message.

use std::net::IpAddr;

use crate::avp::{Avp, AvpData};
use crate::common::{avp_code, origin_state_id};
use crate::error::{DiameterError, DiameterResult, ResultCode};
use crate::message::{base_cmd, DiameterMessage};

/// Peer connection state per RFC 6733
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// No connection
    Closed,
    /// Responder: waiting for incoming CER
    WaitCER,
    /// Capabilities exchanged, connection is operational
    Open,
}

/// Disconnect cause values for DPR (RFC 6733 Section 5.4.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DisconnectCause {
    Rebooting = 0,
    Busy = 1,
    DoNotWantToTalkToYou = 2,
    Unknown = u32::MAX,
}

impl From<u32> for DisconnectCause {
    fn from(value: u32) -> Self {
        match value {
            0 => DisconnectCause::Rebooting,
            1 => DisconnectCause::Busy,
            2 => DisconnectCause::DoNotWantToTalkToYou,
            _ => DisconnectCause::Unknown,
        }
    }
}

/// What the connection must do after a message went through the peer
#[derive(Debug, PartialEq)]
pub enum PeerAction {
    /// Write this answer and keep reading
    Answer(DiameterMessage),
    /// Write this answer, then close the connection
    AnswerAndClose(DiameterMessage),
    /// Application message for the agent
    Dispatch(DiameterMessage),
    /// Nothing to send
    Ignore,
}

/// Identity advertised to remote peers
#[derive(Debug, Clone)]
pub struct LocalPeer {
    pub origin_host: String,
    pub origin_realm: String,
    pub vendor_id: u32,
    pub product_name: String,
    pub host_ip: Option<IpAddr>,
    /// Applications announced in the CEA
    pub auth_application_ids: Vec<u32>,
    pub origin_state_id: u32,
}

impl LocalPeer {
    pub fn new(origin_host: &str, origin_realm: &str) -> Self {
        Self {
            origin_host: origin_host.to_string(),
            origin_realm: origin_realm.to_string(),
            vendor_id: 0,
            product_name: String::new(),
            host_ip: None,
            auth_application_ids: Vec::new(),
            origin_state_id: origin_state_id(),
        }
    }

    /// Answer to `req` carrying Result-Code and the local origin
    pub fn answer(&self, req: &DiameterMessage, code: ResultCode) -> DiameterMessage {
        let mut ans = DiameterMessage::answer_with_result(req, code as u32);
        ans.add_avp(Avp::mandatory(
            avp_code::ORIGIN_HOST,
            AvpData::DiameterIdentity(self.origin_host.clone()),
        ));
        ans.add_avp(Avp::mandatory(
            avp_code::ORIGIN_REALM,
            AvpData::DiameterIdentity(self.origin_realm.clone()),
        ));
        ans
    }
}

/// Diameter peer representing a single accepted connection
#[derive(Debug)]
pub struct DiameterPeer {
    local: LocalPeer,
    state: PeerState,
    remote_host: Option<String>,
    remote_realm: Option<String>,
}

impl DiameterPeer {
    /// Create a new peer for an accepted connection (responder side)
    pub fn new_responder(local: LocalPeer) -> Self {
        Self {
            local,
            state: PeerState::WaitCER,
            remote_host: None,
            remote_realm: None,
        }
    }

    /// Get the current peer state
    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Get the remote peer's Origin-Host (available after CER)
    pub fn remote_host(&self) -> Option<&str> {
        self.remote_host.as_deref()
    }

    /// Get the remote peer's Origin-Realm (available after CER)
    pub fn remote_realm(&self) -> Option<&str> {
        self.remote_realm.as_deref()
    }

    /// Run a received message through the state machine
    ///
    /// Base protocol messages are answered here; application requests on an
    /// open peer are handed back for dispatch.
    pub fn handle(&mut self, msg: DiameterMessage) -> DiameterResult<PeerAction> {
        let cmd = msg.header.command_code;
        let is_request = msg.header.is_request();

        match (self.state, cmd, is_request) {
            (PeerState::WaitCER, base_cmd::CAPABILITIES_EXCHANGE, true) => self.handle_cer(&msg),
            (PeerState::Open, base_cmd::DEVICE_WATCHDOG, true) => Ok(self.handle_dwr(&msg)),
            (PeerState::Open, base_cmd::DEVICE_WATCHDOG, false) => Ok(PeerAction::Ignore),
            (PeerState::Open, base_cmd::DISCONNECT_PEER, true) => Ok(self.handle_dpr(&msg)),
            (PeerState::Open, _, true) => Ok(PeerAction::Dispatch(msg)),
            (PeerState::Open, _, false) => {
                log::debug!("Ignoring unsolicited answer for command {cmd}");
                Ok(PeerAction::Ignore)
            }
            _ => Err(DiameterError::Protocol(format!(
                "unexpected command {} (request={}) in state {:?}",
                cmd, is_request, self.state
            ))),
        }
    }

    /// Handle incoming CER: validate and respond with CEA
    fn handle_cer(&mut self, cer: &DiameterMessage) -> DiameterResult<PeerAction> {
        let origin_host = cer
            .origin_host()
            .ok_or_else(|| DiameterError::MissingAvp("Origin-Host".into()))?
            .to_string();
        let origin_realm = cer
            .origin_realm()
            .ok_or_else(|| DiameterError::MissingAvp("Origin-Realm".into()))?
            .to_string();

        let local = &self.local;
        let mut cea = local.answer(cer, ResultCode::Success);
        if let Some(ip) = local.host_ip {
            cea.add_avp(Avp::mandatory(avp_code::HOST_IP_ADDRESS, AvpData::Address(ip)));
        }
        cea.add_avp(Avp::mandatory(avp_code::VENDOR_ID, AvpData::Unsigned32(local.vendor_id)));
        cea.add_avp(Avp::new(
            avp_code::PRODUCT_NAME,
            0,
            None,
            AvpData::Utf8String(local.product_name.clone()),
        ));
        cea.add_avp(Avp::mandatory(
            avp_code::ORIGIN_STATE_ID,
            AvpData::Unsigned32(local.origin_state_id),
        ));
        for app_id in &local.auth_application_ids {
            cea.add_avp(Avp::mandatory(avp_code::AUTH_APPLICATION_ID, AvpData::Unsigned32(*app_id)));
        }

        log::info!("Peer established: host={origin_host}, realm={origin_realm}");
        self.remote_host = Some(origin_host);
        self.remote_realm = Some(origin_realm);
        self.state = PeerState::Open;
        Ok(PeerAction::Answer(cea))
    }

    /// Handle incoming DWR: respond with DWA
    fn handle_dwr(&self, dwr: &DiameterMessage) -> PeerAction {
        let mut dwa = self.local.answer(dwr, ResultCode::Success);
        dwa.add_avp(Avp::mandatory(
            avp_code::ORIGIN_STATE_ID,
            AvpData::Unsigned32(self.local.origin_state_id),
        ));
        PeerAction::Answer(dwa)
    }

    /// Handle incoming DPR: respond with DPA and close
    fn handle_dpr(&mut self, dpr: &DiameterMessage) -> PeerAction {
        let cause = dpr
            .find_avp(avp_code::DISCONNECT_CAUSE)
            .and_then(Avp::as_u32)
            .map(DisconnectCause::from);
        log::info!("Peer {:?} disconnecting, cause {:?}", self.remote_host, cause);
        self.state = PeerState::Closed;
        PeerAction::AnswerAndClose(self.local.answer(dpr, ResultCode::Success))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::BASE_APPLICATION_ID;

    fn local() -> LocalPeer {
        let mut local = LocalPeer::new("cgr.example.org", "example.org");
        local.auth_application_ids = vec![4];
        local.product_name = "CGRateS".into();
        local
    }

    fn base_request(cmd: u32) -> DiameterMessage {
        let mut msg = DiameterMessage::new_request(cmd, BASE_APPLICATION_ID);
        msg.header.hop_by_hop_id = 7;
        msg.add_avp(Avp::mandatory(
            avp_code::ORIGIN_HOST,
            AvpData::DiameterIdentity("gw.example.org".into()),
        ));
        msg.add_avp(Avp::mandatory(
            avp_code::ORIGIN_REALM,
            AvpData::DiameterIdentity("example.org".into()),
        ));
        msg
    }

    #[test]
    fn test_capabilities_exchange() {
        let mut peer = DiameterPeer::new_responder(local());
        let PeerAction::Answer(cea) = peer.handle(base_request(base_cmd::CAPABILITIES_EXCHANGE)).unwrap() else {
            panic!("expected CEA");
        };
        assert_eq!(cea.result_code(), Some(2001));
        assert_eq!(cea.header.hop_by_hop_id, 7);
        assert_eq!(cea.origin_host(), Some("cgr.example.org"));
        assert_eq!(cea.find_avp(avp_code::AUTH_APPLICATION_ID).and_then(Avp::as_u32), Some(4));
        cea.verify_length().unwrap();
        assert_eq!(peer.state(), PeerState::Open);
        assert_eq!(peer.remote_host(), Some("gw.example.org"));
    }

    #[test]
    fn test_application_message_requires_open_peer() {
        let mut peer = DiameterPeer::new_responder(local());
        let ccr = DiameterMessage::new_request(272, 4);
        assert!(peer.handle(ccr.clone()).is_err());

        peer.handle(base_request(base_cmd::CAPABILITIES_EXCHANGE)).unwrap();
        assert_eq!(peer.handle(ccr.clone()).unwrap(), PeerAction::Dispatch(ccr));
    }

    #[test]
    fn test_watchdog_and_disconnect() {
        let mut peer = DiameterPeer::new_responder(local());
        peer.handle(base_request(base_cmd::CAPABILITIES_EXCHANGE)).unwrap();

        let action = peer.handle(base_request(base_cmd::DEVICE_WATCHDOG)).unwrap();
        assert!(matches!(action, PeerAction::Answer(ref dwa) if dwa.result_code() == Some(2001)));

        let mut dpr = base_request(base_cmd::DISCONNECT_PEER);
        dpr.add_avp(Avp::mandatory(avp_code::DISCONNECT_CAUSE, AvpData::Enumerated(0)));
        let action = peer.handle(dpr).unwrap();
        assert!(matches!(action, PeerAction::AnswerAndClose(_)));
        assert_eq!(peer.state(), PeerState::Closed);
    }

    #[test]
    fn test_cer_without_origin_fails() {
        let mut peer = DiameterPeer::new_responder(local());
        let cer = DiameterMessage::new_request(base_cmd::CAPABILITIES_EXCHANGE, BASE_APPLICATION_ID);
        assert!(matches!(peer.handle(cer), Err(DiameterError::MissingAvp(_))));
        assert_eq!(peer.state(), PeerState::WaitCER);
    }
}
