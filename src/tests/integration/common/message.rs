//! Credit-Control-Request builders

use cgr_diameter::cc::{self, avp, CcRequestType};
use cgr_diameter::{DiameterMessage, SubscriptionIdType};

pub const CLIENT_HOST: &str = "gw.example.org";
pub const CLIENT_REALM: &str = "example.org";

/// Voice CCR with a subscriber and the requested seconds
pub fn voice_ccr(session_id: &str, request_type: CcRequestType, number: u32, requested_secs: u32) -> DiameterMessage {
    let mut ccr = cc::create_ccr(session_id, CLIENT_HOST, CLIENT_REALM, "cgrates.org", request_type, number);
    ccr.add_avp(cc::subscription_id(SubscriptionIdType::EndUserE164, "4986517174963"));
    ccr.add_avp(cc::service_unit_time(avp::REQUESTED_SERVICE_UNIT, requested_secs));
    ccr
}

/// One-shot event CCR reporting used seconds
pub fn event_ccr(session_id: &str, used_secs: u32) -> DiameterMessage {
    let mut ccr = cc::create_ccr(session_id, CLIENT_HOST, CLIENT_REALM, "cgrates.org", CcRequestType::EventRequest, 0);
    ccr.add_avp(cc::subscription_id(SubscriptionIdType::EndUserE164, "4986517174963"));
    ccr.add_avp(cc::service_unit_time(avp::USED_SERVICE_UNIT, used_secs));
    ccr
}
