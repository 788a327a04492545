//! Diameter Credit-Control application (RFC 4006)
//!
//! Codes and request builders for CCR traffic; the agent itself reads and
//! writes these AVPs by name through the dictionary.

use crate::avp::{Avp, AvpData};
use crate::common::{avp_code, SubscriptionIdType};
use crate::message::DiameterMessage;

/// Credit-Control Application ID
pub const CC_APPLICATION_ID: u32 = 4;

/// Credit-Control command codes
pub mod cmd {
    /// Credit-Control-Request/Answer
    pub const CREDIT_CONTROL: u32 = 272;
}

/// Credit-Control AVP codes
pub mod avp {
    pub const CC_REQUEST_NUMBER: u32 = 415;
    pub const CC_REQUEST_TYPE: u32 = 416;
    pub const CC_TIME: u32 = 420;
    pub const CC_TOTAL_OCTETS: u32 = 421;
    pub const FINAL_UNIT_INDICATION: u32 = 430;
    pub const GRANTED_SERVICE_UNIT: u32 = 431;
    pub const RATING_GROUP: u32 = 432;
    pub const REQUESTED_SERVICE_UNIT: u32 = 437;
    pub const SERVICE_IDENTIFIER: u32 = 439;
    pub const SUBSCRIPTION_ID: u32 = 443;
    pub const SUBSCRIPTION_ID_DATA: u32 = 444;
    pub const USED_SERVICE_UNIT: u32 = 446;
    pub const FINAL_UNIT_ACTION: u32 = 449;
    pub const SUBSCRIPTION_ID_TYPE: u32 = 450;
    pub const MULTIPLE_SERVICES_CREDIT_CONTROL: u32 = 456;
    pub const SERVICE_CONTEXT_ID: u32 = 461;
}

/// CC-Request-Type values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CcRequestType {
    InitialRequest = 1,
    UpdateRequest = 2,
    TerminationRequest = 3,
    EventRequest = 4,
}

impl From<u32> for CcRequestType {
    fn from(value: u32) -> Self {
        match value {
            2 => CcRequestType::UpdateRequest,
            3 => CcRequestType::TerminationRequest,
            4 => CcRequestType::EventRequest,
            _ => CcRequestType::InitialRequest,
        }
    }
}

/// Create a Credit-Control-Request (CCR) with its mandatory AVPs
pub fn create_ccr(
    session_id: &str,
    origin_host: &str,
    origin_realm: &str,
    destination_realm: &str,
    cc_request_type: CcRequestType,
    cc_request_number: u32,
) -> DiameterMessage {
    let mut msg = DiameterMessage::new_request(cmd::CREDIT_CONTROL, CC_APPLICATION_ID);

    msg.add_avp(Avp::mandatory(
        avp_code::SESSION_ID,
        AvpData::Utf8String(session_id.to_string()),
    ));
    msg.add_avp(Avp::mandatory(
        avp_code::ORIGIN_HOST,
        AvpData::DiameterIdentity(origin_host.to_string()),
    ));
    msg.add_avp(Avp::mandatory(
        avp_code::ORIGIN_REALM,
        AvpData::DiameterIdentity(origin_realm.to_string()),
    ));
    msg.add_avp(Avp::mandatory(
        avp_code::DESTINATION_REALM,
        AvpData::DiameterIdentity(destination_realm.to_string()),
    ));
    msg.add_avp(Avp::mandatory(
        avp_code::AUTH_APPLICATION_ID,
        AvpData::Unsigned32(CC_APPLICATION_ID),
    ));
    msg.add_avp(Avp::mandatory(
        avp::CC_REQUEST_TYPE,
        AvpData::Enumerated(cc_request_type as i32),
    ));
    msg.add_avp(Avp::mandatory(
        avp::CC_REQUEST_NUMBER,
        AvpData::Unsigned32(cc_request_number),
    ));

    msg
}

/// Subscription-Id group
pub fn subscription_id(id_type: SubscriptionIdType, data: &str) -> Avp {
    Avp::mandatory(
        avp::SUBSCRIPTION_ID,
        AvpData::Grouped(vec![
            Avp::mandatory(avp::SUBSCRIPTION_ID_TYPE, AvpData::Enumerated(id_type as i32)),
            Avp::mandatory(avp::SUBSCRIPTION_ID_DATA, AvpData::Utf8String(data.to_string())),
        ]),
    )
}

/// Service unit group (`Requested-`, `Used-` or `Granted-Service-Unit`)
/// holding a CC-Time
pub fn service_unit_time(code: u32, seconds: u32) -> Avp {
    Avp::mandatory(
        code,
        AvpData::Grouped(vec![Avp::mandatory(avp::CC_TIME, AvpData::Unsigned32(seconds))]),
    )
}

/// Multiple-Services-Credit-Control block for one rating group
pub fn mscc(rating_group: u32, units: Vec<Avp>) -> Avp {
    let mut children = vec![Avp::mandatory(avp::RATING_GROUP, AvpData::Unsigned32(rating_group))];
    children.extend(units);
    Avp::mandatory(avp::MULTIPLE_SERVICES_CREDIT_CONTROL, AvpData::Grouped(children))
}
