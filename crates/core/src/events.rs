use crate::models::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Everything the gateway can deliver on its callback channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayCallback {
    /// Result of a login attempt: 0 on success, negative on failure.
    Login { code: i32 },
    /// Transaction response data is ready to be decoded.
    TransactionData(TransactionDataReady),
    /// Real-time quote for a registered code.
    RealData(RealTick),
    /// A stock entered or left a live condition.
    RealCondition {
        code: String,
        event_type: String,
        condition_name: String,
        condition_index: String,
    },
    /// Response to a condition search request.
    ConditionResult {
        screen_no: String,
        code_list: String,
        condition_name: String,
        condition_index: i32,
        next: i32,
    },
    /// The condition catalog was stored locally (ret_code 1) or not.
    ConditionCatalogSaved { ret_code: i32, catalog: String },
    /// Order acceptance / fill / balance notification.
    Chejan {
        gubun: String,
        item_count: i32,
        fid_list: String,
    },
    /// Free-form server message.
    Message(ServerMessage),
}

impl GatewayCallback {
    pub fn class(&self) -> CallbackClass {
        match self {
            GatewayCallback::Login { .. } => CallbackClass::Login,
            GatewayCallback::TransactionData(_) => CallbackClass::TransactionData,
            GatewayCallback::RealData(_) => CallbackClass::RealData,
            GatewayCallback::RealCondition { .. } => CallbackClass::RealCondition,
            GatewayCallback::ConditionResult { .. } => CallbackClass::ConditionResult,
            GatewayCallback::ConditionCatalogSaved { .. } => CallbackClass::ConditionCatalog,
            GatewayCallback::Chejan { .. } => CallbackClass::Chejan,
            GatewayCallback::Message(_) => CallbackClass::Message,
        }
    }
}

/// Class of a gateway callback, used to label pending requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackClass {
    Login,
    TransactionData,
    RealData,
    RealCondition,
    ConditionResult,
    ConditionCatalog,
    Chejan,
    Message,
}

impl fmt::Display for CallbackClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallbackClass::Login => "login",
            CallbackClass::TransactionData => "transaction_data",
            CallbackClass::RealData => "real_data",
            CallbackClass::RealCondition => "real_condition",
            CallbackClass::ConditionResult => "condition_result",
            CallbackClass::ConditionCatalog => "condition_catalog",
            CallbackClass::Chejan => "chejan",
            CallbackClass::Message => "message",
        };
        f.write_str(name)
    }
}

/// Header of a transaction-data callback. The records themselves are pulled
/// through a `TransactionDecoder`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDataReady {
    pub screen_no: String,
    pub rq_name: String,
    pub tr_code: String,
    pub record_name: String,
    pub prev_next: PrevNext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealTick {
    pub code: String,
    pub real_type: String,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMessage {
    pub screen_no: String,
    pub rq_name: String,
    pub tr_code: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Observer notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionEventType {
    Entered,
    Left,
}

impl ConditionEventType {
    /// The gateway marks entries with `"I"` and exits with `"D"`.
    pub fn from_raw(raw: &str) -> Option<Self> {
        match raw.trim() {
            "I" => Some(ConditionEventType::Entered),
            "D" => Some(ConditionEventType::Left),
            _ => None,
        }
    }
}

/// Membership change of a live condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionEvent {
    pub code: String,
    pub event_type: ConditionEventType,
    pub condition_name: String,
    pub condition_index: i32,
}

/// Result set of a condition search as handed to screen observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionResultEvent {
    pub screen_no: String,
    pub codes: Vec<String>,
    pub condition_name: String,
    pub condition_index: i32,
    pub has_more: bool,
}

/// What an order notification refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChejanKind {
    OrderFill,
    Balance,
    SpecialSignal,
    Other(String),
}

impl ChejanKind {
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim() {
            "0" => ChejanKind::OrderFill,
            "1" => ChejanKind::Balance,
            "3" => ChejanKind::SpecialSignal,
            other => ChejanKind::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChejanNotice {
    pub kind: ChejanKind,
    pub item_count: i32,
    pub fids: Vec<String>,
}

/// Structured event handed to registered observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    Condition(ConditionEvent),
    ConditionResult(ConditionResultEvent),
    RealData(RealTick),
    Chejan(ChejanNotice),
    Message(ServerMessage),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_event_type_from_raw() {
        assert_eq!(ConditionEventType::from_raw("I"), Some(ConditionEventType::Entered));
        assert_eq!(ConditionEventType::from_raw(" D"), Some(ConditionEventType::Left));
        assert_eq!(ConditionEventType::from_raw("X"), None);
    }

    #[test]
    fn test_callback_wire_format() {
        let cb = GatewayCallback::Login { code: -100 };
        let json = serde_json::to_string(&cb).unwrap();
        assert_eq!(json, r#"{"type":"login","code":-100}"#);

        let parsed: GatewayCallback = serde_json::from_str(
            r#"{"type":"transaction_data","screen_no":"0101","rq_name":"주식일봉","tr_code":"opt10081","record_name":"","prev_next":"next"}"#,
        )
        .unwrap();
        assert_eq!(parsed.class(), CallbackClass::TransactionData);
    }

    #[test]
    fn test_chejan_kind() {
        assert_eq!(ChejanKind::from_raw("0"), ChejanKind::OrderFill);
        assert_eq!(ChejanKind::from_raw("7"), ChejanKind::Other("7".into()));
    }
}
