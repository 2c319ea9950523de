use kwbridge_core::{
    ConditionSearchMode, GatewayCallback, LiveSubscription, MetadataQuery, MultiQuoteRequest,
    OrderRequest, TransactionDataReady, TransactionRecords, TransactionRequest,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Frames larger than this are treated as a corrupt stream.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Remote operations the helper process exposes, one per control method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Invocation {
    CommConnect,
    GetConnectState,
    GetLoginInfo {
        tag: String,
    },
    CommRqData {
        rq_name: String,
        tr_code: String,
        screen_no: String,
        prev_next: i32,
        /// Applied with SetInputValue before the request, in order.
        inputs: Vec<(String, String)>,
    },
    CommKwRqData {
        rq_name: String,
        screen_no: String,
        code_list: String,
        code_count: usize,
        type_flag: i32,
        prev_next: i32,
    },
    SetRealReg {
        screen_no: String,
        code_list: String,
        fid_list: String,
        reg_type: String,
    },
    SetRealRemove {
        screen_no: String,
        code: String,
    },
    SendOrder {
        rq_name: String,
        screen_no: String,
        account_no: String,
        order_type: i32,
        code: String,
        quantity: u32,
        price: Decimal,
        hoga: String,
        original_order_no: String,
    },
    GetConditionLoad,
    SendCondition {
        screen_no: String,
        name: String,
        index: i32,
        search_type: i32,
    },
    SendConditionStop {
        screen_no: String,
        name: String,
        index: i32,
    },
    Metadata {
        query: MetadataQuery,
    },
}

impl Invocation {
    pub fn request(request: &TransactionRequest) -> Self {
        Invocation::CommRqData {
            rq_name: request.rq_name.clone(),
            tr_code: request.tr_code.clone(),
            screen_no: request.screen_no.clone(),
            prev_next: request.prev_next.code(),
            inputs: request.inputs.clone(),
        }
    }

    pub fn multi_quote(request: &MultiQuoteRequest) -> Self {
        Invocation::CommKwRqData {
            rq_name: request.rq_name.clone(),
            screen_no: request.screen_no.clone(),
            code_list: request.code_list(),
            code_count: request.codes.len(),
            type_flag: request.type_flag(),
            prev_next: request.prev_next.code(),
        }
    }

    pub fn live(subscription: &LiveSubscription) -> Self {
        Invocation::SetRealReg {
            screen_no: subscription.screen_no.clone(),
            code_list: subscription.code_list(),
            fid_list: subscription.fid_list(),
            reg_type: subscription.reg_type().to_string(),
        }
    }

    pub fn order(order: &OrderRequest) -> Self {
        Invocation::SendOrder {
            rq_name: order.rq_name.clone(),
            screen_no: order.screen_no.clone(),
            account_no: order.account_no.clone(),
            order_type: order.kind.code(),
            code: order.code.clone(),
            quantity: order.quantity,
            price: order.wire_price(),
            hoga: order.price_type.code().to_string(),
            original_order_no: order.original_order_no.clone().unwrap_or_default(),
        }
    }

    pub fn condition(screen_no: &str, name: &str, index: i32, mode: ConditionSearchMode) -> Self {
        Invocation::SendCondition {
            screen_no: screen_no.to_string(),
            name: name.to_string(),
            index,
            search_type: mode.code(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Invocation::CommConnect => "comm_connect",
            Invocation::GetConnectState => "get_connect_state",
            Invocation::GetLoginInfo { .. } => "get_login_info",
            Invocation::CommRqData { .. } => "comm_rq_data",
            Invocation::CommKwRqData { .. } => "comm_kw_rq_data",
            Invocation::SetRealReg { .. } => "set_real_reg",
            Invocation::SetRealRemove { .. } => "set_real_remove",
            Invocation::SendOrder { .. } => "send_order",
            Invocation::GetConditionLoad => "get_condition_load",
            Invocation::SendCondition { .. } => "send_condition",
            Invocation::SendConditionStop { .. } => "send_condition_stop",
            Invocation::Metadata { .. } => "metadata",
        }
    }
}

/// Frame sent to the helper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub seq: u64,
    pub call: Invocation,
}

/// Frames received from the helper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Handshake sent once the helper's control is ready.
    Connected { version: String },
    /// Immediate result of the invocation with the same `seq`.
    Reply {
        seq: u64,
        code: i32,
        #[serde(default)]
        text: String,
    },
    /// The invocation with `seq` could not be executed.
    Error {
        #[serde(default)]
        seq: Option<u64>,
        message: String,
    },
    /// Transaction data with its decoded records.
    TrData {
        ready: TransactionDataReady,
        records: TransactionRecords,
    },
    /// Any other control event.
    Callback { callback: GatewayCallback },
}

/// Frame a message with a 4-byte length prefix (big-endian).
pub fn frame_message(msg: &[u8]) -> Vec<u8> {
    let len = msg.len() as u32;
    let mut framed = Vec::with_capacity(4 + msg.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(msg);
    framed
}

/// Read one length-prefixed frame body.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit"),
        ));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kwbridge_core::{OrderKind, PriceType};

    #[tokio::test]
    async fn test_read_frame_reads_back_framed_message() {
        let body = br#"{"type":"connected","version":"1.2"}"#;
        let mut bytes = frame_message(body);
        bytes.extend(frame_message(b"{}"));
        let mut reader = bytes.as_slice();

        let first = read_frame(&mut reader).await.unwrap();
        let frame: InboundFrame = serde_json::from_slice(&first).unwrap();
        assert_eq!(frame, InboundFrame::Connected { version: "1.2".into() });
        assert_eq!(read_frame(&mut reader).await.unwrap(), b"{}");
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let bytes = (MAX_FRAME_LEN as u32 + 1).to_be_bytes();
        let mut reader = &bytes[..];
        let err = read_frame(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_invocation_wire_format() {
        let frame = OutboundFrame {
            seq: 7,
            call: Invocation::GetLoginInfo {
                tag: "ACCNO".into(),
            },
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"{"seq":7,"call":{"op":"get_login_info","tag":"ACCNO"}}"#);
    }

    #[test]
    fn test_order_invocation_uses_wire_codes() {
        let order = OrderRequest::new(
            "8012345611",
            OrderKind::NewSell,
            "005930",
            3,
            PriceType::Market,
            None,
        );
        let Invocation::SendOrder {
            order_type,
            price,
            hoga,
            original_order_no,
            ..
        } = Invocation::order(&order)
        else {
            panic!("expected send_order");
        };
        assert_eq!(order_type, 2);
        assert_eq!(price, Decimal::ZERO);
        assert_eq!(hoga, "03");
        assert!(original_order_no.is_empty());
    }

    #[test]
    fn test_inbound_tr_data() {
        let json = r#"{
            "type": "tr_data",
            "ready": {"screen_no":"0101","rq_name":"주식일봉","tr_code":"opt10081","record_name":"","prev_next":"next"},
            "records": {"single": {}, "rows": [{"일자":"20240102","현재가":"79600"}]}
        }"#;
        let InboundFrame::TrData { ready, records } = serde_json::from_str(json).unwrap() else {
            panic!("expected tr_data");
        };
        assert_eq!(ready.tr_code, "opt10081");
        assert_eq!(records.rows[0]["현재가"], "79600");
    }
}
