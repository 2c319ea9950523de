//! Account and screening transaction requests.

use kwbridge_core::{BridgeError, TransactionRequest};
use serde::{Deserialize, Serialize};

pub const ACCOUNT_SCREEN: &str = "0103";
pub const SCREENING_SCREEN: &str = "1111";

pub const INPUT_ACCOUNT: &str = "계좌번호";
pub const INPUT_PASSWORD: &str = "비밀번호";
pub const INPUT_PASSWORD_MEDIUM: &str = "비밀번호입력매체구분";
pub const INPUT_CODE: &str = "종목코드";
pub const INPUT_DELISTING: &str = "상장폐지조회구분";
pub const INPUT_BALANCE_VIEW: &str = "조회구분";
pub const INPUT_PER_KIND: &str = "PER구분";

/// Password typed by the user rather than read from a device.
const PASSWORD_MEDIUM_KEYED: &str = "00";

/// Whether delisted holdings appear in an account evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DelistingFilter {
    All,
    ExcludeDelisted,
}

impl DelistingFilter {
    pub fn code(&self) -> &'static str {
        match self {
            DelistingFilter::All => "0",
            DelistingFilter::ExcludeDelisted => "1",
        }
    }
}

/// Balance rows summed per stock or listed per lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceView {
    Combined,
    Individual,
}

impl BalanceView {
    pub fn code(&self) -> &'static str {
        match self {
            BalanceView::Combined => "1",
            BalanceView::Individual => "2",
        }
    }
}

/// Which end of the PER ranking to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PerRanking {
    KospiLow,
    KospiHigh,
    KosdaqLow,
    KosdaqHigh,
}

impl PerRanking {
    pub fn code(&self) -> &'static str {
        match self {
            PerRanking::KospiLow => "1",
            PerRanking::KospiHigh => "2",
            PerRanking::KosdaqLow => "3",
            PerRanking::KosdaqHigh => "4",
        }
    }
}

fn require_account(account: &str) -> Result<&str, BridgeError> {
    let account = account.trim();
    if account.is_empty() {
        return Err(BridgeError::InvalidInput("account number is empty".into()));
    }
    Ok(account)
}

/// Return on the account's holdings (opt10085).
pub fn account_return(account: &str) -> Result<TransactionRequest, BridgeError> {
    Ok(
        TransactionRequest::new("계좌수익률요청", "opt10085", ACCOUNT_SCREEN)
            .input(INPUT_ACCOUNT, require_account(account)?),
    )
}

/// Today's realised profit for one stock (opt10077).
pub fn realized_profit_detail(
    account: &str,
    password: &str,
    code: &str,
) -> Result<TransactionRequest, BridgeError> {
    if code.trim().is_empty() {
        return Err(BridgeError::InvalidInput("stock code is empty".into()));
    }
    Ok(
        TransactionRequest::new("당일실현손익상세요청", "opt10077", ACCOUNT_SCREEN)
            .input(INPUT_ACCOUNT, require_account(account)?)
            .input(INPUT_PASSWORD, password)
            .input(INPUT_CODE, code.trim()),
    )
}

/// Deposit and holdings evaluation (opw00004).
pub fn account_evaluation(
    account: &str,
    password: &str,
    delisting: DelistingFilter,
) -> Result<TransactionRequest, BridgeError> {
    Ok(
        TransactionRequest::new("계좌평가현황요청", "opw00004", ACCOUNT_SCREEN)
            .input(INPUT_ACCOUNT, require_account(account)?)
            .input(INPUT_PASSWORD, password)
            .input(INPUT_DELISTING, delisting.code())
            .input(INPUT_PASSWORD_MEDIUM, PASSWORD_MEDIUM_KEYED),
    )
}

/// Holdings with evaluation and profit per position (opw00018).
pub fn account_balance(
    account: &str,
    password: &str,
    view: BalanceView,
) -> Result<TransactionRequest, BridgeError> {
    Ok(
        TransactionRequest::new("계좌평가잔고내역요청", "opw00018", ACCOUNT_SCREEN)
            .input(INPUT_ACCOUNT, require_account(account)?)
            .input(INPUT_PASSWORD, password)
            .input(INPUT_PASSWORD_MEDIUM, PASSWORD_MEDIUM_KEYED)
            .input(INPUT_BALANCE_VIEW, view.code()),
    )
}

/// The hundred stocks at one end of a market's PER ranking (opt10026).
pub fn per_ranking(kind: PerRanking) -> TransactionRequest {
    TransactionRequest::new("고저PER", "opt10026", SCREENING_SCREEN)
        .input(INPUT_PER_KIND, kind.code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_inputs_in_gateway_order() {
        let request = account_balance(" 8012345611 ", "", BalanceView::Individual).unwrap();
        assert_eq!(request.tr_code, "opw00018");
        assert_eq!(
            request.inputs,
            vec![
                (INPUT_ACCOUNT.to_string(), "8012345611".to_string()),
                (INPUT_PASSWORD.to_string(), String::new()),
                (INPUT_PASSWORD_MEDIUM.to_string(), "00".to_string()),
                (INPUT_BALANCE_VIEW.to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_empty_account_is_rejected() {
        assert!(matches!(account_return("  "), Err(BridgeError::InvalidInput(_))));
        assert!(matches!(
            realized_profit_detail("8012345611", "", ""),
            Err(BridgeError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_per_ranking_kind() {
        let request = per_ranking(PerRanking::KosdaqHigh);
        assert_eq!(request.screen_no, SCREENING_SCREEN);
        assert_eq!(request.input_value(INPUT_PER_KIND), Some("4"));
    }
}
