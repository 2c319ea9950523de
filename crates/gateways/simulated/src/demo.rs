//! Deterministic sample data for demos and tests.

use chrono::{DateTime, Duration, Months, Utc};
use kwbridge_core::{Bar, Granularity, LoginInfo, Market, MetadataQuery};
use rust_decimal::Decimal;

use crate::gateway::SimulatedGateway;

/// `count` bars spaced one `granularity` unit apart, the newest at `newest`.
/// Prices walk around `base` in whole won.
pub fn series(
    code: &str,
    granularity: Granularity,
    newest: DateTime<Utc>,
    count: usize,
    base: i64,
) -> Vec<Bar> {
    let mut bars = Vec::with_capacity(count);
    let mut ts = newest;
    for i in 0..count {
        let step = i as i64;
        let open = base + ((step * 37) % 400) - 200;
        let close = base + ((step * 53) % 400) - 200;
        let high = open.max(close) + (step % 7) * 10;
        let low = open.min(close) - (step % 5) * 10;
        bars.push(Bar {
            instrument: code.to_string(),
            timestamp: ts,
            open: Decimal::from(open),
            high: Decimal::from(high),
            low: Decimal::from(low),
            close: Decimal::from(close),
            volume: Decimal::from(1_000 + (step * 131) % 9_000),
        });
        let previous = match granularity {
            Granularity::Minute(tick) => ts.checked_sub_signed(Duration::minutes(i64::from(tick))),
            Granularity::Day => ts.checked_sub_signed(Duration::days(1)),
            Granularity::Week => ts.checked_sub_signed(Duration::weeks(1)),
            Granularity::Month => ts.checked_sub_months(Months::new(1)),
        };
        match previous {
            Some(prev) => ts = prev,
            None => break,
        }
    }
    bars
}

/// Populate `gateway` with a small market: two stocks with minute and
/// daily history, a condition catalog, and static metadata.
pub fn seed(gateway: &SimulatedGateway, newest: DateTime<Utc>) {
    gateway.set_login_info(LoginInfo::AccountCount, "2");
    gateway.set_login_info(LoginInfo::AccountNumbers, "8012345611;8012345612;");
    gateway.set_login_info(LoginInfo::UserId, "simuser");
    gateway.set_login_info(LoginInfo::UserName, "모의투자");
    gateway.set_login_info(LoginInfo::KeyboardSecurity, "1");
    gateway.set_login_info(LoginInfo::Firewall, "0");
    gateway.set_login_info(LoginInfo::ServerKind, "1");

    for (code, name, base) in [("005930", "삼성전자", 71_000), ("000660", "SK하이닉스", 135_000)] {
        gateway.set_series(code, Granularity::Minute(1), series(code, Granularity::Minute(1), newest, 1_240, base));
        gateway.set_series(code, Granularity::Day, series(code, Granularity::Day, newest, 750, base));
        gateway.set_series(code, Granularity::Week, series(code, Granularity::Week, newest, 260, base));
        gateway.set_series(code, Granularity::Month, series(code, Granularity::Month, newest, 120, base));
        gateway.set_metadata(MetadataQuery::StockName(code.to_string()), name);
        gateway.set_metadata(MetadataQuery::LastPrice(code.to_string()), &base.to_string());
        gateway.set_metadata(MetadataQuery::Construction(code.to_string()), "정상");
        gateway.set_metadata(MetadataQuery::StockState(code.to_string()), "증거금20%|담보대출|신용가능");
    }
    gateway.set_metadata(MetadataQuery::ListedStockCount("005930".into()), "5969782550");
    gateway.set_metadata(MetadataQuery::ListedDate("005930".into()), "19750611");
    gateway.set_metadata(MetadataQuery::ListedStockCount("000660".into()), "728002365");
    gateway.set_metadata(MetadataQuery::ListedDate("000660".into()), "19961226");

    gateway.set_metadata(MetadataQuery::CodesByMarket(Market::Kospi), "005930;000660;");
    gateway.set_metadata(MetadataQuery::CodesByMarket(Market::Kosdaq), "035720;247540;");
    gateway.set_metadata(MetadataQuery::ThemeGroups(true), "141|반도체;152|2차전지");
    gateway.set_metadata(MetadataQuery::ThemeGroups(false), "141|반도체;152|2차전지");
    gateway.set_metadata(MetadataQuery::ThemeMembers("141".into()), "A005930;A000660");
    gateway.set_metadata(MetadataQuery::BranchCodes, "001|한국투자;050|키움증권");
    gateway.set_metadata(MetadataQuery::ModulePath, "/opt/kwbridge/sim");

    gateway.set_catalog("000^조건A;001^거래량급증;", 1);
    gateway.set_condition_result("조건A", &["005930", "000660"]);
    gateway.set_condition_result("거래량급증", &["000660"]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_series_is_spaced_and_newest_first() {
        let newest = Utc.with_ymd_and_hms(2024, 1, 2, 6, 30, 0).unwrap();
        let bars = series("005930", Granularity::Minute(3), newest, 10, 70_000);
        assert_eq!(bars.len(), 10);
        assert_eq!(bars[0].timestamp, newest);
        assert_eq!(bars[1].timestamp, newest - Duration::minutes(3));
        assert!(bars.iter().all(|b| b.low <= b.open && b.low <= b.close));
        assert!(bars.iter().all(|b| b.high >= b.open && b.high >= b.close));
    }
}
