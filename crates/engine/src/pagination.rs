//! Historical series fetching.
//!
//! The chart requests return at most one page of bars, newest first, ending
//! at a base date given as input. The paginator walks that cursor backwards
//! one granularity unit past the oldest bar of each page until the gateway
//! runs dry or the requested range is covered.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use kwbridge_core::{
    parse_unsigned_decimal, Bar, BridgeError, DateRange, Granularity, TransactionRequest,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::PaginationConfig;
use crate::transaction::TransactionCycle;

pub const INPUT_CODE: &str = "종목코드";
pub const INPUT_TICK: &str = "틱범위";
pub const INPUT_BASE_DATE: &str = "기준일자";
pub const INPUT_ADJUSTED: &str = "수정주가구분";

const MINUTE_FORMAT: &str = "%Y%m%d%H%M%S";
const DAY_FORMAT: &str = "%Y%m%d";

/// What to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesRequest {
    pub code: String,
    pub granularity: Granularity,
    pub range: DateRange,
    pub screen_no: String,
}

pub struct Paginator {
    cycle: Arc<TransactionCycle>,
    page_delay: Duration,
    max_pages: Option<usize>,
    offset: FixedOffset,
}

impl Paginator {
    pub fn new(cycle: Arc<TransactionCycle>, config: &PaginationConfig, offset: FixedOffset) -> Self {
        Self {
            cycle,
            page_delay: config.page_delay(),
            max_pages: config.max_pages,
            offset,
        }
    }

    /// Fetch every bar of `series.range`, newest first, in the order the
    /// gateway delivered the pages.
    pub fn fetch(&self, series: &SeriesRequest) -> Result<Vec<Bar>, BridgeError> {
        let granularity = series.granularity;
        let range = series.range;
        let mut cursor = range.end;
        let mut bars: Vec<Bar> = Vec::new();
        let mut pages = 0usize;

        info!(
            code = %series.code,
            %granularity,
            start = %range.start,
            end = %range.end,
            "Fetching series"
        );

        loop {
            if let Some(max) = self.max_pages {
                if pages >= max {
                    return Err(BridgeError::PageLimitExceeded(max));
                }
            }
            if pages > 0 && !self.page_delay.is_zero() {
                thread::sleep(self.page_delay);
            }

            let request = self.page_request(series, cursor);
            let page = self.cycle.request(&request)?;
            pages += 1;

            let mut kept = Vec::with_capacity(page.records.rows.len());
            let mut behind_cursor = 0usize;
            for row in &page.records.rows {
                let bar = row_to_bar(&series.code, granularity, self.offset, row)?;
                if bar.timestamp > cursor {
                    continue;
                }
                behind_cursor += 1;
                if bar.timestamp >= range.start {
                    kept.push(bar);
                }
            }
            // Rows that are all newer than the cursor mean the base date was
            // not honoured; paging on would repeat the same page.
            if behind_cursor == 0 && !page.records.rows.is_empty() {
                warn!(page = pages, %cursor, "Page lies entirely after the cursor");
                return Err(BridgeError::PaginationStalled { cursor });
            }
            let Some(oldest) = kept.iter().map(|b| b.timestamp).min() else {
                debug!(pages, total = bars.len(), "Series exhausted");
                break;
            };
            debug!(page = pages, bars = kept.len(), %cursor, "Received page");
            bars.extend(kept);

            let next = granularity
                .step_back(oldest)
                .ok_or(BridgeError::PaginationStalled { cursor })?;
            if next < range.start {
                break;
            }
            cursor = next;
        }

        info!(code = %series.code, pages, bars = bars.len(), "Series fetched");
        Ok(bars)
    }

    fn page_request(&self, series: &SeriesRequest, cursor: DateTime<Utc>) -> TransactionRequest {
        let granularity = series.granularity;
        let mut request = TransactionRequest::new(
            granularity.request_name(),
            granularity.tr_code(),
            &series.screen_no,
        )
        .input(INPUT_CODE, series.code.as_str());
        if let Granularity::Minute(tick) = granularity {
            request = request.input(INPUT_TICK, tick.to_string());
        }
        request
            .input(INPUT_BASE_DATE, format_cursor(granularity, self.offset, cursor))
            .input(INPUT_ADJUSTED, "1")
    }
}

/// Base-date input for `cursor`, in exchange-local time.
pub fn format_cursor(granularity: Granularity, offset: FixedOffset, cursor: DateTime<Utc>) -> String {
    let local = cursor.with_timezone(&offset);
    match granularity {
        Granularity::Minute(_) => local.format(MINUTE_FORMAT).to_string(),
        _ => local.format(DAY_FORMAT).to_string(),
    }
}

/// Parse an exchange-local timestamp as written in chart records.
pub fn parse_bar_time(
    granularity: Granularity,
    offset: FixedOffset,
    raw: &str,
) -> Result<DateTime<Utc>, BridgeError> {
    let raw = raw.trim();
    let naive = match granularity {
        Granularity::Minute(_) => NaiveDateTime::parse_from_str(raw, MINUTE_FORMAT),
        _ => NaiveDate::parse_from_str(raw, DAY_FORMAT).map(|d| d.and_time(chrono::NaiveTime::MIN)),
    }
    .map_err(|e| BridgeError::DecodeFailed(format!("bad bar time '{raw}': {e}")))?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| BridgeError::DecodeFailed(format!("ambiguous bar time '{raw}'")))
}

/// Convert one chart row into a bar.
pub fn row_to_bar(
    code: &str,
    granularity: Granularity,
    offset: FixedOffset,
    row: &BTreeMap<String, String>,
) -> Result<Bar, BridgeError> {
    let field = |name: &str| {
        row.get(name)
            .ok_or_else(|| BridgeError::DecodeFailed(format!("chart row is missing '{name}'")))
    };
    let number = |name: &str| {
        let raw = field(name)?;
        parse_unsigned_decimal(raw)
            .ok_or_else(|| BridgeError::DecodeFailed(format!("bad number '{raw}' in '{name}'")))
    };
    Ok(Bar {
        instrument: code.to_string(),
        timestamp: parse_bar_time(granularity, offset, field(granularity.time_field())?)?,
        open: number("시가")?,
        high: number("고가")?,
        low: number("저가")?,
        close: number("현재가")?,
        volume: number("거래량")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn kst() -> FixedOffset {
        FixedOffset::east_opt(9 * 3600).unwrap()
    }

    fn row(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_minute_row_to_bar() {
        let bar = row_to_bar(
            "005930",
            Granularity::Minute(1),
            kst(),
            &row(&[
                ("체결시간", "20240102153000"),
                ("시가", "-78500"),
                ("고가", "+78700"),
                ("저가", "-78400"),
                ("현재가", "-78600"),
                ("거래량", "15320"),
            ]),
        )
        .unwrap();
        assert_eq!(bar.timestamp, Utc.with_ymd_and_hms(2024, 1, 2, 6, 30, 0).unwrap());
        assert_eq!(bar.open, dec!(78500));
        assert_eq!(bar.high, dec!(78700));
        assert_eq!(bar.close, dec!(78600));
    }

    #[test]
    fn test_daily_row_uses_date_field() {
        let bar = row_to_bar(
            "005930",
            Granularity::Day,
            kst(),
            &row(&[
                ("일자", "20240102"),
                ("시가", "78200"),
                ("고가", "79800"),
                ("저가", "78200"),
                ("현재가", "79600"),
                ("거래량", "17142847"),
            ]),
        )
        .unwrap();
        assert_eq!(bar.timestamp, Utc.with_ymd_and_hms(2024, 1, 1, 15, 0, 0).unwrap());
        assert_eq!(bar.volume, dec!(17142847));
    }

    #[test]
    fn test_missing_field_is_decode_error() {
        let err = row_to_bar(
            "005930",
            Granularity::Day,
            kst(),
            &row(&[("일자", "20240102"), ("시가", "78200")]),
        )
        .unwrap_err();
        assert!(matches!(err, BridgeError::DecodeFailed(_)));
    }

    #[test]
    fn test_format_cursor_in_exchange_time() {
        let cursor = Utc.with_ymd_and_hms(2024, 1, 1, 15, 30, 0).unwrap();
        assert_eq!(format_cursor(Granularity::Minute(1), kst(), cursor), "20240102003000");
        assert_eq!(format_cursor(Granularity::Day, kst(), cursor), "20240102");
    }
}
