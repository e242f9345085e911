use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Notification kinds. Determines the template and the webhook route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotCategory {
    Comparison,
    DelayNotice,
    DailyReport,
    StatusNotice,
    NoDataNotice,
    Error,
    Test,
}

impl BotCategory {
    pub const ALL: [BotCategory; 7] = [
        BotCategory::Comparison,
        BotCategory::DelayNotice,
        BotCategory::DailyReport,
        BotCategory::StatusNotice,
        BotCategory::NoDataNotice,
        BotCategory::Error,
        BotCategory::Test,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BotCategory::Comparison => "comparison",
            BotCategory::DelayNotice => "delay_notice",
            BotCategory::DailyReport => "daily_report",
            BotCategory::StatusNotice => "status_notice",
            BotCategory::NoDataNotice => "no_data_notice",
            BotCategory::Error => "error",
            BotCategory::Test => "test",
        }
    }

    /// Priority used when the caller does not pick one.
    pub fn default_priority(&self) -> Priority {
        match self {
            BotCategory::Error => Priority::Critical,
            BotCategory::DelayNotice => Priority::High,
            BotCategory::Comparison | BotCategory::DailyReport | BotCategory::StatusNotice => {
                Priority::Normal
            }
            BotCategory::NoDataNotice | BotCategory::Test => Priority::Low,
        }
    }
}

impl std::fmt::Display for BotCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BotCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        BotCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| format!("unknown bot category: {}", s))
    }
}

/// Delivery priority. Variant order gives the derived `Ord`: `Critical` is greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "LOW"),
            Priority::Normal => write!(f, "NORMAL"),
            Priority::High => write!(f, "HIGH"),
            Priority::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Per-message delivery state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Queued,
    Sending,
    RetryWait,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Failed)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Queued => write!(f, "queued"),
            DeliveryStatus::Sending => write!(f, "sending"),
            DeliveryStatus::RetryWait => write!(f, "retry_wait"),
            DeliveryStatus::Delivered => write!(f, "delivered"),
            DeliveryStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Monitored POSCO news feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NewsSource {
    NewyorkMarketWatch,
    KospiClose,
    ExchangeRate,
}

impl NewsSource {
    pub const ALL: [NewsSource; 3] = [
        NewsSource::NewyorkMarketWatch,
        NewsSource::KospiClose,
        NewsSource::ExchangeRate,
    ];

    /// Label shown in message bodies.
    pub fn display_name(&self) -> &'static str {
        match self {
            NewsSource::NewyorkMarketWatch => "뉴욕마켓워치",
            NewsSource::KospiClose => "증시마감",
            NewsSource::ExchangeRate => "서환마감",
        }
    }

    /// Usual publish time (KST).
    pub fn expected_time(&self) -> NaiveTime {
        let (h, m) = match self {
            NewsSource::NewyorkMarketWatch => (6, 30),
            NewsSource::KospiClose => (15, 40),
            NewsSource::ExchangeRate => (16, 30),
        };
        NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl std::fmt::Display for NewsSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NewsSource::NewyorkMarketWatch => write!(f, "newyork-market-watch"),
            NewsSource::KospiClose => write!(f, "kospi-close"),
            NewsSource::ExchangeRate => write!(f, "exchange-rate"),
        }
    }
}

/// One news article as scraped by the monitors.
///
/// Every field is optional: upstream payloads are frequently partial.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: Option<String>,
    pub content: Option<String>,
    /// Publish date as `YYYYMMDD`
    pub date: Option<String>,
    /// Publish time as `HHMMSS` (or `HHMM`)
    pub time: Option<String>,
}

impl NewsItem {
    pub fn published_date(&self) -> Option<NaiveDate> {
        let raw = self.date.as_deref()?.trim();
        NaiveDate::parse_from_str(raw, "%Y%m%d").ok()
    }

    pub fn published_at(&self) -> Option<NaiveDateTime> {
        let date = self.published_date()?;
        let raw = self.time.as_deref()?.trim();
        let time = match raw.len() {
            6 => NaiveTime::parse_from_str(raw, "%H%M%S").ok()?,
            4 => NaiveTime::parse_from_str(raw, "%H%M").ok()?,
            _ => return None,
        };
        Some(date.and_time(time))
    }

    /// Title with surrounding whitespace removed, `None` when blank.
    pub fn clean_title(&self) -> Option<&str> {
        self.title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}
