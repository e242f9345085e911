//! Template generator: turns a typed notification into rendered text.
//!
//! Rendering is pure: the only clock is the `now` argument, displayed in KST.
//! Bodies avoid sub-day timestamps where a repeated notice is expected, so the
//! dedup cache can recognize it.
//! Missing input fields never fail a notification; they are replaced with
//! `PLACEHOLDER` and the message is still produced.

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};

use posco_common::error::AppError;
use posco_common::types::{BotCategory, NewsItem, NewsSource};

use crate::layout::{Layout, Section};

/// Substituted for any absent field.
pub const PLACEHOLDER: &str = "정보 없음";

const KST_OFFSET_SECS: i32 = 9 * 3600;
const PREVIEW_CHARS: usize = 100;

/// Output of the generator, before routing and queueing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub bot_category: BotCategory,
    pub bot_name: String,
    pub title: String,
    pub body: String,
    pub color: String,
}

/// Typed input, one variant per bot category.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    Comparison(ComparisonData),
    DelayNotice(DelayData),
    DailyReport(DailyReportData),
    StatusNotice(StatusData),
    NoDataNotice(NoDataData),
    Error(ErrorData),
    Test(TestData),
}

impl Notification {
    pub fn category(&self) -> BotCategory {
        match self {
            Notification::Comparison(_) => BotCategory::Comparison,
            Notification::DelayNotice(_) => BotCategory::DelayNotice,
            Notification::DailyReport(_) => BotCategory::DailyReport,
            Notification::StatusNotice(_) => BotCategory::StatusNotice,
            Notification::NoDataNotice(_) => BotCategory::NoDataNotice,
            Notification::Error(_) => BotCategory::Error,
            Notification::Test(_) => BotCategory::Test,
        }
    }
}

/// Latest vs previously seen article for one source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComparisonData {
    pub source: Option<NewsSource>,
    pub current: Option<NewsItem>,
    pub previous: Option<NewsItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DelayData {
    pub source: Option<NewsSource>,
    /// Computed from the source's expected time when absent.
    pub delay_minutes: Option<i64>,
    pub item: Option<NewsItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSnapshot {
    pub source: NewsSource,
    pub item: Option<NewsItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyReportData {
    pub report_date: Option<NaiveDate>,
    pub sources: Vec<SourceSnapshot>,
    pub report_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusData {
    pub sources: Vec<SourceSnapshot>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoDataData {
    pub source: Option<NewsSource>,
    pub last_checked: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorData {
    pub component: Option<String>,
    pub error: Option<String>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestData {
    pub note: Option<String>,
}

/// Fixed display attributes per category.
struct Style {
    bot_name: &'static str,
    color: &'static str,
}

fn style(category: BotCategory) -> Style {
    let (bot_name, color) = match category {
        BotCategory::Comparison => ("POSCO 뉴스 비교알림", "#007bff"),
        BotCategory::DelayNotice => ("POSCO 뉴스 ⏰", "#ffc107"),
        BotCategory::DailyReport => ("POSCO 뉴스 📋", "#28a745"),
        BotCategory::StatusNotice => ("POSCO 뉴스 📊", "#17a2b8"),
        BotCategory::NoDataNotice => ("POSCO 뉴스 🔔", "#6c757d"),
        BotCategory::Error => ("POSCO 워치햄스터 ❌", "#dc3545"),
        BotCategory::Test => ("POSCO 테스트 🧪", "#6f42c1"),
    };
    Style { bot_name, color }
}

/// Publication state of a source relative to `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    PublishedToday,
    Waiting,
    Late,
}

impl SourceState {
    pub fn evaluate(source: NewsSource, item: Option<&NewsItem>, now: DateTime<FixedOffset>) -> Self {
        let today = now.date_naive();
        if item.and_then(NewsItem::published_date) == Some(today) {
            SourceState::PublishedToday
        } else if now.time() < source.expected_time() {
            SourceState::Waiting
        } else {
            SourceState::Late
        }
    }

    pub fn glyph(&self) -> &'static str {
        match self {
            SourceState::PublishedToday => "🟢",
            SourceState::Waiting => "🟡",
            SourceState::Late => "🔴",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SourceState::PublishedToday => "최신",
            SourceState::Waiting => "발행 대기",
            SourceState::Late => "지연",
        }
    }
}

/// Render a notification at the given instant.
pub fn render(notification: &Notification, now: DateTime<Utc>) -> RenderedMessage {
    let now = now.with_timezone(&kst_offset());
    let category = notification.category();

    let layout = match notification {
        Notification::Comparison(data) => comparison_layout(data),
        Notification::DelayNotice(data) => delay_layout(data, now),
        Notification::DailyReport(data) => daily_report_layout(data, now),
        Notification::StatusNotice(data) => status_layout(data, now),
        Notification::NoDataNotice(data) => no_data_layout(data, now),
        Notification::Error(data) => error_layout(data),
        Notification::Test(data) => test_layout(data),
    };

    let style = style(category);
    RenderedMessage {
        bot_category: category,
        bot_name: style.bot_name.to_string(),
        title: layout.header.clone(),
        body: layout.render(),
        color: style.color.to_string(),
    }
}

/// Wrap caller-supplied text in the category's display style.
///
/// Used for free-form notifications that have no typed template.
pub fn render_raw(category: BotCategory, title: &str, body: &str) -> RenderedMessage {
    let title = text_or_placeholder(Some(title), "title");
    let body = match body.trim() {
        "" => title.clone(),
        trimmed => trimmed.to_string(),
    };
    let style = style(category);
    RenderedMessage {
        bot_category: category,
        bot_name: style.bot_name.to_string(),
        title,
        body,
        color: style.color.to_string(),
    }
}

fn comparison_layout(data: &ComparisonData) -> Layout {
    let source = source_name(data.source);
    let current = data.current.as_ref().and_then(NewsItem::clean_title);
    let previous = data.previous.as_ref().and_then(NewsItem::clean_title);

    let (glyph, state) = match (current, previous) {
        (Some(c), Some(p)) if c == p => ("🔄", "변동 없음"),
        (Some(_), _) => ("🆕", "새 뉴스"),
        (None, _) => ("❔", "비교 불가"),
    };

    let mut section = Section::new()
        .field("현재 제목", text_or_placeholder(current, "current.title"))
        .field("이전 제목", text_or_placeholder(previous, "previous.title"))
        .field("발행 시간", published_or_placeholder(data.current.as_ref()));
    if let Some(preview) = data.current.as_ref().and_then(|i| i.content.as_deref()) {
        section = section.field("요약", preview_text(preview));
    }

    Layout::new(format!("{} {} {}", glyph, source, state)).section(section.field("상태", state))
}

fn delay_layout(data: &DelayData, now: DateTime<FixedOffset>) -> Layout {
    let source = source_name(data.source);
    let minutes = data.delay_minutes.or_else(|| {
        data.source.map(|s| (now.time() - s.expected_time()).num_minutes()).filter(|m| *m > 0)
    });

    let header = match minutes {
        Some(m) => format!("⏰ {} 발행 지연 ({}분)", source, m),
        None => format!("⏰ {} 발행 지연", source),
    };

    let expected = data
        .source
        .map(|s| s.expected_time().format("%H:%M").to_string());
    let item = data.item.as_ref();

    Layout::new(header).section(
        Section::new()
            .field("예상 발행", text_or_placeholder(expected.as_deref(), "expected_time"))
            .field(
                "지연 시간",
                match minutes {
                    Some(m) => format!("{}분", m),
                    None => placeholder("delay_minutes"),
                },
            )
            .field("최근 제목", text_or_placeholder(item.and_then(NewsItem::clean_title), "item.title"))
            .field("최근 발행", published_or_placeholder(item)),
    )
}

fn daily_report_layout(data: &DailyReportData, now: DateTime<FixedOffset>) -> Layout {
    let date = data.report_date.unwrap_or_else(|| now.date_naive());
    let mut layout = Layout::new(format!("📋 POSCO 뉴스 일일 리포트 ({})", date.format("%Y-%m-%d")));

    let published = data
        .sources
        .iter()
        .filter(|s| s.item.as_ref().and_then(NewsItem::published_date) == Some(date))
        .count();

    for snapshot in &data.sources {
        let item = snapshot.item.as_ref();
        let done = item.and_then(NewsItem::published_date) == Some(date);
        let glyph = if done { "🟢" } else { "🔴" };
        layout = layout.section(
            Section::titled(format!("{} {}", glyph, snapshot.source.display_name()))
                .field("제목", text_or_placeholder(item.and_then(NewsItem::clean_title), "item.title"))
                .field("발행 시간", published_or_placeholder(item)),
        );
    }

    let mut summary = Section::titled("📈 요약").field(
        "발행 현황",
        if data.sources.is_empty() {
            placeholder("sources")
        } else {
            format!("{}/{}", published, data.sources.len())
        },
    );
    summary = summary.field(
        "리포트",
        text_or_placeholder(data.report_url.as_deref(), "report_url"),
    );
    layout
        .section(summary)
        .footer(format!("📅 생성: {} (KST)", now.format("%Y-%m-%d %H:%M")))
}

fn status_layout(data: &StatusData, now: DateTime<FixedOffset>) -> Layout {
    let mut section = Section::new();
    if data.sources.is_empty() {
        section = section.field("뉴스", placeholder("sources"));
    }
    for snapshot in &data.sources {
        let item = snapshot.item.as_ref();
        let state = SourceState::evaluate(snapshot.source, item, now);
        let when = item
            .and_then(NewsItem::published_at)
            .map(|at| format!(" ({})", at.format("%m-%d %H:%M")))
            .unwrap_or_default();
        section = section.field(
            snapshot.source.display_name(),
            format!("{} {}{}", state.glyph(), state.label(), when),
        );
    }

    Layout::new(format!("📊 POSCO 뉴스 정기 상태 ({})", now.format("%H:%M"))).section(section)
}

fn no_data_layout(data: &NoDataData, now: DateTime<FixedOffset>) -> Layout {
    let checked = data
        .last_checked
        .map(|t| t.with_timezone(&kst_offset()))
        .unwrap_or(now);
    Layout::new(format!("🔔 {} 데이터 없음", source_name(data.source))).section(
        Section::new()
            .field("확인 일자", checked.format("%Y-%m-%d").to_string())
            .field("사유", text_or_placeholder(data.reason.as_deref(), "reason")),
    )
}

fn error_layout(data: &ErrorData) -> Layout {
    let component = text_or_placeholder(data.component.as_deref(), "component");
    Layout::new(format!("❌ {} 오류 발생", component)).section(
        Section::new()
            .field("구성요소", component)
            .field("오류", text_or_placeholder(data.error.as_deref(), "error"))
            .field("상세", text_or_placeholder(data.detail.as_deref(), "detail")),
    )
}

fn test_layout(data: &TestData) -> Layout {
    Layout::new("🧪 웹훅 연결 테스트")
        .section(Section::new().field("메모", text_or_placeholder(data.note.as_deref(), "note")))
}

fn kst_offset() -> FixedOffset {
    FixedOffset::east_opt(KST_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

fn source_name(source: Option<NewsSource>) -> String {
    match source {
        Some(s) => s.display_name().to_string(),
        None => placeholder("source"),
    }
}

fn text_or_placeholder(value: Option<&str>, field: &str) -> String {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => v.to_string(),
        None => placeholder(field),
    }
}

fn placeholder(field: &str) -> String {
    tracing::debug!(
        error = %AppError::TemplateData(field.to_string()),
        "Substituting placeholder"
    );
    PLACEHOLDER.to_string()
}

fn published_or_placeholder(item: Option<&NewsItem>) -> String {
    let Some(item) = item else {
        return placeholder("item");
    };
    if let Some(at) = item.published_at() {
        return at.format("%Y-%m-%d %H:%M").to_string();
    }
    let raw = [item.date.as_deref(), item.time.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    text_or_placeholder(Some(&raw), "item.published")
}

fn preview_text(content: &str) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > PREVIEW_CHARS {
        let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
        format!("{}…", cut)
    } else {
        flat
    }
}
