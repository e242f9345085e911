//! Endpoint router: static mapping from bot category to a Dooray webhook.
//!
//! Two endpoints exist: the news channel and the operations channel. The
//! mapping is total over `BotCategory`; free-form category names that do not
//! parse fall back to the operations channel so nothing is silently dropped
//! and nothing unexpected lands in the news channel.

use std::sync::Arc;

use reqwest::Url;

use posco_common::error::{AppError, Result};
use posco_common::types::BotCategory;

/// Which of the two webhooks a message is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    News,
    Operations,
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointKind::News => write!(f, "news"),
            EndpointKind::Operations => write!(f, "operations"),
        }
    }
}

/// A resolved webhook target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub kind: EndpointKind,
    pub url: Arc<str>,
}

/// Result of resolving a free-form category name.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Parsed category; `Error` when the name was not recognized.
    pub category: BotCategory,
    pub route: Route,
    /// Set when the router had to fail closed.
    pub warning: Option<String>,
}

pub struct EndpointRouter {
    news: Route,
    operations: Route,
}

impl EndpointRouter {
    /// Build a router from the two configured webhook URLs.
    ///
    /// Fails when either URL is empty, unparsable, or not http(s).
    pub fn new(news_url: &str, ops_url: &str) -> Result<Self> {
        Ok(Self {
            news: Route {
                kind: EndpointKind::News,
                url: validate_url("news", news_url)?,
            },
            operations: Route {
                kind: EndpointKind::Operations,
                url: validate_url("operations", ops_url)?,
            },
        })
    }

    pub fn route(&self, category: BotCategory) -> Route {
        match category {
            BotCategory::Comparison
            | BotCategory::DelayNotice
            | BotCategory::DailyReport
            | BotCategory::StatusNotice
            | BotCategory::NoDataNotice => self.news.clone(),
            BotCategory::Error | BotCategory::Test => self.operations.clone(),
        }
    }

    /// Resolve a category by name. Unknown names go to the operations webhook.
    pub fn resolve(&self, category: &str) -> Resolution {
        match category.parse::<BotCategory>() {
            Ok(parsed) => Resolution {
                category: parsed,
                route: self.route(parsed),
                warning: None,
            },
            Err(_) => {
                tracing::warn!(category, "Unrecognized bot category, routing to operations webhook");
                Resolution {
                    category: BotCategory::Error,
                    route: self.operations.clone(),
                    warning: Some(format!("분류 미확인 카테고리: {}", category)),
                }
            }
        }
    }
}

fn validate_url(name: &str, raw: &str) -> Result<Arc<str>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::Config(format!("{} webhook URL is empty", name)));
    }
    let url = Url::parse(raw)
        .map_err(|e| AppError::Config(format!("{} webhook URL is invalid: {}", name, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::Config(format!(
            "{} webhook URL must be http(s), got {}",
            name,
            url.scheme()
        )));
    }
    Ok(Arc::from(raw))
}
