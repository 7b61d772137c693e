//! Bug report assembly: metadata collection and issue URL construction.

use crate::config::schema::ReportConfig;
use crate::platform::ScreenCapture;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shakedown_common::{EnvironmentFacts, ReportError, SessionStats};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Title used when the reporter leaves it blank.
pub const DEFAULT_ISSUE_TITLE: &str = "Bug report";

const ISSUE_HOST: &str = "https://github.com";
const DATA_URI_NOTE: &str = concat!(
    "_A screenshot was captured but is too large to include in the link. ",
    "Please attach it manually._"
);

/// What the user typed into the report form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BugReportData {
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_metadata: Option<bool>,
}

impl BugReportData {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    fn wants_metadata(&self) -> bool {
        self.include_metadata != Some(false)
    }
}

/// Environment snapshot attached to a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BugReportMetadata {
    pub timestamp: DateTime<Utc>,
    pub app_version: String,
    pub environment: EnvironmentFacts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionStats>,
}

pub fn collect_metadata(
    environment: &EnvironmentFacts,
    session: Option<SessionStats>,
    now: DateTime<Utc>,
) -> BugReportMetadata {
    BugReportMetadata {
        timestamp: now,
        app_version: environment.app_version.clone(),
        environment: environment.clone(),
        session,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOptions {
    pub labels: Vec<String>,
    pub max_url_length: usize,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self::from(&ReportConfig::default())
    }
}

impl From<&ReportConfig> for ReportOptions {
    fn from(config: &ReportConfig) -> Self {
        Self {
            labels: config.labels.clone(),
            max_url_length: config.max_url_length,
        }
    }
}

/// Build a new-issue URL for `repository` (`owner/repo`). Screenshots given
/// as data URIs are never embedded.
pub fn build_issue_url(
    repository: &str,
    data: &BugReportData,
    metadata: Option<&BugReportMetadata>,
    options: &ReportOptions,
) -> Result<String, ReportError> {
    let (owner, repo) = parse_repository(repository)?;

    let title = match data.title.trim() {
        "" => DEFAULT_ISSUE_TITLE,
        title => title,
    };
    let body = issue_body(data, metadata);

    let base = format!("{}/{}/{}/issues/new", ISSUE_HOST, owner, repo);
    let mut url =
        Url::parse(&base).map_err(|_| ReportError::InvalidRepository(repository.to_string()))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("title", title);
        query.append_pair("body", &body);
        if !options.labels.is_empty() {
            query.append_pair("labels", &options.labels.join(","));
        }
    }

    let url = String::from(url);
    if url.len() > options.max_url_length {
        warn!(
            length = url.len(),
            limit = options.max_url_length,
            "Issue URL exceeds the recommended length and may be truncated"
        );
    }
    Ok(url)
}

fn parse_repository(repository: &str) -> Result<(&str, &str), ReportError> {
    let repository = repository.trim();
    if repository.is_empty() {
        return Err(ReportError::NotConfigured);
    }

    let valid_segment = |s: &str| {
        !s.is_empty()
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    match repository.split_once('/') {
        Some((owner, repo)) if valid_segment(owner) && valid_segment(repo) => Ok((owner, repo)),
        _ => Err(ReportError::InvalidRepository(repository.to_string())),
    }
}

fn issue_body(data: &BugReportData, metadata: Option<&BugReportMetadata>) -> String {
    let mut sections = vec![data.description.trim().to_string()];

    if let Some(metadata) = metadata.filter(|_| data.wants_metadata()) {
        match serde_json::to_string_pretty(metadata) {
            Ok(json) => sections.push(format!("## Environment\n\n```json\n{}\n```", json)),
            Err(e) => warn!("Failed to serialize report metadata: {}", e),
        }
    }

    if let Some(screenshot) = data.screenshot.as_deref().map(str::trim) {
        if screenshot.starts_with("data:") {
            sections.push(format!("## Screenshot\n\n{}", DATA_URI_NOTE));
        } else if !screenshot.is_empty() {
            sections.push(format!("## Screenshot\n\n![Screenshot]({})", screenshot));
        }
    }

    sections.join("\n\n")
}

/// Report submission service: owns the configured destination and the
/// screen-capture adapter.
pub struct BugReporter {
    repository: Option<String>,
    options: ReportOptions,
    include_metadata: bool,
    capture: Arc<dyn ScreenCapture>,
}

impl BugReporter {
    pub fn new(config: &ReportConfig, capture: Arc<dyn ScreenCapture>) -> Self {
        Self {
            repository: config
                .repository
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
            options: ReportOptions::from(config),
            include_metadata: config.include_metadata,
            capture,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.repository.is_some()
    }

    pub fn repository(&self) -> Option<&str> {
        self.repository.as_deref()
    }

    pub fn can_capture_screenshot(&self) -> bool {
        self.capture.is_supported()
    }

    /// Grab a single frame as a data URI. Unsupported, failed and cancelled
    /// captures all yield `None`.
    pub async fn capture_screenshot(&self) -> Option<String> {
        if !self.capture.is_supported() {
            debug!("Screen capture unsupported");
            return None;
        }
        let frame = self.capture.capture_frame().await?;
        Some(frame.to_data_uri())
    }

    /// Build the issue URL for the configured repository. Metadata is left
    /// out when disabled in config unless the report explicitly opts in.
    pub fn prepare(
        &self,
        data: &BugReportData,
        metadata: Option<&BugReportMetadata>,
    ) -> Result<String, ReportError> {
        let repository = self.repository.as_deref().ok_or(ReportError::NotConfigured)?;
        let metadata = match data.include_metadata {
            Some(true) => metadata,
            Some(false) => None,
            None if self.include_metadata => metadata,
            None => None,
        };
        build_issue_url(repository, data, metadata, &self.options)
    }
}
