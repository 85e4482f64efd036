use serde::Deserialize;
use tracing::{debug, error, info, warn};

/// Log target of relayed browser messages
pub const FRONTEND_TARGET: &str = "frontend";

/// Log record posted by the browser
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontendLogRecord {
    pub level: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub function_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl RelayLevel {
    /// Case-insensitive; anything unrecognised logs at info
    pub fn parse(level: &str) -> Self {
        if level.eq_ignore_ascii_case("debug") {
            RelayLevel::Debug
        } else if level.eq_ignore_ascii_case("warn") {
            RelayLevel::Warn
        } else if level.eq_ignore_ascii_case("error") {
            RelayLevel::Error
        } else {
            RelayLevel::Info
        }
    }
}

/// `user:file:function:content`
pub fn format_line(user_id: &str, record: &FrontendLogRecord) -> String {
    format!(
        "{}:{}:{}:{}",
        user_id, record.file_name, record.function_name, record.content
    )
}

/// Write a browser record to the `frontend` target. Records without a level
/// are dropped. Returns the level used.
pub fn relay(user_id: &str, record: &FrontendLogRecord) -> Option<RelayLevel> {
    let level = RelayLevel::parse(record.level.as_deref()?);
    let line = format_line(user_id, record);

    match level {
        RelayLevel::Debug => debug!(target: FRONTEND_TARGET, "{}", line),
        RelayLevel::Info => info!(target: FRONTEND_TARGET, "{}", line),
        RelayLevel::Warn => warn!(target: FRONTEND_TARGET, "{}", line),
        RelayLevel::Error => error!(target: FRONTEND_TARGET, "{}", line),
    }

    Some(level)
}
