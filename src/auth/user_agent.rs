//! User-agent enrichment for the session's `user_agent` column.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device: String,
    pub os: String,
}

/// Turns a raw `User-Agent` header into device and OS labels.
pub trait UserAgentParser: Send + Sync {
    fn parse(&self, raw: &str) -> DeviceInfo;
}

/// What gets stored on the session row, serialized as JSON.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAgentRecord {
    pub device: String,
    pub os: String,
    pub raw: String,
    pub redis_label: String,
}

/// Parse `raw` and serialize it together with the rate-limit label.
#[must_use]
pub fn describe(parser: &dyn UserAgentParser, raw: &str, label: &str) -> String {
    let info = parser.parse(raw);
    let record = UserAgentRecord {
        device: info.device,
        os: info.os,
        raw: raw.to_string(),
        redis_label: label.to_string(),
    };
    // A struct of plain strings always serializes.
    serde_json::to_string(&record).unwrap_or_default()
}

const WOOTHEE_UNKNOWN: &str = "UNKNOWN";

/// Backed by the woothee agent database.
#[derive(Clone, Copy, Debug, Default)]
pub struct WootheeUserAgentParser;

impl UserAgentParser for WootheeUserAgentParser {
    fn parse(&self, raw: &str) -> DeviceInfo {
        let Some(result) = woothee::parser::Parser::new().parse(raw) else {
            return DeviceInfo {
                device: "Unknown Device".to_string(),
                os: "Unknown".to_string(),
            };
        };

        let os_name = (result.os != WOOTHEE_UNKNOWN).then_some(result.os);
        let os_version = result.os_version.to_string();
        let os = match os_name {
            None => "Unknown".to_string(),
            Some(name) if os_version.is_empty() || os_version == WOOTHEE_UNKNOWN => name.to_string(),
            Some(name) => format!("{name} {os_version}"),
        };

        let device = if raw.to_lowercase().contains("iphone") {
            "iPhone".to_string()
        } else {
            match (result.category, os_name) {
                ("smartphone" | "mobilephone", Some(name)) => format!("Mobile {name}"),
                ("smartphone" | "mobilephone", None) => "Mobile".to_string(),
                ("pc", Some(name)) => format!("Desktop {name}"),
                _ => "Unknown Device".to_string(),
            }
        };

        DeviceInfo { device, os }
    }
}
