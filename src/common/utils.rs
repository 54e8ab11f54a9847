//! Small helpers shared across the crate

use chrono::{DateTime, NaiveDateTime, Utc};
use sha2::{Digest, Sha256};

/// Format utilities
pub struct FormatUtils;

impl FormatUtils {
    /// Human readable size: `0 B`, `512 B`, `1.5 KB`, `2.0 GB`, ...
    pub fn format_size(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

        if bytes == 0 {
            return "0 B".to_string();
        }

        let mut size = bytes as f64;
        let mut unit = 0;
        while size >= 1024.0 && unit < UNITS.len() - 1 {
            size /= 1024.0;
            unit += 1;
        }

        if unit == 0 {
            format!("{} {}", bytes, UNITS[0])
        } else {
            format!("{:.1} {}", size, UNITS[unit])
        }
    }

    /// `docker pull <host>/<repo>:<tag>`
    pub fn pull_command(registry_host: &str, repository: &str, tag: &str) -> String {
        format!("docker pull {}/{}:{}", registry_host, repository, tag)
    }
}

/// Timestamp helpers for registry payloads
pub struct TimeUtils;

impl TimeUtils {
    /// Parse the timestamp formats seen in image configs. RFC 3339 with any
    /// offset, or a naive `YYYY-MM-DDTHH:MM:SS[.f]` read as UTC.
    pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

/// Digest utilities
pub struct DigestUtils;

impl DigestUtils {
    /// `sha256:<hex>` of a byte slice
    pub fn compute_docker_digest(data: &[u8]) -> String {
        format!("sha256:{}", hex::encode(Sha256::digest(data)))
    }
}

/// Extract the `rel="next"` target from a `Link` header such as
/// `</v2/_catalog?last=b&n=2>; rel="next"`.
pub fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|link| {
        let link = link.trim();
        let mut parts = link.split(';');
        let target = parts.next()?.trim();
        let is_next = parts.any(|param| {
            let param = param.trim().replace(' ', "");
            param == "rel=\"next\"" || param == "rel=next"
        });
        if !is_next {
            return None;
        }
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(str::to_string)
    })
}
