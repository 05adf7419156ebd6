//! Indicator-of-compromise extraction from raw alert payloads.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

static IPV4_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:[0-9]{1,3}\.){3}[0-9]{1,3}\b").unwrap());

static DOMAIN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:[a-zA-Z0-9](?:[a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,}\b").unwrap()
});

static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s<>"'{}|\\^`\[\]]+[^\s<>"'{}|\\^`\[\].,;!?]"#).unwrap()
});

static MD5_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b[a-fA-F0-9]{32}\b").unwrap());
static SHA1_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b[a-fA-F0-9]{40}\b").unwrap());
static SHA256_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[a-fA-F0-9]{64}\b").unwrap());

/// Internal hostnames and file names that look like domains.
const IGNORED_DOMAIN_SUFFIXES: &[&str] = &[
    ".local", ".internal", ".exe", ".dll", ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".zip",
    ".txt", ".js", ".ps1", ".log",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IocKind {
    Ip,
    Domain,
    Url,
    Md5,
    Sha1,
    Sha256,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ioc {
    pub value: String,
    #[serde(rename = "type")]
    pub kind: IocKind,
}

/// Extract up to `limit` unique IOCs from every string value in the alert.
///
/// Order is stable: IPs, domains, URLs, then hashes, each in order of
/// first appearance.
pub fn extract(alert: &Value, limit: usize) -> Vec<Ioc> {
    let mut text = String::new();
    collect_strings(alert, &mut text);

    let candidates = IPV4_REGEX
        .find_iter(&text)
        .filter(|m| is_valid_ipv4(m.as_str()))
        .map(|m| (m.as_str(), IocKind::Ip))
        .chain(
            DOMAIN_REGEX
                .find_iter(&text)
                .filter(|m| !is_ignored_domain(m.as_str()))
                .map(|m| (m.as_str(), IocKind::Domain)),
        )
        .chain(URL_REGEX.find_iter(&text).map(|m| (m.as_str(), IocKind::Url)))
        .chain(MD5_REGEX.find_iter(&text).map(|m| (m.as_str(), IocKind::Md5)))
        .chain(SHA1_REGEX.find_iter(&text).map(|m| (m.as_str(), IocKind::Sha1)))
        .chain(SHA256_REGEX.find_iter(&text).map(|m| (m.as_str(), IocKind::Sha256)));

    let mut seen = HashSet::new();
    let mut iocs = Vec::new();
    for (value, kind) in candidates {
        if iocs.len() >= limit {
            break;
        }
        if seen.insert((value, kind)) {
            iocs.push(Ioc {
                value: value.to_string(),
                kind,
            });
        }
    }
    iocs
}

fn collect_strings(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => {
            out.push_str(s);
            out.push('\n');
        }
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

fn is_valid_ipv4(candidate: &str) -> bool {
    candidate.parse::<std::net::Ipv4Addr>().is_ok()
}

fn is_ignored_domain(candidate: &str) -> bool {
    let lower = candidate.to_lowercase();
    IGNORED_DOMAIN_SUFFIXES.iter().any(|s| lower.ends_with(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extracts_each_kind() {
        let alert = json!({
            "title": "Beacon to evil-cdn.ru from 10.0.0.5",
            "details": {
                "url": "https://evil-cdn.ru/payload.bin",
                "hash": "d41d8cd98f00b204e9800998ecf8427e",
            },
            "tags": ["sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"]
        });
        let iocs = extract(&alert, 20);
        let kinds: HashSet<IocKind> = iocs.iter().map(|i| i.kind).collect();
        assert!(kinds.contains(&IocKind::Ip));
        assert!(kinds.contains(&IocKind::Domain));
        assert!(kinds.contains(&IocKind::Url));
        assert!(kinds.contains(&IocKind::Md5));
        assert!(kinds.contains(&IocKind::Sha256));
        assert!(!kinds.contains(&IocKind::Sha1));
    }

    #[test]
    fn test_dedupes_by_value_and_kind() {
        let alert = json!({"a": "1.2.3.4", "b": "seen 1.2.3.4 again"});
        let iocs = extract(&alert, 10);
        assert_eq!(iocs.len(), 1);
        assert_eq!(iocs[0].value, "1.2.3.4");
    }

    #[test]
    fn test_respects_limit() {
        let ips: Vec<String> = (1..=20).map(|i| format!("192.0.2.{i}")).collect();
        let alert = json!({ "ips": ips });
        assert_eq!(extract(&alert, 10).len(), 10);
    }

    #[test]
    fn test_rejects_out_of_range_octets_and_internal_hosts() {
        let alert = json!({"a": "999.1.1.1 dc01.corp.local report.pdf"});
        assert!(extract(&alert, 10).is_empty());
    }

    #[test]
    fn test_wire_shape() {
        let ioc = Ioc {
            value: "1.2.3.4".into(),
            kind: IocKind::Ip,
        };
        let json = serde_json::to_value(&ioc).unwrap();
        assert_eq!(json, json!({"value": "1.2.3.4", "type": "ip"}));
    }
}
