//! Candidate parsing: the format check and text extraction used by sources

use crate::error::{Error, Result};
use crate::proxy::models::Candidate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::net::Ipv4Addr;

/// Anchored `[user:pass@]ipv4:port`; the user may not contain URL delimiters
static CANDIDATE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:([^:@\s/?#%]+):([^@\s]+)@)?(\d{1,3}(?:\.\d{1,3}){3}):(\d{1,5})$")
        .expect("Invalid candidate regex")
});

/// Regex pattern to match IP:PORT patterns in free text
static IP_PORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):(\d{1,5})\b")
        .expect("Invalid IP:PORT regex")
});

/// Table markup where the IP and port sit in adjacent cells
static IP_PORT_CELLS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<td>\s*(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})\s*</td>\s*<td>\s*(\d{1,5})\s*</td>")
        .expect("Invalid table cell regex")
});

/// Parser for candidate strings
pub struct ProxyParser;

impl ProxyParser {
    /// Format check for a raw candidate
    ///
    /// Accepts `IP:PORT` and `USER:PASS@IP:PORT`; every octet must fit
    /// in a byte and the port must be non-zero.
    pub fn parse_candidate(raw: &str) -> Result<Candidate> {
        let caps = CANDIDATE_REGEX
            .captures(raw)
            .ok_or_else(|| Error::Format(raw.to_string()))?;

        let ip: Ipv4Addr = caps[3]
            .parse()
            .map_err(|_| Error::Format(raw.to_string()))?;
        let port = Self::parse_port(&caps[4]).ok_or_else(|| Error::Format(raw.to_string()))?;

        match (caps.get(1), caps.get(2)) {
            (Some(user), Some(pass)) => Ok(Candidate::with_auth(
                ip,
                port,
                user.as_str().to_string(),
                pass.as_str().to_string(),
            )),
            _ => Ok(Candidate::new(ip, port)),
        }
    }

    /// Strip credentials and return the IP part of a candidate string
    pub fn host_of(raw: &str) -> &str {
        let without_auth = raw.rsplit_once('@').map_or(raw, |(_, rest)| rest);
        without_auth
            .split_once(':')
            .map_or(without_auth, |(host, _)| host)
    }

    /// Extract candidates from a fetched document, preserving document order
    ///
    /// Tries, in turn:
    /// 1. Line-by-line parsing of plain lists
    /// 2. IP and port in adjacent table cells
    /// 3. Any IP:PORT pattern in the text
    pub fn extract(content: &str) -> Vec<String> {
        let mut found: Vec<String> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| Self::parse_candidate(line).ok())
            .map(|candidate| candidate.to_string())
            .collect();

        if found.is_empty() {
            found = Self::extract_with(&IP_PORT_CELLS_REGEX, content);
        }
        if found.is_empty() {
            found = Self::extract_with(&IP_PORT_REGEX, content);
        }

        let mut seen = HashSet::new();
        found.retain(|candidate| seen.insert(candidate.clone()));
        found
    }

    fn extract_with(re: &Regex, content: &str) -> Vec<String> {
        re.captures_iter(content)
            .filter_map(|cap| {
                let ip: Ipv4Addr = cap.get(1)?.as_str().parse().ok()?;
                let port = Self::parse_port(cap.get(2)?.as_str())?;
                Some(Candidate::new(ip, port).to_string())
            })
            .collect()
    }

    fn parse_port(s: &str) -> Option<u16> {
        s.parse::<u16>().ok().filter(|port| *port != 0)
    }
}
