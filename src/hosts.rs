//! Host list parsing
//!
//! Accepts IP addresses, RFC 1123 hostnames and the IPv4 range shorthand
//! `192.168.0.[1-4]`, which expands to four consecutive addresses.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};

use crate::error::{CkmanError, Result};

/// Expand, validate and de-duplicate-check a host list. Input order is kept.
pub fn parse_hosts(hosts: &[String]) -> Result<Vec<String>> {
    let mut parsed = Vec::with_capacity(hosts.len());
    let mut seen = HashSet::new();
    for entry in hosts {
        for host in expand(entry.trim())? {
            if !seen.insert(host.clone()) {
                return Err(CkmanError::invalid_params(format!("host {} is duplicate", host)));
            }
            parsed.push(host);
        }
    }
    Ok(parsed)
}

/// Host as it appears in a URL or an scp target, IPv6 literals in brackets
pub fn bracket_ipv6(host: &str) -> String {
    if host.contains(':') {
        format!("[{}]", host)
    } else {
        host.to_string()
    }
}

fn expand(entry: &str) -> Result<Vec<String>> {
    if entry.is_empty() {
        return Err(CkmanError::invalid_params("host must not be empty"));
    }
    let Some(open) = entry.find('[') else {
        if !is_valid_host(entry) {
            return Err(CkmanError::invalid_params(format!("invalid host {}", entry)));
        }
        return Ok(vec![entry.to_string()]);
    };

    let invalid = || CkmanError::invalid_params(format!("invalid host range {}", entry));
    let prefix = &entry[..open];
    let range = entry[open + 1..].strip_suffix(']').ok_or_else(invalid)?;
    let (start, end) = range.split_once('-').ok_or_else(invalid)?;
    let start: u8 = start.trim().parse().map_err(|_| invalid())?;
    let end: u8 = end.trim().parse().map_err(|_| invalid())?;
    if start > end || !prefix.ends_with('.') {
        return Err(invalid());
    }

    (start..=end)
        .map(|last| {
            let host = format!("{}{}", prefix, last);
            host.parse::<Ipv4Addr>().map(|ip| ip.to_string()).map_err(|_| invalid())
        })
        .collect()
}

fn is_valid_host(host: &str) -> bool {
    host.parse::<IpAddr>().is_ok() || is_valid_hostname(host)
}

fn is_valid_hostname(host: &str) -> bool {
    if host.len() > 253 {
        return false;
    }
    let labels: Vec<&str> = host.split('.').collect();
    let label_ok = |label: &&str| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    };
    // a numeric last label would be a malformed IPv4 address
    labels.iter().all(label_ok)
        && labels
            .last()
            .map(|l| !l.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false)
}
