//! Raw HTTP request text parsing and rendering.
//!
//! `whittle import` accepts the textual request format proxies and browser
//! dev tools export: a request line, header lines, a blank line, then the
//! body verbatim. The request target may be origin-form (`/path?q=1`, host
//! taken from the Host header or the --host flag) or absolute-form
//! (`https://host/path`).

use anyhow::{Result, anyhow, bail};
use indexmap::IndexMap;
use whittle_core::RequestDescriptor;
use whittle_http::RequestSpec;

pub(crate) struct ImportOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: bool,
}

pub(crate) fn parse_raw_request(
    raw: &[u8],
    overrides: &ImportOverrides,
) -> Result<RequestDescriptor> {
    let (head, body) = split_head(raw);
    let head =
        std::str::from_utf8(head).map_err(|_| anyhow!("request head is not valid UTF-8"))?;
    let mut lines = head.lines();

    let request_line = lines
        .next()
        .filter(|l| !l.trim().is_empty())
        .ok_or_else(|| anyhow!("empty request file"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| anyhow!("missing method in request line"))?
        .to_string();
    let target = parts
        .next()
        .ok_or_else(|| anyhow!("missing target in request line"))?
        .to_string();

    let mut headers: IndexMap<String, Vec<String>> = IndexMap::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| anyhow!("malformed header line: {line}"))?;
        headers
            .entry(name.trim().to_string())
            .or_default()
            .push(value.trim().to_string());
    }

    let mut tls = overrides.tls;
    let mut target_host: Option<String> = None;
    let mut target_port: Option<u16> = None;
    let path_and_query;
    if target.starts_with("http://") || target.starts_with("https://") {
        let parsed = url::Url::parse(&target)?;
        tls = tls || parsed.scheme() == "https";
        target_host = parsed.host_str().map(str::to_string);
        target_port = parsed.port();
        path_and_query = match parsed.query() {
            Some(query) => format!("{}?{query}", parsed.path()),
            None => parsed.path().to_string(),
        };
    } else {
        path_and_query = target;
    }

    let header_host = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("host"))
        .and_then(|(_, v)| v.first())
        .cloned();
    let (header_host, header_port) = match header_host {
        Some(value) => match value.split_once(':') {
            Some((h, p)) => (Some(h.to_string()), p.parse::<u16>().ok()),
            None => (Some(value), None),
        },
        None => (None, None),
    };

    let Some(host) = overrides.host.clone().or(target_host).or(header_host) else {
        bail!("no target host: request has no Host header, pass --host");
    };
    let port = overrides
        .port
        .or(target_port)
        .or(header_port)
        .unwrap_or(if tls { 443 } else { 80 });

    let (path, query) = match path_and_query.split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (path_and_query, String::new()),
    };

    Ok(RequestDescriptor {
        method,
        host,
        port,
        tls,
        path,
        query,
        headers,
        body: if body.is_empty() {
            None
        } else {
            Some(body.to_vec())
        },
    })
}

/// Split the raw bytes at the first blank line; the remainder is the body.
fn split_head(raw: &[u8]) -> (&[u8], &[u8]) {
    if let Some(pos) = find(raw, b"\r\n\r\n") {
        return (&raw[..pos], &raw[pos + 4..]);
    }
    if let Some(pos) = find(raw, b"\n\n") {
        return (&raw[..pos], &raw[pos + 2..]);
    }
    (raw, &[])
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Render a fully assembled request back into HTTP text for display.
pub(crate) fn format_spec(spec: &RequestSpec) -> String {
    let mut out = format!("{} {} HTTP/1.1\r\n", spec.method, spec.path_and_query);
    let default_port = if spec.tls { 443 } else { 80 };
    if spec.port == default_port {
        out.push_str(&format!("Host: {}\r\n", spec.host));
    } else {
        out.push_str(&format!("Host: {}:{}\r\n", spec.host, spec.port));
    }
    for (name, values) in &spec.headers {
        for value in values {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
    }
    out.push_str("\r\n");
    if let Some(body) = &spec.body {
        out.push_str(&String::from_utf8_lossy(body));
    }
    out
}
