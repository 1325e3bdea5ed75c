//! Minimal XML-RPC codec for the registrar API.
//!
//! Only what the three acquisition calls need: string and boolean
//! parameters on the way out; faults, plain strings and flat structs
//! on the way back.

use crate::error::{DropcatchError, Result};

/// Request parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param<'a> {
    Str(&'a str),
    Bool(bool),
}

/// Decoded method response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Fault { code: i64, message: String },
    String(String),
    Struct(Vec<(String, String)>),
    Other(String),
}

impl Reply {
    /// Look up a struct member by name.
    pub fn member(&self, name: &str) -> Option<&str> {
        match self {
            Reply::Struct(members) => members
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str()),
            _ => None,
        }
    }
}

/// Build a `methodCall` document.
pub fn encode_call(method: &str, params: &[Param<'_>]) -> String {
    let mut body = String::with_capacity(128 + params.len() * 48);
    body.push_str("<?xml version=\"1.0\"?><methodCall><methodName>");
    body.push_str(&escape(method));
    body.push_str("</methodName><params>");
    for param in params {
        body.push_str("<param><value>");
        match param {
            Param::Str(s) => {
                body.push_str("<string>");
                body.push_str(&escape(s));
                body.push_str("</string>");
            }
            Param::Bool(b) => {
                body.push_str("<boolean>");
                body.push_str(if *b { "1" } else { "0" });
                body.push_str("</boolean>");
            }
        }
        body.push_str("</value></param>");
    }
    body.push_str("</params></methodCall>");
    body
}

/// Parse a `methodResponse` document.
pub fn decode_reply(body: &str) -> Result<Reply> {
    if !body.contains("<methodResponse") {
        return Err(DropcatchError::MalformedResponse(
            "missing methodResponse element".to_string(),
        ));
    }

    if let Some(fault) = between(body, "<fault>", "</fault>") {
        let members = parse_members(fault);
        let code = members
            .iter()
            .find(|(name, _)| name == "faultCode")
            .and_then(|(_, value)| value.parse::<i64>().ok())
            .unwrap_or(0);
        let message = members
            .into_iter()
            .find(|(name, _)| name == "faultString")
            .map(|(_, value)| value)
            .unwrap_or_default();
        return Ok(Reply::Fault { code, message });
    }

    let param = between_outer(body, "<param>", "</param>")
        .ok_or_else(|| DropcatchError::MalformedResponse("response has no param".to_string()))?;
    let value = between_outer(param, "<value>", "</value>")
        .ok_or_else(|| DropcatchError::MalformedResponse("param has no value".to_string()))?
        .trim();

    if value.starts_with("<struct>") {
        return Ok(Reply::Struct(parse_members(value)));
    }
    if value.starts_with("<string") || !value.starts_with('<') {
        return Ok(Reply::String(scalar_text(value)));
    }
    Ok(Reply::Other(scalar_text(value)))
}

fn parse_members(fragment: &str) -> Vec<(String, String)> {
    fragment
        .split("<member>")
        .skip(1)
        .filter_map(|chunk| {
            let chunk = chunk.split("</member>").next().unwrap_or(chunk);
            let name = between(chunk, "<name>", "</name>")?;
            let value = between_outer(chunk, "<value>", "</value>").unwrap_or("");
            Some((unescape(name.trim()), scalar_text(value)))
        })
        .collect()
}

/// Text content of a scalar value, with its type tag (if any) removed.
fn scalar_text(value: &str) -> String {
    let value = value.trim();
    if !value.starts_with('<') {
        return unescape(value);
    }
    let Some(tag_end) = value.find('>') else {
        return String::new();
    };
    if value[..tag_end].ends_with('/') {
        return String::new();
    }
    let inner = &value[tag_end + 1..];
    let inner = match inner.rfind("</") {
        Some(close) => &inner[..close],
        None => inner,
    };
    unescape(inner.trim())
}

fn between<'a>(haystack: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = haystack.find(open)? + open.len();
    let end = haystack[start..].find(close)? + start;
    Some(&haystack[start..end])
}

/// Like `between`, but closes on the last occurrence so nested elements survive.
fn between_outer<'a>(haystack: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = haystack.find(open)? + open.len();
    let end = haystack.rfind(close)?;
    (end >= start).then(|| &haystack[start..end])
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        match tail.find(';').and_then(|end| entity(&tail[1..end]).map(|c| (c, end))) {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Resolve an entity name (without `&` and `;`), including `#NN` and `#xNN` references.
fn entity(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "amp" => Some('&'),
        _ => {
            let code = name.strip_prefix('#')?;
            let value = match code.strip_prefix('x').or_else(|| code.strip_prefix('X')) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse::<u32>().ok()?,
            };
            char::from_u32(value)
        }
    }
}
