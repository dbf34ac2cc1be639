use once_cell::sync::Lazy;
use regex::Regex;

use super::address::clean_address;
use crate::model::{HeaderInput, Mailbox};

static NAMED_MAILBOX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*"?([^"<]*?)"?\s*<([^<>]+)>\s*$"#).expect("valid mailbox regex"));

/// Flattens a header block or list into ordered single-line headers. Blank
/// lines are dropped and folded continuation lines are joined to their header.
pub fn normalize_headers(input: Option<&HeaderInput>) -> Vec<String> {
    let lines: Vec<&str> = match input {
        None => Vec::new(),
        Some(HeaderInput::Block(block)) => block.lines().collect(),
        Some(HeaderInput::Lines(lines)) => lines.iter().flat_map(|l| l.lines()).collect(),
    };

    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        if line.starts_with(&[' ', '\t'][..]) {
            if let Some(last) = out.last_mut() {
                last.push(' ');
                last.push_str(line.trim());
                continue;
            }
        }
        out.push(line.trim().to_string());
    }
    out
}

/// Value of the first header called `name` (case-insensitive).
pub fn header_value<'a>(headers: &'a [String], name: &str) -> Option<&'a str> {
    headers.iter().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then_some(value.trim())
    })
}

/// Parses `Name <email>`, `"Name" <email>` or a bare address.
pub fn parse_mailbox(value: &str) -> Option<Mailbox> {
    if let Some(caps) = NAMED_MAILBOX_RE.captures(value) {
        let email = clean_address(&caps[2])?;
        let name = caps[1].trim();
        return Some(Mailbox {
            email,
            name: (!name.is_empty()).then(|| name.to_string()),
        });
    }
    clean_address(value).map(Mailbox::new)
}
