//! Address list cleaning.
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::debug;

const DELIMITERS: &[char] = &[',', ';', '\n', '\r', '\t'];

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?$",
    )
    .expect("valid email regex")
});

/// Cleans a single address: trims, unwraps `Name <addr>`, lower-cases the
/// domain and validates the result. Returns `None` for anything unusable.
pub fn clean_address(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let candidate = match trimmed.rfind('<') {
        Some(start) if trimmed.ends_with('>') => trimmed[start + 1..trimmed.len() - 1].trim(),
        _ => trimmed,
    };
    let (local, domain) = candidate.rsplit_once('@')?;
    if local.is_empty()
        || local.len() > 64
        || local.starts_with('.')
        || local.ends_with('.')
        || local.contains("..")
    {
        return None;
    }
    let address = format!("{}@{}", local, domain.to_ascii_lowercase());
    if address.len() > 254 || !EMAIL_RE.is_match(&address) {
        return None;
    }
    Some(address)
}

/// Cleans any mix of single addresses and delimited strings into valid,
/// deduplicated addresses in first-seen order.
pub fn clean_email_list<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        for part in item.as_ref().split(DELIMITERS) {
            if part.trim().is_empty() {
                continue;
            }
            match clean_address(part) {
                Some(address) => {
                    if seen.insert(address.to_ascii_lowercase()) {
                        out.push(address);
                    }
                }
                None => debug!(address = part.trim(), "dropping malformed address"),
            }
        }
    }
    out
}

/// Removes from `cc` anything in `to`, and from `bcc` anything in `to` or `cc`.
pub fn enforce_disjoint(
    to: &[String],
    cc: Vec<String>,
    bcc: Vec<String>,
) -> (Vec<String>, Vec<String>) {
    let key = |address: &String| address.to_ascii_lowercase();
    let mut taken: HashSet<String> = to.iter().map(key).collect();
    let cc: Vec<String> = cc.into_iter().filter(|a| !taken.contains(&key(a))).collect();
    taken.extend(cc.iter().map(key));
    let bcc = bcc.into_iter().filter(|a| !taken.contains(&key(a))).collect();
    (cc, bcc)
}
