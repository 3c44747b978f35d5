//! Detection and parsing of authentication challenges.
//!
//! A `401` is answered with `Authorization`, a `407` with
//! `Proxy-Authorization`. The realm comes from the `Basic` challenge when the
//! server offers one, otherwise from the first challenge listed.

use reqwest::header::{HeaderMap, PROXY_AUTHENTICATE, WWW_AUTHENTICATE};

/// Which party issued the challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    /// Origin server (`401`).
    Server,
    /// Proxy (`407`).
    Proxy,
}

/// A parsed authentication challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    kind: ChallengeKind,
    scheme: String,
    realm: String,
}

impl AuthChallenge {
    /// Creates a challenge.
    #[must_use]
    pub fn new(kind: ChallengeKind, scheme: impl Into<String>, realm: impl Into<String>) -> Self {
        Self {
            kind,
            scheme: scheme.into(),
            realm: realm.into(),
        }
    }

    /// Issuer of the challenge.
    #[must_use]
    pub fn kind(&self) -> ChallengeKind {
        self.kind
    }

    /// Scheme selected for the answer.
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Realm string (empty when the server sent none).
    #[must_use]
    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Whether this engine can answer the challenge.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.scheme.eq_ignore_ascii_case("basic")
    }
}

/// Returns the challenge carried by a response, or `None` if `status` is not
/// an authentication challenge.
#[must_use]
pub fn parse_challenge(status: u16, headers: &HeaderMap) -> Option<AuthChallenge> {
    let (kind, header) = match status {
        401 => (ChallengeKind::Server, WWW_AUTHENTICATE),
        407 => (ChallengeKind::Proxy, PROXY_AUTHENTICATE),
        _ => return None,
    };

    let challenges: Vec<ParsedChallenge> = headers
        .get_all(header)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(split_challenges)
        .collect();

    // A bare 401 without a challenge header is answered with Basic.
    let Some(first) = challenges.first() else {
        return Some(AuthChallenge::new(kind, "Basic", ""));
    };
    let chosen = challenges
        .iter()
        .find(|c| c.scheme.eq_ignore_ascii_case("basic"))
        .unwrap_or(first);

    Some(AuthChallenge::new(
        kind,
        chosen.scheme.clone(),
        chosen.param("realm").unwrap_or_default(),
    ))
}

#[derive(Debug)]
struct ParsedChallenge {
    scheme: String,
    params: Vec<(String, String)>,
}

impl ParsedChallenge {
    fn param(&self, name: &str) -> Option<String> {
        self.params
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
    }
}

/// Splits one header value into challenges. Items are comma-separated outside
/// quotes; an item whose first word has no `=` starts a new challenge.
fn split_challenges(value: &str) -> Vec<ParsedChallenge> {
    let mut challenges: Vec<ParsedChallenge> = Vec::new();

    for item in split_unquoted(value, ',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }

        let first_word = item.split_whitespace().next().unwrap_or_default();
        let param_text = if first_word.contains('=') {
            item
        } else {
            challenges.push(ParsedChallenge {
                scheme: first_word.to_string(),
                params: Vec::new(),
            });
            item[first_word.len()..].trim()
        };

        if let (Some(current), Some((key, raw))) = (challenges.last_mut(), param_text.split_once('='))
        {
            current
                .params
                .push((key.trim().to_string(), unquote(raw.trim())));
        }
    }

    challenges
}

fn split_unquoted(value: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;

    for (idx, ch) in value.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == separator && !in_quotes => {
                parts.push(&value[start..idx]);
                start = idx + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);
    parts
}

fn unquote(raw: &str) -> String {
    let Some(inner) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) else {
        return raw.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut escaped = false;
    for ch in inner.chars() {
        if escaped {
            out.push(ch);
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else {
            out.push(ch);
        }
    }
    out
}
