//! Source URI credential handling.
//!
//! Stored URIs never carry a `user:pass@` fragment. Credentials are kept
//! separately and only spliced back in when the command line is built.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Byte range of the `userinfo@` part of `uri`, if any.
fn userinfo_span(uri: &str) -> Option<(usize, usize)> {
    let start = uri.find("://")? + 3;
    let rest = &uri[start..];
    let authority_len = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let at = rest[..authority_len].rfind('@')?;
    Some((start, start + at + 1))
}

/// Remove any embedded credential fragment. Idempotent.
pub fn strip_credentials(uri: &str) -> String {
    match userinfo_span(uri) {
        Some((start, end)) => format!("{}{}", &uri[..start], &uri[end..]),
        None => uri.to_string(),
    }
}

/// Split `uri` into a clean URI and whatever credentials it embedded.
pub fn split_credentials(uri: &str) -> (String, Option<Credentials>) {
    let Some((start, end)) = userinfo_span(uri) else {
        return (uri.to_string(), None);
    };
    let userinfo = &uri[start..end - 1];
    let creds = match userinfo.split_once(':') {
        Some((user, pass)) => Credentials::new(user, pass),
        None => Credentials::new(userinfo, ""),
    };
    (strip_credentials(uri), Some(creds))
}

/// Build the URI handed to the transcoder. Always yields at most one
/// credential fragment, even if `uri` already contained one.
pub fn with_credentials(uri: &str, creds: Option<&Credentials>) -> String {
    let clean = strip_credentials(uri);
    let Some(creds) = creds.filter(|c| !c.username.is_empty()) else {
        return clean;
    };
    let Some(idx) = clean.find("://") else {
        return clean;
    };
    let (scheme, rest) = clean.split_at(idx + 3);
    if creds.password.is_empty() {
        format!("{}{}@{}", scheme, creds.username, rest)
    } else {
        format!("{}{}:{}@{}", scheme, creds.username, creds.password, rest)
    }
}

/// Replace the password portion of an embedded credential with `***`.
pub fn redact(uri: &str) -> String {
    let (clean, creds) = split_credentials(uri);
    match creds {
        Some(c) => with_credentials(&clean, Some(&Credentials::new(c.username, "***"))),
        None => clean,
    }
}

/// Redact every URI embedded in a line of free text, such as a transcoder
/// error message that echoes its input URL.
pub fn redact_text(text: &str) -> String {
    if !text.contains("://") {
        return text.to_string();
    }
    text.split(' ')
        .map(|word| {
            if word.contains("://") {
                redact(word)
            } else {
                word.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
