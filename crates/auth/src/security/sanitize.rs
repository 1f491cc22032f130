//! Input sanitization and format validation for untrusted request bodies.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

/// Strips every tag and attribute. `script` and `style` lose their content
/// as well; any other element is replaced by its text.
static TEXT_ONLY: LazyLock<ammonia::Builder<'static>> = LazyLock::new(|| {
    let mut builder = ammonia::Builder::empty();
    builder.clean_content_tags(HashSet::from(["script", "style"]));
    builder
});

#[allow(clippy::expect_used)]
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$",
    )
    .expect("email pattern is valid")
});

/// E.164 shape: optional `+`, no leading zero after it, 7 to 15 digits.
#[allow(clippy::expect_used)]
static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\+[1-9]\d{6,14}|\d{7,15})$").expect("phone pattern is valid")
});

/// Longest address accepted, per RFC 5321.
const MAX_EMAIL_LEN: usize = 254;

/// Cleaning passes before giving up on decoding to plain text.
const MAX_CLEAN_PASSES: usize = 4;

/// Strip all HTML markup from a string and trim it.
///
/// The result is plain text: `"Smith & Sons"` comes back unchanged rather
/// than entity-escaped. Text that decodes into markup is cleaned again until
/// it is stable.
pub fn sanitize_text(input: &str) -> String {
    let mut text = input.trim().to_string();
    for _ in 0..MAX_CLEAN_PASSES {
        let plain = decode_entities(&TEXT_ONLY.clean(&text).to_string())
            .trim()
            .to_string();
        if plain == text {
            return plain;
        }
        text = plain;
    }
    // Still changing: keep the escaped form, which is inert.
    TEXT_ONLY.clean(&text).to_string().trim().to_string()
}

/// Undo the escaping the HTML serializer applies to text nodes.
fn decode_entities(escaped: &str) -> String {
    escaped
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&")
}

/// Escape text for interpolation into an HTML document.
pub fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// Sanitize a single JSON value.
///
/// Strings are stripped of markup and trimmed; every other value passes
/// through unchanged.
pub fn sanitize_input(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_text(&s)),
        other => other,
    }
}

/// Recursively sanitize every string in an object, descending into nested
/// objects and arrays. Numbers, booleans and null are left as they are.
pub fn sanitize_object(object: Map<String, Value>) -> Map<String, Value> {
    object
        .into_iter()
        .map(|(key, value)| (key, sanitize_value(value)))
        .collect()
}

fn sanitize_value(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(sanitize_object(map)),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_value).collect()),
        other => sanitize_input(other),
    }
}

/// Whether `email` is a syntactically valid address.
pub fn validate_email(email: &str) -> bool {
    email.len() <= MAX_EMAIL_LEN && EMAIL_RE.is_match(email)
}

/// Whether `phone` is a plausible phone number in any region.
///
/// Formatting characters (spaces, dashes, parentheses, dots) are ignored;
/// only digits and a leading `+` are kept before checking.
pub fn validate_phone(phone: &str) -> bool {
    let trimmed = phone.trim();
    let mut normalized = String::with_capacity(trimmed.len());
    if trimmed.starts_with('+') {
        normalized.push('+');
    }
    normalized.extend(trimmed.chars().filter(char::is_ascii_digit));
    PHONE_RE.is_match(&normalized)
}
