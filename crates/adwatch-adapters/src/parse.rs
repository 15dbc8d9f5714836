//! Pure translation of platform response bodies into `AdDraft`s.

use adwatch_core::{AdDraft, EngagementSignals, MediaFormat, Platform};
use adwatch_storage::sha256_hex;
use serde_json::Value as JsonValue;

use crate::AdapterError;

type FieldPaths = &'static [&'static [&'static str]];

/// Where each field lives in one platform's ad record. Every field lists
/// candidate paths tried in order.
#[derive(Debug, Clone, Copy)]
pub struct RecordShape {
    pub platform: Platform,
    pub list_key: &'static str,
    pub id: FieldPaths,
    pub headline: FieldPaths,
    pub description: FieldPaths,
    pub destination_url: FieldPaths,
    pub image: FieldPaths,
    pub format: FieldPaths,
    pub impressions: FieldPaths,
}

pub(crate) const GENERAL_SEARCH: RecordShape = RecordShape {
    platform: Platform::GeneralSearch,
    list_key: "ads",
    id: &[&["creativeId"], &["id"]],
    headline: &[&["headline"], &["title"]],
    description: &[&["description"]],
    destination_url: &[&["destinationUrl"], &["url"]],
    image: &[&["imageUrl"]],
    format: &[&["format"]],
    impressions: &[&["impressions"]],
};

pub(crate) const SOCIAL: RecordShape = RecordShape {
    platform: Platform::Social,
    list_key: "searchResults",
    id: &[&["ad_archive_id"], &["adArchiveID"], &["id"]],
    headline: &[&["snapshot", "title"], &["snapshot", "page_name"]],
    description: &[&["snapshot", "body", "text"], &["snapshot", "body"]],
    destination_url: &[&["snapshot", "link_url"]],
    image: &[&["snapshot", "images"], &["snapshot", "videos"]],
    format: &[&["snapshot", "display_format"]],
    impressions: &[&["impressions_with_index", "impressions_text"], &["impressions"]],
};

pub(crate) const FORUM: RecordShape = RecordShape {
    platform: Platform::Forum,
    list_key: "ads",
    id: &[&["id"]],
    headline: &[&["creative", "headline"]],
    description: &[&["creative", "body"]],
    destination_url: &[&["creative", "destinationUrl"]],
    image: &[&["creative", "imageUrl"]],
    format: &[&["creative", "format"]],
    impressions: &[&["impressions"]],
};

pub(crate) const PROFESSIONAL_NETWORK: RecordShape = RecordShape {
    platform: Platform::ProfessionalNetwork,
    list_key: "ads",
    id: &[&["id"], &["adId"]],
    headline: &[&["headline"]],
    description: &[&["description"], &["commentary"]],
    destination_url: &[&["destinationUrl"]],
    image: &[&["imageUrl"]],
    format: &[&["format"]],
    impressions: &[&["impressions"]],
};

const CREDENTIAL_KEYS: [&str; 8] = [
    "api_key",
    "apikey",
    "api-key",
    "token",
    "authorization",
    "secret",
    "password",
    "access_key",
];

const REDACTED: &str = "[redacted]";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedPage {
    pub ads: Vec<AdDraft>,
    /// Records dropped because they carried nothing usable.
    pub skipped: usize,
    pub next_cursor: Option<String>,
}

fn lookup<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    Some(cur)
}

fn first_text(record: &JsonValue, paths: FieldPaths) -> Option<String> {
    paths
        .iter()
        .filter_map(|path| lookup(record, path)?.as_str())
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(ToString::to_string)
}

fn first_value<'a>(record: &'a JsonValue, paths: FieldPaths) -> Option<&'a JsonValue> {
    paths
        .iter()
        .filter_map(|path| lookup(record, path))
        .find(|v| !v.is_null())
}

fn explicit_id(record: &JsonValue, paths: FieldPaths) -> Option<String> {
    first_value(record, paths).and_then(|v| match v {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Fallback id for records without one. Only creative fields feed the hash,
/// in a fixed order, so moving counters keep the same id.
fn identity_hash(fields: [Option<&str>; 4]) -> String {
    let canonical = fields
        .iter()
        .map(|field| field.unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\u{1f}");
    format!("sha256:{}", sha256_hex(canonical.as_bytes()))
}

fn media_format(record: &JsonValue, shape: &RecordShape) -> Option<MediaFormat> {
    if let Some(format) = first_text(record, shape.format).and_then(|f| MediaFormat::from_upstream(&f)) {
        return Some(format);
    }
    let media = first_value(record, shape.image)?;
    match media {
        JsonValue::Array(items) if items.len() > 1 => Some(MediaFormat::Carousel),
        JsonValue::Array(items) if items.is_empty() => None,
        JsonValue::String(s) if s.trim().is_empty() => None,
        _ => Some(MediaFormat::Image),
    }
}

fn count_field(record: &JsonValue, keys: &[&str]) -> Option<u64> {
    [Some(record), record.get("engagement")]
        .into_iter()
        .flatten()
        .flat_map(|scope| keys.iter().filter_map(move |key| scope.get(*key)))
        .find_map(parse_impressions)
}

fn engagement(record: &JsonValue) -> Option<EngagementSignals> {
    let likes = count_field(record, &["likes", "like_count", "upvotes"]);
    let comments = count_field(record, &["comments", "comment_count"]);
    let shares = count_field(record, &["shares", "share_count"]);
    if likes.is_none() && comments.is_none() && shares.is_none() {
        return None;
    }
    Some(EngagementSignals {
        likes: likes.unwrap_or(0),
        comments: comments.unwrap_or(0),
        shares: shares.unwrap_or(0),
    })
}

/// Impressions as platforms report them: plain numbers or text such as
/// `"1,200"`, `"1.5K"`, `"<100"` or `"1,000-5,000"`. Anything else is
/// treated as absent rather than zero.
pub fn parse_impressions(value: &JsonValue) -> Option<u64> {
    match value {
        JsonValue::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f.round() as u64)),
        JsonValue::String(s) => parse_impressions_text(s),
        _ => None,
    }
}

fn parse_impressions_text(text: &str) -> Option<u64> {
    let cleaned: String = text
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();
    if cleaned.is_empty() {
        return None;
    }

    let estimate = if let Some(bound) = cleaned.strip_prefix('<') {
        scaled_number(bound)? / 2.0
    } else if let Some((low, high)) = cleaned.split_once(['-', '–']) {
        (scaled_number(low)? + scaled_number(high)?) / 2.0
    } else {
        scaled_number(cleaned.trim_start_matches(['>', '~']))?
    };
    Some(estimate.round() as u64)
}

fn scaled_number(text: &str) -> Option<f64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let rest = &text[start..];
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    let value: f64 = rest[..end].parse().ok()?;
    let multiplier = match rest[end..].chars().next() {
        Some('k') => 1_000.0,
        Some('m') => 1_000_000.0,
        Some('b') => 1_000_000_000.0,
        _ => 1.0,
    };
    Some(value * multiplier)
}

/// Scrub anything that looks like a credential out of a payload snapshot.
pub fn redact_credentials(value: &mut JsonValue, secret: Option<&str>) {
    let secret = secret.map(str::trim).filter(|s| !s.is_empty());
    match value {
        JsonValue::Object(map) => {
            for (key, child) in map.iter_mut() {
                let key = key.to_ascii_lowercase();
                if CREDENTIAL_KEYS.iter().any(|needle| key.contains(needle)) {
                    *child = JsonValue::String(REDACTED.to_string());
                } else {
                    redact_credentials(child, secret);
                }
            }
        }
        JsonValue::Array(items) => {
            for item in items {
                redact_credentials(item, secret);
            }
        }
        JsonValue::String(s) => {
            if let Some(secret) = secret {
                if s.contains(secret) {
                    *s = s.replace(secret, REDACTED);
                }
            }
        }
        _ => {}
    }
}

fn parse_record(record: &JsonValue, shape: &RecordShape, secret: Option<&str>) -> Option<AdDraft> {
    if !record.is_object() {
        return None;
    }
    let headline = first_text(record, shape.headline);
    let description = first_text(record, shape.description);
    let destination_url = first_text(record, shape.destination_url);
    if headline.is_none() && description.is_none() && destination_url.is_none() {
        return None;
    }

    let external_ad_id = explicit_id(record, shape.id).unwrap_or_else(|| {
        let format = first_text(record, shape.format);
        identity_hash([
            headline.as_deref(),
            description.as_deref(),
            destination_url.as_deref(),
            format.as_deref(),
        ])
    });

    let mut raw_payload = record.clone();
    redact_credentials(&mut raw_payload, secret);

    Some(AdDraft {
        platform: shape.platform,
        external_ad_id,
        headline,
        description,
        destination_url,
        media_format: media_format(record, shape),
        impressions: first_value(record, shape.impressions).and_then(parse_impressions),
        engagement: engagement(record),
        raw_payload,
    })
}

/// Parse one response page. A body that is not an object, or whose ad list
/// is not an array, is a malformed response; individual unusable records
/// are skipped and counted.
pub fn parse_page(
    shape: &RecordShape,
    body: &JsonValue,
    secret: Option<&str>,
) -> Result<ParsedPage, AdapterError> {
    let Some(object) = body.as_object() else {
        return Err(AdapterError::malformed(format!(
            "{} response is not a JSON object",
            shape.platform
        )));
    };

    let records = match object.get(shape.list_key) {
        None | Some(JsonValue::Null) => return Ok(ParsedPage::default()),
        Some(JsonValue::Array(records)) => records,
        Some(_) => {
            return Err(AdapterError::malformed(format!(
                "{} response field `{}` is not a list",
                shape.platform, shape.list_key
            )))
        }
    };

    let mut page = ParsedPage {
        next_cursor: object
            .get("cursor")
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(ToString::to_string),
        ..ParsedPage::default()
    };
    for record in records {
        match parse_record(record, shape, secret) {
            Some(draft) => page.ads.push(draft),
            None => page.skipped += 1,
        }
    }
    Ok(page)
}
