//! JSON models for the board catalog and thread endpoints.
//!
//! The source is loose about types: thread numbers arrive as numbers or
//! strings, and `tags`, `files` and counters may be missing or `null`. The
//! models normalize all of that at decode time.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `GET {base}/{board}/catalog.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Catalog {
    /// Board metadata.
    #[serde(default, deserialize_with = "null_as_default")]
    pub board: BoardInfo,
    /// Thread summaries.
    #[serde(default, deserialize_with = "null_as_default")]
    pub threads: Vec<CatalogThread>,
}

/// Board metadata block of a catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BoardInfo {
    /// Board identifier as used in URLs and cursor keys.
    #[serde(default, deserialize_with = "loose_string")]
    pub id: String,
}

/// One thread summary in a catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CatalogThread {
    /// Thread number.
    #[serde(default, deserialize_with = "loose_string")]
    pub num: String,
    /// Thread subject line.
    #[serde(default, deserialize_with = "loose_string")]
    pub subject: String,
    /// Free-form tags.
    #[serde(default, deserialize_with = "loose_string")]
    pub tags: String,
    /// Opening post text.
    #[serde(default, deserialize_with = "loose_string")]
    pub comment: String,
    /// Activity counter: number of files posted so far.
    #[serde(default, deserialize_with = "loose_i64")]
    pub files_count: i64,
}

/// `GET {base}/{board}/res/{num}.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ThreadPage {
    /// Thread number of the page.
    #[serde(default, deserialize_with = "loose_string")]
    pub current_thread: String,
    /// Post groups; usually exactly one.
    #[serde(default, deserialize_with = "null_as_default")]
    pub threads: Vec<PostGroup>,
}

impl ThreadPage {
    /// Iterates every file attached to any post, in page order.
    pub fn files(&self) -> impl Iterator<Item = &PostFile> {
        self.threads
            .iter()
            .flat_map(|group| group.posts.iter())
            .flat_map(|post| post.files.iter())
    }
}

/// A group of posts inside a thread page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PostGroup {
    /// Posts in order.
    #[serde(default, deserialize_with = "null_as_default")]
    pub posts: Vec<Post>,
}

/// A single post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Post {
    /// Attached files.
    #[serde(default, deserialize_with = "null_as_default")]
    pub files: Vec<PostFile>,
}

/// A file attached to a post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PostFile {
    /// Server-relative path of the file.
    #[serde(default, deserialize_with = "loose_string")]
    pub path: String,
    /// Content hash; used as the file fingerprint.
    #[serde(default, deserialize_with = "loose_string")]
    pub md5: String,
    /// Original name given by the uploader.
    #[serde(default, deserialize_with = "loose_string")]
    pub fullname: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts strings, numbers, booleans, arrays of those, or `null`.
fn loose_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    value_to_string(Value::deserialize(deserializer)?).map_err(de::Error::custom)
}

fn value_to_string(value: Value) -> Result<String, String> {
    match value {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Array(items) => {
            let parts = items
                .into_iter()
                .map(value_to_string)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(parts.join(" "))
        }
        Value::Object(_) => Err("expected a string or number, found an object".to_string()),
    }
}

/// Accepts integers, integral strings, or `null` (treated as 0).
fn loose_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| de::Error::custom(format!("counter {n} is not an integer"))),
        Value::String(s) if s.trim().is_empty() => Ok(0),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("counter {s:?} is not an integer"))),
        other => Err(de::Error::custom(format!(
            "expected an integer counter, found {other}"
        ))),
    }
}
