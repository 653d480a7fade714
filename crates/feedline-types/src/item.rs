//! Feed item model.
//!
//! An [`Item`] is one entry of a social feed. Items are identified by a stable
//! [`ItemId`] that doubles as the recency ordering key: a larger id is newer.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier of a feed item.
///
/// Identifiers are allocated monotonically by the upstream service, so ordering
/// by id is ordering by recency.
///
/// Filters see ids as signed 64-bit integers. Ids above `i64::MAX` all read as
/// `i64::MAX` there, so `id == 9223372036854775807` matches every one of them
/// and ordering comparisons cannot tell them apart. Buffer ordering and
/// deduplication use the full `u64` and are unaffected.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl ItemId {
    /// Returns the id as a signed integer, the representation used by filters
    /// and query text. Ids above `i64::MAX` saturate to `i64::MAX`.
    pub fn as_i64(self) -> i64 {
        i64::try_from(self.0).unwrap_or(i64::MAX)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ItemId {
    fn from(value: u64) -> Self {
        ItemId(value)
    }
}

/// A feed entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// The unique identifier (and recency key) of the item.
    pub id: ItemId,

    /// Screen name of the author.
    pub author: String,

    /// Body text.
    #[serde(default)]
    pub text: String,

    /// Whether the item carries attached media.
    #[serde(default)]
    pub has_media: bool,

    /// Whether the item is a re-share of another item.
    #[serde(default)]
    pub is_retweet: bool,

    /// The item this one replies to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<ItemId>,

    /// Number of times the item was favorited.
    #[serde(default)]
    pub favorite_count: u32,

    /// Detected language code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,

    /// When the item was created.
    #[serde(default = "unix_epoch")]
    pub created_at: DateTime<Utc>,
}

fn unix_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

impl Item {
    /// Creates an item with the given id, author and text. All other fields
    /// take their defaults.
    pub fn new(id: impl Into<ItemId>, author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            author: author.into(),
            text: text.into(),
            has_media: false,
            is_retweet: false,
            in_reply_to: None,
            favorite_count: 0,
            lang: None,
            created_at: unix_epoch(),
        }
    }

    /// Sets `has_media`.
    pub fn with_media(mut self, has_media: bool) -> Self {
        self.has_media = has_media;
        self
    }

    /// Sets the item this one replies to.
    pub fn replying_to(mut self, id: impl Into<ItemId>) -> Self {
        self.in_reply_to = Some(id.into());
        self
    }

    /// Sets the language code.
    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }

    /// Sets the creation timestamp.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Returns the value of a filterable field.
    pub fn field_value(&self, field: Field) -> FieldValue<'_> {
        match field {
            Field::Id => FieldValue::Integer(self.id.as_i64()),
            Field::Author => FieldValue::Text(&self.author),
            Field::Text => FieldValue::Text(&self.text),
            Field::HasMedia => FieldValue::Bool(self.has_media),
            Field::IsRetweet => FieldValue::Bool(self.is_retweet),
            Field::InReplyTo => self
                .in_reply_to
                .map_or(FieldValue::Null, |id| FieldValue::Integer(id.as_i64())),
            Field::FavoriteCount => FieldValue::Integer(i64::from(self.favorite_count)),
            Field::Lang => self
                .lang
                .as_deref()
                .map_or(FieldValue::Null, FieldValue::Text),
            Field::CreatedAt => FieldValue::Integer(self.created_at.timestamp()),
        }
    }
}

/// The value of one field of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    /// The field is absent.
    Null,
    /// An integer column.
    Integer(i64),
    /// A text column.
    Text(&'a str),
    /// A boolean column.
    Bool(bool),
}

/// The storage type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Signed 64-bit integer.
    Integer,
    /// UTF-8 text.
    Text,
    /// Boolean, stored as integer 0/1 by the storage layer.
    Bool,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Integer => "integer",
            FieldKind::Text => "text",
            FieldKind::Bool => "bool",
        };
        f.write_str(name)
    }
}

/// A filterable column of an [`Item`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// Saturates at `i64::MAX`, see [`ItemId`].
    Id,
    Author,
    Text,
    HasMedia,
    IsRetweet,
    /// Saturates like [`Field::Id`].
    InReplyTo,
    FavoriteCount,
    Lang,
    /// Creation time as unix seconds.
    CreatedAt,
}

impl Field {
    /// Every filterable field, in declaration order.
    pub const ALL: [Field; 9] = [
        Field::Id,
        Field::Author,
        Field::Text,
        Field::HasMedia,
        Field::IsRetweet,
        Field::InReplyTo,
        Field::FavoriteCount,
        Field::Lang,
        Field::CreatedAt,
    ];

    /// The column name used in filter text and query text.
    pub fn name(self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::Author => "author",
            Field::Text => "text",
            Field::HasMedia => "has_media",
            Field::IsRetweet => "is_retweet",
            Field::InReplyTo => "in_reply_to",
            Field::FavoriteCount => "favorite_count",
            Field::Lang => "lang",
            Field::CreatedAt => "created_at",
        }
    }

    /// Looks a field up by column name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Field> {
        let lower = name.to_ascii_lowercase();
        Field::ALL.into_iter().find(|field| field.name() == lower)
    }

    /// The storage type of the field.
    pub fn kind(self) -> FieldKind {
        match self {
            Field::Id | Field::InReplyTo | Field::FavoriteCount | Field::CreatedAt => {
                FieldKind::Integer
            }
            Field::Author | Field::Text | Field::Lang => FieldKind::Text,
            Field::HasMedia | Field::IsRetweet => FieldKind::Bool,
        }
    }

    /// Whether the field may be absent on an item.
    pub fn is_nullable(self) -> bool {
        matches!(self, Field::InReplyTo | Field::Lang)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
