use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Kind of a tag item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagType {
    Artist,
    ArtistSort,
    Album,
    AlbumSort,
    AlbumArtist,
    AlbumArtistSort,
    Title,
    Track,
    Name,
    Genre,
    Date,
    OriginalDate,
    Composer,
    Performer,
    Comment,
    Disc,
    Label,
    MusicBrainzTrackId,
    MusicBrainzAlbumId,
}

/// A single `(type, value)` pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagItem {
    pub kind: TagType,
    pub value: String,
}

/// Song metadata as carried through the music pipe.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Song duration, when the source announces one.
    pub duration: Option<Duration>,
    /// The song is a container with sub-songs (e.g. an embedded cue sheet).
    pub has_playlist: bool,
    pub items: Vec<TagItem>,
}

impl Tag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append an item; empty values are ignored.
    pub fn add_item(&mut self, kind: TagType, value: impl Into<String>) {
        let value: String = value.into();
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        self.items.push(TagItem {
            kind,
            value: value.to_string(),
        });
    }

    /// Builder-style [`Tag::add_item`].
    pub fn with_item(mut self, kind: TagType, value: impl Into<String>) -> Self {
        self.add_item(kind, value);
        self
    }

    /// First value of the given type.
    pub fn get_value(&self, kind: TagType) -> Option<&str> {
        self.items
            .iter()
            .find(|item| item.kind == kind)
            .map(|item| item.value.as_str())
    }

    pub fn has_type(&self, kind: TagType) -> bool {
        self.items.iter().any(|item| item.kind == kind)
    }

    /// Merge two tags: every type present in `add` replaces the values of
    /// that type in `base`; everything else is taken from `base`.
    pub fn merge(base: &Tag, add: &Tag) -> Tag {
        let mut items = add.items.clone();
        items.extend(
            base.items
                .iter()
                .filter(|item| !add.has_type(item.kind))
                .cloned(),
        );

        Tag {
            duration: add.duration.or(base.duration),
            has_playlist: base.has_playlist || add.has_playlist,
            items,
        }
    }
}
