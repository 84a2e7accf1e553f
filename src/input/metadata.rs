//! Track information and references to audio resources.

use super::SeekableStream;
use crate::constants::{UNKNOWN_ARTIST, UNKNOWN_TITLE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A reference to an audio resource, such as a URL or file path.
///
/// Playlist containers resolve to another reference rather than to audio.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct AudioReference {
    /// Identifier of the resource (typically its URL or path).
    pub identifier: String,
    /// Title of the resource, if it was known at the point of reference.
    pub title: Option<String>,
}

impl AudioReference {
    /// Create a reference to an identifier, with an optional title.
    pub fn new(identifier: impl Into<String>, title: Option<String>) -> Self {
        Self {
            identifier: identifier.into(),
            title,
        }
    }
}

/// Immutable descriptive information about a detected audio track.
///
/// This is built using a [`TrackInfoBuilder`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    /// Track title.
    pub title: String,
    /// Track artist or author.
    pub author: String,
    /// Track duration, if known.
    ///
    /// This is `None` for live streams and sources of unknown length.
    pub length: Option<Duration>,
    /// Identifier of the source this track was read from.
    pub identifier: String,
    /// Whether this track is a (potentially endless) stream.
    pub is_stream: bool,
    /// URL of the track, if it has one.
    pub uri: Option<String>,
    /// URL of artwork for the track.
    pub artwork_url: Option<String>,
    /// International Standard Recording Code of the track.
    pub isrc: Option<String>,
    /// Opaque data attached by a source, passed through unchanged.
    pub source_data: Option<String>,
}

impl TrackInfo {
    /// Length of the track in milliseconds, if known.
    #[must_use]
    pub fn length_ms(&self) -> Option<u64> {
        self.length.map(|d| d.as_millis() as u64)
    }
}

/// A source of partial track information.
///
/// Every method defaults to `None`; implementors override those fields
/// they can supply.
pub trait TrackInfoProvider: Send + Sync {
    /// Title of the track.
    fn title(&self) -> Option<String> {
        None
    }

    /// Author/artist of the track.
    fn author(&self) -> Option<String> {
        None
    }

    /// Length of the track.
    fn length(&self) -> Option<Duration> {
        None
    }

    /// Identifier of the track.
    fn identifier(&self) -> Option<String> {
        None
    }

    /// URI of the track.
    fn uri(&self) -> Option<String> {
        None
    }

    /// Artwork URL for the track.
    fn artwork_url(&self) -> Option<String> {
        None
    }

    /// ISRC of the track.
    fn isrc(&self) -> Option<String> {
        None
    }
}

/// Fixed track information, typically from a transport header (e.g., ICY `icy-name`).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StaticTrackInfo {
    /// Title to report, if any.
    pub title: Option<String>,
    /// Author to report, if any.
    pub author: Option<String>,
    /// Artwork URL to report, if any.
    pub artwork_url: Option<String>,
}

impl TrackInfoProvider for StaticTrackInfo {
    fn title(&self) -> Option<String> {
        self.title.clone()
    }

    fn author(&self) -> Option<String> {
        self.author.clone()
    }

    fn artwork_url(&self) -> Option<String> {
        self.artwork_url.clone()
    }
}

/// Incremental builder for [`TrackInfo`].
///
/// Each field is only written if it has not already been set, so sources
/// applied earlier take priority. Detection seeds the builder from the
/// [`AudioReference`] and any metadata embedded in the stream's transport,
/// before container-level tags are applied.
#[derive(Clone, Debug, Default)]
pub struct TrackInfoBuilder {
    title: Option<String>,
    author: Option<String>,
    length: Option<Duration>,
    identifier: Option<String>,
    is_stream: Option<bool>,
    uri: Option<String>,
    artwork_url: Option<String>,
    isrc: Option<String>,
    source_data: Option<String>,
}

fn set_once<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl TrackInfoBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder seeded from a reference, and the metadata providers of `stream`.
    pub fn for_stream(reference: &AudioReference, stream: &dyn SeekableStream) -> Self {
        let mut out = Self::new();

        for provider in stream.track_info_providers() {
            out.apply(provider);
        }

        out.set_identifier(Some(reference.identifier.clone()));
        out.set_uri(Some(reference.identifier.clone()));
        out.set_title(reference.title.clone());

        out
    }

    /// Fill unset fields from a provider.
    pub fn apply(&mut self, provider: &dyn TrackInfoProvider) -> &mut Self {
        self.set_title(provider.title());
        self.set_author(provider.author());
        self.set_length(provider.length());
        self.set_identifier(provider.identifier());
        self.set_uri(provider.uri());
        self.set_artwork_url(provider.artwork_url());
        self.set_isrc(provider.isrc());
        self
    }

    /// Set the title, if unset. Blank values are ignored.
    pub fn set_title(&mut self, title: Option<String>) -> &mut Self {
        set_once(&mut self.title, non_blank(title));
        self
    }

    /// Set the author, if unset. Blank values are ignored.
    pub fn set_author(&mut self, author: Option<String>) -> &mut Self {
        set_once(&mut self.author, non_blank(author));
        self
    }

    /// Set the length, if unset.
    pub fn set_length(&mut self, length: Option<Duration>) -> &mut Self {
        set_once(&mut self.length, length);
        self
    }

    /// Set the length in milliseconds, if unset.
    pub fn set_length_ms(&mut self, length_ms: Option<u64>) -> &mut Self {
        self.set_length(length_ms.map(Duration::from_millis))
    }

    /// Set the identifier, if unset.
    pub fn set_identifier(&mut self, identifier: Option<String>) -> &mut Self {
        set_once(&mut self.identifier, identifier);
        self
    }

    /// Mark whether this track is a stream, if unset.
    pub fn set_is_stream(&mut self, is_stream: bool) -> &mut Self {
        set_once(&mut self.is_stream, Some(is_stream));
        self
    }

    /// Set the URI, if unset.
    pub fn set_uri(&mut self, uri: Option<String>) -> &mut Self {
        set_once(&mut self.uri, uri);
        self
    }

    /// Set the artwork URL, if unset.
    pub fn set_artwork_url(&mut self, artwork_url: Option<String>) -> &mut Self {
        set_once(&mut self.artwork_url, non_blank(artwork_url));
        self
    }

    /// Set the ISRC, if unset.
    pub fn set_isrc(&mut self, isrc: Option<String>) -> &mut Self {
        set_once(&mut self.isrc, non_blank(isrc));
        self
    }

    /// Set the opaque source data, if unset.
    pub fn set_source_data(&mut self, source_data: Option<String>) -> &mut Self {
        set_once(&mut self.source_data, source_data);
        self
    }

    /// Produce the final, immutable track info.
    ///
    /// Tracks without a known length default to being streams.
    #[must_use]
    pub fn build(&self) -> TrackInfo {
        TrackInfo {
            title: self
                .title
                .clone()
                .unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
            author: self
                .author
                .clone()
                .unwrap_or_else(|| UNKNOWN_ARTIST.to_string()),
            length: self.length,
            identifier: self.identifier.clone().unwrap_or_default(),
            is_stream: self.is_stream.unwrap_or_else(|| self.length.is_none()),
            uri: self.uri.clone(),
            artwork_url: self.artwork_url.clone(),
            isrc: self.isrc.clone(),
            source_data: self.source_data.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{input::SourceStream, Config};

    #[test]
    fn first_value_wins() {
        let mut builder = TrackInfoBuilder::new();
        builder
            .set_title(Some("First".into()))
            .set_title(Some("Second".into()))
            .set_author(Some("  ".into()))
            .set_author(Some("Someone".into()));

        let info = builder.build();
        assert_eq!(info.title, "First");
        assert_eq!(info.author, "Someone");
        assert!(info.is_stream);
        assert_eq!(info.length_ms(), None);
    }

    #[test]
    fn stream_providers_take_priority_over_tags() {
        let cfg = Config::default();
        let stream = SourceStream::from_memory(vec![], &cfg).with_provider(StaticTrackInfo {
            title: Some("Radio Name".into()),
            ..Default::default()
        });

        let reference = AudioReference::new("http://example.com/stream", None);
        let mut builder = TrackInfoBuilder::for_stream(&reference, &stream);
        builder.set_title(Some("Tagged".into()));
        builder.set_length_ms(Some(1500));

        let info = builder.build();
        assert_eq!(info.title, "Radio Name");
        assert_eq!(info.author, UNKNOWN_ARTIST);
        assert_eq!(info.identifier, "http://example.com/stream");
        assert_eq!(info.length, Some(Duration::from_millis(1500)));
        assert!(!info.is_stream);
    }

    #[test]
    fn track_info_serialises() {
        let info = TrackInfoBuilder::new().build();
        let json = serde_json::to_value(&info).unwrap();

        assert_eq!(json["title"], UNKNOWN_TITLE);
        assert_eq!(json["is_stream"], true);
    }
}
