/// Out-of-band information about a stream's format.
///
/// These are typically taken from an HTTP `Content-Type` header, or from a
/// file name. Hinted probes are tried before all others, but a hint never
/// prevents a different format from being detected.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Hints {
    /// MIME type of the stream, e.g. `audio/mpeg`.
    pub mime_type: Option<String>,
    /// File extension of the stream, without a leading `.`.
    pub extension: Option<String>,
}

impl Hints {
    /// Sets the MIME type hint.
    #[must_use]
    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Sets the file extension hint.
    #[must_use]
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    /// Returns whether any hint has been given.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.mime_type.is_some() || self.extension.is_some()
    }

    /// Returns whether either hint matches one of the listed values.
    ///
    /// Comparison is case-insensitive. MIME parameters (e.g. `; charset=utf-8`)
    /// and a leading `.` on the extension are ignored.
    #[must_use]
    pub fn matches(&self, mime_types: &[&str], extensions: &[&str]) -> bool {
        let mime = self
            .mime_type
            .as_deref()
            .and_then(|m| m.split(';').next())
            .map(str::trim);

        let ext = self
            .extension
            .as_deref()
            .map(|e| e.trim().trim_start_matches('.'));

        mime.map_or(false, |m| {
            mime_types.iter().any(|known| known.eq_ignore_ascii_case(m))
        }) || ext.map_or(false, |e| {
            extensions.iter().any(|known| known.eq_ignore_ascii_case(e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hint_matching_is_loose() {
        let hints = Hints::default().mime_type("Audio/MPEG; charset=binary");
        assert!(hints.is_present());
        assert!(hints.matches(&["audio/mpeg"], &[]));

        let hints = Hints::default().extension(".FLAC");
        assert!(hints.matches(&[], &["flac"]));
        assert!(!hints.matches(&["audio/flac"], &["ogg"]));

        assert!(!Hints::default().is_present());
        assert!(!Hints::default().matches(&["audio/flac"], &["flac"]));
    }
}
