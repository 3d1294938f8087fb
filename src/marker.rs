//! Marker policy: has this message already been annotated, and is this attachment audio
//! we transcribe?
//!
//! The marker is the only record of "already processed" that exists. It lives in the
//! message body itself, so the mailbox stays the single source of truth.

use std::path::Path;

use crate::message::{Body, BodyKind};

/// Marker written at the top of every transcript block.
pub const DEFAULT_MARKER: &str = "--- AUTOMATISCHES TRANSKRIPT ---";

/// Attachment extension eligible for transcription.
pub const DEFAULT_AUDIO_EXTENSION: &str = "wav";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerPolicy {
    marker: String,
    extension: String,
}

impl Default for MarkerPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER, DEFAULT_AUDIO_EXTENSION)
    }
}

impl MarkerPolicy {
    /// `extension` may be given with or without the leading dot.
    pub fn new(marker: impl Into<String>, extension: impl AsRef<str>) -> Self {
        Self {
            marker: marker.into(),
            extension: extension.as_ref().trim_start_matches('.').to_ascii_lowercase(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Case-sensitive substring match of the marker anywhere in `body`.
    ///
    /// An empty body never carries the marker.
    pub fn has_marker(&self, body: &str) -> bool {
        !self.marker.is_empty() && body.contains(&self.marker)
    }

    /// Like [`has_marker`](Self::has_marker), but also accepts the HTML-escaped marker in
    /// HTML bodies (what a mail client stores after re-saving our block).
    pub fn body_has_marker(&self, body: &Body) -> bool {
        if self.has_marker(&body.content) {
            return true;
        }
        if body.kind != BodyKind::Html {
            return false;
        }
        let escaped = html_escape::encode_text(&self.marker);
        escaped.as_ref() != self.marker.as_str() && body.content.contains(escaped.as_ref())
    }

    /// Case-insensitive match of the filename extension.
    pub fn is_eligible_extension(&self, filename: &str) -> bool {
        Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.extension))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_marker_is_a_case_sensitive_substring_match() {
        let policy = MarkerPolicy::default();
        assert!(policy.has_marker("Hallo\n--- AUTOMATISCHES TRANSKRIPT ---\n[a.wav]\nhi"));
        assert!(!policy.has_marker("--- automatisches transkript ---"));
        assert!(!policy.has_marker(""));
    }

    #[test]
    fn empty_marker_never_matches() {
        let policy = MarkerPolicy::new("", "wav");
        assert!(!policy.has_marker("anything"));
    }

    #[test]
    fn html_bodies_match_the_escaped_marker() {
        let policy = MarkerPolicy::new("<<TRANSCRIPT>>", "wav");
        let body = Body::html("<p>&lt;&lt;TRANSCRIPT&gt;&gt;</p>");
        assert!(policy.body_has_marker(&body));

        let text = Body::text("&lt;&lt;TRANSCRIPT&gt;&gt;");
        assert!(!policy.body_has_marker(&text));
    }

    #[test]
    fn extension_match_ignores_case_and_leading_dot() {
        let policy = MarkerPolicy::new(DEFAULT_MARKER, ".WAV");
        assert!(policy.is_eligible_extension("voice.wav"));
        assert!(policy.is_eligible_extension("VOICE.Wav"));
        assert!(policy.is_eligible_extension("archive.tar.wav"));
        assert!(!policy.is_eligible_extension("note.txt"));
        assert!(!policy.is_eligible_extension("wav"));
        assert!(!policy.is_eligible_extension(".wav"));
        assert!(!policy.is_eligible_extension("voice.wav.txt"));
        assert!(!policy.is_eligible_extension(""));
    }
}
