//! Annotation formatter: render transcripts into the block appended to a message body.
//!
//! The block looks like this (plain-text bodies):
//!
//! ```text
//! <existing body>
//!
//! --- AUTOMATISCHES TRANSKRIPT ---
//! [a.wav]
//! hello
//! [b.wav]
//! (Transkription fehlgeschlagen: Zeitüberschreitung)
//! ```
//!
//! Formatting is not idempotent on its own: formatting twice yields two blocks. The
//! eligibility filter guarantees a marked message is never formatted again.

use crate::message::{Body, BodyKind};
use crate::transcriber::{FailureKind, TranscriptionResult};

/// Shown instead of a transcript when the audio contained no recognisable speech.
pub const NO_SPEECH_PLACEHOLDER: &str = "(keine Sprache erkannt)";

/// Build the new body: the existing body, unchanged, followed by the transcript block.
pub fn format(existing: &Body, results: &[TranscriptionResult], marker: &str) -> Body {
    let lines = block_lines(results, marker);
    let content = match existing.kind {
        BodyKind::Text => append_text(&existing.content, &lines),
        BodyKind::Html => append_html(&existing.content, &lines),
    };
    Body {
        kind: existing.kind,
        content,
    }
}

/// The block as individual lines, in attachment order.
pub fn block_lines(results: &[TranscriptionResult], marker: &str) -> Vec<String> {
    let mut lines = Vec::with_capacity(1 + results.len() * 2);
    lines.push(marker.to_owned());
    for result in results {
        lines.push(format!("[{}]", result.filename));
        lines.push(match &result.outcome {
            Ok(text) if text.trim().is_empty() => NO_SPEECH_PLACEHOLDER.to_owned(),
            Ok(text) => text.trim().to_owned(),
            Err(failure) => error_placeholder(failure.kind),
        });
    }
    lines
}

/// Visible placeholder for a failed attachment. Only the failure class is shown; the
/// detailed reason goes to the logs, not into the mailbox.
pub fn error_placeholder(kind: FailureKind) -> String {
    let label = match kind {
        FailureKind::Fetch => "Anhang nicht abrufbar",
        FailureKind::UnreadableAudio => "Audio nicht lesbar",
        FailureKind::Engine | FailureKind::ResourceExhausted => "Fehler der Spracherkennung",
        FailureKind::Timeout => "Zeitüberschreitung",
    };
    format!("(Transkription fehlgeschlagen: {label})")
}

fn append_text(existing: &str, lines: &[String]) -> String {
    let block_len: usize = lines.iter().map(|l| l.len() + 1).sum();
    let mut out = String::with_capacity(existing.len() + block_len + 2);
    out.push_str(existing);
    if !existing.is_empty() {
        if !existing.ends_with('\n') {
            out.push('\n');
        }
        out.push('\n');
    }
    out.push_str(&lines.join("\n"));
    out.push('\n');
    out
}

fn append_html(existing: &str, lines: &[String]) -> String {
    let escaped: Vec<String> = lines
        .iter()
        .map(|l| html_escape::encode_text(l).into_owned())
        .collect();
    let block = format!("<p>{}</p>\n", escaped.join("<br>\n"));

    // ASCII lowercasing keeps byte offsets intact.
    match existing.to_ascii_lowercase().rfind("</body>") {
        Some(pos) => {
            let mut out = String::with_capacity(existing.len() + block.len());
            out.push_str(&existing[..pos]);
            out.push_str(&block);
            out.push_str(&existing[pos..]);
            out
        }
        None => format!("{existing}{block}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::DEFAULT_MARKER;
    use crate::transcriber::TranscriptionFailure;

    fn ok(name: &str, text: &str) -> TranscriptionResult {
        TranscriptionResult {
            filename: name.into(),
            outcome: Ok(text.into()),
        }
    }

    fn failed(name: &str, kind: FailureKind) -> TranscriptionResult {
        TranscriptionResult {
            filename: name.into(),
            outcome: Err(TranscriptionFailure::new(kind, "boom")),
        }
    }

    #[test]
    fn transcripts_follow_their_filenames_in_order() {
        let body = Body::text("Sie haben eine neue Sprachnachricht.");
        let out = format(
            &body,
            &[ok("a.wav", "hello"), ok("b.wav", "world")],
            DEFAULT_MARKER,
        );

        assert_eq!(
            out.content,
            "Sie haben eine neue Sprachnachricht.\n\n\
             --- AUTOMATISCHES TRANSKRIPT ---\n[a.wav]\nhello\n[b.wav]\nworld\n"
        );
        assert_eq!(out.kind, BodyKind::Text);
    }

    #[test]
    fn failed_attachments_render_a_placeholder_without_details() {
        let out = format(
            &Body::text(""),
            &[ok("a.wav", "hallo"), failed("b.wav", FailureKind::Timeout)],
            DEFAULT_MARKER,
        );

        let lines: Vec<_> = out.content.lines().collect();
        assert_eq!(lines[0], DEFAULT_MARKER);
        assert_eq!(lines[3], "[b.wav]");
        assert_eq!(lines[4], "(Transkription fehlgeschlagen: Zeitüberschreitung)");
        assert!(!out.content.contains("boom"));
    }

    #[test]
    fn empty_transcripts_are_shown_as_no_speech() {
        let lines = block_lines(&[ok("a.wav", "   ")], DEFAULT_MARKER);
        assert_eq!(lines, vec![DEFAULT_MARKER, "[a.wav]", NO_SPEECH_PLACEHOLDER]);
    }

    #[test]
    fn existing_text_is_kept_verbatim() {
        let original = "line one\r\nline two\n";
        let out = format(&Body::text(original), &[ok("a.wav", "x")], DEFAULT_MARKER);
        assert!(out.content.starts_with(original));
        assert_eq!(&out.content[original.len()..original.len() + 1], "\n");
    }

    #[test]
    fn formatting_twice_yields_two_blocks() {
        let once = format(&Body::text("hi"), &[ok("a.wav", "x")], DEFAULT_MARKER);
        let twice = format(&once, &[ok("a.wav", "x")], DEFAULT_MARKER);
        assert_eq!(twice.content.matches(DEFAULT_MARKER).count(), 2);
    }

    #[test]
    fn html_block_goes_before_the_closing_body_tag() {
        let html = "<html><BODY><p>Voicemail</p></BODY></html>";
        let out = format(&Body::html(html), &[ok("a<1>.wav", "Tom & Jerry")], DEFAULT_MARKER);

        assert_eq!(
            out.content,
            "<html><BODY><p>Voicemail</p>\
             <p>--- AUTOMATISCHES TRANSKRIPT ---<br>\n[a&lt;1&gt;.wav]<br>\nTom &amp; Jerry</p>\n\
             </BODY></html>"
        );
    }

    #[test]
    fn html_without_body_tag_is_appended() {
        let out = format(&Body::html("<p>x</p>"), &[ok("a.wav", "y")], DEFAULT_MARKER);
        assert!(out.content.starts_with("<p>x</p><p>"));
        assert!(out.content.ends_with("y</p>\n"));
    }
}
