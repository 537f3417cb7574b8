//! Raw failure text -> message a user can act on.
//!
//! Consulted only after a job has failed; it never influences control flow.

/// Maps a raw error chain into a user-facing message.
pub trait ErrorTranslator: Send + Sync {
    fn translate(&self, raw: &str) -> String;

    fn translate_error(&self, err: &anyhow::Error) -> String {
        self.translate(&format!("{:#}", err))
    }
}

enum Reply {
    Fixed(&'static str),
    /// The raw text is already user-facing.
    Passthrough,
}

struct Rule {
    any: &'static [&'static str],
    unless: &'static [&'static str],
    reply: Reply,
}

const fn rule(any: &'static [&'static str], reply: &'static str) -> Rule {
    Rule {
        any,
        unless: &[],
        reply: Reply::Fixed(reply),
    }
}

/// Checked in order; the first match wins.
const RULES: &[Rule] = &[
    rule(&["cancelled", "canceled"], "Download cancelled"),
    rule(
        &["content.video.unavailable", "video unavailable", "private video", "this content is private"],
        "This video is unavailable or has been removed",
    ),
    rule(&["content.video.live", "live stream"], "Live streams can't be downloaded yet"),
    rule(&["content.video.age", "age-restricted", "age restricted"], "This video is age-restricted"),
    rule(&["content.too_long", "too_long"], "Video is too long (3+ hours)"),
    rule(&["api.youtube.login", "youtube.login"], "YouTube requires login for this video"),
    rule(&["api.rate_limited"], "Rate limited - try again in a minute"),
    rule(&["api.link.unsupported"], "This link type isn't supported"),
    rule(
        &["sign in to confirm", "sign in to verify"],
        "YouTube is blocking this request - try again later",
    ),
    rule(
        &["geo restricted", "geo-restricted", "not available in your country"],
        "This video isn't available in the server's region",
    ),
    rule(&["copyright"], "This video was removed for copyright"),
    rule(&["members only", "members-only"], "This is a members-only video"),
    rule(&["premium"], "This video requires YouTube Premium"),
    rule(&["http error 403", "403 forbidden"], "Access denied - the site is blocking downloads"),
    rule(&["http error 404", "404 not found"], "Video not found - it may have been deleted"),
    rule(&["unsupported url"], "This website isn't supported"),
    rule(
        &["no video formats", "requested format not available"],
        "No downloadable formats found",
    ),
    Rule {
        any: &["rate"],
        unless: &["format"],
        reply: Reply::Fixed("Rate limited - please wait and try again"),
    },
    rule(&["econnreset", "fetch failed", "connection reset"], "Connection dropped - try again"),
    Rule {
        any: &["connection"],
        unless: &["connected"],
        reply: Reply::Fixed("Connection dropped - try again"),
    },
    rule(&["etimedout", "timed out", "timeout"], "Connection timed out - try again"),
    rule(&["enotfound", "dns", "could not resolve host"], "Couldn't reach the server - try again"),
    rule(&["processing failed", "encoding failed"], "Processing failed"),
    rule(&["download interrupted"], "Download interrupted"),
    rule(&["no videos were successfully downloaded"], "No videos were successfully downloaded"),
    rule(&["downloaded file not found", "file not found"], "Download failed"),
    Rule {
        any: &["playlist too large", "too many active jobs"],
        unless: &[],
        reply: Reply::Passthrough,
    },
];

/// Default taxonomy for media-site failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTranslator;

impl ErrorTranslator for DefaultTranslator {
    fn translate(&self, raw: &str) -> String {
        let msg = raw.to_lowercase();
        for r in RULES {
            let hit = r.any.iter().any(|p| msg.contains(p));
            let vetoed = r.unless.iter().any(|p| msg.contains(p));
            if hit && !vetoed {
                return match r.reply {
                    Reply::Fixed(s) => s.to_string(),
                    Reply::Passthrough => raw.to_string(),
                };
            }
        }
        "Download failed".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(raw: &str) -> String {
        DefaultTranslator.translate(raw)
    }

    #[test]
    fn endpoint_codes() {
        assert_eq!(t("error.api.content.video.unavailable"), "This video is unavailable or has been removed");
        assert_eq!(t("error.api.rate_limited"), "Rate limited - try again in a minute");
        assert_eq!(t("error.api.link.unsupported"), "This link type isn't supported");
        assert_eq!(t("error.api.content.too_long"), "Video is too long (3+ hours)");
    }

    #[test]
    fn cancellation_wins_over_everything() {
        assert_eq!(t("Cancelled"), "Download cancelled");
        assert_eq!(t("connection reset while cancelled"), "Download cancelled");
    }

    #[test]
    fn rate_is_vetoed_by_format() {
        assert_eq!(t("requested format not available"), "No downloadable formats found");
        assert_eq!(t("too many requests, rate exceeded"), "Rate limited - please wait and try again");
        assert_eq!(t("bad format"), "Download failed");
    }

    #[test]
    fn network_failures() {
        assert_eq!(t("Connection reset by peer"), "Connection dropped - try again");
        assert_eq!(t("Operation timed out after 30001 milliseconds"), "Connection timed out - try again");
        assert_eq!(t("Could not resolve host: api.example"), "Couldn't reach the server - try again");
        assert_eq!(t("Connected to progress stream"), "Download failed");
    }

    #[test]
    fn passthrough_messages_keep_their_text() {
        assert_eq!(t("Playlist too large (max 1000)"), "Playlist too large (max 1000)");
        assert_eq!(t("Too many active jobs (limit: 5)"), "Too many active jobs (limit: 5)");
    }

    #[test]
    fn translate_error_sees_the_context_chain() {
        let err = anyhow::anyhow!("HTTP error 404: Not Found").context("item 3");
        assert_eq!(
            DefaultTranslator.translate_error(&err),
            "Video not found - it may have been deleted"
        );
        assert_eq!(t("something odd"), "Download failed");
        assert_eq!(t("File download failed: HTTP 500"), "Download failed");
    }
}
