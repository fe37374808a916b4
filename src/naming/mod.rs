//! The on-disk naming convention.
//!
//! Every managed file is named `<title> - <id>.<ext>`. The reconciler relies on
//! [`parse_id`] being the exact inverse of [`canonical_file_name`], so both live
//! here and nowhere else.
//!
//! The provider writes downloads as `<title> [<id>].<ext>` first. [`parse_name`]
//! accepts that form too, so a file left behind by an interrupted run is seen
//! as present instead of being downloaded a second time.
//!
//! Ids are YouTube-style: exactly [`ID_LEN`] characters of `[A-Za-z0-9_-]`.

use std::collections::BTreeSet;

/// Length of a remote item id.
pub const ID_LEN: usize = 11;

/// Maximum length (in chars) of the title part of a canonical name.
pub const MAX_TITLE_CHARS: usize = 120;

/// Title used when nothing usable survives cleaning.
pub const UNTITLED: &str = "Untitled";

/// Audio file extensions the scanner treats as media (lowercase).
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "webm", "opus", "flac", "wav", "ogg", "aac"];

/// Extensions of provider by-products that are removed once an item is normalized.
pub const ARTIFACT_EXTENSIONS: &[&str] = &[
    "part", "ytdl", "temp", "tmp", "jpg", "jpeg", "png", "webp", "json", "description", "log",
];

/// Parenthesized tags dropped from titles (compared lowercase).
const NOISE_TAGS: &[&str] = &[
    "official video",
    "official music video",
    "official audio",
    "official lyric video",
    "official visualizer",
    "lyric video",
    "lyrics",
    "visualizer",
    "audio",
    "music video",
    "hd",
    "4k",
];

/// How an id was recovered from a file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdOrigin {
    /// `<title> - <id>.<ext>`
    Canonical,
    /// `<title> [<id>].<ext>` as written by the provider
    ProviderOutput,
    /// Name matched none of the above but contains a ledgered id as a token
    LedgerMatch,
}

/// A file name split into its convention parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub id: String,
    pub title: String,
    pub ext: String,
    pub origin: IdOrigin,
}

/// Returns true if `s` is a well-formed item id.
pub fn is_valid_id(s: &str) -> bool {
    s.len() == ID_LEN && s.bytes().all(is_id_byte)
}

fn is_id_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

/// Returns true if the extension (without dot, any case) is an audio format.
pub fn is_audio_extension(ext: &str) -> bool {
    let ext = ext.to_ascii_lowercase();
    AUDIO_EXTENSIONS.contains(&ext.as_str())
}

/// Returns true if the extension marks a provider by-product.
pub fn is_artifact_extension(ext: &str) -> bool {
    let ext = ext.to_ascii_lowercase();
    ARTIFACT_EXTENSIONS.contains(&ext.as_str())
}

/// Split a file name into `(stem, ext)` on the last dot.
///
/// Names without an extension, or dot-files like `.hidden`, yield `None`.
pub fn split_extension(file_name: &str) -> Option<(&str, &str)> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some((stem, ext))
}

/// Recover the item id from a file name, if it follows the convention.
///
/// Total: every input maps to `Some(id)` or `None`, never an error.
pub fn parse_id(file_name: &str) -> Option<String> {
    parse_name(file_name).map(|parsed| parsed.id)
}

/// Parse a file name under the canonical or provider-output convention.
pub fn parse_name(file_name: &str) -> Option<ParsedName> {
    let (stem, ext) = split_extension(file_name)?;
    let ext = ext.to_ascii_lowercase();

    if let Some((title, id)) = stem.rsplit_once(" - ")
        && is_valid_id(id)
        && !title.trim().is_empty()
    {
        return Some(ParsedName {
            id: id.to_string(),
            title: title.trim().to_string(),
            ext,
            origin: IdOrigin::Canonical,
        });
    }

    let inner = stem.strip_suffix(']')?;
    let open = inner.rfind('[')?;
    let id = &inner[open + 1..];
    if !is_valid_id(id) {
        return None;
    }
    let title = inner[..open].trim();
    Some(ParsedName {
        id: id.to_string(),
        title: if title.is_empty() {
            id.to_string()
        } else {
            title.to_string()
        },
        ext,
        origin: IdOrigin::ProviderOutput,
    })
}

/// Returns true if `id` occurs in `file_name` as a whole token, i.e. not
/// glued to other id characters on either side.
pub fn contains_id_token(file_name: &str, id: &str) -> bool {
    if id.is_empty() {
        return false;
    }
    let bytes = file_name.as_bytes();
    file_name.match_indices(id).any(|(start, _)| {
        let end = start + id.len();
        let before_ok = start == 0 || !is_id_byte(bytes[start - 1]);
        let after_ok = end == bytes.len() || !is_id_byte(bytes[end]);
        before_ok && after_ok
    })
}

/// Find a known id embedded in a name that does not follow the convention.
///
/// Used for manually added or legacy files. Returns the first match in id
/// order so the result is deterministic.
pub fn find_known_id(file_name: &str, known: &BTreeSet<String>) -> Option<String> {
    known
        .iter()
        .find(|id| contains_id_token(file_name, id))
        .cloned()
}

/// Build the canonical file name for an item.
pub fn canonical_file_name(title: &str, id: &str, ext: &str) -> String {
    let mut title = sanitize_filename(title);
    if title.is_empty() {
        title = UNTITLED.to_string();
    }
    format!("{} - {}.{}", title, id, ext.to_ascii_lowercase())
}

/// Sanitizes a title for use as a file name component.
///
/// Replaces path and Windows-reserved characters with `_`, collapses
/// whitespace, trims trailing dots/spaces and caps the length.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => ' ',
            _ => c,
        })
        .collect();

    let collapsed = collapse_whitespace(&replaced);
    let capped: String = collapsed.chars().take(MAX_TITLE_CHARS).collect();
    capped
        .trim_matches(|c: char| c == '.' || c.is_whitespace())
        .to_string()
}

/// Strip video-site noise from a remote title.
///
/// Drops every `[...]` segment and parenthesized tags like "(Official Video)",
/// normalizes `|`, en dash and em dash separators to ` - `, and collapses
/// whitespace. Falls back to the trimmed input if nothing is left.
pub fn clean_title(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(pos) = rest.find(['(', '[']) {
        out.push_str(&rest[..pos]);
        let open = rest[pos..].chars().next().unwrap_or('(');
        let close = if open == '(' { ')' } else { ']' };
        let after_open = &rest[pos + open.len_utf8()..];
        match after_open.find(close) {
            Some(end) => {
                let inner = &after_open[..end];
                let drop = open == '[' || NOISE_TAGS.contains(&inner.trim().to_lowercase().as_str());
                if !drop {
                    out.push(open);
                    out.push_str(inner);
                    out.push(close);
                }
                rest = &after_open[end + close.len_utf8()..];
            }
            None => {
                out.push_str(&rest[pos..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);

    let separated = out.replace(['|', '–', '—'], " - ");
    let collapsed = collapse_whitespace(&separated);
    let cleaned = collapsed.trim_matches(|c: char| c == '-' || c.is_whitespace());

    if cleaned.is_empty() {
        collapse_whitespace(raw).trim().to_string()
    } else {
        // Separator normalization can leave "a -  - b"; collapse repeated dashes.
        cleaned.replace(" - - ", " - ")
    }
}

/// Pick the display title for an item.
///
/// Channel names from auto-generated "Topic" channels are used as the artist
/// when the title itself has no `Artist - Track` shape.
pub fn display_title(title: &str, uploader: Option<&str>) -> String {
    let cleaned = clean_title(title);
    match uploader.map(str::trim).filter(|u| !u.is_empty()) {
        Some(uploader) if !cleaned.contains(" - ") => {
            let artist = uploader.strip_suffix(" - Topic").unwrap_or(uploader).trim();
            if artist.is_empty() {
                cleaned
            } else {
                format!("{} - {}", artist, cleaned)
            }
        }
        _ => cleaned,
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}


/// Property-based tests using proptest
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn valid_id() -> impl Strategy<Value = String> {
        prop::string::string_regex("[A-Za-z0-9_-]{11}").unwrap()
    }

    fn arbitrary_title() -> impl Strategy<Value = String> {
        prop::string::string_regex("[a-zA-Z0-9 /:*?\"<>|_().\\[\\]-]{0,80}").unwrap()
    }

    proptest! {
        /// parse_id is the inverse of canonical_file_name
        #[test]
        fn parse_inverts_canonical(
            title in arbitrary_title(),
            id in valid_id(),
            ext in prop::sample::select(AUDIO_EXTENSIONS.to_vec()),
        ) {
            let name = canonical_file_name(&title, &id, ext);
            prop_assert_eq!(parse_id(&name), Some(id));
        }

        /// Sanitized titles never contain path separators
        #[test]
        fn sanitize_removes_path_separators(input in arbitrary_title()) {
            let sanitized = sanitize_filename(&input);
            prop_assert!(!sanitized.contains('/'));
            prop_assert!(!sanitized.contains('\\'));
        }

        /// Sanitized titles never exceed the cap
        #[test]
        fn sanitize_respects_cap(input in ".{0,400}") {
            prop_assert!(sanitize_filename(&input).chars().count() <= MAX_TITLE_CHARS);
        }

        /// parse_id never panics on arbitrary input
        #[test]
        fn parse_id_is_total(input in ".{0,100}") {
            let _ = parse_id(&input);
        }
    }
}
