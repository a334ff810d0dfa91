//! Ad-hoc signatures for data the catalog does not know.
//!
//! Many proprietary formats open with a short printable tag (`FORM`, `RIFF`,
//! `CHNK0001`, ...). Sniffing collects that tag so structurally identical
//! unknown files share one descriptor, which lets the carving fallback's
//! failure cache recognize runs of the same junk.

use std::borrow::Cow;

use super::{Category, FormatDescriptor, Signature};
use crate::stream::{read_prefix, ByteSource};

/// Hard cap on the sniffed tag length
pub const SNIFF_CAP: usize = 16;

/// Tags shorter than this are treated as noise
const MIN_TAG_LEN: usize = 3;

/// A byte repeated more than this many times in a row ends the tag
const MAX_REPEAT: usize = 3;

/// Longest extension derived from a tag
const MAX_EXTENSION_LEN: usize = 8;

/// Extracts the printable tag at the start of `prefix`.
///
/// Collection stops at the first control or non-ASCII byte, at the start of
/// an over-long run of one repeated byte, or at [`SNIFF_CAP`].
pub fn sniff_tag(prefix: &[u8]) -> &[u8] {
    let mut end = 0;
    let mut run = 0;

    for (i, &byte) in prefix.iter().take(SNIFF_CAP).enumerate() {
        if !(byte.is_ascii_graphic() || byte == b' ') {
            break;
        }
        run = if i > 0 && prefix[i - 1] == byte { run + 1 } else { 1 };
        if run > MAX_REPEAT {
            // drop the whole run; it is padding, not tag
            end = i + 1 - run;
            return trim(&prefix[..end]);
        }
        end = i + 1;
    }

    trim(&prefix[..end])
}

fn trim(tag: &[u8]) -> &[u8] {
    let tag = match tag.iter().rposition(|&b| b != b' ') {
        Some(last) => &tag[..=last],
        None => &[],
    };
    if tag.len() < MIN_TAG_LEN {
        &[]
    } else {
        tag
    }
}

/// Synthesizes a descriptor from the leading bytes of a source.
///
/// Returns [`FormatDescriptor::unknown`] when no usable tag is present.
pub fn sniff(source: &dyn ByteSource) -> FormatDescriptor {
    let Ok(prefix) = read_prefix(source, SNIFF_CAP) else {
        return FormatDescriptor::unknown();
    };
    let tag = sniff_tag(&prefix);
    if tag.is_empty() {
        return FormatDescriptor::unknown();
    }

    let mut extension: String = tag
        .iter()
        .filter(|b| b.is_ascii_alphanumeric())
        .take(MAX_EXTENSION_LEN)
        .map(|&b| (b as char).to_ascii_lowercase())
        .collect();
    if extension.is_empty() {
        extension.push_str("bin");
    }

    FormatDescriptor {
        extension: Cow::Owned(extension),
        signature: Some(Signature {
            offset: 0,
            magic: Cow::Owned(tag.to_vec()),
        }),
        category: Category::Generic,
        handler: None,
        carve: false,
    }
}
