//! Incremental UTF-8 decoding for unframed text streams.

use std::borrow::Cow;

const BOM: char = '\u{FEFF}';

/// Turns successive byte chunks of one stream into text.
///
/// A multi-byte sequence split across chunks is carried over and decoded
/// once complete. Malformed input is replaced with U+FFFD rather than
/// rejected. One decoder per stream: carried state must not leak into an
/// unrelated response.
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
    emitted_any: bool,
    replacements: usize,
}

impl Utf8StreamDecoder {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: Vec::new(),
            emitted_any: false,
            replacements: 0,
        }
    }

    /// Decodes `bytes`, prefixed by whatever was carried from the previous
    /// call. With `is_final` set, a truncated trailing sequence becomes a
    /// single U+FFFD and the decoder returns to its initial state.
    pub fn decode(&mut self, bytes: &[u8], is_final: bool) -> String {
        let input: Cow<'_, [u8]> = if self.pending.is_empty() {
            Cow::Borrowed(bytes)
        } else {
            let mut joined = std::mem::take(&mut self.pending);
            joined.extend_from_slice(bytes);
            Cow::Owned(joined)
        };

        let mut out = String::with_capacity(input.len());
        let mut rest: &[u8] = &input;

        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));

                    if let Some(invalid_len) = e.error_len() {
                        out.push(char::REPLACEMENT_CHARACTER);
                        self.replacements += 1;
                        rest = &after[invalid_len..];
                    } else {
                        // Incomplete sequence at the end of the input.
                        if is_final {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.replacements += 1;
                        } else {
                            self.pending.extend_from_slice(after);
                        }
                        break;
                    }
                }
            }
        }

        if !self.emitted_any && !out.is_empty() {
            self.emitted_any = true;
            if out.starts_with(BOM) {
                out.replace_range(..BOM.len_utf8(), "");
            }
        }

        if is_final {
            self.pending.clear();
            self.emitted_any = false;
        }

        out
    }

    /// Number of U+FFFD substitutions made so far.
    #[must_use]
    pub const fn replacements(&self) -> usize {
        self.replacements
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}
