//! Sentence assembly for streamed brain output
//!
//! Buffers token deltas and emits complete sentences for synthesis. The
//! buffer is scrubbed of residual formatting markers (markdown emphasis,
//! headings, bullets, fenced code, `[[...]]` macro tags) before boundary
//! scanning, so punctuation inside a stripped tag never ends a sentence.

/// Minimum cleaned length for an emitted sentence; shorter candidates are
/// coalesced with the following fragment
const MIN_SENTENCE_CHARS: usize = 2;

/// Splits streamed text into sentences at `.`, `!`, or `?` followed by
/// whitespace (or end of stream, via [`SentenceSplitter::flush`])
#[derive(Debug, Default)]
pub struct SentenceSplitter {
    buffer: String,
}

impl SentenceSplitter {
    /// Create an empty splitter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a streamed fragment and return any complete sentences
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        self.strip_closed_spans();

        let mut sentences = Vec::new();
        let mut from = 0;
        while let Some(end) = self.scannable_boundary(from) {
            let candidate = &self.buffer[..end];
            let cleaned = clean_for_speech(candidate);
            if cleaned.chars().count() >= MIN_SENTENCE_CHARS {
                sentences.push(cleaned);
                self.buffer.drain(..end);
                from = 0;
            } else {
                // Too short to speak; extend through the next boundary
                from = end;
            }
        }
        sentences
    }

    /// Flush the remaining buffer as one final sentence, if anything
    /// speakable is left. An unclosed tag or fence at stream end is
    /// dropped rather than spoken.
    pub fn flush(&mut self) -> Option<String> {
        let mut rest = std::mem::take(&mut self.buffer);
        if let Some(open) = open_span_start(&rest) {
            rest.truncate(open);
        }
        let cleaned = clean_for_speech(&rest);
        if cleaned.chars().count() >= MIN_SENTENCE_CHARS {
            Some(cleaned)
        } else {
            None
        }
    }

    /// Remove completed code fences and `[[...]]` tag spans from the buffer.
    /// Unclosed spans stay put until their terminator arrives or the stream
    /// flushes.
    fn strip_closed_spans(&mut self) {
        loop {
            let before = self.buffer.len();
            self.buffer = remove_span(&self.buffer, "[[", "]]");
            self.buffer = remove_span(&self.buffer, "```", "```");
            if self.buffer.len() == before {
                break;
            }
        }
    }

    /// Byte index one past the first sentence boundary at or after `from`,
    /// skipping any region inside an unclosed span (where more tag content
    /// may still arrive)
    fn scannable_boundary(&self, from: usize) -> Option<usize> {
        let scan_end = open_span_start(&self.buffer).unwrap_or(self.buffer.len());
        if from >= scan_end {
            return None;
        }
        let region = &self.buffer[..scan_end];

        let mut chars = region[from..]
            .char_indices()
            .map(|(i, c)| (i + from, c))
            .peekable();
        while let Some((i, c)) = chars.next() {
            if matches!(c, '.' | '!' | '?') {
                match chars.peek() {
                    Some((_, next)) if next.is_whitespace() => {
                        return Some(i + c.len_utf8() + next.len_utf8());
                    }
                    _ => {}
                }
            }
        }
        None
    }
}

/// Start of the first unclosed `[[` or ``` span, if any
fn open_span_start(text: &str) -> Option<usize> {
    let tag = text.find("[[").filter(|&i| !text[i..].contains("]]"));
    let fence = text
        .find("```")
        .filter(|&i| !text[i + 3..].contains("```"));
    match (tag, fence) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Remove the first complete `open...close` span, including delimiters
fn remove_span(text: &str, open: &str, close: &str) -> String {
    let Some(start) = text.find(open) else {
        return text.to_string();
    };
    let Some(rel_end) = text[start + open.len()..].find(close) else {
        return text.to_string();
    };
    let end = start + open.len() + rel_end + close.len();
    let mut out = String::with_capacity(text.len() - (end - start));
    out.push_str(&text[..start]);
    out.push_str(&text[end..]);
    out
}

/// Clean a text fragment for spoken output and history storage
///
/// Strips markdown emphasis and inline code markers, heading and bullet
/// prefixes, leftover tag delimiters, and collapses whitespace.
#[must_use]
pub fn clean_for_speech(text: &str) -> String {
    let mut out = String::with_capacity(text.len());

    for line in text.lines() {
        let trimmed = line.trim_start();
        // Heading / bullet / quote prefixes
        let body = trimmed
            .trim_start_matches('#')
            .trim_start_matches('>')
            .trim_start_matches(['-', '*', '+'])
            .trim_start();
        // Numbered list prefix ("1. ", "2) ")
        let body = strip_list_number(body);

        if !out.is_empty() && !out.ends_with(' ') {
            out.push(' ');
        }
        for c in body.chars() {
            match c {
                '*' | '_' | '`' | '~' | '[' | ']' => {}
                _ => out.push(c),
            }
        }
    }

    collapse_whitespace(&out)
}

fn strip_list_number(text: &str) -> &str {
    let digits = text.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 && digits <= 3 {
        let rest = &text[digits..];
        if let Some(stripped) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            if stripped.starts_with(' ') {
                return stripped.trim_start();
            }
        }
    }
    text
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = true;
    for c in text.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_terminal_punctuation() {
        let mut splitter = SentenceSplitter::new();
        let sentences = splitter.push("Hello there. How are you? ");

        assert_eq!(sentences, vec!["Hello there.", "How are you?"]);
        assert!(splitter.flush().is_none());
    }

    #[test]
    fn holds_partial_sentence_until_boundary() {
        let mut splitter = SentenceSplitter::new();
        assert!(splitter.push("It is ten").is_empty());
        assert!(splitter.push(" past").is_empty());

        let sentences = splitter.push(" three. And more");
        assert_eq!(sentences, vec!["It is ten past three."]);
        assert_eq!(splitter.flush(), Some("And more".to_string()));
    }

    #[test]
    fn trailing_punctuation_waits_for_whitespace() {
        // "3." mid-stream could be "3.14" — only whitespace confirms the end
        let mut splitter = SentenceSplitter::new();
        assert!(splitter.push("Pi is about 3.").is_empty());

        let sentences = splitter.push("14 exactly. ");
        assert_eq!(sentences, vec!["Pi is about 3.14 exactly."]);
    }

    #[test]
    fn flush_emits_remainder() {
        let mut splitter = SentenceSplitter::new();
        splitter.push("no punctuation here");

        assert_eq!(splitter.flush(), Some("no punctuation here".to_string()));
        assert!(splitter.flush().is_none());
    }

    #[test]
    fn punctuation_inside_macro_tag_does_not_split() {
        let mut splitter = SentenceSplitter::new();
        // Tag split across chunks; the '.' inside it must not fire
        assert!(splitter.push("Sure [[tts:rate=0.").is_empty());
        let sentences = splitter.push("9]] thing. Done. ");

        assert_eq!(sentences, vec!["Sure thing.", "Done."]);
    }

    #[test]
    fn code_fences_are_removed() {
        let mut splitter = SentenceSplitter::new();
        let sentences = splitter.push("Run this. ```let x = 1;``` Then stop. ");

        assert_eq!(sentences, vec!["Run this.", "Then stop."]);
    }

    #[test]
    fn markdown_is_stripped() {
        assert_eq!(clean_for_speech("**Bold** and _quiet_"), "Bold and quiet");
        assert_eq!(clean_for_speech("# Heading\n- item one"), "Heading item one");
        assert_eq!(clean_for_speech("1. first\n2) second"), "first second");
        assert_eq!(clean_for_speech("`code` words"), "code words");
    }

    #[test]
    fn short_candidates_coalesce_with_next_fragment() {
        let mut splitter = SentenceSplitter::new();
        // A lone "?" cleans below the minimum and must join what follows
        assert!(splitter.push("? ").is_empty());

        let sentences = splitter.push("Right you are. ");
        assert_eq!(sentences, vec!["? Right you are."]);
    }

    #[test]
    fn whitespace_collapses() {
        assert_eq!(clean_for_speech("too   many\n\nspaces"), "too many spaces");
    }
}
