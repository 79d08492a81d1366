//! Streaming sentence segmentation.
//!
//! Converts incremental text fragments from a streaming generator into
//! cleaned sentence units. Two extraction rules compete on the buffered
//! text: stop markers (earliest occurrence wins, the marker itself is
//! discarded) and terminal punctuation followed by whitespace. Consumed
//! candidates are cleaned of speaker-name echoes and marker literals
//! before emission, so no marker ever reaches a display or a voice.

/// Sentence-terminal characters. A terminal only closes a unit when
/// whitespace follows, so decimals and mid-token punctuation survive.
const TERMINALS: [char; 3] = ['.', '!', '?'];

pub struct SentenceSegmenter {
    buffer: String,
    markers: Vec<String>,
    speaker_name: String,
    speaker_id: String,
}

impl SentenceSegmenter {
    pub fn new(
        markers: Vec<String>,
        speaker_name: impl Into<String>,
        speaker_id: impl Into<String>,
    ) -> Self {
        Self {
            buffer: String::new(),
            markers,
            speaker_name: speaker_name.into(),
            speaker_id: speaker_id.into(),
        }
    }

    /// Append a fragment and extract every unit it completes.
    ///
    /// A single call may yield several units (a fragment can close more
    /// than one sentence), and a marker split across calls is still caught
    /// because the buffer persists.
    pub fn feed(&mut self, fragment: &str) -> Vec<String> {
        self.buffer.push_str(fragment);

        let mut units = Vec::new();
        loop {
            if let Some((start, len)) = earliest_marker(&self.buffer, &self.markers) {
                let raw: String = self.buffer[..start].to_string();
                // Discard the marker; the remainder is rescanned from scratch.
                self.buffer.replace_range(..start + len, "");
                self.push_cleaned(&raw, &mut units);
                continue;
            }

            if let Some(end) = first_sentence_end(&self.buffer) {
                let raw: String = self.buffer[..end].to_string();
                // The separating whitespace goes with the unit.
                let mut consumed = end;
                if let Some(ws) = self.buffer[end..].chars().next() {
                    if ws.is_whitespace() {
                        consumed += ws.len_utf8();
                    }
                }
                self.buffer.replace_range(..consumed, "");
                self.push_cleaned(&raw, &mut units);
                continue;
            }

            break;
        }
        units
    }

    /// Flush whatever remains as one final unit, then reset for reuse.
    pub fn finish(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.buffer);
        let cleaned = self.clean(&raw);
        if cleaned.is_empty() {
            None
        } else {
            Some(cleaned)
        }
    }

    /// Clean a candidate unit: remove marker literals anywhere, strip
    /// leading speaker name/id echoes, trim. Idempotent: the name prefix
    /// is stripped repeatedly, so a doubled echo cannot survive one pass
    /// and reappear under another.
    pub fn clean(&self, text: &str) -> String {
        let mut out = text.to_string();
        for marker in &self.markers {
            out = remove_marker(&out, marker);
        }
        loop {
            let stripped = strip_label(&out, &self.speaker_name)
                .or_else(|| strip_label(&out, &self.speaker_id));
            match stripped {
                Some(rest) => out = rest,
                None => break,
            }
        }
        out.trim().to_string()
    }

    fn push_cleaned(&self, raw: &str, units: &mut Vec<String>) {
        let cleaned = self.clean(raw);
        if !cleaned.is_empty() {
            units.push(cleaned);
        }
    }
}

/// Byte offset and length of the earliest marker occurrence, matched
/// case-insensitively. ASCII lowercasing preserves byte offsets.
fn earliest_marker(text: &str, markers: &[String]) -> Option<(usize, usize)> {
    let haystack = text.to_ascii_lowercase();
    let mut best: Option<(usize, usize)> = None;
    for marker in markers {
        if marker.is_empty() {
            continue;
        }
        let needle = marker.to_ascii_lowercase();
        if let Some(idx) = haystack.find(&needle) {
            if best.map(|(b, _)| idx < b).unwrap_or(true) {
                best = Some((idx, marker.len()));
            }
        }
    }
    best
}

/// Byte offset just past the first sentence terminal that is immediately
/// followed by whitespace.
fn first_sentence_end(text: &str) -> Option<usize> {
    let mut chars = text.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        if TERMINALS.contains(&ch) {
            if let Some(&(_, next)) = chars.peek() {
                if next.is_whitespace() {
                    return Some(idx + ch.len_utf8());
                }
            }
        }
    }
    None
}

/// Remove every case-insensitive occurrence of `marker`. Label-style
/// markers ("Director:") also swallow the whitespace that follows them;
/// bare delimiters ("###") leave surrounding text untouched.
fn remove_marker(text: &str, marker: &str) -> String {
    if marker.is_empty() {
        return text.to_string();
    }
    let eat_whitespace = marker.ends_with(':');
    let needle = marker.to_ascii_lowercase();
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        let haystack = rest.to_ascii_lowercase();
        match haystack.find(&needle) {
            Some(idx) => {
                out.push_str(&rest[..idx]);
                let mut after = &rest[idx + marker.len()..];
                if eat_whitespace {
                    after = after.trim_start();
                }
                rest = after;
            }
            None => {
                out.push_str(rest);
                break;
            }
        }
    }
    out
}

/// Strip a leading `label:` prefix (case-insensitive) plus the whitespace
/// that follows it.
fn strip_label(text: &str, label: &str) -> Option<String> {
    if label.is_empty() {
        return None;
    }
    let trimmed = text.trim_start();
    let head = trimmed.get(..label.len())?;
    if !head.eq_ignore_ascii_case(label) {
        return None;
    }
    let rest = trimmed[label.len()..].strip_prefix(':')?;
    Some(rest.trim_start().to_string())
}
