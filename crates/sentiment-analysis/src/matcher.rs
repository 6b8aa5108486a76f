/// Inflections tolerated after a phrase ("tariffs", "banned" is listed separately).
const SUFFIXES: &[&str] = &["s", "es", "ed", "ing"];

/// Byte spans where `phrase` occurs in `text` as a whole word (or an inflected one).
/// The span covers the matched suffix.
pub fn occurrences(text: &str, phrase: &str) -> Vec<(usize, usize)> {
    if phrase.is_empty() {
        return vec![];
    }

    let mut spans = Vec::new();
    for (start, matched) in text.match_indices(phrase) {
        if !boundary_before(text, start) {
            continue;
        }
        let end = start + matched.len();
        if let Some(end) = word_end(text, end) {
            spans.push((start, end));
        }
    }
    spans
}

fn boundary_before(text: &str, start: usize) -> bool {
    text[..start]
        .chars()
        .next_back()
        .map_or(true, |c| !c.is_alphanumeric())
}

fn word_end(text: &str, end: usize) -> Option<usize> {
    let rest = &text[end..];
    if rest.chars().next().map_or(true, |c| !c.is_alphanumeric()) {
        return Some(end);
    }
    SUFFIXES.iter().find_map(|suffix| {
        let tail = rest.strip_prefix(*suffix)?;
        tail.chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric())
            .then_some(end + suffix.len())
    })
}

/// Tracks which bytes of the text longer phrases have already claimed.
pub struct SpanMask {
    claimed: Vec<bool>,
}

impl SpanMask {
    pub fn new(len: usize) -> Self {
        Self { claimed: vec![false; len] }
    }

    pub fn is_free(&self, (start, end): (usize, usize)) -> bool {
        !self.claimed[start..end].iter().any(|&c| c)
    }

    pub fn claim(&mut self, (start, end): (usize, usize)) {
        for c in &mut self.claimed[start..end] {
            *c = true;
        }
    }
}

pub fn covered_by(span: (usize, usize), covers: &[(usize, usize)]) -> bool {
    covers.iter().any(|&(s, e)| s <= span.0 && e >= span.1)
}
