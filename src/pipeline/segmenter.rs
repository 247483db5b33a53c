//! Sentence segmentation of streamed generator output.
//!
//! Increments are appended to a buffer; every completed sentence is cut off
//! and cleaned. A buffer that grows past the byte limit without a boundary is
//! force-split so synthesis never waits on an unbounded run-on.

const ASCII_TERMINALS: [char; 3] = ['.', '!', '?'];
const IMMEDIATE_TERMINALS: [char; 5] = ['…', '。', '．', '！', '？'];
const SOFT_BREAKS: [char; 4] = [',', '，', '、', ';'];

fn is_terminal(c: char) -> bool {
    ASCII_TERMINALS.contains(&c) || IMMEDIATE_TERMINALS.contains(&c)
}

/// Splits a stream of text increments into sentences.
#[derive(Debug)]
pub struct SentenceSegmenter {
    buffer: String,
    max_bytes: usize,
}

impl SentenceSegmenter {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            buffer: String::new(),
            max_bytes: max_bytes.max(16),
        }
    }

    /// Appends an increment and returns every sentence it completed.
    pub fn push(&mut self, increment: &str) -> Vec<String> {
        self.buffer.push_str(increment);
        let mut sentences = Vec::new();

        loop {
            let cut = match find_boundary(&self.buffer) {
                Some(end) => end,
                None if self.buffer.len() > self.max_bytes => {
                    force_split_point(&self.buffer, self.max_bytes)
                }
                None => break,
            };
            let rest = self.buffer.split_off(cut);
            let sentence = clean(&self.buffer);
            self.buffer = rest;
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
        }

        sentences
    }

    /// Emits whatever remains at stream end.
    pub fn finish(&mut self) -> Option<String> {
        let tail = clean(&self.buffer);
        self.buffer.clear();
        (!tail.is_empty()).then_some(tail)
    }

    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }
}

/// Byte offset just past the first complete sentence, if any.
fn find_boundary(text: &str) -> Option<usize> {
    let mut chars = text.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if !is_terminal(c) {
            continue;
        }
        let mut last = c;
        let mut end = text.len();
        while let Some(&(i, next)) = chars.peek() {
            if is_terminal(next) {
                last = next;
                chars.next();
            } else {
                end = i;
                break;
            }
        }
        if IMMEDIATE_TERMINALS.contains(&last) {
            return Some(end);
        }
        // ASCII terminals need following whitespace, otherwise this may be
        // a decimal point or an abbreviation still streaming in.
        match chars.peek() {
            Some(&(_, next)) if next.is_whitespace() => return Some(end),
            Some(_) => continue,
            None => return None,
        }
    }
    None
}

/// Split point for a boundary-free buffer longer than `max` bytes.
fn force_split_point(text: &str, max: usize) -> usize {
    let mut limit = max.min(text.len());
    while !text.is_char_boundary(limit) {
        limit -= 1;
    }
    let window = &text[..limit];
    let floor = max / 3;

    let punct = window
        .char_indices()
        .filter(|(i, c)| *i >= floor && (is_terminal(*c) || SOFT_BREAKS.contains(c)))
        .last()
        .map(|(i, c)| i + c.len_utf8());
    if let Some(at) = punct {
        return at;
    }
    let space = window
        .char_indices()
        .filter(|(i, c)| *i > 0 && c.is_whitespace())
        .last()
        .map(|(i, _)| i);
    match space {
        Some(at) => at,
        None if limit > 0 => limit,
        // Single character wider than the limit.
        None => text.chars().next().map_or(text.len(), char::len_utf8),
    }
}

/// Strips stray leading dots, collapses dot runs and whitespace.
fn clean(raw: &str) -> String {
    let trimmed = raw.trim_start_matches(|c: char| c == '.' || c.is_whitespace());
    let mut out = String::with_capacity(trimmed.len());
    let mut dots = 0;
    let mut pending_space = false;

    for c in trimmed.chars() {
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
            dots = 0;
        }
        if c == '.' {
            dots += 1;
            if dots > 3 {
                continue;
            }
        } else {
            dots = 0;
        }
        out.push(c);
    }
    out
}
