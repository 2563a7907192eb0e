//! Splits a response into bounded fragments the synthesis engine can speak.
//!
//! ## Break-point search
//!
//! Each fragment is cut at the best boundary inside its `max_len` window,
//! scanning backward from the end of the window:
//!
//! 1. sentence terminators `. ! ?` down to 30 % of the window
//! 2. clause marks `; :` down to 30 % of the window
//! 3. commas down to 40 % of the window
//! 4. the last whitespace
//! 5. a hard cut at `max_len`
//!
//! Lengths are counted in `char`s, so Turkish and other non-ASCII text is
//! measured the way a listener hears it.

const SENTENCE_MARKS: [char; 3] = ['.', '!', '?'];
const CLAUSE_MARKS: [char; 2] = [';', ':'];

/// Split `text` into ordered, non-empty fragments of at most `max_len` chars.
pub fn chunk_text(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let mut fragments = Vec::new();
    let mut rest = text.trim();

    while rest.chars().count() > max_len {
        // One char past the window so a boundary right after it can be seen.
        let window: Vec<(usize, char)> = rest.char_indices().take(max_len + 1).collect();
        let cut = break_point(&window, max_len);
        let (head, tail) = rest.split_at(cut);
        push_fragment(&mut fragments, head);
        rest = tail.trim_start();
    }

    push_fragment(&mut fragments, rest);
    fragments
}

fn push_fragment(fragments: &mut Vec<String>, raw: &str) {
    let fragment = raw.trim();
    if !fragment.is_empty() {
        fragments.push(fragment.to_string());
    }
}

/// Byte offset in the window's source string at which to split.
fn break_point(window: &[(usize, char)], max_len: usize) -> usize {
    let clause_floor = max_len * 3 / 10;
    let comma_floor = max_len * 4 / 10;

    if let Some(cut) = scan_back(window, clause_floor, max_len, |c| SENTENCE_MARKS.contains(&c)) {
        return cut;
    }
    if let Some(cut) = scan_back(window, clause_floor, max_len, |c| CLAUSE_MARKS.contains(&c)) {
        return cut;
    }
    if let Some(cut) = scan_back(window, comma_floor, max_len, |c| c == ',') {
        return cut;
    }

    // Whitespace exactly at `max_len` still yields a full-length fragment.
    if let Some(&(byte, _)) = window[1..=max_len]
        .iter()
        .rev()
        .find(|(_, c)| c.is_whitespace())
    {
        return byte;
    }

    window[max_len].0
}

/// Find the last char in `[floor, max_len)` matching `is_break`; the cut
/// falls just after it so the punctuation stays with its fragment.
fn scan_back(
    window: &[(usize, char)],
    floor: usize,
    max_len: usize,
    is_break: impl Fn(char) -> bool,
) -> Option<usize> {
    (floor..max_len)
        .rev()
        .find(|&i| is_break(window[i].1))
        .map(|i| window[i].0 + window[i].1.len_utf8())
}
