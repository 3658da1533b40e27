//! Word-level timing reconstruction from whisper's token stream (spec
//! S4.1/S9: "the adapter MUST split segment-level output into
//! word-level entries with interpolated timings").

use stt_engine::Word;

/// One decoded token, with centisecond timestamps as whisper-rs reports
/// them (its native timestamp resolution).
#[derive(Debug, Clone)]
pub struct TokenInfo {
    pub text: String,
    pub t0_cs: i64,
    pub t1_cs: i64,
    pub special: bool,
}

/// Group a segment's tokens into words and attach timings, in seconds,
/// relative to the start of the audio the segment came from.
///
/// whisper's BPE tokens mark a new word boundary with a leading space in
/// their decoded text; we group consecutive tokens until the next
/// leading-space token. If the token-level timestamps are degenerate
/// (whisper-rs was built without the DTW timestamp pass, or the whole
/// segment collapses to one instant) we fall back to linear
/// interpolation across the segment's own declared
/// `(segment_start_cs, segment_end_cs)`, weighted by each word's
/// character length.
pub fn words_from_tokens(
    tokens: &[TokenInfo],
    segment_start_cs: i64,
    segment_end_cs: i64,
) -> Vec<Word> {
    let meaningful: Vec<&TokenInfo> = tokens.iter().filter(|t| !t.special && !t.text.is_empty()).collect();
    if meaningful.is_empty() {
        return Vec::new();
    }

    let groups = group_into_words(&meaningful);

    if has_usable_timestamps(&meaningful) {
        groups
            .into_iter()
            .map(|g| {
                Word::new(
                    g.first_t0_cs as f64 / 100.0,
                    g.last_t1_cs as f64 / 100.0,
                    g.text,
                )
            })
            .collect()
    } else {
        interpolate(&groups, segment_start_cs, segment_end_cs)
    }
}

struct WordGroup {
    text: String,
    first_t0_cs: i64,
    last_t1_cs: i64,
}

fn group_into_words(tokens: &[&TokenInfo]) -> Vec<WordGroup> {
    let mut groups: Vec<WordGroup> = Vec::new();
    for tok in tokens {
        let starts_new_word = tok.text.starts_with(char::is_whitespace) || groups.is_empty();
        if starts_new_word {
            groups.push(WordGroup {
                text: tok.text.clone(),
                first_t0_cs: tok.t0_cs,
                last_t1_cs: tok.t1_cs,
            });
        } else {
            let g = groups.last_mut().expect("groups non-empty after first push");
            g.text.push_str(&tok.text);
            g.last_t1_cs = tok.t1_cs;
        }
    }
    groups
}

/// Whisper builds without the DTW/token-timestamp pass report every
/// token at `t0 == t1 == 0` (or all tokens collapsed onto the same
/// instant); that's our signal to interpolate instead of trusting them.
fn has_usable_timestamps(tokens: &[&TokenInfo]) -> bool {
    if tokens.len() < 2 {
        return tokens.first().is_some_and(|t| t.t1_cs > t.t0_cs);
    }
    let distinct_starts = tokens.windows(2).any(|w| w[1].t0_cs != w[0].t0_cs);
    let any_nonzero_span = tokens.iter().any(|t| t.t1_cs > t.t0_cs);
    distinct_starts && any_nonzero_span
}

fn interpolate(groups: &[WordGroup], segment_start_cs: i64, segment_end_cs: i64) -> Vec<Word> {
    let total_chars: usize = groups.iter().map(|g| g.text.chars().count().max(1)).sum();
    if total_chars == 0 || segment_end_cs <= segment_start_cs {
        return groups
            .iter()
            .map(|g| Word::new(segment_start_cs as f64 / 100.0, segment_end_cs as f64 / 100.0, g.text.clone()))
            .collect();
    }

    let span_cs = (segment_end_cs - segment_start_cs) as f64;
    let mut cursor_cs = segment_start_cs as f64;
    let mut out = Vec::with_capacity(groups.len());
    for g in groups {
        let share = g.text.chars().count().max(1) as f64 / total_chars as f64;
        let dur_cs = span_cs * share;
        let start_cs = cursor_cs;
        let end_cs = (cursor_cs + dur_cs).min(segment_end_cs as f64);
        out.push(Word::new(start_cs / 100.0, end_cs / 100.0, g.text.clone()));
        cursor_cs = end_cs;
    }
    out
}
