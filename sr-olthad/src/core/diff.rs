//! Human-readable line diffs.
//!
//! Lines are prefixed with `"  "` (unchanged), `"- "` (removed) or `"+ "`
//! (added). Within a replaced block, the most similar pair of lines is shown
//! side by side with `"? "` guide lines marking the characters that changed
//! (`^` replaced, `-` removed, `+` inserted).
//!
//! Lines are aligned by recursively taking the longest matching block.

use std::collections::HashMap;
use std::hash::Hash;
use std::ops::Range;

/// Pairs of lines below this similarity ratio are not aligned.
const SIMILARITY_CUTOFF: f64 = 0.75;

/// Sequences at least this long ignore elements too common to anchor a match.
const AUTOJUNK_MIN_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Equal,
    Replace,
    Delete,
    Insert,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Opcode {
    tag: Tag,
    a: Range<usize>,
    b: Range<usize>,
}

/// `(start in a, start in b, length)`
type Block = (usize, usize, usize);

struct Matcher<'s, T> {
    a: &'s [T],
    b: &'s [T],
    /// Positions of each element of `b`, ascending.
    b2j: HashMap<&'s T, Vec<usize>>,
}

impl<'s, T: Eq + Hash> Matcher<'s, T> {
    fn new(a: &'s [T], b: &'s [T]) -> Self {
        let mut b2j: HashMap<&T, Vec<usize>> = HashMap::new();
        for (j, elt) in b.iter().enumerate() {
            b2j.entry(elt).or_default().push(j);
        }
        if b.len() >= AUTOJUNK_MIN_LEN {
            let popular = b.len() / 100 + 1;
            b2j.retain(|_, positions| positions.len() <= popular);
        }
        Self { a, b, b2j }
    }

    /// Longest matching block in `a[alo..ahi]` and `b[blo..bhi]`, earliest in
    /// `a` (then in `b`) on ties.
    fn longest_match(&self, alo: usize, ahi: usize, blo: usize, bhi: usize) -> Block {
        let (mut besti, mut bestj, mut bestsize) = (alo, blo, 0);
        let mut j2len: HashMap<usize, usize> = HashMap::new();
        for i in alo..ahi {
            let mut next_j2len = HashMap::new();
            if let Some(positions) = self.b2j.get(&self.a[i]) {
                for &j in positions {
                    if j < blo {
                        continue;
                    }
                    if j >= bhi {
                        break;
                    }
                    let k = j
                        .checked_sub(1)
                        .and_then(|prev| j2len.get(&prev))
                        .copied()
                        .unwrap_or(0)
                        + 1;
                    next_j2len.insert(j, k);
                    if k > bestsize {
                        besti = i + 1 - k;
                        bestj = j + 1 - k;
                        bestsize = k;
                    }
                }
            }
            j2len = next_j2len;
        }
        // Popular elements never start a match but may extend one.
        while besti > alo && bestj > blo && self.a[besti - 1] == self.b[bestj - 1] {
            besti -= 1;
            bestj -= 1;
            bestsize += 1;
        }
        while besti + bestsize < ahi
            && bestj + bestsize < bhi
            && self.a[besti + bestsize] == self.b[bestj + bestsize]
        {
            bestsize += 1;
        }
        (besti, bestj, bestsize)
    }

    /// Matching blocks in order, adjacent ones merged, ending with a
    /// zero-length sentinel at `(a.len(), b.len())`.
    fn matching_blocks(&self) -> Vec<Block> {
        let (la, lb) = (self.a.len(), self.b.len());
        let mut queue = vec![(0, la, 0, lb)];
        let mut blocks = Vec::new();
        while let Some((alo, ahi, blo, bhi)) = queue.pop() {
            let (i, j, k) = self.longest_match(alo, ahi, blo, bhi);
            if k == 0 {
                continue;
            }
            blocks.push((i, j, k));
            if alo < i && blo < j {
                queue.push((alo, i, blo, j));
            }
            if i + k < ahi && j + k < bhi {
                queue.push((i + k, ahi, j + k, bhi));
            }
        }
        blocks.sort_unstable();

        let mut merged: Vec<Block> = Vec::with_capacity(blocks.len() + 1);
        for (i, j, k) in blocks {
            match merged.last_mut() {
                Some(last) if last.0 + last.2 == i && last.1 + last.2 == j => last.2 += k,
                _ => merged.push((i, j, k)),
            }
        }
        merged.push((la, lb, 0));
        merged
    }

    fn opcodes(&self) -> Vec<Opcode> {
        let mut ops = Vec::new();
        let (mut i, mut j) = (0, 0);
        for (ai, bj, size) in self.matching_blocks() {
            let tag = match (i < ai, j < bj) {
                (true, true) => Some(Tag::Replace),
                (true, false) => Some(Tag::Delete),
                (false, true) => Some(Tag::Insert),
                (false, false) => None,
            };
            if let Some(tag) = tag {
                ops.push(Opcode {
                    tag,
                    a: i..ai,
                    b: j..bj,
                });
            }
            i = ai + size;
            j = bj + size;
            if size > 0 {
                ops.push(Opcode {
                    tag: Tag::Equal,
                    a: ai..i,
                    b: bj..j,
                });
            }
        }
        ops
    }

    /// Similarity in `[0, 1]`: twice the matched elements over the total.
    fn ratio(&self) -> f64 {
        let total = self.a.len() + self.b.len();
        if total == 0 {
            return 1.0;
        }
        let matched: usize = self.matching_blocks().iter().map(|block| block.2).sum();
        2.0 * matched as f64 / total as f64
    }
}

/// Diff two line lists. Each input line keeps its own newline (if any).
pub fn diff_lines(before: &[&str], after: &[&str]) -> Vec<String> {
    let mut out = Vec::with_capacity(before.len().max(after.len()));
    for op in Matcher::new(before, after).opcodes() {
        match op.tag {
            Tag::Equal => dump(&mut out, "  ", &before[op.a]),
            Tag::Delete => dump(&mut out, "- ", &before[op.a]),
            Tag::Insert => dump(&mut out, "+ ", &after[op.b]),
            Tag::Replace => fancy_replace(&mut out, &before[op.a], &after[op.b]),
        }
    }
    out
}

/// Every line marked unchanged.
pub fn unchanged_lines(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|line| format!("  {line}")).collect()
}

/// Split text into lines, keeping the trailing `\n` on each line.
pub fn split_keep_newlines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

fn dump(out: &mut Vec<String>, prefix: &str, lines: &[&str]) {
    out.extend(lines.iter().map(|line| format!("{prefix}{line}")));
}

/// Replace `before` with `after`, aligning the most similar line pair and
/// recursing on the lines above and below it.
fn fancy_replace(out: &mut Vec<String>, before: &[&str], after: &[&str]) {
    let chars_before: Vec<Vec<char>> = before.iter().map(|line| line.chars().collect()).collect();
    let chars_after: Vec<Vec<char>> = after.iter().map(|line| line.chars().collect()).collect();

    let mut best: Option<(f64, usize, usize)> = None;
    let mut identical: Option<(usize, usize)> = None;
    for (j, b) in chars_after.iter().enumerate() {
        for (i, a) in chars_before.iter().enumerate() {
            if a == b {
                if identical.is_none() {
                    identical = Some((i, j));
                }
                continue;
            }
            let ratio = Matcher::new(a, b).ratio();
            let best_ratio = best.map_or(SIMILARITY_CUTOFF - 0.01, |(r, _, _)| r);
            if ratio > best_ratio {
                best = Some((ratio, i, j));
            }
        }
    }

    let (i, j, similar) = match best {
        Some((ratio, i, j)) if ratio >= SIMILARITY_CUTOFF => (i, j, true),
        _ => match identical {
            Some((i, j)) => (i, j, false),
            None => return plain_replace(out, before, after),
        },
    };

    replace_helper(out, &before[..i], &after[..j]);
    if similar {
        let (a, b) = (&chars_before[i], &chars_after[j]);
        let (mut a_tags, mut b_tags) = (String::new(), String::new());
        for op in Matcher::new(a, b).opcodes() {
            let (la, lb) = (op.a.len(), op.b.len());
            match op.tag {
                Tag::Replace => {
                    a_tags.extend(std::iter::repeat_n('^', la));
                    b_tags.extend(std::iter::repeat_n('^', lb));
                }
                Tag::Delete => a_tags.extend(std::iter::repeat_n('-', la)),
                Tag::Insert => b_tags.extend(std::iter::repeat_n('+', lb)),
                Tag::Equal => {
                    a_tags.extend(std::iter::repeat_n(' ', la));
                    b_tags.extend(std::iter::repeat_n(' ', lb));
                }
            }
        }
        push_with_guide(out, "- ", before[i], &a_tags);
        push_with_guide(out, "+ ", after[j], &b_tags);
    } else {
        out.push(format!("  {}", before[i]));
    }
    replace_helper(out, &before[i + 1..], &after[j + 1..]);
}

fn replace_helper(out: &mut Vec<String>, before: &[&str], after: &[&str]) {
    match (before.is_empty(), after.is_empty()) {
        (false, false) => fancy_replace(out, before, after),
        (false, true) => dump(out, "- ", before),
        (true, false) => dump(out, "+ ", after),
        (true, true) => {}
    }
}

/// No similar pair: the shorter side goes first.
fn plain_replace(out: &mut Vec<String>, before: &[&str], after: &[&str]) {
    if after.len() < before.len() {
        dump(out, "+ ", after);
        dump(out, "- ", before);
    } else {
        dump(out, "- ", before);
        dump(out, "+ ", after);
    }
}

/// Push `line` and, when anything changed, a `"? "` guide line. Whitespace
/// under unchanged positions is kept so tabs stay aligned.
fn push_with_guide(out: &mut Vec<String>, prefix: &str, line: &str, tags: &str) {
    out.push(format!("{prefix}{line}"));
    let guide: String = line
        .chars()
        .zip(tags.chars())
        .map(|(c, tag)| if tag == ' ' && c.is_whitespace() { c } else { tag })
        .collect();
    let guide = guide.trim_end();
    if !guide.is_empty() {
        out.push(format!("? {guide}\n"));
    }
}
