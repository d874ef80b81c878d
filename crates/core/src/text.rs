//! Text folding shared by phrase and name matching.

/// Lowercases, drops apostrophes, turns other punctuation into spaces and
/// collapses whitespace.
pub fn normalize(text: &str) -> String {
    let mut folded = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\'' | '\u{2019}' | '\u{2018}' | '`' => {}
            ch if ch.is_alphanumeric() => folded.extend(ch.to_lowercase()),
            _ => folded.push(' '),
        }
    }
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Optimal string alignment distance: edits are insertion, deletion,
/// substitution and adjacent transposition.
pub fn edit_distance(left: &str, right: &str) -> usize {
    let a: Vec<char> = left.chars().collect();
    let b: Vec<char> = right.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let width = b.len() + 1;
    let mut table = vec![0usize; (a.len() + 1) * width];
    for (i, cell) in table.iter_mut().step_by(width).enumerate() {
        *cell = i;
    }
    for (j, cell) in table.iter_mut().take(width).enumerate() {
        *cell = j;
    }

    for i in 1..=a.len() {
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            let mut best = (table[(i - 1) * width + j] + 1)
                .min(table[i * width + j - 1] + 1)
                .min(table[(i - 1) * width + j - 1] + cost);
            if i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                best = best.min(table[(i - 2) * width + j - 2] + 1);
            }
            table[i * width + j] = best;
        }
    }
    table[a.len() * width + b.len()]
}

/// 0..=100, where 100 means identical.
pub fn similarity_pct(left: &str, right: &str) -> u8 {
    let longest = left.chars().count().max(right.chars().count());
    if longest == 0 {
        return 100;
    }
    let distance = edit_distance(left, right).min(longest);
    u8::try_from(100 * (longest - distance) / longest).unwrap_or(0)
}
