//! Heuristic title normalisation.
//!
//! Turns noisy marketplace titles into the grouping key fields: a short
//! canonical card name, a grade label and a language code.

/// Multi-word marketplace noise, matched on whole tokens before single words.
const NOISE_PHRASES: &[&[&str]] = &[
    &["trading", "card"],
    &["near", "mint"],
    &["free", "shipping"],
    &["fast", "shipping"],
    &["ultra", "rare"],
    &["secret", "rare"],
    &["first", "edition"],
    &["1st", "edition"],
    &["1st", "ed"],
    &["reverse", "holo"],
    &["buy", "it", "now"],
];

const NOISE_WORDS: &[&str] = &[
    "pokemon", "pokémon", "card", "tcg", "authentic", "original", "mint", "nm", "psa", "cgc",
    "bgs", "graded", "slab", "shipping", "rare", "shadowless", "unlimited", "japanese", "jpn",
    "jp", "english", "en", "holo", "holofoil", "ebay", "seller", "auction",
];

/// Tokens kept for the canonical name.
const NAME_TOKENS: usize = 3;

fn tokenize(title: &str) -> Vec<String> {
    title
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

fn is_number(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_digit())
}

/// Grade number if `tokens[i]` starts a "psa 10" / "psa10" mention.
/// Returns the number and how many tokens the mention spans.
fn grade_mention<'a>(tokens: &'a [String], i: usize, prefix: &str) -> Option<(&'a str, usize)> {
    let token = tokens[i].as_str();
    if token == prefix {
        return tokens
            .get(i + 1)
            .filter(|next| is_number(next))
            .map(|next| (next.as_str(), 2));
    }
    token
        .strip_prefix(prefix)
        .filter(|rest| is_number(rest))
        .map(|rest| (rest, 1))
}

fn title_case(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut start_of_word = true;
    for c in word.chars() {
        if c.is_alphabetic() {
            if start_of_word {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            start_of_word = false;
        } else {
            out.push(c);
            start_of_word = !c.is_alphanumeric();
        }
    }
    out
}

/// Canonical card name: grading and marketplace noise removed, first three
/// remaining words, title-cased.
///
/// "Pokemon Charizard Base Set PSA 10 Holo" → "Charizard Base Set"
pub fn normalize_card_name(title: &str) -> String {
    let tokens = tokenize(title);

    // Pass 1: grade mentions ("psa 10", "psa10", "grade 9").
    let mut without_grades: Vec<String> = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        if let Some((_, span)) =
            grade_mention(&tokens, i, "psa").or_else(|| grade_mention(&tokens, i, "grade"))
        {
            i += span;
            continue;
        }
        without_grades.push(tokens[i].clone());
        i += 1;
    }

    // Pass 2: noise phrases, then noise words.
    let mut kept: Vec<String> = Vec::with_capacity(without_grades.len());
    let mut i = 0;
    'outer: while i < without_grades.len() {
        for phrase in NOISE_PHRASES {
            let end = i + phrase.len();
            if end <= without_grades.len()
                && without_grades[i..end].iter().zip(phrase.iter()).all(|(a, b)| a == b)
            {
                i = end;
                continue 'outer;
            }
        }
        if !NOISE_WORDS.contains(&without_grades[i].as_str()) {
            kept.push(without_grades[i].clone());
        }
        i += 1;
    }

    kept.iter()
        .take(NAME_TOKENS)
        .map(|w| title_case(w))
        .collect::<Vec<_>>()
        .join(" ")
}

/// "Charizard PSA 10" → `Some("PSA 10")`.
pub fn extract_grade(title: &str) -> Option<String> {
    let tokens = tokenize(title);
    (0..tokens.len())
        .find_map(|i| grade_mention(&tokens, i, "psa"))
        .map(|(n, _)| format!("PSA {n}"))
}

/// "JP" for Japanese-language titles, "EN" otherwise.
pub fn extract_language(title: &str) -> String {
    if title.contains("日本語") {
        return "JP".to_string();
    }
    let japanese = tokenize(title)
        .iter()
        .any(|t| matches!(t.as_str(), "japanese" | "jp" | "jpn"));
    let code = if japanese { "JP" } else { "EN" };
    code.to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
