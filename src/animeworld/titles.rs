//! Title normalisation and matching against source-site search results.

use once_cell::sync::Lazy;
use regex::Regex;

use super::client::SearchHit;

static PAREN_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\([^)]*\)").unwrap());
static NON_ALNUM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());
static YEAR_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s*\((?:\d{4}|TV)\)\s*").unwrap());

/// Normalise a title for equality comparison: lowercase, drop parenthesised
/// language/segment tags (`(ita)`, `(sub ita)`, `(TV)`), strip everything but
/// letters and digits, collapse runs of separators into single spaces.
pub fn normalize_title(title: &str) -> String {
    let lower = title.to_lowercase();
    let without_tags = PAREN_TAG_RE.replace_all(&lower, " ");
    let spaced = NON_ALNUM_RE.replace_all(&without_tags, " ");
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip `(YYYY)` and `(TV)` suffixes from a candidate search keyword while
/// keeping the rest of the title intact.
pub fn sanitize_keyword(title: &str) -> String {
    YEAR_TAG_RE.replace_all(title, " ").trim().to_string()
}

/// Select the results matching `target`, plus any later parts of the same
/// release.
///
/// A result qualifies as a part only when its normalised `name` or `jtitle`
/// is exactly `<target> part <n>` (or the Italian `parte <n>`). The `part`
/// keyword is required so that a plain `<target> 2`, usually a different
/// season, is never pulled in. The combined list is ordered by ascending
/// result id, which tracks the site's publication order.
pub fn find_best_match_with_parts(results: &[SearchHit], target: &str) -> Vec<SearchHit> {
    let base = normalize_title(target);
    if base.is_empty() {
        return Vec::new();
    }
    let part_re = Regex::new(&format!(r"^{} parte? \d+$", regex::escape(&base)))
        .expect("escaped base title is a valid regex");

    let mut exact: Vec<SearchHit> = Vec::new();
    let mut parts: Vec<SearchHit> = Vec::new();
    for hit in results {
        let name = normalize_title(&hit.name);
        let jtitle = normalize_title(&hit.jtitle);
        if name == base || jtitle == base {
            exact.push(hit.clone());
        } else if part_re.is_match(&name) || part_re.is_match(&jtitle) {
            parts.push(hit.clone());
        }
    }

    exact.sort_by_key(|h| h.id);
    parts.sort_by_key(|h| h.id);
    exact.extend(parts);
    exact
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: i64, name: &str, jtitle: &str) -> SearchHit {
        SearchHit {
            id,
            name: name.to_string(),
            jtitle: jtitle.to_string(),
            link: format!("/play/x.{}", id),
            identifier: format!("x.{}", id),
            anilist_id: None,
            dub: false,
        }
    }

    #[test]
    fn normalization_drops_tags_and_punctuation() {
        assert_eq!(normalize_title("Sakamoto Days (ITA)"), "sakamoto days");
        assert_eq!(normalize_title("SAKAMOTO  DAYS!!"), "sakamoto days");
        assert_eq!(normalize_title("Frieren: Beyond Journey's End (TV)"), "frieren beyond journey s end");
    }

    #[test]
    fn sanitize_strips_year_and_tv_only() {
        assert_eq!(sanitize_keyword("Dr. Stone (2019)"), "Dr. Stone");
        assert_eq!(sanitize_keyword("Dr. Stone (TV)"), "Dr. Stone");
        assert_eq!(sanitize_keyword("Mushoku Tensei (Part 2)"), "Mushoku Tensei (Part 2)");
    }

    #[test]
    fn exact_matches_come_before_parts_sorted_by_id() {
        let results = vec![
            hit(30, "Sakamoto Days Part 2", ""),
            hit(10, "Sakamoto Days", "SAKAMOTO DAYS"),
            hit(20, "Sakamoto Days Parte 3", ""),
        ];
        let matched = find_best_match_with_parts(&results, "Sakamoto Days");
        let ids: Vec<i64> = matched.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![10, 20, 30]);
    }

    #[test]
    fn part_keyword_is_required() {
        // "<base> 2" without the part keyword is a different season, not a part.
        let results = vec![
            hit(1, "Mob Psycho 100", ""),
            hit(2, "Mob Psycho 100 2", ""),
            hit(3, "Mob Psycho 100 Part 2", ""),
        ];
        let matched = find_best_match_with_parts(&results, "Mob Psycho 100");
        let ids: Vec<i64> = matched.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn jtitle_matches_too() {
        let results = vec![hit(5, "Totally Different", "Boku no Hero Academia")];
        let matched = find_best_match_with_parts(&results, "Boku no Hero Academia");
        assert_eq!(matched.len(), 1);
    }

    #[test]
    fn language_tag_variants_match() {
        let results = vec![hit(9, "One Piece (ITA)", "")];
        let matched = find_best_match_with_parts(&results, "One Piece");
        assert_eq!(matched.len(), 1);
    }
}
