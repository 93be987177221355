use strsim::levenshtein;

/// Up to 3 candidates within an edit distance scaled by needle length.
pub fn suggest<'a>(needle: &str, candidates: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let needle = needle.trim();
    if needle.is_empty() {
        return vec![];
    }

    let mut scored: Vec<(usize, &str)> = candidates
        .into_iter()
        .filter(|c| !c.is_empty() && *c != needle)
        .map(|c| (levenshtein(needle, c), c))
        .collect();

    let max_dist = match needle.len() {
        0..=3 => 1,
        4..=6 => 2,
        7..=10 => 3,
        _ => 4,
    };

    scored.retain(|(d, _)| *d <= max_dist);
    scored.sort_by(|(da, a), (db, b)| da.cmp(db).then(a.len().cmp(&b.len())).then(a.cmp(b)));

    scored.into_iter().take(3).map(|(_, s)| s.to_string()).collect()
}

/// Message suffix for a fix-it, e.g. `; did you mean '__weak'?`.
pub fn did_you_mean<'a>(needle: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let v = suggest(needle, candidates);
    match v.len() {
        0 => None,
        1 => Some(format!("did you mean '{}'?", v[0])),
        _ => Some(format!(
            "did you mean one of: {}?",
            v.iter()
                .map(|s| format!("'{}'", s))
                .collect::<Vec<_>>()
                .join(", ")
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::did_you_mean;

    #[test]
    fn close_qualifier_gets_a_fixit() {
        let known = ["__strong", "__weak", "__unsafe_unretained", "__autoreleasing"];
        assert_eq!(
            did_you_mean("__strng", known).as_deref(),
            Some("did you mean '__strong'?")
        );
        assert_eq!(did_you_mean("__banana_split", known), None);
    }
}
