use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Acceptance floor for fuzzy matches. Kept at the historical value; imports
/// depend on it behaviorally.
const MATCH_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub id: String,
    pub full_name: String,
    pub index_number: Option<String>,
    pub class_level: String,
    pub stream: String,
}

/// Canonical form of a pupil name: uppercased, punctuation stripped, tokens
/// sorted. Word order and punctuation differences cancel out.
pub fn normalize_name(name: &str) -> String {
    let cleaned: String = name
        .to_uppercase()
        .chars()
        .filter(|c| c.is_alphabetic() || c.is_whitespace())
        .collect();
    let mut tokens: Vec<&str> = cleaned.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

fn token_set(normalized: &str) -> BTreeSet<String> {
    normalized.split_whitespace().map(|t| t.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome<'a> {
    Exact(&'a StudentRecord),
    Fuzzy(&'a StudentRecord, f64),
    Unresolved,
}

impl<'a> MatchOutcome<'a> {
    pub fn student(&self) -> Option<&'a StudentRecord> {
        match self {
            MatchOutcome::Exact(s) => Some(s),
            MatchOutcome::Fuzzy(s, _) => Some(s),
            MatchOutcome::Unresolved => None,
        }
    }
}

/// Resolve a free-text name against the roster. An exact normalized match
/// returns immediately; otherwise candidates score by shared-token overlap
/// and the best one is accepted at the 0.5 floor. Ties keep the first
/// candidate encountered in roster order.
pub fn match_student<'a>(name: &str, roster: &'a [StudentRecord]) -> MatchOutcome<'a> {
    let wanted = normalize_name(name);
    if wanted.is_empty() {
        return MatchOutcome::Unresolved;
    }

    for student in roster {
        if normalize_name(&student.full_name) == wanted {
            return MatchOutcome::Exact(student);
        }
    }

    let wanted_tokens = token_set(&wanted);
    let mut best: Option<(&StudentRecord, f64)> = None;
    for student in roster {
        let candidate_tokens = token_set(&normalize_name(&student.full_name));
        let shared = wanted_tokens.intersection(&candidate_tokens).count();
        let denom = wanted_tokens.len().max(candidate_tokens.len());
        if denom == 0 {
            continue;
        }
        let score = shared as f64 / denom as f64;
        if best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((student, score));
        }
    }

    match best {
        Some((student, score)) if score >= MATCH_THRESHOLD => MatchOutcome::Fuzzy(student, score),
        _ => MatchOutcome::Unresolved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(id: &str, name: &str) -> StudentRecord {
        StudentRecord {
            id: id.to_string(),
            full_name: name.to_string(),
            index_number: None,
            class_level: "P6".to_string(),
            stream: "A".to_string(),
        }
    }

    #[test]
    fn normalize_cancels_order_and_punctuation() {
        assert_eq!(
            normalize_name("John Mary Okot"),
            normalize_name("OKOT, MARY JOHN")
        );
        assert_eq!(normalize_name("O'kello  Denis"), "DENIS OKELLO");
        assert_eq!(normalize_name("a-b c"), "AB C");
    }

    #[test]
    fn normalize_is_permutation_invariant() {
        let base = ["ACHENG", "GRACE", "MARY"];
        let perms: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        let expect = normalize_name(&base.join(" "));
        for p in perms {
            let joined = format!("{} {} {}", base[p[0]], base[p[1]], base[p[2]]);
            assert_eq!(normalize_name(&joined), expect);
        }
    }

    #[test]
    fn exact_normalized_match_wins() {
        let roster = vec![student("s1", "John Mary Okot"), student("s2", "John Okot")];
        let got = match_student("OKOT JOHN MARY", &roster);
        assert_eq!(got.student().map(|s| s.id.as_str()), Some("s1"));
        assert!(matches!(got, MatchOutcome::Exact(_)));
    }

    #[test]
    fn fuzzy_match_above_threshold() {
        let roster = vec![student("s1", "John Mary Okot")];
        let got = match_student("JOHN OKOT", &roster);
        match got {
            MatchOutcome::Fuzzy(s, score) => {
                assert_eq!(s.id, "s1");
                assert!((score - 2.0 / 3.0).abs() < 1e-9);
            }
            other => panic!("expected fuzzy match, got {:?}", other),
        }
    }

    #[test]
    fn below_threshold_is_unresolved() {
        let roster = vec![student("s1", "John Mary Okot")];
        assert_eq!(
            match_student("PETER OKELLO APIO", &roster),
            MatchOutcome::Unresolved
        );
    }

    #[test]
    fn tie_keeps_first_roster_candidate() {
        let roster = vec![
            student("s1", "John Okot Apio"),
            student("s2", "John Okot Mugisha"),
        ];
        let got = match_student("JOHN OKOT ACHENG", &roster);
        assert_eq!(got.student().map(|s| s.id.as_str()), Some("s1"));
    }

    #[test]
    fn empty_name_is_unresolved() {
        let roster = vec![student("s1", "John Mary Okot")];
        assert_eq!(match_student("  --  ", &roster), MatchOutcome::Unresolved);
    }
}
