use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One band of the mark scale. Boundaries are inclusive on both ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBoundary {
    pub label: String,
    pub min_score: u32,
    pub max_score: u32,
    pub points: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DivisionBand {
    pub label: String,
    pub min_aggregate: u32,
    pub max_aggregate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassTier {
    Lower,
    Upper,
}

impl ClassTier {
    /// Primary levels P1..P3 use the lower-tier subject set, P4 and above the
    /// upper-tier set. Unrecognized levels fall back to upper.
    pub fn from_class_level(level: &str) -> ClassTier {
        let digit = level
            .trim()
            .chars()
            .find(|c| c.is_ascii_digit())
            .and_then(|c| c.to_digit(10));
        match digit {
            Some(n) if n <= 3 => ClassTier::Lower,
            _ => ClassTier::Upper,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingConfig {
    pub boundaries: Vec<GradeBoundary>,
    pub divisions: Vec<DivisionBand>,
    pub passing_mark: u32,
    pub lower_tier_subjects: Vec<String>,
    pub upper_tier_subjects: Vec<String>,
}

impl GradingConfig {
    pub fn required_subjects(&self, tier: ClassTier) -> &[String] {
        match tier {
            ClassTier::Lower => &self.lower_tier_subjects,
            ClassTier::Upper => &self.upper_tier_subjects,
        }
    }
}

impl Default for GradingConfig {
    /// UNEB-style scale: D1..F9 mark boundaries, aggregate over four
    /// upper-tier subjects, Divisions I..IV plus Ungraded. Lower aggregate is
    /// better.
    fn default() -> Self {
        fn b(label: &str, min_score: u32, max_score: u32, points: u32) -> GradeBoundary {
            GradeBoundary {
                label: label.to_string(),
                min_score,
                max_score,
                points,
            }
        }
        fn d(label: &str, min_aggregate: u32, max_aggregate: u32) -> DivisionBand {
            DivisionBand {
                label: label.to_string(),
                min_aggregate,
                max_aggregate,
            }
        }
        GradingConfig {
            boundaries: vec![
                b("D1", 90, 100, 1),
                b("D2", 80, 89, 2),
                b("C3", 70, 79, 3),
                b("C4", 60, 69, 4),
                b("C5", 55, 59, 5),
                b("C6", 50, 54, 6),
                b("P7", 45, 49, 7),
                b("P8", 40, 44, 8),
                b("F9", 0, 39, 9),
            ],
            divisions: vec![
                d("I", 4, 12),
                d("II", 13, 23),
                d("III", 24, 29),
                d("IV", 30, 34),
                d("U", 35, 36),
            ],
            passing_mark: 40,
            lower_tier_subjects: vec!["ENG".into(), "MTC".into(), "LIT".into()],
            upper_tier_subjects: vec!["ENG".into(), "MTC".into(), "SCI".into(), "SST".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GradingError {
    pub code: String,
    pub message: String,
}

impl GradingError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// The boundary containing `mark`, or `None` for an unset mark. `None` is the
/// no-grade sentinel and contributes zero points everywhere.
pub fn grade_for(mark: Option<u32>, config: &GradingConfig) -> Option<&GradeBoundary> {
    let mark = mark?;
    config
        .boundaries
        .iter()
        .find(|b| mark >= b.min_score && mark <= b.max_score)
}

pub fn points_for(mark: Option<u32>, config: &GradingConfig) -> u32 {
    grade_for(mark, config).map(|b| b.points).unwrap_or(0)
}

/// Sum of grade points over exactly the tier's required subject set.
/// Subjects absent from `marks` contribute zero points; an aggregate of 0 is
/// the explicit no-data sentinel (the smallest real aggregate is one point
/// per required subject).
pub fn aggregate_for(
    marks: &BTreeMap<String, Option<u32>>,
    tier: ClassTier,
    config: &GradingConfig,
) -> u32 {
    config
        .required_subjects(tier)
        .iter()
        .map(|subject| points_for(marks.get(subject).copied().flatten(), config))
        .sum()
}

/// The band containing `aggregate`, or `None` (ungraded) for the no-data
/// sentinel and out-of-band values.
pub fn division_for(aggregate: u32, config: &GradingConfig) -> Option<&DivisionBand> {
    if aggregate == 0 {
        return None;
    }
    config
        .divisions
        .iter()
        .find(|d| aggregate >= d.min_aggregate && aggregate <= d.max_aggregate)
}

pub fn is_passing(mark: u32, config: &GradingConfig) -> bool {
    mark >= config.passing_mark
}

/// A usable configuration is a total, non-overlapping function over its
/// domain: boundaries over marks [0,100], divisions over the achievable
/// aggregate range of the upper-tier subject set.
pub fn validate_config(config: &GradingConfig) -> Result<(), GradingError> {
    if config.boundaries.is_empty() {
        return Err(GradingError::new("bad_config", "no grade boundaries"));
    }
    if config.upper_tier_subjects.is_empty() || config.lower_tier_subjects.is_empty() {
        return Err(GradingError::new("bad_config", "empty tier subject set"));
    }

    let mut bounds: Vec<(u32, u32, &str)> = config
        .boundaries
        .iter()
        .map(|b| (b.min_score, b.max_score, b.label.as_str()))
        .collect();
    bounds.sort_by_key(|&(min, _, _)| min);
    check_cover(&bounds, 0, 100, "grade boundaries")?;

    let min_points = config.boundaries.iter().map(|b| b.points).min().unwrap_or(0);
    let max_points = config.boundaries.iter().map(|b| b.points).max().unwrap_or(0);
    let n = config.upper_tier_subjects.len() as u32;
    let mut bands: Vec<(u32, u32, &str)> = config
        .divisions
        .iter()
        .map(|d| (d.min_aggregate, d.max_aggregate, d.label.as_str()))
        .collect();
    bands.sort_by_key(|&(min, _, _)| min);
    check_cover(&bands, n * min_points, n * max_points, "division bands")?;

    Ok(())
}

fn check_cover(
    sorted: &[(u32, u32, &str)],
    domain_min: u32,
    domain_max: u32,
    what: &str,
) -> Result<(), GradingError> {
    let mut expect = domain_min;
    for &(min, max, label) in sorted {
        if max < min {
            return Err(GradingError::new(
                "bad_config",
                format!("{}: '{}' has max below min", what, label),
            ));
        }
        if min > expect {
            return Err(GradingError::new(
                "bad_config",
                format!("{}: gap before '{}' at {}", what, label, expect),
            ));
        }
        if min < expect {
            return Err(GradingError::new(
                "bad_config",
                format!("{}: '{}' overlaps at {}", what, label, min),
            ));
        }
        expect = max + 1;
    }
    if expect != domain_max + 1 {
        return Err(GradingError::new(
            "bad_config",
            format!("{}: domain not covered up to {}", what, domain_max),
        ));
    }
    Ok(())
}
