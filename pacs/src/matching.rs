//! Attribute matching for query/retrieve requests.
//!
//! The matcher honors the query semantics of the C-FIND service:
//! universal matching on empty values, single-value matching,
//! wildcard matching for the string VRs other than UI,
//! UID list matching, date/time range matching,
//! and recursive sequence matching.
use regex::RegexBuilder;
use std::cmp::Ordering;

use ferrodicom_core::value::Value;
use ferrodicom_core::{tags, DataElement, DataSet, VR};

/// The hierarchy level of a query, from (0008,0052).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueryLevel {
    Patient,
    Study,
    Series,
    Image,
}

impl QueryLevel {
    pub fn from_keyword(keyword: &str) -> Option<QueryLevel> {
        match keyword.trim_matches([' ', '\0']) {
            "PATIENT" => Some(QueryLevel::Patient),
            "STUDY" => Some(QueryLevel::Study),
            "SERIES" => Some(QueryLevel::Series),
            "IMAGE" => Some(QueryLevel::Image),
            _ => None,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            QueryLevel::Patient => "PATIENT",
            QueryLevel::Study => "STUDY",
            QueryLevel::Series => "SERIES",
            QueryLevel::Image => "IMAGE",
        }
    }

    /// The level of a query data set, when present and recognized.
    pub fn of(query: &DataSet) -> Option<QueryLevel> {
        query
            .opt_string(tags::QUERY_RETRIEVE_LEVEL)
            .and_then(|kw| QueryLevel::from_keyword(&kw))
    }
}

/// Whether the candidate data set satisfies every key in the query.
///
/// The query level element itself never participates in matching.
pub fn dataset_matches(query: &DataSet, candidate: &DataSet) -> bool {
    query
        .iter()
        .filter(|elem| elem.tag() != tags::QUERY_RETRIEVE_LEVEL)
        .all(|elem| element_matches(elem, candidate.get(elem.tag())))
}

fn element_matches(query: &DataElement, candidate: Option<&DataElement>) -> bool {
    match query.value() {
        Value::Sequence(items) => {
            // universal when empty; otherwise the single query item
            // must match some candidate item recursively
            let Some(query_item) = items.first() else {
                return true;
            };
            let Some(candidate_items) = candidate.and_then(|c| c.value().items()) else {
                return false;
            };
            candidate_items
                .iter()
                .any(|item| dataset_matches(query_item, item))
        }
        Value::Primitive(value) => {
            let pattern = value.to_str();
            let pattern = pattern.trim_matches([' ', '\0']);
            if pattern.is_empty() {
                // universal: matches anything,
                // and only requests the attribute back
                return true;
            }
            let Some(candidate) = candidate else {
                return false;
            };
            let candidate_value = candidate.to_str();
            let candidate_value = candidate_value.trim_matches([' ', '\0']);
            value_matches(query.vr(), pattern, candidate_value)
        }
        Value::PixelSequence { .. } => true,
    }
}

/// Whether a single candidate value satisfies a single query value.
pub fn value_matches(vr: VR, pattern: &str, value: &str) -> bool {
    // a backslash-separated list of UIDs is OR-matched
    if vr == VR::UI && pattern.contains('\\') {
        return pattern
            .split('\\')
            .any(|uid| uid.trim_matches([' ', '\0']) == value);
    }
    if matches!(vr, VR::DA | VR::TM | VR::DT) && pattern.contains('-') {
        return range_matches(pattern, value);
    }
    if vr != VR::UI && vr.is_string() && (pattern.contains('*') || pattern.contains('?')) {
        return wildcard_matches(pattern, value, vr == VR::PN);
    }
    if vr == VR::PN {
        return pattern.eq_ignore_ascii_case(value);
    }
    pattern == value
}

/// Range matching for the date and time VRs:
/// `from-to`, either side possibly empty for an open range,
/// compared lexicographically on the zero-padded form.
fn range_matches(pattern: &str, value: &str) -> bool {
    let Some((from, to)) = pattern.split_once('-') else {
        return pattern == value;
    };
    if value.is_empty() {
        return false;
    }
    let lower_ok = from.is_empty() || padded_cmp(value, from) != Ordering::Less;
    let upper_ok = to.is_empty() || padded_cmp(value, to) != Ordering::Greater;
    lower_ok && upper_ok
}

/// Compare two date/time strings after right-padding
/// the shorter one with zeros.
fn padded_cmp(a: &str, b: &str) -> Ordering {
    let width = a.len().max(b.len());
    let a_padded = format!("{:0<width$}", a, width = width);
    let b_padded = format!("{:0<width$}", b, width = width);
    a_padded.cmp(&b_padded)
}

/// Wildcard matching with `*` (any run) and `?` (one character),
/// case-insensitive for person names.
pub fn wildcard_matches(pattern: &str, value: &str, case_insensitive: bool) -> bool {
    RegexBuilder::new(&wildcard_to_regex(pattern))
        .case_insensitive(case_insensitive)
        .build()
        .map(|re| re.is_match(value))
        .unwrap_or(false)
}

/// Convert a wildcard pattern into an anchored regular expression,
/// escaping every other metacharacter.
pub fn wildcard_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrodicom_core::{DataElement, VR};
    use rstest::rstest;

    #[rstest]
    #[case("SMITH*", "SMITH^JOHN", true)]
    #[case("smith*", "SMITH^JOHN", true)]
    #[case("SM?TH*", "SMITH^JANE", true)]
    #[case("SMITH*", "DOE^JANE", false)]
    #[case("*", "ANYTHING", true)]
    fn person_name_wildcards(#[case] pattern: &str, #[case] value: &str, #[case] expected: bool) {
        assert_eq!(value_matches(VR::PN, pattern, value), expected);
    }

    #[test]
    fn wildcard_star_matches_every_nonempty_string() {
        for value in ["A", "SMITH^JOHN", "1.2.3", "x y z", "?*\\"] {
            assert!(value_matches(VR::LO, "*", value));
        }
    }

    #[test]
    fn regex_metacharacters_are_escaped() {
        assert_eq!(wildcard_to_regex("A.B*"), "^A\\.B.*$");
        assert!(value_matches(VR::LO, "A.B*", "A.B2"));
        assert!(!value_matches(VR::LO, "A.B*", "AXB2"));
        assert!(!value_matches(VR::LO, "A(B)", "AB"));
        assert!(value_matches(VR::LO, "A(B)", "A(B)"));
    }

    #[test]
    fn uid_values_never_wildcard() {
        // `*` is not a wildcard in a UID, so this is an exact mismatch
        assert!(!value_matches(VR::UI, "1.2.*", "1.2.3"));
        assert!(value_matches(VR::UI, "1.2.3", "1.2.3"));
    }

    #[test]
    fn uid_lists_are_or_matched()  {
        assert!(value_matches(VR::UI, "1.2.3\\1.2.4", "1.2.4"));
        assert!(!value_matches(VR::UI, "1.2.3\\1.2.4", "1.2.5"));
    }

    #[rstest]
    #[case("20240101-20240131", "20240115", true)]
    #[case("20240101-20240131", "20240201", false)]
    #[case("-20240131", "20231201", true)]
    #[case("20240101-", "20250101", true)]
    #[case("20240101-", "20231231", false)]
    fn date_ranges(#[case] pattern: &str, #[case] value: &str, #[case] expected: bool) {
        assert_eq!(value_matches(VR::DA, pattern, value), expected);
    }

    #[test]
    fn time_range_bounds_are_zero_padded() {
        // 10:00:00 still falls inside an upper bound of "1000"
        assert!(value_matches(VR::TM, "0930-1000", "100000"));
        assert!(!value_matches(VR::TM, "0930-1000", "100001"));
    }

    #[test]
    fn pn_exact_match_is_case_insensitive() {
        assert!(value_matches(VR::PN, "smith^john", "SMITH^JOHN"));
        assert!(!value_matches(VR::CS, "ct", "CT"));
    }

    #[test]
    fn empty_query_values_match_universally() {
        let mut query = DataSet::new();
        query.put(DataElement::new(tags::PATIENT_NAME, VR::PN, ""));
        let mut candidate = DataSet::new();
        candidate.put(DataElement::new(tags::PATIENT_NAME, VR::PN, "DOE^JANE"));
        assert!(dataset_matches(&query, &candidate));

        // even against a candidate without the attribute
        assert!(dataset_matches(&query, &DataSet::new()));
    }

    #[test]
    fn missing_candidate_attribute_fails_nonuniversal_keys() {
        let mut query = DataSet::new();
        query.put(DataElement::new(tags::PATIENT_NAME, VR::PN, "DOE*"));
        assert!(!dataset_matches(&query, &DataSet::new()));
    }

    #[test]
    fn sequence_matching_recurses_over_one_item() {
        let mut query_item = DataSet::new();
        query_item.put(DataElement::new(
            tags::REFERENCED_SOP_INSTANCE_UID,
            VR::UI,
            "1.2.3",
        ));
        let mut query = DataSet::new();
        query.put_seq(tags::REFERENCED_STUDY_SEQUENCE, vec![query_item]);

        let mut matching_item = DataSet::new();
        matching_item.put(DataElement::new(
            tags::REFERENCED_SOP_INSTANCE_UID,
            VR::UI,
            "1.2.3",
        ));
        let mut other_item = DataSet::new();
        other_item.put(DataElement::new(
            tags::REFERENCED_SOP_INSTANCE_UID,
            VR::UI,
            "9.9",
        ));
        let mut candidate = DataSet::new();
        candidate.put_seq(
            tags::REFERENCED_STUDY_SEQUENCE,
            vec![other_item, matching_item],
        );
        assert!(dataset_matches(&query, &candidate));
    }

    #[test]
    fn query_level_parsing() {
        assert_eq!(QueryLevel::from_keyword("PATIENT"), Some(QueryLevel::Patient));
        assert_eq!(QueryLevel::from_keyword("IMAGE "), Some(QueryLevel::Image));
        assert_eq!(QueryLevel::from_keyword("VOLUME"), None);
        assert_eq!(QueryLevel::Series.keyword(), "SERIES");
    }
}
