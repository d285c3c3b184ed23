//! Document-type classification.
//!
//! Classification is a pure, deterministic function: filename keywords first,
//! then the same keyword table against extracted text, then a generic
//! fallback. The language-model service is never consulted for a type label,
//! only for structured field extraction.

/// Fallback label when no pattern matches.
pub const GENERAL_DOCUMENT: &str = "General Document";

/// Ordered keyword patterns. First match wins, so specific patterns must
/// precede the generic ones they overlap with ("title report" before
/// "report", "title commitment" before "commitment").
const PATTERNS: &[(&[&str], &str)] = &[
    (&["title report", "prelim", "preliminary title"], "Title Report"),
    (&["title commitment"], "Title Commitment"),
    (&["appraisal", "valuation report", "bpo"], "Appraisal Report"),
    (
        &["insurance", "hazard policy", "evidence of coverage", "acord"],
        "Insurance Policy",
    ),
    (&["flood cert", "flood zone"], "Flood Certificate"),
    (&["payoff", "pay-off", "demand statement"], "Payoff Statement"),
    (&["bank statement", "account statement"], "Bank Statements"),
    (&["tax return", "form 1040", "form 1120", "schedule k-1"], "Tax Returns"),
    (
        &["purchase contract", "purchase agreement", "sales contract", "psa"],
        "Purchase Contract",
    ),
    (
        &["rehab budget", "scope of work", "construction budget", "sow"],
        "Rehab Budget",
    ),
    (
        &["driver's license", "drivers license", "driver license", "passport", "photo id"],
        "Driver's License",
    ),
    (
        &[
            "operating agreement",
            "articles of organization",
            "articles of incorporation",
            "certificate of formation",
            "ein",
        ],
        "Entity Documents",
    ),
    (&["good standing"], "Certificate of Good Standing"),
    (&["track record", "experience schedule"], "Track Record"),
    (&["questionnaire"], "Borrower Questionnaire"),
    (&["hud", "settlement statement", "closing disclosure"], "Settlement Statement"),
    (&["loan application", "1003"], "Loan Application"),
];

/// Classify a document from its filename and extracted text.
///
/// Empty text is fine: classification then relies on the filename alone.
pub fn classify(name: &str, text: &str) -> &'static str {
    if let Some(label) = match_patterns(name) {
        return label;
    }
    if let Some(label) = match_patterns(text) {
        return label;
    }
    GENERAL_DOCUMENT
}

/// Match the pattern table against one haystack, first match wins.
fn match_patterns(haystack: &str) -> Option<&'static str> {
    if haystack.is_empty() {
        return None;
    }
    let normalized = normalize(haystack);
    for (keywords, label) in PATTERNS {
        for keyword in *keywords {
            if keyword_matches(&normalized, keyword) {
                return Some(label);
            }
        }
    }
    None
}

/// Substring match, except short keywords ("ein", "sow", "psa") must stand
/// as whole words so "reinstatement" does not read as an EIN letter.
fn keyword_matches(haystack: &str, keyword: &str) -> bool {
    if keyword.len() > 4 {
        return haystack.contains(keyword);
    }
    haystack.match_indices(keyword).any(|(at, _)| {
        let end = at + keyword.len();
        let before_ok = haystack[..at]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        before_ok && after_ok
    })
}

/// Lowercase and fold filename separators to spaces so "Title_Report-final"
/// matches "title report".
fn normalize(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .map(|c| if c == '_' || c == '-' || c == '.' { ' ' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_match_wins_with_empty_text() {
        // Content stage never consulted when the filename matches.
        assert_eq!(classify("Title_Report_final.pdf", ""), "Title Report");
    }

    #[test]
    fn test_specific_pattern_precedes_generic() {
        // "title report" must not be shadowed by any later pattern.
        assert_eq!(classify("title report 123 main st.pdf", ""), "Title Report");
        assert_eq!(classify("title_commitment.pdf", ""), "Title Commitment");
    }

    #[test]
    fn test_content_match_when_filename_misses() {
        let text = "This hazard policy provides evidence of coverage for the property.";
        assert_eq!(classify("scan0041.pdf", text), "Insurance Policy");
    }

    #[test]
    fn test_filename_beats_content() {
        // Filename stage has precedence even when text matches a different label.
        let text = "appraisal of the subject property";
        assert_eq!(classify("payoff_demand.pdf", text), "Payoff Statement");
    }

    #[test]
    fn test_fallback_label() {
        assert_eq!(classify("scan0001.pdf", ""), GENERAL_DOCUMENT);
        assert_eq!(classify("notes.txt", "meeting notes from tuesday"), GENERAL_DOCUMENT);
    }

    #[test]
    fn test_separator_normalization() {
        assert_eq!(classify("BANK-STATEMENT-JAN.pdf", ""), "Bank Statements");
        assert_eq!(classify("drivers_license_front.jpg", ""), "Driver's License");
    }

    #[test]
    fn test_short_keywords_match_whole_words_only() {
        // "ein" inside "Reinstatement" must not read as an EIN letter.
        assert_eq!(classify("Reinstatement.pdf", ""), GENERAL_DOCUMENT);
        assert_eq!(classify("EIN_confirmation_letter.pdf", ""), "Entity Documents");
        // Separators fold to spaces, so bounded short keywords still hit.
        assert_eq!(classify("sow_v2.xlsx", ""), "Rehab Budget");
        assert_eq!(classify("signed PSA.pdf", ""), "Purchase Contract");
    }

    #[test]
    fn test_deterministic() {
        for _ in 0..3 {
            assert_eq!(classify("appraisal.pdf", ""), "Appraisal Report");
        }
    }
}
