use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

// ---------------------------------------------------------------------------
// Jira ticket extraction: a pure regex transform over free text
// ---------------------------------------------------------------------------

static TICKET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z][A-Z0-9]+-\d+)\b").unwrap());

/// Extract the set of Jira ticket keys mentioned anywhere in the given
/// texts. Keys look like `PLTFRM-84867`: an uppercase letter, one or more
/// uppercase letters or digits, a hyphen, digits. Results are deduplicated
/// and ordered, so the transform is idempotent viewed as sets.
pub fn extract_tickets<'a, I>(texts: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut tickets = BTreeSet::new();
    for text in texts {
        for capture in TICKET_RE.captures_iter(text) {
            tickets.insert(capture[1].to_string());
        }
    }
    tickets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_from_title_and_body() {
        let tickets = extract_tickets([
            "PLTFRM-84867 feat: cli",
            "Implements CORE-12 and relates to PLTFRM-84867.",
        ]);
        assert_eq!(
            tickets.into_iter().collect::<Vec<_>>(),
            vec!["CORE-12", "PLTFRM-84867"]
        );
    }

    #[test]
    fn single_letter_and_lowercase_keys_do_not_match() {
        assert!(extract_tickets(["X-1 fix"]).is_empty());
        assert!(extract_tickets(["core-12 fix"]).is_empty());
        assert!(extract_tickets(["see issue-42"]).is_empty());
    }

    #[test]
    fn word_boundaries_are_required() {
        assert!(extract_tickets(["ABCD-12x"]).is_empty());
        let ok = extract_tickets(["(AB2-7)"]);
        assert_eq!(ok.into_iter().collect::<Vec<_>>(), vec!["AB2-7"]);
    }

    #[test]
    fn duplicates_collapse() {
        let tickets = extract_tickets(["AB-1 AB-1", "AB-1"]);
        assert_eq!(tickets.len(), 1);
    }

    #[test]
    fn extraction_is_idempotent_as_sets() {
        let first = extract_tickets(["DEV-9 shipped, DEV-10 pending"]);
        let joined = first.iter().map(String::as_str).collect::<Vec<_>>();
        let second = extract_tickets(joined);
        assert_eq!(first, second);
    }
}
