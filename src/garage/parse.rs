//! Parsing of garage CLI output.

/// Extract the node id from `garage node id` output.
///
/// The id is the first token of the last non-empty line, with any
/// `@host:port` suffix removed.
pub fn parse_node_id(output: &str) -> Option<String> {
    let line = output.lines().map(str::trim).rev().find(|l| !l.is_empty())?;
    let token = line.split_whitespace().next()?;
    let id = token.split('@').next().unwrap_or(token);
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Whether any line of a listing contains `needle`.
///
/// This is a substring match, kept for compatibility with the garage
/// listing format: a bucket named `app` is reported present when the
/// listing only has `application`. An empty needle never matches.
pub fn listing_contains(listing: &str, needle: &str) -> bool {
    !needle.is_empty() && listing.lines().any(|line| line.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_with_address() {
        let out = "==== NODE ID ====\n563e1ac825ee3323aa441e72c26d1030d6d4414aeb3dd25287c531e7fc2bc95d@[::1]:3901\n";
        assert_eq!(
            parse_node_id(out).as_deref(),
            Some("563e1ac825ee3323aa441e72c26d1030d6d4414aeb3dd25287c531e7fc2bc95d")
        );
    }

    #[test]
    fn test_node_id_trailing_blank_lines_and_fields() {
        let out = "header\n  abc123@10.0.0.1:3901   extra\n\n   \n";
        assert_eq!(parse_node_id(out).as_deref(), Some("abc123"));
    }

    #[test]
    fn test_node_id_without_at() {
        assert_eq!(parse_node_id("deadbeef").as_deref(), Some("deadbeef"));
    }

    #[test]
    fn test_node_id_empty() {
        assert_eq!(parse_node_id(""), None);
        assert_eq!(parse_node_id("\n \n"), None);
        assert_eq!(parse_node_id("@host:3901"), None);
    }

    #[test]
    fn test_listing_contains() {
        let listing = "ID                          Name\nGK1234  AKIA_TEST\n";
        assert!(listing_contains(listing, "AKIA_TEST"));
        assert!(!listing_contains(listing, "AKIA_OTHER"));
        assert!(!listing_contains(listing, ""));
    }

    #[test]
    fn test_listing_substring_is_loose() {
        assert!(listing_contains("application  2024-01-01", "app"));
    }
}
