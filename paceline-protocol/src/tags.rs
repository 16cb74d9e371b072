// Copyright (c) The paceline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Extracts `@tag` tokens from a test title.
///
/// A tag starts at an `@` and extends to the next whitespace character or
/// the end of the title; the `@` itself is part of the token. A bare `@`
/// followed by whitespace is not a tag. Tags need not be preceded by
/// whitespace, so `"checkout@smoke"` yields `["@smoke"]`.
pub fn extract_tags(title: &str) -> Vec<String> {
    let mut tags = Vec::new();
    let mut rest = title;
    while let Some(at) = rest.find('@') {
        let tail = &rest[at..];
        let end = tail
            .char_indices()
            .find(|(_, c)| c.is_whitespace())
            .map_or(tail.len(), |(index, _)| index);
        if end > 1 {
            tags.push(tail[..end].to_owned());
        }
        // end >= 1 because the tail starts at a non-whitespace `@`.
        rest = &tail[end.max(1)..];
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("adds an item @smoke", &["@smoke"]; "single trailing tag")]
    #[test_case("@slow @flaky retries the payment", &["@slow", "@flaky"]; "leading tags")]
    #[test_case("no tags here", &[]; "no tags")]
    #[test_case("checkout@smoke", &["@smoke"]; "tag not preceded by whitespace")]
    #[test_case("bare @ sign", &[]; "bare at is not a tag")]
    #[test_case("@@double", &["@@double"]; "doubled at folds into one token")]
    #[test_case("ends with @wip", &["@wip"]; "tag at end of title")]
    #[test_case("", &[]; "empty title")]
    fn extraction(title: &str, expected: &[&str]) {
        assert_eq!(extract_tags(title), expected);
    }
}
