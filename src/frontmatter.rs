//! Parsing the `---` delimited preamble at the top of `SKILL.md`
//!
//! ```text
//! ---
//! name: Code Review
//! description: Reviews code for style and correctness
//! ---
//! Instructions follow...
//! ```
//!
//! This is deliberately not a YAML parser: each line is `key: value`,
//! split on the first colon. Keys we don't know are ignored.

const DELIMITER: &str = "---";

/// The fields we care about from a manifest's frontmatter.
///
/// Both are empty if the manifest has no frontmatter block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frontmatter {
    pub name: String,
    pub description: String,
}

/// Pulls the name and description out of a manifest.
///
/// Descriptions longer than `max_description_length` characters are truncated.
/// Missing (or unterminated) frontmatter isn't an error;
/// you just get empty fields back.
pub fn parse_frontmatter(manifest: &str, max_description_length: usize) -> Frontmatter {
    let mut frontmatter = Frontmatter::default();

    let lines: Vec<&str> = manifest.lines().collect();
    let mut delimiters = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.trim() == DELIMITER)
        .map(|(i, _)| i);
    let (Some(open), Some(close)) = (delimiters.next(), delimiters.next()) else {
        return frontmatter;
    };

    for line in &lines[open + 1..close] {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = unquote(value.trim());
        match key.trim().to_lowercase().as_str() {
            "name" => frontmatter.name = value.to_owned(),
            "description" => {
                frontmatter.description = value.chars().take(max_description_length).collect()
            }
            _ => {}
        }
    }
    frontmatter
}

/// Removes one layer of matching single or double quotes.
fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn basic() {
        let fm = parse_frontmatter(
            "---\nname: Code Review\ndescription: reviews code\n---\nBody text",
            1024,
        );
        assert_eq!(
            fm,
            Frontmatter {
                name: "Code Review".to_owned(),
                description: "reviews code".to_owned(),
            }
        );
    }

    #[test]
    fn no_block() {
        assert_eq!(
            parse_frontmatter("# Just a heading\nname: nope\n", 1024),
            Frontmatter::default()
        );
        assert_eq!(parse_frontmatter("", 1024), Frontmatter::default());
        // Opened but never closed
        assert_eq!(
            parse_frontmatter("---\nname: dangling\n", 1024),
            Frontmatter::default()
        );
    }

    #[test]
    fn keys_and_values() {
        let fm = parse_frontmatter(
            "intro line\n  ---  \r\nNAME :  Spaced Out  \r\nallowed-tools: Read, Grep\n\
             description: \"a: quoted, colon-y value\"\nnot a pair\n---\nname: body",
            1024,
        );
        assert_eq!(fm.name, "Spaced Out");
        assert_eq!(fm.description, "a: quoted, colon-y value");
    }

    #[test]
    fn truncation() {
        let fm = parse_frontmatter("---\ndescription: \u{e9}t\u{e9} long\n---\n", 3);
        assert_eq!(fm.description, "\u{e9}t\u{e9}");
        assert_eq!(fm.name, "");
    }

    #[test]
    fn empty_block() {
        let fm = parse_frontmatter("---\n---\nname: after\n", 1024);
        assert_eq!(fm, Frontmatter::default());
    }
}
