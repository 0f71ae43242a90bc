//! Image reference and credential parsing.
//!
//! An image reference is a `(repository-name, tag)` pair. Parsing never
//! fails: a malformed reference still yields a usable name/tag per the
//! rules below.

use std::fmt::Display;

/// A parsed `(repository-name, tag)` pair.
///
/// Parsing rule: split on the first `:` into name and tag; no colon
/// means tag defaults to `latest`. If the name contains no `/`, it is
/// prefixed with `library/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    pub name: String,
    pub tag: String,
}

impl ImageReference {
    pub fn parse(image_name_tag: &str) -> ImageReference {
        let (name, tag) = match image_name_tag.split_once(':') {
            Some((name, tag)) => (name.to_string(), tag.to_string()),
            None => (image_name_tag.to_string(), "latest".to_string()),
        };

        let name = if name.contains('/') {
            name
        } else {
            format!("library/{name}")
        };

        ImageReference { name, tag }
    }
}

impl Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

/// Parse `<username>:<password>` credentials. Absent or malformed input
/// (no colon) yields `("", "")`, i.e. anonymous.
pub fn parse_credentials(credentials: &str) -> (String, String) {
    match credentials.split_once(':') {
        Some((user, pass)) => (user.to_string(), pass.to_string()),
        None => (String::new(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_defaults_to_library_and_latest() {
        let r = ImageReference::parse("ubuntu");
        assert_eq!(r.name, "library/ubuntu");
        assert_eq!(r.tag, "latest");
    }

    #[test]
    fn namespaced_name_with_explicit_tag() {
        let r = ImageReference::parse("dockerfile/elasticsearch:latest");
        assert_eq!(r.name, "dockerfile/elasticsearch");
        assert_eq!(r.tag, "latest");
    }

    #[test]
    fn short_repo_with_tag() {
        let r = ImageReference::parse("repo/img:v1");
        assert_eq!(r.name, "repo/img");
        assert_eq!(r.tag, "v1");
    }

    #[test]
    fn credentials_split_on_first_colon() {
        assert_eq!(
            parse_credentials("alice:s3cret"),
            ("alice".to_string(), "s3cret".to_string())
        );
    }

    #[test]
    fn credentials_with_colon_in_password_split_on_first() {
        assert_eq!(
            parse_credentials("alice:s3:cret"),
            ("alice".to_string(), "s3:cret".to_string())
        );
    }

    #[test]
    fn missing_or_malformed_credentials_are_anonymous() {
        assert_eq!(parse_credentials(""), (String::new(), String::new()));
        assert_eq!(parse_credentials("bogus"), (String::new(), String::new()));
    }
}
