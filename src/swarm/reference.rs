//! Image reference parsing
//!
//! Implements the distribution reference grammar:
//! `[domain[:port]/]path[:tag][@digest]`.

use regex::Regex;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

/// Maximum length of the repository name (domain + path)
pub const NAME_TOTAL_LENGTH_MAX: usize = 255;

const ALPHA_NUMERIC: &str = r"[a-z0-9]+";
const SEPARATOR: &str = r"(?:[._]|__|[-]+)";
const DOMAIN_COMPONENT: &str = r"(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])";
const TAG: &str = r"[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}";
const DIGEST: &str = r"[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*[:][[:xdigit:]]{32,}";

fn name_component() -> String {
    format!("{a}(?:{s}{a})*", a = ALPHA_NUMERIC, s = SEPARATOR)
}

fn domain() -> String {
    format!(r"{d}(?:\.{d})*(?::[0-9]+)?", d = DOMAIN_COMPONENT)
}

static REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    let component = name_component();
    Regex::new(&format!(
        r"^((?:{domain}/)?{c}(?:/{c})*)(?::({tag}))?(?:@({digest}))?$",
        domain = domain(),
        c = component,
        tag = TAG,
        digest = DIGEST,
    ))
    .unwrap()
});

/// Reasons a reference fails to parse
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("repository name must have at least one component")]
    NameEmpty,

    #[error("invalid reference format")]
    InvalidFormat,

    #[error("invalid reference format: repository name must be lowercase")]
    NameContainsUppercase,

    #[error("repository name must have at most 255 characters")]
    NameTooLong,
}

/// A parsed image reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    domain: Option<String>,
    path: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl Reference {
    /// Parse a reference string
    pub fn parse(input: &str) -> std::result::Result<Self, ReferenceError> {
        if input.is_empty() {
            return Err(ReferenceError::NameEmpty);
        }

        let Some(caps) = REFERENCE_RE.captures(input) else {
            if REFERENCE_RE.is_match(&input.to_lowercase()) {
                return Err(ReferenceError::NameContainsUppercase);
            }
            return Err(ReferenceError::InvalidFormat);
        };

        let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        if name.len() > NAME_TOTAL_LENGTH_MAX {
            return Err(ReferenceError::NameTooLong);
        }

        let (domain, path) = split_domain(name);

        Ok(Self {
            domain,
            path,
            tag: caps.get(2).map(|m| m.as_str().to_string()),
            digest: caps.get(3).map(|m| m.as_str().to_string()),
        })
    }

    /// Repository name including the domain
    pub fn name(&self) -> String {
        match &self.domain {
            Some(domain) => format!("{}/{}", domain, self.path),
            None => self.path.clone(),
        }
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }
}

impl FromStr for Reference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Reference::parse(s)
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

/// Split the leading domain off a repository name
///
/// The first component is a domain only when it looks like a hostname
/// (contains a dot or port, or is `localhost`).
fn split_domain(name: &str) -> (Option<String>, String) {
    match name.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (Some(first.to_string()), rest.to_string())
        }
        _ => (None, name.to_string()),
    }
}
