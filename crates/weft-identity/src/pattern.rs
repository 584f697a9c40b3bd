//! Anchored glob patterns scoping an identity to a resource subtree.

use globset::{Glob, GlobMatcher};

use crate::error::{IdentityError, IdentityResult};

/// A glob-style resource pattern, anchored at the start of the resource.
///
/// `metrics/*` matches `metrics/cpu` but not `all/metrics/cpu`. A binding
/// without a pattern is unscoped and matches every resource.
#[derive(Debug, Clone)]
pub struct ResourcePattern {
    raw: String,
    matcher: GlobMatcher,
}

impl ResourcePattern {
    /// Compile a pattern.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidPattern`] for glob syntax errors.
    pub fn new(pattern: impl Into<String>) -> IdentityResult<Self> {
        let raw = pattern.into();
        let matcher = Glob::new(&raw)
            .map_err(|e| IdentityError::InvalidPattern {
                pattern: raw.clone(),
                reason: e.to_string(),
            })?
            .compile_matcher();
        Ok(Self { raw, matcher })
    }

    /// Whether `resource` is inside the scoped subtree. Globs are anchored:
    /// the whole resource must match.
    #[must_use]
    pub fn matches(&self, resource: &str) -> bool {
        self.matcher.is_match(resource)
    }

    /// The pattern source text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl PartialEq for ResourcePattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for ResourcePattern {}

impl std::fmt::Display for ResourcePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}
