// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// A named piece of contextual data propagated alongside a trace.
///
/// The name is trimmed and lowercased on construction, and equality, ordering
/// and hashing all use that normalized form. The name itself is only read for
/// logging and external encoding.
///
/// Clones are cheap: the normalized name is shared, so a field can be stored
/// in many state arrays without reallocating.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BaggageField {
    name: Arc<str>,
}

impl BaggageField {
    /// Creates a field from its name.
    ///
    /// # Errors
    ///
    /// Fails if the name is empty after trimming whitespace.
    pub fn new(name: &str) -> anyhow::Result<Self> {
        let trimmed = name.trim();
        anyhow::ensure!(!trimmed.is_empty(), "baggage field name is empty");
        Ok(Self {
            name: Arc::from(trimmed.to_lowercase()),
        })
    }

    /// The normalized (trimmed, lowercased) field name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Debug for BaggageField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaggageField")
            .field("name", &self.name)
            .finish()
    }
}

impl Display for BaggageField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_name() {
        let field = BaggageField::new("  User-Id ").unwrap();
        assert_eq!(field.name(), "user-id");
        assert_eq!(field.to_string(), "user-id");
    }

    #[test]
    fn equality_is_by_normalized_name() {
        let lower = BaggageField::new("country-code").unwrap();
        let upper = BaggageField::new("COUNTRY-CODE").unwrap();
        assert_eq!(lower, upper);
        assert_ne!(lower, BaggageField::new("user-id").unwrap());
    }

    #[test]
    fn rejects_empty_names() {
        assert!(BaggageField::new("").is_err());
        assert!(BaggageField::new("   ").is_err());
    }
}
