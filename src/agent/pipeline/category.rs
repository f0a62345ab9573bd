use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use chrono::Weekday;

use crate::config::CategorySchedule;

/// Work classification steering the analyze stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Category {
    Tests,
    Refactoring,
    Docs,
    Security,
    Performance,
    Other(String),
}

/// Fallback order after the primary category.
pub const FALLBACK_ORDER: [Category; 5] = [
    Category::Tests,
    Category::Refactoring,
    Category::Docs,
    Category::Security,
    Category::Performance,
];

impl Category {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Tests => "tests",
            Self::Refactoring => "refactoring",
            Self::Docs => "docs",
            Self::Security => "security",
            Self::Performance => "performance",
            Self::Other(name) => name,
        }
    }

    pub fn guidance(&self) -> &str {
        match self {
            Self::Tests => {
                "Missing unit test coverage first, then improve existing test quality \
                 (better assertions, edge cases, flakiness reduction)"
            }
            Self::Refactoring => {
                "Broad scope: code duplication, complexity reduction, naming improvements, \
                 dead code removal, pattern consistency"
            }
            Self::Docs => {
                "Code-level documentation (comments, Scaladoc) first, then project-level docs \
                 (README, markdown files) if no code gaps found"
            }
            Self::Security => {
                "Active vulnerabilities first (OWASP-style: injection, auth bypass, insecure \
                 defaults, data exposure), then defensive hardening (input validation, secure \
                 error handling, safe logging)"
            }
            Self::Performance => {
                "Identify and address performance bottlenecks: inefficient algorithms, \
                 unnecessary allocations, suboptimal data structures, missing caching \
                 opportunities"
            }
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        Ok(match normalized.as_str() {
            "tests" => Self::Tests,
            "refactoring" => Self::Refactoring,
            "docs" => Self::Docs,
            "security" => Self::Security,
            "performance" => Self::Performance,
            _ => Self::Other(value.trim().to_string()),
        })
    }
}

impl From<&str> for Category {
    fn from(value: &str) -> Self {
        match value.parse() {
            Ok(category) => category,
            Err(never) => match never {},
        }
    }
}

/// Primary first, then the fixed fallback order without repeating it.
pub fn visit_order(primary: &Category) -> Vec<Category> {
    std::iter::once(primary.clone())
        .chain(FALLBACK_ORDER.iter().filter(|c| *c != primary).cloned())
        .collect()
}

/// First category scheduled for `weekday`, if any.
pub fn resolve_category(schedule: &CategorySchedule, weekday: Weekday) -> Option<Category> {
    schedule
        .for_weekday(weekday)
        .iter()
        .find(|c| !c.trim().is_empty())
        .map(|c| Category::from(c.as_str()))
}
