//! Name validation against npm's user, scope, and organization naming rules.
//!
//! One rule set serves all three namespaces. Validation is pure and cheap
//! enough to run on every keystroke; it never touches the network.

use std::fmt;

use serde::Serialize;

/// Minimum length of a name after trimming.
pub const MIN_NAME_LENGTH: usize = 1;

/// Maximum length of a name after trimming.
pub const MAX_NAME_LENGTH: usize = 214;

/// Names npm keeps for itself.
const RESERVED_NAMES: &[&str] = &["npm", "node", "package", "module"];

/// A single rule a candidate name breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    /// Nothing left after trimming.
    Empty,
    /// Shorter than [`MIN_NAME_LENGTH`].
    TooShort,
    /// Longer than [`MAX_NAME_LENGTH`].
    TooLong,
    /// First character is not a lowercase ASCII letter.
    InvalidStart,
    /// Last character is not a lowercase ASCII letter or digit.
    InvalidEnd,
    /// Uppercase letters or anything outside `a-z`, `0-9`, `-`, `_`.
    InvalidCharacters,
    /// Two hyphens in a row.
    ConsecutiveSeparators,
    /// One of npm's reserved words.
    ReservedWord,
}

impl ViolationKind {
    /// The user-facing explanation of this rule.
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::Empty => "Name cannot be empty",
            Self::TooShort => "Name must be at least 1 character long",
            Self::TooLong => "Name must be at most 214 characters long",
            Self::InvalidStart => "Name must start with a lowercase letter",
            Self::InvalidEnd => "Name must end with a lowercase letter or number",
            Self::InvalidCharacters => {
                "Name can only contain lowercase letters, numbers, hyphens, and underscores"
            }
            Self::ConsecutiveSeparators => "Name cannot contain consecutive hyphens",
            Self::ReservedWord => "Name is reserved by npm",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// A broken rule paired with its message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Which rule was broken.
    pub kind: ViolationKind,
    /// Message suitable for showing next to the input.
    pub message: String,
}

impl From<ViolationKind> for Violation {
    fn from(kind: ViolationKind) -> Self {
        Self {
            kind,
            message: kind.message().to_owned(),
        }
    }
}

/// The result of validating one candidate name.
///
/// Violations are listed in rule-evaluation order and several may apply at
/// once, so a UI can show every correctable problem together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    /// True iff `violations` is empty.
    pub is_valid: bool,
    /// Every rule the name breaks.
    pub violations: Vec<Violation>,
}

impl ValidationOutcome {
    fn from_kinds(kinds: Vec<ViolationKind>) -> Self {
        Self {
            is_valid: kinds.is_empty(),
            violations: kinds.into_iter().map(Violation::from).collect(),
        }
    }

    /// Whether the outcome includes the given violation.
    #[must_use]
    pub fn has(&self, kind: ViolationKind) -> bool {
        self.violations.iter().any(|v| v.kind == kind)
    }

    /// The violation kinds, in order.
    pub fn kinds(&self) -> impl Iterator<Item = ViolationKind> + '_ {
        self.violations.iter().map(|v| v.kind)
    }
}

fn is_name_char(ch: char) -> bool {
    ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_'
}

fn is_name_end(ch: char) -> bool {
    ch.is_ascii_lowercase() || ch.is_ascii_digit()
}

/// Validate a candidate name.
///
/// The input is trimmed first. Rules are evaluated in a fixed order and all
/// applicable violations are collected, except that an empty name reports
/// [`ViolationKind::Empty`] and [`ViolationKind::TooShort`] and stops there.
///
/// ```
/// use npm_avail::validate::{validate, ViolationKind};
///
/// assert!(validate("my-org").is_valid);
///
/// let outcome = validate("My--Org");
/// assert!(outcome.has(ViolationKind::ConsecutiveSeparators));
/// assert!(outcome.has(ViolationKind::InvalidStart));
/// assert!(outcome.has(ViolationKind::InvalidCharacters));
/// ```
#[must_use]
pub fn validate(name: &str) -> ValidationOutcome {
    let name = name.trim();

    if name.is_empty() {
        return ValidationOutcome::from_kinds(vec![
            ViolationKind::Empty,
            ViolationKind::TooShort,
        ]);
    }

    let mut kinds = Vec::new();

    let len = name.chars().count();
    if len < MIN_NAME_LENGTH {
        kinds.push(ViolationKind::TooShort);
    }
    if len > MAX_NAME_LENGTH {
        kinds.push(ViolationKind::TooLong);
    }

    if name.contains("--") {
        kinds.push(ViolationKind::ConsecutiveSeparators);
    }

    // Pattern: ^[a-z][a-z0-9_-]*[a-z0-9]$, with a lone lowercase letter accepted.
    if !name.starts_with(|ch: char| ch.is_ascii_lowercase()) {
        kinds.push(ViolationKind::InvalidStart);
    }
    if !name.ends_with(is_name_end) {
        kinds.push(ViolationKind::InvalidEnd);
    }
    if !name.chars().all(is_name_char) {
        kinds.push(ViolationKind::InvalidCharacters);
    }

    let lowered = name.to_lowercase();
    if RESERVED_NAMES.contains(&lowered.as_str()) {
        kinds.push(ViolationKind::ReservedWord);
    }

    ValidationOutcome::from_kinds(kinds)
}
