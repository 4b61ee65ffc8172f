//! Test fixtures for pipeline testing.

use thiserror::Error;

/// A small input set with distinct lengths and a repeated length.
pub const NAMES: [&str; 5] = ["alice", "bob", "charlie", "david", "erin"];

/// An error injected into a caller function to exercise failure paths.
///
/// The payload names the stage it was injected into, so tests can tell which
/// failure won.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("injected failure: {0}")]
pub struct InjectedError(pub &'static str);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_injected_error_display() {
        assert_eq!(InjectedError("map").to_string(), "injected failure: map");
    }

    #[test]
    fn test_names_lengths() {
        let lengths: Vec<usize> = NAMES.iter().map(|name| name.len()).collect();
        assert_eq!(lengths, vec![5, 3, 7, 5, 4]);
    }
}
