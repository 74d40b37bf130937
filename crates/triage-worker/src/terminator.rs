// End-of-turn detection for the worker's REPL output.

use triage_config::SessionPolicy;

/// Decides whether a stdout line completes the worker's response.
pub trait Terminator: Send {
    fn is_terminal(&self, line: &str) -> bool;
}

impl<F> Terminator for F
where
    F: Fn(&str) -> bool + Send,
{
    fn is_terminal(&self, line: &str) -> bool {
        self(line)
    }
}

/// A line carrying the end-of-turn marker that is not an echoed prompt.
#[derive(Debug, Clone)]
pub struct EndOfTurn {
    marker: String,
    echo_prefix: String,
}

impl EndOfTurn {
    pub fn new(marker: impl Into<String>, echo_prefix: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            echo_prefix: echo_prefix.into(),
        }
    }

    pub fn from_policy(policy: &SessionPolicy) -> Self {
        Self::new(&policy.end_of_turn_marker, &policy.echo_prefix)
    }

    pub fn is_echo(&self, line: &str) -> bool {
        !self.echo_prefix.is_empty() && line.trim_start().starts_with(&self.echo_prefix)
    }

    /// Classification text: the terminal line without the marker.
    pub fn strip(&self, line: &str) -> String {
        line.replace(&self.marker, "").trim().to_string()
    }
}

impl Terminator for EndOfTurn {
    fn is_terminal(&self, line: &str) -> bool {
        line.contains(&self.marker) && !self.is_echo(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_terminator() -> EndOfTurn {
        EndOfTurn::new("</s>", ">>")
    }

    #[test]
    fn test_marker_line_is_terminal() {
        let t = default_terminator();
        assert!(t.is_terminal("{50, 2}: Minor cut</s>"));
        assert_eq!(t.strip("{50, 2}: Minor cut</s>"), "{50, 2}: Minor cut");
    }

    #[test]
    fn test_echo_with_marker_is_not_terminal() {
        let t = default_terminator();
        assert!(!t.is_terminal(">> describe this</s>"));
        assert!(!t.is_terminal("   >> indented echo </s>"));
    }

    #[test]
    fn test_plain_lines_are_not_terminal() {
        let t = default_terminator();
        assert!(!t.is_terminal(">> foo.jpg"));
        assert!(!t.is_terminal("Loading model weights..."));
        assert!(!t.is_terminal("classification: Minor cut"));
    }

    #[test]
    fn test_empty_echo_prefix_filters_nothing() {
        let t = EndOfTurn::new("<|end|>", "");
        assert!(t.is_terminal(">> answer<|end|>"));
    }

    #[test]
    fn test_closure_terminator() {
        let t = |line: &str| line.ends_with("DONE");
        assert!(t.is_terminal("all DONE"));
        assert!(!t.is_terminal("DONE later"));
    }
}
