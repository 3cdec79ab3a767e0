//! Classification of console lines into local commands and chat text.
//!
//! Only two commands are recognized: `/quit` by exact comparison, and rename
//! by the single letter after the prefix. Everything else that starts with
//! the prefix, including the `/who` command listed in the help text, is
//! ignored.

/// First character of every command line.
pub const COMMAND_PREFIX: char = '/';

/// Exact line that ends the console loop.
pub const QUIT: &str = "/quit";

/// Prefix of the handshake sent right after connecting.
pub const RENAME_PREFIX: &str = "/name ";

const RENAME_LETTER: char = 'n';

/// What a console line asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input<'a> {
    /// Nothing typed.
    Empty,
    Quit,
    /// Change the local display name; the line is still forwarded so the
    /// peer learns the new name.
    Rename { name: &'a str },
    /// A command line nobody handles.
    Unrecognized,
    /// Plain text for the peer.
    Chat(&'a str),
}

impl<'a> Input<'a> {
    /// Classifies one console line, already stripped of its line ending.
    pub fn classify(line: &'a str) -> Self {
        if line.is_empty() {
            return Input::Empty;
        }
        if line == QUIT {
            return Input::Quit;
        }
        match line.strip_prefix(COMMAND_PREFIX) {
            Some(rest) if rest.starts_with(RENAME_LETTER) => Input::Rename {
                name: rename_target(line),
            },
            Some(_) => Input::Unrecognized,
            None => Input::Chat(line),
        }
    }

    /// Whether the typed line goes out to the peer.
    pub fn is_forwarded(&self) -> bool {
        matches!(self, Input::Rename { .. } | Input::Chat(_))
    }
}

/// The text after the first space, verbatim. A rename line without any
/// space names the user after the whole line.
fn rename_target(line: &str) -> &str {
    match line.find(' ') {
        Some(space) => &line[space + 1..],
        None => line,
    }
}

/// Handshake payload announcing `name` to the peer.
pub fn handshake(name: &str) -> String {
    format!("{RENAME_PREFIX}{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quit_is_an_exact_match() {
        assert_eq!(Input::classify("/quit"), Input::Quit);
        assert_eq!(Input::classify("/quit "), Input::Unrecognized);
        assert_eq!(Input::classify("/QUIT"), Input::Unrecognized);
        assert_eq!(Input::classify("quit"), Input::Chat("quit"));
    }

    #[test]
    fn rename_takes_remainder_after_first_space() {
        assert_eq!(Input::classify("/n bob"), Input::Rename { name: "bob" });
        assert_eq!(Input::classify("/name bob"), Input::Rename { name: "bob" });
        assert_eq!(
            Input::classify("/name  two spaces "),
            Input::Rename { name: " two spaces " }
        );
        assert_eq!(Input::classify("/nick a b"), Input::Rename { name: "a b" });
    }

    #[test]
    fn rename_with_empty_remainder_clears_name() {
        assert_eq!(Input::classify("/n "), Input::Rename { name: "" });
    }

    #[test]
    fn rename_without_space_uses_whole_line() {
        assert_eq!(Input::classify("/n"), Input::Rename { name: "/n" });
        assert_eq!(Input::classify("/name"), Input::Rename { name: "/name" });
    }

    #[test]
    fn other_commands_are_ignored() {
        for line in ["/who", "/", "/q", "/help me", "/N bob"] {
            let input = Input::classify(line);
            assert_eq!(input, Input::Unrecognized, "{line}");
            assert!(!input.is_forwarded());
        }
    }

    #[test]
    fn plain_lines_are_chat() {
        assert_eq!(Input::classify("hello"), Input::Chat("hello"));
        assert_eq!(Input::classify(" /n bob"), Input::Chat(" /n bob"));
        assert!(Input::classify("hello").is_forwarded());
        assert!(Input::classify("/n bob").is_forwarded());
    }

    #[test]
    fn empty_line_does_nothing() {
        assert_eq!(Input::classify(""), Input::Empty);
        assert!(!Input::Empty.is_forwarded());
        assert!(!Input::Quit.is_forwarded());
    }

    #[test]
    fn multibyte_first_character_is_safe() {
        assert_eq!(Input::classify("é"), Input::Chat("é"));
        assert_eq!(Input::classify("/ñ"), Input::Unrecognized);
    }

    #[test]
    fn handshake_uses_rename_syntax() {
        assert_eq!(handshake("Unnamed"), "/name Unnamed");
        assert_eq!(handshake(""), "/name ");
        assert_eq!(Input::classify(&handshake("alice")), Input::Rename { name: "alice" });
    }
}
