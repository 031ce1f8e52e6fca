//! Shell-style argument tokenizer for `run:` lines
//!
//! Splits a command line into an argument vector without ever invoking a
//! shell. Supports single and double quoting; there are no escape sequences.
//!
//! A quote that appears in the middle of an unquoted argument ends that
//! argument and starts a quoted one, so `foo's bar'` yields `foo` and `s bar`.

use crate::error::{FlowrunError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    None,
    Literal,
    SingleQuoted,
    DoubleQuoted,
}

/// Tokenize a command line into arguments.
///
/// # Errors
///
/// * `FlowrunError::UnterminatedLiteral` - If input ends inside a quoted region
///
/// # Example
///
/// ```
/// use flowrun::tokenizer::tokenize;
///
/// let args = tokenize(r#"ls -la "my dir""#)?;
/// assert_eq!(args, vec!["ls", "-la", "my dir"]);
/// # Ok::<(), flowrun::error::FlowrunError>(())
/// ```
pub fn tokenize(line: &str) -> Result<Vec<String>> {
    let mut args = Vec::new();
    let mut state = State::None;
    let mut start = 0;

    for (i, c) in line.char_indices() {
        match state {
            State::None => match c {
                '\'' => {
                    start = i + 1;
                    state = State::SingleQuoted;
                }
                '"' => {
                    start = i + 1;
                    state = State::DoubleQuoted;
                }
                c if !c.is_whitespace() => {
                    start = i;
                    state = State::Literal;
                }
                _ => {}
            },
            State::Literal => match c {
                '\'' => {
                    args.push(line[start..i].to_string());
                    start = i + 1;
                    state = State::SingleQuoted;
                }
                '"' => {
                    args.push(line[start..i].to_string());
                    start = i + 1;
                    state = State::DoubleQuoted;
                }
                c if c.is_whitespace() => {
                    args.push(line[start..i].to_string());
                    state = State::None;
                }
                _ => {}
            },
            State::SingleQuoted if c == '\'' => {
                args.push(line[start..i].to_string());
                state = State::None;
            }
            State::DoubleQuoted if c == '"' => {
                args.push(line[start..i].to_string());
                state = State::None;
            }
            State::SingleQuoted | State::DoubleQuoted => {}
        }
    }

    match state {
        State::None => Ok(args),
        State::Literal => {
            args.push(line[start..].to_string());
            Ok(args)
        }
        State::SingleQuoted | State::DoubleQuoted => Err(FlowrunError::UnterminatedLiteral),
    }
}
