//! Lightweight `SurrealQL` statement scanner.
//!
//! Splits a query into top-level statements without a full parse so the
//! session can tell which response entries belong to `LIVE` statements.

use std::error::Error;
use std::fmt;

/// Statements that never produce an entry in the response list.
const SILENT_KEYWORDS: [&str; 3] = ["BEGIN", "COMMIT", "CANCEL"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    UnterminatedString { offset: usize },
    UnterminatedComment { offset: usize },
    UnexpectedDelimiter { found: char, offset: usize },
    UnclosedDelimiter { open: char, offset: usize },
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnterminatedString { offset } => {
                write!(f, "unterminated string starting at offset {offset}")
            }
            Self::UnterminatedComment { offset } => {
                write!(f, "unterminated comment starting at offset {offset}")
            }
            Self::UnexpectedDelimiter { found, offset } => {
                write!(f, "unexpected '{found}' at offset {offset}")
            }
            Self::UnclosedDelimiter { open, offset } => {
                write!(f, "'{open}' at offset {offset} is never closed")
            }
        }
    }
}

impl Error for ScanError {}

/// A top-level statement and its leading keyword in upper case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement<'a> {
    pub keyword: String,
    pub text: &'a str,
}

/// Returns the response indexes of the top-level `LIVE` statements.
///
/// # Errors
/// Returns `ScanError` if the query has unterminated literals or unbalanced
/// delimiters.
pub fn live_statement_indexes(query: &str) -> Result<Vec<usize>, ScanError> {
    let indexes = split_statements(query)?
        .iter()
        .filter(|statement| !SILENT_KEYWORDS.contains(&statement.keyword.as_str()))
        .enumerate()
        .filter(|(_, statement)| statement.keyword == "LIVE")
        .map(|(index, _)| index)
        .collect();
    Ok(indexes)
}

/// Splits a query on top-level semicolons, skipping empty statements.
///
/// # Errors
/// Returns `ScanError` if the query has unterminated literals or unbalanced
/// delimiters.
pub fn split_statements(query: &str) -> Result<Vec<Statement<'_>>, ScanError> {
    let mut statements = Vec::new();
    let mut open: Vec<(char, usize)> = Vec::new();
    let mut start: Option<usize> = None;
    let mut chars = query.char_indices().peekable();

    while let Some((offset, ch)) = chars.next() {
        let next = chars.peek().map(|(_, next)| *next);

        match ch {
            '-' if next == Some('-') => skip_line(&mut chars),
            '/' if next == Some('/') => skip_line(&mut chars),
            '#' => skip_line(&mut chars),
            '/' if next == Some('*') => {
                chars.next();
                skip_block_comment(&mut chars, offset)?;
            }
            ';' if open.is_empty() => {
                if let Some(begin) = start.take() {
                    statements.push(statement(&query[begin..offset]));
                }
            }
            _ if ch.is_whitespace() => {}
            _ => {
                start.get_or_insert(offset);
                match ch {
                    '\'' | '"' | '`' => skip_quoted(&mut chars, ch, offset)?,
                    '⟨' => skip_quoted(&mut chars, '⟩', offset)?,
                    '(' | '[' | '{' => open.push((ch, offset)),
                    ')' | ']' | '}' => match open.pop() {
                        Some((opening, _)) if closing_for(opening) == ch => {}
                        _ => return Err(ScanError::UnexpectedDelimiter { found: ch, offset }),
                    },
                    _ => {}
                }
            }
        }
    }

    if let Some((open, offset)) = open.pop() {
        return Err(ScanError::UnclosedDelimiter { open, offset });
    }
    if let Some(begin) = start {
        statements.push(statement(&query[begin..]));
    }
    Ok(statements)
}

type Chars<'a> = std::iter::Peekable<std::str::CharIndices<'a>>;

fn statement(text: &str) -> Statement<'_> {
    let text = text.trim_end();
    let keyword = text
        .chars()
        .take_while(char::is_ascii_alphabetic)
        .collect::<String>()
        .to_ascii_uppercase();
    Statement { keyword, text }
}

const fn closing_for(opening: char) -> char {
    match opening {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

fn skip_line(chars: &mut Chars<'_>) {
    for (_, ch) in chars.by_ref() {
        if ch == '\n' {
            break;
        }
    }
}

fn skip_block_comment(chars: &mut Chars<'_>, offset: usize) -> Result<(), ScanError> {
    while let Some((_, ch)) = chars.next() {
        if ch == '*' && chars.peek().is_some_and(|(_, next)| *next == '/') {
            chars.next();
            return Ok(());
        }
    }
    Err(ScanError::UnterminatedComment { offset })
}

fn skip_quoted(chars: &mut Chars<'_>, terminator: char, offset: usize) -> Result<(), ScanError> {
    while let Some((_, ch)) = chars.next() {
        if ch == '\\' {
            chars.next();
        } else if ch == terminator {
            return Ok(());
        }
    }
    Err(ScanError::UnterminatedString { offset })
}
