// src/gcode.rs - Minimal G-code reader for planar moves
//
// Only G0/G1 with X, Y and F words produce targets. Everything else is
// skipped so that files from common slicers stream through unchanged.
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

use crate::motion::TargetPosition;

#[derive(Debug, Error)]
pub enum GCodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: invalid value '{value}' for {letter}")]
    InvalidValue {
        line: usize,
        letter: char,
        value: String,
    },
}

/// Strips `;` line comments and `( )` inline comments.
fn strip_comments(line: &str) -> String {
    let line = line.split(';').next().unwrap_or_default();
    let mut out = String::with_capacity(line.len());
    let mut depth = 0usize;
    for c in line.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

fn is_linear_move(word: &str) -> bool {
    matches!(
        word.to_ascii_uppercase().as_str(),
        "G0" | "G1" | "G00" | "G01"
    )
}

/// Parses one line. Returns `None` for anything that is not a linear move.
pub fn parse_line(line: &str, number: usize) -> Result<Option<TargetPosition>, GCodeError> {
    let line = strip_comments(line);
    let mut words = line
        .split_whitespace()
        .filter(|w| !w.starts_with(['N', 'n']));
    match words.next() {
        Some(word) if is_linear_move(word) => {}
        _ => return Ok(None),
    }

    let mut target = TargetPosition::new();
    for word in words {
        let mut chars = word.chars();
        let Some(letter) = chars.next().map(|c| c.to_ascii_uppercase()) else {
            continue;
        };
        let slot = match letter {
            'X' => &mut target.x,
            'Y' => &mut target.y,
            'F' => &mut target.f,
            _ => {
                tracing::trace!("line {}: ignoring word {}", number, word);
                continue;
            }
        };
        let value = chars.as_str();
        let parsed = value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| GCodeError::InvalidValue {
                line: number,
                letter,
                value: value.to_string(),
            })?;
        *slot = Some(parsed);
    }
    Ok(Some(target))
}

/// Streams targets out of a G-code source line by line.
pub struct GCodeReader<R> {
    lines: Lines<R>,
    line: usize,
}

impl<R> GCodeReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(source: R) -> Self {
        Self {
            lines: source.lines(),
            line: 0,
        }
    }

    /// Next move target, or `None` at the end of the source.
    pub async fn next_target(&mut self) -> Result<Option<TargetPosition>, GCodeError> {
        while let Some(line) = self.lines.next_line().await? {
            self.line += 1;
            if let Some(target) = parse_line(&line, self.line)? {
                if !target.is_empty() {
                    return Ok(Some(target));
                }
            }
        }
        Ok(None)
    }

    /// Lines consumed so far.
    pub fn line(&self) -> usize {
        self.line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_linear_moves() {
        assert_eq!(
            parse_line("G1 X10.5 Y-2 F1200", 1).unwrap(),
            Some(TargetPosition::xy(10.5, -2.0).feed(1200.0))
        );
        assert_eq!(
            parse_line("N12 g0 x3 ; travel", 2).unwrap(),
            Some(TargetPosition::new().x(3.0))
        );
        assert_eq!(
            parse_line("G1 (inline) Y4 Z0.2 E1.0", 3).unwrap(),
            Some(TargetPosition::new().y(4.0))
        );
    }

    #[test]
    fn test_other_lines_are_skipped() {
        assert_eq!(parse_line("M104 S200", 1).unwrap(), None);
        assert_eq!(parse_line("; only a comment", 2).unwrap(), None);
        assert_eq!(parse_line("", 3).unwrap(), None);
        assert_eq!(parse_line("G28 X", 4).unwrap(), None);
    }

    #[test]
    fn test_invalid_value() {
        let err = parse_line("G1 X1..2", 7).unwrap_err();
        assert!(matches!(err, GCodeError::InvalidValue { line: 7, letter: 'X', .. }));
    }

    #[test]
    fn test_non_finite_values_are_invalid() {
        for (line, letter) in [("G1 X1e999 F20", 'X'), ("G1 X1 YNaN", 'Y'), ("G0 Finf", 'F')] {
            let err = parse_line(line, 3).unwrap_err();
            assert!(
                matches!(err, GCodeError::InvalidValue { line: 3, letter: l, .. } if l == letter),
                "{}",
                line
            );
        }
        assert!(parse_line("G1 X-inf", 4).is_err());
    }

    #[tokio::test]
    async fn test_reader_streams_targets() {
        let source: &[u8] = b"G21\nG1 F600\nG1 X1 Y1\nM400\nG0 X0\n";
        let mut reader = GCodeReader::new(source);
        assert_eq!(
            reader.next_target().await.unwrap(),
            Some(TargetPosition::new().feed(600.0))
        );
        assert_eq!(
            reader.next_target().await.unwrap(),
            Some(TargetPosition::xy(1.0, 1.0))
        );
        assert_eq!(
            reader.next_target().await.unwrap(),
            Some(TargetPosition::new().x(0.0))
        );
        assert_eq!(reader.next_target().await.unwrap(), None);
        assert_eq!(reader.line(), 5);
    }
}
