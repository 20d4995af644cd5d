//! SVG path-data parsing.
//!
//! Supports the command subset M/m, L/l, H/h, V/v, C/c, Q/q, Z/z.
//! Curves are flattened to fixed-count polyline segments.

use crate::errors::{PlotError, Result};
use crate::types::{Point, Polyline};

/// Segments per flattened Bézier curve.
const CURVE_SEGMENTS: usize = 10;

/// Parse a path `d` attribute into polylines, one per subpath.
pub fn parse_path_data(d: &str) -> Result<Vec<Polyline>> {
    let mut tokens = Tokenizer::new(d);
    let mut paths: Vec<Polyline> = Vec::new();
    let mut current: Polyline = Vec::new();
    let mut cursor = Point::new(0.0, 0.0);
    let mut subpath_start = Point::new(0.0, 0.0);
    let mut command: Option<char> = None;

    loop {
        match tokens.next_command_or_number()? {
            Token::End => break,
            Token::Command(c) => command = Some(c),
            Token::Number(first) => {
                // A number with no preceding command repeats the last one;
                // after M/m the implicit repeat is L/l.
                let Some(cmd) = command else {
                    return Err(PlotError::parse(format!(
                        "path data starts with a number: {d:?}"
                    )));
                };
                tokens.push_back(first);
                command = Some(match cmd {
                    'M' => 'L',
                    'm' => 'l',
                    other => other,
                });
                let cmd = command.unwrap();
                apply(
                    cmd,
                    &mut tokens,
                    &mut paths,
                    &mut current,
                    &mut cursor,
                    &mut subpath_start,
                )?;
                continue;
            }
        }
        if let Some(cmd) = command {
            if cmd == 'Z' || cmd == 'z' {
                close_subpath(&mut paths, &mut current, &mut cursor, subpath_start);
                continue;
            }
            apply(
                cmd,
                &mut tokens,
                &mut paths,
                &mut current,
                &mut cursor,
                &mut subpath_start,
            )?;
        }
    }

    flush(&mut paths, &mut current);
    Ok(paths)
}

fn apply(
    cmd: char,
    tokens: &mut Tokenizer<'_>,
    paths: &mut Vec<Polyline>,
    current: &mut Polyline,
    cursor: &mut Point,
    subpath_start: &mut Point,
) -> Result<()> {
    let relative = cmd.is_ascii_lowercase();
    match cmd.to_ascii_uppercase() {
        'M' => {
            let (x, y) = (tokens.number()?, tokens.number()?);
            flush(paths, current);
            *cursor = offset(*cursor, x, y, relative);
            *subpath_start = *cursor;
            current.push(*cursor);
        }
        'L' => {
            let (x, y) = (tokens.number()?, tokens.number()?);
            ensure_started(current, *cursor);
            *cursor = offset(*cursor, x, y, relative);
            current.push(*cursor);
        }
        'H' => {
            let x = tokens.number()?;
            ensure_started(current, *cursor);
            cursor.x = if relative { cursor.x + x } else { x };
            current.push(*cursor);
        }
        'V' => {
            let y = tokens.number()?;
            ensure_started(current, *cursor);
            cursor.y = if relative { cursor.y + y } else { y };
            current.push(*cursor);
        }
        'C' => {
            let c1 = point(tokens, *cursor, relative)?;
            let c2 = point(tokens, *cursor, relative)?;
            let end = point(tokens, *cursor, relative)?;
            ensure_started(current, *cursor);
            flatten_cubic(*cursor, c1, c2, end, current);
            *cursor = end;
        }
        'Q' => {
            let c1 = point(tokens, *cursor, relative)?;
            let end = point(tokens, *cursor, relative)?;
            ensure_started(current, *cursor);
            flatten_quadratic(*cursor, c1, end, current);
            *cursor = end;
        }
        other => {
            return Err(PlotError::parse(format!("unsupported path command {other:?}")));
        }
    }
    Ok(())
}

fn close_subpath(
    paths: &mut Vec<Polyline>,
    current: &mut Polyline,
    cursor: &mut Point,
    subpath_start: Point,
) {
    if !current.is_empty() {
        if current.last() != Some(&subpath_start) {
            current.push(subpath_start);
        }
        flush(paths, current);
    }
    *cursor = subpath_start;
}

/// A draw command with no open subpath starts one at the cursor.
fn ensure_started(current: &mut Polyline, cursor: Point) {
    if current.is_empty() {
        current.push(cursor);
    }
}

fn flush(paths: &mut Vec<Polyline>, current: &mut Polyline) {
    if current.len() > 1 {
        paths.push(std::mem::take(current));
    } else {
        current.clear();
    }
}

fn offset(cursor: Point, x: f64, y: f64, relative: bool) -> Point {
    if relative {
        Point::new(cursor.x + x, cursor.y + y)
    } else {
        Point::new(x, y)
    }
}

fn point(tokens: &mut Tokenizer<'_>, cursor: Point, relative: bool) -> Result<Point> {
    let (x, y) = (tokens.number()?, tokens.number()?);
    Ok(offset(cursor, x, y, relative))
}

/// Evaluate the cubic at `CURVE_SEGMENTS` parameter steps past t=0.
fn flatten_cubic(start: Point, c1: Point, c2: Point, end: Point, out: &mut Polyline) {
    for i in 1..=CURVE_SEGMENTS {
        let t = i as f64 / CURVE_SEGMENTS as f64;
        let u = 1.0 - t;
        let x = u.powi(3) * start.x
            + 3.0 * u.powi(2) * t * c1.x
            + 3.0 * u * t.powi(2) * c2.x
            + t.powi(3) * end.x;
        let y = u.powi(3) * start.y
            + 3.0 * u.powi(2) * t * c1.y
            + 3.0 * u * t.powi(2) * c2.y
            + t.powi(3) * end.y;
        out.push(Point::new(x, y));
    }
}

fn flatten_quadratic(start: Point, c1: Point, end: Point, out: &mut Polyline) {
    for i in 1..=CURVE_SEGMENTS {
        let t = i as f64 / CURVE_SEGMENTS as f64;
        let u = 1.0 - t;
        let x = u.powi(2) * start.x + 2.0 * u * t * c1.x + t.powi(2) * end.x;
        let y = u.powi(2) * start.y + 2.0 * u * t * c1.y + t.powi(2) * end.y;
        out.push(Point::new(x, y));
    }
}

enum Token {
    Command(char),
    Number(f64),
    End,
}

/// Splits path data into commands and numbers, tolerating comma and
/// whitespace separators and sign-glued numbers (`10-5` is two tokens).
struct Tokenizer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    pushed: Option<f64>,
}

impl<'a> Tokenizer<'a> {
    fn new(d: &'a str) -> Self {
        Self {
            chars: d.chars().peekable(),
            pushed: None,
        }
    }

    fn push_back(&mut self, value: f64) {
        self.pushed = Some(value);
    }

    fn next_command_or_number(&mut self) -> Result<Token> {
        if let Some(value) = self.pushed.take() {
            return Ok(Token::Number(value));
        }
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() || c == ',' {
                self.chars.next();
            } else {
                break;
            }
        }
        let Some(&c) = self.chars.peek() else {
            return Ok(Token::End);
        };
        if c.is_ascii_alphabetic() {
            self.chars.next();
            Ok(Token::Command(c))
        } else {
            self.read_number().map(Token::Number)
        }
    }

    fn number(&mut self) -> Result<f64> {
        match self.next_command_or_number()? {
            Token::Number(n) => Ok(n),
            Token::Command(c) => Err(PlotError::parse(format!(
                "expected a coordinate, found command {c:?}"
            ))),
            Token::End => Err(PlotError::parse("unexpected end of path data")),
        }
    }

    fn read_number(&mut self) -> Result<f64> {
        let mut text = String::new();
        if matches!(self.chars.peek(), Some('+') | Some('-')) {
            text.push(self.chars.next().unwrap());
        }
        let mut seen_dot = false;
        let mut seen_exp = false;
        while let Some(&c) = self.chars.peek() {
            match c {
                '0'..='9' => {
                    text.push(c);
                    self.chars.next();
                }
                '.' if !seen_dot && !seen_exp => {
                    seen_dot = true;
                    text.push(c);
                    self.chars.next();
                }
                'e' | 'E' if !seen_exp => {
                    seen_exp = true;
                    text.push(c);
                    self.chars.next();
                    if matches!(self.chars.peek(), Some('+') | Some('-')) {
                        text.push(self.chars.next().unwrap());
                    }
                }
                _ => break,
            }
        }
        text.parse::<f64>()
            .map_err(|_| PlotError::parse(format!("bad number {text:?} in path data")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_moves_and_lines() {
        let paths = parse_path_data("M 0 0 L 10 0 L 10 10").unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].len(), 3);
        assert_eq!(paths[0][2], Point::new(10.0, 10.0));
    }

    #[test]
    fn relative_commands_accumulate() {
        let paths = parse_path_data("m 5 5 l 10 0 l 0 10").unwrap();
        assert_eq!(paths[0][0], Point::new(5.0, 5.0));
        assert_eq!(paths[0][1], Point::new(15.0, 5.0));
        assert_eq!(paths[0][2], Point::new(15.0, 15.0));
    }

    #[test]
    fn horizontal_and_vertical_shortcuts() {
        let paths = parse_path_data("M0 0 H20 V10 h-5 v-5").unwrap();
        let p = &paths[0];
        assert_eq!(p[1], Point::new(20.0, 0.0));
        assert_eq!(p[2], Point::new(20.0, 10.0));
        assert_eq!(p[3], Point::new(15.0, 10.0));
        assert_eq!(p[4], Point::new(15.0, 5.0));
    }

    #[test]
    fn close_returns_to_subpath_start() {
        let paths = parse_path_data("M0 0 L10 0 L10 10 Z").unwrap();
        assert_eq!(paths[0].first(), paths[0].last());
        assert_eq!(paths[0].len(), 4);
    }

    #[test]
    fn cubic_flattens_to_fixed_segments() {
        let paths = parse_path_data("M0 0 C 0 10, 10 10, 10 0").unwrap();
        // Start point plus one point per segment.
        assert_eq!(paths[0].len(), 1 + 10);
        assert_eq!(*paths[0].last().unwrap(), Point::new(10.0, 0.0));
    }

    #[test]
    fn quadratic_flattens_to_fixed_segments() {
        let paths = parse_path_data("M0 0 Q 5 10, 10 0").unwrap();
        assert_eq!(paths[0].len(), 1 + 10);
        let mid = paths[0][5];
        assert!((mid.x - 5.0).abs() < 1e-9);
        assert!((mid.y - 5.0).abs() < 1e-9);
    }

    #[test]
    fn implicit_lineto_after_moveto() {
        let paths = parse_path_data("M0 0 10 0 10 10").unwrap();
        assert_eq!(paths[0].len(), 3);
    }

    #[test]
    fn multiple_subpaths() {
        let paths = parse_path_data("M0 0 L1 0 M5 5 L6 5").unwrap();
        assert_eq!(paths.len(), 2);
    }

    #[test]
    fn comma_separators_and_negative_glue() {
        let paths = parse_path_data("M0,0L10-5").unwrap();
        assert_eq!(paths[0][1], Point::new(10.0, -5.0));
    }

    #[test]
    fn unsupported_command_is_an_error() {
        assert!(parse_path_data("M0 0 A 5 5 0 0 1 10 10").is_err());
    }

    #[test]
    fn degenerate_single_point_subpath_is_dropped() {
        let paths = parse_path_data("M5 5 M0 0 L1 1").unwrap();
        assert_eq!(paths.len(), 1);
    }
}
