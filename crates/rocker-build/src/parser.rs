//! Containerfile parsing using `nom`.
//!
//! One instruction per logical line. A trailing `\` joins the next physical
//! line. Blank lines and lines starting with `#` are ignored. Keywords are
//! case-insensitive.
//!
//! ```text
//! FROM node:alpine
//! COPY index.js /app/index.js
//! ENTRYPOINT ["/usr/local/bin/node", "/app/index.js"]
//! ```

use std::path::{Path, PathBuf};

use nom::{
    IResult, Parser,
    branch::alt,
    character::complete::{alpha1, char, multispace0, space1},
    combinator::{all_consuming, eof},
    multi::separated_list0,
    sequence::{delimited, pair, terminated},
};
use rocker_common::error::{Result, RockerError};
use rocker_common::types::ImageRef;

use crate::instruction::Instruction;

/// Reads and parses an instruction file.
///
/// # Errors
///
/// Returns `RockerError::Io` if the file cannot be read, or
/// `RockerError::Parse` for the first malformed line.
pub fn parse_file(path: &Path) -> Result<Vec<Instruction>> {
    let content = std::fs::read_to_string(path).map_err(|e| RockerError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let instructions = parse_instructions(&content)?;
    tracing::info!(path = %path.display(), count = instructions.len(), "instructions parsed");
    Ok(instructions)
}

/// Parses instruction text.
///
/// # Errors
///
/// Returns `RockerError::Parse` with the one-based line number of the first
/// malformed instruction.
pub fn parse_instructions(input: &str) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    for (line, text) in logical_lines(input) {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let instruction =
            parse_line(trimmed).map_err(|message| RockerError::Parse { line, message })?;
        instructions.push(instruction);
    }
    Ok(instructions)
}

/// Joins continuation lines, keeping the number of each logical line's first line.
fn logical_lines(input: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (index, raw) in input.lines().enumerate() {
        if pending.is_none() && raw.trim_start().starts_with('#') {
            continue;
        }
        let (start, mut text) = pending.take().unwrap_or((index + 1, String::new()));
        if let Some(body) = raw.trim_end().strip_suffix('\\') {
            text.push_str(body);
            text.push(' ');
            pending = Some((start, text));
        } else {
            text.push_str(raw);
            lines.push((start, text));
        }
    }
    lines.extend(pending);
    lines
}

fn parse_line(line: &str) -> std::result::Result<Instruction, String> {
    let (args, word) =
        keyword(line).map_err(|_| format!("expected an instruction keyword, found {line:?}"))?;
    let args = args.trim();
    match word.to_ascii_uppercase().as_str() {
        "FROM" => from_args(args),
        "COPY" => copy_args(args),
        "ENTRYPOINT" => entrypoint_args(args),
        other => Err(format!("unknown instruction {other}")),
    }
}

fn from_args(args: &str) -> std::result::Result<Instruction, String> {
    match args.split_whitespace().collect::<Vec<_>>().as_slice() {
        [reference] => ImageRef::parse(reference)
            .map(Instruction::From)
            .map_err(|e| e.to_string()),
        _ => Err(format!("FROM takes exactly one image reference, got {args:?}")),
    }
}

fn copy_args(args: &str) -> std::result::Result<Instruction, String> {
    let paths = if args.starts_with('[') {
        json_array(args).map_err(|_| format!("malformed COPY array: {args}"))?
    } else {
        args.split_whitespace().map(str::to_string).collect()
    };
    match paths.as_slice() {
        [source, destination] => Ok(Instruction::Copy {
            source: PathBuf::from(source),
            destination: PathBuf::from(destination),
        }),
        _ => Err(format!(
            "COPY takes a source and a destination, got {} argument(s)",
            paths.len()
        )),
    }
}

fn entrypoint_args(args: &str) -> std::result::Result<Instruction, String> {
    let argv = if args.starts_with('[') {
        json_array(args).map_err(|_| format!("malformed exec-form ENTRYPOINT: {args}"))?
    } else {
        args.split_whitespace().map(str::to_string).collect()
    };
    if argv.is_empty() {
        return Err("ENTRYPOINT requires a command".into());
    }
    Ok(Instruction::Entrypoint(argv))
}

/// Parses the keyword and the whitespace after it.
fn keyword(input: &str) -> IResult<&str, &str> {
    terminated(alpha1, alt((space1, eof))).parse(input)
}

/// Parses a complete `["a", "b"]` list and nothing after it.
fn json_array(input: &str) -> std::result::Result<Vec<String>, nom::Err<nom::error::Error<&str>>> {
    let (_, items) = all_consuming(terminated(string_list, multispace0)).parse(input)?;
    Ok(items)
}

fn string_list(input: &str) -> IResult<&str, Vec<String>> {
    delimited(
        pair(char('['), multispace0),
        separated_list0(delimited(multispace0, char(','), multispace0), string_literal),
        pair(multispace0, char(']')),
    )
    .parse(input)
}

/// Parses a double-quoted string literal with basic escape support.
fn string_literal(input: &str) -> IResult<&str, String> {
    let (input, _) = char('"').parse(input)?;
    let mut result = String::new();
    let mut chars = input.char_indices();
    loop {
        match chars.next() {
            Some((idx, '"')) => return Ok((&input[idx + 1..], result)),
            Some((_, '\\')) => match chars.next() {
                Some((_, 'n')) => result.push('\n'),
                Some((_, 't')) => result.push('\t'),
                Some((_, '\\')) => result.push('\\'),
                Some((_, '"')) => result.push('"'),
                Some((_, c)) => {
                    result.push('\\');
                    result.push(c);
                }
                None => break,
            },
            Some((_, c)) => result.push(c),
            None => break,
        }
    }
    Err(nom::Err::Failure(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Char,
    )))
}
