use anyhow::{Context, Result};
use lazy_static::lazy_static;
use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_while1},
    character::complete::{alpha0, char, i32 as integer, space1},
    combinator::{all_consuming, map, map_opt, opt, rest, verify},
    multi::many1,
    number::complete::double,
    sequence::{pair, preceded, separated_pair},
    IResult,
};
use regex::Regex;
use std::fs;

use crate::error::ScriptError;
use crate::geometry::{GridPosition, Rotation};

lazy_static! {
    static ref LABEL_PATTERN: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();

    static ref DEFINITION_PATTERN: Regex = Regex::new(r"^[A-Za-z0-9_\-]+$").unwrap();

    static ref PIN_PATTERN: Regex = Regex::new(
        r"^([A-Za-z_][A-Za-z0-9_]*)\.([A-Za-z0-9_+\-]+)$"
    ).unwrap();
}

/// `LABEL.PIN`, where PIN is a pin name or a pin index
#[derive(Debug, Clone, PartialEq)]
pub struct PinSpec {
    pub label: String,
    pub pin: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptCommand {
    Title(String),
    Place {
        label: String,
        definition: String,
        position: GridPosition,
        rotation: Rotation,
        value: Option<f64>,
        fixed: bool,
    },
    Route {
        start: PinSpec,
        end: PinSpec,
        vias: Vec<GridPosition>,
    },
    Tap {
        pin: PinSpec,
        net: String,
        junction: GridPosition,
        vias: Vec<GridPosition>,
    },
    Remove { label: String },
    Move {
        label: String,
        position: GridPosition,
        rotation: Option<Rotation>,
    },
    Value { label: String, value: Option<f64> },
    DeleteNet { net: String },
    Probe { id: String, target: String },
    Undo,
    Redo,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptLine {
    pub line: usize,
    pub command: ScriptCommand,
}

pub fn parse_file(filename: &str) -> Result<Vec<ScriptLine>> {
    let content = fs::read_to_string(filename)
        .with_context(|| format!("Failed to read board script '{}'", filename))?;
    parse_script(&content).with_context(|| format!("Invalid board script '{}'", filename))
}

/// Parse a whole script. Blank lines and `#`/`*` comments are skipped.
pub fn parse_script(content: &str) -> Result<Vec<ScriptLine>, ScriptError> {
    let mut lines = Vec::new();
    for (index, raw) in content.lines().enumerate() {
        if let Some(line) = parse_line(index + 1, raw)? {
            lines.push(line);
        }
    }
    Ok(lines)
}

pub fn parse_line(line: usize, raw: &str) -> Result<Option<ScriptLine>, ScriptError> {
    let text = strip_comment(raw).trim();
    if text.is_empty() {
        return Ok(None);
    }

    match all_consuming(command)(text) {
        Ok((_, command)) => Ok(Some(ScriptLine { line, command })),
        Err(_) => Err(ScriptError::Parse {
            line,
            message: format!("cannot parse '{}'", text),
        }),
    }
}

/// Parse a number with an optional SPICE scale suffix, e.g. `4.7k`, `1meg`
pub fn parse_value(text: &str) -> Result<f64, ScriptError> {
    all_consuming(value_literal)(text.trim())
        .map(|(_, value)| value)
        .map_err(|_| ScriptError::InvalidValue(text.to_string()))
}

pub fn is_valid_label(text: &str) -> bool {
    LABEL_PATTERN.is_match(text)
}

fn strip_comment(raw: &str) -> &str {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('*') || trimmed.starts_with('#') {
        return "";
    }
    match trimmed.find('#') {
        Some(index) => &trimmed[..index],
        None => trimmed,
    }
}

fn unit_multiplier(unit: &str) -> Option<f64> {
    let multiplier = match unit.to_lowercase().as_str() {
        "f" => 1e-15,
        "p" => 1e-12,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "meg" => 1e6,
        "g" => 1e9,
        "t" => 1e12,
        "v" | "a" | "" => 1.0,
        _ => return None,
    };
    Some(multiplier)
}

// Parser functions using nom

fn command(input: &str) -> IResult<&str, ScriptCommand> {
    alt((
        title,
        place,
        route,
        tap,
        remove,
        move_component,
        set_value,
        delete_net,
        probe,
        map(tag_no_case("undo"), |_| ScriptCommand::Undo),
        map(tag_no_case("redo"), |_| ScriptCommand::Redo),
    ))(input)
}

fn token(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace())(input)
}

fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    preceded(space1, tag_no_case(word))
}

fn argument<'a, O>(parser: impl FnMut(&'a str) -> IResult<&'a str, O>) -> impl FnMut(&'a str) -> IResult<&'a str, O> {
    preceded(space1, parser)
}

fn label(input: &str) -> IResult<&str, String> {
    map(verify(token, |t: &str| LABEL_PATTERN.is_match(t)), str::to_string)(input)
}

fn definition_id(input: &str) -> IResult<&str, String> {
    map(verify(token, |t: &str| DEFINITION_PATTERN.is_match(t)), str::to_string)(input)
}

fn pin_spec(input: &str) -> IResult<&str, PinSpec> {
    map_opt(token, |t: &str| {
        PIN_PATTERN.captures(t).map(|captures| PinSpec {
            label: captures[1].to_string(),
            pin: captures[2].to_string(),
        })
    })(input)
}

fn position(input: &str) -> IResult<&str, GridPosition> {
    map(separated_pair(integer, char(','), integer), |(x, y)| GridPosition::new(x, y))(input)
}

fn rotation(input: &str) -> IResult<&str, Rotation> {
    map_opt(integer, Rotation::from_degrees)(input)
}

fn value_literal(input: &str) -> IResult<&str, f64> {
    map_opt(pair(double, alpha0), |(number, unit): (f64, &str)| {
        unit_multiplier(unit).map(|multiplier| number * multiplier)
    })(input)
}

fn vias(input: &str) -> IResult<&str, Vec<GridPosition>> {
    map(opt(preceded(keyword("via"), many1(argument(position)))), |v| v.unwrap_or_default())(input)
}

fn title(input: &str) -> IResult<&str, ScriptCommand> {
    map(preceded(tag_no_case("title"), argument(rest)), |t: &str| {
        ScriptCommand::Title(t.trim().to_string())
    })(input)
}

fn place(input: &str) -> IResult<&str, ScriptCommand> {
    let (input, _) = tag_no_case("place")(input)?;
    let (input, label) = argument(label)(input)?;
    let (input, definition) = argument(definition_id)(input)?;
    let (input, position) = preceded(keyword("at"), argument(position))(input)?;
    let (input, rotation) = opt(preceded(keyword("rot"), argument(rotation)))(input)?;
    let (input, value) = opt(preceded(keyword("value"), argument(value_literal)))(input)?;
    let (input, fixed) = opt(keyword("fixed"))(input)?;

    Ok((
        input,
        ScriptCommand::Place {
            label,
            definition,
            position,
            rotation: rotation.unwrap_or_default(),
            value,
            fixed: fixed.is_some(),
        },
    ))
}

fn route(input: &str) -> IResult<&str, ScriptCommand> {
    let (input, _) = tag_no_case("route")(input)?;
    let (input, start) = argument(pin_spec)(input)?;
    let (input, end) = argument(pin_spec)(input)?;
    let (input, vias) = vias(input)?;
    Ok((input, ScriptCommand::Route { start, end, vias }))
}

fn tap(input: &str) -> IResult<&str, ScriptCommand> {
    let (input, _) = tag_no_case("tap")(input)?;
    let (input, pin) = argument(pin_spec)(input)?;
    let (input, net) = argument(token)(input)?;
    let (input, junction) = preceded(keyword("at"), argument(position))(input)?;
    let (input, vias) = vias(input)?;
    Ok((
        input,
        ScriptCommand::Tap {
            pin,
            net: net.to_string(),
            junction,
            vias,
        },
    ))
}

fn remove(input: &str) -> IResult<&str, ScriptCommand> {
    map(preceded(tag_no_case("remove"), argument(label)), |label| ScriptCommand::Remove { label })(input)
}

fn move_component(input: &str) -> IResult<&str, ScriptCommand> {
    let (input, _) = tag_no_case("move")(input)?;
    let (input, label) = argument(label)(input)?;
    let (input, position) = preceded(keyword("to"), argument(position))(input)?;
    let (input, rotation) = opt(preceded(keyword("rot"), argument(rotation)))(input)?;
    Ok((input, ScriptCommand::Move { label, position, rotation }))
}

fn set_value(input: &str) -> IResult<&str, ScriptCommand> {
    let (input, _) = tag_no_case("value")(input)?;
    let (input, label) = argument(label)(input)?;
    let (input, value) = argument(alt((
        map(tag_no_case("none"), |_| None),
        map(value_literal, Some),
    )))(input)?;
    Ok((input, ScriptCommand::Value { label, value }))
}

fn delete_net(input: &str) -> IResult<&str, ScriptCommand> {
    map(preceded(tag_no_case("delete-net"), argument(token)), |net: &str| {
        ScriptCommand::DeleteNet { net: net.to_string() }
    })(input)
}

fn probe(input: &str) -> IResult<&str, ScriptCommand> {
    let (input, _) = tag_no_case("probe")(input)?;
    let (input, id) = argument(label)(input)?;
    let (input, target) = argument(token)(input)?;
    Ok((
        input,
        ScriptCommand::Probe {
            id,
            target: target.to_string(),
        },
    ))
}
