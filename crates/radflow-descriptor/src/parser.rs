use winnow::ascii::digit1;
use winnow::combinator::{alt, cut_err, opt, preceded};
use winnow::error::{ContextError, ErrMode, StrContext, StrContextValue};
use winnow::token::take_while;
use winnow::{ModalResult, Parser};

use radflow_types::{FlowError, Result};

use crate::descriptor::{DataTypeDescriptor, StageRef};

fn expected(desc: &'static str) -> StrContext {
    StrContext::Expected(StrContextValue::Description(desc))
}

/// Stage, field and product names: anything up to a delimiter or whitespace.
fn name<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    take_while(1.., |c: char| !c.is_whitespace() && c != ':' && c != ',').parse_next(input)
}

/// Data categories: [A-Za-z0-9_]+
fn category<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '_').parse_next(input)
}

/// Level token: 'l' digits.
fn level(input: &mut &str) -> ModalResult<u32> {
    let _ = alt(('l', 'L'))
        .context(expected("level prefix 'l'"))
        .parse_next(input)?;
    let digits: &str = cut_err(digit1)
        .context(expected("level number"))
        .parse_next(input)?;
    digits.parse().map_err(|_| {
        let mut e = ContextError::new();
        e.push(expected("level number that fits in 32 bits"));
        ErrMode::Cut(e)
    })
}

fn stage_ref(input: &mut &str) -> ModalResult<StageRef> {
    let level = level.parse_next(input)?;
    let _ = cut_err(':')
        .context(expected("':' after level"))
        .parse_next(input)?;
    let name = cut_err(name)
        .context(expected("stage name"))
        .parse_next(input)?;
    Ok(StageRef {
        level,
        name: name.to_string(),
    })
}

fn datatype(input: &mut &str) -> ModalResult<DataTypeDescriptor> {
    let category = category
        .context(expected("data category"))
        .parse_next(input)?;
    let _ = cut_err(':')
        .context(expected("':' after category"))
        .parse_next(input)?;
    let field = cut_err(name)
        .context(expected("field name"))
        .parse_next(input)?;
    let source = opt(preceded(
        ',',
        cut_err((
            name.context(expected("source stage")),
            ','.context(expected("',' before source product")),
            name.context(expected("source product")),
        )),
    ))
    .parse_next(input)?;

    let mut descr = DataTypeDescriptor::new(category, field);
    if let Some((stage, _, product)) = source {
        descr = descr.with_source(stage, product);
    }
    Ok(descr)
}

fn malformed(descriptor: &str, message: impl Into<String>) -> FlowError {
    FlowError::MalformedDescriptor {
        descriptor: descriptor.to_string(),
        message: message.into(),
    }
}

/// Turn a parser outcome into a typed result, rejecting trailing input.
fn finish<O>(descriptor: &str, remaining: &str, result: ModalResult<O>) -> Result<O> {
    let column = descriptor.len() - remaining.len() + 1;
    match result {
        Ok(value) if remaining.is_empty() => Ok(value),
        Ok(_) => Err(malformed(
            descriptor,
            format!("unexpected trailing input '{}' at column {}", remaining, column),
        )),
        Err(ErrMode::Backtrack(e)) | Err(ErrMode::Cut(e)) => {
            let detail = e.to_string();
            let detail = if detail.is_empty() {
                "unexpected input".to_string()
            } else {
                detail
            };
            Err(malformed(descriptor, format!("{} at column {}", detail, column)))
        }
        Err(ErrMode::Incomplete(_)) => Err(malformed(descriptor, "incomplete descriptor")),
    }
}

/// Parse a `lN:name` stage declaration.
pub fn parse_stage_ref(input: &str) -> Result<StageRef> {
    let trimmed = input.trim();
    let mut remaining = trimmed;
    let result = stage_ref.parse_next(&mut remaining);
    finish(trimmed, remaining, result)
}

/// Parse a stage list entry. A bare name without ':' is a level-0 stage;
/// anything containing ':' must be a well-formed `lN:name`.
pub fn parse_stage_entry(input: &str) -> Result<StageRef> {
    let trimmed = input.trim();
    if trimmed.contains(':') {
        return parse_stage_ref(trimmed);
    }
    let mut remaining = trimmed;
    let result = name
        .context(expected("stage name"))
        .parse_next(&mut remaining)
        .map(|n| StageRef {
            level: 0,
            name: n.to_string(),
        });
    finish(trimmed, remaining, result)
}

/// Parse a `CATEGORY:field[,sourceStage,sourceProduct]` descriptor.
pub fn parse_datatype(input: &str) -> Result<DataTypeDescriptor> {
    let trimmed = input.trim();
    let mut remaining = trimmed;
    let result = datatype.parse_next(&mut remaining);
    finish(trimmed, remaining, result)
}
