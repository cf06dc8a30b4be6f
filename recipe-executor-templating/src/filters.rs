//! Custom Liquid filters for recipe templates
//!
//! The stdlib filter set covers `default`, `split`, `join`, `upcase`,
//! `downcase`, `date` and `size`; this module adds the filters recipes need
//! on top of that: `json` (with an optional `indent` keyword) and
//! `snakecase`.

use liquid_core::{
    Display_filter, Expression, Filter, FilterParameters, FilterReflection, FromFilterParameters,
    ParseFilter, Result, Runtime, Value, ValueView,
};
use serde::Serialize;

#[derive(Debug, FilterParameters)]
struct JsonArgs {
    #[parameter(
        description = "Number of spaces to indent the output with.",
        arg_type = "integer",
        mode = "keyword"
    )]
    indent: Option<Expression>,
}

/// Serialize the input value as JSON.
///
/// `{{ value | json }}` produces compact JSON; `{{ value | json: indent: 2 }}`
/// produces pretty-printed JSON with the given indent width.
#[derive(Clone, ParseFilter, FilterReflection)]
#[filter(
    name = "json",
    description = "Serializes the input value as JSON.",
    parameters(JsonArgs),
    parsed(JsonFilter)
)]
pub struct Json;

#[derive(Debug, FromFilterParameters, Display_filter)]
#[name = "json"]
struct JsonFilter {
    #[parameters]
    args: JsonArgs,
}

impl Filter for JsonFilter {
    fn evaluate(&self, input: &dyn ValueView, runtime: &dyn Runtime) -> Result<Value> {
        let args = self.args.evaluate(runtime)?;
        let value = input.to_value();

        let rendered = match args.indent {
            Some(indent) if indent > 0 => {
                let indent = " ".repeat(indent as usize);
                let mut buf = Vec::new();
                let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
                let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
                value
                    .serialize(&mut serializer)
                    .map_err(|e| liquid_core::Error::with_msg(e.to_string()))?;
                String::from_utf8(buf)
                    .map_err(|e| liquid_core::Error::with_msg(e.to_string()))?
            }
            _ => serde_json::to_string(&value)
                .map_err(|e| liquid_core::Error::with_msg(e.to_string()))?,
        };

        Ok(Value::scalar(rendered))
    }
}

/// Convert a string to `snake_case`.
#[derive(Clone, ParseFilter, FilterReflection)]
#[filter(
    name = "snakecase",
    description = "Converts a string to snake_case.",
    parsed(SnakecaseFilter)
)]
pub struct Snakecase;

#[derive(Debug, Default, Display_filter)]
#[name = "snakecase"]
struct SnakecaseFilter;

impl Filter for SnakecaseFilter {
    fn evaluate(&self, input: &dyn ValueView, _runtime: &dyn Runtime) -> Result<Value> {
        let input = input.to_kstr();
        Ok(Value::scalar(to_snake_case(&input)))
    }
}

fn to_snake_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut prev_lower = false;
    for c in input.chars() {
        if c.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(c.to_lowercase());
            prev_lower = false;
        } else if c.is_alphanumeric() {
            out.push(c);
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
        } else if !out.ends_with('_') && !out.is_empty() {
            out.push('_');
            prev_lower = false;
        }
    }
    out.trim_end_matches('_').to_string()
}
