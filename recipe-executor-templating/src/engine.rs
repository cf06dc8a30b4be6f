//! Template engine for rendering recipe strings against context artifacts
//!
//! Rendering is Liquid with two recipe-specific accommodations layered on
//! top of the stock parser:
//!
//! - Missing lookups never fail. Variable paths referenced by a template are
//!   resolved against the provided variables before parsing; unresolvable
//!   roots are injected as `nil` globals and unresolvable dotted paths are
//!   rewritten to the `nil` literal (keeping any filter chain intact, so
//!   `default:` still applies).
//! - Inline conditionals (`{{ a if cond else b }}`) are rewritten into the
//!   equivalent `{% if %}` block before parsing.
//!
//! `{% raw %}` bodies are masked with sentinel placeholders before any of
//! this happens and restored verbatim afterwards, so raw content is never
//! re-scanned, including across nested render passes.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use tracing::trace;

use crate::{filters, TemplateError};

/// Sentinel wrapped around masked raw-block indices. A private-use
/// character, so collisions with recipe content are not a practical concern.
const RAW_SENTINEL: char = '\u{f8ff}';

/// Upper bound on nested re-render passes when no fixed point is reached.
const MAX_RENDER_PASSES: usize = 10;

static RAW_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{%-?\s*raw\s*-?%\}(.*?)\{%-?\s*endraw\s*-?%\}").unwrap());
static INLINE_IF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([^{}]+?)\s+if\s+([^{}]+?)\s+else\s+([^{}]+?)\s*\}\}").unwrap());
static REGION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{\{.*?\}\}|\{%.*?%\}").unwrap());
static PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*").unwrap());
static STRING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#""[^"]*"|'[^']*'"#).unwrap());
static FOR_BINDING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{%-?\s*(?:for|tablerow)\s+([A-Za-z_][A-Za-z0-9_]*)\s+in").unwrap());
static ASSIGN_BINDING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{%-?\s*(?:capture|assign|increment|decrement)\s+([A-Za-z_][A-Za-z0-9_]*)")
        .unwrap()
});

/// Liquid keywords and tag names that must never be treated as variables.
const KEYWORDS: &[&str] = &[
    "if", "elsif", "else", "endif", "unless", "endunless", "case", "when", "endcase", "for",
    "endfor", "in", "break", "continue", "limit", "offset", "reversed", "tablerow",
    "endtablerow", "cycle", "capture", "endcapture", "assign", "echo", "increment", "decrement",
    "include", "render", "raw", "endraw", "comment", "endcomment", "and", "or", "not",
    "contains", "true", "false", "nil", "null", "empty", "blank", "forloop", "tablerowloop",
    "with", "as",
];

/// Liquid template engine used by every step to resolve dynamic strings.
pub struct TemplateEngine {
    parser: liquid::Parser,
}

impl TemplateEngine {
    /// Build the engine with the stdlib filters plus `json` and `snakecase`.
    pub fn new() -> Result<Self, TemplateError> {
        let parser = liquid::ParserBuilder::with_stdlib()
            .filter(filters::Json)
            .filter(filters::Snakecase)
            .build()
            .map_err(|e| TemplateError::Parse(e.to_string()))?;
        Ok(Self { parser })
    }

    /// Render a template once against the given variables.
    pub fn render(
        &self,
        template: &str,
        vars: &Map<String, Value>,
    ) -> Result<String, TemplateError> {
        if !contains_template_syntax(template) {
            return Ok(template.to_string());
        }
        let mut raw_bodies = Vec::new();
        let masked = mask_raw_blocks(template, &mut raw_bodies);
        let rendered = self.render_once(&masked, vars)?;
        Ok(restore_raw_blocks(rendered, &raw_bodies))
    }

    /// Re-render the output to a fixed point.
    ///
    /// Rendering repeats while the output still contains template syntax
    /// outside raw bodies and keeps changing, capped at
    /// [`MAX_RENDER_PASSES`].
    pub fn render_nested(
        &self,
        template: &str,
        vars: &Map<String, Value>,
    ) -> Result<String, TemplateError> {
        let mut raw_bodies = Vec::new();
        let mut current = mask_raw_blocks(template, &mut raw_bodies);
        let mut passes = 0;
        while contains_template_syntax(&current) && passes < MAX_RENDER_PASSES {
            let rendered = self.render_once(&current, vars)?;
            let next = mask_raw_blocks(&rendered, &mut raw_bodies);
            if next == current {
                break;
            }
            trace!(pass = passes, "nested render pass produced new output");
            current = next;
            passes += 1;
        }
        Ok(restore_raw_blocks(current, &raw_bodies))
    }

    /// Render every string leaf of a JSON value; other leaves pass through.
    pub fn render_value(
        &self,
        value: &Value,
        vars: &Map<String, Value>,
    ) -> Result<Value, TemplateError> {
        self.render_value_with(value, vars, false)
    }

    /// Structural rendering with nested (fixed-point) string rendering.
    pub fn render_value_nested(
        &self,
        value: &Value,
        vars: &Map<String, Value>,
    ) -> Result<Value, TemplateError> {
        self.render_value_with(value, vars, true)
    }

    fn render_value_with(
        &self,
        value: &Value,
        vars: &Map<String, Value>,
        nested: bool,
    ) -> Result<Value, TemplateError> {
        match value {
            Value::String(s) => {
                let rendered = if nested {
                    self.render_nested(s, vars)?
                } else {
                    self.render(s, vars)?
                };
                Ok(Value::String(rendered))
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.render_value_with(item, vars, nested))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut out = Map::new();
                for (key, item) in map {
                    out.insert(key.clone(), self.render_value_with(item, vars, nested)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    fn render_once(
        &self,
        template: &str,
        vars: &Map<String, Value>,
    ) -> Result<String, TemplateError> {
        let template = rewrite_inline_conditionals(template);
        let (template, globals) = prepare_globals(&template, vars)?;
        let parsed = self
            .parser
            .parse(&template)
            .map_err(|e| TemplateError::Parse(e.to_string()))?;
        parsed
            .render(&globals)
            .map_err(|e| TemplateError::Render(e.to_string()))
    }
}

/// True when the string still contains Liquid output or tag markers.
pub fn contains_template_syntax(s: &str) -> bool {
    s.contains("{{") || s.contains("{%")
}

fn mask_raw_blocks(template: &str, bodies: &mut Vec<String>) -> String {
    RAW_BLOCK_RE
        .replace_all(template, |caps: &Captures| {
            bodies.push(caps[1].to_string());
            format!("{RAW_SENTINEL}RAW{}{RAW_SENTINEL}", bodies.len() - 1)
        })
        .into_owned()
}

fn restore_raw_blocks(mut rendered: String, bodies: &[String]) -> String {
    for (index, body) in bodies.iter().enumerate() {
        let placeholder = format!("{RAW_SENTINEL}RAW{index}{RAW_SENTINEL}");
        rendered = rendered.replace(&placeholder, body);
    }
    rendered
}

fn rewrite_inline_conditionals(template: &str) -> String {
    INLINE_IF_RE
        .replace_all(template, "{% if $2 %}{{ $1 }}{% else %}{{ $3 }}{% endif %}")
        .into_owned()
}

/// Scan the template for variable paths, rewrite unresolvable dotted paths
/// to `nil`, and build the Liquid globals with unresolvable roots injected
/// as `nil` so missing lookups render as empty string.
fn prepare_globals(
    template: &str,
    vars: &Map<String, Value>,
) -> Result<(String, liquid::Object), TemplateError> {
    let mut bound = HashSet::new();
    for caps in FOR_BINDING_RE.captures_iter(template) {
        bound.insert(caps[1].to_string());
    }
    for caps in ASSIGN_BINDING_RE.captures_iter(template) {
        bound.insert(caps[1].to_string());
    }

    let mut missing_roots = HashSet::new();
    let mut rewrites = HashSet::new();
    for region in REGION_RE.find_iter(template) {
        for path in collect_paths(region.as_str(), &bound) {
            if resolve_path(vars, &path) {
                continue;
            }
            if path.contains('.') {
                rewrites.insert(path);
            } else {
                missing_roots.insert(path);
            }
        }
    }

    let template = rewrite_regions(template, &rewrites);

    let mut globals = liquid::Object::new();
    for (key, value) in vars {
        let value = liquid::model::to_value(value)
            .map_err(|e| TemplateError::Render(e.to_string()))?;
        globals.insert(key.clone().into(), value);
    }
    for root in missing_roots {
        if !globals.contains_key(root.as_str()) {
            globals.insert(root.into(), liquid::model::Value::Nil);
        }
    }
    Ok((template, globals))
}

/// Candidate variable paths inside one `{{ }}` / `{% %}` region.
fn collect_paths(region: &str, bound: &HashSet<String>) -> Vec<String> {
    let cleaned = blank_strings(region);
    let mut out = Vec::new();
    for m in PATH_RE.find_iter(&cleaned) {
        let root = m.as_str().split('.').next().unwrap_or_default();
        if KEYWORDS.contains(&root) || bound.contains(root) {
            continue;
        }
        // A name directly after `|` is a filter; a name directly before `:`
        // is a filter-with-arguments or keyword-argument name.
        let prev = cleaned[..m.start()].trim_end().as_bytes().last().copied();
        if prev == Some(b'|') {
            continue;
        }
        let next = cleaned[m.end()..].trim_start().as_bytes().first().copied();
        if next == Some(b':') {
            continue;
        }
        out.push(m.as_str().to_string());
    }
    out
}

/// Whether the dotted path fully resolves against the variables.
fn resolve_path(vars: &Map<String, Value>, path: &str) -> bool {
    let mut segments = path.split('.');
    let root = match segments.next() {
        Some(root) => root,
        None => return false,
    };
    let mut current = match vars.get(root) {
        Some(value) => value,
        None => return false,
    };
    for segment in segments {
        current = match current {
            Value::Object(map) => match map.get(segment) {
                Some(value) => value,
                None => return false,
            },
            Value::Array(items) => {
                match segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                    Some(value) => value,
                    None => return false,
                }
            }
            _ => return false,
        };
    }
    true
}

fn rewrite_regions(template: &str, rewrites: &HashSet<String>) -> String {
    if rewrites.is_empty() {
        return template.to_string();
    }
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for region in REGION_RE.find_iter(template) {
        out.push_str(&template[last..region.start()]);
        out.push_str(&rewrite_tokens(region.as_str(), rewrites));
        last = region.end();
    }
    out.push_str(&template[last..]);
    out
}

fn rewrite_tokens(region: &str, rewrites: &HashSet<String>) -> String {
    let cleaned = blank_strings(region);
    let mut out = String::with_capacity(region.len());
    let mut last = 0;
    for m in PATH_RE.find_iter(&cleaned) {
        if rewrites.contains(m.as_str()) {
            out.push_str(&region[last..m.start()]);
            out.push_str("nil");
            last = m.end();
        }
    }
    out.push_str(&region[last..]);
    out
}

/// Blank out quoted strings, preserving byte offsets.
fn blank_strings(region: &str) -> String {
    STRING_RE
        .replace_all(region, |caps: &Captures| " ".repeat(caps[0].len()))
        .into_owned()
}
