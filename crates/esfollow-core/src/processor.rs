//! Line processors turn followed documents into output lines.

use crate::{FollowError, Result};
use esfollow_client::Document;
use serde_json::Value;

/// Transforms one document; `None` drops the line
pub trait LineProcessor {
    type Output;

    fn process_line(&self, line: Document) -> Option<Self::Output>;
}

impl<F, T> LineProcessor for F
where
    F: Fn(Document) -> Option<T>,
{
    type Output = T;

    fn process_line(&self, line: Document) -> Option<T> {
        self(line)
    }
}

/// Hands documents through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl LineProcessor for Passthrough {
    type Output = Document;

    fn process_line(&self, line: Document) -> Option<Document> {
        Some(line)
    }
}

/// Values of all top-level fields, ordered by field name, space separated
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultProcessor;

impl LineProcessor for DefaultProcessor {
    type Output = String;

    fn process_line(&self, line: Document) -> Option<String> {
        let mut fields: Vec<(String, Value)> = line.into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));

        let values: Vec<String> = fields.iter().map(|(_, value)| render(value)).collect();
        Some(values.join(" "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field { name: String, path: Vec<String> },
}

/// Renders documents through a format string such as `{@timestamp} {message}`.
///
/// `{field}` inserts a top-level field and `{kv[key][sub]}` walks into nested
/// objects (or arrays, by position). `{{` and `}}` produce literal braces.
/// Fields that are absent render as nothing; strings render raw and any other
/// value as compact JSON.
#[derive(Debug, Clone)]
pub struct FormattingProcessor {
    segments: Vec<Segment>,
}

impl FormattingProcessor {
    pub fn new(format: &str) -> Result<Self> {
        Ok(Self {
            segments: parse_format(format)?,
        })
    }

    /// Render one document
    pub fn format(&self, line: &Document) -> String {
        let mut out = String::new();

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field { name, path } => {
                    if let Some(value) = lookup(line, name, path) {
                        out.push_str(&render(value));
                    }
                }
            }
        }
        out
    }
}

impl LineProcessor for FormattingProcessor {
    type Output = String;

    fn process_line(&self, line: Document) -> Option<String> {
        Some(self.format(&line))
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn lookup<'a>(line: &'a Document, name: &str, path: &[String]) -> Option<&'a Value> {
    let mut value = line.get(name)?;

    for key in path {
        value = match value {
            Value::Object(map) => map.get(key)?,
            Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(value)
}

fn parse_format(format: &str) -> Result<Vec<Segment>> {
    let invalid = |reason: &str| FollowError::InvalidFormat(format!("{}: {:?}", reason, format));

    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '}' => return Err(invalid("single '}'")),
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') | None => return Err(invalid("unclosed '{'")),
                        Some(c) => field.push(c),
                    }
                }

                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(parse_field(&field).ok_or_else(|| invalid("bad field"))?);
            }
            c => literal.push(c),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// `name[key][sub]`
fn parse_field(field: &str) -> Option<Segment> {
    let (name, mut rest) = match field.find('[') {
        Some(at) => field.split_at(at),
        None => (field, ""),
    };
    if name.is_empty() {
        return None;
    }

    let mut path = Vec::new();
    while !rest.is_empty() {
        let inner = rest.strip_prefix('[')?;
        let end = inner.find(']')?;
        path.push(inner[..end].to_string());
        rest = &inner[end + 1..];
    }

    Some(Segment::Field {
        name: name.to_string(),
        path,
    })
}
