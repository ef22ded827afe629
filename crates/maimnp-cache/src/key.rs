//! Cache key templates.
//!
//! A template is a string with `{name}` placeholders, e.g. `user:{user_id}`.
//! `{{` and `}}` stand for literal braces. Placeholders are filled from the
//! named fields of a serialized argument struct.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::KeyBuildError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed key template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl KeyTemplate {
    pub fn parse(template: &str) -> Result<Self, KeyBuildError> {
        let malformed = || KeyBuildError::MalformedTemplate(template.to_string());
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

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
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') | None => return Err(malformed()),
                            Some(ch) => name.push(ch),
                        }
                    }
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(malformed());
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(name.to_string()));
                }
                '}' => return Err(malformed()),
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            raw: template.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Placeholder names in order of appearance.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Fills placeholders from a parameter map.
    pub fn render(&self, params: &Map<String, Value>) -> Result<String, KeyBuildError> {
        let mut key = String::with_capacity(self.raw.len() + 16);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => key.push_str(text),
                Segment::Placeholder(name) => {
                    let value = params
                        .get(name)
                        .ok_or_else(|| KeyBuildError::MissingPlaceholder(name.clone()))?;
                    push_value(&mut key, value);
                }
            }
        }
        Ok(key)
    }

    /// Fills placeholders from the fields of a serializable argument struct.
    pub fn render_args<A: Serialize + ?Sized>(&self, args: &A) -> Result<String, KeyBuildError> {
        let value =
            serde_json::to_value(args).map_err(|e| KeyBuildError::Arguments(e.to_string()))?;
        match value {
            Value::Object(params) => self.render(&params),
            // Unit-like arguments only satisfy templates without placeholders.
            Value::Null => self.render(&Map::new()),
            other => Err(KeyBuildError::Arguments(format!(
                "expected named fields, got {}",
                json_kind(&other)
            ))),
        }
    }
}

fn push_value(key: &mut String, value: &Value) {
    match value {
        Value::String(s) => key.push_str(s),
        Value::Null => key.push_str("null"),
        Value::Bool(b) => key.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => key.push_str(&n.to_string()),
        other => key.push_str(&other.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct ArticleArgs {
        user_id: u64,
        slug: String,
        draft: bool,
    }

    #[test]
    fn renders_named_fields() {
        let tpl = KeyTemplate::parse("article:{user_id}:{slug}").unwrap();
        let key = tpl
            .render_args(&ArticleArgs {
                user_id: 42,
                slug: "hello".into(),
                draft: false,
            })
            .unwrap();
        assert_eq!(key, "article:42:hello");
        assert_eq!(tpl.placeholders().collect::<Vec<_>>(), vec!["user_id", "slug"]);
    }

    #[test]
    fn missing_placeholder_is_an_error() {
        let tpl = KeyTemplate::parse("article:{id}").unwrap();
        let err = tpl
            .render_args(&ArticleArgs {
                user_id: 1,
                slug: "x".into(),
                draft: true,
            })
            .unwrap_err();
        assert_eq!(err, KeyBuildError::MissingPlaceholder("id".into()));
    }

    #[test]
    fn escaped_braces_and_malformed_templates() {
        let tpl = KeyTemplate::parse("lit:{{x}}:{draft}").unwrap();
        let key = tpl
            .render_args(&ArticleArgs {
                user_id: 1,
                slug: "x".into(),
                draft: true,
            })
            .unwrap();
        assert_eq!(key, "lit:{x}:true");

        assert!(KeyTemplate::parse("bad:{open").is_err());
        assert!(KeyTemplate::parse("bad:{}").is_err());
        assert!(KeyTemplate::parse("bad:}").is_err());
    }

    #[test]
    fn scalar_arguments_are_rejected() {
        let tpl = KeyTemplate::parse("user:{id}").unwrap();
        assert!(matches!(tpl.render_args(&42), Err(KeyBuildError::Arguments(_))));
        assert_eq!(KeyTemplate::parse("all").unwrap().render_args(&()).unwrap(), "all");
    }
}
