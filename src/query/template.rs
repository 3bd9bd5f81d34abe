//! Minimal SQL template renderer.
//!
//! Templates are plain text with named slots:
//!
//! - `{{name}}` is replaced by the value of `name`;
//! - `{{#if name}} ... {{else}} ... {{/if}}` keeps one branch depending on
//!   whether `name` is truthy (non-empty string, non-zero integer, `true`).
//!
//! Every referenced name must be known to the [`TemplateContext`], including
//! names inside branches that end up discarded.

use std::fmt;

/// Value of a named template slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value<'a> {
    Str(&'a str),
    Bool(bool),
    Int(i64),
}

impl Value<'_> {
    fn is_truthy(&self) -> bool {
        match self {
            Value::Str(s) => !s.is_empty(),
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
        }
    }
}

impl fmt::Display for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
        }
    }
}

/// Source of named values for [`format`].
pub trait TemplateContext {
    /// Returns the value of `name`, or `None` if the name is not recognised.
    fn lookup(&self, name: &str) -> Option<Value<'_>>;
}

/// Error type for template rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// Template references a name the context does not know.
    UnknownField(String),
    /// `{{` without a matching `}}`.
    Unclosed(String),
    /// Malformed tag, or `else`/`/if` without an open block.
    UnexpectedTag(String),
    /// `{{#if}}` block never closed.
    MissingEnd,
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateError::UnknownField(name) => write!(f, "unknown template field '{}'", name),
            TemplateError::Unclosed(rest) => write!(f, "unclosed tag near '{}'", rest),
            TemplateError::UnexpectedTag(tag) => write!(f, "unexpected tag '{{{{{}}}}}'", tag),
            TemplateError::MissingEnd => write!(f, "missing {{{{/if}}}}"),
        }
    }
}

impl std::error::Error for TemplateError {}

struct Block {
    condition: bool,
    in_else: bool,
}

impl Block {
    fn active(&self) -> bool {
        self.condition != self.in_else
    }
}

/// Renders `template` with values from `ctx`.
pub fn format<C: TemplateContext + ?Sized>(template: &str, ctx: &C) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut blocks: Vec<Block> = Vec::new();
    let mut rest = template;

    loop {
        let active = blocks.iter().all(Block::active);

        let Some(open) = rest.find("{{") else {
            if active {
                out.push_str(rest);
            }
            break;
        };
        if active {
            out.push_str(&rest[..open]);
        }

        let after = &rest[open + 2..];
        let close = after
            .find("}}")
            .ok_or_else(|| TemplateError::Unclosed(snippet(&rest[open..])))?;
        let tag = after[..close].trim();
        rest = &after[close + 2..];

        if let Some(name) = tag.strip_prefix("#if") {
            let name = name.trim();
            let value = lookup(ctx, name, tag)?;
            blocks.push(Block {
                condition: value.is_truthy(),
                in_else: false,
            });
        } else if tag == "else" {
            match blocks.last_mut() {
                Some(block) if !block.in_else => block.in_else = true,
                _ => return Err(TemplateError::UnexpectedTag(tag.to_string())),
            }
        } else if tag == "/if" {
            if blocks.pop().is_none() {
                return Err(TemplateError::UnexpectedTag(tag.to_string()));
            }
        } else {
            let value = lookup(ctx, tag, tag)?;
            if active {
                out.push_str(&value.to_string());
            }
        }
    }

    if !blocks.is_empty() {
        return Err(TemplateError::MissingEnd);
    }

    Ok(out)
}

fn lookup<'c, C: TemplateContext + ?Sized>(
    ctx: &'c C,
    name: &str,
    tag: &str,
) -> Result<Value<'c>, TemplateError> {
    if !is_identifier(name) {
        return Err(TemplateError::UnexpectedTag(tag.to_string()));
    }
    ctx.lookup(name)
        .ok_or_else(|| TemplateError::UnknownField(name.to_string()))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn snippet(s: &str) -> String {
    s.chars().take(32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ctx {
        name: &'static str,
        flag: bool,
        count: i64,
        empty: &'static str,
    }

    impl TemplateContext for Ctx {
        fn lookup(&self, name: &str) -> Option<Value<'_>> {
            match name {
                "name" => Some(Value::Str(self.name)),
                "flag" => Some(Value::Bool(self.flag)),
                "count" => Some(Value::Int(self.count)),
                "empty" => Some(Value::Str(self.empty)),
                _ => None,
            }
        }
    }

    fn ctx(flag: bool) -> Ctx {
        Ctx {
            name: "pg_wal_lsn_diff",
            flag,
            count: 256,
            empty: "",
        }
    }

    #[test]
    fn test_substitution() {
        let got = format("SELECT {{name}}(a, b), {{ count }}, {{flag}}", &ctx(true)).unwrap();
        assert_eq!(got, "SELECT pg_wal_lsn_diff(a, b), 256, true");
    }

    #[test]
    fn test_nested_expression() {
        let got = format("({{name}}({{name}}(),'0/0') / 1024)", &ctx(true)).unwrap();
        assert_eq!(got, "(pg_wal_lsn_diff(pg_wal_lsn_diff(),'0/0') / 1024)");
    }

    #[test]
    fn test_known_empty_field_renders_empty() {
        assert_eq!(format("a{{empty}}b", &ctx(true)).unwrap(), "ab");
    }

    #[test]
    fn test_unknown_field_fails() {
        assert_eq!(
            format("{{ invalid }}", &ctx(true)),
            Err(TemplateError::UnknownField("invalid".to_string()))
        );
    }

    #[test]
    fn test_unknown_field_in_discarded_branch_fails() {
        assert_eq!(
            format("{{#if flag}}x{{else}}{{missing}}{{/if}}", &ctx(true)),
            Err(TemplateError::UnknownField("missing".to_string()))
        );
    }

    #[test]
    fn test_conditionals() {
        let tmpl = "WHERE true{{#if flag}} AND state <> 'idle'{{/if}}";
        assert_eq!(
            format(tmpl, &ctx(true)).unwrap(),
            "WHERE true AND state <> 'idle'"
        );
        assert_eq!(format(tmpl, &ctx(false)).unwrap(), "WHERE true");
    }

    #[test]
    fn test_else_branch() {
        let tmpl = "{{#if flag}}yes{{else}}no{{/if}}";
        assert_eq!(format(tmpl, &ctx(true)).unwrap(), "yes");
        assert_eq!(format(tmpl, &ctx(false)).unwrap(), "no");
    }

    #[test]
    fn test_nested_conditionals() {
        let tmpl = "{{#if count}}a{{#if flag}}b{{else}}c{{/if}}d{{else}}e{{/if}}";
        assert_eq!(format(tmpl, &ctx(true)).unwrap(), "abd");
        assert_eq!(format(tmpl, &ctx(false)).unwrap(), "acd");
        assert_eq!(
            format("{{#if empty}}x{{#if flag}}y{{/if}}{{else}}z{{/if}}", &ctx(true)).unwrap(),
            "z"
        );
    }

    #[test]
    fn test_single_braces_are_text() {
        assert_eq!(
            format("SELECT '{1,2}'::int[], {{count}}", &ctx(true)).unwrap(),
            "SELECT '{1,2}'::int[], 256"
        );
    }

    #[test]
    fn test_malformed_templates() {
        assert!(matches!(
            format("SELECT {{name", &ctx(true)),
            Err(TemplateError::Unclosed(_))
        ));
        assert_eq!(
            format("{{/if}}", &ctx(true)),
            Err(TemplateError::UnexpectedTag("/if".to_string()))
        );
        assert_eq!(
            format("{{#if flag}}a{{else}}b{{else}}c{{/if}}", &ctx(true)),
            Err(TemplateError::UnexpectedTag("else".to_string()))
        );
        assert_eq!(
            format("{{#if flag}}a", &ctx(true)),
            Err(TemplateError::MissingEnd)
        );
        assert_eq!(
            format("{{ .Name }}", &ctx(true)),
            Err(TemplateError::UnexpectedTag(".Name".to_string()))
        );
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let tmpl = "{{name}} {{#if flag}}{{count}}{{/if}}";
        assert_eq!(
            format(tmpl, &ctx(true)).unwrap(),
            format(tmpl, &ctx(true)).unwrap()
        );
    }
}
