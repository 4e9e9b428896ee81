//! Jinja-style configuration templates
//!
//! Supports `{{ a.b.0 }}` lookups, `{% for %}` (including `.items()`),
//! `{% if %}`/`{% elif %}`/`{% else %}` with `is defined` tests, `{# #}`
//! comments and `-` whitespace modifiers. Block tags and comments follow
//! `trim_blocks` + `lstrip_blocks` rules, so a tag alone on its line leaves
//! nothing behind. Undefined variables are errors.

use deploykit::RenderError;
use serde_yaml::{Mapping, Value};
use std::fmt::Write as _;

/// A parsed template, rendered once per device
#[derive(Debug, Clone)]
pub struct Template {
    nodes: Vec<Node>,
}

#[derive(Debug, Clone)]
enum Node {
    Text(String),
    Var {
        path: VarPath,
        line: usize,
    },
    For {
        targets: Vec<String>,
        iterable: VarPath,
        items: bool,
        body: Vec<Node>,
        line: usize,
    },
    If {
        cond: Condition,
        then: Vec<Node>,
        otherwise: Vec<Node>,
        line: usize,
    },
}

#[derive(Debug, Clone)]
enum Condition {
    Truthy { path: VarPath, negate: bool },
    Defined { path: VarPath, negate: bool },
}

#[derive(Debug, Clone)]
struct VarPath {
    raw: String,
    segments: Vec<String>,
}

// ============================================================================
// Lexing
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Expr,
    Block,
    Comment,
}

#[derive(Debug)]
enum Token {
    Text(String),
    Tag {
        kind: TagKind,
        body: String,
        line: usize,
        trim_before: bool,
        trim_after: bool,
    },
}

fn syntax(line: usize, message: impl Into<String>) -> RenderError {
    RenderError::TemplateSyntax {
        line,
        message: message.into(),
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, RenderError> {
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < source.len() {
        let rest = &source[pos..];
        let next = ["{{", "{%", "{#"]
            .iter()
            .filter_map(|open| rest.find(open).map(|i| (i, *open)))
            .min_by_key(|(i, _)| *i);

        let Some((start, open)) = next else {
            tokens.push(Token::Text(rest.to_string()));
            break;
        };
        if start > 0 {
            tokens.push(Token::Text(rest[..start].to_string()));
        }

        let line = source[..pos + start].matches('\n').count() + 1;
        let (kind, close) = match open {
            "{{" => (TagKind::Expr, "}}"),
            "{%" => (TagKind::Block, "%}"),
            _ => (TagKind::Comment, "#}"),
        };
        let inner_start = start + open.len();
        let Some(len) = rest[inner_start..].find(close) else {
            return Err(syntax(line, format!("unclosed '{open}' tag")));
        };

        let mut body = &rest[inner_start..inner_start + len];
        let trim_before = body.starts_with('-');
        let trim_after = body.ends_with('-') && body.len() > usize::from(trim_before);
        if trim_before {
            body = &body[1..];
        }
        if trim_after {
            body = &body[..body.len() - 1];
        }

        tokens.push(Token::Tag {
            kind,
            body: body.trim().to_string(),
            line,
            trim_before,
            trim_after,
        });
        pos += inner_start + len + close.len();
    }

    apply_whitespace_control(&mut tokens);
    Ok(tokens)
}

/// Apply `-` modifiers, then lstrip_blocks and trim_blocks
fn apply_whitespace_control(tokens: &mut [Token]) {
    for i in 0..tokens.len() {
        let (kind, trim_before, trim_after) = match &tokens[i] {
            Token::Tag {
                kind,
                trim_before,
                trim_after,
                ..
            } => (*kind, *trim_before, *trim_after),
            Token::Text(_) => continue,
        };
        let is_block = kind != TagKind::Expr;

        if i > 0 {
            if let Token::Text(prev) = &mut tokens[i - 1] {
                if trim_before {
                    prev.truncate(prev.trim_end().len());
                } else if is_block {
                    // lstrip_blocks: indentation before a tag that starts its line
                    let line_start = prev.rfind('\n').map_or(0, |n| n + 1);
                    let at_template_start = i == 1;
                    let only_blanks = prev[line_start..].chars().all(|c| c == ' ' || c == '\t');
                    if only_blanks && (line_start > 0 || at_template_start) {
                        prev.truncate(line_start);
                    }
                }
            }
        }

        if let Some(Token::Text(next)) = tokens.get_mut(i + 1) {
            if trim_after {
                *next = next.trim_start().to_string();
            } else if is_block {
                // trim_blocks: first newline after a block tag
                if let Some(stripped) = next.strip_prefix("\r\n").or_else(|| next.strip_prefix('\n')) {
                    *next = stripped.to_string();
                }
            }
        }
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Block tag that ended a node list
struct EndTag {
    keyword: String,
    rest: String,
    line: usize,
}

struct Parser {
    tokens: std::vec::IntoIter<Token>,
}

impl Parser {
    /// Parse nodes until one of `ends` (or end of input when `ends` is empty)
    fn parse_nodes(&mut self, ends: &[&str]) -> Result<(Vec<Node>, Option<EndTag>), RenderError> {
        let mut nodes = Vec::new();

        while let Some(token) = self.tokens.next() {
            let (kind, body, line) = match token {
                Token::Text(text) => {
                    if !text.is_empty() {
                        nodes.push(Node::Text(text));
                    }
                    continue;
                }
                Token::Tag {
                    kind, body, line, ..
                } => (kind, body, line),
            };

            match kind {
                TagKind::Comment => {}
                TagKind::Expr => nodes.push(Node::Var {
                    path: VarPath::parse(&body, line)?,
                    line,
                }),
                TagKind::Block => {
                    let (keyword, rest) = split_keyword(&body);
                    if ends.contains(&keyword) {
                        return Ok((
                            nodes,
                            Some(EndTag {
                                keyword: keyword.to_string(),
                                rest: rest.to_string(),
                                line,
                            }),
                        ));
                    }
                    match keyword {
                        "for" => nodes.push(self.parse_for(rest, line)?),
                        "if" => nodes.push(self.parse_if(rest, line)?),
                        "endfor" | "endif" | "else" | "elif" => {
                            return Err(syntax(line, format!("unexpected '{keyword}'")));
                        }
                        "" => return Err(syntax(line, "empty block tag")),
                        other => return Err(syntax(line, format!("unknown tag '{other}'"))),
                    }
                }
            }
        }

        Ok((nodes, None))
    }

    fn parse_for(&mut self, header: &str, line: usize) -> Result<Node, RenderError> {
        let Some((targets, iterable)) = header.split_once(" in ") else {
            return Err(syntax(line, "expected 'for <name> in <path>'"));
        };

        let targets: Vec<String> = targets.split(',').map(|t| t.trim().to_string()).collect();
        if targets.is_empty()
            || targets.len() > 2
            || !targets.iter().all(|t| is_identifier(t))
        {
            return Err(syntax(line, format!("invalid loop variable '{}'", header.trim())));
        }

        let iterable = iterable.trim();
        let (iterable, items) = match iterable.strip_suffix(".items()") {
            Some(path) => (path, true),
            None => (iterable, false),
        };
        if targets.len() == 2 && !items {
            return Err(syntax(line, "two loop variables need '<path>.items()'"));
        }

        let iterable = VarPath::parse(iterable, line)?;
        let (body, end) = self.parse_nodes(&["endfor"])?;
        if end.is_none() {
            return Err(syntax(line, "'for' is never closed with 'endfor'"));
        }

        Ok(Node::For {
            targets,
            iterable,
            items,
            body,
            line,
        })
    }

    fn parse_if(&mut self, cond: &str, line: usize) -> Result<Node, RenderError> {
        let cond = Condition::parse(cond, line)?;
        let (then, end) = self.parse_nodes(&["elif", "else", "endif"])?;
        let Some(end) = end else {
            return Err(syntax(line, "'if' is never closed with 'endif'"));
        };

        let otherwise = match end.keyword.as_str() {
            "elif" => vec![self.parse_if(&end.rest, end.line)?],
            "else" => {
                let (otherwise, end) = self.parse_nodes(&["endif"])?;
                if end.is_none() {
                    return Err(syntax(line, "'if' is never closed with 'endif'"));
                }
                otherwise
            }
            _ => Vec::new(),
        };

        Ok(Node::If {
            cond,
            then,
            otherwise,
            line,
        })
    }
}

fn split_keyword(body: &str) -> (&str, &str) {
    match body.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (body, ""),
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl VarPath {
    /// `a.b.0`, `a[0]` and `a["key"]` forms
    fn parse(raw: &str, line: usize) -> Result<Self, RenderError> {
        let raw = raw.trim();
        let invalid = || syntax(line, format!("invalid variable reference '{raw}'"));

        let mut segments = Vec::new();
        for part in raw.split('.') {
            let (head, mut subscripts) = match part.find('[') {
                Some(i) => (&part[..i], &part[i..]),
                None => (part, ""),
            };
            if head.is_empty()
                || !head
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(invalid());
            }
            segments.push(head.to_string());

            while !subscripts.is_empty() {
                let inner = subscripts.strip_prefix('[').ok_or_else(invalid)?;
                let (key, rest) = inner.split_once(']').ok_or_else(invalid)?;
                let key = key.trim().trim_matches(['"', '\'']);
                if key.is_empty() {
                    return Err(invalid());
                }
                segments.push(key.to_string());
                subscripts = rest;
            }
        }

        if !is_identifier(&segments[0]) {
            return Err(invalid());
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }
}

impl Condition {
    fn parse(expr: &str, line: usize) -> Result<Self, RenderError> {
        let expr = expr.trim();
        if let Some(path) = expr.strip_suffix(" is not defined") {
            return Ok(Self::Defined {
                path: VarPath::parse(path, line)?,
                negate: true,
            });
        }
        if let Some(path) = expr.strip_suffix(" is defined") {
            return Ok(Self::Defined {
                path: VarPath::parse(path, line)?,
                negate: false,
            });
        }
        if expr.is_empty() {
            return Err(syntax(line, "'if' needs a condition"));
        }
        match expr.strip_prefix("not ") {
            Some(path) => Ok(Self::Truthy {
                path: VarPath::parse(path, line)?,
                negate: true,
            }),
            None => Ok(Self::Truthy {
                path: VarPath::parse(expr, line)?,
                negate: false,
            }),
        }
    }
}

// ============================================================================
// Rendering
// ============================================================================

/// Variables visible while rendering: loop bindings over the host vars
struct Scope<'a> {
    root: &'a Value,
    locals: Vec<(String, Value)>,
}

impl Scope<'_> {
    fn lookup(&self, path: &VarPath) -> Option<Value> {
        let (first, rest) = path.segments.split_first()?;
        let mut value = self
            .locals
            .iter()
            .rev()
            .find(|(name, _)| name == first)
            .map(|(_, v)| v)
            .or_else(|| self.root.get(first.as_str()))?;

        for segment in rest {
            value = child(value, segment)?;
        }
        Some(value.clone())
    }

    fn require(&self, path: &VarPath, line: usize) -> Result<Value, RenderError> {
        self.lookup(path).ok_or_else(|| RenderError::UndefinedVariable {
            name: path.raw.clone(),
            line,
        })
    }
}

fn child<'v>(value: &'v Value, segment: &str) -> Option<&'v Value> {
    match value {
        Value::Sequence(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        Value::Mapping(map) => map.get(segment).or_else(|| {
            // YAML allows integer keys, e.g. VLAN ids
            let number: i64 = segment.parse().ok()?;
            map.get(Value::Number(number.into()))
        }),
        Value::Tagged(tagged) => child(&tagged.value, segment),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Sequence(items) => !items.is_empty(),
        Value::Mapping(map) => !map.is_empty(),
        Value::Tagged(tagged) => is_truthy(&tagged.value),
    }
}

fn write_value(out: &mut String, value: &Value, path: &VarPath, line: usize) -> Result<(), RenderError> {
    match value {
        Value::Null => out.push_str("None"),
        Value::Bool(true) => out.push_str("True"),
        Value::Bool(false) => out.push_str("False"),
        Value::Number(n) => {
            let _ = write!(out, "{n}");
        }
        Value::String(s) => out.push_str(s),
        Value::Tagged(tagged) => return write_value(out, &tagged.value, path, line),
        Value::Sequence(_) | Value::Mapping(_) => {
            return Err(RenderError::Other(format!(
                "line {line}: '{}' is a collection and cannot be printed",
                path.raw
            )));
        }
    }
    Ok(())
}

fn loop_info(index: usize, len: usize) -> Value {
    let mut info = Mapping::new();
    info.insert("index".into(), Value::Number((index as u64 + 1).into()));
    info.insert("index0".into(), Value::Number((index as u64).into()));
    info.insert("first".into(), Value::Bool(index == 0));
    info.insert("last".into(), Value::Bool(index + 1 == len));
    info.insert("length".into(), Value::Number((len as u64).into()));
    Value::Mapping(info)
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, RenderError> {
        let mut parser = Parser {
            tokens: tokenize(source)?.into_iter(),
        };
        let (nodes, _) = parser.parse_nodes(&[])?;
        Ok(Self { nodes })
    }

    /// Render with a mapping of variables
    pub fn render(&self, vars: &Value) -> Result<String, RenderError> {
        let empty = Value::Mapping(Mapping::new());
        let root = match vars {
            Value::Mapping(_) => vars,
            Value::Null => &empty,
            _ => {
                return Err(RenderError::Other(
                    "template variables must be a mapping".into(),
                ));
            }
        };

        let mut scope = Scope {
            root,
            locals: Vec::new(),
        };
        let mut out = String::new();
        render_nodes(&self.nodes, &mut scope, &mut out)?;
        Ok(out)
    }
}

fn render_nodes(nodes: &[Node], scope: &mut Scope<'_>, out: &mut String) -> Result<(), RenderError> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Var { path, line } => {
                let value = scope.require(path, *line)?;
                write_value(out, &value, path, *line)?;
            }
            Node::If {
                cond,
                then,
                otherwise,
                line,
            } => {
                let holds = match cond {
                    Condition::Truthy { path, negate } => {
                        is_truthy(&scope.require(path, *line)?) != *negate
                    }
                    Condition::Defined { path, negate } => scope.lookup(path).is_some() != *negate,
                };
                render_nodes(if holds { then } else { otherwise }, scope, out)?;
            }
            Node::For {
                targets,
                iterable,
                items,
                body,
                line,
            } => {
                let collection = scope.require(iterable, *line)?;
                let bindings = loop_bindings(&collection, targets, *items, iterable, *line)?;
                let len = bindings.len();

                for (index, values) in bindings.into_iter().enumerate() {
                    let mark = scope.locals.len();
                    scope.locals.push(("loop".to_string(), loop_info(index, len)));
                    scope
                        .locals
                        .extend(targets.iter().cloned().zip(values));
                    let result = render_nodes(body, scope, out);
                    scope.locals.truncate(mark);
                    result?;
                }
            }
        }
    }
    Ok(())
}

/// Values bound to the loop variables on each iteration
fn loop_bindings(
    collection: &Value,
    targets: &[String],
    items: bool,
    path: &VarPath,
    line: usize,
) -> Result<Vec<Vec<Value>>, RenderError> {
    let not_iterable = |what: &str| {
        RenderError::Other(format!("line {line}: cannot iterate over '{}' ({what})", path.raw))
    };

    match (collection, items) {
        (Value::Mapping(map), true) => Ok(map
            .iter()
            .map(|(k, v)| match targets.len() {
                1 => vec![Value::Sequence(vec![k.clone(), v.clone()])],
                _ => vec![k.clone(), v.clone()],
            })
            .collect()),
        (_, true) => Err(not_iterable("items() needs a mapping")),
        (Value::Sequence(seq), false) => Ok(seq.iter().map(|v| vec![v.clone()]).collect()),
        (Value::Mapping(map), false) => Ok(map.keys().map(|k| vec![k.clone()]).collect()),
        (Value::Null, false) => Err(not_iterable("null")),
        (Value::Tagged(tagged), _) => loop_bindings(&tagged.value, targets, items, path, line),
        _ => Err(not_iterable("not a list or mapping")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(yaml: &str) -> Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn render(template: &str, yaml: &str) -> String {
        Template::parse(template).unwrap().render(&vars(yaml)).unwrap()
    }

    #[test]
    fn test_variables_and_indexing() {
        let out = render(
            "<hostname>{{ hostname }}</hostname><ip>{{ interfaces.0.ip }}</ip><x>{{ interfaces[1]['name'] }}</x>",
            "hostname: r1\ninterfaces:\n  - {name: ge-0/0/0, ip: 10.0.0.1}\n  - {name: ge-0/0/1, ip: 10.0.1.1}\n",
        );
        assert_eq!(
            out,
            "<hostname>r1</hostname><ip>10.0.0.1</ip><x>ge-0/0/1</x>"
        );
    }

    #[test]
    fn test_trim_and_lstrip_blocks() {
        let template = "\
<ospf>
  {% for area in areas %}
  <area>
    <id>{{ area.id }}</id>
  </area>
  {% endfor %}
</ospf>
";
        let out = render(template, "areas:\n  - id: 0\n  - id: 10\n");
        assert_eq!(
            out,
            "<ospf>\n  <area>\n    <id>0</id>\n  </area>\n  <area>\n    <id>10</id>\n  </area>\n</ospf>\n"
        );
    }

    #[test]
    fn test_if_elif_else() {
        let template = "{% if a %}A{% elif b %}B{% else %}C{% endif %}";
        assert_eq!(render(template, "a: true\nb: true"), "A");
        assert_eq!(render(template, "a: 0\nb: yes-string"), "B");
        assert_eq!(render(template, "a: ''\nb: []"), "C");
    }

    #[test]
    fn test_defined_tests_and_not() {
        let template = "{% if mtu is defined %}{{ mtu }}{% else %}default{% endif %}|{% if not shutdown %}up{% endif %}";
        assert_eq!(render(template, "shutdown: false"), "default|up");
        assert_eq!(render(template, "mtu: 9000\nshutdown: true"), "9000|");
    }

    #[test]
    fn test_items_and_loop_info() {
        let template = "{% for name, cfg in vlans.items() %}{{ name }}={{ cfg.id }}{% if not loop.last %},{% endif %}{% endfor %}";
        let out = render(template, "vlans:\n  users: {id: 10}\n  voice: {id: 20}\n");
        assert_eq!(out, "users=10,voice=20");
    }

    #[test]
    fn test_comments_and_dash_modifiers() {
        let out = render("a {#- note -#}  b {{- x -}} c", "x: X");
        assert_eq!(out, "abXc");
    }

    #[test]
    fn test_undefined_variable_is_error_with_line() {
        let template = Template::parse("line1\n{{ missing.key }}").unwrap();
        let err = template.render(&vars("other: 1")).unwrap_err();
        assert!(matches!(
            err,
            RenderError::UndefinedVariable { ref name, line: 2 } if name == "missing.key"
        ));

        // Undefined in a condition is strict too
        let template = Template::parse("{% if nope %}x{% endif %}").unwrap();
        assert!(template.render(&vars("a: 1")).is_err());
    }

    #[test]
    fn test_syntax_errors_report_lines() {
        let cases = [
            ("ok\n{% for x in xs %}\nbody", 2),
            ("{{ unclosed", 1),
            ("a\nb\n{% endif %}", 3),
            ("{% set x = 1 %}", 1),
            ("{% for in xs %}{% endfor %}", 1),
            ("\n{% if a %}x{% else %}y", 2),
            ("{{ a..b }}", 1),
            ("{{ a[0]] }}", 1),
            ("x\n{{ a[0]é }}", 2),
            ("{{ a[0]x] }}", 1),
            ("{% if a[] %}{% endif %}", 1),
        ];
        for (source, expected_line) in cases {
            match Template::parse(source) {
                Err(RenderError::TemplateSyntax { line, .. }) => {
                    assert_eq!(line, expected_line, "{source:?}");
                }
                other => panic!("expected syntax error for {source:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_printing_collection_is_an_error() {
        let template = Template::parse("{{ xs }}").unwrap();
        assert!(matches!(
            template.render(&vars("xs: [1, 2]")),
            Err(RenderError::Other(_))
        ));
    }

    #[test]
    fn test_integer_mapping_keys() {
        assert_eq!(render("{{ vlans.100 }}", "vlans:\n  100: users"), "users");
    }

    #[test]
    fn test_nested_loops_restore_scope() {
        let template = "{% for x in outer %}{% for x in x.inner %}{{ x }}{% endfor %};{% endfor %}{{ x }}";
        let out = render(
            template,
            "x: top\nouter:\n  - inner: [1, 2]\n  - inner: [3]\n",
        );
        assert_eq!(out, "12;3;top");
    }
}
