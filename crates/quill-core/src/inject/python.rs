//! Python cell front end built on tree-sitter.

use serde_json::{Map, Number, Value};
use tree_sitter::{InputEdit, Language, Node, Parser, Point, Tree};

use crate::error::{Error, Result};

use super::{Assignment, CellLanguage, ParseSkip, Position, SourceSpan};

/// Node kinds that open a new scope. Assignments inside them are not
/// module-level and never match.
const SCOPE_KINDS: &[&str] = &["function_definition", "class_definition", "lambda"];

/// Python front end.
pub struct Python {
    language: Language,
}

impl Python {
    pub fn new() -> Result<Self> {
        let language: Language = tree_sitter_python::LANGUAGE.into();
        // Fail once here rather than on every cell.
        Parser::new()
            .set_language(&language)
            .map_err(|e| Error::InvalidOperation(format!("Python grammar unavailable: {e}")))?;
        Ok(Self { language })
    }
}

impl CellLanguage for Python {
    type Tree = Tree;

    fn parse(&self, source: &str) -> std::result::Result<Tree, ParseSkip> {
        let mut parser = Parser::new();
        parser.set_language(&self.language).map_err(|e| ParseSkip {
            reason: e.to_string(),
        })?;
        let tree = parser.parse(source, None).ok_or_else(|| ParseSkip {
            reason: "parser produced no tree".to_string(),
        })?;

        let root = tree.root_node();
        if root.has_error() {
            return Err(ParseSkip {
                reason: format!(
                    "syntax error near line {}",
                    first_error(root).map_or(1, |node| node.start_position().row + 1)
                ),
            });
        }
        Ok(tree)
    }

    fn first_assignment(&self, tree: &Tree, source: &str, name: &str) -> Option<Assignment> {
        let value = find_assigned_value(tree.root_node(), source.as_bytes(), name)?;
        Some(Assignment {
            span: span_of(value),
            literal: evaluate(value, source.as_bytes()),
        })
    }

    fn literal(&self, value: &Value) -> String {
        literal(value)
    }

    fn replace(&self, tree: &mut Tree, source: &str, span: &SourceSpan, literal: &str) -> String {
        let mut rewritten = String::with_capacity(source.len() + literal.len());
        rewritten.push_str(&source[..span.start_byte]);
        rewritten.push_str(literal);
        rewritten.push_str(&source[span.end_byte..]);

        // Literals never contain a raw newline.
        tree.edit(&InputEdit {
            start_byte: span.start_byte,
            old_end_byte: span.end_byte,
            new_end_byte: span.start_byte + literal.len(),
            start_position: point(span.start),
            old_end_position: point(span.end),
            new_end_position: Point::new(span.start.row, span.start.column + literal.len()),
        });

        rewritten
    }
}

fn point(position: Position) -> Point {
    Point::new(position.row, position.column)
}

fn span_of(node: Node<'_>) -> SourceSpan {
    let start = node.start_position();
    let end = node.end_position();
    SourceSpan {
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
        start: Position {
            row: start.row,
            column: start.column,
        },
        end: Position {
            row: end.row,
            column: end.column,
        },
    }
}

fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error() {
            return first_error(child);
        }
    }
    None
}

/// Pre-order search for the value node of the first `name = ...` at module level.
fn find_assigned_value<'t>(node: Node<'t>, source: &[u8], name: &str) -> Option<Node<'t>> {
    if SCOPE_KINDS.contains(&node.kind()) {
        return None;
    }
    if node.kind() == "assignment" {
        if let Some(value) = assigned_value(node, source, name) {
            return Some(value);
        }
    }

    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if let Some(found) = find_assigned_value(child, source, name) {
            return Some(found);
        }
    }
    None
}

/// Value node of `assignment` if its target is the bare identifier `name`.
///
/// For chained assignments (`a = b = 1`) this is the final right-hand side.
/// Tuple and attribute targets never match.
fn assigned_value<'t>(assignment: Node<'t>, source: &[u8], name: &str) -> Option<Node<'t>> {
    let target = assignment.child_by_field_name("left")?;
    if target.kind() != "identifier" || target.utf8_text(source).ok()? != name {
        return None;
    }

    let mut value = assignment.child_by_field_name("right")?;
    while value.kind() == "assignment" {
        value = value.child_by_field_name("right")?;
    }
    Some(value)
}

// =============================================================================
// Literal evaluation
// =============================================================================

/// Evaluate a literal expression node. Returns `None` for anything that is
/// not a literal.
fn evaluate(node: Node<'_>, source: &[u8]) -> Option<Value> {
    let text = node.utf8_text(source).ok()?;
    match node.kind() {
        "integer" => parse_integer(text),
        "float" => parse_float(text),
        "true" => Some(Value::Bool(true)),
        "false" => Some(Value::Bool(false)),
        "none" => Some(Value::Null),
        "string" => evaluate_string(node, source).map(Value::String),
        "concatenated_string" => {
            let mut joined = String::new();
            for part in expression_children(node) {
                joined.push_str(&evaluate_string(part, source)?);
            }
            Some(Value::String(joined))
        }
        "unary_operator" => {
            let operator = node.child_by_field_name("operator")?.kind();
            let operand = evaluate(node.child_by_field_name("argument")?, source)?;
            match operator {
                "-" => negate(operand),
                "+" => operand.is_number().then_some(operand),
                _ => None,
            }
        }
        "parenthesized_expression" => {
            let mut inner = expression_children(node);
            let value = evaluate(inner.next()?, source)?;
            inner.next().is_none().then_some(value)
        }
        "list" | "tuple" => expression_children(node)
            .map(|item| evaluate(item, source))
            .collect::<Option<Vec<_>>>()
            .map(Value::Array),
        "dictionary" => {
            let mut map = Map::new();
            for pair in expression_children(node) {
                if pair.kind() != "pair" {
                    return None;
                }
                let key = match evaluate(pair.child_by_field_name("key")?, source)? {
                    Value::String(key) => key,
                    _ => return None,
                };
                let value = evaluate(pair.child_by_field_name("value")?, source)?;
                map.insert(key, value);
            }
            Some(Value::Object(map))
        }
        _ => None,
    }
}

/// Named children that are not comments.
fn expression_children<'t>(node: Node<'t>) -> impl Iterator<Item = Node<'t>> {
    let mut cursor = node.walk();
    let children: Vec<Node<'t>> = node
        .named_children(&mut cursor)
        .filter(|child| child.kind() != "comment")
        .collect();
    children.into_iter()
}

fn parse_integer(text: &str) -> Option<Value> {
    let digits = text.replace('_', "");
    let lower = digits.to_ascii_lowercase();
    let (radix, body) = if let Some(hex) = lower.strip_prefix("0x") {
        (16, hex)
    } else if let Some(oct) = lower.strip_prefix("0o") {
        (8, oct)
    } else if let Some(bin) = lower.strip_prefix("0b") {
        (2, bin)
    } else {
        (10, lower.as_str())
    };

    if let Ok(value) = i64::from_str_radix(body, radix) {
        return Some(Value::from(value));
    }
    u64::from_str_radix(body, radix).ok().map(Value::from)
}

fn parse_float(text: &str) -> Option<Value> {
    let value: f64 = text.replace('_', "").parse().ok()?;
    Number::from_f64(value).map(Value::Number)
}

fn negate(value: Value) -> Option<Value> {
    let Value::Number(number) = value else {
        return None;
    };
    if let Some(int) = number.as_i64().filter(|_| !number.is_f64()) {
        return int.checked_neg().map(Value::from);
    }
    if number.as_u64() == Some(i64::MIN.unsigned_abs()) {
        return Some(Value::from(i64::MIN));
    }
    if number.is_f64() {
        return number.as_f64().and_then(|f| Number::from_f64(-f)).map(Value::Number);
    }
    None
}

/// Evaluate a single `string` node. f-strings and bytes are not literals.
fn evaluate_string(node: Node<'_>, source: &[u8]) -> Option<String> {
    if node.kind() != "string" || node.child_count() < 2 {
        return None;
    }
    let start = node.child(0)?;
    let end = node.child(node.child_count() - 1)?;
    if start.kind() != "string_start" || end.kind() != "string_end" {
        return None;
    }

    let opening = start.utf8_text(source).ok()?;
    let prefix: String = opening
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if prefix.contains('f') || prefix.contains('b') || prefix.contains('t') {
        return None;
    }

    let body = std::str::from_utf8(source.get(start.end_byte()..end.start_byte())?).ok()?;
    if prefix.contains('r') {
        Some(body.to_string())
    } else {
        unescape(body)
    }
}

/// Decode Python string escape sequences.
fn unescape(body: &str) -> Option<String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(escape) = chars.next() else {
            out.push('\\');
            break;
        };
        match escape {
            '\n' => {}
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'v' => out.push('\x0b'),
            'x' => out.push(hex_char(&mut chars, 2)?),
            'u' => out.push(hex_char(&mut chars, 4)?),
            'U' => out.push(hex_char(&mut chars, 8)?),
            '0'..='7' => {
                let mut code = escape.to_digit(8)?;
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(digit) => {
                            code = code * 8 + digit;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(code)?);
            }
            // \N{NAME} needs the Unicode name database.
            'N' => return None,
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }

    Some(out)
}

fn hex_char(chars: &mut impl Iterator<Item = char>, len: usize) -> Option<char> {
    let digits: String = chars.take(len).collect();
    if digits.len() != len {
        return None;
    }
    char::from_u32(u32::from_str_radix(&digits, 16).ok()?)
}

// =============================================================================
// Literal rendering
// =============================================================================

fn literal(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        // Floats print in shortest round-trip form and always keep a `.` or exponent.
        Value::Number(number) => number.to_string(),
        Value::String(text) => quote(text),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(literal).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Object(map) => {
            let pairs: Vec<String> = map
                .iter()
                .map(|(key, value)| format!("{}: {}", quote(key), literal(value)))
                .collect();
            format!("{{{}}}", pairs.join(", "))
        }
    }
}

fn quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            c if c.is_control() && (c as u32) < 0x100 => {
                quoted.push_str(&format!("\\x{:02x}", c as u32));
            }
            c if c.is_control() => quoted.push_str(&format!("\\u{:04x}", c as u32)),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn python() -> Python {
        Python::new().unwrap()
    }

    fn value_of(source: &str, name: &str) -> Option<Option<Value>> {
        let py = python();
        let tree = py.parse(source).ok()?;
        py.first_assignment(&tree, source, name)
            .map(|assignment| assignment.literal)
    }

    #[test]
    fn test_literal_shapes() {
        assert_eq!(value_of("x = 4", "x"), Some(Some(json!(4))));
        assert_eq!(value_of("x = -4", "x"), Some(Some(json!(-4))));
        assert_eq!(value_of("x = 0x_ff", "x"), Some(Some(json!(255))));
        assert_eq!(value_of("x = 0o17", "x"), Some(Some(json!(15))));
        assert_eq!(value_of("x = 0b101", "x"), Some(Some(json!(5))));
        assert_eq!(value_of("x = 1_000_000", "x"), Some(Some(json!(1_000_000))));
        assert_eq!(value_of("x = 1.5e3", "x"), Some(Some(json!(1500.0))));
        assert_eq!(value_of("x = True", "x"), Some(Some(json!(true))));
        assert_eq!(value_of("x = None", "x"), Some(Some(json!(null))));
        assert_eq!(value_of("x = (1, 'a')", "x"), Some(Some(json!([1, "a"]))));
        assert_eq!(value_of("x = (3)", "x"), Some(Some(json!(3))));
        assert_eq!(
            value_of("x = {'a': [1, 2], \"b\": None}", "x"),
            Some(Some(json!({"a": [1, 2], "b": null})))
        );
        assert_eq!(
            value_of("x = [\n    1,  # first\n    2,\n]", "x"),
            Some(Some(json!([1, 2])))
        );
    }

    #[test]
    fn test_string_literals() {
        assert_eq!(value_of("s = 'single'", "s"), Some(Some(json!("single"))));
        assert_eq!(value_of("s = \"a\\tb\\n\"", "s"), Some(Some(json!("a\tb\n"))));
        assert_eq!(value_of("s = r'C:\\temp'", "s"), Some(Some(json!("C:\\temp"))));
        assert_eq!(value_of("s = '\\x41\\u00e9'", "s"), Some(Some(json!("Aé"))));
        assert_eq!(value_of("s = 'ab' 'cd'", "s"), Some(Some(json!("abcd"))));
        assert_eq!(
            value_of("s = \"\"\"multi\nline\"\"\"", "s"),
            Some(Some(json!("multi\nline")))
        );
        assert_eq!(value_of("s = f'{x}'", "s"), Some(None));
        assert_eq!(value_of("s = b'bytes'", "s"), Some(None));
    }

    #[test]
    fn test_non_literals() {
        assert_eq!(value_of("x = compute()", "x"), Some(None));
        assert_eq!(value_of("x = 1 + 2", "x"), Some(None));
        assert_eq!(value_of("x = {1: 'a'}", "x"), Some(None));
        assert_eq!(value_of("x = [y]", "x"), Some(None));
    }

    #[test]
    fn test_only_bare_module_level_targets_match() {
        assert_eq!(value_of("x, y = 1, 2", "x"), None);
        assert_eq!(value_of("(x) , = [1]", "x"), None);
        assert_eq!(value_of("obj.x = 1", "x"), None);
        assert_eq!(value_of("x += 1", "x"), None);
        assert_eq!(value_of("f(x=1)", "x"), None);
        assert_eq!(value_of("def f():\n    x = 1\n", "x"), None);
        assert_eq!(value_of("class C:\n    x = 1\n", "x"), None);
        assert_eq!(value_of("g = lambda: 1\n", "x"), None);
    }

    #[test]
    fn test_first_occurrence_in_source_order() {
        let source = "if flag:\n    x = 1\nelse:\n    x = 2\nx = 3\n";
        assert_eq!(value_of(source, "x"), Some(Some(json!(1))));

        let source = "def f():\n    x = 0\nx = 9\n";
        assert_eq!(value_of(source, "x"), Some(Some(json!(9))));
    }

    #[test]
    fn test_chained_and_annotated_assignments() {
        assert_eq!(value_of("a = b = 7", "a"), Some(Some(json!(7))));
        assert_eq!(value_of("a = b = 7", "b"), Some(Some(json!(7))));
        assert_eq!(value_of("rate: float = 0.5", "rate"), Some(Some(json!(0.5))));
        assert_eq!(value_of("rate: float\nrate = 1.5", "rate"), Some(Some(json!(1.5))));
    }

    #[test]
    fn test_magic_lines_fail_to_parse() {
        let py = python();
        assert!(py.parse("%matplotlib inline\nx = 1").is_err());
        assert!(py.parse("!pip install numpy").is_err());
        assert!(py.parse("x = 1\nprint(x)\n").is_ok());
    }

    #[test]
    fn test_replace_keeps_surrounding_code() {
        let py = python();
        let source = "import os\nalpha = 0.1  # learning rate\nbeta = alpha * 2\n";
        let mut tree = py.parse(source).unwrap();
        let assignment = py.first_assignment(&tree, source, "alpha").unwrap();
        let rewritten = py.replace(&mut tree, source, &assignment.span, &py.literal(&json!(0.25)));

        assert_eq!(
            rewritten,
            "import os\nalpha = 0.25  # learning rate\nbeta = alpha * 2\n"
        );
        assert!(py.parse(&rewritten).is_ok());
    }

    #[test]
    fn test_render_literals() {
        assert_eq!(literal(&json!(null)), "None");
        assert_eq!(literal(&json!(false)), "False");
        assert_eq!(literal(&json!(3)), "3");
        assert_eq!(literal(&json!(3.0)), "3.0");
        assert_eq!(literal(&json!("say \"hi\"\n")), "\"say \\\"hi\\\"\\n\"");
        assert_eq!(literal(&json!("\u{1}")), "\"\\x01\"");
        assert_eq!(literal(&json!([1, [true, null]])), "[1, [True, None]]");
        assert_eq!(literal(&json!({"k": "v"})), "{\"k\": \"v\"}");
    }
}
