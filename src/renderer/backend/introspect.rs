//! Source-level reflection for the recording backend: a small GLSL preprocessor plus a
//! declaration scanner that reports uniforms and vertex inputs the way a driver's
//! active-variable queries do (struct arrays flattened to `name[i].member`).

use std::collections::HashMap;

use super::{ActiveVariable, GlslType};

#[derive(Default)]
struct Macros {
    values: HashMap<String, String>,
}

impl Macros {
    fn is_defined(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    fn int_value(&self, token: &str) -> i64 {
        if let Ok(value) = token.parse::<i64>() {
            return value;
        }
        match self.values.get(token) {
            Some(value) => value
                .trim()
                .trim_end_matches('u')
                .parse::<f64>()
                .map(|v| v as i64)
                .unwrap_or(0),
            None => 0,
        }
    }
}

struct Frame {
    parent_active: bool,
    taken: bool,
    active: bool,
}

/// Runs the conditional-compilation subset of the GLSL preprocessor and returns the
/// surviving lines along with the final macro table.
fn preprocess(source: &str) -> (String, Macros) {
    let mut macros = Macros::default();
    let mut stack: Vec<Frame> = Vec::new();
    let mut out = String::with_capacity(source.len());

    for raw in source.lines() {
        let line = raw.trim();
        let active = stack.last().map(|f| f.active).unwrap_or(true);

        if let Some(directive) = line.strip_prefix('#') {
            let directive = directive.trim_start();
            let (keyword, rest) = directive
                .split_once(char::is_whitespace)
                .map(|(k, r)| (k, r.trim()))
                .unwrap_or((directive, ""));
            match keyword {
                "ifdef" | "ifndef" | "if" => {
                    let condition = match keyword {
                        "ifdef" => macros.is_defined(rest),
                        "ifndef" => !macros.is_defined(rest),
                        _ => evaluate(rest, &macros),
                    };
                    let now = active && condition;
                    stack.push(Frame {
                        parent_active: active,
                        taken: now,
                        active: now,
                    });
                }
                "elif" => {
                    if let Some(frame) = stack.last_mut() {
                        let now = frame.parent_active && !frame.taken && evaluate(rest, &macros);
                        frame.taken |= now;
                        frame.active = now;
                    }
                }
                "else" => {
                    if let Some(frame) = stack.last_mut() {
                        frame.active = frame.parent_active && !frame.taken;
                        frame.taken = true;
                    }
                }
                "endif" => {
                    stack.pop();
                }
                "define" if active => {
                    let name_end = rest
                        .find(|c: char| c.is_whitespace() || c == '(')
                        .unwrap_or(rest.len());
                    let name = &rest[..name_end];
                    let value = if rest[name_end..].starts_with('(') {
                        "1"
                    } else {
                        rest[name_end..].trim()
                    };
                    macros.values.insert(name.to_string(), value.to_string());
                }
                "undef" if active => {
                    macros.values.remove(rest);
                }
                _ => {}
            }
            continue;
        }

        if active {
            out.push_str(raw);
            out.push('\n');
        }
    }

    (out, macros)
}

fn tokenize(expression: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = expression.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_alphanumeric() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                i += 1;
            }
            tokens.push(chars[start..i].iter().collect());
        } else {
            let pair: String = chars[i..(i + 2).min(chars.len())].iter().collect();
            if matches!(pair.as_str(), "&&" | "||" | "==" | "!=" | ">=" | "<=") {
                tokens.push(pair);
                i += 2;
            } else {
                tokens.push(c.to_string());
                i += 1;
            }
        }
    }
    tokens
}

struct Parser<'a> {
    tokens: Vec<String>,
    pos: usize,
    macros: &'a Macros,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn next(&mut self) -> Option<String> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn or(&mut self) -> i64 {
        let mut value = self.and();
        while self.peek() == Some("||") {
            self.pos += 1;
            let rhs = self.and();
            value = ((value != 0) || (rhs != 0)) as i64;
        }
        value
    }

    fn and(&mut self) -> i64 {
        let mut value = self.comparison();
        while self.peek() == Some("&&") {
            self.pos += 1;
            let rhs = self.comparison();
            value = ((value != 0) && (rhs != 0)) as i64;
        }
        value
    }

    fn comparison(&mut self) -> i64 {
        let lhs = self.unary();
        let op = match self.peek() {
            Some(op @ (">" | "<" | ">=" | "<=" | "==" | "!=")) => op.to_string(),
            _ => return lhs,
        };
        self.pos += 1;
        let rhs = self.unary();
        let result = match op.as_str() {
            ">" => lhs > rhs,
            "<" => lhs < rhs,
            ">=" => lhs >= rhs,
            "<=" => lhs <= rhs,
            "==" => lhs == rhs,
            _ => lhs != rhs,
        };
        result as i64
    }

    fn unary(&mut self) -> i64 {
        if self.peek() == Some("!") {
            self.pos += 1;
            return (self.unary() == 0) as i64;
        }
        self.primary()
    }

    fn primary(&mut self) -> i64 {
        let Some(token) = self.next() else {
            return 0;
        };
        match token.as_str() {
            "(" => {
                let value = self.or();
                if self.peek() == Some(")") {
                    self.pos += 1;
                }
                value
            }
            "defined" => {
                let parenthesized = self.peek() == Some("(");
                if parenthesized {
                    self.pos += 1;
                }
                let name = self.next().unwrap_or_default();
                if parenthesized && self.peek() == Some(")") {
                    self.pos += 1;
                }
                self.macros.is_defined(&name) as i64
            }
            other => self.macros.int_value(other),
        }
    }
}

fn evaluate(expression: &str, macros: &Macros) -> bool {
    let mut parser = Parser {
        tokens: tokenize(expression),
        pos: 0,
        macros,
    };
    parser.or() != 0
}

fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    loop {
        let line = rest.find("//");
        let block = rest.find("/*");
        match (line, block) {
            (Some(l), b) if b.map_or(true, |b| l < b) => {
                out.push_str(&rest[..l]);
                rest = match rest[l..].find('\n') {
                    Some(end) => &rest[l + end..],
                    None => "",
                };
            }
            (_, Some(b)) => {
                out.push_str(&rest[..b]);
                rest = match rest[b + 2..].find("*/") {
                    Some(end) => &rest[b + 2 + end + 2..],
                    None => "",
                };
            }
            _ => {
                out.push_str(rest);
                break;
            }
        }
    }
    out
}

struct Declaration {
    ty: String,
    name: String,
    array: Option<u32>,
}

/// Parses `type name`, `type name[N]` or `type name[ N ]` (qualifiers already removed).
fn parse_declaration(tokens: &[&str], macros: &Macros) -> Option<Declaration> {
    let joined = tokens.join(" ");
    let (head, array) = match joined.find('[') {
        Some(open) => {
            let close = joined.rfind(']')?;
            let size = joined[open + 1..close].trim();
            (joined[..open].trim().to_string(), Some(macros.int_value(size).max(0) as u32))
        }
        None => (joined.trim().to_string(), None),
    };
    let mut parts = head.split_whitespace();
    let ty = parts.next()?.to_string();
    let name = parts.next()?.to_string();
    Some(Declaration { ty, name, array })
}

const PRECISIONS: [&str; 3] = ["highp", "mediump", "lowp"];
const INTERPOLATION: [&str; 3] = ["flat", "smooth", "centroid"];

fn statement_tokens(statement: &str) -> Vec<&str> {
    statement
        .split_whitespace()
        .filter(|t| !PRECISIONS.contains(t) && !INTERPOLATION.contains(t))
        .collect()
}

/// Top-level statements (brace depth zero) plus the bodies of struct declarations.
fn scan(source: &str) -> (Vec<String>, HashMap<String, Vec<String>>) {
    let mut statements = Vec::new();
    let mut structs = HashMap::new();
    let mut depth = 0usize;
    let mut current = String::new();
    let mut struct_name: Option<String> = None;
    let mut struct_body = String::new();

    for c in source.chars() {
        match c {
            '{' => {
                if depth == 0 {
                    let header = current.trim();
                    if let Some(name) = header.strip_prefix("struct") {
                        struct_name = Some(name.trim().to_string());
                        struct_body.clear();
                    }
                    current.clear();
                }
                depth += 1;
            }
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    if let Some(name) = struct_name.take() {
                        let members = struct_body
                            .split(';')
                            .map(|m| m.trim().to_string())
                            .filter(|m| !m.is_empty())
                            .collect();
                        structs.insert(name, members);
                    }
                    current.clear();
                }
            }
            ';' if depth == 0 => {
                let statement = current.trim();
                if !statement.is_empty() {
                    statements.push(statement.to_string());
                }
                current.clear();
            }
            _ if depth == 0 => current.push(c),
            _ if depth == 1 && struct_name.is_some() => struct_body.push(c),
            _ => {}
        }
    }
    (statements, structs)
}

fn push_variable(out: &mut Vec<ActiveVariable>, name: String, ty: &str, array: Option<u32>) {
    let Some(ty) = GlslType::from_name(ty) else {
        return;
    };
    if out.iter().any(|v| v.name == name || v.name == format!("{name}[0]")) {
        return;
    }
    match array {
        Some(size) if size > 0 => out.push(ActiveVariable {
            name: format!("{name}[0]"),
            size: size as i32,
            ty,
        }),
        Some(_) => {}
        None => out.push(ActiveVariable { name, size: 1, ty }),
    }
}

fn expand_uniform(
    out: &mut Vec<ActiveVariable>,
    declaration: &Declaration,
    structs: &HashMap<String, Vec<String>>,
    macros: &Macros,
) {
    let Some(members) = structs.get(&declaration.ty) else {
        push_variable(out, declaration.name.clone(), &declaration.ty, declaration.array);
        return;
    };
    let prefixes: Vec<String> = match declaration.array {
        Some(size) => (0..size)
            .map(|i| format!("{}[{}]", declaration.name, i))
            .collect(),
        None => vec![declaration.name.clone()],
    };
    for prefix in prefixes {
        for member in members {
            let tokens = statement_tokens(member);
            if let Some(field) = parse_declaration(&tokens, macros) {
                push_variable(out, format!("{prefix}.{}", field.name), &field.ty, field.array);
            }
        }
    }
}

/// Active uniforms declared across the given shader stages.
pub(crate) fn uniforms(sources: &[&str]) -> Vec<ActiveVariable> {
    let mut out = Vec::new();
    for source in sources {
        let (code, macros) = preprocess(&strip_comments(source));
        let (statements, structs) = scan(&code);
        for statement in statements {
            let tokens = statement_tokens(&statement);
            if tokens.first() != Some(&"uniform") {
                continue;
            }
            if let Some(declaration) = parse_declaration(&tokens[1..], &macros) {
                expand_uniform(&mut out, &declaration, &structs, &macros);
            }
        }
    }
    out
}

/// Vertex inputs in declaration order.
pub(crate) fn attributes(vertex_source: &str) -> Vec<ActiveVariable> {
    let mut out = Vec::new();
    let (code, macros) = preprocess(&strip_comments(vertex_source));
    let (statements, _) = scan(&code);
    for statement in statements {
        let tokens = statement_tokens(&statement);
        let rest = match tokens.first() {
            Some(&"in") | Some(&"attribute") => &tokens[1..],
            _ => continue,
        };
        if let Some(declaration) = parse_declaration(rest, &macros) {
            push_variable(&mut out, declaration.name, &declaration.ty, declaration.array);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
#define NUM_LIGHTS 2
#define USE_MAP
struct Light {
    vec3 direction;
    vec3 color;
};
uniform Light lights[ NUM_LIGHTS ];
uniform mat4 modelMatrix; // object
#ifdef USE_MAP
uniform sampler2D map;
#endif
#if defined( USE_FOG ) || NUM_LIGHTS > 3
uniform vec3 fogColor;
#else
uniform float fallback;
#endif
/* uniform float commented; */
in vec3 position;
#ifdef USE_COLOR
in vec3 color;
#endif
void main() { float x = 1.0; }
"#;

    #[test]
    fn conditional_blocks_are_honoured() {
        let names: Vec<String> = uniforms(&[SOURCE]).into_iter().map(|v| v.name).collect();
        assert!(names.contains(&"map".to_string()));
        assert!(names.contains(&"fallback".to_string()));
        assert!(!names.contains(&"fogColor".to_string()));
        assert!(!names.contains(&"commented".to_string()));
    }

    #[test]
    fn struct_arrays_are_flattened() {
        let names: Vec<String> = uniforms(&[SOURCE]).into_iter().map(|v| v.name).collect();
        assert!(names.contains(&"lights[0].direction".to_string()));
        assert!(names.contains(&"lights[1].color".to_string()));
        assert!(!names.contains(&"lights[2].color".to_string()));
    }

    #[test]
    fn attributes_skip_inactive_inputs() {
        let attributes = attributes(SOURCE);
        assert_eq!(attributes.len(), 1);
        assert_eq!(attributes[0].name, "position");
        assert_eq!(attributes[0].ty, GlslType::Vec3);
    }

    #[test]
    fn primitive_arrays_report_first_element() {
        let vars = uniforms(&["#define MAX 4\nuniform mat4 bones[ MAX ];\n"]);
        assert_eq!(vars[0].name, "bones[0]");
        assert_eq!(vars[0].size, 4);
    }
}
