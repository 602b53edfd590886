//! Printing of runtime values in `write` style.

use std::fmt::{self, Display, Formatter, Write};

use super::value::{RegexpKind, Value};

const WRITE_STRING_ESCAPE_CODES: [char; 8] = ['\u{7}', '\u{8}', '\t', '\n', '\u{b}', '\u{c}', '\r', '\\'];
const WRITE_STRING_ESCAPE_NAMES: [&str; 8] = ["a", "b", "t", "n", "v", "f", "r", "\\"];

fn write_string(f: &mut Formatter<'_>, s: &str) -> fmt::Result {
    f.write_char('"')?;
    for c in s.chars() {
        if c == '"' {
            f.write_str("\\\"")?;
        } else if let Some(i) = WRITE_STRING_ESCAPE_CODES.iter().position(|&code| code == c) {
            write!(f, "\\{}", WRITE_STRING_ESCAPE_NAMES[i])?;
        } else {
            f.write_char(c)?;
        }
    }
    f.write_char('"')
}

fn write_char(f: &mut Formatter<'_>, c: char) -> fmt::Result {
    match c {
        ' ' => f.write_str("#\\space"),
        '\n' => f.write_str("#\\newline"),
        '\t' => f.write_str("#\\tab"),
        '\0' => f.write_str("#\\nul"),
        c => write!(f, "#\\{}", c),
    }
}

fn write_bytes(f: &mut Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    f.write_str("#\"")?;
    for &b in bytes {
        if (b.is_ascii_graphic() && b != b'"' && b != b'\\') || b == b' ' {
            f.write_char(b as char)?;
        } else {
            write!(f, "\\{:o}", b)?;
        }
    }
    f.write_char('"')
}

fn write_list(f: &mut Formatter<'_>, first: &Value, rest: &Value) -> fmt::Result {
    write!(f, "({}", first)?;
    let mut cur = rest.clone();
    loop {
        match cur {
            Value::Null => break,
            Value::Pair(pair) => {
                write!(f, " {}", pair.0)?;
                cur = pair.1.clone();
            }
            tail => {
                write!(f, " . {}", tail)?;
                break;
            }
        }
    }
    f.write_char(')')
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => f.write_str("#<void>"),
            Value::Undefined => f.write_str("#<undefined>"),
            Value::Null => f.write_str("()"),
            Value::Bool(true) => f.write_str("#t"),
            Value::Bool(false) => f.write_str("#f"),
            Value::Number(n) => write!(f, "{}", n),
            Value::Char(c) => write_char(f, *c),
            Value::String(s) => write_string(f, s),
            Value::Bytes(b) => write_bytes(f, b),
            Value::Symbol(s) => write!(f, "{}", s),
            Value::Keyword(k) => write!(f, "#:{}", k),
            Value::Path(p) => write!(f, "#<path:{}>", p),
            Value::Pair(pair) => write_list(f, &pair.0, &pair.1),
            Value::Vector(v) => {
                f.write_str("#(")?;
                for (i, x) in v.borrow().iter().enumerate() {
                    if i > 0 {
                        f.write_char(' ')?;
                    }
                    write!(f, "{}", x)?;
                }
                f.write_char(')')
            }
            Value::Box(b) => write!(f, "#&{}", b.borrow()),
            Value::Hash(entries) => {
                f.write_str("#hash(")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_char(' ')?;
                    }
                    write!(f, "({} . {})", k, v)?;
                }
                f.write_char(')')
            }
            Value::Prefab(s) => {
                write!(f, "#s({}", s.key)?;
                for field in &s.fields {
                    write!(f, " {}", field)?;
                }
                f.write_char(')')
            }
            Value::Regexp(r) => {
                let prefix = match r.kind {
                    RegexpKind::Regexp => "#rx",
                    RegexpKind::ByteRegexp => "#rx#",
                    RegexpKind::Pregexp => "#px",
                    RegexpKind::BytePregexp => "#px#",
                };
                f.write_str(prefix)?;
                write_string(f, &r.source)
            }
            Value::Cell(c) => write!(f, "#<cell:{}>", c.get()),
            Value::Closure(env) => match env.code().and_then(|code| code.srcloc.clone()) {
                Some(loc) => write!(f, "#<procedure:{}>", loc),
                None => f.write_str("#<procedure>"),
            },
            Value::Primitive(p) => write!(f, "#<procedure:{}>", p.name),
            Value::Continuation(_) => f.write_str("#<continuation>"),
            Value::Values(values) => {
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_char('\n')?;
                    }
                    write!(f, "{}", v)?;
                }
                Ok(())
            }
            Value::VariableReference(r) => match &r.variable {
                Some(var) => write!(f, "#<variable-reference:{}>", var),
                None => f.write_str("#<variable-reference>"),
            },
        }
    }
}

/// `display` style rendering: strings and chars without quoting.
pub fn display_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_string(),
        Value::Char(c) => c.to_string(),
        Value::Symbol(s) | Value::Keyword(s) => s.to_string(),
        Value::Path(p) => p.to_string(),
        other => other.to_string(),
    }
}
