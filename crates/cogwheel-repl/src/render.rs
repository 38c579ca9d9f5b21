//! Inspect-style rendering of script results
//!
//! Output follows the shape of Node's `util.inspect`: strings nested in
//! containers are single-quoted, objects deeper than `max_depth` collapse to
//! `[Object]` / `[Array]`, and long containers end with `... N more items`.

use cogwheel_core::ReplConfig;
use rquickjs::convert::Coerced;
use rquickjs::{Array, Object, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Inspector {
    pub max_depth: usize,
    pub max_items: usize,
    pub max_chars: usize,
}

impl Default for Inspector {
    fn default() -> Self {
        Self { max_depth: 2, max_items: 100, max_chars: 4000 }
    }
}

impl From<&ReplConfig> for Inspector {
    fn from(config: &ReplConfig) -> Self {
        Self { max_depth: config.max_depth, max_items: config.max_items, max_chars: config.max_chars }
    }
}

impl Inspector {
    /// Top-level rendering: absent values are `undefined`, strings are verbatim.
    pub fn render(&self, value: &Value<'_>) -> String {
        let text = match value.as_string() {
            Some(s) => s.to_string().unwrap_or_default(),
            None => self.inspect(value, 0),
        };
        self.truncate(text)
    }

    fn truncate(&self, text: String) -> String {
        if text.chars().count() <= self.max_chars {
            return text;
        }
        let mut cut: String = text.chars().take(self.max_chars).collect();
        cut.push_str("...");
        cut
    }

    fn inspect(&self, value: &Value<'_>, depth: usize) -> String {
        if value.is_undefined() {
            return "undefined".into();
        }
        if value.is_null() {
            return "null".into();
        }
        if let Some(b) = value.as_bool() {
            return b.to_string();
        }
        if let Some(n) = value.as_number() {
            return format_number(n);
        }
        if let Some(s) = value.as_string() {
            return quote(&s.to_string().unwrap_or_default());
        }
        if let Some(f) = value.as_function() {
            let name = f.get::<_, Option<String>>("name").ok().flatten();
            return match name.filter(|n| !n.is_empty()) {
                Some(name) => format!("[Function: {}]", name),
                None => "[Function (anonymous)]".into(),
            };
        }
        if let Some(array) = value.as_array() {
            if depth > self.max_depth {
                return "[Array]".into();
            }
            return self.inspect_array(array, depth);
        }
        if let Some(object) = value.as_object() {
            if let Some(error) = error_summary(object) {
                return error;
            }
            if depth > self.max_depth {
                return "[Object]".into();
            }
            return self.inspect_object(object, depth);
        }

        value
            .get::<Coerced<String>>()
            .map(|c| c.0)
            .unwrap_or_else(|_| format!("[{:?}]", value.type_of()))
    }

    fn inspect_array(&self, array: &Array<'_>, depth: usize) -> String {
        let len = array.len();
        if len == 0 {
            return "[]".into();
        }

        let mut parts: Vec<String> = (0..len.min(self.max_items))
            .map(|i| match array.get::<Value>(i) {
                Ok(item) => self.inspect(&item, depth + 1),
                Err(_) => "<error>".into(),
            })
            .collect();
        if len > self.max_items {
            parts.push(more_items(len - self.max_items));
        }
        format!("[ {} ]", parts.join(", "))
    }

    fn inspect_object(&self, object: &Object<'_>, depth: usize) -> String {
        let keys: Vec<String> = object.keys::<String>().filter_map(Result::ok).collect();
        let prefix = match constructor_name(object) {
            Some(name) if name != "Object" => format!("{} ", name),
            _ => String::new(),
        };
        if keys.is_empty() {
            return format!("{}{{}}", prefix);
        }

        let mut parts: Vec<String> = keys
            .iter()
            .take(self.max_items)
            .map(|key| {
                let rendered = match object.get::<_, Value>(key.as_str()) {
                    Ok(v) => self.inspect(&v, depth + 1),
                    Err(_) => "<error>".into(),
                };
                format!("{}: {}", format_key(key), rendered)
            })
            .collect();
        if keys.len() > self.max_items {
            parts.push(more_items(keys.len() - self.max_items));
        }
        format!("{}{{ {} }}", prefix, parts.join(", "))
    }
}

fn more_items(n: usize) -> String {
    if n == 1 {
        "... 1 more item".into()
    } else {
        format!("... {} more items", n)
    }
}

fn constructor_name(object: &Object<'_>) -> Option<String> {
    let ctor: Object = object.get("constructor").ok()?;
    ctor.get::<_, Option<String>>("name").ok().flatten()
}

/// `Name: message` for Error instances, whose fields are not enumerable.
fn error_summary(object: &Object<'_>) -> Option<String> {
    let name = constructor_name(object)?;
    if !name.ends_with("Error") {
        return None;
    }
    let message: String = object.get::<_, Option<String>>("message").ok().flatten()?;
    Some(if message.is_empty() { name } else { format!("{}: {}", name, message) })
}

/// Number formatting the way JS prints it.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".into()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.into()
    } else if n == 0.0 && n.is_sign_negative() {
        "-0".into()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'").replace('\n', "\\n"))
}

fn format_key(key: &str) -> String {
    let mut chars = key.chars();
    let identifier = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if identifier {
        key.to_string()
    } else {
        quote(key)
    }
}
