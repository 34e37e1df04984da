use std::fmt;
use std::sync::Arc;

/// A per-user variable value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(Arc<str>),
}

impl Value {
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I64(v) => Some(*v),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(Arc::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Variables owned by one virtual user.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    vars: ahash::AHashMap<Arc<str>, Value>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn set(&mut self, name: impl Into<Arc<str>>, value: impl Into<Value>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.remove(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Variables sorted by name.
    pub fn sorted(&self) -> Vec<(&str, &Value)> {
        let mut out: Vec<(&str, &Value)> = self.vars.iter().map(|(k, v)| (&**k, v)).collect();
        out.sort_by(|a, b| a.0.cmp(b.0));
        out
    }

    /// Replaces `${name}` references with variable values.
    ///
    /// Unknown names and unterminated references are kept verbatim.
    pub fn substitute(&self, input: &str) -> String {
        if !input.contains("${") {
            return input.to_string();
        }

        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                out.push_str(&rest[start..]);
                return out;
            };

            let name = &after[..end];
            match self.vars.get(name) {
                Some(v) => out.push_str(&v.to_string()),
                None => {
                    out.push_str("${");
                    out.push_str(name);
                    out.push('}');
                }
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        out
    }

    /// Like [`Variables::substitute`] but avoids allocating when nothing is referenced.
    pub fn substitute_arc(&self, input: &Arc<str>) -> Arc<str> {
        if input.contains("${") {
            Arc::from(self.substitute(input))
        } else {
            input.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_replaces_known_names() {
        let mut vars = Variables::new();
        vars.set("user", "alice");
        vars.set("n", 3i64);

        assert_eq!(vars.substitute("hello ${user} #${n}"), "hello alice #3");
        assert_eq!(vars.substitute("plain"), "plain");
    }

    #[test]
    fn substitute_keeps_unknown_and_unterminated() {
        let vars = Variables::new();
        assert_eq!(vars.substitute("a ${missing} b"), "a ${missing} b");
        assert_eq!(vars.substitute("a ${open"), "a ${open");
    }

    #[test]
    fn value_parses_integers_from_strings() {
        assert_eq!(Value::from(" 42 ").as_i64(), Some(42));
        assert_eq!(Value::Bool(true).as_i64(), None);
    }
}
