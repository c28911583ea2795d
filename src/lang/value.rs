/// Runtime value on the operand stack.
///
/// Numbers and strings are value types; arrays are plain vectors of values.
/// There are no shared heap objects and nothing can form a cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// 64-bit signed integer.
    Int(i64),

    /// UTF-8 string value.
    Str(String),

    /// Array value: `[1, 2, 3]`.
    Array(Vec<Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "integer",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
        }
    }
}

impl std::fmt::Display for Value {
    /// Format a value in its natural output representation: decimal for
    /// integers, the raw text for strings, `[a, b, c]` for arrays.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{}", s),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}
