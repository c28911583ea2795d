#[derive(Debug, Clone)]
pub enum CompileError {
    /// A tree tag outside the supported node schema.
    UnknownNodeKind { kind: String },

    /// A node that decoded fine but cannot appear where it did.
    InvalidNode { kind: String, reason: String },

    /// A function body whose last lowered instruction is not a return.
    /// Falling through the end of a function is not given a meaning, so the
    /// lowering rejects it instead of leaving it to the interpreter.
    MissingReturn { function: String },

    /// `break` with no enclosing loop.
    BreakOutsideLoop,

    /// `next` with no enclosing loop.
    NextOutsideLoop,
}

impl CompileError {
    pub fn unknown_node(kind: impl Into<String>) -> Self {
        CompileError::UnknownNodeKind { kind: kind.into() }
    }

    pub fn invalid_node(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        CompileError::InvalidNode {
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    pub fn missing_return(function: impl Into<String>) -> Self {
        CompileError::MissingReturn {
            function: function.into(),
        }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::UnknownNodeKind { kind } => {
                write!(f, "compile error: unknown node kind '{}'", kind)
            }
            CompileError::InvalidNode { kind, reason } => {
                write!(f, "compile error: '{}' node: {}", kind, reason)
            }
            CompileError::MissingReturn { function } => {
                write!(
                    f,
                    "compile error: function '{}' does not end with a return",
                    function
                )?;
                write!(f, "\n  hint: every function body must finish with an explicit return")
            }
            CompileError::BreakOutsideLoop => {
                write!(f, "compile error: 'break' outside of a loop")
            }
            CompileError::NextOutsideLoop => {
                write!(f, "compile error: 'next' outside of a loop")
            }
        }
    }
}

impl std::error::Error for CompileError {}
