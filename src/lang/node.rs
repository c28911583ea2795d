use serde_json::Value as Json;

/// Syntax tree node for the compiled language subset.
///
/// The tree is produced by an external front end and handed to us as JSON
/// with a `type` discriminator per node (the Prism field layout). Nodes are
/// immutable once decoded and owned exclusively by the lowering pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Whole program: a single statement list.
    Program { statements: Box<Node> },

    /// Ordered statement list.
    Statements { body: Vec<Node> },

    /// Method/operator call. The receiver is absent for bare calls like
    /// `puts(x)`; arguments are already flattened out of their
    /// `arguments_node` wrapper.
    Call {
        receiver: Option<Box<Node>>,
        name: String,
        arguments: Vec<Node>,
    },

    /// Standalone argument list (only seen nested under calls in practice).
    Arguments { arguments: Vec<Node> },

    /// Integer literal.
    Integer { value: i64 },

    /// String literal, already unescaped by the front end.
    Str { value: String },

    /// `x = expr`
    LocalVariableWrite { name: String, value: Box<Node> },

    /// `x`
    LocalVariableRead { name: String },

    /// Binding occurrence of a variable (for-loop index).
    LocalVariableTarget { name: String },

    /// `if predicate ... end` (no else branch in the subset).
    If {
        predicate: Box<Node>,
        statements: Box<Node>,
    },

    /// `for i in collection ... end`; the collection must be a range.
    For {
        index: String,
        collection: Box<Node>,
        statements: Box<Node>,
    },

    /// `left..right`, inclusive on both ends. Not a first-class value.
    Range { left: Box<Node>, right: Box<Node> },

    /// `while predicate ... end`
    While {
        predicate: Box<Node>,
        statements: Box<Node>,
    },

    /// `def name(params) ... end`
    Def {
        name: String,
        params: Vec<String>,
        body: Box<Node>,
    },

    /// `return expr` / bare `return`.
    Return { arguments: Vec<Node> },

    /// `[e1, e2, ...]`
    Array { elements: Vec<Node> },

    /// `break` out of the innermost loop.
    Break,

    /// `next` iteration of the innermost loop.
    Next,

    /// A tag outside the supported schema. Decoding keeps it so the lowering
    /// pass is the stage that rejects it.
    Unknown(String),
}

/// Error for a tree that does not structurally match the node schema
/// (missing or ill-typed fields). Unknown *tags* are not an error here;
/// they decode to [`Node::Unknown`].
#[derive(Debug)]
pub struct NodeError {
    pub message: String,
}

impl NodeError {
    fn new(msg: impl Into<String>) -> Self {
        NodeError {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed tree: {}", self.message)
    }
}

impl std::error::Error for NodeError {}

impl Node {
    /// Decode a serialized tree.
    pub fn from_json_str(src: &str) -> Result<Node, NodeError> {
        let json: Json =
            serde_json::from_str(src).map_err(|e| NodeError::new(format!("invalid JSON: {}", e)))?;
        Node::from_json(&json)
    }

    /// Decode one node from its JSON form, recursively.
    pub fn from_json(json: &Json) -> Result<Node, NodeError> {
        let obj = json
            .as_object()
            .ok_or_else(|| NodeError::new("node is not a JSON object"))?;
        let tag = obj
            .get("type")
            .and_then(Json::as_str)
            .ok_or_else(|| NodeError::new("node has no 'type' field"))?;

        let node = match tag {
            "program_node" => Node::Program {
                statements: Box::new(field_node(obj, tag, "statements")?),
            },
            "statements_node" => Node::Statements {
                body: field_nodes(obj, tag, "body")?,
            },
            "call_node" => {
                let receiver = match obj.get("receiver") {
                    None | Some(Json::Null) => None,
                    Some(r) => Some(Box::new(Node::from_json(r)?)),
                };
                Node::Call {
                    receiver,
                    name: field_str(obj, tag, "name")?,
                    arguments: argument_list(obj.get("arguments"))?,
                }
            }
            "arguments_node" => Node::Arguments {
                arguments: field_nodes(obj, tag, "arguments")?,
            },
            "integer_node" => Node::Integer {
                value: obj
                    .get("value")
                    .and_then(Json::as_i64)
                    .ok_or_else(|| NodeError::new("integer_node has no integer 'value'"))?,
            },
            "string_node" => Node::Str {
                value: field_str(obj, tag, "unescaped")?,
            },
            "local_variable_write_node" => Node::LocalVariableWrite {
                name: field_str(obj, tag, "name")?,
                value: Box::new(field_node(obj, tag, "value")?),
            },
            "local_variable_read_node" => Node::LocalVariableRead {
                name: field_str(obj, tag, "name")?,
            },
            "local_variable_target_node" => Node::LocalVariableTarget {
                name: field_str(obj, tag, "name")?,
            },
            "if_node" => Node::If {
                predicate: Box::new(field_node(obj, tag, "predicate")?),
                statements: Box::new(field_node(obj, tag, "statements")?),
            },
            "for_node" => {
                let index = obj
                    .get("index")
                    .and_then(Json::as_object)
                    .and_then(|idx| idx.get("name"))
                    .and_then(Json::as_str)
                    .ok_or_else(|| NodeError::new("for_node has no index target name"))?;
                Node::For {
                    index: index.to_string(),
                    collection: Box::new(field_node(obj, tag, "collection")?),
                    statements: Box::new(field_node(obj, tag, "statements")?),
                }
            }
            "range_node" => Node::Range {
                left: Box::new(field_node(obj, tag, "left")?),
                right: Box::new(field_node(obj, tag, "right")?),
            },
            "while_node" => Node::While {
                predicate: Box::new(field_node(obj, tag, "predicate")?),
                statements: Box::new(field_node(obj, tag, "statements")?),
            },
            "def_node" => {
                let params = match obj.get("parameters") {
                    None | Some(Json::Null) => Vec::new(),
                    Some(p) => required_params(p)?,
                };
                let body = match obj.get("body") {
                    None | Some(Json::Null) => Node::Statements { body: Vec::new() },
                    Some(b) => Node::from_json(b)?,
                };
                Node::Def {
                    name: field_str(obj, tag, "name")?,
                    params,
                    body: Box::new(body),
                }
            }
            "return_node" => Node::Return {
                arguments: argument_list(obj.get("arguments"))?,
            },
            "array_node" => Node::Array {
                elements: field_nodes(obj, tag, "elements")?,
            },
            "break_node" => Node::Break,
            "next_node" => Node::Next,
            other => Node::Unknown(other.to_string()),
        };

        Ok(node)
    }

    /// The schema tag this node decoded from, for diagnostics.
    pub fn kind(&self) -> &str {
        match self {
            Node::Program { .. } => "program_node",
            Node::Statements { .. } => "statements_node",
            Node::Call { .. } => "call_node",
            Node::Arguments { .. } => "arguments_node",
            Node::Integer { .. } => "integer_node",
            Node::Str { .. } => "string_node",
            Node::LocalVariableWrite { .. } => "local_variable_write_node",
            Node::LocalVariableRead { .. } => "local_variable_read_node",
            Node::LocalVariableTarget { .. } => "local_variable_target_node",
            Node::If { .. } => "if_node",
            Node::For { .. } => "for_node",
            Node::Range { .. } => "range_node",
            Node::While { .. } => "while_node",
            Node::Def { .. } => "def_node",
            Node::Return { .. } => "return_node",
            Node::Array { .. } => "array_node",
            Node::Break => "break_node",
            Node::Next => "next_node",
            Node::Unknown(tag) => tag,
        }
    }
}

/// An optional `arguments_node` wrapper, flattened to its argument list.
fn argument_list(json: Option<&Json>) -> Result<Vec<Node>, NodeError> {
    match json {
        None | Some(Json::Null) => Ok(Vec::new()),
        Some(j) => match Node::from_json(j)? {
            Node::Arguments { arguments } => Ok(arguments),
            other => Err(NodeError::new(format!(
                "expected arguments_node, got {}",
                other.kind()
            ))),
        },
    }
}

/// `parameters_node.requireds[].name`: the ordered formal parameter names.
fn required_params(json: &Json) -> Result<Vec<String>, NodeError> {
    let requireds = json
        .as_object()
        .and_then(|p| p.get("requireds"))
        .and_then(Json::as_array)
        .ok_or_else(|| NodeError::new("parameters_node has no 'requireds' list"))?;

    requireds
        .iter()
        .map(|r| {
            r.as_object()
                .and_then(|r| r.get("name"))
                .and_then(Json::as_str)
                .map(str::to_string)
                .ok_or_else(|| NodeError::new("required parameter has no 'name'"))
        })
        .collect()
}

fn field_node(
    obj: &serde_json::Map<String, Json>,
    tag: &str,
    field: &str,
) -> Result<Node, NodeError> {
    let json = obj
        .get(field)
        .ok_or_else(|| NodeError::new(format!("{} has no '{}' field", tag, field)))?;
    Node::from_json(json)
}

fn field_nodes(
    obj: &serde_json::Map<String, Json>,
    tag: &str,
    field: &str,
) -> Result<Vec<Node>, NodeError> {
    obj.get(field)
        .and_then(Json::as_array)
        .ok_or_else(|| NodeError::new(format!("{} has no '{}' list", tag, field)))?
        .iter()
        .map(Node::from_json)
        .collect()
}

fn field_str(
    obj: &serde_json::Map<String, Json>,
    tag: &str,
    field: &str,
) -> Result<String, NodeError> {
    obj.get(field)
        .and_then(Json::as_str)
        .map(str::to_string)
        .ok_or_else(|| NodeError::new(format!("{} has no '{}' field", tag, field)))
}
