use std::collections::HashMap;

use crate::bytecode::{compile_error::CompileError, instr::Instr, op::Op};
use crate::lang::node::Node;

/// Function name -> ordered formal parameter names.
pub type FunctionTable = HashMap<String, Vec<String>>;

/// Label marking where top-level execution starts. Synthetic labels carry a
/// `.L` prefix, which no identifier-derived function label can start with, so
/// neither this nor the numbered labels can collide with user functions.
pub const ENTRY_LABEL: &str = ".Lmain";

/// Result of lowering: the instruction sequence plus the function signatures
/// the assembler needs for call resolution and per-function slot scoping.
#[derive(Debug)]
pub struct Lowered {
    pub instrs: Vec<Instr>,
    pub functions: FunctionTable,
}

/// Jump targets of the innermost enclosing loop, for `break` / `next`.
struct LoopLabels {
    next_target: String,
    end: String,
}

/// Walks the tree and emits the textual instruction sequence.
///
/// All lowering state (label counter, function table, loop stack) lives on
/// this value, so independent compilations never share anything.
pub struct Lowerer {
    instrs: Vec<Instr>,
    functions: FunctionTable,
    label_id: u32,
    loops: Vec<LoopLabels>,
}

impl Lowerer {
    pub fn new() -> Self {
        Self {
            instrs: Vec::new(),
            functions: FunctionTable::new(),
            label_id: 0,
            loops: Vec::new(),
        }
    }

    /// Lower a whole tree. Function signatures are collected in a pre-pass so
    /// a call may precede its definition in the tree.
    pub fn lower(mut self, node: &Node) -> Result<Lowered, CompileError> {
        self.collect_functions(node);

        match node {
            // At the top level, function definitions are emitted first and
            // the entry label marks where the remaining statements begin.
            // That gives the byte stream a single well-defined entry offset
            // whatever order defs and statements appear in the source.
            Node::Program { statements } => match statements.as_ref() {
                Node::Statements { body } => {
                    for stmt in body.iter().filter(|s| matches!(s, Node::Def { .. })) {
                        self.lower_node(stmt)?;
                    }
                    self.emit(Instr::label(ENTRY_LABEL));
                    for stmt in body.iter().filter(|s| !matches!(s, Node::Def { .. })) {
                        self.lower_node(stmt)?;
                    }
                }
                other => self.lower_node(other)?,
            },
            other => self.lower_node(other)?,
        }

        Ok(Lowered {
            instrs: self.instrs,
            functions: self.functions,
        })
    }

    fn emit(&mut self, instr: Instr) {
        self.instrs.push(instr);
    }

    fn new_label(&mut self) -> String {
        let label = format!(".L{}", self.label_id);
        self.label_id += 1;
        label
    }

    /// Register every function signature reachable in the tree.
    fn collect_functions(&mut self, node: &Node) {
        match node {
            Node::Def { name, params, body } => {
                self.functions.insert(name.clone(), params.clone());
                self.collect_functions(body);
            }
            Node::Program { statements } => self.collect_functions(statements),
            Node::Statements { body } => body.iter().for_each(|n| self.collect_functions(n)),
            Node::Arguments { arguments } => {
                arguments.iter().for_each(|n| self.collect_functions(n))
            }
            Node::Call {
                receiver,
                arguments,
                ..
            } => {
                if let Some(r) = receiver {
                    self.collect_functions(r);
                }
                arguments.iter().for_each(|n| self.collect_functions(n));
            }
            Node::LocalVariableWrite { value, .. } => self.collect_functions(value),
            Node::If {
                predicate,
                statements,
            }
            | Node::While {
                predicate,
                statements,
            } => {
                self.collect_functions(predicate);
                self.collect_functions(statements);
            }
            Node::For {
                collection,
                statements,
                ..
            } => {
                self.collect_functions(collection);
                self.collect_functions(statements);
            }
            Node::Range { left, right } => {
                self.collect_functions(left);
                self.collect_functions(right);
            }
            Node::Return { arguments } => {
                arguments.iter().for_each(|n| self.collect_functions(n))
            }
            Node::Array { elements } => elements.iter().for_each(|n| self.collect_functions(n)),
            Node::Integer { .. }
            | Node::Str { .. }
            | Node::LocalVariableRead { .. }
            | Node::LocalVariableTarget { .. }
            | Node::Break
            | Node::Next
            | Node::Unknown(_) => {}
        }
    }

    fn lower_node(&mut self, node: &Node) -> Result<(), CompileError> {
        match node {
            Node::Program { statements } => self.lower_node(statements)?,

            Node::Statements { body } => {
                for stmt in body {
                    self.lower_node(stmt)?;
                }
            }

            Node::Arguments { arguments } => {
                for arg in arguments {
                    self.lower_node(arg)?;
                }
            }

            Node::Integer { value } => match value {
                1 => self.emit(Instr::op(Op::PushNum1)),
                2 => self.emit(Instr::op(Op::PushNum2)),
                n => self.emit(Instr::with(Op::PushNum, n.to_string())),
            },

            Node::Str { value } => self.emit(Instr::with(Op::PushStr, value.clone())),

            Node::LocalVariableWrite { name, value } => {
                self.lower_node(value)?;
                self.emit(Instr::with(Op::Store, name.clone()));
            }

            Node::LocalVariableRead { name } => {
                self.emit(Instr::with(Op::Load, name.clone()));
            }

            // A binding occurrence on its own produces no code.
            Node::LocalVariableTarget { .. } => {}

            Node::Call {
                receiver,
                name,
                arguments,
            } => self.lower_call(receiver.as_deref(), name, arguments)?,

            Node::If {
                predicate,
                statements,
            } => {
                let end = self.new_label();
                self.lower_node(predicate)?;
                self.emit(Instr::with(Op::Jif, end.clone()));
                self.lower_node(statements)?;
                self.emit(Instr::label(end));
            }

            Node::While {
                predicate,
                statements,
            } => {
                let start = self.new_label();
                let end = self.new_label();

                self.emit(Instr::label(start.clone()));
                self.lower_node(predicate)?;
                self.emit(Instr::with(Op::Jif, end.clone()));

                self.loops.push(LoopLabels {
                    next_target: start.clone(),
                    end: end.clone(),
                });
                let body = self.lower_node(statements);
                self.loops.pop();
                body?;

                self.emit(Instr::with(Op::Jump, start));
                self.emit(Instr::label(end));
            }

            Node::For {
                index,
                collection,
                statements,
            } => {
                let (left, right) = match collection.as_ref() {
                    Node::Range { left, right } => (left.as_ref(), right.as_ref()),
                    other => {
                        return Err(CompileError::invalid_node(
                            other.kind(),
                            "a for-loop collection must be a range",
                        ));
                    }
                };

                let start = self.new_label();
                let cont = self.new_label();
                let end = self.new_label();

                // Counted loop with inclusive upper bound:
                //   i = left; while i <= right { body; i = i + 1 }
                self.lower_node(left)?;
                self.emit(Instr::with(Op::Store, index.clone()));

                self.emit(Instr::label(start.clone()));
                self.emit(Instr::with(Op::Load, index.clone()));
                self.lower_node(right)?;
                self.emit(Instr::op(Op::Lte));
                self.emit(Instr::with(Op::Jif, end.clone()));

                self.loops.push(LoopLabels {
                    next_target: cont.clone(),
                    end: end.clone(),
                });
                let body = self.lower_node(statements);
                self.loops.pop();
                body?;

                self.emit(Instr::label(cont));
                self.emit(Instr::with(Op::Load, index.clone()));
                self.emit(Instr::op(Op::PushNum1));
                self.emit(Instr::op(Op::Add));
                self.emit(Instr::with(Op::Store, index.clone()));
                self.emit(Instr::with(Op::Jump, start));
                self.emit(Instr::label(end));
            }

            // Ranges are not first-class values; outside a for-loop they
            // lower to nothing.
            Node::Range { .. } => {}

            Node::Def { name, body, .. } => {
                self.emit(Instr::label(name.clone()));
                self.lower_node(body)?;
                let ends_with_ret = self.instrs.last().is_some_and(|i| i.is(Op::Ret));
                if !ends_with_ret {
                    return Err(CompileError::missing_return(name.clone()));
                }
            }

            Node::Return { arguments } => {
                for arg in arguments {
                    self.lower_node(arg)?;
                }
                self.emit(Instr::op(Op::Ret));
            }

            Node::Array { elements } => {
                for element in elements {
                    self.lower_node(element)?;
                }
                self.emit(Instr::with(Op::NewArray, elements.len().to_string()));
            }

            Node::Break => {
                let end = self
                    .loops
                    .last()
                    .map(|l| l.end.clone())
                    .ok_or(CompileError::BreakOutsideLoop)?;
                self.emit(Instr::with(Op::Jump, end));
            }

            Node::Next => {
                let target = self
                    .loops
                    .last()
                    .map(|l| l.next_target.clone())
                    .ok_or(CompileError::NextOutsideLoop)?;
                self.emit(Instr::with(Op::Jump, target));
            }

            Node::Unknown(kind) => return Err(CompileError::unknown_node(kind.clone())),
        }

        Ok(())
    }

    fn lower_call(
        &mut self,
        receiver: Option<&Node>,
        name: &str,
        arguments: &[Node],
    ) -> Result<(), CompileError> {
        // `exit` is a special form: nothing is evaluated, the stream just ends.
        if name == "exit" {
            self.emit(Instr::op(Op::Halt));
            return Ok(());
        }

        // User definitions shadow builtins. The registered arity is used even
        // when the call precedes the definition in the tree.
        if let Some(params) = self.functions.get(name) {
            let arity = params.len();
            self.lower_receiver_and_args(receiver, arguments)?;
            self.emit(Instr::call(name, arity));
            return Ok(());
        }

        let builtin = match name {
            "+" => Some(Op::Add),
            "-" => Some(Op::Sub),
            "*" => Some(Op::Mul),
            "/" => Some(Op::Div),
            "%" => Some(Op::Rem),
            "**" => Some(Op::Pow),
            ">" => Some(Op::Gt),
            "<" => Some(Op::Lt),
            ">=" => Some(Op::Gte),
            "<=" => Some(Op::Lte),
            "==" => Some(Op::Eq),
            "!=" => Some(Op::Neq),
            "[]" => Some(Op::IndexGet),
            "[]=" => Some(Op::IndexSet),
            "shuffle" => Some(Op::Shuffle),
            _ => None,
        };

        if let Some(op) = builtin {
            self.lower_receiver_and_args(receiver, arguments)?;
            self.emit(Instr::op(op));
            return Ok(());
        }

        // Output ignores any receiver and prints one line per argument.
        if name == "puts" || name == "print" {
            for arg in arguments {
                self.lower_node(arg)?;
                self.emit(Instr::op(Op::Puts));
            }
            return Ok(());
        }

        // Anything else becomes a call against a label the assembler will
        // resolve; the arity is the call-site argument count.
        self.lower_receiver_and_args(receiver, arguments)?;
        self.emit(Instr::call(name, arguments.len()));
        Ok(())
    }

    fn lower_receiver_and_args(
        &mut self,
        receiver: Option<&Node>,
        arguments: &[Node],
    ) -> Result<(), CompileError> {
        if let Some(r) = receiver {
            self.lower_node(r)?;
        }
        for arg in arguments {
            self.lower_node(arg)?;
        }
        Ok(())
    }
}
