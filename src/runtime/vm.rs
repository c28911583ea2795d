use std::io::{self, Write};

use rand::seq::SliceRandom;

use crate::bytecode::assemble::Bytecode;
use crate::bytecode::op::Op;
use crate::lang::value::Value;
use crate::runtime::runtime_error::RuntimeError;

/// One call's private variable slots, grown on store.
type Frame = Vec<Option<Value>>;

/// The bytecode interpreter: a fetch-decode-execute loop over a flat byte
/// buffer, with an operand stack, a call stack of return offsets, and one
/// variable frame per active call.
///
/// Output goes to the `Write` sink, one line per PUTS; the CLI hands in
/// stdout, tests hand in a buffer.
pub struct Vm<W: Write> {
    code: Vec<u8>,
    pc: usize,
    /// Byte offset of the opcode currently executing, for fault reports.
    op_at: usize,
    stack: Vec<Value>,
    call_stack: Vec<usize>,
    /// Frames of calls in flight, innermost last. The top-level scope lives
    /// in `globals`, so this is empty between calls.
    frames: Vec<Frame>,
    globals: Frame,
    out: W,
}

impl Vm<io::Stdout> {
    pub fn new(bc: &Bytecode) -> Vm<io::Stdout> {
        Vm::with_output(bc, io::stdout())
    }
}

impl<W: Write> Vm<W> {
    pub fn with_output(bc: &Bytecode, out: W) -> Vm<W> {
        Vm {
            code: bc.bytes.clone(),
            pc: bc.entry,
            op_at: bc.entry,
            stack: Vec::new(),
            call_stack: Vec::new(),
            frames: Vec::new(),
            globals: Frame::new(),
            out,
        }
    }

    /// Active frame count; 1 when only the top-level scope is live.
    pub fn frame_depth(&self) -> usize {
        1 + self.frames.len()
    }

    #[allow(dead_code)]
    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Run from the entry offset until a halt, the end of the buffer, or a
    /// fault. Every fault is terminal.
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        while self.pc < self.code.len() {
            self.op_at = self.pc;
            let byte = self.code[self.pc];
            self.pc += 1;

            let op = Op::from_opcode(byte).ok_or(RuntimeError::UnknownOpcode {
                opcode: byte,
                at: self.op_at,
            })?;

            match op {
                Op::PushNum => {
                    let n = self.read_u16()?;
                    self.push(Value::Int(n as i64));
                }
                Op::PushNum1 => self.push(Value::Int(1)),
                Op::PushNum2 => self.push(Value::Int(2)),
                Op::PushStr => {
                    let s = self.read_str()?;
                    self.push(Value::Str(s));
                }

                Op::Add
                | Op::Sub
                | Op::Mul
                | Op::Div
                | Op::Rem
                | Op::Pow
                | Op::Gt
                | Op::Lt
                | Op::Gte
                | Op::Lte => self.binary_int(op)?,

                // Equality is structural and works on any pair of values.
                Op::Eq => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Value::Int((a == b) as i64));
                }
                Op::Neq => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Value::Int((a != b) as i64));
                }

                Op::Store => {
                    let slot = self.read_u16()? as usize;
                    let value = self.pop()?;
                    let frame = self.frames.last_mut().unwrap_or(&mut self.globals);
                    if frame.len() <= slot {
                        frame.resize(slot + 1, None);
                    }
                    frame[slot] = Some(value);
                }
                Op::Load => {
                    let slot = self.read_u16()?;
                    let frame = self.frames.last().unwrap_or(&self.globals);
                    let value = frame.get(slot as usize).cloned().flatten().ok_or(
                        RuntimeError::UninitializedVariable {
                            slot,
                            at: self.op_at,
                        },
                    )?;
                    self.push(value);
                }

                Op::Jump => {
                    let target = self.read_u16()?;
                    self.pc = target as usize;
                }
                Op::Jif => {
                    let target = self.read_u16()?;
                    // Exactly 0 is false; every other number is true.
                    if self.pop_int()? == 0 {
                        self.pc = target as usize;
                    }
                }

                Op::Call => {
                    let target = self.read_u16()?;
                    let argc = self.read_u16()? as usize;
                    let mut frame: Frame = vec![None; argc];
                    for slot in (0..argc).rev() {
                        frame[slot] = Some(self.pop()?);
                    }
                    self.frames.push(frame);
                    self.call_stack.push(self.pc);
                    self.pc = target as usize;
                }
                Op::Ret => {
                    let return_to =
                        self.call_stack
                            .pop()
                            .ok_or(RuntimeError::CallStackUnderflow {
                                at: self.op_at,
                            })?;
                    self.frames.pop();
                    self.pc = return_to;
                }

                Op::Puts => {
                    let value = self.pop()?;
                    let at = self.op_at;
                    writeln!(self.out, "{}", value).map_err(|e| {
                        RuntimeError::OutputFailed {
                            message: e.to_string(),
                            at,
                        }
                    })?;
                }

                Op::NewArray => {
                    let count = self.read_u16()? as usize;
                    let mut items = vec![Value::Int(0); count];
                    for slot in (0..count).rev() {
                        items[slot] = self.pop()?;
                    }
                    self.push(Value::Array(items));
                }
                Op::IndexGet => {
                    let index = self.pop_int()?;
                    let items = self.pop_array()?;
                    let element = self.element_at(&items, index)?.clone();
                    self.push(element);
                }
                Op::IndexSet => {
                    let value = self.pop()?;
                    let index = self.pop_int()?;
                    let mut items = self.pop_array()?;
                    *self.element_at_mut(&mut items, index)? = value;
                    self.push(Value::Array(items));
                }
                Op::Shuffle => {
                    let mut items = self.pop_array()?;
                    items.shuffle(&mut rand::thread_rng());
                    self.push(Value::Array(items));
                }

                Op::Halt => return Ok(()),
            }
        }

        Ok(())
    }

    fn binary_int(&mut self, op: Op) -> Result<(), RuntimeError> {
        // The right operand was pushed last.
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        let at = self.op_at;

        let result = match op {
            Op::Add => a.checked_add(b),
            Op::Sub => a.checked_sub(b),
            Op::Mul => a.checked_mul(b),
            Op::Div => {
                if b == 0 {
                    return Err(RuntimeError::DivisionByZero { at });
                }
                a.checked_div(b)
            }
            Op::Rem => {
                if b == 0 {
                    return Err(RuntimeError::DivisionByZero { at });
                }
                a.checked_rem(b)
            }
            Op::Pow => {
                if b < 0 {
                    return Err(RuntimeError::TypeError {
                        expected: "non-negative exponent",
                        got: "negative integer",
                        at,
                    });
                }
                u32::try_from(b).ok().and_then(|exp| a.checked_pow(exp))
            }
            Op::Gt => Some((a > b) as i64),
            Op::Lt => Some((a < b) as i64),
            Op::Gte => Some((a >= b) as i64),
            Op::Lte => Some((a <= b) as i64),
            _ => unreachable!("not a binary integer opcode: {:?}", op),
        };

        let result = result.ok_or(RuntimeError::NumericOverflow { at })?;
        self.push(Value::Int(result));
        Ok(())
    }

    fn element_at<'a>(
        &self,
        items: &'a [Value],
        index: i64,
    ) -> Result<&'a Value, RuntimeError> {
        usize::try_from(index)
            .ok()
            .and_then(|i| items.get(i))
            .ok_or(RuntimeError::IndexOutOfBounds {
                index,
                len: items.len(),
                at: self.op_at,
            })
    }

    fn element_at_mut<'a>(
        &self,
        items: &'a mut Vec<Value>,
        index: i64,
    ) -> Result<&'a mut Value, RuntimeError> {
        let len = items.len();
        usize::try_from(index)
            .ok()
            .and_then(|i| items.get_mut(i))
            .ok_or(RuntimeError::IndexOutOfBounds {
                index,
                len,
                at: self.op_at,
            })
    }

    // Decoding

    fn read_u16(&mut self) -> Result<u16, RuntimeError> {
        let word = self
            .code
            .get(self.pc..self.pc + 2)
            .ok_or(RuntimeError::TruncatedBytecode { at: self.op_at })?;
        self.pc += 2;
        Ok(u16::from_le_bytes([word[0], word[1]]))
    }

    fn read_str(&mut self) -> Result<String, RuntimeError> {
        let len = self.read_u16()? as usize;
        let bytes = self
            .code
            .get(self.pc..self.pc + len)
            .ok_or(RuntimeError::TruncatedBytecode { at: self.op_at })?;
        self.pc += len;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    // Stack operations

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack
            .pop()
            .ok_or(RuntimeError::StackUnderflow { at: self.op_at })
    }

    fn pop_int(&mut self) -> Result<i64, RuntimeError> {
        match self.pop()? {
            Value::Int(n) => Ok(n),
            other => Err(RuntimeError::TypeError {
                expected: "integer",
                got: other.type_name(),
                at: self.op_at,
            }),
        }
    }

    fn pop_array(&mut self) -> Result<Vec<Value>, RuntimeError> {
        match self.pop()? {
            Value::Array(items) => Ok(items),
            other => Err(RuntimeError::TypeError {
                expected: "array",
                got: other.type_name(),
                at: self.op_at,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::assemble::assemble;
    use crate::bytecode::instr::Instr;
    use crate::bytecode::lower::{FunctionTable, Lowerer};
    use crate::lang::node::Node;

    // =========================================================================
    // Test helpers
    // =========================================================================

    fn run_bc(bc: &Bytecode) -> Result<Vec<String>, RuntimeError> {
        let mut vm = Vm::with_output(bc, Vec::new());
        vm.run()?;
        let out = String::from_utf8(vm.into_output()).expect("output is UTF-8");
        Ok(out.lines().map(str::to_string).collect())
    }

    /// Assemble raw instructions (no functions) and run them.
    fn run_instrs(instrs: &[Instr]) -> Result<Vec<String>, RuntimeError> {
        let bc = assemble(instrs, &FunctionTable::new()).expect("assembly should succeed");
        run_bc(&bc)
    }

    /// Full pipeline: lower a tree, assemble it, run it.
    fn run_tree(node: &Node) -> Result<Vec<String>, RuntimeError> {
        let lowered = Lowerer::new().lower(node).expect("lowering should succeed");
        let bc = assemble(&lowered.instrs, &lowered.functions).expect("assembly should succeed");
        run_bc(&bc)
    }

    fn int(value: i64) -> Node {
        Node::Integer { value }
    }

    fn read(name: &str) -> Node {
        Node::LocalVariableRead {
            name: name.to_string(),
        }
    }

    fn write(name: &str, value: Node) -> Node {
        Node::LocalVariableWrite {
            name: name.to_string(),
            value: Box::new(value),
        }
    }

    fn call(name: &str, arguments: Vec<Node>) -> Node {
        Node::Call {
            receiver: None,
            name: name.to_string(),
            arguments,
        }
    }

    fn binop(name: &str, left: Node, right: Node) -> Node {
        Node::Call {
            receiver: Some(Box::new(left)),
            name: name.to_string(),
            arguments: vec![right],
        }
    }

    fn program(body: Vec<Node>) -> Node {
        Node::Program {
            statements: Box::new(Node::Statements { body }),
        }
    }

    fn def(name: &str, params: &[&str], body: Vec<Node>) -> Node {
        Node::Def {
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            body: Box::new(Node::Statements { body }),
        }
    }

    fn ret(value: Node) -> Node {
        Node::Return {
            arguments: vec![value],
        }
    }

    // =========================================================================
    // Literals and output
    // =========================================================================

    #[test]
    fn test_output_round_trips_integer_literals() {
        for n in [0i64, 1, 2, 3, 255, 256, 40000, 65535] {
            let out = run_tree(&program(vec![call("puts", vec![int(n)])])).unwrap();
            assert_eq!(out, vec![n.to_string()], "literal {}", n);
        }
    }

    #[test]
    fn test_string_output_is_raw_text() {
        let node = program(vec![call(
            "puts",
            vec![Node::Str {
                value: "hello world".to_string(),
            }],
        )]);
        assert_eq!(run_tree(&node).unwrap(), vec!["hello world"]);
    }

    #[test]
    fn test_one_line_per_output() {
        let node = program(vec![call("puts", vec![int(1), int(2), int(3)])]);
        assert_eq!(run_tree(&node).unwrap(), vec!["1", "2", "3"]);
    }

    // =========================================================================
    // Arithmetic and comparison
    // =========================================================================

    #[test]
    fn test_nested_arithmetic() {
        // puts(2 + 3 * 4) with precedence already encoded by nesting
        let node = program(vec![call(
            "puts",
            vec![binop("+", int(2), binop("*", int(3), int(4)))],
        )]);
        assert_eq!(run_tree(&node).unwrap(), vec!["14"]);
    }

    #[test]
    fn test_subtraction_pops_right_operand_first() {
        let node = program(vec![call("puts", vec![binop("-", int(10), int(3))])]);
        assert_eq!(run_tree(&node).unwrap(), vec!["7"]);
    }

    #[test]
    fn test_division_truncates() {
        let node = program(vec![call("puts", vec![binop("/", int(7), int(2))])]);
        assert_eq!(run_tree(&node).unwrap(), vec!["3"]);
    }

    #[test]
    fn test_remainder() {
        let node = program(vec![call("puts", vec![binop("%", int(7), int(3))])]);
        assert_eq!(run_tree(&node).unwrap(), vec!["1"]);
    }

    #[test]
    fn test_power() {
        let node = program(vec![call("puts", vec![binop("**", int(3), int(4))])]);
        assert_eq!(run_tree(&node).unwrap(), vec!["81"]);
    }

    #[test]
    fn test_division_by_zero_faults() {
        let node = program(vec![call("puts", vec![binop("/", int(1), int(0))])]);
        let lowered = Lowerer::new().lower(&node).unwrap();
        let bc = assemble(&lowered.instrs, &lowered.functions).unwrap();
        assert!(matches!(
            run_bc(&bc),
            Err(RuntimeError::DivisionByZero { .. })
        ));
    }

    #[test]
    fn test_comparisons_push_one_or_zero() {
        let out = run_instrs(&[
            Instr::with(Op::PushNum, "3"),
            Instr::with(Op::PushNum, "5"),
            Instr::op(Op::Lt),
            Instr::op(Op::Puts),
            Instr::with(Op::PushNum, "3"),
            Instr::with(Op::PushNum, "5"),
            Instr::op(Op::Gte),
            Instr::op(Op::Puts),
        ])
        .unwrap();
        assert_eq!(out, vec!["1", "0"]);
    }

    #[test]
    fn test_equality_works_on_strings() {
        let out = run_instrs(&[
            Instr::with(Op::PushStr, "abc"),
            Instr::with(Op::PushStr, "abc"),
            Instr::op(Op::Eq),
            Instr::op(Op::Puts),
            Instr::with(Op::PushStr, "abc"),
            Instr::with(Op::PushStr, "abd"),
            Instr::op(Op::Neq),
            Instr::op(Op::Puts),
        ])
        .unwrap();
        assert_eq!(out, vec!["1", "1"]);
    }

    #[test]
    fn test_arithmetic_on_string_is_a_type_fault() {
        let result = run_instrs(&[
            Instr::with(Op::PushStr, "a"),
            Instr::op(Op::PushNum1),
            Instr::op(Op::Add),
        ]);
        assert!(matches!(result, Err(RuntimeError::TypeError { .. })));
    }

    #[test]
    fn test_overflow_faults() {
        let result = run_instrs(&[
            Instr::with(Op::PushNum, "10"),
            Instr::with(Op::PushNum, "100"),
            Instr::op(Op::Pow),
        ]);
        assert!(matches!(result, Err(RuntimeError::NumericOverflow { .. })));
    }

    // =========================================================================
    // Control flow
    // =========================================================================

    #[test]
    fn test_while_loop_counts_to_five() {
        let node = program(vec![
            write("i", int(0)),
            Node::While {
                predicate: Box::new(binop("<", read("i"), int(5))),
                statements: Box::new(Node::Statements {
                    body: vec![
                        call("puts", vec![read("i")]),
                        write("i", binop("+", read("i"), int(1))),
                    ],
                }),
            },
        ]);
        assert_eq!(run_tree(&node).unwrap(), vec!["0", "1", "2", "3", "4"]);
    }

    #[test]
    fn test_for_loop_bounds_are_inclusive() {
        let node = program(vec![Node::For {
            index: "i".to_string(),
            collection: Box::new(Node::Range {
                left: Box::new(int(1)),
                right: Box::new(int(3)),
            }),
            statements: Box::new(Node::Statements {
                body: vec![call("puts", vec![read("i")])],
            }),
        }]);
        assert_eq!(run_tree(&node).unwrap(), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_if_skips_body_when_false() {
        let node = program(vec![
            Node::If {
                predicate: Box::new(binop(">", int(1), int(2))),
                statements: Box::new(Node::Statements {
                    body: vec![call("puts", vec![int(111)])],
                }),
            },
            call("puts", vec![int(222)]),
        ]);
        assert_eq!(run_tree(&node).unwrap(), vec!["222"]);
    }

    #[test]
    fn test_negative_condition_is_truthy() {
        // JIF only jumps on exactly zero.
        let out = run_instrs(&[
            Instr::with(Op::PushNum, "3"),
            Instr::with(Op::PushNum, "5"),
            Instr::op(Op::Sub), // -2
            Instr::with(Op::Jif, ".L0"),
            Instr::with(Op::PushNum, "7"),
            Instr::op(Op::Puts),
            Instr::label(".L0"),
        ])
        .unwrap();
        assert_eq!(out, vec!["7"]);
    }

    #[test]
    fn test_break_leaves_the_loop() {
        let node = program(vec![
            write("i", int(0)),
            Node::While {
                predicate: Box::new(int(1)),
                statements: Box::new(Node::Statements {
                    body: vec![
                        Node::If {
                            predicate: Box::new(binop(">=", read("i"), int(3))),
                            statements: Box::new(Node::Statements {
                                body: vec![Node::Break],
                            }),
                        },
                        call("puts", vec![read("i")]),
                        write("i", binop("+", read("i"), int(1))),
                    ],
                }),
            },
            call("puts", vec![int(99)]),
        ]);
        assert_eq!(run_tree(&node).unwrap(), vec!["0", "1", "2", "99"]);
    }

    #[test]
    fn test_next_skips_to_increment() {
        // for i in 1..5 { next if i == 3; puts i }
        let node = program(vec![Node::For {
            index: "i".to_string(),
            collection: Box::new(Node::Range {
                left: Box::new(int(1)),
                right: Box::new(int(5)),
            }),
            statements: Box::new(Node::Statements {
                body: vec![
                    Node::If {
                        predicate: Box::new(binop("==", read("i"), int(3))),
                        statements: Box::new(Node::Statements {
                            body: vec![Node::Next],
                        }),
                    },
                    call("puts", vec![read("i")]),
                ],
            }),
        }]);
        assert_eq!(run_tree(&node).unwrap(), vec!["1", "2", "4", "5"]);
    }

    #[test]
    fn test_halt_stops_before_later_output() {
        let node = program(vec![
            call("puts", vec![int(1)]),
            call("exit", vec![]),
            call("puts", vec![int(2)]),
        ]);
        assert_eq!(run_tree(&node).unwrap(), vec!["1"]);
    }

    #[test]
    fn test_end_of_buffer_is_a_clean_stop() {
        let out = run_instrs(&[Instr::op(Op::PushNum1), Instr::op(Op::Puts)]).unwrap();
        assert_eq!(out, vec!["1"]);
    }

    // =========================================================================
    // Functions and frames
    // =========================================================================

    #[test]
    fn test_zero_arg_function_returns_value() {
        let node = program(vec![
            def("seven", &[], vec![ret(int(7))]),
            call("puts", vec![call("seven", vec![])]),
        ]);
        assert_eq!(run_tree(&node).unwrap(), vec!["7"]);
    }

    #[test]
    fn test_frame_depth_returns_to_one_after_call() {
        let node = program(vec![
            def("seven", &[], vec![ret(int(7))]),
            call("puts", vec![call("seven", vec![])]),
        ]);
        let lowered = Lowerer::new().lower(&node).unwrap();
        let bc = assemble(&lowered.instrs, &lowered.functions).unwrap();
        let mut vm = Vm::with_output(&bc, Vec::new());
        vm.run().unwrap();
        assert_eq!(vm.frame_depth(), 1);
    }

    #[test]
    fn test_arguments_arrive_positionally() {
        // sub(a, b) = a - b, called as sub(10, 4)
        let node = program(vec![
            def("sub", &["a", "b"], vec![ret(binop("-", read("a"), read("b")))]),
            call("puts", vec![call("sub", vec![int(10), int(4)])]),
        ]);
        assert_eq!(run_tree(&node).unwrap(), vec!["6"]);
    }

    #[test]
    fn test_parameters_line_up_even_when_read_out_of_order() {
        // second(a, b) reads b before a ever appears in the body.
        let node = program(vec![
            def("second", &["a", "b"], vec![ret(read("b"))]),
            call("puts", vec![call("second", vec![int(5), int(9)])]),
        ]);
        assert_eq!(run_tree(&node).unwrap(), vec!["9"]);
    }

    #[test]
    fn test_function_locals_do_not_alias_top_level() {
        // Both scopes use a variable named x; each must keep its own value.
        let node = program(vec![
            def(
                "shadow",
                &[],
                vec![write("x", int(100)), ret(read("x"))],
            ),
            write("x", int(5)),
            call("puts", vec![call("shadow", vec![])]),
            call("puts", vec![read("x")]),
        ]);
        assert_eq!(run_tree(&node).unwrap(), vec!["100", "5"]);
    }

    #[test]
    fn test_early_return_keeps_parameter_slots() {
        // pick(a, b): if a > 0 { return a }; return b
        let node = program(vec![
            def(
                "pick",
                &["a", "b"],
                vec![
                    Node::If {
                        predicate: Box::new(binop(">", read("a"), int(0))),
                        statements: Box::new(Node::Statements {
                            body: vec![ret(read("a"))],
                        }),
                    },
                    ret(read("b")),
                ],
            ),
            call("puts", vec![call("pick", vec![int(0), int(42)])]),
            call("puts", vec![call("pick", vec![int(7), int(42)])]),
        ]);
        assert_eq!(run_tree(&node).unwrap(), vec!["42", "7"]);
    }

    #[test]
    fn test_nested_calls() {
        let node = program(vec![
            def("inc", &["n"], vec![ret(binop("+", read("n"), int(1)))]),
            call("puts", vec![call("inc", vec![call("inc", vec![int(5)])])]),
        ]);
        assert_eq!(run_tree(&node).unwrap(), vec!["7"]);
    }

    #[test]
    fn test_recursive_function() {
        // fact(n): if n <= 1 { return 1 }; return n * fact(n - 1)
        let node = program(vec![
            def(
                "fact",
                &["n"],
                vec![
                    Node::If {
                        predicate: Box::new(binop("<=", read("n"), int(1))),
                        statements: Box::new(Node::Statements {
                            body: vec![ret(int(1))],
                        }),
                    },
                    ret(binop(
                        "*",
                        read("n"),
                        call("fact", vec![binop("-", read("n"), int(1))]),
                    )),
                ],
            ),
            call("puts", vec![call("fact", vec![int(5)])]),
        ]);
        assert_eq!(run_tree(&node).unwrap(), vec!["120"]);
    }

    #[test]
    fn test_execution_starts_after_function_bodies() {
        // The body of f must not run on its own, only through the call.
        let node = program(vec![
            def("noisy", &[], vec![call("puts", vec![int(1)]), ret(int(0))]),
            call("puts", vec![int(2)]),
        ]);
        assert_eq!(run_tree(&node).unwrap(), vec!["2"]);
    }

    // =========================================================================
    // Arrays
    // =========================================================================

    #[test]
    fn test_array_literal_and_index() {
        let array = Node::Array {
            elements: vec![int(10), int(20), int(30)],
        };
        let node = program(vec![
            write("a", array),
            call("puts", vec![binop("[]", read("a"), int(1))]),
        ]);
        assert_eq!(run_tree(&node).unwrap(), vec!["20"]);
    }

    #[test]
    fn test_array_output_format() {
        let node = program(vec![call(
            "puts",
            vec![Node::Array {
                elements: vec![int(1), int(2), int(3)],
            }],
        )]);
        assert_eq!(run_tree(&node).unwrap(), vec!["[1, 2, 3]"]);
    }

    #[test]
    fn test_index_set_yields_updated_array() {
        // ([0, 0].[]=(1, 9)) evaluates to the updated array.
        let set = Node::Call {
            receiver: Some(Box::new(Node::Array {
                elements: vec![int(0), int(0)],
            })),
            name: "[]=".to_string(),
            arguments: vec![int(1), int(9)],
        };
        let node = program(vec![call("puts", vec![set])]);
        assert_eq!(run_tree(&node).unwrap(), vec!["[0, 9]"]);
    }

    #[test]
    fn test_index_out_of_bounds_faults() {
        let node = program(vec![call(
            "puts",
            vec![binop(
                "[]",
                Node::Array {
                    elements: vec![int(1)],
                },
                int(5),
            )],
        )]);
        let lowered = Lowerer::new().lower(&node).unwrap();
        let bc = assemble(&lowered.instrs, &lowered.functions).unwrap();
        assert!(matches!(
            run_bc(&bc),
            Err(RuntimeError::IndexOutOfBounds { index: 5, len: 1, .. })
        ));
    }

    #[test]
    fn test_shuffle_permutes() {
        let instrs = [
            Instr::with(Op::PushNum, "10"),
            Instr::with(Op::PushNum, "20"),
            Instr::with(Op::PushNum, "30"),
            Instr::with(Op::NewArray, "3"),
            Instr::op(Op::Shuffle),
        ];
        let bc = assemble(&instrs, &FunctionTable::new()).unwrap();
        let mut vm = Vm::with_output(&bc, Vec::new());
        vm.run().unwrap();

        match vm.stack() {
            [Value::Array(items)] => {
                let mut sorted = items.clone();
                sorted.sort_by_key(|v| match v {
                    Value::Int(n) => *n,
                    _ => panic!("expected integers"),
                });
                assert_eq!(
                    sorted,
                    vec![Value::Int(10), Value::Int(20), Value::Int(30)]
                );
            }
            other => panic!("expected one array on the stack, got {:?}", other),
        }
    }

    // =========================================================================
    // Faults
    // =========================================================================

    struct BrokenSink;

    impl Write for BrokenSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_rejected_output_write_is_a_fault() {
        let instrs = [Instr::op(Op::PushNum1), Instr::op(Op::Puts)];
        let bc = assemble(&instrs, &FunctionTable::new()).unwrap();
        let mut vm = Vm::with_output(&bc, BrokenSink);
        assert!(matches!(
            vm.run(),
            Err(RuntimeError::OutputFailed { at: 1, .. })
        ));
    }

    #[test]
    fn test_uninitialized_variable_faults() {
        let result = run_instrs(&[Instr::with(Op::Load, "x"), Instr::op(Op::Puts)]);
        assert!(matches!(
            result,
            Err(RuntimeError::UninitializedVariable { slot: 0, .. })
        ));
    }

    #[test]
    fn test_stack_underflow_is_a_hard_fault() {
        let result = run_instrs(&[Instr::op(Op::Add)]);
        assert!(matches!(result, Err(RuntimeError::StackUnderflow { .. })));
    }

    #[test]
    fn test_return_without_call_faults() {
        let result = run_instrs(&[Instr::op(Op::Ret)]);
        assert!(matches!(
            result,
            Err(RuntimeError::CallStackUnderflow { at: 0 })
        ));
    }

    #[test]
    fn test_unknown_opcode_faults_with_offset() {
        let bc = Bytecode {
            bytes: vec![0x16, 0xab],
            entry: 0,
        };
        assert_eq!(
            run_bc(&bc),
            Err(RuntimeError::UnknownOpcode { opcode: 0xab, at: 1 })
        );
    }

    #[test]
    fn test_truncated_operand_faults() {
        let bc = Bytecode {
            bytes: vec![0x01, 0x05],
            entry: 0,
        };
        assert!(matches!(
            run_bc(&bc),
            Err(RuntimeError::TruncatedBytecode { at: 0 })
        ));
    }
}
