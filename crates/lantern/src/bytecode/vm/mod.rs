//! Interpreter frames and opcode dispatch.
//!
//! A [`Frame`] executes one code object an instruction at a time. Every
//! handler reads its operands before touching the stack, so a handler that
//! fails leaves the frame exactly as it was and the instruction can be
//! retried in place.

pub mod binary;
pub mod call;
pub mod collections;
pub mod compare;

use std::rc::Rc;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use self::{
    binary::{BinaryOp, UnaryOp, binary_op, inplace_op, unary_op},
    call::PendingCall,
    compare::{compare, identity, membership},
};
use super::{
    code::{CodeObject, Instruction, Instructions},
    op::{CompareOp, Opcode},
};
use crate::{
    exception::{ExcType, SimpleException},
    expressions::{Condition, ExprError, evaluate},
    fault::{ContractError, Fault, FaultCause},
    namespace::{Layers, Scope, SharedScope, default_builtins},
    resource::{InterruptHandle, ResourceLimits},
    tracer::VmTracer,
    value::Value,
    version::Version,
};

/// What the dispatcher does with the counter after a handler succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Fall through to the next instruction.
    Next,
    /// Continue at an absolute byte offset.
    Jump(usize),
    /// `RETURN_VALUE` in a called frame. The counter stays put and the return
    /// value is left on top of the stack for the caller to collect.
    Return,
}

/// One dispatched instruction, before a bytecode call is run.
enum Dispatch {
    Done(Flow),
    /// `CALL_FUNCTION` on a bytecode function. The caller's counter stays on
    /// the call until the callee returns.
    Enter(Box<PendingCall>),
}

/// A copy of the mutable execution state of one frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Savepoint {
    pub counter: usize,
    pub stack: Vec<Value>,
    pub locals: Scope,
    pub globals: Scope,
}

/// Shared inputs of one execution run: limits for nested call runs, the
/// cancellation flag and the tracer.
pub struct Context<'a> {
    pub limits: ResourceLimits,
    pub interrupt: &'a InterruptHandle,
    pub tracer: &'a mut dyn VmTracer,
}

impl<'a> Context<'a> {
    pub fn new(limits: ResourceLimits, interrupt: &'a InterruptHandle, tracer: &'a mut dyn VmTracer) -> Self {
        Self {
            limits,
            interrupt,
            tracer,
        }
    }
}

/// One live interpreter instance bound to a code object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    code: Rc<CodeObject>,
    version: Version,
    counter: usize,
    stack: Vec<Value>,
    locals: Scope,
    globals: Scope,
    /// Shared with every frame this one calls. Session dumps store it once.
    #[serde(skip, default = "default_builtins")]
    builtins: SharedScope,
    breakpoints: AHashMap<usize, Option<Condition>>,
    allowed: AHashMap<Opcode, Option<Condition>>,
    savepoints: Vec<Savepoint>,
    /// Arena index of the calling frame.
    parent: Option<usize>,
    depth: usize,
}

impl Frame {
    /// Creates a root frame with empty scopes and the default builtins.
    #[must_use]
    pub fn new(code: Rc<CodeObject>, version: Version) -> Self {
        Self::with_scopes(code, version, Scope::new(), Scope::new(), default_builtins())
    }

    /// Creates a root frame over the given scopes.
    #[must_use]
    pub fn with_scopes(
        code: Rc<CodeObject>,
        version: Version,
        locals: Scope,
        globals: Scope,
        builtins: SharedScope,
    ) -> Self {
        Self {
            code,
            version,
            counter: 0,
            stack: Vec::new(),
            locals,
            globals,
            builtins,
            breakpoints: AHashMap::new(),
            allowed: AHashMap::new(),
            savepoints: Vec::new(),
            parent: None,
            depth: 0,
        }
    }

    #[must_use]
    pub fn code(&self) -> &Rc<CodeObject> {
        &self.code
    }

    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Byte offset of the next instruction to execute.
    #[must_use]
    pub fn counter(&self) -> usize {
        self.counter
    }

    #[must_use]
    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    #[must_use]
    pub fn locals(&self) -> &Scope {
        &self.locals
    }

    pub fn locals_mut(&mut self) -> &mut Scope {
        &mut self.locals
    }

    #[must_use]
    pub fn globals(&self) -> &Scope {
        &self.globals
    }

    pub fn globals_mut(&mut self) -> &mut Scope {
        &mut self.globals
    }

    #[must_use]
    pub fn builtins(&self) -> &SharedScope {
        &self.builtins
    }

    pub(crate) fn set_builtins(&mut self, builtins: SharedScope) {
        self.builtins = builtins;
    }

    #[must_use]
    pub fn breakpoints(&self) -> &AHashMap<usize, Option<Condition>> {
        &self.breakpoints
    }

    #[must_use]
    pub fn allowed(&self) -> &AHashMap<Opcode, Option<Condition>> {
        &self.allowed
    }

    #[must_use]
    pub fn savepoints(&self) -> &[Savepoint] {
        &self.savepoints
    }

    #[must_use]
    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub(crate) fn set_parent(&mut self, parent: Option<usize>) {
        self.parent = parent;
    }

    /// Number of calls between this frame and the root.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The instruction at the counter, or `None` past the end of the bytecode.
    #[must_use]
    pub fn current_instruction(&self) -> Option<Instruction> {
        self.code.instruction_at(self.counter, self.version)
    }

    /// Every instruction of the code object, from the start.
    #[must_use]
    pub fn opcodes(&self) -> Instructions<'_> {
        self.code.instructions(self.version)
    }

    /// Offset of the instruction after the one at `offset`.
    #[must_use]
    pub fn next_offset(&self, offset: usize) -> usize {
        self.code.next_offset(offset, self.version)
    }

    /// Moves the counter forward `count` instructions without executing them.
    ///
    /// Stops at the end of the bytecode.
    pub fn increment(&mut self, count: usize) {
        let end = self.code.bytecode().len();
        for _ in 0..count {
            if self.counter >= end {
                break;
            }
            self.counter = self.next_offset(self.counter).min(end);
        }
    }

    pub(crate) fn advance_past_current(&mut self) {
        self.counter = self.next_offset(self.counter);
    }

    // ========================================================================
    // Breakpoints and the unsafe allowlist
    // ========================================================================

    /// Removes an unconditional toggle of an existing breakpoint; otherwise
    /// (re)registers the breakpoint with `condition`.
    pub fn toggle_breakpoint(&mut self, address: usize, condition: Option<Condition>) {
        if condition.is_none() && self.breakpoints.contains_key(&address) {
            self.breakpoints.remove(&address);
        } else {
            self.breakpoints.insert(address, condition);
        }
    }

    /// Whether `cont` should stop at `address`.
    ///
    /// A guard that fails to evaluate does not trigger.
    #[must_use]
    pub fn is_breakpoint(&self, address: usize) -> bool {
        match self.breakpoints.get(&address) {
            None => false,
            Some(None) => true,
            Some(Some(condition)) => self.with_layers(&[], |layers| condition.is_met(layers).unwrap_or(false)),
        }
    }

    /// Lets `opcode` run without the unsafe flag, when `condition` (if any) holds.
    pub fn allow(&mut self, opcode: Opcode, condition: Option<Condition>) {
        self.allowed.insert(opcode, condition);
    }

    /// Removes an allowlist entry, returning whether there was one.
    pub fn disallow(&mut self, opcode: Opcode) -> bool {
        self.allowed.remove(&opcode).is_some()
    }

    // ========================================================================
    // Snapshots and direct state mutation
    // ========================================================================

    pub fn save(&mut self) {
        self.savepoints.push(Savepoint {
            counter: self.counter,
            stack: self.stack.clone(),
            locals: self.locals.clone(),
            globals: self.globals.clone(),
        });
    }

    /// Restores the `n`-th most recent savepoint (1 is the latest), keeping it.
    pub fn restore(&mut self, n: usize) -> Result<(), ContractError> {
        let index = self
            .savepoints
            .len()
            .checked_sub(n)
            .filter(|_| n > 0)
            .ok_or(ContractError::NoSuchSavepoint(n))?;
        let savepoint = self.savepoints[index].clone();
        self.counter = savepoint.counter;
        self.stack = savepoint.stack;
        self.locals = savepoint.locals;
        self.globals = savepoint.globals;
        Ok(())
    }

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Removes the value at `index`, counting from the bottom, or from the
    /// top when negative. `None` pops the top.
    pub fn pop(&mut self, index: Option<isize>) -> Result<Value, ContractError> {
        let raw = index.unwrap_or(-1);
        let len = self.stack.len() as isize;
        let resolved = if raw < 0 { raw + len } else { raw };
        if !(0..len).contains(&resolved) {
            return Err(ContractError::IndexOutOfRange(raw));
        }
        Ok(self.stack.remove(resolved as usize))
    }

    // ========================================================================
    // Expression evaluation
    // ========================================================================

    /// Runs `f` over builtins, then globals, then locals, then `extras`.
    pub fn with_layers<R>(&self, extras: &[(&str, Value)], f: impl FnOnce(&Layers<'_>) -> R) -> R {
        let builtins = self.builtins.borrow();
        let layers = Layers::new(&builtins, &self.globals, &self.locals, extras);
        f(&layers)
    }

    /// Evaluates an expression against this frame's scopes.
    pub fn evaluate(&self, source: &str) -> Result<Value, ExprError> {
        self.with_layers(&[], |layers| evaluate(source, layers))
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Executes the instruction at the counter.
    ///
    /// On success the counter moves past the instruction (or to the jump
    /// target). On failure nothing changes. `CALL_FUNCTION` on a bytecode
    /// function runs the callee to completion within this one step.
    pub fn step(&mut self, ctx: &mut Context<'_>, allow_unsafe: bool) -> Result<Flow, Fault> {
        let address = self.counter;
        match self.dispatch(ctx, allow_unsafe)? {
            Dispatch::Done(flow) => Ok(flow),
            Dispatch::Enter(call) => {
                let value = Self::run_call(ctx, *call).map_err(|cause| Fault::Unresolvable { address, cause })?;
                self.finish_call(value);
                Ok(Flow::Next)
            }
        }
    }

    /// Executes the instruction at the counter, except that a bytecode
    /// callee is handed back as a frame instead of being run.
    fn dispatch(&mut self, ctx: &mut Context<'_>, allow_unsafe: bool) -> Result<Dispatch, Fault> {
        let address = self.counter;
        let unresolvable = |cause| Fault::Unresolvable { address, cause };
        let Some(instruction) = self.current_instruction() else {
            return Err(unresolvable(FaultCause::EndOfCode));
        };
        let Some(opcode) = instruction.opcode else {
            return Err(unresolvable(FaultCause::UnknownOpcode(instruction.byte)));
        };
        if opcode.is_unsafe() && !self.permitted(opcode, instruction.arg, allow_unsafe).map_err(unresolvable)? {
            return Err(Fault::UnsafeOperation { address, opcode });
        }
        ctx.tracer
            .on_instruction(address, opcode, self.stack.len(), self.depth);
        if opcode == Opcode::CallFunction
            && let Some(call) = self.enter_call(&ctx.limits, instruction.arg).map_err(unresolvable)?
        {
            return Ok(Dispatch::Enter(call));
        }
        let flow = self.execute(opcode, instruction.arg).map_err(unresolvable)?;
        match flow {
            Flow::Next => self.counter = self.next_offset(address),
            Flow::Jump(target) => self.counter = target,
            Flow::Return => {}
        }
        Ok(Dispatch::Done(flow))
    }

    /// Whether an unsafe opcode may run here: an allowlist entry overrides
    /// the caller's flag, through its guard when it has one.
    fn permitted(&self, opcode: Opcode, arg: u32, allow_unsafe: bool) -> Result<bool, FaultCause> {
        match self.allowed.get(&opcode) {
            None => Ok(allow_unsafe),
            Some(None) => Ok(true),
            Some(Some(guard)) => {
                let extras = [
                    ("arg", Value::Int(i64::from(arg))),
                    ("stack", Value::tuple(self.stack.clone())),
                ];
                self.with_layers(&extras, |layers| guard.is_met(layers))
                    .map_err(|exc| FaultCause::Guard(ExprError::Runtime(exc)))
            }
        }
    }

    fn execute(&mut self, opcode: Opcode, arg: u32) -> Result<Flow, FaultCause> {
        match opcode {
            Opcode::Nop => {}
            Opcode::PopTop => {
                self.need(1)?;
                self.stack.pop();
            }
            Opcode::RotTwo => self.rotate(2)?,
            Opcode::RotThree => self.rotate(3)?,
            Opcode::RotFour => self.rotate(4)?,
            Opcode::DupTop => {
                self.need(1)?;
                let top = self.peek(0).clone();
                self.stack.push(top);
            }
            Opcode::DupTopTwo => {
                self.need(2)?;
                let (second, top) = (self.peek(1).clone(), self.peek(0).clone());
                self.stack.push(second);
                self.stack.push(top);
            }
            Opcode::UnaryPositive | Opcode::UnaryNegative | Opcode::UnaryNot | Opcode::UnaryInvert => {
                self.need(1)?;
                let op = UnaryOp::from_opcode(opcode).ok_or_else(|| dispatch_error(opcode))?;
                let result = unary_op(op, self.peek(0))?;
                self.replace_top(1, result);
            }
            Opcode::BinarySubscr => {
                self.need(2)?;
                let result = collections::subscript(self.peek(1), self.peek(0))?;
                self.replace_top(2, result);
            }
            Opcode::CompareOp => {
                self.need(2)?;
                let op = CompareOp::from_operand(arg).ok_or_else(|| {
                    SimpleException::new_msg(ExcType::SystemError, format!("unknown comparison operator {arg}"))
                })?;
                let result = compare(op, self.peek(1), self.peek(0))?;
                self.replace_top(2, result);
            }
            Opcode::IsOp => {
                self.need(2)?;
                let result = identity(self.peek(1), self.peek(0), arg != 0);
                self.replace_top(2, result);
            }
            Opcode::ContainsOp => {
                self.need(2)?;
                let result = membership(self.peek(1), self.peek(0), arg != 0)?;
                self.replace_top(2, result);
            }
            Opcode::ReturnValue => {
                if self.depth == 0 {
                    return Err(FaultCause::ReturnOutsideCall);
                }
                self.need(1)?;
                return Ok(Flow::Return);
            }
            Opcode::LoadConst => {
                let value = self.code.constants().get(arg as usize).cloned().ok_or_else(|| index_error("constant", arg))?;
                self.stack.push(value);
            }
            Opcode::LoadName => {
                let name = self.name_at(arg)?;
                let value = self
                    .locals
                    .get(&name)
                    .or_else(|| self.globals.get(&name))
                    .cloned()
                    .or_else(|| self.builtins.borrow().get(&name).cloned())
                    .ok_or_else(|| ExcType::name_error(&name))?;
                self.stack.push(value);
            }
            Opcode::StoreName => {
                self.need(1)?;
                let name = self.name_at(arg)?;
                let value = self.pop_top();
                self.locals.insert(name, value);
            }
            Opcode::LoadGlobal => {
                let name = self.name_at(arg)?;
                let value = self
                    .globals
                    .get(&name)
                    .cloned()
                    .or_else(|| self.builtins.borrow().get(&name).cloned())
                    .ok_or_else(|| ExcType::name_error(&name))?;
                self.stack.push(value);
            }
            Opcode::StoreGlobal => {
                self.need(1)?;
                let name = self.name_at(arg)?;
                let value = self.pop_top();
                self.globals.insert(name, value);
            }
            Opcode::LoadFast => {
                let name = self.varname_at(arg)?;
                let value = self.locals.get(&name).cloned().ok_or_else(|| ExcType::unbound_local(&name))?;
                self.stack.push(value);
            }
            Opcode::StoreFast => {
                self.need(1)?;
                let name = self.varname_at(arg)?;
                let value = self.pop_top();
                self.locals.insert(name, value);
            }
            Opcode::BuildTuple | Opcode::BuildList => {
                let count = arg as usize;
                self.need(count)?;
                let items = self.stack.split_off(self.stack.len() - count);
                self.stack.push(if opcode == Opcode::BuildTuple {
                    Value::tuple(items)
                } else {
                    Value::list(items)
                });
            }
            Opcode::UnpackSequence => {
                self.need(1)?;
                let items = collections::unpack(self.peek(0), arg as usize)?;
                self.stack.pop();
                self.stack.extend(items.into_iter().rev());
            }
            Opcode::JumpForward => return Ok(Flow::Jump(self.jump_target(arg, true))),
            Opcode::JumpAbsolute => return Ok(Flow::Jump(self.jump_target(arg, false))),
            Opcode::PopJumpIfFalse | Opcode::PopJumpIfTrue => {
                self.need(1)?;
                let jump_when = opcode == Opcode::PopJumpIfTrue;
                let condition = self.pop_top().is_truthy();
                if condition == jump_when {
                    return Ok(Flow::Jump(self.jump_target(arg, false)));
                }
            }
            Opcode::JumpIfFalseOrPop | Opcode::JumpIfTrueOrPop => {
                self.need(1)?;
                let jump_when = opcode == Opcode::JumpIfTrueOrPop;
                if self.peek(0).is_truthy() == jump_when {
                    return Ok(Flow::Jump(self.jump_target(arg, false)));
                }
                self.stack.pop();
            }
            Opcode::MakeFunction => self.make_function(arg)?,
            Opcode::CallFunction => self.call_builtin(arg)?,
            _ => {
                let (op, inplace) = BinaryOp::from_opcode(opcode).ok_or_else(|| dispatch_error(opcode))?;
                self.need(2)?;
                let (lhs, rhs) = (self.peek(1), self.peek(0));
                let result = if inplace { inplace_op(op, lhs, rhs)? } else { binary_op(op, lhs, rhs)? };
                self.replace_top(2, result);
            }
        }
        Ok(Flow::Next)
    }

    // ========================================================================
    // Handler helpers
    // ========================================================================

    fn need(&self, needed: usize) -> Result<(), FaultCause> {
        let available = self.stack.len();
        if available < needed {
            Err(FaultCause::StackUnderflow { needed, available })
        } else {
            Ok(())
        }
    }

    /// The value `depth` places below the top. Callers check `need` first.
    fn peek(&self, depth: usize) -> &Value {
        &self.stack[self.stack.len() - 1 - depth]
    }

    fn pop_top(&mut self) -> Value {
        self.stack.pop().unwrap_or(Value::None)
    }

    /// Replaces the top `count` values with `value`.
    fn replace_top(&mut self, count: usize, value: Value) {
        self.stack.truncate(self.stack.len() - count);
        self.stack.push(value);
    }

    /// Moves the top of the stack `count - 1` places down.
    fn rotate(&mut self, count: usize) -> Result<(), FaultCause> {
        self.need(count)?;
        let start = self.stack.len() - count;
        self.stack[start..].rotate_right(1);
        Ok(())
    }

    fn name_at(&self, arg: u32) -> Result<String, FaultCause> {
        self.code.names().get(arg as usize).cloned().ok_or_else(|| index_error("name", arg))
    }

    fn varname_at(&self, arg: u32) -> Result<String, FaultCause> {
        self.code
            .varnames()
            .get(arg as usize)
            .cloned()
            .ok_or_else(|| index_error("local variable", arg))
    }

    /// Byte offset a jump operand refers to.
    fn jump_target(&self, arg: u32, relative: bool) -> usize {
        let delta = if self.version.jumps_by_instruction() {
            arg as usize * 2
        } else {
            arg as usize
        };
        if relative {
            self.next_offset(self.counter) + delta
        } else {
            delta
        }
    }

    pub(crate) fn child(&self, code: Rc<CodeObject>, locals: Scope, globals: Scope) -> Self {
        Self {
            depth: self.depth + 1,
            ..Self::with_scopes(code, self.version, locals, globals, Rc::clone(&self.builtins))
        }
    }
}

fn index_error(table: &str, arg: u32) -> FaultCause {
    SimpleException::new_msg(ExcType::SystemError, format!("{table} index {arg} out of range")).into()
}

fn dispatch_error(opcode: Opcode) -> FaultCause {
    SimpleException::new_msg(ExcType::SystemError, format!("no handler for {opcode}")).into()
}
