//! The debugging session: a chain of frames and the command surface over it.
//!
//! The innermost frame is the current one; frames it was called from are
//! kept in `callers`, root first. Every frame records its caller as an index
//! into that list, so the chain can be walked without references between
//! frames.
//!
//! Commands either succeed or leave the whole session untouched: faults come
//! back from [`Debugger::step`] and [`Debugger::cont`], contract violations
//! from the other commands.

use std::{iter, mem, rc::Rc, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    assembler,
    bytecode::{CodeObject, Context, Flow, Frame, Instruction, Instructions, Opcode},
    error::LoadError,
    expressions::{Condition, ExprError},
    fault::{ContractError, Fault, FaultCause},
    namespace::Scope,
    pyc::{self, PycError},
    resource::{ExecutionBudget, InterruptHandle, ResourceLimits},
    tracer::{NoopTracer, VmTracer},
    value::Value,
    version::{NATIVE_MAGIC, NATIVE_VERSION, Version, magic_for_version},
};

/// An interactive debugging session over one program.
#[derive(Debug)]
pub struct Debugger<Tr: VmTracer = NoopTracer> {
    current: Frame,
    /// Suspended callers, root first.
    callers: Vec<Frame>,
    limits: ResourceLimits,
    interrupt: InterruptHandle,
    tracer: Tr,
}

impl Debugger<NoopTracer> {
    /// Starts a session at the first instruction of `code`.
    #[must_use]
    pub fn new(code: CodeObject, version: Version) -> Self {
        Self {
            current: Frame::new(Rc::new(code), version),
            callers: Vec::new(),
            limits: ResourceLimits::new(),
            interrupt: InterruptHandle::new(),
            tracer: NoopTracer,
        }
    }

    /// Assembles a listing and starts a session on it.
    pub fn from_assembly(source: &str, filename: &str) -> Result<Self, LoadError> {
        let code = assembler::assemble(source, filename)?;
        Ok(Self::new(code, NATIVE_VERSION))
    }

    /// Decodes a compiled module and starts a session on it.
    pub fn from_module(data: &[u8]) -> Result<Self, LoadError> {
        let (version, code) = pyc::read_module(data)?;
        Ok(Self::new(code, version))
    }

    /// Loads either kind of input, telling them apart by the module sentinel.
    pub fn load(data: &[u8], filename: &str) -> Result<Self, LoadError> {
        if pyc::is_module(data) {
            Self::from_module(data)
        } else {
            Self::from_assembly(std::str::from_utf8(data)?, filename)
        }
    }

    /// Restores a session written by [`Debugger::dump`].
    ///
    /// Every frame gets the one restored builtins scope.
    pub fn load_session(bytes: &[u8]) -> Result<Self, postcard::Error> {
        let session: Session = postcard::from_bytes(bytes)?;
        let builtins = Rc::new(std::cell::RefCell::new(session.builtins));
        let mut current = session.current;
        let mut callers = session.callers;
        for frame in callers.iter_mut().chain(iter::once(&mut current)) {
            frame.set_builtins(Rc::clone(&builtins));
        }
        Ok(Self {
            current,
            callers,
            limits: session.limits,
            interrupt: InterruptHandle::new(),
            tracer: NoopTracer,
        })
    }
}

/// Owned form of a session dump.
#[derive(Deserialize)]
struct Session {
    current: Frame,
    callers: Vec<Frame>,
    builtins: Scope,
    limits: ResourceLimits,
}

/// Borrowed form of a session dump; field order matches [`Session`].
#[derive(Serialize)]
struct SessionRef<'a> {
    current: &'a Frame,
    callers: &'a [Frame],
    builtins: &'a Scope,
    limits: ResourceLimits,
}

impl<Tr: VmTracer> Debugger<Tr> {
    /// Replaces the tracer.
    pub fn with_tracer<T: VmTracer>(self, tracer: T) -> Debugger<T> {
        Debugger {
            current: self.current,
            callers: self.callers,
            limits: self.limits,
            interrupt: self.interrupt,
            tracer,
        }
    }

    #[must_use]
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn limits(&self) -> ResourceLimits {
        self.limits
    }

    /// A handle that stops `step`, `cont` and nested calls from another thread.
    #[must_use]
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    #[must_use]
    pub fn tracer(&self) -> &Tr {
        &self.tracer
    }

    pub fn into_tracer(self) -> Tr {
        self.tracer
    }

    // ========================================================================
    // Frames
    // ========================================================================

    #[must_use]
    pub fn current(&self) -> &Frame {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut Frame {
        &mut self.current
    }

    #[must_use]
    pub fn root(&self) -> &Frame {
        self.callers.first().unwrap_or(&self.current)
    }

    /// Number of frames above the root.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.callers.len()
    }

    /// Frames from the current one out to the root.
    pub fn traverse_calls(&self) -> impl Iterator<Item = &Frame> + Clone {
        iter::once(&self.current).chain(self.callers.iter().rev())
    }

    /// The `n`-th frame of [`Self::traverse_calls`].
    #[must_use]
    pub fn frame(&self, n: usize) -> Option<&Frame> {
        self.traverse_calls().nth(n)
    }

    #[must_use]
    pub fn current_opcode(&self) -> Option<Instruction> {
        self.current.current_instruction()
    }

    #[must_use]
    pub fn opcodes(&self) -> Instructions<'_> {
        self.current.opcodes()
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Executes up to `count` instructions, stopping at the first fault.
    ///
    /// `RETURN_VALUE` in a called frame returns into its caller, which then
    /// becomes current.
    pub fn step(&mut self, count: usize, allow_unsafe: bool) -> Result<(), Fault> {
        for _ in 0..count {
            self.step_once(allow_unsafe)?;
        }
        Ok(())
    }

    /// Steps until a fault, or until the counter reaches a breakpoint whose
    /// guard holds. `Ok` means a breakpoint stop.
    ///
    /// The instruction at the starting address always runs, so continuing from
    /// a breakpoint moves on.
    pub fn cont(&mut self, allow_unsafe: bool) -> Result<(), Fault> {
        let mut budget = ExecutionBudget::begin_execution(&self.limits);
        loop {
            if let Err(err) = budget.tick() {
                let address = self.current.counter();
                return Err(self.report(Fault::Unresolvable {
                    address,
                    cause: FaultCause::Resource(err),
                }));
            }
            self.step_once(allow_unsafe)?;
            let counter = self.current.counter();
            if self.current.is_breakpoint(counter) {
                self.tracer.on_breakpoint(counter, self.depth());
                return Ok(());
            }
        }
    }

    fn step_once(&mut self, allow_unsafe: bool) -> Result<(), Fault> {
        let address = self.current.counter();
        if self.interrupt.is_interrupted() {
            return Err(self.report(Fault::Interrupted { address }));
        }
        let mut ctx = Context::new(self.limits, &self.interrupt, &mut self.tracer);
        match self.current.step(&mut ctx, allow_unsafe) {
            Ok(Flow::Return) => self.return_call().map_err(|_| {
                self.report(Fault::Unresolvable {
                    address,
                    cause: FaultCause::ReturnOutsideCall,
                })
            }),
            Ok(Flow::Next | Flow::Jump(_)) => Ok(()),
            Err(fault) => Err(self.report(fault)),
        }
    }

    fn report(&mut self, fault: Fault) -> Fault {
        self.tracer.on_fault(fault.address(), &fault);
        fault
    }

    /// Calls the function below the top `argc` values and makes its frame current.
    ///
    /// Without `argc` the current instruction must be `CALL_FUNCTION`; its
    /// operand is used and the caller resumes after it once the call returns.
    pub fn call(&mut self, argc: Option<usize>) -> Result<(), ContractError> {
        let (argc, from_instruction) = match argc {
            Some(argc) => (argc, false),
            None => match self.current.current_instruction() {
                Some(Instruction {
                    opcode: Some(Opcode::CallFunction),
                    arg,
                    ..
                }) => (arg as usize, true),
                _ => return Err(ContractError::NotACallInstruction),
            },
        };
        let stack = self.current.stack();
        if stack.len() < argc + 1 {
            return Err(ContractError::StackUnderflow {
                needed: argc + 1,
                available: stack.len(),
            });
        }
        let base = stack.len() - argc - 1;
        let Value::Function(function) = &stack[base] else {
            return Err(ContractError::NotAFunction {
                type_name: stack[base].type_name(),
            });
        };
        let function = Rc::clone(function);
        let mut child = self
            .current
            .spawn_child(&function, stack[base + 1..].to_vec(), &self.limits)?;

        for _ in 0..=argc {
            self.current.pop(None)?;
        }
        if from_instruction {
            self.current.advance_past_current();
        }
        child.set_parent(Some(self.callers.len()));
        self.callers.push(mem::replace(&mut self.current, child));
        self.tracer.on_call(Some(&function.name), self.depth());
        Ok(())
    }

    /// Pops the current frame, pushing its top of stack onto the caller.
    pub fn return_call(&mut self) -> Result<(), ContractError> {
        if self.callers.is_empty() {
            return Err(ContractError::NoParentFrame);
        }
        if self.current.stack().is_empty() {
            return Err(ContractError::EmptyStack);
        }
        let value = self.current.pop(None)?;
        if let Some(caller) = self.callers.pop() {
            self.current = caller;
            self.current.push(value);
        }
        self.tracer.on_return(self.depth());
        Ok(())
    }

    /// Moves the counter past `count` instructions without running them.
    pub fn increment(&mut self, count: usize) {
        self.current.increment(count);
    }

    // ========================================================================
    // Breakpoints and permissions
    // ========================================================================

    /// Toggles a breakpoint in the current frame; see [`Frame::toggle_breakpoint`].
    pub fn toggle_breakpoint(&mut self, address: usize, condition: Option<&str>) -> Result<(), ContractError> {
        let condition = condition.map(Condition::parse).transpose()?;
        self.current.toggle_breakpoint(address, condition);
        Ok(())
    }

    /// Lets the named unsafe opcode run during safe stepping, optionally
    /// only while `condition` holds.
    pub fn allow(&mut self, name: &str, condition: Option<&str>) -> Result<(), ContractError> {
        let opcode = parse_opcode(name)?;
        let condition = condition.map(Condition::parse).transpose()?;
        self.current.allow(opcode, condition);
        Ok(())
    }

    /// Withdraws a permission, returning whether there was one.
    pub fn disallow(&mut self, name: &str) -> Result<bool, ContractError> {
        Ok(self.current.disallow(parse_opcode(name)?))
    }

    // ========================================================================
    // State
    // ========================================================================

    pub fn save(&mut self) {
        self.current.save();
    }

    pub fn restore(&mut self, n: usize) -> Result<(), ContractError> {
        self.current.restore(n)
    }

    pub fn push(&mut self, value: Value) {
        self.current.push(value);
    }

    /// Evaluates `source` in the current frame and pushes the result.
    pub fn push_expr(&mut self, source: &str) -> Result<(), ContractError> {
        let value = self.current.evaluate(source)?;
        self.current.push(value);
        Ok(())
    }

    pub fn pop(&mut self, index: Option<isize>) -> Result<Value, ContractError> {
        self.current.pop(index)
    }

    /// Binds a builtin, visible from every frame of the session.
    pub fn set_builtin(&mut self, name: &str, value: Value) {
        self.current.builtins().borrow_mut().insert(name.to_owned(), value);
    }

    pub fn evaluate(&self, source: &str) -> Result<Value, ExprError> {
        self.current.evaluate(source)
    }

    // ========================================================================
    // Persistence and export
    // ========================================================================

    /// Encodes the current frame's code object as a module file.
    ///
    /// Code decoded from a legacy module keeps that module's magic and layout.
    pub fn export(&self) -> Result<Vec<u8>, PycError> {
        let magic = magic_for_version(self.current.version()).unwrap_or(NATIVE_MAGIC);
        pyc::write_module_for(self.current.code(), magic)
    }

    /// Serializes the whole session: frames, breakpoints, permissions,
    /// savepoints, builtins and limits.
    pub fn dump(&self) -> Result<Vec<u8>, postcard::Error> {
        let builtins = self.current.builtins().borrow();
        postcard::to_allocvec(&SessionRef {
            current: &self.current,
            callers: &self.callers,
            builtins: &builtins,
            limits: self.limits,
        })
    }
}

fn parse_opcode(name: &str) -> Result<Opcode, ContractError> {
    Opcode::from_str(&name.to_ascii_uppercase()).map_err(|_| ContractError::UnknownOpcode(name.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::{RecordingTracer, TraceEvent};

    const CALLS: &str = "
        LOAD_CONST@code: add
            .argcount 2
            .varnames ('a', 'b')
            LOAD_FAST @ a
            LOAD_FAST @ b
            BINARY_ADD
            RETURN_VALUE
        LOAD_CONST @ 'add'
        MAKE_FUNCTION 0
        STORE_NAME @ add
        LOAD_NAME @ add
        LOAD_CONST @ 1
        LOAD_CONST @ 2
        CALL_FUNCTION 2
        STORE_NAME @ x
    ";

    fn session() -> Debugger {
        Debugger::from_assembly(CALLS, "<test>").unwrap()
    }

    #[test]
    fn test_call_and_return_through_commands() {
        let mut dbg = session();
        dbg.step(7, false).unwrap();
        assert_eq!(dbg.current_opcode().and_then(|i| i.opcode), Some(Opcode::CallFunction));
        let before = dbg.current().stack().len();

        dbg.call(None).unwrap();
        assert_eq!(dbg.depth(), 1);
        assert_eq!(dbg.current().locals().get("a"), Some(&Value::Int(1)));
        assert_eq!(dbg.current().parent(), Some(0));

        dbg.step(2, false).unwrap();
        let fault = dbg.step(1, false).unwrap_err();
        assert!(fault.is_unsafe_operation());
        dbg.step(2, true).unwrap();

        assert_eq!(dbg.depth(), 0);
        assert_eq!(dbg.current().stack().len(), before - 2);
        assert_eq!(dbg.current().stack().last(), Some(&Value::Int(3)));
        dbg.step(1, false).unwrap();
        assert_eq!(dbg.current().locals().get("x"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_call_contract_errors_leave_state() {
        let mut dbg = session();
        assert_eq!(dbg.call(None), Err(ContractError::NotACallInstruction));
        dbg.step(1, false).unwrap();
        assert_eq!(dbg.call(Some(0)), Err(ContractError::NotAFunction { type_name: "code" }));
        assert_eq!(dbg.current().stack().len(), 1);
        assert_eq!(dbg.return_call(), Err(ContractError::NoParentFrame));
        assert_eq!(dbg.current().stack().len(), 1);
    }

    #[test]
    fn test_cont_stops_at_breakpoint_and_moves_on() {
        let mut dbg = session();
        dbg.toggle_breakpoint(6, None).unwrap();
        dbg.cont(true).unwrap();
        assert_eq!(dbg.current().counter(), 6);
        let fault = dbg.cont(true).unwrap_err();
        assert!(matches!(
            fault,
            Fault::Unresolvable {
                cause: FaultCause::EndOfCode,
                ..
            }
        ));
        assert_eq!(dbg.current().locals().get("x"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_conditional_breakpoint() {
        let mut dbg = Debugger::from_assembly(
            "
            LOAD_CONST @ 0
            STORE_NAME @ i
            loop:
            LOAD_NAME @ i
            LOAD_CONST @ 1
            BINARY_ADD
            STORE_NAME @ i
            JUMP_ABSOLUTE @ loop
            ",
            "<test>",
        )
        .unwrap();
        dbg.toggle_breakpoint(4, Some("i == 3")).unwrap();
        dbg.cont(true).unwrap();
        assert_eq!(dbg.evaluate("i").unwrap(), Value::Int(3));
        assert!(matches!(dbg.toggle_breakpoint(4, Some("i ==")), Err(ContractError::Expression(_))));
    }

    #[test]
    fn test_cont_respects_operation_limit() {
        let mut dbg = Debugger::from_assembly("loop:\nNOP\nJUMP_ABSOLUTE @ loop\n", "<test>")
            .unwrap()
            .with_limits(ResourceLimits::new().max_operations(10));
        let fault = dbg.cont(false).unwrap_err();
        assert!(matches!(
            fault,
            Fault::Unresolvable {
                cause: FaultCause::Resource(_),
                ..
            }
        ));
    }

    #[test]
    fn test_interrupt() {
        let mut dbg = session();
        let handle = dbg.interrupt_handle();
        handle.interrupt();
        assert_eq!(dbg.step(1, true), Err(Fault::Interrupted { address: 0 }));
        assert!(handle.reset());
        dbg.step(1, true).unwrap();
    }

    #[test]
    fn test_allow_by_name() {
        let mut dbg = Debugger::from_assembly("LOAD_CONST @ 2\nLOAD_CONST @ 3\nBINARY_ADD\n", "<test>").unwrap();
        assert_eq!(
            dbg.allow("FROBNICATE", None),
            Err(ContractError::UnknownOpcode("FROBNICATE".to_owned()))
        );
        dbg.allow("binary_add", Some("arg == 0")).unwrap();
        dbg.step(3, false).unwrap();
        assert_eq!(dbg.current().stack(), &[Value::Int(5)]);
        assert_eq!(dbg.disallow("BINARY_ADD"), Ok(true));
        assert_eq!(dbg.disallow("BINARY_ADD"), Ok(false));
    }

    #[test]
    fn test_builtins_are_shared_with_callees() {
        let mut dbg = session();
        dbg.step(7, false).unwrap();
        dbg.call(None).unwrap();
        dbg.set_builtin("answer", Value::Int(42));
        assert_eq!(dbg.root().builtins().borrow().get("answer"), Some(&Value::Int(42)));
    }

    #[test]
    fn test_traverse_calls_is_innermost_first() {
        let mut dbg = session();
        dbg.step(7, false).unwrap();
        dbg.call(None).unwrap();
        let names: Vec<&str> = dbg.traverse_calls().map(|f| f.code().name()).collect();
        assert_eq!(names, vec!["add", "<module>"]);
        assert_eq!(dbg.traverse_calls().count(), 2);
        assert_eq!(dbg.frame(1).map(Frame::depth), Some(0));
    }

    #[test]
    fn test_tracer_sees_calls_and_faults() {
        let mut dbg = session().with_tracer(RecordingTracer::new());
        dbg.step(7, false).unwrap();
        dbg.call(None).unwrap();
        dbg.step(3, false).unwrap_err();
        let events = dbg.into_tracer().into_events();
        assert!(events.contains(&TraceEvent::Call {
            func_name: Some("add".to_owned()),
            depth: 1,
        }));
        assert!(matches!(events.last(), Some(TraceEvent::Fault { ip: 4, .. })));
    }

    #[test]
    fn test_export_round_trips() {
        let dbg = session();
        let bytes = dbg.export().unwrap();
        let again = Debugger::load(&bytes, "ignored").unwrap();
        assert_eq!(again.current().version(), NATIVE_VERSION);
        assert_eq!(**again.current().code(), **dbg.current().code());
    }
}
