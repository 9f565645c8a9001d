//! Function construction and calls.
//!
//! `CALL_FUNCTION` on a bytecode function runs the callee in a temporary child
//! frame until it returns, so a single step of the caller covers the whole
//! call. Nested calls share one explicit frame stack rather than the native
//! one. The debugger's `call` command instead keeps the child frame live.

use std::rc::Rc;

use super::{Context, Dispatch, Flow, Frame};
use crate::{
    bytecode::code::{CodeObject, CompilerFlag},
    exception::{ExcType, SimpleException},
    fault::{ContractError, Fault, FaultCause},
    namespace::{Scope, merged},
    resource::{ExecutionBudget, ResourceLimits},
    value::{Function, Value},
    version::ANNOTATIONS_USES_TUPLE,
};

/// `MAKE_FUNCTION` flag bits, from fixed-width opcodes on.
const HAS_DEFAULTS: u32 = 0x01;
const HAS_KWDEFAULTS: u32 = 0x02;
const HAS_ANNOTATIONS: u32 = 0x04;
const HAS_CLOSURE: u32 = 0x08;

impl Frame {
    /// `MAKE_FUNCTION`: builds a function from the name on top of the stack,
    /// the code object below it and whatever the operand says lies beneath.
    pub(super) fn make_function(&mut self, arg: u32) -> Result<(), FaultCause> {
        let function = if self.version.has_fixed_width_opcodes() {
            self.function_from_flags(arg)?
        } else {
            self.function_from_counts(arg)?
        };
        self.stack.push(Value::Function(Rc::new(function)));
        Ok(())
    }

    fn function_from_flags(&mut self, flags: u32) -> Result<Function, FaultCause> {
        let extra = (flags & 0x0f).count_ones() as usize;
        self.need(2 + extra)?;
        let (code, name) = self.code_and_name()?;
        // optional values sit below the code in flag order, lowest bit deepest
        let mut cursor = self.stack.len() - 2 - extra;
        let mut take = |bit: u32| {
            (flags & bit != 0).then(|| {
                let value = self.stack[cursor].clone();
                cursor += 1;
                value
            })
        };
        let defaults = take(HAS_DEFAULTS);
        let kwdefaults = take(HAS_KWDEFAULTS);
        let annotations = take(HAS_ANNOTATIONS);
        let closure = take(HAS_CLOSURE);

        let defaults = match defaults {
            None => Vec::new(),
            Some(Value::Tuple(items)) => items.to_vec(),
            Some(other) => {
                return Err(ExcType::type_error(format!(
                    "function defaults must be a tuple, not {}",
                    other.type_name()
                ))
                .into());
            }
        };
        if self.version >= ANNOTATIONS_USES_TUPLE
            && let Some(annotations) = &annotations
            && !matches!(annotations, Value::Tuple(_))
        {
            return Err(ExcType::type_error(format!(
                "function annotations must be a tuple, not {}",
                annotations.type_name()
            ))
            .into());
        }

        self.stack.truncate(self.stack.len() - 2 - extra);
        Ok(Function {
            name,
            code,
            defaults,
            kwdefaults,
            annotations,
            closure,
        })
    }

    /// Before fixed-width opcodes the low byte counts positional defaults
    /// pushed as individual values. Before qualified names the function
    /// takes its name from the code object.
    fn function_from_counts(&mut self, arg: u32) -> Result<Function, FaultCause> {
        if arg >> 8 != 0 {
            return Err(SimpleException::new_msg(
                ExcType::SystemError,
                "keyword defaults and annotations in legacy MAKE_FUNCTION are not supported",
            )
            .into());
        }
        let count = (arg & 0xff) as usize;
        let (code, name, popped) = if self.version.has_qualified_names() {
            self.need(2 + count)?;
            let (code, name) = self.code_and_name()?;
            (code, name, 2)
        } else {
            self.need(1 + count)?;
            let code = self.code_at(0)?;
            let name = code.name().to_owned();
            (code, name, 1)
        };
        let start = self.stack.len() - popped - count;
        let defaults = self.stack[start..start + count].to_vec();
        self.stack.truncate(start);
        Ok(Function {
            name,
            code,
            defaults,
            kwdefaults: None,
            annotations: None,
            closure: None,
        })
    }

    fn code_at(&self, depth: usize) -> Result<Rc<CodeObject>, FaultCause> {
        match self.peek(depth) {
            Value::Code(code) => Ok(Rc::clone(code)),
            other => Err(ExcType::type_error(format!("expected a code object, not {}", other.type_name())).into()),
        }
    }

    fn code_and_name(&self) -> Result<(Rc<CodeObject>, String), FaultCause> {
        let code = self.code_at(1)?;
        let name = match self.peek(0) {
            Value::Str(name) => name.to_string(),
            other => {
                return Err(ExcType::type_error(format!(
                    "function name must be a string, not {}",
                    other.type_name()
                ))
                .into());
            }
        };
        Ok((code, name))
    }

    /// `CALL_FUNCTION` on anything but a bytecode function, which `dispatch`
    /// enters as a frame instead.
    pub(super) fn call_builtin(&mut self, argc: u32) -> Result<(), FaultCause> {
        let argc = argc as usize;
        self.need(argc + 1)?;
        let base = self.stack.len() - argc - 1;
        let result = match &self.stack[base] {
            Value::Builtin(builtin) => builtin.call(&self.stack[base + 1..])?,
            other => {
                return Err(ExcType::type_error(format!("'{}' object is not callable", other.type_name())).into());
            }
        };
        self.stack.truncate(base);
        self.stack.push(result);
        Ok(())
    }

    /// The frame for a `CALL_FUNCTION` with `argc` arguments, when the callee
    /// is a bytecode function. The stack is left as it is.
    pub(super) fn enter_call(&self, limits: &ResourceLimits, argc: u32) -> Result<Option<Box<PendingCall>>, FaultCause> {
        let Some(base) = self.stack.len().checked_sub(argc as usize + 1) else {
            return Ok(None);
        };
        let Value::Function(function) = &self.stack[base] else {
            return Ok(None);
        };
        let frame = self
            .spawn_child(function, self.stack[base + 1..].to_vec(), limits)
            .map_err(|err| match err {
                ContractError::Resource(err) => FaultCause::Resource(err),
                other => ExcType::type_error(other.to_string()).into(),
            })?;
        Ok(Some(Box::new(PendingCall {
            frame,
            name: function.name.clone(),
        })))
    }

    /// Runs `call` with unsafe opcodes permitted until it returns.
    ///
    /// Calls it makes in turn are pushed onto one frame stack and driven by
    /// this loop, so call depth is bounded by the recursion limit alone. One
    /// budget from `ctx.limits` covers the whole run.
    pub(super) fn run_call(ctx: &mut Context<'_>, call: PendingCall) -> Result<Value, FaultCause> {
        let mut budget = ExecutionBudget::begin_execution(&ctx.limits);
        ctx.tracer.on_call(Some(&call.name), call.frame.depth);
        let mut frames = vec![call.frame];
        loop {
            let Some(top) = frames.last_mut() else {
                return Err(FaultCause::ReturnOutsideCall);
            };
            let address = top.counter;
            let dispatched = if ctx.interrupt.is_interrupted() {
                Err(Fault::Interrupted { address })
            } else if let Err(err) = budget.tick() {
                Err(Fault::Unresolvable {
                    address,
                    cause: err.into(),
                })
            } else {
                top.dispatch(ctx, true)
            };
            match dispatched {
                Ok(Dispatch::Done(Flow::Return)) => {
                    let Some(value) = top.stack.pop() else {
                        let cause = FaultCause::StackUnderflow { needed: 1, available: 0 };
                        return Err(unwind(ctx, frames, Fault::Unresolvable { address, cause }));
                    };
                    let depth = top.depth;
                    frames.pop();
                    ctx.tracer.on_return(depth.saturating_sub(1));
                    match frames.last_mut() {
                        Some(caller) => caller.finish_call(value),
                        None => return Ok(value),
                    }
                }
                Ok(Dispatch::Done(_)) => {}
                Ok(Dispatch::Enter(call)) => {
                    ctx.tracer.on_call(Some(&call.name), call.frame.depth);
                    frames.push(call.frame);
                }
                Err(fault) => return Err(unwind(ctx, frames, fault)),
            }
        }
    }

    /// Replaces the callee and its arguments with `value` and moves past the
    /// `CALL_FUNCTION`.
    pub(super) fn finish_call(&mut self, value: Value) {
        let argc = self.current_instruction().map_or(0, |instruction| instruction.arg as usize);
        self.stack.truncate(self.stack.len().saturating_sub(argc + 1));
        self.stack.push(value);
        self.advance_past_current();
    }

    /// Builds the frame that executes `function` called with `args` from this frame.
    ///
    /// Defaults fill the trailing parameters. With the `VARARGS` flag, surplus
    /// arguments are collected into a tuple. The child's globals are this
    /// frame's locals merged over its globals; builtins are shared.
    pub fn spawn_child(
        &self,
        function: &Function,
        args: Vec<Value>,
        limits: &ResourceLimits,
    ) -> Result<Self, ContractError> {
        limits.check_recursion_depth(self.depth + 1)?;
        let code = &function.code;
        if code.kwonlyargcount() > 0 {
            return Err(ContractError::Unsupported(format!(
                "{}() has keyword-only parameters",
                function.name
            )));
        }
        let argcount = code.argcount() as usize;
        let varargs = code.flags().contains(CompilerFlag::Varargs);
        let needed_names = argcount + usize::from(varargs);
        if code.varnames().len() < needed_names {
            return Err(ContractError::Unsupported(format!(
                "{}() declares {needed_names} parameters but names {}",
                function.name,
                code.varnames().len()
            )));
        }

        let given = args.len();
        let mut args = args;
        let surplus = if given > argcount {
            if !varargs {
                return Err(ContractError::TooManyArguments {
                    name: function.name.clone(),
                    expected: argcount,
                    given,
                });
            }
            args.split_off(argcount)
        } else {
            Vec::new()
        };

        let defaults = &function.defaults;
        let mut args = args.into_iter();
        let mut locals = Scope::new();
        let mut missing = Vec::new();
        for (i, param) in code.varnames()[..argcount].iter().enumerate() {
            let default = || {
                (i + defaults.len())
                    .checked_sub(argcount)
                    .and_then(|j| defaults.get(j).cloned())
            };
            match args.next().or_else(default) {
                Some(value) => {
                    locals.insert(param.clone(), value);
                }
                None => missing.push(param.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(ContractError::MissingArguments {
                name: function.name.clone(),
                missing,
            });
        }
        if varargs {
            locals.insert(code.varnames()[argcount].clone(), Value::tuple(surplus));
        }

        let globals = merged(&self.globals, &self.locals);
        Ok(self.child(Rc::clone(code), locals, globals))
    }
}

/// A bytecode function call waiting to run in its own frame.
#[derive(Debug)]
pub(super) struct PendingCall {
    frame: Frame,
    name: String,
}

/// Folds a fault in the innermost of `frames` into the cause of the outermost
/// call, one `Nested` level per frame, leaving every frame on the way.
fn unwind(ctx: &mut Context<'_>, mut frames: Vec<Frame>, mut fault: Fault) -> FaultCause {
    while let Some(frame) = frames.pop() {
        ctx.tracer.on_return(frame.depth.saturating_sub(1));
        let Some(caller) = frames.last() else {
            return FaultCause::Nested(Box::new(fault));
        };
        fault = Fault::Unresolvable {
            address: caller.counter,
            cause: FaultCause::Nested(Box::new(fault)),
        };
    }
    FaultCause::Nested(Box::new(fault))
}
