//! Execution tracing for the debugger.
//!
//! The [`VmTracer`] trait defines hook points at key execution events
//! (instruction dispatch, frame push/pop, faults, breakpoint stops). The
//! debugger carries the tracer as a type parameter, so with [`NoopTracer`]
//! every hook compiles away.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | No-op (default) |
//! | [`StderrTracer`] | Human-readable execution log to stderr |
//! | [`RecordingTracer`] | Full event recording for post-mortem analysis |
//!
//! ```ignore
//! let mut debugger = Debugger::from_assembly(source, "<demo>")?.with_tracer(StderrTracer::with_limit(100));
//! debugger.cont(true);
//! ```

use crate::{bytecode::Opcode, fault::Fault};

/// Trace event captured by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    /// An instruction is about to execute.
    Instruction {
        /// Byte offset of the instruction.
        ip: usize,
        opcode: Opcode,
        /// Operand stack size before the instruction.
        stack_depth: usize,
        /// Depth of the executing frame (0 for the root).
        frame_depth: usize,
    },
    /// A child frame was pushed.
    Call { func_name: Option<String>, depth: usize },
    /// A child frame was popped; `depth` is the depth after the pop.
    Return { depth: usize },
    /// A step or continue stopped on a fault.
    Fault { ip: usize, fault: Fault },
    /// `cont` stopped at a breakpoint.
    Breakpoint { ip: usize, depth: usize },
}

/// Trait for debugger execution tracing.
///
/// All methods have default no-op implementations; implementations override
/// only the hooks they care about.
pub trait VmTracer: std::fmt::Debug {
    /// Called before each instruction executes, including instructions of
    /// functions run to completion by `CALL_FUNCTION`.
    ///
    /// This is the hottest hook. Implementations should be as lightweight as possible.
    #[inline(always)]
    fn on_instruction(&mut self, _ip: usize, _opcode: Opcode, _stack_depth: usize, _frame_depth: usize) {}

    /// Called when a frame is pushed, with the depth after the push.
    #[inline(always)]
    fn on_call(&mut self, _func_name: Option<&str>, _depth: usize) {}

    /// Called when a frame is popped, with the depth after the pop.
    #[inline(always)]
    fn on_return(&mut self, _depth: usize) {}

    /// Called when a step stops on a fault.
    #[inline(always)]
    fn on_fault(&mut self, _ip: usize, _fault: &Fault) {}

    /// Called when `cont` stops at a breakpoint.
    #[inline(always)]
    fn on_breakpoint(&mut self, _ip: usize, _depth: usize) {}
}

// ============================================================================
// NoopTracer
// ============================================================================

/// A tracer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

// ============================================================================
// StderrTracer — human-readable execution log
// ============================================================================

/// Tracer that prints a human-readable execution log to stderr.
///
/// Output format:
/// ```text
/// [    0] LOAD_CONST            stack=0  frames=0
/// [    2] CALL_FUNCTION         stack=2  frames=0
///   >>> CALL f                    depth=1
///   <<< RETURN                    depth=0
///   !!! FAULT at 4: unsafe operation BINARY_ADD at 4
/// ```
#[derive(Debug, Default)]
pub struct StderrTracer {
    /// Maximum number of instructions to trace; `None` is unlimited.
    limit: Option<usize>,
    count: usize,
    stopped: bool,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tracer that goes quiet after `limit` instructions.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }
}

impl VmTracer for StderrTracer {
    #[inline]
    fn on_instruction(&mut self, ip: usize, opcode: Opcode, stack_depth: usize, frame_depth: usize) {
        if self.stopped {
            return;
        }
        eprintln!("[{ip:>5}] {:<21} stack={stack_depth}  frames={frame_depth}", opcode.mnemonic());
        self.count += 1;
        if let Some(limit) = self.limit
            && self.count >= limit
        {
            eprintln!("--- trace limit reached ({limit} instructions) ---");
            self.stopped = true;
        }
    }

    fn on_call(&mut self, func_name: Option<&str>, depth: usize) {
        if self.stopped {
            return;
        }
        let name = func_name.unwrap_or("<anonymous>");
        eprintln!("  >>> CALL {name:<20} depth={depth}");
    }

    fn on_return(&mut self, depth: usize) {
        if self.stopped {
            return;
        }
        eprintln!("  <<< RETURN                    depth={depth}");
    }

    fn on_fault(&mut self, ip: usize, fault: &Fault) {
        if self.stopped {
            return;
        }
        eprintln!("  !!! FAULT at {ip}: {fault}");
    }

    fn on_breakpoint(&mut self, ip: usize, depth: usize) {
        if self.stopped {
            return;
        }
        eprintln!("  *** BREAK at {ip}            depth={depth}");
    }
}

// ============================================================================
// RecordingTracer — full event recording
// ============================================================================

/// Tracer that records every event.
///
/// Allocates per event, so use it for tests and short executions.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
    limit: Option<usize>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a recording tracer that stops recording after `limit` events.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            events: Vec::with_capacity(limit.min(1024)),
            limit: Some(limit),
        }
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    fn record(&mut self, event: TraceEvent) {
        if self.limit.is_some_and(|l| self.events.len() >= l) {
            return;
        }
        self.events.push(event);
    }
}

impl VmTracer for RecordingTracer {
    #[inline]
    fn on_instruction(&mut self, ip: usize, opcode: Opcode, stack_depth: usize, frame_depth: usize) {
        self.record(TraceEvent::Instruction {
            ip,
            opcode,
            stack_depth,
            frame_depth,
        });
    }

    fn on_call(&mut self, func_name: Option<&str>, depth: usize) {
        self.record(TraceEvent::Call {
            func_name: func_name.map(str::to_owned),
            depth,
        });
    }

    fn on_return(&mut self, depth: usize) {
        self.record(TraceEvent::Return { depth });
    }

    fn on_fault(&mut self, ip: usize, fault: &Fault) {
        self.record(TraceEvent::Fault {
            ip,
            fault: fault.clone(),
        });
    }

    fn on_breakpoint(&mut self, ip: usize, depth: usize) {
        self.record(TraceEvent::Breakpoint { ip, depth });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_limit() {
        let mut tracer = RecordingTracer::with_limit(2);
        tracer.on_call(Some("f"), 1);
        tracer.on_return(0);
        tracer.on_breakpoint(4, 0);
        assert_eq!(
            tracer.events(),
            &[
                TraceEvent::Call {
                    func_name: Some("f".to_owned()),
                    depth: 1
                },
                TraceEvent::Return { depth: 0 },
            ]
        );
    }
}
