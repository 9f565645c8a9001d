use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

/// Recommended maximum frame depth if not otherwise specified.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 200;

/// Error returned when a resource limit is exceeded during execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// Maximum number of executed instructions exceeded.
    Operation { limit: usize, count: usize },
    /// Maximum execution time exceeded.
    Time { limit: Duration, elapsed: Duration },
    /// Maximum frame depth exceeded.
    Recursion { limit: usize, depth: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operation { limit, count } => {
                write!(f, "operation limit exceeded: {count} > {limit}")
            }
            Self::Time { limit, elapsed } => {
                write!(f, "time limit exceeded: {elapsed:?} > {limit:?}")
            }
            Self::Recursion { limit, .. } => {
                write!(f, "maximum recursion depth exceeded ({limit})")
            }
        }
    }
}

impl std::error::Error for ResourceError {}

/// Configuration of resource limits for `cont` and for nested call runs.
///
/// All limits are optional; `None` disables a specific limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Maximum number of instructions per `cont` or per nested call run.
    pub max_operations: Option<usize>,
    /// Maximum wall-clock time per `cont` or per nested call run.
    pub max_duration: Option<Duration>,
    /// Maximum frame depth, counting the root frame as depth 0.
    pub max_recursion_depth: Option<usize>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceLimits {
    /// Creates limits with everything disabled except the recursion depth.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_operations: None,
            max_duration: None,
            max_recursion_depth: Some(DEFAULT_MAX_RECURSION_DEPTH),
        }
    }

    #[must_use]
    pub fn max_operations(mut self, limit: usize) -> Self {
        self.max_operations = Some(limit);
        self
    }

    #[must_use]
    pub fn max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    #[must_use]
    pub fn max_recursion_depth(mut self, limit: Option<usize>) -> Self {
        self.max_recursion_depth = limit;
        self
    }

    /// Fails if a frame at `depth` would exceed the configured limit.
    pub fn check_recursion_depth(&self, depth: usize) -> Result<(), ResourceError> {
        match self.max_recursion_depth {
            Some(limit) if depth > limit => Err(ResourceError::Recursion { limit, depth }),
            _ => Ok(()),
        }
    }
}

/// Per-run accounting of executed instructions and elapsed time.
///
/// Started fresh by every `cont` and by every `CALL_FUNCTION` that runs a
/// bytecode function, covering the calls it makes in turn.
#[derive(Debug, Clone)]
pub struct ExecutionBudget {
    max_operations: Option<usize>,
    operation_count: usize,
    deadline: Option<Instant>,
    deadline_limit: Option<Duration>,
}

impl ExecutionBudget {
    /// Starts one bounded execution run.
    #[must_use]
    pub fn begin_execution(limits: &ResourceLimits) -> Self {
        Self {
            max_operations: limits.max_operations,
            operation_count: 0,
            deadline: limits.max_duration.map(|limit| Instant::now() + limit),
            deadline_limit: limits.max_duration,
        }
    }

    /// Number of instructions charged so far.
    #[must_use]
    pub fn operation_count(&self) -> usize {
        self.operation_count
    }

    /// Charges one instruction, failing once a limit is exceeded.
    pub fn tick(&mut self) -> Result<(), ResourceError> {
        self.operation_count += 1;
        if let Some(limit) = self.max_operations
            && self.operation_count > limit
        {
            return Err(ResourceError::Operation {
                limit,
                count: self.operation_count,
            });
        }
        if let Some(deadline) = self.deadline {
            let now = Instant::now();
            if now >= deadline {
                let limit = self.deadline_limit.unwrap_or_default();
                return Err(ResourceError::Time {
                    limit,
                    elapsed: limit.saturating_add(now.duration_since(deadline)),
                });
            }
        }
        Ok(())
    }
}

/// Cancellation flag for long-running execution.
///
/// Cloned handles share one flag, so another thread can stop a `cont` in
/// progress. Execution checks the flag between instructions only, so an
/// interrupted frame is always at an instruction boundary.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests that execution stop at the next instruction boundary.
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clears a pending request, returning whether one was pending.
    pub fn reset(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_budget() {
        let limits = ResourceLimits::new().max_operations(2);
        let mut budget = ExecutionBudget::begin_execution(&limits);
        assert!(budget.tick().is_ok());
        assert!(budget.tick().is_ok());
        assert_eq!(budget.tick(), Err(ResourceError::Operation { limit: 2, count: 3 }));
    }

    #[test]
    fn test_zero_duration_expires_immediately() {
        let limits = ResourceLimits::new().max_duration(Duration::ZERO);
        let mut budget = ExecutionBudget::begin_execution(&limits);
        assert!(matches!(budget.tick(), Err(ResourceError::Time { .. })));
    }

    #[test]
    fn test_recursion_depth() {
        let limits = ResourceLimits::new().max_recursion_depth(Some(2));
        assert!(limits.check_recursion_depth(2).is_ok());
        assert_eq!(
            limits.check_recursion_depth(3),
            Err(ResourceError::Recursion { limit: 2, depth: 3 })
        );
        assert!(ResourceLimits::new().max_recursion_depth(None).check_recursion_depth(10_000).is_ok());
    }

    #[test]
    fn test_interrupt_handle_is_shared() {
        let handle = InterruptHandle::new();
        let clone = handle.clone();
        clone.interrupt();
        assert!(handle.is_interrupted());
        assert!(handle.reset());
        assert!(!clone.is_interrupted());
    }
}
