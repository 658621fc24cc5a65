use std::sync::{Arc, Mutex};

use crate::schema::mapping::SourceMeta;

// ─── Call Stack ─────────────────────────────────────────────────────────────

/// One frame of function-call provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub file_path: Option<String>,
    pub function_name: String,
    pub location: Option<SourceMeta>,
}

/// A LIFO of in-flight function calls, scoped to a single call context.
/// Sibling concurrent evaluations each own their own stack, so a plain
/// mutex suffices; there is never contention across evaluations.
#[derive(Debug, Default)]
pub struct CallStack {
    calls: Vec<Call>,
}

impl CallStack {
    pub fn push(&mut self, call: Call) {
        self.calls.push(call);
    }

    pub fn pop(&mut self) -> Option<Call> {
        self.calls.pop()
    }

    /// A reversed copy of the stack — top of stack first — so diagnostics
    /// print in natural order.
    pub fn snapshot(&self) -> Vec<Call> {
        self.calls.iter().rev().cloned().collect()
    }

    pub fn depth(&self) -> usize {
        self.calls.len()
    }
}

/// Per-request evaluation context carrying the call stack and the file the
/// evaluation originates from.
#[derive(Debug, Default)]
pub struct CallContext {
    pub file_path: Option<String>,
    stack: Arc<Mutex<CallStack>>,
}

impl CallContext {
    pub fn new(file_path: Option<String>) -> Self {
        Self {
            file_path,
            stack: Arc::new(Mutex::new(CallStack::default())),
        }
    }

    pub fn snapshot(&self) -> Vec<Call> {
        match self.stack.lock() {
            Ok(stack) => stack.snapshot(),
            Err(poisoned) => poisoned.into_inner().snapshot(),
        }
    }

    /// Push a frame and return a guard that pops it when dropped, so the
    /// frame is released on every exit path of the call.
    pub fn enter(&self, function_name: &str, location: Option<SourceMeta>) -> CallFrameGuard {
        let call = Call {
            file_path: self.file_path.clone(),
            function_name: function_name.to_string(),
            location,
        };
        match self.stack.lock() {
            Ok(mut stack) => stack.push(call),
            Err(poisoned) => poisoned.into_inner().push(call),
        }
        CallFrameGuard {
            stack: Arc::clone(&self.stack),
        }
    }
}

pub struct CallFrameGuard {
    stack: Arc<Mutex<CallStack>>,
}

impl Drop for CallFrameGuard {
    fn drop(&mut self) {
        match self.stack.lock() {
            Ok(mut stack) => {
                stack.pop();
            }
            Err(poisoned) => {
                poisoned.into_inner().pop();
            }
        }
    }
}
