//! Fault-isolating handler invocation.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::{self, ThreadId};

use serde_json::Value;
use tracing::error;

use crate::registry::{HandlerDescriptor, ThreadAffinity};

use super::DISPATCH_TARGET;
use super::context::CallContext;
use super::errors::{DispatchError, ExecutionFault};

/// Verifies that `descriptor` may run on the current thread.
///
/// Main-thread handlers may only run on `execution_thread`. A mismatch is a
/// wiring fault in the host and is logged at error level.
pub(crate) fn check_affinity(
    descriptor: &HandlerDescriptor,
    execution_thread: ThreadId,
) -> Result<(), ExecutionFault> {
    let current = thread::current().id();
    if descriptor.thread_affinity() == ThreadAffinity::MainThread && current != execution_thread
    {
        let fault = ExecutionFault::ThreadAffinityViolation {
            method: descriptor.method().to_owned(),
            affinity: descriptor.thread_affinity(),
            expected: execution_thread,
            actual: current,
        };
        error!(
            target: DISPATCH_TARGET,
            method = descriptor.method(),
            thread = thread::current().name().unwrap_or("<unnamed>"),
            error = %fault,
            "thread affinity violation"
        );
        return Err(fault);
    }
    Ok(())
}

/// Runs a handler, converting every failure, panics included, into a
/// [`DispatchError`].
pub(crate) fn run(
    descriptor: &HandlerDescriptor,
    context: &CallContext,
    params: Value,
) -> Result<Value, DispatchError> {
    match catch_unwind(AssertUnwindSafe(|| {
        descriptor.handler().call(context, params)
    })) {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(handler_error)) => Err(DispatchError::from_handler(
            descriptor.method(),
            handler_error,
        )),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(
                target: DISPATCH_TARGET,
                method = descriptor.method(),
                panic = message,
                "handler panicked"
            );
            Err(DispatchError::panicked(descriptor.method(), message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
