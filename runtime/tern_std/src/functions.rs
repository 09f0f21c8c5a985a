//! Core native functions.
//!
//! | Function | Signature | Result |
//! |---|---|---|
//! | `toString` | `(item)` | the item's `to_string` operator result |
//! | `describe` | `(item, [depth], [max_len])` | bounded description; `nil` limits are unbounded |
//! | `len` | `(item)` | the item's `len` property |
//! | `sleep` | `(seconds)` | `nil` after the wait; idles the task meanwhile |
//!
//! `toString` and `len` run an operator on their argument that may go deep,
//! so they arm a resumption that moves the operator's result into the call's
//! result slot.

use std::time::Duration;

use tern_core::errors::{interrupted, param_error};
use tern_core::{
    native_fn, step, BlockingOp, CancelToken, FunctionRef, Operator, Outcome, Value, Vm,
};

/// Every function installed by [`crate::install`].
pub fn all() -> Vec<FunctionRef> {
    vec![
        native_fn("toString", "(item)", to_string),
        native_fn("describe", "(item, [depth], [max_len])", describe),
        native_fn("len", "(item)", len),
        native_fn("sleep", "(seconds)", sleep),
    ]
}

fn to_string(vm: &mut Vm<'_>, arg_count: usize) -> Outcome {
    apply_to_item(vm, arg_count, Operator::ToString, "toString", "(item)")
}

fn len(vm: &mut Vm<'_>, arg_count: usize) -> Outcome {
    apply_to_item(vm, arg_count, Operator::get_property("len"), "len", "(item)")
}

/// Invoke the unary `op` on the single argument and return its result.
fn apply_to_item(
    vm: &mut Vm<'_>,
    arg_count: usize,
    op: Operator,
    function: &str,
    signature: &str,
) -> Outcome {
    if arg_count != 1 {
        return Err(param_error(function, signature));
    }
    let item = vm.top()?.clone();
    let mark = vm.if_deep(step::from_fn("return_top", |vm, _| {
        let result = vm.pop()?;
        vm.stack_result(2, result)
    }));
    vm.push(item);
    vm.invoke(&op)?;
    if vm.went_deep(mark) {
        return Ok(());
    }
    let result = vm.pop()?;
    vm.stack_result(2, result)
}

fn limit(value: Option<&Value>, default: Option<usize>) -> Outcome<Option<usize>> {
    let Some(value) = value else {
        return Ok(default);
    };
    if value.is_nil() {
        return Ok(None);
    }
    value
        .as_int()
        .and_then(|n| usize::try_from(n).ok())
        .map(Some)
        .ok_or_else(|| param_error("describe", "(item, [depth], [max_len])"))
}

fn describe(vm: &mut Vm<'_>, arg_count: usize) -> Outcome {
    if !(1..=3).contains(&arg_count) {
        return Err(param_error("describe", "(item, [depth], [max_len])"));
    }
    let depth = limit(vm.param(1, arg_count), vm.config().describe_depth)?;
    let max_len = limit(vm.param(2, arg_count), vm.config().describe_max_len)?;
    let text = match vm.param(0, arg_count) {
        Some(item) => vm.describe(item, depth, max_len),
        None => return Err(param_error("describe", "(item, [depth], [max_len])")),
    };
    let result = vm.new_string(text);
    vm.stack_result(arg_count + 1, result)
}

fn sleep(vm: &mut Vm<'_>, arg_count: usize) -> Outcome {
    let seconds = match vm.param(0, arg_count).map(Value::as_number) {
        Some(Some(seconds)) if arg_count == 1 && seconds >= 0.0 && seconds.is_finite() => {
            seconds
        }
        _ => return Err(param_error("sleep", "(seconds)")),
    };
    vm.idle(Box::new(Sleep {
        duration: Duration::from_secs_f64(seconds),
        arg_count,
    }))
}

/// Timed wait that wakes early on cancellation.
struct Sleep {
    duration: Duration,
    arg_count: usize,
}

impl BlockingOp for Sleep {
    fn name(&self) -> &str {
        "sleep"
    }

    fn block(&mut self, cancel: &CancelToken) -> Outcome {
        if cancel.wait_timeout(self.duration) {
            return Err(interrupted());
        }
        Ok(())
    }

    fn complete(self: Box<Self>, vm: &mut Vm<'_>) -> Outcome {
        vm.stack_result(self.arg_count + 1, Value::nil())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tern_core::{FailureClass, Runtime, StepRef};

    use super::*;

    fn runtime() -> Runtime {
        let mut runtime = Runtime::new();
        crate::install(&mut runtime).unwrap();
        runtime
    }

    fn call(name: &str, args: Vec<StepRef>) -> StepRef {
        let argc = args.len();
        let mut steps = vec![step::load(name)];
        steps.extend(args);
        steps.push(step::call(argc));
        step::sequence(steps)
    }

    fn text(runtime: &mut Runtime, value: &Value) -> Option<String> {
        runtime.with_vm(|vm| vm.as_str(value).map(str::to_owned))
    }

    #[test]
    fn to_string_of_scalars() {
        let mut runtime = runtime();
        let result = runtime.evaluate(call("toString", vec![step::push(2.5)])).unwrap();
        assert_eq!(text(&mut runtime, &result).as_deref(), Some("2.5"));
    }

    #[test]
    fn to_string_leaves_one_slot() {
        let mut runtime = runtime();
        let program = step::sequence([
            step::push(1_i64),
            call("toString", vec![step::push(true)]),
            step::pop(1),
        ]);
        assert_eq!(runtime.evaluate(program).unwrap(), Value::int(1));
    }

    #[test]
    fn len_of_containers_and_strings() {
        let mut runtime = runtime();
        let array = step::sequence([
            step::push(1_i64),
            step::push(2_i64),
            step::create("Array", 2),
        ]);
        assert_eq!(runtime.evaluate(call("len", vec![array])).unwrap(), Value::int(2));

        let string = runtime.with_vm(|vm| vm.new_string("héllo"));
        assert_eq!(
            runtime.evaluate(call("len", vec![step::push(string)])).unwrap(),
            Value::int(5)
        );

        let failure = runtime.evaluate(call("len", vec![step::push(1_i64)])).unwrap_err();
        assert_eq!(failure.class(), FailureClass::Access);
    }

    #[test]
    fn wrong_arity_is_a_param_failure() {
        let mut runtime = runtime();
        let failure = runtime.evaluate(call("len", vec![])).unwrap_err();
        assert_eq!(failure.class(), FailureClass::Param);
        let failure = runtime
            .evaluate(call("sleep", vec![step::push(-1_i64)]))
            .unwrap_err();
        assert_eq!(failure.class(), FailureClass::Param);
    }

    #[test]
    fn describe_uses_explicit_limits() {
        let mut runtime = runtime();
        let nested = step::sequence([
            step::push(1_i64),
            step::create("Array", 1),
            step::create("Array", 1),
        ]);
        let result = runtime
            .evaluate(call("describe", vec![nested, step::push(1_i64)]))
            .unwrap();
        assert_eq!(text(&mut runtime, &result).as_deref(), Some("[...]"));

        let long = runtime.with_vm(|vm| vm.new_string("abcdefgh"));
        let result = runtime
            .evaluate(call(
                "describe",
                vec![step::push(long), step::push(Value::nil()), step::push(3_i64)],
            ))
            .unwrap();
        assert_eq!(text(&mut runtime, &result).as_deref(), Some("\"abc...\""));
    }

    #[test]
    fn sleep_returns_nil() {
        let mut runtime = runtime();
        let result = runtime.evaluate(call("sleep", vec![step::push(0.001)])).unwrap();
        assert_eq!(result, Value::nil());
    }
}
