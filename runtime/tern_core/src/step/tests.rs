use pretty_assertions::assert_eq;

use super::*;
use crate::errors::FailureClass;
use crate::runtime::Runtime;
use crate::test_support::node_handler;

fn text_of(runtime: &mut Runtime, value: &Value) -> Option<String> {
    runtime.with_vm(|vm| vm.as_str(value).map(str::to_owned))
}

#[test]
fn sequence_runs_children_in_order() {
    let mut runtime = Runtime::new();
    let program = sequence([push(3_i64), push(4_i64), apply(Operator::Add)]);
    assert_eq!(runtime.evaluate(program).unwrap(), Value::int(7));
}

#[test]
fn empty_sequence_yields_nil() {
    let mut runtime = Runtime::new();
    let program = sequence(Vec::<StepRef>::new());
    assert_eq!(runtime.evaluate(program).unwrap(), Value::nil());
}

#[test]
fn pop_discards() {
    let mut runtime = Runtime::new();
    let program = sequence([push(1_i64), push(2_i64), pop(1)]);
    assert_eq!(runtime.evaluate(program).unwrap(), Value::int(1));
}

#[test]
fn if_takes_the_truthy_branch() {
    let mut runtime = Runtime::new();
    let program = if_else(push(true), push(1_i64), Some(push(2_i64)));
    assert_eq!(runtime.evaluate(program).unwrap(), Value::int(1));

    // Conditions go through `is_true`, so zero is false.
    let program = if_else(push(0_i64), push(1_i64), Some(push(2_i64)));
    assert_eq!(runtime.evaluate(program).unwrap(), Value::int(2));

    let program = if_else(push(false), push(1_i64), None);
    assert_eq!(runtime.evaluate(program).unwrap(), Value::nil());
}

#[test]
fn while_loop_counts_through_a_global() {
    let mut runtime = Runtime::new();
    runtime.set_global("i", Value::int(0));
    let cond = sequence([load("i"), push(3_i64), apply(Operator::Compare)]);
    let body = sequence([load("i"), apply(Operator::Inc), store("i"), pop(1)]);
    let program = sequence([while_loop(cond, body), load("i")]);
    assert_eq!(runtime.evaluate(program).unwrap(), Value::int(3));
}

#[test]
fn store_marks_the_value_copied() {
    let mut runtime = Runtime::new();
    let result = runtime.evaluate(sequence([push(5_i64), store("x")])).unwrap();
    assert_eq!(result, Value::int(5));
    let stored = runtime.global("x").unwrap();
    assert_eq!(stored, &Value::int(5));
    assert!(stored.is_copied());
}

#[test]
fn undefined_global_is_an_access_failure() {
    let mut runtime = Runtime::new();
    let failure = runtime.evaluate(load("missing")).unwrap_err();
    assert_eq!(failure.class(), FailureClass::Access);
    assert_eq!(failure.unwound(), &["load_global"]);
}

#[test]
fn create_uses_the_registered_handler() {
    let mut runtime = Runtime::new();
    runtime.register_handler(node_handler()).unwrap();
    let program = sequence([
        push(10_i64),
        push(20_i64),
        create("Node", 2),
        push(-1_i64),
        apply(Operator::GetIndex),
    ]);
    assert_eq!(runtime.evaluate(program).unwrap(), Value::int(20));

    let failure = runtime.evaluate(create("Missing", 0)).unwrap_err();
    assert_eq!(failure.class(), FailureClass::Access);
}

#[test]
fn try_recovers_with_the_failure_text() {
    let mut runtime = Runtime::new();
    let body = sequence([
        push(1_i64),
        push(1_i64),
        push(0_i64),
        apply(Operator::Div),
    ]);
    // The stack is cut back to the try frame, so only 7 remains below the
    // failure text.
    let program = sequence([push(7_i64), try_catch(body, None), pop(1)]);
    assert_eq!(runtime.evaluate(program).unwrap(), Value::int(7));

    let body = sequence([push(1_i64), push(0_i64), apply(Operator::Mod)]);
    let caught = runtime.evaluate(try_catch(body, None)).unwrap();
    assert_eq!(
        text_of(&mut runtime, &caught).as_deref(),
        Some("ArithmeticError: arithmetic error: modulo by zero")
    );
}

#[test]
fn catch_step_runs_on_the_failure_text() {
    let mut runtime = Runtime::new();
    let body = sequence([push(true), push(1_i64), apply(Operator::Sub)]);
    let catch = sequence([pop(1), push(99_i64)]);
    let program = try_catch(body, Some(catch));
    assert_eq!(runtime.evaluate(program).unwrap(), Value::int(99));
}

#[test]
fn try_without_failure_keeps_the_body_result() {
    let mut runtime = Runtime::new();
    let program = try_catch(push(5_i64), Some(push(0_i64)));
    assert_eq!(runtime.evaluate(program).unwrap(), Value::int(5));
}

#[test]
fn failure_in_catch_propagates() {
    let mut runtime = Runtime::new();
    let program = try_catch(
        sequence([push(1_i64), push(0_i64), apply(Operator::Div)]),
        Some(load("missing")),
    );
    let failure = runtime.evaluate(program).unwrap_err();
    assert_eq!(failure.class(), FailureClass::Access);
}

#[test]
fn unrecovered_failure_records_the_unwound_steps() {
    let mut runtime = Runtime::new();
    let program = sequence([
        sequence([push(1_i64), push(Value::nil()), apply(Operator::GetIndex)]),
        push(0_i64),
    ]);
    let failure = runtime.evaluate(program).unwrap_err();
    assert_eq!(failure.class(), FailureClass::UnsupportedOperation);
    assert_eq!(failure.unwound(), &["apply", "sequence"]);
}

#[test]
fn from_fn_sees_its_sequence_number() {
    let mut runtime = Runtime::new();
    let counter = from_fn("counter", |vm, seq| {
        if seq < 3 {
            vm.reenter(seq + 1)?;
            vm.push(Value::int(i64::try_from(seq).unwrap_or_default()));
            return Ok(());
        }
        let [a, b, c] = vm.operands::<3>()?;
        let sum = a.int_value() + b.int_value() + c.int_value();
        vm.stack_result(3, Value::int(sum))
    });
    assert_eq!(runtime.evaluate(counter).unwrap(), Value::int(3));
}
