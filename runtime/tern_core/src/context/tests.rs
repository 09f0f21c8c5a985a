use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;

use super::*;
use crate::errors::FailureClass;
use crate::step;
use crate::test_support::WaitOp;

fn context() -> ExecutionContext {
    ExecutionContext::new(TaskId::new(1))
}

fn frame_names(ctx: &ExecutionContext) -> Vec<&'static str> {
    ctx.code.iter().map(|frame| frame.step.name()).collect()
}

#[test]
fn push_pop_and_top() {
    let mut ctx = context();
    ctx.push(Value::int(1));
    ctx.push(Value::int(2));
    assert_eq!(ctx.depth(), 2);
    assert_eq!(ctx.top().unwrap(), &Value::int(2));
    assert_eq!(ctx.pop().unwrap(), Value::int(2));
    assert_eq!(ctx.pop().unwrap(), Value::int(1));
    assert_eq!(ctx.pop().unwrap_err().class(), FailureClass::Param);
    assert_eq!(ctx.top().unwrap_err().class(), FailureClass::Param);
}

#[test]
fn operands_are_deepest_first() {
    let mut ctx = context();
    for n in 1..=3 {
        ctx.push(Value::int(n));
    }
    let [a, b] = ctx.operands::<2>().unwrap();
    assert_eq!((a, b), (&Value::int(2), &Value::int(3)));
    assert_eq!(ctx.depth(), 3);
    let failure = ctx.operands::<4>().unwrap_err();
    assert_eq!(failure.class(), FailureClass::Param);
}

#[test]
fn params_and_callee() {
    let mut ctx = context();
    ctx.push(Value::nil());
    ctx.push(Value::int(10));
    ctx.push(Value::int(20));
    assert_eq!(ctx.param(0, 2), Some(&Value::int(10)));
    assert_eq!(ctx.param(1, 2), Some(&Value::int(20)));
    assert_eq!(ctx.param(2, 2), None);
    assert_eq!(ctx.callee(2).unwrap(), &Value::nil());
    assert!(ctx.callee(3).is_err());
}

#[test]
fn stack_result_replaces_consumed_slots() {
    let mut ctx = context();
    ctx.push(Value::int(0));
    ctx.push(Value::int(3));
    ctx.push(Value::int(4));
    ctx.stack_result(2, Value::int(7)).unwrap();
    assert_eq!(ctx.data(), &[Value::int(0), Value::int(7)]);

    ctx.stack_result(0, Value::nil()).unwrap();
    assert_eq!(ctx.depth(), 3);
    assert!(ctx.stack_result(4, Value::nil()).is_err());
}

#[test]
fn frames_remember_data_depth() {
    let mut ctx = context();
    ctx.push(Value::int(1));
    ctx.push_step(step::pop(1));
    ctx.push(Value::int(2));
    ctx.push_step_at(step::pop(1), 3);
    assert_eq!(ctx.code_depth(), 2);
    assert_eq!(ctx.code[0].data_depth, 1);
    assert_eq!(ctx.code[1].data_depth, 2);
    assert_eq!(ctx.code[1].seq, 3);
}

#[test]
fn reenter_needs_a_running_step() {
    let mut ctx = context();
    let failure = ctx.reenter(1).unwrap_err();
    assert_eq!(failure.class(), FailureClass::Access);
    assert!(ctx.reenter_if_deep(1).is_err());
}

#[test]
fn armed_resumption_is_dropped_when_nothing_is_pushed() {
    let mut ctx = context();
    let mark = ctx.if_deep(step::pop(1));
    assert!(!ctx.went_deep(mark));
    assert!(ctx.armed.is_empty());
    assert_eq!(ctx.code_depth(), 0);
}

#[test]
fn armed_resumption_runs_after_pushed_work() {
    let mut ctx = context();
    let mark = ctx.if_deep(step::from_fn("resume", |_, _| Ok(())));
    ctx.push_step(step::from_fn("nested", |_, _| Ok(())));
    assert!(ctx.went_deep(mark));
    // The nested step is on top, so it runs first.
    assert_eq!(frame_names(&ctx), ["resume", "nested"]);
    assert!(ctx.armed.is_empty());
}

#[test]
fn nested_marks_are_independent() {
    let mut ctx = context();
    let outer = ctx.if_deep(step::from_fn("outer", |_, _| Ok(())));
    let inner = ctx.if_deep(step::from_fn("inner", |_, _| Ok(())));
    assert!(!ctx.went_deep(inner));
    assert_eq!(ctx.armed.len(), 1);

    ctx.push_step(step::from_fn("work", |_, _| Ok(())));
    assert!(ctx.went_deep(outer));
    assert_eq!(frame_names(&ctx), ["outer", "work"]);
}

#[test]
fn both_marks_flush_outermost_first() {
    let mut ctx = context();
    let outer = ctx.if_deep(step::from_fn("outer", |_, _| Ok(())));
    let inner = ctx.if_deep(step::from_fn("inner", |_, _| Ok(())));
    ctx.enter_deep();
    assert!(ctx.went_deep(inner));
    assert!(ctx.went_deep(outer));
    assert_eq!(frame_names(&ctx), ["outer", "inner"]);
}

#[test]
fn idle_and_unidle_are_paired() {
    let mut ctx = context();
    let wait = || Box::new(WaitOp { timeout: Duration::ZERO });
    ctx.idle(wait()).unwrap();
    assert!(ctx.is_idle());
    assert_eq!(ctx.yield_request, Some(Yield::Io));
    assert!(ctx.pending.is_some());

    let failure = ctx.idle(wait()).unwrap_err();
    assert_eq!(failure.class(), FailureClass::Access);

    ctx.unidle().unwrap();
    assert!(!ctx.is_idle());
    assert_eq!(ctx.state(), TaskState::Running);
}

#[test]
fn interruption_surfaces_at_idle_boundaries() {
    let mut ctx = context();
    ctx.idle(Box::new(WaitOp { timeout: Duration::ZERO })).unwrap();
    ctx.interrupt();
    assert!(ctx.interrupted());
    assert_eq!(ctx.unidle().unwrap_err().class(), FailureClass::Interrupted);
    assert!(!ctx.is_idle());

    let failure = ctx
        .idle(Box::new(WaitOp { timeout: Duration::ZERO }))
        .unwrap_err();
    assert_eq!(failure.class(), FailureClass::Interrupted);
    assert!(!ctx.is_idle());

    ctx.set_interrupted(false);
    assert!(ctx.check_interrupted().is_ok());
}

#[test]
fn abandon_idle_drops_the_pending_operation() {
    let mut ctx = context();
    ctx.idle(Box::new(WaitOp { timeout: Duration::ZERO })).unwrap();
    ctx.abandon_idle();
    assert!(!ctx.is_idle());
    assert!(ctx.pending.is_none());
}

#[test]
fn completion_takes_the_top_value() {
    let mut ctx = context();
    ctx.push(Value::int(1));
    ctx.push(Value::int(2));
    ctx.complete();
    assert_eq!(ctx.state(), TaskState::Completed);
    assert_eq!(ctx.result(), Some(&Value::int(2)));
    assert_eq!(ctx.depth(), 0);
    assert_eq!(ctx.take_outcome(), Some(Ok(Value::int(2))));
}

#[test]
fn failure_cuts_the_data_stack_and_clears_the_code_stack() {
    let mut ctx = context();
    ctx.push(Value::int(1));
    ctx.push_step(step::pop(1));
    ctx.push(Value::int(2));
    ctx.fail(interrupted(), 1);
    assert_eq!(ctx.state(), TaskState::Failed);
    assert_eq!(ctx.data(), &[Value::int(1)]);
    assert_eq!(ctx.code_depth(), 0);
    assert_eq!(ctx.failure().map(Failure::class), Some(FailureClass::Interrupted));
}

#[test]
fn cancel_wakes_a_waiting_thread() {
    let token = CancelToken::new();
    let waiter = {
        let token = token.clone();
        thread::spawn(move || token.wait_timeout(Duration::from_secs(30)))
    };
    thread::sleep(Duration::from_millis(20));
    token.cancel();
    assert!(waiter.join().unwrap());
    assert!(token.is_cancelled());

    token.reset();
    assert!(!token.wait_timeout(Duration::from_millis(5)));
}
