//! End-to-end scenarios over a runtime with the standard library installed.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use tern_core::step;
use tern_core::{
    Describer, FailureClass, HandlerInfo, HandlerRef, Heap, Instance, Operator, Outcome, Runtime,
    StepRef, TaskState, Tracer, TypeHandler, Value, Vm,
};

fn runtime() -> Runtime {
    let mut runtime = Runtime::new();
    tern_std::install(&mut runtime).unwrap();
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

/// A box whose string form is `toString(inner)`, computed by calling back
/// into the interpreter.
struct BoxHandler {
    info: HandlerInfo,
}

impl TypeHandler for BoxHandler {
    fn info(&self) -> &HandlerInfo {
        &self.info
    }

    fn to_string(&self, vm: &mut Vm<'_>, instance: Option<Instance>) -> Outcome {
        let Some(instance) = instance else {
            return Err(tern_core::errors::access_error("box without instance"));
        };
        let inner = vm.heap().get::<Value>(instance)?.clone();
        let mark = vm.if_deep(step::from_fn("box_finish", |vm, _| {
            let text = vm.pop()?;
            vm.stack_result(1, text)
        }));
        vm.push_step(call("toString", vec![step::push(inner)]));
        assert!(vm.went_deep(mark));
        Ok(())
    }

    fn mark(&self, heap: &Heap, instance: Instance, tracer: &mut Tracer) {
        if let Ok(inner) = heap.get::<Value>(instance) {
            tracer.value(inner);
        }
    }

    fn describe(&self, out: &mut Describer<'_>, instance: Instance, depth: Option<usize>) {
        out.write_str("Box(");
        if let Ok(inner) = out.heap().get::<Value>(instance) {
            out.value(inner, Describer::nested(depth));
        }
        out.write_str(")");
    }
}

#[test]
fn arithmetic_dispatch() {
    let mut runtime = runtime();
    let program = step::sequence([step::push(3_i64), step::push(4_i64), step::apply(Operator::Add)]);
    assert_eq!(runtime.evaluate(program).unwrap(), Value::int(7));
}

#[test]
fn unsupported_operator_fails_the_task() {
    let mut runtime = runtime();
    let id = runtime.spawn(step::sequence([
        step::push(1_i64),
        step::push(true),
        step::push(0_i64),
        step::apply(Operator::GetIndex),
    ]));
    runtime.run();
    let task = runtime.task(id).unwrap();
    assert_eq!(task.state(), TaskState::Failed);
    assert_eq!(task.depth(), 3);
    assert_eq!(
        task.failure().map(tern_core::Failure::class),
        Some(FailureClass::UnsupportedOperation)
    );
}

#[test]
fn nested_deep_calls_leave_one_result() {
    let mut runtime = runtime();
    let boxes: HandlerRef = Arc::new(BoxHandler {
        info: HandlerInfo::new("Box", None),
    });
    runtime.register_handler(boxes.clone()).unwrap();
    let core = runtime.with_vm(|vm| vm.new_string("core"));
    let inner = runtime.gc_store(&boxes, core);
    let outer = runtime.gc_store(&boxes, inner);

    let program = step::sequence([
        step::push(5_i64),
        call("toString", vec![step::push(outer.clone())]),
        step::store("text"),
        step::pop(1),
    ]);
    assert_eq!(runtime.evaluate(program).unwrap(), Value::int(5));
    let stored = runtime.global("text").cloned().unwrap();
    assert_eq!(text(&mut runtime, &stored).as_deref(), Some("core"));

    let described = runtime.with_vm(|vm| vm.describe(&outer, None, None));
    assert_eq!(described, "Box(Box(\"core\"))");
}

#[test]
fn sleeping_task_yields_and_observes_cancellation() {
    let mut runtime = runtime();
    let sleeper = runtime.spawn(call("sleep", vec![step::push(30_i64)]));
    let token = runtime.cancel_token(sleeper).unwrap();
    let other = runtime.spawn(step::sequence([
        step::push(true),
        step::store("other_ran"),
        step::from_fn("cancel_sleeper", move |vm, _| {
            token.cancel();
            vm.push(Value::int(1));
            Ok(())
        }),
    ]));

    runtime.run();

    assert_eq!(runtime.join(other), Some(Ok(Value::int(1))));
    assert_eq!(runtime.global("other_ran"), Some(&Value::boolean(true)));
    let task = runtime.task(sleeper).unwrap();
    assert_eq!(task.state(), TaskState::Failed);
    assert!(!task.is_idle());
    let failure = runtime.join(sleeper).unwrap().unwrap_err();
    assert_eq!(failure.class(), FailureClass::Interrupted);
}

#[test]
fn concurrent_sleepers_all_finish() {
    let mut runtime = runtime();
    let ids: Vec<_> = (0..3)
        .map(|_| {
            runtime.spawn(step::sequence([
                call("sleep", vec![step::push(0.01)]),
                step::pop(1),
                step::push(1_i64),
            ]))
        })
        .collect();
    runtime.run();
    for id in ids {
        assert_eq!(runtime.join(id), Some(Ok(Value::int(1))));
    }
}

#[test]
fn cyclic_containers_are_collected_once_unreachable() {
    let mut runtime = runtime();
    let program = step::sequence([
        step::push(1_i64),
        step::create("Array", 1),
        step::create("Array", 1),
        step::store("a"),
        step::pop(1),
        // a[0][0] = a
        step::load("a"),
        step::push(0_i64),
        step::apply(Operator::GetIndex),
        step::push(0_i64),
        step::load("a"),
        step::apply(Operator::SetIndex),
        step::pop(1),
        step::push(Value::nil()),
    ]);
    runtime.evaluate(program).unwrap();
    let live_before = runtime.heap().live();
    assert_eq!(runtime.collect().freed, 0);

    runtime.set_global("a", Value::nil());
    let stats = runtime.collect();
    assert_eq!(stats.freed, 2);
    assert_eq!(stats.live, live_before - 2);
}

#[test]
fn dictionary_holds_its_values_alive() {
    let mut runtime = runtime();
    let program = step::sequence([
        step::push(1_i64),
        step::push(1_i64),
        step::push(2_i64),
        step::create("Array", 2),
        step::create("Dictionary", 2),
        step::store("d"),
    ]);
    let dict = runtime.evaluate(program).unwrap();
    runtime.collect();
    let described = runtime.with_vm(|vm| vm.describe(&dict, None, None));
    assert_eq!(described, "[1 => [1, 2]]");
}

proptest! {
    #[test]
    fn binary_operators_replace_two_slots_with_one(
        filler in 0_usize..4,
        a in any::<i64>(),
        b in any::<i64>(),
        op in prop_oneof![
            Just(Operator::Add),
            Just(Operator::Sub),
            Just(Operator::Mul),
            Just(Operator::Compare),
        ],
    ) {
        let mut runtime = runtime();
        let depths = runtime.with_vm(|vm| {
            for n in 0..filler {
                vm.push(Value::int(i64::try_from(n).unwrap()));
            }
            vm.push(Value::int(a));
            vm.push(Value::int(b));
            let before = vm.depth();
            let outcome = vm.invoke(&op);
            (before, vm.depth(), outcome.is_ok())
        });
        let (before, after, ok) = depths;
        if ok {
            prop_assert_eq!(after, before - 1);
        } else {
            // Only checked overflow fails, before touching the stack.
            prop_assert_eq!(after, before);
        }
    }
}
