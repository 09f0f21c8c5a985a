use pretty_assertions::assert_eq;

use super::*;
use crate::errors::FailureClass;
use crate::handler::{HandlerRef, TypeHandler};
use crate::test_support::{node_handler, NodeHandler};

fn node(heap: &mut Heap, handler: &std::sync::Arc<NodeHandler>, children: Vec<Value>) -> Value {
    let handler: HandlerRef = handler.clone();
    let instance = heap.gc_store(handler.clone(), Box::new(children));
    Value::tracked(handler, instance)
}

#[test]
fn rooted_instances_survive() {
    let handler = node_handler();
    let mut heap = Heap::new(16);
    let leaf = node(&mut heap, &handler, vec![]);
    let root = node(&mut heap, &handler, vec![leaf.clone(), Value::int(1)]);

    let stats = heap.collect(|tracer| tracer.value(&root));

    assert_eq!(stats.marked, 2);
    assert_eq!(stats.freed, 0);
    assert_eq!(stats.live, 2);
    assert!(heap.contains(leaf.instance().unwrap()));
    assert_eq!(handler.disposed(), 0);
    assert_eq!(handler.info().last_mark(), stats.epoch);
}

#[test]
fn unreachable_instances_are_disposed_exactly_once() {
    let handler = node_handler();
    let mut heap = Heap::new(16);
    let orphan = node(&mut heap, &handler, vec![Value::int(1)]);

    let first = heap.collect(|_| {});
    let second = heap.collect(|_| {});

    assert_eq!(first.freed, 1);
    assert_eq!(second.freed, 0);
    assert_eq!(handler.disposed(), 1);
    assert_eq!(heap.live(), 0);
    assert_eq!(heap.stats().passes, 2);
    assert!(!heap.contains(orphan.instance().unwrap()));
}

#[test]
fn unreachable_cycles_are_collected() {
    let handler = node_handler();
    let mut heap = Heap::new(16);
    let a = node(&mut heap, &handler, vec![Value::nil()]);
    let b = node(&mut heap, &handler, vec![a.clone()]);
    heap.get_mut::<Vec<Value>>(a.instance().unwrap()).unwrap()[0] = b.clone();

    let kept = heap.collect(|tracer| tracer.value(&a));
    assert_eq!(kept.freed, 0);

    let dropped = heap.collect(|_| {});
    assert_eq!(dropped.freed, 2);
    assert_eq!(handler.disposed(), 2);
}

#[test]
fn stale_handles_are_rejected_after_reuse() {
    let handler = node_handler();
    let mut heap = Heap::new(16);
    let old = node(&mut heap, &handler, vec![]);
    heap.collect(|_| {});
    let new = node(&mut heap, &handler, vec![]);

    let (old, new) = (old.instance().unwrap(), new.instance().unwrap());
    assert_eq!(old.index(), new.index());
    assert_ne!(old.generation(), new.generation());
    let failure = heap.get::<Vec<Value>>(old).unwrap_err();
    assert_eq!(failure.class(), FailureClass::Access);
    assert!(heap.get::<Vec<Value>>(new).is_ok());
}

#[test]
fn untracked_instances_are_roots_until_released() {
    let handler = node_handler();
    let mut heap = Heap::new(16);
    let child = node(&mut heap, &handler, vec![]);
    let owner = heap.store_untracked(handler.clone(), Box::new(vec![child.clone()]));

    heap.collect(|_| {});
    assert!(heap.contains(owner));
    assert!(heap.contains(child.instance().unwrap()));
    assert!(!heap.is_tracked(owner));

    heap.release(owner).unwrap();
    assert_eq!(handler.disposed(), 1);
    heap.collect(|_| {});
    assert_eq!(handler.disposed(), 2);
}

#[test]
fn tracked_instances_cannot_be_released() {
    let handler = node_handler();
    let mut heap = Heap::new(16);
    let tracked = node(&mut heap, &handler, vec![]);
    let failure = heap.release(tracked.instance().unwrap()).unwrap_err();
    assert_eq!(failure.class(), FailureClass::Access);
    assert_eq!(handler.disposed(), 0);
}

#[test]
fn typed_access_checks_the_data_type() {
    let handler = node_handler();
    let mut heap = Heap::new(16);
    let value = node(&mut heap, &handler, vec![]);
    let failure = heap.get::<String>(value.instance().unwrap()).unwrap_err();
    assert_eq!(failure.class(), FailureClass::Type);
}

#[test]
fn threshold_requests_collection() {
    let handler = node_handler();
    let mut heap = Heap::new(2);
    node(&mut heap, &handler, vec![]);
    assert!(!heap.should_collect());
    node(&mut heap, &handler, vec![]);
    assert!(heap.should_collect());
    heap.collect(|_| {});
    assert!(!heap.should_collect());
}
