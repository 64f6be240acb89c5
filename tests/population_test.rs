//! Tests for background population through the TreeModel

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};

use lazytree::application::{
    ApplicationError, ModelIndex, PopulationOptions, TreeEvent, TreeModel,
};
use lazytree::domain::{
    empty_stream, EntityKey, GeneratorError, Item, ItemStream, NodeState, NodeTable,
    StaticGenerator, TreeGenerator, Value,
};
use lazytree::tree_traits::TreeNodeConvert;
use lazytree::util::testing;
use rstest::rstest;

const TIMEOUT: Duration = Duration::from_secs(10);

fn model(batch_size: usize) -> TreeModel {
    testing::init_test_setup();
    TreeModel::new(PopulationOptions {
        workers: 4,
        batch_size,
    })
    .unwrap()
}

fn settle(model: &TreeModel) {
    assert!(model.wait_until_idle(TIMEOUT), "population did not settle");
}

fn wait_for(events: &Receiver<TreeEvent>, matches: impl Fn(&TreeEvent) -> bool) -> TreeEvent {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = events.recv_timeout(remaining).expect("expected event");
        if matches(&event) {
            return event;
        }
    }
}

fn labels(model: &TreeModel, parent: &ModelIndex) -> Vec<String> {
    (0..model.row_count(parent))
        .filter_map(|row| model.index(row, 0, parent))
        .filter_map(|index| model.data(&index))
        .map(|value| value.to_string())
        .collect()
}

/// a -> (a1 -> a1x, a2), b -> b1
fn two_level_generator() -> StaticGenerator {
    StaticGenerator::new(&["Name", "Size"])
        .with_name("demo")
        .with_roots(vec![
            Item::new(1, vec!["a".into(), Value::Int(10)]),
            Item::new(2, vec!["b".into(), Value::Int(20)]),
        ])
        .with_children(1, vec![Item::named(11, "a1"), Item::named(12, "a2")])
        .with_children(2, vec![Item::named(21, "b1")])
        .with_children(11, vec![Item::named(111, "a1x")])
}

/// Records how often each key's children were requested.
struct CountingGenerator {
    inner: StaticGenerator,
    calls: Mutex<HashMap<EntityKey, usize>>,
}

impl CountingGenerator {
    fn new(inner: StaticGenerator) -> Self {
        Self {
            inner,
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn calls(&self, key: impl Into<EntityKey>) -> usize {
        self.calls.lock().unwrap().get(&key.into()).copied().unwrap_or(0)
    }
}

impl TreeGenerator for CountingGenerator {
    fn num_columns(&self) -> usize {
        self.inner.num_columns()
    }

    fn column_title(&self, column: usize) -> String {
        self.inner.column_title(column)
    }

    fn children(&self, parent: &EntityKey) -> ItemStream {
        *self.calls.lock().unwrap().entry(parent.clone()).or_insert(0) += 1;
        self.inner.children(parent)
    }

    fn initial_expansion_depth(&self) -> usize {
        self.inner.initial_expansion_depth()
    }
}

/// Roots after the first one are held back until the gate opens. Every
/// root has a single ungated child.
struct GatedGenerator {
    items: Vec<Item>,
    gate: Receiver<()>,
}

fn gated(names: &[&str]) -> (GatedGenerator, Sender<()>) {
    let (open, gate) = bounded(0);
    let items = names
        .iter()
        .enumerate()
        .map(|(i, name)| Item::named(i as u64 + 1, *name))
        .collect();
    (GatedGenerator { items, gate }, open)
}

impl TreeGenerator for GatedGenerator {
    fn num_columns(&self) -> usize {
        1
    }

    fn column_title(&self, _column: usize) -> String {
        "Name".into()
    }

    fn children(&self, parent: &EntityKey) -> ItemStream {
        if !parent.is_null() {
            let child = match (parent, self.items.iter().find(|item| item.key == *parent)) {
                (EntityKey::Id(id), Some(root)) => {
                    Item::named(id * 100, format!("{}.1", root.label()))
                }
                _ => return empty_stream(),
            };
            return Box::new(std::iter::once(Ok(child)));
        }
        let gate = self.gate.clone();
        Box::new(self.items.clone().into_iter().enumerate().map(move |(i, item)| {
            if i > 0 {
                // returns once a message arrives or the sender is dropped
                let _ = gate.recv();
            }
            Ok(item)
        }))
    }
}

/// Yields two roots, then fails.
struct FailingGenerator;

impl TreeGenerator for FailingGenerator {
    fn num_columns(&self) -> usize {
        1
    }

    fn column_title(&self, _column: usize) -> String {
        "Name".into()
    }

    fn children(&self, parent: &EntityKey) -> ItemStream {
        if !parent.is_null() {
            return empty_stream();
        }
        Box::new(
            vec![
                Ok(Item::named(1, "ok1")),
                Ok(Item::named(2, "ok2")),
                Err(GeneratorError::new("boom")),
                Ok(Item::named(3, "never")),
            ]
            .into_iter(),
        )
    }
}

struct PanickingGenerator;

impl TreeGenerator for PanickingGenerator {
    fn num_columns(&self) -> usize {
        1
    }

    fn column_title(&self, _column: usize) -> String {
        "Name".into()
    }

    fn children(&self, _parent: &EntityKey) -> ItemStream {
        panic!("generator exploded");
    }
}

/// Delegates to a static tree; items past the second of any stream wait
/// for the gate.
struct ThrottledGenerator {
    inner: StaticGenerator,
    gate: Receiver<()>,
}

impl TreeGenerator for ThrottledGenerator {
    fn num_columns(&self) -> usize {
        self.inner.num_columns()
    }

    fn column_title(&self, column: usize) -> String {
        self.inner.column_title(column)
    }

    fn children(&self, parent: &EntityKey) -> ItemStream {
        let gate = self.gate.clone();
        Box::new(self.inner.children(parent).enumerate().map(move |(i, item)| {
            if i > 1 {
                let _ = gate.recv();
            }
            item
        }))
    }

    fn initial_expansion_depth(&self) -> usize {
        self.inner.initial_expansion_depth()
    }
}

/// Three roots; key 100 appears below both `left` and `right`.
fn shared_graph() -> StaticGenerator {
    StaticGenerator::new(&["Name"])
        .with_initial_depth(3)
        .with_roots(vec![
            Item::named(1, "left"),
            Item::named(2, "right"),
            Item::named(3, "middle"),
        ])
        .with_children(1, vec![Item::named(100, "shared"), Item::named(11, "l1")])
        .with_children(
            2,
            vec![
                Item::named(100, "shared"),
                Item::named(21, "r1"),
                Item::named(22, "r2"),
            ],
        )
        .with_children(3, vec![Item::named(31, "m1")])
        .with_children(100, vec![Item::named(1000, "s1"), Item::named(1001, "s2")])
        .with_children(11, vec![Item::named(110, "l1x")])
}

fn wait_until(model: &TreeModel, reached: impl Fn(&NodeTable) -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !model.with_table(&reached) {
        assert!(Instant::now() < deadline, "condition not reached");
        thread::sleep(Duration::from_millis(5));
    }
}

/// Every node is reachable from the root and listed once by its parent.
fn assert_consistent(table: &NodeTable) {
    let mut visited = 0;
    for (id, node) in table.iter() {
        visited += 1;
        assert_ne!(node.state(), NodeState::InProgress, "{} still running", node.label());
        if node.is_duplicate() {
            assert!(node.children().is_empty());
        }
        if id == table.root() {
            assert_eq!(node.parent(), None);
            continue;
        }
        let parent = node.parent().expect("non-root node has a parent");
        assert!(table.contains(parent));
        let listed = table.children(parent).iter().filter(|c| **c == id).count();
        assert_eq!(listed, 1, "{} listed {} times", node.label(), listed);
    }
    assert_eq!(visited, table.len());
}

#[test]
fn given_generator_when_installed_then_roots_populate_in_background() {
    // Arrange
    let model = model(32);

    // Act
    model.install(Arc::new(two_level_generator()));
    settle(&model);

    // Assert
    let root = model.root();
    assert_eq!(model.node_state(&root), Some(NodeState::Done));
    assert_eq!(labels(&model, &root), vec!["a", "b"]);
    let a = model.index(0, 0, &root).unwrap();
    assert_eq!(model.node_state(&a), Some(NodeState::NotStarted));
    assert_eq!(model.row_count(&a), 0);
    assert!(model.has_children(&a));
}

#[test]
fn given_initial_depth_one_when_expanding_root_two_levels_then_exactly_two_levels() {
    // Arrange
    let model = model(32);
    model.install(Arc::new(two_level_generator()));
    settle(&model);
    let root = model.root();

    // Act
    model.expand(&root, 2).unwrap();
    settle(&model);

    // Assert
    let a = model.index(0, 0, &root).unwrap();
    let b = model.index(1, 0, &root).unwrap();
    assert_eq!(labels(&model, &a), vec!["a1", "a2"]);
    assert_eq!(labels(&model, &b), vec!["b1"]);
    assert_eq!(model.node_state(&a), Some(NodeState::Done));
    let a1 = model.index(0, 0, &a).unwrap();
    assert_eq!(model.node_state(&a1), Some(NodeState::NotStarted));
    assert_eq!(model.row_count(&a1), 0);
    assert_eq!(model.with_table(|t| t.depth()), 2);
}

#[test]
fn given_expansion_issued_during_initial_load_when_settled_then_depth_is_honoured() {
    let model = model(1);
    model.install(Arc::new(two_level_generator()));

    model.expand(&model.root(), 3).unwrap();
    settle(&model);

    assert_eq!(model.with_table(|t| t.depth()), 3);
    assert_eq!(model.with_table(|t| t.len()), 1 + 2 + 3 + 1);
}

#[test]
fn given_shared_key_under_parallel_parents_when_populating_then_one_canonical() {
    // Arrange
    let generator = Arc::new(CountingGenerator::new(
        StaticGenerator::new(&["Name"])
            .with_initial_depth(3)
            .with_roots(vec![Item::named(1, "left"), Item::named(2, "right")])
            .with_children(1, vec![Item::named(100, "shared via left")])
            .with_children(2, vec![Item::named(100, "shared via right")])
            .with_children(100, vec![Item::named(1000, "leaf")]),
    ));
    let model = model(32);

    // Act
    model.install(generator.clone());
    settle(&model);

    // Assert
    let shared: Vec<_> = model.with_table(|table| {
        table
            .iter()
            .filter(|(_, node)| node.item().key == EntityKey::from(100))
            .map(|(id, node)| (id, node.duplicate_of()))
            .collect()
    });
    assert_eq!(shared.len(), 2);
    let canonical: Vec<_> = shared.iter().filter(|(_, dup)| dup.is_none()).collect();
    assert_eq!(canonical.len(), 1);
    let canonical_id = canonical[0].0;
    for (id, dup) in &shared {
        if dup.is_some() {
            assert_eq!(*dup, Some(canonical_id));
            assert_eq!(model.with_table(|t| t.deduplicate(*id)), Some(canonical_id));
        }
    }
    assert_eq!(generator.calls(100), 1);
    assert_eq!(generator.calls(1000), 0);
    assert_eq!(model.with_table(|t| t.duplicate_count()), 1);
}

#[test]
fn given_duplicate_row_when_addressing_then_no_rows_and_canonical_resolves() {
    // Arrange
    let model = model(32);
    model.install(Arc::new(
        StaticGenerator::new(&["Name"])
            .with_roots(vec![Item::named(7, "original"), Item::named(7, "copy")])
            .with_children(7, vec![Item::named(8, "child")]),
    ));
    settle(&model);
    let root = model.root();
    let original = model.index(0, 0, &root).unwrap();
    let copy = model.index(1, 0, &root).unwrap();

    // Act
    model.expand(&copy, 1).unwrap();
    settle(&model);

    // Assert
    assert!(model.is_duplicate(&copy));
    assert_eq!(model.row_count(&copy), 0);
    assert!(!model.has_children(&copy));
    assert_eq!(model.data(&copy), Some(Value::from("copy")));
    assert_eq!(model.canonical(&copy), Some(original));
    assert_eq!(model.canonical(&original), Some(original));
    assert_eq!(model.node_state(&original), Some(NodeState::NotStarted));
}

#[test]
fn given_stream_error_when_draining_then_node_done_with_partial_rows() {
    // Arrange
    let model = model(1);

    // Act
    model.install(Arc::new(FailingGenerator));
    settle(&model);

    // Assert
    let root = model.root();
    assert_eq!(model.node_state(&root), Some(NodeState::Done));
    assert!(model.has_error(&root));
    assert_eq!(model.failure(&root).as_deref(), Some("boom"));
    assert_eq!(labels(&model, &root), vec!["ok1", "ok2"]);
}

#[test]
fn given_panicking_generator_when_draining_then_recorded_as_failure() {
    let model = model(32);

    model.install(Arc::new(PanickingGenerator));
    settle(&model);

    let root = model.root();
    assert_eq!(model.node_state(&root), Some(NodeState::Done));
    assert!(model.has_error(&root));
    assert_eq!(model.row_count(&root), 0);
}

#[test]
fn given_unknown_parent_key_when_expanding_then_done_without_rows() {
    let model = model(32);
    model.install(Arc::new(
        StaticGenerator::new(&["Name"]).with_roots(vec![Item::named(5, "orphan")]),
    ));
    settle(&model);
    let orphan = model.index(0, 0, &model.root()).unwrap();

    model.expand(&orphan, 1).unwrap();
    settle(&model);

    assert_eq!(model.node_state(&orphan), Some(NodeState::Done));
    assert_eq!(model.row_count(&orphan), 0);
    assert!(!model.has_error(&orphan));
    assert!(!model.has_children(&orphan));
}

#[test]
fn given_running_request_when_cancelled_then_node_cancelled_and_resumable() {
    // Arrange
    let model = model(1);
    let events = model.subscribe();
    let (generator, open) = gated(&["first", "second", "third"]);
    model.install(Arc::new(generator));
    wait_for(&events, |e| matches!(e, TreeEvent::RowsInserted { .. }));

    // Act
    assert!(model.cancel_running_request());
    drop(open);
    settle(&model);

    // Assert
    let root = model.root();
    assert_eq!(model.node_state(&root), Some(NodeState::Cancelled));
    assert_eq!(labels(&model, &root), vec!["first"]);
    wait_for(&events, |e| {
        matches!(e, TreeEvent::RequestFinished { cancelled: true, .. })
    });
    assert_eq!(model.title(), None);

    // Act: expanding again continues after the rows already present
    model.expand(&root, 1).unwrap();
    settle(&model);

    // Assert
    assert_eq!(model.node_state(&root), Some(NodeState::Done));
    assert_eq!(labels(&model, &root), vec!["first", "second", "third"]);
}

#[test]
fn given_idle_model_when_cancelling_then_nothing_to_cancel() {
    let model = model(32);
    model.install(Arc::new(two_level_generator()));
    settle(&model);

    assert!(!model.cancel_running_request());
}

#[test]
fn given_reinstall_during_population_when_old_results_arrive_then_discarded() {
    // Arrange
    let model = model(1);
    let events = model.subscribe();
    let (generator, open) = gated(&["old1", "old2", "old3"]);
    let first_generation = model.install(Arc::new(generator));
    wait_for(&events, |e| matches!(e, TreeEvent::RowsInserted { .. }));
    let stale = model.index(0, 0, &model.root()).unwrap();

    // Act
    let second_generation = model.install(Arc::new(two_level_generator()));
    drop(open);
    settle(&model);

    // Assert
    assert!(second_generation > first_generation);
    assert_eq!(labels(&model, &model.root()), vec!["a", "b"]);
    assert!(!model.is_valid(&stale));
    assert_eq!(model.data(&stale), None);
    assert!(matches!(
        model.expand(&stale, 1),
        Err(ApplicationError::StaleIndex { .. })
    ));
}

#[test]
fn given_install_when_population_finishes_then_one_request_and_name_resolved() {
    // Arrange
    let model = model(1);
    let events = model.subscribe();

    // Act
    let generation = model.install(Arc::new(two_level_generator().with_initial_depth(3)));
    settle(&model);

    // Assert
    let received: Vec<TreeEvent> = events.try_iter().collect();
    let started = received
        .iter()
        .filter(|e| matches!(e, TreeEvent::RequestStarted { .. }))
        .count();
    let finished = received
        .iter()
        .filter(|e| matches!(e, TreeEvent::RequestFinished { cancelled: false, .. }))
        .count();
    assert_eq!(started, 1);
    assert_eq!(finished, 1);
    assert_eq!(received.first(), Some(&TreeEvent::ModelReset { generation }));
    assert!(received.contains(&TreeEvent::TreeNameResolved {
        generation,
        name: "demo".into()
    }));
    assert_eq!(model.title().as_deref(), Some("demo"));
}

#[test]
fn given_sort_column_when_populating_then_rows_sorted() {
    let model = model(1);

    model.install(Arc::new(
        StaticGenerator::new(&["Name"])
            .with_sort_column(0)
            .with_roots(vec![
                Item::named(1, "cherry"),
                Item::named(2, "apple"),
                Item::named(3, "banana"),
            ]),
    ));
    settle(&model);

    assert_eq!(labels(&model, &model.root()), vec!["apple", "banana", "cherry"]);
}

#[test]
fn given_depth_zero_when_expanding_then_nothing_happens() {
    // Arrange
    let model = model(32);
    model.install(Arc::new(two_level_generator()));
    settle(&model);
    let events = model.subscribe();
    let a = model.index(0, 0, &model.root()).unwrap();

    // Act
    model.expand(&a, 0).unwrap();
    settle(&model);

    // Assert
    assert_eq!(model.node_state(&a), Some(NodeState::NotStarted));
    assert!(events.try_recv().is_err());
}

#[test]
fn given_populated_model_when_addressing_then_parent_row_and_columns_agree() {
    // Arrange
    let model = model(32);
    model.install(Arc::new(two_level_generator().with_initial_depth(2)));
    settle(&model);
    let root = model.root();

    // Act
    let b = model.index(1, 0, &root).unwrap();
    let b_size = model.index(1, 1, &root).unwrap();
    let b1 = model.index(0, 0, &b).unwrap();

    // Assert
    assert_eq!(model.column_count(), 2);
    assert_eq!(model.header_data(1).as_deref(), Some("Size"));
    assert_eq!(model.header_data(2), None);
    assert_eq!(model.data(&b_size), Some(Value::Int(20)));
    assert_eq!(b_size, b.sibling(1));
    assert_eq!(model.row(&b), Some(1));
    assert_eq!(model.parent(&b1), Some(b));
    assert_eq!(model.parent(&b), Some(root));
    assert_eq!(model.parent(&root), None);
    assert_eq!(model.index(5, 0, &root), None);
    assert_eq!(model.index(0, 2, &root), None);
    assert_eq!(model.data(&b1.sibling(1)), None);
}

#[test]
fn given_reset_when_generator_installed_then_only_root_remains() {
    // Arrange
    let model = model(32);
    let generation = model.install(Arc::new(two_level_generator()));
    settle(&model);

    // Act
    let after = model.reset();

    // Assert
    assert!(after > generation);
    assert_eq!(model.with_table(|t| t.len()), 1);
    assert_eq!(model.row_count(&model.root()), 0);

    // the generator stays installed, so the root can be populated again
    model.expand(&model.root(), 1).unwrap();
    settle(&model);
    assert_eq!(labels(&model, &model.root()), vec!["a", "b"]);
}

#[test]
fn given_cancelled_node_with_rows_when_expanding_two_levels_then_existing_rows_expand_too() {
    // Arrange
    let model = model(1);
    let events = model.subscribe();
    let (generator, open) = gated(&["first", "second", "third"]);
    model.install(Arc::new(generator));
    wait_for(&events, |e| matches!(e, TreeEvent::RowsInserted { .. }));
    assert!(model.cancel_running_request());
    drop(open);
    settle(&model);
    let root = model.root();
    assert_eq!(model.node_state(&root), Some(NodeState::Cancelled));

    // Act
    model.expand(&root, 2).unwrap();
    settle(&model);

    // Assert
    assert_eq!(labels(&model, &root), vec!["first", "second", "third"]);
    for row in 0..3 {
        let node = model.index(row, 0, &root).unwrap();
        assert_eq!(model.node_state(&node), Some(NodeState::Done));
        assert_eq!(model.row_count(&node), 1);
    }
    let first = model.index(0, 0, &root).unwrap();
    assert_eq!(labels(&model, &first), vec!["first.1"]);
}

#[test]
fn given_nested_shared_keys_when_cancelled_midway_then_structure_stays_consistent() {
    // Arrange
    let model = model(1);
    let (open, gate) = bounded(0);
    model.install(Arc::new(ThrottledGenerator {
        inner: shared_graph(),
        gate,
    }));
    wait_until(&model, |t| t.depth() >= 3);

    // Act
    model.cancel_running_request();
    drop(open);
    settle(&model);

    // Assert
    model.with_table(assert_consistent);
    let cancelled = model.with_table(|t| {
        t.iter()
            .filter(|(_, node)| node.state() == NodeState::Cancelled)
            .count()
    });
    assert!(cancelled > 0);

    // Act: the same expansion again completes the tree
    model.expand(&model.root(), 3).unwrap();
    settle(&model);

    // Assert
    model.with_table(assert_consistent);
    assert_eq!(model.with_table(|t| t.len()), 13);
    assert_eq!(model.with_table(|t| t.duplicate_count()), 1);
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(5)]
fn given_batch_size_when_populating_then_same_tree_as_default_batches(#[case] batch_size: usize) {
    // Arrange
    let generator = || {
        let roots = ["kiwi", "fig", "date", "cherry", "banana", "apple"]
            .iter()
            .enumerate()
            .map(|(i, name)| Item::named(i as u64 + 1, *name))
            .chain(std::iter::once(Item::named(3, "date again")))
            .collect();
        let mut generator = StaticGenerator::new(&["Name"])
            .with_sort_column(0)
            .with_initial_depth(3)
            .with_roots(roots);
        for key in 1..=6u64 {
            generator = generator.with_children(
                key,
                vec![Item::named(key * 10, "x"), Item::named(key * 10 + 1, "y")],
            );
        }
        Arc::new(generator)
    };
    let reference = model(32);
    let batched = model(batch_size);

    // Act
    reference.install(generator());
    batched.install(generator());
    settle(&reference);
    settle(&batched);

    // Assert
    let render = |m: &TreeModel| m.with_table(|t| t.to_tree_string().to_string());
    assert_eq!(render(&batched), render(&reference));
    assert_eq!(batched.with_table(|t| t.duplicate_count()), 1);
}

#[test]
fn given_expansion_queued_before_reinstall_when_settled_then_new_population_has_own_request() {
    // Arrange
    let model = model(1);
    let events = model.subscribe();
    let (generator, open) = gated(&["old1", "old2", "old3"]);
    model.install(Arc::new(generator));
    model.expand(&model.root(), 2).unwrap();

    // Act
    let generation = model.install(Arc::new(two_level_generator()));
    drop(open);
    settle(&model);

    // Assert
    let received: Vec<TreeEvent> = events.try_iter().collect();
    let started: Vec<u64> = received
        .iter()
        .filter_map(|e| match e {
            TreeEvent::RequestStarted { request } => Some(*request),
            _ => None,
        })
        .collect();
    let finished: Vec<(u64, bool)> = received
        .iter()
        .filter_map(|e| match e {
            TreeEvent::RequestFinished { request, cancelled } => Some((*request, *cancelled)),
            _ => None,
        })
        .collect();
    let last = *started.last().expect("a request for the new generator");
    assert_eq!(started.len(), finished.len());
    assert_eq!(
        finished.iter().filter(|(_, cancelled)| !cancelled).collect::<Vec<_>>(),
        vec![&(last, false)]
    );
    assert_eq!(labels(&model, &model.root()), vec!["a", "b"]);
    assert_eq!(model.generation(), generation);
    assert_eq!(model.title().as_deref(), Some("demo"));
}
