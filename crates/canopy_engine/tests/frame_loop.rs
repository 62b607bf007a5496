//! End-to-end frame loop behavior across the scene graph, the render
//! registry and the time wheel

use canopy_engine::foundation::time::ManualClock;
use canopy_engine::prelude::*;
use canopy_engine::render::{CommandList, HeadlessDevice, HeadlessTarget, RenderResult};
use canopy_engine::scene::AttachState;
use canopy_engine::time_wheel::{CallbackFault, PendingCalls};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

const FRAME: Duration = Duration::from_millis(16);
const WAIT: Duration = Duration::from_secs(5);

fn engine(workers: usize) -> (Engine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let ctx = RuntimeContext::with_clock(RuntimeConfig::default().with_worker_threads(workers), clock.clone()).unwrap();
    (Engine::with_context(ctx), clock)
}

fn step(engine: &mut Engine, clock: &ManualClock) -> Result<EngineFrame, EngineError> {
    clock.advance(FRAME);
    engine.frame(FRAME)
}

#[test]
fn failing_concurrent_node_does_not_stop_its_siblings() {
    let (mut engine, clock) = engine(5);
    let scene = engine.create_scene(SceneOptions::new().named("batch"));
    let completed = Arc::new(AtomicUsize::new(0));
    let rendezvous = Arc::new(Barrier::new(4));

    let nodes: Vec<NodeId> = (0..5)
        .map(|index| {
            let completed = Arc::clone(&completed);
            let rendezvous = Arc::clone(&rendezvous);
            let behavior = update_fn(move |_ctx| {
                if index == 3 {
                    return Err("node three failed".into());
                }
                rendezvous.wait();
                completed.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            });
            let node = engine.tree().create_node(
                NodeOptions::new()
                    .named(format!("worker-{index}"))
                    .with_class(UpdateClass::concurrent(0))
                    .with_behavior(behavior),
            );
            engine.tree().attach_to_scene(node, scene).unwrap();
            node
        })
        .collect();

    let err = step(&mut engine, &clock).unwrap_err();
    assert_eq!(completed.load(Ordering::SeqCst), 4);

    let EngineError::Frame { wheel, mut scenes, .. } = err else {
        panic!("expected a frame failure, got {err:?}");
    };
    assert_eq!(wheel, None);
    assert_eq!(scenes.len(), 1);
    let (failed_scene, FrameError::Batch { batch, failures, .. }) = scenes.remove(0) else {
        panic!("expected a batch failure");
    };
    assert_eq!(failed_scene, scene);
    assert_eq!(batch, 0);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].node, nodes[3]);
    assert_eq!(failures[0].component, None);
    assert!(!failures[0].panicked);
}

fn counting_node(engine: &Engine, scene: SceneId, updates: &Arc<AtomicUsize>) -> NodeId {
    let updates = Arc::clone(updates);
    let node = engine.tree().create_node(NodeOptions::new().named("counter").with_behavior(update_fn(move |_ctx| {
        updates.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    })));
    engine.tree().attach_to_scene(node, scene).unwrap();
    node
}

#[test]
fn time_wheel_fault_does_not_stop_scene_updates() {
    let (mut engine, clock) = engine(1);
    let scene = engine.create_scene(SceneOptions::new());
    let updates = Arc::new(AtomicUsize::new(0));
    counting_node(&engine, scene, &updates);
    engine.time_wheel().defer(Trigger::Frames(1), |_| panic!("deferred call blew up"));

    let err = step(&mut engine, &clock).unwrap_err();
    assert_eq!(updates.load(Ordering::SeqCst), 1);

    let EngineError::Frame {
        tick,
        wheel,
        scenes,
        completed,
    } = err
    else {
        panic!("expected a frame failure, got {err:?}");
    };
    assert_eq!(tick, 1);
    assert!(scenes.is_empty());
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].0, scene);
    assert_eq!(completed[0].1.updated, 1);
    let Some(TimeWheelError::Faults { faults, .. }) = wheel else {
        panic!("expected time wheel faults");
    };
    assert!(matches!(faults.as_slice(), [CallbackFault::Panicked { .. }]));

    step(&mut engine, &clock).unwrap();
    assert_eq!(updates.load(Ordering::SeqCst), 2);
}

#[test]
fn failing_scene_does_not_starve_later_scenes() {
    let (mut engine, clock) = engine(1);
    let broken = engine.create_scene(SceneOptions::new().named("broken"));
    let healthy = engine.create_scene(SceneOptions::new().named("healthy"));

    let node = engine.tree().create_node(
        NodeOptions::new()
            .named("faulty")
            .with_behavior(update_fn(|_ctx| Err("always fails".into()))),
    );
    engine.tree().attach_to_scene(node, broken).unwrap();
    let updates = Arc::new(AtomicUsize::new(0));
    counting_node(&engine, healthy, &updates);

    for frame in 1..=3 {
        let err = step(&mut engine, &clock).unwrap_err();
        let EngineError::Frame { scenes, completed, .. } = &err else {
            panic!("expected a frame failure, got {err:?}");
        };
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].0, broken);
        assert_eq!(scenes[0].1.failures()[0].node, node);
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].0, healthy);
        assert_eq!(completed[0].1.frame, frame);
    }
    assert_eq!(updates.load(Ordering::SeqCst), 3);
}

#[test]
fn detaching_a_parent_unroots_its_subtree() {
    let (mut engine, clock) = engine(1);
    let scene = engine.create_scene(SceneOptions::new());
    let tree = engine.tree().clone();

    let a = tree.create_node(NodeOptions::new().named("a"));
    let b = tree.create_node(NodeOptions::new().named("b"));
    tree.attach_to_scene(a, scene).unwrap();
    tree.attach_to_node(b, a).unwrap();
    let b_gate = tree.draw_gate(b).unwrap();

    let frame = step(&mut engine, &clock).unwrap();
    assert_eq!(frame.scenes[0].1.updated, 2);
    assert_eq!(tree.root_scene(b).unwrap(), Some(scene));
    assert!(b_gate.is_open());

    tree.detach(a).unwrap();

    assert_eq!(tree.root_scene(b).unwrap(), None);
    assert_eq!(tree.parent(b).unwrap(), Some(ParentRef::Node(a)));
    assert_eq!(tree.state(a).unwrap(), AttachState::Unattached);
    assert_eq!(tree.state(b).unwrap(), AttachState::Attached);
    assert!(!b_gate.is_open());

    let frame = step(&mut engine, &clock).unwrap();
    assert_eq!(frame.scenes[0].1.updated, 0);
}

struct Sprite {
    device: Option<HeadlessDevice>,
    draws: Arc<AtomicU64>,
}

impl DrawOperation<HeadlessBackend> for Sprite {
    fn name(&self) -> &str {
        "sprite"
    }

    fn create_resources(&mut self, device: &HeadlessDevice, _size: SurfaceSize) -> RenderResult<()> {
        device.allocate();
        self.device = Some(device.clone());
        Ok(())
    }

    fn draw(
        &mut self,
        _frame: &FrameInfo,
        encoder: &mut CommandList,
        _device: &HeadlessDevice,
        _target: &HeadlessTarget,
    ) -> RenderResult<()> {
        self.draws.fetch_add(1, Ordering::SeqCst);
        encoder.record("sprite");
        Ok(())
    }

    fn release_resources(&mut self) {
        if let Some(device) = self.device.take() {
            device.free();
        }
    }
}

#[test]
fn disposed_drawable_is_pruned_without_being_drawn() {
    let (mut engine, clock) = engine(2);
    let scene = engine.create_scene(SceneOptions::new());
    let node = engine.tree().create_node(NodeOptions::new().named("ship"));
    let gate = engine.tree().draw_gate(node).unwrap();

    let backend = HeadlessBackend::new(SurfaceSize::new(64, 64));
    let device = backend.device().clone();
    let registry = RenderRegistry::new(backend, engine.context()).unwrap();

    let draws = Arc::new(AtomicU64::new(0));
    let sprite = Sprite {
        device: None,
        draws: Arc::clone(&draws),
    };
    let handle = registry.add_drawable(GatedOwner::new(gate.clone(), 0), sprite).unwrap();
    assert_eq!(device.live_allocations(), 1);
    handle.dispose();

    engine.tree().attach_to_scene(node, scene).unwrap();
    step(&mut engine, &clock).unwrap();
    assert!(gate.is_open());

    assert!(registry.wait_for_frames(2, WAIT));
    assert_eq!(draws.load(Ordering::SeqCst), 0);
    assert_eq!(registry.live_operations(), 0);
    assert_eq!(device.live_allocations(), 0);
    registry.shutdown().unwrap();
}

#[test]
fn gated_drawable_follows_its_node() {
    let (mut engine, clock) = engine(2);
    let scene = engine.create_scene(SceneOptions::new());
    let node = engine.tree().create_node(NodeOptions::new().named("ship"));
    engine.tree().attach_to_scene(node, scene).unwrap();
    let gate = engine.tree().draw_gate(node).unwrap();

    let backend = HeadlessBackend::new(SurfaceSize::new(64, 64));
    let device = backend.device().clone();
    let registry = RenderRegistry::new(backend, engine.context()).unwrap();
    let draws = Arc::new(AtomicU64::new(0));
    let _handle = registry
        .add_drawable(
            GatedOwner::new(gate, 1),
            Sprite {
                device: None,
                draws: Arc::clone(&draws),
            },
        )
        .unwrap();

    step(&mut engine, &clock).unwrap();
    assert!(registry.wait_for_frames(2, WAIT));
    assert!(draws.load(Ordering::SeqCst) > 0);

    engine.tree().set_ready(node, false).unwrap();
    assert!(registry.wait_for_frames(2, WAIT));
    assert!(device.last_frame().is_empty());
    registry.shutdown().unwrap();
}

#[test]
fn time_wheel_runs_once_per_engine_frame() {
    let (mut engine, clock) = engine(1);
    let wheel = engine.time_wheel().clone();

    let deferred = Arc::new(AtomicUsize::new(0));
    let bounded = Arc::new(AtomicUsize::new(0));
    let recurring = Arc::new(AtomicUsize::new(0));

    let count = Arc::clone(&deferred);
    wheel.defer(Duration::from_millis(48), move |_| {
        count.fetch_add(1, Ordering::SeqCst);
    });
    let count = Arc::clone(&bounded);
    wheel.repeat_for(Trigger::Frames(3), move |_| {
        count.fetch_add(1, Ordering::SeqCst);
    });
    let count = Arc::clone(&recurring);
    let handle = wheel.repeat_every(Trigger::Frames(2), move |_| {
        count.fetch_add(1, Ordering::SeqCst);
    });

    for _ in 0..6 {
        step(&mut engine, &clock).unwrap();
    }
    assert_eq!(deferred.load(Ordering::SeqCst), 1);
    assert_eq!(bounded.load(Ordering::SeqCst), 3);
    assert_eq!(recurring.load(Ordering::SeqCst), 3);

    assert!(handle.dispose());
    step(&mut engine, &clock).unwrap();
    assert_eq!(recurring.load(Ordering::SeqCst), 3);
    assert_eq!(wheel.pending(), PendingCalls::default());
}
