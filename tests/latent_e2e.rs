use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use veristate::{
    Action, CausalPredictionModel, DoGraph, Effect, HookPhase, LatentStateStore,
    PredictiveUpdateHook, SimpleEmbeddingModel, StateDiff, StatePrediction, StateSnapshot,
    StateStore, Value, WorldError, WorldResult,
};

#[test]
fn near_identical_snapshots_rank_close() {
    // Scenario D: three embedded near-identical snapshots; top-2 similar to
    // the first excludes it and stays within [0, 1].
    let store = StateStore::new();
    let latent = LatentStateStore::new();
    latent
        .set_embedding_model(Arc::new(SimpleEmbeddingModel::new()))
        .unwrap();

    store.create("svc:a", Value::Int(1), None).unwrap();
    store.create("svc:b", Value::Int(2), None).unwrap();
    let s1 = store.snapshot().unwrap();
    let s2 = store.snapshot().unwrap();
    store.update("svc:b", Value::Int(3), 1, None).unwrap();
    let s3 = store.snapshot().unwrap();

    latent.compute_embedding(&s1).unwrap();
    latent.compute_embedding(&s2).unwrap();
    latent.compute_embedding(&s3).unwrap();

    let similar = latent.find_similar_states(s1.id, 2, 0.0).unwrap();
    assert!(similar.len() <= 2);
    assert!(!similar.is_empty());
    for (emb, sim) in &similar {
        assert_ne!(emb.snapshot_id, s1.id);
        assert!((0.0..=1.0).contains(sim));
    }
    // s2 has identical content to s1, so it ranks first at ~1.0.
    assert_eq!(similar[0].0.snapshot_id, s2.id);
    assert!((similar[0].1 - 1.0).abs() < 1e-5);
}

#[test]
fn attached_observer_sees_every_mutation_and_auto_embeds() {
    struct Lifecycle {
        before_calls: AtomicUsize,
        after_calls: AtomicUsize,
        last_diff_keys: Mutex<Vec<String>>,
    }
    impl PredictiveUpdateHook for Lifecycle {
        fn id(&self) -> &str {
            "lifecycle"
        }
        fn on_before_update(
            &self,
            _before: &StateSnapshot,
            planned: &[StateDiff],
        ) -> WorldResult<()> {
            self.before_calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(planned.len(), 1);
            Ok(())
        }
        fn on_after_update(
            &self,
            before: &StateSnapshot,
            after: &StateSnapshot,
            diffs: &[StateDiff],
        ) -> WorldResult<()> {
            self.after_calls.fetch_add(1, Ordering::SeqCst);
            assert!(before.id < after.id);
            *self.last_diff_keys.lock().unwrap() =
                diffs.iter().map(|d| d.key.clone()).collect();
            Ok(())
        }
    }

    let store = StateStore::new();
    let latent = Arc::new(LatentStateStore::new());
    latent
        .set_embedding_model(Arc::new(SimpleEmbeddingModel::new()))
        .unwrap();

    let hook = Arc::new(Lifecycle {
        before_calls: AtomicUsize::new(0),
        after_calls: AtomicUsize::new(0),
        last_diff_keys: Mutex::new(Vec::new()),
    });
    latent.register_hook(hook.clone()).unwrap();
    store.attach_observer(latent.clone()).unwrap();

    let created = store.create("job:1", Value::Int(0), None).unwrap();
    assert!(created.hook_failures.is_empty());
    store.update("job:1", Value::Int(1), 1, None).unwrap();
    store.delete("job:1", 2).unwrap();

    assert_eq!(hook.before_calls.load(Ordering::SeqCst), 3);
    assert_eq!(hook.after_calls.load(Ordering::SeqCst), 3);
    assert_eq!(*hook.last_diff_keys.lock().unwrap(), vec!["job:1"]);

    // Every committed mutation embedded its post-state automatically.
    assert_eq!(latent.embedding_count().unwrap(), 3);

    // Failed mutations notify nothing.
    let before = hook.before_calls.load(Ordering::SeqCst);
    assert!(store.update("job:1", Value::Int(9), 1, None).is_err());
    assert_eq!(hook.before_calls.load(Ordering::SeqCst), before);
}

#[test]
fn before_hooks_run_post_commit_and_see_committed_state() {
    // The before callback gets the pre-state snapshot, but it is dispatched
    // after the commit: a hook re-reading the store sees the new value.
    struct Rereader {
        store: Arc<StateStore>,
        seen: Mutex<Vec<Option<Value>>>,
    }
    impl PredictiveUpdateHook for Rereader {
        fn id(&self) -> &str {
            "rereader"
        }
        fn on_before_update(
            &self,
            before: &StateSnapshot,
            _planned: &[StateDiff],
        ) -> WorldResult<()> {
            assert!(before.get("cfg:flag").is_none());
            let live = self.store.read("cfg:flag")?.map(|e| e.value);
            self.seen.lock().unwrap().push(live);
            Ok(())
        }
    }

    let store = Arc::new(StateStore::new());
    let latent = Arc::new(LatentStateStore::new());
    let hook = Arc::new(Rereader {
        store: store.clone(),
        seen: Mutex::new(Vec::new()),
    });
    latent.register_hook(hook.clone()).unwrap();
    store.attach_observer(latent).unwrap();

    store.create("cfg:flag", Value::Bool(true), None).unwrap();

    let seen = hook.seen.lock().unwrap();
    assert_eq!(*seen, vec![Some(Value::Bool(true))]);
}

#[test]
fn failing_hook_surfaces_but_never_blocks_the_commit() {
    struct Broken;
    impl PredictiveUpdateHook for Broken {
        fn id(&self) -> &str {
            "broken"
        }
        fn on_after_update(
            &self,
            _before: &StateSnapshot,
            _after: &StateSnapshot,
            _diffs: &[StateDiff],
        ) -> WorldResult<()> {
            Err(WorldError::internal("observer bug"))
        }
    }

    struct Healthy(AtomicUsize);
    impl PredictiveUpdateHook for Healthy {
        fn id(&self) -> &str {
            "healthy"
        }
        fn on_after_update(
            &self,
            _before: &StateSnapshot,
            _after: &StateSnapshot,
            _diffs: &[StateDiff],
        ) -> WorldResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let store = StateStore::new();
    let latent = Arc::new(LatentStateStore::new());
    let healthy = Arc::new(Healthy(AtomicUsize::new(0)));
    latent.register_hook(Arc::new(Broken)).unwrap();
    latent.register_hook(healthy.clone()).unwrap();
    store.attach_observer(latent).unwrap();

    let outcome = store.create("k", Value::Int(1), None).unwrap();

    // The commit happened and the later hook still ran.
    assert_eq!(store.read("k").unwrap().unwrap().value, Value::Int(1));
    assert_eq!(healthy.0.load(Ordering::SeqCst), 1);

    // The failure came back as the secondary, non-fatal result.
    assert_eq!(outcome.hook_failures.len(), 1);
    assert_eq!(outcome.hook_failures[0].hook_id, "broken");
    assert_eq!(outcome.hook_failures[0].phase, HookPhase::AfterUpdate);
    assert!(outcome.hook_failures[0].message.contains("observer bug"));
}

#[test]
fn prediction_feedback_loop_recalibrates() {
    let store = StateStore::new();
    let graph = DoGraph::new();
    let latent = LatentStateStore::new();
    let model = Arc::new(CausalPredictionModel::new());
    latent.set_prediction_model(model.clone()).unwrap();

    // Record a deploy action that has repeatedly produced the same effect.
    store.create("svc:api", Value::Int(1), None).unwrap();
    let s1 = store.snapshot().unwrap();
    store.update("svc:api", Value::Int(2), 1, None).unwrap();
    let s2 = store.snapshot().unwrap();
    let observed = store.diff(&s1, &s2);

    let action = Action::new("deploy", "tool.deploy", Value::Null);
    let effect = Effect::new("api bumped", observed.clone());
    graph.add_action(action.clone(), "evt-1").unwrap();
    graph.add_effect(effect.clone(), "evt-2").unwrap();
    graph
        .link_action_to_effect(action.id, effect.id, "evt-3")
        .unwrap();

    let (prediction, failures) = latent.predict(&s2, &graph, 30_000).unwrap();
    assert!(failures.is_empty());
    assert_eq!(prediction.predicted_actions, vec!["deploy"]);
    assert_eq!(prediction.predicted_diffs.len(), 1);
    assert_eq!(prediction.predicted_diffs[0].key, "svc:api");
    assert!(prediction.confidence > 0.0 && prediction.confidence <= 1.0);
    assert_eq!(prediction.horizon_ms, 30_000);

    // The predicted change recurs; learning raises calibration, and the
    // next prediction from the same evidence is more confident.
    let before = model.calibration().unwrap();
    latent.learn(&prediction, &s2, &observed).unwrap();
    assert!(model.calibration().unwrap() > before);

    let (second, _) = latent.predict(&s2, &graph, 30_000).unwrap();
    assert!(second.confidence > prediction.confidence);
}

#[test]
fn prediction_hooks_fire_on_predict() {
    struct SeenPrediction(Mutex<Option<StatePrediction>>);
    impl PredictiveUpdateHook for SeenPrediction {
        fn id(&self) -> &str {
            "seen-prediction"
        }
        fn on_prediction(&self, prediction: &StatePrediction) -> WorldResult<()> {
            *self.0.lock().unwrap() = Some(prediction.clone());
            Ok(())
        }
    }

    let store = StateStore::new();
    let graph = DoGraph::new();
    let latent = LatentStateStore::new();
    latent
        .set_prediction_model(Arc::new(CausalPredictionModel::new()))
        .unwrap();
    let seen = Arc::new(SeenPrediction(Mutex::new(None)));
    latent.register_hook(seen.clone()).unwrap();

    let snap = store.snapshot().unwrap();
    let (prediction, _) = latent.predict(&snap, &graph, 1_000).unwrap();

    let observed = seen.0.lock().unwrap().clone().unwrap();
    assert_eq!(observed.id, prediction.id);
    assert_eq!(
        latent.prediction_for(snap.id).unwrap().unwrap().id,
        prediction.id
    );
}

#[test]
fn full_world_model_round_trip() {
    // Store + graph + latent working together: mutate, snapshot, embed,
    // record causality, predict, verify, learn.
    let store = StateStore::new();
    let graph = DoGraph::new();
    let latent = Arc::new(LatentStateStore::new());
    latent
        .set_embedding_model(Arc::new(SimpleEmbeddingModel::new()))
        .unwrap();
    let model = Arc::new(CausalPredictionModel::new());
    latent.set_prediction_model(model).unwrap();
    store.attach_observer(latent.clone()).unwrap();

    // The orchestrator executes a task and records what happened.
    let base = store.snapshot().unwrap();
    store
        .create("deploy:frontend", Value::String("v2".into()), None)
        .unwrap();
    let after = store.snapshot().unwrap();
    let diffs = store.diff(&base, &after);

    let action = Action::new(
        "deploy-frontend",
        "ci.deploy",
        Value::Structured(serde_json::json!({"version": "v2"})),
    );
    let effect = Effect::new("frontend deployed", diffs.clone());
    graph.add_action(action.clone(), "evt-100").unwrap();
    graph.add_effect(effect.clone(), "evt-101").unwrap();
    graph
        .link_action_to_effect(action.id, effect.id, "evt-102")
        .unwrap();

    // The committed mutation was auto-embedded via the observer.
    assert!(latent.embedding_count().unwrap() >= 1);

    // Policy-layer style consultation: project likely effects.
    let (prediction, _) = latent.predict(&after, &graph, 60_000).unwrap();
    assert!(prediction
        .predicted_actions
        .contains(&"deploy-frontend".to_string()));
    assert_eq!(prediction.predicted_diffs.len(), 1);

    // Causal antecedent lookup, reflexion-layer style.
    let causes = graph.actions_causing(effect.id).unwrap();
    assert_eq!(causes.len(), 1);
    assert_eq!(causes[0].name, "deploy-frontend");

    // Close the loop.
    latent.learn(&prediction, &after, &diffs).unwrap();
}
