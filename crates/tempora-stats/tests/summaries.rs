//! Statistics feeding experiment summaries across replications.

use std::sync::Arc;

use parking_lot::Mutex;
use tempora_core::{
    Notification, Payload, PropagationError, SimTime, SimulatorEvent, SubscriptionScope,
};
use tempora_engine::{Experiment, ExperimentConfig, Replication};
use tempora_stats::{Observation, Persistent, StatisticEvent, Tally};
use tempora_test_utils::{event_list_simulator, reference_treatment, ScriptedModel, WAIT};

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

fn refuse(hook: &'static str) -> impl Fn(tempora_core::SimError) -> PropagationError {
    move |e| PropagationError::failed(hook, e.to_string())
}

/// Warmup at 11, end at 22. Replication `i` tallies 1000 before warmup,
/// then `i` and `i + 2`; the queue holds 5 from the start and drops to `i`
/// at 16.
fn summary_model() -> ScriptedModel<f64> {
    ScriptedModel::<f64>::new(|ctx, events| {
        let i = ctx.replication().index() as f64;
        let service = Tally::new("service", ctx.simulator()).map_err(refuse("service"))?;
        let queue =
            Persistent::with_initial("queue", ctx.simulator(), 5.0).map_err(refuse("queue"))?;
        Tally::new("idle", ctx.simulator()).map_err(refuse("idle"))?;

        let plan: [(f64, Option<f64>, Option<f64>); 4] = [
            (10.5, Some(1000.0), None),
            (12.0, Some(i), None),
            (15.0, Some(i + 2.0), None),
            (16.0, None, Some(i)),
        ];
        for (t, tally_value, queue_value) in plan {
            let service = service.clone();
            let queue = queue.clone();
            events
                .schedule(SimTime::new(t), move |_, _| {
                    if let Some(v) = tally_value {
                        service.ingest(v);
                    }
                    if let Some(v) = queue_value {
                        queue.ingest(v);
                    }
                    Ok(())
                })
                .map_err(|e| PropagationError::failed("schedule", e.to_string()))?;
        }
        Ok(())
    })
}

#[test]
fn final_means_feed_experiment_summaries() {
    let sim = Arc::new(event_list_simulator());
    let config = ExperimentConfig::new("summaries", reference_treatment(), 4);
    let exp = Experiment::new(config, Arc::clone(&sim), summary_model()).unwrap();

    exp.start().unwrap();
    assert!(exp.wait_until_ended(WAIT));

    let summaries = exp.get_summary_statistics();
    let names: Vec<&str> = summaries.keys().map(String::as_str).collect();
    assert_eq!(names, ["service", "queue"]);

    // Per-replication tally means are i + 1.
    let service = &summaries["service"];
    assert_eq!(service.count(), 4);
    assert!(approx(service.mean().unwrap(), 2.5));

    // 5 held 11..16, i held 16..22.
    let queue = &summaries["queue"];
    assert_eq!(queue.count(), 4);
    assert!(approx(queue.mean().unwrap(), (25.0 + 6.0 * 1.5) / 11.0));

    let ci = service.confidence_interval(0.95).unwrap();
    assert!(ci.lower < 2.5 && 2.5 < ci.upper);
}

fn replication_index(n: &Notification<f64>) -> usize {
    match &n.payload {
        Payload::Replication { index, .. } => *index,
        other => panic!("expected a replication payload, got {other:?}"),
    }
}

#[test]
fn statistics_bound_mid_run_report_before_the_next_replication() {
    let sim = Arc::new(event_list_simulator());
    let log: Arc<Mutex<Vec<String>>> = Arc::default();

    let unit_log = Arc::clone(&log);
    let model = ScriptedModel::<f64>::new(move |ctx, events| {
        let i = ctx.replication().index() as f64;
        let log = Arc::clone(&unit_log);
        events
            .schedule(SimTime::new(12.0), move |ctx, _| {
                let late = Tally::new("late", &ctx.simulator()).map_err(refuse("late"))?;
                late.ingest(i);
                ctx.events().subscribe_scoped(
                    SimulatorEvent::EndReplication,
                    SubscriptionScope::Replication,
                    move |n: &Notification<f64>| {
                        log.lock().push(format!("end{}", replication_index(n)));
                    },
                );
                Ok(())
            })
            .map_err(|e| PropagationError::failed("schedule", e.to_string()))
    });

    let start_log = Arc::clone(&log);
    sim.events()
        .subscribe(SimulatorEvent::StartReplication, move |n: &Notification<f64>| {
            start_log.lock().push(format!("start{}", replication_index(n)));
        });

    let config = ExperimentConfig::new("late", reference_treatment(), 3);
    let exp = Experiment::new(config, Arc::clone(&sim), model).unwrap();
    exp.start().unwrap();
    assert!(exp.wait_until_ended(WAIT));

    // Every replication's summary is in as soon as the experiment ends.
    let late = exp.summaries().get("late").unwrap();
    assert_eq!(late.count(), 3);
    assert!(approx(late.mean().unwrap(), 1.0));

    assert!(sim.wait_until_idle(WAIT));
    assert_eq!(
        *log.lock(),
        ["start0", "end0", "start1", "end1", "start2", "end2"]
    );
}

#[test]
fn reset_clears_summaries_for_a_fresh_run() {
    let sim = Arc::new(event_list_simulator());
    let config = ExperimentConfig::new("rerun", reference_treatment(), 2);
    let exp = Experiment::new(config, Arc::clone(&sim), summary_model()).unwrap();

    exp.start().unwrap();
    assert!(exp.wait_until_ended(WAIT));
    assert_eq!(exp.summaries().get("service").map(|s| s.count()), Some(2));
    assert!(sim.wait_until_idle(WAIT));

    exp.reset().unwrap();
    assert!(exp.summaries().is_empty());

    exp.start().unwrap();
    assert!(exp.wait_until_ended(WAIT));
    let service = exp.summaries().get("service").unwrap();
    assert_eq!(service.count(), 2);
    assert!(approx(service.mean().unwrap(), 1.5));
}

#[test]
fn statistics_bind_fresh_in_every_replication() {
    let sim = Arc::new(event_list_simulator());
    let config = ExperimentConfig::new("fresh", reference_treatment(), 3);
    let exp = Experiment::new(config, Arc::clone(&sim), summary_model()).unwrap();

    exp.start().unwrap();
    assert!(exp.wait_until_ended(WAIT));
    assert!(sim.wait_until_idle(WAIT));

    // The last replication's namespace stays bound until the next one.
    let last = sim.replication().unwrap();
    assert_eq!(last.id(), "fresh-2");
    assert_eq!(
        last.statistics().descriptions(),
        ["service", "queue", "idle"]
    );
    let service = last.statistics().get("service").unwrap();
    assert_eq!(service.count(), 2);
    assert_eq!(service.mean(), Some(3.0));
}

#[test]
fn standalone_replication_records_nothing() {
    let sim = event_list_simulator();
    let slot: Arc<Mutex<Option<Tally<f64>>>> = Arc::default();
    let captured = Arc::clone(&slot);
    let mut model = ScriptedModel::<f64>::new(move |ctx, events| {
        let tally = Tally::new("service", ctx.simulator()).map_err(refuse("service"))?;
        let t = tally.clone();
        events
            .schedule(SimTime::new(12.0), move |_, _| {
                t.ingest(4.0);
                Ok(())
            })
            .map_err(|e| PropagationError::failed("schedule", e.to_string()))?;
        *captured.lock() = Some(tally);
        Ok(())
    });
    let replication = Replication::new("alone", reference_treatment()).unwrap();
    sim.initialize(replication, &mut model).unwrap();
    sim.start().unwrap();
    assert!(sim.wait_until_idle(WAIT));

    let tally = slot.lock().clone().unwrap();
    assert!(tally.is_finished());
    assert_eq!(tally.mean(), Some(4.0));
    assert!(sim.replication().unwrap().experiment().is_none());
}

#[test]
fn one_statistic_can_follow_another() {
    let sim = event_list_simulator();
    let slot: Arc<Mutex<Option<(Tally<f64>, Tally<f64>)>>> = Arc::default();
    let captured = Arc::clone(&slot);
    let mut model = ScriptedModel::<f64>::new(move |ctx, _| {
        let raw = Tally::new("raw", ctx.simulator()).map_err(refuse("raw"))?;
        let doubled = Tally::new("doubled", ctx.simulator()).map_err(refuse("doubled"))?;
        doubled.listen_with(raw.events(), StatisticEvent::Observed, |o: &Observation<f64>| {
            Some(o.value * 2.0)
        });
        *captured.lock() = Some((raw, doubled));
        Ok(())
    });
    let replication = Replication::new("chain", reference_treatment()).unwrap();
    sim.initialize(replication, &mut model).unwrap();

    let (raw, doubled) = slot.lock().clone().unwrap();
    // Bound before warmup: these are discarded when it fires.
    raw.ingest(1.0);
    raw.ingest(3.0);
    assert_eq!(doubled.mean(), Some(4.0));

    sim.start().unwrap();
    assert!(sim.wait_until_idle(WAIT));
    assert_eq!(raw.count(), 0);
    assert_eq!(doubled.count(), 0);
    assert!(raw.events().subscriber_count(StatisticEvent::Observed) == 0);
}
