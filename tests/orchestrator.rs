//! Orchestrator: active engine slot, option merging, events, serialization.

mod support;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use support::{memory_store, ScriptedEngine, Step};
use tts_relay::config::{ConfigKey, ConfigStore, MemoryConfigStore, SynthesisDefaults};
use tts_relay::{Error, Orchestrator, SynthesisEvent, SynthesisOptions};

fn orchestrator(
    store: Arc<dyn ConfigStore>,
    remote: &Arc<ScriptedEngine>,
    local: &Arc<ScriptedEngine>,
) -> Arc<Orchestrator> {
    Arc::new(
        Orchestrator::builder(store)
            .engine(remote.clone())
            .engine(local.clone())
            .build()
            .unwrap(),
    )
}

fn record_events(orch: &Orchestrator) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    orch.events().subscribe("recorder", move |event| {
        let entry = match event {
            SynthesisEvent::EngineChanged { from, to } => format!("engine-changed:{from}->{to}"),
            other => other.name().to_string(),
        };
        s.lock().unwrap().push(entry);
        Ok(())
    });
    seen
}

#[test]
fn initial_engine_follows_stored_preference() {
    let remote = ScriptedEngine::new("remote", true);
    let local = ScriptedEngine::new("local", false);

    let orch = orchestrator(memory_store(), &remote, &local);
    assert_eq!(orch.active_engine_id(), "remote");

    let store = Arc::new(MemoryConfigStore::new().with(ConfigKey::Engine, "local"));
    let orch = orchestrator(store, &remote, &local);
    assert_eq!(orch.active_engine_id(), "local");

    let store = Arc::new(MemoryConfigStore::new().with(ConfigKey::Engine, "retired-engine"));
    let orch = orchestrator(store, &remote, &local);
    assert_eq!(orch.active_engine_id(), "remote");

    let ids: Vec<String> = orch.engines().into_iter().map(|d| d.id).collect();
    assert_eq!(ids, vec!["remote", "local"]);
}

#[test]
fn duplicate_or_missing_engines_are_rejected() {
    let remote = ScriptedEngine::new("remote", true);
    assert!(Orchestrator::builder(memory_store()).build().is_err());
    assert!(Orchestrator::builder(memory_store())
        .engine(remote.clone())
        .engine(remote)
        .build()
        .is_err());
}

#[tokio::test]
async fn options_override_store_which_overrides_defaults() {
    let remote = ScriptedEngine::new("remote", true);
    let local = ScriptedEngine::new("local", false);
    let store = Arc::new(
        MemoryConfigStore::new()
            .with(ConfigKey::Voice, "Serena")
            .with(ConfigKey::Speed, "1.5")
            .with(ConfigKey::Volume, "not-a-number")
            .with(ConfigKey::StreamingEnabled, "true"),
    );
    let orch = Orchestrator::builder(store)
        .defaults(SynthesisDefaults {
            volume: 40,
            ..SynthesisDefaults::default()
        })
        .engine(remote.clone())
        .engine(local)
        .build()
        .unwrap();

    let req = orch.build_request("hi", &SynthesisOptions::new());
    assert_eq!(req.voice, "Serena");
    assert_eq!(req.speed, 1.5);
    assert_eq!(req.volume, 40);
    assert!(req.stream);
    assert_eq!(req.language, "zh-CN");
    assert_eq!(req.retry_count, 0);

    let req = orch.build_request("hi", &SynthesisOptions::new().voice("Ethan").speed(0.75).stream(false));
    assert_eq!(req.voice, "Ethan");
    assert_eq!(req.speed, 0.75);
    assert!(!req.stream);
}

#[tokio::test]
async fn events_bracket_each_request() {
    let remote = ScriptedEngine::new("remote", true).script([Step::Succeed, Step::Remote(500)]);
    let local = ScriptedEngine::new("local", false);
    let orch = orchestrator(memory_store(), &remote, &local);
    let seen = record_events(&orch);

    orch.synthesize("one", &SynthesisOptions::new()).await.unwrap();
    let err = orch.synthesize("two", &SynthesisOptions::new()).await.unwrap_err();
    assert!(matches!(err, Error::Remote { status: 500, .. }));

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["synthesis-started", "synthesis-ended", "synthesis-started", "synthesis-error"]
    );
    // The orchestrator itself never retries.
    assert_eq!(remote.call_count(), 2);
}

#[tokio::test]
async fn invalid_options_fail_before_any_event() {
    let remote = ScriptedEngine::new("remote", true);
    let local = ScriptedEngine::new("local", false);
    let orch = orchestrator(memory_store(), &remote, &local);
    let seen = record_events(&orch);

    let err = orch
        .synthesize("hi", &SynthesisOptions::new().speed(9.0))
        .await
        .unwrap_err();
    match err {
        Error::InvalidOptions { errors } => assert_eq!(errors, vec!["speed out of range"]),
        other => panic!("unexpected error: {other}"),
    }
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(remote.call_count(), 0);
}

#[tokio::test]
async fn misbehaving_listeners_are_isolated() {
    let remote = ScriptedEngine::new("remote", true);
    let local = ScriptedEngine::new("local", false);
    let orch = orchestrator(memory_store(), &remote, &local);

    orch.events().subscribe("panics", |_| panic!("listener bug"));
    orch.events()
        .subscribe("fails", |_| Err(Error::runtime("listener failed")));
    let seen = record_events(&orch);

    orch.synthesize("hi", &SynthesisOptions::new()).await.unwrap();
    orch.switch_engine("local").await.unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["synthesis-started", "synthesis-ended", "engine-changed:remote->local"]
    );
    assert_eq!(orch.active_engine_id(), "local");
}

#[tokio::test]
async fn switch_commits_only_after_successful_initialize() {
    let remote = ScriptedEngine::new("remote", true);
    let local = ScriptedEngine::new("local", false).failing_init();
    let store = memory_store();
    let orch = orchestrator(store.clone(), &remote, &local);
    let seen = record_events(&orch);

    let err = orch.switch_engine("local").await.unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));
    assert_eq!(orch.active_engine_id(), "remote");
    assert_eq!(store.get(ConfigKey::Engine), None);
    // Current playback was still stopped before trying the target.
    assert_eq!(remote.stops.load(Ordering::SeqCst), 1);
    assert!(seen.lock().unwrap().is_empty());

    let err = orch.switch_engine("cloud-2").await.unwrap_err();
    assert!(matches!(err, Error::UnknownEngine { ref id } if id == "cloud-2"));

    local.init_error.store(false, Ordering::SeqCst);
    orch.switch_engine("local").await.unwrap();
    assert_eq!(orch.active_engine_id(), "local");
    assert_eq!(store.get(ConfigKey::Engine).as_deref(), Some("local"));
    assert_eq!(*seen.lock().unwrap(), vec!["engine-changed:remote->local"]);
}

#[tokio::test(start_paused = true)]
async fn requests_are_serialized() {
    let remote = ScriptedEngine::new("remote", true).script([
        Step::SucceedAfter(Duration::from_secs(2)),
        Step::SucceedAfter(Duration::from_secs(1)),
    ]);
    let local = ScriptedEngine::new("local", false);
    let orch = orchestrator(memory_store(), &remote, &local);

    let a = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.synthesize("first", &SynthesisOptions::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;
    let b = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.synthesize("second", &SynthesisOptions::new()).await })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    let times = remote.call_times.lock().unwrap().clone();
    assert_eq!(times.len(), 2);
    assert!(times[1].0 >= times[0].1, "second request started before the first ended");
    let texts: Vec<String> = remote.calls().into_iter().map(|r| r.text).collect();
    assert_eq!(texts, vec!["first", "second"]);
}

#[tokio::test(start_paused = true)]
async fn stop_interrupts_and_is_safe_when_idle() {
    let remote = ScriptedEngine::new("remote", true).script([Step::Hang]);
    let local = ScriptedEngine::new("local", false);
    let orch = orchestrator(memory_store(), &remote, &local);
    let seen = record_events(&orch);

    orch.stop().await.unwrap();
    orch.stop().await.unwrap();

    let run = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.synthesize("hang", &SynthesisOptions::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    orch.stop().await.unwrap();

    assert!(run.await.unwrap().unwrap_err().is_cancelled());
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["synthesis-started", "synthesis-stopped"]
    );
}

#[tokio::test]
async fn stream_flag_is_dropped_for_engines_without_streaming() {
    let remote = ScriptedEngine::new("remote", true);
    let local = ScriptedEngine::new("local", false);
    let store = Arc::new(MemoryConfigStore::new().with(ConfigKey::Engine, "local"));
    let orch = orchestrator(store, &remote, &local);

    orch.synthesize("hi", &SynthesisOptions::new().stream(true))
        .await
        .unwrap();
    assert!(!local.calls()[0].stream);

    let voices = orch.available_voices().await.unwrap();
    assert_eq!(voices[0].engine_id, "local");
}

#[tokio::test]
async fn events_carry_the_request_as_submitted() {
    let remote = ScriptedEngine::new("remote", true);
    let local = ScriptedEngine::new("local", false);
    let store = Arc::new(MemoryConfigStore::new().with(ConfigKey::Engine, "local"));
    let orch = orchestrator(store, &remote, &local);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    orch.events().subscribe("stream-flag", move |e| {
        match e {
            SynthesisEvent::Started { request, .. } | SynthesisEvent::Ended { request, .. } => {
                sink.lock().unwrap().push((e.name().to_string(), request.stream));
            }
            _ => {}
        }
        Ok(())
    });

    orch.synthesize("hi", &SynthesisOptions::new().stream(true))
        .await
        .unwrap();

    assert!(!local.calls()[0].stream);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            ("synthesis-started".to_string(), true),
            ("synthesis-ended".to_string(), true),
        ]
    );
}
