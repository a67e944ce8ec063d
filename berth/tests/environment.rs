use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use berth::{
    Component, ConfigError, Environment, EnvironmentError, LifecycleError, PortSpec, PullPolicy,
    mock::{MockConnector, MockEngine},
};

const HOST: &str = "127.0.0.1";

fn connector(engine: &MockEngine) -> Arc<MockConnector> {
    Arc::new(MockConnector::new(engine.clone()))
}

async fn environment(engine: &MockEngine, components: Vec<Component>) -> Environment {
    let mut builder = Environment::builder().with_bind_address(HOST);
    for component in components {
        builder = builder.with_component(component);
    }
    builder.build(connector(engine)).await.expect("build")
}

#[tokio::test]
async fn empty_component_list_is_rejected() {
    let engine = MockEngine::new();
    let err = Environment::new(connector(&engine), Vec::new())
        .await
        .expect_err("empty list");
    assert!(matches!(
        err,
        EnvironmentError::Config(ConfigError::EmptyComponentList)
    ));
}

#[tokio::test]
async fn duplicate_component_names_are_rejected_case_insensitively() {
    let engine = MockEngine::new().with_image("redis:7");
    let err = Environment::new(
        connector(&engine),
        vec![
            Component::new("redis", "redis:7"),
            Component::new("REDIS", "redis:7"),
        ],
    )
    .await
    .expect_err("duplicate");
    assert!(matches!(
        err,
        EnvironmentError::Config(ConfigError::DuplicateComponent { name }) if name == "redis"
    ));
}

#[tokio::test]
async fn operations_require_component_names() {
    let engine = MockEngine::new().with_image("redis:7");
    let env = environment(&engine, vec![Component::new("cache", "redis:7")]).await;

    for (operation, result) in [
        ("start", env.start(&[]).await),
        ("start in parallel", env.start_parallel(&[]).await),
        ("stop", env.stop(&[]).await),
        ("destroy", env.destroy(&[]).await),
    ] {
        let err = result.expect_err(operation);
        assert!(matches!(
            err,
            EnvironmentError::Config(ConfigError::NoComponentProvided { operation: op })
                if op == operation
        ));
    }
}

#[tokio::test]
async fn unknown_component_fails_before_any_engine_call() {
    let engine = MockEngine::new().with_image("redis:7");
    let env = environment(&engine, vec![Component::new("cache", "redis:7")]).await;

    let err = env.start(&["cache", "ghost"]).await.expect_err("unknown");
    assert!(matches!(
        err,
        EnvironmentError::Config(ConfigError::NotConfigured { name }) if name == "ghost"
    ));
    assert_eq!(engine.create_calls(), 0);
}

#[tokio::test]
async fn start_resolve_and_port_work_together() {
    let engine = MockEngine::new().with_image("redis:7").with_image("kafka:3");
    let env = environment(
        &engine,
        vec![
            Component::new("CACHE", "redis:7")
                .with_port(PortSpec::new(6379))
                .with_env(
                    "ADVERTISED",
                    r#"{{ value(key="cache.Host") }}:{{ value(key="cache.HostPort") }}"#,
                ),
            Component::new("broker", "kafka:3")
                .with_port(PortSpec::new(9094))
                .with_env(
                    "CACHE_URL",
                    r#"redis://{{ value(key="CACHE.Host") }}:{{ value(key="CACHE.Port") }}"#,
                ),
        ],
    )
    .await;

    env.start(&["cache", "broker"]).await.expect("start");

    let cache_port = env.port("cache", "").expect("port");
    assert!(cache_port > 0);
    assert_eq!(env.host(), HOST);
    assert_eq!(
        env.resolve(r#"{{ value(key="cache.Host") }}"#).expect("resolve"),
        HOST
    );
    assert_eq!(
        env.resolve(r#"{{ value(key="cache.Port") }}"#).expect("resolve"),
        cache_port.to_string()
    );

    // Cross component references were injected into the created containers.
    let created = engine.created_containers();
    assert_eq!(created.len(), 2);
    let cache = created.iter().find(|c| c.image == "redis:7").expect("cache");
    assert_eq!(cache.env, vec![format!("ADVERTISED={HOST}:{cache_port}")]);
    let broker = created.iter().find(|c| c.image == "kafka:3").expect("broker");
    assert_eq!(
        broker.env,
        vec![format!("CACHE_URL=redis://{HOST}:{cache_port}")]
    );
}

#[tokio::test]
async fn stop_and_restart_reuse_the_container() {
    let engine = MockEngine::new().with_image("redis:7");
    let env = environment(
        &engine,
        vec![Component::new("cache", "redis:7").with_port(PortSpec::new(6379))],
    )
    .await;

    env.start(&["cache"]).await.expect("start");
    env.stop(&["cache"]).await.expect("stop");
    env.start(&["cache"]).await.expect("restart");

    assert_eq!(engine.create_calls(), 1);
    assert_eq!(engine.start_calls(), 2);
}

#[tokio::test]
async fn destroy_allows_a_fresh_start() {
    let engine = MockEngine::new().with_image("redis:7");
    let env = environment(&engine, vec![Component::new("cache", "redis:7")]).await;

    // Destroying before anything was created is a no-op.
    env.destroy(&["cache"]).await.expect("destroy absent");
    assert_eq!(engine.remove_calls(), 0);

    env.start(&["cache"]).await.expect("start");
    env.destroy(&["cache"]).await.expect("destroy");
    env.destroy(&["cache"]).await.expect("destroy again");
    assert_eq!(engine.remove_calls(), 1);

    env.start(&["cache"]).await.expect("start after destroy");
    assert_eq!(engine.create_calls(), 2);
}

#[tokio::test]
async fn start_parallel_starts_all_components() {
    let engine = MockEngine::new().with_image("busybox");
    let env = environment(
        &engine,
        vec![
            Component::new("a", "busybox"),
            Component::new("b", "busybox"),
            Component::new("c", "busybox"),
        ],
    )
    .await;

    env.start_parallel(&["a", "b", "c"]).await.expect("start");

    assert_eq!(engine.create_calls(), 3);
    let states = engine.container_states();
    assert_eq!(states.len(), 3);
    assert!(states.values().all(|state| state == "running"));
}

#[tokio::test]
async fn start_parallel_returns_first_failure() {
    let engine = MockEngine::new().with_image("busybox").with_image("broken");
    engine.fail_start_of("broken");
    let env = environment(
        &engine,
        vec![
            Component::new("ok-one", "busybox"),
            Component::new("bad", "broken"),
            Component::new("ok-two", "busybox"),
        ],
    )
    .await;

    let err = env
        .start_parallel(&["ok-one", "bad", "ok-two"])
        .await
        .expect_err("one component fails");
    assert!(matches!(
        err,
        EnvironmentError::Lifecycle(LifecycleError::Engine {
            component,
            operation: "start",
            ..
        }) if component == "bad"
    ));
}

#[tokio::test]
async fn local_only_image_must_be_present() {
    let engine = MockEngine::new();
    let env = environment(
        &engine,
        vec![Component::new("cache", "redis:7").with_pull_policy(PullPolicy::LocalOnly)],
    )
    .await;

    let err = env.start(&["cache"]).await.expect_err("image missing");
    assert!(matches!(
        err,
        EnvironmentError::Lifecycle(LifecycleError::ImageNotPresent { image }) if image == "redis:7"
    ));
}

#[tokio::test]
async fn image_is_removed_after_destroy_when_requested() {
    let engine = MockEngine::new().with_image("redis:7");
    let env = environment(
        &engine,
        vec![Component::new("cache", "redis:7").with_remove_image(true)],
    )
    .await;

    env.start(&["cache"]).await.expect("start");
    env.destroy(&["cache"]).await.expect("destroy");
    assert!(!engine.image_present("redis:7"));
}

#[tokio::test]
async fn shutdown_fires_exactly_once() {
    let engine = MockEngine::new().with_image("busybox");
    let env = environment(
        &engine,
        vec![
            Component::new("a", "busybox"),
            Component::new("b", "busybox"),
        ],
    )
    .await;
    env.start(&["a", "b"]).await.expect("start");

    let hook_runs = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let hook_runs = Arc::clone(&hook_runs);
        env.shutdown_with(vec![Box::new(move || {
            hook_runs.fetch_add(1, Ordering::SeqCst);
        })])
        .await;
    }

    assert_eq!(hook_runs.load(Ordering::SeqCst), 1);
    assert_eq!(engine.remove_calls(), 2);
    assert_eq!(engine.close_calls(), 1);
    assert!(engine.container_states().is_empty());
}

#[tokio::test]
async fn concurrent_shutdown_destroys_each_container_once() {
    let engine = MockEngine::new().with_image("busybox");
    let env = environment(
        &engine,
        vec![
            Component::new("a", "busybox"),
            Component::new("b", "busybox"),
        ],
    )
    .await;
    env.start(&["a", "b"]).await.expect("start");

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let env = env.clone();
        tasks.push(tokio::spawn(async move { env.shutdown().await }));
    }
    for task in tasks {
        task.await.expect("join");
    }

    assert_eq!(engine.remove_calls(), 2);
    assert_eq!(engine.close_calls(), 1);
}

#[tokio::test]
async fn debug_output_reports_host_and_component_count() {
    let engine = MockEngine::new().with_image("redis:7");
    let env = environment(&engine, vec![Component::new("cache", "redis:7")]).await;

    let debug = format!("{env:?}");
    assert!(debug.contains(HOST));
    assert!(debug.contains("components: 1"));
}

#[cfg(unix)]
#[tokio::test]
async fn sigterm_runs_installed_shutdown() {
    let engine = MockEngine::new().with_image("busybox");
    let env = environment(&engine, vec![Component::new("a", "busybox")]).await;
    env.start(&["a"]).await.expect("start");

    let hook_runs = Arc::new(AtomicUsize::new(0));
    let hook_counter = Arc::clone(&hook_runs);
    let done = env.with_shutdown(vec![Box::new(move || {
        hook_counter.fetch_add(1, Ordering::SeqCst);
    })]);

    // Give the spawned task time to install the signal handlers.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let status = std::process::Command::new("kill")
        .args(["-TERM", &std::process::id().to_string()])
        .status()
        .expect("send SIGTERM");
    assert!(status.success());

    done.await.expect("shutdown finished");
    assert_eq!(hook_runs.load(Ordering::SeqCst), 1);
    assert_eq!(engine.remove_calls(), 1);
    assert!(engine.container_states().is_empty());
}

#[tokio::test]
async fn hooks_observe_resolved_values() {
    use berth::{Callback, DynError, ValueResolver};

    struct RecordingHook {
        seen: Arc<std::sync::Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl Callback for RecordingHook {
        async fn call(
            &self,
            component_name: &str,
            resolver: &dyn ValueResolver,
        ) -> Result<(), DynError> {
            let port = resolver.port(component_name, "")?;
            self.seen
                .lock()
                .expect("lock")
                .push(format!("{component_name}:{}:{port}", resolver.host()));
            Ok(())
        }
    }

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let engine = MockEngine::new().with_image("redis:7");
    let env = environment(
        &engine,
        vec![
            Component::new("cache", "redis:7")
                .with_port(PortSpec::new(6379))
                .with_after_start(Arc::new(RecordingHook {
                    seen: Arc::clone(&seen),
                })),
        ],
    )
    .await;

    env.start(&["cache"]).await.expect("start");

    let port = env.port("cache", "").expect("port");
    let seen = seen.lock().expect("lock");
    assert_eq!(*seen, vec![format!("cache:{HOST}:{port}")]);
}
