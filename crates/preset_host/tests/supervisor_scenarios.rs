//! End-to-end supervisor scenarios against a fake server script

#![cfg(unix)]

mod common;

use common::{is_alive, wait_until, RunningHost, TestHost};
use preset_host::{ExpansionOptions, HostLayout, Supervisor, SupervisorError, TemplateExpander};
use std::fs;
use std::time::Duration;

#[tokio::test]
async fn test_last_trigger_wins() {
    let host = TestHost::new(&["A", "B", "C"]);
    let mut config = host.config();
    config.preset = Some("A".into());
    let running = RunningHost::start(config);
    running.ready(&host).await;
    assert_eq!(host.launches(), vec!["--preset=A"]);

    let inbox = host.layout.shared_inbox();
    host.trigger(&inbox, "first", "B");
    tokio::time::sleep(Duration::from_millis(300)).await;
    host.trigger(&inbox, "second", "C\n");

    assert!(running.preset_becomes("C").await);
    assert_eq!(host.launches().last().map(String::as_str), Some("--preset=C"));
    assert!(fs::read_dir(&inbox).unwrap().next().is_none(), "triggers consumed");

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_preset_inbox_trigger_without_body() {
    let host = TestHost::new(&["A", "B"]);
    let mut config = host.config();
    config.preset = Some("A".into());
    let running = RunningHost::start(config);
    running.ready(&host).await;

    host.trigger(&host.layout.preset_inbox("B"), "go", "");

    assert!(running.preset_becomes("B").await);
    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_unknown_preset_keeps_current() {
    let host = TestHost::new(&["A", "B"]);
    let mut config = host.config();
    config.preset = Some("A".into());
    let running = RunningHost::start(config);
    running.ready(&host).await;

    host.trigger(&host.layout.shared_inbox(), "typo", "Z");

    let launches = &host;
    assert!(wait_until(Duration::from_secs(5), || async move { launches.launches().len() == 2 }).await);
    assert_eq!(host.launches(), vec!["--preset=A", "--preset=A"]);
    assert_eq!(running.supervisor.current_preset().await.as_deref(), Some("A"));

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_seeded_random_start() {
    let mut picks = Vec::new();
    for _ in 0..2 {
        let host = TestHost::new(&["A", "B", "C"]);
        let mut config = host.config();
        config.seed = Some(7);
        let running = RunningHost::start(config);
        running.ready(&host).await;

        let launches = host.launches();
        assert_eq!(launches.len(), 1, "exactly one server started");
        picks.push(launches[0].clone());
        running.stop().await.unwrap();
    }

    assert!(["--preset=A", "--preset=B", "--preset=C"].contains(&picks[0].as_str()));
    assert_eq!(picks[0], picks[1]);
}

#[tokio::test]
async fn test_no_presets_starts_nothing() {
    let host = TestHost::new(&[]);
    let supervisor = Supervisor::new(host.config()).unwrap();
    let (_tx, rx) = tokio::sync::watch::channel(());

    let result = supervisor.run(rx).await;

    assert!(matches!(result, Err(SupervisorError::NoPresetAvailable(_))));
    assert!(host.launches().is_empty());
}

#[tokio::test]
async fn test_recreated_inbox_still_restarts() {
    let host = TestHost::new(&["A", "B"]);
    let mut config = host.config();
    config.preset = Some("A".into());
    let running = RunningHost::start(config);
    running.ready(&host).await;

    let inbox = host.layout.shared_inbox();
    fs::remove_dir_all(&inbox).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    fs::create_dir_all(&inbox).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!running.handle.is_finished());

    host.trigger(&inbox, "after", "B");

    assert!(running.preset_becomes("B").await);
    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_server_exit_is_noticed() {
    let host = TestHost::new(&["crash", "A"]);
    let mut config = host.config();
    config.preset = Some("crash".into());
    let running = RunningHost::start(config);
    running.ready(&host).await;

    let supervisor = running.supervisor.clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            let supervisor = supervisor.clone();
            async move { supervisor.current_pid().await.is_none() }
        })
        .await
    );

    host.trigger(&host.layout.shared_inbox(), "recover", "A");
    assert!(running.preset_becomes("A").await);
    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_server() {
    let host = TestHost::new(&["A"]);
    let running = RunningHost::start(host.config());
    running.ready(&host).await;

    let pid = running.supervisor.current_pid().await.unwrap();
    let supervisor = running.supervisor.clone();
    running.stop().await.unwrap();

    assert_eq!(supervisor.current_pid().await, None);
    assert!(!is_alive(pid), "server process still alive after shutdown");
}

#[tokio::test]
async fn test_expanded_template_is_started() {
    let host = TestHost::new(&[]);
    let templates = host.layout.templates_dir();
    fs::create_dir_all(templates.join("league").join("cfg")).unwrap();
    fs::write(
        templates.join("template_cfg.json"),
        r#"{"port": 9600, "server_name": "Sunday league"}"#,
    )
    .unwrap();
    fs::write(
        templates.join("league").join("cfg").join("server_cfg.ini"),
        "NAME=[$server_name]\nUDP_PORT=[$port]\n",
    )
    .unwrap();

    let report = TemplateExpander::new(&host.layout, ExpansionOptions::default())
        .expand()
        .unwrap();
    assert!(report.unresolved.is_empty());

    let layout = HostLayout::new(host.base());
    let ini = fs::read_to_string(layout.preset_dir("league").join("cfg").join("server_cfg.ini"))
        .unwrap();
    assert!(ini.contains("NAME=Sunday league"));
    assert!(ini.contains("UDP_PORT=9600"));

    let running = RunningHost::start(host.config());
    running.ready(&host).await;
    assert_eq!(host.launches(), vec!["--preset=league"]);
    assert!(layout.preset_inbox("league").is_dir());

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_deleted_preset_keeps_host_running() {
    let host = TestHost::new(&["A", "B"]);
    let mut config = host.config();
    config.preset = Some("A".into());
    config.watch.max_recovery_attempts = 3;
    config.watch.missing_backoff = Duration::from_millis(10);
    let running = RunningHost::start(config);
    running.ready(&host).await;
    let pid = running.supervisor.current_pid().await.unwrap();

    fs::remove_dir_all(host.layout.preset_dir("B")).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(!running.handle.is_finished(), "host ended after a preset was deleted");
    assert_eq!(running.supervisor.current_pid().await, Some(pid));
    assert!(is_alive(pid));

    // Still listening on the shared inbox
    host.trigger(&host.layout.shared_inbox(), "again", "A");
    let launches = &host;
    assert!(wait_until(Duration::from_secs(5), || async move { launches.launches().len() == 2 }).await);

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_preset_created_after_start_is_watched() {
    let host = TestHost::new(&["A"]);
    let mut config = host.config();
    config.preset = Some("A".into());
    let running = RunningHost::start(config);
    running.ready(&host).await;

    let inbox = host.layout.preset_inbox("C");
    fs::create_dir_all(&inbox).unwrap();
    host.trigger(&inbox, "go", "");

    assert!(running.preset_becomes("C").await);
    assert!(!inbox.join("go.asrestart").exists());
    assert_eq!(host.launches().last().map(String::as_str), Some("--preset=C"));

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_restarts_stop_before_start() {
    let host = TestHost::new(&["A", "B", "C"]);
    let mut config = host.config();
    config.preset = Some("A".into());
    let running = RunningHost::start(config);
    running.ready(&host).await;

    let restarts: Vec<_> = ["B", "C"]
        .into_iter()
        .map(|preset| {
            let supervisor = running.supervisor.clone();
            tokio::spawn(async move { supervisor.restart(Some(preset.to_string())).await })
        })
        .collect();
    for restart in restarts {
        restart.await.unwrap().unwrap();
    }

    let current = running.supervisor.current_pid().await.unwrap();
    let logged = &host;
    assert!(
        wait_until(Duration::from_secs(5), || async move {
            logged
                .server_events()
                .iter()
                .any(|(kind, _, pid)| kind == "start" && *pid == current)
        })
        .await
    );
    let events = host.server_events();
    assert_eq!(host.launches().len(), 3);
    // A server stopped while it is still starting may miss either line
    let starts: Vec<_> = events.iter().filter(|(kind, ..)| kind == "start").collect();
    assert!(starts.len() >= 2, "events: {:?}", events);

    // Every start after the first is preceded by the stop of the previous server
    let mut running_pid = None;
    for (kind, _, pid) in &events {
        match kind.as_str() {
            "start" => {
                assert_eq!(running_pid, None, "two servers at once: {:?}", events);
                running_pid = Some(*pid);
            }
            "stop" if running_pid == Some(*pid) => running_pid = None,
            "stop" => assert!(
                !starts.iter().any(|(_, _, started)| started == pid),
                "stop of a server that is not current: {:?}",
                events
            ),
            other => panic!("unexpected event {}", other),
        }
    }
    assert_eq!(running_pid, Some(current));

    for (_, _, pid) in &starts {
        assert_eq!(is_alive(*pid), *pid == current, "pid {}", pid);
    }

    running.stop().await.unwrap();
}
