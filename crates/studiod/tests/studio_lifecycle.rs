//! Studio lifecycle driven through the daemon, one tick at a time.
//!
//! These tests verify:
//! - Chains queue the right commands and complete in order
//! - Start and stop wait for the server and time out
//! - Cancellation and failure empty the queue
//! - Saved studios load back

mod common;

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use common::Harness;
use pretty_assertions::assert_eq;
use studiod::codec::{StudioDocument, DOCUMENT_VERSION};
use studiod::{
    AppAction, AppLevel, AppSignal, AppTarget, CommandError, CommandState, GraphSnapshot,
    JsonCodec, NewAppRequest, ServerEvent, Signal, StudioCodec, StudioEvent, Urgency,
};

fn write_empty_studio(harness: &Harness, name: &str) -> Result<()> {
    let (path, _) = harness.daemon.studio().compose_path(name);
    std::fs::create_dir_all(path.parent().expect("studios dir"))?;
    let doc = StudioDocument {
        version: DOCUMENT_VERSION,
        name: name.to_string(),
        saved_at: Utc::now(),
        server_params: Default::default(),
        server_graph: GraphSnapshot::default(),
        studio_graph: GraphSnapshot::default(),
        rooms: Vec::new(),
        apps: Vec::new(),
    };
    JsonCodec.write_studio(&path, &doc)?;
    Ok(())
}

fn studio_app(commandline: &str) -> NewAppRequest {
    NewAppRequest {
        target: AppTarget::Studio,
        commandline: commandline.to_string(),
        name: None,
        terminal: false,
        level: AppLevel::Zero,
    }
}

#[test]
fn test_load_on_empty_session_queues_two_commands() -> Result<()> {
    let mut harness = Harness::new();
    write_empty_studio(&harness, "foo")?;

    harness.daemon.load_studio("foo", false)?;
    assert_eq!(harness.daemon.queue_len(), 2);

    assert!(harness.settle());
    let studio = harness.daemon.studio();
    assert_eq!(studio.name(), "foo");
    assert!(studio.is_persisted());
    assert!(studio.is_loaded());
    assert!(!studio.is_started());
    assert_eq!(harness.server.borrow().start_requests, 0);
    assert!(harness.has_event(&StudioEvent::StudioAppeared {
        name: "foo".to_string()
    }));
    Ok(())
}

#[test]
fn test_load_with_autostart_starts_the_studio() -> Result<()> {
    let mut harness = Harness::new();
    write_empty_studio(&harness, "foo")?;

    harness.daemon.load_studio("foo", true)?;
    assert_eq!(harness.daemon.queue_len(), 3);
    assert!(harness.settle());
    assert!(harness.daemon.studio().is_started());
    Ok(())
}

#[test]
fn test_load_of_missing_studio_queues_nothing() {
    let mut harness = Harness::new();
    assert!(matches!(
        harness.daemon.load_studio("nope", false),
        Err(CommandError::StudioNotFound(_))
    ));
    assert!(matches!(
        harness.daemon.load_studio("", false),
        Err(CommandError::InvalidArgument(_))
    ));
    assert_eq!(harness.daemon.queue_len(), 0);
}

#[test]
fn test_start_times_out_when_server_never_reports() {
    let mut harness = Harness::new();
    harness.server.borrow_mut().silent = true;

    harness.daemon.start_studio().unwrap();
    assert!(harness.daemon.tick());
    assert_eq!(harness.daemon.pending(), vec![("start studio", CommandState::Waiting)]);

    harness.clock.advance(Duration::from_millis(4900));
    assert!(harness.daemon.tick());
    assert_eq!(harness.daemon.queue_len(), 1);

    harness.clock.advance(Duration::from_millis(100));
    assert!(!harness.daemon.tick());
    assert_eq!(harness.daemon.queue_len(), 0);
    assert!(!harness.daemon.studio().is_started());
    assert!(harness
        .notes
        .borrow()
        .iter()
        .any(|(urgency, _)| *urgency == Urgency::High));
}

#[test]
fn test_start_without_clock_waits_forever() {
    let mut harness = Harness::new();
    harness.server.borrow_mut().silent = true;
    harness.clock.set(None);

    harness.daemon.start_studio().unwrap();
    for _ in 0..5 {
        assert!(harness.daemon.tick());
    }
    assert_eq!(harness.daemon.queue_len(), 1);
}

#[test]
fn test_start_leaves_server_presence_change_latched() {
    let mut harness = Harness::new();
    harness.daemon.new_studio("live").unwrap();
    assert!(harness.settle());

    harness.daemon.start_studio().unwrap();
    harness.push_event(ServerEvent::Appeared);
    assert!(harness.daemon.tick());
    assert!(harness.daemon.studio().env().has_changed(Signal::ServerPresent));

    // Observed once the queue drains
    assert!(harness.settle());
    assert!(harness.daemon.studio().is_started());
    assert!(!harness.daemon.studio().env().has_changed(Signal::ServerPresent));
    assert!(harness.daemon.studio().env().get(Signal::ServerPresent));
}

#[test]
fn test_start_when_started_skips_the_server() {
    let mut harness = Harness::started("live");
    assert_eq!(harness.server.borrow().start_requests, 1);

    harness.daemon.start_studio().unwrap();
    assert!(harness.daemon.tick());
    assert_eq!(harness.daemon.queue_len(), 0);
    assert_eq!(harness.server.borrow().start_requests, 1);
}

#[test]
fn test_start_refuses_with_orphan_apps_running() {
    let mut harness = Harness::started("live");
    harness.daemon.new_app(studio_app("synth")).unwrap();
    assert!(harness.settle());

    // Server goes away underneath the running app
    harness.server.borrow_mut().crash();
    harness.daemon.tick();
    assert!(!harness.daemon.studio().is_started());
    assert_eq!(harness.daemon.studio().running_app_count(), 1);

    harness.daemon.start_studio().unwrap();
    assert!(!harness.daemon.tick());
    assert!(harness.has_note("Cannot start studio"));
    assert_eq!(harness.server.borrow().start_requests, 1);
}

#[test]
fn test_stop_waits_for_clients_then_children_and_stops_once() {
    let mut harness = Harness::started("live");
    harness.daemon.new_app(studio_app("/usr/bin/synth -r 48000")).unwrap();
    assert!(harness.settle());

    let pid = harness.pid_of("synth");
    harness.push_event(ServerEvent::ClientAppeared {
        name: "synth".to_string(),
        pid: Some(pid),
    });
    harness.daemon.tick();
    assert_eq!(harness.daemon.studio().managed_client_count(), 1);

    harness.daemon.stop_studio().unwrap();
    assert!(harness.daemon.tick());
    assert!(harness
        .apps
        .borrow()
        .signals
        .contains(&(pid, AppSignal::Terminate)));

    // The process is gone but its client is still visible
    harness.exit(pid);
    assert!(harness.daemon.tick());
    assert!(harness.daemon.tick());
    assert_eq!(harness.server.borrow().stop_requests, 0);

    harness.push_event(ServerEvent::ClientDisappeared {
        name: "synth".to_string(),
    });
    assert!(harness.daemon.tick());
    assert_eq!(harness.server.borrow().stop_requests, 1);
    assert!(harness.daemon.studio().is_started());

    assert!(harness.daemon.tick());
    assert_eq!(harness.daemon.queue_len(), 0);
    assert!(!harness.daemon.studio().is_started());
    assert_eq!(harness.server.borrow().stop_requests, 1);
    assert!(harness.has_event(&StudioEvent::StudioStopped));
}

#[test]
fn test_stop_waits_for_children_when_no_client_remains() {
    let mut harness = Harness::started("live");
    harness.daemon.new_app(studio_app("/usr/bin/synth")).unwrap();
    assert!(harness.settle());
    let pid = harness.pid_of("synth");

    // The app never shows a client, so only its process holds the stop
    harness.daemon.stop_studio().unwrap();
    assert!(harness.daemon.tick());
    assert_eq!(harness.daemon.studio().managed_client_count(), 0);
    assert_eq!(harness.server.borrow().stop_requests, 0);
    assert!(harness.daemon.tick());
    assert_eq!(harness.server.borrow().stop_requests, 0);

    harness.exit(pid);
    assert!(harness.daemon.tick());
    assert_eq!(harness.server.borrow().stop_requests, 1);

    assert!(harness.settle());
    assert!(!harness.daemon.studio().is_started());
    assert_eq!(harness.server.borrow().stop_requests, 1);
}

#[test]
fn test_stop_tolerates_failed_stop_request() {
    let mut harness = Harness::started("live");
    harness.server.borrow_mut().fail_stop_request = true;

    harness.daemon.stop_studio().unwrap();
    assert!(harness.daemon.tick());
    assert_eq!(harness.daemon.queue_len(), 0);
    assert!(!harness.daemon.studio().is_started());
    assert_eq!(harness.server.borrow().stop_requests, 1);
}

#[test]
fn test_stop_times_out() {
    let mut harness = Harness::started("live");
    harness.server.borrow_mut().silent = true;

    harness.daemon.stop_studio().unwrap();
    assert!(harness.daemon.tick());
    harness.clock.advance(Duration::from_secs(5));
    assert!(!harness.daemon.tick());
    assert_eq!(harness.daemon.queue_len(), 0);
    assert!(harness.daemon.studio().is_started());
}

#[test]
fn test_cancel_fails_waiting_head_and_rejects_new_work() {
    let mut harness = Harness::new();
    harness.server.borrow_mut().silent = true;

    harness.daemon.start_studio().unwrap();
    harness.daemon.tick();
    harness.daemon.stop_studio().unwrap();
    assert_eq!(harness.daemon.queue_len(), 2);

    harness.daemon.cancel();
    assert_eq!(harness.daemon.queue_len(), 1);
    assert!(matches!(
        harness.daemon.stop_studio(),
        Err(CommandError::QueueCancelled)
    ));

    assert!(!harness.daemon.tick());
    assert_eq!(harness.daemon.queue_len(), 0);
    assert!(harness.daemon.stop_studio().is_ok());
}

#[test]
fn test_cancel_before_anything_ran_clears() {
    let mut harness = Harness::new();
    harness.daemon.new_studio("a").unwrap();
    harness.daemon.cancel();
    assert_eq!(harness.daemon.queue_len(), 0);
    assert!(harness.daemon.new_studio("b").is_ok());
}

#[test]
fn test_new_studio_generates_a_name() {
    let mut harness = Harness::new();
    harness.daemon.new_studio("").unwrap();
    assert!(harness.settle());
    assert!(harness.daemon.studio().name().starts_with("Studio "));
    assert!(harness.daemon.studio().is_loaded());
    assert!(!harness.daemon.studio().is_persisted());
}

#[test]
fn test_rename_needs_a_loaded_studio() {
    let mut harness = Harness::new();
    harness.daemon.rename_studio("x").unwrap();
    assert!(!harness.daemon.tick());

    harness.daemon.new_studio("a").unwrap();
    harness.daemon.rename_studio("b").unwrap();
    assert!(harness.settle());
    assert_eq!(harness.daemon.studio().name(), "b");
    assert!(harness.daemon.studio().is_modified());
    assert!(harness.has_event(&StudioEvent::StudioRenamed {
        name: "b".to_string()
    }));
}

#[test]
fn test_save_then_reload_round_trip() -> Result<()> {
    let mut harness = Harness::started("draft");
    harness.apps.borrow_mut().exit_on_terminate = true;
    harness.daemon.create_room("Live", "Stereo")?;
    harness.daemon.new_app(studio_app("synth --fast"))?;
    assert!(harness.settle());

    harness.daemon.save_studio_as("My/Studio")?;
    assert!(harness.settle());
    let (path, backup) = harness.daemon.studio().compose_path("My/Studio");
    assert!(path.exists());
    assert!(!backup.exists());
    assert_eq!(harness.daemon.studio().name(), "My/Studio");
    assert!(harness.daemon.studio().is_persisted());

    harness.daemon.save_studio()?;
    assert!(harness.settle());
    assert!(backup.exists());

    let listed = harness.daemon.list_studios()?;
    assert_eq!(
        listed.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
        vec!["My/Studio"]
    );

    harness.daemon.unload_studio()?;
    assert!(harness.settle());
    assert!(!harness.daemon.studio().is_loaded());
    assert_eq!(harness.daemon.studio().rooms().count(), 0);

    harness.daemon.load_studio("My/Studio", false)?;
    assert!(harness.settle());
    let studio = harness.daemon.studio();
    assert_eq!(studio.name(), "My/Studio");
    let room = studio.room_by_name("Live").expect("room restored");
    assert_eq!(room.ports().len(), 4);
    let app = studio.supervisor().find_by_name("synth").expect("app restored");
    assert!(app.autorun());
    assert!(!app.is_running());
    Ok(())
}

#[test]
fn test_save_needs_a_started_studio() {
    let mut harness = Harness::new();
    harness.daemon.new_studio("a").unwrap();
    harness.daemon.save_studio().unwrap();
    assert!(!harness.settle());
    assert!(harness.has_note("Studio save failed"));
    assert!(!harness.daemon.studio().is_persisted());
}

#[test]
fn test_delete_studio_file() -> Result<()> {
    let harness = Harness::new();
    write_empty_studio(&harness, "old")?;
    harness.daemon.delete_studio("old")?;
    assert!(harness.daemon.list_studios()?.is_empty());
    assert!(matches!(
        harness.daemon.delete_studio("old"),
        Err(CommandError::StudioNotFound(_))
    ));
    Ok(())
}

#[test]
fn test_exit_unloads_and_sets_flag() {
    let mut harness = Harness::started("live");
    harness.daemon.request_exit();
    assert!(!harness.settle());

    let studio = harness.daemon.studio();
    assert!(studio.exit_requested());
    assert!(!studio.is_loaded());
    assert!(!studio.is_started());
    assert!(!harness.has_note("Studio command failed"));
}

#[tokio::test]
async fn test_shutdown_finishes_when_the_exit_chain_fails() {
    let mut harness = Harness::started("live");
    harness.server.borrow_mut().silent = true;
    let clock = harness.clock.clone();

    // One signal, then none
    let mut signals = 0u32;
    let shutdown = move || {
        signals += 1;
        let first = signals == 1;
        async move {
            if !first {
                std::future::pending::<()>().await;
            }
        }
    };
    let expire_stop = async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        clock.advance(Duration::from_secs(10));
    };

    let finished = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(
            harness.daemon.run(Duration::from_millis(1), shutdown),
            expire_stop
        )
    })
    .await;

    assert!(finished.is_ok(), "driver loop did not finish");
    assert!(harness.daemon.studio().exit_requested());
    assert_eq!(harness.daemon.queue_len(), 0);
    assert!(harness.has_note("Studio stop failed"));
}

#[tokio::test]
async fn test_second_shutdown_signal_forces_exit() {
    let mut harness = Harness::started("live");
    harness.server.borrow_mut().silent = true;

    // Every signal fires at once; the stop never completes on its own
    let finished = tokio::time::timeout(
        Duration::from_secs(5),
        harness.daemon.run(Duration::from_millis(1), || async {}),
    )
    .await;

    assert!(finished.is_ok(), "driver loop did not finish");
    assert!(harness.daemon.studio().exit_requested());
    assert_eq!(harness.daemon.queue_len(), 0);
}

#[test]
fn test_unexpected_server_stop_is_a_crash() {
    let mut harness = Harness::started("live");
    harness.server.borrow_mut().crash();
    harness.daemon.tick();

    assert!(harness.has_event(&StudioEvent::StudioCrashed));
    assert!(!harness.daemon.studio().is_started());
    assert!(harness.daemon.studio().is_loaded());
}

#[test]
fn test_external_server_start_creates_automatic_studio() {
    let mut harness = Harness::new();
    harness.server.borrow_mut().started = true;
    harness.push_event(ServerEvent::Started);
    harness.daemon.tick();

    let studio = harness.daemon.studio();
    assert!(studio.is_started());
    assert!(studio.is_automatic());
    assert!(studio.name().starts_with("Studio "));

    // An automatic studio goes away with the server
    harness.server.borrow_mut().crash();
    harness.daemon.tick();
    assert!(!harness.daemon.studio().is_loaded());
}

#[test]
fn test_app_stop_waits_for_exit() {
    let mut harness = Harness::started("live");
    harness.daemon.new_app(studio_app("synth")).unwrap();
    assert!(harness.settle());
    let id = harness
        .daemon
        .studio()
        .supervisor()
        .find_by_name("synth")
        .map(|a| a.id())
        .unwrap();
    let pid = harness.pid_of("synth");

    harness
        .daemon
        .change_app_state(AppTarget::Studio, id, AppAction::Stop)
        .unwrap();
    assert!(harness.daemon.tick());
    assert_eq!(harness.daemon.queue_len(), 1);

    harness.exit(pid);
    assert!(harness.daemon.tick());
    assert_eq!(harness.daemon.queue_len(), 0);

    harness.daemon.remove_app(AppTarget::Studio, id).unwrap();
    assert!(harness.settle());
    assert!(!harness.daemon.studio().supervisor().has_apps());
}
