//! Periodic sweep behavior, driven with a manual clock.

mod common;

use common::{has_event, joined_game_id, Harness};

use apologies_engine::GameMode;
use apologies_protocol::requests::{AdvertiseGameContext, JoinGameContext, Request};
use apologies_protocol::{CompletionReason, Event, Visibility};
use apologies_server::types::SweepKind;

fn idle_config(config: &mut apologies_server::config::ServerConfig) {
    config.player_idle_thresh_min = 1;
    config.player_inactive_thresh_min = 2;
}

#[test]
fn players_cross_idle_then_inactive_thresholds() {
    let mut harness = Harness::with_config(idle_config);
    let mut a = harness.connect();
    harness.register(&mut a, "leela");

    harness.advance(61);
    harness.sweep(SweepKind::IdlePlayer);
    let events = harness.events(&mut a);
    assert!(has_event(&events, |e| matches!(e, Event::PlayerIdle)));
    assert!(!has_event(&events, |e| matches!(e, Event::PlayerInactive)));

    harness.advance(61);
    harness.sweep(SweepKind::IdlePlayer);
    let events = harness.events(&mut a);
    assert!(has_event(&events, |e| matches!(e, Event::PlayerInactive)));
    assert!(a.closed, "inactive players are disconnected");
    assert_eq!(harness.coordinator.store().registered_player_count(), 0);

    // The handle is released and may be registered again.
    let mut b = harness.connect();
    harness.register(&mut b, "leela");
}

#[test]
fn idle_threshold_is_exact() {
    let mut harness = Harness::with_config(idle_config);
    let mut a = harness.connect();
    harness.register(&mut a, "leela");

    harness.advance(59);
    harness.sweep(SweepKind::IdlePlayer);
    let events = harness.events(&mut a);
    assert!(
        !has_event(&events, |e| matches!(e, Event::PlayerIdle)),
        "below the threshold, no idle notification"
    );

    harness.advance(2);
    harness.sweep(SweepKind::IdlePlayer);
    let events = harness.events(&mut a);
    assert!(has_event(&events, |e| matches!(e, Event::PlayerIdle)));
}

#[test]
fn activity_resets_the_idle_state() {
    let mut harness = Harness::with_config(idle_config);
    let mut a = harness.connect();
    let player_id = harness.register(&mut a, "leela");

    harness.advance(61);
    harness.sweep(SweepKind::IdlePlayer);
    harness.events(&mut a);

    // Any recognized request makes the player active again.
    harness.request(&a, &Request::ListPlayers, &player_id);
    harness.events(&mut a);

    harness.advance(61);
    harness.sweep(SweepKind::IdlePlayer);
    let events = harness.events(&mut a);
    assert!(
        !has_event(&events, |e| matches!(e, Event::PlayerInactive)),
        "the inactivity window restarts after activity"
    );
    assert!(has_event(&events, |e| matches!(e, Event::PlayerIdle)));
}

#[test]
fn disconnected_players_skip_the_idle_warning() {
    let mut harness = Harness::with_config(idle_config);
    let mut a = harness.connect();
    harness.register(&mut a, "leela");
    harness.disconnect(&a);
    assert_eq!(harness.coordinator.store().registered_player_count(), 1);

    // Past the idle threshold a disconnected player goes straight to
    // inactive; there is nobody to warn.
    harness.advance(61);
    harness.sweep(SweepKind::IdlePlayer);
    assert_eq!(harness.coordinator.store().registered_player_count(), 0);
}

#[test]
fn unregistered_connections_are_swept() {
    let mut harness = Harness::new();
    let mut a = harness.connect();

    harness.advance(121);
    harness.sweep(SweepKind::IdleWebsocket);
    let events = harness.events(&mut a);
    assert!(has_event(&events, |e| matches!(e, Event::WebsocketIdle)));
    assert!(!a.closed);

    harness.advance(180);
    harness.sweep(SweepKind::IdleWebsocket);
    let events = harness.events(&mut a);
    assert!(has_event(&events, |e| matches!(e, Event::WebsocketInactive)));
    assert!(a.closed);
}

#[test]
fn registered_connections_are_left_to_the_player_sweep() {
    let mut harness = Harness::new();
    let mut a = harness.connect();
    harness.register(&mut a, "leela");

    harness.advance(301);
    harness.sweep(SweepKind::IdleWebsocket);
    let events = harness.events(&mut a);
    assert!(events.is_empty());
    assert!(!a.closed);
}

#[test]
fn idle_games_are_warned_then_cancelled() {
    let mut harness = Harness::new();
    let mut a = harness.connect();
    let mut b = harness.connect();
    let a_id = harness.register(&mut a, "leela");
    let b_id = harness.register(&mut b, "fry");

    harness.request(
        &a,
        &Request::AdvertiseGame(AdvertiseGameContext {
            name: "Friday game".to_string(),
            mode: GameMode::Standard,
            players: 2,
            visibility: Visibility::Public,
            invited_handles: vec![],
        }),
        &a_id,
    );
    let game_id = joined_game_id(&harness.events(&mut a)).expect("game id");
    harness.request(
        &b,
        &Request::JoinGame(JoinGameContext {
            game_id: game_id.clone(),
        }),
        &b_id,
    );
    harness.events(&mut a);
    harness.events(&mut b);

    harness.advance(601);
    harness.sweep(SweepKind::IdleGame);
    for client in [&mut a, &mut b] {
        let events = harness.events(client);
        assert!(has_event(&events, |e| matches!(e, Event::GameIdle)));
    }

    harness.advance(600);
    harness.sweep(SweepKind::IdleGame);
    for client in [&mut a, &mut b] {
        let events = harness.events(client);
        let cancelled = events
            .iter()
            .find_map(|e| match e {
                Event::GameCancelled(context) => Some(context),
                _ => None,
            })
            .expect("cancellation notice");
        assert_eq!(cancelled.reason, CompletionReason::Inactive);
    }
    assert_eq!(harness.coordinator.store().in_progress_game_count(), 0);
}

#[test]
fn finished_games_are_purged_after_retention() {
    let mut harness = Harness::with_config(|c| c.game_retention_thresh_min = 1);
    let mut a = harness.connect();
    let mut b = harness.connect();
    let a_id = harness.register(&mut a, "leela");
    let b_id = harness.register(&mut b, "fry");

    harness.request(
        &a,
        &Request::AdvertiseGame(AdvertiseGameContext {
            name: "Friday game".to_string(),
            mode: GameMode::Standard,
            players: 2,
            visibility: Visibility::Public,
            invited_handles: vec![],
        }),
        &a_id,
    );
    let game_id = joined_game_id(&harness.events(&mut a)).expect("game id");
    harness.request(
        &b,
        &Request::JoinGame(JoinGameContext {
            game_id: game_id.clone(),
        }),
        &b_id,
    );
    harness.events(&mut a);
    harness.events(&mut b);

    // Quitting the two-player game cancels it; the record is retained.
    harness.request(&b, &Request::QuitGame, &b_id);
    harness.events(&mut a);
    harness.events(&mut b);
    assert_eq!(harness.coordinator.store().total_game_count(), 1);

    harness.sweep(SweepKind::ObsoleteGame);
    assert_eq!(
        harness.coordinator.store().total_game_count(),
        1,
        "not yet past retention"
    );

    harness.advance(61);
    harness.sweep(SweepKind::ObsoleteGame);
    assert_eq!(harness.coordinator.store().total_game_count(), 0);
}

#[test]
fn sweeps_on_an_empty_store_do_nothing() {
    let mut harness = Harness::new();
    for kind in [
        SweepKind::IdleWebsocket,
        SweepKind::IdlePlayer,
        SweepKind::IdleGame,
        SweepKind::ObsoleteGame,
    ] {
        harness.sweep(kind);
    }
}
