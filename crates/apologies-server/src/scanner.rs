//! Periodic sweep timers.
//!
//! Each sweeper sleeps its startup delay, then fires a tick into the
//! coordinator mailbox on every period. Ticks are coalesced with an
//! in-flight flag: if the previous tick has not started processing yet,
//! the new one is skipped, so at most one tick per kind is ever
//! outstanding.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::config::ServerConfig;
use crate::types::{CoordinatorEvent, EventTx, SweepKind};

/// Spawn all four sweepers.
pub fn spawn_sweepers(config: &ServerConfig, tx: EventTx) -> Vec<JoinHandle<()>> {
    let schedule = [
        (
            SweepKind::IdleWebsocket,
            config.idle_websocket_check_delay_sec,
            config.idle_websocket_check_period_sec,
        ),
        (
            SweepKind::IdlePlayer,
            config.idle_player_check_delay_sec,
            config.idle_player_check_period_sec,
        ),
        (
            SweepKind::IdleGame,
            config.idle_game_check_delay_sec,
            config.idle_game_check_period_sec,
        ),
        (
            SweepKind::ObsoleteGame,
            config.obsolete_game_check_delay_sec,
            config.obsolete_game_check_period_sec,
        ),
    ];
    schedule
        .into_iter()
        .map(|(kind, delay, period)| spawn_sweeper(kind, delay, period, tx.clone()))
        .collect()
}

fn spawn_sweeper(kind: SweepKind, delay_sec: u64, period_sec: u64, tx: EventTx) -> JoinHandle<()> {
    tokio::spawn(async move {
        let in_flight = Arc::new(AtomicBool::new(false));
        tokio::time::sleep(Duration::from_secs(delay_sec)).await;
        let mut interval = tokio::time::interval(Duration::from_secs(period_sec.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if in_flight.swap(true, Ordering::AcqRel) {
                debug!("coalescing {:?} tick; previous tick still pending", kind);
                continue;
            }
            let event = CoordinatorEvent::Sweep {
                kind,
                in_flight: Some(in_flight.clone()),
            };
            if tx.send(event).is_err() {
                break;
            }
        }
    })
}
