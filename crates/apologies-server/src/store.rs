//! In-memory state store.
//!
//! The store owns every tracked entity (connections, players, games)
//! plus the secondary indices over them, and enforces the resource
//! limits and uniqueness rules. It contains no scheduling logic and no
//! I/O: all mutation happens inside handlers called by the coordinator
//! loop, one event at a time.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};

use apologies_engine::{EngineState, PlayerColor};
use apologies_protocol::requests::AdvertiseGameContext;
use apologies_protocol::{
    ActivityState, AdvertisedGame, CompletionReason, ConnectionState, FailureReason, GamePlayer,
    GameState, PlayState, PlayerKind, RegisteredPlayer, SeatState, Visibility,
};

use crate::clock::Clock;
use crate::config::ServerConfig;
use crate::error::{RequestError, RequestResult};
use crate::ids::{GameId, PlayerId};
use crate::types::{ConnectionKey, OutboundTx};

/// Configured resource maxima, checked before every creation.
#[derive(Debug, Clone)]
pub struct Limits {
    pub websocket_limit: usize,
    pub registered_player_limit: usize,
    pub total_game_limit: usize,
    pub in_progress_game_limit: usize,
}

impl Limits {
    pub fn from_config(config: &ServerConfig) -> Self {
        Limits {
            websocket_limit: config.websocket_limit,
            registered_player_limit: config.registered_player_limit,
            total_game_limit: config.total_game_limit,
            in_progress_game_limit: config.in_progress_game_limit,
        }
    }
}

/// A live connection to one remote peer.
#[derive(Debug)]
pub struct TrackedConnection {
    pub key: ConnectionKey,
    pub tx: OutboundTx,
    pub opened_date: DateTime<Utc>,
    pub last_active_date: DateTime<Utc>,
    pub player_id: Option<PlayerId>,
    pub idle: bool,
    pub dead: bool,
}

/// The state tracked for a registered player.
#[derive(Debug, Clone)]
pub struct TrackedPlayer {
    pub player_id: PlayerId,
    pub handle: String,
    pub registration_date: DateTime<Utc>,
    pub last_active_date: DateTime<Utc>,
    pub connection_state: ConnectionState,
    pub activity_state: ActivityState,
    pub play_state: PlayState,
    pub connection: Option<ConnectionKey>,
    pub game_id: Option<GameId>,
    pub color: Option<PlayerColor>,
}

impl TrackedPlayer {
    pub fn to_registered(&self) -> RegisteredPlayer {
        RegisteredPlayer {
            handle: self.handle.clone(),
            registration_date: self.registration_date,
            last_active_date: self.last_active_date,
            connection_state: self.connection_state,
            activity_state: self.activity_state,
            play_state: self.play_state,
            game_id: self.game_id.as_ref().map(|id| id.as_str().to_string()),
        }
    }
}

/// Who occupies a seat.
#[derive(Debug, Clone)]
pub enum SeatOccupant {
    Human { player_id: PlayerId, handle: String },
    Programmatic,
}

/// A slot in a game, indexed by color.
#[derive(Debug, Clone)]
pub struct Seat {
    pub color: PlayerColor,
    pub occupant: SeatOccupant,
    pub state: SeatState,
}

impl Seat {
    pub fn is_human(&self) -> bool {
        matches!(self.occupant, SeatOccupant::Human { .. })
    }

    pub fn player_id(&self) -> Option<&PlayerId> {
        match &self.occupant {
            SeatOccupant::Human { player_id, .. } => Some(player_id),
            SeatOccupant::Programmatic => None,
        }
    }

    pub fn handle(&self) -> Option<&str> {
        match &self.occupant {
            SeatOccupant::Human { handle, .. } => Some(handle),
            SeatOccupant::Programmatic => None,
        }
    }

    /// Whether this seat can still take turns. Programmatic seats
    /// always can; a human seat cannot once it has quit or dropped.
    pub fn can_still_play(&self) -> bool {
        match self.occupant {
            SeatOccupant::Programmatic => true,
            SeatOccupant::Human { .. } => {
                !matches!(self.state, SeatState::Quit | SeatState::Disconnected)
            }
        }
    }
}

/// The state tracked for a game.
#[derive(Debug, Clone)]
pub struct TrackedGame {
    pub game_id: GameId,
    pub name: String,
    pub mode: apologies_engine::GameMode,
    pub seats_total: usize,
    pub advertiser_id: PlayerId,
    pub advertiser_handle: String,
    pub visibility: Visibility,
    pub invited_handles: IndexSet<String>,
    pub advertised_date: DateTime<Utc>,
    pub started_date: Option<DateTime<Utc>>,
    pub completed_date: Option<DateTime<Utc>>,
    pub last_active_date: DateTime<Utc>,
    pub game_state: GameState,
    pub activity_state: ActivityState,
    pub completion_reason: Option<CompletionReason>,
    pub completion_comment: Option<String>,
    pub seats: Vec<Seat>,
    pub engine: Option<EngineState>,
}

impl TrackedGame {
    pub fn seat_of(&self, player_id: &PlayerId) -> Option<&Seat> {
        self.seats.iter().find(|s| s.player_id() == Some(player_id))
    }

    pub fn seat_of_mut(&mut self, player_id: &PlayerId) -> Option<&mut Seat> {
        self.seats
            .iter_mut()
            .find(|s| s.player_id() == Some(player_id))
    }

    pub fn seat_by_color(&self, color: PlayerColor) -> Option<&Seat> {
        self.seats.iter().find(|s| s.color == color)
    }

    pub fn human_seats(&self) -> usize {
        self.seats.iter().filter(|s| s.is_human()).count()
    }

    pub fn is_invited(&self, handle: &str) -> bool {
        self.invited_handles.contains(handle)
    }

    /// Player ids of every human seat.
    pub fn seated_player_ids(&self) -> Vec<PlayerId> {
        self.seats
            .iter()
            .filter_map(|s| s.player_id().cloned())
            .collect()
    }

    /// Whether the game can continue. A started game needs at least two
    /// seats still able to play and at least one human seat in PLAYING;
    /// an advertised game needs its advertiser seated.
    pub fn is_viable(&self) -> bool {
        match self.game_state {
            GameState::Advertised => self.seat_of(&self.advertiser_id).is_some(),
            GameState::Started => {
                let able = self.seats.iter().filter(|s| s.can_still_play()).count();
                let humans_playing = self
                    .seats
                    .iter()
                    .filter(|s| s.is_human() && s.state == SeatState::Playing)
                    .count();
                able >= 2 && humans_playing >= 1
            }
            GameState::Completed | GameState::Cancelled => false,
        }
    }

    /// Summary for AVAILABLE_GAMES, GAME_ADVERTISED, and GAME_INVITATION.
    pub fn to_advertised(&self) -> AdvertisedGame {
        AdvertisedGame {
            game_id: self.game_id.as_str().to_string(),
            name: self.name.clone(),
            mode: self.mode,
            advertiser_handle: self.advertiser_handle.clone(),
            players: self.seats_total,
            available: self.seats_total.saturating_sub(self.human_seats()),
            visibility: self.visibility,
            invited_handles: self.invited_handles.iter().cloned().collect(),
        }
    }

    /// Seat table for GAME_PLAYER_CHANGE.
    pub fn game_players(&self) -> IndexMap<PlayerColor, GamePlayer> {
        self.seats
            .iter()
            .map(|seat| {
                (
                    seat.color,
                    GamePlayer {
                        handle: seat.handle().map(str::to_string),
                        kind: if seat.is_human() {
                            PlayerKind::Human
                        } else {
                            PlayerKind::Programmatic
                        },
                        state: seat.state,
                    },
                )
            })
            .collect()
    }
}

/// The single in-memory authority over all mutable server state.
pub struct StateStore {
    clock: Arc<dyn Clock>,
    limits: Limits,
    connections: IndexMap<ConnectionKey, TrackedConnection>,
    players: IndexMap<PlayerId, TrackedPlayer>,
    games: IndexMap<GameId, TrackedGame>,
    handles: HashMap<String, PlayerId>,
}

impl StateStore {
    pub fn new(clock: Arc<dyn Clock>, limits: Limits) -> Self {
        StateStore {
            clock,
            limits,
            connections: IndexMap::new(),
            players: IndexMap::new(),
            games: IndexMap::new(),
            handles: HashMap::new(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // -------------------------------------------------------------------------
    // Connections
    // -------------------------------------------------------------------------

    pub fn track_connection(&mut self, key: ConnectionKey, tx: OutboundTx) -> RequestResult<()> {
        if self.live_connection_count() >= self.limits.websocket_limit {
            return Err(RequestError::new(FailureReason::WebsocketLimit));
        }
        let now = self.now();
        self.connections.insert(
            key,
            TrackedConnection {
                key,
                tx,
                opened_date: now,
                last_active_date: now,
                player_id: None,
                idle: false,
                dead: false,
            },
        );
        Ok(())
    }

    pub fn connection(&self, key: &ConnectionKey) -> Option<&TrackedConnection> {
        self.connections.get(key)
    }

    pub fn connection_mut(&mut self, key: &ConnectionKey) -> Option<&mut TrackedConnection> {
        self.connections.get_mut(key)
    }

    pub fn connection_keys(&self) -> Vec<ConnectionKey> {
        self.connections.keys().copied().collect()
    }

    pub fn remove_connection(&mut self, key: &ConnectionKey) -> Option<TrackedConnection> {
        self.connections.shift_remove(key)
    }

    pub fn mark_connection_dead(&mut self, key: &ConnectionKey) {
        if let Some(conn) = self.connections.get_mut(key) {
            conn.dead = true;
        }
    }

    pub fn touch_connection(&mut self, key: &ConnectionKey) {
        let now = self.now();
        if let Some(conn) = self.connections.get_mut(key) {
            conn.last_active_date = now;
            conn.idle = false;
        }
    }

    pub fn live_connection_count(&self) -> usize {
        self.connections.values().filter(|c| !c.dead).count()
    }

    // -------------------------------------------------------------------------
    // Players
    // -------------------------------------------------------------------------

    /// Register a new player under a handle and bind it to the given
    /// connection.
    pub fn register_player(
        &mut self,
        handle: &str,
        key: ConnectionKey,
    ) -> RequestResult<PlayerId> {
        if self.handles.contains_key(handle) {
            return Err(RequestError::new(FailureReason::HandleTaken));
        }
        if self.players.len() >= self.limits.registered_player_limit {
            return Err(RequestError::new(FailureReason::UserLimit));
        }
        let already_bound = self
            .connections
            .get(&key)
            .and_then(|c| c.player_id.as_ref())
            .is_some();
        if already_bound {
            return Err(RequestError::with_comment(
                FailureReason::InvalidRequest,
                "Connection is already bound to a player",
            ));
        }
        let now = self.now();
        let player_id = PlayerId::generate();
        self.players.insert(
            player_id.clone(),
            TrackedPlayer {
                player_id: player_id.clone(),
                handle: handle.to_string(),
                registration_date: now,
                last_active_date: now,
                connection_state: ConnectionState::Connected,
                activity_state: ActivityState::Active,
                play_state: PlayState::Waiting,
                connection: Some(key),
                game_id: None,
                color: None,
            },
        );
        self.handles.insert(handle.to_string(), player_id.clone());
        if let Some(conn) = self.connections.get_mut(&key) {
            conn.player_id = Some(player_id.clone());
        }
        Ok(player_id)
    }

    /// Rebind an existing player to a new connection. The player's old
    /// connection (if any) and the new connection's old player (if any)
    /// are both unbound.
    pub fn bind_reregister(&mut self, player_id: &PlayerId, key: ConnectionKey) -> RequestResult<()> {
        if !self.players.contains_key(player_id) {
            return Err(RequestError::new(FailureReason::InvalidPlayer));
        }
        if !self.connections.contains_key(&key) {
            return Err(RequestError::new(FailureReason::InvalidRequest));
        }
        let displaced = self
            .connections
            .get(&key)
            .and_then(|c| c.player_id.clone())
            .filter(|p| p != player_id);
        if let Some(displaced) = displaced {
            if let Some(player) = self.players.get_mut(&displaced) {
                player.connection = None;
                player.connection_state = ConnectionState::Disconnected;
            }
        }
        let old_key = self
            .players
            .get(player_id)
            .and_then(|p| p.connection)
            .filter(|k| *k != key);
        if let Some(old_key) = old_key {
            if let Some(old_conn) = self.connections.get_mut(&old_key) {
                old_conn.player_id = None;
            }
        }
        if let Some(conn) = self.connections.get_mut(&key) {
            conn.player_id = Some(player_id.clone());
        }
        let now = self.now();
        if let Some(player) = self.players.get_mut(player_id) {
            player.connection = Some(key);
            player.connection_state = ConnectionState::Connected;
            player.activity_state = ActivityState::Active;
            player.last_active_date = now;
        }
        Ok(())
    }

    pub fn player(&self, player_id: &PlayerId) -> Option<&TrackedPlayer> {
        self.players.get(player_id)
    }

    pub fn player_mut(&mut self, player_id: &PlayerId) -> Option<&mut TrackedPlayer> {
        self.players.get_mut(player_id)
    }

    pub fn player_by_handle(&self, handle: &str) -> Option<&TrackedPlayer> {
        self.handles.get(handle).and_then(|id| self.players.get(id))
    }

    pub fn player_for_connection(&self, key: &ConnectionKey) -> Option<&PlayerId> {
        self.connections.get(key).and_then(|c| c.player_id.as_ref())
    }

    /// Connection key for a player, when the player is connected.
    pub fn connection_for_player(&self, player_id: &PlayerId) -> Option<ConnectionKey> {
        self.players
            .get(player_id)
            .filter(|p| p.connection_state == ConnectionState::Connected)
            .and_then(|p| p.connection)
    }

    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.players.keys().cloned().collect()
    }

    pub fn registered_players(&self) -> Vec<RegisteredPlayer> {
        self.players.values().map(|p| p.to_registered()).collect()
    }

    pub fn registered_player_count(&self) -> usize {
        self.players.len()
    }

    /// Destroy a player: release its handle and unbind its connection.
    /// The connection itself stays open.
    pub fn delete_player(&mut self, player_id: &PlayerId) {
        if let Some(player) = self.players.shift_remove(player_id) {
            self.handles.remove(&player.handle);
            if let Some(key) = player.connection {
                if let Some(conn) = self.connections.get_mut(&key) {
                    if conn.player_id.as_ref() == Some(player_id) {
                        conn.player_id = None;
                    }
                }
            }
        }
    }

    /// Record activity for a player (and its connection): resets the
    /// activity state to ACTIVE and refreshes `last_active_date`.
    pub fn touch_player(&mut self, player_id: &PlayerId) {
        let now = self.now();
        if let Some(player) = self.players.get_mut(player_id) {
            player.last_active_date = now;
            player.activity_state = ActivityState::Active;
        }
    }

    // -------------------------------------------------------------------------
    // Games
    // -------------------------------------------------------------------------

    /// Track a newly-advertised game, auto-joining the advertiser to
    /// the first seat.
    pub fn create_game(
        &mut self,
        advertiser_id: &PlayerId,
        context: &AdvertiseGameContext,
    ) -> RequestResult<GameId> {
        let advertiser = self
            .players
            .get(advertiser_id)
            .ok_or_else(|| RequestError::new(FailureReason::InvalidPlayer))?;
        if advertiser.game_id.is_some() {
            return Err(RequestError::new(FailureReason::AlreadyPlaying));
        }
        if self.games.len() >= self.limits.total_game_limit {
            return Err(RequestError::new(FailureReason::TotalGameLimit));
        }
        if self.in_progress_game_count() >= self.limits.in_progress_game_limit {
            return Err(RequestError::new(FailureReason::InProgressGameLimit));
        }
        let now = self.now();
        let game_id = GameId::generate();
        let advertiser_handle = advertiser.handle.clone();
        let seat = Seat {
            color: PlayerColor::ALL[0],
            occupant: SeatOccupant::Human {
                player_id: advertiser_id.clone(),
                handle: advertiser_handle.clone(),
            },
            state: SeatState::Joined,
        };
        self.games.insert(
            game_id.clone(),
            TrackedGame {
                game_id: game_id.clone(),
                name: context.name.clone(),
                mode: context.mode,
                seats_total: context.players,
                advertiser_id: advertiser_id.clone(),
                advertiser_handle,
                visibility: context.visibility,
                invited_handles: context.invited_handles.iter().cloned().collect(),
                advertised_date: now,
                started_date: None,
                completed_date: None,
                last_active_date: now,
                game_state: GameState::Advertised,
                activity_state: ActivityState::Active,
                completion_reason: None,
                completion_comment: None,
                seats: vec![seat],
                engine: None,
            },
        );
        if let Some(player) = self.players.get_mut(advertiser_id) {
            player.game_id = Some(game_id.clone());
            player.color = Some(PlayerColor::ALL[0]);
            player.play_state = PlayState::Joined;
            player.last_active_date = now;
        }
        Ok(game_id)
    }

    /// Join a player to an advertised game.
    pub fn join_game(&mut self, player_id: &PlayerId, game_id: &GameId) -> RequestResult<()> {
        let now = self.now();
        let handle = self
            .players
            .get(player_id)
            .ok_or_else(|| RequestError::new(FailureReason::InvalidPlayer))?
            .handle
            .clone();
        let already_playing = self
            .players
            .get(player_id)
            .map(|p| p.game_id.is_some())
            .unwrap_or(false);
        let game = self
            .games
            .get_mut(game_id)
            .ok_or_else(|| RequestError::new(FailureReason::InvalidGame))?;
        match game.game_state {
            GameState::Advertised => {}
            GameState::Started => {
                return Err(RequestError::new(FailureReason::GameAlreadyStarted))
            }
            GameState::Completed | GameState::Cancelled => {
                return Err(RequestError::with_comment(
                    FailureReason::InvalidGame,
                    "Game is no longer available",
                ))
            }
        }
        if game.visibility == Visibility::Private
            && !game.is_invited(&handle)
            && game.advertiser_handle != handle
        {
            return Err(RequestError::new(FailureReason::NotInvited));
        }
        if game.seats.len() >= game.seats_total {
            return Err(RequestError::new(FailureReason::NoSeats));
        }
        if already_playing {
            return Err(RequestError::new(FailureReason::AlreadyPlaying));
        }
        let color = PlayerColor::ALL[game.seats.len()];
        game.seats.push(Seat {
            color,
            occupant: SeatOccupant::Human {
                player_id: player_id.clone(),
                handle,
            },
            state: SeatState::Joined,
        });
        game.last_active_date = now;
        game.activity_state = ActivityState::Active;
        if let Some(player) = self.players.get_mut(player_id) {
            player.game_id = Some(game_id.clone());
            player.color = Some(color);
            player.play_state = PlayState::Joined;
            player.last_active_date = now;
        }
        Ok(())
    }

    /// Remove a player's seat from an advertised game, reassigning the
    /// colors of later seats so seat order stays contiguous.
    pub fn remove_seat(&mut self, game_id: &GameId, player_id: &PlayerId) {
        let mut reassigned: Vec<(PlayerId, PlayerColor)> = Vec::new();
        if let Some(game) = self.games.get_mut(game_id) {
            game.seats.retain(|s| s.player_id() != Some(player_id));
            for (idx, seat) in game.seats.iter_mut().enumerate() {
                seat.color = PlayerColor::ALL[idx];
                if let Some(pid) = seat.player_id() {
                    reassigned.push((pid.clone(), seat.color));
                }
            }
        }
        for (pid, color) in reassigned {
            if let Some(player) = self.players.get_mut(&pid) {
                player.color = Some(color);
            }
        }
    }

    pub fn game(&self, game_id: &GameId) -> Option<&TrackedGame> {
        self.games.get(game_id)
    }

    pub fn game_mut(&mut self, game_id: &GameId) -> Option<&mut TrackedGame> {
        self.games.get_mut(game_id)
    }

    pub fn game_ids(&self) -> Vec<GameId> {
        self.games.keys().cloned().collect()
    }

    pub fn delete_game(&mut self, game_id: &GameId) {
        self.games.shift_remove(game_id);
    }

    pub fn touch_game(&mut self, game_id: &GameId) {
        let now = self.now();
        if let Some(game) = self.games.get_mut(game_id) {
            game.last_active_date = now;
            game.activity_state = ActivityState::Active;
        }
    }

    pub fn total_game_count(&self) -> usize {
        self.games.len()
    }

    pub fn in_progress_game_count(&self) -> usize {
        self.games
            .values()
            .filter(|g| g.game_state.is_in_progress())
            .count()
    }

    pub fn in_progress_game_ids(&self) -> Vec<GameId> {
        self.games
            .values()
            .filter(|g| g.game_state.is_in_progress())
            .map(|g| g.game_id.clone())
            .collect()
    }

    /// Advertised games a player may see: public ones plus private ones
    /// it advertises or is invited to.
    pub fn available_games(&self, handle: &str) -> Vec<AdvertisedGame> {
        self.games
            .values()
            .filter(|g| g.game_state == GameState::Advertised)
            .filter(|g| {
                g.visibility == Visibility::Public
                    || g.advertiser_handle == handle
                    || g.is_invited(handle)
            })
            .map(|g| g.to_advertised())
            .collect()
    }

    // -------------------------------------------------------------------------
    // Invariants
    // -------------------------------------------------------------------------

    /// Verify the cross-entity invariants that must hold between
    /// handler invocations, panicking on the first violation. Called by
    /// tests after every scenario step; a violation is a programmer
    /// error with no recovery path.
    pub fn check_invariants(&self) {
        for (handle, player_id) in &self.handles {
            let player = self
                .players
                .get(player_id)
                .unwrap_or_else(|| panic!("handle {} maps to unknown player", handle));
            assert_eq!(&player.handle, handle, "handle index out of sync");
        }
        let mut seen_handles = HashMap::new();
        for player in self.players.values() {
            if let Some(other) = seen_handles.insert(player.handle.clone(), &player.player_id) {
                panic!("duplicate handle {} for {:?} and {:?}", player.handle, other, player.player_id);
            }
            match &player.game_id {
                Some(game_id) => {
                    let game = self
                        .games
                        .get(game_id)
                        .unwrap_or_else(|| panic!("player references unknown game {}", game_id));
                    assert!(
                        game.seat_of(&player.player_id).is_some(),
                        "player {} not seated in its current game",
                        player.handle
                    );
                    assert!(
                        game.game_state.is_in_progress(),
                        "player {} references a finished game",
                        player.handle
                    );
                    let seat_playing = game
                        .seat_of(&player.player_id)
                        .map(|s| s.state == SeatState::Playing)
                        .unwrap_or(false);
                    assert_eq!(
                        player.play_state == PlayState::Playing,
                        game.game_state == GameState::Started && seat_playing,
                        "play state out of sync for {}",
                        player.handle
                    );
                }
                None => {
                    assert!(
                        matches!(player.play_state, PlayState::Waiting | PlayState::Finished),
                        "player {} has no game but play state {:?}",
                        player.handle,
                        player.play_state
                    );
                }
            }
        }
        for conn in self.connections.values() {
            if let Some(player_id) = &conn.player_id {
                let player = self
                    .players
                    .get(player_id)
                    .expect("connection bound to unknown player");
                assert_ne!(
                    player.activity_state,
                    ActivityState::Inactive,
                    "connection bound to inactive player"
                );
            }
        }
        for game in self.games.values() {
            match game.game_state {
                GameState::Advertised => {
                    assert!(
                        game.seats.iter().all(|s| s.is_human()),
                        "advertised game {} has programmatic seats",
                        game.game_id
                    );
                    assert!(
                        game.seats.len() <= game.seats_total,
                        "advertised game {} over-filled",
                        game.game_id
                    );
                }
                GameState::Started => {
                    assert_eq!(
                        game.seats.len(),
                        game.seats_total,
                        "started game {} must have every seat occupied",
                        game.game_id
                    );
                    assert!(
                        game.seats
                            .iter()
                            .all(|s| !s.is_human() || s.state != SeatState::Joined),
                        "started game {} has a seat still in JOINED",
                        game.game_id
                    );
                }
                GameState::Completed | GameState::Cancelled => {}
            }
        }
        assert!(
            self.registered_player_count() <= self.limits.registered_player_limit,
            "registered player limit exceeded"
        );
        assert!(
            self.total_game_count() <= self.limits.total_game_limit,
            "total game limit exceeded"
        );
        assert!(
            self.in_progress_game_count() <= self.limits.in_progress_game_limit,
            "in-progress game limit exceeded"
        );
        assert!(
            self.live_connection_count() <= self.limits.websocket_limit,
            "websocket limit exceeded"
        );
    }
}
