//! Request handlers and event cascades.
//!
//! Every method here runs to completion inside the coordinator loop
//! and is synchronous with respect to the store: a handler observes a
//! consistent snapshot, mutates it, and enqueues outbound events. A
//! validation failure leaves state untouched and produces exactly one
//! REQUEST_FAILED on the offending connection.
//!
//! Unregister, disconnect, and inactivity all funnel through the same
//! departure cascade: flag the seat, notify the table, re-evaluate
//! viability, cancel if the game can no longer continue, then destroy
//! or mark the player.

use tracing::{debug, info, warn};

use apologies_engine::{Engine, Outcome, PlayerColor};
use apologies_protocol::events::{
    AvailableGamesContext, Event, GameAdvertisedContext, GameCancelledContext,
    GameCompletedContext, GameInvitationContext, GameJoinedContext, GamePlayerChangeContext,
    GamePlayerTurnContext, GameStateChangeContext, PlayerMessageReceivedContext,
    PlayerRegisteredContext, RegisteredPlayersContext, RequestFailedContext,
};
use apologies_protocol::requests::{
    AdvertiseGameContext, ExecuteMoveContext, JoinGameContext, RegisterPlayerContext, Request,
    SendMessageContext,
};
use apologies_protocol::{
    decode_request, mask_player_ids, CompletionReason, ConnectionState, FailureReason, GameState,
    PlayState, ProtocolError, SeatState,
};

use crate::coordinator::Coordinator;
use crate::dispatcher::Audience;
use crate::error::{RequestError, RequestResult};
use crate::ids::{GameId, PlayerId};
use crate::store::{Seat, SeatOccupant};
use crate::types::{ConnectionKey, OutboundTx, SweepKind};

/// Largest SEND_MESSAGE payload accepted, in bytes.
const MAX_MESSAGE_LEN: usize = 2048;

/// Why a player is leaving its current game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeaveKind {
    Quit,
    Disconnect,
    Unregister,
    Inactive,
}

impl LeaveKind {
    /// Seat flag recorded for a started game.
    fn seat_state(self) -> SeatState {
        match self {
            LeaveKind::Disconnect => SeatState::Disconnected,
            _ => SeatState::Quit,
        }
    }

    fn verb(self) -> &'static str {
        match self {
            LeaveKind::Quit => "quit",
            LeaveKind::Disconnect => "disconnected",
            LeaveKind::Unregister => "unregistered",
            LeaveKind::Inactive => "went inactive",
        }
    }
}

impl Coordinator {
    // -------------------------------------------------------------------------
    // Connection lifecycle
    // -------------------------------------------------------------------------

    pub(crate) fn on_connection_opened(&mut self, key: ConnectionKey, tx: OutboundTx) {
        debug!("EVENT[Websocket Connected]: {}", key);
        if let Err(err) = self.store.track_connection(key, tx.clone()) {
            warn!("refusing connection {}: {}", key, err);
            let event = Event::RequestFailed(RequestFailedContext::new(err.reason, err.comment));
            if let Ok(text) = apologies_protocol::encode_event(&event) {
                let _ = tx.try_send(crate::types::Outbound::Frame(text));
            }
            let _ = tx.try_send(crate::types::Outbound::Close);
        }
    }

    pub(crate) fn on_request(&mut self, key: ConnectionKey, text: String) {
        if self.store.connection(&key).is_none() {
            debug!("dropping frame from unknown connection {}", key);
            return;
        }
        self.store.touch_connection(&key);
        debug!("received frame on {}: {}", key, mask_player_ids(&text));

        let (request, auth) = match decode_request(&text) {
            Ok(decoded) => decoded,
            Err(ProtocolError::Malformed(err)) => {
                warn!("undecodable frame on {}, dropping connection: {}", key, err);
                self.store.mark_connection_dead(&key);
                self.outbox.push_close(key);
                return;
            }
            Err(ProtocolError::InvalidRequest(message)) => {
                self.fail(
                    key,
                    RequestError::with_comment(FailureReason::InvalidRequest, message),
                );
                return;
            }
        };

        info!("REQUEST[{}]", request.kind());
        let result = self.route_request(key, request, auth);
        if let Err(err) = result {
            self.fail(key, err);
        }
    }

    pub(crate) fn on_connection_closed(&mut self, key: ConnectionKey) {
        let Some(connection) = self.store.remove_connection(&key) else {
            return;
        };
        debug!("EVENT[Websocket Disconnected]: {}", key);
        if let Some(player_id) = connection.player_id {
            let still_bound = self
                .store
                .player(&player_id)
                .map(|p| p.connection == Some(key))
                .unwrap_or(false);
            if still_bound {
                info!("EVENT[Player Disconnected]");
                self.depart(&player_id, LeaveKind::Disconnect);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Request routing
    // -------------------------------------------------------------------------

    fn route_request(
        &mut self,
        key: ConnectionKey,
        request: Request,
        auth: Option<String>,
    ) -> RequestResult<()> {
        if let Request::RegisterPlayer(context) = request {
            return self.handle_register_player(key, context);
        }
        let player_id = self.authorize(key, auth, &request)?;
        self.store.touch_player(&player_id);
        if let Some(player) = self.store.player_mut(&player_id) {
            player.connection_state = ConnectionState::Connected;
        }
        match request {
            Request::ReregisterPlayer => self.handle_reregister_player(key, &player_id),
            Request::UnregisterPlayer => self.handle_unregister_player(&player_id),
            Request::ListPlayers => self.handle_list_players(key),
            Request::AdvertiseGame(context) => self.handle_advertise_game(key, &player_id, context),
            Request::ListAvailableGames => self.handle_list_available_games(key, &player_id),
            Request::JoinGame(context) => self.handle_join_game(&player_id, context),
            Request::QuitGame => self.handle_quit_game(&player_id),
            Request::StartGame => self.handle_start_game(&player_id),
            Request::CancelGame => self.handle_cancel_game(&player_id),
            Request::ExecuteMove(context) => self.handle_execute_move(&player_id, context),
            Request::RetrieveGameState => self.handle_retrieve_game_state(key, &player_id),
            Request::SendMessage(context) => self.handle_send_message(&player_id, context),
            Request::RegisterPlayer(_) => unreachable!("handled above"),
        }
    }

    /// Resolve the identity behind a request. REREGISTER_PLAYER
    /// authenticates by possession of the player id alone; every other
    /// request additionally requires that the sending connection is the
    /// one bound to that player.
    fn authorize(
        &self,
        key: ConnectionKey,
        auth: Option<String>,
        request: &Request,
    ) -> RequestResult<PlayerId> {
        let raw = auth.ok_or_else(|| RequestError::new(FailureReason::NotAuthorized))?;
        let player_id = PlayerId::from_string(raw);
        if self.store.player(&player_id).is_none() {
            return Err(RequestError::new(FailureReason::InvalidPlayer));
        }
        if matches!(request, Request::ReregisterPlayer) {
            return Ok(player_id);
        }
        match self.store.player_for_connection(&key) {
            Some(bound) if *bound == player_id => Ok(player_id),
            _ => Err(RequestError::with_comment(
                FailureReason::NotAuthorized,
                "Connection is not bound to that player",
            )),
        }
    }

    fn fail(&mut self, key: ConnectionKey, err: RequestError) {
        debug!("request failed: {}", err);
        self.outbox.push(
            Audience::Connection(key),
            Event::RequestFailed(RequestFailedContext::new(err.reason, err.comment)),
        );
    }

    // -------------------------------------------------------------------------
    // Player requests
    // -------------------------------------------------------------------------

    fn handle_register_player(
        &mut self,
        key: ConnectionKey,
        context: RegisterPlayerContext,
    ) -> RequestResult<()> {
        let player_id = self.store.register_player(&context.handle, key)?;
        info!("EVENT[Player Registered]: {}", context.handle);
        self.outbox.push(
            Audience::Connection(key),
            Event::PlayerRegistered(PlayerRegisteredContext {
                player_id: player_id.to_string(),
            }),
        );
        Ok(())
    }

    fn handle_reregister_player(
        &mut self,
        key: ConnectionKey,
        player_id: &PlayerId,
    ) -> RequestResult<()> {
        self.store.bind_reregister(player_id, key)?;
        self.outbox.push(
            Audience::Connection(key),
            Event::PlayerRegistered(PlayerRegisteredContext {
                player_id: player_id.to_string(),
            }),
        );
        self.resume_after_reconnect(player_id);
        Ok(())
    }

    /// If a reconnecting player holds a DISCONNECTED seat in a started
    /// game, put it back into play and catch it up.
    fn resume_after_reconnect(&mut self, player_id: &PlayerId) {
        let Some(game_id) = self.store.player(player_id).and_then(|p| p.game_id.clone()) else {
            return;
        };
        let resumable = self
            .store
            .game(&game_id)
            .map(|g| {
                g.game_state == GameState::Started
                    && g.seat_of(player_id)
                        .map(|s| s.state == SeatState::Disconnected)
                        .unwrap_or(false)
            })
            .unwrap_or(false);
        if !resumable {
            return;
        }
        let handle = match self.store.player(player_id) {
            Some(player) => player.handle.clone(),
            None => return,
        };
        let mut color = None;
        if let Some(game) = self.store.game_mut(&game_id) {
            if let Some(seat) = game.seat_of_mut(player_id) {
                seat.state = SeatState::Playing;
                color = Some(seat.color);
            }
        }
        if let Some(player) = self.store.player_mut(player_id) {
            player.play_state = PlayState::Playing;
        }
        self.store.touch_game(&game_id);
        self.push_player_change(&game_id, format!("Player {} reconnected", handle));
        self.push_state_to_player(&game_id, player_id);
        let on_turn = self
            .store
            .game(&game_id)
            .and_then(|g| g.engine.as_ref())
            .map(|e| Some(e.current_seat()) == color)
            .unwrap_or(false);
        if on_turn {
            if let Some(color) = color {
                self.prompt_turn(&game_id, color);
            }
        }
    }

    fn handle_unregister_player(&mut self, player_id: &PlayerId) -> RequestResult<()> {
        info!("EVENT[Player Unregistered]");
        self.depart(player_id, LeaveKind::Unregister);
        Ok(())
    }

    fn handle_list_players(&mut self, key: ConnectionKey) -> RequestResult<()> {
        self.outbox.push(
            Audience::Connection(key),
            Event::RegisteredPlayers(RegisteredPlayersContext {
                players: self.store.registered_players(),
            }),
        );
        Ok(())
    }

    fn handle_send_message(
        &mut self,
        player_id: &PlayerId,
        context: SendMessageContext,
    ) -> RequestResult<()> {
        if context.message.len() > MAX_MESSAGE_LEN {
            return Err(RequestError::new(FailureReason::MessageTooLarge));
        }
        let (sender_handle, sender_game) = match self.store.player(player_id) {
            Some(player) => (player.handle.clone(), player.game_id.clone()),
            None => return Err(RequestError::new(FailureReason::InvalidPlayer)),
        };
        // Recipients that do not exist (or are out of scope) are
        // silently dropped; disconnected ones fall out at dispatch.
        let mut recipients = Vec::new();
        for handle in &context.recipient_handles {
            let Some(recipient) = self.store.player_by_handle(handle) else {
                continue;
            };
            if self.config.game_scoped_messages
                && (sender_game.is_none() || recipient.game_id != sender_game)
            {
                continue;
            }
            recipients.push(recipient.player_id.clone());
        }
        self.outbox.push(
            Audience::Players(recipients),
            Event::PlayerMessageReceived(PlayerMessageReceivedContext {
                sender_handle,
                recipient_handles: context.recipient_handles,
                message: context.message,
            }),
        );
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Game requests
    // -------------------------------------------------------------------------

    fn handle_advertise_game(
        &mut self,
        key: ConnectionKey,
        player_id: &PlayerId,
        context: AdvertiseGameContext,
    ) -> RequestResult<()> {
        let game_id = self.store.create_game(player_id, &context)?;
        info!("EVENT[Game Advertised]: {}", game_id);
        let advertised = match self.store.game(&game_id) {
            Some(game) => game.to_advertised(),
            None => return Ok(()),
        };
        self.outbox.push(
            Audience::Connection(key),
            Event::GameAdvertised(GameAdvertisedContext {
                game: advertised.clone(),
            }),
        );
        self.outbox.push(
            Audience::Player(player_id.clone()),
            Event::GameJoined(GameJoinedContext {
                game_id: game_id.as_str().to_string(),
            }),
        );
        let invited: Vec<PlayerId> = context
            .invited_handles
            .iter()
            .filter_map(|handle| self.store.player_by_handle(handle))
            .map(|p| p.player_id.clone())
            .collect();
        if !invited.is_empty() {
            self.outbox.push(
                Audience::Players(invited),
                Event::GameInvitation(GameInvitationContext { game: advertised }),
            );
        }
        Ok(())
    }

    fn handle_list_available_games(
        &mut self,
        key: ConnectionKey,
        player_id: &PlayerId,
    ) -> RequestResult<()> {
        let handle = match self.store.player(player_id) {
            Some(player) => player.handle.clone(),
            None => return Err(RequestError::new(FailureReason::InvalidPlayer)),
        };
        self.outbox.push(
            Audience::Connection(key),
            Event::AvailableGames(AvailableGamesContext {
                games: self.store.available_games(&handle),
            }),
        );
        Ok(())
    }

    fn handle_join_game(
        &mut self,
        player_id: &PlayerId,
        context: JoinGameContext,
    ) -> RequestResult<()> {
        let game_id = GameId::from_string(context.game_id);
        self.store.join_game(player_id, &game_id)?;
        info!("EVENT[Game Joined]: {}", game_id);
        let handle = self
            .store
            .player(player_id)
            .map(|p| p.handle.clone())
            .unwrap_or_default();
        self.outbox.push(
            Audience::Player(player_id.clone()),
            Event::GameJoined(GameJoinedContext {
                game_id: game_id.as_str().to_string(),
            }),
        );
        self.push_player_change(&game_id, format!("Player {} joined", handle));
        let fully_joined = self
            .store
            .game(&game_id)
            .map(|g| g.game_state == GameState::Advertised && g.human_seats() == g.seats_total)
            .unwrap_or(false);
        if fully_joined {
            self.start_game(&game_id);
        }
        Ok(())
    }

    fn handle_start_game(&mut self, player_id: &PlayerId) -> RequestResult<()> {
        let game_id = self.current_game_id(player_id)?;
        let (advertiser_id, game_state) = match self.store.game(&game_id) {
            Some(game) => (game.advertiser_id.clone(), game.game_state),
            None => return Err(RequestError::new(FailureReason::InvalidGame)),
        };
        if advertiser_id != *player_id {
            return Err(RequestError::new(FailureReason::NotAdvertiser));
        }
        if game_state != GameState::Advertised {
            return Err(RequestError::with_comment(
                FailureReason::InvalidGameState,
                "Game is already being played",
            ));
        }
        self.start_game(&game_id);
        Ok(())
    }

    fn handle_cancel_game(&mut self, player_id: &PlayerId) -> RequestResult<()> {
        let game_id = self.current_game_id(player_id)?;
        let (advertiser_id, game_state) = match self.store.game(&game_id) {
            Some(game) => (game.advertiser_id.clone(), game.game_state),
            None => return Err(RequestError::new(FailureReason::InvalidGame)),
        };
        if advertiser_id != *player_id {
            return Err(RequestError::new(FailureReason::NotAdvertiser));
        }
        if !game_state.is_in_progress() {
            return Err(RequestError::with_comment(
                FailureReason::InvalidGameState,
                "Game is not in progress",
            ));
        }
        self.cancel_game(
            &game_id,
            CompletionReason::Cancelled,
            Some("Game was cancelled by advertiser".to_string()),
            true,
        );
        Ok(())
    }

    fn handle_quit_game(&mut self, player_id: &PlayerId) -> RequestResult<()> {
        let game_id = self.current_game_id(player_id)?;
        let in_progress = self
            .store
            .game(&game_id)
            .map(|g| g.game_state.is_in_progress())
            .unwrap_or(false);
        if !in_progress {
            return Err(RequestError::with_comment(
                FailureReason::InvalidGameState,
                "Game is not in progress",
            ));
        }
        info!("EVENT[Game Player Quit]");
        self.leave_game(&game_id, player_id, LeaveKind::Quit);
        Ok(())
    }

    fn handle_execute_move(
        &mut self,
        player_id: &PlayerId,
        context: ExecuteMoveContext,
    ) -> RequestResult<()> {
        let game_id = self.current_game_id(player_id)?;
        let Some(game) = self.store.game(&game_id) else {
            return Err(RequestError::new(FailureReason::InvalidGame));
        };
        if game.game_state != GameState::Started {
            return Err(RequestError::with_comment(
                FailureReason::InvalidGameState,
                "Game is not being played",
            ));
        }
        let Some(seat) = game.seat_of(player_id) else {
            return Err(RequestError::new(FailureReason::InvalidGameState));
        };
        if seat.state != SeatState::Playing {
            return Err(RequestError::new(FailureReason::InvalidGameState));
        }
        let color = seat.color;
        let Some(engine) = game.engine.clone() else {
            panic!("started game {} has no engine state", game_id);
        };
        if engine.current_seat() != color {
            return Err(RequestError::new(FailureReason::NotYourTurn));
        }
        match Engine::apply(&engine, color, &context.move_id) {
            Ok((next, outcome)) => {
                if let Some(game) = self.store.game_mut(&game_id) {
                    game.engine = Some(next);
                }
                self.store.touch_game(&game_id);
                self.broadcast_state(&game_id);
                match outcome {
                    Outcome::Continue { .. } => self.advance_turns(&game_id),
                    Outcome::GameOver { winner } => self.complete_game(&game_id, Some(winner)),
                }
                Ok(())
            }
            Err(apologies_engine::EngineError::NotYourTurn) => {
                Err(RequestError::new(FailureReason::NotYourTurn))
            }
            Err(apologies_engine::EngineError::IllegalMove(_)) => {
                Err(RequestError::new(FailureReason::IllegalMove))
            }
            Err(apologies_engine::EngineError::GameOver) => Err(RequestError::with_comment(
                FailureReason::InvalidGameState,
                "Game is already over",
            )),
        }
    }

    fn handle_retrieve_game_state(
        &mut self,
        key: ConnectionKey,
        player_id: &PlayerId,
    ) -> RequestResult<()> {
        let game_id = self.current_game_id(player_id)?;
        let Some(game) = self.store.game(&game_id) else {
            return Err(RequestError::new(FailureReason::InvalidGame));
        };
        if game.game_state != GameState::Started {
            return Err(RequestError::with_comment(
                FailureReason::InvalidGameState,
                "Game is not being played",
            ));
        }
        let Some(seat) = game.seat_of(player_id) else {
            return Err(RequestError::new(FailureReason::InvalidGameState));
        };
        let Some(engine) = &game.engine else {
            panic!("started game {} has no engine state", game_id);
        };
        let view = Engine::player_view(engine, seat.color);
        self.outbox.push(
            Audience::Connection(key),
            Event::GameStateChange(GameStateChangeContext {
                game_id: game_id.as_str().to_string(),
                view,
            }),
        );
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Game lifecycle cascades
    // -------------------------------------------------------------------------

    /// Start a game: convert unfilled seats to programmatic, stand up
    /// the engine, and run turns until a human is prompted or the game
    /// completes.
    fn start_game(&mut self, game_id: &GameId) {
        info!("EVENT[Game Started]: {}", game_id);
        let mut seated = Vec::new();
        {
            let Some(game) = self.store.game_mut(game_id) else {
                return;
            };
            while game.seats.len() < game.seats_total {
                let color = PlayerColor::ALL[game.seats.len()];
                game.seats.push(Seat {
                    color,
                    occupant: SeatOccupant::Programmatic,
                    state: SeatState::Playing,
                });
            }
            for seat in &mut game.seats {
                if seat.is_human() {
                    seat.state = SeatState::Playing;
                }
            }
            let colors: Vec<PlayerColor> = game.seats.iter().map(|s| s.color).collect();
            game.game_state = GameState::Started;
            game.engine = Some(Engine::start(game.mode, &colors));
            seated = game.seated_player_ids();
        }
        let now = self.store.now();
        if let Some(game) = self.store.game_mut(game_id) {
            game.started_date = Some(now);
        }
        self.store.touch_game(game_id);
        for player_id in &seated {
            if let Some(player) = self.store.player_mut(player_id) {
                player.play_state = PlayState::Playing;
            }
        }
        self.outbox
            .push(Audience::Game(game_id.clone()), Event::GameStarted);
        self.push_player_change(game_id, "Game started".to_string());
        self.broadcast_state(game_id);
        self.advance_turns(game_id);
    }

    /// Advance play until the current turn belongs to a human (who gets
    /// a GAME_PLAYER_TURN prompt) or the game ends. Each programmatic
    /// move broadcasts its own GAME_STATE_CHANGE.
    fn advance_turns(&mut self, game_id: &GameId) {
        loop {
            let (current, human, seat_playing, state) = {
                let Some(game) = self.store.game(game_id) else {
                    return;
                };
                if game.game_state != GameState::Started {
                    return;
                }
                let Some(engine) = &game.engine else {
                    return;
                };
                if engine.winner().is_some() {
                    return;
                }
                let current = engine.current_seat();
                let Some(seat) = game.seat_by_color(current) else {
                    panic!("game {} turn belongs to an unseated color", game_id);
                };
                (
                    current,
                    seat.is_human(),
                    seat.state == SeatState::Playing,
                    engine.clone(),
                )
            };
            if human {
                if seat_playing {
                    self.prompt_turn(game_id, current);
                }
                // A disconnected human holds the turn until it
                // reconnects or the idle sweep cancels the game.
                return;
            }
            let Some(chosen) = Engine::choose_move(&state, current) else {
                self.cancel_game(
                    game_id,
                    CompletionReason::NotViable,
                    Some("Engine produced no move for a programmatic seat".to_string()),
                    true,
                );
                return;
            };
            match Engine::apply(&state, current, &chosen.move_id) {
                Ok((next, outcome)) => {
                    if let Some(game) = self.store.game_mut(game_id) {
                        game.engine = Some(next);
                    }
                    self.store.touch_game(game_id);
                    self.broadcast_state(game_id);
                    match outcome {
                        Outcome::Continue { .. } => continue,
                        Outcome::GameOver { winner } => {
                            self.complete_game(game_id, Some(winner));
                            return;
                        }
                    }
                }
                Err(err) => {
                    self.cancel_game(
                        game_id,
                        CompletionReason::NotViable,
                        Some(format!("Engine failure: {}", err)),
                        true,
                    );
                    return;
                }
            }
        }
    }

    /// Complete a game with an optional winner, clearing every
    /// participant's current-game pointer.
    fn complete_game(&mut self, game_id: &GameId, winner: Option<PlayerColor>) {
        info!("EVENT[Game Completed]: {}", game_id);
        let now = self.store.now();
        let mut participants = Vec::new();
        let mut winner_handle = None;
        let mut comment = "Game completed".to_string();
        if let Some(game) = self.store.game_mut(game_id) {
            game.game_state = GameState::Completed;
            game.completed_date = Some(now);
            game.last_active_date = now;
            game.completion_reason = Some(CompletionReason::Won);
            if let Some(color) = winner {
                winner_handle = game
                    .seat_by_color(color)
                    .and_then(|s| s.handle())
                    .map(str::to_string);
                comment = match &winner_handle {
                    Some(handle) => format!("Player {} won", handle),
                    None => format!("The {} seat won", color),
                };
            }
            game.completion_comment = Some(comment.clone());
            for seat in &mut game.seats {
                if seat.state == SeatState::Playing {
                    seat.state = SeatState::Finished;
                }
            }
            participants = game.seated_player_ids();
        }
        for player_id in &participants {
            let references = self
                .store
                .player(player_id)
                .map(|p| p.game_id.as_ref() == Some(game_id))
                .unwrap_or(false);
            if references {
                if let Some(player) = self.store.player_mut(player_id) {
                    player.game_id = None;
                    player.color = None;
                    player.play_state = PlayState::Finished;
                }
            }
        }
        self.outbox.push(
            Audience::Players(participants),
            Event::GameCompleted(GameCompletedContext {
                winner_handle,
                comment: Some(comment),
            }),
        );
    }

    /// Cancel a game, clearing every participant's current-game
    /// pointer. `notify` is false during shutdown, where the broadcast
    /// is the server-wide SERVER_SHUTDOWN instead.
    pub(crate) fn cancel_game(
        &mut self,
        game_id: &GameId,
        reason: CompletionReason,
        comment: Option<String>,
        notify: bool,
    ) {
        info!("EVENT[Game Cancelled]: {} ({:?})", game_id, reason);
        let now = self.store.now();
        let mut participants = Vec::new();
        if let Some(game) = self.store.game_mut(game_id) {
            game.game_state = GameState::Cancelled;
            game.completed_date = Some(now);
            game.last_active_date = now;
            game.completion_reason = Some(reason);
            game.completion_comment = comment.clone();
            participants = game.seated_player_ids();
        }
        for player_id in &participants {
            let references = self
                .store
                .player(player_id)
                .map(|p| p.game_id.as_ref() == Some(game_id))
                .unwrap_or(false);
            if references {
                if let Some(player) = self.store.player_mut(player_id) {
                    player.game_id = None;
                    player.color = None;
                    player.play_state = PlayState::Waiting;
                }
            }
        }
        if notify {
            self.outbox.push(
                Audience::Players(participants),
                Event::GameCancelled(GameCancelledContext { reason, comment }),
            );
        }
    }

    /// Shared departure cascade for unregister, disconnect, and
    /// inactivity.
    fn depart(&mut self, player_id: &PlayerId, kind: LeaveKind) {
        let Some(player) = self.store.player(player_id) else {
            return;
        };
        let game_id = player.game_id.clone();
        if let Some(game_id) = game_id {
            self.leave_game(&game_id, player_id, kind);
        }
        match kind {
            LeaveKind::Unregister | LeaveKind::Inactive => {
                self.store.delete_player(player_id);
            }
            LeaveKind::Disconnect => {
                if let Some(player) = self.store.player_mut(player_id) {
                    player.connection = None;
                    player.connection_state = ConnectionState::Disconnected;
                }
            }
            LeaveKind::Quit => {}
        }
    }

    /// Remove a player from its current game: flag the seat, notify the
    /// table, re-evaluate viability, and cancel if the game can no
    /// longer continue.
    fn leave_game(&mut self, game_id: &GameId, player_id: &PlayerId, kind: LeaveKind) {
        let handle = self
            .store
            .player(player_id)
            .map(|p| p.handle.clone())
            .unwrap_or_default();
        let (game_state, is_advertiser) = match self.store.game(game_id) {
            Some(game) => (game.game_state, game.advertiser_id == *player_id),
            None => return,
        };
        match game_state {
            GameState::Advertised => {
                if is_advertiser {
                    self.cancel_game(
                        game_id,
                        CompletionReason::NotViable,
                        Some(format!("Advertiser {} left", handle)),
                        true,
                    );
                } else {
                    self.store.remove_seat(game_id, player_id);
                    self.clear_game_pointer(player_id);
                    self.store.touch_game(game_id);
                    self.push_player_change(game_id, format!("Player {} left", handle));
                }
            }
            GameState::Started => {
                let mut color = None;
                if let Some(game) = self.store.game_mut(game_id) {
                    if let Some(seat) = game.seat_of_mut(player_id) {
                        seat.state = kind.seat_state();
                        color = Some(seat.color);
                    }
                }
                match kind {
                    LeaveKind::Disconnect => {
                        // Seat stays reserved so the player can
                        // reregister and resume.
                        if let Some(player) = self.store.player_mut(player_id) {
                            player.play_state = PlayState::Joined;
                        }
                    }
                    _ => self.clear_game_pointer(player_id),
                }
                self.store.touch_game(game_id);
                let comment = format!("Player {} {}", handle, kind.verb());
                self.push_player_change(game_id, comment.clone());
                let viable = self
                    .store
                    .game(game_id)
                    .map(|g| g.is_viable())
                    .unwrap_or(false);
                if !viable {
                    self.cancel_game(game_id, CompletionReason::NotViable, Some(comment), true);
                } else if kind != LeaveKind::Disconnect {
                    if let Some(color) = color {
                        self.forfeit_seat(game_id, color);
                    }
                }
            }
            GameState::Completed | GameState::Cancelled => {
                self.clear_game_pointer(player_id);
            }
        }
    }

    /// Tell the engine a seat has permanently left; turn rotation
    /// continues past it.
    fn forfeit_seat(&mut self, game_id: &GameId, color: PlayerColor) {
        let Some(engine) = self.store.game(game_id).and_then(|g| g.engine.clone()) else {
            return;
        };
        let had_turn = engine.current_seat() == color;
        let (next, outcome) = Engine::forfeit(&engine, color);
        if let Some(game) = self.store.game_mut(game_id) {
            game.engine = Some(next);
        }
        match outcome {
            Outcome::GameOver { winner } => self.complete_game(game_id, Some(winner)),
            Outcome::Continue { .. } => {
                if had_turn {
                    self.broadcast_state(game_id);
                    self.advance_turns(game_id);
                }
            }
        }
    }

    fn clear_game_pointer(&mut self, player_id: &PlayerId) {
        if let Some(player) = self.store.player_mut(player_id) {
            player.game_id = None;
            player.color = None;
            player.play_state = PlayState::Waiting;
        }
    }

    fn current_game_id(&self, player_id: &PlayerId) -> RequestResult<GameId> {
        self.store
            .player(player_id)
            .and_then(|p| p.game_id.clone())
            .ok_or_else(|| {
                RequestError::with_comment(FailureReason::InvalidGameState, "Player is not in a game")
            })
    }

    // -------------------------------------------------------------------------
    // Outbound helpers
    // -------------------------------------------------------------------------

    fn push_player_change(&mut self, game_id: &GameId, comment: String) {
        let players = match self.store.game(game_id) {
            Some(game) => game.game_players(),
            None => return,
        };
        self.outbox.push(
            Audience::Game(game_id.clone()),
            Event::GamePlayerChange(GamePlayerChangeContext {
                comment: Some(comment),
                players,
            }),
        );
    }

    /// Send each seated human its own view of the game.
    fn broadcast_state(&mut self, game_id: &GameId) {
        let Some(game) = self.store.game(game_id) else {
            return;
        };
        let Some(engine) = &game.engine else {
            return;
        };
        let mut views = Vec::new();
        for seat in &game.seats {
            if let Some(player_id) = seat.player_id() {
                views.push((player_id.clone(), Engine::player_view(engine, seat.color)));
            }
        }
        for (player_id, view) in views {
            self.outbox.push(
                Audience::Player(player_id),
                Event::GameStateChange(GameStateChangeContext {
                    game_id: game_id.as_str().to_string(),
                    view,
                }),
            );
        }
    }

    fn push_state_to_player(&mut self, game_id: &GameId, player_id: &PlayerId) {
        let view = {
            let Some(game) = self.store.game(game_id) else {
                return;
            };
            let Some(engine) = &game.engine else {
                return;
            };
            let Some(seat) = game.seat_of(player_id) else {
                return;
            };
            Engine::player_view(engine, seat.color)
        };
        self.outbox.push(
            Audience::Player(player_id.clone()),
            Event::GameStateChange(GameStateChangeContext {
                game_id: game_id.as_str().to_string(),
                view,
            }),
        );
    }

    fn prompt_turn(&mut self, game_id: &GameId, color: PlayerColor) {
        let (player_id, handle, moves) = {
            let Some(game) = self.store.game(game_id) else {
                return;
            };
            let Some(engine) = &game.engine else {
                return;
            };
            let Some(seat) = game.seat_by_color(color) else {
                return;
            };
            let (Some(player_id), Some(handle)) = (seat.player_id(), seat.handle()) else {
                return;
            };
            (
                player_id.clone(),
                handle.to_string(),
                Engine::legal_moves(engine, color),
            )
        };
        self.outbox.push(
            Audience::Player(player_id),
            Event::GamePlayerTurn(GamePlayerTurnContext {
                handle,
                color,
                moves,
            }),
        );
    }

    // -------------------------------------------------------------------------
    // Periodic sweeps
    // -------------------------------------------------------------------------

    pub(crate) fn on_sweep(&mut self, kind: SweepKind) {
        match kind {
            SweepKind::IdleWebsocket => self.sweep_idle_websockets(),
            SweepKind::IdlePlayer => self.sweep_idle_players(),
            SweepKind::IdleGame => self.sweep_idle_games(),
            SweepKind::ObsoleteGame => self.sweep_obsolete_games(),
        }
    }

    /// Close connections that never registered a player and have gone
    /// quiet. A connection with a bound player is covered by the player
    /// sweep instead.
    fn sweep_idle_websockets(&mut self) {
        let now = self.store.now();
        let idle_secs = (self.config.websocket_idle_thresh_min * 60) as i64;
        let inactive_secs = (self.config.websocket_inactive_thresh_min * 60) as i64;
        for key in self.store.connection_keys() {
            let Some(conn) = self.store.connection(&key) else {
                continue;
            };
            if conn.dead || conn.player_id.is_some() {
                continue;
            }
            let since = (now - conn.last_active_date).num_seconds();
            if since >= inactive_secs {
                info!("EVENT[Websocket Inactive]: {}", key);
                self.outbox
                    .push(Audience::Connection(key), Event::WebsocketInactive);
                self.outbox.push_close(key);
            } else if since >= idle_secs && !conn.idle {
                info!("EVENT[Websocket Idle]: {}", key);
                self.outbox
                    .push(Audience::Connection(key), Event::WebsocketIdle);
                if let Some(conn) = self.store.connection_mut(&key) {
                    conn.idle = true;
                }
            }
        }
    }

    /// Notify idle players and unregister inactive ones. A disconnected
    /// player is promoted straight to inactive once it crosses the idle
    /// threshold; there is nobody listening to warn.
    fn sweep_idle_players(&mut self) {
        let now = self.store.now();
        let idle_secs = (self.config.player_idle_thresh_min * 60) as i64;
        let inactive_secs = (self.config.player_inactive_thresh_min * 60) as i64;
        for player_id in self.store.player_ids() {
            let Some(player) = self.store.player(&player_id) else {
                continue;
            };
            let since = (now - player.last_active_date).num_seconds();
            let disconnected = player.connection_state == ConnectionState::Disconnected;
            let connection = player.connection;
            if since >= inactive_secs || (disconnected && since >= idle_secs) {
                info!("EVENT[Player Inactive]: {}", player.handle);
                if let Some(key) = connection {
                    // Target the connection directly: the player record
                    // is gone by the time the outbox is dispatched.
                    self.outbox.push(Audience::Connection(key), Event::PlayerInactive);
                    self.outbox.push_close(key);
                }
                self.depart(&player_id, LeaveKind::Inactive);
            } else if since >= idle_secs && player.activity_state != apologies_protocol::ActivityState::Idle {
                info!("EVENT[Player Idle]: {}", player.handle);
                self.outbox
                    .push(Audience::Player(player_id.clone()), Event::PlayerIdle);
                if let Some(player) = self.store.player_mut(&player_id) {
                    player.activity_state = apologies_protocol::ActivityState::Idle;
                }
            }
        }
    }

    /// Notify idle games and cancel inactive ones.
    fn sweep_idle_games(&mut self) {
        let now = self.store.now();
        let idle_secs = (self.config.game_idle_thresh_min * 60) as i64;
        let inactive_secs = (self.config.game_inactive_thresh_min * 60) as i64;
        for game_id in self.store.in_progress_game_ids() {
            let Some(game) = self.store.game(&game_id) else {
                continue;
            };
            let since = (now - game.last_active_date).num_seconds();
            if since >= inactive_secs {
                info!("EVENT[Game Inactive]: {}", game_id);
                self.cancel_game(
                    &game_id,
                    CompletionReason::Inactive,
                    Some("Game was cancelled due to inactivity".to_string()),
                    true,
                );
            } else if since >= idle_secs
                && game.activity_state != apologies_protocol::ActivityState::Idle
            {
                info!("EVENT[Game Idle]: {}", game_id);
                self.outbox
                    .push(Audience::Game(game_id.clone()), Event::GameIdle);
                if let Some(game) = self.store.game_mut(&game_id) {
                    game.activity_state = apologies_protocol::ActivityState::Idle;
                }
            }
        }
    }

    /// Purge completed and cancelled games past the retention window.
    fn sweep_obsolete_games(&mut self) {
        let now = self.store.now();
        let retention_secs = (self.config.game_retention_thresh_min * 60) as i64;
        for game_id in self.store.game_ids() {
            let Some(game) = self.store.game(&game_id) else {
                continue;
            };
            if !game.game_state.is_finished() {
                continue;
            }
            let Some(completed) = game.completed_date else {
                continue;
            };
            if (now - completed).num_seconds() >= retention_secs {
                info!("EVENT[Game Obsolete]: {}", game_id);
                self.store.delete_game(&game_id);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Shutdown
    // -------------------------------------------------------------------------

    /// Broadcast SERVER_SHUTDOWN, cancel every in-progress game, and
    /// close all connections. The run loop stops after this handler.
    pub(crate) fn on_shutdown(&mut self) {
        self.outbox.push(Audience::AllConnected, Event::ServerShutdown);
        for game_id in self.store.in_progress_game_ids() {
            self.cancel_game(&game_id, CompletionReason::Shutdown, None, false);
        }
        for key in self.store.connection_keys() {
            self.outbox.push_close(key);
        }
    }
}
