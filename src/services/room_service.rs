use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{self, Instant};
use tracing::{error, info, warn};

use crate::config::settings::{RecoveryPolicy, Settings};
use crate::error::{GameError, StorageError};
use crate::game::payout::PayoutTable;
use crate::models::bet::{Bet, BetReceipt, BetType};
use crate::models::event::{GameEvent, GameEventKind};
use crate::models::game::{DiceGame, GameState, MatchSnapshot};
use crate::models::room::{MatchRecord, RefundEntry, RefundSummary};
use crate::repository::Storage;

/// Two independent uniform d6.
pub fn roll_dice() -> (u8, u8) {
    let mut rng = rand::thread_rng();
    (rng.gen_range(1..=6), rng.gen_range(1..=6))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    CloseBets,
    RollDice,
}

/// Commands accepted by a room worker. Every mutation of a room's match
/// flows through this mailbox, so transitions and bet placements are
/// serialized by construction.
pub enum RoomCommand {
    Start {
        operator: i64,
        reply: oneshot::Sender<Result<MatchSnapshot, GameError>>,
    },
    Bet {
        player_id: i64,
        username: String,
        bet_type: BetType,
        amount: i64,
        reply: oneshot::Sender<Result<BetReceipt, GameError>>,
    },
    CloseBetting {
        operator: i64,
        reply: oneshot::Sender<Result<MatchSnapshot, GameError>>,
    },
    Stop {
        operator: i64,
        reply: oneshot::Sender<Result<RefundSummary, GameError>>,
    },
    Status {
        reply: oneshot::Sender<Result<MatchSnapshot, GameError>>,
    },
}

/// Client half of a room worker's mailbox.
#[derive(Clone)]
pub struct RoomHandle {
    tx: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub async fn start_match(&self, operator: i64) -> Result<MatchSnapshot, GameError> {
        self.request(|reply| RoomCommand::Start { operator, reply }).await
    }

    pub async fn place_bet(
        &self,
        player_id: i64,
        username: String,
        bet_type: BetType,
        amount: i64,
    ) -> Result<BetReceipt, GameError> {
        self.request(|reply| RoomCommand::Bet { player_id, username, bet_type, amount, reply })
            .await
    }

    pub async fn close_betting(&self, operator: i64) -> Result<MatchSnapshot, GameError> {
        self.request(|reply| RoomCommand::CloseBetting { operator, reply }).await
    }

    pub async fn stop_match(&self, operator: i64) -> Result<RefundSummary, GameError> {
        self.request(|reply| RoomCommand::Stop { operator, reply }).await
    }

    pub async fn status(&self) -> Result<MatchSnapshot, GameError> {
        self.request(|reply| RoomCommand::Status { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T, GameError>>) -> RoomCommand,
    ) -> Result<T, GameError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| GameError::RoomClosed)?;
        response.await.map_err(|_| GameError::RoomClosed)?
    }
}

/// The per-room worker: owns the live match, both timers, and the idle and
/// cooldown counters. One worker task per room; rooms never share state.
pub struct RoomService {
    room_id: i64,
    settings: Arc<Settings>,
    payout: Arc<PayoutTable>,
    storage: Arc<dyn Storage>,
    events: broadcast::Sender<GameEvent>,
    rx: mpsc::Receiver<RoomCommand>,
    game: Option<DiceGame>,
    timer: Option<(TimerKind, Instant)>,
    cooldown_deadline: Option<Instant>,
    idle_matches: u32,
    dice_roller: fn() -> (u8, u8),
}

impl RoomService {
    /// Loads the room's persisted counters, runs the crash-recovery pass for
    /// any interrupted match, and spawns the worker task.
    pub async fn spawn(
        room_id: i64,
        settings: Arc<Settings>,
        payout: Arc<PayoutTable>,
        storage: Arc<dyn Storage>,
        events: broadcast::Sender<GameEvent>,
        dice_roller: fn() -> (u8, u8),
    ) -> Result<RoomHandle, StorageError> {
        let (tx, rx) = mpsc::channel(64);
        let meta = storage.get_room_meta(room_id).await?;
        let cooldown_deadline = meta.cooldown_until.and_then(|until| {
            let remaining = until - Utc::now().timestamp();
            if remaining > 0 {
                Some(Instant::now() + Duration::from_secs(remaining as u64))
            } else {
                None
            }
        });

        let mut service = RoomService {
            room_id,
            settings,
            payout,
            storage,
            events,
            rx,
            game: None,
            timer: None,
            cooldown_deadline,
            idle_matches: meta.consecutive_idle_matches,
            dice_roller,
        };
        service.recover().await?;
        tokio::spawn(service.run());
        Ok(RoomHandle { tx })
    }

    async fn run(mut self) {
        loop {
            let deadline = self.timer;
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                _ = async {
                    match deadline {
                        Some((_, at)) => time::sleep_until(at).await,
                        None => futures::future::pending().await,
                    }
                } => {
                    if let Some((kind, _)) = self.timer.take() {
                        self.handle_timer(kind).await;
                    }
                }
            }
        }
    }

    async fn handle_command(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Start { operator, reply } => {
                let _ = reply.send(self.start_match(operator).await);
            }
            RoomCommand::Bet { player_id, username, bet_type, amount, reply } => {
                let _ = reply.send(self.place_bet(player_id, &username, bet_type, amount).await);
            }
            RoomCommand::CloseBetting { operator, reply } => {
                let _ = reply.send(self.operator_close(operator).await);
            }
            RoomCommand::Stop { operator, reply } => {
                let _ = reply.send(self.stop_match(operator).await);
            }
            RoomCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    async fn handle_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::CloseBets => {
                if let Err(err) = self.close_betting().await {
                    warn!(room_id = self.room_id, error = %err, "betting-window timer hit a closed match");
                }
            }
            TimerKind::RollDice => self.resolve().await,
        }
    }

    /// Operator start. Fails while a match is live or a stop cooldown is
    /// running; resets the idle counter, so an operator start never counts
    /// as idle continuation.
    async fn start_match(&mut self, operator: i64) -> Result<MatchSnapshot, GameError> {
        if self.game.is_some() {
            return Err(GameError::AlreadyActive);
        }
        if let Some(remaining) = self.cooldown_remaining() {
            return Err(GameError::CooldownActive(remaining));
        }
        self.cooldown_deadline = None;
        self.storage.set_cooldown_until(self.room_id, None).await.map_err(GameError::from)?;
        self.idle_matches = 0;
        self.storage.set_idle_matches(self.room_id, 0).await.map_err(GameError::from)?;
        info!(room_id = self.room_id, operator, "match started by operator");
        self.open_match().await
    }

    /// Creates the next match in WAITING and arms the betting-window timer.
    async fn open_match(&mut self) -> Result<MatchSnapshot, GameError> {
        let match_id = self
            .storage
            .increment_match_counter(self.room_id)
            .await
            .map_err(GameError::from)?;
        let game = DiceGame::new(match_id, self.room_id);
        self.storage.save_active_match(&game).await.map_err(GameError::from)?;

        let betting_secs = self.settings.bet_window.as_secs();
        let snapshot = game.snapshot(Some(betting_secs));
        self.game = Some(game);
        self.timer = Some((TimerKind::CloseBets, Instant::now() + self.settings.bet_window));
        self.emit(GameEventKind::MatchOpened { match_id, betting_secs });
        info!(room_id = self.room_id, match_id, "match open for bets");
        Ok(snapshot)
    }

    /// Validates, debits, and records a wager as one logical unit. The debit
    /// is rolled back if the wager cannot be persisted afterwards.
    async fn place_bet(
        &mut self,
        player_id: i64,
        username: &str,
        bet_type: BetType,
        amount: i64,
    ) -> Result<BetReceipt, GameError> {
        let game = match self.game.as_mut() {
            Some(game) if game.state == GameState::Waiting => game,
            _ => return Err(GameError::MatchNotAcceptingBets),
        };
        if amount <= 0 || amount < self.settings.min_bet || amount > self.settings.max_bet {
            return Err(GameError::InvalidAmount {
                min: self.settings.min_bet,
                max: self.settings.max_bet,
            });
        }
        game.bets.check(player_id, bet_type)?;

        let stats = self
            .storage
            .get_or_create_player(self.room_id, player_id, username, self.settings.new_user_bonus)
            .await
            .map_err(GameError::from)?;
        if stats.score < amount {
            return Err(GameError::InsufficientFunds { balance: stats.score });
        }

        self.storage
            .adjust_score(self.room_id, player_id, -amount, None, 1)
            .await
            .map_err(GameError::from)?;

        let total_bet = game.bets.record(Bet {
            player_id,
            username: username.to_string(),
            bet_type,
            amount,
            placed_at: Utc::now(),
        });

        if let Err(err) = self.storage.save_active_match(game).await {
            // roll the debit (and the wager) back so no half-recorded bet
            // survives a storage failure
            game.bets.rollback(player_id, amount);
            if let Err(refund_err) = self
                .storage
                .adjust_score(self.room_id, player_id, amount, None, -1)
                .await
            {
                error!(
                    room_id = self.room_id,
                    player_id,
                    error = %refund_err,
                    "failed to roll back a debit after a storage failure"
                );
            }
            return Err(err.into());
        }

        let match_id = game.match_id;
        self.emit(GameEventKind::BetPlaced { match_id, player_id, bet_type, total_bet });
        info!(room_id = self.room_id, match_id, player_id, %bet_type, amount, "bet placed");
        Ok(BetReceipt {
            match_id,
            bet_type,
            amount,
            total_bet,
            balance: stats.score - amount,
        })
    }

    async fn operator_close(&mut self, operator: i64) -> Result<MatchSnapshot, GameError> {
        if self.game.is_none() {
            return Err(GameError::NoActiveMatch);
        }
        info!(room_id = self.room_id, operator, "betting closed early by operator");
        self.close_betting().await
    }

    /// WAITING → CLOSED, then arms the roll-delay timer.
    async fn close_betting(&mut self) -> Result<MatchSnapshot, GameError> {
        let game = self.game.as_mut().ok_or(GameError::NoActiveMatch)?;
        game.close()?;
        if let Err(err) = self.storage.save_active_match(game).await {
            // the in-memory transition stands; a crash before the roll now
            // replays the full betting window close on recovery
            error!(room_id = self.room_id, error = %err, "failed to persist closed match");
        }
        let match_id = game.match_id;
        let totals = game.bets.totals();
        let snapshot = game.snapshot(None);
        self.timer = Some((TimerKind::RollDice, Instant::now() + self.settings.roll_delay));
        self.emit(GameEventKind::BettingClosed { match_id, totals });
        info!(room_id = self.room_id, match_id, "betting closed, rolling soon");
        Ok(snapshot)
    }

    /// CLOSED → OVER: draws dice (unless recovery already persisted a pair),
    /// settles every wager, updates stats and history, then either opens the
    /// next match or suspends the room after too many idle matches.
    async fn resolve(&mut self) {
        let Some(mut game) = self.game.take() else { return };
        self.timer = None;

        let dice = match game.dice {
            Some(dice) => dice,
            None => {
                let dice = (self.dice_roller)();
                game.record_dice(dice);
                // persist the draw before settling so a crash in between is
                // settled from the same pair on restart
                if let Err(err) = self.storage.save_active_match(&game).await {
                    error!(room_id = self.room_id, error = %err, "failed to persist dice draw");
                }
                dice
            }
        };

        let settled = game.settle(dice, &self.payout);
        for settlement in &settled.settlements {
            let delta = if settlement.is_win { settlement.winnings } else { 0 };
            if let Err(err) = self
                .storage
                .adjust_score(self.room_id, settlement.player_id, delta, Some(settlement.is_win), 0)
                .await
            {
                error!(
                    room_id = self.room_id,
                    player_id = settlement.player_id,
                    error = %err,
                    "failed to apply settlement"
                );
            }
        }

        let record = MatchRecord::settled(&settled);
        if let Err(err) = self.storage.append_match_history(self.room_id, &record).await {
            error!(room_id = self.room_id, error = %err, "failed to append match history");
        }
        if let Err(err) = self.storage.clear_active_match(self.room_id).await {
            error!(room_id = self.room_id, error = %err, "failed to clear active match");
        }

        if settled.settlements.is_empty() {
            self.idle_matches += 1;
        } else {
            self.idle_matches = 0;
        }
        if let Err(err) = self.storage.set_idle_matches(self.room_id, self.idle_matches).await {
            error!(room_id = self.room_id, error = %err, "failed to persist idle counter");
        }

        info!(
            room_id = self.room_id,
            match_id = settled.match_id,
            dice = ?settled.dice,
            winning = %settled.winning,
            total_payout = settled.total_payout,
            "match settled"
        );
        self.emit(GameEventKind::MatchSettled {
            match_id: settled.match_id,
            dice: settled.dice,
            winning: settled.winning,
            total_payout: settled.total_payout,
            winners: settled.winners,
            losers: settled.losers,
        });

        if self.idle_matches >= self.settings.idle_match_limit {
            info!(
                room_id = self.room_id,
                idle_matches = self.idle_matches,
                "idle limit reached, suspending auto-start"
            );
            self.emit(GameEventKind::RoomIdle { idle_matches: self.idle_matches });
            return;
        }

        if let Err(err) = self.open_match().await {
            error!(room_id = self.room_id, error = %err, "failed to open the next match");
        }
    }

    /// Operator stop: disarm the pending timer, refund every wager in full,
    /// and start the cooldown window.
    async fn stop_match(&mut self, operator: i64) -> Result<RefundSummary, GameError> {
        let game = self.game.take().ok_or(GameError::NoActiveMatch)?;
        self.timer = None;

        let match_id = game.match_id;
        let mut refunds = Vec::new();
        let mut total_refunded = 0;
        for bet in game.bets.into_bets() {
            if let Err(err) = self
                .storage
                .adjust_score(self.room_id, bet.player_id, bet.amount, None, 0)
                .await
            {
                error!(
                    room_id = self.room_id,
                    player_id = bet.player_id,
                    error = %err,
                    "failed to refund a wager"
                );
                continue;
            }
            total_refunded += bet.amount;
            refunds.push(RefundEntry {
                player_id: bet.player_id,
                username: bet.username,
                amount: bet.amount,
            });
        }

        if let Err(err) = self.storage.clear_active_match(self.room_id).await {
            error!(room_id = self.room_id, error = %err, "failed to clear stopped match");
        }

        let cooldown = self.settings.stop_cooldown;
        self.cooldown_deadline = Some(Instant::now() + cooldown);
        let until = (Utc::now() + chrono::Duration::seconds(cooldown.as_secs() as i64)).timestamp();
        if let Err(err) = self.storage.set_cooldown_until(self.room_id, Some(until)).await {
            error!(room_id = self.room_id, error = %err, "failed to persist stop cooldown");
        }

        info!(room_id = self.room_id, match_id, operator, total_refunded, "match stopped by operator");
        self.emit(GameEventKind::MatchStopped { match_id, stopped_by: operator, total_refunded });
        Ok(RefundSummary {
            match_id,
            stopped_by: operator,
            refunds,
            total_refunded,
            cooldown_secs: cooldown.as_secs(),
        })
    }

    fn status(&self) -> Result<MatchSnapshot, GameError> {
        let game = self.game.as_ref().ok_or(GameError::NoActiveMatch)?;
        let time_remaining = match self.timer {
            Some((TimerKind::CloseBets, at)) => {
                Some(at.checked_duration_since(Instant::now()).unwrap_or_default().as_secs())
            }
            _ => None,
        };
        Ok(game.snapshot(time_remaining))
    }

    fn cooldown_remaining(&self) -> Option<u64> {
        let deadline = self.cooldown_deadline?;
        let remaining = deadline.checked_duration_since(Instant::now())?;
        if remaining.is_zero() {
            return None;
        }
        Some(remaining.as_secs_f64().ceil() as u64)
    }

    /// Crash-recovery pass. In-memory timers never survive a restart, so an
    /// interrupted match is re-driven from its persisted state.
    async fn recover(&mut self) -> Result<(), StorageError> {
        let Some(game) = self.storage.load_active_match(self.room_id).await? else {
            return Ok(());
        };
        warn!(
            room_id = self.room_id,
            match_id = game.match_id,
            state = %game.state,
            "recovering interrupted match"
        );

        match game.state {
            GameState::Waiting => {
                let elapsed = Utc::now()
                    .signed_duration_since(game.created_at)
                    .to_std()
                    .unwrap_or_default();
                let remaining = self.settings.bet_window.checked_sub(elapsed).unwrap_or_default();
                if self.settings.recovery_policy == RecoveryPolicy::Resume && !remaining.is_zero() {
                    self.timer = Some((TimerKind::CloseBets, Instant::now() + remaining));
                    self.game = Some(game);
                } else {
                    self.game = Some(game);
                    if let Err(err) = self.close_betting().await {
                        error!(room_id = self.room_id, error = %err, "failed to close recovered match");
                    }
                }
            }
            GameState::Closed if game.dice.is_some() => {
                // dice were drawn before the crash: settle exactly that pair
                self.game = Some(game);
                self.resolve().await;
            }
            GameState::Closed => {
                // no dice yet: void the match and give every stake back
                let match_id = game.match_id;
                let mut total_refunded = 0;
                for bet in game.bets.into_bets() {
                    if let Err(err) = self
                        .storage
                        .adjust_score(self.room_id, bet.player_id, bet.amount, None, 0)
                        .await
                    {
                        error!(
                            room_id = self.room_id,
                            player_id = bet.player_id,
                            error = %err,
                            "failed to refund a voided wager"
                        );
                        continue;
                    }
                    total_refunded += bet.amount;
                }
                let record = MatchRecord::voided(match_id, total_refunded);
                if let Err(err) = self.storage.append_match_history(self.room_id, &record).await {
                    error!(room_id = self.room_id, error = %err, "failed to record voided match");
                }
                self.storage.clear_active_match(self.room_id).await?;
                self.emit(GameEventKind::MatchVoided { match_id, total_refunded });
                info!(room_id = self.room_id, match_id, total_refunded, "voided interrupted match");
            }
            GameState::Over => {
                // settlement finished but the cleanup write was lost
                self.storage.clear_active_match(self.room_id).await?;
            }
        }
        Ok(())
    }

    fn emit(&self, kind: GameEventKind) {
        let _ = self.events.send(GameEvent { room_id: self.room_id, kind });
    }
}
