//! Session State Machine
//!
//! Authoritative state of one two-seat game and the transitions on it.
//!
//! ```text
//!   WAITING ──second join──► ACTIVE ──win/tie──► TERMINAL
//!      ▲                       ▲                    │
//!      └──────── leave ────────┴── rematchAccepted ─┘
//! ```
//!
//! Every transition is a plain method on [`Session`] returning the events it
//! produced, so the whole machine is testable without a transport.
//! Invalid actions return no events and leave the state untouched.

use std::collections::BTreeSet;
use tracing::debug;

use crate::game::board::{evaluate, Board, Outcome, PlacementError};
use crate::game::events::{GameEvent, GameEventData};
use crate::game::input::{Action, ParticipantIndex};

/// Unique session identifier.
pub type SessionId = uuid::Uuid;

/// Gateway-assigned handle for one live connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Session phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Fewer than two participants seated.
    Waiting,
    /// Both seated, moves accepted.
    Active,
    /// Game just decided, waiting for a rematch.
    Terminal,
}

/// Join failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    /// Both seats taken.
    #[error("Session is full")]
    SessionFull,
    /// Connection already holds a seat here.
    #[error("Already in session")]
    AlreadySeated,
}

/// Why an action was dropped. Never reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Ignored {
    /// Action not allowed in the current phase.
    #[error("not allowed while {0:?}")]
    WrongPhase(Phase),
    /// Sender does not own the turn.
    #[error("not this participant's turn")]
    NotYourTurn,
    /// Seat is empty.
    #[error("participant not seated")]
    NotSeated,
    /// Bad target cell.
    #[error(transparent)]
    Placement(#[from] PlacementError),
}

/// One game session.
#[derive(Clone, Debug)]
pub struct Session {
    id: SessionId,
    board: Board,
    participants: [Option<ConnectionId>; 2],
    turn_owner: ParticipantIndex,
    phase: Phase,
    pending_rematch: BTreeSet<ParticipantIndex>,
    notify_opponent_left: bool,
}

impl Session {
    /// Create an empty session.
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            board: Board::new(),
            participants: [None; 2],
            turn_owner: ParticipantIndex::FIRST,
            phase: Phase::Waiting,
            pending_rematch: BTreeSet::new(),
            notify_opponent_left: false,
        }
    }

    /// Send `OpponentLeft` to the remaining participant on leave.
    pub fn with_leave_notice(mut self, enabled: bool) -> Self {
        self.notify_opponent_left = enabled;
        self
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current board.
    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Seat allowed to move next. Meaningful only while `Active`.
    pub fn turn_owner(&self) -> ParticipantIndex {
        self.turn_owner
    }

    /// Seats that have asked for a rematch.
    pub fn pending_rematch(&self) -> &BTreeSet<ParticipantIndex> {
        &self.pending_rematch
    }

    /// Connection in a seat.
    pub fn participant(&self, index: ParticipantIndex) -> Option<ConnectionId> {
        self.participants[index.slot()]
    }

    /// Seat held by a connection.
    pub fn seat_of(&self, connection: ConnectionId) -> Option<ParticipantIndex> {
        ParticipantIndex::ALL
            .into_iter()
            .find(|index| self.participants[index.slot()] == Some(connection))
    }

    /// Number of occupied seats.
    pub fn participant_count(&self) -> usize {
        self.participants.iter().filter(|p| p.is_some()).count()
    }

    /// Both seats occupied.
    pub fn is_full(&self) -> bool {
        self.participant_count() == 2
    }

    /// No seats occupied.
    pub fn is_empty(&self) -> bool {
        self.participant_count() == 0
    }

    // =========================================================================
    // MEMBERSHIP
    // =========================================================================

    /// Seat a connection in the lowest open seat.
    ///
    /// The joiner always receives its role. When this fills the second seat
    /// the session becomes `Active` on a clean board and both seats get a
    /// `Started` event.
    pub fn join(
        &mut self,
        connection: ConnectionId,
    ) -> Result<(ParticipantIndex, Vec<GameEvent>), JoinError> {
        if self.seat_of(connection).is_some() {
            return Err(JoinError::AlreadySeated);
        }

        let index = ParticipantIndex::ALL
            .into_iter()
            .find(|index| self.participants[index.slot()].is_none())
            .ok_or(JoinError::SessionFull)?;

        self.participants[index.slot()] = Some(connection);

        let mut events = vec![GameEvent::to(
            index,
            GameEventData::RoleAssigned { player: index, mark: index.mark() },
        )];

        if self.is_full() {
            self.reset_game();
            self.phase = Phase::Active;

            for seat in ParticipantIndex::ALL {
                events.push(GameEvent::to(
                    seat,
                    GameEventData::Started {
                        turn: self.turn_owner,
                        your_turn: seat == self.turn_owner,
                    },
                ));
            }
        }

        Ok((index, events))
    }

    /// Remove a connection from its seat.
    ///
    /// Demotes to `Waiting` and drops any rematch requests. The board is not
    /// preserved; the next `Started` begins on a clean board.
    pub fn leave(&mut self, connection: ConnectionId) -> Vec<GameEvent> {
        let Some(index) = self.seat_of(connection) else {
            return Vec::new();
        };

        self.participants[index.slot()] = None;
        self.pending_rematch.clear();
        if !self.is_full() {
            self.phase = Phase::Waiting;
        }

        let remaining = index.other();
        if self.notify_opponent_left && self.participants[remaining.slot()].is_some() {
            vec![GameEvent::to(remaining, GameEventData::OpponentLeft)]
        } else {
            Vec::new()
        }
    }

    // =========================================================================
    // ACTIONS
    // =========================================================================

    /// Apply an action from a seated participant.
    ///
    /// Invalid actions are dropped without events.
    pub fn handle(&mut self, index: ParticipantIndex, action: Action) -> Vec<GameEvent> {
        let result = if self.participants[index.slot()].is_none() {
            Err(Ignored::NotSeated)
        } else {
            match action {
                Action::Move { index: cell } => self.play_move(index, cell),
                Action::Rematch => self.request_rematch(index),
                Action::RematchAccepted => self.accept_rematch(),
            }
        };

        match result {
            Ok(events) => events,
            Err(reason) => {
                debug!(session = %self.id, player = %index, ?action, %reason, "Action ignored");
                Vec::new()
            }
        }
    }

    /// Place the mover's mark, then report the outcome.
    pub fn play_move(
        &mut self,
        index: ParticipantIndex,
        cell: i64,
    ) -> Result<Vec<GameEvent>, Ignored> {
        if self.phase != Phase::Active {
            return Err(Ignored::WrongPhase(self.phase));
        }
        if index != self.turn_owner {
            return Err(Ignored::NotYourTurn);
        }

        let mark = index.mark();
        let cell = self.board.place(cell, mark)?;

        let mut events = vec![GameEvent::broadcast(GameEventData::MovePlayed {
            index: cell,
            player: index,
            mark,
        })];

        match evaluate(&self.board, mark) {
            Outcome::Ongoing => {
                self.turn_owner = index.other();
                events.push(GameEvent::broadcast(GameEventData::TurnChanged {
                    turn: self.turn_owner,
                }));
            }
            Outcome::Win(_) => {
                events.push(GameEvent::broadcast(GameEventData::Won { player: index }));
                self.finish_game();
            }
            Outcome::Tie => {
                events.push(GameEvent::broadcast(GameEventData::Tied));
                self.finish_game();
            }
        }

        Ok(events)
    }

    /// Record a rematch request and offer it to the other seat.
    pub fn request_rematch(&mut self, index: ParticipantIndex) -> Result<Vec<GameEvent>, Ignored> {
        if self.phase == Phase::Waiting {
            return Err(Ignored::WrongPhase(self.phase));
        }

        self.pending_rematch.insert(index);
        Ok(vec![GameEvent::to(index.other(), GameEventData::RematchOffered)])
    }

    /// Reset the board and resume play.
    pub fn accept_rematch(&mut self) -> Result<Vec<GameEvent>, Ignored> {
        if self.phase == Phase::Waiting {
            return Err(Ignored::WrongPhase(self.phase));
        }

        self.reset_game();
        self.phase = Phase::Active;
        Ok(vec![GameEvent::broadcast(GameEventData::Reset)])
    }

    /// Enter `Terminal` with the next game's board already clean.
    fn finish_game(&mut self) {
        self.phase = Phase::Terminal;
        self.board.clear();
        self.turn_owner = ParticipantIndex::FIRST;
    }

    fn reset_game(&mut self) {
        self.board.clear();
        self.turn_owner = ParticipantIndex::FIRST;
        self.pending_rematch.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::board::Mark;
    use crate::game::events::Recipient;
    use proptest::prelude::*;

    const P0: ParticipantIndex = ParticipantIndex::FIRST;
    const P1: ParticipantIndex = ParticipantIndex::SECOND;

    fn active_session() -> Session {
        let mut session = Session::new(SessionId::new_v4());
        session.join(ConnectionId(1)).unwrap();
        session.join(ConnectionId(2)).unwrap();
        session
    }

    fn play(session: &mut Session, moves: &[i64]) -> Vec<GameEvent> {
        let mut last = Vec::new();
        for (turn, &cell) in moves.iter().enumerate() {
            let index = if turn % 2 == 0 { P0 } else { P1 };
            last = session.handle(index, Action::Move { index: cell });
            assert!(!last.is_empty(), "move {} at {} rejected", turn, cell);
        }
        last
    }

    #[test]
    fn test_first_join_waits() {
        let mut session = Session::new(SessionId::new_v4());
        let (index, events) = session.join(ConnectionId(1)).unwrap();

        assert_eq!(index, P0);
        assert_eq!(session.phase(), Phase::Waiting);
        assert_eq!(events, vec![GameEvent::to(
            P0,
            GameEventData::RoleAssigned { player: P0, mark: Mark::X },
        )]);
    }

    #[test]
    fn test_second_join_starts_game() {
        let mut session = Session::new(SessionId::new_v4());
        session.join(ConnectionId(1)).unwrap();
        let (index, events) = session.join(ConnectionId(2)).unwrap();

        assert_eq!(index, P1);
        assert_eq!(session.phase(), Phase::Active);
        assert_eq!(session.turn_owner(), P0);
        assert_eq!(events, vec![
            GameEvent::to(P1, GameEventData::RoleAssigned { player: P1, mark: Mark::O }),
            GameEvent::to(P0, GameEventData::Started { turn: P0, your_turn: true }),
            GameEvent::to(P1, GameEventData::Started { turn: P0, your_turn: false }),
        ]);
    }

    #[test]
    fn test_third_join_rejected() {
        let mut session = active_session();
        assert_eq!(session.join(ConnectionId(3)), Err(JoinError::SessionFull));
        assert_eq!(session.join(ConnectionId(1)), Err(JoinError::AlreadySeated));
        assert_eq!(session.participant_count(), 2);
    }

    #[test]
    fn test_valid_move_passes_turn() {
        let mut session = active_session();
        let events = session.handle(P0, Action::Move { index: 4 });

        assert_eq!(events, vec![
            GameEvent::broadcast(GameEventData::MovePlayed { index: 4, player: P0, mark: Mark::X }),
            GameEvent::broadcast(GameEventData::TurnChanged { turn: P1 }),
        ]);
        assert_eq!(session.board().get(4), Some(Mark::X));
        assert_eq!(session.turn_owner(), P1);
    }

    #[test]
    fn test_out_of_turn_move_ignored() {
        let mut session = active_session();
        let events = session.handle(P1, Action::Move { index: 5 });

        assert!(events.is_empty());
        assert!(session.board().is_empty());
        assert_eq!(session.turn_owner(), P0);
        assert_eq!(session.phase(), Phase::Active);
    }

    #[test]
    fn test_occupied_and_out_of_range_moves_ignored() {
        let mut session = active_session();
        play(&mut session, &[0]);

        assert!(session.handle(P1, Action::Move { index: 0 }).is_empty());
        assert!(session.handle(P1, Action::Move { index: 9 }).is_empty());
        assert!(session.handle(P1, Action::Move { index: -3 }).is_empty());
        assert_eq!(session.board().get(0), Some(Mark::X));
        assert_eq!(session.turn_owner(), P1);
    }

    #[test]
    fn test_move_while_waiting_ignored() {
        let mut session = Session::new(SessionId::new_v4());
        session.join(ConnectionId(1)).unwrap();

        assert!(session.handle(P0, Action::Move { index: 0 }).is_empty());
        assert!(session.board().is_empty());
    }

    #[test]
    fn test_top_row_win() {
        let mut session = active_session();
        let events = play(&mut session, &[0, 3, 1, 4, 2]);

        assert_eq!(events, vec![
            GameEvent::broadcast(GameEventData::MovePlayed { index: 2, player: P0, mark: Mark::X }),
            GameEvent::broadcast(GameEventData::Won { player: P0 }),
        ]);
        assert_eq!(session.phase(), Phase::Terminal);
        assert!(session.board().is_empty());
        assert_eq!(session.turn_owner(), P0);
    }

    #[test]
    fn test_second_player_can_win() {
        let mut session = active_session();
        let events = play(&mut session, &[0, 2, 1, 4, 8, 6]);

        assert_eq!(events.last(), Some(&GameEvent::broadcast(GameEventData::Won { player: P1 })));
        assert_eq!(session.phase(), Phase::Terminal);
    }

    #[test]
    fn test_full_board_tie() {
        let mut session = active_session();
        let events = play(&mut session, &[0, 1, 2, 4, 3, 5, 7, 6, 8]);

        assert_eq!(events, vec![
            GameEvent::broadcast(GameEventData::MovePlayed { index: 8, player: P0, mark: Mark::X }),
            GameEvent::broadcast(GameEventData::Tied),
        ]);
        assert_eq!(session.phase(), Phase::Terminal);
        assert!(session.board().is_empty());
    }

    #[test]
    fn test_no_moves_after_terminal() {
        let mut session = active_session();
        play(&mut session, &[0, 3, 1, 4, 2]);

        assert!(session.handle(P0, Action::Move { index: 4 }).is_empty());
        assert!(session.handle(P1, Action::Move { index: 4 }).is_empty());
        assert!(session.board().is_empty());
    }

    #[test]
    fn test_rematch_offer_goes_to_opponent_only() {
        let mut session = active_session();
        play(&mut session, &[0, 3, 1, 4, 2]);

        let events = session.handle(P1, Action::Rematch);
        assert_eq!(events, vec![GameEvent::to(P0, GameEventData::RematchOffered)]);
        assert!(!events[0].recipient.includes(P1));
        assert!(session.pending_rematch().contains(&P1));
        assert_eq!(session.phase(), Phase::Terminal);
    }

    #[test]
    fn test_rematch_accepted_resets() {
        let mut session = active_session();
        play(&mut session, &[0, 3, 1, 4, 2]);
        session.handle(P1, Action::Rematch);

        let events = session.handle(P0, Action::RematchAccepted);
        assert_eq!(events, vec![GameEvent::broadcast(GameEventData::Reset)]);
        assert_eq!(events[0].recipient, Recipient::All);
        assert_eq!(session.phase(), Phase::Active);
        assert!(session.board().is_empty());
        assert_eq!(session.turn_owner(), P0);
        assert!(session.pending_rematch().is_empty());

        // X opens the next game
        assert!(!session.handle(P0, Action::Move { index: 4 }).is_empty());
    }

    #[test]
    fn test_rematch_accepted_mid_game_clears_board() {
        let mut session = active_session();
        play(&mut session, &[0, 4]);

        let events = session.handle(P1, Action::RematchAccepted);
        assert_eq!(events, vec![GameEvent::broadcast(GameEventData::Reset)]);
        assert!(session.board().is_empty());
        assert_eq!(session.turn_owner(), P0);
    }

    #[test]
    fn test_rematch_ignored_while_waiting() {
        let mut session = Session::new(SessionId::new_v4());
        session.join(ConnectionId(1)).unwrap();

        assert!(session.handle(P0, Action::Rematch).is_empty());
        assert!(session.handle(P0, Action::RematchAccepted).is_empty());
        assert!(session.pending_rematch().is_empty());
    }

    #[test]
    fn test_leave_demotes_and_clears_rematch() {
        let mut session = active_session();
        play(&mut session, &[0, 3, 1, 4, 2]);
        session.handle(P0, Action::Rematch);

        let events = session.leave(ConnectionId(2));
        assert!(events.is_empty());
        assert_eq!(session.phase(), Phase::Waiting);
        assert!(session.pending_rematch().is_empty());
        assert_eq!(session.participant(P1), None);
    }

    #[test]
    fn test_leave_unknown_connection_is_noop() {
        let mut session = active_session();
        assert!(session.leave(ConnectionId(99)).is_empty());
        assert_eq!(session.phase(), Phase::Active);
    }

    #[test]
    fn test_leave_notice_when_enabled() {
        let mut session = Session::new(SessionId::new_v4()).with_leave_notice(true);
        session.join(ConnectionId(1)).unwrap();
        session.join(ConnectionId(2)).unwrap();

        let events = session.leave(ConnectionId(1));
        assert_eq!(events, vec![GameEvent::to(P1, GameEventData::OpponentLeft)]);
    }

    #[test]
    fn test_rejoin_fills_missing_seat_on_clean_board() {
        let mut session = active_session();
        play(&mut session, &[0, 4, 8]);
        session.leave(ConnectionId(1));

        let (index, events) = session.join(ConnectionId(3)).unwrap();
        assert_eq!(index, P0);
        assert_eq!(session.phase(), Phase::Active);
        assert!(session.board().is_empty());
        assert_eq!(session.turn_owner(), P0);
        assert_eq!(events.len(), 3);
        assert_eq!(session.seat_of(ConnectionId(2)), Some(P1));
    }

    #[test]
    fn test_action_from_empty_seat_ignored() {
        let mut session = Session::new(SessionId::new_v4());
        session.join(ConnectionId(1)).unwrap();
        assert!(session.handle(P1, Action::Rematch).is_empty());
    }

    proptest! {
        #[test]
        fn prop_turn_alternates_until_terminal(cells in proptest::collection::vec(0i64..9, 0..40)) {
            let mut session = active_session();
            for cell in cells {
                let mover = session.turn_owner();
                let before = session.board().clone();
                let events = session.handle(mover, Action::Move { index: cell });

                if events.is_empty() {
                    prop_assert_eq!(session.board(), &before);
                    prop_assert_eq!(session.turn_owner(), mover);
                } else if session.phase() == Phase::Terminal {
                    prop_assert!(session.board().is_empty());
                    prop_assert_eq!(session.turn_owner(), ParticipantIndex::FIRST);
                    break;
                } else {
                    prop_assert_eq!(session.turn_owner(), mover.other());
                }
            }
        }

        #[test]
        fn prop_non_owner_never_changes_state(
            opening in proptest::collection::vec(0i64..9, 0..4),
            cell in -5i64..15,
        ) {
            let mut session = active_session();
            for c in opening {
                let owner = session.turn_owner();
                session.handle(owner, Action::Move { index: c });
            }

            let board = session.board().clone();
            let owner = session.turn_owner();
            let phase = session.phase();

            let events = session.handle(owner.other(), Action::Move { index: cell });
            prop_assert!(events.is_empty());
            prop_assert_eq!(session.board(), &board);
            prop_assert_eq!(session.turn_owner(), owner);
            prop_assert_eq!(session.phase(), phase);
        }
    }
}
