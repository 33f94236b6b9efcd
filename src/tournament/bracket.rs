//! Four-player single-elimination bracket with a third-place match
//!
//! Pure state: the engine persists what this module decides and spawns the
//! sessions it asks for.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::game::SessionId;
use crate::store::{
    MatchId, MatchRecord, PlayerId, Round, TournamentId, TournamentPlayer, TournamentRecord,
    TournamentStatus,
};

/// Players needed to start
pub const TOURNAMENT_SIZE: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BracketError {
    #[error("Tournament is full")]
    Full,

    #[error("Player already joined")]
    AlreadyJoined,

    #[error("Match has no bracket round")]
    MissingRound,

    #[error("Round {0:?} is not scheduled")]
    UnknownRound(Round),

    #[error("Round {0:?} already has a winner")]
    AlreadyDecided(Round),

    #[error("Players do not match round {0:?}")]
    PlayerMismatch(Round),
}

/// Recorded outcome of a bracket match
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub match_id: MatchId,
    pub score_player1: u32,
    pub score_player2: u32,
    pub winner_id: PlayerId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketMatch {
    pub round: Round,
    pub player1: PlayerId,
    pub player2: PlayerId,
    pub session_id: Option<SessionId>,
    pub result: Option<MatchResult>,
}

impl BracketMatch {
    fn new(round: Round, players: [PlayerId; 2]) -> Self {
        Self {
            round,
            player1: players[0],
            player2: players[1],
            session_id: None,
            result: None,
        }
    }

    pub fn players(&self) -> [PlayerId; 2] {
        [self.player1, self.player2]
    }

    pub fn winner(&self) -> Option<PlayerId> {
        self.result.as_ref().map(|r| r.winner_id)
    }

    pub fn loser(&self) -> Option<PlayerId> {
        self.winner().map(|winner| {
            if winner == self.player1 {
                self.player2
            } else {
                self.player1
            }
        })
    }
}

/// Match the engine must open a session for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingMatch {
    pub round: Round,
    /// Left, then right
    pub players: [PlayerId; 2],
}

/// Side effects of a bracket transition
#[derive(Debug, Default, PartialEq)]
pub struct Advance {
    pub new_matches: Vec<PendingMatch>,
    pub positions: Vec<(PlayerId, u8)>,
    pub status: Option<TournamentStatus>,
}

#[derive(Debug, Clone)]
pub struct Bracket {
    id: TournamentId,
    creator_id: PlayerId,
    status: TournamentStatus,
    /// Seed order
    players: Vec<PlayerId>,
    matches: BTreeMap<Round, BracketMatch>,
    positions: BTreeMap<PlayerId, u8>,
}

impl Bracket {
    /// Fresh tournament with the creator as first seed
    pub fn new(id: TournamentId, creator_id: PlayerId) -> Self {
        Self {
            id,
            creator_id,
            status: TournamentStatus::Pending,
            players: vec![creator_id],
            matches: BTreeMap::new(),
            positions: BTreeMap::new(),
        }
    }

    /// Rebuild from stored rows by replaying enrollments and results.
    /// The outcome may be ahead of the stored status and positions if a
    /// previous process stopped between writes.
    pub fn from_rows(
        tournament: &TournamentRecord,
        players: &[TournamentPlayer],
        matches: &[MatchRecord],
    ) -> Self {
        let mut seeded: Vec<&TournamentPlayer> = players.iter().collect();
        seeded.sort_by_key(|p| p.seed);

        let mut bracket = Self {
            id: tournament.id,
            creator_id: tournament.creator_id,
            status: TournamentStatus::Pending,
            players: seeded
                .iter()
                .map(|p| p.player_id)
                .take(TOURNAMENT_SIZE)
                .collect(),
            matches: BTreeMap::new(),
            positions: seeded
                .iter()
                .filter_map(|p| p.final_position.map(|pos| (p.player_id, pos)))
                .collect(),
        };

        if bracket.players.len() == TOURNAMENT_SIZE {
            bracket.start();
        }

        let mut ordered: Vec<&MatchRecord> = matches.iter().filter(|m| m.round.is_some()).collect();
        ordered.sort_by_key(|m| (m.round, m.id));
        for record in ordered {
            // Replaying our own rows; anything inconsistent is skipped
            let _ = bracket.record(record);
        }

        bracket
    }

    pub fn id(&self) -> TournamentId {
        self.id
    }

    pub fn creator_id(&self) -> PlayerId {
        self.creator_id
    }

    pub fn status(&self) -> TournamentStatus {
        self.status
    }

    pub fn players(&self) -> &[PlayerId] {
        &self.players
    }

    pub fn position(&self, player: PlayerId) -> Option<u8> {
        self.positions.get(&player).copied()
    }

    pub fn positions(&self) -> impl Iterator<Item = (PlayerId, u8)> + '_ {
        self.positions.iter().map(|(player, pos)| (*player, *pos))
    }

    pub fn matches(&self) -> impl Iterator<Item = &BracketMatch> {
        self.matches.values()
    }

    pub fn get_match(&self, round: Round) -> Option<&BracketMatch> {
        self.matches.get(&round)
    }

    /// Scheduled matches without a winner
    pub fn undecided(&self) -> Vec<PendingMatch> {
        self.matches
            .values()
            .filter(|m| m.result.is_none())
            .map(|m| PendingMatch {
                round: m.round,
                players: m.players(),
            })
            .collect()
    }

    pub fn set_session(&mut self, round: Round, session_id: SessionId) {
        if let Some(m) = self.matches.get_mut(&round) {
            m.session_id = Some(session_id);
        }
    }

    /// Validate a join without applying it
    pub fn check_join(&self, player: PlayerId) -> Result<(), BracketError> {
        if self.players.contains(&player) {
            return Err(BracketError::AlreadyJoined);
        }
        if self.status != TournamentStatus::Pending || self.players.len() >= TOURNAMENT_SIZE {
            return Err(BracketError::Full);
        }
        Ok(())
    }

    /// Enroll `player`; the fourth join starts the semifinals
    pub fn join(&mut self, player: PlayerId) -> Result<Advance, BracketError> {
        self.check_join(player)?;
        self.players.push(player);

        if self.players.len() < TOURNAMENT_SIZE {
            return Ok(Advance::default());
        }
        Ok(Advance {
            new_matches: self.start(),
            positions: Vec::new(),
            status: Some(TournamentStatus::Started),
        })
    }

    fn start(&mut self) -> Vec<PendingMatch> {
        self.status = TournamentStatus::Started;
        let semis = [
            PendingMatch {
                round: Round::Semi1,
                players: [self.players[0], self.players[1]],
            },
            PendingMatch {
                round: Round::Semi2,
                players: [self.players[2], self.players[3]],
            },
        ];
        for m in semis {
            self.schedule(m);
        }
        semis.to_vec()
    }

    fn schedule(&mut self, pending: PendingMatch) {
        self.matches
            .entry(pending.round)
            .or_insert_with(|| BracketMatch::new(pending.round, pending.players));
    }

    /// Apply a recorded match. Re-applying the same row is a no-op.
    pub fn record(&mut self, record: &MatchRecord) -> Result<Advance, BracketError> {
        let round = record.round.ok_or(BracketError::MissingRound)?;
        let scheduled = self
            .matches
            .get_mut(&round)
            .ok_or(BracketError::UnknownRound(round))?;

        if let Some(existing) = &scheduled.result {
            if existing.match_id == record.id {
                return Ok(Advance::default());
            }
            return Err(BracketError::AlreadyDecided(round));
        }

        let mut expected = scheduled.players();
        let mut got = [record.player1, record.player2];
        expected.sort_unstable();
        got.sort_unstable();
        if expected != got || !got.contains(&record.winner_id) {
            return Err(BracketError::PlayerMismatch(round));
        }

        // Keep the scheduled orientation
        let (score_player1, score_player2) = if record.player1 == scheduled.player1 {
            (record.score_player1, record.score_player2)
        } else {
            (record.score_player2, record.score_player1)
        };
        scheduled.result = Some(MatchResult {
            match_id: record.id,
            score_player1,
            score_player2,
            winner_id: record.winner_id,
        });

        let mut advance = Advance::default();
        match round {
            Round::Semi1 | Round::Semi2 => {
                advance.new_matches = self.schedule_finals();
            }
            Round::LittleFinal => {
                advance.positions = self.place(round, 3);
            }
            Round::Final => {
                advance.positions = self.place(round, 1);
                self.status = TournamentStatus::Finished;
                advance.status = Some(TournamentStatus::Finished);
            }
        }
        Ok(advance)
    }

    /// Once both semis are decided: winners meet in the FINAL, losers in the
    /// LITTLE_FINAL
    fn schedule_finals(&mut self) -> Vec<PendingMatch> {
        let (Some(semi1), Some(semi2)) = (
            self.matches.get(&Round::Semi1),
            self.matches.get(&Round::Semi2),
        ) else {
            return Vec::new();
        };
        let (Some(w1), Some(l1), Some(w2), Some(l2)) =
            (semi1.winner(), semi1.loser(), semi2.winner(), semi2.loser())
        else {
            return Vec::new();
        };
        if self.matches.contains_key(&Round::Final) {
            return Vec::new();
        }

        let finals = vec![
            PendingMatch {
                round: Round::LittleFinal,
                players: [l1, l2],
            },
            PendingMatch {
                round: Round::Final,
                players: [w1, w2],
            },
        ];
        for m in &finals {
            self.schedule(*m);
        }
        finals
    }

    /// Winner of `round` gets `best`, loser the next place
    fn place(&mut self, round: Round, best: u8) -> Vec<(PlayerId, u8)> {
        let Some(m) = self.matches.get(&round) else {
            return Vec::new();
        };
        let (Some(winner), Some(loser)) = (m.winner(), m.loser()) else {
            return Vec::new();
        };
        let placed = vec![(winner, best), (loser, best + 1)];
        self.positions.extend(placed.iter().copied());
        placed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: MatchId, round: Round, players: [PlayerId; 2], scores: [u32; 2]) -> MatchRecord {
        MatchRecord {
            id,
            tournament_id: Some(1),
            player1: players[0],
            player2: players[1],
            score_player1: scores[0],
            score_player2: scores[1],
            winner_id: if scores[0] > scores[1] { players[0] } else { players[1] },
            round: Some(round),
            created_at: 0,
        }
    }

    fn started() -> Bracket {
        let mut bracket = Bracket::new(1, 10);
        for player in [11, 12, 13] {
            bracket.join(player).unwrap();
        }
        bracket
    }

    #[test]
    fn fourth_join_starts_semis_by_seed() {
        let mut bracket = Bracket::new(1, 10);
        assert_eq!(bracket.join(11), Ok(Advance::default()));
        assert_eq!(bracket.join(12), Ok(Advance::default()));
        let advance = bracket.join(13).unwrap();

        assert_eq!(bracket.status(), TournamentStatus::Started);
        assert_eq!(advance.status, Some(TournamentStatus::Started));
        assert_eq!(
            advance.new_matches,
            vec![
                PendingMatch {
                    round: Round::Semi1,
                    players: [10, 11]
                },
                PendingMatch {
                    round: Round::Semi2,
                    players: [12, 13]
                },
            ]
        );
    }

    #[test]
    fn join_rejections() {
        let mut bracket = Bracket::new(1, 10);
        assert_eq!(bracket.join(10), Err(BracketError::AlreadyJoined));

        let mut full = started();
        assert_eq!(full.join(14), Err(BracketError::Full));
        assert_eq!(full.join(11), Err(BracketError::AlreadyJoined));
        assert_eq!(full.players().len(), TOURNAMENT_SIZE);
    }

    #[test]
    fn semis_feed_final_and_little_final() {
        let mut bracket = started();
        let first = bracket
            .record(&record(1, Round::Semi1, [10, 11], [5, 2]))
            .unwrap();
        assert!(first.new_matches.is_empty());

        let second = bracket
            .record(&record(2, Round::Semi2, [12, 13], [5, 4]))
            .unwrap();
        assert_eq!(
            second.new_matches,
            vec![
                PendingMatch {
                    round: Round::LittleFinal,
                    players: [11, 13]
                },
                PendingMatch {
                    round: Round::Final,
                    players: [10, 12]
                },
            ]
        );
    }

    #[test]
    fn finals_assign_standings() {
        let mut bracket = started();
        bracket.record(&record(1, Round::Semi1, [10, 11], [5, 2])).unwrap();
        bracket.record(&record(2, Round::Semi2, [12, 13], [5, 4])).unwrap();

        let little = bracket
            .record(&record(3, Round::LittleFinal, [11, 13], [1, 5]))
            .unwrap();
        assert_eq!(little.positions, vec![(13, 3), (11, 4)]);
        assert_eq!(little.status, None);
        assert_eq!(bracket.status(), TournamentStatus::Started);

        let fin = bracket
            .record(&record(4, Round::Final, [10, 12], [5, 3]))
            .unwrap();
        assert_eq!(fin.positions, vec![(10, 1), (12, 2)]);
        assert_eq!(fin.status, Some(TournamentStatus::Finished));
        assert_eq!(bracket.position(11), Some(4));
        assert!(bracket.undecided().is_empty());
    }

    #[test]
    fn final_before_little_final_still_finishes() {
        let mut bracket = started();
        bracket.record(&record(1, Round::Semi1, [10, 11], [5, 2])).unwrap();
        bracket.record(&record(2, Round::Semi2, [12, 13], [5, 4])).unwrap();
        bracket.record(&record(3, Round::Final, [10, 12], [2, 5])).unwrap();

        assert_eq!(bracket.status(), TournamentStatus::Finished);
        assert_eq!(bracket.position(12), Some(1));
        assert_eq!(bracket.undecided().len(), 1);
    }

    #[test]
    fn duplicate_and_out_of_order_results_are_rejected() {
        let mut bracket = started();
        let semi = record(1, Round::Semi1, [10, 11], [5, 2]);
        bracket.record(&semi).unwrap();

        assert_eq!(bracket.record(&semi), Ok(Advance::default()));
        assert_eq!(
            bracket.record(&record(9, Round::Semi1, [10, 11], [2, 5])),
            Err(BracketError::AlreadyDecided(Round::Semi1))
        );
        assert_eq!(
            bracket.record(&record(5, Round::Final, [10, 12], [5, 0])),
            Err(BracketError::UnknownRound(Round::Final))
        );
        assert_eq!(
            bracket.record(&record(6, Round::Semi2, [12, 99], [5, 0])),
            Err(BracketError::PlayerMismatch(Round::Semi2))
        );
        assert_eq!(bracket.get_match(Round::Semi1).unwrap().winner(), Some(10));
    }

    #[test]
    fn rebuild_from_rows_replays_results() {
        let tournament = TournamentRecord {
            id: 1,
            creator_id: 10,
            status: TournamentStatus::Started,
            created_at: 0,
        };
        let players: Vec<TournamentPlayer> = [13, 11, 10, 12]
            .iter()
            .zip([4u8, 2, 1, 3])
            .map(|(player_id, seed)| TournamentPlayer {
                tournament_id: 1,
                player_id: *player_id,
                seed,
                final_position: None,
            })
            .collect();
        let matches = vec![
            record(2, Round::Semi2, [12, 13], [5, 4]),
            record(1, Round::Semi1, [10, 11], [5, 2]),
            record(4, Round::Final, [10, 12], [5, 3]),
        ];

        let bracket = Bracket::from_rows(&tournament, &players, &matches);

        assert_eq!(bracket.players(), &[10, 11, 12, 13]);
        assert_eq!(bracket.status(), TournamentStatus::Finished);
        assert_eq!(bracket.position(10), Some(1));
        assert_eq!(bracket.position(12), Some(2));
        assert_eq!(
            bracket.undecided(),
            vec![PendingMatch {
                round: Round::LittleFinal,
                players: [11, 13]
            }]
        );
    }

    #[test]
    fn rebuild_pending_tournament() {
        let tournament = TournamentRecord {
            id: 7,
            creator_id: 10,
            status: TournamentStatus::Pending,
            created_at: 0,
        };
        let players = vec![TournamentPlayer {
            tournament_id: 7,
            player_id: 10,
            seed: 1,
            final_position: None,
        }];
        let bracket = Bracket::from_rows(&tournament, &players, &[]);
        assert_eq!(bracket.status(), TournamentStatus::Pending);
        assert_eq!(bracket.matches().count(), 0);
        assert!(bracket.check_join(11).is_ok());
    }
}
