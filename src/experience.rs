//! Experience persistence: fixed-size packed records, concatenated with no
//! framing (SPEC_FULL.md §6, bit-exact cross-version replay format).
//!
//! Record layout, matching spec.md §6 exactly:
//! `u8 num_history` (always [`HISTORY_LENGTH`]), then that many `(packed
//! board [32 bytes], repetition_count u32)` pairs, then `side_to_move u8`,
//! `total_move_count u32`, `no_progress_count u32`, a castling-flags byte
//! (bit0=white kingside, bit1=white queenside, bit2=black kingside, bit3=
//! black queenside), a `[4672] f32` policy vector, and a final `f32` result.

use crate::board::Board;
use crate::error::{Error, Result};
use crate::features::{self, HistoryFrame, NUM_POLICY_SLOTS};
use crate::game_state::GameState;
use crate::piece::Side;

const BOARD_BYTES: usize = 32;
const HISTORY_LENGTH: usize = features::HISTORY_LENGTH;
const HEADER_SIZE: usize = 1 + HISTORY_LENGTH * (BOARD_BYTES + 4) + 1 + 4 + 4 + 1;
const POLICY_BYTES: usize = NUM_POLICY_SLOTS * 4;
pub const RECORD_SIZE: usize = HEADER_SIZE + POLICY_BYTES + 4;

/// A state snapshot carrying exactly what the feature encoder and the
/// on-disk format need, independent of whether it came from a live
/// `GameState` chain or a deserialized record.
#[derive(Debug, Clone)]
pub struct GameSnapshot {
    pub frames: Vec<HistoryFrame>,
    pub side_to_move: Side,
    pub total_move_count: u32,
    pub no_progress_count: u32,
    pub white_castle: (bool, bool),
    pub black_castle: (bool, bool),
}

impl GameSnapshot {
    pub fn from_state(state: &GameState) -> GameSnapshot {
        let mut frames: Vec<HistoryFrame> = state
            .history(HISTORY_LENGTH)
            .into_iter()
            .map(|s| HistoryFrame {
                board: s.board().clone(),
                repetition_count: s.repetition_count(),
            })
            .collect();
        while frames.len() < HISTORY_LENGTH {
            frames.push(HistoryFrame {
                board: Board::empty(),
                repetition_count: 0,
            });
        }
        GameSnapshot {
            frames,
            side_to_move: state.side_to_move(),
            total_move_count: state.total_move_count(),
            no_progress_count: state.no_progress_count(),
            white_castle: state.can_castle_white(),
            black_castle: state.can_castle_black(),
        }
    }

    pub fn encode_features(&self) -> Vec<f32> {
        let (mover_rights, opponent_rights) = match self.side_to_move {
            Side::White => (self.white_castle, self.black_castle),
            Side::Black => (self.black_castle, self.white_castle),
        };
        features::encode_frames(
            &self.frames,
            self.side_to_move,
            self.total_move_count,
            self.no_progress_count,
            mover_rights,
            opponent_rights,
        )
    }
}

#[derive(Debug, Clone)]
pub struct Experience {
    pub snapshot: GameSnapshot,
    /// Length-4672 visit-count policy target.
    pub policy_target: Vec<f32>,
    /// Game outcome in `{-1, 0, 1}` from `snapshot.side_to_move`'s perspective.
    pub result: f32,
}

impl Experience {
    pub fn write_to(&self, out: &mut Vec<u8>) {
        debug_assert_eq!(self.policy_target.len(), NUM_POLICY_SLOTS);
        out.push(HISTORY_LENGTH as u8);
        for frame in &self.snapshot.frames {
            out.extend_from_slice(&frame.board.to_packed());
            out.extend_from_slice(&frame.repetition_count.to_le_bytes());
        }
        out.push(self.snapshot.side_to_move as u8);
        out.extend_from_slice(&self.snapshot.total_move_count.to_le_bytes());
        out.extend_from_slice(&self.snapshot.no_progress_count.to_le_bytes());

        let mut castle_flags = 0u8;
        if self.snapshot.white_castle.0 {
            castle_flags |= 1 << 0;
        }
        if self.snapshot.white_castle.1 {
            castle_flags |= 1 << 1;
        }
        if self.snapshot.black_castle.0 {
            castle_flags |= 1 << 2;
        }
        if self.snapshot.black_castle.1 {
            castle_flags |= 1 << 3;
        }
        out.push(castle_flags);

        for v in &self.policy_target {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&self.result.to_le_bytes());
    }

    fn read_from(bytes: &[u8]) -> Experience {
        debug_assert_eq!(bytes.len(), RECORD_SIZE);
        let mut pos = 0usize;
        let num_history = bytes[pos] as usize;
        pos += 1;
        debug_assert_eq!(num_history, HISTORY_LENGTH, "record history length mismatch");

        let mut frames = Vec::with_capacity(HISTORY_LENGTH);
        for _ in 0..HISTORY_LENGTH {
            let mut packed = [0u8; BOARD_BYTES];
            packed.copy_from_slice(&bytes[pos..pos + BOARD_BYTES]);
            pos += BOARD_BYTES;
            let repetition_count = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap());
            pos += 4;
            frames.push(HistoryFrame {
                board: Board::from_packed(&packed),
                repetition_count,
            });
        }

        let side_to_move = if bytes[pos] == 0 { Side::White } else { Side::Black };
        pos += 1;
        let total_move_count = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let no_progress_count = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let castle_flags = bytes[pos];
        pos += 1;

        let snapshot = GameSnapshot {
            frames,
            side_to_move,
            total_move_count,
            no_progress_count,
            white_castle: (castle_flags & 1 != 0, castle_flags & 2 != 0),
            black_castle: (castle_flags & 4 != 0, castle_flags & 8 != 0),
        };

        let mut policy_target = Vec::with_capacity(NUM_POLICY_SLOTS);
        for _ in 0..NUM_POLICY_SLOTS {
            policy_target.push(f32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()));
            pos += 4;
        }
        let result = f32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap());
        pos += 4;
        debug_assert_eq!(pos, RECORD_SIZE);

        Experience {
            snapshot,
            policy_target,
            result,
        }
    }
}

/// Serializes `experiences` into one flat buffer of concatenated records.
pub fn serialize(experiences: &[Experience]) -> Vec<u8> {
    let mut out = Vec::with_capacity(experiences.len() * RECORD_SIZE);
    for experience in experiences {
        experience.write_to(&mut out);
    }
    out
}

/// Rejects the whole buffer if its length is not a multiple of the fixed
/// record size — no partial load, per SPEC_FULL.md §7.
pub fn deserialize(bytes: &[u8]) -> Result<Vec<Experience>> {
    if bytes.len() % RECORD_SIZE != 0 {
        return Err(Error::CorruptExperienceFile {
            expected_multiple_of: RECORD_SIZE,
            actual: bytes.len(),
        });
    }
    Ok(bytes.chunks(RECORD_SIZE).map(Experience::read_from).collect())
}
