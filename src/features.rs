//! Feature encoder: `GameState -> (119, 8, 8)` tensor, and the 4672-slot
//! move <-> policy-index bijection (SPEC_FULL.md §4.3, unchanged from
//! spec.md §4.3 — no direct teacher/`original_source` counterpart exists
//! for this component since neither feeds a network; the layout follows
//! the spec's plane-by-plane description exactly).

use crate::board::{Board, KNIGHT_OFFSETS};
use crate::game_state::GameState;
use crate::moves::{Move, Promotion};
use crate::piece::{PieceKind, Side};

pub const BOARD_SIZE: usize = 8;
pub const HISTORY_LENGTH: usize = 8;
pub const PLANES_PER_HISTORY_SLAB: usize = 14;
pub const NUM_AUX_PLANES: usize = 7;
pub const NUM_PLANES: usize = HISTORY_LENGTH * PLANES_PER_HISTORY_SLAB + NUM_AUX_PLANES;
pub const FEATURE_LEN: usize = NUM_PLANES * BOARD_SIZE * BOARD_SIZE;
pub const NUM_POLICY_PLANES: usize = 73;
pub const NUM_POLICY_SLOTS: usize = NUM_POLICY_PLANES * BOARD_SIZE * BOARD_SIZE;

/// Compass order used for the 8 queen-style direction planes.
const QUEEN_DIRECTIONS: [(i8, i8); 8] = [
    (-1, 0),  // N
    (-1, 1),  // NE
    (0, 1),   // E
    (1, 1),   // SE
    (1, 0),   // S
    (1, -1),  // SW
    (0, -1),  // W
    (-1, -1), // NW
];

/// One historical board plus the repetition count it had at that ply —
/// everything the encoder needs, whether sourced from a live `GameState`
/// chain or a deserialized experience record.
pub struct HistoryFrame {
    pub board: Board,
    pub repetition_count: u32,
}

fn piece_kind_index(kind: PieceKind) -> usize {
    match kind {
        PieceKind::Pawn => 0,
        PieceKind::Knight => 1,
        PieceKind::Bishop => 2,
        PieceKind::Rook => 3,
        PieceKind::Queen => 4,
        PieceKind::King => 5,
        PieceKind::Empty => unreachable!("empty squares are skipped before indexing"),
    }
}

fn fill_plane(out: &mut [f32], plane: usize, value: f32) {
    let base = plane * BOARD_SIZE * BOARD_SIZE;
    out[base..base + BOARD_SIZE * BOARD_SIZE].fill(value);
}

fn write_piece_planes(out: &mut [f32], slab_base: usize, board: &Board, mover: Side) {
    for row in 0..8i8 {
        for col in 0..8i8 {
            let piece = board.piece_at(row, col);
            if piece.is_empty() {
                continue;
            }
            let side_offset = if piece.side == mover { 0 } else { 6 };
            let plane = slab_base + side_offset + piece_kind_index(piece.kind);
            let idx = plane * 64 + (row as usize) * 8 + col as usize;
            out[idx] = 1.0;
        }
    }
}

/// Builds the `(119, 8, 8)` tensor (row-major, plane-major: `out[plane*64 +
/// row*8 + col]`) for `state`, reading up to 7 predecessors via `prev`.
pub fn encode(state: &GameState) -> Vec<f32> {
    let frames: Vec<HistoryFrame> = state
        .history(HISTORY_LENGTH)
        .into_iter()
        .map(|s| HistoryFrame {
            board: s.board().clone(),
            repetition_count: s.repetition_count(),
        })
        .collect();
    let mover = state.side_to_move();
    let mover_rights = state.can_castle(mover);
    let opponent_rights = state.can_castle(mover.opponent());
    encode_frames(
        &frames,
        mover,
        state.total_move_count(),
        state.no_progress_count(),
        mover_rights,
        opponent_rights,
    )
}

/// Same as [`encode`] but built from standalone frames, for feature
/// reconstruction from a deserialized experience record (SPEC_FULL.md §6,
/// testable property "encoding invariant under serialize/deserialize").
pub fn encode_frames(
    frames: &[HistoryFrame],
    mover: Side,
    total_move_count: u32,
    no_progress_count: u32,
    mover_rights: (bool, bool),
    opponent_rights: (bool, bool),
) -> Vec<f32> {
    let mut out = vec![0f32; FEATURE_LEN];

    for (i, frame) in frames.iter().take(HISTORY_LENGTH).enumerate() {
        let slab = i * PLANES_PER_HISTORY_SLAB;
        write_piece_planes(&mut out, slab, &frame.board, mover);
        if frame.repetition_count >= 2 {
            fill_plane(&mut out, slab + 12, 1.0);
        }
        if frame.repetition_count >= 3 {
            fill_plane(&mut out, slab + 13, 1.0);
        }
    }

    let aux = HISTORY_LENGTH * PLANES_PER_HISTORY_SLAB;
    if mover == Side::White {
        fill_plane(&mut out, aux, 1.0);
    }
    fill_plane(&mut out, aux + 1, total_move_count as f32);
    if mover_rights.0 {
        fill_plane(&mut out, aux + 2, 1.0);
    }
    if mover_rights.1 {
        fill_plane(&mut out, aux + 3, 1.0);
    }
    if opponent_rights.0 {
        fill_plane(&mut out, aux + 4, 1.0);
    }
    if opponent_rights.1 {
        fill_plane(&mut out, aux + 5, 1.0);
    }
    fill_plane(&mut out, aux + 6, no_progress_count as f32);

    out
}

fn underpromotion_dir_index(delta_col: i8) -> usize {
    match delta_col {
        -1 => 0,
        0 => 1,
        1 => 2,
        _ => unreachable!("underpromotion is at most one file off straight ahead"),
    }
}

fn queen_dir_and_distance(delta_row: i8, delta_col: i8) -> Option<(usize, i8)> {
    let distance = delta_row.abs().max(delta_col.abs());
    if distance == 0 || distance > 7 {
        return None;
    }
    if delta_row % distance != 0 || delta_col % distance != 0 {
        return None;
    }
    let unit = (delta_row / distance, delta_col / distance);
    let dir_index = QUEEN_DIRECTIONS.iter().position(|d| *d == unit)?;
    Some((dir_index, distance))
}

/// Maps a legal move to its slot in `[0, 4672)`. Panics on a move shape
/// that cannot occur in chess (a programmer error, per SPEC_FULL.md §7).
pub fn encode_move(m: Move) -> u16 {
    let from = m.from_sq as usize;
    let delta_row = m.to_row() as i8 - m.from_row() as i8;
    let delta_col = m.to_col() as i8 - m.from_col() as i8;

    let plane = if matches!(m.promotion, Promotion::Knight | Promotion::Bishop | Promotion::Rook) {
        let piece_index = Promotion::ALL_UNDERPROMOTIONS
            .iter()
            .position(|p| *p == m.promotion)
            .expect("underpromotion must be knight, bishop or rook");
        64 + piece_index * 3 + underpromotion_dir_index(delta_col)
    } else if let Some(knight_index) = KNIGHT_OFFSETS.iter().position(|d| *d == (delta_row, delta_col)) {
        56 + knight_index
    } else {
        let (dir_index, distance) = queen_dir_and_distance(delta_row, delta_col)
            .expect("move must be a queen-style, knight, or underpromotion shape");
        dir_index * 7 + (distance as usize - 1)
    };

    debug_assert!(plane < NUM_POLICY_PLANES, "policy plane out of range");
    (plane * 64 + from) as u16
}

/// Inverse of [`encode_move`]. Needs `board` only to recover the implicit
/// queen promotion when a pawn's queen-plane move lands on the back rank —
/// geometrically identical to a non-promoting queen/rook move otherwise.
pub fn decode_move(slot: u16, board: &Board) -> Move {
    let slot = slot as usize;
    debug_assert!(slot < NUM_POLICY_SLOTS, "policy slot out of range");
    let from = (slot % 64) as u8;
    let plane = slot / 64;
    let from_row = (from / 8) as i8;
    let from_col = (from % 8) as i8;

    if plane >= 64 {
        let rel = plane - 64;
        let promotion = Promotion::ALL_UNDERPROMOTIONS[rel / 3];
        let delta_col = match rel % 3 {
            0 => -1,
            1 => 0,
            2 => 1,
            _ => unreachable!(),
        };
        let piece = board.piece_at_sq(from);
        let forward = if piece.side == Side::White { -1 } else { 1 };
        let to_row = from_row + forward;
        let to_col = from_col + delta_col;
        Move::new(from, sq(to_row, to_col), promotion)
    } else if plane >= 56 {
        let (dr, dc) = KNIGHT_OFFSETS[plane - 56];
        Move::quiet(from, sq(from_row + dr, from_col + dc))
    } else {
        let dir_index = plane / 7;
        let distance = (plane % 7) as i8 + 1;
        let (dr, dc) = QUEEN_DIRECTIONS[dir_index];
        let to_row = from_row + dr * distance;
        let to_col = from_col + dc * distance;
        let piece = board.piece_at_sq(from);
        let promotion = if piece.kind == PieceKind::Pawn && (to_row == 0 || to_row == 7) {
            Promotion::Queen
        } else {
            Promotion::None
        };
        Move::new(from, sq(to_row, to_col), promotion)
    }
}

fn sq(row: i8, col: i8) -> u8 {
    debug_assert!((0..8).contains(&row) && (0..8).contains(&col), "decoded square off-board");
    (row * 8 + col) as u8
}
