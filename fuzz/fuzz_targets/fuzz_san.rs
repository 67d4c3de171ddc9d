#![no_main]

use std::str::FromStr;

use chess::Board;
use kingsgambit_client::rules;
use libfuzzer_sys::fuzz_target;

const POSITIONS: [&str; 3] = [
    "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
    "r3k2r/pPppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
    "8/2P5/8/8/8/8/5p2/K1k5 b - - 0 1",
];

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    for fen in POSITIONS {
        let Ok(board) = Board::from_str(fen) else {
            continue;
        };
        // Anything parse_san accepts must render back to SAN that parses to
        // the same move.
        if let Ok(mv) = rules::parse_san(&board, text) {
            let san = rules::to_san(&board, mv);
            assert_eq!(rules::parse_san(&board, &san).ok(), Some(mv), "{text} -> {san}");
        }
    }
    let _ = rules::parse_position(text);
});
