#![no_main]

use kingsgambit_client::game::MoveEngine;
use kingsgambit_client::{PlayerColor, Router, Session};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = serde_json::from_slice::<kingsgambit_client::ServerMessage>(data);

    // Full dispatch with a move in flight: reconciliation, rollback and
    // video signaling must never panic on hostile frames.
    if let Ok(text) = std::str::from_utf8(data) {
        let session = Session::new("fuzz", "alice", PlayerColor::White).with_opponent("bob");
        let mut router = Router::new(session, MoveEngine::new());
        router.on_connected();
        let _ = router.propose_move("e2", "e4", None);
        for frame in text.split('\n') {
            let _ = router.route_text(frame);
        }
    }
});
