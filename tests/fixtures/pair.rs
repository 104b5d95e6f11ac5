//! Two connections wired back to back.

use std::time::{Duration, Instant};

use msrp_core::{Config, Connection, Message, MemoryTransport, Request, SessionId, decode};

use super::Recorder;

/// Safety bound on pump iterations
const MAX_PUMP_ROUNDS: usize = 10_000;

/// Decode every frame in `frames`
pub fn frames_of(frames: &[Vec<u8>]) -> Vec<Message> {
    frames
        .iter()
        .map(|f| decode(f).expect("endpoint emitted an undecodable frame"))
        .collect()
}

/// Decode the requests in `frames`
pub fn requests_of(frames: &[Vec<u8>]) -> Vec<Request> {
    frames_of(frames)
        .into_iter()
        .filter_map(|m| match m {
            Message::Request(r) => Some(r),
            Message::Response(_) => None,
        })
        .collect()
}

/// Alice and Bob, one session each, sharing a virtual clock
pub struct Pair {
    pub alice: Connection<MemoryTransport>,
    pub bob: Connection<MemoryTransport>,
    pub alice_session: SessionId,
    pub bob_session: SessionId,
    pub alice_events: Recorder,
    pub bob_events: Recorder,
    pub now: Instant,
}

impl Pair {
    /// Both transports open; both sessions in `AwaitSdp`
    pub fn new(alice_config: Config, bob_config: Config) -> Self {
        let now = Instant::now();
        let alice_events = Recorder::new();
        let bob_events = Recorder::new();

        let mut alice = Connection::new(MemoryTransport::new(), alice_config).expect("alice config");
        let mut bob = Connection::new(MemoryTransport::new(), bob_config).expect("bob config");
        let alice_session = alice.create_session(alice_events.observer(), now);
        let bob_session = bob.create_session(bob_events.observer(), now);
        alice.on_open(now);
        bob.on_open(now);

        Self {
            alice,
            bob,
            alice_session,
            bob_session,
            alice_events,
            bob_events,
            now,
        }
    }

    /// Default configuration on both ends
    pub fn with_defaults() -> Self {
        Self::new(Config::default(), Config::default())
    }

    /// Offer from Alice, answer from Bob, then deliver Alice's binding SEND
    pub fn negotiate(&mut self) {
        let offer = self.alice.create_offer(&self.alice_session).expect("offer");
        let answer = self
            .bob
            .process_offer(&self.bob_session, &offer, self.now)
            .expect("answer");
        self.alice
            .process_answer(&self.alice_session, &answer.sdp, self.now)
            .expect("process answer");
        self.pump();
        self.alice_events.clear();
        self.bob_events.clear();
    }

    /// Frames Alice has queued
    pub fn take_alice(&mut self) -> Vec<Vec<u8>> {
        self.alice.transport_mut().take_frames()
    }

    /// Frames Bob has queued
    pub fn take_bob(&mut self) -> Vec<Vec<u8>> {
        self.bob.transport_mut().take_frames()
    }

    /// Hand `frames` to Bob
    pub fn to_bob(&mut self, frames: &[Vec<u8>]) {
        for frame in frames {
            self.bob.on_message(frame, self.now).expect("bob decode");
        }
    }

    /// Hand `frames` to Alice
    pub fn to_alice(&mut self, frames: &[Vec<u8>]) {
        for frame in frames {
            self.alice.on_message(frame, self.now).expect("alice decode");
        }
    }

    /// Exchange frames until both sides are quiet. Returns rounds used.
    pub fn pump(&mut self) -> usize {
        for round in 0..MAX_PUMP_ROUNDS {
            let from_alice = self.take_alice();
            let from_bob = self.take_bob();
            if from_alice.is_empty() && from_bob.is_empty() {
                return round;
            }
            self.to_bob(&from_alice);
            self.to_alice(&from_bob);
        }
        panic!("endpoints did not go quiet");
    }

    /// Advance the clock and tick both ends
    pub fn advance(&mut self, by: Duration) {
        self.now += by;
        self.alice.tick(self.now);
        self.bob.tick(self.now);
    }

    /// Drop the link: frames in flight are lost
    pub fn disconnect(&mut self) {
        self.take_alice();
        self.take_bob();
        self.alice.on_close(self.now);
        self.bob.on_close(self.now);
    }

    /// Restore the link
    pub fn reconnect(&mut self) {
        self.alice.on_open(self.now);
        self.bob.on_open(self.now);
    }
}
