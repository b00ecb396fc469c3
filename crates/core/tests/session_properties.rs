//! Property-based tests for the session state machine
//!
//! Random sequences of joins, leaves, playback commands and clock advances
//! must never break the host or position invariants.

use aphrodite_core::{
    Access, Applied, Clock, Command, Identity, IssuedCommand, ManualClock, MediaInfo, NewSession,
    Session, SessionLimits, SessionPhase,
};
use proptest::prelude::*;
use uuid::Uuid;

const DURATION: f64 = 600.0;

#[derive(Debug, Clone)]
enum Op {
    Join,
    Leave(usize),
    Play,
    Pause,
    Seek(f64),
    Rate(f64),
    Advance(f64),
}

fn arbitrary_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        2 => Just(Op::Join),
        1 => (0usize..8).prop_map(Op::Leave),
        2 => Just(Op::Play),
        1 => Just(Op::Pause),
        2 => (-100.0f64..1000.0).prop_map(Op::Seek),
        1 => prop_oneof![Just(0.5), Just(1.0), Just(1.25), Just(2.0)].prop_map(Op::Rate),
        3 => (0.0f64..120.0).prop_map(Op::Advance),
    ]
}

fn new_session(clock: &ManualClock, capacity: usize) -> Session {
    Session::create(
        NewSession {
            id: Uuid::new_v4(),
            epoch: 1,
            name: "Property party".into(),
            media: MediaInfo {
                media_ref: "abc".into(),
                title: None,
                duration_seconds: Some(DURATION),
                embed_url: String::new(),
            },
            capacity,
            access: Access::Public,
            limits: SessionLimits::default(),
        },
        Identity::new(Uuid::new_v4(), "host"),
        clock.now(),
    )
    .unwrap()
}

fn host_command(session: &mut Session, clock: &ManualClock, command: Command) {
    if let Some(host) = session.host_id() {
        let _ = session.apply(&IssuedCommand {
            session_id: session.id(),
            issuer: host,
            command,
            received_at: clock.now(),
        });
    }
}

fn run(session: &mut Session, clock: &ManualClock, op: &Op, joined: &mut u32) {
    match op {
        Op::Join => {
            *joined += 1;
            let _ = session.join(
                Identity::new(Uuid::new_v4(), format!("viewer{}", joined)),
                None,
                clock.now(),
            );
        }
        Op::Leave(idx) => {
            let ids: Vec<Uuid> = session.participants().iter().map(|p| p.id).collect();
            if !ids.is_empty() {
                session.leave(ids[idx % ids.len()], clock.now()).unwrap();
            }
        }
        Op::Play => host_command(session, clock, Command::Play),
        Op::Pause => host_command(session, clock, Command::Pause),
        Op::Seek(position) => host_command(session, clock, Command::SeekTo { position: *position }),
        Op::Rate(multiplier) => host_command(
            session,
            clock,
            Command::ChangeRate {
                multiplier: *multiplier,
            },
        ),
        Op::Advance(secs) => clock.advance_secs(*secs),
    }
}

proptest! {
    /// Property: exactly one host while anyone is present, none otherwise
    #[test]
    fn single_host_whenever_non_empty(
        capacity in 1usize..6,
        ops in prop::collection::vec(arbitrary_op(), 1..60)
    ) {
        let clock = ManualClock::new();
        let mut session = new_session(&clock, capacity);
        let mut joined = 0;

        for op in &ops {
            run(&mut session, &clock, op, &mut joined);

            let hosts = session.participants().iter().filter(|p| p.is_host).count();
            match session.phase() {
                SessionPhase::Active => {
                    prop_assert_eq!(hosts, 1);
                    prop_assert!(session.host().is_some_and(|h| h.is_host));
                }
                SessionPhase::Empty => {
                    prop_assert_eq!(hosts, 0);
                    prop_assert!(session.host_id().is_none());
                }
            }
            prop_assert!(session.participants().len() <= capacity);
        }
    }

    /// Property: effective position stays within [0, duration]
    #[test]
    fn position_within_media_bounds(
        ops in prop::collection::vec(arbitrary_op(), 1..60)
    ) {
        let clock = ManualClock::new();
        let mut session = new_session(&clock, 8);
        let mut joined = 0;

        for op in &ops {
            run(&mut session, &clock, op, &mut joined);
            let position = session.effective_position(clock.now());
            prop_assert!((0.0..=DURATION).contains(&position), "position {} out of bounds", position);
        }
    }

    /// Property: pausing a paused session changes nothing
    #[test]
    fn pause_when_paused_is_noop(
        seek in 0.0f64..DURATION,
        wait in 0.0f64..300.0
    ) {
        let clock = ManualClock::new();
        let mut session = new_session(&clock, 4);
        let host = session.host_id().unwrap();
        let issue = |session: &mut Session, command| {
            session.apply(&IssuedCommand {
                session_id: session.id(),
                issuer: host,
                command,
                received_at: clock.now(),
            })
        };

        issue(&mut session, Command::SeekTo { position: seek }).unwrap();
        let before = *session.playback();
        let sequence = session.next_sequence();
        clock.advance_secs(wait);

        prop_assert_eq!(issue(&mut session, Command::Pause).unwrap(), Applied::Unchanged);
        prop_assert_eq!(*session.playback(), before);
        prop_assert_eq!(session.next_sequence(), sequence);
    }

    /// Property: leave then rejoin observes the same state as staying connected
    #[test]
    fn rejoin_sees_same_playback(
        seek in 0.0f64..300.0,
        away in 0.0f64..60.0
    ) {
        let clock = ManualClock::new();
        let mut session = new_session(&clock, 4);
        let host = session.host_id().unwrap();
        let viewer = Uuid::new_v4();
        session.join(Identity::new(viewer, "viewer"), None, clock.now()).unwrap();

        for command in [Command::SeekTo { position: seek }, Command::Play] {
            session
                .apply(&IssuedCommand {
                    session_id: session.id(),
                    issuer: host,
                    command,
                    received_at: clock.now(),
                })
                .unwrap();
        }

        let mut continuous = session.clone();
        session.leave(viewer, clock.now()).unwrap();
        clock.advance_secs(away);
        session.join(Identity::new(viewer, "viewer"), None, clock.now()).unwrap();

        prop_assert_eq!(session.playback(), continuous.playback());
        let now = clock.now();
        prop_assert_eq!(session.effective_position(now), continuous.effective_position(now));

        continuous.leave(viewer, now).unwrap();
        prop_assert_eq!(session.participants().len(), continuous.participants().len() + 1);
    }
}
