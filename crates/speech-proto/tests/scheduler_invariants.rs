mod common;

use std::collections::HashSet;

use common::{authorized_scheduler, item};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use speech_proto::protocol::Item;
use speech_proto::scheduler::{Enqueued, PlaybackOutcome, PlaybackScheduler, Settled};

fn assert_invariants(scheduler: &PlaybackScheduler) {
    let names: Vec<&str> = scheduler.queue().iter().map(|i| i.name.as_str()).collect();
    let unique: HashSet<&str> = names.iter().copied().collect();
    assert_eq!(unique.len(), names.len(), "duplicate in queue: {:?}", names);

    for queued in scheduler.queue().iter() {
        assert!(
            !scheduler.ledger().contains(&queued.name),
            "{} is queued but already played",
            queued.name
        );
        assert!(!queued.is_malformed());
    }

    let created: Vec<_> = scheduler.queue().iter().map(|i| i.created).collect();
    assert!(created.windows(2).all(|w| w[0] <= w[1]), "queue out of order");

    if let Some(in_flight) = scheduler.current() {
        assert!(scheduler.ledger().contains(&in_flight.item.name));
        assert!(!scheduler.queue().contains(&in_flight.item.name));
    }
}

#[test]
fn random_operation_sequences_keep_invariants() {
    for seed in 1..=20u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut scheduler = authorized_scheduler();
        let mut pool: Vec<Item> = (0..12)
            .map(|n| item(&format!("clip-{:02}.mp3", n), rng.gen_range(0..50)))
            .collect();
        pool.push(item("   ", 5));

        let mut played: HashSet<String> = HashSet::new();
        for _ in 0..400 {
            match rng.gen_range(0..10) {
                0..=4 => {
                    let pick = pool[rng.gen_range(0..pool.len())].clone();
                    let name = pick.name.clone();
                    let was_played = scheduler.ledger().contains(&name);
                    match scheduler.enqueue(pick) {
                        Enqueued::Rejected(_) => {}
                        _ => assert!(!was_played, "{} re-admitted after playing", name),
                    }
                }
                5..=6 => {
                    if let Some(generation) = scheduler.current_generation() {
                        let outcome = match rng.gen_range(0..3) {
                            0 => PlaybackOutcome::Ended,
                            1 => PlaybackOutcome::Failed("decode".into()),
                            _ => PlaybackOutcome::TimedOut,
                        };
                        assert_ne!(scheduler.settle(generation, &outcome), Settled::Stale);
                    }
                }
                7 => {
                    let stale = scheduler.current_generation().unwrap_or(0).saturating_sub(1);
                    let before = scheduler.state().clone();
                    if stale > 0 && scheduler.current_generation() != Some(stale) {
                        assert_eq!(
                            scheduler.settle(stale, &PlaybackOutcome::Ended),
                            Settled::Stale
                        );
                        assert_eq!(scheduler.state(), &before);
                    }
                }
                8 => {
                    if rng.gen_bool(0.25) {
                        scheduler.reset();
                        played.clear();
                        assert!(!scheduler.is_playing());
                        assert!(scheduler.queue().is_empty());
                    }
                }
                _ => {
                    if rng.gen_bool(0.5) {
                        scheduler.revoke();
                    } else {
                        scheduler.authorize();
                    }
                }
            }

            // The ledger only grows between resets.
            for name in &played {
                assert!(scheduler.ledger().contains(name));
            }
            played.extend(
                pool.iter()
                    .filter(|i| scheduler.ledger().contains(&i.name))
                    .map(|i| i.name.clone()),
            );
            assert_invariants(&scheduler);
        }
    }
}

#[test]
fn late_signals_after_reset_never_resurrect_playback() {
    let mut scheduler = authorized_scheduler();
    let started = match scheduler.enqueue(item("a.mp3", 1)) {
        Enqueued::Started(in_flight) => in_flight,
        other => panic!("expected start, got {:?}", other),
    };
    scheduler.enqueue(item("b.mp3", 2));

    scheduler.reset();
    for outcome in [
        PlaybackOutcome::Ended,
        PlaybackOutcome::Failed("network".into()),
        PlaybackOutcome::TimedOut,
    ] {
        assert_eq!(scheduler.settle(started.generation, &outcome), Settled::Stale);
    }
    assert!(!scheduler.is_playing());
    assert!(scheduler.queue().is_empty());
    assert!(scheduler.ledger().is_empty());

    // After a reset the same file may be heard again.
    assert!(matches!(
        scheduler.enqueue(item("a.mp3", 1)),
        Enqueued::Started(_)
    ));
}

#[test]
fn polls_feed_only_new_files_oldest_first() {
    let mut scheduler = authorized_scheduler();
    assert!(scheduler.poll(&[item("x.mp3", 0), item("y.mp3", 1)]).is_empty());

    let fresh = scheduler.poll(&[
        item("x.mp3", 0),
        item("y.mp3", 1),
        item("late.mp3", 9),
        item("early.mp3", 3),
    ]);
    let names: Vec<&str> = fresh.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["early.mp3", "late.mp3"]);

    for file in fresh {
        scheduler.enqueue(file);
    }
    assert_eq!(scheduler.current().unwrap().item.name, "early.mp3");
    assert_eq!(scheduler.queue().names(), vec!["late.mp3"]);

    // A file that disappears and reappears is new again, but already played.
    scheduler.poll(&[item("x.mp3", 0)]);
    let again = scheduler.poll(&[item("x.mp3", 0), item("early.mp3", 3)]);
    assert_eq!(again.len(), 1);
    assert!(matches!(
        scheduler.enqueue(again[0].clone()),
        Enqueued::Rejected(_)
    ));
}
