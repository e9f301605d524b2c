// Integration tests for the per-group interpolation worker

use std::time::Duration;

use robosim_rs::motion::{MotionError, MotionSettings, MotionSimulator, Waypoint};
use robosim_rs::registry::JointGroup;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

fn group(joints: usize) -> JointGroup {
    JointGroup::new(1, "", (0..joints).map(|i| format!("j{}", i)).collect())
}

fn settings(update_period_ms: u64) -> MotionSettings {
    MotionSettings {
        update_period: Duration::from_millis(update_period_ms),
        buffer_capacity: None,
    }
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn approx(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-9)
}

async fn collect_until(rx: &mut tokio::sync::broadcast::Receiver<Vec<f64>>, target: &[f64]) -> Vec<Vec<f64>> {
    let mut seen = Vec::new();
    loop {
        let commit = rx.recv().await.unwrap();
        let done = commit == target;
        seen.push(commit);
        if done {
            return seen;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_sub_interpolation_commits() {
    let sim = MotionSimulator::new(group(2), vec![0.0, 0.0], settings(100)).unwrap();
    let mut commits = sim.subscribe();
    let start = Instant::now();

    assert_ok!(sim.enqueue(Waypoint::new(vec![1.0, 1.0], ms(500))).await);
    assert!(sim.is_in_motion());

    let seen = collect_until(&mut commits, &[1.0, 1.0]).await;
    assert_eq!(seen.len(), 5, "four intermediate commits and one final: {:?}", seen);
    let expected = [0.2, 0.4, 0.6, 0.8];
    for (commit, value) in seen.iter().zip(expected) {
        assert!(approx(commit, &[value, value]), "{:?} != {}", commit, value);
    }
    for pair in seen.windows(2) {
        assert!(pair[1][0] > pair[0][0]);
        assert!(pair[1][1] > pair[0][1]);
    }
    assert_eq!(seen[4], vec![1.0, 1.0]);

    let elapsed = start.elapsed();
    assert!(elapsed >= ms(500) && elapsed < ms(510), "elapsed {:?}", elapsed);
    assert!(!sim.is_in_motion());
    assert_eq!(sim.current_positions(), vec![1.0, 1.0]);
}

#[tokio::test(start_paused = true)]
async fn test_zero_update_period_commits_only_final() {
    let sim = MotionSimulator::new(group(2), vec![0.0, 0.0], settings(0)).unwrap();
    let mut commits = sim.subscribe();

    sim.enqueue(Waypoint::new(vec![1.0, 1.0], ms(500))).await.unwrap();
    tokio::time::sleep(ms(250)).await;
    assert_eq!(sim.current_positions(), vec![0.0, 0.0]);
    assert!(sim.is_in_motion());

    let seen = collect_until(&mut commits, &[1.0, 1.0]).await;
    assert_eq!(seen, vec![vec![1.0, 1.0]]);
    assert!(!sim.is_in_motion());
}

#[tokio::test(start_paused = true)]
async fn test_stop_discards_in_flight_goal() {
    let sim = MotionSimulator::new(group(2), vec![0.0, 0.0], settings(100)).unwrap();
    let mut commits = sim.subscribe();

    sim.enqueue(Waypoint::new(vec![1.0, 1.0], ms(500))).await.unwrap();
    sim.enqueue(Waypoint::new(vec![2.0, 2.0], ms(900))).await.unwrap();
    tokio::time::sleep(ms(250)).await;

    let mut last_commit = None;
    while let Ok(commit) = commits.try_recv() {
        last_commit = Some(commit);
    }
    let last_commit = last_commit.expect("two intermediate commits before the stop");
    assert!(approx(&last_commit, &[0.4, 0.4]));

    sim.stop();
    assert!(!sim.is_in_motion());
    assert_eq!(sim.queue_length(), 0);
    assert_eq!(sim.current_positions(), last_commit);

    // Neither the aborted goal nor the dropped one is ever committed.
    tokio::time::sleep(ms(1000)).await;
    assert!(matches!(commits.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(sim.current_positions(), last_commit);

    // The worker is still alive and continues from the committed position.
    sim.enqueue(Waypoint::new(vec![1.0, 1.0], ms(200))).await.unwrap();
    let seen = collect_until(&mut commits, &[1.0, 1.0]).await;
    assert_eq!(seen.len(), 2);
    assert!(approx(&seen[0], &[0.7, 0.7]), "{:?}", seen[0]);
}

#[tokio::test(start_paused = true)]
async fn test_goal_after_stop_starts_from_committed_position() {
    let sim = MotionSimulator::new(group(2), vec![0.0, 0.0], settings(100)).unwrap();
    let mut commits = sim.subscribe();

    sim.enqueue(Waypoint::new(vec![1.0, 1.0], ms(500))).await.unwrap();
    tokio::time::sleep(ms(250)).await;
    sim.stop();
    // Let the worker reach its next commit point and drop the goal.
    tokio::time::sleep(ms(150)).await;
    while commits.try_recv().is_ok() {}
    let committed = sim.current_positions();
    assert!(approx(&committed, &[0.4, 0.4]));

    // Later than the aborted goal: timed from its 500 ms, moving from 0.4.
    let start = Instant::now();
    sim.enqueue(Waypoint::new(vec![1.0, 1.0], ms(700))).await.unwrap();
    let seen = collect_until(&mut commits, &[1.0, 1.0]).await;
    assert_eq!(seen.len(), 2);
    assert!(approx(&seen[0], &[0.7, 0.7]), "{:?}", seen[0]);
    let elapsed = start.elapsed();
    assert!(elapsed >= ms(200) && elapsed < ms(210), "elapsed {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_stop_during_motion() {
    let sim = MotionSimulator::new(group(2), vec![0.0, 0.0], settings(100)).unwrap();
    let mut commits = sim.subscribe();

    sim.enqueue(Waypoint::new(vec![1.0, 1.0], ms(500))).await.unwrap();
    sim.enqueue(Waypoint::new(vec![2.0, 2.0], ms(900))).await.unwrap();
    tokio::time::sleep(ms(150)).await;
    let last_commit = commits.try_recv().unwrap();

    sim.stop();
    sim.stop();
    assert_eq!(sim.queue_length(), 0);
    assert!(!sim.is_in_motion());
    assert_eq!(sim.current_positions(), last_commit);

    tokio::time::sleep(ms(1000)).await;
    assert!(matches!(commits.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(sim.current_positions(), last_commit);

    // The second stop leaves nothing behind to cancel the next goal.
    sim.enqueue(Waypoint::new(vec![0.0, 0.0], ms(100))).await.unwrap();
    let seen = collect_until(&mut commits, &[0.0, 0.0]).await;
    assert_eq!(seen, vec![vec![0.0, 0.0]]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent_when_idle() {
    let sim = MotionSimulator::new(group(1), vec![0.5], settings(10)).unwrap();
    sim.stop();
    sim.stop();
    assert!(!sim.is_in_motion());
    assert_eq!(sim.current_positions(), vec![0.5]);

    // No stale stop signal is left behind for the next goal.
    let mut commits = sim.subscribe();
    sim.enqueue(Waypoint::new(vec![1.5], ms(20))).await.unwrap();
    let seen = collect_until(&mut commits, &[1.5]).await;
    assert_eq!(seen.len(), 2);
    assert_eq!(sim.current_positions(), vec![1.5]);
}

#[tokio::test(start_paused = true)]
async fn test_restart_uses_absolute_duration() {
    let sim = MotionSimulator::new(group(1), vec![0.0], settings(0)).unwrap();
    let mut commits = sim.subscribe();

    sim.enqueue(Waypoint::new(vec![1.0], ms(5000))).await.unwrap();
    collect_until(&mut commits, &[1.0]).await;

    // Earlier than the previous goal: a new trajectory lasting 1 s.
    let start = Instant::now();
    sim.enqueue(Waypoint::new(vec![2.0], ms(1000))).await.unwrap();
    collect_until(&mut commits, &[2.0]).await;
    let elapsed = start.elapsed();
    assert!(elapsed >= ms(1000) && elapsed < ms(1010), "elapsed {:?}", elapsed);

    // Later than the previous goal: relative delta of 2 s.
    let start = Instant::now();
    sim.enqueue(Waypoint::new(vec![3.0], ms(3000))).await.unwrap();
    collect_until(&mut commits, &[3.0]).await;
    let elapsed = start.elapsed();
    assert!(elapsed >= ms(2000) && elapsed < ms(2010), "elapsed {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_waypoints_execute_in_order() {
    let sim = MotionSimulator::new(group(1), vec![0.0], settings(0)).unwrap();
    let mut commits = sim.subscribe();
    for (i, t) in [100, 200, 300].into_iter().enumerate() {
        sim.enqueue(Waypoint::new(vec![i as f64 + 1.0], ms(t))).await.unwrap();
    }
    let seen = collect_until(&mut commits, &[3.0]).await;
    assert_eq!(seen, vec![vec![1.0], vec![2.0], vec![3.0]]);
}

#[tokio::test(start_paused = true)]
async fn test_enqueue_rejects_wrong_length() {
    let sim = MotionSimulator::new(group(3), vec![0.0; 3], settings(10)).unwrap();
    let err = assert_err!(sim.enqueue(Waypoint::new(vec![1.0], ms(100))).await);
    assert_eq!(err, MotionError::DimensionMismatch { expected: 3, actual: 1 });
    assert!(!sim.is_in_motion());
    assert_eq!(sim.current_positions().len(), sim.joint_count());
}

#[tokio::test]
async fn test_new_rejects_mismatched_initial_positions() {
    let result = MotionSimulator::new(group(2), vec![0.0], settings(10));
    assert!(matches!(result, Err(MotionError::DimensionMismatch { expected: 2, actual: 1 })));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_long_move() {
    let sim = MotionSimulator::new(group(2), vec![0.0, 0.0], settings(0)).unwrap();
    sim.enqueue(Waypoint::new(vec![1.0, 1.0], Duration::from_secs(60))).await.unwrap();
    tokio::time::sleep(ms(10)).await;

    let start = Instant::now();
    sim.join().await;
    assert!(start.elapsed() < ms(10));

    // Idempotent, and nothing further is accepted.
    sim.shutdown();
    sim.join().await;
    assert!(sim.is_shut_down());
    assert_eq!(
        sim.enqueue(Waypoint::new(vec![1.0, 1.0], ms(10))).await,
        Err(MotionError::Shutdown)
    );
    assert_eq!(sim.current_positions(), vec![0.0, 0.0]);
}

#[tokio::test(start_paused = true)]
async fn test_bounded_buffer_blocks_producer() {
    let sim = std::sync::Arc::new(
        MotionSimulator::new(
            group(1),
            vec![0.0],
            MotionSettings { update_period: Duration::ZERO, buffer_capacity: Some(1) },
        )
        .unwrap(),
    );
    sim.enqueue(Waypoint::new(vec![1.0], ms(100))).await.unwrap();
    // Let the worker take the first waypoint.
    tokio::time::sleep(ms(1)).await;
    sim.enqueue(Waypoint::new(vec![2.0], ms(200))).await.unwrap();

    let producer = {
        let sim = sim.clone();
        tokio::spawn(async move { sim.enqueue(Waypoint::new(vec![3.0], ms(300))).await })
    };
    tokio::time::sleep(ms(50)).await;
    assert!(!producer.is_finished());

    assert_ok!(producer.await.unwrap());
    let mut commits = sim.subscribe();
    collect_until(&mut commits, &[3.0]).await;
    assert!(!sim.is_in_motion());
}
