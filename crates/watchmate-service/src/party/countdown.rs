//! Countdown sequencing.
//!
//! A sequence is `idle -> 3 -> 2 -> 1 -> 0 -> idle`. The first value is
//! produced synchronously by [`CountdownSequencer::start`]; the rest come from
//! a timer task that posts `(generation, value)` ticks back into the owning
//! room's mailbox, so ticks are applied in order with every other room event.
//!
//! Starting a new sequence cancels the previous timer and bumps the
//! generation. Ticks from an older generation that were already queued are
//! discarded by [`CountdownSequencer::on_tick`].

use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// First value of every sequence.
pub const COUNTDOWN_START: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountdownState {
    #[default]
    Idle,
    Counting(u8),
}

/// Per-room countdown schedule.
#[derive(Debug)]
pub struct CountdownSequencer {
    state: CountdownState,
    generation: u64,
    timer: Option<CancellationToken>,
    tick: Duration,
}

impl CountdownSequencer {
    #[must_use]
    pub fn new(tick: Duration) -> Self {
        Self {
            state: CountdownState::Idle,
            generation: 0,
            timer: None,
            tick,
        }
    }

    #[must_use]
    pub fn state(&self) -> CountdownState {
        self.state
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state == CountdownState::Idle
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Start a sequence, superseding any sequence in flight.
    ///
    /// The timer task holds only a weak sender so it never keeps a closed room
    /// alive, and stops on `parent` cancellation. Returns the first value,
    /// which the caller broadcasts immediately.
    pub fn start<T, F>(
        &mut self,
        parent: &CancellationToken,
        mailbox: mpsc::WeakSender<T>,
        make_tick: F,
    ) -> u8
    where
        T: Send + 'static,
        F: Fn(u64, u8) -> T + Send + 'static,
    {
        self.cancel();

        self.generation += 1;
        self.state = CountdownState::Counting(COUNTDOWN_START);

        let token = parent.child_token();
        self.timer = Some(token.clone());

        let generation = self.generation;
        let tick = self.tick;
        tokio::spawn(async move {
            for value in (0..COUNTDOWN_START).rev() {
                tokio::select! {
                    () = token.cancelled() => return,
                    () = tokio::time::sleep(tick) => {}
                }

                let Some(sender) = mailbox.upgrade() else {
                    return;
                };
                if sender.send(make_tick(generation, value)).await.is_err() {
                    return;
                }
            }
            debug!(target: "wm.actor.room", generation, "Countdown timer finished");
        });

        COUNTDOWN_START
    }

    /// Apply a tick from the timer.
    ///
    /// Returns the value to broadcast, or `None` for a stale tick. After the
    /// final value (0) the sequencer is idle again.
    pub fn on_tick(&mut self, generation: u64, value: u8) -> Option<u8> {
        if generation != self.generation || self.is_idle() {
            return None;
        }

        if value == 0 {
            self.state = CountdownState::Idle;
            self.timer = None;
        } else {
            self.state = CountdownState::Counting(value);
        }
        Some(value)
    }

    /// Stop any sequence in flight.
    pub fn cancel(&mut self) {
        if let Some(token) = self.timer.take() {
            token.cancel();
        }
        self.state = CountdownState::Idle;
    }
}

impl Drop for CountdownSequencer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    const TICK: Duration = Duration::from_millis(1000);

    #[tokio::test(start_paused = true)]
    async fn test_ticks_arrive_in_order_one_tick_apart() {
        let root = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel::<(u64, u8)>(8);
        let mut sequencer = CountdownSequencer::new(TICK);

        let started = Instant::now();
        let first = sequencer.start(&root, tx.downgrade(), |g, v| (g, v));
        assert_eq!(first, 3);
        assert_eq!(sequencer.state(), CountdownState::Counting(3));

        for (i, expected) in [2u8, 1, 0].into_iter().enumerate() {
            let (generation, value) = rx.recv().await.unwrap();
            assert_eq!(value, expected);
            assert_eq!(sequencer.on_tick(generation, value), Some(expected));
            let expected_at = TICK * (i as u32 + 1);
            let elapsed = started.elapsed();
            assert!(
                elapsed >= expected_at && elapsed < expected_at + Duration::from_millis(50),
                "tick {expected} at {elapsed:?}, expected ~{expected_at:?}"
            );
        }

        assert!(sequencer.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_supersedes_previous_sequence() {
        let root = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel::<(u64, u8)>(8);
        let mut sequencer = CountdownSequencer::new(TICK);

        sequencer.start(&root, tx.downgrade(), |g, v| (g, v));
        tokio::time::sleep(TICK / 2).await;
        sequencer.start(&root, tx.downgrade(), |g, v| (g, v));

        let mut delivered = Vec::new();
        while delivered.len() < 3 {
            let (generation, value) = rx.recv().await.unwrap();
            if let Some(v) = sequencer.on_tick(generation, value) {
                delivered.push(v);
            }
        }

        assert_eq!(delivered, [2, 1, 0]);
        assert_eq!(sequencer.generation(), 2);
    }

    #[tokio::test]
    async fn test_stale_tick_is_discarded() {
        let root = CancellationToken::new();
        let (tx, _rx) = mpsc::channel::<(u64, u8)>(8);
        let mut sequencer = CountdownSequencer::new(TICK);

        sequencer.start(&root, tx.downgrade(), |g, v| (g, v));
        sequencer.start(&root, tx.downgrade(), |g, v| (g, v));

        assert_eq!(sequencer.on_tick(1, 2), None);
        assert_eq!(sequencer.state(), CountdownState::Counting(3));
        assert_eq!(sequencer.on_tick(2, 2), Some(2));
    }

    #[tokio::test]
    async fn test_tick_while_idle_is_discarded() {
        let mut sequencer = CountdownSequencer::new(TICK);
        assert_eq!(sequencer.on_tick(0, 2), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancellation_stops_timer() {
        let root = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel::<(u64, u8)>(8);
        let mut sequencer = CountdownSequencer::new(TICK);

        sequencer.start(&root, tx.downgrade(), |g, v| (g, v));
        root.cancel();
        drop(tx);

        // The timer exits without posting, so the channel closes empty.
        assert!(rx.recv().await.is_none());
    }
}
