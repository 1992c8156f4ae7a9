use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Process-wide minimum-interval gate for outbound requests.
///
/// Every fetch reserves a start slot before hitting the network: the slot
/// is the later of "now" and the previous reservation, and the next slot
/// is pushed `min_gap` past it. Reservation happens under a `tokio::sync`
/// mutex, whose FIFO wakeups give waiters their slots in arrival order.
///
/// The gap is supplied per call because discovery probes run at twice the
/// standard spacing.
#[derive(Debug, Default)]
pub struct RequestGate {
    next_start: Mutex<Option<Instant>>,
}

impl RequestGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps until this caller's reserved start slot.
    ///
    /// Returns immediately when the gate is idle and the previous start is
    /// at least `min_gap` in the past.
    pub async fn wait(&self, min_gap: Duration) {
        let reserved = {
            let mut slot = self.next_start.lock().await;
            let now = Instant::now();
            let at = match *slot {
                Some(t) if t > now => t,
                _ => now,
            };
            *slot = Some(at + min_gap);
            at
        };
        tokio::time::sleep_until(reserved).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sequential_starts_are_spaced() {
        let gate = RequestGate::new();
        let gap = Duration::from_millis(100);

        let t0 = Instant::now();
        gate.wait(gap).await;
        let first = Instant::now();
        gate.wait(gap).await;
        let second = Instant::now();
        gate.wait(gap).await;
        let third = Instant::now();

        // First caller passes immediately
        assert_eq!(first, t0);
        assert!(second - first >= gap);
        assert!(third - second >= gap);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_gate_does_not_delay() {
        let gate = RequestGate::new();
        let gap = Duration::from_millis(100);

        gate.wait(gap).await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        let before = Instant::now();
        gate.wait(gap).await;
        assert_eq!(Instant::now(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waiters_each_get_a_slot() {
        use std::sync::Arc;

        let gate = Arc::new(RequestGate::new());
        let gap = Duration::from_millis(100);

        let mut handles = Vec::new();
        for _ in 0..5 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move {
                gate.wait(gap).await;
                Instant::now()
            }));
        }

        let mut starts = Vec::new();
        for handle in handles {
            starts.push(handle.await.unwrap());
        }
        starts.sort();

        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= gap, "starts closer than min gap");
        }
    }
}
