//! Recurring background tasks.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Run `task` every `period` until the runtime shuts down.
///
/// The first run happens one period after spawning. A run that overlaps
/// the next tick delays the schedule instead of bursting to catch up.
pub fn spawn_recurring<F, Fut>(name: &'static str, period: Duration, mut task: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!(task = name, "Scheduled every {:?}", period);

        loop {
            ticker.tick().await;
            task().await;
        }
    })
}
