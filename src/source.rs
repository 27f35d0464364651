use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use ffmpeg_dual::{input::FragmentInput, router::StreamRouter};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::InputConfig;

// delivered fragments carry no type information in replay
const TYPE_TAG_VIDEO: u8 = 0;

/// Fragment counts of one finished replay.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub fragments: u64,
    pub presented: u64,
}

/// Holds back delivery so fragments arrive at the pace of their timestamps.
struct Pacer {
    origin: Option<(Instant, i64)>,
}

impl Pacer {
    fn new() -> Self {
        Self { origin: None }
    }

    /// Time left before a fragment stamped `timestamp_ms` is due.
    fn delay(&mut self, timestamp_ms: i64, now: Instant) -> Duration {
        let (start, first) = *self.origin.get_or_insert((now, timestamp_ms));
        let offset = u64::try_from(timestamp_ms - first).unwrap_or(0);
        (start + Duration::from_millis(offset)).saturating_duration_since(now)
    }
}

/// Replays one input into the router on a blocking thread until the input
/// ends or `cancel` fires.
pub fn spawn_replay(
    input: InputConfig,
    router: Arc<StreamRouter>,
    cancel: CancellationToken,
) -> JoinHandle<anyhow::Result<ReplaySummary>> {
    tokio::task::spawn_blocking(move || {
        let mut reader = FragmentInput::open(&input.path)?;
        let mut pacer = Pacer::new();
        let mut summary = ReplaySummary::default();

        log::info!(
            "replaying {} as stream {} ({}), codec: {:?}, realtime: {}",
            input.path,
            input.stream_id,
            input.label(),
            reader.codec_id(),
            input.realtime
        );

        while !cancel.is_cancelled() {
            let Some(fragment) = reader.read_fragment() else {
                log::info!("end of input {}", input.path);
                break;
            };

            if input.realtime {
                let delay = pacer.delay(fragment.timestamp_ms, Instant::now());
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
            }

            summary.fragments += 1;
            summary.presented += router.deliver(
                &fragment.data,
                fragment.data.len(),
                fragment.timestamp_ms,
                input.stream_id,
                TYPE_TAG_VIDEO,
            ) as u64;
        }

        log::info!(
            "replay of {} finished, fragments: {}, presented: {}",
            input.path,
            summary.fragments,
            summary.presented
        );
        Ok(summary)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pacer_first_fragment_is_due() {
        let mut pacer = Pacer::new();
        assert_eq!(pacer.delay(1_000, Instant::now()), Duration::ZERO);
    }

    #[test]
    fn test_pacer_follows_timestamps() {
        let mut pacer = Pacer::new();
        let start = Instant::now();
        pacer.delay(1_000, start);

        assert_eq!(pacer.delay(1_040, start), Duration::from_millis(40));
        assert_eq!(
            pacer.delay(1_080, start + Duration::from_millis(30)),
            Duration::from_millis(50)
        );
        // late fragments go out at once
        assert_eq!(
            pacer.delay(1_120, start + Duration::from_millis(500)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_pacer_ignores_backwards_timestamps() {
        let mut pacer = Pacer::new();
        let start = Instant::now();
        pacer.delay(1_000, start);
        assert_eq!(pacer.delay(900, start), Duration::ZERO);
    }
}
