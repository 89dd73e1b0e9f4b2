use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Progress callback handed to an [`UploadEndpoint`](super::UploadEndpoint)
///
/// Converts byte counts into whole percentages and only forwards a value
/// when it is strictly larger than the last one forwarded, so the receiver
/// sees a non-decreasing sequence even across retried attempts.
#[derive(Clone)]
pub struct ProgressSink {
    total_bytes: u64,
    last_percent: Arc<AtomicU8>,
    notify: Arc<dyn Fn(u8) + Send + Sync>,
}

impl ProgressSink {
    pub fn new<F>(total_bytes: u64, notify: F) -> Self
    where
        F: Fn(u8) + Send + Sync + 'static,
    {
        Self {
            total_bytes,
            last_percent: Arc::new(AtomicU8::new(0)),
            notify: Arc::new(notify),
        }
    }

    /// A sink that drops every update
    pub fn discard(total_bytes: u64) -> Self {
        Self::new(total_bytes, |_| {})
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Report the number of bytes handed to the transport so far
    pub fn update(&self, bytes_sent: u64) {
        let percent = if self.total_bytes == 0 {
            100
        } else {
            (bytes_sent.min(self.total_bytes) * 100 / self.total_bytes) as u8
        };

        let previous = self.last_percent.fetch_max(percent, Ordering::AcqRel);
        if percent > previous {
            (self.notify)(percent);
        }
    }

    pub fn last_percent(&self) -> u8 {
        self.last_percent.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressSink")
            .field("total_bytes", &self.total_bytes)
            .field("last_percent", &self.last_percent())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_progress_is_monotonic() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            ProgressSink::new(200, move |p| seen.lock().unwrap().push(p))
        };

        sink.update(50);
        sink.update(50);
        sink.update(20);
        sink.update(200);
        sink.update(400);

        assert_eq!(*seen.lock().unwrap(), vec![25, 100]);
        assert_eq!(sink.last_percent(), 100);
    }

    #[test]
    fn test_clones_share_high_water_mark() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            ProgressSink::new(10, move |p| seen.lock().unwrap().push(p))
        };
        let retry = sink.clone();

        sink.update(6);
        retry.update(3);
        retry.update(9);

        assert_eq!(*seen.lock().unwrap(), vec![60, 90]);
    }
}
