use std::time::Duration;
use super::types::{BatchStatus, ItemStatus, QueueStats, UploadBatch};

impl QueueStats {
    /// Aggregate over the current registry
    pub fn from_batches<'a>(batches: impl IntoIterator<Item = &'a UploadBatch>) -> Self {
        let mut stats = QueueStats::default();
        let mut durations = Vec::new();

        for batch in batches {
            stats.total_batches += 1;
            match batch.status {
                BatchStatus::Queued => stats.queued_batches += 1,
                BatchStatus::Active => stats.active_batches += 1,
                BatchStatus::Completed => {
                    stats.completed_batches += 1;
                    if let Some(duration) = batch.duration() {
                        durations.push(duration);
                    }
                }
                BatchStatus::Failed => stats.failed_batches += 1,
                BatchStatus::Cancelled => stats.cancelled_batches += 1,
            }

            for item in &batch.items {
                stats.total_items += 1;
                match item.status {
                    ItemStatus::Queued => stats.queued_items += 1,
                    ItemStatus::Compressing | ItemStatus::Uploading => stats.active_items += 1,
                    ItemStatus::Completed => stats.uploaded_items += 1,
                    ItemStatus::Failed => stats.failed_items += 1,
                    ItemStatus::Cancelled => stats.cancelled_items += 1,
                }
            }
        }

        if !durations.is_empty() {
            let total: Duration = durations.iter().sum();
            stats.average_upload_time = total / durations.len() as u32;
        }

        stats
    }

    /// Every batch and every item sits in exactly one bucket
    pub fn is_consistent(&self) -> bool {
        let batches = self.queued_batches
            + self.active_batches
            + self.completed_batches
            + self.failed_batches
            + self.cancelled_batches;
        let items = self.queued_items
            + self.active_items
            + self.uploaded_items
            + self.failed_items
            + self.cancelled_items;

        batches == self.total_batches && items == self.total_items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use chrono::{TimeDelta, Utc};
    use crate::core::types::{BatchId, FileInfo, UploadItem};

    fn batch(statuses: &[ItemStatus], secs: i64) -> UploadBatch {
        let items = statuses
            .iter()
            .map(|status| {
                let mut item = UploadItem::new(FileInfo {
                    name: "a.jpg".to_string(),
                    media_type: "image/jpeg".to_string(),
                    size: 1,
                });
                item.status = *status;
                item
            })
            .collect::<Vec<_>>();
        let status = BatchStatus::derive(statuses.iter());
        let started = Utc::now();

        UploadBatch {
            id: BatchId::new(),
            entity_id: "f1".to_string(),
            entity_name: "Site A".to_string(),
            metadata: HashMap::new(),
            items,
            status,
            created_at: started,
            started_at: Some(started),
            completed_at: status.is_terminal().then(|| started + TimeDelta::seconds(secs)),
        }
    }

    #[test]
    fn test_counts_and_identity() {
        use ItemStatus::*;

        let batches = vec![
            batch(&[Queued, Queued], 0),
            batch(&[Uploading, Queued], 0),
            batch(&[Completed, Failed], 2),
            batch(&[Failed], 1),
            batch(&[Completed, Cancelled], 1),
        ];
        let stats = QueueStats::from_batches(&batches);

        assert_eq!(stats.total_batches, 5);
        assert_eq!(stats.queued_batches, 1);
        assert_eq!(stats.active_batches, 1);
        assert_eq!(stats.completed_batches, 1);
        assert_eq!(stats.failed_batches, 1);
        assert_eq!(stats.cancelled_batches, 1);
        assert_eq!(stats.total_items, 8);
        assert_eq!(stats.uploaded_items, 2);
        assert_eq!(stats.active_items, 1);
        assert!(stats.is_consistent());
    }

    #[test]
    fn test_average_over_completed_batches() {
        use ItemStatus::*;

        let batches = vec![batch(&[Completed], 2), batch(&[Completed], 4), batch(&[Failed], 100)];
        let stats = QueueStats::from_batches(&batches);

        assert_eq!(stats.average_upload_time, Duration::from_secs(3));
    }

    #[test]
    fn test_empty_registry() {
        let stats = QueueStats::from_batches(std::iter::empty());
        assert_eq!(stats, QueueStats::default());
        assert!(stats.is_consistent());
    }
}
