//! Task Statistics

use std::collections::BTreeMap;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

use super::model::{Priority, Task};
use crate::execution::context::RunStatus;

/// Aggregate view over a set of tasks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatistics {
    pub total: usize,
    /// Every status, including zero counts
    pub by_status: BTreeMap<RunStatus, usize>,
    /// Every priority, including zero counts
    pub by_priority: BTreeMap<Priority, usize>,
    pub completed_today: usize,
    /// Mean seconds from start to completion, rounded
    pub average_duration_secs: i64,
    /// completed / (completed + failed) as a rounded percent
    pub success_rate: u8,
}

impl TaskStatistics {
    /// Computes statistics; `day_start` bounds `completed_today`.
    pub fn from_tasks(tasks: &[Task], day_start: DateTime<Utc>) -> Self {
        let mut by_status: BTreeMap<RunStatus, usize> =
            RunStatus::ALL.iter().map(|s| (*s, 0)).collect();
        let mut by_priority: BTreeMap<Priority, usize> =
            Priority::ALL.iter().map(|p| (*p, 0)).collect();

        for task in tasks {
            *by_status.entry(task.status).or_default() += 1;
            *by_priority.entry(task.priority).or_default() += 1;
        }

        let completed: Vec<&Task> = tasks
            .iter()
            .filter(|t| t.status == RunStatus::Completed)
            .collect();

        let completed_today = completed
            .iter()
            .filter(|t| t.completed_at.map_or(false, |at| at >= day_start))
            .count();

        let durations: Vec<i64> = completed
            .iter()
            .filter_map(|t| match (t.started_at, t.completed_at) {
                (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
                _ => None,
            })
            .collect();
        let average_duration_secs = if durations.is_empty() {
            0
        } else {
            let total_ms: i64 = durations.iter().sum();
            (total_ms as f64 / durations.len() as f64 / 1000.0).round() as i64
        };

        let failed = by_status[&RunStatus::Failed];
        let finished = completed.len() + failed;
        let success_rate = if finished == 0 {
            0
        } else {
            (completed.len() as f64 / finished as f64 * 100.0).round() as u8
        };

        Self {
            total: tasks.len(),
            by_status,
            by_priority,
            completed_today,
            average_duration_secs,
            success_rate,
        }
    }
}

/// Start of the current local day, in UTC.
pub fn local_midnight() -> DateTime<Utc> {
    let now = Local::now();
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| midnight.and_local_timezone(Local).earliest())
        .map(|midnight| midnight.with_timezone(&Utc))
        .unwrap_or_else(|| now.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::model::{Goal, TaskOptions};
    use chrono::Duration;

    fn finished(status: RunStatus, secs: i64, now: DateTime<Utc>) -> Task {
        let mut task = Task::new(Goal::new("g"), vec![], TaskOptions::default());
        task.status = status;
        task.started_at = Some(now - Duration::seconds(secs));
        task.completed_at = Some(now);
        task
    }

    #[test]
    fn test_average_duration() {
        let now = Utc::now();
        let tasks = vec![
            finished(RunStatus::Completed, 10, now),
            finished(RunStatus::Completed, 20, now),
            finished(RunStatus::Completed, 30, now),
        ];
        let stats = TaskStatistics::from_tasks(&tasks, now - Duration::hours(1));
        assert_eq!(stats.average_duration_secs, 20);
        assert_eq!(stats.completed_today, 3);
        assert_eq!(stats.success_rate, 100);
    }

    #[test]
    fn test_success_rate_rounds() {
        let now = Utc::now();
        let tasks = vec![
            finished(RunStatus::Completed, 1, now),
            finished(RunStatus::Completed, 1, now),
            finished(RunStatus::Failed, 1, now),
            finished(RunStatus::Cancelled, 1, now),
        ];
        let stats = TaskStatistics::from_tasks(&tasks, now);
        assert_eq!(stats.success_rate, 67);
        assert_eq!(stats.by_status[&RunStatus::Cancelled], 1);
    }

    #[test]
    fn test_empty_statistics() {
        let stats = TaskStatistics::from_tasks(&[], Utc::now());
        assert_eq!(stats.total, 0);
        assert_eq!(stats.success_rate, 0);
        assert_eq!(stats.average_duration_secs, 0);
        assert_eq!(stats.by_status.len(), RunStatus::ALL.len());
        assert_eq!(stats.by_priority[&Priority::Medium], 0);
    }

    #[test]
    fn test_completed_before_today_not_counted() {
        let now = Utc::now();
        let mut old = finished(RunStatus::Completed, 5, now);
        old.completed_at = Some(now - Duration::days(2));
        old.started_at = Some(now - Duration::days(2) - Duration::seconds(5));
        let stats = TaskStatistics::from_tasks(&[old], now - Duration::days(1));
        assert_eq!(stats.completed_today, 0);
        assert_eq!(stats.average_duration_secs, 5);
    }

    #[test]
    fn test_local_midnight_is_not_in_future() {
        assert!(local_midnight() <= Utc::now());
    }

    #[test]
    fn test_statistics_serialize() {
        let stats = TaskStatistics::from_tasks(&[], Utc::now());
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["by_status"]["completed"], 0);
        assert_eq!(json["by_priority"]["3"], 0);
    }
}
