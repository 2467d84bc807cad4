//! 任务切分
//!
//! 只取前 `min(M, N*K)` 个任务，按连续块分给 N 个 worker。
//! 结果只依赖输入，不依赖运行时。

use crate::models::task::WorkerAssignment;

/// 切分任务
///
/// # 参数
/// - `task_ids`: 按处理顺序排列的任务编号
/// - `workers`: worker 数（0 按 1 处理）
/// - `cap`: 每个 worker 的任务上限，0 表示不限
///
/// # 返回
/// 长度恒为 `workers` 的分配表，任务少于 worker 时后面的切片为空
pub fn partition(task_ids: &[u64], workers: usize, cap: usize) -> Vec<WorkerAssignment> {
    let workers = workers.max(1);
    let bounded = if cap == 0 {
        task_ids.len()
    } else {
        task_ids.len().min(workers.saturating_mul(cap))
    };
    let subset = &task_ids[..bounded];

    let base = bounded / workers;
    let extra = bounded % workers;

    let mut assignments = Vec::with_capacity(workers);
    let mut start = 0;
    for worker_id in 0..workers {
        let len = base + usize::from(worker_id < extra);
        assignments.push(WorkerAssignment {
            worker_id,
            task_ids: subset[start..start + len].to_vec(),
        });
        start += len;
    }
    assignments
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn ids(n: u64) -> Vec<u64> {
        (1..=n).collect()
    }

    #[test]
    fn test_four_tasks_two_workers_cap_two() {
        let a = partition(&ids(4), 2, 2);
        assert_eq!(a[0].task_ids, vec![1, 2]);
        assert_eq!(a[1].task_ids, vec![3, 4]);
    }

    #[test]
    fn test_cap_bounds_the_subset() {
        let a = partition(&ids(10), 3, 2);
        let total: usize = a.iter().map(|w| w.task_ids.len()).sum();
        assert_eq!(total, 6);
        assert!(a.iter().all(|w| w.task_ids.len() == 2));
        assert_eq!(a[2].task_ids, vec![5, 6]);
    }

    #[test]
    fn test_union_is_subset_and_disjoint() {
        for m in 0..12u64 {
            for n in 1..5usize {
                for k in 0..4usize {
                    let a = partition(&ids(m), n, k);
                    assert_eq!(a.len(), n);

                    let expected = if k == 0 { m as usize } else { (m as usize).min(n * k) };
                    let mut seen = HashSet::new();
                    for w in &a {
                        if k > 0 {
                            assert!(w.task_ids.len() <= k);
                        }
                        for id in &w.task_ids {
                            assert!(seen.insert(*id), "任务 {} 被分配了两次", id);
                        }
                    }
                    let expected_ids: HashSet<u64> = ids(m).into_iter().take(expected).collect();
                    assert_eq!(seen, expected_ids);
                }
            }
        }
    }

    #[test]
    fn test_deterministic_and_ordered() {
        let a = partition(&ids(7), 3, 0);
        assert_eq!(a, partition(&ids(7), 3, 0));
        assert_eq!(a[0].task_ids, vec![1, 2, 3]);
        assert_eq!(a[1].task_ids, vec![4, 5]);
        assert_eq!(a[2].task_ids, vec![6, 7]);
    }

    #[test]
    fn test_zero_workers_treated_as_one() {
        let a = partition(&ids(3), 0, 0);
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].task_ids, vec![1, 2, 3]);
    }
}
