//! Island labeling and accelerator subset collection.
//!
//! An island is a maximal set of kernel tasks connected to each other without
//! passing through a CPU task. Labeling colors the task list; subset
//! collection then simulates scheduling to split each island into dispatch
//! groups that are ready together within one execution stack.

use std::collections::{BTreeSet, HashSet, VecDeque};

use anyhow::{bail, Result};

use crate::graph::{task_successors, CompiledTask, TaskId};

/// Color every kernel task with its island label. Label 0 means "not a
/// kernel task"; kernel labels are `first_visited_task_id + 1` so they are
/// always non-zero. An island never spans execution stacks, so the fill also
/// stops at stack boundaries. The flood fill walks both edge directions but
/// never steps back across the edge it just came from, which keeps two-task
/// cycles from ping-ponging.
pub fn label_islands(tasks: &[CompiledTask]) -> Vec<u32> {
    let successors = task_successors(tasks);
    let mut labels = vec![0u32; tasks.len()];

    for seed in tasks.iter().filter(|t| t.is_kernel()) {
        if labels[seed.id] != 0 {
            continue;
        }
        let label = seed.id as u32 + 1;
        let stack = seed.stack_index;
        let mut queue: VecDeque<(TaskId, Option<TaskId>)> = VecDeque::new();
        labels[seed.id] = label;
        queue.push_back((seed.id, None));

        while let Some((current, came_from)) = queue.pop_front() {
            let upstream = tasks[current].inputs.iter().map(|input| input.upstream);
            let downstream = successors
                .get(&current)
                .into_iter()
                .flatten()
                .copied();
            for neighbor in upstream.chain(downstream) {
                if Some(neighbor) == came_from {
                    continue;
                }
                if !tasks[neighbor].is_kernel() || labels[neighbor] != 0 {
                    continue;
                }
                if tasks[neighbor].stack_index != stack {
                    continue;
                }
                labels[neighbor] = label;
                queue.push_back((neighbor, Some(current)));
            }
        }
    }

    labels
}

/// Split the labeled graph into dispatch subsets by simulating scheduling:
/// drain every ready CPU task, then lock onto one ready (island, stack) pair
/// and drain kernel tasks for it until none are ready, alternating until the
/// graph is consumed. Subset order within a group is ready order, which is a
/// valid execution order for the kernels.
pub fn collect_gpu_subsets(
    tasks: &[CompiledTask],
    labels: &[u32],
) -> Result<Vec<Vec<TaskId>>> {
    let successors = task_successors(tasks);

    let mut remaining: Vec<usize> = tasks
        .iter()
        .map(|task| {
            task.inputs
                .iter()
                .map(|input| input.upstream)
                .collect::<HashSet<_>>()
                .len()
        })
        .collect();

    let mut ready: BTreeSet<TaskId> = tasks
        .iter()
        .filter(|task| remaining[task.id] == 0)
        .map(|task| task.id)
        .collect();

    let mut subsets: Vec<Vec<TaskId>> = Vec::new();
    let mut consumed = 0usize;

    let mut finish = |id: TaskId,
                      ready: &mut BTreeSet<TaskId>,
                      remaining: &mut Vec<usize>,
                      consumed: &mut usize| {
        *consumed += 1;
        for &successor in successors.get(&id).into_iter().flatten() {
            remaining[successor] -= 1;
            if remaining[successor] == 0 {
                ready.insert(successor);
            }
        }
    };

    while consumed < tasks.len() {
        let before = consumed;

        loop {
            let cpu_ready: Vec<TaskId> = ready
                .iter()
                .copied()
                .filter(|&id| !tasks[id].is_kernel())
                .collect();
            if cpu_ready.is_empty() {
                break;
            }
            for id in cpu_ready {
                ready.remove(&id);
                finish(id, &mut ready, &mut remaining, &mut consumed);
            }
        }

        let seed = ready.iter().copied().find(|&id| tasks[id].is_kernel());
        if let Some(seed) = seed {
            let key = (labels[seed], tasks[seed].stack_index);
            let mut subset: Vec<TaskId> = Vec::new();
            loop {
                let group: Vec<TaskId> = ready
                    .iter()
                    .copied()
                    .filter(|&id| {
                        tasks[id].is_kernel()
                            && (labels[id], tasks[id].stack_index) == key
                    })
                    .collect();
                if group.is_empty() {
                    break;
                }
                for id in group {
                    ready.remove(&id);
                    subset.push(id);
                    finish(id, &mut ready, &mut remaining, &mut consumed);
                }
            }
            subsets.push(subset);
        }

        if consumed == before {
            bail!(
                "scheduling stalled with {} of {} tasks unconsumed (cycle or inconsistent edges)",
                tasks.len() - consumed,
                tasks.len()
            );
        }
    }

    Ok(subsets)
}
