//! Capacity-weighted partitioning algorithms.

use gridway_core::{DistributionPlan, WorkItem};
use tracing::debug;

use crate::error::{PartitionError, PartitionResult};

/// At or below this many items the exact algorithm is the default.
pub const EXACT_ITEM_THRESHOLD: usize = 12;

/// Split `items` into one bucket per capacity slot.
///
/// Invariants: the output length equals `capacities.len()`, every item
/// lands in exactly one bucket, items are never subdivided, and the
/// result is deterministic for identical inputs (ties break toward the
/// lowest slot index).
pub fn partition(
    items: &[WorkItem],
    capacities: &[f64],
    use_exact: bool,
) -> PartitionResult<Vec<Vec<WorkItem>>> {
    validate(items, capacities)?;

    if items.is_empty() {
        return Ok(vec![Vec::new(); capacities.len()]);
    }

    let assignment = if use_exact {
        exact_assignment(items, capacities)
    } else {
        greedy_assignment(items, capacities)
    };

    let mut buckets: Vec<Vec<WorkItem>> = vec![Vec::new(); capacities.len()];
    for (item_idx, &slot) in assignment.iter().enumerate() {
        buckets[slot].push(items[item_idx].clone());
    }
    Ok(buckets)
}

/// Partition with the algorithm chosen by the item-count threshold.
pub fn partition_auto(
    items: &[WorkItem],
    capacities: &[f64],
) -> PartitionResult<Vec<Vec<WorkItem>>> {
    let use_exact = items.len() <= EXACT_ITEM_THRESHOLD;
    debug!(
        items = items.len(),
        slots = capacities.len(),
        algorithm = if use_exact { "exact" } else { "greedy" },
        "partitioning work"
    );
    partition(items, capacities, use_exact)
}

/// Build a full distribution plan: partition across worker slots, then
/// sub-partition each slot into `jobs_per_slot` equal-capacity sub-jobs
/// for pooled execution. `jobs_per_slot == 1` yields one sub-job per slot.
pub fn build_plan(
    items: &[WorkItem],
    capacities: &[f64],
    jobs_per_slot: usize,
) -> PartitionResult<DistributionPlan> {
    let buckets = partition_auto(items, capacities)?;
    let jobs = jobs_per_slot.max(1);
    let even = vec![1.0; jobs];

    let mut slots = Vec::with_capacity(buckets.len());
    for bucket in buckets {
        if jobs == 1 {
            slots.push(vec![bucket]);
        } else {
            slots.push(partition_auto(&bucket, &even)?);
        }
    }
    Ok(DistributionPlan { slots })
}

/// Maximum capacity-scaled load across slots for a finished partition.
pub fn makespan(buckets: &[Vec<WorkItem>], capacities: &[f64]) -> f64 {
    buckets
        .iter()
        .zip(capacities)
        .map(|(bucket, cap)| bucket.iter().map(|i| i.weight).sum::<f64>() / cap)
        .fold(0.0_f64, f64::max)
}

fn validate(items: &[WorkItem], capacities: &[f64]) -> PartitionResult<()> {
    if capacities.is_empty() {
        return Err(PartitionError::NoSlots);
    }
    for (idx, &cap) in capacities.iter().enumerate() {
        if !cap.is_finite() || cap <= 0.0 {
            return Err(PartitionError::BadCapacity(idx, cap));
        }
    }
    for item in items {
        if !item.weight.is_finite() || item.weight < 0.0 {
            return Err(PartitionError::BadWeight(item.label.clone(), item.weight));
        }
    }
    Ok(())
}

/// Item indices sorted by descending weight, input order on ties.
fn sorted_indices(items: &[WorkItem]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|&a, &b| {
        items[b]
            .weight
            .partial_cmp(&items[a].weight)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    order
}

/// Greedy list scheduling: each item goes to the slot with the smallest
/// projected load. O(n · k) with a linear scan per item.
fn greedy_assignment(items: &[WorkItem], capacities: &[f64]) -> Vec<usize> {
    let mut loads = vec![0.0_f64; capacities.len()];
    let mut assignment = vec![0_usize; items.len()];

    for &item_idx in &sorted_indices(items) {
        let weight = items[item_idx].weight;
        let mut best_slot = 0;
        let mut best_load = loads[0] + weight / capacities[0];
        for (slot, &load) in loads.iter().enumerate().skip(1) {
            let projected = load + weight / capacities[slot];
            // Strict comparison keeps ties on the lowest index.
            if projected < best_load {
                best_slot = slot;
                best_load = projected;
            }
        }
        loads[best_slot] = best_load;
        assignment[item_idx] = best_slot;
    }
    assignment
}

/// Branch-and-bound makespan minimization.
///
/// Items are placed largest-first; each recursion level tries every slot
/// for the next item, mutating the shared load vector in place and
/// undoing the move on backtrack (no per-branch copies). A branch is cut
/// when even the ideal fractional balance of its remaining weight cannot
/// beat the incumbent.
fn exact_assignment(items: &[WorkItem], capacities: &[f64]) -> Vec<usize> {
    let order = sorted_indices(items);
    let weights: Vec<f64> = order.iter().map(|&i| items[i].weight).collect();

    // Suffix sums: remaining raw weight from position i onward.
    let mut remaining = vec![0.0_f64; weights.len() + 1];
    for i in (0..weights.len()).rev() {
        remaining[i] = remaining[i + 1] + weights[i];
    }
    let total_capacity: f64 = capacities.iter().sum();

    // Greedy result seeds the incumbent so pruning starts effective.
    let greedy = greedy_assignment(items, capacities);
    let mut best_max = {
        let mut loads = vec![0.0_f64; capacities.len()];
        for (item_idx, &slot) in greedy.iter().enumerate() {
            loads[slot] += items[item_idx].weight / capacities[slot];
        }
        loads.iter().fold(0.0_f64, |a, &b| a.max(b))
    };
    let mut best: Vec<usize> = order.iter().map(|&i| greedy[i]).collect();

    struct Search<'a> {
        weights: &'a [f64],
        capacities: &'a [f64],
        remaining: &'a [f64],
        total_capacity: f64,
    }

    impl Search<'_> {
        fn descend(
            &self,
            pos: usize,
            loads: &mut Vec<f64>,
            current: &mut Vec<usize>,
            cur_max: f64,
            best_max: &mut f64,
            best: &mut Vec<usize>,
        ) {
            if pos == self.weights.len() {
                if cur_max < *best_max {
                    *best_max = cur_max;
                    best.clone_from(current);
                }
                return;
            }

            // Lower bound: even a perfect fractional spread of the
            // remaining weight cannot finish below this.
            let scaled_done: f64 = loads
                .iter()
                .zip(self.capacities)
                .map(|(l, c)| l * c)
                .sum();
            let ideal = (scaled_done + self.remaining[pos]) / self.total_capacity;
            if cur_max.max(ideal) >= *best_max {
                return;
            }

            let weight = self.weights[pos];
            for slot in 0..self.capacities.len() {
                // Slots with equal load and equal capacity are
                // interchangeable; trying the first is enough and keeps
                // tie-breaks on the lowest index.
                if loads[..slot]
                    .iter()
                    .zip(self.capacities)
                    .any(|(&l, &c)| l == loads[slot] && c == self.capacities[slot])
                {
                    continue;
                }

                let prev = loads[slot];
                loads[slot] = prev + weight / self.capacities[slot];
                current.push(slot);

                self.descend(pos + 1, loads, current, cur_max.max(loads[slot]), best_max, best);

                current.pop();
                loads[slot] = prev;
            }
        }
    }

    let search = Search {
        weights: &weights,
        capacities,
        remaining: &remaining,
        total_capacity,
    };
    let mut loads = vec![0.0_f64; capacities.len()];
    let mut current = Vec::with_capacity(weights.len());
    search.descend(0, &mut loads, &mut current, 0.0, &mut best_max, &mut best);

    // Map slot choices back from sorted order to input order.
    let mut assignment = vec![0_usize; items.len()];
    for (pos, &item_idx) in order.iter().enumerate() {
        assignment[item_idx] = best[pos];
    }
    assignment
}
