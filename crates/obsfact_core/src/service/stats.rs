//! Completion statistics per category and per visit.
//!
//! Counters live inside the working set and are adjusted on every mutation,
//! so reading stats never rescans values.

use crate::service::working_set::WorkingSet;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Filled/total counts for a group of concepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompletionStats {
    pub total: u32,
    pub filled: u32,
    /// `round(filled / total * 100)`, `0` when `total == 0`.
    pub percentage: u8,
}

impl CompletionStats {
    pub fn new(total: u32, filled: u32) -> Self {
        let percentage = if total == 0 {
            0
        } else {
            ((f64::from(filled) / f64::from(total)) * 100.0).round() as u8
        };
        Self {
            total,
            filled,
            percentage,
        }
    }
}

/// Full scan over an explicit concept list.
///
/// Reference computation for ad hoc groups; tracked categories should be
/// read through `WorkingSet::category_stats`.
pub fn compute_category_stats<S: AsRef<str>>(
    working_set: &WorkingSet,
    concept_codes: &[S],
) -> CompletionStats {
    let mut seen = HashSet::new();
    let mut total = 0;
    let mut filled = 0;
    for code in concept_codes {
        let code = code.as_ref();
        if !seen.insert(code) {
            continue;
        }
        total += 1;
        if working_set.is_filled(code) {
            filled += 1;
        }
    }
    CompletionStats::new(total, filled)
}

#[derive(Debug, Clone)]
struct CategoryCounter {
    name: String,
    concepts: Vec<String>,
    filled: u32,
}

/// Incremental counters for tracked categories.
#[derive(Debug, Clone, Default)]
pub(crate) struct CompletionTracker {
    categories: Vec<CategoryCounter>,
    index: HashMap<String, usize>,
    membership: HashMap<String, Vec<usize>>,
    total_sum: u32,
    filled_sum: u32,
}

impl CompletionTracker {
    /// Starts (or restarts) tracking `category` with the given concepts.
    ///
    /// `filled` holds the current fill state of each concept; this is the only
    /// place counters are seeded from a scan.
    pub(crate) fn track(&mut self, category: &str, concepts: Vec<(String, bool)>) {
        let mut seen = HashSet::new();
        let concepts: Vec<(String, bool)> = concepts
            .into_iter()
            .filter(|(code, _)| seen.insert(code.clone()))
            .collect();
        let filled = concepts.iter().filter(|(_, is_filled)| *is_filled).count() as u32;
        let codes: Vec<String> = concepts.into_iter().map(|(code, _)| code).collect();

        let slot = match self.index.get(category) {
            Some(&slot) => {
                let previous = &self.categories[slot];
                self.total_sum -= previous.concepts.len() as u32;
                self.filled_sum -= previous.filled;
                for code in &previous.concepts {
                    if let Some(slots) = self.membership.get_mut(code) {
                        slots.retain(|candidate| *candidate != slot);
                    }
                }
                slot
            }
            None => {
                self.categories.push(CategoryCounter {
                    name: category.to_string(),
                    concepts: Vec::new(),
                    filled: 0,
                });
                let slot = self.categories.len() - 1;
                self.index.insert(category.to_string(), slot);
                slot
            }
        };

        for code in &codes {
            self.membership.entry(code.clone()).or_default().push(slot);
        }
        self.total_sum += codes.len() as u32;
        self.filled_sum += filled;
        let counter = &mut self.categories[slot];
        counter.concepts = codes;
        counter.filled = filled;
    }

    /// Applies one concept's fill-state transition.
    pub(crate) fn record_change(&mut self, concept_code: &str, was_filled: bool, now_filled: bool) {
        if was_filled == now_filled {
            return;
        }
        let Some(slots) = self.membership.get(concept_code) else {
            return;
        };
        for &slot in slots {
            let counter = &mut self.categories[slot];
            if now_filled {
                counter.filled += 1;
                self.filled_sum += 1;
            } else {
                counter.filled -= 1;
                self.filled_sum -= 1;
            }
        }
    }

    pub(crate) fn category_stats(&self, category: &str) -> Option<CompletionStats> {
        let counter = &self.categories[*self.index.get(category)?];
        Some(CompletionStats::new(
            counter.concepts.len() as u32,
            counter.filled,
        ))
    }

    /// Sums over all tracked categories; a concept in two categories counts twice.
    pub(crate) fn overall_stats(&self) -> CompletionStats {
        CompletionStats::new(self.total_sum, self.filled_sum)
    }

    pub(crate) fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(|counter| counter.name.as_str())
    }

    pub(crate) fn category_concepts(&self, category: &str) -> Option<&[String]> {
        let slot = *self.index.get(category)?;
        Some(self.categories[slot].concepts.as_slice())
    }
}
