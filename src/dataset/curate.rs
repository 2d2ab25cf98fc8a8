//! Stratified question curation.
//!
//! Selects a target-sized, balanced subset from a larger pool:
//! near-duplicate clusters are capped, the remainder is split into five
//! 20-point probability bands sampled evenly, any shortfall is filled from
//! the unselected items (highest relevance first), and the result is
//! shuffled. All randomness comes from the caller's RNG, so a fixed seed
//! gives a fixed selection.

use rand::seq::{index, SliceRandom};
use rand::Rng;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

use crate::types::{EvalItem, Topic};

/// Number of 20-point probability bands.
const BAND_COUNT: usize = 5;

/// Band labels, lowest first.
const BAND_LABELS: [&str; BAND_COUNT] = ["0-20%", "20-40%", "40-60%", "60-80%", "80-100%"];

/// Band index (0..5) of a 0–100 probability.
pub fn probability_band(market_probability: f64) -> usize {
    let p = market_probability.clamp(0.0, 100.0);
    ((p / 20.0).floor() as usize).min(BAND_COUNT - 1)
}

/// Item count per 20-point band, every band present.
pub fn band_distribution(items: &[EvalItem]) -> BTreeMap<String, usize> {
    let mut counts: BTreeMap<String, usize> =
        BAND_LABELS.iter().map(|l| (l.to_string(), 0)).collect();
    for item in items {
        let label = BAND_LABELS[probability_band(item.question.market_probability)];
        *counts.entry(label.to_string()).or_default() += 1;
    }
    counts
}

// ---------------------------------------------------------------------------
// Near-duplicate rules
// ---------------------------------------------------------------------------

/// A low-information question cluster. A question belongs to the cluster
/// when, for every group, its lower-cased text contains one of the group's
/// phrases.
#[derive(Debug, Clone, PartialEq)]
pub struct NearDuplicateRule {
    pub name: String,
    pub all_of: Vec<Vec<String>>,
}

impl NearDuplicateRule {
    pub fn new(name: impl Into<String>, all_of: &[&[&str]]) -> Self {
        Self {
            name: name.into(),
            all_of: all_of
                .iter()
                .map(|group| group.iter().map(|p| p.to_lowercase()).collect())
                .collect(),
        }
    }

    /// Narrow F1 finishing-position questions ("Will X finish fourth in the
    /// F1 drivers championship?"), which recur for every driver and place.
    pub fn f1_finishing_position() -> Self {
        Self::new(
            "f1_finishing_position",
            &[&["fourth", "fifth"], &["f1", "drivers championship"]],
        )
    }

    pub fn matches(&self, question: &str) -> bool {
        let q = question.to_lowercase();
        !self.all_of.is_empty()
            && self.all_of.iter().all(|group| group.iter().any(|p| q.contains(p.as_str())))
    }
}

// ---------------------------------------------------------------------------
// Curator
// ---------------------------------------------------------------------------

/// Stratified sampler over categorized questions.
#[derive(Debug, Clone)]
pub struct Curator {
    rules: Vec<NearDuplicateRule>,
    diversify_topics: bool,
}

impl Default for Curator {
    fn default() -> Self {
        Self::new(vec![NearDuplicateRule::f1_finishing_position()], false)
    }
}

impl Curator {
    pub fn new(rules: Vec<NearDuplicateRule>, diversify_topics: bool) -> Self {
        Self { rules, diversify_topics }
    }

    /// Balance topics inside each probability band as well.
    pub fn with_topic_diversity(mut self, on: bool) -> Self {
        self.diversify_topics = on;
        self
    }

    /// Select up to `target_count` distinct items from `pool`.
    ///
    /// The result holds `min(target_count, |pool after dedup and cap|)`
    /// items, never repeats an id, and never holds more than
    /// `near_duplicate_cap` items from any near-duplicate cluster.
    pub fn select<R: Rng + ?Sized>(
        &self,
        pool: &[EvalItem],
        target_count: usize,
        near_duplicate_cap: usize,
        rng: &mut R,
    ) -> Vec<EvalItem> {
        // Unique by id, first occurrence wins.
        let mut seen = HashSet::new();
        let unique: Vec<&EvalItem> = pool.iter().filter(|i| seen.insert(i.id())).collect();

        // 1. Cap near-duplicate clusters.
        let eligible = self.cap_near_duplicates(&unique, near_duplicate_cap, rng);

        // 2. Partition into probability bands.
        let mut bands: Vec<Vec<usize>> = vec![Vec::new(); BAND_COUNT];
        for &idx in &eligible {
            bands[probability_band(unique[idx].question.market_probability)].push(idx);
        }

        // 3. Even share per band.
        let target_per_band = target_count / BAND_COUNT;
        let mut selected: Vec<usize> = Vec::with_capacity(target_count);
        for (band, members) in bands.iter().enumerate() {
            let take = target_per_band.min(members.len());
            let picks = if self.diversify_topics {
                draw_topic_balanced(members, take, |i| unique[i].topic(), rng)
            } else {
                draw_uniform(members, take, rng)
            };
            debug!(band = BAND_LABELS[band], available = members.len(), taken = picks.len(), "Band sampled");
            selected.extend(picks);
        }

        // 4. Fill the shortfall from everything not yet chosen.
        if selected.len() < target_count {
            let chosen: HashSet<usize> = selected.iter().copied().collect();
            let mut rest: Vec<usize> =
                eligible.iter().copied().filter(|i| !chosen.contains(i)).collect();
            rest.shuffle(rng);
            // Stable sort keeps the shuffled order among equal relevance.
            rest.sort_by(|a, b| fill_rank(unique[*b]).total_cmp(&fill_rank(unique[*a])));
            let needed = target_count - selected.len();
            selected.extend(rest.into_iter().take(needed));
        }

        // 5. Remove positional bias, then trim.
        selected.shuffle(rng);
        selected.truncate(target_count);

        info!(
            pool = pool.len(),
            unique = unique.len(),
            eligible = eligible.len(),
            selected = selected.len(),
            target = target_count,
            "Curated question sample"
        );

        selected.into_iter().map(|i| unique[i].clone()).collect()
    }

    /// Indices (into `items`) that survive the near-duplicate caps, in
    /// their original order.
    fn cap_near_duplicates<R: Rng + ?Sized>(
        &self,
        items: &[&EvalItem],
        cap: usize,
        rng: &mut R,
    ) -> Vec<usize> {
        let mut keep = vec![true; items.len()];
        let mut claimed = vec![false; items.len()];

        for rule in &self.rules {
            let members: Vec<usize> = (0..items.len())
                .filter(|&i| !claimed[i] && rule.matches(&items[i].question.question))
                .collect();
            for &i in &members {
                claimed[i] = true;
            }
            if members.len() <= cap {
                continue;
            }
            let kept: HashSet<usize> = index::sample(rng, members.len(), cap)
                .into_iter()
                .map(|j| members[j])
                .collect();
            for &i in &members {
                keep[i] = kept.contains(&i);
            }
            info!(
                rule = %rule.name,
                matched = members.len(),
                kept = cap,
                "Near-duplicate cluster capped"
            );
        }

        (0..items.len()).filter(|&i| keep[i]).collect()
    }
}

/// `k` members drawn uniformly without replacement.
/// Fill ordering key. Missing or NaN relevance ranks below everything.
fn fill_rank(item: &EvalItem) -> f64 {
    item.question
        .relevance
        .filter(|r| !r.is_nan())
        .unwrap_or(f64::NEG_INFINITY)
}

fn draw_uniform<R: Rng + ?Sized>(members: &[usize], k: usize, rng: &mut R) -> Vec<usize> {
    members.choose_multiple(rng, k).copied().collect()
}

/// `k` members drawn round-robin across topic groups, each group shuffled
/// and the group order shuffled.
fn draw_topic_balanced<R, F>(members: &[usize], k: usize, topic_of: F, rng: &mut R) -> Vec<usize>
where
    R: Rng + ?Sized,
    F: Fn(usize) -> Topic,
{
    let mut groups: BTreeMap<Topic, Vec<usize>> = BTreeMap::new();
    for &m in members {
        groups.entry(topic_of(m)).or_default().push(m);
    }
    let mut groups: Vec<Vec<usize>> = groups.into_values().collect();
    for g in groups.iter_mut() {
        g.shuffle(rng);
    }
    groups.shuffle(rng);

    let mut picks = Vec::with_capacity(k);
    let mut round = 0;
    while picks.len() < k {
        let mut progressed = false;
        for g in &groups {
            if picks.len() == k {
                break;
            }
            if let Some(&m) = g.get(round) {
                picks.push(m);
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
        round += 1;
    }
    picks
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
