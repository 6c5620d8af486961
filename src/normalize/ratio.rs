// src/normalize/ratio.rs
//
// Progressive-ratio schedules. Each drug ran a fixed response-ratio
// progression; the reward count a subject finished with indexes straight
// into it. breakpoint = the ratio actually completed, last_ratio = the next
// ratio in the progression (the one the subject failed to reach).

use crate::normalize::Drug;
use once_cell::sync::Lazy;

/// Cocaine schedule: additive early steps, then a geometric climb.
static COCAINE_RATIOS: Lazy<Vec<i64>> = Lazy::new(|| {
    vec![
        0, 1, 2, 4, 6, 9, 12, 15, 20, 25, 32, 40, 50, 62, 77, 95, 118, 145, 178,
    ]
});

/// Oxycodone schedule: each ratio held for two rewards up to 10, then +1
/// per reward through 48, then widening steps onto a 100 plateau.
static OXYCODONE_RATIOS: Lazy<Vec<i64>> = Lazy::new(|| {
    let mut v = vec![0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10];
    v.extend(10..=48);
    v.extend([50, 60, 70, 80, 90, 100, 100, 100, 100, 100]);
    v
});

/// Per-drug reward-index → ratio mapping. Monotonically non-decreasing.
pub struct RatioTable {
    ratios: &'static [i64],
}

impl RatioTable {
    pub fn for_drug(drug: Drug) -> RatioTable {
        let ratios: &'static [i64] = match drug {
            Drug::Cocaine => &COCAINE_RATIOS,
            Drug::Oxycodone => &OXYCODONE_RATIOS,
        };
        RatioTable { ratios }
    }

    pub fn len(&self) -> usize {
        self.ratios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratios.is_empty()
    }

    /// Resolve (breakpoint, last_ratio) for a final reward count. The
    /// successor is looked up by the breakpoint's *value* — first occurrence
    /// — so duplicate ratios in the plateau resolve to the step after the
    /// plateau's first entry. Any domain miss yields null, not an error.
    pub fn resolve(&self, reward_count: Option<i64>) -> (Option<i64>, Option<i64>) {
        let count = match reward_count {
            Some(c) if c >= 0 => c as usize,
            _ => return (None, None),
        };
        let breakpoint = match self.ratios.get(count) {
            Some(&bp) => bp,
            None => return (None, None),
        };
        let last_ratio = self
            .ratios
            .iter()
            .position(|&r| r == breakpoint)
            .and_then(|idx| self.ratios.get(idx + 1))
            .copied();
        (Some(breakpoint), last_ratio)
    }
}
