//! Automation clips: sorted `{nanotick, value}` points per target parameter.

use ostinato_core::Uid16;

use crate::clip::PARAM_TARGET_ALL;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutomationPoint {
    pub nanotick: u64,
    pub value: f32,
}

/// One automation lane targeting a plugin parameter.
///
/// `value_at` clamps outside the point span; between points it interpolates
/// linearly, or holds the lower point when the clip is discrete-only.
#[derive(Debug, Clone)]
pub struct AutomationClip {
    uid16: Uid16,
    discrete_only: bool,
    target_plugin_index: u32,
    points: Vec<AutomationPoint>,
}

impl AutomationClip {
    pub fn new(uid16: Uid16, discrete_only: bool, target_plugin_index: u32) -> Self {
        Self {
            uid16,
            discrete_only,
            target_plugin_index,
            points: Vec::new(),
        }
    }

    pub fn for_param(uid16: Uid16) -> Self {
        Self::new(uid16, false, PARAM_TARGET_ALL)
    }

    pub fn uid16(&self) -> Uid16 {
        self.uid16
    }

    pub fn discrete_only(&self) -> bool {
        self.discrete_only
    }

    pub fn target_plugin_index(&self) -> u32 {
        self.target_plugin_index
    }

    pub fn set_target_plugin_index(&mut self, target: u32) {
        self.target_plugin_index = target;
    }

    pub fn points(&self) -> &[AutomationPoint] {
        &self.points
    }

    pub fn add_point(&mut self, point: AutomationPoint) {
        let index = self.points.partition_point(|p| p.nanotick < point.nanotick);
        self.points.insert(index, point);
    }

    pub fn value_at(&self, tick: u64) -> f32 {
        let Some(first) = self.points.first() else {
            return 0.0;
        };
        if tick <= first.nanotick {
            return first.value;
        }
        let last = self.points[self.points.len() - 1];
        if tick >= last.nanotick {
            return last.value;
        }

        let upper_index = self.points.partition_point(|p| p.nanotick < tick);
        let upper = self.points[upper_index];
        let lower = self.points[upper_index - 1];
        if upper.nanotick == lower.nanotick {
            return upper.value;
        }
        if self.discrete_only {
            return if tick == upper.nanotick { upper.value } else { lower.value };
        }

        let span = (upper.nanotick - lower.nanotick) as f64;
        let alpha = (tick - lower.nanotick) as f64 / span;
        (f64::from(lower.value) + (f64::from(upper.value) - f64::from(lower.value)) * alpha) as f32
    }

    /// Points with `start <= nanotick < end`.
    pub fn points_in_range(&self, start: u64, end: u64) -> &[AutomationPoint] {
        let from = self.points.partition_point(|p| p.nanotick < start);
        let to = self.points.partition_point(|p| p.nanotick < end);
        &self.points[from..to]
    }
}
