//! Global harmony timeline: the current root and scale at any nanotick.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarmonyEvent {
    pub nanotick: u64,
    /// Pitch class 0..12.
    pub root: u32,
    pub scale_id: u32,
}

/// Latest harmony event with `nanotick <= tick`, if any.
pub fn harmony_at(events: &[HarmonyEvent], tick: u64) -> Option<HarmonyEvent> {
    let index = events.partition_point(|e| e.nanotick <= tick);
    if index == 0 {
        None
    } else {
        Some(events[index - 1])
    }
}

/// Ordered global harmony events.
#[derive(Debug, Clone, Default)]
pub struct HarmonyTimeline {
    events: Vec<HarmonyEvent>,
}

impl HarmonyTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[HarmonyEvent] {
        &self.events
    }

    pub fn find_index(&self, nanotick: u64) -> Option<usize> {
        let index = self.events.partition_point(|e| e.nanotick < nanotick);
        (index < self.events.len() && self.events[index].nanotick == nanotick).then_some(index)
    }

    /// Insert or overwrite the event at `event.nanotick`. Returns the
    /// previous event when this was an update.
    pub fn write(&mut self, event: HarmonyEvent) -> Option<HarmonyEvent> {
        match self.find_index(event.nanotick) {
            Some(index) => {
                let previous = self.events[index];
                self.events[index] = event;
                Some(previous)
            }
            None => {
                let index = self.events.partition_point(|e| e.nanotick < event.nanotick);
                self.events.insert(index, event);
                None
            }
        }
    }

    pub fn remove(&mut self, nanotick: u64) -> Option<HarmonyEvent> {
        let index = self.find_index(nanotick)?;
        Some(self.events.remove(index))
    }

    pub fn at(&self, tick: u64) -> Option<HarmonyEvent> {
        harmony_at(&self.events, tick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeline() -> HarmonyTimeline {
        let mut t = HarmonyTimeline::new();
        t.write(HarmonyEvent { nanotick: 0, root: 0, scale_id: 1 });
        t.write(HarmonyEvent { nanotick: 960_000, root: 7, scale_id: 2 });
        t
    }

    #[test]
    fn lookup_before_first_event_is_none() {
        let mut t = HarmonyTimeline::new();
        t.write(HarmonyEvent { nanotick: 100, root: 0, scale_id: 1 });
        assert!(t.at(99).is_none());
        assert!(t.at(100).is_some());
    }

    #[test]
    fn lookup_returns_latest_at_or_before() {
        let t = timeline();
        assert_eq!(t.at(0).unwrap().root, 0);
        assert_eq!(t.at(959_999).unwrap().root, 0);
        assert_eq!(t.at(960_000).unwrap().root, 7);
        assert_eq!(t.at(u64::MAX).unwrap().root, 7);
    }

    #[test]
    fn write_at_same_tick_overwrites() {
        let mut t = timeline();
        let previous = t.write(HarmonyEvent { nanotick: 0, root: 5, scale_id: 3 });
        assert_eq!(previous.unwrap().root, 0);
        assert_eq!(t.events().len(), 2);
        assert_eq!(t.at(10).unwrap().root, 5);
    }

    #[test]
    fn remove_missing_is_none() {
        let mut t = timeline();
        assert!(t.remove(123).is_none());
        assert_eq!(t.remove(960_000).unwrap().root, 7);
        assert_eq!(t.events().len(), 1);
    }
}
