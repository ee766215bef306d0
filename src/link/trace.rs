//! Trace selection state and sweep overflow tracking.

use log::warn;

use crate::plc::TraceSelection;

/// The session's view of the active trace selection.
///
/// Samples start zero-filled at each variable's width so a sweep that
/// races a reselection still concatenates to the right length.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceSession {
    token: u32,
    ids: Vec<u16>,
    samples: Vec<Vec<u8>>,
    awaited: Option<u16>,
}

impl TraceSession {
    pub fn new(selection: &TraceSelection) -> Self {
        Self {
            token: selection.token,
            ids: selection.entries.iter().map(|e| e.id).collect(),
            samples: selection
                .entries
                .iter()
                .map(|e| vec![0; e.ty.width()])
                .collect(),
            awaited: None,
        }
    }

    pub fn token(&self) -> u32 {
        self.token
    }

    pub fn ids(&self) -> &[u16] {
        &self.ids
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Mark `id` as the variable the next GET_TRACE reply belongs to.
    pub fn await_sample(&mut self, id: u16) {
        self.awaited = Some(id);
    }

    /// Store a GET_TRACE reply under the awaited variable.
    ///
    /// Returns `false` if nothing was awaited, the variable is no longer
    /// selected, or the reply does not match the variable's width. A
    /// rejected reply leaves the previous sample in place.
    pub fn store(&mut self, payload: &[u8]) -> bool {
        let Some(id) = self.awaited.take() else {
            return false;
        };
        let Some(pos) = self.ids.iter().position(|&i| i == id) else {
            return false;
        };
        let sample = &mut self.samples[pos];
        if payload.len() != sample.len() {
            warn!(
                "TRACE: variable {} replied {} bytes, expected {}",
                id,
                payload.len(),
                sample.len()
            );
            return false;
        }
        sample.copy_from_slice(payload);
        true
    }

    /// Every sample concatenated in selection order.
    pub fn assemble(&self) -> Vec<u8> {
        self.samples.concat()
    }
}

/// Counts consecutive overflowing sweeps and decides when to warn.
///
/// Two overflows in a row are tolerated; the third warns once. Nothing
/// more is reported until a clean sweep ends the streak.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverflowTracker {
    streak: u32,
    warned: bool,
}

impl OverflowTracker {
    pub const WARN_AFTER: u32 = 3;

    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sweep. Returns `true` when a warning must be emitted.
    pub fn record(&mut self, overflowed: bool) -> bool {
        if !overflowed {
            self.reset();
            return false;
        }
        self.streak = self.streak.saturating_add(1);
        if self.streak >= Self::WARN_AFTER && !self.warned {
            self.warned = true;
            return true;
        }
        false
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn reset(&mut self) {
        self.streak = 0;
        self.warned = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plc::{IecType, TraceVariable};

    fn selection(types: &[(u32, IecType)]) -> TraceSelection {
        let vars: Vec<_> = types
            .iter()
            .map(|&(id, ty)| TraceVariable { id, ty, value: None })
            .collect();
        TraceSelection::new(7, &vars).unwrap()
    }

    #[test]
    fn assembles_in_selection_order() {
        let mut t = TraceSession::new(&selection(&[
            (3, IecType::Bool),
            (1, IecType::Int),
            (2, IecType::Dint),
        ]));
        assert_eq!(t.assemble(), vec![0; 7]);

        for (id, bytes) in [(3u16, vec![1]), (1, vec![2, 2]), (2, vec![3, 3, 3, 3])] {
            t.await_sample(id);
            assert!(t.store(&bytes));
        }
        assert_eq!(t.assemble(), vec![1, 2, 2, 3, 3, 3, 3]);
        assert_eq!(t.token(), 7);
    }

    #[test]
    fn unsolicited_or_stale_samples_are_ignored() {
        let mut t = TraceSession::new(&selection(&[(1, IecType::Bool)]));
        assert!(!t.store(&[9]));
        t.await_sample(42);
        assert!(!t.store(&[9]));
        assert_eq!(t.assemble(), vec![0]);
    }

    #[test]
    fn reply_of_wrong_width_is_rejected() {
        let mut t = TraceSession::new(&selection(&[(1, IecType::Int), (2, IecType::Bool)]));
        t.await_sample(1);
        assert!(t.store(&[4, 4]));
        t.await_sample(1);
        assert!(!t.store(&[5]));
        t.await_sample(2);
        assert!(!t.store(&[6, 6]));
        assert_eq!(t.assemble(), vec![4, 4, 0]);
    }

    #[test]
    fn warns_once_on_third_consecutive_overflow() {
        let mut o = OverflowTracker::new();
        assert!(!o.record(true));
        assert!(!o.record(true));
        assert!(o.record(true));
        for _ in 0..10 {
            assert!(!o.record(true));
        }
    }

    #[test]
    fn clean_sweep_rearms_warning() {
        let mut o = OverflowTracker::new();
        o.record(true);
        o.record(true);
        assert!(!o.record(false));
        assert_eq!(o.streak(), 0);
        assert!(!o.record(true));
        assert!(!o.record(true));
        assert!(o.record(true));
    }
}
