use log::trace;

/// A page on which a decodable unit of the reference stream starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Syncpoint {
    /// Codec time key (granule-derived frame or sample number).
    pub key: i64,
    pub pts: f64,
    /// Offset of the page that holds the unit.
    pub offset: u64,
}

/// Syncpoints in scan order with non-decreasing keys.
#[derive(Debug, Clone, Default)]
pub struct SyncpointTable {
    points: Vec<Syncpoint>,
    max_pts: Option<f64>,
}

impl SyncpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `point` unless its key would go backwards. Returns whether it
    /// was kept.
    pub fn push(&mut self, point: Syncpoint) -> bool {
        if let Some(last) = self.points.last() {
            if point.key < last.key || point.offset <= last.offset {
                trace!("syncpoint {:?} out of order after {:?}", point, last);
                return false;
            }
        }
        self.observe_pts(point.pts);
        self.points.push(point);
        true
    }

    /// Records a timestamp seen on the reference stream.
    pub fn observe_pts(&mut self, pts: f64) {
        self.max_pts = Some(self.max_pts.map_or(pts, |m| m.max(pts)));
    }

    /// Largest timestamp observed; the duration estimate.
    pub fn max_pts(&self) -> Option<f64> {
        self.max_pts
    }

    pub fn points(&self) -> &[Syncpoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Index of the last syncpoint whose pts is not after `pts`, or the first.
    pub fn index_for_time(&self, pts: f64) -> Option<usize> {
        if self.points.is_empty() {
            return None;
        }
        let after = self.points.partition_point(|p| p.pts <= pts);
        Some(after.saturating_sub(1))
    }

    /// Index of the last syncpoint whose offset is not after `offset`, or the
    /// first.
    pub fn index_for_offset(&self, offset: u64) -> Option<usize> {
        if self.points.is_empty() {
            return None;
        }
        let after = self.points.partition_point(|p| p.offset <= offset);
        Some(after.saturating_sub(1))
    }

    pub fn get(&self, i: usize) -> Option<&Syncpoint> {
        self.points.get(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;

    fn table() -> SyncpointTable {
        let mut t = SyncpointTable::new();
        for (i, offset) in [100u64, 900, 2000, 3500].iter().enumerate() {
            t.push(Syncpoint {
                key: i as i64 * 25,
                pts: i as f64,
                offset: *offset,
            });
        }
        t
    }

    #[test]
    fn test_lookup_by_time_and_offset() {
        let t = table();
        assert_eq!(t.index_for_time(-1.0), Some(0));
        assert_eq!(t.index_for_time(1.0), Some(1));
        assert_eq!(t.index_for_time(2.9), Some(2));
        assert_eq!(t.index_for_time(99.0), Some(3));
        assert_eq!(t.index_for_offset(1999), Some(1));
        assert_eq!(t.index_for_offset(2000), Some(2));
        assert_eq!(SyncpointTable::new().index_for_time(0.0), None);
    }

    #[test]
    fn test_rejects_backwards_keys() {
        let mut t = table();
        assert!(!t.push(Syncpoint { key: 10, pts: 0.4, offset: 5000 }));
        assert_eq!(t.len(), 4);
        t.observe_pts(7.5);
        assert_eq!(t.max_pts(), Some(7.5));
    }

    #[quickcheck]
    fn prop_keys_non_decreasing(keys: Vec<i32>) -> bool {
        let mut t = SyncpointTable::new();
        for (i, key) in keys.iter().enumerate() {
            t.push(Syncpoint {
                key: *key as i64,
                pts: *key as f64,
                offset: i as u64 * 4096,
            });
        }
        t.points().windows(2).all(|w| w[0].key <= w[1].key && w[0].offset < w[1].offset)
    }
}
