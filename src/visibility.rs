//! Edge-triggered visibility of a sentinel row inside a scrolling viewport.

pub const DEFAULT_THRESHOLD: f32 = 0.1;
pub const DEFAULT_ROOT_MARGIN: u16 = 4;

/// A span of rows in content coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: i64,
    pub len: u32,
}

impl Region {
    pub fn new(start: i64, len: u32) -> Self {
        Self { start, len }
    }

    fn end(&self) -> i64 {
        self.start + i64::from(self.len)
    }
}

/// Fraction of `target` inside `root` grown by `margin` rows at both ends.
pub fn intersection_ratio(target: Region, root: Region, margin: u16) -> f32 {
    let root_start = root.start - i64::from(margin);
    let root_end = root.end() + i64::from(margin);
    if target.len == 0 {
        return if target.start >= root_start && target.start <= root_end {
            1.0
        } else {
            0.0
        };
    }
    let overlap = target.end().min(root_end) - target.start.max(root_start);
    if overlap <= 0 {
        0.0
    } else {
        overlap as f32 / target.len as f32
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Observer {
    threshold: f32,
    root_margin: u16,
    visible: bool,
}

impl Default for Observer {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_ROOT_MARGIN)
    }
}

impl Observer {
    pub fn new(threshold: f32, root_margin: u16) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
            root_margin,
            visible: false,
        }
    }

    /// True only when the target goes from hidden to visible.
    pub fn observe(&mut self, target: Region, root: Region) -> bool {
        let ratio = intersection_ratio(target, root, self.root_margin);
        let visible = ratio > 0.0 && ratio >= self.threshold;
        let became_visible = visible && !self.visible;
        self.visible = visible;
        became_visible
    }

    /// Treat the target as hidden so the next visible observation fires.
    pub fn rearm(&mut self) {
        self.visible = false;
    }
}
