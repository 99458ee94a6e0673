use std::cmp::Ordering;

/// Progress of one named region of an event's instruction stream.
///
/// States are partially ordered: `Before` and `BeforeMatchless` are
/// incomparable with each other and both precede `Prematch`, which
/// precedes `During`, which precedes `After`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentState {
    /// Waiting for the start marker; a later match then anchors the segment.
    Before,
    /// Waiting for the start marker, which itself begins the segment.
    BeforeMatchless,
    /// Started but not yet anchored to an index.
    Prematch,
    During,
    After,
}

/// What a segment event does to a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Stay,
    Become(SegmentState),
    /// Enter `During` and release the segment's scheduled additions.
    Begin,
}

impl SegmentState {
    pub fn initial(has_start: bool, matchless: bool) -> SegmentState {
        match (has_start, matchless) {
            (false, _) => SegmentState::Prematch,
            (true, true) => SegmentState::BeforeMatchless,
            (true, false) => SegmentState::Before,
        }
    }

    fn rank(self) -> u8 {
        match self {
            SegmentState::Before | SegmentState::BeforeMatchless => 0,
            SegmentState::Prematch => 1,
            SegmentState::During => 2,
            SegmentState::After => 3,
        }
    }

    /// The segment has begun, whether or not it has since ended.
    pub fn reached(self) -> bool {
        self.rank() >= SegmentState::During.rank()
    }

    /// Segment-scoped edits may fire. `Prematch` counts, so such an edit
    /// can both fire and anchor the segment.
    pub fn allows_edits(self) -> bool {
        matches!(self, SegmentState::Prematch | SegmentState::During)
    }

    pub fn on_start_marker(self) -> Transition {
        match self {
            SegmentState::Before => Transition::Become(SegmentState::Prematch),
            SegmentState::BeforeMatchless => Transition::Begin,
            _ => Transition::Stay,
        }
    }

    pub fn on_end_marker(self) -> Transition {
        match self {
            SegmentState::Prematch | SegmentState::During => Transition::Become(SegmentState::After),
            _ => Transition::Stay,
        }
    }

    pub fn on_anchor(self) -> Transition {
        match self {
            SegmentState::Prematch => Transition::Begin,
            _ => Transition::Stay,
        }
    }
}

impl PartialOrd for SegmentState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            return Some(Ordering::Equal);
        }
        match self.rank().cmp(&other.rank()) {
            Ordering::Equal => None,
            ord => Some(ord),
        }
    }
}
