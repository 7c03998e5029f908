/*!
 * Key Chunking
 *
 * Organizes the scannable keys of a layer into a hierarchy of chunks and
 * walks it. Highlighting only flips the `scanned` flag of keys and reports
 * which ones changed, painting is left to the layout.
 *
 * Strategies:
 *   Flat    - one sequence of keys in reading order
 *   Grouped - priority groups of rows of keys; a lone priority group is
 *             collapsed so traversal starts at row level
 */

use std::cmp::Ordering;

use tracing::debug;

use crate::layout::{Key, LayerKey, Layout};

/// Node of the scan hierarchy.
#[derive(Debug, Clone)]
pub enum Chunk {
    Key(Key),
    Group(Vec<Chunk>),
}

impl Chunk {
    pub fn is_group(&self) -> bool {
        matches!(self, Chunk::Group(_))
    }

    pub fn as_key(&self) -> Option<&Key> {
        match self {
            Chunk::Key(key) => Some(key),
            Chunk::Group(_) => None,
        }
    }
}

/// How keys are arranged into chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStrategy {
    Flat,
    Grouped { priority_grouping: bool },
}

/// Saved position of an ancestor level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Frame {
    index: usize,
    length: usize,
    cycles: u32,
    /// Singleton wrappers skipped below the ancestor on the way down
    skipped: usize,
}

/// Builds the chunk hierarchy of a layer and traverses it.
#[derive(Debug, Clone)]
pub struct Chunker {
    strategy: ChunkStrategy,
    chunks: Vec<Chunk>,
    index: usize,
    length: usize,
    path: Vec<Frame>,
    /// Wrap-arounds seen on the current level
    pub cycles: u32,
}

impl Chunker {
    /// All keys in one sequence, sorted top to bottom, left to right.
    pub fn flat() -> Self {
        Self::with_strategy(ChunkStrategy::Flat)
    }

    /// Priority groups of rows of keys.
    pub fn grouped() -> Self {
        Self::with_strategy(ChunkStrategy::Grouped {
            priority_grouping: true,
        })
    }

    /// Rows of keys, scan priorities ignored.
    pub fn rows() -> Self {
        Self::with_strategy(ChunkStrategy::Grouped {
            priority_grouping: false,
        })
    }

    pub fn with_strategy(strategy: ChunkStrategy) -> Self {
        Self {
            strategy,
            chunks: Vec::new(),
            index: 0,
            length: 0,
            path: Vec::new(),
            cycles: 0,
        }
    }

    pub fn strategy(&self) -> ChunkStrategy {
        self.strategy
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn depth(&self) -> usize {
        self.path.len()
    }

    /// Collect the scannable keys of `layer` and arrange them into chunks.
    pub fn chunk(&mut self, layout: &dyn Layout, layer: Option<&str>) {
        let mut keys: Vec<LayerKey> = layout
            .iter_layer_keys(layer)
            .into_iter()
            .filter(|k| k.scannable)
            .collect();
        if layer.is_some() {
            keys.extend(
                layout
                    .iter_layer_keys(None)
                    .into_iter()
                    .filter(|k| k.scannable),
            );
        }

        self.set_keys(keys);
        debug!(
            "[Chunker] {:?}: {} top level chunks for layer {:?}",
            self.strategy, self.length, layer
        );
    }

    /// Arrange already collected keys into chunks.
    pub fn set_keys(&mut self, mut keys: Vec<LayerKey>) {
        let by_priority = matches!(
            self.strategy,
            ChunkStrategy::Grouped {
                priority_grouping: true
            }
        );

        // stable: layer keys stay ahead of global keys on ties
        keys.sort_by(|a, b| {
            let priority = if by_priority {
                a.scan_priority.cmp(&b.scan_priority)
            } else {
                Ordering::Equal
            };
            priority.then_with(|| compare_location(&a.key, &b.key))
        });

        self.chunks = match self.strategy {
            ChunkStrategy::Flat => keys.into_iter().map(|k| Chunk::Key(k.key)).collect(),
            ChunkStrategy::Grouped { priority_grouping } => {
                let mut groups = group_by_priority(keys, priority_grouping);
                if groups.len() == 1 {
                    self.strategy = ChunkStrategy::Grouped {
                        priority_grouping: false,
                    };
                    match groups.pop() {
                        Some(Chunk::Group(rows)) => rows,
                        _ => Vec::new(),
                    }
                } else {
                    groups
                }
            }
        };

        self.reset();
    }

    /// The group or key the chunker points to.
    pub fn get_current_object(&self) -> Option<&Chunk> {
        self.current_level()?.get(self.index)
    }

    fn current_level(&self) -> Option<&[Chunk]> {
        let mut level: &[Chunk] = &self.chunks;
        for frame in &self.path {
            level = children(level.get(frame.index)?)?;
            for _ in 0..frame.skipped {
                level = children(level.first()?)?;
            }
        }
        Some(level)
    }

    /// The current key, `None` while pointing at a group.
    pub fn get_key(&self) -> Option<Key> {
        self.get_current_object()?.as_key().cloned()
    }

    /// Move to the next chunk on the current level.
    ///
    /// A wrap to a lower index counts as a cycle, a lone chunk never wraps.
    pub fn next(&mut self) {
        if self.length == 0 {
            return;
        }
        let next = (self.index + 1) % self.length;
        if next < self.index {
            self.cycles += 1;
        }
        self.index = next;
    }

    /// Move to the previous chunk on the current level.
    pub fn previous(&mut self) {
        if self.length == 0 {
            return;
        }
        let previous = (self.index + self.length - 1) % self.length;
        if previous > self.index {
            self.cycles += 1;
        }
        self.index = previous;
    }

    pub fn can_ascend(&self) -> bool {
        !self.path.is_empty()
    }

    /// Move one level up, restoring the position saved by `descend`.
    pub fn ascend(&mut self) -> bool {
        match self.path.pop() {
            Some(frame) => {
                self.index = frame.index;
                self.length = frame.length;
                self.cycles = frame.cycles;
                true
            }
            None => false,
        }
    }

    pub fn can_descend(&self) -> bool {
        self.get_current_object().map_or(false, Chunk::is_group)
    }

    /// Move one level down into the current group.
    ///
    /// Groups with a single member are passed through. Returns false if
    /// the chunker now points at a key, either because it already did or
    /// because the group only wrapped that key.
    pub fn descend(&mut self) -> bool {
        let mut level = match self.get_current_object() {
            Some(Chunk::Group(members)) if !members.is_empty() => members,
            _ => return false,
        };

        let mut skipped = 0;
        while level.len() == 1 {
            match &level[0] {
                Chunk::Group(inner) if !inner.is_empty() => {
                    level = inner;
                    skipped += 1;
                }
                _ => break,
            }
        }
        let length = level.len();

        self.path.push(Frame {
            index: self.index,
            length: self.length,
            cycles: self.cycles,
            skipped,
        });
        self.index = 0;
        self.length = length;
        self.cycles = 0;

        length > 1
    }

    /// Move to the spatially closest key in the previous row.
    pub fn up(&mut self) -> bool {
        self.select_neighbour(Chunker::previous)
    }

    /// Move to the spatially closest key in the next row.
    pub fn down(&mut self) -> bool {
        self.select_neighbour(Chunker::next)
    }

    fn select_neighbour(&mut self, direction: fn(&mut Chunker)) -> bool {
        if self.strategy == ChunkStrategy::Flat {
            return false;
        }
        let Some(key) = self.get_key() else {
            return false;
        };
        if !self.ascend() {
            return false;
        }

        let target_x = key.border_rect().center_x();
        direction(self);

        let neighbour = match self.get_current_object() {
            Some(Chunk::Group(members)) => nearest(members, target_x),
            _ => None,
        };

        self.descend();
        if let Some(index) = neighbour {
            if index < self.length {
                self.index = index;
            }
        }
        true
    }

    /// Set the chunker to its initial state.
    pub fn reset(&mut self) {
        self.cycles = 0;
        self.index = 0;
        self.length = self.chunks.len();
        self.path.clear();
    }

    pub fn is_reset(&self) -> bool {
        self.index == 0 && self.cycles == 0 && self.path.is_empty()
    }

    /// Highlight or clear the current chunk, returning the keys that changed.
    pub fn highlight(&self, on: bool) -> Vec<Key> {
        let mut changed = Vec::new();
        if let Some(chunk) = self.get_current_object() {
            highlight_rec(chunk, on, &mut changed);
        }
        changed
    }

    /// Highlight or clear every chunk, returning the keys that changed.
    pub fn highlight_all(&self, on: bool) -> Vec<Key> {
        let mut changed = Vec::new();
        for chunk in &self.chunks {
            highlight_rec(chunk, on, &mut changed);
        }
        changed
    }
}

fn children(chunk: &Chunk) -> Option<&[Chunk]> {
    match chunk {
        Chunk::Group(members) => Some(members),
        Chunk::Key(_) => None,
    }
}

fn highlight_rec(chunk: &Chunk, on: bool, changed: &mut Vec<Key>) {
    match chunk {
        Chunk::Group(members) => {
            for member in members {
                highlight_rec(member, on, changed);
            }
        }
        Chunk::Key(key) => {
            if key.is_scanned() != on {
                key.set_scanned(on);
                changed.push(key.clone());
            }
        }
    }
}

/// Sort by top edge, then by left edge
fn compare_location(a: &Key, b: &Key) -> Ordering {
    let (ax, ay) = a.border_rect().int_origin();
    let (bx, by) = b.border_rect().int_origin();
    ay.cmp(&by).then(ax.cmp(&bx))
}

/// Split sorted keys into priority groups of rows.
fn group_by_priority(keys: Vec<LayerKey>, by_priority: bool) -> Vec<Chunk> {
    let mut groups: Vec<Vec<Vec<Key>>> = Vec::new();
    let mut last_priority = None;
    let mut last_y = None;

    for entry in keys {
        let priority = if by_priority { entry.scan_priority } else { 0 };
        if last_priority != Some(priority) || groups.is_empty() {
            last_priority = Some(priority);
            last_y = None;
            groups.push(Vec::new());
        }
        let Some(group) = groups.last_mut() else {
            continue;
        };

        let (_, y) = entry.key.border_rect().int_origin();
        if last_y != Some(y) || group.is_empty() {
            last_y = Some(y);
            group.push(Vec::new());
        }
        if let Some(row) = group.last_mut() {
            row.push(entry.key);
        }
    }

    groups
        .into_iter()
        .map(|rows| {
            Chunk::Group(
                rows.into_iter()
                    .map(|row| Chunk::Group(row.into_iter().map(Chunk::Key).collect()))
                    .collect(),
            )
        })
        .collect()
}

/// Index of the member whose horizontal center is closest to `x`, first one wins ties
fn nearest(members: &[Chunk], x: f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (index, member) in members.iter().enumerate() {
        let Some(key) = first_key(member) else {
            continue;
        };
        let dx = (key.border_rect().center_x() - x).abs();
        if best.map_or(true, |(_, min)| dx < min) {
            best = Some((index, dx));
        }
    }
    best.map(|(index, _)| index)
}

fn first_key(chunk: &Chunk) -> Option<&Key> {
    match chunk {
        Chunk::Key(key) => Some(key),
        Chunk::Group(members) => members.first().and_then(first_key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{Rect, ScanKey};
    use std::rc::Rc;

    fn key_at(id: &str, x: f64, y: f64) -> Key {
        Rc::new(ScanKey::new(id, Rect::new(x, y, 10.0, 10.0)))
    }

    fn entry(id: &str, x: f64, y: f64, priority: i32) -> LayerKey {
        LayerKey {
            key: key_at(id, x, y),
            scannable: true,
            scan_priority: priority,
        }
    }

    fn leaf(id: &str) -> Chunk {
        Chunk::Key(key_at(id, 0.0, 0.0))
    }

    fn group_sizes(chunks: &[Chunk]) -> Vec<usize> {
        chunks
            .iter()
            .map(|c| match c {
                Chunk::Group(members) => members.len(),
                Chunk::Key(_) => 1,
            })
            .collect()
    }

    fn with_chunks(chunks: Vec<Chunk>) -> Chunker {
        let mut chunker = Chunker::grouped();
        chunker.chunks = chunks;
        chunker.reset();
        chunker
    }

    fn current_id(chunker: &Chunker) -> Option<String> {
        chunker.get_key().map(|k| k.id().to_string())
    }

    /// 3 rows: 2 keys at y=10, 3 keys at y=40, 1 key at y=70
    fn grid() -> Vec<LayerKey> {
        vec![
            entry("q", 0.0, 10.0, 0),
            entry("w", 40.0, 10.0, 0),
            entry("a", 0.0, 40.0, 0),
            entry("s", 20.0, 40.0, 0),
            entry("d", 40.0, 40.0, 0),
            entry("z", 30.0, 70.0, 0),
        ]
    }

    #[test]
    fn test_flat_sorts_by_y_then_x() {
        let mut chunker = Chunker::flat();
        chunker.set_keys(vec![
            entry("c", 20.0, 10.0, 0),
            entry("d", 0.0, 40.0, 0),
            entry("a", 0.0, 10.2, 0),
            entry("b", 10.0, 9.8, 0),
        ]);
        let ids: Vec<_> = chunker
            .chunks()
            .iter()
            .filter_map(|c| c.as_key().map(|k| k.id().to_string()))
            .collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert_eq!(chunker.length(), 4);
    }

    #[test]
    fn test_rows_grouping() {
        let mut chunker = Chunker::rows();
        chunker.set_keys(vec![
            entry("d", 40.0, 40.0, 0),
            entry("a", 0.0, 10.0, 0),
            entry("c", 20.0, 40.0, 0),
            entry("b", 10.0, 10.0, 0),
            entry("e", 60.0, 40.0, 0),
        ]);
        assert_eq!(group_sizes(chunker.chunks()), vec![2, 3]);
        assert_eq!(chunker.length(), 2);
    }

    #[test]
    fn test_priority_groups() {
        let mut chunker = Chunker::grouped();
        chunker.set_keys(vec![
            entry("space", 0.0, 80.0, 1),
            entry("q", 0.0, 10.0, 2),
            entry("w", 10.0, 10.0, 2),
            entry("a", 0.0, 40.0, 2),
        ]);
        assert_eq!(chunker.length(), 2);
        assert_eq!(group_sizes(chunker.chunks()), vec![1, 2]);
        assert_eq!(
            chunker.strategy(),
            ChunkStrategy::Grouped {
                priority_grouping: true
            }
        );
    }

    #[test]
    fn test_single_priority_group_collapses() {
        let mut chunker = Chunker::grouped();
        chunker.set_keys(grid());
        assert_eq!(group_sizes(chunker.chunks()), vec![2, 3, 1]);
        assert_eq!(
            chunker.strategy(),
            ChunkStrategy::Grouped {
                priority_grouping: false
            }
        );
    }

    #[test]
    fn test_cycle_counting() {
        let mut chunker = Chunker::flat();
        chunker.set_keys((0..5).map(|i| entry("k", i as f64 * 10.0, 0.0, 0)).collect());
        for _ in 0..5 {
            chunker.next();
        }
        assert_eq!(chunker.index(), 0);
        assert_eq!(chunker.cycles, 1);

        chunker.previous();
        assert_eq!(chunker.index(), 4);
        assert_eq!(chunker.cycles, 2);
    }

    #[test]
    fn test_single_chunk_level_never_wraps() {
        let mut chunker = Chunker::flat();
        chunker.set_keys(vec![entry("only", 0.0, 0.0, 0)]);
        chunker.next();
        assert_eq!(chunker.index(), 0);
        assert_eq!(chunker.cycles, 0);

        chunker.next();
        chunker.previous();
        assert_eq!(chunker.index(), 0);
        assert_eq!(chunker.cycles, 0);
    }

    #[test]
    fn test_singleton_collapse() {
        let a = key_at("A", 0.0, 0.0);
        let mut chunker = with_chunks(vec![Chunk::Group(vec![Chunk::Group(vec![Chunk::Key(
            a.clone(),
        )])])]);

        assert!(!chunker.descend());
        assert!(Rc::ptr_eq(&chunker.get_key().unwrap(), &a));
        assert_eq!(chunker.depth(), 1);
        assert!(chunker.index() < chunker.length());
    }

    #[test]
    fn test_descend_ascend_round_trip() {
        let mut chunker = with_chunks(vec![
            Chunk::Group(vec![leaf("a"), leaf("b")]),
            Chunk::Group(vec![Chunk::Group(vec![leaf("c"), leaf("d"), leaf("e")])]),
        ]);
        chunker.next();
        chunker.next();
        chunker.next();
        let before = (chunker.index(), chunker.length(), chunker.cycles);
        assert_eq!(before, (1, 2, 1));

        assert!(chunker.descend());
        assert_eq!(chunker.length(), 3);
        assert_eq!(current_id(&chunker).as_deref(), Some("c"));
        chunker.next();
        assert_eq!(current_id(&chunker).as_deref(), Some("d"));

        assert!(chunker.ascend());
        assert_eq!((chunker.index(), chunker.length(), chunker.cycles), before);
        assert!(!chunker.ascend());
    }

    #[test]
    fn test_descend_on_key_is_noop() {
        let mut chunker = with_chunks(vec![leaf("a"), leaf("b")]);
        assert!(!chunker.can_descend());
        assert!(!chunker.descend());
        assert!(chunker.is_reset());
        assert_eq!(current_id(&chunker).as_deref(), Some("a"));
    }

    #[test]
    fn test_index_invariant_under_mixed_moves() {
        let mut chunker = Chunker::grouped();
        chunker.set_keys(grid());
        let moves: [fn(&mut Chunker); 6] = [
            Chunker::next,
            |c| {
                c.descend();
            },
            Chunker::previous,
            |c| {
                c.ascend();
            },
            |c| {
                c.up();
            },
            |c| {
                c.down();
            },
        ];
        for round in 0..60 {
            moves[(round * 7 + round / 3) % moves.len()](&mut chunker);
            assert!(chunker.index() < chunker.length());
        }
    }

    #[test]
    fn test_highlight_reports_changes_only() {
        let mut chunker = Chunker::rows();
        chunker.set_keys(grid());

        let changed = chunker.highlight(true);
        assert_eq!(changed.len(), 2);
        assert!(chunker.highlight(true).is_empty());

        chunker.next();
        assert_eq!(chunker.highlight(true).len(), 3);
        assert_eq!(chunker.highlight_all(false).len(), 5);
        assert!(chunker.highlight_all(false).is_empty());
    }

    #[test]
    fn test_up_down_select_nearest_key() {
        let mut chunker = Chunker::rows();
        chunker.set_keys(grid());

        chunker.next();
        assert!(chunker.descend());
        chunker.next();
        chunker.next();
        assert_eq!(current_id(&chunker).as_deref(), Some("d"));

        assert!(chunker.up());
        assert_eq!(current_id(&chunker).as_deref(), Some("w"));

        assert!(chunker.down());
        assert_eq!(current_id(&chunker).as_deref(), Some("d"));

        // single key row
        assert!(chunker.down());
        assert_eq!(current_id(&chunker).as_deref(), Some("z"));

        // wraps around to the first row, x=35 is closest to w at x=45
        assert!(chunker.down());
        assert_eq!(current_id(&chunker).as_deref(), Some("w"));
    }

    #[test]
    fn test_up_down_ties_pick_first() {
        let mut chunker = Chunker::rows();
        chunker.set_keys(vec![
            entry("left", 0.0, 0.0, 0),
            entry("right", 20.0, 0.0, 0),
            entry("mid", 10.0, 30.0, 0),
        ]);
        chunker.next();
        chunker.descend();
        assert_eq!(current_id(&chunker).as_deref(), Some("mid"));
        assert!(chunker.up());
        assert_eq!(current_id(&chunker).as_deref(), Some("left"));
    }

    #[test]
    fn test_up_down_unsupported_on_flat() {
        let mut chunker = Chunker::flat();
        chunker.set_keys(grid());
        assert!(!chunker.up());
        assert!(!chunker.down());
        assert!(chunker.is_reset());
    }

    #[test]
    fn test_empty_layer() {
        let mut chunker = Chunker::grouped();
        chunker.set_keys(Vec::new());
        chunker.next();
        chunker.previous();
        assert!(!chunker.descend());
        assert!(chunker.get_key().is_none());
        assert!(chunker.highlight(true).is_empty());
    }

    #[test]
    fn test_reset() {
        let mut chunker = Chunker::rows();
        chunker.set_keys(grid());
        chunker.next();
        chunker.descend();
        chunker.next();
        assert!(!chunker.is_reset());

        chunker.reset();
        assert!(chunker.is_reset());
        assert_eq!(chunker.length(), 3);
    }
}
