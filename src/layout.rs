/*!
 * Keyboard Layout Interface
 *
 * The scanner never owns the keyboard layout. It only asks a layer for its keys
 * and flips the `scanned` flag on the keys it highlights. `LayoutTree` is a small
 * in-memory tree that hosts (and the tests) can use as that collaborator.
 */

use std::cell::Cell;
use std::rc::Rc;

/// Shared handle to a key of the layout.
pub type Key = Rc<ScanKey>;

/// Axis aligned rectangle in layout coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    /// Top-left corner snapped to integer device units
    pub fn int_origin(&self) -> (i64, i64) {
        (self.x.round() as i64, self.y.round() as i64)
    }

    pub fn center_x(&self) -> f64 {
        self.x + self.w / 2.0
    }

    pub fn center_y(&self) -> f64 {
        self.y + self.h / 2.0
    }
}

/// A single key as seen by the scanner.
#[derive(Debug)]
pub struct ScanKey {
    id: String,
    rect: Rect,
    scannable: bool,
    scan_priority: Option<i32>,
    scanned: Cell<bool>,
}

impl ScanKey {
    pub fn new(id: impl Into<String>, rect: Rect) -> Self {
        Self {
            id: id.into(),
            rect,
            scannable: true,
            scan_priority: None,
            scanned: Cell::new(false),
        }
    }

    pub fn with_scannable(mut self, scannable: bool) -> Self {
        self.scannable = scannable;
        self
    }

    pub fn with_scan_priority(mut self, priority: i32) -> Self {
        self.scan_priority = Some(priority);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn border_rect(&self) -> Rect {
        self.rect
    }

    pub fn scannable(&self) -> bool {
        self.scannable
    }

    pub fn scan_priority(&self) -> Option<i32> {
        self.scan_priority
    }

    /// Whether the scanner currently highlights this key
    pub fn is_scanned(&self) -> bool {
        self.scanned.get()
    }

    pub fn set_scanned(&self, scanned: bool) {
        self.scanned.set(scanned);
    }
}

/// A key of a layer together with the properties resolved along its path.
#[derive(Debug, Clone)]
pub struct LayerKey {
    pub key: Key,
    /// The key and all of its ancestors are scannable
    pub scannable: bool,
    /// Nearest explicit scan priority in the path, 0 if there is none
    pub scan_priority: i32,
}

/// Source of scannable keys.
pub trait Layout {
    /// Visible keys of `layer`, or the keys without any layer when `layer` is `None`.
    fn iter_layer_keys(&self, layer: Option<&str>) -> Vec<LayerKey>;
}

/// Node of a [`LayoutTree`].
#[derive(Debug, Clone)]
pub enum LayoutItem {
    Key(Key),
    Group(LayoutGroup),
}

/// Group of layout items sharing layer, visibility and scan properties.
#[derive(Debug, Clone)]
pub struct LayoutGroup {
    pub id: String,
    pub layer: Option<String>,
    pub visible: bool,
    pub scannable: bool,
    pub scan_priority: Option<i32>,
    pub children: Vec<LayoutItem>,
}

impl LayoutGroup {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            layer: None,
            visible: true,
            scannable: true,
            scan_priority: None,
            children: Vec::new(),
        }
    }

    pub fn layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = Some(layer.into());
        self
    }

    pub fn visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn scannable(mut self, scannable: bool) -> Self {
        self.scannable = scannable;
        self
    }

    pub fn scan_priority(mut self, priority: i32) -> Self {
        self.scan_priority = Some(priority);
        self
    }

    pub fn key(mut self, key: Key) -> Self {
        self.children.push(LayoutItem::Key(key));
        self
    }

    pub fn group(mut self, group: LayoutGroup) -> Self {
        self.children.push(LayoutItem::Group(group));
        self
    }
}

/// In-memory layout tree.
#[derive(Debug, Clone)]
pub struct LayoutTree {
    root: LayoutGroup,
}

/// Properties inherited while walking down the tree
#[derive(Clone, Copy)]
struct PathState<'a> {
    found_layer: Option<&'a str>,
    scannable: bool,
    scan_priority: Option<i32>,
}

impl LayoutTree {
    pub fn new(root: LayoutGroup) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &LayoutGroup {
        &self.root
    }

    fn collect<'a>(
        group: &'a LayoutGroup,
        layer: Option<&'a str>,
        mut state: PathState<'a>,
        out: &mut Vec<LayerKey>,
    ) {
        if !group.visible {
            return;
        }

        let group_layer = group.layer.as_deref();
        if group_layer.is_some() && group_layer == layer {
            state.found_layer = layer;
        }

        // A different layer in the path hides the subtree, unless one layer
        // is a dotted sub-layer of the other.
        if let Some(own) = group_layer {
            if state.found_layer != Some(own) && !layers_related(own, layer) {
                return;
            }
        }

        state.scannable &= group.scannable;
        if group.scan_priority.is_some() {
            state.scan_priority = group.scan_priority;
        }

        for child in &group.children {
            match child {
                LayoutItem::Group(inner) => Self::collect(inner, layer, state, out),
                LayoutItem::Key(key) => {
                    if state.found_layer != layer {
                        continue;
                    }
                    out.push(LayerKey {
                        key: key.clone(),
                        scannable: state.scannable && key.scannable(),
                        scan_priority: key
                            .scan_priority()
                            .or(state.scan_priority)
                            .unwrap_or(0),
                    });
                }
            }
        }
    }
}

fn layers_related(own: &str, layer: Option<&str>) -> bool {
    match layer {
        None => false,
        Some(layer) => {
            own.starts_with(&format!("{}.", layer)) || layer.starts_with(&format!("{}.", own))
        }
    }
}

impl Layout for LayoutTree {
    fn iter_layer_keys(&self, layer: Option<&str>) -> Vec<LayerKey> {
        let mut keys = Vec::new();
        let state = PathState {
            found_layer: None,
            scannable: true,
            scan_priority: None,
        };
        Self::collect(&self.root, layer, state, &mut keys);
        keys
    }
}
