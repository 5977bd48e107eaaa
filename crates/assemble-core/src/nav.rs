//! Navigation tree shared by the NCX and the EPUB 3 navigation document.
//!
//! Points live in an arena indexed by [`NavId`]. Index 0 is a synthetic root
//! at level 1; the cursor marks where [`NavigationTree::add_nav_point`]
//! attaches new points.

use assemble_utils::xml::XmlBuilder;

use crate::options::WritingDirection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NavId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavPoint {
    pub label: String,
    /// Target path, possibly with a `#fragment`. Points without one are
    /// containers.
    pub content_src: Option<String>,
    pub id: Option<String>,
    pub class: Option<String>,
    pub hidden: bool,
    pub direction: Option<WritingDirection>,
    children: Vec<NavId>,
    parent: Option<NavId>,
}

impl NavPoint {
    pub fn new(label: &str, content_src: Option<&str>) -> Self {
        Self {
            label: label.trim().to_string(),
            content_src: content_src
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            id: None,
            class: None,
            hidden: false,
            direction: None,
            children: Vec::new(),
            parent: None,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.trim().to_string()).filter(|s| !s.is_empty());
        self
    }

    pub fn with_class(mut self, class: &str) -> Self {
        self.class = Some(class.trim().to_string()).filter(|s| !s.is_empty());
        self
    }

    pub fn with_direction(mut self, direction: WritingDirection) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn children(&self) -> &[NavId] {
        &self.children
    }

    pub fn parent(&self) -> Option<NavId> {
        self.parent
    }
}

/// Ids used when rendering, one per arena slot.
#[derive(Debug, Clone)]
pub struct NavIds {
    ids: Vec<String>,
    play_orders: Vec<Option<usize>>,
}

impl NavIds {
    pub fn id(&self, point: NavId) -> &str {
        &self.ids[point.0]
    }

    pub fn play_order(&self, point: NavId) -> Option<usize> {
        self.play_orders[point.0]
    }
}

#[derive(Debug, Clone)]
pub struct NavigationTree {
    points: Vec<NavPoint>,
    cursor: NavId,
    last: NavId,
}

const ROOT: NavId = NavId(0);

impl NavigationTree {
    pub fn new(direction: WritingDirection) -> Self {
        let root = NavPoint::new("", None).with_direction(direction);
        Self {
            points: vec![root],
            cursor: ROOT,
            last: ROOT,
        }
    }

    pub fn root(&self) -> NavId {
        ROOT
    }

    pub fn cursor(&self) -> NavId {
        self.cursor
    }

    pub fn get(&self, id: NavId) -> &NavPoint {
        &self.points[id.0]
    }

    pub fn is_empty(&self) -> bool {
        self.points[ROOT.0].children.is_empty()
    }

    /// Number of points, excluding the root.
    pub fn len(&self) -> usize {
        self.points.len() - 1
    }

    /// Attach `point` as the last child of the cursor. A point without a
    /// direction inherits the cursor's.
    pub fn add_nav_point(&mut self, mut point: NavPoint) -> NavId {
        let parent = self.cursor;
        if point.direction.is_none() {
            point.direction = self.points[parent.0].direction;
        }
        point.parent = Some(parent);
        point.children.clear();
        let id = NavId(self.points.len());
        self.points.push(point);
        self.points[parent.0].children.push(id);
        self.last = id;
        id
    }

    /// With a point: attach it and move the cursor onto it. Without one:
    /// move the cursor onto the most recently added point.
    pub fn sub_level(&mut self, point: Option<NavPoint>) -> Option<NavId> {
        let added = point.map(|p| self.add_nav_point(p));
        self.cursor = self.last;
        added
    }

    pub fn back_level(&mut self) {
        self.last = self.cursor;
        self.cursor = self.points[self.cursor.0].parent.unwrap_or(ROOT);
    }

    pub fn root_level(&mut self) {
        self.last = self.cursor;
        self.cursor = ROOT;
    }

    /// Climb until the cursor is at most `level` deep.
    pub fn set_current_level(&mut self, level: usize) {
        if level <= 1 {
            self.root_level();
            return;
        }
        while self.level(self.cursor) > level {
            self.back_level();
        }
    }

    pub fn current_level(&self) -> usize {
        self.level(self.cursor)
    }

    /// Root is level 1, its children level 2, and so on.
    pub fn level(&self, point: NavId) -> usize {
        let mut level = 1;
        let mut current = point;
        while let Some(parent) = self.points[current.0].parent {
            level += 1;
            current = parent;
        }
        level
    }

    /// Depth-first walk over every point below the root.
    pub fn walk(&self) -> Vec<NavId> {
        let mut order = Vec::with_capacity(self.len());
        let mut stack: Vec<NavId> = self.points[ROOT.0].children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.points[id.0].children.iter().rev().copied());
        }
        order
    }

    /// Assign rendering ids in one pass so the NCX and the EPUB 3 document
    /// agree. Visible points with content get `navpoint-<playOrder>`; other
    /// points without an explicit id get `navpoint-n<index>`.
    pub fn assign_ids(&self) -> NavIds {
        let mut ids = vec![String::new(); self.points.len()];
        let mut play_orders = vec![None; self.points.len()];
        let mut play_order = 0;
        let mut other = 0;
        self.assign_into(ROOT, false, &mut ids, &mut play_orders, &mut play_order, &mut other);
        NavIds { ids, play_orders }
    }

    fn assign_into(
        &self,
        node: NavId,
        hidden_above: bool,
        ids: &mut [String],
        play_orders: &mut [Option<usize>],
        play_order: &mut usize,
        other: &mut usize,
    ) {
        for &child in &self.points[node.0].children {
            let point = &self.points[child.0];
            let hidden = hidden_above || point.hidden;
            if !hidden && point.content_src.is_some() {
                *play_order += 1;
                play_orders[child.0] = Some(*play_order);
            }
            ids[child.0] = match (&point.id, play_orders[child.0]) {
                (Some(id), _) => id.clone(),
                (None, Some(order)) => format!("navpoint-{order}"),
                (None, None) => {
                    *other += 1;
                    format!("navpoint-n{other}")
                }
            };
            self.assign_into(child, hidden, ids, play_orders, play_order, other);
        }
    }

    /// Write the NCX `<navMap>` and return the depth for `dtb:depth`.
    ///
    /// Hidden points and their subtrees are left out. A container has no
    /// `<navPoint>` of its own, so its children appear at its level.
    pub fn render_ncx_nav_map(&self, out: &mut XmlBuilder, ids: &NavIds) -> usize {
        out.open_tag("navMap", &[]);
        let mut depth = 0;
        for &child in &self.points[ROOT.0].children {
            depth = depth.max(self.render_ncx_point(out, ids, child, 1));
        }
        out.close_tag("navMap");
        depth.max(1)
    }

    fn render_ncx_point(&self, out: &mut XmlBuilder, ids: &NavIds, node: NavId, level: usize) -> usize {
        let point = &self.points[node.0];
        if point.hidden {
            return 0;
        }
        let mut depth = 0;
        let child_level = match (&point.content_src, ids.play_order(node)) {
            (Some(src), Some(order)) => {
                let order = order.to_string();
                let mut attrs: Vec<(&str, &str)> = vec![("id", ids.id(node)), ("playOrder", &order)];
                if let Some(class) = point.class.as_deref() {
                    attrs.push(("class", class));
                }
                out.open_tag("navPoint", &attrs);
                out.open_tag("navLabel", &[]);
                out.markup_element("text", &point.label, &[]);
                out.close_tag("navLabel");
                out.empty_tag("content", &[("src", src)]);
                depth = level;
                level + 1
            }
            _ => level,
        };
        for &child in &point.children {
            depth = depth.max(self.render_ncx_point(out, ids, child, child_level));
        }
        if point.content_src.is_some() {
            out.close_tag("navPoint");
        }
        depth
    }

    /// Write the EPUB 3 `<nav epub:type="toc">` element.
    pub fn render_toc_nav(&self, out: &mut XmlBuilder, ids: &NavIds) {
        out.open_tag("nav", &[("epub:type", "toc"), ("id", "toc")]);
        if !self.is_empty() {
            out.open_tag("ol", &[("epub:type", "list")]);
            for &child in &self.points[ROOT.0].children {
                self.render_toc_item(out, ids, child);
            }
            out.close_tag("ol");
        }
        out.close_tag("nav");
    }

    fn render_toc_item(&self, out: &mut XmlBuilder, ids: &NavIds, node: NavId) {
        let point = &self.points[node.0];
        let dir = self.direction_of(node).as_str();
        let mut li_attrs: Vec<(&str, &str)> = vec![("id", ids.id(node)), ("dir", dir)];
        if point.hidden {
            li_attrs.push(("hidden", "hidden"));
        }
        out.open_tag("li", &li_attrs);
        match point.content_src.as_deref() {
            Some(src) => out.markup_element("a", &point.label, &[("href", src), ("dir", dir)]),
            None => out.markup_element("span", &point.label, &[("dir", dir)]),
        };
        if !point.children.is_empty() {
            let mut ol_attrs: Vec<(&str, &str)> = vec![("epub:type", "list"), ("dir", dir)];
            if let Some(class) = point.class.as_deref() {
                ol_attrs.push(("class", class));
            }
            out.open_tag("ol", &ol_attrs);
            for &child in &point.children {
                self.render_toc_item(out, ids, child);
            }
            out.close_tag("ol");
        }
        out.close_tag("li");
    }

    /// Direction of the point, or of its nearest ancestor that has one.
    pub fn direction_of(&self, point: NavId) -> WritingDirection {
        let mut current = Some(point);
        while let Some(id) = current {
            if let Some(direction) = self.points[id.0].direction {
                return direction;
            }
            current = self.points[id.0].parent;
        }
        WritingDirection::Ltr
    }
}
