//! Lineage traversal over parent/child edges.
//!
//! Edges come from the tenant's `parent_link` view (family father and
//! mother against the family's child references) and spouses from the
//! family table. Handles are interned to dense indexes so ancestor sets can
//! be roaring bitmaps.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::BuildHasherDefault;

use roaring::RoaringBitmap;
use seahash::SeaHasher;
use serde::Serialize;
use tracing::debug;

use crate::config::GraphSettings;
use crate::error::Result;
use crate::persist::TenantConnection;
use crate::schema::LINEAGE_VIEW;

pub type HandleHasher = BuildHasherDefault<SeaHasher>;

pub const NO_RELATIONSHIP: &str = "no relationship found";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollapsedAncestor {
    pub handle: String,
    /// Every distinct path from the starting person up to this ancestor.
    pub paths: Vec<Vec<String>>,
}

/// An in-memory snapshot of the lineage graph.
#[derive(Debug, Default)]
pub struct Lineage {
    index: HashMap<String, u32, HandleHasher>,
    handles: Vec<String>,
    parents: Vec<Vec<u32>>,
    children: Vec<Vec<u32>>,
    spouses: Vec<Vec<u32>>,
}

impl Lineage {
    pub fn new() -> Self {
        Self::default()
    }

    fn intern(&mut self, handle: &str) -> u32 {
        if let Some(&id) = self.index.get(handle) {
            return id;
        }
        let id = self.handles.len() as u32;
        self.index.insert(handle.to_string(), id);
        self.handles.push(handle.to_string());
        self.parents.push(Vec::new());
        self.children.push(Vec::new());
        self.spouses.push(Vec::new());
        id
    }

    pub fn add_parent(&mut self, child: &str, parent: &str) {
        if child == parent {
            return;
        }
        let (child, parent) = (self.intern(child), self.intern(parent));
        if !self.parents[child as usize].contains(&parent) {
            self.parents[child as usize].push(parent);
            self.children[parent as usize].push(child);
        }
    }

    pub fn add_spouses(&mut self, a: &str, b: &str) {
        if a == b {
            return;
        }
        let (a, b) = (self.intern(a), self.intern(b));
        if !self.spouses[a as usize].contains(&b) {
            self.spouses[a as usize].push(b);
            self.spouses[b as usize].push(a);
        }
    }

    fn id(&self, handle: &str) -> Option<u32> {
        self.index.get(handle).copied()
    }

    fn handle(&self, id: u32) -> &str {
        &self.handles[id as usize]
    }

    fn path(&self, ids: &[u32]) -> Vec<String> {
        ids.iter().map(|&id| self.handle(id).to_string()).collect()
    }

    fn neighbours(&self, id: u32) -> impl Iterator<Item = u32> + '_ {
        self.parents[id as usize]
            .iter()
            .chain(self.children[id as usize].iter())
            .copied()
    }

    // Ancestors within `generations`, each with its nearest distance.
    fn ancestors(&self, id: u32, generations: usize) -> HashMap<u32, usize> {
        let mut found = HashMap::new();
        let mut queue = VecDeque::from([(id, 0usize)]);
        while let Some((current, depth)) = queue.pop_front() {
            if depth == generations {
                continue;
            }
            for &parent in &self.parents[current as usize] {
                if parent != id && !found.contains_key(&parent) {
                    found.insert(parent, depth + 1);
                    queue.push_back((parent, depth + 1));
                }
            }
        }
        found
    }

    fn ancestor_bitmap(&self, id: u32, generations: usize) -> RoaringBitmap {
        self.ancestors(id, generations).into_keys().collect()
    }

    /// Every simple path of at most `max_depth` parent/child edges.
    pub fn relationship_paths(&self, from: &str, to: &str, max_depth: usize) -> Vec<Vec<String>> {
        let (Some(from), Some(to)) = (self.id(from), self.id(to)) else {
            return Vec::new();
        };
        if from == to {
            return vec![self.path(&[from])];
        }
        let mut found = Vec::new();
        let mut path = vec![from];
        self.walk(to, max_depth, &mut path, &mut found);
        found.sort_by(|a: &Vec<String>, b: &Vec<String>| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        found
    }

    fn walk(&self, to: u32, max_depth: usize, path: &mut Vec<u32>, found: &mut Vec<Vec<String>>) {
        let Some(&current) = path.last() else {
            return;
        };
        if current == to {
            found.push(self.path(path));
            return;
        }
        if path.len() > max_depth {
            return;
        }
        let next: Vec<u32> = self.neighbours(current).filter(|n| !path.contains(n)).collect();
        for neighbour in next {
            path.push(neighbour);
            self.walk(to, max_depth, path, found);
            path.pop();
        }
    }

    /// Handles that are ancestors of every given person.
    pub fn common_ancestors(&self, handles: &[&str], max_generations: usize) -> Vec<String> {
        let mut sets = handles.iter().map(|handle| match self.id(handle) {
            Some(id) => self.ancestor_bitmap(id, max_generations),
            None => RoaringBitmap::new(),
        });
        let Some(first) = sets.next() else {
            return Vec::new();
        };
        let shared = sets.fold(first, |acc, set| acc & set);
        let mut common: Vec<String> = shared.iter().map(|id| self.handle(id).to_string()).collect();
        common.sort();
        common
    }

    /// How `to` is related to `from`, e.g. `grandparent` or
    /// `2nd cousin once removed`.
    pub fn nearest_relationship(&self, from: &str, to: &str, max_generations: usize) -> String {
        if from == to {
            return "same person".into();
        }
        let (Some(a), Some(b)) = (self.id(from), self.id(to)) else {
            return NO_RELATIONSHIP.into();
        };
        if self.spouses[a as usize].contains(&b) {
            return "spouse".into();
        }
        let mut up_a = self.ancestors(a, max_generations);
        up_a.insert(a, 0);
        let mut up_b = self.ancestors(b, max_generations);
        up_b.insert(b, 0);
        let nearest = up_a
            .iter()
            .filter_map(|(ancestor, &da)| up_b.get(ancestor).map(|&db| (da + db, da, db)))
            .min();
        match nearest {
            Some((_, da, db)) => relationship_label(da, db),
            None => NO_RELATIONSHIP.into(),
        }
    }

    /// Ancestors reached through more than one distinct path.
    pub fn pedigree_collapse(&self, handle: &str, generations: usize) -> Vec<CollapsedAncestor> {
        let Some(start) = self.id(handle) else {
            return Vec::new();
        };
        let mut paths: BTreeMap<String, Vec<Vec<String>>> = BTreeMap::new();
        let mut stack = vec![(vec![start], 0usize)];
        while let Some((path, depth)) = stack.pop() {
            let Some(&current) = path.last() else {
                continue;
            };
            if depth > 0 {
                paths.entry(self.handle(current).to_string()).or_default().push(self.path(&path));
            }
            if depth == generations {
                continue;
            }
            for &parent in &self.parents[current as usize] {
                if !path.contains(&parent) {
                    let mut next = path.clone();
                    next.push(parent);
                    stack.push((next, depth + 1));
                }
            }
        }
        paths
            .into_iter()
            .filter(|(_, paths)| paths.len() > 1)
            .map(|(handle, mut paths)| {
                paths.sort();
                CollapsedAncestor { handle, paths }
            })
            .collect()
    }
}

fn ordinal(n: usize) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{}{}", n, suffix)
}

fn greats(n: usize) -> String {
    "great-".repeat(n)
}

/// Label for a person `db` generations below the common ancestor, seen
/// from a person `da` generations below it.
pub fn relationship_label(da: usize, db: usize) -> String {
    match (da, db) {
        (0, 0) => "same person".into(),
        (0, 1) => "child".into(),
        (0, n) => format!("{}grandchild", greats(n - 2)),
        (1, 0) => "parent".into(),
        (n, 0) => format!("{}grandparent", greats(n - 2)),
        (1, 1) => "sibling".into(),
        (1, n) => format!("{}niece/nephew", greats(n - 2)),
        (n, 1) => format!("{}aunt/uncle", greats(n - 2)),
        (da, db) => {
            let degree = da.min(db) - 1;
            let removed = da.abs_diff(db);
            let cousin = format!("{} cousin", ordinal(degree));
            match removed {
                0 => cousin,
                1 => format!("{} once removed", cousin),
                2 => format!("{} twice removed", cousin),
                n => format!("{} {} times removed", cousin, n),
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct GraphApi {
    connection: TenantConnection,
    settings: GraphSettings,
}

impl GraphApi {
    pub fn new(connection: TenantConnection, settings: GraphSettings) -> Self {
        Self { connection, settings }
    }

    pub fn settings(&self) -> &GraphSettings {
        &self.settings
    }

    /// Reads the current lineage. Each call sees the latest data.
    pub fn lineage(&self) -> Result<Lineage> {
        let view = self.connection.scope().object_name(LINEAGE_VIEW);
        let edges = self.connection.query(
            &format!("select child, parent from {} where child is not null", view),
            [],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )?;
        let couples = self.connection.query(
            "select father_handle, mother_handle from family
              where father_handle is not null and mother_handle is not null",
            [],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )?;
        let mut lineage = Lineage::new();
        for (child, parent) in &edges {
            lineage.add_parent(child, parent);
        }
        for (father, mother) in &couples {
            lineage.add_spouses(father, mother);
        }
        debug!(people = lineage.handles.len(), edges = edges.len(), "loaded lineage");
        Ok(lineage)
    }

    pub fn relationship_paths(&self, from: &str, to: &str, max_depth: usize) -> Result<Vec<Vec<String>>> {
        Ok(self.lineage()?.relationship_paths(from, to, max_depth))
    }

    pub fn common_ancestors(&self, handles: &[&str], max_generations: usize) -> Result<Vec<String>> {
        Ok(self.lineage()?.common_ancestors(handles, max_generations))
    }

    pub fn nearest_relationship(&self, from: &str, to: &str) -> Result<String> {
        Ok(self.lineage()?.nearest_relationship(from, to, self.settings.max_generations))
    }

    pub fn pedigree_collapse(&self, handle: &str, generations: usize) -> Result<Vec<CollapsedAncestor>> {
        Ok(self.lineage()?.pedigree_collapse(handle, generations))
    }
}
