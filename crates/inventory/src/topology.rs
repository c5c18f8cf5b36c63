//! Parent/child reconstruction over a flat record list.
//!
//! Records reference their parent by `parent_device_id`. A filtered record
//! is attached under its real ancestors even when those ancestors did not
//! match the filter, so the full unfiltered list is needed to resolve them.
//! Everything without a resolvable parent hangs off a synthetic host node.

use hwscope_core::{ClassGuid, DeviceRecord};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
pub struct ForestNode {
    pub record: DeviceRecord,
    /// Indices into [`DeviceForest::nodes`], ordered by description.
    pub children: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TopologyIssue {
    /// The parent id does not exist in the enumeration.
    DanglingParent {
        device_id: String,
        parent_device_id: String,
    },
    /// The record is its own ancestor; it was attached as a root.
    Cycle { device_id: String },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceForest {
    pub host_label: String,
    pub nodes: Vec<ForestNode>,
    pub roots: Vec<usize>,
    pub issues: Vec<TopologyIssue>,
}

impl DeviceForest {
    pub fn empty(host_label: &str) -> Self {
        Self {
            host_label: host_label.to_string(),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> Option<&ForestNode> {
        self.nodes.get(index)
    }

    /// Structural node for `device_id`; device entries win over interfaces.
    pub fn find(&self, device_id: &str) -> Option<&ForestNode> {
        let mut matches = self.nodes.iter().filter(|n| n.record.device_id == device_id);
        let first = matches.next()?;
        if !first.record.is_interface {
            return Some(first);
        }
        matches.find(|n| !n.record.is_interface).or(Some(first))
    }

    pub fn child_ids(&self, device_id: &str) -> Vec<&str> {
        self.find(device_id)
            .map(|node| {
                node.children
                    .iter()
                    .map(|&c| self.nodes[c].record.device_id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn root_ids(&self) -> Vec<&str> {
        self.roots
            .iter()
            .map(|&r| self.nodes[r].record.device_id.as_str())
            .collect()
    }

    /// Depth-first order with depth (roots are depth 0).
    pub fn walk(&self) -> Vec<(usize, &ForestNode)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(usize, usize)> = self.roots.iter().rev().map(|&r| (0, r)).collect();
        while let Some((depth, index)) = stack.pop() {
            let node = &self.nodes[index];
            out.push((depth, node));
            stack.extend(node.children.iter().rev().map(|&c| (depth + 1, c)));
        }
        out
    }

    pub fn class_guids(&self) -> BTreeSet<ClassGuid> {
        self.nodes.iter().map(|n| n.record.class_guid).collect()
    }
}

/// Build the forest for `filtered`, splicing in ancestors from `all`.
///
/// `all` must list devices before interfaces; the first non-interface record
/// with a given id is the structural node for that id.
pub fn build_forest<'a>(
    filtered: impl IntoIterator<Item = &'a DeviceRecord>,
    all: &'a [DeviceRecord],
    host_label: &str,
) -> DeviceForest {
    let mut structural: HashMap<&str, &DeviceRecord> = HashMap::new();
    for record in all.iter().filter(|r| !r.is_interface) {
        structural.entry(record.device_id.as_str()).or_insert(record);
    }

    let mut included: Vec<&DeviceRecord> = Vec::new();
    let mut included_keys: HashSet<(&str, bool)> = HashSet::new();
    let mut issues = Vec::new();
    let mut include = |record: &'a DeviceRecord, included: &mut Vec<&'a DeviceRecord>| {
        let fresh = included_keys.insert((record.device_id.as_str(), record.is_interface));
        if fresh {
            included.push(record);
        }
        fresh
    };

    for record in filtered {
        if !include(record, &mut included) {
            continue;
        }
        let mut current = record;
        let mut seen: HashSet<&str> = HashSet::from([record.device_id.as_str()]);
        while !current.parent_device_id.is_empty() {
            let parent_id = current.parent_device_id.as_str();
            let Some(parent) = structural.get(parent_id).copied() else {
                issues.push(TopologyIssue::DanglingParent {
                    device_id: current.device_id.clone(),
                    parent_device_id: parent_id.to_string(),
                });
                break;
            };
            if !seen.insert(parent_id) {
                // reported when the cycle is promoted in `link`
                break;
            }
            if !include(parent, &mut included) {
                break;
            }
            current = parent;
        }
    }

    link(included, issues, host_label)
}

fn link(included: Vec<&DeviceRecord>, mut issues: Vec<TopologyIssue>, host_label: &str) -> DeviceForest {
    let mut node_by_id: HashMap<&str, usize> = HashMap::new();
    let mut by_parent: HashMap<&str, Vec<usize>> = HashMap::new();
    for (index, record) in included.iter().enumerate() {
        if !record.is_interface {
            node_by_id.entry(record.device_id.as_str()).or_insert(index);
        }
        if !record.parent_device_id.is_empty() {
            by_parent
                .entry(record.parent_device_id.as_str())
                .or_default()
                .push(index);
        }
    }

    let mut roots: Vec<usize> = (0..included.len())
        .filter(|&i| {
            let parent = included[i].parent_device_id.as_str();
            parent.is_empty() || !node_by_id.contains_key(parent)
        })
        .collect();
    sort_by_description(&mut roots, &included);

    let mut visited = vec![false; included.len()];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); included.len()];
    for &root in &roots {
        attach(root, &included, &by_parent, &mut visited, &mut children);
    }

    // Anything still unreached hangs below a parent cycle.
    for index in 0..included.len() {
        if visited[index] {
            continue;
        }
        let entry = cycle_entry(index, &included, &node_by_id);
        let device_id = included[entry].device_id.clone();
        debug!(device_id = %device_id, "promoting record on parent cycle to root");
        issues.push(TopologyIssue::Cycle { device_id });
        roots.push(entry);
        attach(entry, &included, &by_parent, &mut visited, &mut children);
    }
    sort_by_description(&mut roots, &included);

    let nodes = included
        .into_iter()
        .zip(children)
        .map(|(record, children)| ForestNode {
            record: record.clone(),
            children,
        })
        .collect();

    DeviceForest {
        host_label: host_label.to_string(),
        nodes,
        roots,
        issues,
    }
}

fn attach(
    start: usize,
    included: &[&DeviceRecord],
    by_parent: &HashMap<&str, Vec<usize>>,
    visited: &mut [bool],
    children: &mut [Vec<usize>],
) {
    visited[start] = true;
    let mut stack = vec![start];
    while let Some(index) = stack.pop() {
        let record = included[index];
        if record.is_interface {
            continue;
        }
        let Some(candidates) = by_parent.get(record.device_id.as_str()) else {
            continue;
        };
        let mut kids: Vec<usize> = candidates.iter().copied().filter(|&k| !visited[k]).collect();
        sort_by_description(&mut kids, included);
        for &kid in &kids {
            visited[kid] = true;
            stack.push(kid);
        }
        children[index] = kids;
    }
}

/// First record met twice when following parents up from `start`.
fn cycle_entry(start: usize, included: &[&DeviceRecord], node_by_id: &HashMap<&str, usize>) -> usize {
    let mut seen = HashSet::new();
    let mut current = start;
    while seen.insert(current) {
        match node_by_id.get(included[current].parent_device_id.as_str()) {
            Some(&parent) => current = parent,
            None => break,
        }
    }
    current
}

/// Case-insensitive, with the exact text as tie-break so the order is total.
fn sort_by_description(indices: &mut [usize], included: &[&DeviceRecord]) {
    indices.sort_by_cached_key(|&i| {
        let description = &included[i].description;
        (description.to_lowercase(), description.clone())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::DeviceFilter;

    fn rec(id: &str, parent: &str, description: &str) -> DeviceRecord {
        DeviceRecord::new(id, parent, description)
    }

    fn assert_is_forest(forest: &DeviceForest) {
        let mut parents = vec![0usize; forest.len()];
        for node in &forest.nodes {
            for &child in &node.children {
                parents[child] += 1;
            }
        }
        for &root in &forest.roots {
            assert_eq!(parents[root], 0, "root has a parent");
        }
        assert!(parents.iter().all(|&p| p <= 1), "node with two parents");
        // every node reachable exactly once from the roots
        assert_eq!(forest.walk().len(), forest.len());
    }

    #[test]
    fn filtered_child_pulls_in_its_ancestor() {
        let all = vec![rec("A1", "", "Root Hub"), rec("B1", "A1", "Port1")];
        let filter = DeviceFilter::new("Port1");
        let forest = build_forest(filter.apply(&all), &all, "WORKSTATION");
        assert_eq!(forest.root_ids(), vec!["A1"]);
        assert_eq!(forest.child_ids("A1"), vec!["B1"]);
        assert_eq!(forest.len(), 2);
        assert_eq!(forest.host_label, "WORKSTATION");
        assert!(forest.issues.is_empty());
    }

    #[test]
    fn children_are_ordered_by_description() {
        let all = vec![
            rec("root", "", "Computer"),
            rec("c", "root", "Zeta"),
            rec("a", "root", "Alpha"),
            rec("b", "root", "Mid"),
        ];
        let forest = build_forest(&all, &all, "host");
        assert_eq!(forest.child_ids("root"), vec!["a", "b", "c"]);
    }

    #[test]
    fn shared_ancestor_is_included_once() {
        let all = vec![
            rec("root", "", "Computer"),
            rec("hub", "root", "Hub"),
            rec("p1", "hub", "Pad One"),
            rec("p2", "hub", "Pad Two"),
        ];
        let filter = DeviceFilter::new("pad");
        let forest = build_forest(filter.apply(&all), &all, "host");
        assert_eq!(forest.len(), 4);
        assert_eq!(forest.child_ids("hub"), vec!["p1", "p2"]);
        assert_is_forest(&forest);
    }

    #[test]
    fn dangling_parent_becomes_root_and_is_reported() {
        let all = vec![rec("orphan", "gone", "Orphan"), rec("root", "", "Computer")];
        let forest = build_forest(&all, &all, "host");
        assert_eq!(forest.root_ids(), vec!["root", "orphan"]);
        assert_eq!(
            forest.issues,
            vec![TopologyIssue::DanglingParent {
                device_id: "orphan".to_string(),
                parent_device_id: "gone".to_string(),
            }]
        );
    }

    #[test]
    fn cycle_does_not_loop_and_yields_forest() {
        let all = vec![
            rec("x", "z", "X"),
            rec("y", "x", "Y"),
            rec("z", "y", "Z"),
            rec("self", "self", "Self"),
        ];
        let forest = build_forest(&all, &all, "host");
        assert_eq!(forest.len(), 4);
        assert_is_forest(&forest);
        assert!(forest
            .issues
            .iter()
            .any(|i| matches!(i, TopologyIssue::Cycle { device_id } if device_id == "self")));
        assert_eq!(forest.roots.len(), 2);
    }

    #[test]
    fn cycle_reached_from_filtered_leaf_terminates() {
        let all = vec![rec("a", "b", "A"), rec("b", "a", "B"), rec("leaf", "a", "Leaf")];
        let filter = DeviceFilter::new("leaf");
        let forest = build_forest(filter.apply(&all), &all, "host");
        assert_eq!(forest.len(), 3);
        assert_is_forest(&forest);
        // the leaf keeps its real parent; the cycle is cut above it
        assert_eq!(forest.root_ids(), vec!["a"]);
        assert_eq!(forest.child_ids("a"), vec!["b", "leaf"]);
        assert_eq!(
            forest.issues,
            vec![TopologyIssue::Cycle {
                device_id: "a".to_string()
            }]
        );
    }

    #[test]
    fn device_wins_over_interface_with_same_id() {
        let mut iface = rec("dev", "", "Zz Interface");
        iface.is_interface = true;
        let all = vec![
            rec("root", "", "Computer"),
            rec("dev", "root", "Device"),
            rec("child", "dev", "Child"),
            iface,
        ];
        let forest = build_forest(&all, &all, "host");
        assert_eq!(forest.len(), 4);
        let device = forest.find("dev").unwrap();
        assert!(!device.record.is_interface);
        assert_eq!(forest.child_ids("dev"), vec!["child"]);
        // the interface has no parent id, so it sits beside the real root
        assert_eq!(forest.root_ids(), vec!["root", "dev"]);
        let iface_node = forest.nodes.iter().find(|n| n.record.is_interface).unwrap();
        assert!(iface_node.children.is_empty());
        assert_is_forest(&forest);
    }

    #[test]
    fn interface_children_stay_leaves() {
        let mut iface = rec("1-1:1.0", "1-1", "HID Interface");
        iface.is_interface = true;
        let all = vec![rec("1-1", "", "Keyboard"), iface];
        let filter = DeviceFilter::new("hid");
        let forest = build_forest(filter.apply(&all), &all, "host");
        assert_eq!(forest.root_ids(), vec!["1-1"]);
        assert_eq!(forest.child_ids("1-1"), vec!["1-1:1.0"]);
    }

    #[test]
    fn walk_is_depth_first_in_child_order() {
        let all = vec![
            rec("r", "", "Root"),
            rec("b", "r", "B"),
            rec("a", "r", "A"),
            rec("a1", "a", "A1"),
        ];
        let forest = build_forest(&all, &all, "host");
        let order: Vec<(usize, &str)> = forest
            .walk()
            .into_iter()
            .map(|(d, n)| (d, n.record.device_id.as_str()))
            .collect();
        assert_eq!(order, vec![(0, "r"), (1, "a"), (2, "a1"), (1, "b")]);
    }

    #[test]
    fn empty_input_gives_empty_forest() {
        let forest = build_forest(std::iter::empty(), &[], "host");
        assert!(forest.is_empty());
        assert!(forest.roots.is_empty());
    }

    #[test]
    fn siblings_sort_ignoring_case() {
        let all = vec![
            rec("root", "", "Root Hub"),
            rec("u", "root", "USB Input Device"),
            rec("e", "root", "eHome Infrared Receiver"),
            rec("h", "root", "HID-compliant mouse"),
            rec("z", "", "another root"),
        ];
        let forest = build_forest(&all, &all, "host");
        assert_eq!(forest.child_ids("root"), vec!["e", "h", "u"]);
        assert_eq!(forest.root_ids(), vec!["z", "root"]);
    }
}
