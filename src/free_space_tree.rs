//! Space Tree
//!
//! The hierarchical free-space representation: a DAG of regions per ULD. A leaf holds live
//! free volume; leaves may overlap, and the overlap graph is maintained explicitly so that
//! placing a parcel inside one leaf updates every other leaf it touches. Compared to the flat
//! list this is more bookkeeping per commit, but a search can skip whole retired subtrees
//! instead of re-scanning duplicative slabs.
//!
//! Ownership discipline: parent → child edges own the nodes; overlap edges and parent
//! back-references are weak. A node is subdivided by the single placement that touches it and
//! is never modified again afterwards.
//!

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use crate::derivative::Derivative;
use crate::parking_lot::RwLock;
use crate::weak_table::PtrWeakKeyHashMap;

use super::free_space::*;
use super::util::*;

/// one region of the space tree
#[derive(Derivative)]
#[derivative(Debug)]
pub struct SpaceNode {
    /// the index of this node, unique within its tree
    pub node_id: NodeIndex,
    /// the region this node stands for
    pub region: Region,
    /// a leaf holds live free volume; an internal node is entirely represented by descendants
    pub is_leaf: bool,
    /// owning parent, absent on the root
    #[derivative(Debug = "ignore")]
    pub parent: Option<SpaceNodeWeak>,
    /// owned children, created by the one subdivision that retires this node
    #[derivative(Debug = "ignore")]
    pub children: Vec<SpaceNodePtr>,
    /// symmetric non-owning associations to peer leaves sharing volume, with the shared region
    #[derivative(Debug = "ignore")]
    pub overlaps: Vec<(SpaceNodeWeak, Region)>,
}

/// strong handle to a node; the tree owns every node through these, root downwards
pub struct SpaceNodePtr {
    ptr: Arc<RwLock<SpaceNode>>,
}

/// non-owning handle, used by overlap edges and parent back-references so the node
/// graph stays free of strong-reference cycles
pub struct SpaceNodeWeak {
    ptr: Weak<RwLock<SpaceNode>>,
}

impl SpaceNodePtr {
    pub fn new(node: SpaceNode) -> Self {
        Self {
            ptr: Arc::new(RwLock::new(node)),
        }
    }

    pub fn downgrade(&self) -> SpaceNodeWeak {
        SpaceNodeWeak {
            ptr: Arc::downgrade(&self.ptr),
        }
    }

    /// pointer identity; node ids would do as well but require taking the lock
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.ptr, &other.ptr)
    }
}

impl SpaceNodeWeak {
    pub fn upgrade(&self) -> Option<SpaceNodePtr> {
        self.ptr.upgrade().map(|ptr| SpaceNodePtr { ptr })
    }

    /// edges only ever point inside the owning tree, so upgrading a live edge cannot fail
    pub fn upgrade_force(&self) -> SpaceNodePtr {
        self.upgrade().expect("overlap edge outlived its space tree")
    }
}

impl std::ops::Deref for SpaceNodePtr {
    // the lock interface (`read_recursive`, `write`) is the node interface
    type Target = RwLock<SpaceNode>;
    fn deref(&self) -> &Self::Target {
        &self.ptr
    }
}

impl Clone for SpaceNodePtr {
    fn clone(&self) -> Self {
        Self {
            ptr: Arc::clone(&self.ptr),
        }
    }
}

impl Clone for SpaceNodeWeak {
    fn clone(&self) -> Self {
        Self { ptr: self.ptr.clone() }
    }
}

impl PartialEq for SpaceNodePtr {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for SpaceNodePtr {}

impl PartialEq for SpaceNodeWeak {
    fn eq(&self, other: &Self) -> bool {
        self.ptr.ptr_eq(&other.ptr)
    }
}

impl Eq for SpaceNodeWeak {}

// lets the signalling lists key by node identity while staying non-owning
impl crate::weak_table::traits::WeakElement for SpaceNodeWeak {
    type Strong = SpaceNodePtr;
    fn new(view: &Self::Strong) -> Self {
        view.downgrade()
    }
    fn view(&self) -> Option<Self::Strong> {
        self.upgrade()
    }
}

impl std::fmt::Debug for SpaceNodePtr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let node = self.read_recursive();
        write!(f, "{}", node.node_id)
    }
}

impl std::fmt::Debug for SpaceNodeWeak {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.upgrade_force().fmt(f)
    }
}

pub struct FreeSpaceTree {
    /// the root spans the whole ULD interior and transitively owns every node
    pub root: SpaceNodePtr,
    /// the whole ULD interior
    uld_region: Region,
    /// slabs thinner than this in any axis are unpackable and dropped
    min_dimension: Length,
    /// the next node index to assign
    node_count: NodeNum,
    /// the number of overlap links currently alive, kept for the profiler
    link_count: usize,
    /// boxes committed so far, in commit order
    committed: Vec<Region>,
    /// per implicated node, the untouched neighbours whose edges must be rewired to its
    /// children once every subdivision of this placement has finished
    unidirectional_signalling: PtrWeakKeyHashMap<SpaceNodeWeak, Vec<SpaceNodeWeak>>,
    /// pairs of implicated nodes whose edge must be rewired child-to-child
    bidirectional_signalling: Vec<(SpaceNodeWeak, SpaceNodeWeak)>,
}

impl FreeSpaceTree {
    fn next_node_id(&mut self) -> NodeIndex {
        let node_id = self.node_count;
        self.node_count += 1;
        node_id
    }

    /// add a symmetric overlap edge between two distinct leaves if they share volume
    fn add_link(&mut self, first: &SpaceNodePtr, second: &SpaceNodePtr) {
        debug_assert!(!first.ptr_eq(second), "linking a node to itself");
        let overlap = {
            let first_region = first.read_recursive().region;
            let second_region = second.read_recursive().region;
            first_region.intersection(&second_region)
        };
        if let Some(overlap) = overlap {
            let already_linked = first
                .read_recursive()
                .overlaps
                .iter()
                .any(|(peer, _)| peer == &second.downgrade());
            if !already_linked {
                first.write().overlaps.push((second.downgrade(), overlap));
                second.write().overlaps.push((first.downgrade(), overlap));
                self.link_count += 1;
            }
        }
    }

    /// drop the mutual edge between two nodes, if present
    fn remove_links_between(&mut self, first: &SpaceNodePtr, second: &SpaceNodePtr) {
        let before = first.read_recursive().overlaps.len();
        first.write().overlaps.retain(|(peer, _)| peer != &second.downgrade());
        let removed = before - first.read_recursive().overlaps.len();
        second.write().overlaps.retain(|(peer, _)| peer != &first.downgrade());
        self.link_count -= removed;
    }

    /// subdivide one implicated node against the part of the parcel box that crosses into it,
    /// and queue its old edges on the signalling lists; edges are not touched here so that a
    /// node is never visited mid-subdivision
    fn subdivide(&mut self, node_ptr: &SpaceNodePtr, crossed: &Region, implicated: &[(SpaceNodePtr, Region)]) {
        let (region, old_overlaps) = {
            let node = node_ptr.read_recursive();
            assert!(
                node.is_leaf,
                "subdividing non-leaf node {} against box {:?}",
                node.node_id, crossed
            );
            (node.region, node.overlaps.clone())
        };
        let mut children = vec![];
        for child_region in region.subtract(crossed, self.min_dimension) {
            // a child completely covered by a neighbour leaf is redundant with that neighbour
            let redundant = old_overlaps.iter().any(|(_, overlap)| overlap.contains(&child_region));
            if redundant {
                continue;
            }
            let node_id = self.next_node_id();
            children.push(SpaceNodePtr::new(SpaceNode {
                node_id,
                region: child_region,
                is_leaf: true,
                parent: Some(node_ptr.downgrade()),
                children: vec![],
                overlaps: vec![],
            }));
        }
        {
            let mut node = node_ptr.write();
            node.children = children.clone();
            node.is_leaf = false;
        }
        // intra-family overlap edges between the new children
        for i in 0..children.len() {
            for j in (i + 1)..children.len() {
                self.add_link(&children[i], &children[j]);
            }
        }
        // classify the old edges: a neighbour the parcel also touches is handled pairwise,
        // an untouched neighbour only needs its single edge rewired
        for (peer_weak, _overlap) in old_overlaps {
            let peer_ptr = peer_weak.upgrade_force();
            let peer_implicated = implicated.iter().any(|(ptr, _)| ptr.ptr_eq(&peer_ptr));
            if peer_implicated {
                let node_weak = node_ptr.downgrade();
                let duplicate = self
                    .bidirectional_signalling
                    .iter()
                    .any(|(a, b)| (a == &node_weak && b == &peer_weak) || (a == &peer_weak && b == &node_weak));
                if !duplicate {
                    self.bidirectional_signalling.push((node_weak, peer_weak));
                }
            } else if let Some(list) = self.unidirectional_signalling.get_mut(node_ptr) {
                list.push(peer_weak);
            } else {
                self.unidirectional_signalling.insert(node_ptr.clone(), vec![peer_weak]);
            }
        }
    }

    /// second phase of a placement: rewire the inter-family overlap graph recorded on the
    /// signalling lists, retiring every edge into the now-internal nodes
    fn perform_link_updates(&mut self) {
        let unidirectional: Vec<(SpaceNodePtr, Vec<SpaceNodeWeak>)> = self.unidirectional_signalling.drain().collect();
        for (node_ptr, peers) in unidirectional {
            let children = node_ptr.read_recursive().children.clone();
            for peer_weak in peers {
                let peer_ptr = peer_weak.upgrade_force();
                for child in children.iter() {
                    self.add_link(&peer_ptr, child);
                }
                self.remove_links_between(&peer_ptr, &node_ptr);
            }
        }
        let bidirectional = std::mem::take(&mut self.bidirectional_signalling);
        for (first_weak, second_weak) in bidirectional {
            let first_ptr = first_weak.upgrade_force();
            let second_ptr = second_weak.upgrade_force();
            self.remove_links_between(&first_ptr, &second_ptr);
            let first_children = first_ptr.read_recursive().children.clone();
            let second_children = second_ptr.read_recursive().children.clone();
            for first_child in first_children.iter() {
                for second_child in second_children.iter() {
                    self.add_link(first_child, second_child);
                }
            }
        }
    }

    /// all live leaves, in breadth-first order from the root
    pub fn leaves(&self) -> Vec<SpaceNodePtr> {
        let mut leaves = vec![];
        let mut queue = VecDeque::new();
        queue.push_back(self.root.clone());
        while let Some(node_ptr) = queue.pop_front() {
            let node = node_ptr.read_recursive();
            if node.is_leaf {
                drop(node);
                leaves.push(node_ptr);
            } else {
                for child in node.children.iter() {
                    queue.push_back(child.clone());
                }
            }
        }
        leaves
    }
}

impl FreeSpaceImpl for FreeSpaceTree {
    type Handle = SpaceNodeWeak;

    fn new_uld(dimensions: Dims, min_dimension: Length) -> Self {
        assert!(min_dimension > 0, "non-positive minimum dimension {}", min_dimension);
        let uld_region = Region::from_dimensions(dimensions);
        let root = SpaceNodePtr::new(SpaceNode {
            node_id: 0,
            region: uld_region,
            is_leaf: true,
            parent: None,
            children: vec![],
            overlaps: vec![],
        });
        Self {
            root,
            uld_region,
            min_dimension,
            node_count: 1,
            link_count: 0,
            committed: vec![],
            unidirectional_signalling: PtrWeakKeyHashMap::new(),
            bidirectional_signalling: vec![],
        }
    }

    fn clear(&mut self) {
        self.root = SpaceNodePtr::new(SpaceNode {
            node_id: 0,
            region: self.uld_region,
            is_leaf: true,
            parent: None,
            children: vec![],
            overlaps: vec![],
        });
        self.node_count = 1;
        self.link_count = 0;
        self.committed.clear();
        self.unidirectional_signalling = PtrWeakKeyHashMap::new();
        self.bidirectional_signalling.clear();
    }

    fn find_fit(&self, natural: &Dims, config: &FitConfig) -> Option<FitChoice<SpaceNodeWeak>> {
        let mut selector = FitSelector::new(natural, config);
        let mut queue = VecDeque::new();
        queue.push_back(self.root.clone());
        while let Some(node_ptr) = queue.pop_front() {
            let node = node_ptr.read_recursive();
            if node.is_leaf {
                let region = node.region;
                drop(node);
                if selector.offer(region, node_ptr.downgrade()) {
                    break;
                }
            } else {
                for child in node.children.iter() {
                    queue.push_back(child.clone());
                }
            }
        }
        selector.finish()
    }

    fn commit(&mut self, fit: &FitChoice<SpaceNodeWeak>) {
        let leaf_ptr = fit.handle.upgrade().expect("fit handle outlived its tree");
        let hole = Region::new(fit.anchor, fit.oriented);
        {
            let leaf = leaf_ptr.read_recursive();
            assert!(leaf.is_leaf, "committing box {:?} into non-leaf node {}", hole, leaf.node_id);
            assert!(
                leaf.region.contains(&hole),
                "box {:?} escapes node {} region {:?}",
                hole,
                leaf.node_id,
                leaf.region
            );
        }
        // gather the implicated set: the leaf plus every neighbour the box crosses into
        let mut implicated: Vec<(SpaceNodePtr, Region)> = vec![(leaf_ptr.clone(), hole)];
        {
            let leaf = leaf_ptr.read_recursive();
            for (peer_weak, _overlap) in leaf.overlaps.iter() {
                let peer_ptr = peer_weak.upgrade_force();
                let peer = peer_ptr.read_recursive();
                assert!(
                    peer.is_leaf,
                    "node {} is a neighbour of non-leaf node {}",
                    leaf.node_id, peer.node_id
                );
                if let Some(crossed) = hole.intersection(&peer.region) {
                    drop(peer);
                    implicated.push((peer_ptr.clone(), crossed));
                }
            }
        }
        debug_assert!(self.bidirectional_signalling.is_empty(), "signalling left over from a previous commit");
        for (node_ptr, crossed) in implicated.iter() {
            self.subdivide(node_ptr, crossed, &implicated);
        }
        self.perform_link_updates();
        self.committed.push(hole);
    }

    fn free_regions(&self) -> Vec<Region> {
        self.leaves().iter().map(|leaf| leaf.read_recursive().region).collect()
    }

    fn committed_regions(&self) -> &[Region] {
        &self.committed
    }

    fn sanity_check(&self) -> Result<(), String> {
        // walk the whole DAG once, checking the node state machine on the way
        let mut queue = VecDeque::new();
        queue.push_back(self.root.clone());
        while let Some(node_ptr) = queue.pop_front() {
            let node = node_ptr.read_recursive();
            if node.is_leaf {
                if !node.children.is_empty() {
                    return Err(format!("leaf node {} has children", node.node_id));
                }
            } else {
                if !node.overlaps.is_empty() {
                    return Err(format!("internal node {} still carries overlap edges", node.node_id));
                }
                for child in node.children.iter() {
                    queue.push_back(child.clone());
                }
            }
        }
        let leaves = self.leaves();
        for leaf_ptr in leaves.iter() {
            let leaf = leaf_ptr.read_recursive();
            if !self.uld_region.contains(&leaf.region) {
                return Err(format!("leaf node {} escapes the ULD {:?}", leaf.node_id, self.uld_region));
            }
            if leaf.region.extent.iter().any(|&e| e < self.min_dimension) {
                return Err(format!(
                    "leaf node {} thinner than the minimum dimension {}",
                    leaf.node_id, self.min_dimension
                ));
            }
            for committed in self.committed.iter() {
                if !leaf.region.is_disjoint(committed) {
                    return Err(format!(
                        "leaf node {} intersects committed box {:?}",
                        leaf.node_id, committed
                    ));
                }
            }
            // every edge points at a live leaf, symmetrically, with the true intersection
            for (peer_weak, overlap) in leaf.overlaps.iter() {
                let peer_ptr = peer_weak
                    .upgrade()
                    .ok_or_else(|| format!("leaf node {} holds a dangling overlap edge", leaf.node_id))?;
                let peer = peer_ptr.read_recursive();
                if !peer.is_leaf {
                    return Err(format!(
                        "leaf node {} keeps an edge into internal node {}",
                        leaf.node_id, peer.node_id
                    ));
                }
                match leaf.region.intersection(&peer.region) {
                    Some(intersection) if intersection == *overlap => {}
                    _ => {
                        return Err(format!(
                            "edge {} <-> {} stores overlap {:?} instead of the true intersection",
                            leaf.node_id, peer.node_id, overlap
                        ))
                    }
                }
                let back_edges = peer
                    .overlaps
                    .iter()
                    .filter(|(back_weak, _)| back_weak == &leaf_ptr.downgrade())
                    .count();
                if back_edges != 1 {
                    return Err(format!(
                        "edge {} <-> {} has {} back references instead of one",
                        leaf.node_id, peer.node_id, back_edges
                    ));
                }
            }
        }
        // pairwise leaf invariants: no containment, and every qualifying overlap is linked
        for i in 0..leaves.len() {
            for j in (i + 1)..leaves.len() {
                let first = leaves[i].read_recursive();
                let second = leaves[j].read_recursive();
                if first.region.contains(&second.region) || second.region.contains(&first.region) {
                    return Err(format!(
                        "leaf node {} and leaf node {} are nested",
                        first.node_id, second.node_id
                    ));
                }
                if let Some(intersection) = first.region.intersection(&second.region) {
                    if intersection.extent.iter().all(|&e| e >= self.min_dimension) {
                        let linked = first.overlaps.iter().any(|(peer, _)| peer == &leaves[j].downgrade());
                        if !linked {
                            return Err(format!(
                                "leaf node {} and leaf node {} overlap by {:?} without an edge",
                                first.node_id, second.node_id, intersection
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn generate_profiler_report(&self) -> serde_json::Value {
        json!({
            "node_num": self.node_count,
            "link_num": self.link_count,
            "leaf_num": self.leaves().len(),
            "committed_num": self.committed.len(),
        })
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    fn fit_and_commit(tree: &mut FreeSpaceTree, natural: &Dims, config: &FitConfig) -> Option<FitChoice<SpaceNodeWeak>> {
        let fit = tree.find_fit(natural, config)?;
        tree.commit(&fit);
        tree.sanity_check().unwrap();
        Some(fit)
    }

    #[test]
    fn free_space_tree_single_commit() {
        // cargo test free_space_tree_single_commit -- --nocapture
        let config = FitConfig::default();
        let mut tree = FreeSpaceTree::new_uld([100, 100, 100], 50);
        let fit = fit_and_commit(&mut tree, &[60, 60, 60], &config).unwrap();
        assert_eq!(fit.anchor, [0, 0, 0]);
        assert_eq!(fit.oriented, [60, 60, 60]);
        // no residual slab survives the 50 threshold, the root retires childless
        assert!(tree.free_regions().is_empty());
        assert!(tree.find_fit(&[60, 60, 60], &config).is_none());
    }

    #[test]
    fn free_space_tree_octants() {
        // cargo test free_space_tree_octants -- --nocapture
        let config = FitConfig::default();
        let mut tree = FreeSpaceTree::new_uld([10, 10, 10], 5);
        let mut anchors = vec![];
        for _ in 0..8 {
            let fit = fit_and_commit(&mut tree, &[5, 5, 5], &config).unwrap();
            anchors.push(fit.anchor);
        }
        assert!(tree.find_fit(&[5, 5, 5], &config).is_none());
        anchors.sort();
        let mut expected = vec![];
        for x in [0, 5] {
            for y in [0, 5] {
                for z in [0, 5] {
                    expected.push([x, y, z]);
                }
            }
        }
        expected.sort();
        assert_eq!(anchors, expected);
    }

    #[test]
    fn free_space_tree_rotation_into_long_uld() {
        // cargo test free_space_tree_rotation_into_long_uld -- --nocapture
        let config = FitConfig::default();
        let mut tree = FreeSpaceTree::new_uld([10, 5, 5], 5);
        let fit = fit_and_commit(&mut tree, &[5, 5, 10], &config).unwrap();
        assert_eq!(fit.anchor, [0, 0, 0]);
        assert_eq!(fit.oriented, [10, 5, 5]);
    }

    #[test]
    fn free_space_tree_cross_leaf_placement() {
        // cargo test free_space_tree_cross_leaf_placement -- --nocapture
        // the second parcel is anchored in one leaf but pokes into a sibling, exercising the
        // bidirectional rewiring path and the redundant-child drop
        let config = FitConfig::default();
        let mut tree = FreeSpaceTree::new_uld([10, 10, 10], 2);
        let first = fit_and_commit(&mut tree, &[3, 3, 3], &config).unwrap();
        assert_eq!(first.anchor, [0, 0, 0]);
        assert_eq!(tree.free_regions().len(), 3);
        let second = fit_and_commit(&mut tree, &[10, 2, 2], &config).unwrap();
        assert_eq!(second.anchor, [0, 3, 0]);
        // both touched families were subdivided; the untouched +z slab leaf survives
        let leaves = tree.free_regions();
        assert_eq!(leaves.len(), 5);
        assert!(leaves.contains(&Region::new([0, 0, 3], [10, 10, 7])));
        // the two retired nodes keep no edges and the live graph is fully symmetric, which
        // sanity_check inside fit_and_commit already verified
        let report = tree.generate_profiler_report();
        assert_eq!(report["leaf_num"], json!(5));
    }

    #[test]
    fn free_space_tree_matches_list_exhaustion() {
        // cargo test free_space_tree_matches_list_exhaustion -- --nocapture
        // pack identical boxes until both representations are exhausted; they are
        // observationally equivalent for "is there a fit?", so the counts must agree
        use super::super::free_space_list::FreeSpaceList;
        let config = FitConfig::default();
        let mut tree = FreeSpaceTree::new_uld([12, 9, 6], 3);
        let mut list = FreeSpaceList::new_uld([12, 9, 6], 3);
        let mut tree_count = 0;
        while fit_and_commit(&mut tree, &[4, 3, 3], &config).is_some() {
            tree_count += 1;
        }
        let mut list_count = 0;
        while let Some(fit) = list.find_fit(&[4, 3, 3], &config) {
            list.commit(&fit);
            list.sanity_check().unwrap();
            list_count += 1;
        }
        assert_eq!(tree_count, (12 / 4) * (9 / 3) * (6 / 3));
        assert_eq!(list_count, tree_count);
    }

    #[test]
    fn free_space_tree_clear_restores_everything() {
        // cargo test free_space_tree_clear_restores_everything -- --nocapture
        let config = FitConfig::default();
        let mut tree = FreeSpaceTree::new_uld([30, 30, 30], 10);
        fit_and_commit(&mut tree, &[20, 20, 20], &config).unwrap();
        tree.clear();
        assert_eq!(tree.free_regions(), vec![Region::from_dimensions([30, 30, 30])]);
        assert!(tree.committed_regions().is_empty());
        tree.sanity_check().unwrap();
    }

    #[test]
    #[should_panic(expected = "escapes node")]
    fn free_space_tree_rejects_escaping_box() {
        // cargo test free_space_tree_rejects_escaping_box -- --nocapture
        let config = FitConfig::default();
        let mut tree = FreeSpaceTree::new_uld([10, 10, 10], 2);
        let mut fit = tree.find_fit(&[4, 4, 4], &config).unwrap();
        fit.anchor = [8, 8, 8]; // escapes the chosen leaf
        tree.commit(&fit);
    }
}
