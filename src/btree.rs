use crate::*;
use serde::{Deserialize, Serialize};
use std::mem;

/// Index key: a tuple of column values, ordered lexicographically.
pub type Key = Vec<Value>;

/// Returned by insert when a unique tree already holds the key.
#[derive(Debug)]
pub struct DuplicateKey;

#[derive(Clone, Serialize, Deserialize)]
enum Node {
    Internal {
        keys: Vec<Key>,
        children: Vec<usize>,
    },
    Leaf {
        keys: Vec<Key>,
        /// Locators per key, in insertion order (ties on non-unique trees).
        vals: Vec<Vec<Locator>>,
        next: usize,
    },
}

const NO_NODE: usize = usize::MAX;

impl Node {
    fn len(&self) -> usize {
        match self {
            Node::Internal { keys, .. } => keys.len(),
            Node::Leaf { keys, .. } => keys.len(),
        }
    }

    fn empty_leaf() -> Node {
        Node::Leaf {
            keys: Vec::new(),
            vals: Vec::new(),
            next: NO_NODE,
        }
    }
}

enum Inserted {
    Done,
    Split { sep: Key, right: usize },
}

/// B+tree over an arena of nodes. All leaves sit at the same depth and are
/// chained left to right for range scans.
#[derive(Serialize, Deserialize)]
pub struct BTree {
    order: usize,
    unique: bool,
    nodes: Vec<Node>,
    free: Vec<usize>,
    root: usize,
    len: usize,
}

impl BTree {
    /// Construct an empty tree. `order` is the maximum child count of an
    /// internal node and must be at least 3.
    pub fn new(order: usize, unique: bool) -> Self {
        assert!(order >= 3, "B+tree order must be at least 3");
        Self {
            order,
            unique,
            nodes: vec![Node::empty_leaf()],
            free: Vec::new(),
            root: 0,
            len: 0,
        }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn unique(&self) -> bool {
        self.unique
    }

    /// Number of stored locators.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn max_keys(&self) -> usize {
        self.order - 1
    }

    fn min_keys(&self) -> usize {
        (self.order + 1) / 2 - 1
    }

    fn alloc(&mut self, node: Node) -> usize {
        if let Some(id) = self.free.pop() {
            self.nodes[id] = node;
            id
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        }
    }

    fn take(&mut self, id: usize) -> Node {
        mem::replace(&mut self.nodes[id], Node::empty_leaf())
    }

    /// Insert a locator under the key. A unique tree rejects a key that is
    /// already present.
    pub fn insert(&mut self, key: Key, loc: Locator) -> std::result::Result<(), DuplicateKey> {
        match self.insert_rec(self.root, key, loc)? {
            Inserted::Done => {}
            Inserted::Split { sep, right } => {
                let old_root = self.root;
                self.root = self.alloc(Node::Internal {
                    keys: vec![sep],
                    children: vec![old_root, right],
                });
            }
        }
        self.len += 1;
        Ok(())
    }

    fn insert_rec(
        &mut self,
        id: usize,
        key: Key,
        loc: Locator,
    ) -> std::result::Result<Inserted, DuplicateKey> {
        let child = match &mut self.nodes[id] {
            Node::Leaf { keys, vals, .. } => {
                match keys.binary_search(&key) {
                    Ok(i) => {
                        if self.unique {
                            return Err(DuplicateKey);
                        }
                        vals[i].push(loc);
                    }
                    Err(i) => {
                        keys.insert(i, key);
                        vals.insert(i, vec![loc]);
                    }
                }
                return Ok(self.split_if_needed(id));
            }
            Node::Internal { keys, children } => {
                let i = keys.partition_point(|k| *k <= key);
                children[i]
            }
        };
        match self.insert_rec(child, key, loc)? {
            Inserted::Done => Ok(Inserted::Done),
            Inserted::Split { sep, right } => {
                if let Node::Internal { keys, children } = &mut self.nodes[id] {
                    let i = keys.partition_point(|k| *k <= sep);
                    keys.insert(i, sep);
                    children.insert(i + 1, right);
                }
                Ok(self.split_if_needed(id))
            }
        }
    }

    fn split_if_needed(&mut self, id: usize) -> Inserted {
        if self.nodes[id].len() <= self.max_keys() {
            return Inserted::Done;
        }
        let node = self.take(id);
        match node {
            Node::Leaf { mut keys, mut vals, next } => {
                let mid = keys.len() / 2;
                let rkeys = keys.split_off(mid);
                let rvals = vals.split_off(mid);
                let sep = rkeys[0].clone();
                let right = self.alloc(Node::Leaf {
                    keys: rkeys,
                    vals: rvals,
                    next,
                });
                self.nodes[id] = Node::Leaf {
                    keys,
                    vals,
                    next: right,
                };
                Inserted::Split { sep, right }
            }
            Node::Internal { mut keys, mut children } => {
                let mid = keys.len() / 2;
                let rkeys = keys.split_off(mid + 1);
                let sep = keys.pop().expect("internal split on non-empty node");
                let rchildren = children.split_off(mid + 1);
                let right = self.alloc(Node::Internal {
                    keys: rkeys,
                    children: rchildren,
                });
                self.nodes[id] = Node::Internal { keys, children };
                Inserted::Split { sep, right }
            }
        }
    }

    /// Remove one locator under the key. Returns false when the pair was
    /// not present.
    pub fn delete(&mut self, key: &Key, loc: Locator) -> bool {
        let removed = self.delete_rec(self.root, key, loc);
        if removed {
            self.len -= 1;
            // Collapse a root that lost its last separator.
            if let Node::Internal { keys, children } = &self.nodes[self.root] {
                if keys.is_empty() {
                    let child = children[0];
                    self.free.push(self.root);
                    self.root = child;
                }
            }
        }
        removed
    }

    fn delete_rec(&mut self, id: usize, key: &Key, loc: Locator) -> bool {
        let (child, idx) = match &mut self.nodes[id] {
            Node::Leaf { keys, vals, .. } => {
                return match keys.binary_search(key) {
                    Ok(i) => {
                        let list = &mut vals[i];
                        match list.iter().position(|l| *l == loc) {
                            Some(p) => {
                                list.remove(p);
                                if list.is_empty() {
                                    keys.remove(i);
                                    vals.remove(i);
                                }
                                true
                            }
                            None => false,
                        }
                    }
                    Err(_) => false,
                };
            }
            Node::Internal { keys, children } => {
                let i = keys.partition_point(|k| k <= key);
                (children[i], i)
            }
        };
        let removed = self.delete_rec(child, key, loc);
        if removed && self.nodes[child].len() < self.min_keys() {
            self.rebalance(id, idx);
        }
        removed
    }

    /// Restore the key-count invariant of the idx-th child of `id` by
    /// borrowing from a sibling or merging with one.
    fn rebalance(&mut self, id: usize, idx: usize) {
        let (left_id, right_id, child_count) = match &self.nodes[id] {
            Node::Internal { children, .. } => (
                if idx > 0 { Some(children[idx - 1]) } else { None },
                if idx + 1 < children.len() {
                    Some(children[idx + 1])
                } else {
                    None
                },
                children.len(),
            ),
            Node::Leaf { .. } => return,
        };
        debug_assert!(child_count > 1);

        if let Some(l) = left_id {
            if self.nodes[l].len() > self.min_keys() {
                self.borrow_from_left(id, idx, l);
                return;
            }
        }
        if let Some(r) = right_id {
            if self.nodes[r].len() > self.min_keys() {
                self.borrow_from_right(id, idx, r);
                return;
            }
        }
        // Merge with a sibling: prefer merging into the left one.
        if let Some(l) = left_id {
            self.merge(id, idx - 1, l);
        } else if let Some(r) = right_id {
            self.merge(id, idx, r);
        }
    }

    fn child_at(&self, id: usize, idx: usize) -> usize {
        match &self.nodes[id] {
            Node::Internal { children, .. } => children[idx],
            Node::Leaf { .. } => unreachable!("leaf has no children"),
        }
    }

    fn borrow_from_left(&mut self, parent: usize, idx: usize, left: usize) {
        let child = self.child_at(parent, idx);
        let mut lnode = self.take(left);
        let mut cnode = self.take(child);
        match (&mut lnode, &mut cnode) {
            (
                Node::Leaf { keys: lk, vals: lv, .. },
                Node::Leaf { keys: ck, vals: cv, .. },
            ) => {
                let k = lk.pop().expect("left sibling above minimum");
                let v = lv.pop().expect("left sibling above minimum");
                ck.insert(0, k.clone());
                cv.insert(0, v);
                self.set_sep(parent, idx - 1, k);
            }
            (
                Node::Internal { keys: lk, children: lc },
                Node::Internal { keys: ck, children: cc },
            ) => {
                let sep = self.sep(parent, idx - 1);
                let up = lk.pop().expect("left sibling above minimum");
                let c = lc.pop().expect("left sibling above minimum");
                ck.insert(0, sep);
                cc.insert(0, c);
                self.set_sep(parent, idx - 1, up);
            }
            _ => unreachable!("siblings at same depth share node kind"),
        }
        self.nodes[left] = lnode;
        self.nodes[child] = cnode;
    }

    fn borrow_from_right(&mut self, parent: usize, idx: usize, right: usize) {
        let child = self.child_at(parent, idx);
        let mut rnode = self.take(right);
        let mut cnode = self.take(child);
        match (&mut rnode, &mut cnode) {
            (
                Node::Leaf { keys: rk, vals: rv, .. },
                Node::Leaf { keys: ck, vals: cv, .. },
            ) => {
                ck.push(rk.remove(0));
                cv.push(rv.remove(0));
                self.set_sep(parent, idx, rk[0].clone());
            }
            (
                Node::Internal { keys: rk, children: rc },
                Node::Internal { keys: ck, children: cc },
            ) => {
                let sep = self.sep(parent, idx);
                ck.push(sep);
                cc.push(rc.remove(0));
                self.set_sep(parent, idx, rk.remove(0));
            }
            _ => unreachable!("siblings at same depth share node kind"),
        }
        self.nodes[right] = rnode;
        self.nodes[child] = cnode;
    }

    /// Merge children sep_idx and sep_idx+1 of `parent` into the left one.
    fn merge(&mut self, parent: usize, sep_idx: usize, left: usize) {
        let right = self.child_at(parent, sep_idx + 1);
        let sep = self.sep(parent, sep_idx);
        let rnode = self.take(right);
        let mut lnode = self.take(left);
        match (&mut lnode, rnode) {
            (
                Node::Leaf { keys: lk, vals: lv, next: ln },
                Node::Leaf { keys: rk, vals: rv, next: rn },
            ) => {
                lk.extend(rk);
                lv.extend(rv);
                *ln = rn;
            }
            (
                Node::Internal { keys: lk, children: lc },
                Node::Internal { keys: rk, children: rc },
            ) => {
                lk.push(sep);
                lk.extend(rk);
                lc.extend(rc);
            }
            _ => unreachable!("siblings at same depth share node kind"),
        }
        self.nodes[left] = lnode;
        self.free.push(right);
        if let Node::Internal { keys, children } = &mut self.nodes[parent] {
            keys.remove(sep_idx);
            children.remove(sep_idx + 1);
        }
    }

    fn sep(&self, parent: usize, idx: usize) -> Key {
        match &self.nodes[parent] {
            Node::Internal { keys, .. } => keys[idx].clone(),
            Node::Leaf { .. } => unreachable!("leaf has no separators"),
        }
    }

    fn set_sep(&mut self, parent: usize, idx: usize, key: Key) {
        if let Node::Internal { keys, .. } = &mut self.nodes[parent] {
            keys[idx] = key;
        }
    }

    /// Leaf holding the smallest key at or above `key`.
    fn descend(&self, key: &Key) -> usize {
        let mut id = self.root;
        loop {
            match &self.nodes[id] {
                Node::Leaf { .. } => return id,
                Node::Internal { keys, children } => {
                    let i = keys.partition_point(|k| k <= key);
                    id = children[i];
                }
            }
        }
    }

    fn leftmost_leaf(&self) -> usize {
        let mut id = self.root;
        loop {
            match &self.nodes[id] {
                Node::Leaf { .. } => return id,
                Node::Internal { children, .. } => id = children[0],
            }
        }
    }

    /// All locators stored under exactly this key, in insertion order.
    pub fn search_exact(&self, key: &Key) -> Vec<Locator> {
        let leaf = self.descend(key);
        match &self.nodes[leaf] {
            Node::Leaf { keys, vals, .. } => match keys.binary_search(key) {
                Ok(i) => vals[i].clone(),
                Err(_) => Vec::new(),
            },
            Node::Internal { .. } => unreachable!("descend returns a leaf"),
        }
    }

    /// Locators whose keys fall within the given bounds. Each bound carries
    /// its own inclusivity flag.
    pub fn search_range(
        &self,
        low: Option<(&Key, bool)>,
        high: Option<(&Key, bool)>,
    ) -> Vec<Locator> {
        let mut out = Vec::new();
        self.walk_range(low, high, |_, locs| out.extend_from_slice(locs));
        out
    }

    /// Locators whose keys start with the given prefix of column values.
    pub fn search_prefix(&self, prefix: &[Value]) -> Vec<Locator> {
        let low = prefix.to_vec();
        let mut out = Vec::new();
        let mut id = self.descend(&low);
        while id != NO_NODE {
            match &self.nodes[id] {
                Node::Leaf { keys, vals, next } => {
                    for (k, v) in keys.iter().zip(vals) {
                        if k.as_slice() < prefix {
                            continue;
                        }
                        if k.len() < prefix.len() || k[..prefix.len()] != *prefix {
                            return out;
                        }
                        out.extend_from_slice(v);
                    }
                    id = *next;
                }
                Node::Internal { .. } => unreachable!("leaf chain only holds leaves"),
            }
        }
        out
    }

    /// In-order traversal of (key, locators) pairs.
    pub fn iter_all(&self) -> Vec<(Key, Vec<Locator>)> {
        let mut out = Vec::new();
        let mut id = self.leftmost_leaf();
        while id != NO_NODE {
            match &self.nodes[id] {
                Node::Leaf { keys, vals, next } => {
                    for (k, v) in keys.iter().zip(vals) {
                        out.push((k.clone(), v.clone()));
                    }
                    id = *next;
                }
                Node::Internal { .. } => unreachable!("leaf chain only holds leaves"),
            }
        }
        out
    }

    fn walk_range(
        &self,
        low: Option<(&Key, bool)>,
        high: Option<(&Key, bool)>,
        mut emit: impl FnMut(&Key, &[Locator]),
    ) {
        let mut id = match low {
            Some((k, _)) => self.descend(k),
            None => self.leftmost_leaf(),
        };
        while id != NO_NODE {
            match &self.nodes[id] {
                Node::Leaf { keys, vals, next } => {
                    for (k, v) in keys.iter().zip(vals) {
                        if let Some((lo, incl)) = low {
                            if k < lo || (!incl && k == lo) {
                                continue;
                            }
                        }
                        if let Some((hi, incl)) = high {
                            if k > hi || (!incl && k == hi) {
                                return;
                            }
                        }
                        emit(k, v);
                    }
                    id = *next;
                }
                Node::Internal { .. } => unreachable!("leaf chain only holds leaves"),
            }
        }
    }

    /// Validate the structural invariants: uniform leaf depth, key-count
    /// bounds (root exempt), sorted keys, consistent separators, and a leaf
    /// chain that yields keys in non-decreasing order.
    #[cfg(test)]
    pub fn check(&self) {
        let depth = self.check_node(self.root, None, None, true);
        let mut id = self.leftmost_leaf();
        let mut prev: Option<Key> = None;
        let mut chain_depth_ok = false;
        while id != NO_NODE {
            match &self.nodes[id] {
                Node::Leaf { keys, next, .. } => {
                    for k in keys {
                        if let Some(p) = &prev {
                            assert!(p <= k, "leaf chain out of order");
                            if self.unique {
                                assert!(p < k, "duplicate key in unique tree");
                            }
                        }
                        prev = Some(k.clone());
                    }
                    id = *next;
                    chain_depth_ok = true;
                }
                Node::Internal { .. } => panic!("internal node on leaf chain"),
            }
        }
        assert!(chain_depth_ok || depth == 0);
    }

    #[cfg(test)]
    fn check_node(&self, id: usize, low: Option<&Key>, high: Option<&Key>, is_root: bool) -> usize {
        let node = &self.nodes[id];
        if !is_root {
            assert!(node.len() >= self.min_keys(), "node below minimum keys");
        }
        assert!(node.len() <= self.max_keys(), "node above maximum keys");
        match node {
            Node::Leaf { keys, vals, .. } => {
                assert_eq!(keys.len(), vals.len());
                for w in keys.windows(2) {
                    assert!(w[0] < w[1], "leaf keys out of order");
                }
                for k in keys {
                    if let Some(lo) = low {
                        assert!(k >= lo, "leaf key below subtree bound");
                    }
                    if let Some(hi) = high {
                        assert!(k < hi, "leaf key above subtree bound");
                    }
                }
                0
            }
            Node::Internal { keys, children } => {
                assert_eq!(children.len(), keys.len() + 1);
                for w in keys.windows(2) {
                    assert!(w[0] < w[1], "separators out of order");
                }
                let mut depth = None;
                for (i, child) in children.iter().enumerate() {
                    let lo = if i == 0 { low } else { Some(&keys[i - 1]) };
                    let hi = if i == keys.len() { high } else { Some(&keys[i]) };
                    let d = self.check_node(*child, lo, hi, false);
                    match depth {
                        None => depth = Some(d),
                        Some(prev) => assert_eq!(prev, d, "leaves at unequal depth"),
                    }
                }
                depth.expect("internal node has children") + 1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;

    fn ik(x: i64) -> Key {
        vec![Value::Int(x)]
    }

    fn loc(p: u64, s: u16) -> Locator {
        Locator { page: p, slot: s }
    }

    #[test]
    fn ordered_insert_and_scan() {
        let mut t = BTree::new(4, true);
        for i in 0..100 {
            t.insert(ik(i), loc(i as u64, 0)).unwrap();
        }
        t.check();
        let all = t.iter_all();
        assert_eq!(all.len(), 100);
        for (i, (k, v)) in all.iter().enumerate() {
            assert_eq!(k, &ik(i as i64));
            assert_eq!(v, &vec![loc(i as u64, 0)]);
        }
    }

    #[test]
    fn unique_rejects_duplicates() {
        let mut t = BTree::new(3, true);
        t.insert(ik(5), loc(0, 0)).unwrap();
        assert!(t.insert(ik(5), loc(1, 1)).is_err());
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn duplicates_keep_insertion_order() {
        let mut t = BTree::new(4, false);
        t.insert(ik(1), loc(9, 0)).unwrap();
        t.insert(ik(1), loc(3, 0)).unwrap();
        t.insert(ik(1), loc(7, 0)).unwrap();
        assert_eq!(t.search_exact(&ik(1)), vec![loc(9, 0), loc(3, 0), loc(7, 0)]);
    }

    #[test]
    fn range_bounds() {
        let mut t = BTree::new(4, true);
        for i in 0..20 {
            t.insert(ik(i), loc(i as u64, 0)).unwrap();
        }
        let lo = ik(5);
        let hi = ik(10);
        let incl = t.search_range(Some((&lo, true)), Some((&hi, true)));
        assert_eq!(incl.len(), 6);
        let excl = t.search_range(Some((&lo, false)), Some((&hi, false)));
        assert_eq!(excl.len(), 4);
        let open_low = t.search_range(None, Some((&hi, false)));
        assert_eq!(open_low.len(), 10);
        let open_high = t.search_range(Some((&lo, true)), None);
        assert_eq!(open_high.len(), 15);
    }

    #[test]
    fn composite_prefix_scan() {
        let mut t = BTree::new(4, false);
        for (a, b) in [(1, 1), (1, 2), (2, 1), (2, 2), (3, 1)] {
            t.insert(vec![Value::Int(a), Value::Int(b)], loc(a as u64, b as u16))
                .unwrap();
        }
        let hits = t.search_prefix(&[Value::Int(2)]);
        assert_eq!(hits, vec![loc(2, 1), loc(2, 2)]);
    }

    #[test]
    fn delete_rebalances() {
        let mut t = BTree::new(3, true);
        for i in 0..64 {
            t.insert(ik(i), loc(i as u64, 0)).unwrap();
        }
        t.check();
        for i in (0..64).step_by(2) {
            assert!(t.delete(&ik(i), loc(i as u64, 0)));
            t.check();
        }
        assert_eq!(t.len(), 32);
        for i in (1..64).step_by(2) {
            assert!(t.delete(&ik(i), loc(i as u64, 0)));
            t.check();
        }
        assert!(t.is_empty());
        assert!(!t.delete(&ik(1), loc(1, 0)));
    }

    #[test]
    fn random_soak() {
        let mut rng = StdRng::seed_from_u64(0xdb);
        for order in [3, 4, 7] {
            let mut t = BTree::new(order, false);
            let mut shadow: Vec<(i64, Locator)> = Vec::new();
            for step in 0..2000 {
                if shadow.is_empty() || rng.gen_bool(0.6) {
                    let k = rng.gen_range(0..200);
                    let l = loc(step as u64, 0);
                    t.insert(ik(k), l).unwrap();
                    shadow.push((k, l));
                } else {
                    let i = rng.gen_range(0..shadow.len());
                    let (k, l) = shadow.swap_remove(i);
                    assert!(t.delete(&ik(k), l));
                }
                if step % 128 == 0 {
                    t.check();
                }
            }
            t.check();
            assert_eq!(t.len(), shadow.len());
            shadow.sort_by_key(|(k, _)| *k);
            let flat: Vec<i64> = t
                .iter_all()
                .iter()
                .flat_map(|(k, v)| std::iter::repeat(k[0].int().unwrap()).take(v.len()))
                .collect();
            let expect: Vec<i64> = shadow.iter().map(|(k, _)| *k).collect();
            assert_eq!(flat, expect);
        }
    }
}
