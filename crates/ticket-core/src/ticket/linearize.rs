//! Deterministic replay order for a DAG of operation packs.
//!
//! Operations form their own DAG: an operation depends on the one before it
//! in the same pack, and the first operation of a pack depends on the last
//! operation of each nearest non-empty ancestor pack. Merge packs carry no
//! operations, so they add no edges of their own; two replicas that merged
//! the same branches in different ways still see the same operation DAG.
//!
//! The DAG is emitted with Kahn's algorithm, always taking the ready
//! operation with the smallest `(unix_time, id)`. For a linear chain this is
//! pack order, then operation order. An operation that appears in more than
//! one pack is emitted once.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::id::Id;
use crate::operation::Operation;
use crate::pack::StoredPack;
use crate::repository::Hash;

struct Node<'a> {
    op: &'a Operation,
    id: Id,
    children: Vec<usize>,
    pending: usize,
}

/// Indices of the last operation of the nearest non-empty packs at or
/// above `pack`.
fn frontier(
    pack: usize,
    packs: &[StoredPack],
    index: &HashMap<&Hash, usize>,
    last_op: &[Option<usize>],
    memo: &mut HashMap<usize, Vec<usize>>,
) -> Vec<usize> {
    if let Some(done) = memo.get(&pack) {
        return done.clone();
    }
    let result = match last_op[pack] {
        Some(op) => vec![op],
        None => {
            let mut ops: Vec<usize> = Vec::new();
            for parent in &packs[pack].parents {
                // Parents outside the loaded set have already been accounted for.
                let Some(&p) = index.get(parent) else {
                    continue;
                };
                for op in frontier(p, packs, index, last_op, memo) {
                    if !ops.contains(&op) {
                        ops.push(op);
                    }
                }
            }
            ops
        }
    };
    memo.insert(pack, result.clone());
    result
}

/// Order every operation in `packs` for replay.
///
/// `packs` must list every parent before its children.
#[must_use]
pub fn linearize(packs: &[StoredPack]) -> Vec<&Operation> {
    let index: HashMap<&Hash, usize> = packs
        .iter()
        .enumerate()
        .map(|(i, p)| (&p.commit, i))
        .collect();

    let mut nodes: Vec<Node<'_>> = Vec::new();
    let mut first_op: Vec<Option<usize>> = Vec::with_capacity(packs.len());
    let mut last_op: Vec<Option<usize>> = Vec::with_capacity(packs.len());
    for p in packs {
        let start = nodes.len();
        for (pos, op) in p.pack.operations.iter().enumerate() {
            let n = nodes.len();
            nodes.push(Node {
                op,
                id: op.id(),
                children: Vec::new(),
                pending: 0,
            });
            if pos > 0 {
                nodes[n - 1].children.push(n);
                nodes[n].pending += 1;
            }
        }
        if nodes.len() > start {
            first_op.push(Some(start));
            last_op.push(Some(nodes.len() - 1));
        } else {
            first_op.push(None);
            last_op.push(None);
        }
    }

    let mut memo = HashMap::new();
    for (i, p) in packs.iter().enumerate() {
        let Some(first) = first_op[i] else {
            continue;
        };
        let mut deps: Vec<usize> = Vec::new();
        for parent in &p.parents {
            let Some(&pi) = index.get(parent) else {
                continue;
            };
            for d in frontier(pi, packs, &index, &last_op, &mut memo) {
                if !deps.contains(&d) {
                    deps.push(d);
                }
            }
        }
        for d in deps {
            nodes[d].children.push(first);
            nodes[first].pending += 1;
        }
    }

    let mut ready: BinaryHeap<Reverse<(i64, Id, usize)>> = nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.pending == 0)
        .map(|(i, n)| Reverse((n.op.unix_time, n.id.clone(), i)))
        .collect();

    let mut emitted: HashSet<Id> = HashSet::new();
    let mut out = Vec::with_capacity(nodes.len());
    while let Some(Reverse((_, id, i))) = ready.pop() {
        if emitted.insert(id) {
            out.push(nodes[i].op);
        }
        let children = std::mem::take(&mut nodes[i].children);
        for c in children {
            nodes[c].pending -= 1;
            if nodes[c].pending == 0 {
                ready.push(Reverse((nodes[c].op.unix_time, nodes[c].id.clone(), c)));
            }
        }
    }
    out
}
