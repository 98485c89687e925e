//! Ancestry queries over the commit graph.
//!
//! Used by stores that do not have a native merge-base. Given two tips, the
//! lowest common ancestors are the common ancestors that are not themselves
//! a proper ancestor of another common ancestor.
//!
//! # Edge Cases
//!
//! - If one tip is an ancestor of the other, the ancestor tip **is** the LCA.
//! - If both tips are the same commit, that commit is the LCA.
//! - Criss-cross histories can have several LCAs; [`find_lca`] picks the
//!   smallest hash so every replica makes the same choice.

use std::collections::{BTreeSet, HashSet, VecDeque};

use super::{Hash, Repository, StorageError};

/// Every commit reachable from `tip`, including `tip` itself.
///
/// # Errors
///
/// Returns [`StorageError`] if a commit on the way cannot be read.
pub fn ancestors<R: Repository + ?Sized>(
    repo: &R,
    tip: &Hash,
) -> Result<HashSet<Hash>, StorageError> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    seen.insert(tip.clone());
    queue.push_back(tip.clone());

    while let Some(current) = queue.pop_front() {
        for parent in repo.read_commit(&current)?.parents {
            if seen.insert(parent.clone()) {
                queue.push_back(parent);
            }
        }
    }
    Ok(seen)
}

/// All lowest common ancestors of two commits, sorted.
///
/// Returns an empty list for disjoint histories.
///
/// # Errors
///
/// Returns [`StorageError`] if either history cannot be walked.
pub fn find_all_lcas<R: Repository + ?Sized>(
    repo: &R,
    tip_a: &Hash,
    tip_b: &Hash,
) -> Result<Vec<Hash>, StorageError> {
    if tip_a == tip_b {
        return Ok(vec![tip_a.clone()]);
    }

    let ancestors_a = ancestors(repo, tip_a)?;
    let ancestors_b = ancestors(repo, tip_b)?;
    let common: BTreeSet<&Hash> = ancestors_a.intersection(&ancestors_b).collect();

    // Anything strictly below a common ancestor is not lowest.
    let mut dominated: HashSet<Hash> = HashSet::new();
    for &ca in &common {
        for parent in repo.read_commit(ca)?.parents {
            if !dominated.contains(&parent) {
                dominated.extend(ancestors(repo, &parent)?);
            }
        }
    }

    Ok(common
        .into_iter()
        .filter(|h| !dominated.contains(*h))
        .cloned()
        .collect())
}

/// The single best common ancestor of two commits.
///
/// # Errors
///
/// Returns [`StorageError::NoCommonAncestor`] for unrelated histories.
pub fn find_lca<R: Repository + ?Sized>(
    repo: &R,
    tip_a: &Hash,
    tip_b: &Hash,
) -> Result<Hash, StorageError> {
    find_all_lcas(repo, tip_a, tip_b)?
        .into_iter()
        .next()
        .ok_or_else(|| StorageError::NoCommonAncestor(tip_a.clone(), tip_b.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::MemRepository;
    use crate::repository::TreeEntry;

    fn commit(repo: &MemRepository, tag: &str, parents: &[&Hash]) -> Hash {
        let blob = repo.store_data(tag.as_bytes()).expect("blob");
        let tree = repo
            .store_tree(&[TreeEntry::blob(blob, "tag")])
            .expect("tree");
        let parents: Vec<Hash> = parents.iter().map(|h| (*h).clone()).collect();
        repo.store_commit(&tree, &parents).expect("commit")
    }

    #[test]
    fn same_tip_is_its_own_lca() {
        let repo = MemRepository::new();
        let root = commit(&repo, "root", &[]);
        assert_eq!(find_lca(&repo, &root, &root).expect("lca"), root);
    }

    #[test]
    fn ancestor_tip_is_lca() {
        let repo = MemRepository::new();
        let root = commit(&repo, "root", &[]);
        let a = commit(&repo, "a", &[&root]);
        let b = commit(&repo, "b", &[&a]);
        assert_eq!(find_lca(&repo, &a, &b).expect("lca"), a);
        assert_eq!(find_lca(&repo, &b, &a).expect("lca"), a);
    }

    #[test]
    fn fork_point_is_lca() {
        let repo = MemRepository::new();
        let root = commit(&repo, "root", &[]);
        let fork = commit(&repo, "fork", &[&root]);
        let left = commit(&repo, "left", &[&fork]);
        let right = commit(&repo, "right", &[&fork]);
        let right2 = commit(&repo, "right2", &[&right]);
        assert_eq!(find_lca(&repo, &left, &right2).expect("lca"), fork);
    }

    #[test]
    fn criss_cross_has_two_lcas() {
        let repo = MemRepository::new();
        let root = commit(&repo, "root", &[]);
        let a = commit(&repo, "a", &[&root]);
        let b = commit(&repo, "b", &[&root]);
        let m1 = commit(&repo, "m1", &[&a, &b]);
        let m2 = commit(&repo, "m2", &[&b, &a]);
        let x = commit(&repo, "x", &[&m1]);
        let y = commit(&repo, "y", &[&m2]);

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(find_all_lcas(&repo, &x, &y).expect("lcas"), expected);
        assert_eq!(find_lca(&repo, &x, &y).expect("lca"), expected[0]);
    }

    #[test]
    fn disjoint_histories_have_no_lca() {
        let repo = MemRepository::new();
        let a = commit(&repo, "a", &[]);
        let b = commit(&repo, "b", &[]);
        assert!(find_all_lcas(&repo, &a, &b).expect("lcas").is_empty());
        assert!(matches!(
            find_lca(&repo, &a, &b),
            Err(StorageError::NoCommonAncestor(..))
        ));
    }
}
