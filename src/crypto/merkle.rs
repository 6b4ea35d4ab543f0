use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone)]
pub enum MerkleError {
    EmptyTree,
    InvalidIndex,
}

impl fmt::Display for MerkleError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MerkleError::EmptyTree => write!(f, "cannot build merkle tree from empty data"),
            MerkleError::InvalidIndex => write!(f, "index out of range for merkle proof"),
        }
    }
}

impl std::error::Error for MerkleError {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MerkleProof {
    pub leaf_hash: [u8; 32],
    pub siblings: Vec<[u8; 32]>,
}

/// SHA-256 merkle tree over leaf data. Odd levels duplicate the last node,
/// matching the reference implementation's handling of unbalanced blocks.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<[u8; 32]>>,
}

impl MerkleTree {
    pub fn new(data: &[Vec<u8>]) -> Result<Self, MerkleError> {
        if data.is_empty() {
            return Err(MerkleError::EmptyTree);
        }

        let leaves: Vec<[u8; 32]> = data.iter().map(|d| hash_leaf(d)).collect();
        let mut levels = vec![leaves];

        while levels.last().unwrap().len() > 1 {
            let current = levels.last().unwrap();
            let mut next = Vec::with_capacity(current.len().div_ceil(2));
            for pair in current.chunks(2) {
                let hash = if pair.len() == 2 {
                    hash_nodes(&pair[0], &pair[1])
                } else {
                    hash_nodes(&pair[0], &pair[0])
                };
                next.push(hash);
            }
            levels.push(next);
        }

        Ok(Self { levels })
    }

    pub fn root(&self) -> [u8; 32] {
        self.levels.last().unwrap()[0]
    }

    pub fn leaves(&self) -> &[[u8; 32]] {
        &self.levels[0]
    }

    pub fn proof(&self, index: usize) -> Result<MerkleProof, MerkleError> {
        if index >= self.leaves().len() {
            return Err(MerkleError::InvalidIndex);
        }

        let leaf_hash = self.leaves()[index];
        let mut siblings = Vec::new();
        let mut current_index = index;

        for level in &self.levels[..self.levels.len() - 1] {
            let sibling_index = if current_index % 2 == 0 {
                (current_index + 1).min(level.len() - 1)
            } else {
                current_index - 1
            };
            siblings.push(level[sibling_index]);
            current_index /= 2;
        }

        Ok(MerkleProof { leaf_hash, siblings })
    }

    pub fn verify_proof(proof: &MerkleProof, leaf_index: usize, root: &[u8; 32]) -> bool {
        let mut current = proof.leaf_hash;
        let mut index = leaf_index;
        for sibling in &proof.siblings {
            current = if index % 2 == 0 {
                hash_nodes(&current, sibling)
            } else {
                hash_nodes(sibling, &current)
            };
            index /= 2;
        }
        &current == root
    }
}

fn hash_leaf(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

fn hash_nodes(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_data() -> Vec<Vec<u8>> {
        vec![b"tx1".to_vec(), b"tx2".to_vec(), b"tx3".to_vec()]
    }

    #[test]
    fn builds_root_over_three_leaves() {
        let tree = MerkleTree::new(&sample_data()).unwrap();
        assert_eq!(tree.leaves().len(), 3);
        assert_ne!(tree.root(), [0u8; 32]);
    }

    #[test]
    fn proof_verifies_against_root() {
        let tree = MerkleTree::new(&sample_data()).unwrap();
        let proof = tree.proof(1).unwrap();
        assert!(MerkleTree::verify_proof(&proof, 1, &tree.root()));
    }

    #[test]
    fn proof_fails_for_wrong_index() {
        let tree = MerkleTree::new(&sample_data()).unwrap();
        let proof = tree.proof(1).unwrap();
        assert!(!MerkleTree::verify_proof(&proof, 0, &tree.root()));
    }

    #[test]
    fn empty_input_is_an_error() {
        let data: Vec<Vec<u8>> = vec![];
        assert!(matches!(MerkleTree::new(&data), Err(MerkleError::EmptyTree)));
    }

    #[test]
    fn single_leaf_tree_roots_to_its_own_hash() {
        let tree = MerkleTree::new(&vec![b"only".to_vec()]).unwrap();
        assert_eq!(tree.root(), tree.leaves()[0]);
    }
}
