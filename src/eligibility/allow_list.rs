//! Allow-list tables and their Keccak-256 Merkle trees.
//!
//! Each table is a static list of base58 wallet addresses. Leaves are the
//! Keccak-256 hash of the address string; interior nodes hash the sorted
//! pair of children and an unpaired node is promoted unchanged. Guard groups
//! reference a table by its root.

use crate::types::Pubkey;
use anyhow::{Context, Result};
use solana_sdk::keccak;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// A Merkle node or root.
pub type MerkleNode = [u8; 32];

/// Hash a wallet address into a Merkle leaf.
pub fn leaf_hash(address: &str) -> MerkleNode {
    keccak::hashv(&[address.as_bytes()]).to_bytes()
}

fn hash_pair(a: &MerkleNode, b: &MerkleNode) -> MerkleNode {
    if a <= b {
        keccak::hashv(&[a, b]).to_bytes()
    } else {
        keccak::hashv(&[b, a]).to_bytes()
    }
}

fn next_layer(layer: &[MerkleNode]) -> Vec<MerkleNode> {
    layer
        .chunks(2)
        .map(|pair| match pair {
            [lhs, rhs] => hash_pair(lhs, rhs),
            _ => pair[0],
        })
        .collect()
}

/// Returns true if `leaf` can be proved to be part of the tree with `root`.
pub fn verify_proof(proof: &[MerkleNode], root: &MerkleNode, leaf: &MerkleNode) -> bool {
    let computed = proof
        .iter()
        .fold(*leaf, |node, sibling| hash_pair(&node, sibling));
    computed == *root
}

/// Render a root as lowercase hex.
pub fn root_to_hex(root: &MerkleNode) -> String {
    root.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Parse a 64 character hex string into a root.
pub fn root_from_hex(hex: &str) -> Option<MerkleNode> {
    let hex = hex.trim().trim_start_matches("0x");
    if hex.len() != 64 || !hex.is_ascii() {
        return None;
    }
    let mut root = [0u8; 32];
    for (i, byte) in root.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(root)
}

/// One named allow list with its precomputed tree.
#[derive(Debug, Clone)]
pub struct AllowListTable {
    name: String,
    addresses: Vec<String>,
    members: HashSet<String>,
    /// Tree layers, leaves first
    layers: Vec<Vec<MerkleNode>>,
}

impl AllowListTable {
    /// Build a table and its Merkle tree.
    pub fn new(name: impl Into<String>, addresses: Vec<String>) -> Self {
        let mut layers = vec![addresses.iter().map(|a| leaf_hash(a)).collect::<Vec<_>>()];
        while layers.last().map_or(false, |layer| layer.len() > 1) {
            let next = next_layer(&layers[layers.len() - 1]);
            layers.push(next);
        }
        let members = addresses.iter().cloned().collect();

        Self {
            name: name.into(),
            addresses,
            members,
            layers,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Merkle root of the table. An empty table has an all-zero root.
    pub fn root(&self) -> MerkleNode {
        self.layers
            .last()
            .and_then(|layer| layer.first())
            .copied()
            .unwrap_or([0u8; 32])
    }

    pub fn contains(&self, address: &Pubkey) -> bool {
        self.members.contains(&address.to_string())
    }

    /// Sibling path proving membership of `address`, or `None` when absent.
    pub fn proof(&self, address: &Pubkey) -> Option<Vec<MerkleNode>> {
        let address = address.to_string();
        let mut index = self.addresses.iter().position(|a| *a == address)?;
        let mut proof = Vec::new();
        for layer in &self.layers {
            let sibling = index ^ 1;
            if sibling < layer.len() {
                proof.push(layer[sibling]);
            }
            index /= 2;
        }
        Some(proof)
    }
}

/// Ordered collection of allow-list tables, looked up by Merkle root.
#[derive(Debug, Clone, Default)]
pub struct AllowListTables {
    tables: Vec<AllowListTable>,
}

impl AllowListTables {
    pub fn new(tables: Vec<AllowListTable>) -> Self {
        for table in &tables {
            info!(
                "Allow list '{}' loaded: {} addresses, root {}",
                table.name(),
                table.len(),
                root_to_hex(&table.root())
            );
        }
        Self { tables }
    }

    /// Load tables from JSON files, each holding an array of addresses.
    ///
    /// The table name is the file stem.
    pub fn from_json_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut tables = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read allow list {}", path.display()))?;
            let addresses: Vec<String> = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse allow list {}", path.display()))?;
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("list-{}", tables.len()));
            tables.push(AllowListTable::new(name, addresses));
        }
        Ok(Self::new(tables))
    }

    pub fn get(&self, index: usize) -> Option<&AllowListTable> {
        self.tables.get(index)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// The table whose root equals `root`.
    pub fn find_by_root(&self, root: &MerkleNode) -> Option<&AllowListTable> {
        let found = self.tables.iter().find(|t| t.root() == *root);
        if found.is_none() {
            debug!("No allow list matches root {}", root_to_hex(root));
        }
        found
    }

    /// Membership of `address` in the table with `root`; an unknown root is an empty set.
    pub fn is_member(&self, root: &MerkleNode, address: &Pubkey) -> bool {
        self.find_by_root(root)
            .map_or(false, |table| table.contains(address))
    }
}
