//! Consistent hashing for key ownership
//!
//! This module implements the hash ring that maps cache keys to the address
//! of the owning node. Every physical node contributes a fixed number of
//! virtual points so that adding or removing a node only moves the keys
//! that fall into its arcs.

use std::collections::HashMap;

use crate::error::{CacheError, CacheResult};

/// Hash function used to place node points and keys on the ring.
pub type HashFn = fn(&[u8]) -> u32;

/// Default number of virtual points per physical node.
pub const DEFAULT_REPLICAS: usize = 10;

/// CRC-32 (IEEE) over the raw bytes.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Consistent hash ring for key distribution
#[derive(Debug, Clone)]
pub struct HashRing {
    points: Vec<u32>,
    owner: HashMap<u32, String>,
    nodes: Vec<String>,
    replicas: usize,
    hash_fn: HashFn,
}

impl HashRing {
    pub fn new(replicas: usize) -> Self {
        Self::with_hash_fn(replicas, crc32)
    }

    pub fn with_hash_fn(replicas: usize, hash_fn: HashFn) -> Self {
        Self {
            points: Vec::new(),
            owner: HashMap::new(),
            nodes: Vec::new(),
            replicas,
            hash_fn,
        }
    }

    /// Add physical nodes to the ring.
    ///
    /// Addresses that are already members are skipped, so every member keeps
    /// exactly `replicas` points. When two virtual points collide the later
    /// write to the owner table wins.
    pub fn add<S: AsRef<str>>(&mut self, addresses: &[S]) {
        for address in addresses {
            let address = address.as_ref();
            if self.contains(address) {
                continue;
            }
            for point in self.virtual_points(address) {
                self.owner.insert(point, address.to_string());
                self.points.push(point);
            }
            self.nodes.push(address.to_string());
        }
        self.points.sort_unstable();
    }

    /// Remove physical nodes from the ring. Addresses that are not members
    /// are ignored.
    pub fn delete<S: AsRef<str>>(&mut self, addresses: &[S]) {
        for address in addresses {
            let address = address.as_ref();
            if !self.contains(address) {
                continue;
            }
            for point in self.virtual_points(address) {
                let idx = self.points.partition_point(|p| *p < point);
                if idx < self.points.len() && self.points[idx] == point {
                    self.points.remove(idx);
                } else {
                    continue;
                }

                if self.owner.get(&point).map(String::as_str) == Some(address) {
                    self.owner.remove(&point);
                }
            }
            self.nodes.retain(|n| n != address);

            // A colliding point from a surviving member lost its owner entry
            // when this address overwrote it; hand it back.
            for point in self.virtual_points(address) {
                if self.owner.contains_key(&point) || self.points.binary_search(&point).is_err() {
                    continue;
                }
                let survivor = self
                    .nodes
                    .iter()
                    .rev()
                    .find(|n| self.virtual_points(n).contains(&point))
                    .cloned();
                if let Some(survivor) = survivor {
                    self.owner.insert(point, survivor);
                }
            }
        }
    }

    /// Find the address responsible for a given key.
    pub fn get(&self, key: &str) -> CacheResult<&str> {
        if self.points.is_empty() {
            return Err(CacheError::EmptyRing);
        }

        let hash = (self.hash_fn)(key.as_bytes());
        let mut idx = self.points.partition_point(|p| *p < hash);
        // Wrap around to the beginning
        if idx == self.points.len() {
            idx = 0;
        }

        self.owner
            .get(&self.points[idx])
            .map(String::as_str)
            .ok_or(CacheError::EmptyRing)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.nodes.iter().any(|n| n == address)
    }

    /// Member addresses in insertion order.
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn points(&self) -> &[u32] {
        &self.points
    }

    /// Number of virtual points on the ring.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// Count how many of the sample keys land on each member.
    pub fn key_distribution<S: AsRef<str>>(&self, keys: &[S]) -> HashMap<String, usize> {
        let mut distribution = HashMap::new();
        for key in keys {
            if let Ok(address) = self.get(key.as_ref()) {
                *distribution.entry(address.to_string()).or_insert(0) += 1;
            }
        }
        distribution
    }

    fn virtual_points(&self, address: &str) -> Vec<u32> {
        (0..self.replicas)
            .map(|i| (self.hash_fn)(format!("{}{}", address, i).as_bytes()))
            .collect()
    }
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new(DEFAULT_REPLICAS)
    }
}
