//! Prefix tree over lexicon terms, ranked by document frequency.
//!
//! Nodes live in one arena and refer to their children by index, so the
//! tree serializes as a flat table and traversal uses an explicit stack.
//! No case or punctuation folding happens here; callers normalize first.

use crate::lexicon::Lexicon;
use crate::persist::{load_bincode, save_bincode, IndexPaths};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};

const ROOT: usize = 0;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Node {
    children: BTreeMap<char, u32>,
    /// Document frequency when this node ends a complete term.
    terminal: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trie {
    nodes: Vec<Node>,
    terms: usize,
}

/// Autocomplete ordering: higher document frequency first, then the
/// lexicographically smaller term.
#[derive(Debug, PartialEq, Eq)]
struct Completion {
    df: u32,
    term: String,
}

impl Ord for Completion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.df.cmp(&other.df).then_with(|| other.term.cmp(&self.term))
    }
}

impl PartialOrd for Completion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Default for Trie {
    fn default() -> Self {
        Self { nodes: vec![Node::default()], terms: 0 }
    }
}

impl Trie {
    pub fn new() -> Self { Self::default() }

    pub fn from_lexicon(lexicon: &Lexicon) -> Self {
        let mut trie = Trie::new();
        for (term, entry) in lexicon.iter() {
            trie.insert(term, entry.document_frequency);
        }
        trie
    }

    pub fn insert(&mut self, term: &str, document_frequency: u32) {
        let mut node = ROOT;
        for c in term.chars() {
            node = match self.nodes[node].children.get(&c) {
                Some(&child) => child as usize,
                None => {
                    let child = self.nodes.len();
                    self.nodes.push(Node::default());
                    self.nodes[node].children.insert(c, child as u32);
                    child
                }
            };
        }
        if self.nodes[node].terminal.replace(document_frequency).is_none() {
            self.terms += 1;
        }
    }

    fn find(&self, prefix: &str) -> Option<usize> {
        let mut node = ROOT;
        for c in prefix.chars() {
            node = *self.nodes[node].children.get(&c)? as usize;
        }
        Some(node)
    }

    pub fn contains(&self, term: &str) -> bool {
        self.find(term).is_some_and(|n| self.nodes[n].terminal.is_some())
    }

    /// Up to `limit` terms starting with `prefix`, by descending document
    /// frequency; equal frequencies come back in ascending term order.
    pub fn autocomplete(&self, prefix: &str, limit: usize) -> Vec<String> {
        if limit == 0 {
            return Vec::new();
        }
        let Some(start) = self.find(prefix) else {
            return Vec::new();
        };

        // min-heap holding the best `limit` completions seen so far
        let mut heap: BinaryHeap<Reverse<Completion>> = BinaryHeap::with_capacity(limit.min(self.terms));
        let mut stack = vec![(start, prefix.to_string())];
        while let Some((node, path)) = stack.pop() {
            let n = &self.nodes[node];
            if let Some(df) = n.terminal {
                let candidate = Completion { df, term: path.clone() };
                if heap.len() < limit {
                    heap.push(Reverse(candidate));
                } else if heap.peek().is_some_and(|Reverse(min)| candidate > *min) {
                    heap.pop();
                    heap.push(Reverse(candidate));
                }
            }
            for (c, child) in &n.children {
                let mut next = path.clone();
                next.push(*c);
                stack.push((*child as usize, next));
            }
        }

        let mut best: Vec<Completion> = heap.into_iter().map(|Reverse(c)| c).collect();
        best.sort_by(|a, b| b.cmp(a));
        best.into_iter().map(|c| c.term).collect()
    }

    pub fn len(&self) -> usize {
        self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms == 0
    }

    pub fn save(&self, paths: &IndexPaths) -> Result<()> {
        save_bincode(&paths.trie(), self)
    }

    pub fn load(paths: &IndexPaths) -> Result<Self> {
        load_bincode(&paths.trie())
    }
}
