//! Graph construction: AST chunks to a nondeterministic transition graph.
//!
//! The graph is character-indexed: a node's `next` list partitions the whole
//! code point space into half-open ranges, each pointing at a *slot*. Slots
//! live in an arena owned by the builder and are shared between entries;
//! back-patching a later chunk (or a quantifier loop) into an earlier one is
//! a single append to a shared slot. `SlotId` is just an index, so the
//! cyclic references produced by `*`/`+` loops need no ownership tricks.
//!
//! Node ids are dense: 0 is the FAIL terminal, 1 the OK terminal, user nodes
//! count up from 2. The automaton enters every walk at [`ID_BEGIN`].

use smallvec::SmallVec;

use crate::config::{MAX_MULTIPLIER, MAX_RANGES};
use crate::{sanity_assert, Error, Result};

use super::parser::{CharacterRange, Chunk, ChunkContent, Multiplier, Regex};

/// Node id of the FAIL terminal (also the serialized padding value).
pub const ID_FAIL: u32 = 0;

/// Node id of the OK terminal.
pub const ID_OK: u32 = 1;

/// Node id the automaton starts every walk at.
pub const ID_BEGIN: u32 = 2;

pub type NodeId = u32;

/// Index of a slot in the builder's arena.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SlotId(u32);

impl SlotId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// A graph node: its id and the character-keyed transition list.
///
/// Keys are strictly increasing; entry `(c, slot)` covers every code point
/// `x` with `c <= x <` the next entry's key.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub next: Vec<(u32, SlotId)>,
}

/// The finished transition graph: dense nodes plus the slot arena.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<Node>,
    slots: Vec<SmallVec<[NodeId; 4]>>,
}

impl Graph {
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Target node ids of a slot, in insertion order.
    pub fn slot(&self, slot: SlotId) -> &[NodeId] {
        &self.slots[slot.index()]
    }
}

/// What transforming one chunk produced: the id of its first node (absent
/// for `{0}`), the slots awaiting the next chunk, and whether the chunk can
/// be skipped entirely.
struct ChunkOutcome {
    first: Option<NodeId>,
    open: Vec<SlotId>,
    nullable: bool,
}

/// Build the transition graph for a parsed regex.
pub fn build(regex: &Regex) -> Result<Graph> {
    sanity_assert!(!regex.is_empty(), "regex must contain at least one chunk");

    let mut builder = GraphBuilder::new();
    let mut open: Vec<SlotId> = Vec::new();
    let mut outcomes = Vec::with_capacity(regex.len());

    for chunk in regex {
        let outcome = builder.transform_chunk(chunk, &open)?;
        open = outcome.open;
        outcomes.push((outcome.first, outcome.nullable));
    }

    // whatever is still waiting for a successor accepts
    for &slot in &open {
        builder.append(slot, ID_OK);
    }

    builder.close_entry(&outcomes)?;

    sanity_assert!(
        builder.nodes.iter().enumerate().all(|(i, n)| n.id as usize == i),
        "node ids are not dense"
    );
    Ok(Graph {
        nodes: builder.nodes,
        slots: builder.slots,
    })
}

struct GraphBuilder {
    nodes: Vec<Node>,
    slots: Vec<SmallVec<[NodeId; 4]>>,
}

impl GraphBuilder {
    fn new() -> Self {
        Self {
            nodes: vec![
                Node { id: ID_FAIL, next: Vec::new() },
                Node { id: ID_OK, next: Vec::new() },
            ],
            slots: Vec::new(),
        }
    }

    fn fresh_node(&mut self) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(Node { id, next: Vec::new() });
        id
    }

    fn fresh_slot(&mut self) -> SlotId {
        let id = SlotId(self.slots.len() as u32);
        self.slots.push(SmallVec::new());
        id
    }

    /// A fresh slot whose only target is the FAIL terminal.
    fn fail_slot(&mut self) -> SlotId {
        let slot = self.fresh_slot();
        self.append(slot, ID_FAIL);
        slot
    }

    fn append(&mut self, slot: SlotId, target: NodeId) {
        self.slots[slot.index()].push(target);
    }

    /// Point every currently open slot at `id`.
    fn attach(&mut self, open: &[SlotId], id: NodeId) {
        for &slot in open {
            self.append(slot, id);
        }
    }

    fn slot_targets(&self, slot: SlotId) -> &[NodeId] {
        &self.slots[slot.index()]
    }

    /// Single character: `[(0, FAIL), (c, S), (c+1, FAIL)]` with fresh `S`.
    fn transform_character(&mut self, c: u32, open: &[SlotId]) -> (NodeId, Vec<SlotId>) {
        let id = self.fresh_node();
        self.attach(open, id);

        let lead = self.fail_slot();
        let hit = self.fresh_slot();
        let tail = self.fail_slot();
        self.nodes[id as usize].next = vec![(0, lead), (c, hit), (c + 1, tail)];

        (id, vec![hit])
    }

    /// Character class: one node, one accepting slot per merged range, FAIL
    /// guards closing every range.
    fn transform_class(
        &mut self,
        ranges: &[CharacterRange],
        open: &[SlotId],
    ) -> Result<(NodeId, Vec<SlotId>)> {
        let merged = merge_ranges(ranges);
        if merged.len() > MAX_RANGES {
            return Err(Error::user(format!(
                "character class has too many ranges ({} > {})",
                merged.len(),
                MAX_RANGES
            )));
        }

        let id = self.fresh_node();
        self.attach(open, id);

        let mut next = Vec::with_capacity(1 + 2 * merged.len());
        let mut new_open = Vec::with_capacity(merged.len());
        let lead = self.fail_slot();
        next.push((0u32, lead));
        for range in &merged {
            let hit = self.fresh_slot();
            next.push((range.begin, hit));
            new_open.push(hit);
            let guard = self.fail_slot();
            next.push((range.end + 1, guard));
        }
        self.nodes[id as usize].next = next;

        Ok((id, new_open))
    }

    /// Literal run: thread the open slots through one character node per
    /// code point.
    fn transform_word(&mut self, word: &[u32], open: &[SlotId]) -> (NodeId, Vec<SlotId>) {
        let mut open = open.to_vec();
        let mut first = None;
        for &c in word {
            let (id, next_open) = self.transform_character(c, &open);
            first.get_or_insert(id);
            open = next_open;
        }
        (first.expect("word is non-empty"), open)
    }

    fn transform_content(
        &mut self,
        content: &ChunkContent,
        open: &[SlotId],
    ) -> Result<(NodeId, Vec<SlotId>)> {
        match content {
            ChunkContent::Word(word) => Ok(self.transform_word(word, open)),
            ChunkContent::Class(ranges) => self.transform_class(ranges, open),
        }
    }

    fn transform_chunk(&mut self, chunk: &Chunk, open: &[SlotId]) -> Result<ChunkOutcome> {
        match chunk.multiplier {
            None => {
                let (first, open) = self.transform_content(&chunk.content, open)?;
                Ok(ChunkOutcome { first: Some(first), open, nullable: false })
            }
            Some(Multiplier::Exact(n)) => {
                check_multiplier(n, Some(n))?;
                let mut open = open.to_vec();
                let mut first = None;
                for _ in 0..n {
                    let (f, next_open) = self.transform_content(&chunk.content, &open)?;
                    first.get_or_insert(f);
                    open = next_open;
                }
                Ok(ChunkOutcome { first, open, nullable: n == 0 })
            }
            Some(Multiplier::Range { min, max }) => {
                let min = min.unwrap_or(0);
                check_multiplier(min, max)?;
                self.repeat(&chunk.content, min, max, open)
            }
            Some(Multiplier::Plus) => self.repeat(&chunk.content, 1, None, open),
            Some(Multiplier::Question) => self.repeat(&chunk.content, 0, Some(1), open),
            Some(Multiplier::Star) => self.repeat(&chunk.content, 0, None, open),
        }
    }

    /// `{min,max}` expansion by unrolling.
    ///
    /// After `min` mandatory copies, a bounded multiplier emits one copy per
    /// allowed count plus a final overrun copy whose continuations are cut
    /// to FAIL; the slots each extra copy attached to stay exposed so the
    /// walk may leave after any permitted count. An unbounded multiplier
    /// emits a single extra copy whose trailing slots are spliced back onto
    /// its own first node, forming the loop, and exposed outward as well.
    fn repeat(
        &mut self,
        content: &ChunkContent,
        min: u32,
        max: Option<u32>,
        open: &[SlotId],
    ) -> Result<ChunkOutcome> {
        let mut current = open.to_vec();
        let mut first = None;

        for _ in 0..min {
            let (f, next_open) = self.transform_content(content, &current)?;
            first.get_or_insert(f);
            current = next_open;
        }

        let mut exposed = Vec::new();
        match max {
            Some(max) => {
                for _ in min..=max {
                    exposed.extend_from_slice(&current);
                    let (f, next_open) = self.transform_content(content, &current)?;
                    first.get_or_insert(f);
                    current = next_open;
                }
                // the last copy only exists to dead-end overruns
                for &slot in &current {
                    self.append(slot, ID_FAIL);
                }
            }
            None => {
                exposed.extend_from_slice(&current);
                let (f, next_open) = self.transform_content(content, &current)?;
                first.get_or_insert(f);
                for &slot in &next_open {
                    self.append(slot, f);
                }
                exposed.extend_from_slice(&next_open);
            }
        }

        Ok(ChunkOutcome { first, open: exposed, nullable: min == 0 })
    }

    /// Make the fixed entry node cover every chunk reachable without
    /// consuming input.
    ///
    /// The walk always starts at node [`ID_BEGIN`], so a leading
    /// zero-minimum chunk could otherwise never be skipped. This rewrites
    /// the entry node's transition map to the interval union of the first
    /// nodes of the maximal nullable chunk prefix (plus the chunk ending
    /// it). If every chunk is nullable the regex matches the empty word and
    /// an unconditional OK segment is unioned in too.
    fn close_entry(&mut self, outcomes: &[(Option<NodeId>, bool)]) -> Result<()> {
        let mut entry_nodes = Vec::new();
        let mut all_nullable = true;
        for &(first, nullable) in outcomes {
            if let Some(first) = first {
                entry_nodes.push(first);
            }
            if !nullable {
                all_nullable = false;
                break;
            }
        }

        if entry_nodes.is_empty() {
            // only {0} chunks; nothing was emitted, everything matches
            let id = self.fresh_node();
            sanity_assert!(id == ID_BEGIN, "entry node must get the reserved begin id");
            let accept = self.fresh_slot();
            self.append(accept, ID_OK);
            self.nodes[id as usize].next = vec![(0, accept)];
            return Ok(());
        }

        if entry_nodes.len() == 1 && !all_nullable {
            return Ok(());
        }
        sanity_assert!(entry_nodes[0] == ID_BEGIN, "first emitted node is not the entry");

        let mut boundaries: Vec<u32> = entry_nodes
            .iter()
            .flat_map(|&id| self.nodes[id as usize].next.iter().map(|&(c, _)| c))
            .collect();
        boundaries.sort_unstable();
        boundaries.dedup();

        let mut merged: Vec<(u32, Vec<NodeId>)> = Vec::with_capacity(boundaries.len());
        for &key in &boundaries {
            let mut targets = Vec::new();
            for &id in &entry_nodes {
                // governing entry: the last one whose key is <= this boundary
                let node = &self.nodes[id as usize];
                let mut slot = node.next[0].1;
                for &(c, s) in &node.next {
                    if c > key {
                        break;
                    }
                    slot = s;
                }
                targets.extend_from_slice(self.slot_targets(slot));
            }
            if all_nullable {
                targets.push(ID_OK);
            }
            targets.sort_unstable();
            targets.dedup();
            if let Some((_, last)) = merged.last() {
                if *last == targets {
                    continue;
                }
            }
            merged.push((key, targets));
        }

        let next = merged
            .into_iter()
            .map(|(key, targets)| {
                let slot = self.fresh_slot();
                for t in targets {
                    self.append(slot, t);
                }
                (key, slot)
            })
            .collect();
        self.nodes[ID_BEGIN as usize].next = next;
        Ok(())
    }
}

fn check_multiplier(min: u32, max: Option<u32>) -> Result<()> {
    let out_of_range =
        min > MAX_MULTIPLIER || max.map_or(false, |m| m > MAX_MULTIPLIER || m < min);
    if out_of_range {
        return Err(Error::user("Illegal regex multiplier!"));
    }
    Ok(())
}

/// Sort class elements by begin and collapse overlapping or adjacent ranges
/// (gap <= 1).
fn merge_ranges(ranges: &[CharacterRange]) -> Vec<CharacterRange> {
    let mut sorted = ranges.to_vec();
    sorted.sort_by_key(|r| r.begin);

    let mut merged: Vec<CharacterRange> = Vec::new();
    for range in sorted {
        if let Some(last) = merged.last_mut() {
            if range.begin <= last.end.saturating_add(1) {
                last.end = last.end.max(range.end);
                continue;
            }
        }
        merged.push(range);
    }
    merged
}
