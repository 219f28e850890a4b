//! Open-addressed node → activation map used by the pipeline.

use crate::graph::types::NodeId;

const MIN_CAPACITY: usize = 16;

/// Activation levels of the nodes touched by one encode/refine pass.
/// Iteration follows first-activation order.
#[derive(Debug, Clone, Default)]
pub struct ActivationPattern {
    slots: Vec<Option<(NodeId, usize)>>,
    order: Vec<(NodeId, f32)>,
}

fn slot_for(id: NodeId, mask: usize) -> usize {
    // Fibonacci hashing of the packed handle.
    (id.mix().wrapping_mul(0x9e37_79b9_7f4a_7c15) >> 32) as usize & mask
}

impl ActivationPattern {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn find(&self, id: NodeId) -> Result<usize, usize> {
        let mask = self.slots.len() - 1;
        let mut i = slot_for(id, mask);
        loop {
            match self.slots[i] {
                Some((n, pos)) if n == id => return Ok(pos),
                Some(_) => i = (i + 1) & mask,
                None => return Err(i),
            }
        }
    }

    fn grow(&mut self) {
        let capacity = (self.slots.len() * 2).max(MIN_CAPACITY);
        self.slots = vec![None; capacity];
        let mask = capacity - 1;
        for (pos, (id, _)) in self.order.iter().enumerate() {
            let mut i = slot_for(*id, mask);
            while self.slots[i].is_some() {
                i = (i + 1) & mask;
            }
            self.slots[i] = Some((*id, pos));
        }
    }

    pub fn get(&self, id: NodeId) -> f32 {
        if self.slots.is_empty() {
            return 0.0;
        }
        match self.find(id) {
            Ok(pos) => self.order[pos].1,
            Err(_) => 0.0,
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        !self.slots.is_empty() && self.find(id).is_ok()
    }

    /// Overwrite the activation of `id`.
    pub fn set(&mut self, id: NodeId, value: f32) {
        *self.entry(id) = value;
    }

    /// Add to the activation of `id`.
    pub fn add(&mut self, id: NodeId, delta: f32) {
        *self.entry(id) += delta;
    }

    fn entry(&mut self, id: NodeId) -> &mut f32 {
        if (self.order.len() + 1) * 2 > self.slots.len() {
            self.grow();
        }
        match self.find(id) {
            Ok(pos) => &mut self.order[pos].1,
            Err(slot) => {
                let pos = self.order.len();
                self.slots[slot] = Some((id, pos));
                self.order.push((id, 0.0));
                &mut self.order[pos].1
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, f32)> + '_ {
        self.order.iter().copied()
    }

    pub fn total(&self) -> f32 {
        self.order.iter().map(|(_, a)| a).sum()
    }

    /// Mean and population variance of the activation levels.
    pub fn spread(&self) -> (f32, f32) {
        let values: Vec<f32> = self.order.iter().map(|(_, a)| *a).collect();
        crate::graph::stats::mean_variance(&values)
    }

    /// Strongest `limit` nodes, strongest first.
    pub fn top(&self, limit: usize) -> Vec<(NodeId, f32)> {
        let mut ranked = self.order.clone();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(limit);
        ranked
    }
}
