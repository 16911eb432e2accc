use serde::{Deserialize, Serialize};
use super::error::{Result, UnfoldError};

/// Deterministic finite memory for a controller. Memory state `m` may move to any of
/// `transitions[m]`; the unfolding replicates every choice once per outgoing transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryAutomaton {
    pub initial: usize,
    pub transitions: Vec<Vec<usize>>
}

impl MemoryAutomaton {
    /// A single memory state
    pub fn trivial() -> Self {
        MemoryAutomaton { initial: 0, transitions: vec![vec![0]] }
    }

    /// `k` memory states, each of which may move to any other
    pub fn full(k: usize) -> Self {
        MemoryAutomaton { initial: 0, transitions: vec![(0..k).collect::<Vec<usize>>(); k] }
    }

    /// Counts up to `k - 1` and stays there
    pub fn fixed_counter(k: usize) -> Self {
        let transitions = (0..k).map(|m| vec![(m + 1).min(k.saturating_sub(1))]).collect();
        MemoryAutomaton { initial: 0, transitions }
    }

    /// Counts modulo `k`
    pub fn fixed_ring(k: usize) -> Self {
        let transitions = (0..k).map(|m| vec![(m + 1) % k]).collect();
        MemoryAutomaton { initial: 0, transitions }
    }

    pub fn num_states(&self) -> usize {
        self.transitions.len()
    }

    pub fn outgoing(&self, m: usize) -> &[usize] {
        &self.transitions[m][..]
    }

    pub fn num_outgoing(&self, m: usize) -> usize {
        self.transitions[m].len()
    }

    pub fn validate(&self) -> Result<()> {
        let k = self.num_states();
        if k == 0 {
            return Err(UnfoldError::InvalidMemory("no memory states".to_string()));
        }
        if self.initial >= k {
            return Err(UnfoldError::InvalidMemory(format!("initial memory state {} out of bounds", self.initial)));
        }
        for (m, successors) in self.transitions.iter().enumerate() {
            if successors.is_empty() {
                return Err(UnfoldError::InvalidMemory(format!("memory state {} has no outgoing transitions", m)));
            }
            if let Some(m_prime) = successors.iter().find(|m_prime| **m_prime >= k) {
                return Err(UnfoldError::InvalidMemory(format!("memory state {} moves to unknown state {}", m, m_prime)));
            }
        }
        Ok(())
    }
}
