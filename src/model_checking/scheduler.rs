use serde::{Deserialize, Serialize};
use super::sts::Labelling;

/// Memory update of a scheduler. `transitions[m][m_prime]`, when present, marks the states
/// whose outgoing transitions move memory `m` to `m_prime`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStructure {
    pub transitions: Vec<Vec<Option<Vec<bool>>>>,
    pub labelling: Labelling,
    /// Initial memory state of every initial model state
    pub initial: Vec<usize>
}

impl MemoryStructure {
    pub fn num_states(&self) -> usize {
        self.transitions.len()
    }

    /// Memory after leaving `state` with memory `memory`
    pub fn successor(&self, memory: usize, state: usize) -> Option<usize> {
        self.transitions[memory].iter()
            .position(|states| states.as_ref().map_or(false, |mask| mask[state]))
    }
}

/// Deterministic scheduler selecting, for every state and memory state, a choice offset
/// within the row group of the state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scheduler {
    pub choices: Vec<Vec<Option<usize>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryStructure>
}

impl Scheduler {
    pub fn new(num_states: usize, memory: Option<MemoryStructure>) -> Self {
        let num_memory = memory.as_ref().map_or(1, |m| m.num_states());
        Scheduler {
            choices: vec![vec![None; num_memory]; num_states],
            memory
        }
    }

    /// Memoryless scheduler selecting `choices[s]` in every state `s`
    pub fn memoryless(choices: &[usize]) -> Self {
        Scheduler {
            choices: choices.iter().map(|c| vec![Some(*c)]).collect(),
            memory: None
        }
    }

    pub fn num_states(&self) -> usize {
        self.choices.len()
    }

    pub fn num_memory_states(&self) -> usize {
        self.memory.as_ref().map_or(1, |m| m.num_states())
    }

    pub fn set_choice(&mut self, choice: usize, state: usize, memory: usize) {
        self.choices[state][memory] = Some(choice);
    }

    pub fn choice(&self, state: usize, memory: usize) -> Option<usize> {
        self.choices.get(state).and_then(|c| c.get(memory).copied().flatten())
    }

    pub fn is_choice_selected(&self, state: usize, memory: usize) -> bool {
        self.choice(state, memory).is_some()
    }

    pub fn is_fully_defined(&self) -> bool {
        self.choices.iter().all(|c| c.iter().all(|choice| choice.is_some()))
    }
}
