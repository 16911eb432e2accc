use std::collections::BTreeMap;
use std::convert::TryFrom;
use itertools::Itertools;
use log::{debug, info};
use super::error::{Result, UnfoldError};
use super::memory::MemoryAutomaton;
use super::reachability::forward_reachable;
use super::sts::{Labelling, Sts, TransitionMatrix, TransitionMatrixBuilder, TransitionPair, INIT_LABEL};

/// Synchronous product of a POMDP with a memory automaton.
///
/// The dense product has a state `(s, m)` for every POMDP state `s` and memory state `m`,
/// numbered `s * k + m`. The choices of `(s, m)` are the original choices of `s`, each
/// replicated once per outgoing memory transition of `m`, and the replica for `m'` routes
/// every successor `s'` to `(s', m')`. States unreachable from the initial states are
/// removed afterwards and all maps refer to the pruned numbering.
pub struct MemoryProductUnfolder<'a> {
    pomdp: &'a Sts,
    memory: &'a MemoryAutomaton,
    /// Add a `memstate_<m>` label for every memory state
    pub add_memory_labels: bool,
    pub product_to_state: Vec<usize>,
    pub product_to_memory: Vec<usize>,
    /// Original choice of every product choice
    pub choice_map: Vec<usize>,
    /// Memory successor selected by every product choice
    pub choice_memory: Vec<usize>
}

impl<'a> MemoryProductUnfolder<'a> {
    pub fn new(pomdp: &'a Sts, memory: &'a MemoryAutomaton, add_memory_labels: bool) -> Self {
        MemoryProductUnfolder {
            pomdp,
            memory,
            add_memory_labels,
            product_to_state: Vec::new(),
            product_to_memory: Vec::new(),
            choice_map: Vec::new(),
            choice_memory: Vec::new()
        }
    }

    pub fn unfolding_state(&self, model_state: usize, memory_state: usize) -> usize {
        model_state * self.memory.num_states() + memory_state
    }

    pub fn model_state(&self, unfolding_state: usize) -> usize {
        unfolding_state / self.memory.num_states()
    }

    pub fn memory_state(&self, unfolding_state: usize) -> usize {
        unfolding_state % self.memory.num_states()
    }

    /// All `(s, m)` pairs in unfolding-state order
    pub fn create_states(&self) -> Vec<(usize, usize)> {
        (0..self.pomdp.num_states()).cartesian_product(0..self.memory.num_states()).collect()
    }

    /// Transition matrix of the dense product, with the original choice and the memory
    /// successor of every product choice
    pub fn transform_transitions(&self) -> (TransitionMatrix, Vec<usize>, Vec<usize>) {
        let matrix = &self.pomdp.transitions;
        let states = self.create_states();
        let num_rows: usize = states.iter()
            .map(|(s, m)| matrix.row_group_size(*s) * self.memory.num_outgoing(*m))
            .sum();
        let mut builder = TransitionMatrixBuilder::with_capacity(states.len(), num_rows);
        let mut choice_map: Vec<usize> = Vec::with_capacity(num_rows);
        let mut choice_memory: Vec<usize> = Vec::with_capacity(num_rows);
        for (s, m) in states.into_iter() {
            builder.new_row_group();
            for choice in matrix.row_group(s) {
                for m_prime in self.memory.outgoing(m) {
                    builder.add_row(matrix.row(choice).iter().map(|t| TransitionPair {
                        s: self.unfolding_state(t.s, *m_prime),
                        p: t.p
                    }));
                    choice_map.push(choice);
                    choice_memory.push(*m_prime);
                }
            }
        }
        (builder.build(), choice_map, choice_memory)
    }

    /// Labels of `s` hold in every `(s, m)`, except `init` which only holds with the initial
    /// memory state
    pub fn transform_state_labelling(&self) -> Labelling {
        let mut labelling: Labelling = BTreeMap::new();
        for (label, states) in self.pomdp.state_labelling.iter() {
            let product_states = if label == INIT_LABEL {
                states.iter().map(|s| self.unfolding_state(*s, self.memory.initial)).collect()
            } else {
                states.iter()
                    .cartesian_product(0..self.memory.num_states())
                    .map(|(s, m)| self.unfolding_state(*s, m))
                    .collect()
            };
            labelling.insert(label.to_string(), product_states);
        }
        if self.add_memory_labels {
            for m in 0..self.memory.num_states() {
                let product_states = (0..self.pomdp.num_states()).map(|s| self.unfolding_state(s, m)).collect();
                labelling.insert(format!("memstate_{}", m), product_states);
            }
        }
        labelling
    }

    /// Observation `o` in memory `m` becomes the pair `(o, m)`; the occurring pairs are
    /// numbered densely in ascending order, which matches ordering by `o * k + m`.
    pub fn transform_observations(&self, product_states: &[(usize, usize)]) -> Result<Vec<u32>> {
        let observations = self.pomdp.observations()?;
        let unfolded: Vec<(u32, usize)> = product_states.iter()
            .map(|(s, m)| (observations[*s], *m))
            .collect();
        let mut renumbering: BTreeMap<(u32, usize), u32> = BTreeMap::new();
        for (i, obs) in unfolded.iter().copied().sorted().dedup().enumerate() {
            let id = u32::try_from(i)
                .map_err(|_| UnfoldError::InvalidModel("product has more observations than fit in u32".to_string()))?;
            renumbering.insert(obs, id);
        }
        Ok(unfolded.iter().map(|obs| renumbering[obs]).collect())
    }

    /// Builds the dense product and removes the product states that are not reachable from
    /// the initial states.
    pub fn transform(&mut self) -> Result<Sts> {
        self.memory.validate()?;
        self.pomdp.check_canonic()?;
        self.pomdp.check_no_transition_rewards()?;
        self.pomdp.initial_states()?;

        let states = self.create_states();
        let (transitions, choice_map, choice_memory) = self.transform_transitions();
        debug!("dense memory product has {} states and {} choices", states.len(), transitions.num_choices());
        let state_map: Vec<usize> = states.iter().map(|(s, _)| *s).collect();
        let dense = Sts {
            state_labelling: self.transform_state_labelling(),
            choice_labelling: self.pomdp.map_choice_labelling(&choice_map),
            reward_models: self.pomdp.map_reward_models(&state_map, &choice_map)?,
            observations: None,
            transitions
        };

        let reachable = forward_reachable(&dense.transitions, dense.initial_states()?.iter().copied());
        let (mut product, _) = dense.restrict(&reachable)?;
        let kept_states: Vec<(usize, usize)> = states.into_iter()
            .zip(reachable.iter())
            .filter(|(_, r)| **r)
            .map(|(state, _)| state)
            .collect();
        let kept_choices: Vec<bool> = (0..dense.num_choices())
            .map(|c| reachable[dense.transitions.state_of_choice(c)])
            .collect();
        product.observations = Some(self.transform_observations(&kept_states)?);

        self.product_to_state = kept_states.iter().map(|(s, _)| *s).collect();
        self.product_to_memory = kept_states.iter().map(|(_, m)| *m).collect();
        self.choice_map = choice_map.into_iter().zip(kept_choices.iter())
            .filter(|(_, k)| **k).map(|(c, _)| c).collect();
        self.choice_memory = choice_memory.into_iter().zip(kept_choices.iter())
            .filter(|(_, k)| **k).map(|(m, _)| m).collect();
        info!("memory product has {} of {} states reachable", product.num_states(), dense.num_states());
        Ok(product)
    }
}

/// Unfolds `memory` into `pomdp`, returning the product together with the original state
/// and the memory state of every product state.
pub fn unfold(pomdp: &Sts, memory: &MemoryAutomaton) -> Result<(Sts, Vec<usize>, Vec<usize>)> {
    let mut unfolder = MemoryProductUnfolder::new(pomdp, memory, false);
    let product = unfolder.transform()?;
    Ok((product, unfolder.product_to_state, unfolder.product_to_memory))
}
