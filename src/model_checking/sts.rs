use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use super::error::{Result, UnfoldError};

pub const INIT_LABEL: &str = "init";
pub const PROB_TOLERANCE: f64 = 1e-6;

pub type Labelling = BTreeMap<String, BTreeSet<usize>>;

/// A successor state `s` reached with probability `p`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransitionPair {
    pub s: usize,
    pub p: f64
}

/// Row-group compressed transition matrix. The choices of state `s` are the rows
/// `row_groups[s]..row_groups[s + 1]`, each row is sorted by successor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionMatrix {
    pub row_groups: Vec<usize>,
    pub rows: Vec<Vec<TransitionPair>>
}

impl TransitionMatrix {
    pub fn num_states(&self) -> usize {
        self.row_groups.len().saturating_sub(1)
    }

    pub fn num_choices(&self) -> usize {
        self.rows.len()
    }

    pub fn num_entries(&self) -> usize {
        self.rows.iter().map(|row| row.len()).sum()
    }

    pub fn row_group(&self, state: usize) -> Range<usize> {
        self.row_groups[state]..self.row_groups[state + 1]
    }

    pub fn row_group_size(&self, state: usize) -> usize {
        self.row_groups[state + 1] - self.row_groups[state]
    }

    pub fn row(&self, choice: usize) -> &[TransitionPair] {
        &self.rows[choice][..]
    }

    /// The state owning `choice`
    pub fn state_of_choice(&self, choice: usize) -> usize {
        self.row_groups.partition_point(|&start| start <= choice) - 1
    }

    /// All successors over all choices of `state`, possibly with repetitions
    pub fn successors(&self, state: usize) -> impl Iterator<Item = usize> + '_ {
        self.row_group(state).flat_map(move |choice| self.rows[choice].iter().map(|t| t.s))
    }
}

/// Incremental construction of a [`TransitionMatrix`], one row group at a time.
#[derive(Debug, Default)]
pub struct TransitionMatrixBuilder {
    row_groups: Vec<usize>,
    rows: Vec<Vec<TransitionPair>>
}

impl TransitionMatrixBuilder {
    pub fn new() -> Self {
        TransitionMatrixBuilder::default()
    }

    pub fn with_capacity(num_states: usize, num_choices: usize) -> Self {
        TransitionMatrixBuilder {
            row_groups: Vec::with_capacity(num_states + 1),
            rows: Vec::with_capacity(num_choices)
        }
    }

    /// Starts the row group of the next state, the following rows belong to it
    pub fn new_row_group(&mut self) {
        self.row_groups.push(self.rows.len());
    }

    /// Adds a row, entries are sorted by successor and duplicate successors are merged
    pub fn add_row<I: IntoIterator<Item = TransitionPair>>(&mut self, entries: I) {
        let row: Vec<TransitionPair> = entries.into_iter()
            .sorted_by_key(|t| t.s)
            .coalesce(|a, b| if a.s == b.s {
                Ok(TransitionPair { s: a.s, p: a.p + b.p })
            } else {
                Err((a, b))
            })
            .collect();
        self.rows.push(row);
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn build(mut self) -> TransitionMatrix {
        self.row_groups.push(self.rows.len());
        TransitionMatrix {
            row_groups: self.row_groups,
            rows: self.rows
        }
    }
}

/// Per-state and per-choice rewards. Transition rewards are one value per matrix entry and
/// are carried only so that the unfolders can reject them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_rewards: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_rewards: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_rewards: Option<Vec<Vec<f64>>>
}

impl RewardModel {
    pub fn has_transition_rewards(&self) -> bool {
        self.transition_rewards.is_some()
    }
}

/// Sparse transition system: an MDP, or a POMDP when `observations` is present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sts {
    pub transitions: TransitionMatrix,
    #[serde(default)]
    pub state_labelling: Labelling,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choice_labelling: Option<Labelling>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub reward_models: BTreeMap<String, RewardModel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observations: Option<Vec<u32>>
}

impl Sts {
    pub fn new(transitions: TransitionMatrix) -> Self {
        Sts {
            transitions,
            ..Sts::default()
        }
    }

    pub fn num_states(&self) -> usize {
        self.transitions.num_states()
    }

    pub fn num_choices(&self) -> usize {
        self.transitions.num_choices()
    }

    pub fn is_pomdp(&self) -> bool {
        self.observations.is_some()
    }

    pub fn add_label<I: IntoIterator<Item = usize>>(&mut self, label: &str, states: I) {
        self.state_labelling.entry(label.to_string()).or_default().extend(states);
    }

    pub fn add_choice_label<I: IntoIterator<Item = usize>>(&mut self, label: &str, choices: I) {
        self.choice_labelling.get_or_insert_with(BTreeMap::new)
            .entry(label.to_string()).or_default().extend(choices);
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.state_labelling.contains_key(label)
    }

    pub fn states_with_label(&self, label: &str) -> Result<&BTreeSet<usize>> {
        self.state_labelling.get(label).ok_or_else(|| UnfoldError::MissingLabel(label.to_string()))
    }

    /// Dense membership vector of the states carrying `label`
    pub fn label_mask(&self, label: &str) -> Result<Vec<bool>> {
        let mut mask = vec![false; self.num_states()];
        for s in self.states_with_label(label)?.iter() {
            mask[*s] = true;
        }
        Ok(mask)
    }

    pub fn initial_states(&self) -> Result<&BTreeSet<usize>> {
        match self.state_labelling.get(INIT_LABEL) {
            Some(states) if !states.is_empty() => Ok(states),
            _ => Err(UnfoldError::NoInitialState)
        }
    }

    pub fn labels_of_choice(&self, choice: usize) -> impl Iterator<Item = &str> + '_ {
        self.choice_labelling.iter()
            .flat_map(|labelling| labelling.iter())
            .filter(move |(_, choices)| choices.contains(&choice))
            .map(|(label, _)| label.as_str())
    }

    pub fn observations(&self) -> Result<&[u32]> {
        self.observations.as_deref().ok_or(UnfoldError::MissingObservations)
    }

    pub fn check_no_transition_rewards(&self) -> Result<()> {
        match self.reward_models.iter().find(|(_, model)| model.has_transition_rewards()) {
            None => Ok(()),
            Some((name, _)) => Err(UnfoldError::TransitionRewards(name.to_string()))
        }
    }

    /// Checks the structural invariants: row groups partition the choices in state order and
    /// are non-empty, every row is a sorted probability distribution over existing states and
    /// every label, reward vector and observation vector fits the state and choice counts.
    pub fn validate(&self) -> Result<()> {
        let n = self.num_states();
        let m = self.num_choices();
        let row_groups = &self.transitions.row_groups;
        if row_groups.first() != Some(&0) || row_groups.last() != Some(&m) {
            return Err(UnfoldError::InvalidModel("row groups do not cover the choices".to_string()));
        }
        if let Some(state) = (0..n).find(|s| row_groups[s + 1] <= row_groups[*s]) {
            return Err(UnfoldError::InvalidModel(format!("state {} has no choices", state)));
        }
        for (choice, row) in self.transitions.rows.iter().enumerate() {
            if row.is_empty() {
                return Err(UnfoldError::InvalidModel(format!("choice {} has no successors", choice)));
            }
            if row.iter().any(|t| t.s >= n || t.p <= 0.0 || t.p.is_nan()) {
                return Err(UnfoldError::InvalidModel(format!("choice {} has an invalid entry", choice)));
            }
            if !row.iter().tuple_windows().all(|(a, b)| a.s < b.s) {
                return Err(UnfoldError::InvalidModel(format!("choice {} is not sorted", choice)));
            }
            let sum: f64 = row.iter().map(|t| t.p).sum();
            if (sum - 1.0).abs() > PROB_TOLERANCE {
                return Err(UnfoldError::InvalidModel(format!("choice {} sums to {}", choice, sum)));
            }
        }
        if let Some((label, _)) = self.state_labelling.iter().find(|(_, states)| states.iter().any(|s| *s >= n)) {
            return Err(UnfoldError::InvalidModel(format!("state label '{}' is out of bounds", label)));
        }
        if let Some(labelling) = self.choice_labelling.as_ref() {
            if let Some((label, _)) = labelling.iter().find(|(_, choices)| choices.iter().any(|c| *c >= m)) {
                return Err(UnfoldError::InvalidModel(format!("choice label '{}' is out of bounds", label)));
            }
        }
        for (name, model) in self.reward_models.iter() {
            let state_ok = model.state_rewards.as_ref().map_or(true, |r| r.len() == n);
            let action_ok = model.action_rewards.as_ref().map_or(true, |r| r.len() == m);
            if !state_ok || !action_ok {
                return Err(UnfoldError::InvalidModel(format!("reward model '{}' has the wrong size", name)));
            }
        }
        if let Some(observations) = self.observations.as_ref() {
            if observations.len() != n {
                return Err(UnfoldError::InvalidModel(format!("{} observations for {} states", observations.len(), n)));
            }
        }
        Ok(())
    }

    /// Canonical POMDP form: valid, observable, and states sharing an observation expose the
    /// same number of choices with the same choice labels at every offset.
    pub fn check_canonic(&self) -> Result<()> {
        self.validate()?;
        let observations = self.observations()?;
        let mut prototype: BTreeMap<u32, usize> = BTreeMap::new();
        for (state, obs) in observations.iter().enumerate() {
            let other = *prototype.entry(*obs).or_insert(state);
            if self.transitions.row_group_size(state) != self.transitions.row_group_size(other) {
                return Err(UnfoldError::NotCanonical(
                    format!("states {} and {} share observation {} but have different numbers of choices", other, state, obs)));
            }
            let offsets = self.transitions.row_group(state).zip(self.transitions.row_group(other));
            for (choice, other_choice) in offsets {
                if !self.labels_of_choice(choice).eq(self.labels_of_choice(other_choice)) {
                    return Err(UnfoldError::NotCanonical(
                        format!("choices {} and {} of observation {} are labelled differently", other_choice, choice, obs)));
                }
            }
        }
        Ok(())
    }

    pub fn is_canonic(&self) -> bool {
        self.check_canonic().is_ok()
    }

    /// Labels of the choices `choice_map[c]`, attached to every new choice `c`
    pub fn map_choice_labelling(&self, choice_map: &[usize]) -> Option<Labelling> {
        self.choice_labelling.as_ref().map(|labelling| {
            labelling.iter()
                .map(|(label, choices)| {
                    let mapped = choice_map.iter().enumerate()
                        .filter(|(_, original)| choices.contains(original))
                        .map(|(c, _)| c)
                        .collect();
                    (label.to_string(), mapped)
                })
                .collect()
        })
    }

    /// Reward models of a model whose states replicate `state_map[s]` and whose choices
    /// replicate `choice_map[c]`
    pub fn map_reward_models(&self, state_map: &[usize], choice_map: &[usize]) -> Result<BTreeMap<String, RewardModel>> {
        self.check_no_transition_rewards()?;
        let models = self.reward_models.iter()
            .map(|(name, model)| {
                let mapped = RewardModel {
                    state_rewards: model.state_rewards.as_ref()
                        .map(|r| state_map.iter().map(|s| r[*s]).collect()),
                    action_rewards: model.action_rewards.as_ref()
                        .map(|r| choice_map.iter().map(|c| r[*c]).collect()),
                    transition_rewards: None
                };
                (name.to_string(), mapped)
            })
            .collect();
        Ok(models)
    }

    /// Sub-model on the states with `keep[s]` set. Every successor of a kept state must be
    /// kept. Returns the model together with the old to new state numbering.
    pub fn restrict(&self, keep: &[bool]) -> Result<(Sts, Vec<Option<usize>>)> {
        let mut old_to_new: Vec<Option<usize>> = vec![None; self.num_states()];
        let mut new_to_old: Vec<usize> = Vec::new();
        for (s, _) in keep.iter().enumerate().filter(|(_, k)| **k) {
            old_to_new[s] = Some(new_to_old.len());
            new_to_old.push(s);
        }
        let mut builder = TransitionMatrixBuilder::with_capacity(new_to_old.len(), self.num_choices());
        let mut kept_choices: Vec<usize> = Vec::new();
        for s in new_to_old.iter() {
            builder.new_row_group();
            for choice in self.transitions.row_group(*s) {
                let mut row = Vec::with_capacity(self.transitions.row(choice).len());
                for t in self.transitions.row(choice) {
                    match old_to_new[t.s] {
                        Some(s_prime) => row.push(TransitionPair { s: s_prime, p: t.p }),
                        None => return Err(UnfoldError::InvalidModel(
                            format!("choice {} of kept state {} leads to removed state {}", choice, s, t.s)))
                    }
                }
                builder.add_row(row);
                kept_choices.push(choice);
            }
        }
        let state_labelling = self.state_labelling.iter()
            .map(|(label, states)| (label.to_string(), states.iter().filter_map(|s| old_to_new[*s]).collect()))
            .collect();
        let mut reward_models = BTreeMap::new();
        for (name, model) in self.reward_models.iter() {
            reward_models.insert(name.to_string(), RewardModel {
                state_rewards: model.state_rewards.as_ref().map(|r| new_to_old.iter().map(|s| r[*s]).collect()),
                action_rewards: model.action_rewards.as_ref().map(|r| kept_choices.iter().map(|c| r[*c]).collect()),
                transition_rewards: model.transition_rewards.as_ref().map(|r| kept_choices.iter().map(|c| r[*c].to_vec()).collect())
            });
        }
        let restricted = Sts {
            transitions: builder.build(),
            state_labelling,
            choice_labelling: self.map_choice_labelling(&kept_choices),
            reward_models,
            observations: self.observations.as_ref().map(|o| new_to_old.iter().map(|s| o[*s]).collect())
        };
        Ok((restricted, old_to_new))
    }
}
