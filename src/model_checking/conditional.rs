use std::collections::{BTreeMap, BTreeSet};
use serde::{Deserialize, Serialize};
use log::{debug, info, warn};
use super::error::{Result, UnfoldError};
use super::reachability::{backward_prob_greater_zero, successors_reachable};
use super::scheduler::{MemoryStructure, Scheduler};
use super::sts::{Labelling, Sts, TransitionMatrix, TransitionMatrixBuilder, TransitionPair, INIT_LABEL};

/// Monitor mode of a product state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Mode {
    /// Neither the condition nor the target has been reached
    NotTriggered = 0,
    ConditionReached = 1,
    /// The target was reached before the condition
    TargetReached = 2
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::NotTriggered, Mode::ConditionReached, Mode::TargetReached];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// `P(F target | F condition)` over state labels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalFormula {
    pub target: String,
    pub condition: String
}

impl ConditionalFormula {
    pub fn new(target: &str, condition: &str) -> Self {
        ConditionalFormula {
            target: target.to_string(),
            condition: condition.to_string()
        }
    }
}

/// Product of an MDP with a three-mode monitor that reduces a conditional reachability query
/// to plain reachability.
pub struct ConditionalUnfolder<'a> {
    mdp: &'a Sts,
    formula: ConditionalFormula,
    pub unfolded_mdp: Option<Sts>,
    /// Original choice of every product choice
    pub choice_map: Vec<usize>,
    /// Original state of every product state
    pub state_prototype: Vec<usize>,
    pub state_memory: Vec<Mode>,
    /// `prototype_duplicates[mode][s]` is the replica of `s` in `mode`, if it exists
    pub prototype_duplicates: Vec<Vec<Option<usize>>>
}

impl<'a> ConditionalUnfolder<'a> {
    pub fn new(mdp: &'a Sts, formula: ConditionalFormula) -> Self {
        ConditionalUnfolder {
            mdp,
            formula,
            unfolded_mdp: None,
            choice_map: Vec::new(),
            state_prototype: Vec::new(),
            state_memory: Vec::new(),
            prototype_duplicates: Vec::new()
        }
    }

    pub fn conditional_label(&self) -> &str {
        &self.formula.condition
    }

    pub fn target_label(&self) -> &str {
        &self.formula.target
    }

    pub fn conditional_states(&self) -> Result<&BTreeSet<usize>> {
        self.mdp.states_with_label(self.conditional_label())
    }

    pub fn target_states(&self) -> Result<&BTreeSet<usize>> {
        self.mdp.states_with_label(self.target_label())
    }

    /// Whether some scheduler reaches a condition state from the initial state with positive
    /// probability. The conditional probability is undefined otherwise.
    pub fn is_condition_reachable(&self) -> Result<bool> {
        self.mdp.validate()?;
        let cond_states = self.mdp.label_mask(self.conditional_label())?;
        let initial_states = self.mdp.initial_states()?;
        if initial_states.len() > 1 {
            warn!("{} initial states, only the first one is considered", initial_states.len());
        }
        let initial = *initial_states.iter().next().ok_or(UnfoldError::NoInitialState)?;
        let all_states = vec![true; self.mdp.num_states()];
        let reachable = backward_prob_greater_zero(&self.mdp.transitions, &all_states, &cond_states);
        Ok(reachable[initial])
    }

    /// Assigns product state ids: every original state in mode 0, then the states reachable
    /// from a condition state in mode 1, then those reachable from a target state that is not
    /// a condition state in mode 2.
    fn create_states(&mut self, cond_states: &[bool], target_states: &[bool]) {
        let matrix = &self.mdp.transitions;
        let n = matrix.num_states();
        let cond_seeds = (0..n).filter(|s| cond_states[*s]);
        let target_seeds = (0..n).filter(|s| target_states[*s] && !cond_states[*s]);
        let reachable = [
            vec![true; n],
            successors_reachable(matrix, cond_seeds),
            successors_reachable(matrix, target_seeds)
        ];

        self.state_prototype = Vec::new();
        self.state_memory = Vec::new();
        self.prototype_duplicates = vec![vec![None; n]; Mode::ALL.len()];
        for mode in Mode::ALL.iter() {
            for state in (0..n).filter(|s| reachable[mode.index()][*s]) {
                self.prototype_duplicates[mode.index()][state] = Some(self.state_prototype.len());
                self.state_prototype.push(state);
                self.state_memory.push(*mode);
            }
        }
        debug!("conditional product has {} states in mode 1 and {} in mode 2",
               self.prototype_duplicates[1].iter().filter(|d| d.is_some()).count(),
               self.prototype_duplicates[2].iter().filter(|d| d.is_some()).count());
    }

    /// Moves the successors of `choice` to their replicas in `mode`
    fn redirect(&self, choice: usize, mode: Mode) -> Result<Vec<TransitionPair>> {
        self.mdp.transitions.row(choice).iter()
            .map(|t| match self.prototype_duplicates[mode.index()][t.s] {
                Some(s_prime) => Ok(TransitionPair { s: s_prime, p: t.p }),
                None => Err(UnfoldError::UnexpectedState { state: t.s, mode: mode.index() })
            })
            .collect()
    }

    fn create_transitions(&mut self, cond_states: &[bool], target_states: &[bool]) -> Result<TransitionMatrix> {
        let matrix = &self.mdp.transitions;
        let mut builder = TransitionMatrixBuilder::with_capacity(self.state_prototype.len(), matrix.num_choices());
        let mut choice_map: Vec<usize> = Vec::new();
        for (state, (prototype, mode)) in self.state_prototype.iter().zip(self.state_memory.iter()).enumerate() {
            builder.new_row_group();
            for prototype_row in matrix.row_group(*prototype) {
                let row = match mode {
                    Mode::NotTriggered if cond_states[*prototype] => self.redirect(prototype_row, Mode::ConditionReached)?,
                    Mode::NotTriggered if target_states[*prototype] => self.redirect(prototype_row, Mode::TargetReached)?,
                    Mode::NotTriggered => self.redirect(prototype_row, Mode::NotTriggered)?,
                    Mode::ConditionReached if target_states[*prototype] => vec![TransitionPair { s: state, p: 1.0 }],
                    Mode::TargetReached if cond_states[*prototype] => vec![TransitionPair { s: state, p: 1.0 }],
                    _ => self.redirect(prototype_row, *mode)?
                };
                builder.add_row(row);
                choice_map.push(prototype_row);
            }
        }
        self.choice_map = choice_map;
        Ok(builder.build())
    }

    /// `init` holds only in mode-0 replicas, every other label in all replicas
    fn create_labelling(&self) -> Labelling {
        let mut labelling: Labelling = BTreeMap::new();
        for (label, prototypes) in self.mdp.state_labelling.iter() {
            let states: BTreeSet<usize> = if label == INIT_LABEL {
                prototypes.iter()
                    .filter_map(|s| self.prototype_duplicates[Mode::NotTriggered.index()][*s])
                    .collect()
            } else {
                prototypes.iter()
                    .flat_map(|s| self.prototype_duplicates.iter().filter_map(move |d| d[*s]))
                    .collect()
            };
            labelling.insert(label.to_string(), states);
        }
        labelling
    }

    pub fn construct_unfolded_model(&mut self) -> Result<&Sts> {
        self.mdp.validate()?;
        let target_states = self.mdp.label_mask(self.target_label())?;
        let cond_states = self.mdp.label_mask(self.conditional_label())?;
        self.mdp.check_no_transition_rewards()?;

        self.create_states(&cond_states, &target_states);
        let transitions = self.create_transitions(&cond_states, &target_states)?;
        let unfolded = Sts {
            transitions,
            state_labelling: self.create_labelling(),
            choice_labelling: self.mdp.map_choice_labelling(&self.choice_map),
            reward_models: self.mdp.map_reward_models(&self.state_prototype, &self.choice_map)?,
            observations: None
        };
        info!("conditional unfolding has {} states and {} choices", unfolded.num_states(), unfolded.num_choices());
        Ok(self.unfolded_mdp.insert(unfolded))
    }

    /// Memory structure of the monitor over the original MDP: memory 0 moves to 1 when
    /// leaving a condition state and to 2 when leaving a target state that is not a condition
    /// state; memories 1 and 2 are absorbing.
    fn monitor_memory(cond_states: &[bool], target_states: &[bool]) -> MemoryStructure {
        let n = cond_states.len();
        let all = vec![true; n];
        let stay: Vec<bool> = (0..n).map(|s| !cond_states[s] && !target_states[s]).collect();
        let to_target: Vec<bool> = (0..n).map(|s| target_states[s] && !cond_states[s]).collect();
        let mut labelling: Labelling = BTreeMap::new();
        labelling.insert("init_memory".to_string(), vec![0].into_iter().collect());
        labelling.insert("condition_reached".to_string(), vec![1].into_iter().collect());
        labelling.insert("target_reached".to_string(), vec![2].into_iter().collect());
        MemoryStructure {
            transitions: vec![
                vec![Some(stay), Some(cond_states.to_vec()), Some(to_target)],
                vec![None, Some(all.clone()), None],
                vec![None, None, Some(all)]
            ],
            labelling,
            initial: vec![0]
        }
    }

    /// Maps a scheduler computed on `model_matrix`, a model whose states and choices map onto
    /// the original MDP through `quotient_state_map` and `quotient_choice_map`, to a
    /// scheduler with the monitor's memory on the original MDP.
    ///
    /// Memory 0 follows `scheduler` in states that carry neither label; memory 1 follows
    /// `reach_target_choices`, memory 2 follows `reach_condition_choices`, and memory 0 in a
    /// labelled state progresses towards the other label. The remaining pairs fall back to
    /// the first choice.
    pub fn map_scheduler_to_quotient(&self, model_matrix: &TransitionMatrix, quotient_state_map: &[usize],
                                     quotient_choice_map: &[usize], scheduler: &Scheduler,
                                     reach_target_choices: &[usize], reach_condition_choices: &[usize]) -> Result<Scheduler> {
        self.mdp.validate()?;
        let target_states = self.mdp.label_mask(self.target_label())?;
        let cond_states = self.mdp.label_mask(self.conditional_label())?;
        let matrix = &self.mdp.transitions;
        let n = matrix.num_states();
        if quotient_state_map.len() != model_matrix.num_states() || quotient_choice_map.len() != model_matrix.num_choices() {
            return Err(UnfoldError::InvalidScheduler("quotient maps do not match the model".to_string()));
        }
        if reach_target_choices.len() != n || reach_condition_choices.len() != n {
            return Err(UnfoldError::InvalidScheduler("reachability choices do not match the quotient".to_string()));
        }
        if let Some(state) = quotient_state_map.iter().find(|s| **s >= n) {
            return Err(UnfoldError::InvalidScheduler(format!("quotient state {} does not exist", state)));
        }
        if let Some(state) = (0..n).find(|s| reach_target_choices[*s] >= matrix.row_group_size(*s)
            || reach_condition_choices[*s] >= matrix.row_group_size(*s)) {
            return Err(UnfoldError::InvalidScheduler(format!("reachability choice of state {} is out of range", state)));
        }

        let memory = ConditionalUnfolder::monitor_memory(&cond_states, &target_states);
        let mut final_scheduler = Scheduler::new(n, Some(memory));

        for (model_state, quotient_state) in quotient_state_map.iter().enumerate() {
            let local_choice = match scheduler.choice(model_state, 0) {
                Some(choice) => choice,
                None => continue
            };
            if target_states[*quotient_state] || cond_states[*quotient_state] {
                continue;
            }
            let model_choice = model_matrix.row_groups[model_state] + local_choice;
            let quotient_choice = quotient_choice_map.get(model_choice).copied()
                .filter(|c| matrix.row_group(*quotient_state).contains(c))
                .ok_or_else(|| UnfoldError::InvalidScheduler(
                    format!("choice {} of state {} does not map into quotient state {}", local_choice, model_state, quotient_state)))?;
            final_scheduler.set_choice(quotient_choice - matrix.row_groups[*quotient_state], *quotient_state, 0);
        }

        let mut defaulted: usize = 0;
        for state in 0..n {
            for mode in Mode::ALL.iter() {
                if final_scheduler.is_choice_selected(state, mode.index()) {
                    continue;
                }
                let choice = match mode {
                    Mode::ConditionReached => reach_target_choices[state],
                    Mode::TargetReached => reach_condition_choices[state],
                    Mode::NotTriggered if target_states[state] => reach_condition_choices[state],
                    Mode::NotTriggered if cond_states[state] => reach_target_choices[state],
                    Mode::NotTriggered => {
                        defaulted += 1;
                        0
                    }
                };
                final_scheduler.set_choice(choice, state, mode.index());
            }
        }
        if defaulted > 0 {
            warn!("{} unlabelled states have no scheduled choice and default to their first choice", defaulted);
        }
        Ok(final_scheduler)
    }
}

/// Unfolds `mdp` for `P(F target | F condition)`.
pub fn unfold(mdp: &Sts, condition_label: &str, target_label: &str) -> Result<Sts> {
    let mut unfolder = ConditionalUnfolder::new(mdp, ConditionalFormula::new(target_label, condition_label));
    unfolder.construct_unfolded_model()?;
    Ok(unfolder.unfolded_mdp.take().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::model_checking::sts::{RewardModel, PROB_TOLERANCE};

    fn mdp(rows: Vec<Vec<Vec<(usize, f64)>>>) -> Sts {
        let mut builder = TransitionMatrixBuilder::new();
        for state in rows {
            builder.new_row_group();
            for row in state {
                builder.add_row(row.into_iter().map(|(s, p)| TransitionPair { s, p }));
            }
        }
        let mut sts = Sts::new(builder.build());
        sts.add_label(INIT_LABEL, vec![0]);
        sts
    }

    /// 0 -a-> 1 / 2 evenly, -b-> 4; 1 -> 3; 2 (cond) -> 3 / 5 evenly; 3 (target) and 4 loop;
    /// 5 -> 2
    fn example() -> Sts {
        let mut sts = mdp(vec![
            vec![vec![(1, 0.5), (2, 0.5)], vec![(4, 1.0)]],
            vec![vec![(3, 1.0)]],
            vec![vec![(3, 0.5), (5, 0.5)]],
            vec![vec![(3, 1.0)]],
            vec![vec![(4, 1.0)]],
            vec![vec![(2, 1.0)]]
        ]);
        sts.add_label("cond", vec![2]);
        sts.add_label("target", vec![3]);
        sts
    }

    fn unfolded(model: &Sts) -> ConditionalUnfolder {
        let mut unfolder = ConditionalUnfolder::new(model, ConditionalFormula::new("target", "cond"));
        unfolder.construct_unfolded_model().unwrap();
        unfolder
    }

    #[test]
    fn replicas_only_for_reachable_states() {
        let model = example();
        let unfolder = unfolded(&model);
        assert_eq!(unfolder.state_prototype, vec![0, 1, 2, 3, 4, 5, 2, 3, 5, 3]);
        assert_eq!(&unfolder.state_memory[6..], &[Mode::ConditionReached, Mode::ConditionReached,
            Mode::ConditionReached, Mode::TargetReached]);
        for s in vec![0, 1, 4] {
            assert_eq!(unfolder.prototype_duplicates[Mode::ConditionReached.index()][s], None);
        }
        assert_eq!(unfolder.prototype_duplicates[Mode::TargetReached.index()][3], Some(9));
    }

    #[test]
    fn monitor_transitions() {
        let model = example();
        let unfolder = unfolded(&model);
        let product = unfolder.unfolded_mdp.as_ref().unwrap();
        let matrix = &product.transitions;
        // mode 0 stays in mode 0 outside the labels
        assert_eq!(matrix.row(0), &[TransitionPair { s: 1, p: 0.5 }, TransitionPair { s: 2, p: 0.5 }]);
        // leaving the condition state enters mode 1
        assert_eq!(matrix.row(3), &[TransitionPair { s: 7, p: 0.5 }, TransitionPair { s: 8, p: 0.5 }]);
        // leaving the target state first enters mode 2
        assert_eq!(matrix.row(4), &[TransitionPair { s: 9, p: 1.0 }]);
        // mode 1 target replica is absorbing
        let absorbing = matrix.row_group(7);
        assert_eq!(absorbing.len(), 1);
        assert_eq!(matrix.row(absorbing.start), &[TransitionPair { s: 7, p: 1.0 }]);
        // mode 1 mirrors the original structure
        assert_eq!(matrix.row(matrix.row_groups[8]), &[TransitionPair { s: 6, p: 1.0 }]);
        assert_eq!(unfolder.choice_map, vec![0, 1, 2, 3, 4, 5, 6, 3, 4, 6, 4]);
        assert!(product.validate().is_ok());
    }

    #[test]
    fn mode_two_condition_replica_is_absorbing() {
        // 0 -> 1 (target) -> 2 (cond) -> 2
        let mut model = mdp(vec![
            vec![vec![(1, 1.0)]],
            vec![vec![(2, 1.0)]],
            vec![vec![(2, 1.0)]]
        ]);
        model.add_label("target", vec![1]);
        model.add_label("cond", vec![2]);
        let unfolder = unfolded(&model);
        let product = unfolder.unfolded_mdp.as_ref().unwrap();
        let replica = unfolder.prototype_duplicates[Mode::TargetReached.index()][2].unwrap();
        let choice = product.transitions.row_groups[replica];
        assert_eq!(product.transitions.row(choice), &[TransitionPair { s: replica, p: 1.0 }]);
    }

    #[test]
    fn labels_of_replicas() {
        let mut model = example();
        model.add_choice_label("b", vec![1]);
        let unfolder = unfolded(&model);
        let product = unfolder.unfolded_mdp.as_ref().unwrap();
        let states = |label: &str| product.state_labelling[label].iter().copied().collect::<Vec<_>>();
        assert_eq!(states(INIT_LABEL), vec![0]);
        assert_eq!(states("cond"), vec![2, 6]);
        assert_eq!(states("target"), vec![3, 7, 9]);
        assert_eq!(product.choice_labelling.as_ref().unwrap()["b"].iter().copied().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn rewards_follow_the_prototype() {
        let mut model = example();
        model.reward_models.insert("steps".to_string(), RewardModel {
            state_rewards: Some(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]),
            ..RewardModel::default()
        });
        let unfolder = unfolded(&model);
        let rewards = &unfolder.unfolded_mdp.as_ref().unwrap().reward_models["steps"];
        assert_eq!(rewards.state_rewards, Some(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 2.0, 3.0, 5.0, 3.0]));
    }

    #[test]
    fn rows_are_stochastic() {
        let product = unfold(&example(), "cond", "target").unwrap();
        for row in product.transitions.rows.iter() {
            let sum: f64 = row.iter().map(|t| t.p).sum();
            assert!((sum - 1.0).abs() < PROB_TOLERANCE);
        }
    }

    #[test]
    fn missing_label_is_fatal() {
        let model = example();
        match unfold(&model, "missing", "target") {
            Err(UnfoldError::MissingLabel(label)) => assert_eq!(label, "missing"),
            _ => panic!("expected a missing label error")
        }
    }

    #[test]
    fn condition_reachability() {
        let model = example();
        let unfolder = ConditionalUnfolder::new(&model, ConditionalFormula::new("target", "cond"));
        assert!(unfolder.is_condition_reachable().unwrap());

        let mut unreachable = example();
        unreachable.state_labelling.insert("cond".to_string(), BTreeSet::new());
        let unfolder = ConditionalUnfolder::new(&unreachable, ConditionalFormula::new("target", "cond"));
        assert!(!unfolder.is_condition_reachable().unwrap());
        assert!(unfold(&unreachable, "cond", "target").is_ok());

        let mut isolated = mdp(vec![vec![vec![(0, 1.0)]], vec![vec![(1, 1.0)]]]);
        isolated.add_label("cond", vec![1]);
        isolated.add_label("target", vec![1]);
        let unfolder = ConditionalUnfolder::new(&isolated, ConditionalFormula::new("target", "cond"));
        assert!(!unfolder.is_condition_reachable().unwrap());
    }

    #[test]
    fn scheduler_mapping_uses_monitor_memory() {
        let model = example();
        let unfolder = unfolded(&model);
        let mut scheduler = Scheduler::new(model.num_states(), None);
        for state in vec![1, 2, 3, 5] {
            scheduler.set_choice(0, state, 0);
        }
        scheduler.set_choice(1, 0, 0);
        let identity_states: Vec<usize> = (0..model.num_states()).collect();
        let identity_choices: Vec<usize> = (0..model.num_choices()).collect();
        let reach_target = vec![0; 6];
        let mut reach_condition = vec![0; 6];
        reach_condition[0] = 1;
        let mapped = unfolder.map_scheduler_to_quotient(&model.transitions, &identity_states, &identity_choices,
                                                        &scheduler, &reach_target, &reach_condition).unwrap();
        assert!(mapped.is_fully_defined());
        assert_eq!(mapped.choice(0, 0), Some(1));
        assert_eq!(mapped.choice(0, 1), Some(0));
        assert_eq!(mapped.choice(0, 2), Some(1));
        assert_eq!(mapped.choice(4, 0), Some(0));
        let memory = mapped.memory.as_ref().unwrap();
        assert_eq!(memory.successor(0, 0), Some(0));
        assert_eq!(memory.successor(0, 2), Some(1));
        assert_eq!(memory.successor(0, 3), Some(2));
        assert_eq!(memory.successor(2, 2), Some(2));
        assert!(memory.labelling["condition_reached"].contains(&1));
    }

    #[test]
    fn scheduler_mapping_through_a_renaming() {
        let model = example();
        let unfolder = unfolded(&model);
        // a model with states 0 and 4 swapped
        let mut builder = TransitionMatrixBuilder::new();
        builder.new_row_group();
        builder.add_row(vec![TransitionPair { s: 0, p: 1.0 }]);
        builder.new_row_group();
        builder.add_row(vec![TransitionPair { s: 0, p: 0.5 }, TransitionPair { s: 1, p: 0.5 }]);
        builder.add_row(vec![TransitionPair { s: 0, p: 1.0 }]);
        let renamed = builder.build();
        let state_map = vec![4, 0];
        let choice_map = vec![5, 0, 1];
        let scheduler = Scheduler::memoryless(&[0, 1]);
        let mapped = unfolder.map_scheduler_to_quotient(&renamed, &state_map, &choice_map,
                                                        &scheduler, &[0; 6], &[0; 6]).unwrap();
        assert_eq!(mapped.choice(0, 0), Some(1));
        assert_eq!(mapped.choice(4, 0), Some(0));
    }

    #[test]
    fn scheduler_mapping_rejects_unknown_quotient_states() {
        let mut model = mdp(vec![vec![vec![(0, 1.0)]]]);
        model.add_label("cond", vec![0]);
        model.add_label("target", vec![]);
        let unfolder = unfolded(&model);
        let scheduler = Scheduler::memoryless(&[0]);
        let result = unfolder.map_scheduler_to_quotient(&model.transitions, &[5], &[0], &scheduler, &[0], &[0]);
        assert!(matches!(result, Err(UnfoldError::InvalidScheduler(_))));
    }

    #[test]
    fn out_of_range_labels_are_rejected() {
        let mut model = example();
        model.add_label("cond", vec![17]);
        let unfolder = ConditionalUnfolder::new(&model, ConditionalFormula::new("target", "cond"));
        assert!(matches!(unfolder.is_condition_reachable(), Err(UnfoldError::InvalidModel(_))));
        assert!(matches!(unfold(&model, "cond", "target"), Err(UnfoldError::InvalidModel(_))));
    }

    #[test]
    fn scheduler_mapping_rejects_mismatched_maps() {
        let model = example();
        let unfolder = unfolded(&model);
        let scheduler = Scheduler::memoryless(&[0; 6]);
        let result = unfolder.map_scheduler_to_quotient(&model.transitions, &[0, 1], &[0, 1],
                                                        &scheduler, &[0; 6], &[0; 6]);
        assert!(matches!(result, Err(UnfoldError::InvalidScheduler(_))));
    }
}
