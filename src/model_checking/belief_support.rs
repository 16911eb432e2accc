use std::collections::{BTreeMap, BTreeSet, VecDeque};
use log::{debug, info};
use super::error::{Result, UnfoldError};
use super::sts::{Sts, TransitionMatrixBuilder, TransitionPair, INIT_LABEL};

/// A set of POMDP states that cannot be told apart by the observations seen so far
pub type BeliefSupport = BTreeSet<usize>;

/// Successor support and the probability mass of one `(action, observation)` pair
#[derive(Debug, Default)]
struct ObservationSuccessor {
    support: BeliefSupport,
    mass: f64
}

/// Subset construction of a POMDP into an MDP over belief supports.
pub struct BeliefSupportUnfolder<'a> {
    pomdp: &'a Sts,
    /// `belief_supports[i]` is the support of state `i` of the unfolded MDP
    pub belief_supports: Vec<BeliefSupport>,
    /// For each choice of the unfolded MDP, the choice of the first member state with the
    /// same action offset
    pub choice_map: Vec<usize>,
    pub mdp: Option<Sts>
}

impl<'a> BeliefSupportUnfolder<'a> {
    pub fn new(pomdp: &'a Sts) -> Result<Self> {
        pomdp.validate()?;
        pomdp.observations()?;
        Ok(BeliefSupportUnfolder {
            pomdp,
            belief_supports: Vec::new(),
            choice_map: Vec::new(),
            mdp: None
        })
    }

    pub fn belief_support_of_state(&self, state: usize) -> &BeliefSupport {
        &self.belief_supports[state]
    }

    pub fn unfolded_mdp(&self) -> Option<&Sts> {
        self.mdp.as_ref()
    }

    /// Number of actions shared by the members of `support`
    fn num_actions(&self, support: &BeliefSupport) -> Result<usize> {
        let matrix = &self.pomdp.transitions;
        let mut members = support.iter();
        let first = *members.next().ok_or_else(|| UnfoldError::InvalidModel("empty belief support".to_string()))?;
        let actions = matrix.row_group_size(first);
        match members.find(|s| matrix.row_group_size(**s) != actions) {
            None => Ok(actions),
            Some(s) => Err(UnfoldError::NotCanonical(
                format!("states {} and {} share a belief support but have different numbers of choices", first, s)))
        }
    }

    /// Successor supports of every `(action, observation)` pair of `support`
    fn successors(&self, support: &BeliefSupport) -> Result<BTreeMap<(usize, u32), ObservationSuccessor>> {
        let observations = self.pomdp.observations()?;
        let matrix = &self.pomdp.transitions;
        let mut successors: BTreeMap<(usize, u32), ObservationSuccessor> = BTreeMap::new();
        for state in support.iter() {
            let start = matrix.row_groups[*state];
            for choice in matrix.row_group(*state) {
                let action = choice - start;
                for t in matrix.row(choice) {
                    let entry = successors.entry((action, observations[t.s])).or_default();
                    entry.support.insert(t.s);
                    entry.mass += t.p;
                }
            }
        }
        Ok(successors)
    }

    /// Breadth-first exploration of the belief supports reachable from the support of the
    /// initial states. Supports are numbered in discovery order and each distinct support is
    /// expanded exactly once; because expansion follows the numbering, rows are emitted in
    /// state order while exploring.
    pub fn unfold_belief_support_mdp(&mut self) -> Result<&Sts> {
        let initial: BeliefSupport = self.pomdp.initial_states()?.clone();
        let mut support_to_index: BTreeMap<BeliefSupport, usize> = BTreeMap::new();
        let mut belief_supports: Vec<BeliefSupport> = vec![initial.clone()];
        support_to_index.insert(initial, 0);
        let mut choice_map: Vec<usize> = Vec::new();
        let mut builder = TransitionMatrixBuilder::new();

        let mut to_explore: VecDeque<usize> = VecDeque::new();
        to_explore.push_back(0);
        while let Some(current) = to_explore.pop_front() {
            let support = &belief_supports[current];
            let num_actions = self.num_actions(support)?;
            let first_state = *support.iter().next().unwrap_or(&0);
            let successors = self.successors(support)?;

            let mut action_mass: Vec<f64> = vec![0.0; num_actions];
            for ((action, _), successor) in successors.iter() {
                action_mass[*action] += successor.mass;
            }

            builder.new_row_group();
            let mut rows: Vec<Vec<TransitionPair>> = vec![Vec::new(); num_actions];
            for ((action, observation), successor) in successors.into_iter() {
                let index = match support_to_index.get(&successor.support) {
                    Some(index) => *index,
                    None => {
                        let index = belief_supports.len();
                        debug!("belief support {} = {:?} reached via action {} observation {}",
                               index, successor.support, action, observation);
                        support_to_index.insert(successor.support.clone(), index);
                        belief_supports.push(successor.support);
                        to_explore.push_back(index);
                        index
                    }
                };
                rows[action].push(TransitionPair { s: index, p: successor.mass / action_mass[action] });
            }
            for (action, row) in rows.into_iter().enumerate() {
                builder.add_row(row);
                choice_map.push(self.pomdp.transitions.row_groups[first_state] + action);
            }
        }
        info!("unfolded belief-support MDP has {} states", belief_supports.len());

        let mut mdp = Sts::new(builder.build());
        mdp.add_label(INIT_LABEL, vec![0]);
        mdp.choice_labelling = self.pomdp.map_choice_labelling(&choice_map);
        self.belief_supports = belief_supports;
        self.choice_map = choice_map;
        Ok(self.mdp.insert(mdp))
    }
}

/// Unfolds `pomdp` into its belief-support MDP, returning the MDP and the belief support of
/// each of its states.
pub fn unfold(pomdp: &Sts) -> Result<(Sts, Vec<BeliefSupport>)> {
    let mut unfolder = BeliefSupportUnfolder::new(pomdp)?;
    unfolder.unfold_belief_support_mdp()?;
    let mdp = unfolder.mdp.take().unwrap_or_default();
    Ok((mdp, unfolder.belief_supports))
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::model_checking::reachability::forward_reachable;
    use crate::model_checking::sts::PROB_TOLERANCE;

    fn support(states: &[usize]) -> BeliefSupport {
        states.iter().copied().collect()
    }

    fn pomdp(rows: Vec<Vec<Vec<(usize, f64)>>>, observations: Vec<u32>, initial: Vec<usize>) -> Sts {
        let mut builder = TransitionMatrixBuilder::new();
        for state in rows {
            builder.new_row_group();
            for row in state {
                builder.add_row(row.into_iter().map(|(s, p)| TransitionPair { s, p }));
            }
        }
        let mut sts = Sts::new(builder.build());
        sts.add_label(INIT_LABEL, initial);
        sts.observations = Some(observations);
        sts
    }

    fn two_state_pomdp(initial: Vec<usize>) -> Sts {
        pomdp(vec![
            vec![vec![(0, 0.5), (1, 0.5)]],
            vec![vec![(0, 0.5), (1, 0.5)]]
        ], vec![0, 0], initial)
    }

    #[test]
    fn shared_observation_collapses_to_initial_support() {
        let (mdp, supports) = unfold(&two_state_pomdp(vec![0, 1])).unwrap();
        assert_eq!(supports, vec![support(&[0, 1])]);
        assert_eq!(mdp.num_states(), 1);
        assert_eq!(mdp.num_choices(), 1);
        assert_eq!(mdp.transitions.row(0), &[TransitionPair { s: 0, p: 1.0 }]);
        assert_eq!(mdp.initial_states().unwrap().iter().copied().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn single_initial_state_grows_into_shared_support() {
        let (mdp, supports) = unfold(&two_state_pomdp(vec![0])).unwrap();
        assert_eq!(supports, vec![support(&[0]), support(&[0, 1])]);
        assert_eq!(mdp.transitions.row(0), &[TransitionPair { s: 1, p: 1.0 }]);
        assert_eq!(mdp.transitions.row(1), &[TransitionPair { s: 1, p: 1.0 }]);
    }

    /// 0 (obs 0) -a-> 1 / 2 (both obs 1) with 0.3 / 0.7, -b-> 3 (obs 2)
    /// 1 and 2 -a-> 3, 1 -b-> 4 (obs 3), 2 -b-> 3 / 4 evenly
    fn branching_pomdp() -> Sts {
        pomdp(vec![
            vec![vec![(1, 0.3), (2, 0.7)], vec![(3, 1.0)]],
            vec![vec![(3, 1.0)], vec![(4, 1.0)]],
            vec![vec![(3, 1.0)], vec![(3, 0.5), (4, 0.5)]],
            vec![vec![(3, 1.0)]],
            vec![vec![(4, 1.0)]]
        ], vec![0, 1, 1, 2, 3], vec![0])
    }

    #[test]
    fn supports_are_numbered_breadth_first() {
        let (_, supports) = unfold(&branching_pomdp()).unwrap();
        assert_eq!(supports, vec![
            support(&[0]),
            support(&[1, 2]),
            support(&[3]),
            support(&[4])
        ]);
    }

    #[test]
    fn transitions_are_renormalised_per_action() {
        let (mdp, _) = unfold(&branching_pomdp()).unwrap();
        assert_eq!(mdp.transitions.row_groups, vec![0, 2, 4, 5, 6]);
        // support {1, 2}, action b: mass 0.5 to {3} and 1.5 to {4}
        let row = mdp.transitions.row(3);
        assert_eq!(row.len(), 2);
        assert_eq!(row[0].s, 2);
        assert!((row[0].p - 0.5 / 2.0).abs() < PROB_TOLERANCE);
        assert_eq!(row[1].s, 3);
        assert!((row[1].p - 1.5 / 2.0).abs() < PROB_TOLERANCE);
        assert!(mdp.validate().is_ok());
    }

    #[test]
    fn choice_labels_follow_first_member() {
        let mut model = branching_pomdp();
        model.add_choice_label("a", vec![0, 2, 4, 6, 7]);
        model.add_choice_label("b", vec![1, 3, 5]);
        let mut unfolder = BeliefSupportUnfolder::new(&model).unwrap();
        unfolder.unfold_belief_support_mdp().unwrap();
        assert_eq!(unfolder.choice_map, vec![0, 1, 2, 3, 6, 7]);
        let mdp = unfolder.unfolded_mdp().unwrap();
        assert_eq!(mdp.labels_of_choice(3).collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(mdp.labels_of_choice(4).collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(unfolder.belief_support_of_state(1), &support(&[1, 2]));
    }

    #[test]
    fn unfolding_is_deterministic() {
        let model = branching_pomdp();
        assert_eq!(unfold(&model).unwrap(), unfold(&model).unwrap());
    }

    #[test]
    fn members_are_reachable() {
        let model = branching_pomdp();
        let reachable = forward_reachable(&model.transitions, model.initial_states().unwrap().iter().copied());
        let (_, supports) = unfold(&model).unwrap();
        for s in supports.iter() {
            assert!(!s.is_empty());
            assert!(s.iter().all(|state| reachable[*state]));
        }
    }

    #[test]
    fn mismatched_choice_counts_are_rejected() {
        let model = pomdp(vec![
            vec![vec![(1, 0.5), (2, 0.5)]],
            vec![vec![(1, 1.0)]],
            vec![vec![(2, 1.0)], vec![(1, 1.0)]]
        ], vec![0, 1, 1], vec![0]);
        assert!(matches!(unfold(&model), Err(UnfoldError::NotCanonical(_))));
    }

    #[test]
    fn short_observation_vector_is_rejected() {
        let mut model = branching_pomdp();
        model.observations = Some(vec![0, 1, 1]);
        assert!(matches!(unfold(&model), Err(UnfoldError::InvalidModel(_))));
    }

    #[test]
    fn requires_observations() {
        let mut model = branching_pomdp();
        model.observations = None;
        assert!(matches!(BeliefSupportUnfolder::new(&model), Err(UnfoldError::MissingObservations)));
    }
}
