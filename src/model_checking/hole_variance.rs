use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use log::debug;
use super::error::{Result, UnfoldError};

/// Read-only view of a family of designs: a set of holes, each with a finite set of options
pub trait DesignSpace {
    fn num_holes(&self) -> usize;
    fn num_options(&self, hole: usize) -> usize;
}

/// Hole assignment `(hole, option)` pairs of every choice of a quotient model
pub trait Coloring {
    fn choice_assignment(&self, choice: usize) -> &[(usize, usize)];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Family {
    /// `hole_options[h]` is the number of options of hole `h`
    pub hole_options: Vec<usize>
}

impl DesignSpace for Family {
    fn num_holes(&self) -> usize {
        self.hole_options.len()
    }

    fn num_options(&self, hole: usize) -> usize {
        self.hole_options[hole]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChoiceColoring {
    pub choice_to_assignment: Vec<Vec<(usize, usize)>>
}

impl Coloring for ChoiceColoring {
    fn choice_assignment(&self, choice: usize) -> &[(usize, usize)] {
        &self.choice_to_assignment[choice][..]
    }
}

/// Spread of the choice values attributed to the inconsistent options of a hole.
///
/// For each state the choices whose global choice assigns an inconsistent option of a hole
/// give a min and max value; `(max - min) * state_to_expected_visits[state]` is averaged over
/// the states in which the hole was affected. Every hole of `hole_to_inconsistent_options`
/// is present in the result, with 0 when no state was affected.
pub fn inconsistent_hole_variance<F: DesignSpace, C: Coloring>(
    family: &F, row_groups: &[usize], choice_to_global_choice: &[usize], choice_to_value: &[f64],
    coloring: &C, hole_to_inconsistent_options: &BTreeMap<usize, Vec<usize>>,
    state_to_expected_visits: &[f64]) -> Result<BTreeMap<usize, f64>> {
    let num_holes = family.num_holes();
    let num_states = row_groups.len().saturating_sub(1);
    let num_choices = row_groups.last().copied().unwrap_or(0);
    if choice_to_global_choice.len() < num_choices || choice_to_value.len() < num_choices {
        return Err(UnfoldError::InvalidModel("choice maps do not cover every choice".to_string()));
    }
    if state_to_expected_visits.len() < num_states {
        return Err(UnfoldError::InvalidModel("expected visits do not cover every state".to_string()));
    }

    let mut inconsistent: Vec<Vec<bool>> = (0..num_holes).map(|h| vec![false; family.num_options(h)]).collect();
    for (hole, options) in hole_to_inconsistent_options.iter() {
        if *hole >= num_holes {
            return Err(UnfoldError::InvalidModel(format!("unknown hole {}", hole)));
        }
        for option in options.iter() {
            match inconsistent[*hole].get_mut(*option) {
                Some(flag) => *flag = true,
                None => return Err(UnfoldError::InvalidModel(format!("hole {} has no option {}", hole, option)))
            }
        }
    }

    let mut difference_avg: Vec<f64> = vec![0.0; num_holes];
    let mut states_affected: Vec<usize> = vec![0; num_holes];
    let mut bounds: Vec<Option<(f64, f64)>> = vec![None; num_holes];
    for state in 0..num_states {
        for choice in row_groups[state]..row_groups[state + 1] {
            let value = choice_to_value[choice];
            for (hole, option) in coloring.choice_assignment(choice_to_global_choice[choice]).iter() {
                if !inconsistent.get(*hole).and_then(|o| o.get(*option)).copied().unwrap_or(false) {
                    continue;
                }
                bounds[*hole] = Some(match bounds[*hole] {
                    None => (value, value),
                    Some((min, max)) => (min.min(value), max.max(value))
                });
            }
        }

        for hole in hole_to_inconsistent_options.keys() {
            if let Some((min, max)) = bounds[*hole].take() {
                let difference = (max - min) * state_to_expected_visits[state];
                states_affected[*hole] += 1;
                difference_avg[*hole] += (difference - difference_avg[*hole]) / states_affected[*hole] as f64;
            }
        }
    }

    let variance: BTreeMap<usize, f64> = hole_to_inconsistent_options.keys()
        .map(|hole| (*hole, difference_avg[*hole]))
        .collect();
    debug!("inconsistent hole variance: {:?}", variance);
    Ok(variance)
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn family() -> Family {
        Family { hole_options: vec![2, 3] }
    }

    /// Two states with two choices each; global choices are the identity
    fn coloring() -> ChoiceColoring {
        ChoiceColoring {
            choice_to_assignment: vec![
                vec![(0, 0), (1, 0)],
                vec![(0, 1)],
                vec![(0, 0)],
                vec![(1, 2)]
            ]
        }
    }

    #[test]
    fn running_mean_over_affected_states() {
        let mut inconsistent = BTreeMap::new();
        inconsistent.insert(0, vec![0, 1]);
        let variance = inconsistent_hole_variance(&family(), &[0, 2, 4], &[0, 1, 2, 3], &[1.0, 4.0, 2.0, 7.0],
                                                  &coloring(), &inconsistent, &[1.0, 3.0]).unwrap();
        // state 0: (4 - 1) * 1, state 1: (2 - 2) * 3
        assert_eq!(variance.len(), 1);
        assert!((variance[&0] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn only_inconsistent_options_count() {
        let mut inconsistent = BTreeMap::new();
        inconsistent.insert(1, vec![0, 2]);
        let variance = inconsistent_hole_variance(&family(), &[0, 2, 4], &[0, 1, 2, 3], &[1.0, 4.0, 2.0, 7.0],
                                                  &coloring(), &inconsistent, &[2.0, 2.0]).unwrap();
        // each state has a single affected choice
        assert_eq!(variance[&1], 0.0);

        let mut unaffected = BTreeMap::new();
        unaffected.insert(1, vec![1]);
        let variance = inconsistent_hole_variance(&family(), &[0, 2, 4], &[0, 1, 2, 3], &[1.0, 4.0, 2.0, 7.0],
                                                  &coloring(), &unaffected, &[2.0, 2.0]).unwrap();
        assert_eq!(variance[&1], 0.0);
    }

    #[test]
    fn global_choices_select_the_assignment() {
        let mut inconsistent = BTreeMap::new();
        inconsistent.insert(0, vec![0, 1]);
        // one state whose local choices are the global choices 1 and 2
        let variance = inconsistent_hole_variance(&family(), &[0, 2], &[1, 2], &[5.0, 1.0],
                                                  &coloring(), &inconsistent, &[0.5]).unwrap();
        assert!((variance[&0] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn unknown_options_are_rejected() {
        let mut inconsistent = BTreeMap::new();
        inconsistent.insert(0, vec![2]);
        let result = inconsistent_hole_variance(&family(), &[0, 2, 4], &[0, 1, 2, 3], &[0.0; 4],
                                                &coloring(), &inconsistent, &[1.0, 1.0]);
        assert!(matches!(result, Err(UnfoldError::InvalidModel(_))));
    }
}
