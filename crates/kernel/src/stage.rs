//! Pipeline stages, the per-tick plan, and program resolution.
//!
//! A backend resolves one program per [`Stage`] through a [`ProgramLoader`]
//! before the first tick. Every missing program is collected so setup fails
//! once with the complete list instead of stopping at the first gap.

use crate::error::SetupError;
use crate::integrate::IntegrationMethod;
use crate::particle::PositionField;

/// A unit of work separated from its neighbors by a barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    /// Reset permutation/offsets and write cell keys.
    HashCells,
    /// Bitonic sort of `(cell key, particle)` pairs.
    Sort,
    /// First sorted position of every occupied cell.
    BuildOffsets,
    /// Density and pressure.
    Density,
    /// Pressure, viscosity and gravity forces.
    Force,
    /// Forward Euler step.
    IntegrateEuler,
    /// Leapfrog midpoint estimate.
    LeapfrogHalf,
    /// Leapfrog full step.
    LeapfrogFull,
}

impl Stage {
    /// Every stage, in declaration order.
    pub const ALL: [Stage; 8] = [
        Stage::HashCells,
        Stage::Sort,
        Stage::BuildOffsets,
        Stage::Density,
        Stage::Force,
        Stage::IntegrateEuler,
        Stage::LeapfrogHalf,
        Stage::LeapfrogFull,
    ];

    /// Stable lowercase name, also used for shader file names.
    pub fn name(self) -> &'static str {
        match self {
            Stage::HashCells => "hash_cells",
            Stage::Sort => "sort",
            Stage::BuildOffsets => "build_offsets",
            Stage::Density => "density",
            Stage::Force => "force",
            Stage::IntegrateEuler => "integrate_euler",
            Stage::LeapfrogHalf => "leapfrog_half",
            Stage::LeapfrogFull => "leapfrog_full",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry of the tick plan: a stage and the particle field it reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickStep {
    /// Stage to run.
    pub stage: Stage,
    /// Position/velocity field read by evaluators.
    pub field: PositionField,
}

const fn step(stage: Stage, field: PositionField) -> TickStep {
    TickStep { stage, field }
}

const EULER_PLAN: [TickStep; 6] = [
    step(Stage::HashCells, PositionField::Committed),
    step(Stage::Sort, PositionField::Committed),
    step(Stage::BuildOffsets, PositionField::Committed),
    step(Stage::Density, PositionField::Committed),
    step(Stage::Force, PositionField::Committed),
    step(Stage::IntegrateEuler, PositionField::Committed),
];

const LEAPFROG_PLAN: [TickStep; 9] = [
    step(Stage::HashCells, PositionField::Committed),
    step(Stage::Sort, PositionField::Committed),
    step(Stage::BuildOffsets, PositionField::Committed),
    step(Stage::Density, PositionField::Committed),
    step(Stage::Force, PositionField::Committed),
    step(Stage::LeapfrogHalf, PositionField::Committed),
    step(Stage::Density, PositionField::Midpoint),
    step(Stage::Force, PositionField::Midpoint),
    step(Stage::LeapfrogFull, PositionField::Midpoint),
];

/// Ordered stages of one tick. Gradual spawning follows the last step.
///
/// The midpoint evaluation reuses the spatial hash built from committed
/// positions.
pub fn tick_plan(method: IntegrationMethod) -> &'static [TickStep] {
    match method {
        IntegrationMethod::ForwardEuler => &EULER_PLAN,
        IntegrationMethod::Leapfrog => &LEAPFROG_PLAN,
    }
}

/// Source of executable programs for each stage.
pub trait ProgramLoader<P> {
    /// Program for `stage`, or `None` when it is unavailable.
    fn load(&self, stage: Stage) -> Option<P>;
}

impl<P, F> ProgramLoader<P> for F
where
    F: Fn(Stage) -> Option<P>,
{
    fn load(&self, stage: Stage) -> Option<P> {
        self(stage)
    }
}

/// One resolved program per stage.
#[derive(Debug, Clone)]
pub struct StageTable<P> {
    programs: Vec<P>,
}

impl<P> StageTable<P> {
    /// Resolve every stage, failing with the full list of missing ones.
    pub fn resolve<L: ProgramLoader<P> + ?Sized>(loader: &L) -> Result<Self, SetupError> {
        let mut programs = Vec::with_capacity(Stage::ALL.len());
        let mut missing = Vec::new();
        for stage in Stage::ALL {
            match loader.load(stage) {
                Some(p) => programs.push(p),
                None => missing.push(stage),
            }
        }
        if !missing.is_empty() {
            return Err(SetupError::MissingPrograms(missing));
        }
        tracing::debug!(count = programs.len(), "resolved stage programs");
        Ok(Self { programs })
    }

    /// Program resolved for `stage`.
    #[inline]
    pub fn get(&self, stage: Stage) -> &P {
        &self.programs[stage.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plans_hash_before_evaluating() {
        for method in [IntegrationMethod::ForwardEuler, IntegrationMethod::Leapfrog] {
            let plan = tick_plan(method);
            let stages: Vec<Stage> = plan.iter().map(|s| s.stage).collect();
            assert_eq!(&stages[..3], &[Stage::HashCells, Stage::Sort, Stage::BuildOffsets]);
        }
    }

    #[test]
    fn leapfrog_evaluates_twice() {
        let plan = tick_plan(IntegrationMethod::Leapfrog);
        let densities: Vec<PositionField> = plan
            .iter()
            .filter(|s| s.stage == Stage::Density)
            .map(|s| s.field)
            .collect();
        assert_eq!(densities, vec![PositionField::Committed, PositionField::Midpoint]);
        assert_eq!(plan.last().map(|s| s.stage), Some(Stage::LeapfrogFull));
    }

    #[test]
    fn euler_evaluates_once() {
        let plan = tick_plan(IntegrationMethod::ForwardEuler);
        assert_eq!(plan.iter().filter(|s| s.stage == Stage::Force).count(), 1);
        assert_eq!(plan.last().map(|s| s.stage), Some(Stage::IntegrateEuler));
    }

    #[test]
    fn resolve_reports_every_missing_stage() {
        let loader = |stage: Stage| match stage {
            Stage::Sort | Stage::LeapfrogFull => None,
            other => Some(other.name()),
        };
        match StageTable::resolve(&loader) {
            Err(SetupError::MissingPrograms(missing)) => {
                assert_eq!(missing, vec![Stage::Sort, Stage::LeapfrogFull]);
            }
            other => panic!("expected missing programs, got {other:?}"),
        }
    }

    #[test]
    fn resolve_indexes_by_stage() {
        let table = StageTable::resolve(&|stage: Stage| Some(stage.name())).unwrap();
        for stage in Stage::ALL {
            assert_eq!(*table.get(stage), stage.name());
        }
    }
}
