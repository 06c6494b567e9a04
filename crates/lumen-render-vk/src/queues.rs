// SPDX-License-Identifier: CEPL-1.0
//! Queue-family resolution as an ordered list of steps. Each step decides one
//! role and may read roles decided before it; the order is checked when the
//! pipeline is built, not when it runs.

use std::collections::BTreeSet;
use std::fmt;

use ash::vk;
use lumen_core::{Error, Result};

use crate::probe::QueueFamilySnapshot;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueRole {
    Graphics,
    Compute,
    Transfer,
    Presentation,
}

impl fmt::Display for QueueRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QueueRole::Graphics => "graphics",
            QueueRole::Compute => "compute",
            QueueRole::Transfer => "transfer",
            QueueRole::Presentation => "presentation",
        })
    }
}

/// Family index per role; `None` when no family qualifies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyAssignment {
    pub graphics: Option<u32>,
    pub compute: Option<u32>,
    pub transfer: Option<u32>,
    pub presentation: Option<u32>,
}

impl QueueFamilyAssignment {
    pub fn get(&self, role: QueueRole) -> Option<u32> {
        match role {
            QueueRole::Graphics => self.graphics,
            QueueRole::Compute => self.compute,
            QueueRole::Transfer => self.transfer,
            QueueRole::Presentation => self.presentation,
        }
    }

    fn set(&mut self, role: QueueRole, family: Option<u32>) {
        match role {
            QueueRole::Graphics => self.graphics = family,
            QueueRole::Compute => self.compute = family,
            QueueRole::Transfer => self.transfer = family,
            QueueRole::Presentation => self.presentation = family,
        }
    }

    /// Graphics and presentation are mandatory; compute and transfer are not.
    pub fn require_presentable(&self) -> Result<PresentQueues> {
        match (self.graphics, self.presentation) {
            (Some(graphics), Some(presentation)) => Ok(PresentQueues { graphics, presentation }),
            (None, _) => Err(Error::capability("no queue family supports graphics")),
            (_, None) => Err(Error::capability("no queue family can present to the surface")),
        }
    }
}

/// The two families every frame touches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresentQueues {
    pub graphics: u32,
    pub presentation: u32,
}

impl PresentQueues {
    /// Ascending and deduplicated; one queue is created per entry.
    pub fn unique_families(&self) -> Vec<u32> {
        BTreeSet::from([self.graphics, self.presentation])
            .into_iter()
            .collect()
    }

    /// Exclusive ownership when one family does both jobs, otherwise
    /// concurrent sharing between the two.
    pub fn image_sharing(&self) -> (vk::SharingMode, Vec<u32>) {
        if self.graphics == self.presentation {
            (vk::SharingMode::EXCLUSIVE, Vec::new())
        } else {
            (vk::SharingMode::CONCURRENT, vec![self.graphics, self.presentation])
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Rule {
    /// Family with `required` and the most queues.
    Largest { required: vk::QueueFlags },
    /// Family with `required` and none of `excluded` and the most queues,
    /// falling back to `Largest`.
    DedicatedOrLargest { required: vk::QueueFlags, excluded: vk::QueueFlags },
    /// `preferred`'s family if it presents, else the first presenting family.
    PresentingOrFirst { preferred: QueueRole },
}

#[derive(Clone, Debug)]
pub struct ResolveStep {
    pub writes: QueueRole,
    pub reads: Vec<QueueRole>,
    pub rule: Rule,
}

impl ResolveStep {
    pub fn new(writes: QueueRole, rule: Rule) -> Self {
        let reads = match rule {
            Rule::PresentingOrFirst { preferred } => vec![preferred],
            Rule::Largest { .. } | Rule::DedicatedOrLargest { .. } => Vec::new(),
        };
        Self { writes, reads, rule }
    }

    fn run(&self, families: &[QueueFamilySnapshot], decided: &QueueFamilyAssignment) -> Option<u32> {
        match self.rule {
            Rule::Largest { required } => largest(families, required, vk::QueueFlags::empty()),
            Rule::DedicatedOrLargest { required, excluded } => largest(families, required, excluded)
                .or_else(|| largest(families, required, vk::QueueFlags::empty())),
            Rule::PresentingOrFirst { preferred } => decided
                .get(preferred)
                .filter(|&i| families.get(i as usize).is_some_and(|f| f.presents))
                .or_else(|| families.iter().position(|f| f.presents).map(|i| i as u32)),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StepOrderError {
    #[error("{step} step reads {role}, which no earlier step decides")]
    ReadsUndecided { step: QueueRole, role: QueueRole },
    #[error("{0} is decided by more than one step")]
    DecidedTwice(QueueRole),
}

#[derive(Clone, Debug)]
pub struct ResolutionPipeline {
    steps: Vec<ResolveStep>,
}

impl ResolutionPipeline {
    pub fn new(steps: Vec<ResolveStep>) -> Result<Self, StepOrderError> {
        let mut decided: Vec<QueueRole> = Vec::with_capacity(steps.len());
        for step in &steps {
            if let Some(&role) = step.reads.iter().find(|r| !decided.contains(r)) {
                return Err(StepOrderError::ReadsUndecided { step: step.writes, role });
            }
            if decided.contains(&step.writes) {
                return Err(StepOrderError::DecidedTwice(step.writes));
            }
            decided.push(step.writes);
        }
        Ok(Self { steps })
    }

    /// Transfer, graphics, presentation (reusing graphics when it can
    /// present), then compute.
    pub fn standard() -> Self {
        Self { steps: standard_steps() }
    }

    pub fn resolve(&self, families: &[QueueFamilySnapshot]) -> QueueFamilyAssignment {
        let mut out = QueueFamilyAssignment::default();
        for step in &self.steps {
            let family = step.run(families, &out);
            out.set(step.writes, family);
        }
        out
    }
}

fn standard_steps() -> Vec<ResolveStep> {
    vec![
        ResolveStep::new(
            QueueRole::Transfer,
            Rule::Largest { required: vk::QueueFlags::TRANSFER },
        ),
        ResolveStep::new(
            QueueRole::Graphics,
            Rule::DedicatedOrLargest {
                required: vk::QueueFlags::GRAPHICS,
                excluded: vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            },
        ),
        ResolveStep::new(
            QueueRole::Presentation,
            Rule::PresentingOrFirst { preferred: QueueRole::Graphics },
        ),
        ResolveStep::new(
            QueueRole::Compute,
            Rule::DedicatedOrLargest {
                required: vk::QueueFlags::COMPUTE,
                excluded: vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER,
            },
        ),
    ]
}

pub fn resolve_queue_families(families: &[QueueFamilySnapshot]) -> QueueFamilyAssignment {
    ResolutionPipeline::standard().resolve(families)
}

/// Most queues wins; the strict comparison keeps the lowest index on ties.
fn largest(
    families: &[QueueFamilySnapshot],
    required: vk::QueueFlags,
    excluded: vk::QueueFlags,
) -> Option<u32> {
    let mut best: Option<(u32, u32)> = None;
    for (i, f) in families.iter().enumerate() {
        if !f.flags.contains(required) || f.flags.intersects(excluded) {
            continue;
        }
        if best.map_or(true, |(_, count)| f.queue_count > count) {
            best = Some((i as u32, f.queue_count));
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::fixtures::family;
    use lumen_core::FailureClass;

    const G: vk::QueueFlags = vk::QueueFlags::GRAPHICS;
    const C: vk::QueueFlags = vk::QueueFlags::COMPUTE;
    const T: vk::QueueFlags = vk::QueueFlags::TRANSFER;

    #[test]
    fn standard_order_passes_validation() {
        assert!(ResolutionPipeline::new(standard_steps()).is_ok());
    }

    #[test]
    fn presentation_before_graphics_is_rejected() {
        let mut steps = standard_steps();
        steps.swap(1, 2);
        assert_eq!(
            ResolutionPipeline::new(steps).unwrap_err(),
            StepOrderError::ReadsUndecided {
                step: QueueRole::Presentation,
                role: QueueRole::Graphics
            }
        );
    }

    #[test]
    fn role_decided_twice_is_rejected() {
        let mut steps = standard_steps();
        steps.push(ResolveStep::new(QueueRole::Transfer, Rule::Largest { required: T }));
        assert_eq!(
            ResolutionPipeline::new(steps).unwrap_err(),
            StepOrderError::DecidedTwice(QueueRole::Transfer)
        );
    }

    #[test]
    fn typical_discrete_layout() {
        let families = [family(G | C | T, 16, true), family(T, 2, false), family(C | T, 8, false)];
        let a = resolve_queue_families(&families);
        assert_eq!(a.transfer, Some(0));
        assert_eq!(a.graphics, Some(0));
        assert_eq!(a.presentation, Some(0));
        // family 2 also transfers, so there is no dedicated compute family
        assert_eq!(a.compute, Some(0));

        let q = a.require_presentable().unwrap();
        assert_eq!(q.unique_families(), vec![0]);
        assert_eq!(q.image_sharing(), (vk::SharingMode::EXCLUSIVE, Vec::new()));
    }

    #[test]
    fn dedicated_family_wins_over_a_bigger_shared_one() {
        let families = [family(G | C | T, 16, true), family(G, 1, true), family(C, 2, false)];
        let a = resolve_queue_families(&families);
        assert_eq!(a.graphics, Some(1));
        assert_eq!(a.presentation, Some(1));
        assert_eq!(a.compute, Some(2));
    }

    #[test]
    fn excluded_bits_keep_a_family_out_of_the_dedicated_search() {
        let families = [family(C | T, 64, false), family(C, 1, false)];
        assert_eq!(largest(&families, C, G | T), Some(1));
        assert_eq!(resolve_queue_families(&families).compute, Some(1));
    }

    #[test]
    fn presentation_falls_back_to_first_presenting_family() {
        let families = [
            family(G, 4, false),
            family(T, 1, false),
            family(C, 1, true),
            family(C, 1, true),
        ];
        let a = resolve_queue_families(&families);
        assert_eq!(a.graphics, Some(0));
        assert_eq!(a.presentation, Some(2));

        let q = a.require_presentable().unwrap();
        assert_eq!(q.unique_families(), vec![0, 2]);
        assert_eq!(q.image_sharing(), (vk::SharingMode::CONCURRENT, vec![0, 2]));
    }

    #[test]
    fn missing_optional_roles_are_tolerated() {
        let a = resolve_queue_families(&[family(G, 1, true)]);
        assert_eq!(a.compute, None);
        assert_eq!(a.transfer, None);
        assert!(a.require_presentable().is_ok());
    }

    #[test]
    fn missing_graphics_is_a_capability_failure() {
        let a = resolve_queue_families(&[family(C | T, 2, true)]);
        assert_eq!(a.graphics, None);
        assert_eq!(a.presentation, Some(0));
        assert_eq!(a.require_presentable().unwrap_err().class(), FailureClass::Capability);
    }

    #[test]
    fn ties_go_to_the_lowest_index() {
        let families = [family(T, 2, false), family(T, 2, false)];
        assert_eq!(resolve_queue_families(&families).transfer, Some(0));
    }

    #[test]
    fn graphics_and_presentation_resolve_whenever_some_family_offers_them() {
        let options = [G, C, T, G | C, G | T, C | T, G | C | T];
        for &a in &options {
            for &b in &options {
                for present_mask in 0u8..4 {
                    let families = [
                        family(a, 1, present_mask & 1 != 0),
                        family(b, 2, present_mask & 2 != 0),
                    ];
                    let any_graphics = families.iter().any(|f| f.flags.contains(G));
                    let any_present = families.iter().any(|f| f.presents);
                    let r = resolve_queue_families(&families);
                    assert_eq!(r.graphics.is_some(), any_graphics);
                    assert_eq!(r.presentation.is_some(), any_present);
                    if let (Some(g), Some(p)) = (r.graphics, r.presentation) {
                        if families[g as usize].presents {
                            assert_eq!(g, p);
                        }
                    }
                }
            }
        }
    }
}
