//! Scaling controller
//!
//! Computes target capacities and drives capacity mutations against the
//! autoscaling API:
//! - scaling processes are suspended before the first scale-up mutation and
//!   resumed only once the matching scale-down has landed
//! - jumps of at least one step (`scaler`) are paced, pausing between steps
//! - in production, narrowing mutations are followed by a settle delay
//!
//! Mutations are never retried here; a failed call propagates to the caller.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::cloud::{AutoscalingApi, CloudError};
use crate::fleet::{Capacity, CapacityError, FleetDescriptor};
use crate::wait::{Cancelled, Waiter};

/// Processes suspended for the duration of an update
pub const DEFAULT_SUSPENDED_PROCESSES: &[&str] =
    &["ScheduledActions", "AlarmNotification", "AZRebalance"];

/// Errors raised while mutating a fleet
#[derive(Error, Debug)]
pub enum ScalingError {
    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Capacity(#[from] CapacityError),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Tunables for the controller
#[derive(Debug, Clone)]
pub struct ScalingSettings {
    /// Largest single-step change while pacing
    pub scaler: u32,
    /// Pause after each intermediate pacing step
    pub step_delay: Duration,
    /// Pause after a narrowing mutation in production
    pub settle_delay: Duration,
    /// Extra capacity added when doubling in production
    pub production_margin: u32,
    pub suspended_processes: Vec<String>,
}

impl Default for ScalingSettings {
    fn default() -> Self {
        Self {
            scaler: 10,
            step_delay: Duration::from_secs(30),
            settle_delay: Duration::from_secs(30),
            production_margin: 4,
            suspended_processes: DEFAULT_SUSPENDED_PROCESSES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

// ============================================================================
// Pure capacity arithmetic
// ============================================================================

fn doubled(value: u32, margin: u32) -> u32 {
    if value == 0 {
        0
    } else {
        value.saturating_mul(2).saturating_add(margin)
    }
}

/// Rolling-update target: double desired and max (plus the production
/// margin), keep min; zero stays zero
pub fn compute_targets(capacity: Capacity, is_production: bool, margin: u32) -> Capacity {
    let margin = if is_production { margin } else { 0 };
    Capacity {
        min: capacity.min,
        desired: doubled(capacity.desired, margin),
        max: doubled(capacity.max, margin),
    }
}

/// Desired capacities to apply when moving from `current` to `target`
///
/// When the jump is at least `scaler`, intermediate values move by exactly
/// `scaler` while more than one step remains; the last value is always
/// `target`.
pub fn pacing_steps(current: u32, target: u32, scaler: u32) -> Vec<u32> {
    let mut steps = Vec::new();

    if scaler > 0 && current.abs_diff(target) >= scaler {
        let mut position = current;
        if target > current {
            while target > position + scaler {
                position += scaler;
                steps.push(position);
            }
        } else {
            while position > target + scaler {
                position -= scaler;
                steps.push(position);
            }
        }
    }

    steps.push(target);
    steps
}

/// Capacity triples for a paced transition from `from` to `to`
///
/// Intermediate triples keep the wider of both bounds so every step
/// satisfies `min <= desired <= max`; the final triple is `to`.
pub fn paced_plan(from: Capacity, to: Capacity, scaler: u32) -> Vec<Capacity> {
    let min = from.min.min(to.min);
    let max = from.max.max(to.max);
    let steps = pacing_steps(from.desired, to.desired, scaler);
    let last = steps.len() - 1;

    steps
        .into_iter()
        .enumerate()
        .map(|(i, desired)| {
            if i == last {
                to
            } else {
                Capacity { min, desired, max }
            }
        })
        .collect()
}

// ============================================================================
// Controller
// ============================================================================

/// Issues capacity mutations for one session
pub struct ScalingController {
    api: Arc<dyn AutoscalingApi>,
    waiter: Waiter,
    settings: ScalingSettings,
    dry_run: bool,
    production: bool,
    issued: AtomicUsize,
}

impl ScalingController {
    pub fn new(
        api: Arc<dyn AutoscalingApi>,
        waiter: Waiter,
        settings: ScalingSettings,
        dry_run: bool,
        production: bool,
    ) -> Self {
        Self {
            api,
            waiter,
            settings,
            dry_run,
            production,
            issued: AtomicUsize::new(0),
        }
    }

    pub fn settings(&self) -> &ScalingSettings {
        &self.settings
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn is_production(&self) -> bool {
        self.production
    }

    /// Mutating calls issued so far (suppressed dry-run calls excluded)
    pub fn mutations_issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    /// Rolling-update targets for a fleet under this session's settings
    pub fn targets_for(&self, fleet: &FleetDescriptor) -> Capacity {
        compute_targets(
            fleet.capacity,
            self.production,
            self.settings.production_margin,
        )
    }

    /// Apply one capacity triple; idempotent cloud-side
    pub async fn apply_capacity(
        &self,
        fleet: &FleetDescriptor,
        capacity: Capacity,
    ) -> Result<(), ScalingError> {
        capacity.validate()?;

        if self.dry_run {
            info!(fleet = %fleet.name, capacity = %capacity, "DRY RUN: would set capacity");
            return Ok(());
        }

        debug!(fleet = %fleet.name, region = %fleet.region, capacity = %capacity, "Setting capacity");
        self.api
            .update_capacity(&fleet.name, &fleet.region, capacity)
            .await?;
        self.issued.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub async fn suspend(&self, fleet: &FleetDescriptor) -> Result<(), ScalingError> {
        let processes = &self.settings.suspended_processes;
        if self.dry_run {
            info!(fleet = %fleet.name, processes = ?processes, "DRY RUN: would suspend processes");
            return Ok(());
        }
        self.api
            .suspend_processes(&fleet.name, &fleet.region, processes)
            .await?;
        self.issued.fetch_add(1, Ordering::SeqCst);
        debug!(fleet = %fleet.name, "Suspended scaling processes");
        Ok(())
    }

    pub async fn resume(&self, fleet: &FleetDescriptor) -> Result<(), ScalingError> {
        let processes = &self.settings.suspended_processes;
        if self.dry_run {
            info!(fleet = %fleet.name, processes = ?processes, "DRY RUN: would resume processes");
            return Ok(());
        }
        self.api
            .resume_processes(&fleet.name, &fleet.region, processes)
            .await?;
        self.issued.fetch_add(1, Ordering::SeqCst);
        debug!(fleet = %fleet.name, "Resumed scaling processes");
        Ok(())
    }

    /// Walk a paced plan, pausing after each intermediate step
    async fn apply_paced(
        &self,
        fleet: &FleetDescriptor,
        from: Capacity,
        to: Capacity,
    ) -> Result<(), ScalingError> {
        to.validate()?;
        let plan = paced_plan(from, to, self.settings.scaler);

        if plan.len() > 1 {
            info!(
                fleet = %fleet.name,
                step = self.settings.scaler,
                steps = plan.len(),
                "Scaling in increments"
            );
        }

        let last = plan.len() - 1;
        for (i, capacity) in plan.into_iter().enumerate() {
            self.apply_capacity(fleet, capacity).await?;
            if i < last && !self.dry_run {
                self.waiter.wait(self.settings.step_delay).await?;
            }
        }
        Ok(())
    }

    /// Suspend processes and raise the fleet to `target`, pacing if needed
    pub async fn scale_up(
        &self,
        fleet: &FleetDescriptor,
        target: Capacity,
    ) -> Result<(), ScalingError> {
        info!(
            fleet = %fleet.name,
            region = %fleet.region,
            desired_from = fleet.capacity.desired,
            desired_to = target.desired,
            max_from = fleet.capacity.max,
            max_to = target.max,
            "Performing scale UP"
        );
        target.validate()?;
        self.suspend(fleet).await?;
        self.apply_paced(fleet, fleet.capacity, target).await
    }

    /// Lower the fleet from `from` back to `to`, settle, then resume processes
    pub async fn scale_down(
        &self,
        fleet: &FleetDescriptor,
        from: Capacity,
        to: Capacity,
    ) -> Result<(), ScalingError> {
        info!(
            fleet = %fleet.name,
            region = %fleet.region,
            desired_from = from.desired,
            desired_to = to.desired,
            max_from = from.max,
            max_to = to.max,
            "Performing scale DOWN"
        );
        self.apply_paced(fleet, from, to).await?;
        self.settle(fleet, from, to).await?;
        self.resume(fleet).await
    }

    /// Pin a fleet to an explicit triple in a single mutation
    ///
    /// Processes are suspended first and stay suspended so scheduled actions
    /// cannot undo the pinned capacity.
    pub async fn pin(&self, fleet: &FleetDescriptor, target: Capacity) -> Result<(), ScalingError> {
        info!(
            fleet = %fleet.name,
            region = %fleet.region,
            from = %fleet.capacity,
            to = %target,
            "Performing scale"
        );
        target.validate()?;
        self.suspend(fleet).await?;
        self.apply_capacity(fleet, target).await?;
        self.settle(fleet, fleet.capacity, target).await?;
        info!(fleet = %fleet.name, "Scaling processes left suspended");
        Ok(())
    }

    async fn settle(
        &self,
        fleet: &FleetDescriptor,
        from: Capacity,
        to: Capacity,
    ) -> Result<(), ScalingError> {
        if self.production && !self.dry_run && to.desired < from.desired {
            info!(
                fleet = %fleet.name,
                seconds = self.settle_delay_secs(),
                "Waiting for fleet to settle after scaling down"
            );
            self.waiter.wait(self.settings.settle_delay).await?;
        }
        Ok(())
    }

    fn settle_delay_secs(&self) -> u64 {
        self.settings.settle_delay.as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::memory::Mutation;
    use crate::cloud::InMemoryCloud;
    use crate::wait::ManualClock;
    use tokio_util::sync::CancellationToken;

    fn controller(
        cloud: Arc<InMemoryCloud>,
        clock: Arc<ManualClock>,
        scaler: u32,
        dry_run: bool,
        production: bool,
    ) -> ScalingController {
        ScalingController::new(
            cloud,
            Waiter::new(clock, CancellationToken::new()),
            ScalingSettings {
                scaler,
                ..ScalingSettings::default()
            },
            dry_run,
            production,
        )
    }

    fn fleet(capacity: Capacity) -> FleetDescriptor {
        FleetDescriptor::new("web", "us-east-1", capacity)
    }

    #[test]
    fn test_doubling_formula() {
        let current = Capacity::new(1, 6, 10).unwrap();

        let target = compute_targets(current, false, 4);
        assert_eq!((target.desired, target.max), (12, 20));
        assert_eq!(target.min, 1);

        let target = compute_targets(current, true, 4);
        assert_eq!((target.desired, target.max), (16, 24));
    }

    #[test]
    fn test_zero_desired_stays_zero() {
        let current = Capacity::new(0, 0, 5).unwrap();
        assert_eq!(compute_targets(current, false, 4).desired, 0);
        assert_eq!(compute_targets(current, true, 4).desired, 0);
        assert!(compute_targets(current, true, 4).is_valid());
    }

    #[test]
    fn test_pacing_law_scale_up() {
        assert_eq!(
            pacing_steps(60, 120, 10),
            vec![70, 80, 90, 100, 110, 120]
        );
        assert_eq!(pacing_steps(6, 12, 4), vec![10, 12]);
    }

    #[test]
    fn test_pacing_law_scale_down() {
        assert_eq!(pacing_steps(120, 60, 10), vec![110, 100, 90, 80, 70, 60]);
        assert_eq!(pacing_steps(12, 6, 4), vec![8, 6]);
    }

    #[test]
    fn test_small_jump_is_single_step() {
        assert_eq!(pacing_steps(4, 8, 10), vec![8]);
        assert_eq!(pacing_steps(8, 4, 10), vec![4]);
        assert_eq!(pacing_steps(5, 5, 1), vec![5]);
    }

    #[test]
    fn test_pacing_steps_differ_by_scaler() {
        for (current, target, scaler) in [(3, 50, 7), (50, 3, 7), (0, 31, 5), (10, 20, 10)] {
            let steps = pacing_steps(current, target, scaler);
            let mut previous = current;
            for (i, step) in steps.iter().enumerate() {
                if i + 1 < steps.len() {
                    assert_eq!(previous.abs_diff(*step), scaler);
                } else {
                    assert_eq!(*step, target);
                    assert!(previous.abs_diff(*step) <= scaler);
                }
                previous = *step;
            }
        }
    }

    #[test]
    fn test_paced_plan_keeps_invariant() {
        let from = Capacity::new(2, 6, 10).unwrap();
        let to = Capacity::new(2, 12, 20).unwrap();
        let plan = paced_plan(from, to, 4);

        assert_eq!(plan.last(), Some(&to));
        assert!(plan.iter().all(Capacity::is_valid));

        let back = paced_plan(to, from, 4);
        assert_eq!(back.iter().map(|c| c.desired).collect::<Vec<_>>(), vec![8, 6]);
        assert_eq!(back[0].max, 20);
        assert!(back.iter().all(Capacity::is_valid));
    }

    #[tokio::test]
    async fn test_scale_up_suspends_then_paces() {
        let cloud = Arc::new(InMemoryCloud::new());
        let current = Capacity::new(1, 6, 10).unwrap();
        cloud.add_fleet(fleet(current));
        let clock = Arc::new(ManualClock::new());
        let controller = controller(cloud.clone(), clock.clone(), 4, false, false);

        let target = controller.targets_for(&fleet(current));
        controller.scale_up(&fleet(current), target).await.unwrap();

        let mutations = cloud.mutations();
        assert!(matches!(mutations[0], Mutation::Suspend { .. }));
        assert_eq!(cloud.desired_history("web"), vec![10, 12]);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(30)]);
        assert_eq!(cloud.capacity_of("web", "us-east-1"), Some(target));
        assert_eq!(controller.mutations_issued(), 3);
    }

    #[tokio::test]
    async fn test_scale_down_settles_in_production() {
        let cloud = Arc::new(InMemoryCloud::new());
        let original = Capacity::new(1, 2, 4).unwrap();
        let raised = Capacity::new(1, 8, 12).unwrap();
        cloud.add_fleet(fleet(raised));
        let clock = Arc::new(ManualClock::new());
        let controller = controller(cloud.clone(), clock.clone(), 10, false, true);

        controller
            .scale_down(&fleet(raised), raised, original)
            .await
            .unwrap();

        assert_eq!(cloud.desired_history("web"), vec![2]);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(30)]);
        assert!(matches!(
            cloud.mutations().last(),
            Some(Mutation::Resume { .. })
        ));
    }

    #[tokio::test]
    async fn test_pin_to_zero_settles_in_production() {
        let cloud = Arc::new(InMemoryCloud::new());
        let current = Capacity::new(1, 3, 6).unwrap();
        cloud.add_fleet(fleet(current));
        let clock = Arc::new(ManualClock::new());
        let controller = controller(cloud.clone(), clock.clone(), 10, false, true);

        controller.pin(&fleet(current), Capacity::zero()).await.unwrap();

        assert_eq!(cloud.desired_history("web"), vec![0]);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(30)]);
        assert!(matches!(
            cloud.mutations().last(),
            Some(Mutation::Capacity { .. })
        ));
    }

    #[tokio::test]
    async fn test_pin_upward_does_not_settle() {
        let cloud = Arc::new(InMemoryCloud::new());
        let current = Capacity::new(1, 3, 6).unwrap();
        cloud.add_fleet(fleet(current));
        let clock = Arc::new(ManualClock::new());
        let controller = controller(cloud.clone(), clock.clone(), 10, false, true);

        controller.pin(&fleet(current), Capacity::pinned(5)).await.unwrap();

        assert_eq!(cloud.capacity_of("web", "us-east-1"), Some(Capacity::pinned(5)));
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_issues_nothing() {
        let cloud = Arc::new(InMemoryCloud::new());
        let current = Capacity::new(1, 30, 40).unwrap();
        cloud.add_fleet(fleet(current));
        let clock = Arc::new(ManualClock::new());
        let controller = controller(cloud.clone(), clock.clone(), 5, true, true);

        let target = controller.targets_for(&fleet(current));
        controller.scale_up(&fleet(current), target).await.unwrap();
        controller.scale_down(&fleet(target), target, current).await.unwrap();

        assert!(cloud.mutations().is_empty());
        assert!(clock.sleeps().is_empty());
        assert_eq!(controller.mutations_issued(), 0);
    }

    #[tokio::test]
    async fn test_invalid_target_rejected_before_mutation() {
        let cloud = Arc::new(InMemoryCloud::new());
        let current = Capacity::new(1, 2, 4).unwrap();
        cloud.add_fleet(fleet(current));
        let controller = controller(cloud.clone(), Arc::new(ManualClock::new()), 10, false, false);

        let bad = Capacity {
            min: 5,
            desired: 2,
            max: 4,
        };
        let result = controller.pin(&fleet(current), bad).await;
        assert!(matches!(result, Err(ScalingError::Capacity(_))));
        assert!(cloud.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_failed_mutation_propagates() {
        let cloud = Arc::new(InMemoryCloud::new());
        let current = Capacity::new(1, 2, 4).unwrap();
        cloud.add_fleet(fleet(current));
        cloud.fail_updates_for("web");
        let controller = controller(cloud.clone(), Arc::new(ManualClock::new()), 10, false, false);

        let result = controller.apply_capacity(&fleet(current), Capacity::pinned(3)).await;
        assert!(matches!(
            result,
            Err(ScalingError::Cloud(CloudError::Api { .. }))
        ));
    }
}
