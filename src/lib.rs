//! fleetroll: rolling capacity updates for auto-scaled fleets
//!
//! Doubles each selected fleet, waits for the new members to pass their
//! load balancer health checks, then shrinks back to the original capacity.
//! Drain, pin and drain-and-restore modes reuse the same primitives.

pub mod cli;
pub mod cloud;
pub mod config;
pub mod fleet;
pub mod gate;
pub mod health;
pub mod rollout;
pub mod scaling;
pub mod search;
pub mod wait;
