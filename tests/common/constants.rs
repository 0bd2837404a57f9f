//! Shared timings for end-to-end tests
//!
//! Real time is used throughout, so assertions leave generous slack.

use std::time::Duration;

/// Short lease so failover tests finish quickly
pub const TEST_LEASE_TTL: Duration = Duration::from_millis(400);
pub const TEST_LEASE_RENEW: Duration = Duration::from_millis(100);

/// Upper bound for anything that should happen "soon"
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
