//! Convergence waits for asynchronous NetApp operations.
//!
//! Every wait is the same loop: sleep, look the resource up, and check the
//! result against a target condition. The loop itself is [`poll_until`],
//! driven by a [`Probe`]. [`ResourceProbe`] is the probe for NetApp resources
//! and backs the public entry points [`wait_for_exists`],
//! [`wait_for_absent`] and [`wait_for_status`].
//!
//! Attempts within one wait are strictly sequential. The delay is a tokio
//! sleep, so many waits can run side by side on one runtime without holding
//! a thread each. A wait can only be cancelled by dropping its future.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::client::ResourceReader;
use crate::error::{AnfError, WaitError};
use crate::resource_uri::{ResourceIdentifier, ResourceKind};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_RETRIES: u32 = 60;

/// Mirror state of a healthy replication.
pub const MIRRORED: &str = "mirrored";
/// Mirror state after the replication was broken.
pub const BROKEN: &str = "broken";

/// Attempt budget and delay of a single wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSpec {
    pub interval: Duration,
    pub max_retries: u32,
}

impl PollSpec {
    pub fn new(interval: Duration, max_retries: u32) -> Self {
        Self {
            interval,
            max_retries,
        }
    }

    /// Number of attempts to make. A zero budget still makes one attempt.
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

impl Default for PollSpec {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL, DEFAULT_RETRIES)
    }
}

/// Condition a wait is looking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Exists,
    Absent,
    /// Replication mirror state equal to the value, ignoring case.
    StatusEquals(String),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Exists => f.write_str("available"),
            Target::Absent => f.write_str("deleted"),
            Target::StatusEquals(status) => write!(f, "'{status}'"),
        }
    }
}

/// How a poll loop ended.
#[derive(Debug)]
pub enum PollOutcome {
    Converged { attempts: u32 },
    Exhausted { attempts: u32 },
    Failed(AnfError),
}

/// Result of [`wait_for_absent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Absence {
    /// A lookup reported the resource as gone.
    Confirmed { attempts: u32 },
    /// Every lookup still found the resource. The caller decides whether
    /// that is acceptable.
    Unconfirmed { attempts: u32 },
}

/// A remote condition that can be checked repeatedly.
#[async_trait]
pub trait Probe: Send + Sync {
    type Output: Send;

    async fn fetch(&self) -> Result<Self::Output, AnfError>;

    /// Whether the lookup result satisfies the condition.
    fn is_success(&self, observed: &Result<Self::Output, AnfError>) -> bool;

    /// Whether a failed lookup should be retried instead of aborting.
    fn is_transient(&self, error: &AnfError) -> bool;
}

/// Poll `probe` until it succeeds, fails fatally, or the budget runs out.
///
/// Sleeps `spec.interval` before every attempt, so a freshly issued request
/// gets a full interval before the first lookup.
pub async fn poll_until<P>(probe: &P, spec: PollSpec) -> PollOutcome
where
    P: Probe + ?Sized,
{
    let attempts = spec.attempts();

    for attempt in 1..=attempts {
        tokio::time::sleep(spec.interval).await;

        let observed = probe.fetch().await;
        if probe.is_success(&observed) {
            return PollOutcome::Converged { attempts: attempt };
        }

        match observed {
            Ok(_) => debug!(attempt, attempts, "Condition not reached yet"),
            Err(e) if probe.is_transient(&e) => {
                debug!(attempt, attempts, error = %e, "Transient error, retrying")
            }
            Err(e) => return PollOutcome::Failed(e),
        }
    }

    PollOutcome::Exhausted { attempts }
}

/// What a resource lookup returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    Resource,
    MirrorState(String),
}

/// Lookup a [`ResourceProbe`] issues, carrying every segment it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Lookup {
    Account {
        rg: String,
        account: String,
    },
    Pool {
        rg: String,
        account: String,
        pool: String,
    },
    Volume {
        rg: String,
        account: String,
        pool: String,
        volume: String,
    },
    Snapshot {
        rg: String,
        account: String,
        pool: String,
        volume: String,
        snapshot: String,
    },
    Replication {
        rg: String,
        account: String,
        pool: String,
        volume: String,
    },
}

/// Probe for one NetApp resource, dispatching on its kind.
pub struct ResourceProbe<'a, C: ?Sized> {
    client: &'a C,
    target: Target,
    lookup: Lookup,
}

impl<'a, C> ResourceProbe<'a, C>
where
    C: ResourceReader + ?Sized,
{
    /// Fails if `resource_id` lacks a segment the lookup for `kind` needs.
    /// Segments are checked outermost first.
    pub fn new(
        client: &'a C,
        kind: ResourceKind,
        resource_id: &str,
        target: Target,
    ) -> Result<Self, AnfError> {
        let id = ResourceIdentifier::parse(resource_id);
        let need = |segment: &'static str, value: Option<&str>| {
            value
                .map(str::to_string)
                .ok_or_else(|| AnfError::InvalidResourceId {
                    id: resource_id.to_string(),
                    segment,
                })
        };

        let rg = need("resource group", id.resource_group())?;
        let account = need("account", id.account_name())?;
        let lookup = match kind {
            ResourceKind::Account => Lookup::Account { rg, account },
            ResourceKind::Pool => Lookup::Pool {
                rg,
                account,
                pool: need("capacity pool", id.pool_name())?,
            },
            ResourceKind::Volume => Lookup::Volume {
                rg,
                account,
                pool: need("capacity pool", id.pool_name())?,
                volume: need("volume", id.volume_name())?,
            },
            ResourceKind::Replication => Lookup::Replication {
                rg,
                account,
                pool: need("capacity pool", id.pool_name())?,
                volume: need("volume", id.volume_name())?,
            },
            ResourceKind::Snapshot => Lookup::Snapshot {
                rg,
                account,
                pool: need("capacity pool", id.pool_name())?,
                volume: need("volume", id.volume_name())?,
                snapshot: need("snapshot", id.snapshot_name())?,
            },
        };

        Ok(Self {
            client,
            target,
            lookup,
        })
    }
}

#[async_trait]
impl<'a, C> Probe for ResourceProbe<'a, C>
where
    C: ResourceReader + ?Sized,
{
    type Output = Observed;

    async fn fetch(&self) -> Result<Observed, AnfError> {
        let client = self.client;
        match &self.lookup {
            Lookup::Account { rg, account } => {
                client.get_account(rg, account).await.map(|_| Observed::Resource)
            }
            Lookup::Pool { rg, account, pool } => client
                .get_pool(rg, account, pool)
                .await
                .map(|_| Observed::Resource),
            Lookup::Volume {
                rg,
                account,
                pool,
                volume,
            } => client
                .get_volume(rg, account, pool, volume)
                .await
                .map(|_| Observed::Resource),
            Lookup::Snapshot {
                rg,
                account,
                pool,
                volume,
                snapshot,
            } => client
                .get_snapshot(rg, account, pool, volume, snapshot)
                .await
                .map(|_| Observed::Resource),
            Lookup::Replication {
                rg,
                account,
                pool,
                volume,
            } => client
                .replication_status(rg, account, pool, volume)
                .await
                .map(|status| Observed::MirrorState(status.mirror_state)),
        }
    }

    fn is_success(&self, observed: &Result<Observed, AnfError>) -> bool {
        match (&self.target, observed) {
            (Target::Exists, Ok(_)) => true,
            (Target::Absent, Err(e)) => e.is_not_found(),
            (Target::StatusEquals(expected), Ok(Observed::MirrorState(state))) => {
                state.eq_ignore_ascii_case(expected)
            }
            _ => false,
        }
    }

    fn is_transient(&self, error: &AnfError) -> bool {
        if error.is_in_progress() {
            return true;
        }
        match self.target {
            Target::Exists => error.is_not_found(),
            Target::Absent => false,
            Target::StatusEquals(_) => error.is_not_found() || error.is_replication_creating(),
        }
    }
}

async fn run<C>(
    client: &C,
    kind: ResourceKind,
    resource_id: &str,
    target: Target,
    spec: PollSpec,
) -> PollOutcome
where
    C: ResourceReader + ?Sized,
{
    let probe = match ResourceProbe::new(client, kind, resource_id, target.clone()) {
        Ok(probe) => probe,
        Err(e) => return PollOutcome::Failed(e),
    };

    info!(
        %kind,
        resource_id,
        interval_secs = spec.interval.as_secs(),
        retries = spec.attempts(),
        "Waiting for {} to become {}",
        kind,
        target
    );
    poll_until(&probe, spec).await
}

fn to_result(
    outcome: PollOutcome,
    kind: ResourceKind,
    resource_id: &str,
    target: &Target,
) -> Result<u32, WaitError> {
    match outcome {
        PollOutcome::Converged { attempts } => {
            info!(%kind, resource_id, attempts, "{} is {}", kind, target);
            Ok(attempts)
        }
        PollOutcome::Exhausted { attempts } => Err(WaitError::Exhausted {
            kind,
            resource_id: resource_id.to_string(),
            condition: target.to_string(),
            attempts,
        }),
        PollOutcome::Failed(source) => Err(WaitError::Fatal {
            kind,
            resource_id: resource_id.to_string(),
            source,
        }),
    }
}

/// Wait until the resource can be looked up.
///
/// Returns the number of attempts it took.
pub async fn wait_for_exists<C>(
    client: &C,
    kind: ResourceKind,
    resource_id: &str,
    spec: PollSpec,
) -> Result<u32, WaitError>
where
    C: ResourceReader + ?Sized,
{
    let outcome = run(client, kind, resource_id, Target::Exists, spec).await;
    to_result(outcome, kind, resource_id, &Target::Exists)
}

/// Wait until lookups of the resource report it as not found.
///
/// Running out of retries while the resource is still visible is not an
/// error: it is reported as [`Absence::Unconfirmed`].
pub async fn wait_for_absent<C>(
    client: &C,
    kind: ResourceKind,
    resource_id: &str,
    spec: PollSpec,
) -> Result<Absence, WaitError>
where
    C: ResourceReader + ?Sized,
{
    match run(client, kind, resource_id, Target::Absent, spec).await {
        PollOutcome::Converged { attempts } => {
            info!(%kind, resource_id, attempts, "{} is deleted", kind);
            Ok(Absence::Confirmed { attempts })
        }
        PollOutcome::Exhausted { attempts } => {
            warn!(
                %kind,
                resource_id,
                attempts,
                "{} still visible after {} attempts, continuing",
                kind,
                attempts
            );
            Ok(Absence::Unconfirmed { attempts })
        }
        PollOutcome::Failed(source) => Err(WaitError::Fatal {
            kind,
            resource_id: resource_id.to_string(),
            source,
        }),
    }
}

/// Wait until the replication mirror state of a volume equals `expected`.
pub async fn wait_for_status<C>(
    client: &C,
    resource_id: &str,
    expected: &str,
    spec: PollSpec,
) -> Result<u32, WaitError>
where
    C: ResourceReader + ?Sized,
{
    let kind = ResourceKind::Replication;
    let target = Target::StatusEquals(expected.to_string());
    let outcome = run(client, kind, resource_id, target.clone(), spec).await;
    to_result(outcome, kind, resource_id, &target)
}

pub async fn wait_for_mirrored<C>(
    client: &C,
    resource_id: &str,
    spec: PollSpec,
) -> Result<u32, WaitError>
where
    C: ResourceReader + ?Sized,
{
    wait_for_status(client, resource_id, MIRRORED, spec).await
}

pub async fn wait_for_broken<C>(
    client: &C,
    resource_id: &str,
    spec: PollSpec,
) -> Result<u32, WaitError>
where
    C: ResourceReader + ?Sized,
{
    wait_for_status(client, resource_id, BROKEN, spec).await
}
