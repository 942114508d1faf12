//! Live-state conditions and their per-patch cache
//!
//! Some update policies depend on the current state of the deployed resource
//! ("is the compute fleet running?"). That state is provided by an external
//! [`LiveStateProvider`]. Queries may be slow network calls, so every
//! [`ConfigPatch`](crate::ConfigPatch) owns a [`ConditionCache`] that asks the
//! provider at most once per distinct condition, even when many changes are
//! checked concurrently.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::{ConditionError, PolicyError};

/// Default upper bound for a single live-state query
pub const DEFAULT_CONDITION_TIMEOUT: Duration = Duration::from_secs(30);

/// A question about the live resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Condition {
    /// Whether the compute fleet has running capacity
    RunningCapacity,
    /// Lifecycle state of the head node (e.g. `running`, `stopped`)
    HeadNodeState,
    /// Desired vCPUs of the batch compute environment
    BatchDesiredVcpus,
    /// A parameter of the deployed stack
    StackParameter(String),
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RunningCapacity => write!(f, "running-capacity"),
            Self::HeadNodeState => write!(f, "head-node-state"),
            Self::BatchDesiredVcpus => write!(f, "batch-desired-vcpus"),
            Self::StackParameter(name) => write!(f, "stack-parameter:{}", name),
        }
    }
}

/// Answer to a [`Condition`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionValue {
    Flag(bool),
    Text(String),
    Count(i64),
    /// The live resource has no value for this condition
    Absent,
}

impl std::fmt::Display for ConditionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flag(b) => write!(f, "{}", b),
            Self::Text(s) => write!(f, "'{}'", s),
            Self::Count(n) => write!(f, "{}", n),
            Self::Absent => write!(f, "absent"),
        }
    }
}

/// Source of live resource state
///
/// Implementations must be Send + Sync: changes are checked concurrently.
/// Queries must be read-only.
#[async_trait]
pub trait LiveStateProvider: Send + Sync {
    /// Evaluate a single condition against the live resource
    async fn query(&self, condition: &Condition) -> Result<ConditionValue, ConditionError>;
}

/// Provider used when no live state is available
///
/// Every query fails, so policies depending on live state report FAILED
/// while purely static policies still evaluate.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLiveState;

#[async_trait]
impl LiveStateProvider for NoLiveState {
    async fn query(&self, condition: &Condition) -> Result<ConditionValue, ConditionError> {
        Err(ConditionError::Unavailable {
            condition: condition.to_string(),
        })
    }
}

/// Recorded live state, as loaded from a YAML or JSON document
///
/// ```yaml
/// running_capacity: false
/// head_node_state: running
/// batch_desired_vcpus: 4
/// stack_parameters:
///   RemoveBucketOnDeletion: "True"
/// failures:
///   head-node-state: "throttled by the API"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LiveStateSnapshot {
    #[serde(default)]
    pub running_capacity: Option<bool>,
    #[serde(default)]
    pub head_node_state: Option<String>,
    #[serde(default)]
    pub batch_desired_vcpus: Option<i64>,
    #[serde(default)]
    pub stack_parameters: BTreeMap<String, String>,
    /// Conditions (by display name) whose query fails with the given message
    #[serde(default)]
    pub failures: BTreeMap<String, String>,
}

/// In-memory provider answering from a [`LiveStateSnapshot`]
///
/// Counts queries per condition, which makes it usable as a test double.
#[derive(Debug, Clone, Default)]
pub struct StaticLiveState {
    snapshot: Arc<LiveStateSnapshot>,
    queries: Arc<RwLock<HashMap<Condition, usize>>>,
}

impl StaticLiveState {
    /// Create a provider answering from the given snapshot
    pub fn new(snapshot: LiveStateSnapshot) -> Self {
        Self {
            snapshot: Arc::new(snapshot),
            queries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Load a snapshot from a YAML or JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let snapshot: LiveStateSnapshot = serde_yaml::from_str(&content)?;
        Ok(Self::new(snapshot))
    }

    /// Live state of a cluster whose compute fleet is running
    pub fn running_fleet() -> Self {
        Self::new(LiveStateSnapshot {
            running_capacity: Some(true),
            head_node_state: Some("running".to_string()),
            ..Default::default()
        })
    }

    /// Live state of a cluster whose compute fleet is stopped
    pub fn stopped_fleet() -> Self {
        Self::new(LiveStateSnapshot {
            running_capacity: Some(false),
            head_node_state: Some("running".to_string()),
            ..Default::default()
        })
    }

    /// Number of times a condition has been queried
    pub fn query_count(&self, condition: &Condition) -> usize {
        self.queries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(condition)
            .copied()
            .unwrap_or(0)
    }

    /// Total number of queries across all conditions
    pub fn total_queries(&self) -> usize {
        self.queries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }
}

#[async_trait]
impl LiveStateProvider for StaticLiveState {
    async fn query(&self, condition: &Condition) -> Result<ConditionValue, ConditionError> {
        *self
            .queries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(condition.clone())
            .or_default() += 1;

        let name = condition.to_string();
        if let Some(message) = self.snapshot.failures.get(&name) {
            return Err(ConditionError::Query {
                condition: name,
                message: message.clone(),
            });
        }

        let unavailable = || ConditionError::Unavailable {
            condition: condition.to_string(),
        };

        match condition {
            Condition::RunningCapacity => self
                .snapshot
                .running_capacity
                .map(ConditionValue::Flag)
                .ok_or_else(unavailable),
            Condition::HeadNodeState => self
                .snapshot
                .head_node_state
                .clone()
                .map(ConditionValue::Text)
                .ok_or_else(unavailable),
            Condition::BatchDesiredVcpus => self
                .snapshot
                .batch_desired_vcpus
                .map(ConditionValue::Count)
                .ok_or_else(unavailable),
            Condition::StackParameter(param) => Ok(self
                .snapshot
                .stack_parameters
                .get(param)
                .cloned()
                .map(ConditionValue::Text)
                .unwrap_or(ConditionValue::Absent)),
        }
    }
}

type ConditionCell = Arc<OnceCell<Result<ConditionValue, ConditionError>>>;

/// Memoized live-state answers for one patch
///
/// The first caller for a condition runs the query; concurrent callers for the
/// same condition wait for that result. Failures are cached as well.
pub struct ConditionCache {
    provider: Arc<dyn LiveStateProvider>,
    timeout: Duration,
    cells: Mutex<HashMap<Condition, ConditionCell>>,
}

impl ConditionCache {
    /// Create an empty cache in front of a provider
    pub fn new(provider: Arc<dyn LiveStateProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate a condition, querying the provider only on first access
    pub async fn evaluate(&self, condition: &Condition) -> Result<ConditionValue, ConditionError> {
        let cell = {
            let mut cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(cells.entry(condition.clone()).or_default())
        };

        cell.get_or_init(|| self.query(condition)).await.clone()
    }

    async fn query(&self, condition: &Condition) -> Result<ConditionValue, ConditionError> {
        debug!(%condition, "querying live state");

        let result = match tokio::time::timeout(self.timeout, self.provider.query(condition)).await
        {
            Ok(result) => result,
            Err(_) => Err(ConditionError::Timeout {
                condition: condition.to_string(),
                timeout: self.timeout,
            }),
        };

        match &result {
            Ok(value) => debug!(%condition, %value, "live state answered"),
            Err(e) => warn!(%condition, error = %e, "live state query failed"),
        }
        result
    }

    /// Number of distinct conditions evaluated so far
    pub fn evaluated(&self) -> usize {
        self.cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    /// Whether the compute fleet currently has running capacity
    pub async fn has_running_capacity(&self) -> Result<bool, PolicyError> {
        let condition = Condition::RunningCapacity;
        match self.evaluate(&condition).await? {
            ConditionValue::Flag(running) => Ok(running),
            other => Err(unexpected(&condition, &other)),
        }
    }

    /// Current head node state
    pub async fn head_node_state(&self) -> Result<String, PolicyError> {
        let condition = Condition::HeadNodeState;
        match self.evaluate(&condition).await? {
            ConditionValue::Text(state) => Ok(state),
            other => Err(unexpected(&condition, &other)),
        }
    }

    /// Desired vCPUs of the batch compute environment
    pub async fn batch_desired_vcpus(&self) -> Result<i64, PolicyError> {
        let condition = Condition::BatchDesiredVcpus;
        match self.evaluate(&condition).await? {
            ConditionValue::Count(vcpus) => Ok(vcpus),
            other => Err(unexpected(&condition, &other)),
        }
    }

    /// Value of a deployed stack parameter, if set
    pub async fn stack_parameter(&self, name: &str) -> Result<Option<String>, PolicyError> {
        let condition = Condition::StackParameter(name.to_string());
        match self.evaluate(&condition).await? {
            ConditionValue::Text(value) => Ok(Some(value)),
            ConditionValue::Absent => Ok(None),
            other => Err(unexpected(&condition, &other)),
        }
    }
}

impl std::fmt::Debug for ConditionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionCache")
            .field("timeout", &self.timeout)
            .field("evaluated", &self.evaluated())
            .finish()
    }
}

fn unexpected(condition: &Condition, value: &ConditionValue) -> PolicyError {
    PolicyError::UnexpectedConditionValue {
        condition: condition.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider that answers slowly, to exercise concurrent waiters
    struct SlowProvider {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl LiveStateProvider for SlowProvider {
        async fn query(&self, _condition: &Condition) -> Result<ConditionValue, ConditionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(ConditionValue::Flag(true))
        }
    }

    #[tokio::test]
    async fn test_cache_queries_once() {
        let provider = StaticLiveState::running_fleet();
        let cache = ConditionCache::new(Arc::new(provider.clone()), DEFAULT_CONDITION_TIMEOUT);

        assert!(cache.has_running_capacity().await.unwrap());
        assert!(cache.has_running_capacity().await.unwrap());
        assert!(cache.has_running_capacity().await.unwrap());

        assert_eq!(provider.query_count(&Condition::RunningCapacity), 1);
        assert_eq!(cache.evaluated(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_waiters_share_one_query() {
        let provider = Arc::new(SlowProvider {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(20),
        });
        let cache = ConditionCache::new(provider.clone(), DEFAULT_CONDITION_TIMEOUT);

        let results = futures::future::join_all(
            (0..8).map(|_| cache.evaluate(&Condition::RunningCapacity)),
        )
        .await;

        assert!(results.iter().all(|r| r == &Ok(ConditionValue::Flag(true))));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_cached_error() {
        let provider = Arc::new(SlowProvider {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(200),
        });
        let cache = ConditionCache::new(provider.clone(), Duration::from_millis(10));

        let first = cache.evaluate(&Condition::HeadNodeState).await;
        let second = cache.evaluate(&Condition::HeadNodeState).await;

        assert!(matches!(first, Err(ConditionError::Timeout { .. })));
        assert_eq!(first, second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_live_state_is_unavailable() {
        let cache = ConditionCache::new(Arc::new(NoLiveState), DEFAULT_CONDITION_TIMEOUT);
        let result = cache.has_running_capacity().await;
        assert!(matches!(
            result,
            Err(PolicyError::Condition(ConditionError::Unavailable { .. }))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_failure() {
        let provider = StaticLiveState::new(LiveStateSnapshot {
            failures: BTreeMap::from([(
                "head-node-state".to_string(),
                "throttled".to_string(),
            )]),
            ..Default::default()
        });
        let cache = ConditionCache::new(Arc::new(provider), DEFAULT_CONDITION_TIMEOUT);

        let err = cache.head_node_state().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to evaluate 'head-node-state': throttled"
        );
    }

    #[tokio::test]
    async fn test_stack_parameter_absent() {
        let provider = StaticLiveState::new(LiveStateSnapshot {
            stack_parameters: BTreeMap::from([(
                "RemoveBucketOnDeletion".to_string(),
                "True".to_string(),
            )]),
            ..Default::default()
        });
        let cache = ConditionCache::new(Arc::new(provider), DEFAULT_CONDITION_TIMEOUT);

        assert_eq!(
            cache.stack_parameter("RemoveBucketOnDeletion").await.unwrap(),
            Some("True".to_string())
        );
        assert_eq!(cache.stack_parameter("FSXOptions").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unexpected_value_kind() {
        struct CountingEverything;

        #[async_trait]
        impl LiveStateProvider for CountingEverything {
            async fn query(&self, _: &Condition) -> Result<ConditionValue, ConditionError> {
                Ok(ConditionValue::Count(3))
            }
        }

        let cache = ConditionCache::new(Arc::new(CountingEverything), DEFAULT_CONDITION_TIMEOUT);

        assert_eq!(cache.batch_desired_vcpus().await.unwrap(), 3);
        let err = cache.has_running_capacity().await.unwrap_err();
        assert!(matches!(err, PolicyError::UnexpectedConditionValue { .. }));
    }

    #[test]
    fn test_snapshot_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.yaml");
        std::fs::write(&path, "running_capacity: true\nbatch_desired_vcpus: 8\n").unwrap();

        let provider = StaticLiveState::from_file(&path).unwrap();
        assert_eq!(provider.snapshot.running_capacity, Some(true));
        assert_eq!(provider.snapshot.batch_desired_vcpus, Some(8));
    }
}
