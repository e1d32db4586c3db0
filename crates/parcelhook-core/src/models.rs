//! Core domain models and strongly-typed identifiers.
//!
//! Defines retry records for failed provider callbacks, the shipment snapshot
//! the callback path operates on, and newtype ID wrappers for compile-time
//! type safety. Includes database serialization traits and the status
//! transition rules used by the reference shipment flow.

use std::{collections::HashMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Strongly-typed retry record identifier.
///
/// Assigned once when a failed callback is enqueued and never changes. The
/// retry processor uses it for every state transition of the record.
///
/// # Example
///
/// ```
/// use parcelhook_core::models::RetryId;
/// let retry_id = RetryId::new();
/// println!("Scheduling retry: {}", retry_id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RetryId(pub Uuid);

impl RetryId {
    /// Creates a new random retry ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RetryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RetryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RetryId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for RetryId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for RetryId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for RetryId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Identifier of a shipment owned by the surrounding tracking backend.
///
/// Shipment IDs arrive as opaque path segments on the callback URL, so they
/// are kept as strings rather than parsed into UUIDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShipmentId(pub String);

impl ShipmentId {
    /// Creates a shipment ID from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShipmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShipmentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ShipmentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl sqlx::Type<PgDb> for ShipmentId {
    fn type_info() -> PgTypeInfo {
        <String as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for ShipmentId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let id = <String as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(id))
    }
}

impl sqlx::Encode<'_, PgDb> for ShipmentId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Retry record lifecycle status.
///
/// ```text
/// Pending --success--------------------> Succeeded
///    |  \--failure, budget left--> Pending (attempts + 1)
///    \----failure, budget spent / shipment missing--> Exhausted
/// ```
///
/// `Succeeded` and `Exhausted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStatus {
    /// Waiting for `next_retry_at` to elapse.
    Pending,

    /// Replay succeeded. Terminal.
    Succeeded,

    /// Dead-lettered after the retry budget was spent or the shipment
    /// disappeared. Terminal.
    Exhausted,
}

impl RetryStatus {
    /// Returns true for states that accept no further transitions.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Exhausted)
    }

    /// Database representation of the status.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Exhausted => "exhausted",
        }
    }
}

impl fmt::Display for RetryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "succeeded" => Ok(Self::Succeeded),
            "exhausted" => Ok(Self::Exhausted),
            _ => Err(format!("invalid retry status: {s}")),
        }
    }
}

impl sqlx::Type<PgDb> for RetryStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for RetryStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        s.parse().map_err(Into::into)
    }
}

/// A failed provider callback waiting to be replayed.
///
/// Created by callback ingress on a transient failure and mutated only by
/// the retry processor. Records are never deleted here; retention of
/// terminal records is left to operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RetryRecord {
    /// Unique identifier for this record.
    pub id: RetryId,

    /// Shipment the callback refers to.
    pub shipment_id: ShipmentId,

    /// Provider that sent the callback.
    pub provider_slug: String,

    /// Original callback body, replayed verbatim.
    pub payload: serde_json::Value,

    /// Original callback headers, replayed verbatim.
    #[sqlx(json)]
    pub headers: HashMap<String, String>,

    /// Number of failed replays so far.
    pub attempts: i32,

    /// When the record becomes due. Only meaningful while pending.
    pub next_retry_at: Option<DateTime<Utc>>,

    /// Most recent failure description.
    pub last_error: Option<String>,

    /// Current lifecycle status.
    pub status: RetryStatus,

    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl RetryRecord {
    /// Number of failed replays as an unsigned count.
    pub fn attempt_count(&self) -> u32 {
        u32::try_from(self.attempts).unwrap_or(0)
    }

    /// Returns true once `next_retry_at` has elapsed for a pending record.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == RetryStatus::Pending && self.next_retry_at.is_some_and(|at| at <= now)
    }
}

/// Input for enqueuing a failed callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedCallback {
    /// Shipment the callback refers to.
    pub shipment_id: ShipmentId,

    /// Provider that sent the callback.
    pub provider_slug: String,

    /// Callback body.
    pub payload: serde_json::Value,

    /// Callback headers.
    pub headers: HashMap<String, String>,

    /// Why the first attempt failed. Stored as the initial `last_error`.
    pub reason: Option<String>,
}

/// Shipment lifecycle status as tracked by the surrounding backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    /// Registered locally, not yet sent to the provider.
    New,
    /// Accepted by the provider.
    Created,
    /// Label issued.
    LabelReady,
    /// Picked up and moving.
    InTransit,
    /// On the last-mile vehicle.
    OutForDelivery,
    /// Delivered to the receiver.
    Delivered,
    /// Cancelled before delivery.
    Cancelled,
    /// Provider reported a failure.
    Failed,
    /// Returned to sender.
    Returned,
}

impl ShipmentStatus {
    /// Database and wire representation of the status.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Created => "created",
            Self::LabelReady => "label_ready",
            Self::InTransit => "in_transit",
            Self::OutForDelivery => "out_for_delivery",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Returned => "returned",
        }
    }

    /// Statuses reachable in one step from `self`.
    pub const fn next_statuses(self) -> &'static [Self] {
        match self {
            Self::New => &[Self::Created, Self::Cancelled, Self::Failed],
            Self::Created => &[Self::LabelReady, Self::Cancelled, Self::Failed],
            Self::LabelReady => &[Self::InTransit, Self::Cancelled, Self::Failed],
            Self::InTransit => &[Self::OutForDelivery, Self::Delivered, Self::Returned, Self::Failed],
            Self::OutForDelivery => &[Self::Delivered, Self::Returned, Self::Failed],
            Self::Delivered | Self::Cancelled | Self::Failed | Self::Returned => &[],
        }
    }

    /// Returns true if a shipment in `self` may move to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        self.next_statuses().contains(&next)
    }

    /// Returns true for statuses with no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        self.next_statuses().is_empty()
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShipmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "created" => Ok(Self::Created),
            "label_ready" => Ok(Self::LabelReady),
            "in_transit" => Ok(Self::InTransit),
            "out_for_delivery" => Ok(Self::OutForDelivery),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            "failed" => Ok(Self::Failed),
            "returned" => Ok(Self::Returned),
            _ => Err(format!("invalid shipment status: {s}")),
        }
    }
}

impl sqlx::Type<PgDb> for ShipmentStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for ShipmentStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        s.parse().map_err(Into::into)
    }
}

/// Snapshot of a shipment as seen by the callback path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Shipment {
    /// Shipment identifier.
    pub id: ShipmentId,

    /// Slug of the provider handling this shipment.
    pub provider: String,

    /// Current status.
    pub status: ShipmentStatus,

    /// Provider-side identifier, empty until the provider accepts it.
    pub external_id: String,

    /// Tracking number, empty until issued.
    pub tracking_number: String,

    /// When the shipment was created.
    pub created_at: DateTime<Utc>,

    /// When the shipment was last changed.
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_status_round_trips_through_strings() {
        for status in [RetryStatus::Pending, RetryStatus::Succeeded, RetryStatus::Exhausted] {
            assert_eq!(status.to_string().parse::<RetryStatus>().unwrap(), status);
        }
        assert!("dead_letter".parse::<RetryStatus>().is_err());
    }

    #[test]
    fn only_resolved_retry_states_are_terminal() {
        assert!(!RetryStatus::Pending.is_terminal());
        assert!(RetryStatus::Succeeded.is_terminal());
        assert!(RetryStatus::Exhausted.is_terminal());
    }

    #[test]
    fn shipment_transitions_follow_forward_graph() {
        assert!(ShipmentStatus::LabelReady.can_transition_to(ShipmentStatus::InTransit));
        assert!(ShipmentStatus::InTransit.can_transition_to(ShipmentStatus::Delivered));
        assert!(!ShipmentStatus::New.can_transition_to(ShipmentStatus::Delivered));
        assert!(!ShipmentStatus::Delivered.can_transition_to(ShipmentStatus::Returned));
        assert!(ShipmentStatus::Cancelled.is_terminal());
    }

    #[test]
    fn record_is_due_only_while_pending() {
        let now = Utc::now();
        let mut record = RetryRecord {
            id: RetryId::new(),
            shipment_id: ShipmentId::new("s-1"),
            provider_slug: "dummy".to_string(),
            payload: serde_json::json!({"event": "picked_up"}),
            headers: HashMap::new(),
            attempts: 0,
            next_retry_at: Some(now - chrono::Duration::seconds(1)),
            last_error: None,
            status: RetryStatus::Pending,
            created_at: now,
        };
        assert!(record.is_due(now));

        record.status = RetryStatus::Succeeded;
        assert!(!record.is_due(now));

        record.status = RetryStatus::Pending;
        record.next_retry_at = None;
        assert!(!record.is_due(now));
    }
}
