//! Core data model.
//!
//! An outbox record is a durable method invocation: which service, which
//! method, which typed arguments, plus the lock/status metadata the relay
//! uses to claim and resolve it.

use crate::codec::{self, EncodedParams, Params};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Outbox Record
// ---------------------------------------------------------------------------

/// The durable unit of work written by a producer and executed by the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxRecord {
    /// Unique identifier, assigned at creation.
    pub id: RecordId,

    /// Registered name of the service that owns the method.
    pub target_type: String,

    /// Method to invoke on the target.
    pub method_name: String,

    /// Framed list of parameter type identifiers.
    pub param_types: String,

    /// Framed list of JSON-serialized arguments.
    pub param_values: String,

    /// Worker currently (or last) owning this record. None = never claimed,
    /// or released by housekeeping.
    pub lock_id: Option<LockId>,

    pub status: Status,

    /// Populated only when `status` is `Fail`.
    pub error_message: Option<String>,

    /// Number of successful claims so far.
    pub attempts: u32,

    pub created_date: DateTime<Utc>,
    pub modified_date: DateTime<Utc>,
}

impl OutboxRecord {
    /// Build a fresh pending record for an invocation.
    pub fn new(invocation: Invocation) -> Self {
        let now = Utc::now();
        Self {
            id: RecordId::new(),
            target_type: invocation.target_type,
            method_name: invocation.method_name,
            param_types: invocation.params.param_types,
            param_values: invocation.params.param_values,
            lock_id: None,
            status: Status::Pending,
            error_message: None,
            attempts: 0,
            created_date: now,
            modified_date: now,
        }
    }

    /// Reconstruct the method key needed to look up a handler.
    ///
    /// Fails with [`Error::TypeResolution`] if any stored type identifier is
    /// unknown to this process, e.g. after a type was renamed.
    pub fn describe_method(&self, types: &impl TypeResolver) -> Result<MethodKey> {
        let param_types = codec::decode_types(&self.param_types)?;
        if let Some(unknown) = param_types.iter().find(|ty| !types.resolves_type(ty)) {
            return Err(Error::TypeResolution(format!(
                "{unknown} (parameter of {}::{})",
                self.target_type, self.method_name
            )));
        }
        Ok(MethodKey {
            target_type: self.target_type.clone(),
            method_name: self.method_name.clone(),
            param_types,
        })
    }

    /// Decode the stored arguments against the resolved parameter types.
    pub fn materialize_arguments(&self, resolved: &[String]) -> Result<Vec<serde_json::Value>> {
        codec::decode(&self.param_types, &self.param_values, resolved)
    }
}

/// Answers whether a type identifier names a type this process can decode.
pub trait TypeResolver {
    fn resolves_type(&self, type_name: &str) -> bool;
}

/// Newtype for outbox record IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 chars of the UUID, for operator listings.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque token identifying the worker that owns a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockId(String);

impl LockId {
    /// A random token, unique per worker instance.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LockId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for LockId {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for LockId {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl std::fmt::Display for LockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of an outbox record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Written by a producer, not yet claimed.
    Pending,
    /// Claimed by a worker, invocation in progress.
    Locked,
    /// Invocation returned normally. Terminal.
    Success,
    /// Decode, resolution or invocation failed. Terminal until re-armed.
    Fail,
}

impl Status {
    /// Stored column value. Pending is the absence of a value.
    pub fn ordinal(self) -> Option<i16> {
        match self {
            Status::Pending => None,
            Status::Locked => Some(0),
            Status::Success => Some(1),
            Status::Fail => Some(2),
        }
    }

    pub fn from_ordinal(ordinal: Option<i16>) -> Result<Self> {
        match ordinal {
            None => Ok(Status::Pending),
            Some(0) => Ok(Status::Locked),
            Some(1) => Ok(Status::Success),
            Some(2) => Ok(Status::Fail),
            Some(n) => Err(Error::MalformedRecord(format!("unknown status ordinal {n}"))),
        }
    }

    /// Is this a terminal status?
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Success | Status::Fail)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Pending => "pending",
            Status::Locked => "locked",
            Status::Success => "success",
            Status::Fail => "fail",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Status::Pending),
            "locked" => Ok(Status::Locked),
            "success" => Ok(Status::Success),
            "fail" | "failed" => Ok(Status::Fail),
            other => Err(Error::Other(format!("unknown status: {other}"))),
        }
    }
}

/// Terminal outcome the relay writes back for a claimed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Success,
    Fail(String),
}

impl Resolution {
    pub fn status(&self) -> Status {
        match self {
            Resolution::Success => Status::Success,
            Resolution::Fail(_) => Status::Fail,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Resolution::Success => None,
            Resolution::Fail(message) => Some(message),
        }
    }
}

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// An encoded method call, ready to be persisted. The producer's API for
/// enqueuing work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub(crate) target_type: String,
    pub(crate) method_name: String,
    pub(crate) params: EncodedParams,
}

impl Invocation {
    /// Encode a call to `target_type::method_name` with typed arguments.
    ///
    /// Fails with [`Error::UnsupportedArgument`] if an argument cannot be
    /// serialized.
    pub fn new<P: Params>(target_type: &str, method_name: &str, args: P) -> Result<Self> {
        Ok(Self {
            target_type: target_type.to_string(),
            method_name: method_name.to_string(),
            params: codec::encode(&args)?,
        })
    }

    pub fn target_type(&self) -> &str {
        &self.target_type
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn params(&self) -> &EncodedParams {
        &self.params
    }
}

/// Durable reference to a callable: target, method and parameter types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub target_type: String,
    pub method_name: String,
    pub param_types: Vec<String>,
}

impl MethodKey {
    pub fn new(target_type: &str, method_name: &str, param_types: Vec<String>) -> Self {
        Self {
            target_type: target_type.to_string(),
            method_name: method_name.to_string(),
            param_types,
        }
    }
}

impl std::fmt::Display for MethodKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}::{}({})",
            self.target_type,
            self.method_name,
            self.param_types.join(", ")
        )
    }
}
