use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================================
// Domain Models
// ============================================================================

/// Lifecycle status of a loyalty order as stored in the accruals table.
///
/// `Processed` and `Invalid` are terminal: the scheduler never fetches an
/// order again once it carries one of them.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    New,
    Processing,
    Processed,
    Invalid,
    Unknown,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Processed => "PROCESSED",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Unknown => "UNKNOWN",
        }
    }

    /// Decode a status column value. Anything unrecognized becomes `Unknown`
    /// rather than failing the whole poll cycle; the forwarding rule treats
    /// `Unknown` as "do not touch".
    pub fn from_db(s: &str) -> Self {
        match s {
            "NEW" => OrderStatus::New,
            "PROCESSING" => OrderStatus::Processing,
            "PROCESSED" => OrderStatus::Processed,
            "INVALID" => OrderStatus::Invalid,
            _ => OrderStatus::Unknown,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Processed | OrderStatus::Invalid)
    }
}

/// An order as the scheduler sees it: the Luhn-valid number and the status it
/// had when fetched.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Order {
    pub number: i64,
    pub status: OrderStatus,
}

/// A status transition produced by one oracle query, on its way to storage.
/// The amount is only meaningful for `Processed`; every other status carries
/// zero.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderAccrual {
    pub number: i64,
    pub status: OrderStatus,
    pub accrual: Decimal,
}

// ============================================================================
// Oracle wire vocabulary
// ============================================================================

/// Status values the accrual oracle reports. A separate enum from
/// `OrderStatus`: the oracle has no notion of NEW or UNKNOWN, and REGISTERED
/// does not exist on our side.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccrualStatus {
    Registered,
    Processing,
    Invalid,
    Processed,
}

impl From<AccrualStatus> for OrderStatus {
    fn from(status: AccrualStatus) -> Self {
        match status {
            // REGISTERED means the oracle has accepted the order but not
            // finished with it; on our side that is simply "in progress".
            AccrualStatus::Registered => OrderStatus::Processing,
            AccrualStatus::Processing => OrderStatus::Processing,
            AccrualStatus::Invalid => OrderStatus::Invalid,
            AccrualStatus::Processed => OrderStatus::Processed,
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
