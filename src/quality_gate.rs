//! Status/quality gate (C4).
//!
//! Runs only on validated rows. If `record_status` is present anywhere in
//! the batch schema, only `SUCCESS` rows proceed; other values are bucketed
//! by known failure code, with anything unrecognized falling into
//! `UNKNOWN_STATUS`. `partial_record == true` never causes rejection.

use crate::model::RejectionReason;
use crate::validate::ValidatedRow;

pub enum GateOutcome {
    Accepted(ValidatedRow),
    Rejected(RejectionReason),
}

pub fn apply(row: ValidatedRow) -> GateOutcome {
    match row.record_status.as_deref() {
        None => GateOutcome::Accepted(row),
        Some(status) => match status.trim().to_ascii_uppercase().as_str() {
            "SUCCESS" => GateOutcome::Accepted(row),
            "FAILED_INSUFFICIENT_FUNDS" => {
                GateOutcome::Rejected(RejectionReason::FailedInsufficientFunds)
            }
            "FAILED_TIMEOUT" => GateOutcome::Rejected(RejectionReason::FailedTimeout),
            "FAILED_NETWORK" => GateOutcome::Rejected(RejectionReason::FailedNetwork),
            "INVALID_TOKEN" => GateOutcome::Rejected(RejectionReason::InvalidToken),
            _ => GateOutcome::Rejected(RejectionReason::UnknownStatus),
        },
    }
}
