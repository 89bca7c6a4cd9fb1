//! Default protocol parameters.

use std::time::Duration;

/// Stake required to generate a single ticket.
pub const MINIMUM_STAKE: u128 = 20;

/// [MINIMUM_STAKE] as a command line default.
pub const MINIMUM_STAKE_ARG: &str = "20";

/// Number of blocks tickets may be submitted for after a round starts.
pub const DEFAULT_TICKET_REACTIVE_SUBMISSION_TIMEOUT: u64 = 6;

/// [DEFAULT_TICKET_REACTIVE_SUBMISSION_TIMEOUT] as a command line default.
pub const DEFAULT_TICKET_REACTIVE_SUBMISSION_TIMEOUT_ARG: &str = "6";

/// Number of blocks between the end of ticket submission (or the start of a test run) and the
/// first DKG message.
///
/// Members subscribe to the broadcast channel during this window. Messages sent before a member
/// subscribes are never delivered to it.
pub const DEFAULT_LEAD_BUFFER: u64 = 3;

/// How long to wait for a DKG result to be published once all members have finished.
pub const DEFAULT_RESULT_PUBLICATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between blocks produced by the local chain.
pub const DEFAULT_BLOCK_TIME: Duration = Duration::from_millis(500);
