// ==============
// crates/backend-lib/src/metrics.rs

//! Central place for metric keys
pub const SOS_TRIGGERED: &str = "sos.triggered";
pub const SOS_DUPLICATE: &str = "sos.duplicate";
pub const SOS_RECOGNISED: &str = "sos.recognised";
pub const SOS_RESOLVED: &str = "sos.resolved";
pub const SOS_CANCELLED: &str = "sos.cancelled";
pub const SOS_TOKEN_REJECTED: &str = "sos.token_rejected";
pub const WALK_STARTED: &str = "walk.started";
pub const WALK_ESCALATED: &str = "walk.escalated";
pub const WALK_OFF_ROUTE: &str = "walk.off_route";
pub const NOTIFY_SENT: &str = "notify.sent";
pub const WS_ACTIVE: &str = "ws.active";
