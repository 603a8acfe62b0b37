pub mod audit_log;
pub mod presence;

pub use audit_log::{AuditLogService, AuditLogServiceTrait};
pub use presence::{PresenceService, RequestMeta};
