pub mod audit;
pub mod equipment;
pub mod keys;
pub mod privacy;
pub mod timestamp;

pub use audit::{AuditEntry, AuditEvent, AuditOutcome, AuditQuery};
pub use equipment::{
    CalibrationRecord, CalibrationStatus, Equipment, EquipmentKind, EquipmentStatus, NewEquipment,
};
pub use keys::{EncryptedField, KeyMetadata};
pub use privacy::{ConsentRecord, ConsentState, DataExport, ErasureReceipt, NewUser, User};
