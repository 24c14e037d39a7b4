use crate::internal::record::{ATTR_NAME, ATTR_OWNER_ADDRESS, ATTR_SCHEDULING_GROUP, Record};
use serde::{Deserialize, Serialize};

/// Descriptor of one remote resource (machine slot), as advertised in the
/// matchmaker snapshot. The full record stays around because requirement and
/// rank expressions evaluate against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub name: String,
    pub owner_addr: String,
    pub group: Option<String>,
    pub record: Record,
}

impl ResourceRecord {
    pub fn from_record(record: Record) -> crate::Result<ResourceRecord> {
        let name = record
            .lookup_str(ATTR_NAME)
            .ok_or_else(|| format!("Resource record without {ATTR_NAME}"))?;
        let owner_addr = record
            .lookup_str(ATTR_OWNER_ADDRESS)
            .ok_or_else(|| format!("Resource {name} without {ATTR_OWNER_ADDRESS}"))?;
        let group = record.lookup_str(ATTR_SCHEDULING_GROUP);
        Ok(ResourceRecord {
            name,
            owner_addr,
            group,
            record,
        })
    }
}
