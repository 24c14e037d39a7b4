use crate::internal::record::{
    ATTR_DEDICATED_SCHEDULER, ATTR_NAME, ATTR_OWNER_ADDRESS, ATTR_SCHEDULING_GROUP, Record,
};
use crate::internal::server::pool::ResList;
use crate::internal::server::resource::ResourceRecord;
use std::rc::Rc;

pub fn owner_addr(name: &str) -> String {
    format!("owner-of-{name}:9618")
}

pub fn resource_record(name: &str) -> Record {
    let mut record = Record::default();
    record.assign(ATTR_NAME, name);
    record.assign(ATTR_OWNER_ADDRESS, owner_addr(name).as_str());
    record.assign(ATTR_DEDICATED_SCHEDULER, "gangsched");
    record
}

pub fn resource(name: &str) -> ResourceRecord {
    ResourceRecord::from_record(resource_record(name)).unwrap()
}

pub fn resource_in_group(name: &str, group: &str) -> ResourceRecord {
    let mut record = resource_record(name);
    record.assign(ATTR_SCHEDULING_GROUP, group);
    ResourceRecord::from_record(record).unwrap()
}

pub fn resource_with_attr(name: &str, attrs: &[(&str, i64)]) -> ResourceRecord {
    let mut record = resource_record(name);
    for (attr, value) in attrs {
        record.assign(attr, *value);
    }
    ResourceRecord::from_record(record).unwrap()
}

pub fn res_list(resources: Vec<ResourceRecord>) -> ResList {
    resources.into_iter().map(Rc::new).collect()
}
