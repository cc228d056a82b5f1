//! Consul health API response shapes and their mapping to domain records.
//!
//! Only the fields the adapter reads are modelled; Consul sends many more.

use std::collections::HashMap;

use discovery::{InstanceId, Node, ServiceName, ServiceRecord, PORT_METADATA_KEY};
use serde::Deserialize;

/// One element of `GET /v1/health/service/:service`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct HealthEntry {
    pub node: CatalogNode,
    pub service: AgentService,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct CatalogNode {
    #[serde(default)]
    pub node: String,
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct AgentService {
    #[serde(rename = "ID")]
    pub id: String,
    pub service: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub meta: Option<HashMap<String, String>>,
}

impl HealthEntry {
    fn into_node(self) -> Option<(ServiceName, Node)> {
        let service = ServiceName::new(self.service.service)?;
        let id = InstanceId::new(self.service.id)
            .or_else(|| InstanceId::new(self.node.node))?;

        // An empty service address means "same as the node".
        let address = if self.service.address.is_empty() {
            self.node.address
        } else {
            self.service.address
        };

        let mut node = Node::new(id, address);
        node.metadata.extend(self.service.meta.unwrap_or_default());
        if self.service.port != 0 {
            node.metadata
                .entry(PORT_METADATA_KEY.to_owned())
                .or_insert_with(|| self.service.port.to_string());
        }
        Some((service, node))
    }
}

/// Group health entries into one record per service name, in first-seen order.
///
/// Entries without a service name or instance id are skipped.
pub(crate) fn into_records(entries: Vec<HealthEntry>) -> Vec<ServiceRecord> {
    let mut records: Vec<ServiceRecord> = Vec::new();
    for (service, node) in entries.into_iter().filter_map(HealthEntry::into_node) {
        match records.iter_mut().find(|r| r.name == service) {
            Some(record) => record.nodes.push(node),
            None => records.push(ServiceRecord::new(service, vec![node])),
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_INSTANCES: &str = r#"[
        {
            "Node": { "Node": "node-a", "Address": "10.0.0.1" },
            "Service": {
                "ID": "orders-1",
                "Service": "orders",
                "Address": "10.0.0.5",
                "Port": 9090,
                "Meta": { "version": "1.2.0" }
            },
            "Checks": []
        },
        {
            "Node": { "Node": "node-b", "Address": "10.0.0.2" },
            "Service": {
                "ID": "orders-2",
                "Service": "orders",
                "Address": "",
                "Port": 9091,
                "Meta": null
            },
            "Checks": []
        }
    ]"#;

    #[test]
    fn entries_group_into_one_record() {
        let entries: Vec<HealthEntry> = serde_json::from_str(TWO_INSTANCES).unwrap();
        let records = into_records(entries);

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.name.as_str(), "orders");
        assert_eq!(record.nodes.len(), 2);

        let first = &record.nodes[0];
        assert_eq!(first.id.as_str(), "orders-1");
        assert_eq!(first.address, "10.0.0.5");
        assert_eq!(first.port(), Some(9090));
        assert_eq!(first.metadata.get("version").map(String::as_str), Some("1.2.0"));
    }

    #[test]
    fn empty_service_address_falls_back_to_node_address() {
        let entries: Vec<HealthEntry> = serde_json::from_str(TWO_INSTANCES).unwrap();
        let records = into_records(entries);

        let second = &records[0].nodes[1];
        assert_eq!(second.address, "10.0.0.2");
        assert_eq!(second.port(), Some(9091));
    }

    #[test]
    fn explicit_port_metadata_wins() {
        let json = r#"[{
            "Node": { "Node": "node-a", "Address": "10.0.0.1" },
            "Service": { "ID": "orders-1", "Service": "orders", "Port": 8080, "Meta": { "port": "9090" } }
        }]"#;
        let records = into_records(serde_json::from_str(json).unwrap());
        assert_eq!(records[0].nodes[0].port(), Some(9090));
    }

    #[test]
    fn zero_port_is_not_advertised() {
        let json = r#"[{
            "Node": { "Node": "node-a", "Address": "10.0.0.1" },
            "Service": { "ID": "orders-1", "Service": "orders" }
        }]"#;
        let records = into_records(serde_json::from_str(json).unwrap());
        assert_eq!(records[0].nodes[0].port(), None);
    }
}
