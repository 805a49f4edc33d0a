//! Unique address extraction
//!
//! HDB rows yield `"{block} {street_name}"`, private rows yield
//! `"{project_name} {street_name}"`. Addresses are whitespace-collapsed and
//! upper-cased before deduplication, so the same building spelled with
//! different spacing or case becomes one query.

use crate::models::{AddressRecord, HdbTransaction, PrivateTransaction, PropertyType};
use std::collections::HashMap;

/// How to tag an address that appears in more than one source table
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PropertyTypePolicy {
    /// Keep the type of the first table it appears in (scan order EC, Condo, HDB)
    #[default]
    FirstSeen,
    /// Pick the earliest type in the given order; unlisted types rank last
    Priority(Vec<PropertyType>),
}

/// Collapse runs of whitespace and upper-case
pub fn normalize_address(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

#[derive(Debug, Clone, Default)]
pub struct AddressExtractor {
    policy: PropertyTypePolicy,
}

struct Seen {
    record: AddressRecord,
    sources: [bool; 3],
}

fn private_addresses(rows: &[PrivateTransaction]) -> Vec<String> {
    rows.iter()
        .map(|r| format!("{} {}", r.project_name, r.street_name))
        .collect()
}

fn source_slot(property_type: PropertyType) -> usize {
    match property_type {
        PropertyType::Ec => 0,
        PropertyType::Condo => 1,
        PropertyType::Hdb => 2,
    }
}

impl AddressExtractor {
    pub fn new(policy: PropertyTypePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PropertyTypePolicy {
        &self.policy
    }

    /// One record per unique address, in first-seen order
    pub fn extract(
        &self,
        ec: &[PrivateTransaction],
        condo: &[PrivateTransaction],
        hdb: &[HdbTransaction],
    ) -> Vec<AddressRecord> {
        let mut order: Vec<Seen> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        let sources = [
            (PropertyType::Ec, private_addresses(ec)),
            (PropertyType::Condo, private_addresses(condo)),
            (
                PropertyType::Hdb,
                hdb.iter()
                    .map(|r| format!("{} {}", r.block, r.street_name))
                    .collect(),
            ),
        ];

        let mut skipped = 0usize;
        for (property_type, raw_addresses) in sources {
            for raw in raw_addresses {
                let address = normalize_address(&raw);
                if address.is_empty() {
                    skipped += 1;
                    continue;
                }

                match index.get(&address) {
                    Some(&i) => {
                        let seen = &mut order[i];
                        let slot = source_slot(property_type);
                        if !seen.sources[slot] {
                            seen.sources[slot] = true;
                            seen.record.source_count += 1;
                        }
                        if self.prefers(property_type, seen.record.property_type) {
                            seen.record.property_type = property_type;
                        }
                    }
                    None => {
                        let mut sources = [false; 3];
                        sources[source_slot(property_type)] = true;
                        index.insert(address.clone(), order.len());
                        order.push(Seen {
                            record: AddressRecord {
                                address,
                                property_type,
                                source_count: 1,
                            },
                            sources,
                        });
                    }
                }
            }
        }

        let records: Vec<AddressRecord> = order.into_iter().map(|s| s.record).collect();
        tracing::info!(
            unique = records.len(),
            ec_rows = ec.len(),
            condo_rows = condo.len(),
            hdb_rows = hdb.len(),
            skipped_blank = skipped,
            "Extracted unique addresses"
        );
        records
    }

    /// Whether `candidate` should replace `current` under the policy
    fn prefers(&self, candidate: PropertyType, current: PropertyType) -> bool {
        match &self.policy {
            PropertyTypePolicy::FirstSeen => false,
            PropertyTypePolicy::Priority(order) => {
                let rank = |t: PropertyType| order.iter().position(|&p| p == t).unwrap_or(order.len());
                rank(candidate) < rank(current)
            }
        }
    }
}
