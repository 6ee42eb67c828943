use std::collections::HashMap;

use corelib::{MarketplaceTag, NormalizedEventKind};

/// Per-marketplace `event type string` ⇒ [`NormalizedEventKind`] mapping
/// (§4.7 `normalize`). Each marketplace names its webhook events
/// differently; this table is the only place that knowledge lives.
#[derive(Clone, Debug, Default)]
pub struct EventKindTable {
    kinds: HashMap<(MarketplaceTag, String), NormalizedEventKind>,
}

impl EventKindTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, marketplace: impl Into<String>, event_type: impl Into<String>, kind: NormalizedEventKind) {
        self.kinds.insert((marketplace.into(), event_type.into().to_lowercase()), kind);
    }

    fn lookup(&self, marketplace: &str, event_type: &str) -> Option<NormalizedEventKind> {
        self.kinds.get(&(marketplace.to_string(), event_type.to_lowercase())).copied()
    }
}

/// Result of normalizing one webhook payload: the classified kind plus the
/// identifiers needed to route it onward (dedup key, and — for sales — the
/// listing that sold).
#[derive(Clone, Debug)]
pub struct NormalizedEvent {
    pub external_event_id: String,
    pub kind: Option<NormalizedEventKind>,
    pub listing_external_id: Option<String>,
}

/// Classifies a raw payload using the marketplace's registered event-type
/// strings, falling back to sniffing common field names when the
/// marketplace has no explicit mapping for the observed type.
pub fn normalize(marketplace: &str, table: &EventKindTable, raw: &serde_json::Value) -> NormalizedEvent {
    let event_type = raw
        .get("type")
        .or_else(|| raw.get("event"))
        .or_else(|| raw.get("event_type"))
        .and_then(|v| v.as_str())
        .unwrap_or_default();

    let kind = table.lookup(marketplace, event_type).or_else(|| sniff_kind(event_type));

    let external_event_id = raw
        .get("id")
        .or_else(|| raw.get("event_id"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let listing_external_id = raw
        .get("listing_id")
        .or_else(|| raw.get("item_id"))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    NormalizedEvent { external_event_id, kind, listing_external_id }
}

fn sniff_kind(event_type: &str) -> Option<NormalizedEventKind> {
    let lower = event_type.to_lowercase();
    if lower.contains("sale") || lower.contains("sold") || lower.contains("order") {
        Some(NormalizedEventKind::SaleCompleted)
    } else if lower.contains("end") || lower.contains("expire") || lower.contains("remove") {
        Some(NormalizedEventKind::ListingEnded)
    } else if lower.contains("inventory") || lower.contains("stock") || lower.contains("quantity") {
        Some(NormalizedEventKind::InventoryUpdated)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registered_marketplace_event_type_wins_over_sniffing() {
        let mut table = EventKindTable::new();
        table.register("poshmark", "order_closed", NormalizedEventKind::SaleCompleted);

        let raw = json!({"type": "order_closed", "id": "evt-1", "listing_id": "item-1"});
        let event = normalize("poshmark", &table, &raw);

        assert_eq!(event.kind, Some(NormalizedEventKind::SaleCompleted));
        assert_eq!(event.external_event_id, "evt-1");
        assert_eq!(event.listing_external_id.as_deref(), Some("item-1"));
    }

    #[test]
    fn unregistered_marketplace_falls_back_to_sniffing() {
        let table = EventKindTable::new();
        let raw = json!({"type": "ItemSoldEvent", "event_id": "evt-2"});
        let event = normalize("mercari", &table, &raw);
        assert_eq!(event.kind, Some(NormalizedEventKind::SaleCompleted));
    }

    #[test]
    fn unrecognized_event_type_yields_no_kind() {
        let table = EventKindTable::new();
        let raw = json!({"type": "something_unknown"});
        let event = normalize("mercari", &table, &raw);
        assert_eq!(event.kind, None);
    }
}
