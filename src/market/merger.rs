use crate::market::types::{Tick, TickKey};
use std::collections::BTreeMap;

pub fn merge(history: &[Tick], incremental: &[Tick]) -> Vec<Tick> {
    let mut by_key: BTreeMap<TickKey, Tick> = BTreeMap::new();
    for tick in history.iter().chain(incremental) {
        by_key.insert(tick.key(), tick.clone());
    }
    by_key.into_values().collect()
}
