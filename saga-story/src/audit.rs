//! Delta audit: check proposed deltas against the store before commit.
//!
//! Name-keyed character creates are folded into updates, and updates that
//! only carry an unknown name become creates. Deltas that name a missing
//! record, or that touch an already closed plot, reject the whole batch.

use std::collections::{HashMap, HashSet};

use saga_core::error::Result;
use saga_core::{
    CharacterId, DeltaKind, DeltaOp, MemoryDelta, MemoryError, MemoryStore, PlotId, PlotStatus,
};
use tracing::debug;

/// Rewrite and check `deltas` against the current contents of `store`.
///
/// Earlier deltas in the batch are taken into account, so a character
/// created twice is created once and a plot cannot be closed twice.
///
/// # Errors
///
/// `InvalidRecord` for a malformed delta, `CharacterNotFound` or
/// `PlotNotFound` for an explicit unknown id, and `InvalidTransition` for
/// any change to a closed plot.
pub fn audit_deltas(store: &MemoryStore, deltas: Vec<MemoryDelta>) -> Result<Vec<MemoryDelta>> {
    let mut created_names: HashSet<String> = HashSet::new();
    let mut plot_status: HashMap<PlotId, PlotStatus> = HashMap::new();
    let mut audited = Vec::with_capacity(deltas.len());

    for mut delta in deltas {
        delta.validate_shape()?;
        match delta.kind {
            DeltaKind::Character => audit_character(store, &mut delta, &mut created_names)?,
            DeltaKind::Plot => audit_plot(store, &delta, &mut plot_status)?,
        }
        audited.push(delta);
    }
    Ok(audited)
}

fn audit_character(
    store: &MemoryStore,
    delta: &mut MemoryDelta,
    created_names: &mut HashSet<String>,
) -> Result<()> {
    let key = delta
        .fields
        .name
        .as_deref()
        .map(|n| n.trim().to_lowercase())
        .filter(|n| !n.is_empty());

    match (delta.op, delta.id) {
        (DeltaOp::Create, _) => {
            let Some(key) = key else { return Ok(()) };
            if let Some(existing) = store.find_character_by_name(&key) {
                debug!(name = %existing.name, id = existing.id.0, "create folded into update");
                delta.op = DeltaOp::Update;
                delta.id = Some(existing.id.0);
                delta.fields.name = None;
                if delta.fields.state.is_none() {
                    delta.fields.state = delta.fields.description.take();
                }
            } else if !created_names.insert(key) {
                debug!("repeated create in batch folded into update");
                delta.op = DeltaOp::Update;
                delta.id = None;
            }
        }
        (_, Some(id)) => {
            if store.character(CharacterId(id)).is_none() {
                return Err(MemoryError::CharacterNotFound(CharacterId(id)));
            }
        }
        (_, None) => {
            let Some(key) = key else { return Ok(()) };
            if let Some(existing) = store.find_character_by_name(&key) {
                delta.id = Some(existing.id.0);
                delta.fields.name = None;
            } else if created_names.contains(&key) {
                // Resolved by name against the earlier create at apply time.
            } else {
                debug!(name = %key, "update for unknown name becomes a create");
                delta.op = DeltaOp::Create;
                created_names.insert(key);
            }
        }
    }
    Ok(())
}

fn audit_plot(
    store: &MemoryStore,
    delta: &MemoryDelta,
    plot_status: &mut HashMap<PlotId, PlotStatus>,
) -> Result<()> {
    if delta.op == DeltaOp::Create {
        return Ok(());
    }
    let Some(id) = delta.id.map(PlotId) else {
        return Ok(());
    };
    let current = match plot_status.get(&id) {
        Some(status) => *status,
        None => store.plot(id).ok_or(MemoryError::PlotNotFound(id))?.status,
    };
    let target = delta.target_status().unwrap_or(current);
    if current.is_closed() {
        return Err(MemoryError::InvalidTransition {
            plot: id,
            from: current,
            to: target,
        });
    }
    plot_status.insert(id, target);
    Ok(())
}
