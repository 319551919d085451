//! Collection instance management.
//!
//! Adding or removing an instance changes the tree shape first, then calls
//! the [`InstanceHook`]. A failing hook reverts the shape so the tree
//! never shows an instance the backend does not know about. Bounds are
//! soft: at `max` an add does nothing, at `min` a remove does nothing.

use crate::error::{EditError, EditResult};
use crate::invoker::InstanceHook;
use crate::state::{SharedState, lock};
use formtree_model::{Address, AddressPrefix, CollectionSectionItem, Instance};
use formtree_types::InstanceId;
use tracing::{debug, info, warn};

/// Appends a fresh instance unless the collection is full.
pub fn try_add(collection: &mut CollectionSectionItem) -> Option<InstanceId> {
    if !collection.collection_rules.can_add(collection.instances.len()) {
        return None;
    }
    let id = collection.next_instance_id();
    let instance = collection.instantiate(id);
    collection.instances.push(instance);
    Some(id)
}

/// Removes an instance unless the collection is at its minimum. Returns
/// the instance and its 0-based position.
pub fn try_remove(
    collection: &mut CollectionSectionItem,
    id: InstanceId,
) -> EditResult<Option<(usize, Instance)>> {
    let position = collection
        .position_of(id)
        .ok_or_else(|| EditError::UnknownInstance {
            scope: collection.path.clone(),
            instance: id.get(),
        })?;
    if !collection.collection_rules.can_remove(collection.instances.len()) {
        return Ok(None);
    }
    Ok(Some((position, collection.instances.remove(position))))
}

/// Moves the instance at `from` to `to` (0-based). Ids do not change.
pub fn reorder(collection: &mut CollectionSectionItem, from: usize, to: usize) -> EditResult<()> {
    let len = collection.instances.len();
    if from >= len || to >= len {
        return Err(EditError::InvalidReorder { from, to, len });
    }
    let instance = collection.instances.remove(from);
    collection.instances.insert(to, instance);
    Ok(())
}

fn collection_mut<'a>(
    tree: &'a mut formtree_model::ContentTree,
    scope: &str,
) -> EditResult<&'a mut CollectionSectionItem> {
    tree.find_collection_mut(scope)
        .ok_or_else(|| EditError::UnknownCollection(scope.to_string()))
}

/// Adds an instance and persists it through the hook.
pub(crate) async fn add_instance(
    state: &SharedState,
    hook: &dyn InstanceHook,
    scope: &str,
) -> EditResult<Option<InstanceId>> {
    let (node_id, id) = {
        let mut st = lock(state)?;
        let node_id = st.node_id;
        let Some(id) = try_add(collection_mut(&mut st.tree, scope)?) else {
            debug!(scope, "collection full; add ignored");
            return Ok(None);
        };
        st.rebuild_map();
        (node_id, id)
    };

    if let Err(reason) = hook.instance_added(node_id, scope, id).await {
        let mut st = lock(state)?;
        revert_add(&mut st.tree, scope, id);
        st.rebuild_map();
        warn!(scope, instance = %id, "instance add reverted: {reason}");
        return Err(EditError::InstanceHook(reason));
    }
    info!(scope, instance = %id, "instance added");
    Ok(Some(id))
}

fn revert_add(tree: &mut formtree_model::ContentTree, scope: &str, id: InstanceId) {
    if let Some(collection) = tree.find_collection_mut(scope) {
        collection.instances.retain(|i| i.instance_id != id);
    }
}

/// Removes an instance, persists the removal and drops its drafts.
/// Returns the addresses that were torn down, or `None` at the minimum.
pub(crate) async fn remove_instance(
    state: &SharedState,
    hook: &dyn InstanceHook,
    scope: &str,
    id: InstanceId,
) -> EditResult<Option<Vec<Address>>> {
    let (node_id, position, removed) = {
        let mut st = lock(state)?;
        let node_id = st.node_id;
        let Some((position, removed)) = try_remove(collection_mut(&mut st.tree, scope)?, id)? else {
            debug!(scope, instance = %id, "collection at minimum; remove ignored");
            return Ok(None);
        };
        st.rebuild_map();
        (node_id, position, removed)
    };

    if let Err(reason) = hook
        .instance_removed(node_id, scope, id, position + 1)
        .await
    {
        let mut st = lock(state)?;
        if let Some(collection) = st.tree.find_collection_mut(scope) {
            let at = position.min(collection.instances.len());
            collection.instances.insert(at, removed);
        }
        st.rebuild_map();
        warn!(scope, instance = %id, "instance removal reverted: {reason}");
        return Err(EditError::InstanceHook(reason));
    }

    let mut st = lock(state)?;
    let prefix = AddressPrefix::instance(&st.path, scope, id)?;
    let torn_down = st.drafts.remove_scope(&prefix);
    st.validation.content_changed(&torn_down);
    info!(scope, instance = %id, drafts = torn_down.len(), "instance removed");
    Ok(Some(torn_down))
}

/// Reorders instances in the tree. Display order only; nothing is
/// persisted.
pub(crate) fn reorder_instance(
    state: &SharedState,
    scope: &str,
    from: usize,
    to: usize,
) -> EditResult<()> {
    let mut st = lock(state)?;
    reorder(collection_mut(&mut st.tree, scope)?, from, to)?;
    st.rebuild_map();
    Ok(())
}
