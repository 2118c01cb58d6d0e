//! Swapping two visible entries inside the full order list

/// Apply a swap of visible rows `from` and `to` to the full order
///
/// `visible` is the filtered projection currently on screen. When it is the
/// whole list (`unfiltered`), indices map one-to-one and the full order is
/// swapped in place. Otherwise both GUIDs are located in `full` by value and
/// only those two slots trade places, so every entry outside the projection
/// keeps its absolute position.
///
/// Returns `None` if an index is out of range or a visible GUID is missing
/// from `full`.
pub fn swap_in_full_order(
    full: &[String],
    visible: &[String],
    from: usize,
    to: usize,
    unfiltered: bool,
) -> Option<Vec<String>> {
    let mut order = full.to_vec();

    if unfiltered {
        if from >= order.len() || to >= order.len() {
            return None;
        }
        order.swap(from, to);
        return Some(order);
    }

    let from_guid = visible.get(from)?;
    let to_guid = visible.get(to)?;
    let from_full = order.iter().position(|g| g == from_guid)?;
    let to_full = order.iter().position(|g| g == to_guid)?;
    order.swap(from_full, to_full);
    Some(order)
}
