//! Action denormalization: `raw * std + mean`, elementwise.

use armloop_types::{Action, ArmError, PolicyStatistics};

/// Map one normalized policy output row back into physical units.
///
/// # Errors
///
/// Returns [`ArmError::Configuration`] when `raw` or either statistics
/// vector does not have the action dimension.  That only happens with
/// statistics that do not belong to the checkpoint, so it is fatal.
pub fn denormalize(raw: &[f32], stats: &PolicyStatistics) -> Result<Action, ArmError> {
    stats.validate()?;
    let mut action = Action::from_slice(raw)?;
    for ((v, mean), std) in action
        .0
        .iter_mut()
        .zip(&stats.action_mean)
        .zip(&stats.action_std)
    {
        *v = *v * std + mean;
    }
    Ok(action)
}
