//! Bot lifecycle hooks for the host's entity factory.

use bot_entity::BotId;

/// Notified when the runtime registers or removes a bot.
///
/// Both methods default to no-ops.
pub trait BotHooks {
    fn on_created(&mut self, _id: &BotId) {}

    /// Called once per bot removed by a destroy cascade, in destruction
    /// order.
    fn on_destroyed(&mut self, _id: &BotId) {}
}
