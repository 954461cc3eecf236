//! Turns declarative scenario reactions into runtime handlers.

use std::rc::Rc;

use bot_entity::{BotId, BotSpec, TagValue};
use bot_protocol::Action;
use bot_runtime::{
    Callback, Handler, Invocation, Outcome, Runtime, RuntimeError, ScriptError, TaskOptions,
    TaskResult,
};

use crate::scenario::{BotDef, Reaction};

/// Build a handler that runs `reactions` in order against the listening bot.
#[must_use]
pub fn handler(reactions: Vec<Reaction>) -> Handler {
    let reactions: Rc<[Reaction]> = reactions.into();
    Handler::returning(move |rt, inv| run(rt, inv, &reactions))
}

/// Create every bot in the scenario, then attach their dynamic listeners.
pub fn spawn(rt: &mut Runtime, bots: &[BotDef]) -> Result<Vec<BotId>, RuntimeError> {
    let mut ids = Vec::with_capacity(bots.len());
    for def in bots {
        let spec = BotSpec {
            id: def.id.clone(),
            space: def.space.clone(),
            tags: def.tags.clone(),
            listeners: def
                .listeners
                .iter()
                .map(|(name, reactions)| (name.clone(), handler(reactions.clone())))
                .collect(),
        };
        ids.push(rt.create_bot(spec)?);
    }
    for (def, id) in bots.iter().zip(&ids) {
        for (name, reactions) in &def.dynamic_listeners {
            rt.add_listener(id, name, handler(reactions.clone()))?;
        }
    }
    Ok(ids)
}

fn run(
    rt: &mut Runtime,
    inv: &Invocation,
    reactions: &[Reaction],
) -> Result<Option<TagValue>, ScriptError> {
    let me = &inv.bot;
    for reaction in reactions {
        match reaction {
            Reaction::SetTag { tag, value, space } => match space {
                Some(space) => rt.set_tag_mask(me, tag, value.clone(), space)?,
                None => rt.set_tag(me, tag, value.clone())?,
            },
            Reaction::Shout { name, arg } => {
                rt.shout(name, arg.clone())?;
            }
            Reaction::Whisper { bots, name, arg } => {
                rt.whisper(bots, name, arg.clone())?;
            }
            Reaction::Action { kind, payload } => {
                rt.enqueue_action(Action::new(kind.clone(), payload.clone()));
            }
            Reaction::Call {
                kind,
                payload,
                retry,
                reply,
            } => {
                let handle = match retry {
                    Some(policy) => rt.call_with_retry(kind, payload.clone(), policy.clone())?,
                    None => rt.call_async(kind, payload.clone(), TaskOptions::default()),
                };
                if let Some(reply) = reply {
                    let bot = me.clone();
                    let reply = reply.clone();
                    rt.on_settled(&handle, move |rt, result| {
                        rt.whisper(&[bot], &reply, reply_arg(result))?;
                        Ok(())
                    })?;
                }
            }
            Reaction::Animate { tag, options } => {
                rt.animate(std::slice::from_ref(me), tag.as_str(), Some(options.clone()))?;
            }
            Reaction::Timeout { delay_ms, name } => {
                let bot = me.clone();
                let name = name.clone();
                rt.set_timeout(
                    Some(me),
                    *delay_ms,
                    Callback::new(move |rt, _| {
                        rt.whisper(std::slice::from_ref(&bot), &name, TagValue::Null)?;
                        Ok(Outcome::undefined())
                    }),
                )?;
            }
            Reaction::Destroy { bot } => {
                rt.destroy_bot(bot.as_ref().unwrap_or(me));
            }
            Reaction::Throw(message) => return Err(ScriptError::thrown(message.clone())),
            Reaction::Return(value) => return Ok(Some(value.clone())),
        }
    }
    Ok(None)
}

fn reply_arg(result: TaskResult) -> TagValue {
    match result {
        Ok(value) => TagValue::from(value),
        Err(error) => TagValue::object([("error", TagValue::from(error.message))]),
    }
}
