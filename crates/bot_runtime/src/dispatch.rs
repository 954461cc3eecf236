//! Listener dispatch: shout, whisper and priority shout.
//!
//! A dispatch call with at least one eligible listener costs one unit of
//! energy, however many bots respond. Listeners run in registration order
//! (caller order for whisper); each bot's static listener runs before its
//! dynamic ones. A listener that throws is recorded in the error queue and
//! its siblings still run. Energy exhaustion unwinds the whole chain.
//!
//! Only static listeners contribute return values. Dynamic listeners run for
//! effect.

use bot_entity::{BotId, BotLink, TagValue};
use tracing::{debug, trace};

use crate::error::{RuntimeError, ScriptError};
use crate::handler::{Handler, Invocation};
use crate::runtime::Runtime;

/// Sent to each bot that ran a listener without error, after a dispatch.
pub const ON_LISTEN: &str = "onListen";

/// Sent to every listening bot after a dispatch.
pub const ON_ANY_LISTEN: &str = "onAnyListen";

/// The result of running one bot's listeners for an event.
struct BotRun {
    /// Return value of the static listener, if one ran and succeeded.
    response: Option<Option<TagValue>>,
    errored: bool,
}

impl Runtime {
    /// Send an event to every listening bot. Returns the static listeners'
    /// results in registration order; `None` entries are "undefined".
    pub fn shout(&mut self, name: &str, arg: TagValue) -> Result<Vec<Option<TagValue>>, RuntimeError> {
        validate_name(name)?;
        let targets = self.listening_bots();
        self.dispatch(targets, name, arg)
    }

    /// Like [`shout`](Self::shout), restricted to `ids` in the given order.
    /// Unknown ids are skipped and duplicates keep their first position.
    pub fn whisper(
        &mut self,
        ids: &[BotId],
        name: &str,
        arg: TagValue,
    ) -> Result<Vec<Option<TagValue>>, RuntimeError> {
        validate_name(name)?;
        let mut targets: Vec<BotId> = Vec::with_capacity(ids.len());
        for id in ids {
            if !targets.contains(id) && self.is_listening(id) {
                targets.push(id.clone());
            }
        }
        self.dispatch(targets, name, arg)
    }

    /// Try each event name in order and return the first static listener
    /// result that is not "undefined". An explicit null counts as a result.
    ///
    /// Costs one unit of energy, charged at the first name with eligible
    /// listeners.
    pub fn priority_shout(&mut self, names: &[&str], arg: TagValue) -> Result<Option<TagValue>, RuntimeError> {
        if names.is_empty() {
            return Err(RuntimeError::Validation("no event names given".to_string()));
        }
        for name in names {
            validate_name(name)?;
        }

        let mut charged = false;
        for name in names {
            let eligible = self.eligible(self.listening_bots(), name);
            if eligible.is_empty() {
                continue;
            }
            if !charged {
                self.energy.consume()?;
                charged = true;
            }
            for id in &eligible {
                let run = self.run_bot(id, name, &arg, true)?;
                if let Some(Some(value)) = run.response {
                    debug!(event = name, bot = %id, "priority shout answered");
                    return Ok(Some(value));
                }
            }
        }
        Ok(None)
    }

    /// Whether a bot receives events.
    ///
    /// The primary listening tag decides when present: only an explicit
    /// `false` turns listening off. When it is absent, the legacy tag decides
    /// the same way.
    #[must_use]
    pub fn is_listening(&self, id: &BotId) -> bool {
        if !self.store.contains(id) {
            return false;
        }
        let tags = &self.config().listening_tags;
        match self.store.effective_tag(id, &tags.primary) {
            Some(value) => !value.is_explicit_false(),
            None => !self
                .store
                .effective_tag(id, &tags.legacy)
                .is_some_and(TagValue::is_explicit_false),
        }
    }

    fn listening_bots(&self) -> Vec<BotId> {
        self.store
            .ids()
            .filter(|id| self.is_listening(id))
            .cloned()
            .collect()
    }

    fn eligible(&self, candidates: Vec<BotId>, name: &str) -> Vec<BotId> {
        candidates
            .into_iter()
            .filter(|id| self.store.get(id).is_some_and(|bot| bot.has_listener(name)))
            .collect()
    }

    fn dispatch(
        &mut self,
        candidates: Vec<BotId>,
        name: &str,
        arg: TagValue,
    ) -> Result<Vec<Option<TagValue>>, RuntimeError> {
        let eligible = self.eligible(candidates, name);
        if eligible.is_empty() {
            trace!(event = name, "no eligible listeners");
            return Ok(Vec::new());
        }
        self.energy.consume()?;
        debug!(event = name, bots = eligible.len(), "dispatching");

        let mut responses = Vec::new();
        let mut succeeded = Vec::with_capacity(eligible.len());
        for id in &eligible {
            let run = self.run_bot(id, name, &arg, false)?;
            if let Some(response) = run.response {
                responses.push(response);
            }
            if !run.errored {
                succeeded.push(id.clone());
            }
        }

        if name != ON_LISTEN && name != ON_ANY_LISTEN {
            let summary = TagValue::object([
                ("name", TagValue::from(name)),
                ("that", arg),
                (
                    "responses",
                    TagValue::Array(responses.iter().map(|r| r.clone().unwrap_or_default()).collect()),
                ),
                ("targets", link_value(&eligible)),
                ("listeners", link_value(&succeeded)),
            ]);
            for id in &succeeded {
                self.run_bot(id, ON_LISTEN, &summary, false)?;
            }
            for id in self.listening_bots() {
                self.run_bot(&id, ON_ANY_LISTEN, &summary, false)?;
            }
        }

        Ok(responses)
    }

    /// Run one bot's static listener, then its dynamic ones.
    ///
    /// With `stop_on_response`, dynamic listeners are skipped once the static
    /// one produced a value.
    fn run_bot(
        &mut self,
        id: &BotId,
        name: &str,
        arg: &TagValue,
        stop_on_response: bool,
    ) -> Result<BotRun, RuntimeError> {
        let mut run = BotRun {
            response: None,
            errored: false,
        };
        // Destroyed by an earlier listener in the same call.
        let Some(bot) = self.store.get(id) else {
            return Ok(run);
        };
        let listener = bot.listener(name).cloned();
        let dynamic: Vec<Handler> = bot.dynamic_listeners(name).to_vec();
        let invocation = Invocation {
            bot: id.clone(),
            name: name.to_string(),
            arg: arg.clone(),
        };

        if let Some(handler) = listener {
            match self.run_handler(&handler, &invocation) {
                Ok(value) => run.response = Some(value),
                Err(err) => {
                    run.errored = true;
                    self.capture(id, name, err)?;
                }
            }
        }
        if stop_on_response && matches!(run.response, Some(Some(_))) {
            return Ok(run);
        }
        for handler in dynamic {
            if !self.store.contains(id) {
                break;
            }
            if let Err(err) = self.run_handler(&handler, &invocation) {
                run.errored = true;
                self.capture(id, name, err)?;
            }
        }
        Ok(run)
    }

    /// Queue a thrown error; pass an abort through.
    fn capture(&mut self, id: &BotId, name: &str, err: ScriptError) -> Result<(), RuntimeError> {
        match err {
            ScriptError::Abort(err) => Err(err),
            thrown => {
                self.record_error(Some(id), name, &thrown);
                Ok(())
            }
        }
    }
}

fn validate_name(name: &str) -> Result<(), RuntimeError> {
    if name.trim().is_empty() {
        return Err(RuntimeError::Validation("event name is empty".to_string()));
    }
    Ok(())
}

fn link_value(ids: &[BotId]) -> TagValue {
    if ids.is_empty() {
        TagValue::Array(Vec::new())
    } else {
        TagValue::Link(BotLink::new(ids.iter().cloned()))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use bot_entity::BotSpec;

    use super::*;
    use crate::config::RuntimeConfig;
    use crate::handler::Outcome;

    type CallLog = Rc<RefCell<Vec<String>>>;

    fn runtime() -> Runtime {
        Runtime::new(RuntimeConfig::default())
    }

    /// A handler that logs `<bot>:<event>` and returns `value`.
    fn logging(log: &CallLog, value: Option<TagValue>) -> Handler {
        let log = Rc::clone(log);
        Handler::returning(move |_, inv| {
            log.borrow_mut().push(format!("{}:{}", inv.bot, inv.name));
            Ok(value.clone())
        })
    }

    fn failing(message: &'static str) -> Handler {
        Handler::returning(move |_, _| Err(ScriptError::thrown(message)))
    }

    #[test]
    fn test_shout_runs_every_listener_in_order() {
        let mut rt = runtime();
        let log = CallLog::default();
        for (id, value) in [("c", 3), ("a", 1), ("b", 2)] {
            rt.create_bot(
                BotSpec::new()
                    .with_id(id)
                    .with_listener("ping", logging(&log, Some(TagValue::from(value)))),
            )
            .unwrap();
        }
        let results = rt.shout("ping", TagValue::Null).unwrap();
        assert_eq!(
            results,
            vec![
                Some(TagValue::from(3)),
                Some(TagValue::from(1)),
                Some(TagValue::from(2))
            ]
        );
        assert_eq!(log.borrow().as_slice(), &["c:ping", "a:ping", "b:ping"]);
    }

    #[test]
    fn test_failure_is_isolated() {
        let mut rt = runtime();
        let log = CallLog::default();
        rt.create_bot(BotSpec::new().with_id("a").with_listener("go", logging(&log, None)))
            .unwrap();
        rt.create_bot(BotSpec::new().with_id("b").with_listener("go", failing("kaboom")))
            .unwrap();
        rt.create_bot(
            BotSpec::new()
                .with_id("c")
                .with_listener("go", logging(&log, Some(TagValue::from("c")))),
        )
        .unwrap();

        let results = rt.shout("go", TagValue::Null).unwrap();
        assert_eq!(results, vec![None, Some(TagValue::from("c"))]);
        assert_eq!(log.borrow().len(), 2);
        let errors = rt.take_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].bot, Some(BotId::new("b")));
        assert_eq!(errors[0].source, "go");
        assert_eq!(errors[0].message, "kaboom");
    }

    #[test]
    fn test_dynamic_listeners_contribute_no_results() {
        let mut rt = runtime();
        let log = CallLog::default();
        for id in ["a", "b"] {
            let id = rt.create_bot(BotSpec::new().with_id(id)).unwrap();
            rt.add_listener(&id, "sayHello", logging(&log, Some(TagValue::from("hi"))))
                .unwrap();
        }
        let results = rt.shout("sayHello", TagValue::Null).unwrap();
        assert!(results.is_empty());
        assert_eq!(log.borrow().as_slice(), &["a:sayHello", "b:sayHello"]);
    }

    #[test]
    fn test_static_listeners_return_values() {
        let mut rt = runtime();
        let log = CallLog::default();
        for id in ["a", "b"] {
            rt.create_bot(
                BotSpec::new()
                    .with_id(id)
                    .with_listener("sayHello", logging(&log, Some(TagValue::from(id)))),
            )
            .unwrap();
        }
        let results = rt.shout("sayHello", TagValue::Null).unwrap();
        assert_eq!(results, vec![Some(TagValue::from("a")), Some(TagValue::from("b"))]);
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn test_static_runs_before_dynamic() {
        let mut rt = runtime();
        let log = CallLog::default();
        let id = rt
            .create_bot(BotSpec::new().with_id("a").with_listener("go", logging(&log, None)))
            .unwrap();
        let dynamic_log = Rc::clone(&log);
        rt.add_listener(
            &id,
            "go",
            Handler::returning(move |_, _| {
                dynamic_log.borrow_mut().push("dynamic".to_string());
                Ok(None)
            }),
        )
        .unwrap();
        rt.shout("go", TagValue::Null).unwrap();
        assert_eq!(log.borrow().as_slice(), &["a:go", "dynamic"]);
    }

    #[test]
    fn test_not_listening_bots_are_skipped() {
        let mut rt = runtime();
        let log = CallLog::default();
        rt.create_bot(
            BotSpec::new()
                .with_id("off")
                .with_tag("listening", false)
                .with_listener("go", logging(&log, None)),
        )
        .unwrap();
        rt.create_bot(
            BotSpec::new()
                .with_id("legacy_off")
                .with_tag("auxListening", false)
                .with_listener("go", logging(&log, None)),
        )
        .unwrap();
        rt.create_bot(
            BotSpec::new()
                .with_id("primary_wins")
                .with_tag("listening", true)
                .with_tag("auxListening", false)
                .with_listener("go", logging(&log, None)),
        )
        .unwrap();
        rt.shout("go", TagValue::Null).unwrap();
        assert_eq!(log.borrow().as_slice(), &["primary_wins:go"]);
    }

    #[test]
    fn test_whisper_keeps_caller_order() {
        let mut rt = runtime();
        let log = CallLog::default();
        for id in ["a", "b", "c"] {
            rt.create_bot(
                BotSpec::new()
                    .with_id(id)
                    .with_listener("go", logging(&log, Some(TagValue::from(id)))),
            )
            .unwrap();
        }
        let ids = [
            BotId::new("c"),
            BotId::new("ghost"),
            BotId::new("a"),
            BotId::new("c"),
        ];
        let results = rt.whisper(&ids, "go", TagValue::Null).unwrap();
        assert_eq!(results, vec![Some(TagValue::from("c")), Some(TagValue::from("a"))]);
        assert_eq!(log.borrow().as_slice(), &["c:go", "a:go"]);
    }

    #[test]
    fn test_priority_shout_short_circuits() {
        let mut rt = runtime();
        let log = CallLog::default();
        rt.create_bot(
            BotSpec::new()
                .with_id("a")
                .with_listener("first", logging(&log, None))
                .with_listener("second", logging(&log, Some(TagValue::from(2)))),
        )
        .unwrap();
        rt.create_bot(
            BotSpec::new()
                .with_id("b")
                .with_listener("first", logging(&log, Some(TagValue::from(1))))
                .with_listener("second", logging(&log, Some(TagValue::from(3)))),
        )
        .unwrap();
        rt.create_bot(
            BotSpec::new()
                .with_id("c")
                .with_listener("first", logging(&log, Some(TagValue::from(9)))),
        )
        .unwrap();

        let value = rt.priority_shout(&["first", "second"], TagValue::Null).unwrap();
        assert_eq!(value, Some(TagValue::from(1)));
        assert_eq!(log.borrow().as_slice(), &["a:first", "b:first"]);
    }

    #[test]
    fn test_priority_shout_explicit_null_is_a_result() {
        let mut rt = runtime();
        let log = CallLog::default();
        rt.create_bot(
            BotSpec::new()
                .with_id("a")
                .with_listener("first", logging(&log, Some(TagValue::Null)))
                .with_listener("second", logging(&log, Some(TagValue::from(2)))),
        )
        .unwrap();
        let value = rt.priority_shout(&["first", "second"], TagValue::Null).unwrap();
        assert_eq!(value, Some(TagValue::Null));
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_priority_shout_without_responder_is_undefined() {
        let mut rt = runtime();
        let log = CallLog::default();
        rt.create_bot(BotSpec::new().with_id("a").with_listener("first", logging(&log, None)))
            .unwrap();
        let before = rt.energy();
        let value = rt.priority_shout(&["first", "missing"], TagValue::Null).unwrap();
        assert_eq!(value, None);
        assert_eq!(rt.energy(), before - 1);
    }

    #[test]
    fn test_energy_one_unit_per_call() {
        let mut rt = Runtime::new(RuntimeConfig::default().with_energy(2));
        let log = CallLog::default();
        for id in ["a", "b", "c"] {
            rt.create_bot(BotSpec::new().with_id(id).with_listener("go", logging(&log, None)))
                .unwrap();
        }
        rt.shout("go", TagValue::Null).unwrap();
        assert_eq!(log.borrow().len(), 3);
        assert_eq!(rt.energy(), 1);
    }

    #[test]
    fn test_energy_exhausted_with_one_unit() {
        let mut rt = Runtime::new(RuntimeConfig::default().with_energy(1));
        let log = CallLog::default();
        rt.create_bot(BotSpec::new().with_id("a").with_listener("go", logging(&log, None)))
            .unwrap();
        assert_eq!(rt.shout("go", TagValue::Null), Err(RuntimeError::EnergyExhausted));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_no_listeners_costs_nothing() {
        let mut rt = Runtime::new(RuntimeConfig::default().with_energy(1));
        rt.create_bot(BotSpec::new().with_id("a")).unwrap();
        assert_eq!(rt.shout("go", TagValue::Null).unwrap(), Vec::new());
        assert_eq!(rt.energy(), 1);
    }

    #[test]
    fn test_mutual_recursion_terminates() {
        let mut rt = Runtime::new(RuntimeConfig::default().with_energy(50));
        let ping = Handler::returning(|rt, _| {
            rt.shout("pong", TagValue::Null)?;
            Ok(None)
        });
        let pong = Handler::returning(|rt, _| {
            rt.shout("ping", TagValue::Null)?;
            Ok(None)
        });
        rt.create_bot(BotSpec::new().with_id("a").with_listener("ping", ping))
            .unwrap();
        rt.create_bot(BotSpec::new().with_id("b").with_listener("pong", pong))
            .unwrap();

        assert_eq!(rt.shout("ping", TagValue::Null), Err(RuntimeError::EnergyExhausted));
        assert!(rt.take_errors().is_empty());
    }

    #[test]
    fn test_on_listen_skips_errored_bots() {
        let mut rt = runtime();
        let log = CallLog::default();
        rt.create_bot(
            BotSpec::new()
                .with_id("ok")
                .with_listener("go", logging(&log, Some(TagValue::from(1))))
                .with_listener(ON_LISTEN, logging(&log, None))
                .with_listener(ON_ANY_LISTEN, logging(&log, None)),
        )
        .unwrap();
        rt.create_bot(
            BotSpec::new()
                .with_id("bad")
                .with_listener("go", failing("no"))
                .with_listener(ON_LISTEN, logging(&log, None))
                .with_listener(ON_ANY_LISTEN, logging(&log, None)),
        )
        .unwrap();
        rt.create_bot(
            BotSpec::new()
                .with_id("observer")
                .with_listener(ON_ANY_LISTEN, logging(&log, None)),
        )
        .unwrap();

        rt.shout("go", TagValue::Null).unwrap();
        assert_eq!(
            log.borrow().as_slice(),
            &[
                "ok:go",
                "ok:onListen",
                "ok:onAnyListen",
                "bad:onAnyListen",
                "observer:onAnyListen"
            ]
        );
    }

    #[test]
    fn test_on_listen_argument() {
        let mut rt = runtime();
        let seen = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&seen);
        rt.create_bot(
            BotSpec::new()
                .with_id("a")
                .with_listener("go", Handler::returning(|_, _| Ok(Some(TagValue::from(5)))))
                .with_listener(
                    ON_LISTEN,
                    Handler::returning(move |_, inv| {
                        *sink.borrow_mut() = Some(inv.arg.clone());
                        Ok(None)
                    }),
                ),
        )
        .unwrap();
        rt.shout("go", TagValue::from("payload")).unwrap();

        let arg = seen.borrow().clone().unwrap();
        let fields = arg.as_object().unwrap();
        assert_eq!(fields["name"], TagValue::from("go"));
        assert_eq!(fields["that"], TagValue::from("payload"));
        assert_eq!(fields["responses"], TagValue::Array(vec![TagValue::from(5)]));
        assert_eq!(fields["targets"].referenced_ids(), vec![BotId::new("a")]);
    }

    #[test]
    fn test_mutations_visible_to_later_listeners() {
        let mut rt = runtime();
        rt.create_bot(
            BotSpec::new().with_id("writer").with_listener(
                "go",
                Handler::returning(|rt, _| {
                    rt.set_tag(&BotId::new("reader"), "note", TagValue::from("written"))?;
                    Ok(None)
                }),
            ),
        )
        .unwrap();
        rt.create_bot(
            BotSpec::new().with_id("reader").with_listener(
                "go",
                Handler::returning(|rt, inv| Ok(rt.get_tag(&inv.bot, "note").cloned())),
            ),
        )
        .unwrap();
        let results = rt.shout("go", TagValue::Null).unwrap();
        assert_eq!(results, vec![None, Some(TagValue::from("written"))]);
    }

    #[test]
    fn test_bot_destroyed_mid_dispatch_is_skipped() {
        let mut rt = runtime();
        let log = CallLog::default();
        rt.create_bot(
            BotSpec::new().with_id("killer").with_listener(
                "go",
                Handler::returning(|rt, _| {
                    rt.destroy_bot(&BotId::new("victim"));
                    Ok(None)
                }),
            ),
        )
        .unwrap();
        rt.create_bot(BotSpec::new().with_id("victim").with_listener("go", logging(&log, None)))
            .unwrap();
        let results = rt.shout("go", TagValue::Null).unwrap();
        assert_eq!(results.len(), 1);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_sequence_handler_result_and_error() {
        let mut rt = runtime();
        rt.create_bot(BotSpec::new().with_id("a").with_listener(
            "go",
            Handler::new(|_, _| {
                Ok(Outcome::yielding(
                    vec![TagValue::from("loading"), TagValue::from("almost")],
                    Some(TagValue::from("done")),
                ))
            }),
        ))
        .unwrap();
        rt.create_bot(BotSpec::new().with_id("b").with_listener(
            "go",
            Handler::new(|_, _| {
                let mut started = false;
                Ok(Outcome::sequence(
                    move |_: &mut Runtime| -> Result<crate::handler::Step, ScriptError> {
                        if started {
                            return Err(ScriptError::thrown("failed while suspended"));
                        }
                        started = true;
                        Ok(crate::handler::Step::Yield(TagValue::Null))
                    },
                ))
            }),
        ))
        .unwrap();
        let results = rt.shout("go", TagValue::Null).unwrap();
        assert_eq!(results, vec![Some(TagValue::from("done"))]);
        assert_eq!(rt.take_errors()[0].message, "failed while suspended");
    }

    #[test]
    fn test_empty_event_name_is_invalid() {
        let mut rt = runtime();
        assert!(matches!(rt.shout("", TagValue::Null), Err(RuntimeError::Validation(_))));
        assert!(matches!(
            rt.priority_shout(&[], TagValue::Null),
            Err(RuntimeError::Validation(_))
        ));
    }
}
