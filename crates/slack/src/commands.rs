use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;

use crate::blocks::{invalid_command_message, Output};

/// Anything that can answer a tokenized command.
///
/// `args` holds the tokens left after the verbs that routed here.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, args: Vec<String>) -> Output;
}

/// Adapts a plain closure into a [`Handler`].
pub struct HandlerFn<F>(F);

pub fn handler_fn<F>(handler: F) -> HandlerFn<F>
where
    F: Fn(Vec<String>) -> Output + Send + Sync,
{
    HandlerFn(handler)
}

#[async_trait]
impl<F> Handler for HandlerFn<F>
where
    F: Fn(Vec<String>) -> Output + Send + Sync,
{
    async fn handle(&self, args: Vec<String>) -> Output {
        (self.0)(args)
    }
}

/// Verb routing table. A `Commands` is itself a [`Handler`], so a verb can
/// lead to a nested table.
#[derive(Clone, Default)]
pub struct Commands {
    routes: BTreeMap<String, Arc<dyn Handler>>,
}

impl Commands {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, verb: impl Into<String>, handler: impl Handler + 'static) -> Self {
        self.register(verb, handler);
        self
    }

    pub fn register(&mut self, verb: impl Into<String>, handler: impl Handler + 'static) {
        self.routes.insert(verb.into(), Arc::new(handler));
    }

    /// Copies every route of `other` into `self`, replacing verbs already present.
    pub fn merge(&mut self, other: Commands) {
        self.routes.extend(other.routes);
    }

    pub fn verbs(&self) -> Vec<String> {
        self.routes.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[async_trait]
impl Handler for Commands {
    async fn handle(&self, mut args: Vec<String>) -> Output {
        let handler = args.first().and_then(|verb| self.routes.get(verb)).cloned();
        match handler {
            Some(handler) => {
                args.remove(0);
                handler.handle(args).await
            }
            None => invalid_command_message(&self.verbs()),
        }
    }
}
