//! The scheduler.
//!
//! One engine owns every dynamic record of a run and is the only thing that ever touches
//! them, so nothing here is locked. Work arrives from two places: the ready queue, holding
//! tokens that can take a step right now, and the returning queue, a channel that threaded
//! site calls and cohort votes answer through from other threads. When both are empty the
//! virtual clocks tick; when those are idle too, the engine sleeps on the channel.

use futures::task::Spawn;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

use super::arena::Pool;
use super::clock::{ClockId, VirtualClock};
use super::compiler::Compiled;
use super::env::{Env, Stack};
use super::error::{CoreError, Failure, TokenError};
use super::group::{Group, GroupKind};
use super::region::{Region, RegionKind};
use super::site::Outcome;
use super::stats::Stats;
use super::token::{Token, TokenId, TokenState};
use super::transaction::Transaction;
use crate::location::Span;
use crate::orc::value::Value;
use crate::spawn::TokioSpawn;

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Ceiling on simultaneously live tokens. A fork that would exceed it fails the
    /// forking token instead.
    pub max_tokens: Option<usize>,
}

/// Where publications and token failures go.
pub trait Observer {
    fn publish(&mut self, value: Value) {
        println!("{value:?}");
    }

    fn token_failed(&mut self, failure: &Failure) {
        tracing::warn!(%failure, "token failed");
    }
}

/// Prints top-level publications to stdout and logs failures.
pub struct PrintObserver;

impl Observer for PrintObserver {}

pub(crate) enum Message {
    Return { token: TokenId, outcome: Outcome },
    Terminate,
}

/// The sending half of the returning queue.
#[derive(Clone)]
pub struct Returns(mpsc::UnboundedSender<Message>);

impl Returns {
    pub(crate) fn send(&self, token: TokenId, outcome: Outcome) {
        // the engine is gone; nobody is waiting for this token anymore
        let _ = self.0.send(Message::Return { token, outcome });
    }
}

/// Stops a running engine from the outside.
#[derive(Clone)]
pub struct Terminator(mpsc::UnboundedSender<Message>);

impl Terminator {
    pub fn terminate(&self) {
        let _ = self.0.send(Message::Terminate);
    }
}

pub struct Engine {
    pub(crate) program: Arc<Compiled>,
    pub(crate) config: EngineConfig,
    pub(crate) tokens: Pool<Token>,
    pub(crate) groups: Pool<Group>,
    pub(crate) regions: Pool<Region>,
    pub(crate) transactions: Pool<Transaction>,
    pub(crate) clocks: Vec<VirtualClock<TokenId>>,
    pub(crate) ready: VecDeque<TokenId>,
    pub(crate) returns: Returns,
    inbox: mpsc::UnboundedReceiver<Message>,
    terminator: Terminator,
    pub(crate) spawner: Arc<dyn Spawn + Send + Sync>,
    pub(crate) observer: Box<dyn Observer>,
    started: bool,
    pub(crate) halted: bool,
    pub(crate) stats: Stats,
}

impl Engine {
    /// Must be called from within a tokio runtime; threaded sites are spawned onto it.
    pub fn new(
        program: Arc<Compiled>,
        config: EngineConfig,
        observer: impl Observer + 'static,
    ) -> Self {
        Self::with_spawner(program, config, observer, Arc::new(TokioSpawn::new()))
    }

    pub fn with_spawner(
        program: Arc<Compiled>,
        config: EngineConfig,
        observer: impl Observer + 'static,
        spawner: Arc<dyn Spawn + Send + Sync>,
    ) -> Self {
        let (sender, inbox) = mpsc::unbounded_channel();
        Self {
            program,
            config,
            tokens: Pool::new(),
            groups: Pool::new(),
            regions: Pool::new(),
            transactions: Pool::new(),
            clocks: vec![VirtualClock::default()],
            ready: VecDeque::new(),
            returns: Returns(sender.clone()),
            inbox,
            terminator: Terminator(sender),
            spawner,
            observer: Box::new(observer),
            started: false,
            halted: false,
            stats: Stats::default(),
        }
    }

    pub fn terminator(&self) -> Terminator {
        self.terminator.clone()
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// The current tick of a clock, if anything has used it yet.
    pub fn clock_now(&self, clock: ClockId) -> Option<u64> {
        self.clocks.get(clock.0).map(VirtualClock::now)
    }

    pub fn live_tokens(&self) -> usize {
        self.tokens.len()
    }

    /// Runs the program until the root region is quiescent or the engine is terminated.
    pub async fn run(&mut self) -> Result<(), CoreError> {
        let start = Instant::now();
        if !self.started {
            self.start();
        }
        tracing::info!("engine started");

        while !self.halted {
            if let Some(token) = self.ready.pop_front() {
                self.step(token)?;
                continue;
            }
            if let Ok(message) = self.inbox.try_recv() {
                self.receive(message)?;
                continue;
            }
            if self.advance_clocks()? {
                // threaded calls share this thread on a current-thread runtime
                tokio::task::yield_now().await;
                continue;
            }
            match self.inbox.recv().await {
                Some(message) => self.receive(message)?,
                None => break,
            }
        }

        self.stats.duration += start.elapsed();
        tracing::info!(
            steps = self.stats.steps,
            live = self.tokens.len(),
            "engine halted"
        );
        Ok(())
    }

    fn start(&mut self) {
        self.started = true;
        let group = self.groups.insert(Group::new(None, GroupKind::Root));
        let region = self.regions.insert(Region::new(None, RegionKind::Root));
        let token = Token {
            node: self.program.entry,
            env: Env::new(),
            stack: Stack::new(),
            result: Value::Signal,
            group,
            region,
            txn: None,
            span: Span::None,
            state: TokenState::Runnable,
        };
        if let Some(id) = self.spawn(token) {
            self.ready.push_back(id);
        }
    }

    fn receive(&mut self, message: Message) -> Result<(), CoreError> {
        match message {
            Message::Terminate => {
                tracing::info!("terminated from outside");
                self.halted = true;
                Ok(())
            }
            Message::Return { token, outcome } => {
                let Some(state) = self.tokens.get(token).map(|t| t.state.clone()) else {
                    // killed while its call was out
                    return Ok(());
                };
                match outcome {
                    Outcome::Publish(value) => {
                        let token_ref = self.token_mut(token)?;
                        token_ref.result = value;
                        token_ref.state = TokenState::Runnable;
                        self.ready.push_back(token);
                        Ok(())
                    }
                    Outcome::Halt => self.kill_token(token),
                    Outcome::Fail(error) => {
                        let site = match state {
                            TokenState::Calling(site) => site,
                            _ => arcstr::literal!("cohort"),
                        };
                        self.fail(token, TokenError::Site { site, error })
                    }
                    Outcome::Abort => {
                        if let Some(txn) = self.token_mut(token)?.txn {
                            self.abort(txn)?;
                        }
                        self.kill_token(token)
                    }
                }
            }
        }
    }

    /// Ticks every clock once if any of them has a pending timer. Returns whether it did.
    /// Timers of tokens killed while waiting are dropped first and never keep a clock busy.
    fn advance_clocks(&mut self) -> Result<bool, CoreError> {
        let tokens = &self.tokens;
        for clock in &mut self.clocks {
            clock.retain(|token| tokens.contains(*token));
        }
        if self.clocks.iter().all(VirtualClock::is_idle) {
            return Ok(false);
        }
        self.stats.ticks += 1;
        let mut due = vec![];
        for clock in &mut self.clocks {
            due.extend(clock.tick());
        }
        for token in due {
            if let Some(token_ref) = self.tokens.get_mut(token) {
                token_ref.state = TokenState::Runnable;
                self.ready.push_back(token);
            }
        }
        Ok(true)
    }

    pub(crate) fn token_mut(&mut self, id: TokenId) -> Result<&mut Token, CoreError> {
        self.tokens.get_mut(id).ok_or(CoreError::Missing("token"))
    }

    /// Clocks come into existence on first use and advance together from then on.
    pub(crate) fn clock_mut(&mut self, clock: ClockId) -> &mut VirtualClock<TokenId> {
        if self.clocks.len() <= clock.0 {
            let now = self.clocks[0].now();
            self.clocks
                .resize_with(clock.0 + 1, || VirtualClock::starting_at(now));
        }
        &mut self.clocks[clock.0]
    }

    pub(crate) fn at_capacity(&self) -> Option<usize> {
        self.config
            .max_tokens
            .filter(|&limit| self.tokens.len() >= limit)
    }

    /// Registers a new token with its group and region. Refused if the group was killed or
    /// the region closed in the meantime.
    pub(crate) fn spawn(&mut self, token: Token) -> Option<TokenId> {
        let group_alive = self
            .groups
            .get(token.group)
            .is_some_and(|group| !group.killed);
        let region_open = self
            .regions
            .get(token.region)
            .is_some_and(|region| !region.closed);
        if !group_alive || !region_open {
            return None;
        }
        let (group, region) = (token.group, token.region);
        let id = self.tokens.insert(token);
        if let Some(group) = self.groups.get_mut(group) {
            group.members.insert(id);
        }
        if let Some(region) = self.regions.get_mut(region) {
            region.tokens.insert(id);
            region.live += 1;
        }
        self.stats.peak_tokens = self.stats.peak_tokens.max(self.tokens.len());
        Some(id)
    }

    /// Removes a token for good, whether it halted or was killed. Its region may become
    /// quiescent as a result. Killing a dead token does nothing.
    pub(crate) fn kill_token(&mut self, id: TokenId) -> Result<(), CoreError> {
        let Some(token) = self.tokens.remove(id) else {
            return Ok(());
        };
        if let Some(group) = self.groups.get_mut(token.group) {
            group.members.shift_remove(&id);
        }
        self.region_remove_token(token.region, id)
    }

    pub(crate) fn fail(&mut self, id: TokenId, error: TokenError) -> Result<(), CoreError> {
        let Some(token) = self.tokens.get(id) else {
            return Ok(());
        };
        let failure = Failure {
            span: token.span.clone(),
            error,
        };
        self.stats.failures += 1;
        self.observer.token_failed(&failure);
        self.kill_token(id)
    }

    pub(crate) fn publish(&mut self, value: Value) {
        self.stats.publications += 1;
        self.observer.publish(value);
    }
}
