//! Node dispatch: what one token does when it is taken off the ready queue.

use futures::task::SpawnExt;
use std::sync::{Arc, OnceLock};

use super::engine::Engine;
use super::env::{Env, Frame};
use super::error::{CoreError, TokenError};
use super::graph::{Def, DefGroup, Index, Node, Operand};
use super::group::{Cell, Forced, GroupKind};
use super::region::RegionKind;
use super::site::{Outcome, Site, SiteContext, SiteError};
use super::token::{Continuation, TokenId, TokenState};
use crate::orc::value::{Binding, Closure, Future, Value};

/// What the token does after its node ran.
enum Next {
    /// Go on at this node.
    Continue(Index<Node>),
    /// Stay where it is: parked, out on a call, or gone.
    Wait,
}

impl Engine {
    pub(crate) fn step(&mut self, id: TokenId) -> Result<(), CoreError> {
        let program = Arc::clone(&self.program);
        let node = match self.tokens.get(id) {
            Some(token) if token.state == TokenState::Runnable => token.node,
            _ => return Ok(()),
        };
        self.stats.steps += 1;
        tracing::trace!(token = ?id, ?node, "step");

        let next = match program.graph.get(node) {
            Node::Stop => {
                self.kill_token(id)?;
                Next::Wait
            }

            Node::Load { operand, next } => match self.force(id, operand)? {
                Forced::Ready(value) => {
                    self.token_mut(id)?.result = value;
                    Next::Continue(*next)
                }
                Forced::Blocked | Forced::Dead => Next::Wait,
            },

            Node::Field {
                target,
                field,
                next,
            } => match self.force(id, target)? {
                Forced::Ready(Value::Record(fields)) => match fields.get(field) {
                    Some(value) => {
                        self.token_mut(id)?.result = value.clone();
                        Next::Continue(*next)
                    }
                    None => {
                        self.fail(id, TokenError::NoSuchField(field.clone()))?;
                        Next::Wait
                    }
                },
                Forced::Ready(other) => {
                    self.fail(id, TokenError::NotARecord(other))?;
                    Next::Wait
                }
                Forced::Blocked | Forced::Dead => Next::Wait,
            },

            Node::Push { next } => {
                let token = self.token_mut(id)?;
                token.env = token.env.bind(token.result.clone());
                Next::Continue(*next)
            }

            Node::Unwind { count, next } => {
                let token = self.token_mut(id)?;
                token.env = token.env.unwind(*count).ok_or(CoreError::EnvUnderflow {
                    count: *count,
                    depth: token.env.depth(),
                })?;
                Next::Continue(*next)
            }

            Node::Fork { left, right } => {
                if let Some(limit) = self.at_capacity() {
                    self.fail(id, TokenError::ResourceExhausted { limit })?;
                    return Ok(());
                }
                let copy = self.token_mut(id)?.fork(*right);
                self.stats.forks += 1;
                if let Some(copy) = self.spawn(copy) {
                    self.ready.push_back(copy);
                }
                Next::Continue(*left)
            }

            Node::Subgoal { left, right } => {
                if let Some(limit) = self.at_capacity() {
                    self.fail(id, TokenError::ResourceExhausted { limit })?;
                    return Ok(());
                }
                self.subgoal(id, *right)?;
                Next::Continue(*left)
            }

            Node::Resolve => {
                let token = self.token_mut(id)?;
                let (group, value) = (token.group, token.result.clone());
                self.set_value(group, value)?;
                Next::Wait
            }

            Node::Otherwise { left, right } => {
                let token = self.tokens.get(id).ok_or(CoreError::Missing("token"))?;
                let fallback = Continuation::of(token, *right);
                let enclosing = token.region;
                let region = self.new_region(
                    enclosing,
                    RegionKind::Otherwise {
                        published: false,
                        fallback,
                    },
                )?;
                self.move_token(id, region)?;
                Next::Continue(*left)
            }

            Node::Escape { next } => {
                let region = self.token_mut(id)?.region;
                let parent = match self.regions.get_mut(region) {
                    Some(record) => match &mut record.kind {
                        RegionKind::Otherwise { published, .. } => {
                            *published = true;
                            record.parent
                        }
                        _ => None,
                    },
                    None => None,
                };
                let parent = parent.ok_or(CoreError::ScopeMismatch("otherwise region"))?;
                self.move_token(id, parent)?;
                Next::Continue(*next)
            }

            Node::Atomic { body, next } => {
                self.enter_atomic(id, *body, *next)?;
                Next::Wait
            }

            Node::Buffer => {
                self.buffer_publication(id)?;
                Next::Wait
            }

            Node::Declare { defs, next } => {
                let token = self.token_mut(id)?;
                token.env = bind_group(*defs, &program.graph.get(*defs).defs, &token.env);
                Next::Continue(*next)
            }

            Node::Call {
                target,
                args,
                next,
                tail,
                span,
            } => {
                self.token_mut(id)?.span = span.clone();
                match self.force(id, target)? {
                    Forced::Ready(Value::Closure(closure)) => {
                        self.call_closure(id, &closure, args, *next, *tail)?
                    }
                    Forced::Ready(Value::Site(site)) => self.call_site(id, &site, args, *next)?,
                    Forced::Ready(other) => {
                        self.fail(id, TokenError::Uncallable(other))?;
                        Next::Wait
                    }
                    Forced::Blocked | Forced::Dead => Next::Wait,
                }
            }

            Node::Return => {
                let token = self.token_mut(id)?;
                let frame = token.stack.head().cloned().ok_or(CoreError::StackUnderflow)?;
                token.stack = token.stack.unwind(1).ok_or(CoreError::StackUnderflow)?;
                token.env = frame.env;
                Next::Continue(frame.next)
            }

            Node::Publish => {
                let value = self.token_mut(id)?.result.clone();
                self.publish(value);
                self.kill_token(id)?;
                Next::Wait
            }
        };

        if let Next::Continue(node) = next {
            self.token_mut(id)?.node = node;
            self.ready.push_back(id);
        }
        Ok(())
    }

    /// Reads an operand for `token`. A variable bound to an unbound cell parks the token.
    pub(crate) fn force(&mut self, token: TokenId, operand: &Operand) -> Result<Forced, CoreError> {
        let index = match operand {
            Operand::Constant(value) => return Ok(Forced::Ready(value.clone())),
            Operand::Variable(index) => *index,
        };
        let env = &self.tokens.get(token).ok_or(CoreError::Missing("token"))?.env;
        let binding = env.lookup(index).ok_or(CoreError::UnboundIndex {
            index,
            depth: env.depth(),
        })?;
        match binding {
            Binding::Value(value) => Ok(Forced::Ready(value.clone())),
            Binding::Future(future) => match future.slot.get() {
                Some(value) => Ok(Forced::Ready(value.clone())),
                None => {
                    let cell = future.cell;
                    self.wait_for(cell, token)
                }
            },
        }
    }

    /// Starts the right side of a pruning in a fresh cell and binds the cell's future for
    /// the left side.
    fn subgoal(&mut self, id: TokenId, right: Index<Node>) -> Result<(), CoreError> {
        let token = self.tokens.get(id).ok_or(CoreError::Missing("token"))?;
        let (parent_group, parent_region) = (token.group, token.region);
        let mut copy = token.fork(right);

        let slot = Arc::new(OnceLock::new());
        let cell = self.new_group(
            parent_group,
            GroupKind::Cell(Cell {
                slot: Arc::clone(&slot),
                waiters: vec![],
                region: None,
            }),
        );
        let region = self.new_region(parent_region, RegionKind::Pruning(cell))?;
        if let Some(GroupKind::Cell(record)) = self.groups.get_mut(cell).map(|g| &mut g.kind) {
            record.region = Some(region);
        }

        copy.group = cell;
        copy.region = region;
        self.stats.forks += 1;
        match self.spawn(copy) {
            Some(copy) => self.ready.push_back(copy),
            None => self.settle_region(region)?,
        }

        let token = self.token_mut(id)?;
        token.env = token.env.extend(Binding::Future(Future { cell, slot }));
        Ok(())
    }

    fn call_closure(
        &mut self,
        id: TokenId,
        closure: &Closure,
        args: &[Operand],
        next: Index<Node>,
        tail: bool,
    ) -> Result<Next, CoreError> {
        let program = Arc::clone(&self.program);
        let defs = &program.graph.get(closure.defs).defs;
        let def = &defs[closure.member];
        if def.arity != args.len() {
            self.fail(
                id,
                TokenError::ArityMismatch {
                    name: def.name.clone(),
                    expected: def.arity,
                    found: args.len(),
                },
            )?;
            return Ok(Next::Wait);
        }

        let token = self.tokens.get(id).ok_or(CoreError::Missing("token"))?;
        let mut env = bind_group(closure.defs, defs, &closure.env);
        for arg in args {
            // closure arguments are passed unforced; a pending future stays pending
            let binding = match arg {
                Operand::Constant(value) => Binding::Value(value.clone()),
                Operand::Variable(index) => token
                    .env
                    .lookup(*index)
                    .cloned()
                    .ok_or(CoreError::UnboundIndex {
                        index: *index,
                        depth: token.env.depth(),
                    })?,
            };
            env = env.extend(binding);
        }

        self.stats.calls += 1;
        if tail {
            self.stats.tail_calls += 1;
        }
        let token = self.token_mut(id)?;
        if !tail {
            token.stack = token.stack.extend(Frame {
                next,
                env: token.env.clone(),
            });
        }
        token.env = env;
        Ok(Next::Continue(def.entry))
    }

    fn call_site(
        &mut self,
        id: TokenId,
        site: &Site,
        args: &[Operand],
        next: Index<Node>,
    ) -> Result<Next, CoreError> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            match self.force(id, arg)? {
                Forced::Ready(value) => values.push(value),
                Forced::Blocked | Forced::Dead => return Ok(Next::Wait),
            }
        }
        self.stats.site_calls += 1;
        tracing::trace!(site = %site.name(), args = values.len(), "site call");

        let outcome = match site {
            Site::Pure { run, .. } => Outcome::from(run(&values).map(Some)),
            Site::Partial { run, .. } => Outcome::from(run(&values)),
            Site::Threaded { name, run } => {
                let call = run(values);
                let returns = self.returns.clone();
                let spawned = self.spawner.spawn(async move {
                    returns.send(id, Outcome::from(call.await));
                });
                if spawned.is_err() {
                    let error = SiteError::new("could not spawn the call");
                    return self.site_outcome(id, site, Outcome::Fail(error), next);
                }
                let token = self.token_mut(id)?;
                token.state = TokenState::Calling(name.clone());
                token.node = next;
                return Ok(Next::Wait);
            }
            Site::Transactional { site: inner, .. } => {
                let txn = self.tokens.get(id).and_then(|token| token.txn);
                let scope = txn
                    .and_then(|txn| self.transactions.get(txn))
                    .map(|txn| txn.scope.clone());
                let mut cx = SiteContext::new(scope.as_ref());
                let result = inner.call(&mut cx, &values);
                let (enlisted, abort) = (std::mem::take(&mut cx.enlisted), cx.abort);
                if let Some(txn) = txn {
                    self.enlist(txn, enlisted);
                    if abort {
                        self.abort(txn)?;
                        return Ok(Next::Wait);
                    }
                }
                Outcome::from(result)
            }
            Site::Timer { clock, .. } => {
                let delay = match values.as_slice() {
                    [Value::Int(delay)] if *delay >= 0 => *delay as u64,
                    [other] => {
                        let error = SiteError::expected("a non-negative integer", other);
                        return self.site_outcome(id, site, Outcome::Fail(error), next);
                    }
                    _ => {
                        let error = SiteError::arity(1, values.len());
                        return self.site_outcome(id, site, Outcome::Fail(error), next);
                    }
                };
                self.clock_mut(*clock).schedule(delay, id);
                let token = self.token_mut(id)?;
                token.state = TokenState::Blocked;
                token.result = Value::Signal;
                token.node = next;
                return Ok(Next::Wait);
            }
        };
        self.site_outcome(id, site, outcome, next)
    }

    fn site_outcome(
        &mut self,
        id: TokenId,
        site: &Site,
        outcome: Outcome,
        next: Index<Node>,
    ) -> Result<Next, CoreError> {
        match outcome {
            Outcome::Publish(value) => {
                self.token_mut(id)?.result = value;
                Ok(Next::Continue(next))
            }
            Outcome::Halt | Outcome::Abort => {
                self.kill_token(id)?;
                Ok(Next::Wait)
            }
            Outcome::Fail(error) => {
                let site = site.name().clone();
                self.fail(id, TokenError::Site { site, error })?;
                Ok(Next::Wait)
            }
        }
    }
}

/// Extends `env` with one closure per member of a definition group, in declaration order.
fn bind_group(defs: Index<DefGroup>, members: &[Def], env: &Env) -> Env {
    let captured = env.clone();
    (0..members.len()).fold(env.clone(), |env, member| {
        env.bind(Value::Closure(Closure {
            defs,
            member,
            env: captured.clone(),
        }))
    })
}
