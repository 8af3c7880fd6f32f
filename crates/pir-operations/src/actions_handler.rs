//! Cursor over the actions of one step.

use crate::error::{OperationError, Result};
use pir_broker::{Action, DataBroker, Step, StepKind};

/// Yields a step's actions in order, each exactly once.
#[derive(Debug, Clone)]
pub struct ActionsHandler {
    step_kind: StepKind,
    actions: Vec<Action>,
    next: usize,
    current: Option<usize>,
}

impl ActionsHandler {
    /// Handler over a step's actions.
    #[must_use]
    pub fn new(step: &Step) -> Self {
        Self {
            step_kind: step.step_type,
            actions: step.actions.clone(),
            next: 0,
            current: None,
        }
    }

    /// Handler over the broker's step of the given kind.
    ///
    /// Fails when the broker has no such step or the step is empty.
    pub fn for_step(broker: &DataBroker, kind: StepKind) -> Result<Self> {
        let step = broker.step(kind).ok_or_else(|| {
            OperationError::Unknown(format!("broker {} has no {kind} step", broker.id()))
        })?;
        if step.actions.is_empty() {
            return Err(OperationError::Unknown(format!(
                "{kind} step of broker {} has no actions",
                broker.id()
            )));
        }
        Ok(Self::new(step))
    }

    /// The next action, or `None` once every action has been handed out.
    ///
    /// Calling it again after the end keeps returning `None`.
    pub fn next_action(&mut self) -> Option<Action> {
        let action = self.actions.get(self.next)?.clone();
        self.current = Some(self.next);
        self.next += 1;
        Some(action)
    }

    /// The action most recently handed out.
    #[must_use]
    pub fn current_action(&self) -> Option<&Action> {
        self.current.and_then(|index| self.actions.get(index))
    }

    /// Kind of the step being run.
    #[must_use]
    pub fn step_kind(&self) -> StepKind {
        self.step_kind
    }

    /// Actions not yet handed out.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.actions.len() - self.next
    }
}
