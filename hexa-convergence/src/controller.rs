//! Controlador de convergência em malha fechada
//!
//! Para cada grupo: liga torque e velocidade, envia o goal e lê o valor
//! reconhecido, faz polling das posições reenviando o goal apenas para quem
//! ainda não chegou, desliga o torque e lê as posições finais.

use std::collections::HashSet;
use std::thread;
use std::time::{Duration, Instant};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use hexa_actuator::{ActuatorBus, ActuatorId, ActuatorResult, Position, PositionRange, ServoActuator};
use crate::error::{AbortReason, ConfigError, ControlError, ControlResult, ConvergenceError};
use crate::group::{ActuatorPhase, Goal, Group, MoveCommand, Phase};
use crate::retry::{CancellationToken, RetryPolicy, Watchdog};

/// Configuração do controlador
///
/// O padrão nunca desiste: retry sem limite, sem prazo e sem limite de polls.
#[derive(Debug, Clone, Default)]
pub struct ControllerConfig {
    pub retry: RetryPolicy,
    /// Faixa de posições do modelo de atuador
    pub range: PositionRange,
    /// Prazo de cada movimento de grupo, do armar até a convergência
    ///
    /// Desarme e relatório de um grupo que já convergiu não expiram.
    pub timeout: Option<Duration>,
    /// Máximo de iterações do loop de polling
    pub max_polls: Option<u32>,
    pub cancel: Option<CancellationToken>,
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == Some(0) {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.max_polls == Some(0) {
            return Err(ConfigError::Invalid("max_polls must be at least 1".into()));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::Invalid("timeout must be greater than zero".into()));
        }
        Ok(())
    }
}

/// Resultado por atuador
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorReport {
    pub id: ActuatorId,
    pub acknowledged_goal: Position,
    pub final_position: Position,
    /// Reenvios de goal no loop de polling
    pub corrections: u32,
    pub phase: ActuatorPhase,
}

/// Resumo de um movimento de grupo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceReport {
    pub group: String,
    /// Iterações do loop de polling
    pub iterations: u32,
    /// Tentativas que falharam e foram repetidas
    pub retries: u64,
    pub actuators: Vec<ActuatorReport>,
    pub elapsed: Duration,
}

impl ConvergenceReport {
    pub fn actuator(&self, id: ActuatorId) -> Option<&ActuatorReport> {
        self.actuators.iter().find(|a| a.id == id)
    }

    pub fn corrections(&self, id: ActuatorId) -> Option<u32> {
        self.actuator(id).map(|a| a.corrections)
    }

    pub fn total_corrections(&self) -> u32 {
        self.actuators.iter().map(|a| a.corrections).sum()
    }

    /// Goals reconhecidos pelos dispositivos
    pub fn goal(&self) -> Goal {
        self.actuators.iter().map(|a| (a.id, a.acknowledged_goal)).collect()
    }
}

/// Controlador de convergência
#[derive(Debug, Clone, Default)]
pub struct ConvergenceController {
    config: ControllerConfig,
}

impl ConvergenceController {
    pub fn new(config: ControllerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Move um grupo até todos os atuadores chegarem ao goal
    ///
    /// Com a política padrão só falha na validação; pode bloquear para
    /// sempre se o barramento nunca se recuperar.
    pub fn run_group<B: ActuatorBus>(&self, group: &Group<B>, command: MoveCommand) -> ControlResult<ConvergenceReport> {
        self.config.validate()?;
        command.validate(&self.config.range)?;
        self.execute(group, command).map_err(ControlError::from)
    }

    /// Move os grupos em sequência, parando no primeiro erro
    pub fn run_groups<B: ActuatorBus>(&self, groups: &[Group<B>], command: MoveCommand) -> ControlResult<Vec<ConvergenceReport>> {
        self.config.validate()?;
        command.validate(&self.config.range)?;
        groups
            .iter()
            .map(|group| self.execute(group, command).map_err(ControlError::from))
            .collect()
    }

    /// Move cada grupo em sua própria thread
    ///
    /// As transações continuam serializadas pelo barramento compartilhado.
    /// Os grupos não podem compartilhar atuadores.
    pub fn run_groups_concurrently<B: ActuatorBus>(
        &self,
        groups: &[Group<B>],
        command: MoveCommand,
    ) -> ControlResult<Vec<ConvergenceReport>> {
        self.config.validate()?;
        command.validate(&self.config.range)?;

        let mut seen = HashSet::new();
        for id in groups.iter().flat_map(Group::ids) {
            if !seen.insert(id) {
                return Err(ConfigError::SharedActuator(id).into());
            }
        }

        thread::scope(|scope| {
            let handles: Vec<_> = groups
                .iter()
                .map(|group| (group.name(), scope.spawn(move || self.execute(group, command))))
                .collect();

            handles
                .into_iter()
                .map(|(name, handle)| match handle.join() {
                    Ok(result) => result.map_err(ControlError::from),
                    Err(_) => Err(ControlError::WorkerPanicked(name.to_string())),
                })
                .collect()
        })
    }

    fn execute<B: ActuatorBus>(&self, group: &Group<B>, command: MoveCommand) -> Result<ConvergenceReport, ConvergenceError> {
        let mut run = Run::new(&self.config, group, command);
        match run.drive() {
            Ok(report) => Ok(report),
            Err((phase, reason)) => {
                let remaining = run.remaining(phase);
                warn!(group = group.name(), %phase, %reason, remaining = remaining.len(), "move aborted");
                run.safe_disarm();
                Err(ConvergenceError {
                    group: group.name().to_string(),
                    reason,
                    phase,
                    actuators_remaining: remaining,
                })
            }
        }
    }
}

type Abort = (Phase, AbortReason);

/// Estado de um movimento em andamento
struct Run<'a, B: ActuatorBus> {
    config: &'a ControllerConfig,
    group: &'a Group<B>,
    command: MoveCommand,
    watchdog: Watchdog,
    started: Instant,
    phases: Vec<ActuatorPhase>,
    speed_set: Vec<bool>,
    goals: Vec<Option<Position>>,
    finals: Vec<Option<Position>>,
    corrections: Vec<u32>,
    retries: u64,
    iterations: u32,
}

impl<'a, B: ActuatorBus> Run<'a, B> {
    fn new(config: &'a ControllerConfig, group: &'a Group<B>, command: MoveCommand) -> Self {
        let n = group.len();
        Self {
            config,
            group,
            command,
            watchdog: Watchdog::new(config.cancel.clone(), config.timeout),
            started: Instant::now(),
            phases: vec![ActuatorPhase::Idle; n],
            speed_set: vec![false; n],
            goals: vec![None; n],
            finals: vec![None; n],
            corrections: vec![0; n],
            retries: 0,
            iterations: 0,
        }
    }

    fn drive(&mut self) -> Result<ConvergenceReport, Abort> {
        self.arm()?;
        let goal = self.command_goal()?;
        self.poll_until_converged(&goal)?;
        self.watchdog.clear_deadline();
        self.disarm()?;
        self.report(goal)
    }

    fn retry<T>(&mut self, phase: Phase, op: impl FnMut() -> ActuatorResult<T>) -> Result<T, Abort> {
        let done = self
            .config
            .retry
            .run(&self.watchdog, op)
            .map_err(|abort| (phase, AbortReason::from(abort)))?;
        self.retries += u64::from(done.attempts - 1);
        Ok(done.value)
    }

    fn actuator(&self, index: usize) -> &'a ServoActuator<B> {
        &self.group.actuators()[index]
    }

    fn arm(&mut self) -> Result<(), Abort> {
        debug!(group = self.group.name(), phase = %Phase::Arm, speed = self.command.speed.value(), "phase");
        for i in 0..self.group.len() {
            let servo = self.actuator(i);
            self.retry(Phase::Arm, || servo.set_torque(true))?;
            self.phases[i] = ActuatorPhase::Armed;
        }
        let speed = self.command.speed;
        for i in 0..self.group.len() {
            let servo = self.actuator(i);
            self.retry(Phase::Arm, || servo.set_speed(speed))?;
            self.speed_set[i] = true;
        }
        Ok(())
    }

    fn command_goal(&mut self) -> Result<Goal, Abort> {
        debug!(group = self.group.name(), phase = %Phase::Command, goal = self.command.goal.ticks(), "phase");
        let target = self.command.goal;
        for i in 0..self.group.len() {
            let servo = self.actuator(i);
            self.retry(Phase::Command, || servo.set_goal(target))?;
            let acknowledged = self.retry(Phase::Command, || servo.get_goal())?;
            self.goals[i] = Some(acknowledged);
            self.phases[i] = ActuatorPhase::GoalSent;
        }

        Ok(self
            .group
            .actuators()
            .iter()
            .zip(&self.goals)
            .filter_map(|(servo, goal)| goal.map(|g| (servo.id(), g)))
            .collect())
    }

    fn poll_until_converged(&mut self, goal: &Goal) -> Result<(), Abort> {
        debug!(group = self.group.name(), phase = %Phase::Poll, tolerance = self.command.tolerance.ticks(), "phase");
        let tolerance = self.command.tolerance;
        let targets: Vec<Position> = goal.iter().map(|(_, position)| position).collect();

        loop {
            self.watchdog.check().map_err(|abort| (Phase::Poll, abort.into()))?;
            self.iterations += 1;

            let mut arrived = 0;
            for (i, &target) in targets.iter().enumerate() {
                let servo = self.actuator(i);
                let current = self.retry(Phase::Poll, || servo.get_position())?;
                if tolerance.admits(current, target) {
                    self.phases[i] = ActuatorPhase::Arrived;
                    arrived += 1;
                } else {
                    self.phases[i] = ActuatorPhase::Polling;
                }
            }

            debug!(
                group = self.group.name(),
                iteration = self.iterations,
                arrived,
                total = targets.len(),
                "poll"
            );

            if arrived == targets.len() {
                return Ok(());
            }
            if self.config.max_polls.is_some_and(|max| self.iterations >= max) {
                return Err((Phase::Poll, AbortReason::PollLimit { polls: self.iterations }));
            }

            for (i, &target) in targets.iter().enumerate() {
                if self.phases[i] == ActuatorPhase::Arrived {
                    continue;
                }
                self.phases[i] = ActuatorPhase::Correcting;
                let servo = self.actuator(i);
                self.retry(Phase::Poll, || servo.set_goal(target))?;
                self.corrections[i] += 1;
            }
        }
    }

    fn disarm(&mut self) -> Result<(), Abort> {
        debug!(group = self.group.name(), phase = %Phase::Disarm, "phase");
        for i in 0..self.group.len() {
            let servo = self.actuator(i);
            self.retry(Phase::Disarm, || servo.set_torque(false))?;
            self.phases[i] = ActuatorPhase::Disarmed;
        }
        Ok(())
    }

    fn report(&mut self, goal: Goal) -> Result<ConvergenceReport, Abort> {
        let mut actuators = Vec::with_capacity(self.group.len());
        for (i, (id, acknowledged_goal)) in goal.iter().enumerate() {
            let servo = self.actuator(i);
            let final_position = self.retry(Phase::Report, || servo.get_position())?;
            self.finals[i] = Some(final_position);
            actuators.push(ActuatorReport {
                id,
                acknowledged_goal,
                final_position,
                corrections: self.corrections[i],
                phase: self.phases[i],
            });
        }

        let report = ConvergenceReport {
            group: self.group.name().to_string(),
            iterations: self.iterations,
            retries: self.retries,
            actuators,
            elapsed: self.started.elapsed(),
        };

        info!(
            group = %report.group,
            iterations = report.iterations,
            corrections = report.total_corrections(),
            retries = report.retries,
            "group converged"
        );
        Ok(report)
    }

    /// Atuadores que não completaram `phase`
    fn remaining(&self, phase: Phase) -> Vec<ActuatorId> {
        let pending = |i: usize| match phase {
            Phase::Arm => self.phases[i] == ActuatorPhase::Idle || !self.speed_set[i],
            Phase::Command => self.goals[i].is_none(),
            Phase::Poll => self.phases[i] != ActuatorPhase::Arrived,
            Phase::Disarm => self.phases[i] != ActuatorPhase::Disarmed,
            Phase::Report => self.finals[i].is_none(),
        };
        (0..self.group.len())
            .filter(|&i| pending(i))
            .map(|i| self.actuator(i).id())
            .collect()
    }

    /// Uma tentativa de desligar o torque de quem ainda pode estar ligado
    fn safe_disarm(&mut self) {
        for i in 0..self.group.len() {
            if matches!(self.phases[i], ActuatorPhase::Idle | ActuatorPhase::Disarmed) {
                continue;
            }
            if self.actuator(i).set_torque(false).is_ok() {
                self.phases[i] = ActuatorPhase::Disarmed;
            }
        }
    }
}
