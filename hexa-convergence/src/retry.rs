//! Política de retry para operações do proxy
//!
//! O padrão é tentar de novo para sempre, sem espera, tratando falha de
//! transporte e falha de dispositivo da mesma forma. Limites de tentativas, backoff, cancelamento e prazo são opcionais
//! e nunca alteram o resultado de uma operação que acaba tendo sucesso.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use serde::{Deserialize, Serialize};
use hexa_actuator::{ActuatorError, ActuatorResult};

/// Estratégia de espera entre tentativas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Busy-poll, sem espera
    #[default]
    None,
    Fixed,
    Linear,
    Exponential,
}

/// Espera entre tentativas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Backoff {
    pub strategy: BackoffStrategy,
    pub base: Duration,
    /// Teto da espera
    pub max: Option<Duration>,
}

impl Backoff {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn fixed(base: Duration) -> Self {
        Self { strategy: BackoffStrategy::Fixed, base, max: None }
    }

    pub fn linear(base: Duration) -> Self {
        Self { strategy: BackoffStrategy::Linear, base, max: None }
    }

    pub fn exponential(base: Duration) -> Self {
        Self { strategy: BackoffStrategy::Exponential, base, max: None }
    }

    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = Some(max);
        self
    }

    /// Espera antes do retry `retry` (0 = primeiro retry)
    pub fn delay(&self, retry: u32) -> Duration {
        let delay = match self.strategy {
            BackoffStrategy::None => Duration::ZERO,
            BackoffStrategy::Fixed => self.base,
            BackoffStrategy::Linear => self.base.saturating_mul(retry.saturating_add(1)),
            BackoffStrategy::Exponential => {
                let factor = 1u32.checked_shl(retry.min(31)).unwrap_or(u32::MAX);
                self.base.saturating_mul(factor)
            }
        };
        match self.max {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

/// Sinal de cancelamento compartilhado entre threads
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Por que o retry desistiu
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryAbort {
    Exhausted { attempts: u32, last_error: ActuatorError },
    DeviceFault(ActuatorError),
    Cancelled,
    TimedOut,
}

/// Cancelamento e prazo de um movimento
///
/// Verificado antes de cada tentativa e durante as esperas de backoff.
#[derive(Debug, Clone, Default)]
pub struct Watchdog {
    cancel: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl Watchdog {
    /// Sem cancelamento e sem prazo
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn new(cancel: Option<CancellationToken>, timeout: Option<Duration>) -> Self {
        Self {
            cancel,
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    pub fn check(&self) -> Result<(), RetryAbort> {
        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(RetryAbort::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(RetryAbort::TimedOut);
        }
        Ok(())
    }

    /// Mantém apenas o cancelamento
    pub fn clear_deadline(&mut self) {
        self.deadline = None;
    }

    fn sleep(&self, delay: Duration) {
        let delay = match self.deadline {
            Some(deadline) => delay.min(deadline.saturating_duration_since(Instant::now())),
            None => delay,
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}

/// Valor obtido e quantas tentativas foram necessárias
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt<T> {
    pub value: T,
    pub attempts: u32,
}

/// Política de retry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` = sem limite
    pub max_attempts: Option<u32>,
    pub backoff: Backoff,
    /// Falhas de dispositivo também são retentadas
    pub retry_device_faults: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::forever()
    }
}

impl RetryPolicy {
    /// Retry incondicional, sem espera
    pub fn forever() -> Self {
        Self {
            max_attempts: None,
            backoff: Backoff::none(),
            retry_device_faults: true,
        }
    }

    /// No máximo `attempts` tentativas por operação
    pub fn bounded(attempts: u32) -> Self {
        Self::forever().max_attempts(attempts)
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// `false` faz falhas de dispositivo abortarem na primeira ocorrência
    pub fn retry_device_faults(mut self, retry: bool) -> Self {
        self.retry_device_faults = retry;
        self
    }

    /// Executa `op` até ter sucesso ou até a política desistir
    pub fn run<T, F>(&self, watchdog: &Watchdog, mut op: F) -> Result<Attempt<T>, RetryAbort>
    where
        F: FnMut() -> ActuatorResult<T>,
    {
        let mut attempts = 0u32;
        loop {
            watchdog.check()?;
            attempts = attempts.saturating_add(1);

            let err = match op() {
                Ok(value) => return Ok(Attempt { value, attempts }),
                Err(err) => err,
            };

            if err.is_device_fault() && !self.retry_device_faults {
                return Err(RetryAbort::DeviceFault(err));
            }
            if self.max_attempts.is_some_and(|max| attempts >= max) {
                return Err(RetryAbort::Exhausted { attempts, last_error: err });
            }

            tracing::trace!(attempts, cause = err.cause(), "retrying");
            watchdog.sleep(self.backoff.delay(attempts - 1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn failing(n: u32, err: ActuatorError) -> impl FnMut() -> ActuatorResult<u16> {
        let mut left = n;
        move || {
            if left > 0 {
                left -= 1;
                Err(err.clone())
            } else {
                Ok(500)
            }
        }
    }

    #[test]
    fn test_n_failures_take_n_plus_one_attempts() {
        let policy = RetryPolicy::forever();
        for n in [0, 1, 7] {
            let done = policy
                .run(&Watchdog::unbounded(), failing(n, ActuatorError::transport("timeout")))
                .unwrap();
            assert_eq!(done, Attempt { value: 500, attempts: n + 1 });
        }
    }

    #[test]
    fn test_device_faults_retried_by_default() {
        let done = RetryPolicy::forever()
            .run(&Watchdog::unbounded(), failing(3, ActuatorError::device_fault(0x20)))
            .unwrap();
        assert_eq!(done.attempts, 4);
    }

    #[test]
    fn test_bounded_policy_exhausts() {
        let calls = Cell::new(0);
        let result: Result<Attempt<()>, _> = RetryPolicy::bounded(5).run(&Watchdog::unbounded(), || {
            calls.set(calls.get() + 1);
            Err(ActuatorError::transport("timeout"))
        });
        assert_eq!(calls.get(), 5);
        assert!(matches!(result, Err(RetryAbort::Exhausted { attempts: 5, .. })));
    }

    #[test]
    fn test_fail_fast_on_device_fault() {
        let policy = RetryPolicy::forever().retry_device_faults(false);
        let result = policy.run(&Watchdog::unbounded(), failing(1, ActuatorError::device_fault(0x08)));
        assert_eq!(result, Err(RetryAbort::DeviceFault(ActuatorError::device_fault(0x08))));

        // transporte continua sendo retentado
        let done = policy
            .run(&Watchdog::unbounded(), failing(2, ActuatorError::transport("timeout")))
            .unwrap();
        assert_eq!(done.attempts, 3);
    }

    #[test]
    fn test_cancelled_before_first_attempt() {
        let token = CancellationToken::new();
        token.cancel();
        let watchdog = Watchdog::new(Some(token), None);
        let calls = Cell::new(0);
        let result = RetryPolicy::forever().run(&watchdog, || {
            calls.set(calls.get() + 1);
            Ok(())
        });
        assert_eq!(result, Err(RetryAbort::Cancelled));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_cancel_stops_infinite_retry() {
        let token = CancellationToken::new();
        let watchdog = Watchdog::new(Some(token.clone()), None);
        let calls = Cell::new(0);
        let result: Result<Attempt<()>, _> = RetryPolicy::forever().run(&watchdog, || {
            calls.set(calls.get() + 1);
            if calls.get() == 10 {
                token.cancel();
            }
            Err(ActuatorError::transport("timeout"))
        });
        assert_eq!(result, Err(RetryAbort::Cancelled));
        assert_eq!(calls.get(), 10);
    }

    #[test]
    fn test_deadline_stops_infinite_retry() {
        let watchdog = Watchdog::new(None, Some(Duration::from_millis(20)));
        let policy = RetryPolicy::forever().backoff(Backoff::fixed(Duration::from_millis(5)));
        let result: Result<Attempt<()>, _> =
            policy.run(&watchdog, || Err(ActuatorError::transport("timeout")));
        assert_eq!(result, Err(RetryAbort::TimedOut));
    }

    #[test]
    fn test_backoff_delays() {
        let base = Duration::from_millis(100);
        assert_eq!(Backoff::none().delay(5), Duration::ZERO);
        assert_eq!(Backoff::fixed(base).delay(3), base);
        assert_eq!(Backoff::linear(base).delay(2), Duration::from_millis(300));
        assert_eq!(Backoff::exponential(base).delay(0), Duration::from_millis(100));
        assert_eq!(Backoff::exponential(base).delay(3), Duration::from_millis(800));
        assert_eq!(
            Backoff::exponential(base).with_max(Duration::from_secs(1)).delay(10),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_backoff_saturates() {
        let delay = Backoff::exponential(Duration::from_millis(100)).delay(u32::MAX);
        assert!(delay > Duration::ZERO);
    }
}
