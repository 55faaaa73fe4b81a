//! Bounded busy-polling.
//!
//! The MFRC522 has no interrupt line wired in this design, so every wait is a
//! loop over a register check. All of them go through [`await_condition`] with
//! an explicit [`Budget`].

use embedded_hal::blocking::delay::DelayUs;
use log::trace;

/// How long a wait may spin: `iterations` checks, `pause_us` between checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    pub iterations: u32,
    pub pause_us: u16,
}

impl Budget {
    pub const fn new(iterations: u32, pause_us: u16) -> Self {
        Self {
            iterations,
            pause_us,
        }
    }

    /// Spin without pausing between checks.
    pub const fn spin(iterations: u32) -> Self {
        Self::new(iterations, 0)
    }
}

/// Runs `check` until it yields `Some`, or until the budget is spent.
///
/// Returns `Ok(None)` on exhaustion. Errors from `check` abort the wait immediately.
pub fn await_condition<C, D, T, E, F>(
    com: &mut C,
    delay: &mut D,
    budget: Budget,
    mut check: F,
) -> Result<Option<T>, E>
where
    D: DelayUs<u16>,
    F: FnMut(&mut C) -> Result<Option<T>, E>,
{
    for i in 0..budget.iterations {
        if let Some(v) = check(com)? {
            trace!("condition met after {} checks", i + 1);
            return Ok(Some(v));
        }
        if budget.pause_us != 0 {
            delay.delay_us(budget.pause_us);
        }
    }
    trace!("budget of {} checks exhausted", budget.iterations);
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::NoDelay;

    #[test]
    fn stops_at_first_hit() {
        let mut calls = 0u32;
        let res: Result<_, ()> = await_condition(&mut calls, &mut NoDelay, Budget::spin(10), |n| {
            *n += 1;
            Ok(if *n == 3 { Some(*n) } else { None })
        });
        assert_eq!(res, Ok(Some(3)));
        assert_eq!(calls, 3);
    }

    #[test]
    fn exhaustion_yields_none() {
        let mut calls = 0u32;
        let res: Result<Option<()>, ()> =
            await_condition(&mut calls, &mut NoDelay, Budget::new(2000, 5), |n| {
                *n += 1;
                Ok(None)
            });
        assert_eq!(res, Ok(None));
        assert_eq!(calls, 2000);
    }

    #[test]
    fn zero_budget_never_checks() {
        let mut calls = 0u32;
        let res: Result<Option<()>, ()> =
            await_condition(&mut calls, &mut NoDelay, Budget::spin(0), |n| {
                *n += 1;
                Ok(None)
            });
        assert_eq!(res, Ok(None));
        assert_eq!(calls, 0);
    }

    #[test]
    fn check_error_aborts() {
        let mut calls = 0u32;
        let res: Result<Option<()>, &str> =
            await_condition(&mut calls, &mut NoDelay, Budget::spin(10), |n| {
                *n += 1;
                Err("bus")
            });
        assert_eq!(res, Err("bus"));
        assert_eq!(calls, 1);
    }
}
