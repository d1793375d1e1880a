//! Single-shot readiness resolution for `poll_oneoff`.
//!
//! One pass over the decoded subscription batch, no waiting: fd
//! subscriptions are probed immediately, clock subscriptions are reduced
//! to the earliest deadline which is re-checked against a fresh reading
//! only if no fd fired. The caller drives any retry/backoff loop.

use alloc::vec::Vec;

use crate::abi::{
    ClockId, Errno, Event, Eventrwflags, Eventtype, Subclockflags, Subscription, SubscriptionKind,
};
use crate::clock::ClockSource;
use crate::handle::Readiness;

/// Outcome of probing one fd subscription.
pub enum FdProbe {
    /// No live descriptor at that index.
    Unknown,
    /// Probe result from the handle.
    Probed(Result<Readiness, Errno>),
}

/// Resolve one batch of subscriptions into events, without blocking.
///
/// `probe` answers fd subscriptions: `(fd, is_write)` → readiness.
/// An empty batch is an invalid argument.
pub fn poll_once(
    subs: &[Subscription],
    clock: &mut dyn ClockSource,
    mut probe: impl FnMut(u32, bool) -> FdProbe,
) -> Result<Vec<Event>, Errno> {
    if subs.is_empty() {
        return Err(Errno::Inval);
    }

    let mut events = Vec::new();
    // Earliest clock deadline seen: (deadline, clock id, userdata).
    let mut earliest: Option<(u64, ClockId, u64)> = None;

    for sub in subs {
        match sub.kind {
            SubscriptionKind::Clock {
                id,
                timeout,
                flags,
                ..
            } => {
                let deadline = if flags.contains(Subclockflags::ABSTIME) {
                    timeout
                } else {
                    clock.now(id).saturating_add(timeout)
                };
                let is_earlier = earliest.map_or(true, |(d, _, _)| deadline < d);
                if is_earlier {
                    earliest = Some((deadline, id, sub.userdata));
                }
            }
            SubscriptionKind::FdRead { fd } | SubscriptionKind::FdWrite { fd } => {
                let is_write = matches!(sub.kind, SubscriptionKind::FdWrite { .. });
                let kind = if is_write {
                    Eventtype::FdWrite
                } else {
                    Eventtype::FdRead
                };
                match probe(fd, is_write) {
                    FdProbe::Unknown => events.push(Event {
                        userdata: sub.userdata,
                        errno: Errno::BadF,
                        kind,
                        nbytes: 0,
                        flags: Eventrwflags::empty(),
                    }),
                    FdProbe::Probed(Ok(Some((nbytes, flags)))) => events.push(Event {
                        userdata: sub.userdata,
                        errno: Errno::Success,
                        kind,
                        nbytes,
                        flags,
                    }),
                    FdProbe::Probed(Ok(None)) => {}
                    FdProbe::Probed(Err(errno)) => events.push(Event {
                        userdata: sub.userdata,
                        errno,
                        kind,
                        nbytes: 0,
                        flags: Eventrwflags::empty(),
                    }),
                }
            }
        }
    }

    // Only when no fd fired: has the earliest deadline already passed?
    if events.is_empty() {
        if let Some((deadline, id, userdata)) = earliest {
            if clock.now(id) >= deadline {
                events.push(Event {
                    userdata,
                    errno: Errno::Success,
                    kind: Eventtype::Clock,
                    nbytes: 0,
                    flags: Eventrwflags::empty(),
                });
            }
        }
    }

    Ok(events)
}

// ─── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TickClock;

    fn clock_sub(userdata: u64, timeout: u64, absolute: bool) -> Subscription {
        Subscription {
            userdata,
            kind: SubscriptionKind::Clock {
                id: ClockId::Monotonic,
                timeout,
                precision: 0,
                flags: if absolute {
                    Subclockflags::ABSTIME
                } else {
                    Subclockflags::empty()
                },
            },
        }
    }

    fn read_sub(userdata: u64, fd: u32) -> Subscription {
        Subscription {
            userdata,
            kind: SubscriptionKind::FdRead { fd },
        }
    }

    fn no_fds(_: u32, _: bool) -> FdProbe {
        FdProbe::Unknown
    }

    #[test]
    fn empty_batch_is_invalid() {
        let mut clock = TickClock::new();
        assert_eq!(poll_once(&[], &mut clock, no_fds), Err(Errno::Inval));
    }

    #[test]
    fn past_absolute_deadline_fires_immediately() {
        let mut clock = TickClock::new();
        let events = poll_once(&[clock_sub(7, 1, true)], &mut clock, no_fds).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].userdata, 7);
        assert_eq!(events[0].kind, Eventtype::Clock);
        assert_eq!(events[0].errno, Errno::Success);
    }

    #[test]
    fn distant_deadline_does_not_fire() {
        let mut clock = TickClock::new();
        let events = poll_once(
            &[clock_sub(1, u64::MAX / 2, false)],
            &mut clock,
            no_fds,
        )
        .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn only_the_earliest_clock_fires() {
        let mut clock = TickClock::new();
        let subs = [clock_sub(1, u64::MAX / 2, false), clock_sub(2, 0, true)];
        let events = poll_once(&subs, &mut clock, no_fds).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].userdata, 2);
    }

    #[test]
    fn unknown_fd_reports_badf() {
        let mut clock = TickClock::new();
        let events = poll_once(&[read_sub(3, 42)], &mut clock, no_fds).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].errno, Errno::BadF);
        assert_eq!(events[0].kind, Eventtype::FdRead);
    }

    #[test]
    fn ready_fd_suppresses_the_clock_event() {
        let mut clock = TickClock::new();
        let subs = [clock_sub(1, 0, true), read_sub(2, 0)];
        let events = poll_once(&subs, &mut clock, |_, _| {
            FdProbe::Probed(Ok(Some((5, Eventrwflags::empty()))))
        })
        .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].userdata, 2);
        assert_eq!(events[0].nbytes, 5);
    }

    #[test]
    fn hangup_flag_is_carried_through() {
        let mut clock = TickClock::new();
        let events = poll_once(&[read_sub(9, 0)], &mut clock, |_, _| {
            FdProbe::Probed(Ok(Some((0, Eventrwflags::HANGUP))))
        })
        .unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].flags.contains(Eventrwflags::HANGUP));
    }

    #[test]
    fn not_ready_fd_produces_no_event() {
        let mut clock = TickClock::new();
        let events = poll_once(&[read_sub(1, 0)], &mut clock, |_, _| {
            FdProbe::Probed(Ok(None))
        })
        .unwrap();
        assert!(events.is_empty());
    }
}
