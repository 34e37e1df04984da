use std::time::Duration;

use rand::Rng;

use crate::schedule::{ArrivalsKind, Segment, ThreadSchedule};

// Guards integer boundaries against accumulated float error.
const EPS: f64 = 1e-9;

/// One user to spawn, relative to the start of the schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArrivalEvent {
    pub virtual_user_id: u64,
    pub offset: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Span {
    start: f64,
    secs: f64,
    from_rate: f64,
    to_rate: f64,
    kind: ArrivalsKind,
}

impl Span {
    /// Expected number of arrivals over the span.
    fn mass(&self) -> f64 {
        (self.from_rate + self.to_rate) / 2.0 * self.secs
    }

    /// Time into the span at which the cumulative expected count reaches `x`.
    fn time_at_mass(&self, x: f64) -> f64 {
        if x <= 0.0 {
            return 0.0;
        }
        let a = (self.to_rate - self.from_rate) / (2.0 * self.secs);
        let b = self.from_rate;
        let t = if a.abs() < 1e-12 {
            x / b
        } else {
            let disc = (b * b + 4.0 * a * x).max(0.0);
            2.0 * x / (b + disc.sqrt())
        };
        if t.is_finite() {
            t.clamp(0.0, self.secs)
        } else {
            self.secs
        }
    }
}

#[derive(Debug)]
struct ActiveSpan {
    span: Span,
    mass: f64,
    count: u64,
    emitted: u64,
    // local mass of the first threshold inside the span
    first: f64,
    // last uniform order statistic drawn
    last_u: f64,
}

/// Lazily expands a [`ThreadSchedule`] into arrival instants.
///
/// Arrivals fall where the cumulative expected count crosses `k + 0.5`, so a
/// segment whose expected count is `n` yields exactly `n` users (fractions carry
/// over into later segments). `even_arrivals` places them on those crossings;
/// `random_arrivals` draws the same number of arrivals as ordered uniform points
/// in expected-count space, which is a Poisson process conditioned on its count.
#[derive(Debug)]
pub struct ArrivalGenerator<R> {
    spans: Vec<Span>,
    span_idx: usize,
    mass: f64,
    current: Option<ActiveSpan>,
    next_id: u64,
    rng: R,
}

impl<R: Rng> ArrivalGenerator<R> {
    pub fn new(schedule: &ThreadSchedule, rng: R) -> Self {
        let segments = schedule.segments();
        let mut spans = Vec::new();
        let mut rate = 0.0f64;
        let mut t = 0.0f64;

        for (i, seg) in segments.iter().enumerate() {
            match *seg {
                Segment::Rate { per_sec } => rate = per_sec,
                Segment::Arrivals { kind, secs } => {
                    let to_rate = match segments.get(i + 1) {
                        Some(Segment::Rate { per_sec }) => *per_sec,
                        _ => rate,
                    };
                    if secs > 0.0 {
                        spans.push(Span {
                            start: t,
                            secs,
                            from_rate: rate,
                            to_rate,
                            kind,
                        });
                    }
                    rate = to_rate;
                    t += secs;
                }
                Segment::Pause { secs } => t += secs,
            }
        }

        Self {
            spans,
            span_idx: 0,
            mass: 0.0,
            current: None,
            next_id: 0,
            rng,
        }
    }

    fn open_next_span(&mut self) -> bool {
        let Some(span) = self.spans.get(self.span_idx).copied() else {
            return false;
        };
        self.span_idx += 1;

        let before = self.mass;
        let mass = span.mass();
        self.mass = before + mass;

        let crossed_before = (before + 0.5 + EPS).floor();
        let crossed_after = (self.mass + 0.5 + EPS).floor();
        let count = (crossed_after - crossed_before).max(0.0) as u64;

        self.current = Some(ActiveSpan {
            span,
            mass,
            count,
            emitted: 0,
            first: crossed_before + 0.5 - before,
            last_u: 0.0,
        });
        true
    }
}

impl<R: Rng> Iterator for ArrivalGenerator<R> {
    type Item = ArrivalEvent;

    fn next(&mut self) -> Option<ArrivalEvent> {
        loop {
            if let Some(active) = &mut self.current
                && active.emitted < active.count
            {
                let x = match active.span.kind {
                    ArrivalsKind::Even => active.first + active.emitted as f64,
                    ArrivalsKind::Random => {
                        let remaining = (active.count - active.emitted) as f64;
                        let v = 1.0 - self.rng.r#gen::<f64>();
                        let u = 1.0 - (1.0 - active.last_u) * v.powf(1.0 / remaining);
                        active.last_u = u;
                        u * active.mass
                    }
                };
                active.emitted += 1;

                let t = active.span.start + active.span.time_at_mass(x.clamp(0.0, active.mass));
                let id = self.next_id;
                self.next_id += 1;
                return Some(ArrivalEvent {
                    virtual_user_id: id,
                    offset: Duration::try_from_secs_f64(t.max(0.0)).unwrap_or(Duration::MAX),
                });
            }

            self.current = None;
            if !self.open_next_span() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn arrivals(schedule: &str, seed: u64) -> Vec<ArrivalEvent> {
        let schedule: ThreadSchedule = schedule.parse().unwrap_or_else(|e| panic!("{e}"));
        ArrivalGenerator::new(&schedule, StdRng::seed_from_u64(seed)).collect()
    }

    fn secs(events: &[ArrivalEvent]) -> Vec<f64> {
        events.iter().map(|e| e.offset.as_secs_f64()).collect()
    }

    #[test]
    fn random_arrivals_emit_the_expected_count_in_order() {
        for seed in 0..50 {
            let ev = arrivals("rate(50/sec) random_arrivals(100ms) pause(2s)", seed);
            assert_eq!(ev.len(), 5);
            let ts = secs(&ev);
            assert!(ts.windows(2).all(|w| w[0] <= w[1]), "{ts:?}");
            assert!(ts.iter().all(|t| (0.0..=0.1).contains(t)), "{ts:?}");
            let ids: Vec<u64> = ev.iter().map(|e| e.virtual_user_id).collect();
            assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        }
    }

    #[test]
    fn even_arrivals_are_evenly_spaced() {
        let ts = secs(&arrivals("rate(2/sec) even_arrivals(2s)", 1));
        assert_eq!(ts.len(), 4);
        for (t, want) in ts.iter().zip([0.25, 0.75, 1.25, 1.75]) {
            assert!((t - want).abs() < 1e-9, "{ts:?}");
        }
    }

    #[test]
    fn pause_shifts_later_arrivals() {
        let ts = secs(&arrivals("rate(1/sec) pause(10s) even_arrivals(2s)", 1));
        assert_eq!(ts.len(), 2);
        assert!(ts.iter().all(|t| *t >= 10.0));
    }

    #[test]
    fn fractional_counts_carry_between_segments() {
        let ev = arrivals("rate(3/sec) even_arrivals(500ms) pause(1s) even_arrivals(500ms)", 1);
        assert_eq!(ev.len(), 3);
    }

    #[test]
    fn ramp_increases_arrival_density() {
        let ts = secs(&arrivals("rate(0/sec) even_arrivals(10s) rate(10/sec)", 1));
        assert_eq!(ts.len(), 50);
        let first_half = ts.iter().filter(|t| **t < 5.0).count();
        // a linear ramp puts a quarter of the arrivals in the first half
        assert!((11..=14).contains(&first_half), "{first_half}");
    }

    #[test]
    fn zero_rate_or_no_arrival_segments_emit_nothing() {
        assert!(arrivals("random_arrivals(10s)", 1).is_empty());
        assert!(arrivals("rate(10/sec) pause(1s)", 1).is_empty());
    }

    #[test]
    fn same_seed_same_schedule() {
        let a = arrivals("rate(20/sec) random_arrivals(3s)", 9);
        let b = arrivals("rate(20/sec) random_arrivals(3s)", 9);
        assert_eq!(a, b);
        assert_eq!(a.len(), 60);
    }
}
