//! Continuous polling on top of [`FollowEngine`].

use crate::{FollowEngine, LineProcessor, PageWalker, Result};
use chrono::{DateTime, Duration, Utc};
use esfollow_client::QueryBackend;

/// One step of a poll loop
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent<T> {
    /// A processed line
    Line(T),
    /// The current cycle is done; sleep before pulling again
    Idle,
}

impl<T> PollEvent<T> {
    pub fn into_line(self) -> Option<T> {
        match self {
            PollEvent::Line(line) => Some(line),
            PollEvent::Idle => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, PollEvent::Idle)
    }
}

type Clock = Box<dyn Fn() -> DateTime<Utc>>;

/// State of the poll cycle in progress
struct Cycle<B: QueryBackend> {
    since: DateTime<Utc>,
    /// `None` when the cycle's query failed
    walker: Option<PageWalker<B>>,
}

/// Endless stream of new lines from one index pattern.
///
/// Every cycle asks the engine for documents newer than `now - window` and
/// hands them out one at a time, fetching pages only as lines are pulled.
/// Once the walk is exhausted the tracker is pruned down to the window and
/// the cycle ends with [`PollEvent::Idle`]. The iterator never returns
/// `None`. Errors show up in place and the next pull continues the cycle.
pub struct Poller<B: QueryBackend + Clone, P: LineProcessor> {
    engine: FollowEngine<B>,
    index: Option<String>,
    window: Duration,
    processor: P,
    clock: Clock,
    cycle: Option<Cycle<B>>,
    cycles: u64,
}

impl<B: QueryBackend + Clone, P: LineProcessor> Poller<B, P> {
    pub fn new(engine: FollowEngine<B>, index: Option<String>, window: Duration, processor: P) -> Self {
        Self {
            engine,
            index,
            window,
            processor,
            clock: Box::new(Utc::now),
            cycle: None,
            cycles: 0,
        }
    }

    /// Replace the wall clock
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn engine(&self) -> &FollowEngine<B> {
        &self.engine
    }

    /// Completed or started poll cycles
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    fn start_cycle(&mut self) -> Result<()> {
        let since = (self.clock)() - self.window;
        self.cycles += 1;

        let walk = self.engine.walk_entries_since(self.index.as_deref(), &since);
        let (walker, result) = match walk {
            Ok(walker) => (Some(walker), Ok(())),
            Err(e) => (None, Err(e)),
        };

        self.cycle = Some(Cycle { since, walker });
        result
    }

    fn finish_cycle(&mut self) -> PollEvent<P::Output> {
        let Some(cycle) = self.cycle.take() else {
            return PollEvent::Idle;
        };
        let hits = cycle.walker.as_ref().map_or(0, PageWalker::hits_yielded);
        drop(cycle.walker);

        let pruned = self.engine.prune_before(&cycle.since);
        tracing::debug!(
            cycle = self.cycles,
            hits,
            pruned,
            tracked = self.engine.tracker().len(),
            "poll cycle done"
        );

        PollEvent::Idle
    }
}

impl<B: QueryBackend + Clone, P: LineProcessor> Iterator for Poller<B, P> {
    type Item = Result<PollEvent<P::Output>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cycle.is_none() {
            if let Err(e) = self.start_cycle() {
                return Some(Err(e));
            }
        }

        loop {
            let next_hit = self
                .cycle
                .as_mut()
                .and_then(|cycle| cycle.walker.as_mut())
                .and_then(Iterator::next);

            let hit = match next_hit {
                None => return Some(Ok(self.finish_cycle())),
                Some(Err(e)) => return Some(Err(e.into())),
                Some(Ok(hit)) => hit,
            };

            match self.engine.admit(hit) {
                None => continue,
                Some(Err(e)) => return Some(Err(e)),
                Some(Ok(doc)) => {
                    if let Some(output) = self.processor.process_line(doc) {
                        return Some(Ok(PollEvent::Line(output)));
                    }
                }
            }
        }
    }
}
