//! Pure synchronizer state machine.
//!
//! `handle` takes one event and returns the commands the driver must run.
//! It never performs I/O, so every interleaving can be tested directly.

use remote_gateway::Record;
use tracing::debug;

use crate::error::SyncError;
use crate::view::{CollectionView, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    /// Not mounted yet.
    Idle,
    /// A fetch is in flight.
    Loading,
    /// Snapshot reflects the latest applied fetch.
    Ready,
    /// The latest applied fetch failed; the previous snapshot is kept.
    Error,
    /// Unmounted. Terminal.
    Closed,
}

#[derive(Debug)]
pub enum SyncEvent<R> {
    Mount,
    /// A change signal (or poll tick).
    Signal,
    /// User-requested refresh.
    Refresh,
    FetchResolved {
        seq: u64,
        result: Result<Vec<R>, SyncError>,
    },
    Unmount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    Fetch { seq: u64 },
    CloseSubscription,
}

#[derive(Debug)]
pub struct SyncMachine<R> {
    phase: SyncPhase,
    data: Snapshot<R>,
    error: Option<SyncError>,
    loaded: bool,
    /// Sequence number of the last issued fetch.
    issued: u64,
    /// Highest sequence number applied so far.
    applied: u64,
    in_flight: Option<u64>,
    /// A signal arrived while a fetch was in flight.
    trailing: bool,
    /// Bumped on every externally visible change.
    revision: u64,
}

impl<R: Record> SyncMachine<R> {
    pub fn new() -> Self {
        Self {
            phase: SyncPhase::Idle,
            data: Snapshot::empty(),
            error: None,
            loaded: false,
            issued: 0,
            applied: 0,
            in_flight: None,
            trailing: false,
            revision: 0,
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn data(&self) -> &Snapshot<R> {
        &self.data
    }

    pub fn error(&self) -> Option<&SyncError> {
        self.error.as_ref()
    }

    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    pub fn has_trailing(&self) -> bool {
        self.trailing
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn view(&self) -> CollectionView<R> {
        CollectionView {
            data: self.data.clone(),
            loading: self.in_flight.is_some(),
            error: self.error.clone(),
            phase: self.phase,
            loaded: self.loaded,
        }
    }

    pub fn handle(&mut self, event: SyncEvent<R>) -> Vec<SyncCommand> {
        if self.phase == SyncPhase::Closed {
            if let SyncEvent::FetchResolved { seq, .. } = event {
                debug!(table = R::TABLE, seq, "Discarding response after close");
            }
            return Vec::new();
        }

        match event {
            SyncEvent::Mount => {
                if self.phase != SyncPhase::Idle {
                    return Vec::new();
                }
                vec![self.issue()]
            }
            SyncEvent::Signal | SyncEvent::Refresh => {
                if self.phase == SyncPhase::Idle {
                    return Vec::new();
                }
                if self.in_flight.is_some() {
                    self.trailing = true;
                    return Vec::new();
                }
                vec![self.issue()]
            }
            SyncEvent::FetchResolved { seq, result } => self.resolve(seq, result),
            SyncEvent::Unmount => {
                self.phase = SyncPhase::Closed;
                self.in_flight = None;
                self.trailing = false;
                self.revision += 1;
                vec![SyncCommand::CloseSubscription]
            }
        }
    }

    fn issue(&mut self) -> SyncCommand {
        self.issued += 1;
        self.in_flight = Some(self.issued);
        self.phase = SyncPhase::Loading;
        self.revision += 1;
        SyncCommand::Fetch { seq: self.issued }
    }

    fn resolve(&mut self, seq: u64, result: Result<Vec<R>, SyncError>) -> Vec<SyncCommand> {
        if self.in_flight == Some(seq) {
            self.in_flight = None;
        }

        if seq > self.applied {
            self.applied = seq;
            match result {
                Ok(rows) => {
                    self.data = Snapshot::from_rows(rows);
                    self.error = None;
                    self.loaded = true;
                    self.phase = SyncPhase::Ready;
                    debug!(table = R::TABLE, seq, count = self.data.len(), "Applied snapshot");
                }
                Err(err) => {
                    debug!(table = R::TABLE, seq, error = %err, "Fetch failed; keeping snapshot");
                    self.error = Some(err);
                    self.phase = SyncPhase::Error;
                }
            }
            self.revision += 1;
        } else {
            debug!(table = R::TABLE, seq, applied = self.applied, "Discarding stale response");
        }

        if self.in_flight.is_none() && self.trailing {
            self.trailing = false;
            return vec![self.issue()];
        }
        if self.in_flight.is_some() {
            self.phase = SyncPhase::Loading;
        }
        Vec::new()
    }
}

impl<R: Record> Default for SyncMachine<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remote_gateway::{ErrorKind, Task};
    use serde_json::json;

    fn task(id: &str, title: &str) -> Task {
        Task::from_row(json!({
            "id": id,
            "title": title,
            "status": "todo",
            "priority": "low",
            "due_date": null,
        }))
        .unwrap()
    }

    fn titles(machine: &SyncMachine<Task>) -> Vec<String> {
        machine.data().iter().map(|t| t.title.clone()).collect()
    }

    fn fetched(seq: u64, rows: Vec<Task>) -> SyncEvent<Task> {
        SyncEvent::FetchResolved {
            seq,
            result: Ok(rows),
        }
    }

    fn failed(seq: u64) -> SyncEvent<Task> {
        SyncEvent::FetchResolved {
            seq,
            result: Err(SyncError::new(ErrorKind::Transport, "offline")),
        }
    }

    #[test]
    fn mount_fetches_then_ready() {
        let mut machine = SyncMachine::new();
        assert_eq!(machine.handle(SyncEvent::Mount), vec![SyncCommand::Fetch { seq: 1 }]);
        assert_eq!(machine.phase(), SyncPhase::Loading);
        assert!(machine.view().loading);

        assert!(machine.handle(fetched(1, vec![task("a", "A")])).is_empty());
        assert_eq!(machine.phase(), SyncPhase::Ready);
        assert!(machine.view().loaded);
        assert_eq!(titles(&machine), vec!["A"]);
    }

    #[test]
    fn signals_before_mount_are_ignored() {
        let mut machine: SyncMachine<Task> = SyncMachine::new();
        assert!(machine.handle(SyncEvent::Signal).is_empty());
        assert!(machine.handle(SyncEvent::Refresh).is_empty());
        assert_eq!(machine.phase(), SyncPhase::Idle);
    }

    #[test]
    fn signals_during_fetch_coalesce_into_one_trailing_fetch() {
        let mut machine = SyncMachine::new();
        machine.handle(SyncEvent::Mount);

        for _ in 0..5 {
            assert!(machine.handle(SyncEvent::Signal).is_empty());
        }
        assert!(machine.has_trailing());

        let commands = machine.handle(fetched(1, vec![task("a", "old")]));
        assert_eq!(commands, vec![SyncCommand::Fetch { seq: 2 }]);
        assert_eq!(machine.phase(), SyncPhase::Loading);

        assert!(machine.handle(fetched(2, vec![task("a", "new")])).is_empty());
        assert_eq!(titles(&machine), vec!["new"]);
        assert_eq!(machine.in_flight(), None);
    }

    #[test]
    fn stale_response_is_discarded() {
        let mut machine = SyncMachine::new();
        machine.handle(SyncEvent::Mount);
        machine.handle(SyncEvent::Refresh);
        machine.handle(fetched(1, vec![task("a", "first")]));
        machine.handle(fetched(2, vec![task("a", "second")]));

        // A duplicate or late delivery of the first response.
        machine.handle(fetched(1, vec![task("a", "late")]));
        assert_eq!(titles(&machine), vec!["second"]);
        assert_eq!(machine.phase(), SyncPhase::Ready);

        machine.handle(failed(2));
        assert!(machine.error().is_none());
    }

    #[test]
    fn failure_keeps_last_good_snapshot() {
        let mut machine = SyncMachine::new();
        machine.handle(SyncEvent::Mount);
        machine.handle(fetched(1, vec![task("a", "A")]));

        machine.handle(SyncEvent::Signal);
        machine.handle(failed(2));
        assert_eq!(machine.phase(), SyncPhase::Error);
        assert_eq!(machine.error().map(|e| e.kind), Some(ErrorKind::Transport));
        assert_eq!(titles(&machine), vec!["A"]);

        assert_eq!(machine.handle(SyncEvent::Refresh), vec![SyncCommand::Fetch { seq: 3 }]);
        machine.handle(fetched(3, vec![task("b", "B")]));
        assert!(machine.error().is_none());
        assert_eq!(titles(&machine), vec!["B"]);
    }

    #[test]
    fn closed_is_terminal() {
        let mut machine = SyncMachine::new();
        machine.handle(SyncEvent::Mount);
        machine.handle(fetched(1, vec![task("a", "A")]));
        machine.handle(SyncEvent::Signal);

        assert_eq!(machine.handle(SyncEvent::Unmount), vec![SyncCommand::CloseSubscription]);
        let revision = machine.revision();

        assert!(machine.handle(fetched(2, vec![task("b", "B")])).is_empty());
        assert!(machine.handle(SyncEvent::Signal).is_empty());
        assert!(machine.handle(SyncEvent::Mount).is_empty());
        assert!(machine.handle(SyncEvent::Unmount).is_empty());

        assert_eq!(machine.phase(), SyncPhase::Closed);
        assert_eq!(machine.revision(), revision);
        assert_eq!(titles(&machine), vec!["A"]);
    }

    /// Random mixes of signals, resolutions and late redeliveries: the
    /// snapshot always comes from the newest fetch resolved so far.
    #[test]
    fn random_interleavings_apply_in_issue_order() {
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        for _ in 0..200 {
            let mut machine = SyncMachine::new();
            let mut outstanding: Vec<u64> = Vec::new();
            let mut resolved: Vec<u64> = Vec::new();
            let mut newest = 0u64;

            let collect = |cmds: Vec<SyncCommand>, out: &mut Vec<u64>| {
                for cmd in cmds {
                    if let SyncCommand::Fetch { seq } = cmd {
                        out.push(seq);
                    }
                }
            };

            collect(machine.handle(SyncEvent::Mount), &mut outstanding);

            for _ in 0..30 {
                match next() % 4 {
                    0 | 1 if !outstanding.is_empty() => {
                        let seq = outstanding.remove(0);
                        let cmds = machine.handle(fetched(seq, vec![task("x", &seq.to_string())]));
                        collect(cmds, &mut outstanding);
                        resolved.push(seq);
                        newest = newest.max(seq);
                    }
                    2 if !resolved.is_empty() => {
                        let seq = resolved[(next() as usize) % resolved.len()];
                        if seq < newest {
                            let cmds = machine.handle(fetched(seq, vec![task("x", "late")]));
                            collect(cmds, &mut outstanding);
                        }
                    }
                    _ => collect(machine.handle(SyncEvent::Signal), &mut outstanding),
                }

                assert!(outstanding.len() <= 1);
                if newest > 0 {
                    assert_eq!(titles(&machine), vec![newest.to_string()]);
                }
            }
        }
    }
}
