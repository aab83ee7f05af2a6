//! Candidate lists and the worker-report state machine.
//!
//! `Pending -> Working -> {Finished, Pending (paused), Working (renewed)}`.

use hs_types::{
    Candidate, CandidateKey, CandidateState, ObjectiveDirection, ProtocolError, WorkerReply,
    WorkerStatus,
};
use std::collections::HashSet;

/// Outcome of applying one worker report.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Appended to `finished`. `improved` is set when it became the new best.
    Finished { improved: bool },
    /// Still being evaluated; moved to the fresh end of `working`.
    Renewed,
    /// Handed back; now at the front of `pending`.
    Paused(Candidate),
    /// Nothing changed.
    Rejected(ProtocolError),
}

impl Transition {
    pub fn reply(&self) -> WorkerReply {
        match self {
            Self::Renewed => WorkerReply::Continue,
            Self::Finished { .. } | Self::Paused(_) | Self::Rejected(_) => WorkerReply::Stop,
        }
    }
}

/// Owner of the pending, working and finished lists. A vector lives in at most
/// one of them; `finished` is append-only.
#[derive(Debug, Clone)]
pub struct CandidateBook {
    direction: ObjectiveDirection,
    pending: Vec<Candidate>,
    working: Vec<Candidate>,
    finished: Vec<Candidate>,
    finished_keys: HashSet<CandidateKey>,
    best: Option<usize>,
}

impl CandidateBook {
    pub fn new(direction: ObjectiveDirection) -> Self {
        Self {
            direction,
            pending: Vec::new(),
            working: Vec::new(),
            finished: Vec::new(),
            finished_keys: HashSet::new(),
            best: None,
        }
    }

    pub fn pending(&self) -> &[Candidate] {
        &self.pending
    }

    pub fn working(&self) -> &[Candidate] {
        &self.working
    }

    pub fn finished(&self) -> &[Candidate] {
        &self.finished
    }

    pub fn best(&self) -> Option<&Candidate> {
        self.best.map(|idx| &self.finished[idx])
    }

    pub fn state_of(&self, candidate: &Candidate) -> Option<CandidateState> {
        if self.finished_keys.contains(&candidate.key()) {
            Some(CandidateState::Finished)
        } else if self.working.iter().any(|c| c.same_point(candidate)) {
            Some(CandidateState::Working)
        } else if self.pending.iter().any(|c| c.same_point(candidate)) {
            Some(CandidateState::Pending)
        } else {
            None
        }
    }

    pub fn is_known(&self, candidate: &Candidate) -> bool {
        self.state_of(candidate).is_some()
    }

    /// Queue a freshly generated candidate. Returns `false` for a vector the
    /// book already tracks.
    pub fn push_pending(&mut self, candidate: Candidate) -> bool {
        if self.is_known(&candidate) {
            return false;
        }
        self.pending.push(candidate);
        true
    }

    /// Drop every pending candidate, returning how many were dropped.
    pub fn clear_pending(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    /// Apply a worker report. Validation happens before any list is touched,
    /// so a rejected report never mutates the book.
    pub fn report(&mut self, candidate: Candidate, status: &str) -> Transition {
        let status = match status.parse::<WorkerStatus>() {
            Ok(status) => status,
            Err(err) => return Transition::Rejected(err),
        };

        match self.state_of(&candidate) {
            Some(CandidateState::Finished) => {
                return Transition::Rejected(ProtocolError::AlreadyFinished {
                    params: candidate.params,
                })
            }
            None => {
                return Transition::Rejected(ProtocolError::UnknownCandidate {
                    params: candidate.params,
                })
            }
            Some(CandidateState::Pending | CandidateState::Working) => {}
        }

        if status == WorkerStatus::Finished
            && !candidate.result.is_some_and(|r| r.is_finite())
        {
            return Transition::Rejected(ProtocolError::MissingResult {
                params: candidate.params,
            });
        }

        // The reported copy replaces the stored one; it carries the worker's
        // result, cost and information.
        self.detach(&candidate);

        match status {
            WorkerStatus::Finished => {
                let improved = self.record_finished(candidate);
                Transition::Finished { improved }
            }
            WorkerStatus::Working => {
                self.working.push(candidate);
                Transition::Renewed
            }
            WorkerStatus::Pausing => {
                self.pending.insert(0, candidate.clone());
                Transition::Paused(candidate)
            }
        }
    }

    fn detach(&mut self, candidate: &Candidate) {
        self.pending.retain(|c| !c.same_point(candidate));
        self.working.retain(|c| !c.same_point(candidate));
    }

    fn record_finished(&mut self, candidate: Candidate) -> bool {
        self.finished_keys.insert(candidate.key());
        self.finished.push(candidate);
        let idx = self.finished.len() - 1;

        let improved = match self.best {
            None => true,
            Some(best) => self.finished[idx].is_better_than(&self.finished[best], self.direction),
        };
        if improved {
            self.best = Some(idx);
        }
        improved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book_with_pending(points: &[f64]) -> CandidateBook {
        let mut book = CandidateBook::new(ObjectiveDirection::Minimize);
        for p in points {
            assert!(book.push_pending(Candidate::new(vec![*p])));
        }
        book
    }

    #[test]
    fn working_report_claims_pending_candidate() {
        let mut book = book_with_pending(&[1.0, 2.0]);
        let transition = book.report(Candidate::new(vec![1.0]), "working");
        assert_eq!(transition, Transition::Renewed);
        assert_eq!(transition.reply(), WorkerReply::Continue);
        assert_eq!(book.state_of(&Candidate::new(vec![1.0])), Some(CandidateState::Working));
        assert_eq!(book.pending().len(), 1);
    }

    #[test]
    fn working_report_moves_to_fresh_end() {
        let mut book = book_with_pending(&[1.0, 2.0]);
        book.report(Candidate::new(vec![1.0]), "working");
        book.report(Candidate::new(vec![2.0]), "working");
        book.report(Candidate::new(vec![1.0]), "working");
        let order: Vec<f64> = book.working().iter().map(|c| c.params[0]).collect();
        assert_eq!(order, vec![2.0, 1.0]);
    }

    #[test]
    fn finished_report_tracks_best() {
        let mut book = book_with_pending(&[1.0, 2.0, 3.0]);
        let results = [5.0, 2.0, 8.0];
        for (p, r) in [1.0, 2.0, 3.0].iter().zip(results) {
            let transition = book.report(Candidate::new(vec![*p]).with_result(r), "finished");
            assert_eq!(transition.reply(), WorkerReply::Stop);
        }
        assert_eq!(book.finished().len(), 3);
        assert!(book.working().is_empty());
        assert!(book.pending().is_empty());
        assert_eq!(book.best().and_then(|c| c.result), Some(2.0));
    }

    #[test]
    fn best_follows_maximization() {
        let mut book = CandidateBook::new(ObjectiveDirection::Maximize);
        for (p, r) in [(1.0, 5.0), (2.0, 2.0), (3.0, 8.0)] {
            book.push_pending(Candidate::new(vec![p]));
            book.report(Candidate::new(vec![p]).with_result(r), "finished");
        }
        assert_eq!(book.best().and_then(|c| c.result), Some(8.0));
    }

    #[test]
    fn duplicate_finish_is_rejected_without_mutation() {
        let mut book = book_with_pending(&[1.0]);
        book.report(Candidate::new(vec![1.0]).with_result(3.0), "finished");
        let transition = book.report(Candidate::new(vec![1.0]).with_result(-100.0), "finished");

        assert!(matches!(
            transition,
            Transition::Rejected(ProtocolError::AlreadyFinished { .. })
        ));
        assert_eq!(transition.reply(), WorkerReply::Stop);
        assert_eq!(book.finished().len(), 1);
        assert_eq!(book.best().and_then(|c| c.result), Some(3.0));
    }

    #[test]
    fn pausing_returns_candidate_to_front() {
        let mut book = book_with_pending(&[1.0, 2.0, 3.0]);
        book.report(Candidate::new(vec![3.0]), "working");
        let transition = book.report(Candidate::new(vec![3.0]), "pausing");

        assert_eq!(transition.reply(), WorkerReply::Stop);
        assert!(matches!(transition, Transition::Paused(ref c) if c.params == vec![3.0]));
        assert_eq!(book.pending()[0].params, vec![3.0]);
        assert!(book.working().is_empty());
    }

    #[test]
    fn unknown_candidate_and_status_are_rejected() {
        let mut book = book_with_pending(&[1.0]);
        assert!(matches!(
            book.report(Candidate::new(vec![9.0]), "working"),
            Transition::Rejected(ProtocolError::UnknownCandidate { .. })
        ));
        assert!(matches!(
            book.report(Candidate::new(vec![1.0]), "sleeping"),
            Transition::Rejected(ProtocolError::UnrecognizedStatus { .. })
        ));
        assert_eq!(book.state_of(&Candidate::new(vec![1.0])), Some(CandidateState::Pending));
    }

    #[test]
    fn finish_without_result_is_rejected() {
        let mut book = book_with_pending(&[1.0]);
        let transition = book.report(Candidate::new(vec![1.0]), "finished");
        assert!(matches!(
            transition,
            Transition::Rejected(ProtocolError::MissingResult { .. })
        ));
        assert_eq!(book.state_of(&Candidate::new(vec![1.0])), Some(CandidateState::Pending));
    }

    #[test]
    fn push_pending_skips_known_vectors() {
        let mut book = book_with_pending(&[1.0]);
        assert!(!book.push_pending(Candidate::new(vec![1.0])));
        book.report(Candidate::new(vec![1.0]).with_result(1.0), "finished");
        assert!(!book.push_pending(Candidate::new(vec![1.0])));
        assert_eq!(book.clear_pending(), 0);
    }
}
