use crate::config::CorrelationPolicy;
use crate::envelope::{Response, ResponseKind};
use crate::error::RemoteError;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use std::collections::{HashMap, VecDeque};

/// Outstanding correlated requests, keyed by the response kind they wait for.
#[derive(Debug)]
pub struct Correlations {
    policy: CorrelationPolicy,
    pending: HashMap<ResponseKind, VecDeque<Sender<Response>>>,
}

impl Correlations {
    pub fn new(policy: CorrelationPolicy) -> Self {
        Self {
            policy,
            pending: HashMap::new(),
        }
    }

    pub fn policy(&self) -> CorrelationPolicy {
        self.policy
    }

    /// Registers a waiter. Must be called before the request is sent.
    pub fn register<T>(
        &mut self,
        kind: ResponseKind,
        extract: fn(Response) -> Option<T>,
    ) -> PendingResponse<T> {
        let (tx, rx) = bounded(1);
        let waiters = self.pending.entry(kind).or_default();
        if self.policy == CorrelationPolicy::LatestWins && !waiters.is_empty() {
            log::debug!(
                target: "handle",
                "{kind:?}: superseding {} unanswered request(s)",
                waiters.len()
            );
            // Dropping the senders disconnects the earlier receivers.
            waiters.clear();
        }
        waiters.push_back(tx);
        PendingResponse { kind, rx, extract }
    }

    /// Hands a response to the oldest waiter of its kind. Returns false when
    /// nobody was waiting.
    pub fn resolve(&mut self, response: Response) -> bool {
        let kind = response.kind();
        let Some(waiters) = self.pending.get_mut(&kind) else {
            log::debug!(target: "handle", "{kind:?} arrived with no waiter");
            return false;
        };
        match waiters.pop_front() {
            Some(waiter) => {
                // A waiter that was dropped is not an error.
                let _ = waiter.send(response);
                true
            }
            None => {
                log::debug!(target: "handle", "{kind:?} arrived with no waiter");
                false
            }
        }
    }

    pub fn outstanding(&self, kind: ResponseKind) -> usize {
        self.pending.get(&kind).map_or(0, VecDeque::len)
    }

    /// Drops every waiter; their receivers observe `Superseded`.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Receiving end of a correlated request.
#[derive(Debug)]
pub struct PendingResponse<T> {
    kind: ResponseKind,
    rx: Receiver<Response>,
    extract: fn(Response) -> Option<T>,
}

impl<T> PendingResponse<T> {
    /// A pending response that is already answered.
    pub fn ready(
        kind: ResponseKind,
        response: Response,
        extract: fn(Response) -> Option<T>,
    ) -> Self {
        let (tx, rx) = bounded(1);
        let _ = tx.send(response);
        Self { kind, rx, extract }
    }

    pub fn kind(&self) -> ResponseKind {
        self.kind
    }

    /// `Ok(None)` while the response has not been routed yet by `poll()`.
    pub fn try_take(&self) -> Result<Option<T>, RemoteError> {
        match self.rx.try_recv() {
            Ok(response) => (self.extract)(response)
                .map(Some)
                .ok_or(RemoteError::UnexpectedResponse(self.kind)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(RemoteError::Superseded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::SoundBankOpStatus;

    fn status(response: Response) -> Option<SoundBankOpStatus> {
        match response {
            Response::SoundBankOp(status) => Some(status),
            _ => None,
        }
    }

    fn applied(presets: usize) -> Response {
        Response::SoundBankOp(SoundBankOpStatus::Applied { presets })
    }

    #[test]
    fn queued_policy_resolves_in_order() {
        let mut correlations = Correlations::new(CorrelationPolicy::Queued);
        let first = correlations.register(ResponseKind::SoundBankOp, status);
        let second = correlations.register(ResponseKind::SoundBankOp, status);
        assert_eq!(correlations.outstanding(ResponseKind::SoundBankOp), 2);

        assert!(correlations.resolve(applied(1)));
        assert!(correlations.resolve(Response::SoundBankOp(
            SoundBankOpStatus::Rejected("x".into())
        )));

        assert_eq!(first.try_take(), Ok(Some(SoundBankOpStatus::Applied { presets: 1 })));
        assert_eq!(second.try_take(), Ok(Some(SoundBankOpStatus::Rejected("x".into()))));
    }

    #[test]
    fn latest_wins_supersedes_earlier_waiter() {
        let mut correlations = Correlations::new(CorrelationPolicy::LatestWins);
        let first = correlations.register(ResponseKind::SoundBankOp, status);
        let second = correlations.register(ResponseKind::SoundBankOp, status);

        assert!(correlations.resolve(applied(2)));
        assert!(!correlations.resolve(applied(3)));

        assert_eq!(first.try_take(), Err(RemoteError::Superseded));
        assert_eq!(second.try_take(), Ok(Some(SoundBankOpStatus::Applied { presets: 2 })));
    }

    #[test]
    fn unresolved_request_reports_nothing_yet() {
        let mut correlations = Correlations::new(CorrelationPolicy::Queued);
        let pending = correlations.register(ResponseKind::SoundBankOp, status);
        assert_eq!(pending.try_take(), Ok(None));
    }
}
